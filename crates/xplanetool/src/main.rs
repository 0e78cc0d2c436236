use clap::{arg, command, Command};
use simple_error::bail;
use std::error::Error;
use std::ffi::OsStr;
use std::path::PathBuf;

/// Expands the PATH arguments, treating those with wildcards as glob patterns.
fn expand_paths<'a>(args: impl Iterator<Item = &'a OsStr>) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    let mut paths = vec![];
    for arg in args {
        match arg.to_str() {
            Some(pattern) if pattern.contains(&['*', '?', '['][..]) => {
                for entry in glob::glob(pattern)? {
                    paths.push(entry?);
                }
            }
            _ => paths.push(PathBuf::from(arg)),
        }
    }
    Ok(paths)
}

fn main() -> Result<(), Box<dyn Error>> {
    let matches = command!()
        .propagate_version(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(arg!(-v --verbose ... "Increases verbosity by one level (can be repeated)"))
        .arg(
            arg!(--vmodule <FILTER> "sets the env_logger filter to the given string: \
                                     default,module::path=level,... \
                                     {trace,debug,info,warn,error,none}")
            .required(false),
        )
        .subcommand(Command::new("version").about("Print version information"))
        .subcommand(
            Command::new("dsf")
                .about("prints details about dsf files")
                .arg(arg!(-a - -all "If set, prints out verbose details."))
                .arg(
                    arg!([PATH] "dsf files or glob patterns")
                        .required(true)
                        .multiple_values(true)
                        .allow_invalid_utf8(true),
                ),
        )
        .subcommand(
            Command::new("png")
                .about("extracts the rasters as pngs")
                .arg(arg!([INPUT]).required(true).allow_invalid_utf8(true)),
        )
        .subcommand(
            Command::new("stl")
                .about("exports the base mesh as an STL file")
                .arg(arg!([INPUT]).required(true).allow_invalid_utf8(true))
                .arg(arg!([OUTPUT]).required(true).allow_invalid_utf8(true))
                .arg(
                    arg!(--area <AREA> "W,E,S,N to export; values in [0, 1] are relative to the tile")
                        .required(false),
                )
                .arg(arg!(--scale <SCALE> "units per degree").required(false))
                .arg(arg!(--"all-layers" "Also export overlay patches.")),
        )
        .subcommand(
            Command::new("elevation")
                .about("prints the raster elevation at a point")
                .arg(arg!([INPUT]).required(true).allow_invalid_utf8(true))
                .arg(arg!([LON]).required(true).allow_hyphen_values(true))
                .arg(arg!([LAT]).required(true).allow_hyphen_values(true)),
        )
        .get_matches();

    // Logging stuff: keep above everything but the cmdline parsing.
    let mut log_builder = env_logger::Builder::new();
    match matches.occurrences_of("verbose") {
        1 => {
            log_builder.filter_level(log::LevelFilter::Info);
        }
        2 => {
            log_builder.filter_level(log::LevelFilter::Debug);
        }
        3 => {
            log_builder.filter_level(log::LevelFilter::Trace);
        }
        _ => (),
    };
    if let Some(filter) = matches.value_of("vmodule") {
        log_builder.parse_filters(filter);
    }
    log_builder.init();

    match matches.subcommand() {
        Some(("version", _)) => {
            println!(env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(("dsf", sub_matches)) => {
            let args = sub_matches.values_of_os("PATH").into_iter().flatten();
            let paths = expand_paths(args)?;
            if paths.is_empty() {
                bail!("No dsf files matched");
            }
            let options = dsf::LoadOptions::default();
            for path in paths {
                let info = dsf::Dsf::open(&path, &options)?;
                if sub_matches.is_present("all") {
                    // verbose
                    println!("{:+}", &info); // Use {:+} for verbose printing.
                } else {
                    println!("{}", &info);
                }
            }
        }
        Some(("png", sub_matches)) => {
            if let Some(in_path) = sub_matches.value_of_os("INPUT") {
                xplanetool::exp_pngs(&in_path)?;
            }
        }
        Some(("stl", sub_matches)) => {
            let (in_path, out_path) = match (
                sub_matches.value_of_os("INPUT"),
                sub_matches.value_of_os("OUTPUT"),
            ) {
                (Some(i), Some(o)) => (i, o),
                _ => bail!("stl needs INPUT and OUTPUT"),
            };
            let mut options = xplanetool::MeshOptions {
                all_layers: sub_matches.is_present("all-layers"),
                ..Default::default()
            };
            if let Some(area) = sub_matches.value_of("area") {
                options.area = Some(area.parse()?);
            }
            if let Some(scale) = sub_matches.value_of("scale") {
                options.scale = scale.parse()?;
            }
            xplanetool::exp_stl(&in_path, &out_path, &options)?;
        }
        Some(("elevation", sub_matches)) => {
            let (in_path, lon, lat) = match (
                sub_matches.value_of_os("INPUT"),
                sub_matches.value_of("LON"),
                sub_matches.value_of("LAT"),
            ) {
                (Some(i), Some(x), Some(y)) => (i, x.parse::<f64>()?, y.parse::<f64>()?),
                _ => bail!("elevation needs INPUT, LON and LAT"),
            };
            let options = dsf::LoadOptions::default().decode_commands(false);
            let info = dsf::Dsf::open(&in_path, &options)?;
            match info.elevation(lon, lat, dsf::NO_ELEVATION) {
                Some(z) => println!("{}", z),
                None => bail!("No elevation at ({}, {})", lon, lat),
            }
        }
        _ => unreachable!(),
    }
    Ok(())
}
