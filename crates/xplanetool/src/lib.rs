use log::{debug, info, warn};
use simple_error::bail;
use std::collections::HashMap;
use std::error::Error;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

/// Writes every raster layer of the DSF at path to ./<name>.png.
pub fn exp_pngs<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn Error>> {
    let dsf = dsf::Dsf::open(path.as_ref(), &dsf::LoadOptions::default().decode_commands(false))?;
    if dsf.rasters().is_empty() {
        bail!("{} has no raster layers", path.as_ref().display());
    }
    for (i, raster) in dsf.rasters().iter().enumerate() {
        let name = match dsf.raster_defs().get(i) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("raster{}", i),
        };
        let path = format!("./{}.png", &name);
        raster_to_png(raster, &path)?;
        println!("Wrote {}", &path);
    }
    Ok(())
}

fn raster_to_png<P: AsRef<Path>>(raster: &dsf::Raster, path: P) -> Result<(), Box<dyn Error>> {
    let width = raster.width();
    let height = raster.height();
    let mut img = image::ImageBuffer::new(width, height);

    let (min, max) = raster.value_range().unwrap_or((0.0, 0.0));

    for x in 0..width {
        for y in 0..height {
            let v = raster.get(x as usize, y as usize).unwrap_or(0.0);

            // North up: row 0 of the image is the last row of the raster.
            if v < 0.0 {
                let frac = v / min;
                let stripe = frac * 256.0 - (((frac * 256.0) as i32) as f64);
                let red: u8 = 255 - ((frac * 255.0) as u8);
                let blue: u8 = (stripe * 256.0) as u8;
                img[(x, height - 1 - y)] = image::Rgb([red, 0, blue]);
            } else {
                let frac = v / max;
                let stripe = frac * 256.0 - (((frac * 256.0) as i32) as f64);
                let green: u8 = (frac * 255.0) as u8;
                let blue: u8 = (stripe * 256.0) as u8;
                img[(x, height - 1 - y)] = image::Rgb([0, green, blue]);
            }
        }
    }
    img.save(path.as_ref())?;
    Ok(())
}

/// A longitude/latitude rectangle, parsed from "W,E,S,N".
///
/// When both west and south lie in [0, 1], the area is taken relative to the tile's
/// south-west corner.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Area {
    pub west: f64,
    pub east: f64,
    pub south: f64,
    pub north: f64,
}

impl FromStr for Area {
    type Err = Box<dyn Error>;

    fn from_str(s: &str) -> Result<Area, Box<dyn Error>> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<Vec<f64>, _>>()?;
        if parts.len() != 4 {
            bail!("Expected W,E,S,N but got {:?}", s);
        }
        Ok(Area {
            west: parts[0],
            east: parts[1],
            south: parts[2],
            north: parts[3],
        })
    }
}

impl Area {
    fn is_relative(&self) -> bool {
        (0.0..=1.0).contains(&self.west) && (0.0..=1.0).contains(&self.south)
    }

    /// Moves a relative area onto the tile whose south-west corner is (west, south).
    fn resolve(self, west: f64, south: f64) -> Area {
        if !self.is_relative() {
            return self;
        }
        Area {
            west: self.west + west,
            east: self.east + west,
            south: self.south + south,
            north: self.north + south,
        }
    }

    fn contains(&self, x: f64, y: f64) -> bool {
        self.west <= x && x <= self.east && self.south <= y && y <= self.north
    }
}

#[derive(Clone, Debug)]
pub struct MeshOptions {
    /// Only triangles with at least one vertex inside are exported. Defaults to the tile.
    pub area: Option<Area>,
    /// Horizontal units per degree. Heights are divided by 100000 / scale.
    pub scale: f64,
    /// Export overlay patches too, not just the base mesh.
    pub all_layers: bool,
}

impl Default for MeshOptions {
    fn default() -> MeshOptions {
        MeshOptions {
            area: None,
            scale: 1000.0,
            all_layers: false,
        }
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// The (unnormalized) normal of the triangle a, b, c.
pub fn normal(a: &[f64; 3], b: &[f64; 3], c: &[f64; 3]) -> [f64; 3] {
    let u = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let v = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    [
        u[1] * v[2] - u[2] * v[1],
        u[2] * v[0] - u[0] * v[2],
        u[0] * v[1] - u[1] * v[0],
    ]
}

/// A triangle mesh with vertices shared by their (x, y) position.
#[derive(Debug, Default)]
pub struct Mesh {
    vertices: Vec<[f64; 3]>,
    faces: Vec<[usize; 3]>,
    index: HashMap<(u64, u64), usize>,
}

type LayerKey = (Option<u8>, u32, Option<f32>, Option<f32>);

impl Mesh {
    /// Builds the mesh of the DSF's terrain patches.
    pub fn from_dsf(dsf: &dsf::Dsf, options: &MeshOptions) -> Result<Mesh, Box<dyn Error>> {
        let bounds = match dsf.properties().bounds() {
            Some(bounds) => bounds,
            None => bail!("DSF has no sim/west, sim/east, sim/south, sim/north properties"),
        };
        let (west, south) = (bounds.west.trunc(), bounds.south.trunc());
        let area = match options.area {
            Some(area) => area.resolve(west, south),
            None => Area {
                west: bounds.west,
                east: bounds.east,
                south: bounds.south,
                north: bounds.north,
            },
        };
        info!(
            "Mesh origin at west={} south={}; extracting {:?}",
            west, south, area
        );

        // Group the patches into layers, then go through them by flags and definition.
        let mut layers: Vec<(LayerKey, Vec<&dsf::Patch>)> = vec![];
        for patch in dsf.patches() {
            let (near, far) = patch.lod();
            let key = (patch.flags(), patch.definition(), near, far);
            match layers.iter_mut().find(|(k, _)| *k == key) {
                Some((_, patches)) => patches.push(patch),
                None => layers.push((key, vec![patch])),
            }
        }
        layers.sort_by_key(|(key, _)| (key.0, key.1));
        debug!(
            "Sorted {} mesh patches into {} layers",
            dsf.patches().len(),
            layers.len()
        );

        let mut mesh = Mesh::default();
        let mut unresolved = 0;
        for (key, patches) in &layers {
            if !options.all_layers && key.0 != Some(1) {
                continue;
            }
            for patch in patches {
                'triangles: for triangle in patch.triangles() {
                    let mut points = [[0.0; 3]; 3];
                    for (point, v) in points.iter_mut().zip(triangle.iter()) {
                        match dsf.vertex(*v) {
                            Some(p) if p.len() >= 3 => *point = [p[0], p[1], p[2]],
                            _ => {
                                warn!("Triangle vertex {} does not exist", v);
                                continue 'triangles;
                            }
                        }
                    }
                    if !points.iter().any(|p| area.contains(p[0], p[1])) {
                        continue;
                    }
                    let mut scaled = [[0.0; 3]; 3];
                    for (out, p) in scaled.iter_mut().zip(points.iter()) {
                        let z = match dsf.elevation(p[0], p[1], p[2]) {
                            Some(z) => z,
                            None => {
                                unresolved += 1;
                                continue 'triangles;
                            }
                        };
                        *out = [
                            round3((p[0] - west) * options.scale),
                            round3((p[1] - south) * options.scale),
                            round3(z / (100000.0 / options.scale)),
                        ];
                    }
                    mesh.add_triangle(&scaled);
                }
            }
        }
        if unresolved > 0 {
            warn!(
                "{} triangles skipped for vertices without an elevation",
                unresolved
            );
        }
        info!(
            "Loaded mesh with {} vertices and {} faces",
            mesh.vertices.len(),
            mesh.faces.len()
        );
        Ok(mesh)
    }

    fn vertex_index(&mut self, p: &[f64; 3]) -> usize {
        // + 0.0 folds -0.0 into 0.0.
        let key = ((p[0] + 0.0).to_bits(), (p[1] + 0.0).to_bits());
        let next = self.vertices.len();
        let vertices = &mut self.vertices;
        *self.index.entry(key).or_insert_with(|| {
            vertices.push(*p);
            next
        })
    }

    /// Adds a triangle. The first vertex seen at an (x, y) position is kept for it, and
    /// the face is stored with its vertex order reversed.
    pub fn add_triangle(&mut self, points: &[[f64; 3]; 3]) {
        let a = self.vertex_index(&points[0]);
        let b = self.vertex_index(&points[1]);
        let c = self.vertex_index(&points[2]);
        self.faces.push([c, b, a]);
    }

    pub fn vertices(&self) -> &[[f64; 3]] {
        &self.vertices
    }

    pub fn faces(&self) -> &[[usize; 3]] {
        &self.faces
    }

    /// Writes the mesh as ASCII STL.
    pub fn write_stl<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        writeln!(out, "solid model")?;
        for face in &self.faces {
            let [v1, v2, v3] = face.map(|i| self.vertices[i]);
            let n = normal(&v1, &v2, &v3);
            writeln!(out, "facet normal {} {} {}", n[0], n[1], n[2])?;
            writeln!(out, "  outer loop")?;
            for v in [v1, v2, v3] {
                writeln!(out, "    vertex {} {} {}", v[0], v[1], v[2])?;
            }
            writeln!(out, "  endloop")?;
            writeln!(out, "endfacet")?;
        }
        writeln!(out, "endsolid model")?;
        Ok(())
    }
}

/// Exports the base mesh of the DSF at input as an STL file.
pub fn exp_stl<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    options: &MeshOptions,
) -> Result<(), Box<dyn Error>> {
    let dsf = dsf::Dsf::open(input.as_ref(), &dsf::LoadOptions::default())?;
    if let Some(e) = dsf.scene_error() {
        warn!("Only part of the scene could be read: {}", e);
    }
    let mesh = Mesh::from_dsf(&dsf, options)?;
    let mut out = std::io::BufWriter::new(std::fs::File::create(output.as_ref())?);
    mesh.write_stl(&mut out)?;
    out.flush()?;
    println!(
        "Wrote {} faces to {}",
        mesh.faces().len(),
        output.as_ref().display()
    );
    Ok(())
}
