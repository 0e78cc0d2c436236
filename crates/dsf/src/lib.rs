// This is a library for reading X-Plane's DSF files.
//
// It decodes a whole tile into memory: properties, definition tables, coordinate pools,
// raster layers and the command stream, replayed into terrain patches, objects, polygons
// and network groups. Nothing is ever written back.
//
// DSF - Distribution Scenery Format
//   https://developer.x-plane.com/article/dsf-file-format-specification/
//   https://developer.x-plane.com/article/dsf-usage-in-x-plane/
//   7z compressed: handled by compress-tools behind the "sevenz" feature.
//
// Meshes: https://developer.x-plane.com/article/understanding-and-building-dsf-base-meshes/
//
//
//
// LICENSE INFORMATION
//
// This was written with considerable reference to Laminar Research's xptools package, particularly
// the paths under src/DSFTools. The code is here: https://github.com/X-Plane/xptools and it is
// published under the MIT/X11 license:
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
// 
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
// 
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

use log::{debug, info, trace, warn};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub mod atom;
pub mod command;
pub mod error;
pub mod pool;
pub mod raster;
mod reader;
pub mod scene;
pub mod strings;
pub mod triangle;
pub mod unpack;

pub use atom::{AtomId, Atoms};
pub use command::{Command, CommandId};
pub use error::{DsfError, ErrorKind, Result};
pub use pool::{Pool, PoolScale};
pub use raster::{Raster, SampleType};
pub use scene::{NetworkGroup, Patch, PlacedCommand, Scene, SceneBuilder};
pub use strings::{Bounds, DefinitionTable, Properties, StringTable};
pub use triangle::{Triangle, VertexRef};

/// The z value that asks `Dsf::elevation` to look the height up in the elevation raster.
pub const NO_ELEVATION: f64 = -32768.0;

/// The phases of a load, in the order they run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Stage {
    Atoms,
    Pools,
    Rasters,
    Commands,
    Scene,
}

/// Receives progress while a file is decoded. `done` and `total` are in the stage's own
/// units: bytes for Atoms and Commands, items for the rest.
pub trait LoadObserver {
    fn progress(&mut self, _stage: Stage, _done: usize, _total: usize) {}
}

/// An observer that ignores everything.
pub struct NopObserver;

impl LoadObserver for NopObserver {}

/// Knobs for `Dsf::from_bytes` and `Dsf::open`.
#[derive(Clone, Debug)]
pub struct LoadOptions {
    /// Compare the trailing hash with the MD5 of the rest of the file.
    pub verify_checksum: bool,

    /// Decode CMDS and build the scene. When false, only the header, tables, pools and
    /// rasters are loaded.
    pub decode_commands: bool,
}

impl Default for LoadOptions {
    fn default() -> LoadOptions {
        LoadOptions {
            verify_checksum: false,
            decode_commands: true,
        }
    }
}

impl LoadOptions {
    pub fn verify_checksum(mut self, verify: bool) -> LoadOptions {
        self.verify_checksum = verify;
        self
    }

    pub fn decode_commands(mut self, decode: bool) -> LoadOptions {
        self.decode_commands = decode;
        self
    }
}

/// A fully decoded DSF file.
#[derive(Debug, Default)]
pub struct Dsf {
    /// Where the file came from, if it was opened from disk.
    path: Option<PathBuf>,
    /// Size of the decoded (uncompressed) file.
    size: usize,
    compressed: bool,

    properties: Properties,
    terrain_defs: DefinitionTable,
    object_defs: DefinitionTable,
    polygon_defs: DefinitionTable,
    network_defs: DefinitionTable,
    raster_defs: DefinitionTable,

    pools: Vec<Pool>,
    pools32: Vec<Pool>,
    rasters: Vec<Raster>,

    num_commands: usize,
    scene: Scene,
    /// Set when replaying the commands stopped early. The scene holds what was built.
    scene_error: Option<DsfError>,

    footer: [u8; atom::FOOTER_LEN],
}

impl fmt::Display for Dsf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let print_tables = f.sign_plus();
        match &self.path {
            Some(path) => writeln!(f, "DSF: {}", path.display())?,
            None => writeln!(f, "DSF: (in memory)")?,
        }
        writeln!(
            f,
            "    size {} bytes; original {}",
            self.size,
            if self.compressed {
                "compressed"
            } else {
                "uncompressed"
            }
        )?;
        let props = &self.properties;
        writeln!(
            f,
            "    W,S,E,N: {:?}; overlay={}; num_exclusions={}",
            props.bounds(),
            props.is_overlay(),
            props.num_exclusions()
        )?;
        writeln!(f, "    terrain:    {} items", self.terrain_defs.len())?;
        writeln!(f, "    objects:    {} items", self.object_defs.len())?;
        writeln!(f, "    poly:       {} items", self.polygon_defs.len())?;
        writeln!(f, "    networks:   {} items", self.network_defs.len())?;
        writeln!(f, "    rasters:    {} items", self.raster_defs.len())?;
        writeln!(
            f,
            "    pools:      {} short, {} long",
            self.pools.len(),
            self.pools32.len()
        )?;
        writeln!(
            f,
            "    commands:   {} decoded; {} patches, {} network groups",
            self.num_commands,
            self.scene.patches.len(),
            self.scene.networks.len()
        )?;
        if let Some(e) = &self.scene_error {
            writeln!(f, "    scene incomplete: {}", e)?;
        }
        if print_tables {
            writeln!(f, "\n{}", props)?;
            let tables = [
                ("Terrain Table", &self.terrain_defs),
                ("Object Table", &self.object_defs),
                ("Poly Table", &self.polygon_defs),
                ("Network Table", &self.network_defs),
                ("Raster Names", &self.raster_defs),
            ];
            for (title, table) in tables {
                if !table.is_empty() {
                    writeln!(f, "{}:\n{}", title, table)?;
                }
            }
            if !self.rasters.is_empty() {
                writeln!(f, "Raster Definitions:")?;
                for r in &self.rasters {
                    writeln!(f, "    {}", r)?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

impl Dsf {
    /// Decodes a DSF held in memory.
    pub fn from_bytes(data: &[u8], options: &LoadOptions) -> Result<Dsf> {
        Dsf::from_bytes_observed(data, options, &mut NopObserver)
    }

    /// Like `from_bytes`, reporting progress to `observer`.
    pub fn from_bytes_observed(
        data: &[u8],
        options: &LoadOptions,
        observer: &mut dyn LoadObserver,
    ) -> Result<Dsf> {
        let atoms = Atoms::scan(data, observer)?;
        if options.verify_checksum {
            verify_checksum(data)?;
        }

        let mut dsf = Dsf {
            size: data.len(),
            footer: atoms.footer_hash(),
            properties: Properties::from_atom(atoms.single(AtomId::PROP))?,
            terrain_defs: DefinitionTable::from_atom(AtomId::TERT, atoms.single(AtomId::TERT))?,
            object_defs: DefinitionTable::from_atom(AtomId::OBJT, atoms.single(AtomId::OBJT))?,
            polygon_defs: DefinitionTable::from_atom(AtomId::POLY, atoms.single(AtomId::POLY))?,
            network_defs: DefinitionTable::from_atom(AtomId::NETW, atoms.single(AtomId::NETW))?,
            raster_defs: DefinitionTable::from_atom(AtomId::DEMN, atoms.single(AtomId::DEMN))?,
            ..Default::default()
        };

        dsf.pools = pool::decode_pools::<u16>(atoms.all(AtomId::POOL))?;
        dsf.pools32 = pool::decode_pools::<u32>(atoms.all(AtomId::PO32))?;
        let scales = parse_scales(atoms.all(AtomId::SCAL), 16)?;
        let scales32 = parse_scales(atoms.all(AtomId::SC32), 32)?;
        pool::apply_scales(&mut dsf.pools, &scales, 16)?;
        pool::apply_scales(&mut dsf.pools32, &scales32, 32)?;
        let num_pools = dsf.pools.len() + dsf.pools32.len();
        observer.progress(Stage::Pools, num_pools, num_pools);

        dsf.rasters = raster::decode_rasters(atoms.all(AtomId::DEMI), atoms.all(AtomId::DEMD))?;
        if !dsf.rasters.is_empty() && dsf.raster_defs.len() != dsf.rasters.len() {
            warn!(
                "{} raster names for {} raster layers",
                dsf.raster_defs.len(),
                dsf.rasters.len()
            );
        }
        observer.progress(Stage::Rasters, dsf.rasters.len(), dsf.rasters.len());

        match atoms.single(AtomId::CMDS) {
            Some(cmds) if options.decode_commands => {
                let commands = command::decode_commands(cmds, observer)?;
                dsf.num_commands = commands.len();
                let (scene, error) =
                    scene::build_scene(commands, dsf.polygon_defs.len(), dsf.object_defs.len());
                if let Some(e) = &error {
                    warn!("Scene stopped early: {}", e);
                }
                dsf.scene = scene;
                dsf.scene_error = error;
                observer.progress(Stage::Scene, dsf.num_commands, dsf.num_commands);
            }
            Some(cmds) => debug!("Skipping {} bytes of commands", cmds.len()),
            None => info!("DSF has no commands"),
        }

        debug!(
            "Loaded DSF: {} pools, {} rasters, {} patches",
            num_pools,
            dsf.rasters.len(),
            dsf.scene.patches.len()
        );
        Ok(dsf)
    }

    /// Reads and decodes the DSF at path, which may be raw or 7z compressed.
    pub fn open<P: AsRef<Path>>(path: P, options: &LoadOptions) -> Result<Dsf> {
        let raw = fs::read(&path)?;
        let source_size = raw.len();
        let compressed = raw.starts_with(b"7z");
        let data = if compressed {
            let data = uncompress(&raw)?;
            debug!(
                "Decompressed {} ({} bytes) as 7z into {} bytes.",
                path.as_ref().display(),
                source_size,
                data.len()
            );
            data
        } else {
            debug!(
                "Read uncompressed DSF {} into memory as {} bytes.",
                path.as_ref().display(),
                source_size
            );
            raw
        };
        let mut dsf = Dsf::from_bytes(&data, options)?;
        dsf.path = Some(path.as_ref().to_path_buf());
        dsf.compressed = compressed;
        Ok(dsf)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn is_overlay(&self) -> bool {
        self.properties.is_overlay()
    }

    pub fn terrain_defs(&self) -> &DefinitionTable {
        &self.terrain_defs
    }

    pub fn object_defs(&self) -> &DefinitionTable {
        &self.object_defs
    }

    pub fn polygon_defs(&self) -> &DefinitionTable {
        &self.polygon_defs
    }

    pub fn network_defs(&self) -> &DefinitionTable {
        &self.network_defs
    }

    pub fn raster_defs(&self) -> &DefinitionTable {
        &self.raster_defs
    }

    /// The 16-bit pools, scaled.
    pub fn pools(&self) -> &[Pool] {
        &self.pools
    }

    /// The 32-bit pools, scaled.
    pub fn pools32(&self) -> &[Pool] {
        &self.pools32
    }

    pub fn rasters(&self) -> &[Raster] {
        &self.rasters
    }

    /// Returns the raster layer with the given name if it exists.
    pub fn raster(&self, name: &str) -> Option<&Raster> {
        self.raster_defs
            .position(name)
            .and_then(|i| self.rasters.get(i))
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn patches(&self) -> &[Patch] {
        &self.scene.patches
    }

    /// Object commands, indexed by object definition.
    pub fn objects(&self) -> &[Vec<PlacedCommand>] {
        &self.scene.objects
    }

    /// Polygon commands, indexed by polygon definition.
    pub fn polygons(&self) -> &[Vec<PlacedCommand>] {
        &self.scene.polygons
    }

    pub fn networks(&self) -> &[NetworkGroup] {
        &self.scene.networks
    }

    /// The number of commands decoded from CMDS, 0 if they were skipped.
    pub fn num_commands(&self) -> usize {
        self.num_commands
    }

    /// The error that stopped the scene from being completed, if any.
    pub fn scene_error(&self) -> Option<&DsfError> {
        self.scene_error.as_ref()
    }

    pub fn footer_hash(&self) -> [u8; atom::FOOTER_LEN] {
        self.footer
    }

    /// Returns the planes of a 16-bit pool vertex.
    pub fn vertex(&self, v: VertexRef) -> Option<&[f64]> {
        self.pools.get(v.pool)?.point(v.index)
    }

    /// Resolves the height of a vertex at longitude x, latitude y.
    ///
    /// Returns z unless it is NO_ELEVATION, in which case the first raster layer is
    /// sampled at the nearest pixel. None if the tile bounds are missing, the point lies
    /// outside them, or the tile has no raster.
    pub fn elevation(&self, x: f64, y: f64, z: f64) -> Option<f64> {
        if z as i32 != NO_ELEVATION as i32 {
            return Some(z);
        }
        let bounds = match self.properties.bounds() {
            Some(bounds) => bounds,
            None => {
                warn!("Elevation lookup without sim/west, sim/east, sim/south, sim/north");
                return None;
            }
        };
        if !bounds.contains(x, y) {
            trace!("({}, {}) is outside of {:?}", x, y, bounds);
            return None;
        }
        let raster = self.rasters.first()?;
        if self.raster_defs.get(0) != Some("elevation") {
            warn!(
                "First raster layer is {:?}, not \"elevation\"",
                self.raster_defs.get(0)
            );
        }
        let round = raster.is_post_centric();
        let ix = pixel(x, bounds.west, bounds.east, raster.width(), round);
        let iy = pixel(y, bounds.south, bounds.north, raster.height(), round);
        raster.get(ix, iy)
    }
}

/// Maps a coordinate in [min, max] onto one of `size` pixels.
fn pixel(coord: f64, min: f64, max: f64, size: u32, round: bool) -> usize {
    let span = max - min;
    if size == 0 || span <= 0.0 {
        return 0;
    }
    let pos = (coord - min).abs() / span * (size - 1) as f64;
    let pos = if round { pos.round() } else { pos.trunc() };
    (pos as usize).min(size as usize - 1)
}

fn parse_scales(payloads: &[&[u8]], bits: u32) -> Result<Vec<PoolScale>> {
    payloads
        .iter()
        .map(|data| PoolScale::from_atom(data, bits))
        .collect()
}

/// Verifies the last 16 bytes of data contain the MD5 of the rest.
pub fn verify_checksum(data: &[u8]) -> Result<()> {
    if data.len() < atom::FOOTER_LEN {
        return Err(DsfError::TruncatedFile(data.len()));
    }
    let data_len = data.len() - atom::FOOTER_LEN;
    let digest = md5::compute(&data[..data_len]);
    let mut footer = [0u8; atom::FOOTER_LEN];
    footer.copy_from_slice(&data[data_len..]);
    if digest.0 != footer {
        return Err(DsfError::ChecksumMismatch {
            computed: digest.0,
            footer,
        });
    }
    trace!("checksum {:x} verified", digest);
    Ok(())
}

/// Extracts the single file of a 7z archive.
#[cfg(feature = "sevenz")]
fn uncompress(raw: &[u8]) -> Result<Vec<u8>> {
    use std::io::Cursor;
    let unsupported = |e: compress_tools::Error| DsfError::UnsupportedCompression(e.to_string());

    let files = compress_tools::list_archive_files(Cursor::new(raw)).map_err(unsupported)?;
    if files.len() != 1 {
        return Err(DsfError::UnsupportedCompression(format!(
            "There is not exactly one compressed file in the archive. Found {:?}!",
            &files
        )));
    }
    let mut data = vec![];
    compress_tools::uncompress_archive_file(Cursor::new(raw), &mut data, &files[0])
        .map_err(unsupported)?;
    Ok(data)
}

#[cfg(not(feature = "sevenz"))]
fn uncompress(_raw: &[u8]) -> Result<Vec<u8>> {
    Err(DsfError::UnsupportedCompression(
        "7z archive, but 7z support (the \"sevenz\" feature) is not built in".to_string(),
    ))
}

#[cfg(test)]
mod dsf_tests {
    use super::*;

    fn properties(pairs: &[(&str, &str)]) -> Properties {
        let mut bytes = vec![];
        for (k, v) in pairs {
            bytes.extend_from_slice(k.as_bytes());
            bytes.push(0);
            bytes.extend_from_slice(v.as_bytes());
            bytes.push(0);
        }
        Properties::from_atom(Some(bytes.as_slice())).unwrap()
    }

    fn tile(flags: u16, samples: &[u8]) -> Dsf {
        let mut info = vec![1, 1];
        info.extend_from_slice(&(flags | 2).to_le_bytes());
        info.extend_from_slice(&2u32.to_le_bytes());
        info.extend_from_slice(&2u32.to_le_bytes());
        info.extend_from_slice(&1f32.to_le_bytes());
        info.extend_from_slice(&0f32.to_le_bytes());
        Dsf {
            properties: properties(&[
                ("sim/west", "-1"),
                ("sim/east", "0"),
                ("sim/south", "40"),
                ("sim/north", "41"),
            ]),
            raster_defs: DefinitionTable::from_atom(AtomId::DEMN, Some(&b"elevation\0"[..])).unwrap(),
            rasters: vec![Raster::decode(&info, samples, 0).unwrap()],
            ..Default::default()
        }
    }

    #[test]
    fn explicit_heights_pass_through() {
        let dsf = Dsf::default();
        assert_eq!(Some(120.5), dsf.elevation(0.0, 0.0, 120.5));
        // Only the integer part is compared with the sentinel.
        assert_eq!(Some(-32767.5), dsf.elevation(0.0, 0.0, -32767.5));
    }

    #[test]
    fn sentinel_needs_bounds_and_a_raster() {
        let dsf = Dsf::default();
        assert_eq!(None, dsf.elevation(0.0, 0.0, NO_ELEVATION));

        let dsf = Dsf {
            properties: properties(&[
                ("sim/west", "0"),
                ("sim/east", "1"),
                ("sim/south", "0"),
                ("sim/north", "1"),
            ]),
            ..Default::default()
        };
        assert_eq!(None, dsf.elevation(0.5, 0.5, NO_ELEVATION));
    }

    #[test]
    fn sentinel_samples_the_elevation_raster() {
        // Rows are stored south to north: (0,0)=10 (1,0)=20 (0,1)=30 (1,1)=40.
        let dsf = tile(0, &[10, 20, 30, 40]);
        assert_eq!(Some(10.0), dsf.elevation(-1.0, 40.0, NO_ELEVATION));
        assert_eq!(Some(40.0), dsf.elevation(0.0, 41.0, NO_ELEVATION));
        // Truncated towards the south-west pixel.
        assert_eq!(Some(10.0), dsf.elevation(-0.4, 40.9, NO_ELEVATION));
        assert_eq!(None, dsf.elevation(0.5, 40.5, NO_ELEVATION));
        assert_eq!(None, dsf.elevation(-0.5, 39.0, NO_ELEVATION));
    }

    #[test]
    fn post_centric_rasters_round() {
        let dsf = tile(4, &[10, 20, 30, 40]);
        assert_eq!(Some(40.0), dsf.elevation(-0.4, 40.9, NO_ELEVATION));
        assert_eq!(Some(10.0), dsf.elevation(-0.6, 40.1, NO_ELEVATION));
    }

    #[test]
    fn rasters_by_name() {
        let dsf = tile(0, &[1, 2, 3, 4]);
        assert!(dsf.raster("elevation").is_some());
        assert!(dsf.raster("sea_level").is_none());
    }

    #[test]
    fn pixel_mapping() {
        assert_eq!(0, pixel(5.0, 5.0, 6.0, 1201, false));
        assert_eq!(1200, pixel(6.0, 5.0, 6.0, 1201, false));
        assert_eq!(600, pixel(5.5, 5.0, 6.0, 1201, false));
        assert_eq!(0, pixel(5.0, 5.0, 5.0, 1201, true));
        assert_eq!(0, pixel(5.0, 5.0, 6.0, 0, true));
    }

    #[test]
    fn checksum() {
        let mut data = b"XPLNEDSF".to_vec();
        let digest = md5::compute(&data);
        data.extend_from_slice(&digest.0);
        assert!(verify_checksum(&data).is_ok());

        let last = data.len() - 1;
        data[last] ^= 0xff;
        let err = verify_checksum(&data).unwrap_err();
        assert_eq!(ErrorKind::StructuralMismatch, err.kind());
        assert!(verify_checksum(&[1, 2, 3]).is_err());
    }

    #[test]
    fn options() {
        let options = LoadOptions::default();
        assert!(!options.verify_checksum);
        assert!(options.decode_commands);
        let options = options.verify_checksum(true).decode_commands(false);
        assert!(options.verify_checksum);
        assert!(!options.decode_commands);
    }
}
