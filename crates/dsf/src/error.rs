// Error types for the DSF decoder.

use crate::atom::AtomId;
use thiserror::Error;

/// The broad failure classes a caller may want to branch on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// The bytes do not follow the DSF wire format. Aborts the load.
    Format,
    /// Two decoded pieces disagree with each other (counts, shapes, indices).
    StructuralMismatch,
    /// A read needed more bytes than its slice had.
    Bounds,
    /// The file could not be read.
    Io,
}

#[derive(Debug, Error)]
pub enum DsfError {
    #[error("invalid header: expected XPLNEDSF, found {found:?}")]
    InvalidMagic { found: Vec<u8> },

    #[error("unsupported master file format version {0}, only version 1 is supported")]
    UnsupportedVersion(u32),

    #[error("file is {0} bytes, too short to hold the header and footer hash")]
    TruncatedFile(usize),

    #[error("atom {tag:?} at offset {offset} declares length {length} outside [8, {available}]")]
    AtomBounds {
        tag: [u8; 4],
        offset: usize,
        length: usize,
        available: usize,
    },

    #[error("compressed DSF input is not supported: {0}")]
    UnsupportedCompression(String),

    #[error("{atom:?} string table is not valid UTF-8: {source}")]
    InvalidString {
        atom: AtomId,
        source: std::str::Utf8Error,
    },

    #[error("properties table has an odd number of strings ({0})")]
    OddPropertyCount(usize),

    #[error("unknown format specifier {0:?} in layout {1:?}")]
    UnknownSpecifier(char, String),

    #[error("pool {pool} plane {plane} has unknown encoding {encoding}")]
    UnknownPlaneEncoding { pool: usize, plane: usize, encoding: u8 },

    #[error("pool {pool} plane {plane}: run of {run} values overruns the {count} points in the pool")]
    PoolRunOverrun {
        pool: usize,
        plane: usize,
        run: usize,
        count: usize,
    },

    #[error("raster {raster} has invalid flags {flags:#x} for {bytes_per_pixel} bytes per pixel")]
    UnknownPixelEncoding {
        raster: usize,
        flags: u16,
        bytes_per_pixel: u8,
    },

    #[error("found {pools} {bits}-bit pools but {scales} scale atoms")]
    ScaleCountMismatch {
        bits: u32,
        pools: usize,
        scales: usize,
    },

    #[error("{bits}-bit pool {pool} has {planes} planes but {scales} scale pairs")]
    ScalePlaneMismatch {
        bits: u32,
        pool: usize,
        planes: usize,
        scales: usize,
    },

    #[error("found {info} raster info atoms but {data} raster data atoms")]
    RasterCountMismatch { info: usize, data: usize },

    #[error("definition index changed from {expected} to {found} inside patch {patch}")]
    PatchDefinitionChanged {
        patch: usize,
        expected: u32,
        found: u32,
    },

    #[error("geometry command {opcode} found before any terrain patch")]
    NoOpenPatch { opcode: u8 },

    #[error("checksum mismatch: computed {computed:x?}, footer {footer:x?}")]
    ChecksumMismatch { computed: [u8; 16], footer: [u8; 16] },

    #[error("needed {needed} bytes at offset {offset} but the bound ends at {end}")]
    Bounds {
        offset: usize,
        needed: usize,
        end: usize,
    },

    #[error("could not read DSF: {0}")]
    Io(#[from] std::io::Error),
}

impl DsfError {
    pub fn kind(&self) -> ErrorKind {
        use DsfError::*;
        match self {
            InvalidMagic { .. }
            | UnsupportedVersion(_)
            | TruncatedFile(_)
            | AtomBounds { .. }
            | UnsupportedCompression(_)
            | InvalidString { .. }
            | OddPropertyCount(_)
            | UnknownSpecifier(..)
            | UnknownPlaneEncoding { .. }
            | PoolRunOverrun { .. }
            | UnknownPixelEncoding { .. } => ErrorKind::Format,
            ScaleCountMismatch { .. }
            | ScalePlaneMismatch { .. }
            | RasterCountMismatch { .. }
            | PatchDefinitionChanged { .. }
            | NoOpenPatch { .. }
            | ChecksumMismatch { .. } => ErrorKind::StructuralMismatch,
            Bounds { .. } => ErrorKind::Bounds,
            Io(_) => ErrorKind::Io,
        }
    }
}

pub type Result<T> = std::result::Result<T, DsfError>;
