// The atom (chunk) layer of a DSF file.
//
// FILE FORMAT NOTES
// 1. "XPLNEDSF" magic cookie.
// 2. 32 bit / 4 byte master file format version: little endian int: 0x1.
// 3. ATOMS: 32-bit atom id; 32-bit unsigned byte count, inc. 8 byte header.
// 4. 16 byte MD5 of everything before it.
//
// Atom ids are written as little-endian u32s, so the HEAD atom shows up in the
// file as the bytes "DAEH". Containers ("atoms of atoms") hold no payload of
// their own: their children follow directly in the flat stream, within the
// container's declared length.

use crate::error::{DsfError, Result};
use crate::reader::DataReader;
use crate::{LoadObserver, Stage};
use log::{debug, trace, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

pub const MAGIC_COOKIE: &[u8; 8] = b"XPLNEDSF";
pub const MASTER_VERSION: u32 = 1;
pub const HEADER_LEN: usize = 12;
pub const FOOTER_LEN: usize = 16;
pub const ATOM_HEADER_LEN: usize = 8;

/// Constants for each of the Atom types found in a DSF file.
///
/// See <https://developer.x-plane.com/article/dsf-file-format-specification/>.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AtomId {
    /// Header container, holding PROP.
    HEAD = 0x48454144,
    /// Definitions container, holding TERT, OBJT, POLY, NETW and DEMN.
    DEFN = 0x4445464e,
    /// Geodata container, holding the POOL, SCAL, PO32 and SC32 atoms.
    GEOD = 0x47454f44,
    /// Raster container, holding one DEMI and one DEMD per raster layer.
    DEMS = 0x44454d53,
    /// The command stream. A top-level leaf.
    CMDS = 0x434d4453,

    /// Properties: a string table of alternating names and values.
    PROP = 0x50524f50,

    /// Terrain definitions (.ter files, or .png / .bmp textures).
    TERT = 0x54455254,
    /// Object definitions (.obj files).
    OBJT = 0x4f424a54,
    /// Polygon definitions: facades, forests, draped polygons.
    POLY = 0x504f4c59,
    /// Vector network definitions (.net files).
    NETW = 0x4e455457,
    /// Raster layer names, in the same order as the DEMI/DEMD pairs.
    DEMN = 0x44454d4e,

    /// A 16-bit planar coordinate pool. Index is its order within GEOD.
    POOL = 0x504f4f4c,
    /// (multiplier, offset) f32 pairs for the POOL with the same index.
    SCAL = 0x5343414c,
    /// A 32-bit planar coordinate pool, used by vector networks.
    PO32 = 0x504f3332,
    /// (multiplier, offset) f32 pairs for the PO32 with the same index.
    SC32 = 0x53433332,

    /// Raster layer information, a fixed 16 byte record.
    DEMI = 0x44454d49,
    /// Raster layer data, the raw pixels described by the matching DEMI.
    DEMD = 0x44454d44,
}

const CONTAINERS: [(AtomId, &[AtomId]); 5] = [
    (AtomId::HEAD, &[AtomId::PROP]),
    (
        AtomId::DEFN,
        &[AtomId::TERT, AtomId::OBJT, AtomId::POLY, AtomId::NETW, AtomId::DEMN],
    ),
    (
        AtomId::GEOD,
        &[AtomId::POOL, AtomId::SCAL, AtomId::PO32, AtomId::SC32],
    ),
    (AtomId::DEMS, &[AtomId::DEMI, AtomId::DEMD]),
    (AtomId::CMDS, &[]),
];

impl AtomId {
    /// Parses the little-endian id of an atom header, or None for unknown atoms.
    pub fn from_u32(value: u32) -> Option<AtomId> {
        use AtomId::*;
        Some(match value {
            0x48454144 => HEAD,
            0x4445464e => DEFN,
            0x47454f44 => GEOD,
            0x44454d53 => DEMS,
            0x434d4453 => CMDS,
            0x50524f50 => PROP,
            0x54455254 => TERT,
            0x4f424a54 => OBJT,
            0x504f4c59 => POLY,
            0x4e455457 => NETW,
            0x44454d4e => DEMN,
            0x504f4f4c => POOL,
            0x5343414c => SCAL,
            0x504f3332 => PO32,
            0x53433332 => SC32,
            0x44454d49 => DEMI,
            0x44454d44 => DEMD,
            _ => return None,
        })
    }

    /// The four bytes as they appear in the file, e.g. b"DAEH" for HEAD.
    pub fn file_tag(self) -> [u8; 4] {
        (self as u32).to_le_bytes()
    }

    /// True for atoms whose payload is a sequence of child atoms.
    pub fn is_container(self) -> bool {
        matches!(
            self,
            AtomId::HEAD | AtomId::DEFN | AtomId::GEOD | AtomId::DEMS
        )
    }

    /// True for leaves that may appear more than once, in file order.
    pub fn is_repeatable(self) -> bool {
        matches!(
            self,
            AtomId::POOL
                | AtomId::SCAL
                | AtomId::PO32
                | AtomId::SC32
                | AtomId::DEMI
                | AtomId::DEMD
        )
    }

    /// The atoms that may appear directly inside this one.
    pub fn children(self) -> &'static [AtomId] {
        CONTAINERS
            .iter()
            .find(|(id, _)| *id == self)
            .map(|(_, children)| *children)
            .unwrap_or(&[])
    }

    /// The container this atom belongs in, or None for top-level atoms.
    pub fn parent(self) -> Option<AtomId> {
        CONTAINERS
            .iter()
            .find(|(_, children)| children.contains(&self))
            .map(|(id, _)| *id)
    }
}

impl fmt::Display for AtomId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The atoms of one DSF file, borrowed from the file's bytes.
#[derive(Debug)]
pub struct Atoms<'a> {
    /// Byte extent of each container seen, header included.
    containers: BTreeMap<AtomId, Range<usize>>,
    /// Payloads of the leaves, in file order.
    leaves: BTreeMap<AtomId, Vec<&'a [u8]>>,
    footer: [u8; FOOTER_LEN],
}

impl<'a> Atoms<'a> {
    /// Checks the file header and walks the flat atom stream up to the footer hash.
    pub fn scan(data: &'a [u8], observer: &mut dyn LoadObserver) -> Result<Atoms<'a>> {
        if data.len() < HEADER_LEN + FOOTER_LEN {
            return Err(DsfError::TruncatedFile(data.len()));
        }
        if &data[0..8] != MAGIC_COOKIE {
            return Err(DsfError::InvalidMagic {
                found: data[0..8].to_vec(),
            });
        }
        let mut header = DataReader::new(&data[8..HEADER_LEN]);
        let version = header.read_u32()?;
        if version != MASTER_VERSION {
            return Err(DsfError::UnsupportedVersion(version));
        }

        let end = data.len() - FOOTER_LEN;
        let mut footer = [0u8; FOOTER_LEN];
        footer.copy_from_slice(&data[end..]);

        let mut atoms = Atoms {
            containers: BTreeMap::new(),
            leaves: BTreeMap::new(),
            footer,
        };
        // The container whose extent we are currently inside, if any.
        let mut open: Option<(AtomId, usize)> = None;
        let mut pos = HEADER_LEN;
        while pos < end {
            let mut reader = DataReader::new(&data[pos..end]);
            let (raw_id, length) = match (reader.read_u32(), reader.read_u32()) {
                (Ok(id), Ok(len)) => (id, len as usize),
                _ => {
                    return Err(DsfError::AtomBounds {
                        tag: [0; 4],
                        offset: pos,
                        length: end - pos,
                        available: end - pos,
                    })
                }
            };
            if length < ATOM_HEADER_LEN || length > end - pos {
                return Err(DsfError::AtomBounds {
                    tag: raw_id.to_le_bytes(),
                    offset: pos,
                    length,
                    available: end - pos,
                });
            }
            if matches!(open, Some((_, open_end)) if pos >= open_end) {
                open = None;
            }

            match AtomId::from_u32(raw_id) {
                Some(id) if id.is_container() => {
                    trace!("container {} at {} with length {}", id, pos, length);
                    if atoms.containers.insert(id, pos..pos + length).is_some() {
                        warn!("DSF has more than one {} atom; merging their children", id);
                    }
                    open = Some((id, pos + length));
                    pos += ATOM_HEADER_LEN;
                }
                Some(id) => {
                    let payload = &data[pos + ATOM_HEADER_LEN..pos + length];
                    trace!("atom {} at {} with {} payload bytes", id, pos, payload.len());
                    if id.parent() != open.map(|(container, _)| container) {
                        warn!(
                            "atom {} at {} is outside its {:?} container; keeping it",
                            id,
                            pos,
                            id.parent()
                        );
                    }
                    let instances = atoms.leaves.entry(id).or_default();
                    if !instances.is_empty() && !id.is_repeatable() {
                        warn!("ignoring duplicate {} atom at {}", id, pos);
                    } else {
                        instances.push(payload);
                    }
                    pos += length;
                }
                None => {
                    warn!(
                        "skipping unknown atom {:?} at {} with length {}",
                        String::from_utf8_lossy(&raw_id.to_le_bytes()),
                        pos,
                        length
                    );
                    pos += length;
                }
            }
            observer.progress(Stage::Atoms, pos, data.len());
        }
        debug!(
            "scanned {} containers and {} leaf kinds from {} bytes",
            atoms.containers.len(),
            atoms.leaves.len(),
            data.len()
        );
        Ok(atoms)
    }

    /// Whether an atom of the given id (container or leaf) was seen.
    pub fn has(&self, id: AtomId) -> bool {
        self.containers.contains_key(&id) || self.leaves.contains_key(&id)
    }

    /// The payload of a singleton leaf.
    pub fn single(&self, id: AtomId) -> Option<&'a [u8]> {
        self.leaves.get(&id).and_then(|v| v.first().copied())
    }

    /// All payloads of a leaf in file order; empty if it never appeared.
    pub fn all(&self, id: AtomId) -> &[&'a [u8]] {
        self.leaves.get(&id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// The trailing 16 byte hash, as read (it is not verified here).
    pub fn footer_hash(&self) -> [u8; FOOTER_LEN] {
        self.footer
    }
}

#[cfg(test)]
mod atom_tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::NopObserver;

    fn atom(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = tag.to_vec();
        out.extend_from_slice(&((payload.len() + 8) as u32).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn file(body: &[u8]) -> Vec<u8> {
        let mut out = b"XPLNEDSF".to_vec();
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(&[0xAA; 16]);
        out
    }

    #[test]
    fn tags_are_reversed_in_the_file() {
        assert_eq!(*b"DAEH", AtomId::HEAD.file_tag());
        assert_eq!(*b"23OP", AtomId::PO32.file_tag());
        assert_eq!(Some(AtomId::PROP), AtomId::from_u32(u32::from_le_bytes(*b"PORP")));
        assert_eq!(None, AtomId::from_u32(u32::from_le_bytes(*b"XXXX")));
    }

    #[test]
    fn hierarchy_table() {
        assert_eq!(&[AtomId::DEMI, AtomId::DEMD], AtomId::DEMS.children());
        assert_eq!(Some(AtomId::GEOD), AtomId::SC32.parent());
        assert_eq!(None, AtomId::CMDS.parent());
        assert!(AtomId::CMDS.children().is_empty());
        assert!(!AtomId::CMDS.is_container());
    }

    #[test]
    fn scans_containers_and_leaves() {
        let prop = atom(b"PORP", b"a\0b\0");
        let mut head = atom(b"DAEH", &[]);
        head[4..8].copy_from_slice(&((8 + prop.len()) as u32).to_le_bytes());
        let pool_a = atom(b"LOOP", &[1, 2]);
        let pool_b = atom(b"LOOP", &[3]);
        let mut geod = atom(b"DOEG", &[]);
        geod[4..8].copy_from_slice(&((8 + pool_a.len() + pool_b.len()) as u32).to_le_bytes());

        let body = [head, prop, geod, pool_a, pool_b].concat();
        let data = file(&body);
        let atoms = Atoms::scan(&data, &mut NopObserver).unwrap();
        assert!(atoms.has(AtomId::HEAD));
        assert!(atoms.has(AtomId::GEOD));
        assert!(!atoms.has(AtomId::DEFN));
        assert_eq!(Some(&b"a\0b\0"[..]), atoms.single(AtomId::PROP));
        assert_eq!(&[&[1u8, 2][..], &[3u8][..]], atoms.all(AtomId::POOL));
        assert!(atoms.all(AtomId::SCAL).is_empty());
        assert_eq!([0xAA; 16], atoms.footer_hash());
    }

    #[test]
    fn leaves_outside_their_container_are_kept() {
        let pool = atom(b"LOOP", &[1]);
        let mut geod = atom(b"DOEG", &[]);
        geod[4..8].copy_from_slice(&((8 + pool.len()) as u32).to_le_bytes());
        // The DEMI follows GEOD's extent instead of sitting in a DEMS.
        let demi = atom(b"IMED", &[5, 6]);

        let body = [geod, pool, demi].concat();
        let data = file(&body);
        let atoms = Atoms::scan(&data, &mut NopObserver).unwrap();
        assert_eq!(&[&[1u8][..]], atoms.all(AtomId::POOL));
        assert_eq!(&[&[5u8, 6][..]], atoms.all(AtomId::DEMI));
        assert!(!atoms.has(AtomId::DEMS));
    }

    #[test]
    fn unknown_atoms_are_skipped() {
        let body = [atom(b"ZZZZ", &[9, 9, 9]), atom(b"SDMC", &[3, 7])].concat();
        let data = file(&body);
        let atoms = Atoms::scan(&data, &mut NopObserver).unwrap();
        assert_eq!(Some(&[3u8, 7][..]), atoms.single(AtomId::CMDS));
    }

    #[test]
    fn duplicate_singleton_keeps_the_first() {
        let body = [atom(b"SDMC", &[1]), atom(b"SDMC", &[2])].concat();
        let data = file(&body);
        let atoms = Atoms::scan(&data, &mut NopObserver).unwrap();
        assert_eq!(1, atoms.all(AtomId::CMDS).len());
        assert_eq!(Some(&[1u8][..]), atoms.single(AtomId::CMDS));
    }

    #[test]
    fn rejects_bad_headers() {
        let mut data = file(&[]);
        data[0] = b'Y';
        assert!(matches!(
            Atoms::scan(&data, &mut NopObserver),
            Err(DsfError::InvalidMagic { .. })
        ));

        let mut data = file(&[]);
        data[8] = 2;
        assert!(matches!(
            Atoms::scan(&data, &mut NopObserver),
            Err(DsfError::UnsupportedVersion(2))
        ));

        let err = Atoms::scan(b"XPLNEDSF", &mut NopObserver).unwrap_err();
        assert_eq!(ErrorKind::Format, err.kind());
    }

    #[test]
    fn rejects_atoms_running_into_the_footer() {
        let mut bad = atom(b"SDMC", &[1, 2, 3]);
        bad[4..8].copy_from_slice(&100u32.to_le_bytes());
        let data = file(&bad);
        assert!(matches!(
            Atoms::scan(&data, &mut NopObserver),
            Err(DsfError::AtomBounds { length: 100, .. })
        ));

        let mut short = atom(b"SDMC", &[]);
        short[4..8].copy_from_slice(&4u32.to_le_bytes());
        let data = file(&short);
        assert!(Atoms::scan(&data, &mut NopObserver).is_err());
    }
}
