// String-bearing atoms: the PROP properties table and the five definition tables.

use crate::atom::AtomId;
use crate::error::{DsfError, Result};
use itertools::Itertools;
use log::{debug, info, trace};
use std::collections::HashMap;
use std::fmt;

/// A DSF StringTable containing a list of strings identified by index starting at 0.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StringTable {
    /// The strings from the table, in file order.
    strings: Vec<String>,
}

impl fmt::Display for StringTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "String table with {} entries:", self.len())?;
        for (i, s) in self.strings.iter().enumerate() {
            writeln!(f, "  {}: {}", i, &s)?;
        }
        Ok(())
    }
}

impl StringTable {
    /// Splits an atom payload on NUL bytes.
    ///
    /// Empty strings between two NULs are kept. A final string without a
    /// terminating NUL is kept too. Every string must be UTF-8 clean.
    pub fn new(data: &[u8], atom: AtomId) -> Result<StringTable> {
        let mut table = StringTable::default();
        let mut start = 0;
        while start < data.len() {
            let end = data[start..]
                .iter()
                .position(|b| *b == 0)
                .map_or(data.len(), |p| start + p);
            let s = std::str::from_utf8(&data[start..end])
                .map_err(|source| DsfError::InvalidString { atom, source })?;
            table.strings.push(String::from(s));
            start = end + 1;
        }
        trace!("{} holds {} strings", atom, table.len());
        Ok(table)
    }

    /// Returns how many strings are in the table.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Returns the i-th string.
    pub fn get(&self, i: usize) -> Option<&str> {
        self.strings.get(i).map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.strings.iter().map(|s| s.as_str())
    }
}

/// The index-to-name table of one of TERT, OBJT, POLY, NETW or DEMN.
///
/// The index of a definition is its position in the atom's string list, which
/// is how the command stream refers to it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DefinitionTable {
    kind: Option<AtomId>,
    table: StringTable,
}

impl fmt::Display for DefinitionTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            Some(kind) => write!(f, "{} ", kind)?,
            None => write!(f, "(absent) ")?,
        }
        write!(f, "{}", self.table)
    }
}

impl DefinitionTable {
    /// Builds the table from the atom payload, or an empty one when the atom is absent.
    pub fn from_atom(kind: AtomId, data: Option<&[u8]>) -> Result<DefinitionTable> {
        match data {
            Some(data) => Ok(DefinitionTable {
                kind: Some(kind),
                table: StringTable::new(data, kind)?,
            }),
            None => {
                info!("DSF has no {} atom; its definitions are empty", kind);
                Ok(DefinitionTable::default())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns the name of the definition with the given index.
    pub fn get(&self, i: usize) -> Option<&str> {
        self.table.get(i)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.table.iter()
    }

    /// Returns the index of the first definition with the given name.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.iter().position(|s| s == name)
    }
}

/// The tile extent given by the sim/west, sim/south, sim/east and sim/north properties.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Bounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Bounds {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.west <= x && x <= self.east && self.south <= y && y <= self.north
    }
}

/// Represents the contents of the PROP / Properties atom.
#[derive(Clone, Debug, Default)]
pub struct Properties {
    /// The raw table, alternating keys and values.
    table: StringTable,

    /// Lookup from key to the index of its value in the table. A later duplicate key wins.
    index: HashMap<String, usize>,

    /// The number of exclusion entries found in the properties.
    num_exclusions: usize,
}

impl fmt::Display for Properties {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Properties:")?;
        for (k, v) in self.pairs() {
            writeln!(f, "  {}: {}", k, v)?
        }
        Ok(())
    }
}

impl Properties {
    pub fn new(table: StringTable) -> Result<Properties> {
        if table.len() % 2 == 1 {
            return Err(DsfError::OddPropertyCount(table.len()));
        }
        let mut out = Properties {
            index: HashMap::new(),
            num_exclusions: 0,
            table: StringTable::default(),
        };
        for (i, (key, value)) in table.strings.iter().tuples::<(&String, &String)>().enumerate() {
            if key.starts_with("sim/exclude_") {
                out.num_exclusions += 1;
            } else if key == "sim/creation_agent" || key == "sim/internal_revision" {
                info!("DSF {} = {}", &key, &value);
            }
            out.index.insert(key.clone(), 2 * i + 1);
        }
        debug!(
            "{} properties with {} exclusions",
            out.index.len(),
            out.num_exclusions
        );
        out.table = table;
        Ok(out)
    }

    /// Parses the PROP payload, or returns empty properties if the atom is absent.
    pub fn from_atom(data: Option<&[u8]>) -> Result<Properties> {
        match data {
            Some(data) => Properties::new(StringTable::new(data, AtomId::PROP)?),
            None => {
                info!("DSF has no properties defined");
                Ok(Properties::default())
            }
        }
    }

    /// The number of distinct keys.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns the value of the given key, the last one if the key repeats.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.index.get(key).and_then(|i| self.table.get(*i))
    }

    /// Returns the value of the given key or the empty string if not set.
    pub fn get_or_empty(&self, key: &str) -> &str {
        self.get(key).unwrap_or("")
    }

    /// Returns an iterator over the key-value pairs in file order, duplicates included.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.table.iter().tuples::<(&str, &str)>()
    }

    fn number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    /// Returns the tile bounds, if all four are present and numeric.
    pub fn bounds(&self) -> Option<Bounds> {
        Some(Bounds {
            west: self.number("sim/west")?,
            south: self.number("sim/south")?,
            east: self.number("sim/east")?,
            north: self.number("sim/north")?,
        })
    }

    /// Returns true if the sim/overlay=1 property is set.
    pub fn is_overlay(&self) -> bool {
        self.get("sim/overlay") == Some("1")
    }

    /// Returns the number of exclusion entries found in the DSF's properties.
    pub fn num_exclusions(&self) -> usize {
        self.num_exclusions
    }

    pub fn creation_agent(&self) -> Option<&str> {
        self.get("sim/creation_agent")
    }
}

#[cfg(test)]
mod strings_tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn splits_on_nul() {
        let table = StringTable::new(b"one\0\0three\0", AtomId::TERT).unwrap();
        assert_eq!(vec!["one", "", "three"], table.iter().collect::<Vec<_>>());

        // An unterminated final string still counts.
        let table = StringTable::new(b"a\0b", AtomId::TERT).unwrap();
        assert_eq!(Some("b"), table.get(1));
        assert_eq!(None, table.get(2));

        assert!(StringTable::new(b"", AtomId::TERT).unwrap().is_empty());
    }

    #[test]
    fn invalid_utf8_is_a_format_error() {
        let err = StringTable::new(b"ok\0\xff\xfe\0", AtomId::OBJT).unwrap_err();
        assert_eq!(ErrorKind::Format, err.kind());
        assert!(matches!(err, DsfError::InvalidString { atom: AtomId::OBJT, .. }));
    }

    #[test]
    fn definitions_are_indexed_by_position() {
        let defs =
            DefinitionTable::from_atom(AtomId::POLY, Some(b"a.fac\0b.for\0".as_slice())).unwrap();
        assert_eq!(2, defs.len());
        assert_eq!(Some("b.for"), defs.get(1));
        assert_eq!(Some(0), defs.position("a.fac"));

        let absent = DefinitionTable::from_atom(AtomId::NETW, None).unwrap();
        assert!(absent.is_empty());
    }

    #[test]
    fn properties_pair_up() {
        #[rustfmt::skip]
        let data = b"sim/west\0-122\0sim/south\x0047\0sim/east\0-121\0sim/north\x0048\0\
                     sim/overlay\x001\0sim/exclude_obj\x000/0/1/1\0sim/west\0-123\0";
        let props = Properties::from_atom(Some(data.as_slice())).unwrap();
        assert_eq!(6, props.len());
        assert_eq!(7, props.pairs().count());
        // The later sim/west wins.
        assert_eq!(Some("-123"), props.get("sim/west"));
        assert_eq!(
            Some(Bounds {
                west: -123.0,
                south: 47.0,
                east: -121.0,
                north: 48.0
            }),
            props.bounds()
        );
        assert!(props.is_overlay());
        assert_eq!(1, props.num_exclusions());
        assert_eq!(None, props.creation_agent());
        assert_eq!("", props.get_or_empty("sim/planet"));
    }

    #[test]
    fn odd_property_count_fails() {
        let err = Properties::from_atom(Some(b"key\0value\0dangling\0".as_slice())).unwrap_err();
        assert!(matches!(err, DsfError::OddPropertyCount(3)));
    }

    #[test]
    fn bounds_need_all_four_sides() {
        let props = Properties::from_atom(Some(b"sim/west\x001\0sim/east\x002\0".as_slice())).unwrap();
        assert_eq!(None, props.bounds());
        assert!(!props.is_overlay());
    }
}
