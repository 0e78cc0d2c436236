// A small struct-style layout language for pulling typed fields out of DSF atoms.
//
// A layout is a run of specifiers, each optionally prefixed by a repeat count:
//
//   b/B  i8/u8        h/H  i16/u16      i/I, l/L  i32/u32
//   f    f32          d    f64          s         one string of `count` bytes
//
// Lower case is signed. Everything is little-endian. `4s` reads a single
// four byte string rather than four strings, and is cut short at the bound.

use crate::error::{DsfError, Result};
use crate::reader::DataReader;
use std::fmt;

/// One decoded field.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    F32(f32),
    F64(f64),
    Str(String),
}

impl Value {
    /// The value as an unsigned integer, if it is a non-negative integer.
    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            Value::U8(v) => Some(v as u32),
            Value::U16(v) => Some(v as u32),
            Value::U32(v) => Some(v),
            Value::I8(v) => u32::try_from(v).ok(),
            Value::I16(v) => u32::try_from(v).ok(),
            Value::I32(v) => u32::try_from(v).ok(),
            _ => None,
        }
    }

    /// The value widened to f64, for any numeric value.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::I8(v) => Some(v as f64),
            Value::U8(v) => Some(v as f64),
            Value::I16(v) => Some(v as f64),
            Value::U16(v) => Some(v as f64),
            Value::I32(v) => Some(v as f64),
            Value::U32(v) => Some(v as f64),
            Value::F32(v) => Some(v as f64),
            Value::F64(v) => Some(v),
            Value::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::I8(v) => write!(f, "{}", v),
            Value::U8(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{:?}", v),
        }
    }
}

/// Parses a layout into (count, specifier) pairs without touching any data.
fn specifiers(layout: &str) -> Result<Vec<(usize, char)>> {
    let mut out = vec![];
    let mut count: Option<usize> = None;
    for c in layout.chars() {
        if let Some(d) = c.to_digit(10) {
            count = Some(count.unwrap_or(0) * 10 + d as usize);
            continue;
        }
        match c {
            'b' | 'B' | 'h' | 'H' | 'i' | 'I' | 'l' | 'L' | 'f' | 'd' | 's' => {
                out.push((count.take().unwrap_or(1), c));
            }
            _ => return Err(DsfError::UnknownSpecifier(c, layout.to_string())),
        }
    }
    if count.is_some() {
        // A trailing repeat count with nothing to repeat.
        let last = layout.chars().last().unwrap_or('?');
        return Err(DsfError::UnknownSpecifier(last, layout.to_string()));
    }
    Ok(out)
}

/// A cursor over a bounded window of a byte slice that decodes layouts.
pub struct Unpacker<'a> {
    reader: DataReader<'a>,
    start: usize,
}

impl<'a> Unpacker<'a> {
    /// Creates an unpacker over `data[start..start + len]`, clamped to the end of `data`.
    pub fn new(data: &'a [u8], start: usize, len: usize) -> Result<Unpacker<'a>> {
        if start > data.len() {
            return Err(DsfError::Bounds {
                offset: start,
                needed: 0,
                end: data.len(),
            });
        }
        let end = start.saturating_add(len).min(data.len());
        Ok(Unpacker {
            reader: DataReader::new(&data[start..end]),
            start,
        })
    }

    /// The absolute offset of the cursor within the original slice.
    pub fn position(&self) -> usize {
        self.start + self.reader.position()
    }

    pub fn done(&self) -> bool {
        self.reader.done()
    }

    pub(crate) fn reader(&mut self) -> &mut DataReader<'a> {
        &mut self.reader
    }

    /// Decodes `layout` at the cursor and advances past it.
    pub fn unpack(&mut self, layout: &str) -> Result<Vec<Value>> {
        let mut out = vec![];
        for (count, code) in specifiers(layout)? {
            if code == 's' {
                let n = count.min(self.reader.remaining());
                let bytes = self.reader.take(n)?;
                out.push(Value::Str(String::from_utf8_lossy(bytes).into_owned()));
                continue;
            }
            for _ in 0..count {
                let r = &mut self.reader;
                out.push(match code {
                    'b' => Value::I8(r.read_i8()?),
                    'B' => Value::U8(r.read_u8()?),
                    'h' => Value::I16(r.read_i16()?),
                    'H' => Value::U16(r.read_u16()?),
                    'i' | 'l' => Value::I32(r.read_i32()?),
                    'I' | 'L' => Value::U32(r.read_u32()?),
                    'f' => Value::F32(r.read_f32()?),
                    'd' => Value::F64(r.read_f64()?),
                    _ => unreachable!("specifiers() only yields known characters"),
                });
            }
        }
        Ok(out)
    }
}

/// Decodes `layout` from `data[start..start + len]`.
pub fn unpack(layout: &str, data: &[u8], start: usize, len: usize) -> Result<Vec<Value>> {
    Unpacker::new(data, start, len)?.unpack(layout)
}
