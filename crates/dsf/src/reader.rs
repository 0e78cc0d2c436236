use crate::error::{DsfError, Result};

/// Describes a type that can be used with DataReader::read().
///
/// This is to allow DataReader to be called from functions that use generic
/// types (and want to parse different types accordingly).
pub(crate) trait Readable: Sized + Copy {
    /// Reads a Self as little-endian bytes from the reader, and advances it.
    fn read(reader: &mut DataReader) -> Result<Self>;
}

impl Readable for u16 {
    fn read(reader: &mut DataReader) -> Result<u16> {
        reader.read_u16()
    }
}

impl Readable for u32 {
    fn read(reader: &mut DataReader) -> Result<u32> {
        reader.read_u32()
    }
}

/// This is a wrapper around a byte slice that keeps a position and enables easy parsing.
///
/// Every read is checked against the end of the slice and fails with
/// `DsfError::Bounds` instead of panicking.
#[derive(Debug)]
pub(crate) struct DataReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DataReader<'a> {
    /// Creates a reader over the given slice and sets the position to the beginning.
    pub fn new(data: &'a [u8]) -> DataReader<'a> {
        DataReader { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn done(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Returns the next `n` bytes and advances past them.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(DsfError::Bounds {
                offset: self.pos,
                needed: n,
                end: self.data.len(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(i8::from_le_bytes(self.array()?))
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    pub fn read<T: Readable>(&mut self) -> Result<T> {
        T::read(self)
    }

    pub fn skip_n_bytes(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }
}

#[cfg(test)]
mod reader_tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn reads_little_endian() {
        let input: [u8; 7] = [1, 2, 1, 0, 0, 0, 0xff];
        let mut reader = DataReader::new(&input);
        assert_eq!(513, reader.read_u16().unwrap());
        assert_eq!(1, reader.read_u32().unwrap());
        assert_eq!(-1, reader.read_i8().unwrap());
        assert!(reader.done());
    }

    #[test]
    fn short_read_is_a_bounds_error() {
        let input: [u8; 3] = [1, 2, 3];
        let mut reader = DataReader::new(&input);
        let err = reader.read_u32().unwrap_err();
        assert_eq!(ErrorKind::Bounds, err.kind());
        // The failed read doesn't move the cursor.
        assert_eq!(0, reader.position());
        assert_eq!(0x0201, reader.read_u16().unwrap());
    }
}
