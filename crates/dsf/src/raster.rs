// Raster layers: DEMI info records paired with DEMD sample data.

use crate::error::{DsfError, Result};
use crate::reader::DataReader;
use log::{debug, trace, warn};
use std::fmt;

/// The size of a DEMI record.
pub const RASTER_INFO_LEN: usize = 16;

/// How each sample of a raster is stored.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SampleType {
    I8,
    I16,
    I32,
    U8,
    U16,
    U32,
    F32,
}

impl SampleType {
    /// Picks the sample type from DEMI flags: bit 0 is signed, bit 1 is unsigned, else float.
    pub fn from_flags(flags: u16, bytes_per_pixel: u8) -> Option<SampleType> {
        use SampleType::*;
        if flags & 0x1 != 0 {
            match bytes_per_pixel {
                1 => Some(I8),
                2 => Some(I16),
                4 => Some(I32),
                _ => None,
            }
        } else if flags & 0x2 != 0 {
            match bytes_per_pixel {
                1 => Some(U8),
                2 => Some(U16),
                4 => Some(U32),
                _ => None,
            }
        } else if bytes_per_pixel == 4 {
            Some(F32)
        } else {
            None
        }
    }

    fn read(self, reader: &mut DataReader) -> Result<f64> {
        Ok(match self {
            SampleType::I8 => reader.read_i8()? as f64,
            SampleType::I16 => reader.read_i16()? as f64,
            SampleType::I32 => reader.read_i32()? as f64,
            SampleType::U8 => reader.read_u8()? as f64,
            SampleType::U16 => reader.read_u16()? as f64,
            SampleType::U32 => reader.read_u32()? as f64,
            SampleType::F32 => reader.read_f32()? as f64,
        })
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            SampleType::I8 => "i8",
            SampleType::I16 => "i16",
            SampleType::I32 => "i32",
            SampleType::U8 => "u8",
            SampleType::U16 => "u16",
            SampleType::U32 => "u32",
            SampleType::F32 => "f32",
        };
        write!(f, "{}", name)
    }
}

/// Represents a raster header and the corresponding scaled samples.
#[derive(Clone, Debug, PartialEq)]
pub struct Raster {
    version: u8,

    /// Valid values are 1, 2, or 4.
    bytes_per_pixel: u8,

    /// The lower two bits indicate data type (0=float, 1=int, 2=unsigned). 0x4 is the centric flag:
    ///
    /// "A flag value of 4 (bit 3) defines the data as post-centric, as opposed to area-centric. In
    /// post-centric data, the pixel values at the edges of the DEM exactly lie on the geometric
    /// boundary of the DSF.  In point-centric data, the outer edge of the pixel rectangles lie on
    /// the geometric boundary of the DSF."
    flags: u16,

    width: u32,
    height: u32,
    scale: f32,
    offset: f32,
    sample_type: SampleType,

    /// Scaled samples, column by column: data[x * height + y].
    data: Vec<f64>,
}

impl fmt::Display for Raster {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "DEMI information: {}x{} {} pixels with scale={}, offset={}; post_centric={}",
            self.width,
            self.height,
            self.sample_type,
            self.scale,
            self.offset,
            self.is_post_centric()
        )
    }
}

impl Raster {
    /// Decodes one DEMI/DEMD pair. `index` is the layer number, for error reporting.
    pub fn decode(info: &[u8], data: &[u8], index: usize) -> Result<Raster> {
        if info.len() < RASTER_INFO_LEN {
            return Err(DsfError::Bounds {
                offset: 0,
                needed: RASTER_INFO_LEN,
                end: info.len(),
            });
        }
        let mut reader = DataReader::new(info);
        let version = reader.read_u8()?;
        let bytes_per_pixel = reader.read_u8()?;
        let flags = reader.read_u16()?;
        let width = reader.read_u32()?;
        let height = reader.read_u32()?;
        let scale = reader.read_f32()?;
        let offset = reader.read_f32()?;
        if version != 1 {
            warn!("raster {} has unexpected version {}", index, version);
        }
        let sample_type = SampleType::from_flags(flags, bytes_per_pixel).ok_or(
            DsfError::UnknownPixelEncoding {
                raster: index,
                flags,
                bytes_per_pixel,
            },
        )?;

        let bpp = bytes_per_pixel as usize;
        let (w, h) = (width as usize, height as usize);
        let needed = w.checked_mul(h).and_then(|n| n.checked_mul(bpp));
        match needed {
            Some(needed) if needed <= data.len() => {}
            needed => {
                return Err(DsfError::Bounds {
                    offset: 0,
                    needed: needed.unwrap_or(usize::MAX),
                    end: data.len(),
                })
            }
        }

        // The sample for (x, y) lives at y*width*bpp + x*bpp; output is stored by column.
        let mut samples = Vec::with_capacity(w * h);
        for x in 0..w {
            for y in 0..h {
                let pos = y * w * bpp + x * bpp;
                let mut sample = DataReader::new(&data[pos..pos + bpp]);
                let v = sample_type.read(&mut sample)?;
                samples.push(v * scale as f64 + offset as f64);
            }
        }

        let raster = Raster {
            version,
            bytes_per_pixel,
            flags,
            width,
            height,
            scale,
            offset,
            sample_type,
            data: samples,
        };
        trace!("raster {}: {}", index, raster);
        Ok(raster)
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn bytes_per_pixel(&self) -> u8 {
        self.bytes_per_pixel
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    pub fn sample_type(&self) -> SampleType {
        self.sample_type
    }

    pub fn is_post_centric(&self) -> bool {
        self.flags & 0x4 != 0
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn offset(&self) -> f32 {
        self.offset
    }

    /// Returns the scaled value at the given x,y point.
    pub fn get(&self, x: usize, y: usize) -> Option<f64> {
        if x >= self.width as usize || y >= self.height as usize {
            return None;
        }
        self.data.get(x * self.height as usize + y).copied()
    }

    /// Returns the (min, max) of the scaled samples, or None if the raster is empty.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        let mut iter = self.data.iter().copied();
        let first = iter.next()?;
        Some(iter.fold((first, first), |(min, max), v| (min.min(v), max.max(v))))
    }
}

/// Decodes every raster layer, pairing the i-th DEMI with the i-th DEMD.
pub fn decode_rasters(infos: &[&[u8]], data: &[&[u8]]) -> Result<Vec<Raster>> {
    if infos.len() != data.len() {
        return Err(DsfError::RasterCountMismatch {
            info: infos.len(),
            data: data.len(),
        });
    }
    let rasters = infos
        .iter()
        .zip(data)
        .enumerate()
        .map(|(i, (info, data))| Raster::decode(info, data, i))
        .collect::<Result<Vec<Raster>>>()?;
    debug!("decoded {} raster layers", rasters.len());
    Ok(rasters)
}
