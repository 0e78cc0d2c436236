// Pool Value Encoding
//
// - Each pool has one or more planes.
//   - Each plane has the same number of points.
//   - There is exactly one scale atom per pool, which transforms the pool vals into global vals.
// - A pool's raw values (after decompression) may be 16 or 32 bits wide.
// - The raw values within a pool may be encoded directly and/or by delta and run-length encoding.
//
// The decoded numbers are stored interleaved in memory (i*width+plane) so that all related
// values are adjacent, and a vertex can be handed out as a slice.

use crate::error::{DsfError, Result};
use crate::reader::{DataReader, Readable};
use log::{debug, trace, warn};
use std::fmt;

/// Parses and yields a stream of fixed-width, little-endian values (u16 or u32).
struct RawDecoder<'a, 'dr: 'a, T> {
    reader: &'a mut DataReader<'dr>,
    // This is needed to add the T to the struct definition.
    _marker: std::marker::PhantomData<T>,
}

impl<'a, 'dr, T> RawDecoder<'a, 'dr, T> {
    /// Constructs a decoder (iterator) over the given DataReader, which is updated.
    fn new(reader: &'a mut DataReader<'dr>) -> Self {
        Self {
            reader,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: Readable> Iterator for RawDecoder<'_, '_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.done() {
            None
        } else {
            Some(self.reader.read())
        }
    }
}

/// The longest run a run-length header can describe.
const MAX_RUN: usize = 0x7f;

/// Parses and yields a stream of run-length-encoded values.
///
/// The input reader is expected to contain zero or more runs. Each run has a one-byte
/// header, where the lower 7 bits indicate the length of the run, and the top bit
/// indicates whether the run is of the same number (0x80 set) or not:
///
/// Examples with T=u16:
///   - [3, 1, 0, 2, 0, 3, 0] => three mixed u16 values, [1, 2, 3].
///   - [133, 42, 0] => the u16 number 42 repeated 5 times (133 = 5 | 0x80).
///
/// A run that would produce more than `limit` values in total is an error.
struct RunLengthDecoder<'a, 'dr: 'a, T> {
    reader: &'a mut DataReader<'dr>,
    /// When a run is in progress, indicates if the run is of the same number.
    /// (If run_remaining > 0 and this is None, then it's a mixed run.)
    same_value: Option<T>,
    /// If non-zero, the iterator has a run in progress with this many values left.
    run_remaining: usize,
    /// How many more values the plane may hold.
    limit: usize,
    /// (pool, plane) for error reporting.
    context: (usize, usize),
}

impl<'a, 'dr, T> RunLengthDecoder<'a, 'dr, T> {
    /// Constructs a decoder (iterator) over the given DataReader, which is updated.
    fn new(reader: &'a mut DataReader<'dr>, limit: usize, context: (usize, usize)) -> Self {
        Self {
            reader,
            same_value: None,
            run_remaining: 0,
            limit,
            context,
        }
    }

    fn start_run(&mut self) -> Result<()>
    where
        T: Readable,
    {
        // A one-byte header describes the next run's type and length.
        let header = self.reader.read_u8()?;
        let is_same = (header & 0x80) != 0;
        let count = (header & 0x7f) as usize;
        if count > self.limit {
            return Err(DsfError::PoolRunOverrun {
                pool: self.context.0,
                plane: self.context.1,
                run: count,
                count: self.limit,
            });
        }
        self.same_value = if is_same {
            Some(self.reader.read()?)
        } else {
            None
        };
        self.run_remaining = count;
        Ok(())
    }
}

impl<T: Readable> Iterator for RunLengthDecoder<'_, '_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        // Zero-length runs are legal, so keep reading headers until one has values.
        while self.run_remaining == 0 {
            if self.limit == 0 || self.reader.done() {
                return None;
            }
            if let Err(e) = self.start_run() {
                return Some(Err(e));
            }
        }
        self.run_remaining -= 1;
        self.limit -= 1;
        match self.same_value {
            // A repeated run of the same value.
            Some(v) => Some(Ok(v)),
            // A run of mixed values.
            None => Some(self.reader.read()),
        }
    }
}

/// Necessary properties and functions for a POOL or PO32 value.
pub(crate) trait PoolValue: Readable + fmt::Debug + 'static {
    /// The word width of the pool family.
    const BITS: u32;

    /// Wrapper around u16/u32::wrapping_add().
    fn wrapping_add(a: Self, b: Self) -> Self;
    /// Returns 0.
    fn zero() -> Self;

    fn to_f64(self) -> f64;
}

impl PoolValue for u32 {
    const BITS: u32 = 32;

    fn wrapping_add(a: u32, b: u32) -> u32 {
        a.wrapping_add(b)
    }
    fn zero() -> u32 {
        0
    }
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl PoolValue for u16 {
    const BITS: u32 = 16;

    fn wrapping_add(a: u16, b: u16) -> u16 {
        a.wrapping_add(b)
    }
    fn zero() -> u16 {
        0
    }
    fn to_f64(self) -> f64 {
        self as f64
    }
}

/// This describes the way that the data in pools is encoded.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PoolEncodingMode {
    /// Values are encoded as themselves, in little-endian byte order.
    Raw = 0,

    /// Values are the sum of the previous value and the currently encoded one.
    ///
    /// The values are interpreted pre-scaling (i.e. over the 16- or 32-bit unsigned data
    /// in the pool), and the encoding relies on overflow to encode negative deltas.
    Differenced = 1,

    /// Values are encoded in a run-length format.
    ///
    /// Each run starts with a one-byte header. The lower 7 bits indicate the number of values
    /// in the run, up to 127. If the 0x80 bit is set, then the header is a run of the same value,
    /// and that value follows in the next 2 or 4 bytes. Otherwise, N values follow in the next
    /// 2*N or 4*N bytes.
    RunLength = 2,

    /// The values are RunLength encoded Differences, as described in the two methods above.
    ///
    /// This method is efficient at encoding many raw values that are either identical (with
    /// differences of zero) or evenly-spaced. It is the most common mode in practice.
    RunLengthDifferenced = 3,
}

impl PoolEncodingMode {
    pub fn from_u8(value: u8) -> Option<PoolEncodingMode> {
        match value {
            0 => Some(PoolEncodingMode::Raw),
            1 => Some(PoolEncodingMode::Differenced),
            2 => Some(PoolEncodingMode::RunLength),
            3 => Some(PoolEncodingMode::RunLengthDifferenced),
            _ => None,
        }
    }

    pub fn is_differenced(self) -> bool {
        (self as u8) & 1 != 0
    }

    pub fn is_run_length(self) -> bool {
        (self as u8) & 2 != 0
    }
}

/// The (multiplier, offset) pairs of one SCAL/SC32 atom, one pair per plane.
#[derive(Clone, Debug, PartialEq)]
pub struct PoolScale {
    bits: u32,
    planes: Vec<(f64, f64)>,
}

impl PoolScale {
    pub fn new(bits: u32, planes: Vec<(f64, f64)>) -> PoolScale {
        PoolScale { bits, planes }
    }

    /// Parses a SCAL (bits=16) or SC32 (bits=32) payload of little-endian f32 pairs.
    pub fn from_atom(data: &[u8], bits: u32) -> Result<PoolScale> {
        let mut reader = DataReader::new(data);
        let mut planes = Vec::with_capacity(data.len() / 8);
        while reader.remaining() >= 8 {
            let multiplier = reader.read_f32()? as f64;
            let offset = reader.read_f32()? as f64;
            planes.push((multiplier, offset));
        }
        if !reader.done() {
            warn!(
                "{}-bit scale atom has {} trailing bytes",
                bits,
                reader.remaining()
            );
        }
        Ok(PoolScale { bits, planes })
    }

    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// The (multiplier, offset) of the given plane.
    pub fn plane(&self, i: usize) -> Option<(f64, f64)> {
        self.planes.get(i).copied()
    }

    /// The largest raw value of the family, 2^bits - 1.
    pub fn max_int(&self) -> f64 {
        ((1u64 << self.bits) - 1) as f64
    }

    /// Maps a raw fixed-point value of a plane to its real value.
    ///
    /// Planes with a zero multiplier pass through unchanged, per DSFTool:
    /// <https://github.com/X-Plane/xptools/blob/master/src/Utils/XChunkyFileUtils.cpp#L624>
    pub fn to_real(&self, plane: usize, raw: f64) -> f64 {
        match self.plane(plane) {
            Some((multiplier, offset)) if multiplier != 0.0 => {
                raw * multiplier / self.max_int() + offset
            }
            _ => raw,
        }
    }

    /// The inverse of to_real(), rounded to the nearest integer.
    pub fn to_raw(&self, plane: usize, real: f64) -> f64 {
        match self.plane(plane) {
            Some((multiplier, offset)) if multiplier != 0.0 => {
                ((real - offset) * self.max_int() / multiplier).round()
            }
            _ => real,
        }
    }
}

/// Represents one POOL or PO32 atom, decoded.
///
/// The same type is used for both POOL (16-bit) and PO32 (32-bit) families. Values are the raw
/// unsigned integers until scale() is called, and real values afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct Pool {
    planes: usize,
    points: usize,

    /// The decoded values, in an interleaved plane format.
    data: Vec<f64>,

    /// The scale applied to data, if any.
    scale: Option<PoolScale>,
}

pub struct PointsIter<'a> {
    pool: &'a Pool,
    pos: usize,
}

impl<'a> Iterator for PointsIter<'a> {
    type Item = &'a [f64];

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.pool.point(self.pos)?;
        self.pos += 1;
        Some(result)
    }
}

impl Pool {
    /// Builds a pool from interleaved values; used for synthetic pools.
    pub fn from_points(planes: usize, data: Vec<f64>) -> Pool {
        let points = if planes == 0 { 0 } else { data.len() / planes };
        Pool {
            planes,
            points,
            data,
            scale: None,
        }
    }

    pub fn num_points(&self) -> usize {
        self.points
    }

    pub fn num_planes(&self) -> usize {
        self.planes
    }

    pub fn is_empty(&self) -> bool {
        self.points == 0
    }

    /// Returns the planes of the i-th point.
    pub fn point(&self, i: usize) -> Option<&[f64]> {
        if i >= self.points {
            return None;
        }
        let start = i * self.planes;
        Some(&self.data[start..start + self.planes])
    }

    pub fn iter(&self) -> PointsIter<'_> {
        PointsIter { pool: self, pos: 0 }
    }

    pub fn is_scaled(&self) -> bool {
        self.scale.is_some()
    }

    /// Parses the points of one pool atom payload.
    ///
    /// `index` is the pool's position within its family, for error reporting.
    pub(crate) fn decode<T: PoolValue>(data: &[u8], index: usize) -> Result<Pool> {
        let mut reader = DataReader::new(data);
        let points = reader.read_u32()? as usize;
        let planes = reader.read_u8()? as usize;
        trace!(
            "  pool {} has {} planes with {} points per plane",
            index,
            planes,
            points
        );
        // Every plane holds at least an encoding byte and the shorter of its raw or
        // fully run-length encoded forms.
        let word = T::BITS as usize / 8;
        let needed = min_plane_bytes(points, word)
            .and_then(|n| n.checked_add(1))
            .and_then(|n| n.checked_mul(planes))
            .and_then(|n| n.checked_add(reader.position()));
        match needed {
            Some(needed) if needed <= data.len() => {}
            needed => {
                return Err(DsfError::Bounds {
                    offset: reader.position(),
                    needed: needed.unwrap_or(usize::MAX),
                    end: data.len(),
                })
            }
        }
        let mut pool = Pool {
            planes,
            points,
            data: vec![0.0; points * planes],
            scale: None,
        };

        for plane in 0..planes {
            let encoding = reader.read_u8()?;
            let mode = PoolEncodingMode::from_u8(encoding).ok_or(
                DsfError::UnknownPlaneEncoding {
                    pool: index,
                    plane,
                    encoding,
                },
            )?;
            trace!("  plane {} with encoding {:?}", plane, mode);

            let decoder: Box<dyn Iterator<Item = Result<T>> + '_> = if mode.is_run_length() {
                Box::new(RunLengthDecoder::new(&mut reader, points, (index, plane)))
            } else {
                Box::new(RawDecoder::new(&mut reader))
            };

            let mut prev = T::zero(); // For the differenced encodings.
            let mut filled = 0;
            for (j, next) in decoder.take(points).enumerate() {
                let mut next = next?;
                if mode.is_differenced() {
                    // Differenced mode relies on unsigned overflow wrap-around.
                    next = T::wrapping_add(next, prev);
                    prev = next;
                }
                pool.data[j * planes + plane] = next.to_f64();
                filled = j + 1;
            }
            if filled < points {
                return Err(DsfError::Bounds {
                    offset: reader.position(),
                    needed: (points - filled) * (T::BITS as usize / 8),
                    end: data.len(),
                });
            }
        }
        if !reader.done() {
            warn!(
                "pool {} has {} trailing bytes after its last plane",
                index,
                reader.remaining()
            );
        }
        trace!("{:?}", pool.iter().take(5).collect::<Vec<&[f64]>>());
        Ok(pool)
    }

    /// Applies the forward transform to every plane. Calling it again is a no-op.
    pub fn scale(&mut self, scale: &PoolScale) -> Result<()> {
        if self.is_scaled() {
            warn!("pool is already scaled; not scaling it twice");
            return Ok(());
        }
        if scale.num_planes() != self.planes {
            return Err(DsfError::ScalePlaneMismatch {
                bits: scale.bits(),
                pool: 0,
                planes: self.planes,
                scales: scale.num_planes(),
            });
        }
        let planes = self.planes;
        for (i, v) in self.data.iter_mut().enumerate() {
            *v = scale.to_real(i % planes, *v);
        }
        self.scale = Some(scale.clone());
        Ok(())
    }

    /// Reverts scale(), turning the values back into raw integers.
    pub fn unscale(&mut self) {
        if let Some(scale) = self.scale.take() {
            let planes = self.planes;
            for (i, v) in self.data.iter_mut().enumerate() {
                *v = scale.to_raw(i % planes, *v);
            }
        }
    }
}

/// The fewest bytes a plane of `points` values of `word` bytes can be encoded in.
fn min_plane_bytes(points: usize, word: usize) -> Option<usize> {
    let raw = points.checked_mul(word)?;
    let runs = (points / MAX_RUN + usize::from(points % MAX_RUN != 0)).checked_mul(1 + word)?;
    Some(raw.min(runs))
}

/// Decodes every pool of one family, in file order.
pub(crate) fn decode_pools<T: PoolValue>(payloads: &[&[u8]]) -> Result<Vec<Pool>> {
    let pools = payloads
        .iter()
        .enumerate()
        .map(|(i, data)| Pool::decode::<T>(data, i))
        .collect::<Result<Vec<Pool>>>()?;
    debug!(
        "decoded {} {}-bit pools with {} points",
        pools.len(),
        T::BITS,
        pools.iter().map(|p| p.num_points()).sum::<usize>()
    );
    Ok(pools)
}

/// Scales each pool of a family with the scale atom of the same index.
///
/// The number of scale atoms must equal the number of pools, and each non-empty
/// pool must have as many planes as its scale atom has pairs.
pub fn apply_scales(pools: &mut [Pool], scales: &[PoolScale], bits: u32) -> Result<()> {
    if pools.len() != scales.len() {
        return Err(DsfError::ScaleCountMismatch {
            bits,
            pools: pools.len(),
            scales: scales.len(),
        });
    }
    for (i, (pool, scale)) in pools.iter_mut().zip(scales).enumerate() {
        if pool.is_empty() {
            debug!("empty {}-bit pool {} not scaled", bits, i);
            continue;
        }
        pool.scale(scale).map_err(|e| match e {
            DsfError::ScalePlaneMismatch {
                bits,
                planes,
                scales,
                ..
            } => DsfError::ScalePlaneMismatch {
                bits,
                pool: i,
                planes,
                scales,
            },
            e => e,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod decoder_tests {
    use super::*;

    fn collect<T>(decoder: impl Iterator<Item = Result<T>>) -> Vec<T> {
        decoder.map(|v| v.unwrap()).collect()
    }

    #[test]
    fn raw_u16() {
        let input: [u8; 8] = [0, 0, 1, 0, 1, 2, 255, 255];
        let mut reader = DataReader::new(&input);
        let values: Vec<u16> = collect(RawDecoder::new(&mut reader));
        assert_eq!(values, [0, 1, 513, u16::MAX]);
    }

    #[test]
    fn raw_u32() {
        let input: [u8; 16] = [0, 0, 0, 0, 1, 0, 0, 0, 1, 2, 3, 4, 255, 255, 255, 255];
        let mut reader = DataReader::new(&input);
        let values: Vec<u32> = collect(RawDecoder::new(&mut reader));
        assert_eq!(values, [0, 1, 67305985, u32::MAX]);
    }

    #[test]
    fn runlength_u16() {
        // Test input has three runs shown below as header; (bytes), (bytes), (...)
        //   - Two mixed values: 2; (0, 0), (0, 1)
        //   - Three of the same value: 3 | 0x80; (42, 0)
        //   - One mixed value: 1; (255, 255)
        let input: [u8; 11] = [2, 0, 0, 0, 1, 3 | 0x80, 42, 0, 1, 255, 255];
        let mut reader = DataReader::new(&input);
        let values: Vec<u16> = collect(RunLengthDecoder::new(&mut reader, 6, (0, 0)));
        assert_eq!(values, [0, 256, 42, 42, 42, u16::MAX]);
    }

    #[test]
    fn runlength_u32() {
        #[rustfmt::skip]
        let input: [u8; 19] = [
            2, 0, 0, 0, 0, 1, 0, 0, 0,
            3 | 0x80, 42, 0, 0, 0,
            1, 255, 255, 255, 255,
        ];
        let mut reader = DataReader::new(&input);
        let values: Vec<u32> = collect(RunLengthDecoder::new(&mut reader, 6, (0, 0)));
        assert_eq!(values, [0, 1, 42, 42, 42, u32::MAX]);
    }

    #[test]
    fn runlength_stops_at_limit() {
        // The run ends exactly at the limit, and the next plane's bytes are left alone.
        let input: [u8; 5] = [2 | 0x80, 9, 0, 7, 7];
        let mut reader = DataReader::new(&input);
        let values: Vec<u16> = collect(RunLengthDecoder::new(&mut reader, 2, (0, 0)));
        assert_eq!(values, [9, 9]);
        assert_eq!(2, reader.remaining());
    }

    #[test]
    fn runlength_overrun_fails() {
        let input: [u8; 3] = [5 | 0x80, 1, 0];
        let mut reader = DataReader::new(&input);
        let result: Result<Vec<u16>> = RunLengthDecoder::new(&mut reader, 3, (4, 1)).collect();
        assert!(matches!(
            result,
            Err(DsfError::PoolRunOverrun {
                pool: 4,
                plane: 1,
                run: 5,
                count: 3
            })
        ));
    }
}

#[cfg(test)]
mod pool_tests {
    use super::*;
    use crate::error::ErrorKind;
    use approx::assert_relative_eq;

    #[test]
    fn u16_parsed_correctly() {
        #[rustfmt::skip]
        let data: Vec<u8> = vec![
            4, 0, 0, 0,  // points_per_plane: u32
            1,  // plane_count: u8
            0,  // plane 1 encoding mode: u8: Raw
            1, 0, 2, 0, 3, 0, 4, 0,  // four u16 points, raw encoded
        ];
        let pool = Pool::decode::<u16>(&data, 0).unwrap();
        assert_eq!(1, pool.num_planes());
        assert_eq!(4, pool.num_points());
        assert_eq!(Some(&[1.0][..]), pool.point(0));
        assert_eq!(None, pool.point(4));
        assert_eq!(
            vec![&[1.0], &[2.0], &[3.0], &[4.0]],
            pool.iter().collect::<Vec<&[f64]>>()
        );
    }

    #[test]
    fn u32_parsed_correctly() {
        #[rustfmt::skip]
        let data: Vec<u8> = vec![
            4, 0, 0, 0,  // points_per_plane: u32
            1,  // plane_count: u8
            0,  // plane 1 encoding mode: u8: Raw
            0, 0, 0, 0, 1, 0, 0, 0, 1, 2, 3, 4, 255, 255, 255, 255, // 4 values
        ];
        let pool = Pool::decode::<u32>(&data, 0).unwrap();
        assert_eq!(
            vec![&[0.0], &[1.0], &[67305985.0], &[u32::MAX as f64]],
            pool.iter().collect::<Vec<&[f64]>>()
        );
    }

    #[test]
    fn pool_encoding_modes() {
        #[rustfmt::skip]
        let data: Vec<u8> = vec![
            4, 0, 0, 0,  // points_per_plane: u32
            3,  // plane_count: u8
            1,  // plane 1 encoding mode: u8: Differenced
            1, 0, 0, 0, 10, 0, 100, 0,
            2,  // plane 2 encoding mode: RunLength (4@42)
            4 | 0x80, 42, 0,
            3,  // plane 3 encoding mode: RunLengthDifferenced (4@+2)
            4 | 0x80, 2, 0,
        ];
        let pool = Pool::decode::<u16>(&data, 0).unwrap();
        assert_eq!(3, pool.num_planes());
        assert_eq!(
            vec![
                &[1.0, 42.0, 2.0],
                &[1.0, 42.0, 4.0],
                &[11.0, 42.0, 6.0],
                &[111.0, 42.0, 8.0],
            ],
            pool.iter().collect::<Vec<&[f64]>>()
        );
    }

    #[test]
    fn repeated_and_literal_runs() {
        // 200 = 0x80 | 72: one value repeated 72 times, then 5 literal values.
        #[rustfmt::skip]
        let data: Vec<u8> = vec![
            77, 0, 0, 0,
            1,
            2,
            200, 7, 0,
            5, 1, 0, 2, 0, 3, 0, 4, 0, 5, 0,
        ];
        let pool = Pool::decode::<u16>(&data, 0).unwrap();
        let values: Vec<f64> = pool.iter().map(|p| p[0]).collect();
        assert!(values[..72].iter().all(|v| *v == 7.0));
        assert_eq!(&[1.0, 2.0, 3.0, 4.0, 5.0], &values[72..]);
    }

    #[test]
    fn delta_wraps_at_the_family_modulus() {
        #[rustfmt::skip]
        let data: Vec<u8> = vec![
            3, 0, 0, 0,
            1,
            1,
            10, 0, 5, 0, 0xfa, 0xff,  // 10, 5, 65530
        ];
        let pool = Pool::decode::<u16>(&data, 0).unwrap();
        // 15 + 65530 = 65545, which wraps to 9.
        assert_eq!(
            vec![&[10.0], &[15.0], &[9.0]],
            pool.iter().collect::<Vec<&[f64]>>()
        );

        #[rustfmt::skip]
        let data: Vec<u8> = vec![
            2, 0, 0, 0,
            1,
            1,
            0xff, 0xff, 0xff, 0xff, 2, 0, 0, 0,
        ];
        let pool = Pool::decode::<u32>(&data, 0).unwrap();
        assert_eq!(vec![&[u32::MAX as f64], &[1.0]], pool.iter().collect::<Vec<_>>());
    }

    #[test]
    fn unknown_plane_encoding_fails() {
        let data: Vec<u8> = vec![1, 0, 0, 0, 1, 4, 0, 0];
        let err = Pool::decode::<u16>(&data, 3).unwrap_err();
        assert_eq!(ErrorKind::Format, err.kind());
        assert!(matches!(
            err,
            DsfError::UnknownPlaneEncoding {
                pool: 3,
                plane: 0,
                encoding: 4
            }
        ));
    }

    #[test]
    fn huge_point_count_fails_before_allocating() {
        let data: Vec<u8> = vec![0xff, 0xff, 0xff, 0xff, 255, 0];
        let err = Pool::decode::<u16>(&data, 0).unwrap_err();
        assert_eq!(ErrorKind::Bounds, err.kind());

        // One repeat run covers 127 points in 3 bytes.
        let data: Vec<u8> = vec![127, 0, 0, 0, 1, 2, 127 | 0x80, 5, 0];
        let pool = Pool::decode::<u16>(&data, 0).unwrap();
        assert_eq!(127, pool.num_points());
        let data: Vec<u8> = vec![128, 0, 0, 0, 1, 2, 127 | 0x80, 5, 0];
        let err = Pool::decode::<u16>(&data, 0).unwrap_err();
        assert_eq!(ErrorKind::Bounds, err.kind());
    }

    #[test]
    fn plane_size_lower_bound() {
        assert_eq!(Some(0), min_plane_bytes(0, 2));
        assert_eq!(Some(2), min_plane_bytes(1, 2));
        assert_eq!(Some(3), min_plane_bytes(127, 2));
        assert_eq!(Some(10), min_plane_bytes(128, 4));
        assert_eq!(None, min_plane_bytes(usize::MAX, 4));
    }

    #[test]
    fn short_plane_fails() {
        let data: Vec<u8> = vec![3, 0, 0, 0, 1, 0, 1, 0, 2, 0];
        let err = Pool::decode::<u16>(&data, 0).unwrap_err();
        assert_eq!(ErrorKind::Bounds, err.kind());
    }

    #[test]
    fn scaling_works_with_u16_single_plane() {
        // 65535 = 3 * 5 * 17 * 257 = 255 * 257
        #[rustfmt::skip]
        let data: Vec<u8> = vec![
            4, 0, 0, 0,
            1,
            0,
            255, 0, 1, 1, 15, 0, 17, 0,
        ];
        let mut pool = Pool::decode::<u16>(&data, 0).unwrap();
        pool.scale(&PoolScale::new(16, vec![(6.0, 100.0)])).unwrap();
        let expected = [
            100.0 + 6.0 / 257.0,
            100.0 + 6.0 / 255.0,
            100.0 + 6.0 / 4369.0,
            100.0 + 6.0 / 3855.0,
        ];
        for (point, expected) in pool.iter().zip(expected) {
            assert_relative_eq!(expected, point[0], epsilon = 1e-12);
        }
    }

    #[test]
    fn zero_multiplier_passes_through() {
        let mut pool = Pool::from_points(3, vec![1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);
        let scale = PoolScale::new(16, vec![(0.0, 0.0), (6.0, 100.0), (0.0, 50.0)]);
        pool.scale(&scale).unwrap();
        assert_eq!(Some(&[1.0, 100.0 + 6.0 * 3.0 / 65535.0, 5.0][..]), pool.point(0));
        assert_eq!(Some(6.0), pool.point(1).map(|p| p[2]));
    }

    #[test]
    fn full_range_multiplier_is_identity() {
        let scale = PoolScale::new(16, vec![(65535.0, 0.0)]);
        assert_relative_eq!(32767.0, scale.to_real(0, 32767.0), epsilon = 1e-9);

        let scale = PoolScale::new(32, vec![(2.0, -1.0)]);
        assert_eq!(4294967295.0, scale.max_int());
        let real = scale.to_real(0, 123456789.0);
        assert_eq!(123456789.0, scale.to_raw(0, real));
    }

    #[test]
    fn scale_is_applied_once_and_reverts() {
        let mut pool = Pool::from_points(2, vec![0.0, 65535.0, 32768.0, 1.0]);
        let scale = PoolScale::new(16, vec![(1.0, -122.0), (1.0, 47.0)]);
        pool.scale(&scale).unwrap();
        pool.scale(&scale).unwrap();
        assert!(pool.is_scaled());
        assert_eq!(Some(&[-122.0, 48.0][..]), pool.point(0));

        pool.unscale();
        assert!(!pool.is_scaled());
        assert_eq!(
            vec![&[0.0, 65535.0], &[32768.0, 1.0]],
            pool.iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn scale_atoms_are_f32_pairs() {
        let mut data = vec![];
        for v in [0.5f32, -10.0, 0.0, 0.0] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        data.push(1); // A stray byte is tolerated.
        let scale = PoolScale::from_atom(&data, 16).unwrap();
        assert_eq!(2, scale.num_planes());
        assert_eq!(Some((0.5, -10.0)), scale.plane(0));
    }

    #[test]
    fn family_scaling_checks_shapes() {
        let mut pools = vec![
            Pool::from_points(2, vec![1.0, 2.0]),
            Pool::from_points(2, vec![]),
        ];
        // The empty pool's scale doesn't need to match.
        let scales = vec![
            PoolScale::new(16, vec![(0.0, 0.0), (0.0, 0.0)]),
            PoolScale::new(16, vec![(1.0, 0.0)]),
        ];
        apply_scales(&mut pools, &scales, 16).unwrap();

        let err = apply_scales(&mut pools[..1], &scales, 16).unwrap_err();
        assert!(matches!(err, DsfError::ScaleCountMismatch { pools: 1, scales: 2, .. }));

        let mut pools = vec![Pool::from_points(2, vec![1.0, 2.0])];
        let err = apply_scales(&mut pools, &scales[1..], 16).unwrap_err();
        assert_eq!(ErrorKind::StructuralMismatch, err.kind());
        assert!(matches!(
            err,
            DsfError::ScalePlaneMismatch {
                pool: 0,
                planes: 2,
                scales: 1,
                ..
            }
        ));
    }
}
