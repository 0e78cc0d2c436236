// The CMDS atom: a stream of one-byte opcodes, each followed by its operands.
//
// Most opcodes are described by a layout: a fixed group of fields, optionally
// followed by a count and that many repeated records. NestedPolygon (14) holds a
// list of windings, each with its own count, and is decoded by hand.

use crate::error::Result;
use crate::unpack::{Unpacker, Value};
use crate::{LoadObserver, Stage};
use log::{debug, trace, warn};
use std::fmt;

/// How often (in bytes) the command decoder reports progress.
const PROGRESS_INTERVAL: usize = 1 << 16;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandId {
    /// Changes the current coordinate pool.
    PoolSelect = 1,
    /// Specifies a 32-bit number that is added to all indices when referencing vector coords.
    ///
    /// This allows the use of a 16-bit vector command for vectors whose indices are greater
    /// than 65535.
    JunctionOffsetSelect = 2,
    /// Sets the definition index used by the following commands.
    SetDefinition8 = 3,
    SetDefinition16 = 4,
    SetDefinition32 = 5,
    /// Sets the road subtype for the next vector-segment.
    SetRoadSubtype8 = 6,
    /// Places an object on the mesh surface.
    ///
    /// A point pool must be selected and have at least 3 planes, which are treated as a
    /// longitude, latitude, and rotation in degrees.
    Object = 7,
    /// Like Object but places objects at all points in a [start_idx, end_idx) range.
    ObjectRange = 8,
    /// Creates one or more Network Chains, using all the vertex indicies given.
    NetworkChain = 9,
    /// Creates one or more Network Chains, using all the verticies in [start_idx, end_idx).
    NetworkChainRange = 10,
    /// Creates one or more Network Chains, using the given 32-bit indices.
    NetworkChain32 = 11,
    /// Places one or more polygon primitives on the surface of the mesh.
    ///
    /// Arguments are the parameter, the count, and a list of count 16-bit indices.
    Polygon = 12,
    /// Places polygons on all verticies in a [start, end) range.
    PolygonRange = 13,
    /// Places a series of polygons, each with a distinct winding.
    NestedPolygon = 14,
    /// Places a series of polygons with distinct windings using a list of contiguous ranges.
    ///
    /// The count is of windings; one more index than windings follows.
    NestedPolygonRange = 15,
    /// Indicates that a new terrain patch is being created.
    ///
    /// The patch will have the same LOD range and flags that the last created patch had.
    TerrainPatch = 16,
    /// Indicates that a new terrain patch is being created, with new flags (and same LOD range).
    ///
    /// The flags are:
    ///   0x1: Physical: if set, this patch is used for collision detection.
    ///   0x2: Overlay: if set, this patch is drawn over another patch.
    TerrainPatchFlags = 17,
    /// Indicates that a new terrain patch is being created, with the given flags and LOD range.
    TerrainPatchFlagsLOD = 18,

    // 19 - 22 are not used.
    /// Creates one or more specific triangles for a terrain patch.
    Triangle = 23,
    /// Like Triangle, but one pool index is provided per vertex.
    TriangleCrossPool = 24,
    /// Each set of 3 adjacent vertices in the range [start, end) is a triangle.
    TriangleRange = 25,
    /// Creates a triangle strip.
    ///
    /// The points 1,2,3,4,5 as a triangle strip are equivalent to the triangles 123, 243, 345.
    TriangleStrip = 26,
    TriangleStripCrossPool = 27,
    TriangleStripRange = 28,
    /// Creates a triangle fan.
    ///
    /// The points 1,2,3,4,5 as a triangle fan are equivalent to 123, 134, 145.
    TriangleFan = 29,
    TriangleFanCrossPool = 30,
    TriangleFanRange = 31,
    /// Embeds an arbitrary comment up to 255 bytes long.
    Comment8 = 32,
    /// Embeds an arbitrary comment up to 65535 bytes long.
    Comment16 = 33,
    /// Embeds an arbitrary comment up to 2^32 bytes long.
    Comment32 = 34,
}

/// The operand layout of one opcode, in the syntax of the unpack module.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CommandLayout {
    /// Fields that always follow the opcode. May be empty.
    pub fixed: &'static str,
    /// (count, record): a count field and the record it repeats, if any.
    pub repeated: Option<(&'static str, &'static str)>,
}

const fn fixed(fixed: &'static str) -> Option<CommandLayout> {
    Some(CommandLayout {
        fixed,
        repeated: None,
    })
}

const fn repeated(
    fixed: &'static str,
    count: &'static str,
    record: &'static str,
) -> Option<CommandLayout> {
    Some(CommandLayout {
        fixed,
        repeated: Some((count, record)),
    })
}

impl CommandId {
    pub fn from_u8(value: u8) -> Option<CommandId> {
        use CommandId::*;
        Some(match value {
            1 => PoolSelect,
            2 => JunctionOffsetSelect,
            3 => SetDefinition8,
            4 => SetDefinition16,
            5 => SetDefinition32,
            6 => SetRoadSubtype8,
            7 => Object,
            8 => ObjectRange,
            9 => NetworkChain,
            10 => NetworkChainRange,
            11 => NetworkChain32,
            12 => Polygon,
            13 => PolygonRange,
            14 => NestedPolygon,
            15 => NestedPolygonRange,
            16 => TerrainPatch,
            17 => TerrainPatchFlags,
            18 => TerrainPatchFlagsLOD,
            23 => Triangle,
            24 => TriangleCrossPool,
            25 => TriangleRange,
            26 => TriangleStrip,
            27 => TriangleStripCrossPool,
            28 => TriangleStripRange,
            29 => TriangleFan,
            30 => TriangleFanCrossPool,
            31 => TriangleFanRange,
            32 => Comment8,
            33 => Comment16,
            34 => Comment32,
            _ => return None,
        })
    }

    /// The operand layout, or None for NestedPolygon which nests its counts.
    pub fn layout(self) -> Option<CommandLayout> {
        use CommandId::*;
        match self {
            PoolSelect => fixed("H"),
            JunctionOffsetSelect => fixed("L"),
            SetDefinition8 => fixed("B"),
            SetDefinition16 => fixed("H"),
            SetDefinition32 => fixed("L"),
            SetRoadSubtype8 => fixed("B"),
            Object => fixed("H"),
            ObjectRange => fixed("HH"),
            NetworkChain => repeated("", "B", "H"),
            NetworkChainRange => fixed("HH"),
            NetworkChain32 => repeated("", "B", "L"),
            Polygon => repeated("H", "B", "H"),
            PolygonRange => fixed("HHH"),
            NestedPolygon => None,
            NestedPolygonRange => repeated("H", "B", "H"),
            TerrainPatch => fixed(""),
            TerrainPatchFlags => fixed("B"),
            TerrainPatchFlagsLOD => fixed("Bff"),
            Triangle | TriangleStrip | TriangleFan => repeated("", "B", "H"),
            TriangleCrossPool | TriangleStripCrossPool | TriangleFanCrossPool => {
                repeated("", "B", "HH")
            }
            TriangleRange | TriangleStripRange | TriangleFanRange => fixed("HH"),
            Comment8 => repeated("", "B", "B"),
            Comment16 => repeated("", "H", "B"),
            Comment32 => repeated("", "L", "B"),
        }
    }

    /// How many records follow, given the decoded count field.
    fn record_count(self, count: usize) -> usize {
        if self == CommandId::NestedPolygonRange {
            count + 1
        } else {
            count
        }
    }
}

/// One decoded command. Each variant holds the operands of one opcode.
///
/// Repeat counts are not kept; they are the lengths of the vectors.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    PoolSelect { pool: u16 },
    JunctionOffsetSelect { offset: u32 },
    SetDefinition8 { definition: u8 },
    SetDefinition16 { definition: u16 },
    SetDefinition32 { definition: u32 },
    SetRoadSubtype8 { subtype: u8 },
    Object { index: u16 },
    ObjectRange { first: u16, last: u16 },
    NetworkChain { indices: Vec<u16> },
    NetworkChainRange { first: u16, last: u16 },
    NetworkChain32 { indices: Vec<u32> },
    Polygon { param: u16, indices: Vec<u16> },
    PolygonRange { param: u16, first: u16, last: u16 },
    NestedPolygon { param: u16, windings: Vec<Vec<u16>> },
    NestedPolygonRange { param: u16, indices: Vec<u16> },
    TerrainPatch,
    TerrainPatchFlags { flags: u8 },
    TerrainPatchFlagsLOD { flags: u8, near: f32, far: f32 },
    Triangle { indices: Vec<u16> },
    /// (pool, index) per vertex.
    TriangleCrossPool { vertices: Vec<(u16, u16)> },
    TriangleRange { first: u16, last: u16 },
    TriangleStrip { indices: Vec<u16> },
    TriangleStripCrossPool { vertices: Vec<(u16, u16)> },
    TriangleStripRange { first: u16, last: u16 },
    TriangleFan { indices: Vec<u16> },
    TriangleFanCrossPool { vertices: Vec<(u16, u16)> },
    TriangleFanRange { first: u16, last: u16 },
    Comment8 { text: Vec<u8> },
    Comment16 { text: Vec<u8> },
    Comment32 { text: Vec<u8> },
}

impl Command {
    pub fn id(&self) -> CommandId {
        use Command::*;
        match self {
            PoolSelect { .. } => CommandId::PoolSelect,
            JunctionOffsetSelect { .. } => CommandId::JunctionOffsetSelect,
            SetDefinition8 { .. } => CommandId::SetDefinition8,
            SetDefinition16 { .. } => CommandId::SetDefinition16,
            SetDefinition32 { .. } => CommandId::SetDefinition32,
            SetRoadSubtype8 { .. } => CommandId::SetRoadSubtype8,
            Object { .. } => CommandId::Object,
            ObjectRange { .. } => CommandId::ObjectRange,
            NetworkChain { .. } => CommandId::NetworkChain,
            NetworkChainRange { .. } => CommandId::NetworkChainRange,
            NetworkChain32 { .. } => CommandId::NetworkChain32,
            Polygon { .. } => CommandId::Polygon,
            PolygonRange { .. } => CommandId::PolygonRange,
            NestedPolygon { .. } => CommandId::NestedPolygon,
            NestedPolygonRange { .. } => CommandId::NestedPolygonRange,
            TerrainPatch => CommandId::TerrainPatch,
            TerrainPatchFlags { .. } => CommandId::TerrainPatchFlags,
            TerrainPatchFlagsLOD { .. } => CommandId::TerrainPatchFlagsLOD,
            Triangle { .. } => CommandId::Triangle,
            TriangleCrossPool { .. } => CommandId::TriangleCrossPool,
            TriangleRange { .. } => CommandId::TriangleRange,
            TriangleStrip { .. } => CommandId::TriangleStrip,
            TriangleStripCrossPool { .. } => CommandId::TriangleStripCrossPool,
            TriangleStripRange { .. } => CommandId::TriangleStripRange,
            TriangleFan { .. } => CommandId::TriangleFan,
            TriangleFanCrossPool { .. } => CommandId::TriangleFanCrossPool,
            TriangleFanRange { .. } => CommandId::TriangleFanRange,
            Comment8 { .. } => CommandId::Comment8,
            Comment16 { .. } => CommandId::Comment16,
            Comment32 { .. } => CommandId::Comment32,
        }
    }

    /// The wire opcode.
    pub fn opcode(&self) -> u8 {
        self.id() as u8
    }

    /// True for the terrain patch triangle commands, 23 to 31.
    pub fn is_patch_geometry(&self) -> bool {
        (23..=31).contains(&self.opcode())
    }

    /// Builds the command from the values decoded with its layout.
    fn from_values(id: CommandId, fixed: Vec<Value>, records: Vec<Value>) -> Command {
        let mut f = Operands(fixed.into_iter());
        let mut r = Operands(records.into_iter());
        use CommandId as Id;
        match id {
            Id::PoolSelect => Command::PoolSelect { pool: f.u16() },
            Id::JunctionOffsetSelect => Command::JunctionOffsetSelect { offset: f.u32() },
            Id::SetDefinition8 => Command::SetDefinition8 { definition: f.u8() },
            Id::SetDefinition16 => Command::SetDefinition16 { definition: f.u16() },
            Id::SetDefinition32 => Command::SetDefinition32 { definition: f.u32() },
            Id::SetRoadSubtype8 => Command::SetRoadSubtype8 { subtype: f.u8() },
            Id::Object => Command::Object { index: f.u16() },
            Id::ObjectRange => Command::ObjectRange {
                first: f.u16(),
                last: f.u16(),
            },
            Id::NetworkChain => Command::NetworkChain { indices: r.u16s() },
            Id::NetworkChainRange => Command::NetworkChainRange {
                first: f.u16(),
                last: f.u16(),
            },
            Id::NetworkChain32 => Command::NetworkChain32 { indices: r.u32s() },
            Id::Polygon => Command::Polygon {
                param: f.u16(),
                indices: r.u16s(),
            },
            Id::PolygonRange => Command::PolygonRange {
                param: f.u16(),
                first: f.u16(),
                last: f.u16(),
            },
            // Decoded by hand; it has no layout.
            Id::NestedPolygon => Command::NestedPolygon {
                param: f.u16(),
                windings: vec![],
            },
            Id::NestedPolygonRange => Command::NestedPolygonRange {
                param: f.u16(),
                indices: r.u16s(),
            },
            Id::TerrainPatch => Command::TerrainPatch,
            Id::TerrainPatchFlags => Command::TerrainPatchFlags { flags: f.u8() },
            Id::TerrainPatchFlagsLOD => Command::TerrainPatchFlagsLOD {
                flags: f.u8(),
                near: f.f32(),
                far: f.f32(),
            },
            Id::Triangle => Command::Triangle { indices: r.u16s() },
            Id::TriangleCrossPool => Command::TriangleCrossPool {
                vertices: r.pairs(),
            },
            Id::TriangleRange => Command::TriangleRange {
                first: f.u16(),
                last: f.u16(),
            },
            Id::TriangleStrip => Command::TriangleStrip { indices: r.u16s() },
            Id::TriangleStripCrossPool => Command::TriangleStripCrossPool {
                vertices: r.pairs(),
            },
            Id::TriangleStripRange => Command::TriangleStripRange {
                first: f.u16(),
                last: f.u16(),
            },
            Id::TriangleFan => Command::TriangleFan { indices: r.u16s() },
            Id::TriangleFanCrossPool => Command::TriangleFanCrossPool {
                vertices: r.pairs(),
            },
            Id::TriangleFanRange => Command::TriangleFanRange {
                first: f.u16(),
                last: f.u16(),
            },
            Id::Comment8 => Command::Comment8 { text: r.u8s() },
            Id::Comment16 => Command::Comment16 { text: r.u8s() },
            Id::Comment32 => Command::Comment32 { text: r.u8s() },
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Command::Comment8 { text } | Command::Comment16 { text } | Command::Comment32 { text } => {
                write!(f, "{:?}: {:?}", self.id(), String::from_utf8_lossy(text))
            }
            _ => write!(f, "{:?}", self),
        }
    }
}

/// Typed access to a run of unpacked values whose layout is known.
struct Operands(std::vec::IntoIter<Value>);

impl Operands {
    fn u32(&mut self) -> u32 {
        self.0.next().and_then(|v| v.as_u32()).unwrap_or_default()
    }

    fn u16(&mut self) -> u16 {
        self.u32() as u16
    }

    fn u8(&mut self) -> u8 {
        self.u32() as u8
    }

    fn f32(&mut self) -> f32 {
        self.0.next().and_then(|v| v.as_f64()).unwrap_or_default() as f32
    }

    fn u32s(&mut self) -> Vec<u32> {
        self.0.by_ref().filter_map(|v| v.as_u32()).collect()
    }

    fn u16s(&mut self) -> Vec<u16> {
        self.u32s().into_iter().map(|v| v as u16).collect()
    }

    fn u8s(&mut self) -> Vec<u8> {
        self.u32s().into_iter().map(|v| v as u8).collect()
    }

    fn pairs(&mut self) -> Vec<(u16, u16)> {
        use itertools::Itertools;
        self.u16s().into_iter().tuples().collect()
    }
}

/// Decodes one command whose operands follow its layout.
fn decode_with_layout(
    id: CommandId,
    layout: CommandLayout,
    unpacker: &mut Unpacker,
) -> Result<Command> {
    let fixed = unpacker.unpack(layout.fixed)?;
    let mut records = vec![];
    if let Some((count, record)) = layout.repeated {
        let n = unpacker
            .unpack(count)?
            .first()
            .and_then(|v| v.as_u32())
            .unwrap_or_default() as usize;
        for _ in 0..id.record_count(n) {
            records.extend(unpacker.unpack(record)?);
        }
    }
    Ok(Command::from_values(id, fixed, records))
}

/// Decodes NestedPolygon: a u16 parameter, a u8 winding count, then per winding
/// a u8 index count and that many u16 indices.
fn decode_nested_polygon(unpacker: &mut Unpacker) -> Result<Command> {
    let reader = unpacker.reader();
    let param = reader.read_u16()?;
    let winding_count = reader.read_u8()?;
    let mut windings = Vec::with_capacity(winding_count as usize);
    for _ in 0..winding_count {
        let index_count = reader.read_u8()?;
        let winding = (0..index_count)
            .map(|_| reader.read_u16())
            .collect::<Result<Vec<u16>>>()?;
        windings.push(winding);
    }
    Ok(Command::NestedPolygon { param, windings })
}

/// Decodes the whole CMDS payload.
///
/// Unknown opcodes are logged and skipped; decoding resumes at the next byte.
/// A command cut short by the end of the payload is an error.
pub fn decode_commands(data: &[u8], observer: &mut dyn LoadObserver) -> Result<Vec<Command>> {
    debug!("Processing CMDS atom ({} bytes)...", data.len());
    let mut unpacker = Unpacker::new(data, 0, data.len())?;
    let mut commands = vec![];
    let mut unknown = 0;
    let mut next_report = PROGRESS_INTERVAL;
    while !unpacker.done() {
        let at = unpacker.position();
        let opcode = unpacker.reader().read_u8()?;
        let id = match CommandId::from_u8(opcode) {
            Some(id) => id,
            None => {
                warn!("Unknown command id {} at offset {} ignored", opcode, at);
                unknown += 1;
                continue;
            }
        };
        let command = match id.layout() {
            Some(layout) => decode_with_layout(id, layout, &mut unpacker)?,
            None => decode_nested_polygon(&mut unpacker)?,
        };
        trace!("... {} at {}", command, at);
        commands.push(command);

        if unpacker.position() >= next_report {
            observer.progress(Stage::Commands, unpacker.position(), data.len());
            next_report += PROGRESS_INTERVAL;
        }
    }
    observer.progress(Stage::Commands, data.len(), data.len());
    debug!(
        "{} commands have been decoded ({} unknown skipped)",
        commands.len(),
        unknown
    );
    Ok(commands)
}
