// Partitions the decoded command stream into terrain patches, polygons, objects
// and network groups.

use crate::command::Command;
use crate::error::{DsfError, Result};
use crate::triangle::{triangulate, Triangle};
use log::{debug, trace, warn};

/// A drawable piece of terrain: one definition, flags, LOD range and its geometry commands.
#[derive(Clone, Debug, PartialEq)]
pub struct Patch {
    flags: Option<u8>,
    near: Option<f32>,
    far: Option<f32>,
    definition: u32,

    /// Pool selects followed by the triangle commands that use them.
    commands: Vec<Command>,
}

impl Patch {
    pub fn new(flags: Option<u8>, near: Option<f32>, far: Option<f32>, definition: u32) -> Patch {
        Patch {
            flags,
            near,
            far,
            definition,
            commands: vec![],
        }
    }

    /// The flags set by the last TerrainPatchFlags(LOD) command, if any.
    ///
    ///   0x1: Physical: if set, this patch is used for collision detection.
    ///   0x2: Overlay: if set, this patch is drawn over another patch.
    pub fn flags(&self) -> Option<u8> {
        self.flags
    }

    pub fn is_physical(&self) -> bool {
        self.flags.map_or(false, |f| f & 0x1 != 0)
    }

    pub fn is_overlay(&self) -> bool {
        self.flags.map_or(false, |f| f & 0x2 != 0)
    }

    /// The LOD range in meters, if one was ever set.
    pub fn lod(&self) -> (Option<f32>, Option<f32>) {
        (self.near, self.far)
    }

    /// The index into the terrain definitions.
    pub fn definition(&self) -> u32 {
        self.definition
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Computes the patch's triangles. Nothing is cached.
    pub fn triangles(&self) -> Vec<Triangle> {
        triangulate(&self.commands)
    }
}

/// An object or polygon command with the pool that was selected when it appeared.
#[derive(Clone, Debug, PartialEq)]
pub struct PlacedCommand {
    pub pool: u16,
    pub command: Command,
}

/// A run of network commands sharing road subtype, junction offset and pool.
#[derive(Clone, Debug, PartialEq)]
pub struct NetworkGroup {
    pub subtype: u8,
    pub junction_offset: u32,
    pub pool: u16,
    pub commands: Vec<Command>,
}

impl NetworkGroup {
    fn key(&self) -> (u8, u32, u16) {
        (self.subtype, self.junction_offset, self.pool)
    }
}

/// Everything the command stream places in the tile.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scene {
    pub patches: Vec<Patch>,
    /// Indexed by polygon definition.
    pub polygons: Vec<Vec<PlacedCommand>>,
    /// Indexed by object definition.
    pub objects: Vec<Vec<PlacedCommand>>,
    pub networks: Vec<NetworkGroup>,
}

/// The values set by state commands, as seen by the command currently processed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SceneState {
    pub pool: u16,
    pub junction_offset: u32,
    pub definition: u32,
    pub road_subtype: u8,

    /// Patch flags and LOD, inherited by patches that don't set their own.
    pub patch_flags: Option<u8>,
    pub near: Option<f32>,
    pub far: Option<f32>,

    /// The pool last attached to the open patch, None right after a patch opens.
    pub patch_pool: Option<u16>,
}

/// Builds a Scene one command at a time.
#[derive(Debug)]
pub struct SceneBuilder {
    state: SceneState,
    scene: Scene,
    dropped: usize,
}

impl SceneBuilder {
    /// `polygon_defs` and `object_defs` are the sizes of the POLY and OBJT tables.
    pub fn new(polygon_defs: usize, object_defs: usize) -> SceneBuilder {
        SceneBuilder {
            state: SceneState::default(),
            scene: Scene {
                polygons: vec![vec![]; polygon_defs],
                objects: vec![vec![]; object_defs],
                ..Default::default()
            },
            dropped: 0,
        }
    }

    pub fn state(&self) -> &SceneState {
        &self.state
    }

    /// The scene built so far.
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Processes one command.
    ///
    /// A patch geometry command with no open patch, or with a definition index that
    /// differs from the open patch's, is an error. Everything pushed before it is kept,
    /// but the caller should stop pushing.
    pub fn push(&mut self, command: Command) -> Result<()> {
        let state = &mut self.state;
        match command {
            Command::PoolSelect { pool } => state.pool = pool,
            Command::JunctionOffsetSelect { offset } => state.junction_offset = offset,
            Command::SetDefinition8 { definition } => state.definition = definition as u32,
            Command::SetDefinition16 { definition } => state.definition = definition as u32,
            Command::SetDefinition32 { definition } => state.definition = definition,
            Command::SetRoadSubtype8 { subtype } => state.road_subtype = subtype,

            Command::Object { .. } | Command::ObjectRange { .. } => {
                let placed = PlacedCommand {
                    pool: state.pool,
                    command,
                };
                match self.scene.objects.get_mut(state.definition as usize) {
                    Some(list) => list.push(placed),
                    None => {
                        warn!(
                            "object with undefined definition {} ignored",
                            state.definition
                        );
                        self.dropped += 1;
                    }
                }
            }

            Command::NetworkChain { .. }
            | Command::NetworkChainRange { .. }
            | Command::NetworkChain32 { .. } => {
                let key = (state.road_subtype, state.junction_offset, state.pool);
                match self.scene.networks.last_mut() {
                    Some(group) if group.key() == key => group.commands.push(command),
                    _ => self.scene.networks.push(NetworkGroup {
                        subtype: key.0,
                        junction_offset: key.1,
                        pool: key.2,
                        commands: vec![command],
                    }),
                }
            }

            Command::Polygon { .. }
            | Command::PolygonRange { .. }
            | Command::NestedPolygon { .. }
            | Command::NestedPolygonRange { .. } => {
                let placed = PlacedCommand {
                    pool: state.pool,
                    command,
                };
                match self.scene.polygons.get_mut(state.definition as usize) {
                    Some(list) => list.push(placed),
                    None => {
                        warn!(
                            "polygon with undefined definition {} ignored",
                            state.definition
                        );
                        self.dropped += 1;
                    }
                }
            }

            Command::TerrainPatch
            | Command::TerrainPatchFlags { .. }
            | Command::TerrainPatchFlagsLOD { .. } => {
                match command {
                    Command::TerrainPatchFlags { flags } => state.patch_flags = Some(flags),
                    Command::TerrainPatchFlagsLOD { flags, near, far } => {
                        state.patch_flags = Some(flags);
                        state.near = Some(near);
                        state.far = Some(far);
                    }
                    _ => {}
                }
                state.patch_pool = None;
                trace!(
                    "patch {} opened with definition {}",
                    self.scene.patches.len(),
                    state.definition
                );
                self.scene.patches.push(Patch::new(
                    state.patch_flags,
                    state.near,
                    state.far,
                    state.definition,
                ));
            }

            command if command.is_patch_geometry() => {
                let index = self.scene.patches.len();
                let patch = self
                    .scene
                    .patches
                    .last_mut()
                    .ok_or(DsfError::NoOpenPatch {
                        opcode: command.opcode(),
                    })?;
                if patch.definition != state.definition {
                    warn!("Definition index changed within patch; command extraction aborted");
                    return Err(DsfError::PatchDefinitionChanged {
                        patch: index - 1,
                        expected: patch.definition,
                        found: state.definition,
                    });
                }
                if state.patch_pool != Some(state.pool) {
                    patch.commands.push(Command::PoolSelect { pool: state.pool });
                    state.patch_pool = Some(state.pool);
                }
                patch.commands.push(command);
            }

            // Comments.
            _ => {}
        }
        Ok(())
    }

    pub fn finish(self) -> Scene {
        debug!(
            "{} patches, {} polygon types, {} object types, {} network groups extracted ({} commands dropped)",
            self.scene.patches.len(),
            self.scene.polygons.len(),
            self.scene.objects.len(),
            self.scene.networks.len(),
            self.dropped
        );
        self.scene
    }
}

/// Runs every command through a SceneBuilder.
///
/// On error the scene built up to the failing command is returned along with it.
pub fn build_scene(
    commands: Vec<Command>,
    polygon_defs: usize,
    object_defs: usize,
) -> (Scene, Option<DsfError>) {
    let mut builder = SceneBuilder::new(polygon_defs, object_defs);
    for command in commands {
        if let Err(e) = builder.push(command) {
            return (builder.finish(), Some(e));
        }
    }
    (builder.finish(), None)
}

#[cfg(test)]
mod scene_tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::triangle::VertexRef;

    fn run(commands: Vec<Command>) -> (Scene, Option<DsfError>) {
        build_scene(commands, 2, 1)
    }

    fn tri(indices: &[u16]) -> Command {
        Command::Triangle {
            indices: indices.to_vec(),
        }
    }

    #[test]
    fn patches_get_a_pool_select_when_the_pool_changes() {
        let (scene, err) = run(vec![
            Command::PoolSelect { pool: 3 },
            Command::SetDefinition8 { definition: 1 },
            Command::TerrainPatchFlagsLOD {
                flags: 1,
                near: 0.0,
                far: 100.0,
            },
            tri(&[0, 1, 2]),
            tri(&[3, 4, 5]),
            Command::PoolSelect { pool: 4 },
            tri(&[0, 1, 2]),
            // Flags and LOD carry over to the next patch; the pool is attached again.
            Command::TerrainPatch,
            tri(&[6, 7, 8]),
        ]);
        assert!(err.is_none());
        assert_eq!(2, scene.patches.len());

        let first = &scene.patches[0];
        assert_eq!(Some(1), first.flags());
        assert!(first.is_physical());
        assert!(!first.is_overlay());
        assert_eq!((Some(0.0), Some(100.0)), first.lod());
        assert_eq!(1, first.definition());
        assert_eq!(
            &[
                Command::PoolSelect { pool: 3 },
                tri(&[0, 1, 2]),
                tri(&[3, 4, 5]),
                Command::PoolSelect { pool: 4 },
                tri(&[0, 1, 2]),
            ],
            first.commands()
        );
        assert_eq!(3, first.triangles().len());
        assert_eq!(VertexRef::new(4, 2), first.triangles()[2][2]);

        let second = &scene.patches[1];
        assert_eq!((Some(1), (Some(0.0), Some(100.0))), (second.flags(), second.lod()));
        assert_eq!(
            &[Command::PoolSelect { pool: 4 }, tri(&[6, 7, 8])],
            second.commands()
        );
    }

    #[test]
    fn definition_change_inside_a_patch_aborts() {
        let (scene, err) = run(vec![
            Command::TerrainPatch,
            tri(&[0, 1, 2]),
            Command::TerrainPatch,
            tri(&[3, 4, 5]),
            Command::SetDefinition8 { definition: 1 },
            tri(&[6, 7, 8]),
            Command::TerrainPatch,
        ]);
        let err = err.unwrap();
        assert_eq!(ErrorKind::StructuralMismatch, err.kind());
        assert!(matches!(
            err,
            DsfError::PatchDefinitionChanged {
                patch: 1,
                expected: 0,
                found: 1
            }
        ));
        // The earlier patches are intact, and nothing after the error was processed.
        assert_eq!(2, scene.patches.len());
        assert_eq!(2, scene.patches[0].commands().len());
        assert_eq!(2, scene.patches[1].commands().len());
    }

    #[test]
    fn geometry_without_a_patch_fails() {
        let (scene, err) = run(vec![tri(&[0, 1, 2])]);
        assert!(matches!(err, Some(DsfError::NoOpenPatch { opcode: 23 })));
        assert!(scene.patches.is_empty());
    }

    #[test]
    fn polygons_and_objects_are_grouped_by_definition() {
        let (scene, err) = run(vec![
            Command::PoolSelect { pool: 2 },
            Command::SetDefinition8 { definition: 1 },
            Command::Polygon {
                param: 0,
                indices: vec![1, 2, 3],
            },
            Command::SetDefinition16 { definition: 0 },
            Command::PolygonRange {
                param: 9,
                first: 0,
                last: 4,
            },
            Command::Object { index: 7 },
            // Out of range for both tables; dropped.
            Command::SetDefinition32 { definition: 5 },
            Command::Object { index: 8 },
            Command::NestedPolygonRange {
                param: 0,
                indices: vec![0, 4],
            },
        ]);
        assert!(err.is_none());
        assert_eq!(2, scene.polygons.len());
        assert_eq!(1, scene.polygons[0].len());
        assert_eq!(
            PlacedCommand {
                pool: 2,
                command: Command::Polygon {
                    param: 0,
                    indices: vec![1, 2, 3]
                }
            },
            scene.polygons[1][0]
        );
        assert_eq!(1, scene.objects.len());
        assert_eq!(
            vec![PlacedCommand {
                pool: 2,
                command: Command::Object { index: 7 }
            }],
            scene.objects[0]
        );
    }

    #[test]
    fn network_groups_split_on_state_changes() {
        let chain = |i: u16| Command::NetworkChain { indices: vec![i] };
        let (scene, err) = run(vec![
            Command::PoolSelect { pool: 1 },
            chain(0),
            Command::NetworkChainRange { first: 0, last: 2 },
            Command::SetRoadSubtype8 { subtype: 3 },
            chain(1),
            Command::JunctionOffsetSelect { offset: 100 },
            chain(2),
            Command::PoolSelect { pool: 2 },
            chain(3),
            // Setting the same values again does not start a new group.
            Command::PoolSelect { pool: 2 },
            chain(4),
        ]);
        assert!(err.is_none());
        let keys: Vec<(u8, u32, u16, usize)> = scene
            .networks
            .iter()
            .map(|g| (g.subtype, g.junction_offset, g.pool, g.commands.len()))
            .collect();
        assert_eq!(
            vec![(0, 0, 1, 2), (3, 0, 1, 1), (3, 100, 1, 1), (3, 100, 2, 2)],
            keys
        );
    }

    #[test]
    fn comments_are_ignored() {
        let mut builder = SceneBuilder::new(0, 0);
        builder
            .push(Command::Comment8 {
                text: b"hello".to_vec(),
            })
            .unwrap();
        builder.push(Command::SetDefinition8 { definition: 4 }).unwrap();
        assert_eq!(4, builder.state().definition);
        assert_eq!(&Scene::default(), builder.scene());
    }
}
