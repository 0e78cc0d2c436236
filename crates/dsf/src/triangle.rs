// Reconstruction of explicit triangles from terrain patch commands.
//
// Vertex order within each triangle follows the order of the command's operands
// and decides which way the face points, so the strip alternation below must not
// be "normalized".

use crate::command::Command;
use log::warn;
use std::fmt;

/// One vertex of a 16-bit coordinate pool.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct VertexRef {
    pub pool: usize,
    pub index: usize,
}

impl VertexRef {
    pub fn new(pool: usize, index: usize) -> VertexRef {
        VertexRef { pool, index }
    }
}

impl fmt::Display for VertexRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.pool, self.index)
    }
}

pub type Triangle = [VertexRef; 3];

fn cross(pair: &(u16, u16)) -> VertexRef {
    VertexRef::new(pair.0 as usize, pair.1 as usize)
}

/// Emits the strip triangles of a vertex list. Every odd step swaps the last two vertices.
fn strip<T: Copy>(v: &[T], mut emit: impl FnMut(T, T, T)) {
    for j in 2..v.len() {
        if j % 2 == 0 {
            emit(v[j - 2], v[j - 1], v[j]);
        } else {
            emit(v[j - 2], v[j], v[j - 1]);
        }
    }
}

/// Emits the fan triangles of a vertex list around its first vertex.
fn fan<T: Copy>(v: &[T], mut emit: impl FnMut(T, T, T)) {
    for j in 2..v.len() {
        emit(v[0], v[j - 1], v[j]);
    }
}

/// Returns the triangles described by the geometry commands of one patch.
///
/// Pool selects change the pool of the single-pool commands that follow. Commands
/// other than pool selects and patch geometry are ignored. The result is rebuilt on
/// every call.
pub fn triangulate(commands: &[Command]) -> Vec<Triangle> {
    let mut triangles: Vec<Triangle> = vec![];
    let mut pool: Option<usize> = None;

    for command in commands {
        if let Command::PoolSelect { pool: p } = command {
            pool = Some(*p as usize);
            continue;
        }
        let out = &mut triangles;
        match command {
            Command::TriangleCrossPool { vertices } => {
                for t in vertices.chunks_exact(3) {
                    out.push([cross(&t[0]), cross(&t[1]), cross(&t[2])]);
                }
                continue;
            }
            Command::TriangleStripCrossPool { vertices } => {
                strip(vertices, |a, b, c| out.push([cross(&a), cross(&b), cross(&c)]));
                continue;
            }
            Command::TriangleFanCrossPool { vertices } => {
                fan(vertices, |a, b, c| out.push([cross(&a), cross(&b), cross(&c)]));
                continue;
            }
            _ => {}
        }
        if !command.is_patch_geometry() {
            continue;
        }

        let p = match pool {
            Some(p) => p,
            None => {
                warn!("{:?} before any pool select; skipped", command.id());
                continue;
            }
        };
        let v = |i: usize| VertexRef::new(p, i);
        let mut emit = |a: usize, b: usize, c: usize| out.push([v(a), v(b), v(c)]);
        match command {
            Command::Triangle { indices } => {
                for t in indices.chunks_exact(3) {
                    emit(t[0] as usize, t[1] as usize, t[2] as usize);
                }
            }
            Command::TriangleRange { first, last } => {
                let (lo, hi) = (*first as usize, *last as usize);
                let mut i = lo;
                while i + 3 <= hi {
                    emit(i, i + 1, i + 2);
                    i += 3;
                }
            }
            Command::TriangleStrip { indices } => {
                strip(indices, |a, b, c| emit(a as usize, b as usize, c as usize));
            }
            Command::TriangleStripRange { first, last } => {
                let (lo, hi) = (*first as usize, *last as usize);
                for i in lo..hi.saturating_sub(2) {
                    if (i - lo) % 2 != 0 {
                        emit(i, i + 2, i + 1);
                    } else {
                        emit(i, i + 1, i + 2);
                    }
                }
            }
            Command::TriangleFan { indices } => {
                fan(indices, |a, b, c| emit(a as usize, b as usize, c as usize));
            }
            Command::TriangleFanRange { first, last } => {
                let (lo, hi) = (*first as usize, *last as usize);
                for i in lo..hi.saturating_sub(2) {
                    emit(lo, i + 1, i + 2);
                }
            }
            _ => {}
        }
    }
    triangles
}
