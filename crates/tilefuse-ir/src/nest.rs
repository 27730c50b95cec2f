use derive_new::new;
use smallvec::SmallVec;

use crate::{BlockedNest, DimQuery, ElementwiseFn, IndexExpr, NodeIndex};

/// Logical dimension of a matmul `(M, K) @ (K, N) -> (M, N)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Axis {
    M,
    N,
    K,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::M, Axis::N, Axis::K];

    /// Position of the axis in a `(M, N, K)` triple.
    pub fn position(&self) -> usize {
        match self {
            Axis::M => 0,
            Axis::N => 1,
            Axis::K => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    /// Exactly one tile covering the whole range.
    Whole,
    /// Full-width tiles over the evenly divisible part.
    Main,
    /// The single narrower tile after a [main](RegionKind::Main) region.
    Remainder,
    /// Full-width tiles except the last one, which is clamped to the range end.
    Clamped,
}

/// Runtime test `extent mod tile != 0` protecting a remainder region of a dynamic dimension.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemainderGuard {
    pub extent: DimQuery,
    pub tile: u64,
}

impl RemainderGuard {
    pub fn holds(&self, extent_of: &impl Fn(&DimQuery) -> u64) -> bool {
        extent_of(&self.extent) % self.tile != 0
    }
}

/// An iteration region `[lower, upper)` of one dimension.
#[derive(new, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Region {
    pub axis: Axis,
    pub kind: RegionKind,
    pub lower: IndexExpr,
    pub upper: IndexExpr,
    /// Distance between consecutive tile offsets.
    pub step: IndexExpr,
    /// Width of the tile at each offset. Equal to `step` except for clamped regions.
    pub width: IndexExpr,
}

impl Region {
    /// The `(offset, width)` of every tile visited by the region, for concrete extents.
    pub fn tiles(&self, extent_of: &impl Fn(&DimQuery) -> u64) -> Vec<(u64, u64)> {
        let lower = self.lower.eval(extent_of, 0);
        let upper = self.upper.eval(extent_of, 0);
        if upper <= lower {
            return Vec::new();
        }

        match self.kind {
            RegionKind::Whole | RegionKind::Remainder => {
                let width = self.width.eval(extent_of, lower);
                if width == 0 {
                    Vec::new()
                } else {
                    vec![(lower, width)]
                }
            }
            RegionKind::Main | RegionKind::Clamped => {
                let step = self.step.eval(extent_of, lower);
                if step == 0 {
                    return Vec::new();
                }
                (lower..upper)
                    .step_by(step as usize)
                    .map(|iv| (iv, self.width.eval(extent_of, iv)))
                    .collect()
            }
        }
    }
}

/// Node of the emitted loop nest.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopNode {
    /// Independent M x N tiles. Tiles write disjoint output slices.
    Parallel(ParallelBlock),
    /// Ordered K iterations threading one accumulator.
    Accumulate(Accumulate),
    /// Children execute only when the runtime remainder is non-zero.
    Guarded(Guarded),
    /// Straight-line tile computation.
    Body(TileBody),
}

#[derive(new, Debug, Clone, PartialEq)]
pub struct ParallelBlock {
    pub m: Region,
    pub n: Region,
    pub body: Vec<LoopNode>,
    /// Tile-local values inserted into their full-size results at the end of each tile.
    pub writes: Vec<NodeIndex>,
}

/// Where an accumulation phase takes its initial accumulator from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccumulatorInit {
    /// The tile slice of the matmul's accumulator operand.
    OutputSlice,
    /// The result of the preceding phase in the same tile.
    PreviousPhase,
}

#[derive(new, Debug, Clone, PartialEq)]
pub struct Accumulate {
    pub k: Region,
    pub init: AccumulatorInit,
    pub body: TileBody,
}

#[derive(new, Debug, Clone, PartialEq)]
pub struct Guarded {
    pub guard: RemainderGuard,
    pub body: Vec<LoopNode>,
}

/// Tile widths along M, N and, for matmul bodies, K.
#[derive(new, Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileShape {
    pub m: IndexExpr,
    pub n: IndexExpr,
    pub k: Option<IndexExpr>,
}

#[derive(new, Debug, Clone, PartialEq)]
pub struct TileBody {
    pub shape: TileShape,
    pub ops: Vec<TileOp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TileOperand {
    /// Value of a node already computed for the current tile.
    Local(NodeIndex),
    /// Slice of a tensor defined outside the nest, at the current offsets of `rows` and `cols`.
    Slice {
        source: NodeIndex,
        rows: Axis,
        cols: Axis,
    },
    /// The loop-carried accumulator of the enclosing phase.
    Accumulator,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TileOp {
    /// Partial product of one K step, accumulated into the loop-carried accumulator.
    Matmul {
        lhs: TileOperand,
        rhs: TileOperand,
        acc: TileOperand,
    },
    /// A relocated element-wise consumer, producing the tile value of `node`.
    Elementwise {
        node: NodeIndex,
        func: ElementwiseFn,
        operands: Vec<TileOperand>,
    },
}

/// The direct lowering of a matmul: tiled, peeled and with element-wise consumers fused.
#[derive(new, Debug, Clone, PartialEq)]
pub struct TiledNest {
    /// The matmul whose tile value the accumulation phases compute.
    pub matmul: NodeIndex,
    pub body: Vec<LoopNode>,
    /// Element-wise nodes computed inside the tiles, in execution order.
    pub fused: Vec<NodeIndex>,
    /// Nodes whose full-size value the nest returns, in result order.
    pub results: Vec<NodeIndex>,
}

impl TiledNest {
    /// Every parallel block with the guards that enclose it, outermost first.
    pub fn parallel_blocks(&self) -> Vec<(SmallVec<[RemainderGuard; 2]>, &ParallelBlock)> {
        fn walk<'a>(
            nodes: &'a [LoopNode],
            guards: &mut SmallVec<[RemainderGuard; 2]>,
            out: &mut Vec<(SmallVec<[RemainderGuard; 2]>, &'a ParallelBlock)>,
        ) {
            for node in nodes {
                match node {
                    LoopNode::Parallel(block) => out.push((guards.clone(), block)),
                    LoopNode::Guarded(guarded) => {
                        guards.push(guarded.guard);
                        walk(&guarded.body, guards, out);
                        guards.pop();
                    }
                    LoopNode::Accumulate(_) | LoopNode::Body(_) => {}
                }
            }
        }

        let mut out = Vec::new();
        walk(&self.body, &mut SmallVec::new(), &mut out);
        out
    }
}

impl ParallelBlock {
    /// The accumulation phases of the block with their guard, in execution order.
    pub fn phases(&self) -> Vec<(Option<RemainderGuard>, &Accumulate)> {
        let mut phases = Vec::new();
        for node in &self.body {
            match node {
                LoopNode::Accumulate(phase) => phases.push((None, phase)),
                LoopNode::Guarded(guarded) => {
                    for inner in &guarded.body {
                        if let LoopNode::Accumulate(phase) = inner {
                            phases.push((Some(guarded.guard), phase));
                        }
                    }
                }
                LoopNode::Parallel(_) | LoopNode::Body(_) => {}
            }
        }
        phases
    }

    /// The fused epilogue executed once the accumulator of the tile is final.
    pub fn epilogue(&self) -> Option<&TileBody> {
        self.body.iter().find_map(|node| match node {
            LoopNode::Body(body) => Some(body),
            _ => None,
        })
    }
}

/// The two lowerings a matmul can receive.
#[derive(Debug, Clone, PartialEq)]
pub enum LoweredMatmul {
    Direct(TiledNest),
    Blocked(BlockedNest),
}

impl LoweredMatmul {
    pub fn as_direct(&self) -> Option<&TiledNest> {
        match self {
            LoweredMatmul::Direct(nest) => Some(nest),
            LoweredMatmul::Blocked(_) => None,
        }
    }

    pub fn as_blocked(&self) -> Option<&BlockedNest> {
        match self {
            LoweredMatmul::Blocked(nest) => Some(nest),
            LoweredMatmul::Direct(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use petgraph::graph::NodeIndex;

    use super::*;

    #[test]
    fn main_region_tiles() {
        let region = Region::new(
            Axis::N,
            RegionKind::Main,
            IndexExpr::Const(0),
            IndexExpr::Const(12),
            IndexExpr::Const(4),
            IndexExpr::Const(4),
        );

        assert_eq!(region.tiles(&|_| 0), vec![(0, 4), (4, 4), (8, 4)]);
    }

    #[test]
    fn remainder_region_is_empty_when_width_is_zero() {
        let extent = DimQuery::new(NodeIndex::new(3), 1);
        let region = Region::new(
            Axis::K,
            RegionKind::Remainder,
            IndexExpr::AlignDown {
                extent,
                multiple: 4,
            },
            IndexExpr::Extent(extent),
            IndexExpr::Rem {
                extent,
                modulus: 4,
            },
            IndexExpr::Rem {
                extent,
                modulus: 4,
            },
        );

        assert!(region.tiles(&|_| 8).is_empty());
        assert_eq!(region.tiles(&|_| 11), vec![(8, 3)]);
        assert!(!RemainderGuard::new(extent, 4).holds(&|_| 8));
    }
}
