use tilefuse_ir::{
    Axis, BlockLoop, BlockShape, BlockedNest, IndexExpr, LayoutPlan, OperandRole, PackedOperand,
};

use crate::analyses::{Extent, ShapeSummary};

/// How a matmul is lowered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoweringKind {
    /// Tiled, peeled and fused loop nest over the original operands.
    Direct,
    /// Packed operands and a micro-kernel over blocks.
    Blocked,
}

impl std::fmt::Display for LoweringKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoweringKind::Direct => f.write_str("direct"),
            LoweringKind::Blocked => f.write_str("blocked"),
        }
    }
}

/// Picks the lowering of one matmul. The blocked path is evaluated first when enabled and falls
/// back to the direct path when it doesn't apply.
pub fn select_lowering(lower_to_mmt4d: bool, shapes: &ShapeSummary) -> LoweringKind {
    if !lower_to_mmt4d {
        return LoweringKind::Direct;
    }

    match empty_axis(shapes) {
        Some(axis) => {
            log::info!(
                "Matmul %{} has an empty {axis} dimension, using the direct lowering",
                shapes.matmul.index()
            );
            LoweringKind::Direct
        }
        None => LoweringKind::Blocked,
    }
}

fn empty_axis(shapes: &ShapeSummary) -> Option<Axis> {
    Axis::ALL
        .into_iter()
        .find(|axis| shapes.extent(*axis).as_static() == Some(0))
}

/// Block sizes for the given shapes: a static extent narrower than the default block shrinks the
/// block to that extent.
pub fn block_shape(shapes: &ShapeSummary, default: BlockShape) -> BlockShape {
    let narrow = |extent: Extent, block: u64| match extent {
        Extent::Static(value) if value < block => value,
        _ => block,
    };

    BlockShape::new(
        narrow(shapes.m, default.m0),
        narrow(shapes.n, default.n0),
        narrow(shapes.k, default.k0),
    )
}

/// Number of blocks along a dimension.
fn outer(extent: Extent, block: u64) -> IndexExpr {
    match extent {
        Extent::Static(value) => IndexExpr::Const(value.div_ceil(block)),
        Extent::Dynamic(query) => IndexExpr::CeilDiv {
            extent: query,
            divisor: block,
        },
    }
}

/// Whether the last block along a dimension may be partial.
fn padded(extent: Extent, block: u64) -> bool {
    match extent {
        Extent::Static(value) => value % block != 0,
        Extent::Dynamic(_) => block > 1,
    }
}

/// Builds the blocked nest of `shapes.matmul`.
pub fn plan_blocked(shapes: &ShapeSummary, default: BlockShape) -> BlockedNest {
    let block = block_shape(shapes, default);
    let (m1, n1, k1) = (
        outer(shapes.m, block.m0),
        outer(shapes.n, block.n0),
        outer(shapes.k, block.k0),
    );
    let (pad_m, pad_n, pad_k) = (
        padded(shapes.m, block.m0),
        padded(shapes.n, block.n0),
        padded(shapes.k, block.k0),
    );

    let plan = LayoutPlan::new(
        block,
        PackedOperand::new(
            shapes.lhs,
            OperandRole::Lhs,
            [m1.clone(), k1.clone()],
            [block.m0, block.k0],
            pad_m || pad_k,
        ),
        PackedOperand::new(
            shapes.rhs,
            OperandRole::Rhs,
            [n1.clone(), k1.clone()],
            [block.n0, block.k0],
            pad_n || pad_k,
        ),
        PackedOperand::new(
            shapes.acc,
            OperandRole::Acc,
            [m1.clone(), n1.clone()],
            [block.m0, block.n0],
            pad_m || pad_n,
        ),
    );

    log::debug!(
        "Blocked layout of matmul %{}: m0={}, n0={}, k0={}",
        shapes.matmul.index(),
        block.m0,
        block.n0,
        block.k0
    );

    BlockedNest::new(
        shapes.matmul,
        plan,
        [
            BlockLoop::new(Axis::M, m1),
            BlockLoop::new(Axis::N, n1),
            BlockLoop::new(Axis::K, k1),
        ],
    )
}
