use derive_new::new;

use crate::{Axis, IndexExpr, NodeIndex};

/// Inner block sizes of the mmt4d layout.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockShape {
    pub m0: u64,
    pub n0: u64,
    pub k0: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandRole {
    Lhs,
    Rhs,
    Acc,
}

/// A 2-D operand repacked into `[outer0, outer1, inner0, inner1]`.
///
/// The outer dimensions index blocks, the inner ones address elements within a block. When
/// `padded` is set, the pack op fills partial blocks; the loop nest never sees them.
#[derive(new, Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackedOperand {
    pub source: NodeIndex,
    pub role: OperandRole,
    pub outer: [IndexExpr; 2],
    pub inner: [u64; 2],
    pub padded: bool,
}

/// Packing of the three matmul operands. The right-hand side is stored transposed, blocked as
/// `[N1, K1, N0, K0]`.
#[derive(new, Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayoutPlan {
    pub block: BlockShape,
    pub lhs: PackedOperand,
    pub rhs: PackedOperand,
    pub acc: PackedOperand,
}

/// Sequential loop `for i in 0..upper` over block indices of one dimension.
#[derive(new, Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockLoop {
    pub axis: Axis,
    pub upper: IndexExpr,
}

/// The blocked lowering of a matmul: pack, three sequential block loops around one micro-kernel
/// call, unpack.
#[derive(new, Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockedNest {
    pub matmul: NodeIndex,
    pub plan: LayoutPlan,
    /// Loops over M1, N1 and K1, outermost first.
    pub loops: [BlockLoop; 3],
}

impl BlockedNest {
    /// Number of micro-kernel calls for concrete extents.
    pub fn kernel_calls(&self, extent_of: &impl Fn(&crate::DimQuery) -> u64) -> u64 {
        self.loops
            .iter()
            .map(|it| it.upper.eval(extent_of, 0))
            .product()
    }
}
