use thiserror::Error;

use crate::ElementwiseFn;

/// A node the graph builders refuse to add.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("{func:?} takes {expected} operand(s), found {found}")]
    OperandCount {
        func: ElementwiseFn,
        expected: usize,
        found: usize,
    },

    #[error("Reduction axis {axis} is out of range for a rank {rank} tensor")]
    AxisOutOfRange { axis: usize, rank: usize },
}
