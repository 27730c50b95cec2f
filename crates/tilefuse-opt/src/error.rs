use std::fmt::Display;

use thiserror::Error;
use tilefuse_ir::{Axis, NodeIndex};

/// Fatal errors of the transformation. When one is returned, the graph has not been modified.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// Statically known extents of the same logical dimension disagree.
    #[error("Shape mismatch in matmul %{matmul} along {axis}: {expected} != {found}")]
    ShapeMismatch {
        matmul: usize,
        axis: Axis,
        expected: u64,
        found: u64,
    },

    /// A tile size is not positive, or there isn't exactly one per tileable dimension.
    #[error("Invalid tile configuration: {reason}")]
    InvalidTileConfiguration { reason: String },

    /// A matmul operand isn't a rank-2 tensor.
    #[error("Operand %{operand} of matmul %{matmul} must have rank 2, found rank {rank}")]
    InvalidOperand {
        matmul: usize,
        operand: usize,
        rank: usize,
    },

    /// The transformation was asked to rewrite something other than a matmul.
    #[error("Node %{node} is not a matmul")]
    NotAMatmul { node: usize },
}

/// Errors while reading the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read the configuration file\nCaused by:\n  {0}")]
    Io(#[from] std::io::Error),

    #[error("The configuration file doesn't have the right format\nCaused by:\n  {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid option `{option}`: {reason}")]
    InvalidOption { option: String, reason: String },
}

/// Why a consumer of the matmul was left out of the tiled scope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    #[error("not a pure element-wise operation")]
    NotElementwise,

    #[error("element-wise operation expects {expected} operand(s), found {found}")]
    OperandCount { expected: usize, found: usize },

    /// The iteration space can't be proven equal to the matmul output's.
    #[error("unsupported fusion shape: {0}")]
    UnsupportedFusionShape(String),

    /// An operand is computed from the un-fused matmul result outside the tiled scope.
    #[error("operand %{0} depends on a result computed outside the tiled scope")]
    DependsOnUnfusedResult(usize),
}

/// A non-fatal fusion decision: `node` keeps reading the materialized result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusionRejection {
    pub node: NodeIndex,
    pub reason: RejectionReason,
}

impl Display for FusionRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{} not fused: {}", self.node.index(), self.reason)
    }
}
