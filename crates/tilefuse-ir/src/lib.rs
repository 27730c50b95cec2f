//! # tilefuse IR
//!
//! Data structures shared by the tilefuse passes:
//!
//! - [`OpGraph`], the operator graph a transformation reads and rewrites. Nodes live in an arena
//!   and are addressed by stable [`NodeIndex`] identifiers.
//! - The loop-nest IR emitted for a matmul on the direct path: [`LoopNode`] trees of parallel
//!   M x N blocks, sequential K accumulation phases, runtime remainder guards and tile bodies.
//! - The blocked (mmt4d) layout IR: [`LayoutPlan`] and [`BlockedNest`].
//!
//! Every type implements [`Display`](std::fmt::Display) with an MLIR-like debug syntax.

mod debug;
mod error;
mod graph;
mod index;
mod layout;
mod nest;
mod shape;

pub use error::*;
pub use graph::*;
pub use index::*;
pub use layout::*;
pub use nest::*;
pub use petgraph::graph::NodeIndex;
pub use shape::*;
