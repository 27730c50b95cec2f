//! Tile size resolution, per-dimension peeling and construction of the direct loop nest.

mod nest;
mod peel;
mod resolve;

pub use nest::*;
pub use peel::*;
pub use resolve::*;
