//! # tilefuse optimizer
//!
//! Rewrites every matrix multiplication of an [`OpGraph`](tilefuse_ir::OpGraph) into an explicit
//! tiled loop nest. The order of operations for one matmul is as follows:
//!
//! 1. Analyze the operand shapes into static or dynamic extents of M, N and K
//! 2. Pick the lowering: the blocked mmt4d layout when enabled and applicable, the direct nest
//!    otherwise
//! 3. Direct path: plan which element-wise consumers move into the tiles, resolve the tile size of
//!    each dimension, peel the non-divisible dimensions into main and remainder regions and build
//!    the nest
//! 4. Replace the matmul and its fused consumers with a single `TiledMatmul` node
//!
//! Configuration is read from `tilefuse.toml`, environment variables or pass-option strings, see
//! [`config::TileFuseConfig`].

use std::{
    rc::Rc,
    sync::atomic::{AtomicUsize, Ordering},
};

pub mod analyses;
pub mod config;
pub mod error;
pub mod fusion;
pub mod layout;
pub mod rewrite;
pub mod tiling;

mod pass;

pub use pass::*;

/// An atomic counter with a simplified interface.
#[derive(Clone, Debug, Default)]
pub struct AtomicCounter {
    inner: Rc<AtomicUsize>,
}

impl AtomicCounter {
    /// Creates a new counter with `val` as its initial value.
    pub fn new(val: usize) -> Self {
        Self {
            inner: Rc::new(AtomicUsize::new(val)),
        }
    }

    /// Increments the counter and returns the last count.
    pub fn inc(&self) -> usize {
        self.inner.fetch_add(1, Ordering::AcqRel)
    }

    /// Gets the value of the counter without incrementing it.
    pub fn get(&self) -> usize {
        self.inner.load(Ordering::Acquire)
    }
}
