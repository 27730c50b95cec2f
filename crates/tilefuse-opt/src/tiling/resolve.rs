use tilefuse_ir::{Axis, DimQuery, IndexExpr};

use crate::{
    analyses::{Extent, ShapeSummary},
    error::TransformError,
};

/// Requested tile size of one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileSize {
    Fixed(u64),
    /// Do not tile: one tile spans the whole dimension.
    Full,
}

/// Tile sizes for `(M, N, K)`, uniform across all tiles of a dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileConfig {
    sizes: [TileSize; 3],
}

impl TileConfig {
    /// Validates one tile size per tileable dimension, each positive.
    pub fn new(sizes: &[TileSize]) -> Result<Self, TransformError> {
        let found = sizes.len();
        let sizes: [TileSize; 3] = sizes
            .try_into()
            .map_err(|_| TransformError::InvalidTileConfiguration {
                reason: format!("expected 3 tile sizes (m, n, k), found {found}"),
            })?;

        for (axis, size) in Axis::ALL.iter().zip(sizes.iter()) {
            if *size == TileSize::Fixed(0) {
                return Err(TransformError::InvalidTileConfiguration {
                    reason: format!("tile size of {axis} must be positive"),
                });
            }
        }

        Ok(Self { sizes })
    }

    pub fn sizes(&self) -> [TileSize; 3] {
        self.sizes
    }

    pub fn size(&self, axis: Axis) -> TileSize {
        self.sizes[axis.position()]
    }
}

/// A split into an evenly tiled main part and a narrower tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemainderSplit {
    /// `main + remainder == extent`, `0 < remainder < tile`.
    Static { tile: u64, main: u64, remainder: u64 },
    /// The tail width `extent mod tile` is only known at runtime and guards the tail.
    Dynamic { tile: u64, extent: DimQuery },
}

/// How one dimension is tiled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TilingDecision {
    /// A single tile covers the whole dimension.
    Saturated { width: IndexExpr },
    /// Every tile has the full width.
    ExactMultiple { tile: u64 },
    MainPlusRemainder(RemainderSplit),
}

impl TilingDecision {
    pub fn is_dynamic_split(&self) -> bool {
        matches!(
            self,
            TilingDecision::MainPlusRemainder(RemainderSplit::Dynamic { .. })
        )
    }
}

/// The tiling decision of each matmul dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTiling {
    pub m: TilingDecision,
    pub n: TilingDecision,
    pub k: TilingDecision,
}

impl ResolvedTiling {
    pub fn resolve(config: &TileConfig, shapes: &ShapeSummary) -> Self {
        let decide_axis = |axis: Axis| {
            let decision = decide(shapes.extent(axis), config.size(axis));
            log::debug!("Tiling of {axis}: {decision:?}");
            decision
        };

        Self {
            m: decide_axis(Axis::M),
            n: decide_axis(Axis::N),
            k: decide_axis(Axis::K),
        }
    }

    pub fn decision(&self, axis: Axis) -> &TilingDecision {
        match axis {
            Axis::M => &self.m,
            Axis::N => &self.n,
            Axis::K => &self.k,
        }
    }
}

/// Tiling decision for one dimension.
pub fn decide(extent: Extent, tile: TileSize) -> TilingDecision {
    match (extent, tile) {
        // An empty dimension runs zero iterations whatever the tile.
        (Extent::Static(0), TileSize::Fixed(tile)) => TilingDecision::ExactMultiple { tile },
        (Extent::Static(0), TileSize::Full) => TilingDecision::ExactMultiple { tile: 1 },
        (Extent::Static(extent), TileSize::Full) => TilingDecision::Saturated {
            width: IndexExpr::Const(extent),
        },
        (Extent::Static(extent), TileSize::Fixed(tile)) if extent < tile => {
            TilingDecision::Saturated {
                width: IndexExpr::Const(extent),
            }
        }
        (Extent::Static(extent), TileSize::Fixed(tile)) if extent % tile == 0 => {
            TilingDecision::ExactMultiple { tile }
        }
        (Extent::Static(extent), TileSize::Fixed(tile)) => {
            let remainder = extent % tile;
            TilingDecision::MainPlusRemainder(RemainderSplit::Static {
                tile,
                main: extent - remainder,
                remainder,
            })
        }
        (Extent::Dynamic(query), TileSize::Full) => TilingDecision::Saturated {
            width: IndexExpr::Extent(query),
        },
        (Extent::Dynamic(_), TileSize::Fixed(1)) => TilingDecision::ExactMultiple { tile: 1 },
        (Extent::Dynamic(extent), TileSize::Fixed(tile)) => {
            TilingDecision::MainPlusRemainder(RemainderSplit::Dynamic { tile, extent })
        }
    }
}
