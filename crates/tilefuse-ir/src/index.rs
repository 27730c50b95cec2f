use crate::DimQuery;

/// Index arithmetic that appears in loop bounds, steps and tile widths of the emitted program.
///
/// Only the handful of forms produced by peeling are representable, which keeps every bound
/// either a constant or a closed form of a single runtime extent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexExpr {
    Const(u64),
    /// The full runtime extent.
    Extent(DimQuery),
    /// `extent - extent mod multiple`, the end of the evenly tiled part.
    AlignDown { extent: DimQuery, multiple: u64 },
    /// `extent mod modulus`, the width of the peeled tail.
    Rem { extent: DimQuery, modulus: u64 },
    /// `ceil(extent / divisor)`, the number of blocks once padded.
    CeilDiv { extent: DimQuery, divisor: u64 },
    /// `min(tile, upper - iv)` where `iv` is the induction variable of the enclosing region.
    MinTile { tile: u64, upper: Box<IndexExpr> },
}

impl IndexExpr {
    /// Evaluates the expression for concrete runtime extents.
    ///
    /// `iv` is the induction variable of the region the expression belongs to and is only read
    /// by [`IndexExpr::MinTile`].
    pub fn eval(&self, extent_of: &impl Fn(&DimQuery) -> u64, iv: u64) -> u64 {
        match self {
            IndexExpr::Const(val) => *val,
            IndexExpr::Extent(query) => extent_of(query),
            IndexExpr::AlignDown { extent, multiple } => {
                let extent = extent_of(extent);
                extent - extent % multiple
            }
            IndexExpr::Rem { extent, modulus } => extent_of(extent) % modulus,
            IndexExpr::CeilDiv { extent, divisor } => extent_of(extent).div_ceil(*divisor),
            IndexExpr::MinTile { tile, upper } => {
                let upper = upper.eval(extent_of, iv);
                (*tile).min(upper.saturating_sub(iv))
            }
        }
    }
}
