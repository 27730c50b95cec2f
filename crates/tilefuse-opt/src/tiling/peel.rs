use derive_new::new;
use smallvec::{smallvec, SmallVec};
use tilefuse_ir::{Axis, IndexExpr, Region, RegionKind, RemainderGuard};

use super::{RemainderSplit, TilingDecision};
use crate::analyses::Extent;

/// One region of a peeled dimension, with the guard it executes under.
#[derive(new, Debug, Clone, PartialEq, Eq)]
pub struct PeeledPart {
    pub region: Region,
    pub guard: Option<RemainderGuard>,
}

impl PeeledPart {
    pub fn is_remainder(&self) -> bool {
        self.region.kind == RegionKind::Remainder
    }
}

/// Splits `[0, extent)` into the regions the decision calls for. The regions are disjoint,
/// ordered, and cover the whole range.
pub fn peel(axis: Axis, extent: Extent, decision: &TilingDecision) -> SmallVec<[PeeledPart; 2]> {
    match decision {
        TilingDecision::Saturated { width } => {
            let region = Region::new(
                axis,
                RegionKind::Whole,
                IndexExpr::Const(0),
                extent.expr(),
                width.clone(),
                width.clone(),
            );
            smallvec![PeeledPart::new(region, None)]
        }
        TilingDecision::ExactMultiple { tile } => {
            let region = Region::new(
                axis,
                RegionKind::Main,
                IndexExpr::Const(0),
                extent.expr(),
                IndexExpr::Const(*tile),
                IndexExpr::Const(*tile),
            );
            smallvec![PeeledPart::new(region, None)]
        }
        TilingDecision::MainPlusRemainder(RemainderSplit::Static {
            tile,
            main,
            remainder,
        }) => {
            let main_region = Region::new(
                axis,
                RegionKind::Main,
                IndexExpr::Const(0),
                IndexExpr::Const(*main),
                IndexExpr::Const(*tile),
                IndexExpr::Const(*tile),
            );
            let remainder_region = Region::new(
                axis,
                RegionKind::Remainder,
                IndexExpr::Const(*main),
                IndexExpr::Const(main + remainder),
                IndexExpr::Const(*remainder),
                IndexExpr::Const(*remainder),
            );
            smallvec![
                PeeledPart::new(main_region, None),
                PeeledPart::new(remainder_region, None),
            ]
        }
        TilingDecision::MainPlusRemainder(RemainderSplit::Dynamic { tile, extent }) => {
            let aligned = IndexExpr::AlignDown {
                extent: *extent,
                multiple: *tile,
            };
            let remainder = IndexExpr::Rem {
                extent: *extent,
                modulus: *tile,
            };
            let main_region = Region::new(
                axis,
                RegionKind::Main,
                IndexExpr::Const(0),
                aligned.clone(),
                IndexExpr::Const(*tile),
                IndexExpr::Const(*tile),
            );
            let remainder_region = Region::new(
                axis,
                RegionKind::Remainder,
                aligned,
                IndexExpr::Extent(*extent),
                remainder.clone(),
                remainder,
            );
            smallvec![
                PeeledPart::new(main_region, None),
                PeeledPart::new(remainder_region, Some(RemainderGuard::new(*extent, *tile))),
            ]
        }
    }
}

/// A single region stepping by `tile` whose last tile is clamped to `min(tile, extent - iv)`.
pub fn clamped(axis: Axis, extent: Extent, tile: u64) -> Region {
    Region::new(
        axis,
        RegionKind::Clamped,
        IndexExpr::Const(0),
        extent.expr(),
        IndexExpr::Const(tile),
        IndexExpr::MinTile {
            tile,
            upper: Box::new(extent.expr()),
        },
    )
}

#[cfg(test)]
mod tests {
    use tilefuse_ir::{DimQuery, NodeIndex};

    use super::*;
    use crate::tiling::{decide, TileSize};

    /// Concrete tiles of every part that executes for the runtime extent `value`.
    fn covered(parts: &[PeeledPart], value: u64) -> Vec<(u64, u64)> {
        let extent_of = |_: &DimQuery| value;
        parts
            .iter()
            .filter(|part| part.guard.map_or(true, |guard| guard.holds(&extent_of)))
            .flat_map(|part| part.region.tiles(&extent_of))
            .collect()
    }

    fn assert_partition(tiles: &[(u64, u64)], extent: u64) {
        let mut next = 0;
        for (offset, width) in tiles {
            assert_eq!(*offset, next, "tiles must be contiguous: {tiles:?}");
            assert!(*width > 0);
            next += width;
        }
        assert_eq!(next, extent, "tiles must cover the extent: {tiles:?}");
    }

    #[test]
    fn static_extents_partition() {
        for extent in [0, 1, 3, 4, 6, 16, 17, 127] {
            for tile in [1, 2, 4, 8] {
                let decision = decide(Extent::Static(extent), TileSize::Fixed(tile));
                let parts = peel(Axis::M, Extent::Static(extent), &decision);

                assert_partition(&covered(&parts, 0), extent);
            }
        }
    }

    #[test]
    fn dynamic_extents_partition() {
        let extent = Extent::Dynamic(DimQuery::new(NodeIndex::new(0), 1));
        let decision = decide(extent, TileSize::Fixed(4));
        let parts = peel(Axis::N, extent, &decision);

        assert_eq!(parts.len(), 2);
        assert!(parts[1].guard.is_some());
        for value in [0, 3, 4, 9, 12] {
            assert_partition(&covered(&parts, value), value);
        }
    }

    #[test]
    fn exact_division_has_no_remainder() {
        let decision = decide(Extent::Static(12), TileSize::Fixed(4));
        let parts = peel(Axis::K, Extent::Static(12), &decision);

        assert_eq!(parts.len(), 1);
        assert!(!parts[0].is_remainder());
    }

    #[test]
    fn clamped_region_partitions() {
        let extent = Extent::Dynamic(DimQuery::new(NodeIndex::new(2), 0));
        let region = clamped(Axis::N, extent, 4);

        assert_eq!(region.tiles(&|_| 10), vec![(0, 4), (4, 4), (8, 2)]);
        assert_partition(&region.tiles(&|_| 8), 8);
    }
}
