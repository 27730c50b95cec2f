use smallvec::SmallVec;
use tilefuse_ir::{
    Accumulate, AccumulatorInit, Axis, Guarded, LoopNode, NodeIndex, ParallelBlock, Region,
    RemainderGuard, TileBody, TileOp, TileOperand, TileShape,
};

use super::{clamped, peel, PeeledPart, RemainderSplit, ResolvedTiling, TilingDecision};
use crate::analyses::ShapeSummary;

/// Builds the loop nest of the direct lowering: parallel M x N regions, each running its K
/// phases then the fused epilogue.
#[derive(Debug)]
pub struct NestBuilder<'a> {
    shapes: &'a ShapeSummary,
    tiling: &'a ResolvedTiling,
    epilogue: Vec<TileOp>,
    writes: Vec<NodeIndex>,
}

impl<'a> NestBuilder<'a> {
    pub fn new(shapes: &'a ShapeSummary, tiling: &'a ResolvedTiling) -> Self {
        Self {
            shapes,
            tiling,
            epilogue: Vec::new(),
            writes: vec![shapes.matmul],
        }
    }

    /// Operations executed on every output tile after its last K phase.
    pub fn with_epilogue(mut self, ops: Vec<TileOp>) -> Self {
        self.epilogue = ops;
        self
    }

    /// Tile values inserted into full-size results at the end of every tile.
    pub fn with_writes(mut self, writes: Vec<NodeIndex>) -> Self {
        self.writes = writes;
        self
    }

    pub fn build(&self) -> Vec<LoopNode> {
        let m_parts = self.parts(Axis::M);
        let n_parts = self.parts(Axis::N);
        let clamp_n = match self.tiling.n {
            TilingDecision::MainPlusRemainder(RemainderSplit::Dynamic { tile, .. }) => Some(tile),
            _ => None,
        };

        let mut body = Vec::new();
        for m in m_parts.iter() {
            match clamp_n {
                // A dynamic N split would add a second guarded tile row below the M remainder.
                Some(tile) if m.is_remainder() => {
                    let n = PeeledPart::new(clamped(Axis::N, self.shapes.n, tile), None);
                    body.push(self.region(m, &n));
                }
                _ => {
                    for n in n_parts.iter() {
                        body.push(self.region(m, n));
                    }
                }
            }
        }

        log::debug!(
            "Built {} parallel region(s) for matmul %{}",
            body.len(),
            self.shapes.matmul.index()
        );

        body
    }

    fn parts(&self, axis: Axis) -> SmallVec<[PeeledPart; 2]> {
        peel(axis, self.shapes.extent(axis), self.tiling.decision(axis))
    }

    /// One parallel block over `m x n`, wrapped in the guards of both parts.
    fn region(&self, m: &PeeledPart, n: &PeeledPart) -> LoopNode {
        let mut body = self.phases(&m.region, &n.region);
        if !self.epilogue.is_empty() {
            body.push(LoopNode::Body(TileBody::new(
                TileShape::new(m.region.width.clone(), n.region.width.clone(), None),
                self.epilogue.clone(),
            )));
        }

        let block = LoopNode::Parallel(ParallelBlock::new(
            m.region.clone(),
            n.region.clone(),
            body,
            self.writes.clone(),
        ));

        [n.guard, m.guard]
            .into_iter()
            .flatten()
            .fold(block, |node, guard| guard_node(guard, node))
    }

    /// The K phases of one output tile, threading the accumulator from one to the next.
    fn phases(&self, m: &Region, n: &Region) -> Vec<LoopNode> {
        self.parts(Axis::K)
            .into_iter()
            .enumerate()
            .map(|(index, k)| {
                let init = match index {
                    0 => AccumulatorInit::OutputSlice,
                    _ => AccumulatorInit::PreviousPhase,
                };
                let body = TileBody::new(
                    TileShape::new(
                        m.width.clone(),
                        n.width.clone(),
                        Some(k.region.width.clone()),
                    ),
                    vec![TileOp::Matmul {
                        lhs: TileOperand::Slice {
                            source: self.shapes.lhs,
                            rows: Axis::M,
                            cols: Axis::K,
                        },
                        rhs: TileOperand::Slice {
                            source: self.shapes.rhs,
                            rows: Axis::K,
                            cols: Axis::N,
                        },
                        acc: TileOperand::Accumulator,
                    }],
                );
                let phase = LoopNode::Accumulate(Accumulate::new(k.region, init, body));

                match k.guard {
                    Some(guard) => guard_node(guard, phase),
                    None => phase,
                }
            })
            .collect()
    }
}

fn guard_node(guard: RemainderGuard, node: LoopNode) -> LoopNode {
    LoopNode::Guarded(Guarded::new(guard, vec![node]))
}

#[cfg(test)]
mod tests {
    use tilefuse_ir::{Dim, DimQuery, Elem, OpGraph, RegionKind, TensorType, TiledNest};

    use super::*;
    use crate::tiling::{TileConfig, TileSize};

    fn build(graph: &OpGraph, mm: NodeIndex, tiles: [u64; 3]) -> TiledNest {
        let shapes = ShapeSummary::analyze(graph, mm).unwrap();
        let config = TileConfig::new(&tiles.map(TileSize::Fixed)).unwrap();
        let tiling = ResolvedTiling::resolve(&config, &shapes);
        let body = NestBuilder::new(&shapes, &tiling).build();

        TiledNest::new(mm, body, Vec::new(), vec![mm])
    }

    fn static_graph(m: u64, n: u64, k: u64) -> (OpGraph, NodeIndex) {
        let mut graph = OpGraph::new();
        let lhs = graph.input("lhs", TensorType::fixed(Elem::F32, &[m, k]));
        let rhs = graph.input("rhs", TensorType::fixed(Elem::F32, &[k, n]));
        let acc = graph.zeros(TensorType::fixed(Elem::F32, &[m, n]));
        let mm = graph.matmul(lhs, rhs, acc);
        (graph, mm)
    }

    fn dynamic_graph() -> (OpGraph, NodeIndex) {
        let mut graph = OpGraph::new();
        let lhs = graph.dynamic_input("lhs", Elem::F32, &[None, None]);
        let rhs = graph.dynamic_input("rhs", Elem::F32, &[None, None]);
        let m = Dim::Dynamic(DimQuery::new(lhs, 0));
        let n = Dim::Dynamic(DimQuery::new(rhs, 1));
        let acc = graph.zeros(TensorType::new(Elem::F32, vec![m, n]));
        let mm = graph.matmul(lhs, rhs, acc);
        (graph, mm)
    }

    /// `lhs` and `rhs` with the given shapes, `None` being dynamic. The accumulator takes M from
    /// `lhs` and N from `rhs`.
    fn mixed_graph(lhs: [Option<u64>; 2], rhs: [Option<u64>; 2]) -> (OpGraph, NodeIndex) {
        let mut graph = OpGraph::new();
        let lhs = graph.dynamic_input("lhs", Elem::F32, &lhs);
        let rhs = graph.dynamic_input("rhs", Elem::F32, &rhs);
        let dims = vec![graph.dim(lhs, 0).unwrap(), graph.dim(rhs, 1).unwrap()];
        let acc = graph.zeros(TensorType::new(Elem::F32, dims));
        let mm = graph.matmul(lhs, rhs, acc);
        (graph, mm)
    }

    /// Every output tile `(m offset, m width, n offset, n width)` executed for extent `value`.
    fn output_tiles(nest: &TiledNest, value: u64) -> Vec<(u64, u64, u64, u64)> {
        let extent_of = |_: &DimQuery| value;
        let mut tiles = Vec::new();
        for (guards, block) in nest.parallel_blocks() {
            if !guards.iter().all(|guard| guard.holds(&extent_of)) {
                continue;
            }
            for (m_off, m_width) in block.m.tiles(&extent_of) {
                for (n_off, n_width) in block.n.tiles(&extent_of) {
                    tiles.push((m_off, m_width, n_off, n_width));
                }
            }
        }
        tiles
    }

    fn assert_covers(tiles: &[(u64, u64, u64, u64)], m: u64, n: u64) {
        let mut seen = vec![0u32; (m * n) as usize];
        for (m_off, m_width, n_off, n_width) in tiles {
            for i in *m_off..m_off + m_width {
                for j in *n_off..n_off + n_width {
                    seen[(i * n + j) as usize] += 1;
                }
            }
        }
        assert!(seen.iter().all(|count| *count == 1), "{tiles:?}");
    }

    #[test]
    fn quadrants_partition_the_output() {
        let (graph, mm) = static_graph(10, 6, 4);
        let nest = build(&graph, mm, [4, 4, 4]);
        let blocks = nest.parallel_blocks();

        assert_eq!(blocks.len(), 4);
        let kinds = blocks
            .iter()
            .map(|(_, block)| (block.m.kind, block.n.kind))
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                (RegionKind::Main, RegionKind::Main),
                (RegionKind::Main, RegionKind::Remainder),
                (RegionKind::Remainder, RegionKind::Main),
                (RegionKind::Remainder, RegionKind::Remainder),
            ]
        );
        assert_covers(&output_tiles(&nest, 0), 10, 6);
    }

    #[test]
    fn static_k_split_threads_accumulator() {
        let (graph, mm) = static_graph(8, 8, 6);
        let nest = build(&graph, mm, [8, 8, 4]);
        let blocks = nest.parallel_blocks();

        assert_eq!(blocks.len(), 1);
        let phases = blocks[0].1.phases();
        assert_eq!(phases.len(), 2);
        assert_eq!(phases[0].1.init, AccumulatorInit::OutputSlice);
        assert_eq!(phases[1].1.init, AccumulatorInit::PreviousPhase);
        assert!(phases.iter().all(|(guard, _)| guard.is_none()));
        assert_eq!(phases[1].1.k.width, tilefuse_ir::IndexExpr::Const(2));
    }

    #[test]
    fn dynamic_shapes_give_three_regions() {
        let (graph, mm) = dynamic_graph();
        let nest = build(&graph, mm, [4, 4, 4]);
        let blocks = nest.parallel_blocks();

        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].0.len(), 0);
        assert_eq!(blocks[1].0.len(), 1);
        assert_eq!(blocks[2].0.len(), 1);
        assert_eq!(blocks[2].1.n.kind, RegionKind::Clamped);

        for (_, block) in &blocks {
            let phases = block.phases();
            assert_eq!(phases.len(), 2);
            assert!(phases[0].0.is_none());
            assert!(phases[1].0.is_some());
        }

        for value in [3, 4, 7, 8, 13] {
            assert_covers(&output_tiles(&nest, value), value, value);
        }
    }

    #[test]
    fn static_split_along_every_dimension() {
        let (graph, mm) = static_graph(10, 6, 7);
        let nest = build(&graph, mm, [4, 4, 4]);
        let blocks = nest.parallel_blocks();

        assert_eq!(blocks.len(), 4);
        for (guards, block) in &blocks {
            assert!(guards.is_empty());
            let phases = block.phases();
            assert_eq!(phases.len(), 2);
            assert!(phases.iter().all(|(guard, _)| guard.is_none()));
            assert_eq!(phases[0].1.init, AccumulatorInit::OutputSlice);
            assert_eq!(phases[1].1.init, AccumulatorInit::PreviousPhase);
            assert_eq!(phases[1].1.k.width, tilefuse_ir::IndexExpr::Const(3));
        }
        assert_covers(&output_tiles(&nest, 0), 10, 6);
    }

    #[test]
    fn static_m_remainder_with_dynamic_n_is_clamped() {
        let (graph, mm) = mixed_graph([Some(10), Some(7)], [Some(7), None]);
        let nest = build(&graph, mm, [4, 4, 4]);
        let blocks = nest.parallel_blocks();

        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].0.len(), 0);
        assert_eq!((blocks[0].1.m.kind, blocks[0].1.n.kind), (RegionKind::Main, RegionKind::Main));
        assert_eq!(blocks[1].0.len(), 1);
        assert_eq!(blocks[1].1.n.kind, RegionKind::Remainder);
        assert_eq!(blocks[2].0.len(), 0);
        assert_eq!(
            (blocks[2].1.m.kind, blocks[2].1.n.kind),
            (RegionKind::Remainder, RegionKind::Clamped)
        );
        assert!(blocks.iter().all(|(_, block)| block.phases().len() == 2));

        for n in [0, 3, 4, 9, 12] {
            assert_covers(&output_tiles(&nest, n), 10, n);
        }
    }

    #[test]
    fn dynamic_m_with_static_n_split_guards_m_remainders() {
        let (graph, mm) = mixed_graph([None, Some(7)], [Some(7), Some(6)]);
        let nest = build(&graph, mm, [4, 4, 4]);
        let blocks = nest.parallel_blocks();

        assert_eq!(blocks.len(), 4);
        let shape = blocks
            .iter()
            .map(|(guards, block)| (guards.len(), block.m.kind, block.n.kind))
            .collect::<Vec<_>>();
        assert_eq!(
            shape,
            vec![
                (0, RegionKind::Main, RegionKind::Main),
                (0, RegionKind::Main, RegionKind::Remainder),
                (1, RegionKind::Remainder, RegionKind::Main),
                (1, RegionKind::Remainder, RegionKind::Remainder),
            ]
        );
        assert!(blocks.iter().all(|(_, block)| block.phases().len() == 2));

        for m in [0, 3, 4, 9, 12] {
            assert_covers(&output_tiles(&nest, m), m, 6);
        }
    }
}
