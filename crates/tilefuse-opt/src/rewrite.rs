use tilefuse_ir::{BlockedNest, LoweredMatmul, NodeIndex, Op, OpGraph, TiledNest};

use crate::{analyses::ShapeSummary, fusion::FusionPlan};

/// Replaces the matmul and its fused consumers with one `TiledMatmul` node.
///
/// Live-outs keep their identifiers and become projections of the new node, so their users and
/// the graph outputs are left untouched. Every other fused node, and the matmul when nothing reads
/// it anymore, is removed. Returns the new node.
pub fn install_direct(
    graph: &mut OpGraph,
    shapes: &ShapeSummary,
    plan: &FusionPlan,
    nest: TiledNest,
) -> NodeIndex {
    let mut operands = vec![shapes.lhs, shapes.rhs, shapes.acc];
    operands.extend(plan.slices.iter().copied());
    let results = nest.results.clone();
    let dead = plan
        .fused_nodes()
        .into_iter()
        .chain(std::iter::once(shapes.matmul))
        .filter(|node| !results.contains(node))
        .collect::<Vec<_>>();

    install(
        graph,
        shapes,
        LoweredMatmul::Direct(nest),
        &operands,
        &results,
        &dead,
    )
}

/// Replaces the matmul with a `TiledMatmul` node carrying the blocked nest.
pub fn install_blocked(graph: &mut OpGraph, shapes: &ShapeSummary, nest: BlockedNest) -> NodeIndex {
    install(
        graph,
        shapes,
        LoweredMatmul::Blocked(nest),
        &[shapes.lhs, shapes.rhs, shapes.acc],
        &[shapes.matmul],
        &[],
    )
}

fn install(
    graph: &mut OpGraph,
    shapes: &ShapeSummary,
    lowered: LoweredMatmul,
    operands: &[NodeIndex],
    results: &[NodeIndex],
    dead: &[NodeIndex],
) -> NodeIndex {
    let ty = graph[shapes.matmul].ty.clone();
    let tiled = graph.add_op(Op::TiledMatmul(Box::new(lowered)), ty, operands);

    for (index, node) in results.iter().enumerate() {
        graph.replace_with_result(*node, tiled, index);
    }
    for node in dead {
        log::trace!("Removing %{}", node.index());
        graph.remove_node(*node);
    }

    tiled
}

#[cfg(test)]
mod tests {
    use tilefuse_ir::{ElementwiseFn, Elem, TensorType};

    use super::*;
    use crate::{
        fusion::plan_fusion,
        tiling::{NestBuilder, ResolvedTiling, TileConfig, TileSize},
    };

    #[test]
    fn fused_chain_is_replaced() {
        let mut graph = OpGraph::new();
        let lhs = graph.input("lhs", TensorType::fixed(Elem::F32, &[4, 4]));
        let rhs = graph.input("rhs", TensorType::fixed(Elem::F32, &[4, 4]));
        let acc = graph.zeros(TensorType::fixed(Elem::F32, &[4, 4]));
        let mm = graph.matmul(lhs, rhs, acc);
        let relu = graph.elementwise(ElementwiseFn::Relu, &[mm]).unwrap();
        let exp = graph.elementwise(ElementwiseFn::Exp, &[relu]).unwrap();
        graph.set_outputs(vec![exp]);

        let mut shapes = ShapeSummary::analyze(&graph, mm).unwrap();
        let plan = plan_fusion(&graph, &mut shapes, true);
        let config = TileConfig::new(&[TileSize::Fixed(2); 3]).unwrap();
        let tiling = ResolvedTiling::resolve(&config, &shapes);
        let body = NestBuilder::new(&shapes, &tiling)
            .with_epilogue(plan.epilogue())
            .with_writes(plan.live_outs.clone())
            .build();
        let nest = TiledNest::new(mm, body, plan.fused_nodes(), plan.live_outs.clone());

        let tiled = install_direct(&mut graph, &shapes, &plan, nest);

        assert!(!graph.contains_node(mm));
        assert!(!graph.contains_node(relu));
        assert_eq!(graph[exp].op, Op::NestResult { index: 0 });
        assert_eq!(graph.operands(exp), vec![tiled]);
        assert_eq!(graph.operands(tiled), vec![lhs, rhs, acc]);
        assert_eq!(graph.outputs(), &[exp]);
        assert!(graph.matmuls().is_empty());
    }
}
