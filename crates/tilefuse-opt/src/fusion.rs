use derive_new::new;
use hashbrown::HashSet;
use petgraph::algo::has_path_connecting;
use tilefuse_ir::{Axis, ElementwiseFn, NodeIndex, OpGraph, TileOp, TileOperand};

use crate::{
    analyses::ShapeSummary,
    error::{FusionRejection, RejectionReason},
};

/// An element-wise consumer relocated into the output tiles.
#[derive(new, Debug, Clone, PartialEq, Eq)]
pub struct FusedOp {
    pub node: NodeIndex,
    pub func: ElementwiseFn,
    pub operands: Vec<TileOperand>,
}

impl FusedOp {
    pub fn tile_op(&self) -> TileOp {
        TileOp::Elementwise {
            node: self.node,
            func: self.func,
            operands: self.operands.clone(),
        }
    }
}

/// Which consumers of a matmul run inside its tiles, and which values leave the nest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FusionPlan {
    /// Fused operations in execution order.
    pub ops: Vec<FusedOp>,
    /// Nodes whose full-size value is read outside the nest. The matmul comes first when listed.
    pub live_outs: Vec<NodeIndex>,
    pub rejections: Vec<FusionRejection>,
    /// Tensors defined outside the nest and read tile by tile by fused operations.
    pub slices: Vec<NodeIndex>,
}

impl FusionPlan {
    pub fn fused_nodes(&self) -> Vec<NodeIndex> {
        self.ops.iter().map(|op| op.node).collect()
    }

    pub fn epilogue(&self) -> Vec<TileOp> {
        self.ops.iter().map(FusedOp::tile_op).collect()
    }
}

/// Plans the fusion of the consumers of `shapes.matmul`.
///
/// A node is fused when it reads the matmul or an already fused node, is element-wise, spans the
/// matmul output, and reads every other operand as an output-shaped tensor that doesn't depend on
/// the matmul. Fused nodes are registered as output-shaped in `shapes`, so consumers of their
/// dynamic dimensions are recognized too.
pub fn plan_fusion(graph: &OpGraph, shapes: &mut ShapeSummary, enabled: bool) -> FusionPlan {
    let matmul = shapes.matmul;
    let mut scope = HashSet::new();
    scope.insert(matmul);
    let mut plan = FusionPlan::default();

    if enabled {
        let order = graph.topological_order();
        let start = order
            .iter()
            .position(|node| *node == matmul)
            .map_or(order.len(), |position| position + 1);

        for node in order[start..].iter().copied() {
            let operands = graph.operands(node);
            if !operands.iter().any(|operand| scope.contains(operand)) {
                continue;
            }

            match admit(graph, shapes, &scope, node, &operands) {
                Ok(fused) => {
                    log::debug!("Fusing %{} into matmul %{}", node.index(), matmul.index());
                    for operand in fused.operands.iter() {
                        if let TileOperand::Slice { source, .. } = operand {
                            if !plan.slices.contains(source) {
                                plan.slices.push(*source);
                            }
                        }
                    }
                    scope.insert(node);
                    shapes.register_output(node);
                    plan.ops.push(fused);
                }
                Err(reason) => {
                    let rejection = FusionRejection { node, reason };
                    log::info!("{rejection}");
                    plan.rejections.push(rejection);
                }
            }
        }
    }

    let escapes = |node: NodeIndex| {
        graph.is_output(node)
            || graph
                .users(node)
                .iter()
                .any(|user| !scope.contains(user))
    };
    plan.live_outs = std::iter::once(matmul)
        .chain(plan.ops.iter().map(|op| op.node))
        .filter(|node| escapes(*node))
        .collect();

    // A nest always produces at least the matmul.
    if plan.live_outs.is_empty() {
        plan.live_outs.push(matmul);
    }

    plan
}

fn admit(
    graph: &OpGraph,
    shapes: &ShapeSummary,
    scope: &HashSet<NodeIndex>,
    node: NodeIndex,
    operands: &[NodeIndex],
) -> Result<FusedOp, RejectionReason> {
    let func = graph[node]
        .op
        .elementwise()
        .ok_or(RejectionReason::NotElementwise)?;
    if operands.len() != func.arity() {
        return Err(RejectionReason::OperandCount {
            expected: func.arity(),
            found: operands.len(),
        });
    }

    let ty = &graph[node].ty;
    if !shapes.matches_output(ty) {
        return Err(RejectionReason::UnsupportedFusionShape(format!(
            "result {ty} does not span the matmul output"
        )));
    }

    let mut tile_operands = Vec::with_capacity(operands.len());
    for operand in operands.iter().copied() {
        if scope.contains(&operand) {
            tile_operands.push(TileOperand::Local(operand));
            continue;
        }

        let operand_ty = &graph[operand].ty;
        if !shapes.matches_output(operand_ty) {
            return Err(RejectionReason::UnsupportedFusionShape(format!(
                "operand %{} of type {operand_ty} does not span the matmul output",
                operand.index()
            )));
        }
        if has_path_connecting(&**graph, shapes.matmul, operand, None) {
            return Err(RejectionReason::DependsOnUnfusedResult(operand.index()));
        }

        tile_operands.push(TileOperand::Slice {
            source: operand,
            rows: Axis::M,
            cols: Axis::N,
        });
    }

    Ok(FusedOp::new(node, func, tile_operands))
}
