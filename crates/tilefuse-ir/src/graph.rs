use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    ops::{Deref, DerefMut},
};

use derive_new::new;
use hashbrown::HashMap;
use petgraph::{prelude::StableDiGraph, visit::EdgeRef, Direction};

use crate::{Dim, DimQuery, Elem, GraphError, LoweredMatmul, NodeIndex, TensorType};

/// Pure element-wise functions. Every one of them maps output element `i` from input elements `i`
/// only, which is what makes them candidates for per-tile relocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementwiseFn {
    Add,
    Sub,
    Mul,
    Max,
    Min,
    Relu,
    Exp,
    Neg,
    Abs,
}

impl ElementwiseFn {
    pub fn arity(&self) -> usize {
        match self {
            ElementwiseFn::Add
            | ElementwiseFn::Sub
            | ElementwiseFn::Mul
            | ElementwiseFn::Max
            | ElementwiseFn::Min => 2,
            ElementwiseFn::Relu | ElementwiseFn::Exp | ElementwiseFn::Neg | ElementwiseFn::Abs => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceKind {
    Sum,
    Max,
}

/// An operation of the graph. Operands are the incoming edges of the node, ordered by edge weight.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// A tensor provided by the caller.
    Input { name: String },
    /// A zero-filled tensor, typically the matmul accumulator.
    Zeros,
    /// `acc + lhs @ rhs`, operands `[lhs, rhs, acc]`.
    Matmul,
    Elementwise(ElementwiseFn),
    Reduce { axis: usize, kind: ReduceKind },
    /// Swaps the two axes of a rank-2 tensor.
    Transpose,
    /// An operation the transformation knows nothing about.
    Opaque { name: String, side_effects: bool },
    /// A matmul (and its fused consumers) lowered to an explicit loop nest.
    TiledMatmul(Box<LoweredMatmul>),
    /// Result `index` of the [tiled matmul](Op::TiledMatmul) operand.
    NestResult { index: usize },
}

impl Op {
    pub fn is_matmul(&self) -> bool {
        matches!(self, Op::Matmul)
    }

    pub fn elementwise(&self) -> Option<ElementwiseFn> {
        match self {
            Op::Elementwise(func) => Some(*func),
            _ => None,
        }
    }
}

#[derive(new, Debug, Clone, PartialEq)]
pub struct Node {
    pub op: Op,
    pub ty: TensorType,
}

/// The operator graph. An arena of [`Node`]s addressed by stable [`NodeIndex`] identifiers, so
/// removing a node never invalidates the identifiers of the others.
#[derive(Default, Debug, Clone)]
pub struct OpGraph {
    graph: StableDiGraph<Node, u32>,
    outputs: Vec<NodeIndex>,
}

impl Deref for OpGraph {
    type Target = StableDiGraph<Node, u32>;

    fn deref(&self) -> &Self::Target {
        &self.graph
    }
}

impl DerefMut for OpGraph {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.graph
    }
}

impl OpGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node reading `operands` in order.
    pub fn add_op(&mut self, op: Op, ty: TensorType, operands: &[NodeIndex]) -> NodeIndex {
        let node = self.graph.add_node(Node::new(op, ty));
        for (position, operand) in operands.iter().enumerate() {
            self.graph.add_edge(*operand, node, position as u32);
        }
        node
    }

    pub fn input(&mut self, name: impl Into<String>, ty: TensorType) -> NodeIndex {
        self.add_op(Op::Input { name: name.into() }, ty, &[])
    }

    /// Adds an input whose `None` dimensions are dynamic, measured on the input itself.
    pub fn dynamic_input(
        &mut self,
        name: impl Into<String>,
        elem: Elem,
        shape: &[Option<u64>],
    ) -> NodeIndex {
        let node = self.input(name, TensorType::new(elem, Vec::new()));
        self.graph[node].ty.dims = shape
            .iter()
            .enumerate()
            .map(|(axis, dim)| match dim {
                Some(val) => Dim::Static(*val),
                None => Dim::Dynamic(DimQuery::new(node, axis)),
            })
            .collect();
        node
    }

    pub fn zeros(&mut self, ty: TensorType) -> NodeIndex {
        self.add_op(Op::Zeros, ty, &[])
    }

    /// `acc + lhs @ rhs`. The result has the accumulator's type.
    pub fn matmul(&mut self, lhs: NodeIndex, rhs: NodeIndex, acc: NodeIndex) -> NodeIndex {
        let ty = self.graph[acc].ty.clone();
        self.add_op(Op::Matmul, ty, &[lhs, rhs, acc])
    }

    /// Element-wise operation. The result has the type of the first operand.
    pub fn elementwise(
        &mut self,
        func: ElementwiseFn,
        operands: &[NodeIndex],
    ) -> Result<NodeIndex, GraphError> {
        let first = match operands {
            [first, ..] if operands.len() == func.arity() => *first,
            _ => {
                return Err(GraphError::OperandCount {
                    func,
                    expected: func.arity(),
                    found: operands.len(),
                });
            }
        };
        let ty = self.graph[first].ty.clone();
        Ok(self.add_op(Op::Elementwise(func), ty, operands))
    }

    /// Reduces `input` along `axis`, which is dropped from the result type.
    pub fn reduce(
        &mut self,
        input: NodeIndex,
        axis: usize,
        kind: ReduceKind,
    ) -> Result<NodeIndex, GraphError> {
        let mut ty = self.graph[input].ty.clone();
        if axis >= ty.rank() {
            return Err(GraphError::AxisOutOfRange {
                axis,
                rank: ty.rank(),
            });
        }
        ty.dims.remove(axis);
        Ok(self.add_op(Op::Reduce { axis, kind }, ty, &[input]))
    }

    pub fn transpose(&mut self, input: NodeIndex) -> NodeIndex {
        let mut ty = self.graph[input].ty.clone();
        ty.dims.reverse();
        self.add_op(Op::Transpose, ty, &[input])
    }

    pub fn opaque(
        &mut self,
        name: impl Into<String>,
        side_effects: bool,
        operands: &[NodeIndex],
        ty: TensorType,
    ) -> NodeIndex {
        let op = Op::Opaque {
            name: name.into(),
            side_effects,
        };
        self.add_op(op, ty, operands)
    }

    /// Marks the values returned by the graph.
    pub fn set_outputs(&mut self, outputs: Vec<NodeIndex>) {
        self.outputs = outputs;
    }

    pub fn outputs(&self) -> &[NodeIndex] {
        &self.outputs
    }

    pub fn is_output(&self, node: NodeIndex) -> bool {
        self.outputs.contains(&node)
    }

    /// Operands of `node` in operand order.
    pub fn operands(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut edges = self
            .graph
            .edges_directed(node, Direction::Incoming)
            .map(|edge| (*edge.weight(), edge.source()))
            .collect::<Vec<_>>();
        edges.sort_by_key(|(position, _)| *position);
        edges.into_iter().map(|(_, source)| source).collect()
    }

    /// Nodes reading `node`, each listed once, in identifier order.
    pub fn users(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut users = self
            .graph
            .edges_directed(node, Direction::Outgoing)
            .map(|edge| edge.target())
            .collect::<Vec<_>>();
        users.sort();
        users.dedup();
        users
    }

    /// A topological order of all nodes. Among ready nodes the one with the smallest identifier
    /// comes first, so the order is stable and follows construction order where possible.
    pub fn topological_order(&self) -> Vec<NodeIndex> {
        let mut pending = self
            .graph
            .node_indices()
            .map(|node| {
                let count = self
                    .graph
                    .edges_directed(node, Direction::Incoming)
                    .count();
                (node, count)
            })
            .collect::<HashMap<_, _>>();

        let mut ready = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(node, _)| Reverse(*node))
            .collect::<BinaryHeap<_>>();
        let mut order = Vec::with_capacity(self.graph.node_count());

        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for edge in self.graph.edges_directed(node, Direction::Outgoing) {
                if let Some(count) = pending.get_mut(&edge.target()) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(Reverse(edge.target()));
                    }
                }
            }
        }

        order
    }

    /// All matmul nodes in topological order.
    pub fn matmuls(&self) -> Vec<NodeIndex> {
        self.topological_order()
            .into_iter()
            .filter(|node| self.graph[*node].op.is_matmul())
            .collect()
    }

    /// Turns `node` into result `index` of `source`, dropping its previous operands. Users of
    /// `node` are left untouched.
    pub fn replace_with_result(&mut self, node: NodeIndex, source: NodeIndex, index: usize) {
        let incoming = self
            .graph
            .edges_directed(node, Direction::Incoming)
            .map(|edge| edge.id())
            .collect::<Vec<_>>();
        for edge in incoming {
            self.graph.remove_edge(edge);
        }
        self.graph[node].op = Op::NestResult { index };
        self.graph.add_edge(source, node, 0);
    }

    /// Dimension `axis` of `node`'s type.
    pub fn dim(&self, node: NodeIndex, axis: usize) -> Option<Dim> {
        self.graph[node].ty.dims.get(axis).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mat(graph: &mut OpGraph, name: &str, shape: &[u64]) -> NodeIndex {
        graph.input(name, TensorType::fixed(Elem::F32, shape))
    }

    #[test]
    fn operands_keep_their_position() {
        let mut graph = OpGraph::new();
        let a = mat(&mut graph, "a", &[4, 4]);
        let b = mat(&mut graph, "b", &[4, 4]);
        let sub = graph.elementwise(ElementwiseFn::Sub, &[b, a]).unwrap();

        assert_eq!(graph.operands(sub), vec![b, a]);
    }

    #[test]
    fn users_are_deduplicated() {
        let mut graph = OpGraph::new();
        let a = mat(&mut graph, "a", &[4, 4]);
        let square = graph.elementwise(ElementwiseFn::Mul, &[a, a]).unwrap();

        assert_eq!(graph.users(a), vec![square]);
        assert_eq!(graph.operands(square), vec![a, a]);
    }

    #[test]
    fn topological_order_survives_removal() {
        let mut graph = OpGraph::new();
        let a = mat(&mut graph, "a", &[2, 3]);
        let b = mat(&mut graph, "b", &[3, 4]);
        let acc = graph.zeros(TensorType::fixed(Elem::F32, &[2, 4]));
        let mm = graph.matmul(a, b, acc);
        let relu = graph.elementwise(ElementwiseFn::Relu, &[mm]).unwrap();
        let dead = graph.transpose(a);
        graph.remove_node(dead);

        assert_eq!(graph.topological_order(), vec![a, b, acc, mm, relu]);
        assert_eq!(graph.matmuls(), vec![mm]);
    }

    #[test]
    fn topological_order_counts_repeated_operands() {
        let mut graph = OpGraph::new();
        let a = mat(&mut graph, "a", &[2, 2]);
        let b = mat(&mut graph, "b", &[2, 2]);
        let square = graph.elementwise(ElementwiseFn::Mul, &[b, b]).unwrap();
        let neg = graph.elementwise(ElementwiseFn::Neg, &[a]).unwrap();
        let join = graph.elementwise(ElementwiseFn::Add, &[square, neg]).unwrap();

        assert_eq!(graph.topological_order(), vec![a, b, square, neg, join]);
    }

    #[test]
    fn replace_with_result_keeps_users() {
        let mut graph = OpGraph::new();
        let a = mat(&mut graph, "a", &[2, 2]);
        let neg = graph.elementwise(ElementwiseFn::Neg, &[a]).unwrap();
        let abs = graph.elementwise(ElementwiseFn::Abs, &[neg]).unwrap();
        let source = mat(&mut graph, "nest", &[2, 2]);

        graph.replace_with_result(neg, source, 1);

        assert_eq!(graph[neg].op, Op::NestResult { index: 1 });
        assert_eq!(graph.operands(neg), vec![source]);
        assert_eq!(graph.users(neg), vec![abs]);
    }

    #[test]
    fn builders_validate_operands() {
        let mut graph = OpGraph::new();
        let a = mat(&mut graph, "a", &[2, 5]);

        assert_eq!(
            graph.elementwise(ElementwiseFn::Relu, &[a, a]),
            Err(GraphError::OperandCount {
                func: ElementwiseFn::Relu,
                expected: 1,
                found: 2
            })
        );
        assert_eq!(
            graph.elementwise(ElementwiseFn::Add, &[]),
            Err(GraphError::OperandCount {
                func: ElementwiseFn::Add,
                expected: 2,
                found: 0
            })
        );
        assert_eq!(
            graph.reduce(a, 2, ReduceKind::Max),
            Err(GraphError::AxisOutOfRange { axis: 2, rank: 2 })
        );
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn reduce_and_transpose_types() {
        let mut graph = OpGraph::new();
        let a = mat(&mut graph, "a", &[2, 5]);
        let sum = graph.reduce(a, 1, ReduceKind::Sum).unwrap();
        let t = graph.transpose(a);

        assert_eq!(graph[sum].ty, TensorType::fixed(Elem::F32, &[2]));
        assert_eq!(graph[t].ty, TensorType::fixed(Elem::F32, &[5, 2]));
    }
}
