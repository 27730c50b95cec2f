use hashbrown::HashMap;
use tilefuse_ir::{Axis, Dim, DimQuery, IndexExpr, NodeIndex, OpGraph, TensorType};

use crate::error::TransformError;

/// Extent of one logical matmul dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extent {
    Static(u64),
    Dynamic(DimQuery),
}

impl Extent {
    pub fn as_static(&self) -> Option<u64> {
        match self {
            Extent::Static(val) => Some(*val),
            Extent::Dynamic(_) => None,
        }
    }

    /// The extent as an index expression of the emitted program.
    pub fn expr(&self) -> IndexExpr {
        match self {
            Extent::Static(val) => IndexExpr::Const(*val),
            Extent::Dynamic(query) => IndexExpr::Extent(*query),
        }
    }
}

impl From<Dim> for Extent {
    fn from(dim: Dim) -> Self {
        match dim {
            Dim::Static(val) => Extent::Static(val),
            Dim::Dynamic(query) => Extent::Dynamic(query),
        }
    }
}

/// M, N and K of one matmul, together with every dimension query known to stand for one of them.
#[derive(Debug, Clone)]
pub struct ShapeSummary {
    pub matmul: NodeIndex,
    pub lhs: NodeIndex,
    pub rhs: NodeIndex,
    pub acc: NodeIndex,
    pub m: Extent,
    pub n: Extent,
    pub k: Extent,
    known: HashMap<DimQuery, Axis>,
}

impl ShapeSummary {
    /// Analyzes the operands of `matmul`.
    pub fn analyze(graph: &OpGraph, matmul: NodeIndex) -> Result<Self, TransformError> {
        if !graph[matmul].op.is_matmul() {
            return Err(TransformError::NotAMatmul {
                node: matmul.index(),
            });
        }
        let operands = graph.operands(matmul);
        let [lhs, rhs, acc] = operands[..] else {
            return Err(TransformError::NotAMatmul {
                node: matmul.index(),
            });
        };

        for operand in [lhs, rhs, acc] {
            let rank = graph[operand].ty.rank();
            if rank != 2 {
                return Err(TransformError::InvalidOperand {
                    matmul: matmul.index(),
                    operand: operand.index(),
                    rank,
                });
            }
        }
        let lhs_ty = &graph[lhs].ty;
        let rhs_ty = &graph[rhs].ty;
        let acc_ty = &graph[acc].ty;

        let unify = |axis: Axis, a: Dim, b: Dim| -> Result<Extent, TransformError> {
            match (a, b) {
                (Dim::Static(expected), Dim::Static(found)) if expected != found => {
                    Err(TransformError::ShapeMismatch {
                        matmul: matmul.index(),
                        axis,
                        expected,
                        found,
                    })
                }
                (Dim::Static(val), _) | (_, Dim::Static(val)) => Ok(Extent::Static(val)),
                (Dim::Dynamic(query), Dim::Dynamic(_)) => Ok(Extent::Dynamic(query)),
            }
        };
        let k = unify(Axis::K, lhs_ty.dims[1], rhs_ty.dims[0])?;
        let m = unify(Axis::M, lhs_ty.dims[0], acc_ty.dims[0])?;
        let n = unify(Axis::N, rhs_ty.dims[1], acc_ty.dims[1])?;

        let mut summary = Self {
            matmul,
            lhs,
            rhs,
            acc,
            m,
            n,
            k,
            known: HashMap::new(),
        };

        let roles = [
            (lhs, [Axis::M, Axis::K]),
            (rhs, [Axis::K, Axis::N]),
            (acc, [Axis::M, Axis::N]),
            (matmul, [Axis::M, Axis::N]),
        ];
        for (node, axes) in roles {
            for (position, axis) in axes.into_iter().enumerate() {
                summary.learn(DimQuery::new(node, position), axis);
                if let Dim::Dynamic(query) = graph[node].ty.dims[position] {
                    summary.learn(query, axis);
                }
            }
        }

        log::debug!(
            "Shapes of matmul %{}: m={:?}, n={:?}, k={:?}",
            matmul.index(),
            summary.m,
            summary.n,
            summary.k
        );

        Ok(summary)
    }

    pub fn extent(&self, axis: Axis) -> Extent {
        match axis {
            Axis::M => self.m,
            Axis::N => self.n,
            Axis::K => self.k,
        }
    }

    fn learn(&mut self, query: DimQuery, axis: Axis) {
        self.known.entry(query).or_insert(axis);
    }

    /// The logical dimension `query` is known to measure, if any.
    pub fn resolve(&self, query: &DimQuery) -> Option<Axis> {
        self.known.get(query).copied()
    }

    /// Whether `dim` provably has the extent of `axis`.
    pub fn matches(&self, dim: &Dim, axis: Axis) -> bool {
        match (dim, self.extent(axis)) {
            (Dim::Static(val), Extent::Static(extent)) => *val == extent,
            (Dim::Dynamic(query), _) => self.resolve(query) == Some(axis),
            (Dim::Static(_), Extent::Dynamic(_)) => false,
        }
    }

    /// Whether `ty` provably spans the matmul output iteration space `M x N`.
    pub fn matches_output(&self, ty: &TensorType) -> bool {
        ty.rank() == 2 && self.matches(&ty.dims[0], Axis::M) && self.matches(&ty.dims[1], Axis::N)
    }

    /// Records that `node` has the output iteration space, so queries on it resolve to M and N.
    pub fn register_output(&mut self, node: NodeIndex) {
        self.learn(DimQuery::new(node, 0), Axis::M);
        self.learn(DimQuery::new(node, 1), Axis::N);
    }
}
