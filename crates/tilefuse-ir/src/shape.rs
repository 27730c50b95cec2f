use derive_new::new;
use petgraph::graph::NodeIndex;

/// Handle to the runtime extent of one axis of a tensor, `dim %source, axis`.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DimQuery {
    pub source: NodeIndex,
    pub axis: usize,
}

/// A single dimension of a tensor type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    /// The extent is known when the graph is built.
    Static(u64),
    /// The extent is only known at runtime and is read through the query.
    Dynamic(DimQuery),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Elem {
    F16,
    F32,
    F64,
    I32,
}

/// Element type and ordered dimensions of a ranked tensor.
#[derive(new, Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorType {
    pub elem: Elem,
    pub dims: Vec<Dim>,
}

impl TensorType {
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Builds a fully static tensor type.
    pub fn fixed(elem: Elem, shape: &[u64]) -> Self {
        Self::new(elem, shape.iter().map(|val| Dim::Static(*val)).collect())
    }
}
