use std::fmt::{Display, Formatter, Result};

use crate::{
    Accumulate, AccumulatorInit, Axis, BlockedNest, Dim, Elem, ElementwiseFn, IndexExpr, LoopNode,
    LoweredMatmul, Op, OpGraph, PackedOperand, ParallelBlock, Region, RegionKind, RemainderGuard,
    TensorType, TileBody, TileOp, TileOperand, TiledNest,
};

const INDENT: &str = "    ";

impl Display for Elem {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Elem::F16 => f.write_str("f16"),
            Elem::F32 => f.write_str("f32"),
            Elem::F64 => f.write_str("f64"),
            Elem::I32 => f.write_str("i32"),
        }
    }
}

impl Display for TensorType {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str("tensor<")?;
        for dim in &self.dims {
            match dim {
                Dim::Static(val) => write!(f, "{val}x")?,
                Dim::Dynamic(_) => f.write_str("?x")?,
            }
        }
        write!(f, "{}>", self.elem)
    }
}

impl Display for Axis {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Axis::M => f.write_str("m"),
            Axis::N => f.write_str("n"),
            Axis::K => f.write_str("k"),
        }
    }
}

impl Display for ElementwiseFn {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let name = match self {
            ElementwiseFn::Add => "add",
            ElementwiseFn::Sub => "sub",
            ElementwiseFn::Mul => "mul",
            ElementwiseFn::Max => "max",
            ElementwiseFn::Min => "min",
            ElementwiseFn::Relu => "relu",
            ElementwiseFn::Exp => "exp",
            ElementwiseFn::Neg => "neg",
            ElementwiseFn::Abs => "abs",
        };
        f.write_str(name)
    }
}

impl Display for IndexExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            IndexExpr::Const(val) => write!(f, "{val}"),
            IndexExpr::Extent(query) => write!(f, "dim(%{}, {})", query.source.index(), query.axis),
            IndexExpr::AlignDown { extent, multiple } => write!(
                f,
                "align_down(dim(%{}, {}), {multiple})",
                extent.source.index(),
                extent.axis
            ),
            IndexExpr::Rem { extent, modulus } => {
                write!(f, "dim(%{}, {}) mod {modulus}", extent.source.index(), extent.axis)
            }
            IndexExpr::CeilDiv { extent, divisor } => write!(
                f,
                "ceil_div(dim(%{}, {}), {divisor})",
                extent.source.index(),
                extent.axis
            ),
            IndexExpr::MinTile { tile, upper } => write!(f, "min({tile}, {upper} - iv)"),
        }
    }
}

impl Display for RemainderGuard {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(
            f,
            "dim(%{}, {}) mod {} != 0",
            self.extent.source.index(),
            self.extent.axis,
            self.tile
        )
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let kind = match self.kind {
            RegionKind::Whole => "whole",
            RegionKind::Main => "main",
            RegionKind::Remainder => "rem",
            RegionKind::Clamped => "clamped",
        };
        write!(
            f,
            "%{} = {kind}[{}, {}) step {}",
            self.axis, self.lower, self.upper, self.step
        )?;
        if self.width != self.step {
            write!(f, " width {}", self.width)?;
        }
        Ok(())
    }
}

impl Display for TileOperand {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            TileOperand::Local(node) => write!(f, "%{}", node.index()),
            TileOperand::Slice { source, rows, cols } => {
                write!(f, "%{}[{rows}, {cols}]", source.index())
            }
            TileOperand::Accumulator => f.write_str("acc"),
        }
    }
}

fn write_indent(f: &mut Formatter<'_>, depth: usize) -> Result {
    for _ in 0..depth {
        f.write_str(INDENT)?;
    }
    Ok(())
}

fn write_operands(f: &mut Formatter<'_>, operands: &[TileOperand]) -> Result {
    for (i, operand) in operands.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{operand}")?;
    }
    Ok(())
}

fn write_body(f: &mut Formatter<'_>, body: &TileBody, depth: usize) -> Result {
    let shape = &body.shape;
    for op in &body.ops {
        write_indent(f, depth)?;
        match &shape.k {
            Some(k) => write!(f, "tile<{}x{}x{}> ", shape.m, shape.n, k)?,
            None => write!(f, "tile<{}x{}> ", shape.m, shape.n)?,
        }
        match op {
            TileOp::Matmul { lhs, rhs, acc } => writeln!(f, "acc = matmul({lhs}, {rhs}, {acc})")?,
            TileOp::Elementwise {
                node,
                func,
                operands,
            } => {
                write!(f, "%{} = {func}(", node.index())?;
                write_operands(f, operands)?;
                f.write_str(")\n")?;
            }
        }
    }
    Ok(())
}

fn write_accumulate(f: &mut Formatter<'_>, phase: &Accumulate, depth: usize) -> Result {
    write_indent(f, depth)?;
    let init = match phase.init {
        AccumulatorInit::OutputSlice => "output",
        AccumulatorInit::PreviousPhase => "previous",
    };
    writeln!(f, "accumulate {} init({init}) {{", phase.k)?;
    write_body(f, &phase.body, depth + 1)?;
    write_indent(f, depth)?;
    f.write_str("}\n")
}

fn write_parallel(f: &mut Formatter<'_>, block: &ParallelBlock, depth: usize) -> Result {
    write_indent(f, depth)?;
    writeln!(f, "parallel ({}) x ({}) {{", block.m, block.n)?;
    write_nodes(f, &block.body, depth + 1)?;
    for node in &block.writes {
        write_indent(f, depth + 1)?;
        writeln!(f, "write %{}", node.index())?;
    }
    write_indent(f, depth)?;
    f.write_str("}\n")
}

fn write_nodes(f: &mut Formatter<'_>, nodes: &[LoopNode], depth: usize) -> Result {
    for node in nodes {
        match node {
            LoopNode::Parallel(block) => write_parallel(f, block, depth)?,
            LoopNode::Accumulate(phase) => write_accumulate(f, phase, depth)?,
            LoopNode::Guarded(guarded) => {
                write_indent(f, depth)?;
                writeln!(f, "if {} {{", guarded.guard)?;
                write_nodes(f, &guarded.body, depth + 1)?;
                write_indent(f, depth)?;
                f.write_str("}\n")?;
            }
            LoopNode::Body(body) => write_body(f, body, depth)?,
        }
    }
    Ok(())
}

fn write_packed(f: &mut Formatter<'_>, packed: &PackedOperand, depth: usize) -> Result {
    write_indent(f, depth)?;
    write!(
        f,
        "pack %{} -> [{}, {}, {}, {}]",
        packed.source.index(),
        packed.outer[0],
        packed.outer[1],
        packed.inner[0],
        packed.inner[1]
    )?;
    if packed.padded {
        f.write_str(" padded")?;
    }
    f.write_str("\n")
}

fn write_tiled(f: &mut Formatter<'_>, nest: &TiledNest, depth: usize) -> Result {
    write_nodes(f, &nest.body, depth)
}

fn write_blocked(f: &mut Formatter<'_>, nest: &BlockedNest, depth: usize) -> Result {
    let plan = &nest.plan;
    write_packed(f, &plan.lhs, depth)?;
    write_packed(f, &plan.rhs, depth)?;
    write_packed(f, &plan.acc, depth)?;
    for (i, block_loop) in nest.loops.iter().enumerate() {
        write_indent(f, depth + i)?;
        writeln!(f, "for %{}1 = 0 to {} {{", block_loop.axis, block_loop.upper)?;
    }
    write_indent(f, depth + 3)?;
    writeln!(
        f,
        "mmt4d<{}x{}x{}>(lhs[m1, k1], rhs[n1, k1], acc[m1, n1])",
        plan.block.m0, plan.block.n0, plan.block.k0
    )?;
    for i in (0..3).rev() {
        write_indent(f, depth + i)?;
        f.write_str("}\n")?;
    }
    write_indent(f, depth)?;
    writeln!(f, "unpack acc -> %{}", plan.acc.source.index())
}

impl Display for TiledNest {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write_tiled(f, self, 0)
    }
}

impl Display for BlockedNest {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write_blocked(f, self, 0)
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Op::Input { name } => write!(f, "input \"{name}\""),
            Op::Zeros => f.write_str("zeros"),
            Op::Matmul => f.write_str("matmul"),
            Op::Elementwise(func) => write!(f, "{func}"),
            Op::Reduce { axis, kind } => write!(f, "reduce<{kind:?}, {axis}>"),
            Op::Transpose => f.write_str("transpose"),
            Op::Opaque { name, .. } => write!(f, "{name}"),
            Op::TiledMatmul(lowered) => match lowered.as_ref() {
                LoweredMatmul::Direct(_) => f.write_str("tiled_matmul"),
                LoweredMatmul::Blocked(_) => f.write_str("mmt4d_matmul"),
            },
            Op::NestResult { index } => write!(f, "result<{index}>"),
        }
    }
}

impl Display for OpGraph {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        for node in self.topological_order() {
            let data = &self[node];
            write!(f, "%{} = {}", node.index(), data.op)?;
            let operands = self.operands(node);
            if !operands.is_empty() {
                let names = operands
                    .iter()
                    .map(|it| format!("%{}", it.index()))
                    .collect::<Vec<_>>();
                write!(f, "({})", names.join(", "))?;
            }
            write!(f, " : {}", data.ty)?;
            match &data.op {
                Op::TiledMatmul(lowered) => {
                    f.write_str(" {\n")?;
                    match lowered.as_ref() {
                        LoweredMatmul::Direct(nest) => write_tiled(f, nest, 1)?,
                        LoweredMatmul::Blocked(nest) => write_blocked(f, nest, 1)?,
                    }
                    f.write_str("}\n")?;
                }
                _ => f.write_str("\n")?,
            }
        }
        let outputs = self
            .outputs()
            .iter()
            .map(|it| format!("%{}", it.index()))
            .collect::<Vec<_>>();
        writeln!(f, "return {}", outputs.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{ElementwiseFn, OpGraph};

    #[test]
    fn graph_display() {
        let mut graph = OpGraph::new();
        let lhs = graph.input("lhs", TensorType::fixed(Elem::F32, &[2, 4]));
        let rhs = graph.input("rhs", TensorType::fixed(Elem::F32, &[4, 6]));
        let acc = graph.zeros(TensorType::fixed(Elem::F32, &[2, 6]));
        let mm = graph.matmul(lhs, rhs, acc);
        let relu = graph.elementwise(ElementwiseFn::Relu, &[mm]).unwrap();
        graph.set_outputs(vec![relu]);

        let expected = "\
%0 = input \"lhs\" : tensor<2x4xf32>
%1 = input \"rhs\" : tensor<4x6xf32>
%2 = zeros : tensor<2x6xf32>
%3 = matmul(%0, %1, %2) : tensor<2x6xf32>
%4 = relu(%3) : tensor<2x6xf32>
return %4
";
        assert_eq!(graph.to_string(), expected);
    }
}
