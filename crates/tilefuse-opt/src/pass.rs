use std::fmt::Display;

use tilefuse_ir::{LoweredMatmul, NodeIndex, Op, OpGraph, TiledNest};

use crate::{
    analyses::ShapeSummary,
    config::{Logger, TileFuseConfig, TileFuseOptions, TransformLogLevel},
    error::{FusionRejection, TransformError},
    fusion::plan_fusion,
    layout::{plan_blocked, select_lowering, LoweringKind},
    rewrite::{install_blocked, install_direct},
    tiling::{NestBuilder, ResolvedTiling},
    AtomicCounter,
};

/// A transformation over the whole operator graph.
pub trait GraphPass {
    /// Runs the pass, incrementing `changes` once per rewrite.
    fn apply(&mut self, graph: &mut OpGraph, changes: AtomicCounter);
}

/// Outcome of rewriting one matmul.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteReport {
    /// The rewritten matmul. On the direct path it may have been removed from the graph.
    pub matmul: NodeIndex,
    /// The `TiledMatmul` node that replaces it.
    pub node: NodeIndex,
    pub lowering: LoweringKind,
    /// Number of parallel M x N regions. Zero for the blocked lowering.
    pub regions: usize,
    pub fused: Vec<NodeIndex>,
    /// Nodes turned into results of `node`, in result order.
    pub results: Vec<NodeIndex>,
    pub rejections: Vec<FusionRejection>,
}

impl Display for RewriteReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Rewrote matmul %{} into %{} ({} lowering, {} region(s), {} fused",
            self.matmul.index(),
            self.node.index(),
            self.lowering,
            self.regions,
            self.fused.len()
        )?;
        if !self.rejections.is_empty() {
            write!(f, ", {} rejected", self.rejections.len())?;
        }
        f.write_str(")")
    }
}

/// Tiles, peels and fuses the matmul `root`.
///
/// Nothing is modified when an error is returned.
pub fn tile_and_fuse(
    graph: &mut OpGraph,
    root: NodeIndex,
    options: &TileFuseOptions,
) -> Result<RewriteReport, TransformError> {
    if !graph.contains_node(root) {
        return Err(TransformError::NotAMatmul { node: root.index() });
    }
    let mut shapes = ShapeSummary::analyze(graph, root)?;

    let report = match select_lowering(options.lower_to_mmt4d, &shapes) {
        LoweringKind::Blocked => {
            let nest = plan_blocked(&shapes, options.mmt4d_block);
            let node = install_blocked(graph, &shapes, nest);

            RewriteReport {
                matmul: root,
                node,
                lowering: LoweringKind::Blocked,
                regions: 0,
                fused: Vec::new(),
                results: vec![root],
                rejections: Vec::new(),
            }
        }
        LoweringKind::Direct => {
            let plan = plan_fusion(graph, &mut shapes, options.fuse);
            let tiling = ResolvedTiling::resolve(&options.tiles, &shapes);
            let body = NestBuilder::new(&shapes, &tiling)
                .with_epilogue(plan.epilogue())
                .with_writes(plan.live_outs.clone())
                .build();
            let nest = TiledNest::new(root, body, plan.fused_nodes(), plan.live_outs.clone());
            let regions = nest.parallel_blocks().len();
            let node = install_direct(graph, &shapes, &plan, nest);

            RewriteReport {
                matmul: root,
                node,
                lowering: LoweringKind::Direct,
                regions,
                fused: plan.fused_nodes(),
                results: plan.live_outs,
                rejections: plan.rejections,
            }
        }
    };

    log::info!("{report}");

    Ok(report)
}

/// Rewrites every matmul of the graph, in topological order.
#[derive(Debug)]
pub struct TileAndFusePass {
    options: TileFuseOptions,
    logger: Logger,
    reports: Vec<RewriteReport>,
    errors: Vec<TransformError>,
}

impl TileAndFusePass {
    pub fn new(options: TileFuseOptions, logger: Logger) -> Self {
        Self {
            options,
            logger,
            reports: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Validates `config` and creates the pass with its logger.
    pub fn from_config(config: &TileFuseConfig) -> Result<Self, TransformError> {
        let options = config.options()?;
        Ok(Self::new(options, Logger::new(&config.logger)))
    }

    /// Reports of every successful rewrite so far.
    pub fn reports(&self) -> &[RewriteReport] {
        &self.reports
    }

    /// Matmuls that were left untouched because of an error.
    pub fn errors(&self) -> &[TransformError] {
        &self.errors
    }

    fn log_rewrite(&mut self, graph: &OpGraph, report: &RewriteReport) {
        self.logger.log(TransformLogLevel::Basic, report);
        for rejection in report.rejections.iter() {
            self.logger.log(TransformLogLevel::Basic, rejection);
        }

        if self.logger.enabled(TransformLogLevel::Full) {
            if let Op::TiledMatmul(lowered) = &graph[report.node].op {
                let printed = match lowered.as_ref() {
                    LoweredMatmul::Direct(nest) => nest.to_string(),
                    LoweredMatmul::Blocked(nest) => nest.to_string(),
                };
                self.logger.log(TransformLogLevel::Full, &printed);
            }
        }
    }
}

impl GraphPass for TileAndFusePass {
    fn apply(&mut self, graph: &mut OpGraph, changes: AtomicCounter) {
        for matmul in graph.matmuls() {
            match tile_and_fuse(graph, matmul, &self.options) {
                Ok(report) => {
                    self.log_rewrite(graph, &report);
                    self.reports.push(report);
                    changes.inc();
                }
                Err(err) => {
                    log::warn!("{err}");
                    self.logger.log(TransformLogLevel::Basic, &err);
                    self.errors.push(err);
                }
            }
        }

        if self.logger.enabled(TransformLogLevel::Full) {
            self.logger.log(TransformLogLevel::Full, &*graph);
        }
        self.logger.flush();
    }
}
