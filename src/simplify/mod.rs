//! Graph simplification scheduler.
//!
//! Runs pre-simplification (self-conjugate and isolated edge removal, then
//! tip clipping and EC removal, chunk-parallel when every registered
//! handler is thread-safe), a fixed number of simplification cycles
//! (tips, bulges, low-coverage ECs), and a post-simplification loop driven
//! to a fixpoint by the OR of every algorithm's `changed` flag, finishing
//! with a single hidden-EC pass. The scheduler owns the fixpoint flag;
//! algorithms are pure `(graph, config) -> changed` passes.

pub mod bulges;
pub mod conditions;
pub mod ec;
pub mod relative;
pub mod tips;

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::graph::{AssemblyGraph, CountingHandler, CoverageIndex};
use crate::utils::configuration::{PresimplificationConfig, SimplificationConfig};

pub use bulges::{remove_bulges, remove_complex_bulges, ProjectionCallback};
pub use conditions::{Condition, LengthThresholdFinder};
pub use ec::{
    max_flow_remove_erroneous_edges, multiplicity_counting_remove_erroneous_edges,
    parallel_remove_low_coverage_edges, remove_hidden_ec, remove_isolated_edges,
    remove_low_coverage_edges, remove_self_conjugate_edges, remove_thorns,
    topology_reliability_remove_erroneous_edges, topology_remove_erroneous_edges,
};
pub use relative::remove_relative_coverage_components;
pub use tips::{clip_tips, parallel_clip_tips, topology_clip_tips};

/// Detected dataset properties and scheduling knobs shared by the passes.
#[derive(Debug, Clone, Copy)]
pub struct SimplifInfo {
    pub read_length: usize,
    /// 0.0 when the coverage model did not converge.
    pub detected_mean_coverage: f64,
    pub detected_coverage_bound: f64,
    pub chunk_cnt: usize,
    pub iteration_count: usize,
    pub iteration: usize,
}

pub struct Simplifier<'a> {
    cfg: &'a SimplificationConfig,
    info: SimplifInfo,
}

impl<'a> Simplifier<'a> {
    pub fn new(cfg: &'a SimplificationConfig, info: SimplifInfo) -> Self {
        Self { cfg, info }
    }

    /// Full schedule: pre-simplification, `iteration_count` cycles, then the
    /// post-simplification fixpoint.
    pub fn simplify(&self, g: &mut AssemblyGraph, cov: &CoverageIndex) -> Result<()> {
        debug!("graph simplification started");
        let counter = Arc::new(CountingHandler::new());
        g.add_handler(counter.clone());

        self.pre_simplification(g, cov, &counter)?;

        let mut info = self.info;
        for i in 0..self.info.iteration_count {
            info.iteration = i;
            self.simplification_cycle(g, cov, &info, &counter)?;
        }

        self.post_simplification(g, cov, &counter)?;
        Ok(())
    }

    /// Pre-simplification: cheap artifact removal before the main cycles.
    pub fn pre_simplification(
        &self,
        g: &mut AssemblyGraph,
        cov: &CoverageIndex,
        counter: &CountingHandler,
    ) -> Result<()> {
        let presimp = &self.cfg.presimp;
        if !presimp.enabled {
            info!("presimplification is disabled");
            return Ok(());
        }
        info!("PROCEDURE == Presimplification");

        remove_self_conjugate_edges(g, cov, g.k() + 100, 1.0)?;
        counter.report("self-conjugate edge removal");
        remove_isolated_edges(g, cov, &presimp.ier, self.info.read_length)?;
        counter.report("isolated edge removal");

        if self.info.detected_mean_coverage == 0.0 {
            info!("mean coverage was not reliably estimated, no further presimplification");
            return Ok(());
        }
        if self.info.detected_mean_coverage < presimp.activation_cov {
            info!(
                "estimated mean coverage {} is less than activation coverage {}, no further presimplification",
                self.info.detected_mean_coverage, presimp.activation_cov
            );
            return Ok(());
        }

        if self.enable_parallel(g, presimp) {
            info!("parallel presimplification, chunk count = {}", presimp.chunk_cnt);
            let mut info = self.info;
            info.chunk_cnt = presimp.chunk_cnt;
            parallel_clip_tips(g, cov, &presimp.tip_condition, &info)?;
            counter.report("parallel tip clipping");
            parallel_remove_low_coverage_edges(g, cov, &presimp.ec_condition, &info)?;
            counter.report("parallel EC removal");
        } else {
            info!("non-parallel presimplification");
            let tc = crate::utils::configuration::TipClipperConfig {
                condition: presimp.tip_condition.clone(),
            };
            clip_tips(g, cov, &tc, &self.info)?;
            counter.report("tip clipping");
            let ec = crate::utils::configuration::EcRemoverConfig {
                condition: presimp.ec_condition.clone(),
            };
            remove_low_coverage_edges(g, cov, &ec, &self.info)?;
            counter.report("EC removal");
        }
        Ok(())
    }

    /// The parallel path needs a chunk count and handlers that declare
    /// themselves thread-safe; otherwise fall back to sequential (logged).
    fn enable_parallel(&self, g: &AssemblyGraph, presimp: &PresimplificationConfig) -> bool {
        if !presimp.parallel || presimp.chunk_cnt == 0 {
            return false;
        }
        if presimp.chunk_cnt == 1 {
            return true;
        }
        if g.all_handlers_thread_safe() {
            true
        } else {
            info!("not all handlers are thread-safe, switching to non-parallel presimplification");
            false
        }
    }

    /// One simplification cycle: tips, bulges, low-coverage ECs.
    pub fn simplification_cycle(
        &self,
        g: &mut AssemblyGraph,
        cov: &CoverageIndex,
        info: &SimplifInfo,
        counter: &CountingHandler,
    ) -> Result<()> {
        info!(
            "PROCEDURE == Simplification cycle, iteration {}",
            info.iteration + 1
        );
        clip_tips(g, cov, &self.cfg.tc, info)?;
        counter.report("tip clipping");
        remove_bulges(g, cov, &self.cfg.br, None, None)?;
        counter.report("bulge removal");
        remove_low_coverage_edges(g, cov, &self.cfg.ec, info)?;
        counter.report("EC removal");
        Ok(())
    }

    /// Final removal family, gated by the topology switch and the main
    /// iteration flag.
    fn final_remove_erroneous_edges(
        &self,
        g: &mut AssemblyGraph,
        cov: &CoverageIndex,
    ) -> Result<bool> {
        let mut changed =
            remove_relative_coverage_components(g, cov, &self.cfg.rcc, &self.info)?;
        if self.cfg.topology_simplif_enabled && self.cfg.main_iteration {
            changed |= topology_remove_erroneous_edges(g, cov, &self.cfg.tec)?;
            changed |= topology_reliability_remove_erroneous_edges(g, cov, &self.cfg.trec)?;
            changed |= remove_thorns(g, cov, &self.cfg.isec)?;
            changed |= multiplicity_counting_remove_erroneous_edges(g, cov, &self.cfg.tec)?;
            changed |= max_flow_remove_erroneous_edges(g, cov, &self.cfg.mfec)?;
        }
        Ok(changed)
    }

    /// Post-simplification: iterate the whole family until nothing changes.
    pub fn post_simplification(
        &self,
        g: &mut AssemblyGraph,
        cov: &CoverageIndex,
        counter: &CountingHandler,
    ) -> Result<()> {
        info!("PROCEDURE == Post simplification");
        let mut iteration = 0usize;
        loop {
            let mut changed = false;
            info!("post-simplification iteration {iteration}");

            if self.cfg.topology_simplif_enabled {
                changed |= topology_clip_tips(g, cov, &self.cfg.ttc, &self.info)?;
                counter.report("topology tip clipping");
            }
            changed |= self.final_remove_erroneous_edges(g, cov)?;
            counter.report("final EC removal");
            changed |= clip_tips(g, cov, &self.cfg.tc, &self.info)?;
            counter.report("tip clipping");
            changed |= remove_bulges(g, cov, &self.cfg.br, None, None)?;
            counter.report("bulge removal");
            changed |= remove_complex_bulges(g, cov, &self.cfg.cbr)?;
            counter.report("complex bulge removal");

            iteration += 1;
            if !changed {
                break;
            }
        }

        if self.cfg.topology_simplif_enabled {
            remove_hidden_ec(g, cov, &self.cfg.her, self.info.detected_coverage_bound)?;
            counter.report("hidden EC removal");
        }
        Ok(())
    }
}
