//! Configuration surface for the correction and simplification engines.
//!
//! Nested serde structs loadable from TOML through the `config` crate.
//! Condition strings for the tip clipper and erroneous connection removers
//! use a small predicate DSL (see [`crate::simplify::conditions`]) and are
//! validated at startup so malformed conditions fail before any work starts.

use std::path::{Path, PathBuf};

use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Typed error kinds surfaced by the pipeline. Everything except
/// degenerate-input skips aborts the current stage.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Input error: {message}")]
    Input { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invariant violation: {message}")]
    Invariant { message: String },
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Top-level configuration for one run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub general: GeneralConfig,
    pub input: InputConfig,
    pub count: CountConfig,
    pub bayes: BayesConfig,
    pub expand: ExpandConfig,
    pub correct: CorrectConfig,
    pub simp: SimplificationConfig,
}

impl PipelineConfig {
    /// Loads from a TOML file and validates the condition DSL strings.
    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let cfg: PipelineConfig = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml))
            .build()
            .map_err(|e| PipelineError::config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| PipelineError::config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parses every condition string so DSL errors surface at startup.
    pub fn validate(&self) -> Result<(), PipelineError> {
        use crate::simplify::conditions::Condition;
        for (name, s) in [
            ("simp.tc.condition", &self.simp.tc.condition),
            ("simp.ec.condition", &self.simp.ec.condition),
            ("simp.presimp.tip_condition", &self.simp.presimp.tip_condition),
            ("simp.presimp.ec_condition", &self.simp.presimp.ec_condition),
        ] {
            Condition::parse(s).map_err(|e| {
                PipelineError::config(format!("{name}: {e}"))
            })?;
        }
        if self.general.tau == 0 || self.general.tau > 3 {
            return Err(PipelineError::config(format!(
                "general.tau must be in 1..=3, got {}",
                self.general.tau
            )));
        }
        if self.count.numfiles == 0 {
            return Err(PipelineError::config("count.numfiles must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Hamming radius for k-mer clustering.
    pub tau: u32,
    /// Upper bound on worker threads for every parallel stage.
    pub max_threads: usize,
    /// Gzip intermediate and output files.
    pub gzip: bool,
    /// log2 of the file buffer size for intermediate streams.
    pub file_buffer_exp: u8,
    pub remove_temp_files: bool,
    /// Working directory for iteration-numbered temporaries.
    pub work_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            tau: 1,
            max_threads: num_cpus::get(),
            gzip: false,
            file_buffer_exp: 16,
            remove_temp_files: true,
            work_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// FASTQ quality value offset (33 or 64).
    pub qvoffset: u8,
    /// Phred threshold for trimming low-quality read tails.
    pub trim_quality: u8,
    /// When set, per-base qualities are ignored and this Phred score is
    /// assumed everywhere.
    pub common_quality: Option<u8>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            qvoffset: 33,
            trim_quality: 3,
            common_quality: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CountConfig {
    /// Number of on-disk buckets the k-mer instances are hashed into.
    pub numfiles: usize,
    /// Reads per split batch (staging buffers are sized from this).
    pub split_buffer: usize,
    /// Threads for the split and per-bucket merge phases.
    pub merge_nthreads: usize,
}

impl Default for CountConfig {
    fn default() -> Self {
        Self {
            numfiles: 16,
            split_buffer: 100_000,
            merge_nthreads: num_cpus::get(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BayesConfig {
    /// When true, only singleton clusters are distrusted; any cluster center
    /// is a valid rewrite target during correction.
    pub discard_only_singletons: bool,
    /// A k-mer with at least this many occurrences passes the count threshold.
    pub count_threshold: u32,
    /// A k-mer whose aggregated error probability is at most this passes the
    /// quality threshold.
    pub quality_threshold: f64,
}

impl Default for BayesConfig {
    fn default() -> Self {
        Self {
            discard_only_singletons: false,
            count_threshold: 2,
            quality_threshold: 1e-5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpandConfig {
    /// Dump the solid k-mer set after every expansion step.
    pub write_each_iteration: bool,
    /// Safety cap on expansion steps; the fixpoint is normally reached first.
    pub max_steps: usize,
}

impl Default for ExpandConfig {
    fn default() -> Self {
        Self {
            write_each_iteration: false,
            max_steps: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectConfig {
    pub nthreads: usize,
    /// Reads per correction batch per thread.
    pub readbuffer: usize,
    /// Also trust k-mers that pass the static threshold (FLAG_GOOD), not
    /// just the iteratively expanded solid set.
    pub use_threshold: bool,
}

impl Default for CorrectConfig {
    fn default() -> Self {
        Self {
            nthreads: num_cpus::get(),
            readbuffer: 25_000,
            use_threshold: false,
        }
    }
}

/* ------------------------------------------------------------------ */
/*                     graph simplification subtree                   */
/* ------------------------------------------------------------------ */

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimplificationConfig {
    pub presimp: PresimplificationConfig,
    pub tc: TipClipperConfig,
    pub ttc: TopologyTipClipperConfig,
    pub br: BulgeRemoverConfig,
    pub ec: EcRemoverConfig,
    pub rcc: RelativeCoverageConfig,
    pub tec: TopologyEcConfig,
    pub trec: TopologyReliabilityEcConfig,
    pub isec: InterstrandEcConfig,
    pub mfec: MaxFlowEcConfig,
    pub cbr: ComplexBulgeConfig,
    pub her: HiddenEcConfig,
    pub ier: IsolatedEdgeConfig,
    /// Enables the topology-based algorithm family in post-simplification.
    pub topology_simplif_enabled: bool,
    /// Number of fixed simplification cycles between pre- and post-phases.
    pub iteration_count: usize,
    /// Final assembly iteration: unlocks the expensive post-phase removers.
    pub main_iteration: bool,
    /// Tip projection during read-corrected graph construction.
    pub graph_read_corr_enable: bool,
}

impl Default for SimplificationConfig {
    fn default() -> Self {
        Self {
            presimp: PresimplificationConfig::default(),
            tc: TipClipperConfig::default(),
            ttc: TopologyTipClipperConfig::default(),
            br: BulgeRemoverConfig::default(),
            ec: EcRemoverConfig::default(),
            rcc: RelativeCoverageConfig::default(),
            tec: TopologyEcConfig::default(),
            trec: TopologyReliabilityEcConfig::default(),
            isec: InterstrandEcConfig::default(),
            mfec: MaxFlowEcConfig::default(),
            cbr: ComplexBulgeConfig::default(),
            her: HiddenEcConfig::default(),
            ier: IsolatedEdgeConfig::default(),
            topology_simplif_enabled: false,
            iteration_count: 10,
            main_iteration: true,
            graph_read_corr_enable: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresimplificationConfig {
    pub enabled: bool,
    pub parallel: bool,
    pub chunk_cnt: usize,
    /// Mean-coverage floor below which presimplification stops early.
    pub activation_cov: f64,
    pub tip_condition: String,
    pub ec_condition: String,
    pub ier: IsolatedEdgeConfig,
}

impl Default for PresimplificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            parallel: true,
            chunk_cnt: 16,
            activation_cov: 10.0,
            tip_condition: "tip && length < 100 && coverage < 3".to_string(),
            ec_condition: "length < 60 && coverage < 2".to_string(),
            ier: IsolatedEdgeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TipClipperConfig {
    pub condition: String,
}

impl Default for TipClipperConfig {
    fn default() -> Self {
        Self {
            condition: "tip && length < 100 && rctc 2.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyTipClipperConfig {
    pub length_coeff: f64,
    pub uniqueness_length: usize,
    pub plausibility_length: usize,
}

impl Default for TopologyTipClipperConfig {
    fn default() -> Self {
        Self {
            length_coeff: 3.5,
            uniqueness_length: 2500,
            plausibility_length: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BulgeRemoverConfig {
    pub enabled: bool,
    pub max_bulge_length_coefficient: f64,
    pub max_additive_length_coefficient: usize,
    pub max_coverage: f64,
    pub max_relative_coverage: f64,
    pub max_delta: usize,
    pub max_relative_delta: f64,
}

impl Default for BulgeRemoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_bulge_length_coefficient: 3.0,
            max_additive_length_coefficient: 100,
            max_coverage: 1000.0,
            max_relative_coverage: 1.1,
            max_delta: 3,
            max_relative_delta: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EcRemoverConfig {
    pub condition: String,
}

impl Default for EcRemoverConfig {
    fn default() -> Self {
        Self {
            condition: "length < 60 && coverage < 10".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelativeCoverageConfig {
    pub enabled: bool,
    /// Required coverage ratio between boundary and component edges.
    pub coverage_gap: f64,
    pub length_coeff: f64,
    pub tip_allowing_length_coeff: f64,
    pub max_ec_length_coefficient: usize,
    pub max_coverage_coeff: f64,
    pub vertex_count_limit: usize,
}

impl Default for RelativeCoverageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            coverage_gap: 5.0,
            length_coeff: 2.0,
            tip_allowing_length_coeff: 3.5,
            max_ec_length_coefficient: 30,
            max_coverage_coeff: 2.0,
            vertex_count_limit: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyEcConfig {
    pub max_ec_length_coefficient: usize,
    pub uniqueness_length: usize,
    pub plausibility_length: usize,
}

impl Default for TopologyEcConfig {
    fn default() -> Self {
        Self {
            max_ec_length_coefficient: 5,
            uniqueness_length: 1500,
            plausibility_length: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyReliabilityEcConfig {
    pub max_ec_length_coefficient: usize,
    pub uniqueness_length: usize,
    pub unreliable_coverage: f64,
}

impl Default for TopologyReliabilityEcConfig {
    fn default() -> Self {
        Self {
            max_ec_length_coefficient: 100,
            uniqueness_length: 1500,
            unreliable_coverage: 2.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterstrandEcConfig {
    pub max_ec_length_coefficient: usize,
    pub uniqueness_length: usize,
    pub span_distance: usize,
}

impl Default for InterstrandEcConfig {
    fn default() -> Self {
        Self {
            max_ec_length_coefficient: 100,
            uniqueness_length: 1500,
            span_distance: 15_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaxFlowEcConfig {
    pub enabled: bool,
    pub max_ec_length_coefficient: usize,
    pub uniqueness_length: usize,
    pub plausibility_length: usize,
}

impl Default for MaxFlowEcConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_ec_length_coefficient: 30,
            uniqueness_length: 1500,
            plausibility_length: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexBulgeConfig {
    pub enabled: bool,
    /// Subgraph length bound as a multiple of k.
    pub max_relative_length: f64,
    /// Largest allowed path length difference inside the subgraph.
    pub max_length_difference: usize,
}

impl Default for ComplexBulgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_relative_length: 5.0,
            max_length_difference: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HiddenEcConfig {
    pub enabled: bool,
    pub uniqueness_length: usize,
    pub unreliability_threshold: f64,
    pub relative_threshold: f64,
}

impl Default for HiddenEcConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            uniqueness_length: 1500,
            unreliability_threshold: 4.0,
            relative_threshold: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolatedEdgeConfig {
    pub max_length: usize,
    pub max_coverage: f64,
    /// Isolated edges up to this length are removed regardless of coverage.
    pub max_length_any_cov: usize,
}

impl Default for IsolatedEdgeConfig {
    fn default() -> Self {
        Self {
            max_length: 200,
            max_coverage: 2.0,
            max_length_any_cov: 150,
        }
    }
}
