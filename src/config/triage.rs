// src/config/triage.rs
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_TRIAGE_CONFIG_PATH: &str = "config/triage.toml";
pub const ENV_TRIAGE_CONFIG_PATH: &str = "TRIAGE_CONFIG_PATH";

/// Hard ceiling for one batch reclassification run.
pub const MAX_BATCH_SIZE: usize = 100;

fn default_true() -> bool {
    true
}
fn default_provider() -> String {
    "local".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_daily_limit() -> u32 {
    500
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_dup_threshold() -> f32 {
    0.7
}
fn default_max_results() -> usize {
    4
}
fn default_candidate_limit() -> usize {
    15
}
fn default_related_floor() -> f32 {
    0.5
}
fn default_confidence_threshold() -> f32 {
    0.6
}
fn default_batch_size() -> usize {
    40
}
fn default_weights_path() -> PathBuf {
    PathBuf::from("config/weights.json")
}
fn default_queue_capacity() -> usize {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// "openai" | "local" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// "ENV" means: read from OPENAI_API_KEY
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    /// Per-call timebox for every external request.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for AiSection {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: default_provider(),
            model: default_model(),
            api_key: String::new(),
            daily_limit: default_daily_limit(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Tunables for the similarity scorer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DuplicateConfig {
    #[serde(default = "default_dup_threshold")]
    pub threshold: f32,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// How many recent items are offered to the scorer as candidates.
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
    #[serde(default)]
    pub include_related: bool,
    /// Lower bound for the "related" list when `include_related` is on.
    #[serde(default = "default_related_floor")]
    pub related_floor: f32,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            threshold: default_dup_threshold(),
            max_results: default_max_results(),
            candidate_limit: default_candidate_limit(),
            include_related: false,
            related_floor: default_related_floor(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReclassifyConfig {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Shared secret for the scheduled trigger. "ENV" means: read RECLASSIFY_SECRET.
    #[serde(default)]
    pub secret: String,
}

impl Default for ReclassifyConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            batch_size: default_batch_size(),
            secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrioritySection {
    #[serde(default = "default_weights_path")]
    pub weights_path: PathBuf,
}

impl Default for PrioritySection {
    fn default() -> Self {
        Self {
            weights_path: default_weights_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSection {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriageConfig {
    #[serde(default)]
    pub ai: AiSection,
    #[serde(default)]
    pub duplicates: DuplicateConfig,
    #[serde(default)]
    pub reclassify: ReclassifyConfig,
    #[serde(default)]
    pub priority: PrioritySection,
    #[serde(default)]
    pub queue: QueueSection,
    /// Optional JSON file with workspace records to seed the in-memory store.
    #[serde(default)]
    pub workspaces_path: Option<PathBuf>,
}

impl TriageConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading triage config from {}", path.display()))?;
        let cfg: TriageConfig =
            toml::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
        cfg.resolve()
    }

    /// Load using env var + fallback:
    /// 1) $TRIAGE_CONFIG_PATH (must exist)
    /// 2) config/triage.toml
    /// 3) defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_TRIAGE_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                anyhow::bail!("{ENV_TRIAGE_CONFIG_PATH} points to non-existent path");
            }
            return Self::load_from_file(pb);
        }
        let default_p = PathBuf::from(DEFAULT_TRIAGE_CONFIG_PATH);
        if default_p.exists() {
            return Self::load_from_file(default_p);
        }
        TriageConfig::default().resolve()
    }

    /// Resolve "ENV" indirections and clamp numeric fields into valid ranges.
    pub fn resolve(mut self) -> Result<Self> {
        self.ai.provider = self.ai.provider.to_lowercase();

        if self.ai.api_key.trim().eq_ignore_ascii_case("env") {
            self.ai.api_key = match self.ai.provider.as_str() {
                "openai" => env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow::anyhow!("Missing OPENAI_API_KEY env var"))?,
                "local" => String::new(),
                other => anyhow::bail!("Unsupported provider in config: {other}"),
            };
        }

        if self.reclassify.secret.trim().eq_ignore_ascii_case("env") || self.reclassify.secret.is_empty() {
            self.reclassify.secret = env::var("RECLASSIFY_SECRET").unwrap_or_default();
        }

        self.sanitize();
        Ok(self)
    }

    fn sanitize(&mut self) {
        let d = &mut self.duplicates;
        if !(0.0..=1.0).contains(&d.threshold) {
            d.threshold = default_dup_threshold();
        }
        if !(0.0..=1.0).contains(&d.related_floor) || d.related_floor > d.threshold {
            d.related_floor = d.threshold.min(default_related_floor());
        }
        d.max_results = d.max_results.max(1);
        d.candidate_limit = d.candidate_limit.max(1);

        let r = &mut self.reclassify;
        if !(0.0..=1.0).contains(&r.confidence_threshold) {
            r.confidence_threshold = default_confidence_threshold();
        }
        r.batch_size = r.batch_size.clamp(1, MAX_BATCH_SIZE);

        self.ai.timeout_ms = self.ai.timeout_ms.max(1);
        self.queue.capacity = self.queue.capacity.max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = TriageConfig::default();
        assert!((cfg.duplicates.threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(cfg.duplicates.max_results, 4);
        assert_eq!(cfg.duplicates.candidate_limit, 15);
        assert!((cfg.reclassify.confidence_threshold - 0.6).abs() < f32::EPSILON);
        assert_eq!(cfg.reclassify.batch_size, 40);
    }

    #[serial_test::serial]
    #[test]
    fn loads_toml_and_clamps_out_of_range_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("triage.toml");
        let mut f = fs::File::create(&path).unwrap();
        write!(
            f,
            r#"
[ai]
provider = "LOCAL"
timeout_ms = 2500

[duplicates]
threshold = 1.7
max_results = 0

[reclassify]
confidence_threshold = 0.5
batch_size = 1000
secret = "s3cret"
"#
        )
        .unwrap();

        let cfg = TriageConfig::load_from_file(&path).unwrap();
        assert_eq!(cfg.ai.provider, "local");
        assert_eq!(cfg.ai.timeout_ms, 2500);
        assert!((cfg.duplicates.threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(cfg.duplicates.max_results, 1);
        assert_eq!(cfg.reclassify.batch_size, MAX_BATCH_SIZE);
        assert!((cfg.reclassify.confidence_threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(cfg.reclassify.secret, "s3cret");
    }

    #[serial_test::serial]
    #[test]
    fn secret_falls_back_to_env() {
        env::set_var("RECLASSIFY_SECRET", "from-env");
        let cfg = TriageConfig::default().resolve().unwrap();
        assert_eq!(cfg.reclassify.secret, "from-env");
        env::remove_var("RECLASSIFY_SECRET");
    }
}
