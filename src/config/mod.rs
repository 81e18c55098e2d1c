//! Runtime configuration (TOML file + env overrides).

pub mod triage;

pub use triage::{
    AiSection, DuplicateConfig, ReclassifyConfig, TriageConfig, MAX_BATCH_SIZE,
};
