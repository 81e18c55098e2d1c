// src/analyze/mod.rs
//! Model-facing components: the provider boundary, the classifier adapter, the
//! similarity scorer, the priority model and the text helpers they share.

pub mod ai_adapter;
pub mod classifier;
pub mod local;
pub mod priority;
pub mod similarity;
pub mod text;
pub mod weights;

// Re-export convenient types.
pub use crate::analyze::ai_adapter::{build_provider, ClassificationProvider, DynProvider};
pub use crate::analyze::classifier::{Classification, Classifier};
pub use crate::analyze::priority::{compute_assessment, Factor, PriorityModel, PrioritySignals};
pub use crate::analyze::similarity::{DuplicateCheck, SimilarityScorer, TargetItem};
pub use crate::analyze::weights::{HotReloadWeights, PriorityWeights};
