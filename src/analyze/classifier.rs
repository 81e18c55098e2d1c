// src/analyze/classifier.rs
//! Text classifier adapter: one external call, label mapped into the closed category set.

use serde::{Deserialize, Serialize};

use crate::analyze::ai_adapter::DynProvider;
use crate::error::{Result, TriageError};
use crate::model::Category;

/// Validated classifier output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    pub confidence: f32,
    pub reasoning: String,
    /// Label exactly as the service returned it (kept for the audit trail).
    pub raw_label: String,
}

#[derive(Clone)]
pub struct Classifier {
    provider: DynProvider,
}

impl Classifier {
    pub fn new(provider: DynProvider) -> Self {
        Self { provider }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub async fn classify(&self, title: &str, description: &str) -> Result<Classification> {
        let title = title.trim();
        if title.is_empty() {
            return Err(TriageError::InvalidInput("title must not be empty".into()));
        }

        let raw = self
            .provider
            .classify(title, description.trim())
            .await
            .map_err(|e| TriageError::ClassificationUnavailable(e.to_string()))?;

        let category = Category::from_label(&raw.label);
        if category == Category::Other && !raw.label.trim().eq_ignore_ascii_case("other") {
            tracing::debug!(label = %raw.label, "classifier label outside category set, mapped to Other");
        }

        let confidence = if raw.confidence.is_finite() {
            raw.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        Ok(Classification {
            category,
            confidence,
            reasoning: raw.reasoning,
            raw_label: raw.label,
        })
    }
}
