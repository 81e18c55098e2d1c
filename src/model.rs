//! model.rs: feedback items, workspaces and the ephemeral results produced by triage.
//!
//! Closed sets (categories, levels, plans, tags) are enums so an invalid value cannot be
//! constructed; free-form labels coming back from a model go through `Category::from_label`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed category set. Anything a model returns outside of it maps to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Feature Request")]
    FeatureRequest,
    Bug,
    Improvement,
    #[serde(rename = "UI/UX")]
    UiUx,
    Integration,
    Performance,
    Documentation,
    Other,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::FeatureRequest,
        Category::Bug,
        Category::Improvement,
        Category::UiUx,
        Category::Integration,
        Category::Performance,
        Category::Documentation,
        Category::Other,
    ];

    /// Label used for items the classifier could not place.
    pub const FALLBACK: Category = Category::Other;

    /// Lenient parse of a model label: case, spacing and punctuation are ignored.
    pub fn from_label(raw: &str) -> Self {
        let key: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "featurerequest" | "feature" | "featurerequests" => Category::FeatureRequest,
            "bug" | "bugs" | "bugreport" => Category::Bug,
            "improvement" | "improvements" => Category::Improvement,
            "uiux" | "ui" | "ux" => Category::UiUx,
            "integration" | "integrations" => Category::Integration,
            "performance" => Category::Performance,
            "documentation" | "docs" => Category::Documentation,
            _ => Category::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::FeatureRequest => "Feature Request",
            Category::Bug => "Bug",
            Category::Improvement => "Improvement",
            Category::UiUx => "UI/UX",
            Category::Integration => "Integration",
            Category::Performance => "Performance",
            Category::Documentation => "Documentation",
            Category::Other => "Other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Open,
    Planned,
    InProgress,
    Done,
    Declined,
}

/// Who set the current category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategorySource {
    Machine,
    Human,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Free,
    Starter,
    Pro,
    Business,
    Enterprise,
}

impl Plan {
    /// Entitlement gate for automated enrichment (classification, dedupe, scoring).
    pub fn includes_enrichment(&self) -> bool {
        matches!(self, Plan::Pro | Plan::Business | Plan::Enterprise)
    }
}

/// Strategy context used by the priority model's strategic-alignment factor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusinessContext {
    #[serde(default)]
    pub current_period_label: String,
    #[serde(default)]
    pub company_strategy: String,
    #[serde(default)]
    pub upcoming_milestone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub plan: Plan,
    /// Active end users, used to turn unique voters into a reach percentage.
    #[serde(default)]
    pub active_users: u32,
    #[serde(default)]
    pub business: BusinessContext,
}

impl Workspace {
    pub fn new(id: impl Into<String>, plan: Plan) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            plan,
            active_users: 0,
            business: BusinessContext::default(),
        }
    }

    pub fn enrichment_enabled(&self) -> bool {
        self.plan.includes_enrichment()
    }
}

/// Customer tier of whoever asked for the feedback item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequesterTier {
    #[default]
    Free,
    Starter,
    Pro,
    Business,
    Enterprise,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RequesterContext {
    #[serde(default)]
    pub tier: RequesterTier,
    /// Employees at the requester's company.
    #[serde(default)]
    pub company_size: u32,
    #[serde(default)]
    pub is_champion: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackItem {
    pub id: Uuid,
    pub workspace_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: Status,
    pub category: Option<Category>,
    pub category_source: Option<CategorySource>,
    pub classification_confidence: Option<f32>,
    pub classification_reasoning: Option<String>,
    pub machine_classified: bool,
    pub vote_count: u32,
    pub comment_count: u32,
    pub unique_voters: u32,
    pub requester: Option<RequesterContext>,
    pub duplicate_of: Option<Uuid>,
    pub sentiment: Option<SentimentReading>,
    pub created_at: DateTime<Utc>,
}

impl FeedbackItem {
    pub fn new(workspace_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_id: workspace_id.into(),
            title: title.into(),
            description: String::new(),
            status: Status::Open,
            category: None,
            category_source: None,
            classification_confidence: None,
            classification_reasoning: None,
            machine_classified: false,
            vote_count: 0,
            comment_count: 0,
            unique_voters: 0,
            requester: None,
            duplicate_of: None,
            sentiment: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_votes(mut self, votes: u32, unique_voters: u32) -> Self {
        self.vote_count = votes;
        self.unique_voters = unique_voters;
        self
    }

    /// Title and description joined the way every model-facing component reads them.
    pub fn combined_text(&self) -> String {
        if self.description.trim().is_empty() {
            self.title.clone()
        } else {
            format!("{}\n{}", self.title, self.description)
        }
    }

    /// Batch-reclassification predicate: not archived as a duplicate, not set by
    /// a human, and either never classified, classified into the fallback label, or below `threshold`.
    pub fn needs_reclassification(&self, threshold: f32) -> bool {
        if self.duplicate_of.is_some() || self.category_source == Some(CategorySource::Human) {
            return false;
        }
        self.category.is_none()
            || self.category == Some(Category::FALLBACK)
            || self.classification_confidence.map_or(true, |c| c < threshold)
            || !self.machine_classified
    }
}

/// Longest accepted title, in chars.
pub const MAX_TITLE_CHARS: usize = 300;
/// Longest accepted description, in chars.
pub const MAX_DESCRIPTION_CHARS: usize = 10_000;

/// Payload of the inbound "item created" trigger.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewFeedback {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub vote_count: u32,
    #[serde(default)]
    pub comment_count: u32,
    #[serde(default)]
    pub unique_voters: u32,
    #[serde(default)]
    pub requester: Option<RequesterContext>,
}

/// Ephemeral duplicate-check hit. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateCandidate {
    pub target_id: Uuid,
    pub candidate_id: Uuid,
    pub score: f32,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl PriorityLevel {
    /// Bucket a 0–10 weighted composite.
    pub fn from_composite(composite: f32) -> Self {
        if composite >= 8.0 {
            PriorityLevel::Critical
        } else if composite >= 6.0 {
            PriorityLevel::High
        } else if composite >= 4.0 {
            PriorityLevel::Medium
        } else {
            PriorityLevel::Low
        }
    }

    pub fn suggested_action(&self) -> SuggestedAction {
        match self {
            PriorityLevel::Critical => SuggestedAction::ShipNow,
            PriorityLevel::High => SuggestedAction::PlanNextSprint,
            PriorityLevel::Medium => SuggestedAction::Backlog,
            PriorityLevel::Low => SuggestedAction::Monitor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    ShipNow,
    PlanNextSprint,
    Backlog,
    Monitor,
}

impl fmt::Display for SuggestedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SuggestedAction::ShipNow => "ship now",
            SuggestedAction::PlanNextSprint => "plan next sprint",
            SuggestedAction::Backlog => "backlog",
            SuggestedAction::Monitor => "monitor",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorScore {
    pub factor: crate::analyze::priority::Factor,
    /// Normalized sub-score in [0, 10].
    pub score: f32,
    pub weight: f32,
}

impl FactorScore {
    pub fn contribution(&self) -> f32 {
        self.score * self.weight
    }
}

/// Output of the priority model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityAssessment {
    /// Weighted composite in [0, 10] before rescaling.
    pub composite: f32,
    /// Display score in [0, 100].
    pub score: u8,
    pub level: PriorityLevel,
    pub suggested_action: SuggestedAction,
    pub justification: String,
    pub factors: Vec<FactorScore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Frustrated,
    Confused,
    Excited,
    Satisfied,
    Calm,
}

/// Shared three-step scale for the impact and urgency tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentReading {
    pub label: SentimentLabel,
    /// 0–100, 50 is neutral.
    pub intensity: u8,
    pub emotion: Emotion,
    pub impact: TagLevel,
    pub urgency: TagLevel,
}
