//! store.rs: persistence seams for items, workspaces and traces.
//!
//! The managed backend is an external collaborator; `MemoryStore` is the in-process
//! default. Traces have no update/delete path.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::analyze::classifier::Classification;
use crate::error::{Result, TriageError};
use crate::model::{Category, CategorySource, FeedbackItem, SentimentReading, Workspace};
use crate::trace::{DecisionTrace, TraceQuery};

#[async_trait]
pub trait FeedbackStore: Send + Sync {
    async fn get_workspace(&self, id: &str) -> Result<Option<Workspace>>;
    async fn list_workspaces(&self) -> Result<Vec<Workspace>>;
    async fn upsert_workspace(&self, workspace: Workspace) -> Result<()>;

    async fn insert_item(&self, item: FeedbackItem) -> Result<()>;
    async fn get_item(&self, id: Uuid) -> Result<Option<FeedbackItem>>;

    /// Most recent items of the workspace first, excluding `exclude` and archived duplicates.
    async fn duplicate_candidates(
        &self,
        workspace_id: &str,
        exclude: Uuid,
        limit: usize,
    ) -> Result<Vec<FeedbackItem>>;

    /// Overwrite category/confidence/reasoning and mark the item machine-classified.
    async fn apply_classification(&self, id: Uuid, c: &Classification) -> Result<()>;
    /// Human override: the category becomes settled and leaves the reclassification pool.
    async fn set_category_by_human(&self, id: Uuid, category: Category) -> Result<()>;
    async fn set_sentiment(&self, id: Uuid, reading: SentimentReading) -> Result<()>;

    /// Items in `workspaces` matching the reclassification predicate, oldest first.
    async fn reclassification_candidates(
        &self,
        workspaces: &[String],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<FeedbackItem>>;
    async fn count_reclassification_candidates(
        &self,
        workspaces: &[String],
        threshold: f32,
    ) -> Result<usize>;
}

#[async_trait]
pub trait TraceStore: Send + Sync {
    async fn append(&self, trace: DecisionTrace) -> Result<()>;
    /// Newest first, capped at the query limit.
    async fn list_traces(&self, query: &TraceQuery) -> Result<Vec<DecisionTrace>>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    workspaces: RwLock<HashMap<String, Workspace>>,
    /// Insertion order is kept; it breaks ties between equal timestamps.
    items: RwLock<Vec<FeedbackItem>>,
    traces: RwLock<Vec<DecisionTrace>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workspaces(workspaces: impl IntoIterator<Item = Workspace>) -> Self {
        let store = Self::new();
        {
            let mut g = store.workspaces.write();
            for ws in workspaces {
                g.insert(ws.id.clone(), ws);
            }
        }
        store
    }

    pub fn item_count(&self) -> usize {
        self.items.read().len()
    }

    fn with_item_mut<F>(&self, id: Uuid, f: F) -> Result<()>
    where
        F: FnOnce(&mut FeedbackItem),
    {
        let mut g = self.items.write();
        let item = g
            .iter_mut()
            .find(|it| it.id == id)
            .ok_or_else(|| TriageError::NotFound(format!("feedback item {id}")))?;
        f(item);
        Ok(())
    }

    fn selection(&self, workspaces: &[String], threshold: f32) -> Vec<FeedbackItem> {
        let g = self.items.read();
        let mut out: Vec<FeedbackItem> = g
            .iter()
            .filter(|it| workspaces.iter().any(|w| *w == it.workspace_id))
            .filter(|it| it.needs_reclassification(threshold))
            .cloned()
            .collect();
        // Stable: equal timestamps stay in insertion order.
        out.sort_by_key(|it| it.created_at);
        out
    }
}

#[async_trait]
impl FeedbackStore for MemoryStore {
    async fn get_workspace(&self, id: &str) -> Result<Option<Workspace>> {
        Ok(self.workspaces.read().get(id).cloned())
    }

    async fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        let mut all: Vec<Workspace> = self.workspaces.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn upsert_workspace(&self, workspace: Workspace) -> Result<()> {
        self.workspaces
            .write()
            .insert(workspace.id.clone(), workspace);
        Ok(())
    }

    async fn insert_item(&self, item: FeedbackItem) -> Result<()> {
        let mut g = self.items.write();
        if g.iter().any(|it| it.id == item.id) {
            return Err(TriageError::Storage(format!("duplicate item id {}", item.id)));
        }
        g.push(item);
        Ok(())
    }

    async fn get_item(&self, id: Uuid) -> Result<Option<FeedbackItem>> {
        Ok(self.items.read().iter().find(|it| it.id == id).cloned())
    }

    async fn duplicate_candidates(
        &self,
        workspace_id: &str,
        exclude: Uuid,
        limit: usize,
    ) -> Result<Vec<FeedbackItem>> {
        let g = self.items.read();
        let mut out: Vec<FeedbackItem> = g
            .iter()
            .filter(|it| it.workspace_id == workspace_id)
            .filter(|it| it.id != exclude && it.duplicate_of.is_none())
            .cloned()
            .collect();
        // Newest first; reversing first keeps later inserts ahead on equal timestamps.
        out.reverse();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        Ok(out)
    }

    async fn apply_classification(&self, id: Uuid, c: &Classification) -> Result<()> {
        self.with_item_mut(id, |it| {
            it.category = Some(c.category);
            it.category_source = Some(CategorySource::Machine);
            it.classification_confidence = Some(c.confidence);
            it.classification_reasoning = Some(c.reasoning.clone());
            it.machine_classified = true;
        })
    }

    async fn set_category_by_human(&self, id: Uuid, category: Category) -> Result<()> {
        self.with_item_mut(id, |it| {
            it.category = Some(category);
            it.category_source = Some(CategorySource::Human);
            it.classification_confidence = None;
            it.classification_reasoning = None;
            it.machine_classified = false;
        })
    }

    async fn set_sentiment(&self, id: Uuid, reading: SentimentReading) -> Result<()> {
        self.with_item_mut(id, |it| it.sentiment = Some(reading))
    }

    async fn reclassification_candidates(
        &self,
        workspaces: &[String],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<FeedbackItem>> {
        let mut out = self.selection(workspaces, threshold);
        out.truncate(limit);
        Ok(out)
    }

    async fn count_reclassification_candidates(
        &self,
        workspaces: &[String],
        threshold: f32,
    ) -> Result<usize> {
        Ok(self.selection(workspaces, threshold).len())
    }
}

#[async_trait]
impl TraceStore for MemoryStore {
    async fn append(&self, trace: DecisionTrace) -> Result<()> {
        self.traces.write().push(trace);
        Ok(())
    }

    async fn list_traces(&self, query: &TraceQuery) -> Result<Vec<DecisionTrace>> {
        let g = self.traces.read();
        Ok(g
            .iter()
            .rev()
            .filter(|t| query.matches(t))
            .take(query.effective_limit())
            .cloned()
            .collect())
    }
}

/// Read workspace records (JSON array) used to seed the store.
pub fn load_workspaces_file(path: &Path) -> anyhow::Result<Vec<Workspace>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading workspaces from {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}
