//! Runtime-calibrated priority factor weights with hot-reload from config/weights.json.
//!
//! JSON shape (missing keys keep their defaults):
//! {
//!   "revenue_impact": 0.25,
//!   "reach": 0.20,
//!   "strategic_alignment": 0.15,
//!   "inverse_effort": 0.10,
//!   "competitive_pressure": 0.10,
//!   "risk": 0.10,
//!   "satisfaction_impact": 0.10
//! }
//!
//! On each `current()` call we check the file's modified time and reload if changed.
//! The handle lives in application state; callers pass the snapshot into the model.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    time::SystemTime,
};

use crate::analyze::priority::Factor;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityWeights {
    pub revenue_impact: f32,
    pub reach: f32,
    pub strategic_alignment: f32,
    pub inverse_effort: f32,
    pub competitive_pressure: f32,
    pub risk: f32,
    pub satisfaction_impact: f32,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            revenue_impact: 0.25,
            reach: 0.20,
            strategic_alignment: 0.15,
            inverse_effort: 0.10,
            competitive_pressure: 0.10,
            risk: 0.10,
            satisfaction_impact: 0.10,
        }
    }
}

impl PriorityWeights {
    pub fn weight(&self, factor: Factor) -> f32 {
        match factor {
            Factor::RevenueImpact => self.revenue_impact,
            Factor::Reach => self.reach,
            Factor::StrategicAlignment => self.strategic_alignment,
            Factor::InverseEffort => self.inverse_effort,
            Factor::CompetitivePressure => self.competitive_pressure,
            Factor::Risk => self.risk,
            Factor::SatisfactionImpact => self.satisfaction_impact,
        }
    }

    pub fn sum(&self) -> f32 {
        Factor::ALL.iter().map(|f| self.weight(*f)).sum()
    }

    /// Negative or non-finite weights are zeroed; an all-zero set falls back to defaults.
    pub fn sanitized(mut self) -> Self {
        for w in [
            &mut self.revenue_impact,
            &mut self.reach,
            &mut self.strategic_alignment,
            &mut self.inverse_effort,
            &mut self.competitive_pressure,
            &mut self.risk,
            &mut self.satisfaction_impact,
        ] {
            if !w.is_finite() || *w < 0.0 {
                *w = 0.0;
            }
        }
        if self.sum() <= f32::EPSILON {
            return Self::default();
        }
        self
    }
}

/// Hot-reload wrapper: reloads when the config file mtime changes.
#[derive(Debug)]
pub struct HotReloadWeights {
    path: PathBuf,
    inner: RwLock<State>,
}

#[derive(Debug)]
struct State {
    weights: PriorityWeights,
    last_modified: Option<SystemTime>,
}

impl HotReloadWeights {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inner: RwLock::new(State {
                weights: PriorityWeights::default(),
                last_modified: None,
            }),
        }
    }

    /// Fixed weights, never reloaded (tests, tools).
    pub fn fixed(weights: PriorityWeights) -> Self {
        Self {
            path: PathBuf::new(),
            inner: RwLock::new(State {
                weights: weights.sanitized(),
                last_modified: None,
            }),
        }
    }

    /// Get the latest weights, reloading if the config file changed.
    pub fn current(&self) -> PriorityWeights {
        let mtime = match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(m) => m,
            // If file isn't there, we keep what we have.
            Err(_) => return self.inner.read().weights,
        };

        if self.inner.read().last_modified == Some(mtime) {
            return self.inner.read().weights;
        }

        let mut guard = self.inner.write();
        // Double-check in case of races.
        if guard.last_modified != Some(mtime) {
            match load_weights_file(&self.path) {
                Ok(w) => {
                    guard.weights = w.sanitized();
                    guard.last_modified = Some(mtime);
                    tracing::info!(path = %self.path.display(), "priority weights reloaded");
                }
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "priority weights reload failed; keeping previous");
                }
            }
        }
        guard.weights
    }
}

/// Load weights directly (no caching). Public for tests/tools.
pub fn load_weights_file(path: &Path) -> io::Result<PriorityWeights> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io::Write, thread, time::Duration};

    #[test]
    fn default_weights_sum_to_one() {
        assert!((PriorityWeights::default().sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn negative_weights_are_zeroed() {
        let w = PriorityWeights {
            risk: -1.0,
            ..PriorityWeights::default()
        }
        .sanitized();
        assert_eq!(w.risk, 0.0);
    }

    #[test]
    fn loads_and_hot_reloads() {
        let tmpdir = tempfile::tempdir().unwrap();
        let path = tmpdir.path().join("weights.json");

        {
            let mut f = fs::File::create(&path).unwrap();
            write!(f, r#"{{"reach":0.5}}"#).unwrap();
            f.sync_all().unwrap();
        }

        let hot = HotReloadWeights::new(&path);
        let w1 = hot.current();
        assert!((w1.reach - 0.5).abs() < f32::EPSILON);
        assert!((w1.revenue_impact - 0.25).abs() < f32::EPSILON);

        // Ensure different mtime (coarse filesystem granularity).
        thread::sleep(Duration::from_millis(1100));

        {
            let mut f = fs::File::create(&path).unwrap();
            write!(f, r#"{{"reach":0.9,"risk":0.0}}"#).unwrap();
            f.sync_all().unwrap();
        }

        let w2 = hot.current();
        assert!((w2.reach - 0.9).abs() < f32::EPSILON);
        assert_eq!(w2.risk, 0.0);
    }

    #[test]
    fn missing_file_keeps_defaults() {
        let hot = HotReloadWeights::new("does/not/exist.json");
        assert_eq!(hot.current(), PriorityWeights::default());
    }
}
