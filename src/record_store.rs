// THEORY:
// The `record_store` module keeps the results of analyzed shots: one record per shot,
// keyed by an opaque id, with the verdict, its confidence, the feature vector, and free-form
// notes. It answers the questions a dashboard asks: a single shot, the latest shots, all
// shots with a given verdict, and how the verdicts are distributed.
//
// `ShotStore` is the seam; `InMemoryShotStore` is a thread-safe implementation that can be
// snapshotted to and restored from JSON.

use crate::core_modules::classifier::ShotLabel;
use crate::core_modules::features::FeatureVector;
use crate::error::{FlowError, FlowResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

pub type ShotId = u64;

/// What the caller supplies to store a shot.
#[derive(Debug, Clone, PartialEq)]
pub struct NewShot {
    /// Name of the source video or frame folder. Unique across the store.
    pub filename: String,
    pub label: ShotLabel,
    pub confidence: f64,
    pub features: Option<FeatureVector>,
    pub video_duration_s: Option<f64>,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotRecord {
    pub id: ShotId,
    pub filename: String,
    pub label: ShotLabel,
    pub confidence: f64,
    pub features: Option<FeatureVector>,
    pub video_duration_s: Option<f64>,
    pub notes: String,
    /// Seconds since the Unix epoch.
    pub recorded_at: u64,
}

/// Verdict distribution across the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShotSummary {
    pub total: usize,
    pub counts: BTreeMap<String, usize>,
    /// Share of each label in percent, rounded to one decimal.
    pub percentages: BTreeMap<String, f64>,
}

pub trait ShotStore: Send + Sync {
    fn create(&self, shot: NewShot) -> FlowResult<ShotId>;
    fn get(&self, id: ShotId) -> FlowResult<ShotRecord>;
    fn get_by_filename(&self, filename: &str) -> Option<ShotRecord>;
    /// Newest first, optionally truncated.
    fn list(&self, limit: Option<usize>) -> Vec<ShotRecord>;
    /// Newest first.
    fn list_by_label(&self, label: ShotLabel) -> Vec<ShotRecord>;
    fn update_notes(&self, id: ShotId, notes: &str) -> FlowResult<()>;
    fn delete(&self, id: ShotId) -> FlowResult<()>;
    fn summary(&self) -> ShotSummary;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    next_id: ShotId,
    shots: BTreeMap<ShotId, ShotRecord>,
}

#[derive(Debug, Default)]
pub struct InMemoryShotStore {
    state: RwLock<Snapshot>,
}

impl InMemoryShotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap_or_else(PoisonError::into_inner).shots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> FlowResult<()> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        fs::write(path.as_ref(), serde_json::to_string_pretty(&*state)?)?;
        info!(path = %path.as_ref().display(), shots = state.shots.len(), "saved shot store");
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> FlowResult<Self> {
        let contents = fs::read_to_string(path)?;
        let mut snapshot: Snapshot = serde_json::from_str(&contents)?;
        // Never hand out an id that is already taken.
        let highest = snapshot.shots.keys().next_back().copied().unwrap_or(0);
        snapshot.next_id = snapshot.next_id.max(highest + 1);
        Ok(Self {
            state: RwLock::new(snapshot),
        })
    }
}

fn newest_first<'a>(records: impl Iterator<Item = &'a ShotRecord>) -> Vec<ShotRecord> {
    let mut records: Vec<ShotRecord> = records.cloned().collect();
    records.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at).then(b.id.cmp(&a.id)));
    records
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl ShotStore for InMemoryShotStore {
    fn create(&self, shot: NewShot) -> FlowResult<ShotId> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.shots.values().any(|r| r.filename == shot.filename) {
            return Err(FlowError::DuplicateShot(shot.filename));
        }
        state.next_id = state.next_id.max(1);
        let id = state.next_id;
        state.next_id += 1;
        state.shots.insert(
            id,
            ShotRecord {
                id,
                filename: shot.filename,
                label: shot.label,
                confidence: shot.confidence,
                features: shot.features,
                video_duration_s: shot.video_duration_s,
                notes: shot.notes,
                recorded_at: unix_now(),
            },
        );
        Ok(id)
    }

    fn get(&self, id: ShotId) -> FlowResult<ShotRecord> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.shots.get(&id).cloned().ok_or(FlowError::ShotNotFound(id))
    }

    fn get_by_filename(&self, filename: &str) -> Option<ShotRecord> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.shots.values().find(|r| r.filename == filename).cloned()
    }

    fn list(&self, limit: Option<usize>) -> Vec<ShotRecord> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut records = newest_first(state.shots.values());
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        records
    }

    fn list_by_label(&self, label: ShotLabel) -> Vec<ShotRecord> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        newest_first(state.shots.values().filter(|r| r.label == label))
    }

    fn update_notes(&self, id: ShotId, notes: &str) -> FlowResult<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let record = state.shots.get_mut(&id).ok_or(FlowError::ShotNotFound(id))?;
        record.notes = notes.to_string();
        Ok(())
    }

    fn delete(&self, id: ShotId) -> FlowResult<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state
            .shots
            .remove(&id)
            .map(|_| ())
            .ok_or(FlowError::ShotNotFound(id))
    }

    fn summary(&self) -> ShotSummary {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let total = state.shots.len();
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for record in state.shots.values() {
            *counts.entry(record.label.to_string()).or_default() += 1;
        }
        let percentages = counts
            .iter()
            .map(|(label, &count)| {
                let percent = count as f64 / total as f64 * 100.0;
                (label.clone(), (percent * 10.0).round() / 10.0)
            })
            .collect();
        ShotSummary {
            total,
            counts,
            percentages,
        }
    }
}
