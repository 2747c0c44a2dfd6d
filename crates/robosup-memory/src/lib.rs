// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Local, consent-gated memory store: semantic tags only, never raw
//! transcripts, decaying exponentially by tier, persisted as JSON on
//! the local filesystem.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub const MAX_TOTAL_ENTRIES: usize = 50;
const STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayTier {
    pub decay_lambda: f64,
    pub floor: f64,
    pub max_entries: usize,
}

pub const DECAY_TIERS: &[(&str, DecayTier)] = &[
    ("name", DecayTier { decay_lambda: 0.0, floor: 1.0, max_entries: 1 }),
    ("ritual", DecayTier { decay_lambda: 8.91e-8, floor: 0.10, max_entries: 5 }),
    ("topic", DecayTier { decay_lambda: 3.82e-7, floor: 0.0, max_entries: 20 }),
    ("tone", DecayTier { decay_lambda: 1.15e-6, floor: 0.0, max_entries: 3 }),
    ("preference", DecayTier { decay_lambda: 2.01e-6, floor: 0.0, max_entries: 10 }),
];

fn tier_for(category: &str) -> Option<DecayTier> {
    DECAY_TIERS.iter().find(|(name, _)| *name == category).map(|(_, tier)| *tier)
}

const POSITIVE_PREFIXES: &[&str] = &["likes_", "loves_", "enjoys_", "interested_", "favorite_"];
const NEGATIVE_PREFIXES: &[&str] = &["dislikes_", "scared_of_", "upset_by_", "afraid_of_"];

/// Infer a default (valence, arousal) bias from a tag's name.
pub fn infer_valence_arousal(tag: &str) -> (f64, f64) {
    let lower = tag.to_ascii_lowercase();
    if POSITIVE_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return (0.05, 0.02);
    }
    if NEGATIVE_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return (-0.05, 0.02);
    }
    (0.0, 0.0)
}

fn now_unix_s() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub tag: String,
    pub category: String,
    pub valence_bias: f64,
    pub arousal_bias: f64,
    pub initial_strength: f64,
    pub created_ts: f64,
    pub last_reinforced_ts: f64,
    pub reinforcement_count: u32,
    pub decay_lambda: f64,
    pub source: String,
}

impl MemoryEntry {
    /// Current strength via exponential decay from `last_reinforced_ts`,
    /// floored by the entry's tier.
    pub fn current_strength(&self, now: f64) -> f64 {
        let age_s = (now - self.last_reinforced_ts).max(0.0);
        let raw = self.initial_strength * (-self.decay_lambda * age_s).exp();
        let floor = tier_for(&self.category).map(|t| t.floor).unwrap_or(0.0);
        raw.max(floor)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    entries: Vec<MemoryEntry>,
    session_count: u32,
    total_conversation_s: f64,
    created_ts: f64,
}

#[derive(Debug, Error)]
pub enum MemoryStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Local-only, consent-gated memory store. Entries are never
/// transmitted to the conversation backend — only the active tag
/// summary is shared for personality-profile context injection.
pub struct MemoryStore {
    path: PathBuf,
    consent: bool,
    entries: std::collections::HashMap<String, MemoryEntry>,
    session_count: u32,
    total_conversation_s: f64,
    created_ts: f64,
}

impl MemoryStore {
    pub fn new(path: impl Into<PathBuf>, consent: bool) -> Self {
        Self {
            path: path.into(),
            consent,
            entries: std::collections::HashMap::new(),
            session_count: 0,
            total_conversation_s: 0.0,
            created_ts: 0.0,
        }
    }

    pub fn consent(&self) -> bool {
        self.consent
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn load(&mut self) {
        if !self.path.exists() {
            self.created_ts = now_unix_s();
            return;
        }
        match std::fs::read_to_string(&self.path).map_err(MemoryStoreError::from).and_then(
            |raw| serde_json::from_str::<StoreFile>(&raw).map_err(MemoryStoreError::from),
        ) {
            Ok(file) if file.version == STORE_VERSION => {
                for entry in file.entries {
                    self.entries.insert(entry.tag.clone(), entry);
                }
                self.session_count = file.session_count;
                self.total_conversation_s = file.total_conversation_s;
                self.created_ts = file.created_ts;
                info!(count = self.entries.len(), path = %self.path.display(), "loaded memory entries");
            }
            Ok(file) => {
                warn!(version = file.version, "unknown memory version, ignoring");
                self.created_ts = now_unix_s();
            }
            Err(e) => {
                warn!(error = %e, "failed to load memory store");
                self.created_ts = now_unix_s();
            }
        }
    }

    pub fn save(&self) {
        if let Err(e) = self.try_save() {
            warn!(error = %e, "failed to save memory store");
        }
    }

    fn try_save(&self) -> Result<(), MemoryStoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = StoreFile {
            version: STORE_VERSION,
            entries: self.entries.values().cloned().collect(),
            session_count: self.session_count,
            total_conversation_s: round1(self.total_conversation_s),
            created_ts: self.created_ts,
        };
        let json = serde_json::to_string_pretty(&file)?;
        std::fs::write(&self.path, json + "\n")?;
        Ok(())
    }

    /// Add a new tag or reinforce an existing one. Returns `false` if
    /// blocked by the consent gate or an empty tag.
    pub fn add_or_reinforce(
        &mut self,
        tag: &str,
        category: &str,
        valence_bias: Option<f64>,
        arousal_bias: Option<f64>,
        source: &str,
    ) -> bool {
        if !self.consent {
            return false;
        }
        let tag = tag.trim();
        if tag.is_empty() {
            return false;
        }

        let category = if tier_for(category).is_some() { category } else { "topic" };
        let tier = tier_for(category).expect("validated above");
        let now = now_unix_s();

        if let Some(entry) = self.entries.get_mut(tag) {
            entry.reinforcement_count += 1;
            entry.last_reinforced_ts = now;
            entry.initial_strength = 1.0;
            return true;
        }

        let tier_count = self.entries.values().filter(|e| e.category == category).count();
        if tier_count >= tier.max_entries {
            if let Some(weakest_tag) = self
                .entries
                .values()
                .filter(|e| e.category == category)
                .min_by(|a, b| a.current_strength(now).total_cmp(&b.current_strength(now)))
                .map(|e| e.tag.clone())
            {
                self.entries.remove(&weakest_tag);
            }
        }

        if self.entries.len() >= MAX_TOTAL_ENTRIES {
            if let Some(weakest_tag) = self
                .entries
                .values()
                .min_by(|a, b| a.current_strength(now).total_cmp(&b.current_strength(now)))
                .map(|e| e.tag.clone())
            {
                self.entries.remove(&weakest_tag);
            }
        }

        let (default_v, default_a) = infer_valence_arousal(tag);
        let entry = MemoryEntry {
            tag: tag.to_string(),
            category: category.to_string(),
            valence_bias: valence_bias.unwrap_or(default_v),
            arousal_bias: arousal_bias.unwrap_or(default_a),
            initial_strength: 1.0,
            created_ts: now,
            last_reinforced_ts: now,
            reinforcement_count: 1,
            decay_lambda: tier.decay_lambda,
            source: source.to_string(),
        };
        self.entries.insert(entry.tag.clone(), entry);
        true
    }

    pub fn get_active(&self, threshold: f64) -> Vec<&MemoryEntry> {
        let now = now_unix_s();
        self.entries.values().filter(|e| e.current_strength(now) > threshold).collect()
    }

    pub fn tag_summary(&self) -> Vec<String> {
        self.get_active(0.05).into_iter().map(|e| e.tag.clone()).collect()
    }

    /// Wipe all entries and delete the backing file (parent
    /// "forget everything" action).
    pub fn reset(&mut self) {
        self.entries.clear();
        self.session_count = 0;
        self.total_conversation_s = 0.0;
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(error = %e, "failed to delete memory file");
                return;
            }
        }
        info!("memory store reset");
    }

    pub fn increment_session(&mut self, conversation_s: f64) {
        self.session_count += 1;
        self.total_conversation_s += conversation_s;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("memory.json");
        std::mem::forget(dir);
        path
    }

    #[test]
    fn consent_gate_blocks_writes() {
        let mut store = MemoryStore::new(temp_path(), false);
        assert!(!store.add_or_reinforce("likes_dinosaurs", "topic", None, None, "llm_extract"));
        assert_eq!(store.entry_count(), 0);
    }

    #[test]
    fn reinforcing_resets_strength_and_bumps_count() {
        let mut store = MemoryStore::new(temp_path(), true);
        store.add_or_reinforce("likes_dinosaurs", "topic", None, None, "llm_extract");
        store.add_or_reinforce("likes_dinosaurs", "topic", None, None, "llm_extract");
        let entry = &store.entries["likes_dinosaurs"];
        assert_eq!(entry.reinforcement_count, 2);
        assert_eq!(entry.initial_strength, 1.0);
    }

    #[test]
    fn unknown_category_falls_back_to_topic() {
        let mut store = MemoryStore::new(temp_path(), true);
        store.add_or_reinforce("mystery_tag", "not_a_real_tier", None, None, "rule_infer");
        assert_eq!(store.entries["mystery_tag"].category, "topic");
    }

    #[test]
    fn name_tier_caps_at_one_entry_via_eviction() {
        let mut store = MemoryStore::new(temp_path(), true);
        store.add_or_reinforce("child_name_emma", "name", None, None, "llm_extract");
        store.add_or_reinforce("child_name_olivia", "name", None, None, "llm_extract");
        let name_entries: Vec<_> = store.entries.values().filter(|e| e.category == "name").collect();
        assert_eq!(name_entries.len(), 1);
        assert_eq!(name_entries[0].tag, "child_name_olivia");
    }

    #[test]
    fn name_tier_never_decays_below_floor() {
        let entry = MemoryEntry {
            tag: "child_name_emma".into(),
            category: "name".into(),
            valence_bias: 0.0,
            arousal_bias: 0.0,
            initial_strength: 1.0,
            created_ts: 0.0,
            last_reinforced_ts: 0.0,
            reinforcement_count: 1,
            decay_lambda: 0.0,
            source: "llm_extract".into(),
        };
        assert_eq!(entry.current_strength(1_000_000.0), 1.0);
    }

    #[test]
    fn topic_entry_decays_toward_zero_floor_over_time() {
        let tier = tier_for("topic").unwrap();
        let entry = MemoryEntry {
            tag: "likes_space".into(),
            category: "topic".into(),
            valence_bias: 0.0,
            arousal_bias: 0.0,
            initial_strength: 1.0,
            created_ts: 0.0,
            last_reinforced_ts: 0.0,
            reinforcement_count: 1,
            decay_lambda: tier.decay_lambda,
            source: "llm_extract".into(),
        };
        let fresh = entry.current_strength(1.0);
        let aged = entry.current_strength(30.0 * 24.0 * 3600.0);
        assert!(aged < fresh);
        assert!(aged >= 0.0);
    }

    #[test]
    fn infer_valence_arousal_recognizes_positive_and_negative_prefixes() {
        assert_eq!(infer_valence_arousal("likes_dinosaurs"), (0.05, 0.02));
        assert_eq!(infer_valence_arousal("scared_of_thunder"), (-0.05, 0.02));
        assert_eq!(infer_valence_arousal("random_tag"), (0.0, 0.0));
    }

    #[test]
    fn reset_clears_entries_and_counters() {
        let mut store = MemoryStore::new(temp_path(), true);
        store.add_or_reinforce("likes_dinosaurs", "topic", None, None, "llm_extract");
        store.increment_session(120.0);
        store.reset();
        assert_eq!(store.entry_count(), 0);
        assert_eq!(store.session_count, 0);
    }

    #[test]
    fn save_then_load_round_trips_entries() {
        let path = temp_path();
        let _ = std::fs::remove_file(&path);

        let mut store = MemoryStore::new(&path, true);
        store.add_or_reinforce("likes_dinosaurs", "topic", None, None, "llm_extract");
        store.increment_session(60.0);
        store.save();

        let mut reloaded = MemoryStore::new(&path, true);
        reloaded.load();
        assert_eq!(reloaded.entry_count(), 1);
        assert_eq!(reloaded.session_count, 1);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn tag_summary_excludes_entries_at_or_below_threshold() {
        let mut store = MemoryStore::new(temp_path(), true);
        store.add_or_reinforce("child_name_emma", "name", None, None, "llm_extract");
        let summary = store.tag_summary();
        assert!(summary.contains(&"child_name_emma".to_string()));
    }
}
