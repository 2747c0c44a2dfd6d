// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Tracks active `/converse` sessions keyed by robot id: same-robot
//! reconnects preempt the older session, and a disconnecting session's
//! conversation history is stashed for a short TTL so a fast reconnect
//! resumes instead of starting cold.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::history::ConversationHistory;

const DEFAULT_STASH_TTL: Duration = Duration::from_secs(60);

struct Session<W> {
    handle: W,
    connected_at: Instant,
    session_seq: Option<u64>,
    session_monotonic_ts_ms: Option<i64>,
}

struct StashedHistory {
    history: ConversationHistory,
    stashed_at: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegistrySnapshot {
    pub active_sessions: usize,
    pub registered: u64,
    pub preempted: u64,
    pub unregistered: u64,
    pub stashed: usize,
    pub stash_hits: u64,
    pub stash_expired: u64,
    pub robots: Vec<String>,
}

/// Tracks `/converse` session ownership per robot id. Generic over the
/// connection handle type `W` so the registry itself never touches a
/// concrete WebSocket type; callers identify "is this the same
/// connection" via `PartialEq` on `W` (a connection id is a natural
/// choice, not the socket itself).
pub struct ConverseSessionRegistry<W> {
    sessions: Mutex<HashMap<String, Session<W>>>,
    stash: Mutex<HashMap<String, StashedHistory>>,
    stash_ttl: Duration,
    registered: Mutex<u64>,
    preempted: Mutex<u64>,
    unregistered: Mutex<u64>,
    stash_hits: Mutex<u64>,
    stash_expired: Mutex<u64>,
}

impl<W: Clone + PartialEq> ConverseSessionRegistry<W> {
    pub fn new() -> Self {
        Self::with_stash_ttl(DEFAULT_STASH_TTL)
    }

    pub fn with_stash_ttl(stash_ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            stash: Mutex::new(HashMap::new()),
            stash_ttl,
            registered: Mutex::new(0),
            preempted: Mutex::new(0),
            unregistered: Mutex::new(0),
            stash_hits: Mutex::new(0),
            stash_expired: Mutex::new(0),
        }
    }

    /// Register a session, returning the previous connection's handle if
    /// it was preempted (the caller is responsible for closing it).
    pub async fn register(
        &self,
        robot_id: &str,
        handle: W,
        session_seq: Option<u64>,
        session_monotonic_ts_ms: Option<i64>,
    ) -> Option<W> {
        let rid = robot_id.trim();
        if rid.is_empty() {
            return None;
        }

        let mut sessions = self.sessions.lock().await;
        let old = sessions.insert(
            rid.to_string(),
            Session {
                handle: handle.clone(),
                connected_at: Instant::now(),
                session_seq,
                session_monotonic_ts_ms,
            },
        );
        *self.registered.lock().await += 1;

        match old {
            Some(prev) if prev.handle != handle => {
                *self.preempted.lock().await += 1;
                Some(prev.handle)
            }
            _ => None,
        }
    }

    /// Unregister a session (no-op if `handle` no longer owns the slot,
    /// i.e. it was already preempted). Optionally stashes `history` for
    /// `stash_ttl` so a fast reconnect can resume it.
    pub async fn unregister(&self, robot_id: &str, handle: &W, history: Option<ConversationHistory>) {
        let rid = robot_id.trim();
        if rid.is_empty() {
            return;
        }

        let removed = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(rid) {
                Some(s) if &s.handle == handle => {
                    sessions.remove(rid);
                    true
                }
                _ => false,
            }
        };
        if !removed {
            return;
        }
        *self.unregistered.lock().await += 1;

        if let Some(h) = history {
            if h.turn_count() > 0 {
                let mut stash = self.stash.lock().await;
                stash.insert(rid.to_string(), StashedHistory { history: h, stashed_at: Instant::now() });
            }
        }
    }

    /// Take a stashed history for `robot_id` if present and not yet
    /// TTL-expired. Consumes the stash entry either way.
    pub async fn take_stashed_history(&self, robot_id: &str) -> Option<ConversationHistory> {
        let mut stash = self.stash.lock().await;
        let entry = stash.remove(robot_id)?;
        if entry.stashed_at.elapsed() > self.stash_ttl {
            drop(stash);
            *self.stash_expired.lock().await += 1;
            return None;
        }
        drop(stash);
        *self.stash_hits.lock().await += 1;
        Some(entry.history)
    }

    pub async fn snapshot(&self) -> RegistrySnapshot {
        let sessions = self.sessions.lock().await;
        let mut robots: Vec<String> = sessions.keys().cloned().collect();
        robots.sort();
        RegistrySnapshot {
            active_sessions: sessions.len(),
            registered: *self.registered.lock().await,
            preempted: *self.preempted.lock().await,
            unregistered: *self.unregistered.lock().await,
            stashed: self.stash.lock().await.len(),
            stash_hits: *self.stash_hits.lock().await,
            stash_expired: *self.stash_expired.lock().await,
            robots,
        }
    }
}

impl<W: Clone + PartialEq> Default for ConverseSessionRegistry<W> {
    fn default() -> Self {
        Self::new()
    }
}
