// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Event bus with edge detection over aggregated runtime snapshots.
//!
//! Accumulates high-level, named events ("vision.ball_acquired",
//! "safety.obstacle_close", ...) from raw telemetry transitions, so
//! planners only ever see state *changes*, not constant streams of raw
//! sensor values. Held in a bounded ring with a strictly increasing
//! sequence number.

use std::collections::VecDeque;

use serde_json::{json, Value};

use robosup_protocol::face::{ButtonEventKind, FaceButtonPayload, TouchEventPayload, TouchKind};
use robosup_protocol::reflex::{fault_names, RangeStatus};
use robosup_state::{Mode, RobotState};

#[derive(Debug, Clone)]
pub struct PlannerEvent {
    pub event_type: String,
    pub payload: Value,
    pub t_mono_ms: f64,
    pub seq: u64,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    pub max_events: usize,
    pub ball_acquire_conf: f64,
    pub ball_lost_conf: f64,
    pub ball_clear_min_conf: f64,
    pub obstacle_close_mm: u32,
    pub obstacle_clear_mm: u32,
    pub vision_stale_ms: f64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_events: 100,
            ball_acquire_conf: 0.60,
            ball_lost_conf: 0.35,
            ball_clear_min_conf: 0.20,
            obstacle_close_mm: 450,
            obstacle_clear_mm: 650,
            vision_stale_ms: 500.0,
        }
    }
}

/// Accumulates named events from edge transitions in [`RobotState`] plus
/// out-of-band face button/touch callbacks.
pub struct PlannerEventBus {
    cfg: EventBusConfig,
    events: VecDeque<PlannerEvent>,

    ball_visible: bool,
    obstacle_close: bool,
    vision_healthy: Option<bool>,
    last_fault_flags: u16,
    last_mode: Option<Mode>,

    last_button_ts: f64,
    last_touch_ts: f64,

    next_seq: u64,
}

impl PlannerEventBus {
    pub fn new(cfg: EventBusConfig) -> Self {
        Self {
            events: VecDeque::with_capacity(cfg.max_events),
            cfg,
            ball_visible: false,
            obstacle_close: false,
            vision_healthy: None,
            last_fault_flags: 0,
            last_mode: None,
            last_button_ts: -1.0,
            last_touch_ts: -1.0,
            next_seq: 1,
        }
    }

    pub fn emit(&mut self, event_type: impl Into<String>, payload: Value, t_mono_ms: f64) {
        if self.events.len() == self.cfg.max_events {
            self.events.pop_front();
        }
        self.events.push_back(PlannerEvent {
            event_type: event_type.into(),
            payload,
            t_mono_ms,
            seq: self.next_seq,
        });
        self.next_seq += 1;
    }

    /// Ingest a face-button telemetry frame. Deduplicated on the MCU's own
    /// monotonic timestamp so replayed/retransmitted frames are dropped.
    pub fn on_face_button(&mut self, evt: &FaceButtonPayload) {
        let ts = evt.ts_ms as f64;
        if ts <= self.last_button_ts {
            return;
        }
        self.last_button_ts = ts;
        let name = match evt.kind {
            ButtonEventKind::Press => "press",
            ButtonEventKind::Release => "release",
            ButtonEventKind::LongPress => "long_press",
        };
        self.emit(
            format!("face.button.{name}"),
            json!({ "button_id": evt.button_id, "kind": name }),
            ts,
        );
    }

    /// Ingest a touch telemetry frame, deduplicated the same way.
    pub fn on_face_touch(&mut self, evt: &TouchEventPayload, t_mono_ms: f64) {
        if t_mono_ms <= self.last_touch_ts {
            return;
        }
        self.last_touch_ts = t_mono_ms;
        let name = match evt.kind {
            TouchKind::Press => "press",
            TouchKind::Release => "release",
            TouchKind::Drag => "drag",
        };
        self.emit(
            format!("face.touch.{name}"),
            json!({ "x": evt.x, "y": evt.y }),
            t_mono_ms,
        );
    }

    /// Run edge detection against the latest aggregated state snapshot.
    pub fn ingest_state(&mut self, state: &RobotState) {
        let now_ms = state.tick_mono_ms;

        match self.last_mode {
            None => self.last_mode = Some(state.mode),
            Some(prev) if prev != state.mode => {
                self.emit(
                    "mode.changed",
                    json!({ "from": prev.as_str(), "to": state.mode.as_str() }),
                    now_ms,
                );
                self.last_mode = Some(state.mode);
            }
            _ => {}
        }

        let effective_ball_conf = if self.ball_signal_valid(state) {
            state.ball_confidence
        } else {
            0.0
        };

        if !self.ball_visible && effective_ball_conf >= self.cfg.ball_acquire_conf {
            self.ball_visible = true;
            self.emit(
                "vision.ball_acquired",
                json!({
                    "confidence": round3(effective_ball_conf),
                    "bearing_deg": round1(state.ball_bearing_deg),
                }),
                now_ms,
            );
        } else if self.ball_visible && effective_ball_conf < self.cfg.ball_lost_conf {
            self.ball_visible = false;
            self.emit(
                "vision.ball_lost",
                json!({ "confidence": round3(effective_ball_conf) }),
                now_ms,
            );
        }

        let obstacle_now = state.range_status == RangeStatus::Ok
            && state.range_mm > 0
            && state.range_mm < self.cfg.obstacle_close_mm;
        let obstacle_clear_now = state.range_status != RangeStatus::Ok
            || state.range_mm == 0
            || state.range_mm > self.cfg.obstacle_clear_mm;

        if !self.obstacle_close && obstacle_now {
            self.obstacle_close = true;
            self.emit(
                "safety.obstacle_close",
                json!({ "range_mm": state.range_mm }),
                now_ms,
            );
        } else if self.obstacle_close && obstacle_clear_now {
            self.obstacle_close = false;
            self.emit(
                "safety.obstacle_cleared",
                json!({ "range_mm": state.range_mm }),
                now_ms,
            );
        }

        let vision_healthy_now = state.vision_age_ms >= 0.0 && state.vision_age_ms <= self.cfg.vision_stale_ms;
        match self.vision_healthy {
            None => self.vision_healthy = Some(vision_healthy_now),
            Some(prev) if prev != vision_healthy_now => {
                self.vision_healthy = Some(vision_healthy_now);
                self.emit(
                    if vision_healthy_now { "vision.healthy" } else { "vision.stale" },
                    json!({ "vision_age_ms": round1(state.vision_age_ms) }),
                    now_ms,
                );
            }
            _ => {}
        }

        if self.last_fault_flags == 0 && state.fault_flags != 0 {
            self.emit(
                "fault.raised",
                json!({ "flags": state.fault_flags, "faults": fault_names(state.fault_flags) }),
                now_ms,
            );
        } else if self.last_fault_flags != 0 && state.fault_flags == 0 {
            self.emit(
                "fault.cleared",
                json!({ "flags": self.last_fault_flags, "faults": fault_names(self.last_fault_flags) }),
                now_ms,
            );
        }
        self.last_fault_flags = state.fault_flags;
    }

    pub fn latest(&self, limit: usize) -> Vec<&PlannerEvent> {
        if limit == 0 {
            return Vec::new();
        }
        let skip = self.events.len().saturating_sub(limit);
        self.events.iter().skip(skip).collect()
    }

    pub fn events_since(&self, seq: u64, limit: usize) -> Vec<&PlannerEvent> {
        if limit == 0 {
            return Vec::new();
        }
        let matching: Vec<&PlannerEvent> = self.events.iter().filter(|e| e.seq > seq).collect();
        let skip = matching.len().saturating_sub(limit);
        matching[skip..].to_vec()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn last_seq(&self) -> u64 {
        self.events.back().map(|e| e.seq).unwrap_or(0)
    }

    fn ball_signal_valid(&self, state: &RobotState) -> bool {
        let vision_fresh = (0.0..=self.cfg.vision_stale_ms).contains(&state.vision_age_ms);
        let clear_ok =
            state.clear_confidence < 0.0 || state.clear_confidence >= self.cfg.ball_clear_min_conf;
        vision_fresh && clear_ok && state.fault_flags == 0
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
