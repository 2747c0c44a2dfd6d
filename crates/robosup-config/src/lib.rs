// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Typed, defaulted runtime configuration and its YAML loader.

mod loader;

pub use loader::load;

use robosup_events::EventBusConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub reflex_device: String,
    pub reflex_baud: u32,
    pub face_device: String,
    pub face_baud: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            reflex_device: "/dev/ttyACM0".into(),
            reflex_baud: 115200,
            face_device: "/dev/ttyACM1".into(),
            face_baud: 115200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub robot_id: String,
    pub planner_url: String,
    pub converse_url: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            robot_id: "robot-1".into(),
            planner_url: "http://localhost:8000".into(),
            converse_url: "http://localhost:8000".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub speaker_device: String,
    pub mic_device: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self { speaker_device: "default".into(), mic_device: "default".into() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub path: String,
    pub consent: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { path: "/var/lib/robosup/memory.json".into(), consent: false }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub stash_ttl_s: f64,
    pub max_turns: usize,
    pub max_context_tokens: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { stash_ttl_s: 60.0, max_turns: 20, max_context_tokens: 4096 }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub backend: BackendConfig,
    pub audio: AudioConfig,
    pub memory: MemoryConfig,
    pub session: SessionConfig,
    pub event_bus: EventBusConfig,
}
