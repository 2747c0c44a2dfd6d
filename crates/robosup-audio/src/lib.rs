// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Speech and local-audio I/O: planner-driven TTS speech, the PTT
//! conversation bridge, and the lip-sync face-seam shared by both.

pub mod conversation;
pub mod face_sink;
pub mod lip_sync;
pub mod orchestrator;

pub use conversation::ConversationManager;
pub use face_sink::FaceSink;
pub use orchestrator::{AudioOrchestrator, OrchestratorError};
