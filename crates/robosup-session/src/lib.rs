// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-robot `/converse` session ownership and conversation history
//! rendering.

pub mod history;
pub mod registry;

pub use history::{ConversationHistory, HistoryMessage, PersonalityProfile};
pub use registry::{ConverseSessionRegistry, RegistrySnapshot};
