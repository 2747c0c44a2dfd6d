// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Assembles every other crate into the 50 Hz supervisor tick loop.

/// Default plan TTL in milliseconds (`spec.md` §4.4/§5): the planner request
/// timeout and the tick loop's polling period both derive from this.
pub const DEFAULT_PLAN_TTL_MS: u64 = 5000;

pub mod error;
pub mod face_link;
pub mod planner_client;
pub mod reflex_link;
pub mod runtime;
pub mod world_state;

pub use error::PlannerError;
pub use face_link::{FaceLink, FaceTelemetry};
pub use planner_client::{PlanResponse, PlannerClient};
pub use reflex_link::ReflexLink;
pub use runtime::Runtime;
