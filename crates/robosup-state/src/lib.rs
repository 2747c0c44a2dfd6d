// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Aggregated robot state and the safety policy applied to motion commands.

pub mod safety;
pub mod types;

pub use safety::apply_safety;
pub use types::{DesiredTwist, Mode, RobotState, SpeedCap};
