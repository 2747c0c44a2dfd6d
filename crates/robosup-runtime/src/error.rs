// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Failures talking to the planner backend's `/plan` endpoint.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("planner backend request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("planner backend returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("planner backend returned an invalid plan response: {0}")]
    Schema(String),
}
