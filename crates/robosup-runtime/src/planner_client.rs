// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Thin HTTP client for the planner backend's `POST /plan` endpoint.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::PlannerError;
use crate::DEFAULT_PLAN_TTL_MS;

#[derive(Debug, Clone)]
pub struct PlanResponse {
    pub actions: Vec<Value>,
    pub ttl_ms: i64,
    pub plan_id: String,
}

#[derive(Debug, Deserialize)]
struct RawPlanResponse {
    actions: Vec<Value>,
    ttl_ms: i64,
    plan_id: String,
}

pub struct PlannerClient {
    http: reqwest::Client,
    base_url: String,
    next_seq: u64,
}

impl PlannerClient {
    /// Builds the client with a request timeout equal to the default plan
    /// TTL (`spec.md` §5): a hung backend connection fails the request
    /// instead of blocking the tick loop indefinitely.
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(DEFAULT_PLAN_TTL_MS))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            next_seq: 1,
        }
    }

    /// Monotonically increasing request sequence, embedded in the world
    /// state body so the backend can detect stale/replayed requests.
    pub fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    pub async fn request_plan(&self, world_state: Value) -> Result<PlanResponse, PlannerError> {
        let resp = self
            .http
            .post(format!("{}/plan", self.base_url))
            .json(&world_state)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(PlannerError::Status(resp.status()));
        }

        let raw: RawPlanResponse = resp
            .json()
            .await
            .map_err(|e| PlannerError::Schema(e.to_string()))?;

        Ok(PlanResponse {
            actions: raw.actions,
            ttl_ms: raw.ttl_ms,
            plan_id: raw.plan_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_counter_starts_at_one_and_increments() {
        let mut client = PlannerClient::new("http://localhost:8000");
        assert_eq!(client.next_seq(), 1);
        assert_eq!(client.next_seq(), 2);
        assert_eq!(client.next_seq(), 3);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = PlannerClient::new("http://localhost:8000/");
        assert_eq!(client.base_url, "http://localhost:8000");
    }
}
