// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Narrow seam the audio layer uses to drive the face MCU, so this crate
//! doesn't need a direct dependency on the serial transport.

use async_trait::async_trait;

#[async_trait]
pub trait FaceSink: Send + Sync {
    /// Report mouth-talking state and lip-sync energy (0-255).
    async fn send_talking(&self, talking: bool, energy: u8);

    /// Display a mood with intensity (0.0-1.0).
    async fn send_state(&self, mood_id: u8, intensity: f64);

    /// Play a one-shot gesture.
    async fn send_gesture(&self, gesture_id: u8);
}
