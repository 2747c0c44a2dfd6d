// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Core aggregated state types, rebuilt each supervisor tick.

use serde::Serialize;

use robosup_protocol::reflex::RangeStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mode {
    Boot,
    Idle,
    Teleop,
    Wander,
    Error,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Boot => "BOOT",
            Mode::Idle => "IDLE",
            Mode::Teleop => "TELEOP",
            Mode::Wander => "WANDER",
            Mode::Error => "ERROR",
        }
    }

    /// Motion commands are only honored in these modes.
    pub fn allows_motion(&self) -> bool {
        matches!(self, Mode::Teleop | Mode::Wander)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DesiredTwist {
    pub v_mm_s: i32,
    pub w_mrad_s: i32,
}

impl DesiredTwist {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Scale both components, truncating toward zero like the reference
    /// implementation's `int(v * scale)`.
    pub fn scaled(&self, scale: f64) -> Self {
        Self {
            v_mm_s: (self.v_mm_s as f64 * scale) as i32,
            w_mrad_s: (self.w_mrad_s as f64 * scale) as i32,
        }
    }
}

/// A single applied speed limitation, kept for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct SpeedCap {
    pub scale: f64,
    pub reason: String,
}

impl SpeedCap {
    pub fn new(scale: f64, reason: impl Into<String>) -> Self {
        Self {
            scale,
            reason: reason.into(),
        }
    }
}

/// Aggregated snapshot of the entire robot state, rebuilt each tick from
/// the latest MCU telemetry, vision, and planner outputs.
#[derive(Debug, Clone, Serialize)]
pub struct RobotState {
    pub mode: Mode,

    pub twist_cmd: DesiredTwist,
    pub twist_capped: DesiredTwist,

    pub speed_l_mm_s: i32,
    pub speed_r_mm_s: i32,
    pub gyro_z_mrad_s: i32,
    pub battery_mv: u32,
    pub fault_flags: u16,
    pub range_mm: u32,
    pub range_status: RangeStatus,
    pub reflex_seq: u8,
    pub reflex_rx_mono_ms: f64,

    pub v_meas_mm_s: f64,
    pub w_meas_mrad_s: f64,

    pub reflex_connected: bool,
    pub face_connected: bool,
    pub personality_enabled: bool,
    pub personality_connected: bool,

    pub face_mood: u8,
    /// `None` encodes the MCU's 0xFF "no gesture playing" sentinel.
    pub face_gesture: Option<u8>,
    pub face_system_mode: u8,
    pub face_touch_active: bool,

    pub personality_last_plan_mono_ms: f64,
    pub personality_last_plan_actions: u32,
    pub personality_last_error: String,

    pub speed_caps: Vec<SpeedCap>,

    /// -1.0 means no vision data yet.
    pub clear_confidence: f64,
    pub ball_confidence: f64,
    pub ball_bearing_deg: f64,
    /// -1.0 means no vision data yet.
    pub vision_age_ms: f64,
    pub vision_fps: f64,

    pub tick_mono_ms: f64,
    pub tick_dt_ms: f64,
}

impl Default for RobotState {
    fn default() -> Self {
        Self {
            mode: Mode::Boot,
            twist_cmd: DesiredTwist::zero(),
            twist_capped: DesiredTwist::zero(),
            speed_l_mm_s: 0,
            speed_r_mm_s: 0,
            gyro_z_mrad_s: 0,
            battery_mv: 0,
            fault_flags: 0,
            range_mm: 0,
            range_status: RangeStatus::NotReady,
            reflex_seq: 0,
            reflex_rx_mono_ms: 0.0,
            v_meas_mm_s: 0.0,
            w_meas_mrad_s: 0.0,
            reflex_connected: false,
            face_connected: false,
            personality_enabled: false,
            personality_connected: false,
            face_mood: 0,
            face_gesture: None,
            face_system_mode: 0,
            face_touch_active: false,
            personality_last_plan_mono_ms: 0.0,
            personality_last_plan_actions: 0,
            personality_last_error: String::new(),
            speed_caps: Vec::new(),
            clear_confidence: -1.0,
            ball_confidence: 0.0,
            ball_bearing_deg: 0.0,
            vision_age_ms: -1.0,
            vision_fps: 0.0,
            tick_mono_ms: 0.0,
            tick_dt_ms: 0.0,
        }
    }
}

impl RobotState {
    pub fn has_fault(&self, bit: u16) -> bool {
        self.fault_flags & bit != 0
    }

    pub fn any_fault(&self) -> bool {
        self.fault_flags != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_twist_truncates_toward_zero() {
        let t = DesiredTwist {
            v_mm_s: 301,
            w_mrad_s: -301,
        };
        let s = t.scaled(0.25);
        assert_eq!(s.v_mm_s, 75);
        assert_eq!(s.w_mrad_s, -75);
    }

    #[test]
    fn default_state_has_no_vision_data() {
        let s = RobotState::default();
        assert_eq!(s.clear_confidence, -1.0);
        assert_eq!(s.vision_age_ms, -1.0);
        assert!(!s.any_fault());
    }
}
