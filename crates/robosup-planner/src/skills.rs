// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Deterministic `(active_skill, world_state) → desired twist` mapping.
//!
//! Two priority overrides apply before any skill-specific behavior: a
//! close obstacle always backs away, and a fresh, confident ball sighting
//! always turns toward it. Only when neither fires does the active skill
//! pick the twist.

use robosup_protocol::reflex::RangeStatus;
use robosup_state::{DesiredTwist, RobotState};

const OBSTACLE_CLOSE_MM: u32 = 300;
const BALL_MIN_CONF: f64 = 0.5;
const VISION_STALE_MS: f64 = 500.0;

#[derive(Default)]
pub struct SkillExecutor;

impl SkillExecutor {
    pub fn step(&self, state: &RobotState, active_skill: &str) -> DesiredTwist {
        if obstacle_close(state) {
            return DesiredTwist { v_mm_s: -80, w_mrad_s: 300 };
        }

        if let Some(twist) = ball_pursuit(state) {
            return twist;
        }

        match active_skill {
            "patrol_drift" => patrol_drift(state),
            "investigate_ball" => DesiredTwist { v_mm_s: 0, w_mrad_s: 150 },
            "avoid_obstacle" => DesiredTwist { v_mm_s: 40, w_mrad_s: 0 },
            "greet_on_button" => DesiredTwist::zero(),
            "scan_for_target" => DesiredTwist { v_mm_s: 0, w_mrad_s: 100 },
            "approach_until_range" => approach_until_range(state),
            "retreat_and_recover" => DesiredTwist { v_mm_s: -60, w_mrad_s: 0 },
            _ => DesiredTwist::zero(),
        }
    }
}

fn obstacle_close(state: &RobotState) -> bool {
    state.range_status == RangeStatus::Ok && state.range_mm > 0 && state.range_mm < OBSTACLE_CLOSE_MM
}

fn ball_signal_fresh(state: &RobotState) -> bool {
    (0.0..=VISION_STALE_MS).contains(&state.vision_age_ms)
}

fn ball_pursuit(state: &RobotState) -> Option<DesiredTwist> {
    if state.ball_confidence < BALL_MIN_CONF || !ball_signal_fresh(state) {
        return None;
    }
    let w = (state.ball_bearing_deg * 15.0).clamp(-300.0, 300.0) as i32;
    Some(DesiredTwist { v_mm_s: 60, w_mrad_s: w })
}

/// Slow forward drift with a slowly alternating turn, so the robot
/// covers ground without a fixed loop.
fn patrol_drift(state: &RobotState) -> DesiredTwist {
    let half_period_ms = 4000.0;
    let phase = (state.tick_mono_ms / half_period_ms) as i64;
    let w = if phase % 2 == 0 { 120 } else { -120 };
    DesiredTwist { v_mm_s: 80, w_mrad_s: w }
}

/// Close in on whatever the range sensor sees, slowing as it nears the
/// 400mm target standoff distance.
fn approach_until_range(state: &RobotState) -> DesiredTwist {
    if state.range_status == RangeStatus::Ok && state.range_mm > 0 {
        let target_mm = 400i32;
        let v = ((state.range_mm as i32 - target_mm) / 2).clamp(0, 120);
        DesiredTwist { v_mm_s: v, w_mrad_s: 0 }
    } else {
        DesiredTwist { v_mm_s: 80, w_mrad_s: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use robosup_state::Mode;

    fn state(updates: impl FnOnce(&mut RobotState)) -> RobotState {
        let mut s = RobotState::default();
        s.mode = Mode::Wander;
        updates(&mut s);
        s
    }

    #[test]
    fn obstacle_priority_over_ball() {
        let ex = SkillExecutor::default();
        let s = state(|s| {
            s.range_status = RangeStatus::Ok;
            s.range_mm = 200;
            s.ball_confidence = 0.9;
            s.ball_bearing_deg = 0.0;
            s.vision_age_ms = 10.0;
            s.tick_mono_ms = 1000.0;
        });
        let twist = ex.step(&s, "patrol_drift");
        assert!(twist.v_mm_s < 0 || twist.w_mrad_s != 0);
    }

    #[test]
    fn investigate_ball_turns_toward_bearing() {
        let ex = SkillExecutor::default();
        let s = state(|s| {
            s.range_status = RangeStatus::Ok;
            s.range_mm = 900;
            s.ball_confidence = 0.8;
            s.ball_bearing_deg = 20.0;
            s.vision_age_ms = 10.0;
            s.tick_mono_ms = 1000.0;
        });
        let twist = ex.step(&s, "patrol_drift");
        assert!(twist.w_mrad_s > 0);
    }

    #[test]
    fn patrol_drift_when_idle() {
        let ex = SkillExecutor::default();
        let s = state(|s| {
            s.range_status = RangeStatus::Ok;
            s.range_mm = 900;
            s.ball_confidence = 0.0;
            s.tick_mono_ms = 1000.0;
        });
        let twist = ex.step(&s, "patrol_drift");
        assert!(twist.v_mm_s > 0);
        assert!(twist.w_mrad_s.abs() > 0);
    }

    #[test]
    fn approach_until_range_slows_near_target_standoff() {
        let ex = SkillExecutor::default();
        let s = state(|s| {
            s.range_status = RangeStatus::Ok;
            s.range_mm = 420;
        });
        let twist = ex.step(&s, "approach_until_range");
        assert_eq!(twist.v_mm_s, 10);
    }

    #[test]
    fn greet_on_button_stays_stationary() {
        let ex = SkillExecutor::default();
        let s = state(|_| {});
        assert_eq!(ex.step(&s, "greet_on_button"), DesiredTwist::zero());
    }

    #[test]
    fn stale_ball_signal_does_not_trigger_pursuit() {
        let ex = SkillExecutor::default();
        let s = state(|s| {
            s.ball_confidence = 0.9;
            s.ball_bearing_deg = 20.0;
            s.vision_age_ms = 9999.0;
        });
        let twist = ex.step(&s, "patrol_drift");
        assert_eq!(twist.w_mrad_s, 120); // falls through to patrol_drift
    }
}
