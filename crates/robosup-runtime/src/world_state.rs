// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Builds the `POST /plan` request body from an aggregated [`RobotState`]
//! snapshot plus whatever triggered this planner request.

use serde_json::{json, Value};

use robosup_events::PlannerEvent;
use robosup_protocol::reflex::fault_names;
use robosup_state::RobotState;

const VISION_STALE_MS: f64 = 500.0;

#[allow(clippy::too_many_arguments)]
pub fn build_world_state(
    robot_id: &str,
    seq: u64,
    monotonic_ts_ms: f64,
    state: &RobotState,
    active_skill: &str,
    recent_events: &[&PlannerEvent],
    trigger: &str,
    face_talking: bool,
    face_listening: bool,
) -> Value {
    let ball_signal_fresh = (0.0..=VISION_STALE_MS).contains(&state.vision_age_ms);
    let ball_detected = ball_signal_fresh && state.ball_confidence > 0.0;

    json!({
        "robot_id": robot_id,
        "seq": seq,
        "monotonic_ts_ms": monotonic_ts_ms,
        "mode": state.mode.as_str(),
        "battery_mv": state.battery_mv,
        "range_mm": state.range_mm,
        "faults": fault_names(state.fault_flags),
        "clear_confidence": state.clear_confidence,
        "ball_detected": ball_detected,
        "ball_confidence": state.ball_confidence,
        "ball_bearing_deg": state.ball_bearing_deg,
        "vision_age_ms": state.vision_age_ms,
        "speed_l_mm_s": state.speed_l_mm_s,
        "speed_r_mm_s": state.speed_r_mm_s,
        "v_capped": state.twist_capped.v_mm_s,
        "w_capped": state.twist_capped.w_mrad_s,
        "planner_active_skill": active_skill,
        "recent_events": recent_events.iter().map(|e| json!({
            "event_type": e.event_type,
            "payload": e.payload,
            "t_mono_ms": e.t_mono_ms,
            "seq": e.seq,
        })).collect::<Vec<_>>(),
        "trigger": trigger,
        "face_talking": face_talking,
        "face_listening": face_listening,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use robosup_state::Mode;

    #[test]
    fn ball_detected_requires_fresh_signal() {
        let mut state = RobotState::default();
        state.mode = Mode::Wander;
        state.ball_confidence = 0.8;
        state.vision_age_ms = 9999.0;
        let ws = build_world_state("r1", 1, 0.0, &state, "patrol_drift", &[], "periodic", false, false);
        assert_eq!(ws["ball_detected"], Value::Bool(false));

        state.vision_age_ms = 10.0;
        let ws = build_world_state("r1", 2, 0.0, &state, "patrol_drift", &[], "periodic", false, false);
        assert_eq!(ws["ball_detected"], Value::Bool(true));
    }

    #[test]
    fn fault_names_are_embedded_as_a_string_array() {
        let mut state = RobotState::default();
        state.fault_flags = 0x0002;
        let ws = build_world_state("r1", 1, 0.0, &state, "patrol_drift", &[], "periodic", false, false);
        assert_eq!(ws["faults"], serde_json::json!(["estop"]));
    }
}
