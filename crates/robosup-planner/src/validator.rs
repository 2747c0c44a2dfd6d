// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Coerce untrusted planner-backend JSON into a bounded, typed action list.

use serde_json::{Map, Value};

use robosup_protocol::expressions::{normalize_emotion_name, normalize_gesture_name};

pub const ALLOWED_SKILLS: [&str; 7] = [
    "patrol_drift",
    "investigate_ball",
    "avoid_obstacle",
    "greet_on_button",
    "scan_for_target",
    "approach_until_range",
    "retreat_and_recover",
];

const ALLOWED_ACTION_KINDS: [&str; 4] = ["say", "emote", "gesture", "skill"];

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Say { text: String },
    Emote { name: &'static str, intensity: f64 },
    Gesture { name: &'static str, params: Map<String, Value> },
    Skill { name: &'static str },
}

#[derive(Debug, Clone, Default)]
pub struct ValidatedPlan {
    pub actions: Vec<Action>,
    pub ttl_ms: i64,
    pub dropped_actions: u32,
}

pub struct PlannerValidator {
    min_ttl_ms: i64,
    max_ttl_ms: i64,
    max_text_len: usize,
}

impl Default for PlannerValidator {
    fn default() -> Self {
        Self {
            min_ttl_ms: 500,
            max_ttl_ms: 5000,
            max_text_len: 200,
        }
    }
}

impl PlannerValidator {
    pub fn validate(&self, actions: &[Value], ttl_ms: Option<i64>) -> ValidatedPlan {
        let ttl_ms = ttl_ms
            .unwrap_or(self.max_ttl_ms)
            .clamp(self.min_ttl_ms, self.max_ttl_ms);

        let mut safe_actions = Vec::new();
        let mut dropped = 0u32;

        for raw in actions {
            let Some(obj) = coerce_legacy_shape(raw) else {
                dropped += 1;
                continue;
            };

            let kind = obj
                .get("action")
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim()
                .to_ascii_lowercase();

            if !ALLOWED_ACTION_KINDS.contains(&kind.as_str()) {
                dropped += 1;
                continue;
            }

            match kind.as_str() {
                "say" => match validate_say(&obj, self.max_text_len) {
                    Some(a) => safe_actions.push(a),
                    None => dropped += 1,
                },
                "emote" => match validate_emote(&obj) {
                    Some(a) => safe_actions.push(a),
                    None => dropped += 1,
                },
                "gesture" => match validate_gesture(&obj) {
                    Some(a) => safe_actions.push(a),
                    None => dropped += 1,
                },
                "skill" => match validate_skill(&obj) {
                    Some(a) => safe_actions.push(a),
                    None => dropped += 1,
                },
                _ => unreachable!(),
            }
        }

        ValidatedPlan {
            actions: safe_actions,
            ttl_ms,
            dropped_actions: dropped,
        }
    }
}

/// Flatten legacy nested shapes into a canonical `{action, ...fields}`
/// object. Two forms are recognized:
/// - `{name: "emote"|"gesture"|"say"|"skill", params: {...}}` — the
///   wrapper's `name` is the real action kind, its `params` holds the
///   real fields.
/// - `{action: "<concrete symbol>"}` where the symbol is a known emotion
///   or gesture name rather than one of the four action kinds — treated
///   as `emote`/`gesture` with that name.
fn coerce_legacy_shape(raw: &Value) -> Option<Map<String, Value>> {
    let obj = raw.as_object()?;

    if let Some(wrapper_name) = obj.get("name").and_then(Value::as_str) {
        let wrapper_name = wrapper_name.trim().to_ascii_lowercase();
        if ALLOWED_ACTION_KINDS.contains(&wrapper_name.as_str()) {
            if let Some(params) = obj.get("params").and_then(Value::as_object) {
                let mut flattened = params.clone();
                flattened.insert("action".to_string(), Value::String(wrapper_name));
                return Some(flattened);
            }
        }
    }

    if let Some(action_val) = obj.get("action").and_then(Value::as_str) {
        let lowered = action_val.trim().to_ascii_lowercase();
        if !ALLOWED_ACTION_KINDS.contains(&lowered.as_str()) {
            let mut reinterpreted = obj.clone();
            if normalize_emotion_name(&lowered).is_some() {
                reinterpreted.insert("action".to_string(), Value::String("emote".to_string()));
                reinterpreted.insert("name".to_string(), Value::String(lowered));
                return Some(reinterpreted);
            }
            if normalize_gesture_name(&lowered).is_some() {
                reinterpreted.insert("action".to_string(), Value::String("gesture".to_string()));
                reinterpreted.insert("name".to_string(), Value::String(lowered));
                return Some(reinterpreted);
            }
        }
    }

    Some(obj.clone())
}

fn validate_say(obj: &Map<String, Value>, max_len: usize) -> Option<Action> {
    let text = obj.get("text").and_then(Value::as_str)?.trim();
    if text.is_empty() {
        return None;
    }
    let truncated: String = text.chars().take(max_len).collect();
    Some(Action::Say { text: truncated })
}

fn validate_emote(obj: &Map<String, Value>) -> Option<Action> {
    let raw_name = obj.get("name").and_then(Value::as_str)?.trim();
    let name = normalize_emotion_name(raw_name)?;
    let intensity = obj
        .get("intensity")
        .and_then(Value::as_f64)
        .unwrap_or(0.7)
        .clamp(0.0, 1.0);
    Some(Action::Emote { name, intensity })
}

fn validate_gesture(obj: &Map<String, Value>) -> Option<Action> {
    let raw_name = obj.get("name").and_then(Value::as_str)?.trim();
    let name = normalize_gesture_name(raw_name)?;
    let mut params = Map::new();
    for (k, v) in obj {
        if k == "action" || k == "name" {
            continue;
        }
        if v.is_number() {
            params.insert(k.clone(), v.clone());
        }
    }
    Some(Action::Gesture { name, params })
}

fn validate_skill(obj: &Map<String, Value>) -> Option<Action> {
    let raw_name = obj.get("name").and_then(Value::as_str)?.trim().to_ascii_lowercase();
    let name = ALLOWED_SKILLS.iter().find(|&&s| s == raw_name)?;
    Some(Action::Skill { name })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ttl_is_clamped_into_bounds() {
        let v = PlannerValidator::default();
        let plan = v.validate(&[], Some(50));
        assert_eq!(plan.ttl_ms, 500);
        let plan = v.validate(&[], Some(99_999));
        assert_eq!(plan.ttl_ms, 5000);
        let plan = v.validate(&[], None);
        assert_eq!(plan.ttl_ms, 5000);
    }

    #[test]
    fn say_is_truncated_and_trimmed() {
        let v = PlannerValidator::default();
        let long = "x".repeat(300);
        let plan = v.validate(&[json!({"action": "say", "text": format!("  {long}  ")})], None);
        assert_eq!(plan.actions.len(), 1);
        match &plan.actions[0] {
            Action::Say { text } => assert_eq!(text.len(), 200),
            _ => panic!("expected Say"),
        }
    }

    #[test]
    fn empty_say_text_is_dropped() {
        let v = PlannerValidator::default();
        let plan = v.validate(&[json!({"action": "say", "text": "   "})], None);
        assert!(plan.actions.is_empty());
        assert_eq!(plan.dropped_actions, 1);
    }

    #[test]
    fn emote_alias_normalizes_and_unknown_is_dropped() {
        let v = PlannerValidator::default();
        let plan = v.validate(
            &[
                json!({"action": "emote", "name": "Tired", "intensity": 5.0}),
                json!({"action": "emote", "name": "ecstatic"}),
            ],
            None,
        );
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.dropped_actions, 1);
        match &plan.actions[0] {
            Action::Emote { name, intensity } => {
                assert_eq!(*name, "sleepy");
                assert_eq!(*intensity, 1.0);
            }
            _ => panic!("expected Emote"),
        }
    }

    #[test]
    fn skill_name_must_be_in_allowed_set() {
        let v = PlannerValidator::default();
        let plan = v.validate(
            &[
                json!({"action": "skill", "name": "patrol_drift"}),
                json!({"action": "skill", "name": "fly_to_moon"}),
            ],
            None,
        );
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.dropped_actions, 1);
    }

    #[test]
    fn legacy_wrapper_shape_is_flattened() {
        let v = PlannerValidator::default();
        let plan = v.validate(
            &[json!({"name": "emote", "params": {"name": "happy", "intensity": 0.5}})],
            None,
        );
        assert_eq!(plan.actions.len(), 1);
        match &plan.actions[0] {
            Action::Emote { name, intensity } => {
                assert_eq!(*name, "happy");
                assert_eq!(*intensity, 0.5);
            }
            _ => panic!("expected Emote"),
        }
    }

    #[test]
    fn bare_emotion_symbol_in_action_field_is_reinterpreted() {
        let v = PlannerValidator::default();
        let plan = v.validate(&[json!({"action": "happy"})], None);
        assert_eq!(plan.actions.len(), 1);
        assert!(matches!(plan.actions[0], Action::Emote { name: "happy", .. }));
    }

    #[test]
    fn non_object_items_are_dropped() {
        let v = PlannerValidator::default();
        let plan = v.validate(&[json!("not an object"), json!(42)], None);
        assert_eq!(plan.dropped_actions, 2);
    }
}
