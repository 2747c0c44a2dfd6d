// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! TTL/cooldown/face-lock enforcement between validation and dispatch.

use std::collections::{HashMap, VecDeque};

use crate::validator::{Action, ValidatedPlan};

struct QueuedAction {
    action: Action,
    expires_mono_ms: f64,
}

fn action_kind(action: &Action) -> &'static str {
    match action {
        Action::Say { .. } => "say",
        Action::Emote { .. } => "emote",
        Action::Gesture { .. } => "gesture",
        Action::Skill { .. } => "skill",
    }
}

fn action_key(action: &Action) -> Option<String> {
    match action {
        Action::Say { text } => {
            let t = text.trim().to_ascii_lowercase();
            (!t.is_empty()).then(|| format!("say:{t}"))
        }
        Action::Emote { name, .. } => Some(format!("emote:{name}")),
        Action::Gesture { name, .. } => Some(format!("gesture:{name}")),
        Action::Skill { name } => Some(format!("skill:{name}")),
    }
}

fn cooldown_type_ms(kind: &str) -> f64 {
    match kind {
        "say" => 3000.0,
        "emote" => 600.0,
        "gesture" => 800.0,
        "skill" => 500.0,
        _ => 0.0,
    }
}

fn cooldown_key_ms(kind: &str) -> f64 {
    match kind {
        "say" => 12000.0,
        "emote" => 1800.0,
        "gesture" => 2000.0,
        "skill" => 500.0,
        _ => 0.0,
    }
}

pub struct PlannerScheduler {
    queue: VecDeque<QueuedAction>,
    last_action_type_ms: HashMap<&'static str, f64>,
    last_action_key_ms: HashMap<String, f64>,
    pub plan_dropped_stale: u64,
    pub plan_dropped_cooldown: u64,
    pub active_skill: &'static str,
}

impl Default for PlannerScheduler {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            last_action_type_ms: HashMap::new(),
            last_action_key_ms: HashMap::new(),
            plan_dropped_stale: 0,
            plan_dropped_cooldown: 0,
            active_skill: "patrol_drift",
        }
    }
}

impl PlannerScheduler {
    pub fn schedule_plan(&mut self, plan: ValidatedPlan, now_mono_ms: f64, issued_mono_ms: f64) {
        if now_mono_ms - issued_mono_ms > plan.ttl_ms as f64 {
            self.plan_dropped_stale += 1;
            return;
        }

        let expires_at = issued_mono_ms + plan.ttl_ms as f64;
        for action in plan.actions {
            let kind = action_kind(&action);
            if self.on_cooldown(&action, kind, now_mono_ms) {
                self.plan_dropped_cooldown += 1;
                continue;
            }
            self.mark_action(&action, kind, now_mono_ms);

            if let Action::Skill { name } = action {
                self.active_skill = name;
                continue;
            }

            self.queue.push_back(QueuedAction {
                action,
                expires_mono_ms: expires_at,
            });
        }
    }

    pub fn pop_due_actions(&mut self, now_mono_ms: f64, face_locked: bool) -> Vec<Action> {
        let mut due = Vec::new();
        while let Some(item) = self.queue.pop_front() {
            if item.expires_mono_ms < now_mono_ms {
                self.plan_dropped_stale += 1;
                continue;
            }
            let kind = action_kind(&item.action);
            if face_locked && matches!(kind, "emote" | "gesture") {
                self.plan_dropped_cooldown += 1;
                continue;
            }
            due.push(item.action);
        }
        due
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    fn on_cooldown(&self, action: &Action, kind: &'static str, now_mono_ms: f64) -> bool {
        let type_cd = cooldown_type_ms(kind);
        let last_type = *self.last_action_type_ms.get(kind).unwrap_or(&f64::NEG_INFINITY);
        if now_mono_ms - last_type < type_cd {
            return true;
        }

        if let Some(key) = action_key(action) {
            let key_cd = cooldown_key_ms(kind);
            let last_key = *self.last_action_key_ms.get(&key).unwrap_or(&f64::NEG_INFINITY);
            if now_mono_ms - last_key < key_cd {
                return true;
            }
        }
        false
    }

    fn mark_action(&mut self, action: &Action, kind: &'static str, now_mono_ms: f64) {
        self.last_action_type_ms.insert(kind, now_mono_ms);
        if let Some(key) = action_key(action) {
            self.last_action_key_ms.insert(key, now_mono_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(actions: Vec<Action>, ttl_ms: i64) -> ValidatedPlan {
        ValidatedPlan {
            actions,
            ttl_ms,
            dropped_actions: 0,
        }
    }

    #[test]
    fn stale_plan_is_dropped_wholesale() {
        let mut sched = PlannerScheduler::default();
        sched.schedule_plan(plan(vec![Action::Say { text: "hi".into() }], 500), 10_000.0, 0.0);
        assert_eq!(sched.plan_dropped_stale, 1);
        assert_eq!(sched.queue_depth(), 0);
    }

    #[test]
    fn skill_action_updates_active_skill_without_enqueuing() {
        let mut sched = PlannerScheduler::default();
        sched.schedule_plan(plan(vec![Action::Skill { name: "investigate_ball" }], 1000), 0.0, 0.0);
        assert_eq!(sched.active_skill, "investigate_ball");
        assert_eq!(sched.queue_depth(), 0);
    }

    #[test]
    fn per_key_cooldown_blocks_repeated_identical_say() {
        let mut sched = PlannerScheduler::default();
        sched.schedule_plan(plan(vec![Action::Say { text: "hello".into() }], 5000), 0.0, 0.0);
        sched.schedule_plan(plan(vec![Action::Say { text: "hello".into() }], 5000), 3500.0, 3500.0);
        assert_eq!(sched.plan_dropped_cooldown, 1);
        assert_eq!(sched.queue_depth(), 1);
    }

    #[test]
    fn per_type_cooldown_blocks_even_distinct_key() {
        let mut sched = PlannerScheduler::default();
        sched.schedule_plan(plan(vec![Action::Say { text: "a".into() }], 5000), 0.0, 0.0);
        sched.schedule_plan(plan(vec![Action::Say { text: "b".into() }], 5000), 1000.0, 1000.0);
        assert_eq!(sched.plan_dropped_cooldown, 1);
    }

    #[test]
    fn face_lock_suppresses_emote_and_gesture_but_not_say() {
        let mut sched = PlannerScheduler::default();
        sched.schedule_plan(
            plan(
                vec![
                    Action::Say { text: "hi".into() },
                    Action::Emote { name: "happy", intensity: 1.0 },
                ],
                5000,
            ),
            0.0,
            0.0,
        );
        let due = sched.pop_due_actions(100.0, true);
        assert_eq!(due.len(), 1);
        assert!(matches!(due[0], Action::Say { .. }));
        assert_eq!(sched.plan_dropped_cooldown, 1);
    }

    #[test]
    fn expired_queued_action_is_dropped_on_pop() {
        let mut sched = PlannerScheduler::default();
        sched.schedule_plan(plan(vec![Action::Say { text: "hi".into() }], 500), 0.0, 0.0);
        let due = sched.pop_due_actions(10_000.0, false);
        assert!(due.is_empty());
        assert_eq!(sched.plan_dropped_stale, 1);
    }
}
