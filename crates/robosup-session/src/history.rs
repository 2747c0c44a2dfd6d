// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Sliding-window conversation context with budget compression. Renders
//! history for transmission to the conversation backend; does not call
//! an LLM itself.

use std::collections::VecDeque;

const RECENT_WINDOW_TURNS: usize = 8;
const CHARS_PER_TOKEN: usize = 4;
const RESPONSE_TOKEN_RESERVE: usize = 512;
const ANCHOR_INTERVAL_TURNS: usize = 5;
const DEFAULT_MAX_TURNS: usize = 20;
const DEFAULT_MAX_CONTEXT_TOKENS: usize = 4096;

const PERSONALITY_ANCHOR: &str = "[Reminder: Buddy is calm (energy 0.40), gently responsive. \
Emotions lean positive. Negative emotions are mild and brief. Stay in character.]";

#[derive(Debug, Clone)]
pub struct HistoryMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Clone)]
struct Turn {
    role: &'static str,
    content: String,
    emotion: String,
}

/// A personality profile snapshot used to render the "CURRENT STATE"
/// system block injected before the latest user turn.
#[derive(Debug, Clone, Default)]
pub struct PersonalityProfile {
    pub mood: String,
    pub intensity: f64,
    pub turn_id: i64,
    pub valence: f64,
    pub memory_tags: Vec<String>,
}

/// Conversation history for a single `/converse` session.
pub struct ConversationHistory {
    messages: VecDeque<Turn>,
    max_messages: usize,
    max_context_tokens: usize,
    profile: Option<PersonalityProfile>,
}

impl ConversationHistory {
    pub fn new(max_turns: usize, max_context_tokens: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(max_turns * 2),
            max_messages: max_turns * 2,
            max_context_tokens,
            profile: None,
        }
    }

    pub fn update_profile(&mut self, profile: PersonalityProfile) {
        self.profile = Some(profile);
    }

    pub fn add_user(&mut self, text: impl Into<String>) {
        self.push(Turn { role: "user", content: text.into(), emotion: String::new() });
    }

    pub fn add_assistant(&mut self, text: impl Into<String>, emotion: impl Into<String>) {
        self.push(Turn { role: "assistant", content: text.into(), emotion: emotion.into() });
    }

    fn push(&mut self, turn: Turn) {
        if self.messages.len() == self.max_messages {
            self.messages.pop_front();
        }
        self.messages.push_back(turn);
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn turn_count(&self) -> usize {
        self.messages.iter().filter(|m| m.role == "user").count()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Render the message array: optional compressed-history summary,
    /// the recent window, the CURRENT STATE block, and a personality
    /// anchor every [`ANCHOR_INTERVAL_TURNS`] user turns — all trimmed
    /// to fit the token budget.
    pub fn to_rendered_messages(&self, system_prompt: &str) -> Vec<HistoryMessage> {
        let all: Vec<&Turn> = self.messages.iter().collect();
        let recent_boundary = RECENT_WINDOW_TURNS * 2;

        let mut msgs = vec![HistoryMessage { role: "system", content: system_prompt.to_string() }];

        if all.len() <= recent_boundary {
            for m in &all {
                msgs.push(HistoryMessage { role: m.role, content: m.content.clone() });
            }
        } else {
            let split = all.len() - recent_boundary;
            let (old, recent) = all.split_at(split);
            let summary = compress_turns(old);
            if !summary.is_empty() {
                msgs.push(HistoryMessage { role: "system", content: summary });
            }
            for m in recent {
                msgs.push(HistoryMessage { role: m.role, content: m.content.clone() });
            }
        }

        if let Some(profile) = &self.profile {
            let block = build_current_state_block(profile);
            let idx = last_user_index(&msgs).unwrap_or(msgs.len());
            msgs.insert(idx, HistoryMessage { role: "system", content: block });
        }

        let turn_count = self.turn_count();
        if turn_count > 0 && turn_count % ANCHOR_INTERVAL_TURNS == 0 {
            let idx = last_user_index(&msgs).unwrap_or(msgs.len());
            msgs.insert(idx, HistoryMessage { role: "system", content: PERSONALITY_ANCHOR.to_string() });
        }

        enforce_token_budget(msgs, self.max_context_tokens)
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS, DEFAULT_MAX_CONTEXT_TOKENS)
    }
}

fn last_user_index(msgs: &[HistoryMessage]) -> Option<usize> {
    msgs.iter().rposition(|m| m.role == "user")
}

fn estimate_tokens(text: &str) -> usize {
    (text.len() / CHARS_PER_TOKEN).max(1)
}

fn enforce_token_budget(mut msgs: Vec<HistoryMessage>, max_context_tokens: usize) -> Vec<HistoryMessage> {
    let budget = max_context_tokens.saturating_sub(RESPONSE_TOKEN_RESERVE);
    while msgs.len() > 1 {
        let total: usize = msgs.iter().map(|m| estimate_tokens(&m.content)).sum();
        if total <= budget {
            break;
        }
        let Some(idx) = msgs.iter().position(|m| m.role != "system") else { break };
        msgs.remove(idx);
    }
    msgs
}

fn compress_turns(messages: &[&Turn]) -> String {
    let mut tuples = Vec::new();
    let mut turn_num = 0;
    for (i, m) in messages.iter().enumerate() {
        if m.role != "user" {
            continue;
        }
        turn_num += 1;
        let topic: String = if m.content.len() > 40 {
            let mut t: String = m.content.chars().take(40).collect();
            t = t.trim_end().to_string();
            t.push_str("...");
            t
        } else {
            m.content.trim_end().to_string()
        };
        let emotion = messages
            .get(i + 1)
            .filter(|next| next.role == "assistant")
            .map(|next| if next.emotion.is_empty() { "neutral".to_string() } else { next.emotion.clone() })
            .unwrap_or_default();
        tuples.push(format!("(turn {turn_num}: {topic}, {emotion})"));
    }
    if tuples.is_empty() {
        String::new()
    } else {
        format!("Earlier conversation: {}", tuples.join(" "))
    }
}

fn build_current_state_block(profile: &PersonalityProfile) -> String {
    let mood = if profile.mood.is_empty() { "neutral" } else { profile.mood.as_str() };

    let arc = if profile.valence > 0.15 {
        "gently positive"
    } else if profile.valence < -0.15 {
        "slightly tense"
    } else {
        "calm and neutral"
    };

    let continuity = match mood {
        "sad" | "scared" | "angry" => "moving toward recovery, gradually lighten",
        "neutral" | "thinking" | "confused" => "Buddy is in a stable, calm state",
        _ => "maintain positive trajectory, don't snap to a different mood",
    };

    let memory_line = if profile.memory_tags.is_empty() {
        String::new()
    } else {
        let readable: Vec<String> =
            profile.memory_tags.iter().take(10).map(|t| t.replace('_', " ")).collect();
        format!("\nKnown about this child: {}.", readable.join(", "))
    };

    format!(
        "CURRENT STATE\nBuddy is feeling {mood} at intensity {:.1}.\nSession turn: {}. Conversation has been {arc}.\nEmotional continuity: {continuity}{memory_line}",
        profile.intensity, profile.turn_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_count_counts_user_turns_only() {
        let mut h = ConversationHistory::default();
        h.add_user("hi");
        h.add_assistant("hello", "happy");
        assert_eq!(h.turn_count(), 1);
    }

    #[test]
    fn small_history_renders_without_compression() {
        let mut h = ConversationHistory::default();
        h.add_user("hello");
        h.add_assistant("hi", "happy");
        let msgs = h.to_rendered_messages("SYS");
        assert_eq!(msgs[0].role, "system");
        assert_eq!(msgs[0].content, "SYS");
        assert!(msgs.iter().any(|m| m.content == "hello"));
    }

    #[test]
    fn overflow_beyond_max_turns_does_not_panic() {
        let mut h = ConversationHistory::new(5, 4096);
        for i in 0..10 {
            h.add_user(format!("question {i}"));
            h.add_assistant(format!("answer {i}"), "happy");
        }
        let msgs = h.to_rendered_messages("SYS");
        assert!(msgs.len() >= 3);
        assert_eq!(msgs[0].role, "system");
    }

    #[test]
    fn compression_kicks_in_beyond_recent_window() {
        let mut h = ConversationHistory::new(20, 4096);
        for i in 0..12 {
            h.add_user(format!("question number {i} about dinosaurs and stuff"));
            h.add_assistant("neat", "curious");
        }
        let msgs = h.to_rendered_messages("SYS");
        assert!(msgs.iter().any(|m| m.content.starts_with("Earlier conversation:")));
    }

    #[test]
    fn personality_anchor_inserted_every_five_turns() {
        let mut h = ConversationHistory::default();
        for i in 0..5 {
            h.add_user(format!("q{i}"));
            h.add_assistant("a", "happy");
        }
        let msgs = h.to_rendered_messages("SYS");
        assert!(msgs.iter().any(|m| m.content.contains("Reminder: Buddy")));
    }

    #[test]
    fn current_state_block_inserted_before_last_user_message() {
        let mut h = ConversationHistory::default();
        h.add_user("hi");
        h.update_profile(PersonalityProfile {
            mood: "curious".into(),
            intensity: 0.4,
            turn_id: 5,
            valence: 0.0,
            memory_tags: vec![],
        });
        let msgs = h.to_rendered_messages("SYS");
        let state_idx = msgs.iter().position(|m| m.content.starts_with("CURRENT STATE")).unwrap();
        let user_idx = msgs.iter().position(|m| m.role == "user").unwrap();
        assert!(state_idx < user_idx);
    }

    #[test]
    fn token_budget_drops_oldest_non_system_messages() {
        let mut h = ConversationHistory::new(20, 200);
        for i in 0..12 {
            h.add_user("x".repeat(200) + &i.to_string());
            h.add_assistant("y".repeat(200), "happy");
        }
        let msgs = h.to_rendered_messages("SYS");
        let total: usize = msgs.iter().map(|m| estimate_tokens(&m.content)).sum();
        assert!(total <= 200 - RESPONSE_TOKEN_RESERVE || msgs.len() == 1);
    }
}
