// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Closed vocabularies for emotions and gestures, and their mapping onto
//! face-MCU mood/gesture ids.
//!
//! The emotion list adds `confused` to the upstream set: the conversation
//! backend's mood-continuity logic already branches on `"confused"` as a
//! valid mood value, but the face vocabulary never assigned it a slot. It
//! is given the next free mood id here so the two stay in sync.

/// The 13 canonical assistant emotions, in face-mood-id order (0-based).
pub const CANONICAL_EMOTIONS: [&str; 13] = [
    "neutral", "happy", "excited", "curious", "sad", "scared", "angry", "surprised", "sleepy",
    "love", "silly", "thinking", "confused",
];

/// Non-canonical spellings that normalize onto a canonical emotion.
pub const EMOTION_ALIASES: [(&str, &str); 1] = [("tired", "sleepy")];

/// Face-only gestures (play on the face MCU), in gesture-id order.
pub const FACE_GESTURES: [&str; 13] = [
    "blink",
    "wink_l",
    "wink_r",
    "confused",
    "laugh",
    "surprise",
    "heart",
    "x_eyes",
    "sleepy",
    "rage",
    "nod",
    "headshake",
    "wiggle",
];

/// Body gestures (dispatched as short skill-like motion sequences rather
/// than face animations).
pub const BODY_GESTURES: [&str; 3] = ["look_at", "spin", "back_up"];

/// Non-canonical spellings that normalize onto a canonical gesture.
pub const GESTURE_ALIASES: [(&str, &str); 4] = [
    ("head_shake", "headshake"),
    ("head-shake", "headshake"),
    ("xeyes", "x_eyes"),
    ("x-eyes", "x_eyes"),
];

fn lookup_alias<'a>(aliases: &'a [(&str, &str)], name: &str) -> Option<&'a str> {
    aliases
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, canonical)| *canonical)
}

/// Normalize an emotion name: lowercase, resolve aliases, validate against
/// [`CANONICAL_EMOTIONS`]. Returns `None` if it is not a recognized name.
pub fn normalize_emotion_name(name: &str) -> Option<&'static str> {
    let lower = name.to_ascii_lowercase();
    let resolved = lookup_alias(&EMOTION_ALIASES, &lower).unwrap_or(&lower);
    CANONICAL_EMOTIONS
        .iter()
        .find(|&&e| e == resolved)
        .copied()
}

/// Normalize a gesture name against the combined face + body vocabulary.
pub fn normalize_gesture_name(name: &str) -> Option<&'static str> {
    let lower = name.to_ascii_lowercase();
    let resolved = lookup_alias(&GESTURE_ALIASES, &lower).unwrap_or(&lower);
    FACE_GESTURES
        .iter()
        .chain(BODY_GESTURES.iter())
        .find(|&&g| g == resolved)
        .copied()
}

/// Face-MCU mood id for a canonical emotion name (panics on an
/// unrecognized name — callers must normalize first).
pub fn emotion_to_face_mood(emotion: &str) -> u8 {
    CANONICAL_EMOTIONS
        .iter()
        .position(|&e| e == emotion)
        .expect("emotion must be normalized before lookup") as u8
}

/// Face-MCU gesture id for a face gesture name. Returns `None` for body
/// gestures, which have no face-MCU representation.
pub fn gesture_to_face_id(gesture: &str) -> Option<u8> {
    FACE_GESTURES.iter().position(|&g| g == gesture).map(|i| i as u8)
}
