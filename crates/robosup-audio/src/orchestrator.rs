// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Owns the speaker for short, event-driven planner speech clips and
//! arbitrates with the PTT conversation path so the two never mix.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::face_sink::FaceSink;
use crate::lip_sync::LipSyncTracker;

pub const SAMPLE_RATE: u32 = 16000;
pub const CHANNELS: u32 = 1;
pub const PLANNER_SPEECH_QUEUE_MAX: usize = 5;
pub const PLAYBACK_CHUNK_QUEUE_MAX: usize = 512;
const STREAM_CHUNK_BYTES: usize = 320;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("aplay not found on PATH")]
    PlayerMissing,
    #[error("tts backend error: {0}")]
    Backend(#[from] reqwest::Error),
    #[error("tts backend returned status {0}")]
    BadStatus(reqwest::StatusCode),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
struct SpeechRequest {
    text: String,
    emotion: String,
}

/// Arbitrates speaker access between short planner-driven TTS clips and a
/// longer-lived PTT conversation session. Enabling PTT always wins: it
/// preempts in-flight planner speech and holds the speaker until disabled.
pub struct AudioOrchestrator {
    planner_url: String,
    robot_id: String,
    speaker_device: String,
    http: reqwest::Client,
    face: Arc<dyn FaceSink>,

    speech_tx: mpsc::Sender<SpeechRequest>,
    speech_rx: Mutex<Option<mpsc::Receiver<SpeechRequest>>>,
    cancel: Arc<AtomicBool>,
    planner_speaking: Arc<AtomicBool>,
    conversation_active: Arc<AtomicBool>,
    seq: Arc<Mutex<u64>>,
}

impl AudioOrchestrator {
    pub fn new(
        planner_url: impl Into<String>,
        robot_id: impl Into<String>,
        speaker_device: impl Into<String>,
        face: Arc<dyn FaceSink>,
        conversation_active: Arc<AtomicBool>,
    ) -> Self {
        let (speech_tx, speech_rx) = mpsc::channel(PLANNER_SPEECH_QUEUE_MAX);
        Self {
            planner_url: planner_url.into().trim_end_matches('/').to_string(),
            robot_id: robot_id.into(),
            speaker_device: speaker_device.into(),
            http: reqwest::Client::new(),
            face,
            speech_tx,
            speech_rx: Mutex::new(Some(speech_rx)),
            cancel: Arc::new(AtomicBool::new(false)),
            planner_speaking: Arc::new(AtomicBool::new(false)),
            conversation_active,
            seq: Arc::new(Mutex::new(0)),
        }
    }

    pub fn speaking(&self) -> bool {
        self.planner_speaking.load(Ordering::SeqCst)
    }

    pub fn speech_queue_depth(&self) -> usize {
        PLANNER_SPEECH_QUEUE_MAX - self.speech_tx.capacity()
    }

    /// Push a speech request into the bounded queue. Returns `false` on
    /// overflow — the caller sees backpressure rather than blocking.
    pub fn enqueue_speech(&self, text: &str, emotion: &str) -> bool {
        let clean = text.trim();
        if clean.is_empty() {
            return false;
        }
        let req = SpeechRequest {
            text: clean.chars().take(200).collect(),
            emotion: if emotion.is_empty() { "neutral".to_string() } else { emotion.to_string() },
        };
        self.speech_tx.try_send(req).is_ok()
    }

    /// Cancel any active or queued planner speech and restore the face's
    /// idle state. Does not affect the conversation path.
    pub async fn cancel_planner_speech(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.planner_speaking.store(false, Ordering::SeqCst);
        self.face.send_talking(false, 0).await;
    }

    /// Run the planner-speech consumer loop forever. Spawn this as a
    /// background task from the runtime.
    pub async fn run(&self) {
        let mut rx = match self.speech_rx.lock().await.take() {
            Some(rx) => rx,
            None => return,
        };
        while let Some(req) = rx.recv().await {
            self.cancel.store(false, Ordering::SeqCst);
            if let Err(e) = self.play_tts_request(&req).await {
                warn!(error = %e, "planner speech failed");
            }
        }
    }

    async fn play_tts_request(&self, req: &SpeechRequest) -> Result<(), OrchestratorError> {
        if self.conversation_active.load(Ordering::SeqCst) {
            debug!("planner speech dropped: conversation is active");
            return Ok(());
        }
        if which_aplay().is_none() {
            return Err(OrchestratorError::PlayerMissing);
        }

        let mut child = spawn_aplay(&self.speaker_device)?;
        let mut stdin = child.stdin.take().expect("aplay stdin piped");
        self.planner_speaking.store(true, Ordering::SeqCst);
        self.face.send_talking(true, 0).await;

        let seq = {
            let mut s = self.seq.lock().await;
            let v = *s;
            *s += 1;
            v
        };

        let result = self.stream_and_play(req, seq, &mut stdin, &mut child).await;

        let _ = stdin.shutdown().await;
        let _ = child.kill().await;
        self.planner_speaking.store(false, Ordering::SeqCst);
        self.cancel.store(false, Ordering::SeqCst);
        self.face.send_talking(false, 0).await;
        result
    }

    async fn stream_and_play(
        &self,
        req: &SpeechRequest,
        seq: u64,
        stdin: &mut tokio::process::ChildStdin,
        _child: &mut Child,
    ) -> Result<(), OrchestratorError> {
        let resp = self
            .http
            .post(format!("{}/tts", self.planner_url))
            .json(&serde_json::json!({
                "text": req.text,
                "emotion": req.emotion,
                "stream": true,
                "robot_id": self.robot_id,
                "seq": seq,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(OrchestratorError::BadStatus(resp.status()));
        }

        let mut lip_sync = LipSyncTracker::default();
        let mut stream = resp.bytes_stream();
        let mut carry: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            if self.cancel.load(Ordering::SeqCst) {
                break;
            }
            carry.extend_from_slice(&chunk?);
            while carry.len() >= STREAM_CHUNK_BYTES {
                let piece: Vec<u8> = carry.drain(..STREAM_CHUNK_BYTES).collect();
                stdin.write_all(&piece).await?;
                let energy = lip_sync.update_chunk(&piece);
                self.face.send_talking(true, energy).await;
            }
        }
        if !carry.is_empty() && !self.cancel.load(Ordering::SeqCst) {
            stdin.write_all(&carry).await?;
        }
        Ok(())
    }
}

fn which_aplay() -> Option<std::path::PathBuf> {
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|p| p.join("aplay"))
            .find(|p| p.is_file())
    })
}

fn spawn_aplay(device: &str) -> Result<Child, std::io::Error> {
    Command::new("aplay")
        .args([
            "-q",
            "-D",
            device,
            "--buffer-time=20000",
            "--period-time=10000",
            "-c",
            &CHANNELS.to_string(),
            "-r",
            &SAMPLE_RATE.to_string(),
            "-f",
            "S16_LE",
            "-t",
            "raw",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullFace;

    #[async_trait::async_trait]
    impl FaceSink for NullFace {
        async fn send_talking(&self, _talking: bool, _energy: u8) {}
        async fn send_state(&self, _mood_id: u8, _intensity: f64) {}
        async fn send_gesture(&self, _gesture_id: u8) {}
    }

    #[test]
    fn enqueue_speech_rejects_empty_text() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let orch = AudioOrchestrator::new(
                "http://localhost",
                "r1",
                "default",
                Arc::new(NullFace),
                Arc::new(AtomicBool::new(false)),
            );
            assert!(!orch.enqueue_speech("   ", "neutral"));
            assert!(orch.enqueue_speech("hello", ""));
        });
    }

    #[test]
    fn queue_overflow_returns_false() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let orch = AudioOrchestrator::new(
                "http://localhost",
                "r1",
                "default",
                Arc::new(NullFace),
                Arc::new(AtomicBool::new(false)),
            );
            for _ in 0..PLANNER_SPEECH_QUEUE_MAX {
                assert!(orch.enqueue_speech("hi", "neutral"));
            }
            assert!(!orch.enqueue_speech("overflow", "neutral"));
        });
    }
}
