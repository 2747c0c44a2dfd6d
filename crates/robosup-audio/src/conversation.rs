// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! WebSocket bridge between the `/converse` backend and the local USB
//! mic/speaker pair and face MCU. Owns push-to-talk capture and the
//! streamed-reply playback path; preempts planner speech for the
//! duration of a session.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use robosup_protocol::expressions::{
    emotion_to_face_mood, gesture_to_face_id, normalize_emotion_name, normalize_gesture_name,
};
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::face_sink::FaceSink;
use crate::lip_sync::LipSyncTracker;

pub const SAMPLE_RATE: u32 = 16000;
pub const CHANNELS: u32 = 1;
const CHUNK_MS: u32 = 10;
const CHUNK_BYTES: usize = (SAMPLE_RATE as usize * 2 * CHUNK_MS as usize) / 1000;
const RECONNECT_BACKOFF: Duration = Duration::from_millis(1500);

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

struct Shared {
    server_url: String,
    robot_id: String,
    face: Arc<dyn FaceSink>,
    speaker_device: String,
    mic_device: String,
    conversation_active: Arc<AtomicBool>,

    run: AtomicBool,
    connected: AtomicBool,
    ptt_enabled: AtomicBool,
    speaking: AtomicBool,
    logged_missing_aplay: AtomicBool,
    logged_missing_arecord: AtomicBool,
    session_seq: Mutex<u64>,
    last_face: Mutex<Option<(u8, f64)>>,
    ws_sink: Mutex<Option<WsSink>>,
    speaker_proc: Mutex<Option<Child>>,
    mic_task: Mutex<Option<JoinHandle<()>>>,
    memory_tags_tx: mpsc::UnboundedSender<Vec<String>>,
}

/// Bridges a single `/converse` session to local audio and the face MCU.
pub struct ConversationManager {
    shared: Arc<Shared>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConversationManager {
    /// Returns the manager plus a channel yielding each `memory_tags`
    /// batch the backend reports during the session, so the caller can
    /// feed them into a local [`MemoryStore`]-like sink without this
    /// crate depending on one.
    ///
    /// [`MemoryStore`]: https://docs.rs/robosup-memory
    pub fn new(
        server_url: impl Into<String>,
        robot_id: impl Into<String>,
        face: Arc<dyn FaceSink>,
        speaker_device: impl Into<String>,
        mic_device: impl Into<String>,
        conversation_active: Arc<AtomicBool>,
    ) -> (Self, mpsc::UnboundedReceiver<Vec<String>>) {
        let (memory_tags_tx, memory_tags_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            server_url: server_url.into().trim_end_matches('/').to_string(),
            robot_id: robot_id.into(),
            face,
            speaker_device: speaker_device.into(),
            mic_device: mic_device.into(),
            conversation_active,
            run: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            ptt_enabled: AtomicBool::new(false),
            speaking: AtomicBool::new(false),
            logged_missing_aplay: AtomicBool::new(false),
            logged_missing_arecord: AtomicBool::new(false),
            session_seq: Mutex::new(0),
            last_face: Mutex::new(None),
            ws_sink: Mutex::new(None),
            speaker_proc: Mutex::new(None),
            mic_task: Mutex::new(None),
            memory_tags_tx,
        });
        (
            Self { shared, reconnect_task: Mutex::new(None), receive_task: Mutex::new(None) },
            memory_tags_rx,
        )
    }

    pub fn connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn speaking(&self) -> bool {
        self.shared.speaking.load(Ordering::SeqCst)
    }

    /// Begin background connection management. Idempotent.
    pub async fn start(self: &Arc<Self>) {
        if self.shared.run.swap(true, Ordering::SeqCst) {
            return;
        }
        let mgr = Arc::clone(self);
        let mut guard = self.reconnect_task.lock().await;
        *guard = Some(tokio::spawn(async move { mgr.connection_loop().await }));
    }

    pub async fn stop(&self) {
        self.shared.run.store(false, Ordering::SeqCst);
        self.shared.connected.store(false, Ordering::SeqCst);
        self.set_ptt_enabled(false).await;

        if let Some(h) = self.reconnect_task.lock().await.take() {
            h.abort();
        }
        if let Some(h) = self.receive_task.lock().await.take() {
            h.abort();
        }
        self.stop_talking(false).await;
        self.stop_speaker_playback().await;

        if let Some(mut sink) = self.shared.ws_sink.lock().await.take() {
            let _ = sink.close().await;
        }
        info!("conversation disconnected");
    }

    /// Toggle local USB mic capture and streaming to the backend.
    pub async fn set_ptt_enabled(&self, enabled: bool) {
        if self.shared.ptt_enabled.swap(enabled, Ordering::SeqCst) == enabled {
            return;
        }
        self.shared.conversation_active.store(enabled, Ordering::SeqCst);
        if enabled {
            self.start_mic_capture().await;
        } else {
            self.stop_mic_capture(true).await;
        }
    }

    pub async fn send_text(&self, text: &str) {
        self.send_json(json!({"type": "text", "text": text})).await;
    }

    pub async fn send_audio_chunk(&self, pcm_chunk: &[u8]) {
        let encoded = BASE64.encode(pcm_chunk);
        self.send_json(json!({"type": "audio", "data": encoded})).await;
    }

    pub async fn end_utterance(&self) {
        self.send_json(json!({"type": "end_utterance"})).await;
    }

    pub async fn cancel(&self) {
        self.send_json(json!({"type": "cancel"})).await;
        self.stop_talking(false).await;
    }

    async fn send_json(&self, value: Value) {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return;
        }
        let mut guard = self.shared.ws_sink.lock().await;
        if let Some(sink) = guard.as_mut() {
            if sink.send(Message::Text(value.to_string())).await.is_err() {
                drop(guard);
                self.mark_disconnected("send").await;
            }
        }
    }

    // -- connection lifecycle ------------------------------------------

    async fn connection_loop(self: Arc<Self>) {
        while self.shared.run.load(Ordering::SeqCst) {
            if !self.shared.connected.load(Ordering::SeqCst) {
                self.connect_once().await;
                if !self.shared.connected.load(Ordering::SeqCst) {
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                    continue;
                }
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    async fn connect_once(self: &Arc<Self>) {
        let ws_url = self
            .shared
            .server_url
            .replacen("http://", "ws://", 1)
            .replacen("https://", "wss://", 1);

        let seq = {
            let mut s = self.shared.session_seq.lock().await;
            let v = *s;
            *s += 1;
            v
        };
        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let url = format!(
            "{ws_url}/converse?robot_id={}&session_seq={seq}&session_monotonic_ts_ms={now_ms}",
            urlencoding_light(&self.shared.robot_id)
        );

        match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, _)) => {
                let (sink, stream) = stream.split();
                *self.shared.ws_sink.lock().await = Some(sink);
                self.shared.connected.store(true, Ordering::SeqCst);

                let mgr = Arc::clone(self);
                let mut guard = self.receive_task.lock().await;
                *guard = Some(tokio::spawn(async move { mgr.receive_loop(stream).await }));
                drop(guard);

                if self.shared.ptt_enabled.load(Ordering::SeqCst) {
                    self.start_mic_capture().await;
                }
                info!(url = %ws_url, robot_id = %self.shared.robot_id, "conversation connected");
            }
            Err(e) => {
                self.shared.connected.store(false, Ordering::SeqCst);
                warn!(error = %e, "conversation connect failed");
            }
        }
    }

    async fn mark_disconnected(&self, reason: &str) {
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            warn!(reason, "conversation disconnected");
        }
        if self.shared.speaking.load(Ordering::SeqCst) {
            self.stop_talking(false).await;
        }
    }

    // -- server receive --------------------------------------------------

    async fn receive_loop(
        self: Arc<Self>,
        mut stream: futures_util::stream::SplitStream<
            tokio_tungstenite::WebSocketStream<
                tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
            >,
        >,
    ) {
        while let Some(msg) = stream.next().await {
            let text = match msg {
                Ok(Message::Text(t)) => t,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(_) => break,
            };
            let parsed: Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let msg_type = parsed.get("type").and_then(Value::as_str).unwrap_or("");
            match msg_type {
                "emotion" => self.handle_emotion(&parsed).await,
                "gestures" => self.handle_gestures(&parsed).await,
                "audio" => self.handle_audio(&parsed).await,
                "transcription" => {
                    let t = parsed.get("text").and_then(Value::as_str).unwrap_or("");
                    debug!(text = %t.chars().take(120).collect::<String>(), "user said");
                }
                "done" => self.stop_talking(true).await,
                "listening" => {}
                "memory_tags" => self.handle_memory_tags(&parsed),
                "error" => {
                    let m = parsed.get("message").and_then(Value::as_str).unwrap_or("");
                    warn!(message = %m, "conversation backend error");
                    self.show_thinking_face().await;
                    self.stop_talking(false).await;
                }
                _ => {}
            }
        }
        self.mark_disconnected("receive_done").await;
    }

    async fn handle_emotion(&self, msg: &Value) {
        let raw = msg.get("emotion").and_then(Value::as_str).unwrap_or("neutral");
        let intensity = msg.get("intensity").and_then(Value::as_f64).unwrap_or(0.5);
        let emotion = normalize_emotion_name(raw).unwrap_or("neutral");
        let mood_id = emotion_to_face_mood(emotion);
        *self.shared.last_face.lock().await = Some((mood_id, intensity));
        self.shared.face.send_state(mood_id, intensity).await;
        debug!(emotion, intensity, mood_id, "emotion");
    }

    async fn show_thinking_face(&self) {
        let Some(thinking) = normalize_emotion_name("thinking") else { return };
        let mood_id = emotion_to_face_mood(thinking);
        self.shared.face.send_state(mood_id, 0.7).await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        if let Some((mood, intensity)) = *self.shared.last_face.lock().await {
            self.shared.face.send_state(mood, intensity).await;
        }
    }

    fn handle_memory_tags(&self, msg: &Value) {
        let Some(tags) = msg.get("tags").and_then(Value::as_array) else { return };
        let tags: Vec<String> = tags.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
        if !tags.is_empty() {
            let _ = self.shared.memory_tags_tx.send(tags);
        }
    }

    async fn handle_gestures(&self, msg: &Value) {
        let Some(names) = msg.get("names").and_then(Value::as_array) else { return };
        for raw in names {
            let Some(name) = raw.as_str() else { continue };
            let Some(normalized) = normalize_gesture_name(name) else { continue };
            if let Some(gesture_id) = gesture_to_face_id(normalized) {
                self.shared.face.send_gesture(gesture_id).await;
            }
        }
    }

    async fn handle_audio(&self, msg: &Value) {
        if !self.ensure_speaker_proc().await {
            return;
        }
        let Some(data) = msg.get("data").and_then(Value::as_str) else { return };
        if data.is_empty() {
            return;
        }
        let Ok(pcm) = BASE64.decode(data) else { return };
        if pcm.is_empty() {
            return;
        }

        if !self.shared.speaking.swap(true, Ordering::SeqCst) {
            self.shared.face.send_talking(true, 128).await;
        }

        let mut proc = self.shared.speaker_proc.lock().await;
        let Some(child) = proc.as_mut() else { return };
        let Some(stdin) = child.stdin.as_mut() else { return };
        use tokio::io::AsyncWriteExt;

        for chunk in pcm.chunks(CHUNK_BYTES) {
            let mut sub = chunk;
            if sub.len() % 2 == 1 {
                sub = &sub[..sub.len() - 1];
            }
            if sub.is_empty() {
                continue;
            }
            if stdin.write_all(sub).await.is_err() {
                break;
            }
        }
    }

    async fn stop_talking(&self, drain: bool) {
        if !self.shared.speaking.swap(false, Ordering::SeqCst) {
            return;
        }
        if drain {
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        self.shared.face.send_talking(false, 0).await;
    }

    // -- local speaker playback -------------------------------------------

    async fn ensure_speaker_proc(&self) -> bool {
        {
            let mut guard = self.shared.speaker_proc.lock().await;
            if let Some(child) = guard.as_mut() {
                if matches!(child.try_wait(), Ok(None)) {
                    return true;
                }
            }
        }
        if which("aplay").is_none() {
            if !self.shared.logged_missing_aplay.swap(true, Ordering::SeqCst) {
                warn!("aplay not found; local speaker playback disabled");
            }
            return false;
        }

        let spawned = Command::new("aplay")
            .args([
                "-q",
                "-D",
                &self.shared.speaker_device,
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
            .spawn();

        match spawned {
            Ok(child) => {
                *self.shared.speaker_proc.lock().await = Some(child);
                info!(device = %self.shared.speaker_device, "speaker playback started");
                true
            }
            Err(e) => {
                warn!(error = %e, device = %self.shared.speaker_device, "failed to start aplay");
                false
            }
        }
    }

    async fn stop_speaker_playback(&self) {
        let Some(mut child) = self.shared.speaker_proc.lock().await.take() else { return };
        if let Some(stdin) = child.stdin.take() {
            drop(stdin);
        }
        let _ = tokio::time::timeout(Duration::from_millis(600), child.wait()).await;
        let _ = child.kill().await;
    }

    // -- local mic capture --------------------------------------------------

    async fn start_mic_capture(&self) {
        if !self.shared.run.load(Ordering::SeqCst) {
            return;
        }
        if !self.shared.connected.load(Ordering::SeqCst) {
            info!("PTT enabled but /converse is not connected yet");
            return;
        }
        {
            let guard = self.shared.mic_task.lock().await;
            if guard.as_ref().is_some_and(|h| !h.is_finished()) {
                return;
            }
        }
        if which("arecord").is_none() {
            if !self.shared.logged_missing_arecord.swap(true, Ordering::SeqCst) {
                warn!("arecord not found; local USB mic capture disabled");
            }
            return;
        }

        let spawned = Command::new("arecord")
            .args([
                "-q",
                "-D",
                &self.shared.mic_device,
                "-c",
                &CHANNELS.to_string(),
                "-r",
                &SAMPLE_RATE.to_string(),
                "-f",
                "S16_LE",
                "-t",
                "raw",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn();

        let mut child = match spawned {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, device = %self.shared.mic_device, "failed to start arecord");
                return;
            }
        };
        let Some(mut stdout) = child.stdout.take() else { return };

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; CHUNK_BYTES];
            loop {
                if !shared.run.load(Ordering::SeqCst)
                    || !shared.ptt_enabled.load(Ordering::SeqCst)
                    || !shared.connected.load(Ordering::SeqCst)
                {
                    break;
                }
                let n = match stdout.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let mut chunk = &buf[..n];
                if chunk.len() % 2 == 1 {
                    chunk = &chunk[..chunk.len() - 1];
                }
                if chunk.is_empty() {
                    continue;
                }
                let encoded = BASE64.encode(chunk);
                let mut guard = shared.ws_sink.lock().await;
                if let Some(sink) = guard.as_mut() {
                    let payload = json!({"type": "audio", "data": encoded}).to_string();
                    if sink.send(Message::Text(payload)).await.is_err() {
                        break;
                    }
                }
            }
            let _ = child.kill().await;
        });
        *self.shared.mic_task.lock().await = Some(handle);
        info!(device = %self.shared.mic_device, "PTT mic capture started");
    }

    async fn stop_mic_capture(&self, send_end_utterance: bool) {
        if let Some(h) = self.shared.mic_task.lock().await.take() {
            h.abort();
        }
        if send_end_utterance {
            self.end_utterance().await;
        }
    }
}

fn which(bin: &str) -> Option<std::path::PathBuf> {
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths).map(|p| p.join(bin)).find(|p| p.is_file())
    })
}

fn urlencoding_light(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
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
    fn urlencoding_light_escapes_reserved_chars() {
        assert_eq!(urlencoding_light("robot 1/a"), "robot+1%2Fa");
    }

    #[tokio::test]
    async fn set_ptt_enabled_is_idempotent_when_unchanged() {
        let (mgr, _tags_rx) = ConversationManager::new(
            "http://localhost:9000",
            "robot-1",
            Arc::new(NullFace),
            "default",
            "default",
            Arc::new(AtomicBool::new(false)),
        );
        assert!(!mgr.shared.ptt_enabled.load(Ordering::SeqCst));
        // Disabling while already disabled must not touch conversation_active.
        mgr.set_ptt_enabled(false).await;
        assert!(!mgr.shared.conversation_active.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn memory_tags_message_is_forwarded_on_the_channel() {
        let (mgr, mut tags_rx) = ConversationManager::new(
            "http://localhost:9000",
            "robot-1",
            Arc::new(NullFace),
            "default",
            "default",
            Arc::new(AtomicBool::new(false)),
        );
        mgr.handle_memory_tags(&serde_json::json!({"tags": ["likes_music", "topic_space"]}));
        let tags = tags_rx.try_recv().unwrap();
        assert_eq!(tags, vec!["likes_music", "topic_space"]);
    }
}
