// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The 50 Hz supervisor tick: read telemetry, aggregate state, run the
//! active skill, apply the safety pipeline, transmit the capped twist,
//! and dispatch whatever the planner scheduled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use robosup_audio::{AudioOrchestrator, ConversationManager, FaceSink};
use robosup_config::Config;
use robosup_events::PlannerEventBus;
use robosup_memory::MemoryStore;
use robosup_planner::{PlannerScheduler, PlannerValidator, SkillExecutor};
use robosup_protocol::face::ButtonEventKind;
use robosup_protocol::reflex::RangeStatus;
use robosup_state::{apply_safety, Mode, RobotState};
use robosup_transport::LinkEvent;

use crate::face_link::{FaceLink, FaceTelemetry};
use crate::planner_client::PlannerClient;
use crate::reflex_link::ReflexLink;
use crate::world_state::build_world_state;

const TICK_PERIOD: Duration = Duration::from_millis(20);
/// Poll the planner backend about once per plan TTL (`spec.md` §2 "Control
/// flow"), not on a fixed tick-unrelated cadence.
const PLANNER_REQUEST_PERIOD_MS: f64 = crate::DEFAULT_PLAN_TTL_MS as f64;
const MEMORY_SAVE_PERIOD_MS: f64 = 30_000.0;
const RECENT_EVENTS_FOR_PLANNER: usize = 10;

/// Owns every subsystem and drives the control loop for the process
/// lifetime. Constructed once from [`Config`] and run to completion (it
/// only returns on an unrecoverable setup error; transient failures are
/// logged and the loop continues).
pub struct Runtime {
    start: Instant,

    reflex: ReflexLink,
    reflex_tel_rx: mpsc::UnboundedReceiver<robosup_protocol::reflex::StatePayload>,
    reflex_event_rx: mpsc::UnboundedReceiver<LinkEvent>,

    face: Arc<FaceLink>,
    face_tel_rx: mpsc::UnboundedReceiver<FaceTelemetry>,
    face_event_rx: mpsc::UnboundedReceiver<LinkEvent>,

    audio: Arc<AudioOrchestrator>,
    conversation: Arc<ConversationManager>,
    conversation_active: Arc<AtomicBool>,

    memory: MemoryStore,
    memory_tags_rx: mpsc::UnboundedReceiver<Vec<String>>,
    last_memory_save_mono_ms: f64,

    bus: PlannerEventBus,
    validator: PlannerValidator,
    scheduler: PlannerScheduler,
    skills: SkillExecutor,
    planner_client: PlannerClient,
    last_planner_request_mono_ms: f64,

    robot_id: String,
    state: RobotState,
}

impl Runtime {
    pub fn new(config: Config) -> Self {
        let (reflex, reflex_tel_rx, reflex_event_rx) =
            ReflexLink::start(config.serial.reflex_device.clone(), config.serial.reflex_baud);
        let (face, face_tel_rx, face_event_rx) =
            FaceLink::start(config.serial.face_device.clone(), config.serial.face_baud);
        let face = Arc::new(face);
        let face_sink: Arc<dyn FaceSink> = face.clone();

        let conversation_active = Arc::new(AtomicBool::new(false));

        let audio = Arc::new(AudioOrchestrator::new(
            config.backend.planner_url.clone(),
            config.backend.robot_id.clone(),
            config.audio.speaker_device.clone(),
            face_sink.clone(),
            conversation_active.clone(),
        ));

        let (conversation, memory_tags_rx) = ConversationManager::new(
            config.backend.converse_url.clone(),
            config.backend.robot_id.clone(),
            face_sink,
            config.audio.speaker_device.clone(),
            config.audio.mic_device.clone(),
            conversation_active.clone(),
        );
        let conversation = Arc::new(conversation);

        let mut memory = MemoryStore::new(config.memory.path.clone(), config.memory.consent);
        memory.load();

        Self {
            start: Instant::now(),
            reflex,
            reflex_tel_rx,
            reflex_event_rx,
            face,
            face_tel_rx,
            face_event_rx,
            audio,
            conversation,
            conversation_active,
            memory,
            memory_tags_rx,
            last_memory_save_mono_ms: f64::NEG_INFINITY,
            bus: PlannerEventBus::new(config.event_bus.clone()),
            validator: PlannerValidator::default(),
            scheduler: PlannerScheduler::default(),
            skills: SkillExecutor::default(),
            planner_client: PlannerClient::new(config.backend.planner_url.clone()),
            last_planner_request_mono_ms: f64::NEG_INFINITY,
            robot_id: config.backend.robot_id.clone(),
            state: RobotState::default(),
        }
    }

    fn mono_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Run the control loop forever. Background tasks (audio orchestrator,
    /// conversation bridge) are spawned once and run independently; this
    /// method drives the 50 Hz reflex/face/planner tick on the calling task.
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(robot_id = %self.robot_id, "supervisor starting");

        let audio = self.audio.clone();
        tokio::spawn(async move { audio.run().await });

        self.conversation.clone().start().await;

        self.state.mode = Mode::Wander;

        let mut ticker = tokio::time::interval(TICK_PERIOD);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    async fn tick(&mut self) {
        let now_ms = self.mono_ms();
        let dt_ms = now_ms - self.state.tick_mono_ms;
        self.state.tick_mono_ms = now_ms;
        self.state.tick_dt_ms = dt_ms;

        self.drain_reflex_events();
        self.drain_reflex_telemetry(now_ms);
        self.drain_face_events();
        self.drain_face_telemetry(now_ms).await;
        self.drain_memory_tags();

        self.bus.ingest_state(&self.state);

        let desired = self.skills.step(&self.state, self.scheduler.active_skill);
        self.state.twist_cmd = desired;
        let capped = apply_safety(desired, &mut self.state);
        self.state.twist_capped = capped;
        self.reflex.send_twist(capped.v_mm_s, capped.w_mrad_s);

        let face_locked = self.conversation.speaking() || self.audio.speaking();
        for action in self.scheduler.pop_due_actions(now_ms, face_locked) {
            self.dispatch_action(action).await;
        }

        if now_ms - self.last_planner_request_mono_ms >= PLANNER_REQUEST_PERIOD_MS {
            self.last_planner_request_mono_ms = now_ms;
            self.request_plan(now_ms, "periodic").await;
        }

        if now_ms - self.last_memory_save_mono_ms >= MEMORY_SAVE_PERIOD_MS {
            self.last_memory_save_mono_ms = now_ms;
            self.memory.save();
        }
    }

    fn drain_memory_tags(&mut self) {
        while let Ok(tags) = self.memory_tags_rx.try_recv() {
            for tag in tags {
                self.memory.add_or_reinforce(&tag, "topic", None, None, "conversation");
            }
        }
    }

    fn drain_reflex_events(&mut self) {
        while let Ok(event) = self.reflex_event_rx.try_recv() {
            match event {
                LinkEvent::Connected => {
                    self.state.reflex_connected = true;
                    info!("reflex MCU connected");
                }
                LinkEvent::Disconnected => {
                    self.state.reflex_connected = false;
                    warn!("reflex MCU disconnected");
                }
            }
        }
    }

    fn drain_reflex_telemetry(&mut self, now_ms: f64) {
        while let Ok(state) = self.reflex_tel_rx.try_recv() {
            self.state.speed_l_mm_s = state.speed_l_mm_s as i32;
            self.state.speed_r_mm_s = state.speed_r_mm_s as i32;
            self.state.gyro_z_mrad_s = state.gyro_z_mrad_s as i32;
            self.state.battery_mv = state.battery_mv as u32;
            self.state.fault_flags = state.fault_flags;
            self.state.range_mm = state.range_mm as u32;
            self.state.range_status = state.range_status;
            self.state.reflex_rx_mono_ms = now_ms;
            self.state.reflex_seq = self.state.reflex_seq.wrapping_add(1);

            let track_mm_s = ((state.speed_l_mm_s as f64 + state.speed_r_mm_s as f64) / 2.0).round();
            self.state.v_meas_mm_s = track_mm_s;
            self.state.w_meas_mrad_s = state.gyro_z_mrad_s as f64;

            if state.range_status == RangeStatus::Timeout {
                debug!("reflex range reading timed out");
            }
        }
    }

    fn drain_face_events(&mut self) {
        while let Ok(event) = self.face_event_rx.try_recv() {
            match event {
                LinkEvent::Connected => {
                    self.state.face_connected = true;
                    info!("face MCU connected");
                }
                LinkEvent::Disconnected => {
                    self.state.face_connected = false;
                    warn!("face MCU disconnected");
                }
            }
        }
    }

    async fn drain_face_telemetry(&mut self, now_ms: f64) {
        while let Ok(tel) = self.face_tel_rx.try_recv() {
            match tel {
                FaceTelemetry::Status(status) => {
                    self.state.face_mood = status.mood_id;
                    self.state.face_gesture = status.gesture_id;
                }
                FaceTelemetry::Touch(touch) => {
                    self.state.face_touch_active =
                        !matches!(touch.kind, robosup_protocol::face::TouchKind::Release);
                    self.bus.on_face_touch(&touch, now_ms);
                }
                FaceTelemetry::Button(button) => {
                    // Hold-to-talk: press engages PTT, release disengages it.
                    // `set_ptt_enabled` owns toggling `conversation_active`.
                    match button.kind {
                        ButtonEventKind::Press => self.conversation.set_ptt_enabled(true).await,
                        ButtonEventKind::Release => self.conversation.set_ptt_enabled(false).await,
                        ButtonEventKind::LongPress => {}
                    }
                    self.bus.on_face_button(&button);
                }
            }
        }
    }

    async fn dispatch_action(&mut self, action: robosup_planner::Action) {
        use robosup_planner::Action;
        match action {
            Action::Say { text } => {
                if !self.audio.enqueue_speech(&text, "neutral") {
                    debug!("planner speech queue full, dropping say action");
                }
            }
            Action::Emote { name, intensity } => {
                let mood_id = robosup_protocol::expressions::emotion_to_face_mood(name);
                self.face.send_state(mood_id, intensity).await;
            }
            Action::Gesture { name, .. } => {
                if let Some(gesture_id) = robosup_protocol::expressions::gesture_to_face_id(name) {
                    self.face.send_gesture(gesture_id).await;
                }
            }
            Action::Skill { name } => {
                self.scheduler.active_skill = name;
            }
        }
    }

    async fn request_plan(&mut self, now_ms: f64, trigger: &str) {
        let recent = self.bus.latest(RECENT_EVENTS_FOR_PLANNER);
        let body = build_world_state(
            &self.robot_id,
            self.planner_client.next_seq(),
            now_ms,
            &self.state,
            self.scheduler.active_skill,
            &recent,
            trigger,
            self.conversation.speaking() || self.audio.speaking(),
            self.conversation_active.load(Ordering::SeqCst),
        );

        match self.planner_client.request_plan(body).await {
            Ok(plan) => {
                let validated = self.validator.validate(&plan.actions, Some(plan.ttl_ms));
                if validated.dropped_actions > 0 {
                    debug!(dropped = validated.dropped_actions, "planner returned malformed actions");
                }
                self.state.personality_last_plan_mono_ms = now_ms;
                self.state.personality_last_plan_actions = validated.actions.len() as u32;
                self.scheduler.schedule_plan(validated, now_ms, now_ms);
            }
            Err(e) => {
                debug!(error = %e, "planner request failed this tick");
                self.state.personality_last_error = e.to_string();
            }
        }
    }
}
