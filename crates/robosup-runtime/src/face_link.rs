// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Face MCU link: owns the serial transport, decodes telemetry, and
//! implements [`FaceSink`] so the audio layer can drive the face without
//! depending on the transport crate directly.

use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use robosup_audio::FaceSink;
use robosup_protocol::face::{self, CmdType, FaceButtonPayload, FaceStatusPayload, TelType, TouchEventPayload};
use robosup_protocol::{parse_frame, ProtocolError};
use robosup_transport::{LinkEvent, SerialLink};

/// Decoded face MCU telemetry, handed to the tick loop for state
/// aggregation and event-bus ingestion.
#[derive(Debug, Clone, Copy)]
pub enum FaceTelemetry {
    Status(FaceStatusPayload),
    Touch(TouchEventPayload),
    Button(FaceButtonPayload),
}

pub struct FaceLink {
    link: SerialLink,
    seq: AtomicU8,
}

impl FaceLink {
    pub fn start(
        port: impl Into<String>,
        baud: u32,
    ) -> (Self, mpsc::UnboundedReceiver<FaceTelemetry>, mpsc::UnboundedReceiver<LinkEvent>) {
        let (link, mut frame_rx, event_rx) = SerialLink::start(port, baud, "face");
        let (tel_tx, tel_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                let parsed = match parse_frame(&frame) {
                    Ok(p) => p,
                    Err(ProtocolError::CrcMismatch { .. }) => {
                        debug!("face telemetry checksum mismatch, frame dropped");
                        continue;
                    }
                    Err(e) => {
                        debug!(error = %e, "face telemetry decode failed");
                        continue;
                    }
                };

                let tel_type = match TelType::try_from(parsed.pkt_type) {
                    Ok(t) => t,
                    Err(_) => continue,
                };

                let decoded = match tel_type {
                    TelType::FaceStatus => FaceStatusPayload::from_bytes(&parsed.payload).map(FaceTelemetry::Status),
                    TelType::TouchEvent => TouchEventPayload::from_bytes(&parsed.payload).map(FaceTelemetry::Touch),
                    TelType::FaceButton => FaceButtonPayload::from_bytes(&parsed.payload).map(FaceTelemetry::Button),
                };

                match decoded {
                    Ok(event) => {
                        let _ = tel_tx.send(event);
                    }
                    Err(e) => debug!(error = %e, "face payload too short"),
                }
            }
        });

        (
            Self {
                link,
                seq: AtomicU8::new(0),
            },
            tel_rx,
            event_rx,
        )
    }

    fn next_seq(&self) -> u8 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    pub fn send_system(&self, brightness: u8, volume: u8) {
        self.link.write(face::build_set_system(self.next_seq(), brightness, volume));
    }

    pub fn stop(&self) {
        self.link.stop();
    }
}

#[async_trait]
impl FaceSink for FaceLink {
    async fn send_talking(&self, talking: bool, energy: u8) {
        self.link.write(face::build_set_mouth(self.next_seq(), talking, energy));
    }

    async fn send_state(&self, mood_id: u8, intensity: f64) {
        let intensity_u8 = (intensity.clamp(0.0, 1.0) * 255.0) as u8;
        self.link.write(face::build_set_state(self.next_seq(), mood_id, intensity_u8));
    }

    async fn send_gesture(&self, gesture_id: u8) {
        self.link.write(face::build_gesture(self.next_seq(), gesture_id, 0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_type_ids_are_stable() {
        assert_eq!(CmdType::SetState as u8, 0x20);
        assert_eq!(CmdType::Gesture as u8, 0x21);
        assert_eq!(CmdType::SetSystem as u8, 0x22);
    }
}
