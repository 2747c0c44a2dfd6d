// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Reflex MCU link: owns the serial transport, decodes `STATE` telemetry,
//! and builds outgoing command packets.

use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::mpsc;
use tracing::debug;

use robosup_protocol::reflex::{self, StatePayload};
use robosup_protocol::{parse_frame, ProtocolError};
use robosup_transport::{LinkEvent, SerialLink};

pub struct ReflexLink {
    link: SerialLink,
    seq: AtomicU8,
}

impl ReflexLink {
    /// Start the serial link and a background decoder task. Returns the
    /// handle, a receiver of decoded `STATE` telemetry, and the link's
    /// connect/disconnect lifecycle events.
    pub fn start(
        port: impl Into<String>,
        baud: u32,
    ) -> (Self, mpsc::UnboundedReceiver<StatePayload>, mpsc::UnboundedReceiver<LinkEvent>) {
        let (link, mut frame_rx, event_rx) = SerialLink::start(port, baud, "reflex");
        let (tel_tx, tel_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                match parse_frame(&frame).and_then(|p| StatePayload::from_bytes(&p.payload)) {
                    Ok(state) => {
                        let _ = tel_tx.send(state);
                    }
                    Err(ProtocolError::CrcMismatch { .. }) => {
                        debug!("reflex telemetry checksum mismatch, frame dropped");
                    }
                    Err(e) => {
                        debug!(error = %e, "reflex telemetry decode failed");
                    }
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

    pub fn send_twist(&self, v_mm_s: i32, w_mrad_s: i32) {
        let v = v_mm_s.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        let w = w_mrad_s.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        self.link.write(reflex::build_set_twist(self.next_seq(), v, w));
    }

    pub fn send_stop(&self) {
        self.link.write(reflex::build_stop(self.next_seq()));
    }

    pub fn send_estop(&self) {
        self.link.write(reflex::build_estop(self.next_seq()));
    }

    pub fn send_clear_faults(&self) {
        self.link.write(reflex::build_clear_faults(self.next_seq()));
    }

    /// Returns `false` for an unrecognized parameter name.
    pub fn send_config_named(&self, param_name: &str, value: f64) -> bool {
        match reflex::build_set_config_named(self.next_seq(), param_name, value) {
            Some(pkt) => {
                self.link.write(pkt);
                true
            }
            None => false,
        }
    }

    pub fn stop(&self) {
        self.link.stop();
    }
}
