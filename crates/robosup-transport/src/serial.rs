// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Async, auto-reconnecting framed serial transport.
//!
//! Owns one serial port exclusively. A background task attempts to open the
//! device, reads bytes with a short blocking-equivalent timeout, and feeds
//! them through a [`FrameExtractor`]; completed frames are forwarded to a
//! single subscriber channel. Writes are best-effort: if the port is
//! disconnected the data is silently dropped, matching the original
//! fire-and-forget `write()` contract.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::framing::FrameExtractor;

const RECONNECT_MIN: Duration = Duration::from_millis(500);
const RECONNECT_MAX: Duration = Duration::from_millis(5000);
const READ_TIMEOUT: Duration = Duration::from_millis(50);
const READ_CHUNK: usize = 256;

/// Lifecycle notification emitted whenever the underlying port opens or
/// closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
}

/// Handle to a running serial link. Dropping it does not stop the
/// background task; call [`SerialLink::stop`] explicitly.
pub struct SerialLink {
    label: String,
    write_tx: mpsc::UnboundedSender<Vec<u8>>,
    stop_tx: mpsc::UnboundedSender<()>,
    connected: Arc<AtomicBool>,
}

impl SerialLink {
    /// Start the background reconnect/read loop for `port` at `baud`.
    /// Returns the link handle along with the frame and lifecycle-event
    /// receivers (each has exactly one logical subscriber, matching the
    /// original `on_packet`/`on_connect`/`on_disconnect` single-callback
    /// contract).
    pub fn start(
        port: impl Into<String>,
        baud: u32,
        label: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<Vec<u8>>, mpsc::UnboundedReceiver<LinkEvent>) {
        let port = port.into();
        let label = label.into();
        let (write_tx, write_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (stop_tx, stop_rx) = mpsc::unbounded_channel::<()>();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<LinkEvent>();
        let connected = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_loop(
            port,
            baud,
            label.clone(),
            write_rx,
            stop_rx,
            frame_tx,
            event_tx,
            connected.clone(),
        ));

        (
            Self {
                label,
                write_tx,
                stop_tx,
                connected,
            },
            frame_rx,
            event_rx,
        )
    }

    /// Non-blocking best-effort transmit of an already wire-framed packet.
    /// Dropped silently if the port is currently disconnected, or if the
    /// link task has exited — matching the original's "drop while
    /// disconnected" write contract rather than queuing for later delivery.
    pub fn write(&self, data: Vec<u8>) {
        if !self.connected.load(Ordering::Acquire) {
            debug!(label = %self.label, "write while disconnected, dropped");
            return;
        }
        if self.write_tx.send(data).is_err() {
            debug!(label = %self.label, "write after link stopped");
        }
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_loop(
    port: String,
    baud: u32,
    label: String,
    mut write_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut stop_rx: mpsc::UnboundedReceiver<()>,
    frame_tx: mpsc::UnboundedSender<Vec<u8>>,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
    connected: Arc<AtomicBool>,
) {
    let mut backoff = RECONNECT_MIN;
    let mut extractor = FrameExtractor::new();
    let mut stream: Option<tokio_serial::SerialStream> = None;

    loop {
        if stream.is_none() {
            match tokio_serial::new(&port, baud).open_native_async() {
                Ok(s) => {
                    info!(%label, %port, "connected");
                    extractor.clear();
                    connected.store(true, Ordering::Release);
                    let _ = event_tx.send(LinkEvent::Connected);
                    stream = Some(s);
                    backoff = RECONNECT_MIN;
                }
                Err(e) => {
                    debug!(%label, %port, error = %e, "can't open port");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = stop_rx.recv() => return,
                    }
                    backoff = (backoff * 2).min(RECONNECT_MAX);
                    continue;
                }
            }
        }

        let s = stream.as_mut().unwrap();
        let mut buf = [0u8; READ_CHUNK];

        tokio::select! {
            _ = stop_rx.recv() => {
                return;
            }
            Some(data) = write_rx.recv() => {
                if let Err(e) = s.write_all(&data).await {
                    warn!(%label, error = %e, "write error");
                    stream = None;
                    connected.store(false, Ordering::Release);
                    let _ = event_tx.send(LinkEvent::Disconnected);
                }
            }
            result = tokio::time::timeout(READ_TIMEOUT, s.read(&mut buf)) => {
                match result {
                    Ok(Ok(0)) => {}
                    Ok(Ok(n)) => {
                        for frame in extractor.feed_all(&buf[..n]) {
                            let _ = frame_tx.send(frame);
                        }
                    }
                    Ok(Err(e)) => {
                        warn!(%label, error = %e, "read error");
                        stream = None;
                        connected.store(false, Ordering::Release);
                        let _ = event_tx.send(LinkEvent::Disconnected);
                    }
                    Err(_timeout) => {}
                }
            }
        }
    }
}
