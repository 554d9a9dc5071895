//! Control node packet dispatch.
//!
//! The control node shares one half-duplex serial channel between two kinds
//! of inbound traffic:
//!
//! * **Telemetry** pushed asynchronously (power/radio measures). These go to a
//!   bounded, best-effort queue drained by a consumer outside this module.
//! * **Answers** to commands issued with [`Dispatcher::send`]. These go to a
//!   single-slot mailbox that the pending `send` call waits on.
//!
//! A packet is telemetry iff `header & type_mask == type_mask`, where
//! `header` is its first byte.
//!
//! [`Dispatcher::classify_and_route`] runs on the serial reader path. It takes
//! no lock and never waits: full queues drop the packet and log.
//!
//! [`Dispatcher::send`] serializes callers on an async mutex which owns the
//! mailbox receiver, so holding the lock and owning the pending call are the
//! same thing. Any answer left over from a call that timed out is discarded
//! before the next command is written.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use log::{debug, error, trace, warn};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{timeout, Duration};

use crate::error::{GatewayError, Result};
use crate::logutil::hex_snippet;

const LOG_TARGET: &str = "nodegate::dispatch";

/// How long `send` waits for the control node to answer.
pub const DEFAULT_ANSWER_TIMEOUT: Duration = Duration::from_secs(1);

/// Header bits marking a measures (telemetry) packet.
pub const DEFAULT_MEASURES_MASK: u8 = 0xF0;

pub type Packet = Bytes;

/// Write side of the control node transport.
pub trait PacketWriter: Send + Sync {
    fn write_packet(&self, data: &[u8]) -> io::Result<()>;
}

impl<F> PacketWriter for F
where
    F: Fn(&[u8]) -> io::Result<()> + Send + Sync,
{
    fn write_packet(&self, data: &[u8]) -> io::Result<()> {
        self(data)
    }
}

/// Destination of an inbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Telemetry,
    Answer,
}

/// Classify a packet by its header byte. An empty packet has header `0x00`.
pub fn classify(packet: &[u8], type_mask: u8) -> Route {
    let header = packet.first().copied().unwrap_or(0);
    if header & type_mask == type_mask {
        Route::Telemetry
    } else {
        Route::Answer
    }
}

/// Bounded telemetry channel. A zero capacity is raised to one.
pub fn telemetry_channel(capacity: usize) -> (mpsc::Sender<Packet>, mpsc::Receiver<Packet>) {
    mpsc::channel(capacity.max(1))
}

#[derive(Debug, Default)]
struct Counters {
    telemetry_routed: AtomicU64,
    telemetry_dropped: AtomicU64,
    answers_routed: AtomicU64,
    answers_dropped: AtomicU64,
    stale_discarded: AtomicU64,
    sends: AtomicU64,
    timeouts: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub telemetry_routed: u64,
    pub telemetry_dropped: u64,
    pub answers_routed: u64,
    pub answers_dropped: u64,
    pub stale_discarded: u64,
    pub sends: u64,
    pub timeouts: u64,
}

pub struct Dispatcher {
    type_mask: u8,
    answer_timeout: Duration,
    telemetry_tx: mpsc::Sender<Packet>,
    answer_tx: mpsc::Sender<Packet>,
    // Doubles as the send lock.
    answer_rx: Mutex<mpsc::Receiver<Packet>>,
    writer: RwLock<Option<Arc<dyn PacketWriter>>>,
    counters: Counters,
}

impl Dispatcher {
    /// Create a dispatcher routing telemetry into `telemetry_tx`.
    pub fn new(type_mask: u8, telemetry_tx: mpsc::Sender<Packet>) -> Self {
        let (answer_tx, answer_rx) = mpsc::channel(1);
        Self {
            type_mask,
            answer_timeout: DEFAULT_ANSWER_TIMEOUT,
            telemetry_tx,
            answer_tx,
            answer_rx: Mutex::new(answer_rx),
            writer: RwLock::new(None),
            counters: Counters::default(),
        }
    }

    pub fn with_answer_timeout(mut self, answer_timeout: Duration) -> Self {
        self.answer_timeout = answer_timeout;
        self
    }

    pub fn with_writer(self, writer: Arc<dyn PacketWriter>) -> Self {
        self.set_writer(writer);
        self
    }

    /// Install (or replace) the transport used by [`Dispatcher::send`].
    pub fn set_writer(&self, writer: Arc<dyn PacketWriter>) {
        let mut slot = match self.writer.write() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(writer);
    }

    fn writer(&self) -> Option<Arc<dyn PacketWriter>> {
        match self.writer.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn type_mask(&self) -> u8 {
        self.type_mask
    }

    pub fn answer_timeout(&self) -> Duration {
        self.answer_timeout
    }

    /// Route one inbound packet. Called from the serial reader; never blocks.
    pub fn classify_and_route(&self, packet: Packet) -> Route {
        let route = classify(&packet, self.type_mask);
        match route {
            Route::Telemetry => match self.telemetry_tx.try_send(packet) {
                Ok(()) => bump(&self.counters.telemetry_routed),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    bump(&self.counters.telemetry_dropped);
                    warn!(target: LOG_TARGET, "Measures queue Full");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    bump(&self.counters.telemetry_dropped);
                    warn!(target: LOG_TARGET, "Measures queue closed, dropping packet");
                }
            },
            Route::Answer => match self.answer_tx.try_send(packet) {
                Ok(()) => bump(&self.counters.answers_routed),
                Err(err) => {
                    bump(&self.counters.answers_dropped);
                    let dropped = match err {
                        mpsc::error::TrySendError::Full(p) | mpsc::error::TrySendError::Closed(p) => p,
                    };
                    error!(
                        target: LOG_TARGET,
                        "Control node answer queue full, dropping {}",
                        hex_snippet(&dropped, 16)
                    );
                }
            },
        }
        route
    }

    /// Send a command to the control node and wait for its answer.
    ///
    /// Returns `Ok(None)` when no answer arrives within the answer timeout.
    /// Callers queue on the send lock; only one command is in flight.
    pub async fn send(&self, data: &[u8]) -> Result<Option<Packet>> {
        let writer = self.writer().ok_or(GatewayError::WriterNotConfigured)?;

        let mut answers = self.answer_rx.lock().await;

        // An answer that arrived after its caller gave up.
        while let Ok(stale) = answers.try_recv() {
            bump(&self.counters.stale_discarded);
            debug!(
                target: LOG_TARGET,
                "Discarding stale control node answer {}",
                hex_snippet(&stale, 16)
            );
        }

        bump(&self.counters.sends);
        trace!(target: LOG_TARGET, "send {}", hex_snippet(data, 32));
        writer.write_packet(data).map_err(GatewayError::Transport)?;

        match timeout(self.answer_timeout, answers.recv()).await {
            Ok(Some(answer)) => {
                trace!(target: LOG_TARGET, "answer {}", hex_snippet(&answer, 32));
                Ok(Some(answer))
            }
            Ok(None) => Ok(None),
            Err(_) => {
                bump(&self.counters.timeouts);
                debug!(
                    target: LOG_TARGET,
                    "No control node answer within {:?} for {}",
                    self.answer_timeout,
                    hex_snippet(data, 16)
                );
                Ok(None)
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.counters;
        DispatchStats {
            telemetry_routed: c.telemetry_routed.load(Ordering::Relaxed),
            telemetry_dropped: c.telemetry_dropped.load(Ordering::Relaxed),
            answers_routed: c.answers_routed.load(Ordering::Relaxed),
            answers_dropped: c.answers_dropped.load(Ordering::Relaxed),
            stale_discarded: c.stale_discarded.load(Ordering::Relaxed),
            sends: c.sends.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
        }
    }
}
