//! Serial link to the control node.
//!
//! The port is opened once. The writer half keeps the opened handle behind
//! a mutex; the reader runs on a blocking thread with its own cloned handle
//! and pushes every decoded packet into the [`Dispatcher`].

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, error, info};
use serialport::SerialPort;
use tokio::task::JoinHandle;
use tokio::time::Duration;

use super::dispatch::{Dispatcher, PacketWriter};
use super::framer::{encode_frame, FrameDecoder};
use crate::error::Result;

/// Read timeout of the reader handle; bounds how long shutdown takes to notice.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Pause after an unexpected read error before trying again.
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Decodes raw bytes into packets and routes them.
pub struct FramePump {
    decoder: FrameDecoder,
    dispatcher: Arc<Dispatcher>,
}

impl FramePump {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            decoder: FrameDecoder::new(),
            dispatcher,
        }
    }

    /// Feed a chunk read from the port; returns the number of packets routed.
    pub fn feed(&mut self, chunk: &[u8]) -> usize {
        self.decoder.push(chunk);
        let mut routed = 0;
        while let Some(packet) = self.decoder.next_frame() {
            self.dispatcher.classify_and_route(packet);
            routed += 1;
        }
        routed
    }

    pub fn skipped(&self) -> u64 {
        self.decoder.skipped()
    }
}

struct SerialWriter {
    port: Mutex<Box<dyn SerialPort>>,
}

impl PacketWriter for SerialWriter {
    fn write_packet(&self, data: &[u8]) -> io::Result<()> {
        let frame = encode_frame(data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        let mut port = self
            .port
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "serial port mutex poisoned"))?;
        port.write_all(&frame)?;
        port.flush()
    }
}

pub struct ControlLink {
    port_name: String,
    writer: Arc<SerialWriter>,
    reader: Mutex<Option<Box<dyn SerialPort>>>,
    stop: Arc<AtomicBool>,
}

impl ControlLink {
    /// Open the control node serial port (8N1).
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        debug!("Opening control node serial port {} at {} baud", port_name, baud_rate);
        let port = serialport::new(port_name, baud_rate)
            .timeout(READ_TIMEOUT)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .open()?;
        port.clear(serialport::ClearBuffer::Input)?;
        let reader = port.try_clone()?;
        Ok(Self {
            port_name: port_name.to_string(),
            writer: Arc::new(SerialWriter {
                port: Mutex::new(port),
            }),
            reader: Mutex::new(Some(reader)),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Writer to install on the dispatcher.
    pub fn writer(&self) -> Arc<dyn PacketWriter> {
        self.writer.clone()
    }

    /// Start the reader thread. Returns `None` if it was already started.
    pub fn spawn_reader(&self, dispatcher: Arc<Dispatcher>) -> Option<JoinHandle<()>> {
        let mut port = match self.reader.lock() {
            Ok(mut slot) => slot.take()?,
            Err(poisoned) => poisoned.into_inner().take()?,
        };
        let stop = self.stop.clone();
        let name = self.port_name.clone();
        Some(tokio::task::spawn_blocking(move || {
            info!("Control node reader started on {}", name);
            let mut pump = FramePump::new(dispatcher);
            let mut buf = [0u8; 512];
            while !stop.load(Ordering::Relaxed) {
                match port.read(&mut buf) {
                    Ok(0) => {}
                    Ok(n) => {
                        pump.feed(&buf[..n]);
                    }
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::TimedOut
                                | io::ErrorKind::WouldBlock
                                | io::ErrorKind::Interrupted
                        ) => {}
                    Err(e) => {
                        error!("Control node read error on {}: {} - continuing", name, e);
                        std::thread::sleep(ERROR_BACKOFF);
                    }
                }
            }
            info!(
                "Control node reader on {} stopped ({} bytes skipped while resyncing)",
                name,
                pump.skipped()
            );
        }))
    }

    /// Ask the reader thread to exit after its current read.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
