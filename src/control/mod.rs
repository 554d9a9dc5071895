//! # Control Node Communication
//!
//! The control node is the gateway-side microcontroller that powers the open
//! node and samples its consumption and radio activity. It talks over a
//! single serial channel carrying both asynchronous telemetry and answers to
//! gateway commands.
//!
//! - [`framer`] - sync-byte framing of the byte stream
//! - [`dispatch`] - telemetry / answer demultiplexing and the blocking `send`
//! - `link` - the serialport-backed reader thread and writer (feature `serial`)
//!
//! ```rust,no_run
//! # #[cfg(feature = "serial")]
//! # {
//! use std::sync::Arc;
//! use nodegate::control::dispatch::{telemetry_channel, Dispatcher, DEFAULT_MEASURES_MASK};
//! use nodegate::control::link::ControlLink;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (tx, mut telemetry) = telemetry_channel(1024);
//!     let link = ControlLink::open("/dev/ttyCN", 500_000)?;
//!     let dispatcher = Arc::new(Dispatcher::new(DEFAULT_MEASURES_MASK, tx).with_writer(link.writer()));
//!     link.spawn_reader(dispatcher.clone());
//!
//!     if let Some(answer) = dispatcher.send(&[0x01]).await? {
//!         println!("answer: {:02x?}", &answer[..]);
//!     }
//!     while let Some(packet) = telemetry.recv().await {
//!         println!("telemetry: {:02x?}", &packet[..]);
//!     }
//!     Ok(())
//! }
//! # }
//! ```

pub mod dispatch;
pub mod framer;
#[cfg(feature = "serial")]
pub mod link;

pub use dispatch::{Dispatcher, Packet, PacketWriter, Route};
