//! # nodegate - Open Node Gateway Control Plane
//!
//! nodegate runs on a testbed gateway. It supervises the embedded board under
//! experiment (the *open node*) and talks to the companion *control node*
//! microcontroller over a shared serial channel.
//!
//! ## Features
//!
//! - **Packet Dispatch**: one non-blocking demultiplexer splits the control
//!   node stream into telemetry and command answers, with a mutually exclusive
//!   request/response `send` on top.
//! - **Node Lifecycle**: a single generic setup / teardown / flash / reset /
//!   debug sequence driven by a per-board descriptor and capability table.
//! - **Bounded Waits**: tty detection by polling with deadlines, never hanging.
//! - **Failure Accounting**: lifecycle operations attempt every step and return
//!   the number of failed steps.
//! - **Async Design**: built on Tokio; every component is safe under parallel use.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nodegate::config::Config;
//! use nodegate::node::{Capabilities, OpenNode};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("nodegate.toml").await?;
//!     let board = config.board()?;
//!     let caps = Capabilities::hardware(&board, &config.tools);
//!     let node = OpenNode::new(board, caps, config.waits.waits());
//!
//!     let failures = node.setup(None).await?;
//!     println!("setup finished with {} failed steps", failures);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`common`] - bounded polling waits, instance guard, logged calls
//! - [`control`] - control node framing, dispatcher and serial link
//! - [`node`] - open node lifecycle, board descriptors and capabilities
//! - [`config`] - TOML configuration
//! - [`error`] - error taxonomy
//! - [`logutil`] - single-line log formatting helpers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐      ┌─────────────────┐
//! │  Orchestration  │      │  Orchestration  │ ← experiment start/stop (external)
//! └─────────────────┘      └─────────────────┘
//!          │                        │
//! ┌─────────────────┐      ┌─────────────────┐
//! │    OpenNode     │      │   Dispatcher    │ ← lifecycle / command + telemetry
//! └─────────────────┘      └─────────────────┘
//!          │                        │
//! ┌─────────────────┐      ┌─────────────────┐
//! │ OpenOCD, socat, │      │  ControlLink    │ ← hardware access
//! │ tty, presence   │      │  (serialport)   │
//! └─────────────────┘      └─────────────────┘
//! ```

pub mod common;
pub mod config;
pub mod control;
pub mod error;
pub mod logutil;
pub mod node;

pub use error::{GatewayError, Result};
