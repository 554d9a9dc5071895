//! Binary entrypoint for the nodegate CLI.
//!
//! Commands:
//! - `init` - write a starter `nodegate.toml`
//! - `check` - load and validate the configuration
//! - `status` - print open node status as JSON
//! - `setup [--firmware <elf>]` / `teardown` - run one lifecycle sequence
//! - `flash [--firmware <elf>]` / `reset` - single open node operations
//! - `send <hex>` - send one command to the control node and print its answer
//! - `run [--firmware <elf>]` - setup, serve the control node until Ctrl-C, teardown
//!
//! See the library crate docs for module-level details: `nodegate::`.
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, error, info, warn};

use nodegate::common::abspath;
use nodegate::config::Config;
use nodegate::control::dispatch::{telemetry_channel, Dispatcher, Packet};
use nodegate::logutil::hex_snippet;
use nodegate::node::{Capabilities, OpenNode};

#[derive(Parser)]
#[command(name = "nodegate")]
#[command(about = "Gateway control plane for testbed open nodes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "nodegate.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,
    /// Validate the configuration file
    Check,
    /// Show open node status
    Status,
    /// Flash a firmware (idle firmware when omitted)
    Flash {
        #[arg(short, long)]
        firmware: Option<PathBuf>,
    },
    /// Reset the open node
    Reset,
    /// Wait for the open node, flash it and start serial redirection
    Setup {
        #[arg(short, long)]
        firmware: Option<PathBuf>,
    },
    /// Stop debugger and redirection, flash the idle firmware
    Teardown,
    /// Send a hex-encoded command to the control node
    Send {
        /// Command payload, e.g. `01ff`
        payload: String,
    },
    /// Setup, serve the control node link until Ctrl-C, then teardown
    Run {
        #[arg(short, long)]
        firmware: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(&None, cli.verbose);
        Config::create_default(&cli.config).await?;
        info!("Configuration file created at {}", cli.config);
        return Ok(());
    }

    let config = Config::load(&cli.config).await?;
    init_logging(&Some(config.clone()), cli.verbose);
    config.validate()?;

    match cli.command {
        Commands::Init => {}
        Commands::Check => {
            let board = config.board()?;
            println!(
                "{}: ok (board {}, tty {})",
                cli.config,
                board.name,
                board.tty.display()
            );
        }
        Commands::Status => {
            let node = build_node(&config)?;
            let board = node.board();
            let status = node.status();
            let payload = serde_json::json!({
                "board": board.name,
                "tty": board.tty,
                "tty_present": board.tty.exists(),
                "status": if status == 0 { "ok" } else { "error" },
                "control_node": config.control_node.port,
                "autotest": board.autotest,
            });
            println!("{}", payload);
            std::process::exit(exit_code(status));
        }
        Commands::Flash { firmware } => {
            let node = build_node(&config)?;
            let firmware = resolve_firmware(firmware)?;
            let ret = node.flash(firmware.as_deref()).await?;
            report("flash", ret);
        }
        Commands::Reset => {
            let node = build_node(&config)?;
            let ret = node.reset().await?;
            report("reset", ret);
        }
        Commands::Setup { firmware } => {
            let node = build_node(&config)?;
            let firmware = resolve_firmware(firmware)?;
            let ret = node.setup(firmware.as_deref()).await?;
            report("setup", ret);
        }
        Commands::Teardown => {
            let node = build_node(&config)?;
            let ret = node.teardown().await?;
            report("teardown", ret);
        }
        Commands::Send { payload } => {
            let data = hex::decode(payload.trim()).context("payload must be hex")?;
            send_command(&config, &data).await?;
        }
        Commands::Run { firmware } => {
            let firmware = resolve_firmware(firmware)?;
            run(&config, firmware).await?;
        }
    }

    Ok(())
}

fn build_node(config: &Config) -> Result<OpenNode> {
    let board = config.board()?;
    let caps = Capabilities::hardware(&board, &config.tools);
    Ok(OpenNode::new(board, caps, config.waits.waits()))
}

fn resolve_firmware(firmware: Option<PathBuf>) -> Result<Option<PathBuf>> {
    firmware
        .map(|fw| abspath(&fw).with_context(|| format!("firmware {} not readable", fw.display())))
        .transpose()
}

fn exit_code(failures: u32) -> i32 {
    if failures == 0 {
        0
    } else {
        1
    }
}

fn report(operation: &str, failures: u32) {
    let payload = serde_json::json!({
        "operation": operation,
        "failures": failures,
    });
    println!("{}", payload);
    if failures != 0 {
        std::process::exit(exit_code(failures));
    }
}

fn new_dispatcher(config: &Config) -> (Arc<Dispatcher>, tokio::sync::mpsc::Receiver<Packet>) {
    let cn = &config.control_node;
    let (tx, rx) = telemetry_channel(cn.telemetry_capacity);
    let dispatcher = Dispatcher::new(cn.measures_mask, tx).with_answer_timeout(cn.answer_timeout());
    (Arc::new(dispatcher), rx)
}

#[cfg(feature = "serial")]
async fn send_command(config: &Config, data: &[u8]) -> Result<()> {
    use nodegate::control::link::ControlLink;

    if !config.control_node.enabled() {
        return Err(anyhow!("control_node.port is not configured"));
    }
    let (dispatcher, _telemetry) = new_dispatcher(config);
    let link = ControlLink::open(&config.control_node.port, config.control_node.baud_rate)?;
    dispatcher.set_writer(link.writer());
    let reader = link.spawn_reader(dispatcher.clone());

    let answer = dispatcher.send(data).await;
    link.shutdown();
    if let Some(reader) = reader {
        let _ = reader.await;
    }
    match answer? {
        Some(answer) => println!("{}", hex::encode(&answer)),
        None => {
            eprintln!("no answer within {:?}", dispatcher.answer_timeout());
            std::process::exit(1);
        }
    }
    Ok(())
}

#[cfg(not(feature = "serial"))]
async fn send_command(_config: &Config, _data: &[u8]) -> Result<()> {
    Err(anyhow!("send requires the 'serial' feature"))
}

async fn run(config: &Config, firmware: Option<PathBuf>) -> Result<()> {
    info!("Starting nodegate v{}", env!("CARGO_PKG_VERSION"));
    let node = build_node(config)?;
    let (dispatcher, mut telemetry) = new_dispatcher(config);

    #[cfg(feature = "serial")]
    let link = if config.control_node.enabled() {
        use nodegate::control::link::ControlLink;
        match ControlLink::open(&config.control_node.port, config.control_node.baud_rate) {
            Ok(link) => {
                dispatcher.set_writer(link.writer());
                link.spawn_reader(dispatcher.clone());
                info!("Connected to control node on {}", link.port_name());
                Some(link)
            }
            Err(e) => {
                warn!(
                    "Failed to open control node on {}: {} (continuing without control node)",
                    config.control_node.port, e
                );
                None
            }
        }
    } else {
        info!("No control node port configured; starting without control node.");
        None
    };

    let consumer = tokio::spawn(async move {
        let mut received: u64 = 0;
        while let Some(packet) = telemetry.recv().await {
            received += 1;
            debug!("telemetry #{} {}", received, hex_snippet(&packet, 32));
        }
    });

    let ret = node.setup(firmware.as_deref()).await?;
    if ret != 0 {
        error!("Setup finished with {} failed steps", ret);
    }

    info!("Open node ready, waiting for Ctrl-C");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    let ret = node.teardown().await?;

    #[cfg(feature = "serial")]
    if let Some(link) = link {
        link.shutdown();
    }
    consumer.abort();

    let stats = dispatcher.stats();
    info!(
        "dispatch stats: telemetry={} dropped={} answers={} answers_dropped={} sends={} timeouts={}",
        stats.telemetry_routed,
        stats.telemetry_dropped,
        stats.answers_routed,
        stats.answers_dropped,
        stats.sends,
        stats.timeouts
    );
    report("teardown", ret);
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    let config_level = config
        .as_ref()
        .and_then(|cfg| cfg.logging.level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    // CLI verbosity overrides config
    let base_level = match verbosity {
        0 => config_level,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    let log_file = config.as_ref().and_then(|cfg| cfg.logging.file.clone());
    match log_file.and_then(|file| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
            .ok()
    }) {
        Some(f) => {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            // Foreground: tee to the console as well as the file.
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    }
    let _ = builder.try_init();
}
