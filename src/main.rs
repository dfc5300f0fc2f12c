//! padbridge - pad controller to video mixer bridge
//!
//! Mirrors a video mixer's composition state from its OSC feedback stream and
//! maps a Push-style 8x8 pad controller onto it: pads show clip state and
//! trigger clips, encoders and buttons drive transport and master level.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod console;
mod device;
mod error;
mod osc;
mod state;
mod surface;

use crate::console::ConsoleCommand;
use crate::device::MidiPadDevice;
use crate::osc::{FeedbackReceiver, UdpCommandSender};
use crate::state::StateStore;
use crate::surface::mapping::GridMapping;
use crate::surface::SurfaceController;

/// LED refresh cadence.
const RENDER_INTERVAL: Duration = Duration::from_millis(50);

/// padbridge - control a video mixer's clip grid from a pad controller
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// UDP port to receive mixer OSC feedback on
    #[arg(short = 'i', long, default_value = "7000")]
    listen_port: u16,

    /// Mixer host to send OSC commands to
    #[arg(short = 'a', long, default_value = "127.0.0.1")]
    mixer_host: String,

    /// Mixer port to send OSC commands to
    #[arg(short = 'o', long, default_value = "6669")]
    mixer_port: u16,

    /// MIDI port name substring to match the controller
    #[arg(long, default_value = "Push")]
    midi_port: String,

    /// Grid size as COLSxROWS
    #[arg(long, default_value = "8x8")]
    grid: String,

    /// Run without hardware (state mirroring and console only)
    #[arg(long)]
    headless: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(&args.log_level)?;

    if args.list_ports {
        return device::print_ports();
    }

    info!("starting padbridge");
    run_app(args).await?;
    info!("padbridge shutdown complete");
    Ok(())
}

async fn run_app(args: Args) -> Result<()> {
    let (cols, rows) = parse_grid(&args.grid)?;
    let store = StateStore::new();

    // Binding the feedback socket is the one fatal startup error; everything
    // downstream degrades instead of failing.
    let (receiver, mut feedback_rx) = FeedbackReceiver::bind(args.listen_port).await?;
    let sender: Arc<dyn osc::CommandSender> =
        Arc::new(UdpCommandSender::new(&args.mixer_host, args.mixer_port)?);

    let (stop_tx, stop_rx) = watch::channel(false);
    let receive_task = tokio::spawn(receiver.run(stop_rx));

    // Dedicated apply task: feedback mutates the store in strict arrival
    // order, decoupled from socket reads by the bounded channel.
    let apply_store = store.clone();
    let apply_task = tokio::spawn(async move {
        while let Some(msg) = feedback_rx.recv().await {
            if !apply_store.apply(&msg) {
                debug!(addr = %msg.addr, "unmatched feedback address");
            }
        }
    });

    let mut midi_device = MidiPadDevice::new(&args.midi_port);
    let mut input_rx = midi_device
        .take_event_receiver()
        .context("input event receiver already taken")?;

    let mut surface = SurfaceController::new(
        store.clone(),
        sender,
        Box::new(midi_device),
        GridMapping::new(cols, rows),
    );
    if args.headless {
        info!("headless mode, controller disabled");
    } else if let Err(e) = surface.initialize() {
        warn!("controller unavailable, continuing headless: {e}");
    }

    let mut console_rx = console::spawn_repl();
    let mut render_tick = tokio::time::interval(RENDER_INTERVAL);
    render_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!("bridge running (feedback :{}, mixer {}:{})", args.listen_port, args.mixer_host, args.mixer_port);

    loop {
        tokio::select! {
            _ = render_tick.tick() => {
                surface.render_tick();
            }

            Some(event) = input_rx.recv() => {
                surface.handle_input(&event);
            }

            Some(cmd) = console_rx.recv() => {
                match cmd {
                    ConsoleCommand::Grid => {
                        print!("{}", console::render_grid(&store, surface.mapping()));
                    }
                    ConsoleCommand::Dump => print!("{}", store.read().dump_tree()),
                    ConsoleCommand::Status => console::print_status(&store, surface.is_active()),
                    ConsoleCommand::Reset => {
                        store.reset();
                        surface.force_refresh();
                        println!("state cleared");
                    }
                    ConsoleCommand::Refresh => surface.force_refresh(),
                    ConsoleCommand::Help => console::print_help(),
                    ConsoleCommand::Quit => break,
                }
            }

            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    // Stop the feedback loop first, then drain the apply task; the device is
    // released last so the surface can blank it.
    info!("shutting down");
    let _ = stop_tx.send(true);
    if let Err(e) = receive_task.await {
        warn!("feedback receive task failed: {e}");
    }
    if let Err(e) = apply_task.await {
        warn!("feedback apply task failed: {e}");
    }
    surface.shutdown();

    Ok(())
}

/// Parse a COLSxROWS grid size like "8x8".
fn parse_grid(value: &str) -> Result<(u8, u8)> {
    let parse = |s: &str| s.parse::<u8>().ok().filter(|n| (1..=8).contains(n));
    value
        .split_once('x')
        .and_then(|(c, r)| Some((parse(c)?, parse(r)?)))
        .with_context(|| format!("invalid grid size '{value}' (expected COLSxROWS, 1-8 each)"))
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("could not install CTRL+C handler: {e}");
        std::future::pending::<()>().await;
    }
}
