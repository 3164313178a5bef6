// Mote Linux host: emulated radio over UDP multicast, stdin console, single core loop.

mod config;
mod console;
mod radio;

use std::time::{Duration, Instant};

use anyhow::Context;
use mote_core::{Delivery, Millis, MoteCore, OutboundAction, Scope};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use crate::console::Command;
use crate::radio::Radio;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("mote-linux {}", VERSION);
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load();
    let rt = tokio::runtime::Runtime::new().context("starting runtime")?;
    rt.block_on(run(cfg))
}

async fn run(cfg: config::Config) -> anyhow::Result<()> {
    let serial = cfg.serial.unwrap_or_else(mote_core::random_serial);
    let mut core = match &cfg.name {
        Some(name) => MoteCore::with_config(name.clone(), cfg.timing.clone()),
        None => MoteCore::from_serial(serial, cfg.timing.clone()),
    };
    core.set_group(cfg.group.clone());
    core.set_channel(cfg.channel);

    let mut radio = tune(&cfg, core.channel(), serial).await?;
    let clock = Instant::now();
    let now = || clock.elapsed().as_millis() as Millis;
    let loss_rate = cfg.loss_rate.clamp(0.0, 1.0);
    let mut rng = StdRng::from_entropy();

    tracing::info!(
        name = core.name(),
        serial,
        group = ?core.group(),
        channel = core.channel(),
        "mote up; type help for commands"
    );
    perform(&radio, core.start(now())).await;

    let mut ticker = tokio::time::interval(Duration::from_millis(cfg.tick_ms.max(1)));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let actions = core.tick(now());
                perform(&radio, actions).await;
            }
            received = radio.recv() => match received {
                Ok(rx) => {
                    if loss_rate > 0.0 && rng.gen_bool(loss_rate) {
                        tracing::trace!(sender = rx.sender, "dropping frame (simulated loss)");
                        continue;
                    }
                    let actions = core.on_frame(rx.sender, &rx.frame, now());
                    perform(&radio, actions).await;
                }
                Err(e) => tracing::warn!(error = %e, "radio receive failed"),
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let channel = core.channel();
                    match console::parse(&line) {
                        Ok(Some(cmd)) => match execute(&mut core, cmd, now()) {
                            Ok(actions) => perform(&radio, actions).await,
                            Err(e) => println!("error: {e:#}"),
                        },
                        Ok(None) => {}
                        Err(e) => println!("{e}"),
                    }
                    if core.channel() != channel {
                        match tune(&cfg, core.channel(), serial).await {
                            Ok(r) => radio = r,
                            Err(e) => {
                                println!("error: {e:#}");
                                core.set_channel(channel);
                            }
                        }
                    }
                }
                Ok(None) => {
                    tracing::debug!("stdin closed; console disabled");
                    stdin_open = false;
                }
                Err(e) => tracing::warn!(error = %e, "reading stdin failed"),
            },
            res = &mut shutdown => {
                res?;
                tracing::info!("shutting down");
                break;
            }
        }
    }
    Ok(())
}

async fn tune(cfg: &config::Config, channel: u8, serial: u32) -> anyhow::Result<Radio> {
    let port = cfg.port_for(channel);
    Radio::tune(&cfg.multicast_group, port, serial)
        .await
        .with_context(|| format!("joining {}:{} for channel {}", cfg.multicast_group, port, channel))
}

/// Transmit frames and print deliveries.
async fn perform(radio: &Radio, actions: Vec<OutboundAction>) {
    for action in actions {
        match action {
            OutboundAction::Transmit(frame) => {
                if let Err(e) = radio.send(&frame).await {
                    tracing::warn!(error = %e, "radio send failed");
                }
            }
            OutboundAction::Deliver(delivery) => report(&delivery),
        }
    }
}

fn report(delivery: &Delivery) {
    match delivery {
        Delivery::NotebookUpdated {
            device,
            key,
            value: Some(v),
        } => println!("[{device}] {key} = {v}"),
        Delivery::NotebookUpdated {
            device,
            key,
            value: None,
        } => println!("[{device}] {key} deleted"),
        Delivery::SharedUpdated {
            key, value: Some(v), ..
        } => println!("[shared] {key} = {v}"),
        Delivery::SharedUpdated {
            key, value: None, ..
        } => println!("[shared] {key} deleted"),
        Delivery::Message {
            sender,
            to: Scope::Direct(_),
            data,
        } => println!("<{sender}> (to you) {data}"),
        Delivery::Message { sender, data, .. } => println!("<{sender}> {data}"),
        Delivery::Signal { sender, name, .. } => println!("<{sender}> !{name}"),
        Delivery::PeerJoined(peer) => tracing::info!(peer = %peer, "joined"),
        Delivery::PeerLeft(peer) => tracing::info!(peer = %peer, "left"),
    }
}

fn execute(core: &mut MoteCore, cmd: Command, now: Millis) -> anyhow::Result<Vec<OutboundAction>> {
    let actions = match cmd {
        Command::Set { key, value } => core.set_value(&key, value.value(), now)?,
        Command::Delete { key } => core.delete_value(&key, now)?,
        Command::Share { key, value } => core.set_shared_value(&key, value.value(), now)?,
        Command::Unshare { key } => core.delete_shared_value(&key, now)?,
        Command::Get { key, device } => {
            let device = device.as_deref().unwrap_or(core.name());
            match core.value_from(device, &key) {
                Some(v) => println!("{v}"),
                None => println!("(unset)"),
            }
            Vec::new()
        }
        Command::Shared { key } => {
            match core.shared_value(&key) {
                Some(v) => println!("{v}"),
                None => println!("(unset)"),
            }
            Vec::new()
        }
        Command::Aggregate { op, key } => {
            println!("{}", core.aggregate(&key, op));
            Vec::new()
        }
        Command::Who { which, key } => {
            println!("{}", core.device_with_extremum(&key, which).unwrap_or("(none)"));
            Vec::new()
        }
        Command::Find { key, value } => {
            let value = value.value();
            let found = match value.as_number() {
                Some(n) => core.device_with_number(&key, n),
                None => core.device_with_text(&key, &value.to_string()),
            };
            println!("{}", found.unwrap_or("(none)"));
            Vec::new()
        }
        Command::List { device } => {
            let device = device.as_deref().unwrap_or(core.name());
            for key in core.keys_of(device) {
                if let Some(v) = core.value_from(device, key) {
                    println!("{key} = {v}");
                }
            }
            Vec::new()
        }
        Command::Peers => {
            for peer in core.peers() {
                println!("{} (last seen {} ms ago)", peer.name, now.saturating_sub(peer.last_seen));
            }
            println!("{} (self)", core.name());
            Vec::new()
        }
        Command::Say { to, data } => core.send_message(to.scope(), data.value(), now)?,
        Command::Signal { to, name } => core.send_signal(to.scope(), &name, now)?,
        Command::Name { name: None } => {
            println!("{}", core.name());
            Vec::new()
        }
        Command::Name { name: Some(name) } => {
            core.set_device_name(name);
            Vec::new()
        }
        Command::Group { group: None } => {
            println!("{}", core.group().unwrap_or("(none)"));
            Vec::new()
        }
        Command::Group { group: Some(group) } => core.set_group((group != "-").then_some(group)),
        Command::Channel { channel: None } => {
            println!("{}", core.channel());
            Vec::new()
        }
        Command::Channel { channel: Some(ch) } => {
            core.set_channel(ch);
            Vec::new()
        }
    };
    Ok(actions)
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
