//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;

/// Host configuration. File: ~/.config/mote/config.toml or /etc/mote/config.toml.
/// Env overrides: MOTE_NAME, MOTE_GROUP, MOTE_CHANNEL, MOTE_SERIAL.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Device name. Defaults to the name derived from `serial`.
    #[serde(default)]
    pub name: Option<String>,
    /// Group to join at startup (ungrouped if absent).
    #[serde(default)]
    pub group: Option<String>,
    /// Radio channel, any `u8` (default 7).
    #[serde(default = "default_channel")]
    pub channel: u8,
    /// Emulated radio serial. Random when absent.
    #[serde(default)]
    pub serial: Option<u32>,
    /// Multicast group carrying the emulated radio (default 239.255.77.77).
    #[serde(default = "default_multicast_group")]
    pub multicast_group: String,
    /// UDP port of channel 0; channel `n` uses `port_base + n` (default 47700).
    #[serde(default = "default_port_base")]
    pub port_base: u16,
    /// Core tick period (default 20).
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Fraction of received frames dropped on purpose, for testing (default 0).
    #[serde(default)]
    pub loss_rate: f64,
    /// Protocol timing.
    #[serde(default)]
    pub timing: mote_core::Config,
}

fn default_channel() -> u8 {
    7
}
fn default_multicast_group() -> String {
    "239.255.77.77".to_string()
}
fn default_port_base() -> u16 {
    47700
}
fn default_tick_ms() -> u64 {
    20
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: None,
            group: None,
            channel: default_channel(),
            serial: None,
            multicast_group: default_multicast_group(),
            port_base: default_port_base(),
            tick_ms: default_tick_ms(),
            loss_rate: 0.0,
            timing: mote_core::Config::default(),
        }
    }
}

impl Config {
    /// UDP port standing in for `channel`.
    pub fn port_for(&self, channel: u8) -> u16 {
        self.port_base.saturating_add(u16::from(channel))
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |k| std::env::var(k).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("MOTE_NAME") {
        c.name = Some(s);
    }
    if let Some(s) = var("MOTE_GROUP") {
        c.group = Some(s);
    }
    if let Some(s) = var("MOTE_CHANNEL") {
        match s.parse::<u8>() {
            Ok(ch) => c.channel = ch,
            Err(_) => tracing::warn!(value = %s, "ignoring invalid MOTE_CHANNEL"),
        }
    }
    if let Some(s) = var("MOTE_SERIAL") {
        match s.parse::<u32>() {
            Ok(serial) => c.serial = Some(serial),
            Err(_) => tracing::warn!(value = %s, "ignoring invalid MOTE_SERIAL"),
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/mote/config.toml"));
    }
    out.push(PathBuf::from("/etc/mote/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<Config>(&s) {
                    Ok(c) => return Some(c),
                    Err(e) => tracing::warn!(path = %p.display(), error = %e, "bad config file"),
                },
                Err(e) => tracing::warn!(path = %p.display(), error = %e, "unreadable config file"),
            }
            break;
        }
    }
    None
}
