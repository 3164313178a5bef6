//! Host-driven API: MoteCore receives frames, ticks and application calls, returns actions.
//!
//! The core owns every table (scheduler, reassembly, pending acks, dedup, peers,
//! notebooks). The host calls it from one loop and performs the returned actions.

use std::iter;

use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::identity;
use crate::membership::{Membership, PeerRecord};
use crate::notebook::{self, Aggregate, Extremum, Notebook, SharedNotebook};
use crate::protocol::{Body, Entry, Envelope, Scope, Value, PROTOCOL_VERSION};
use crate::reliable::{AckOutcome, AckTable, DedupCache, EnvelopeId, IdCounter, Outstanding};
use crate::scheduler::Scheduler;
use crate::transport::{FragmentError, SenderId, Transport};
use crate::Millis;

/// Timer payloads held by the core's scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timer {
    Heartbeat,
    Sweep,
    Housekeeping,
    Retry(EnvelopeId),
    Giveup(EnvelopeId),
}

/// Something the application should learn about.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// A peer's notebook entry changed (`value: None` for a delete).
    NotebookUpdated {
        device: String,
        key: String,
        value: Option<Value>,
    },
    /// A shared entry changed.
    SharedUpdated {
        group: Option<String>,
        key: String,
        value: Option<Value>,
    },
    Message {
        sender: String,
        to: Scope,
        data: Value,
    },
    Signal {
        sender: String,
        to: Scope,
        name: String,
    },
    PeerJoined(String),
    PeerLeft(String),
}

/// Action for host to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundAction {
    /// Broadcast one frame on the radio.
    Transmit(Vec<u8>),
    /// Hand to the application.
    Deliver(Delivery),
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Fragment(#[from] FragmentError),
    #[error("{0} cannot be sent; only finite numbers are carried")]
    NonFinite(f64),
}

/// Main coordinator. Host passes events; core returns actions.
pub struct MoteCore {
    name: String,
    group: Option<String>,
    channel: u8,
    config: Config,
    scheduler: Scheduler<Timer>,
    transport: Transport,
    ids: IdCounter,
    acks: AckTable,
    dedup: DedupCache,
    membership: Membership,
    notebook: Notebook,
    shared: SharedNotebook,
    started: bool,
}

impl MoteCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, Config::default())
    }

    pub fn with_config(name: impl Into<String>, config: Config) -> Self {
        Self {
            name: name.into(),
            group: None,
            channel: 0,
            scheduler: Scheduler::new(),
            transport: Transport::new(rand::random(), config.reassembly_expiry_ms),
            ids: IdCounter::random(),
            acks: AckTable::new(),
            dedup: DedupCache::new(config.dedup_window_ms),
            membership: Membership::new(),
            notebook: Notebook::new(),
            shared: SharedNotebook::new(),
            started: false,
            config,
        }
    }

    /// Core named after the radio serial (see [`identity::default_device_name`]).
    pub fn from_serial(serial: u32, config: Config) -> Self {
        Self::with_config(identity::default_device_name(serial), config)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Rename this device. Own notebook entries follow the new name.
    /// Envelopes still awaiting acknowledgement are abandoned: peers address acks to the old name.
    pub fn set_device_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if name == self.name {
            return;
        }
        for abandoned in self.acks.clear() {
            self.cancel_timers(&abandoned);
        }
        self.notebook.rename_device(&self.name, &name);
        info!(from = %self.name, to = %name, "renamed");
        self.name = name;
    }

    /// Radio channel the host should tune to. Stored only; the host applies it.
    pub fn set_channel(&mut self, channel: u8) {
        self.channel = channel;
    }

    /// Switch group. Peers of the old group are dropped and the new group is greeted.
    pub fn set_group(&mut self, group: Option<String>) -> Vec<OutboundAction> {
        let mut out = Vec::new();
        if group == self.group {
            return out;
        }
        let old: Vec<String> = self.membership.names().map(str::to_owned).collect();
        for peer in old {
            self.membership.remove(&peer);
            self.drop_peer(&peer, &mut out);
        }
        info!(from = ?self.group, to = ?group, "group changed");
        self.group = group;
        if self.started {
            self.announce(&mut out);
        }
        out
    }

    /// Schedule heartbeat, sweep and housekeeping, and announce presence. Idempotent.
    pub fn start(&mut self, now: Millis) -> Vec<OutboundAction> {
        let mut out = Vec::new();
        if self.started {
            return out;
        }
        self.started = true;
        let c = &self.config;
        self.scheduler
            .schedule(Timer::Heartbeat, c.heartbeat_interval_ms, true, now);
        self.scheduler
            .schedule(Timer::Sweep, c.sweep_interval_ms, true, now);
        self.scheduler
            .schedule(Timer::Housekeeping, c.housekeeping_interval_ms, true, now);
        info!(name = %self.name, group = ?self.group, "mote started");
        self.announce(&mut out);
        out
    }

    /// Periodic tick: run due timers (heartbeat, sweep, retries, giveups, expiry purge).
    pub fn tick(&mut self, now: Millis) -> Vec<OutboundAction> {
        let mut out = Vec::new();
        for id in self.scheduler.due(now) {
            if let Some(timer) = self.scheduler.fire(id, now) {
                self.on_timer(timer, now, &mut out);
            }
        }
        self.scheduler.compact();
        out
    }

    /// Process one frame received from the radio.
    pub fn on_frame(&mut self, sender: SenderId, bytes: &[u8], now: Millis) -> Vec<OutboundAction> {
        let mut out = Vec::new();
        let Some(message) = self.transport.on_frame(sender, bytes, now) else {
            return out;
        };
        match Envelope::decode(&message) {
            Ok(envelope) => self.on_envelope(envelope, now, &mut out),
            Err(e) => debug!(sender, error = %e, "skipping undecodable envelope"),
        }
        out
    }

    /// Set own `key` and replicate it to the group.
    pub fn set_value(
        &mut self,
        key: &str,
        value: impl Into<Value>,
        now: Millis,
    ) -> Result<Vec<OutboundAction>, SendError> {
        let value = value.into();
        let out = self.send_reliable(
            Body::NotebookSet {
                data: Entry {
                    key: key.to_owned(),
                    value: value.clone(),
                },
            },
            now,
        )?;
        self.notebook.set(&self.name, key, value);
        Ok(out)
    }

    pub fn delete_value(&mut self, key: &str, now: Millis) -> Result<Vec<OutboundAction>, SendError> {
        let out = self.send_reliable(Body::NotebookDelete { key: key.to_owned() }, now)?;
        self.notebook.delete(&self.name, key);
        Ok(out)
    }

    /// Set `key` in the current group's shared notebook.
    pub fn set_shared_value(
        &mut self,
        key: &str,
        value: impl Into<Value>,
        now: Millis,
    ) -> Result<Vec<OutboundAction>, SendError> {
        let value = value.into();
        let out = self.send_reliable(
            Body::NotebookSetShared {
                data: Entry {
                    key: key.to_owned(),
                    value: value.clone(),
                },
            },
            now,
        )?;
        self.shared.set(self.group.as_deref(), key, value);
        Ok(out)
    }

    pub fn delete_shared_value(
        &mut self,
        key: &str,
        now: Millis,
    ) -> Result<Vec<OutboundAction>, SendError> {
        let out = self.send_reliable(Body::NotebookDeleteShared { key: key.to_owned() }, now)?;
        self.shared.delete(self.group.as_deref(), key);
        Ok(out)
    }

    /// Send a value to one device, the group, or every device on the channel.
    pub fn send_message(
        &mut self,
        to: Scope,
        data: impl Into<Value>,
        now: Millis,
    ) -> Result<Vec<OutboundAction>, SendError> {
        self.send_reliable(
            Body::Message {
                to,
                data: data.into(),
            },
            now,
        )
    }

    /// Send a named event to one device, the group, or every device on the channel.
    pub fn send_signal(
        &mut self,
        to: Scope,
        name: &str,
        now: Millis,
    ) -> Result<Vec<OutboundAction>, SendError> {
        self.send_reliable(
            Body::Signal {
                to,
                name: name.to_owned(),
            },
            now,
        )
    }

    /// Live peers in discovery order, then self.
    pub fn members(&self) -> Vec<&str> {
        self.membership
            .names()
            .chain(iter::once(self.name.as_str()))
            .collect()
    }

    pub fn peers(&self) -> &[PeerRecord] {
        self.membership.peers()
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.notebook.get(&self.name, key)
    }

    pub fn value_from(&self, device: &str, key: &str) -> Option<&Value> {
        self.notebook.get(device, key)
    }

    /// Text form of `device`'s `key`; empty if absent.
    pub fn string_value_from(&self, device: &str, key: &str) -> String {
        text_or_empty(self.value_from(device, key))
    }

    /// Numeric reading of `device`'s `key`; 0 if absent or not a number.
    pub fn number_value_from(&self, device: &str, key: &str) -> f64 {
        number_or_zero(self.value_from(device, key))
    }

    pub fn has_string_key_from(&self, device: &str, key: &str) -> bool {
        self.value_from(device, key).is_some_and(Value::is_text)
    }

    pub fn has_number_key_from(&self, device: &str, key: &str) -> bool {
        self.value_from(device, key).is_some_and(Value::is_number)
    }

    pub fn string_value(&self, key: &str) -> String {
        self.string_value_from(&self.name, key)
    }

    pub fn number_value(&self, key: &str) -> f64 {
        self.number_value_from(&self.name, key)
    }

    pub fn has_string_key(&self, key: &str) -> bool {
        self.has_string_key_from(&self.name, key)
    }

    pub fn has_number_key(&self, key: &str) -> bool {
        self.has_number_key_from(&self.name, key)
    }

    /// Shared entry of the current group.
    pub fn shared_value(&self, key: &str) -> Option<&Value> {
        self.shared.get(self.group.as_deref(), key)
    }

    /// Shared entry of any group this device has held data for.
    pub fn shared_value_in(&self, group: Option<&str>, key: &str) -> Option<&Value> {
        self.shared.get(group, key)
    }

    pub fn shared_string_value(&self, key: &str) -> String {
        text_or_empty(self.shared_value(key))
    }

    pub fn shared_number_value(&self, key: &str) -> f64 {
        number_or_zero(self.shared_value(key))
    }

    pub fn has_shared_string_key(&self, key: &str) -> bool {
        self.shared_value(key).is_some_and(Value::is_text)
    }

    pub fn has_shared_number_key(&self, key: &str) -> bool {
        self.shared_value(key).is_some_and(Value::is_number)
    }

    pub fn shared_keys(&self) -> Vec<&str> {
        self.shared.keys(self.group.as_deref())
    }

    /// Aggregate numeric values of `key` across members. 0 when nobody contributes.
    pub fn aggregate(&self, key: &str, op: Aggregate) -> f64 {
        let members = self.members();
        let values: Vec<f64> = self
            .notebook
            .numbers_for(key, &members)
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        notebook::aggregate(&values, op)
    }

    /// Member holding the largest/smallest number for `key` (first in member order on ties).
    pub fn device_with_extremum(&self, key: &str, which: Extremum) -> Option<&str> {
        let members = self.members();
        notebook::device_with_extremum(&self.notebook.numbers_for(key, &members), which)
    }

    pub fn device_with_number(&self, key: &str, value: f64) -> Option<&str> {
        let members = self.members();
        self.notebook
            .numbers_for(key, &members)
            .into_iter()
            .find(|&(_, v)| v == value)
            .map(|(m, _)| m)
    }

    /// Member whose `key` reads as `text` (numbers compare by their text form).
    pub fn device_with_text(&self, key: &str, text: &str) -> Option<&str> {
        let members = self.members();
        self.notebook
            .values_for(key, &members)
            .into_iter()
            .find(|(_, v)| v.to_string() == text)
            .map(|(m, _)| m)
    }

    /// Every member's value for `key`, in member order.
    pub fn values_for_key(&self, key: &str) -> Vec<(&str, &Value)> {
        let members = self.members();
        self.notebook.values_for(key, &members)
    }

    pub fn keys_of(&self, device: &str) -> Vec<&str> {
        self.notebook.keys(device)
    }

    /// Envelopes still waiting for at least one acknowledgement.
    pub fn pending_acks(&self) -> usize {
        self.acks.len()
    }

    pub fn pending_reassemblies(&self) -> usize {
        self.transport.pending_reassemblies()
    }

    pub fn scheduled_tasks(&self) -> usize {
        self.scheduler.len()
    }

    fn on_timer(&mut self, timer: Timer, now: Millis, out: &mut Vec<OutboundAction>) {
        match timer {
            Timer::Heartbeat => self.announce(out),
            Timer::Sweep => {
                for peer in self
                    .membership
                    .evict_stale(now, self.config.stale_after_ms)
                {
                    self.drop_peer(&peer, out);
                }
            }
            Timer::Housekeeping => {
                let frames = self.transport.purge_expired(now);
                let ids = self.dedup.purge_expired(now);
                if frames + ids > 0 {
                    trace!(reassemblies = frames, dedup = ids, "expired state purged");
                }
            }
            Timer::Retry(id) => {
                let Some(payload) = self.acks.retransmission(id).map(<[u8]>::to_vec) else {
                    return;
                };
                trace!(id, pending = ?self.acks.pending_peers(id), "retransmitting");
                if let Err(e) = self.transmit(&payload, out) {
                    warn!(id, error = %e, "retransmission failed");
                }
            }
            Timer::Giveup(id) => {
                if let Some(abandoned) = self.acks.give_up(id) {
                    self.scheduler.cancel(abandoned.retry);
                    debug!(id, unacked = ?abandoned.pending, "giving up");
                }
            }
        }
    }

    fn on_envelope(&mut self, envelope: Envelope, now: Millis, out: &mut Vec<OutboundAction>) {
        if envelope.sender == self.name {
            trace!("ignoring own envelope");
            return;
        }
        match envelope.body {
            Body::Acknowledgement { receiver } => {
                let Some(id) = envelope.id else {
                    return;
                };
                if receiver != self.name {
                    return;
                }
                match self.acks.acknowledge(id, &envelope.sender) {
                    AckOutcome::Completed(done) => {
                        self.cancel_timers(&done);
                        debug!(id, "acknowledged by every peer");
                    }
                    AckOutcome::Recorded => trace!(id, peer = %envelope.sender, "ack"),
                    AckOutcome::Unknown => trace!(id, peer = %envelope.sender, "stale ack"),
                }
            }
            Body::Discovery { version } => {
                if envelope.group != self.group {
                    return;
                }
                if version != PROTOCOL_VERSION {
                    debug!(peer = %envelope.sender, version, "ignoring discovery of other version");
                    return;
                }
                self.saw_peer(&envelope.sender, now, out);
            }
            body => {
                let same_group = envelope.group == self.group;
                let reaches_me = body
                    .scope()
                    .is_some_and(|to| to.includes(&self.name, same_group));
                if !same_group && !reaches_me {
                    trace!(group = ?envelope.group, "not our group");
                    return;
                }
                let Some(id) = envelope.id else {
                    debug!(peer = %envelope.sender, "acked envelope without id");
                    return;
                };
                self.send_ack(id, &envelope.sender, out);
                if same_group {
                    self.saw_peer(&envelope.sender, now, out);
                }
                if !self.dedup.first_delivery(&envelope.sender, id, now) {
                    trace!(id, peer = %envelope.sender, "duplicate");
                    return;
                }
                self.dispatch(envelope.sender, envelope.group, same_group, body, out);
            }
        }
    }

    fn dispatch(
        &mut self,
        sender: String,
        group: Option<String>,
        same_group: bool,
        body: Body,
        out: &mut Vec<OutboundAction>,
    ) {
        let delivery = match body {
            Body::NotebookSet { data } => {
                self.notebook.set(&sender, &data.key, data.value.clone());
                Delivery::NotebookUpdated {
                    device: sender,
                    key: data.key,
                    value: Some(data.value),
                }
            }
            Body::NotebookDelete { key } => {
                self.notebook.delete(&sender, &key);
                Delivery::NotebookUpdated {
                    device: sender,
                    key,
                    value: None,
                }
            }
            Body::NotebookSetShared { data } => {
                self.shared
                    .set(group.as_deref(), &data.key, data.value.clone());
                Delivery::SharedUpdated {
                    group,
                    key: data.key,
                    value: Some(data.value),
                }
            }
            Body::NotebookDeleteShared { key } => {
                self.shared.delete(group.as_deref(), &key);
                Delivery::SharedUpdated {
                    group,
                    key,
                    value: None,
                }
            }
            Body::Message { to, data } => {
                if !to.includes(&self.name, same_group) {
                    return;
                }
                Delivery::Message { sender, to, data }
            }
            Body::Signal { to, name } => {
                if !to.includes(&self.name, same_group) {
                    return;
                }
                Delivery::Signal { sender, to, name }
            }
            Body::Discovery { .. } | Body::Acknowledgement { .. } => return,
        };
        out.push(OutboundAction::Deliver(delivery));
    }

    /// Stamp, serialize and send once; track acks if anyone is listening.
    /// A direct envelope waits for its receiver only; the others wait for every group peer.
    fn send_reliable(&mut self, body: Body, now: Millis) -> Result<Vec<OutboundAction>, SendError> {
        debug_assert!(body.is_acked());
        if let Some(&Value::Number(n)) = body.value().filter(|v| !v.is_transmissible()) {
            return Err(SendError::NonFinite(n));
        }
        let peers: Vec<String> = match body.scope() {
            Some(Scope::Direct(receiver)) if *receiver == self.name => Vec::new(),
            Some(Scope::Direct(receiver)) => vec![receiver.clone()],
            _ => self.membership.names().map(str::to_owned).collect(),
        };
        let id = self.ids.next_id();
        let envelope = Envelope {
            sender: self.name.clone(),
            group: self.group.clone(),
            id: Some(id),
            body,
        };
        let payload = envelope.encode()?;
        let mut out = Vec::new();
        self.transmit(&payload, &mut out)?;
        if !peers.is_empty() {
            let retry = self
                .scheduler
                .schedule(Timer::Retry(id), self.config.retry_interval_ms, true, now);
            let giveup = self
                .scheduler
                .schedule(Timer::Giveup(id), self.config.giveup_after_ms, false, now);
            debug!(id, peers = peers.len(), "awaiting acknowledgements");
            self.acks.track(id, payload, peers, retry, giveup);
        }
        Ok(out)
    }

    fn send_ack(&mut self, id: EnvelopeId, to: &str, out: &mut Vec<OutboundAction>) {
        let ack = Envelope {
            sender: self.name.clone(),
            group: self.group.clone(),
            id: Some(id),
            body: Body::Acknowledgement {
                receiver: to.to_owned(),
            },
        };
        self.broadcast(&ack, out);
    }

    fn announce(&mut self, out: &mut Vec<OutboundAction>) {
        let beacon = Envelope {
            sender: self.name.clone(),
            group: self.group.clone(),
            id: None,
            body: Body::Discovery {
                version: PROTOCOL_VERSION,
            },
        };
        self.broadcast(&beacon, out);
    }

    /// Unacknowledged send (discovery, acks). Failures are logged and dropped.
    fn broadcast(&mut self, envelope: &Envelope, out: &mut Vec<OutboundAction>) {
        let result = envelope
            .encode()
            .map_err(SendError::from)
            .and_then(|bytes| self.transmit(&bytes, out).map_err(SendError::from));
        if let Err(e) = result {
            warn!(error = %e, "dropping unacknowledged envelope");
        }
    }

    fn transmit(&mut self, bytes: &[u8], out: &mut Vec<OutboundAction>) -> Result<(), FragmentError> {
        let frames = self.transport.send(bytes)?;
        out.extend(frames.into_iter().map(OutboundAction::Transmit));
        Ok(())
    }

    fn saw_peer(&mut self, peer: &str, now: Millis, out: &mut Vec<OutboundAction>) {
        if self.membership.upsert(peer, now) {
            info!(peer, "peer joined");
            out.push(OutboundAction::Deliver(Delivery::PeerJoined(peer.to_owned())));
        }
    }

    /// Forget a peer that is no longer a member: its entries and its pending acks.
    fn drop_peer(&mut self, peer: &str, out: &mut Vec<OutboundAction>) {
        let entries = self.notebook.forget_device(peer);
        for done in self.acks.forget_peer(peer) {
            self.cancel_timers(&done);
        }
        info!(peer, entries, "peer left");
        out.push(OutboundAction::Deliver(Delivery::PeerLeft(peer.to_owned())));
    }

    fn cancel_timers(&mut self, done: &Outstanding) {
        self.scheduler.cancel(done.retry);
        self.scheduler.cancel(done.giveup);
    }
}

fn text_or_empty(value: Option<&Value>) -> String {
    value.map(Value::to_string).unwrap_or_default()
}

fn number_or_zero(value: Option<&Value>) -> f64 {
    value.and_then(Value::parse_number).unwrap_or(0.0)
}
