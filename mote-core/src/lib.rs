//! Mote radio messaging: fragmentation, reliable group delivery, discovery and
//! replicated notebooks over a lossy broadcast medium.
//! Host-driven: no I/O; host passes events and receives actions.

/// Milliseconds on the host's monotonic clock.
pub type Millis = u64;

pub mod config;
pub mod core;
pub mod identity;
pub mod membership;
pub mod notebook;
pub mod protocol;
pub mod reliable;
pub mod scheduler;
pub mod transport;
pub mod wire;

pub use config::Config;
pub use core::{Delivery, MoteCore, OutboundAction, SendError, Timer};
pub use identity::{default_device_name, random_serial};
pub use membership::PeerRecord;
pub use notebook::{Aggregate, Extremum, UnknownOperation};
pub use protocol::{Body, Entry, Envelope, Scope, Value, PROTOCOL_VERSION};
pub use transport::{FragmentError, SenderId};
pub use wire::{decode_frame, encode_frame, Frame, FrameDecodeError, FrameEncodeError};
