//! Mote envelope schema: the typed logical message carried inside reassembled frames.
//! Encoding is JSON with an internal `type` tag.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Current protocol version. Carried by discovery beacons; mismatches are ignored.
pub const PROTOCOL_VERSION: u8 = 1;

/// A notebook or message value: text or number. Conversions between the two are explicit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            Value::Number(_) => None,
        }
    }

    /// Numeric reading: numbers as-is, text parsed. None unless the result is finite.
    pub fn parse_number(&self) -> Option<f64> {
        let n = match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
        };
        n.filter(|n| n.is_finite())
    }

    /// Whether the value survives the JSON envelope (NaN and infinities do not).
    pub fn is_transmissible(&self) -> bool {
        match self {
            Value::Number(n) => n.is_finite(),
            Value::Text(_) => true,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Value::Text(_))
    }
}

impl fmt::Display for Value {
    /// Text as-is; integral numbers without a fractional part.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// Key/value pair carried by set envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    pub value: Value,
}

/// Type-specific part of an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Body {
    /// Sender's own notebook entry changed.
    NotebookSet { data: Entry },
    NotebookDelete { key: String },
    /// Group-wide shared notebook entry changed.
    NotebookSetShared { data: Entry },
    NotebookDeleteShared { key: String },
    /// Text or number for the devices in `to`.
    Message { to: Scope, data: Value },
    /// Named event for the devices in `to`.
    Signal { to: Scope, name: String },
    /// Liveness beacon. Never acknowledged. Beacons without a version are current.
    Discovery {
        #[serde(default = "current_version")]
        version: u8,
    },
    /// Receipt for envelope `id` sent by `receiver`.
    Acknowledgement { receiver: String },
}

fn current_version() -> u8 {
    PROTOCOL_VERSION
}

/// Audience of a message or signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// One named device, whatever group it is in.
    Direct(String),
    /// Every device in the sender's group.
    Group,
    /// Every device on the channel, across groups.
    Broadcast,
}

impl Scope {
    /// Whether a device named `name` is in the audience, given it shares the sender's group or not.
    pub fn includes(&self, name: &str, same_group: bool) -> bool {
        match self {
            Scope::Direct(receiver) => receiver == name,
            Scope::Group => same_group,
            Scope::Broadcast => true,
        }
    }
}

impl Body {
    /// Whether this kind goes through acknowledged delivery.
    pub fn is_acked(&self) -> bool {
        !matches!(self, Body::Discovery { .. } | Body::Acknowledgement { .. })
    }

    /// Audience of messages and signals. Notebook kinds are group-only and have none.
    pub fn scope(&self) -> Option<&Scope> {
        match self {
            Body::Message { to, .. } | Body::Signal { to, .. } => Some(to),
            _ => None,
        }
    }

    /// The value carried by set and message kinds.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Body::NotebookSet { data } | Body::NotebookSetShared { data } => Some(&data.value),
            Body::Message { data, .. } => Some(data),
            _ => None,
        }
    }
}

/// Logical message: header stamped by the sending layer plus the typed body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: String,
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    #[serde(flatten)]
    pub body: Body,
}

impl Envelope {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode reassembled bytes. Unknown tags and malformed input are errors the caller skips.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(value: Value) -> Envelope {
        Envelope {
            sender: "A".into(),
            group: Some("lab".into()),
            id: Some(42),
            body: Body::NotebookSet {
                data: Entry {
                    key: "temp".into(),
                    value,
                },
            },
        }
    }

    #[test]
    fn set_envelope_json_shape() {
        let env = set(Value::Number(21.0));
        let json: serde_json::Value = serde_json::from_slice(&env.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "NotebookSet");
        assert_eq!(json["sender"], "A");
        assert_eq!(json["group"], "lab");
        assert_eq!(json["id"], 42);
        assert_eq!(json["data"]["key"], "temp");
        assert_eq!(json["data"]["value"], 21.0);
    }

    #[test]
    fn decodes_hand_written_envelopes() {
        let env = Envelope::decode(
            br#"{"type":"NotebookSet","sender":"A","group":null,"id":7,"data":{"key":"k","value":21}}"#,
        )
        .unwrap();
        assert_eq!(env.group, None);
        assert_eq!(env.id, Some(7));
        assert!(matches!(
            env.body,
            Body::NotebookSet { data: Entry { value: Value::Number(n), .. } } if n == 21.0
        ));

        let env = Envelope::decode(
            br#"{"type":"NotebookDelete","sender":"B","group":"g","id":1,"key":"k"}"#,
        )
        .unwrap();
        assert_eq!(env.body, Body::NotebookDelete { key: "k".into() });

        let env =
            Envelope::decode(br#"{"type":"Discovery","sender":"C","group":null,"version":1}"#)
                .unwrap();
        assert_eq!(env.id, None);
        assert_eq!(env.body, Body::Discovery { version: 1 });

        let env = Envelope::decode(
            br#"{"type":"Acknowledgement","sender":"B","group":null,"id":9,"receiver":"A"}"#,
        )
        .unwrap();
        assert_eq!(env.id, Some(9));
        assert_eq!(
            env.body,
            Body::Acknowledgement {
                receiver: "A".into()
            }
        );
    }

    #[test]
    fn discovery_without_version_is_current() {
        let env = Envelope::decode(br#"{"type":"Discovery","sender":"C","group":null}"#).unwrap();
        assert_eq!(env.sender, "C");
        assert_eq!(
            env.body,
            Body::Discovery {
                version: PROTOCOL_VERSION
            }
        );
    }

    #[test]
    fn message_scopes_on_the_wire() {
        let env = Envelope::decode(
            br#"{"type":"Message","sender":"A","group":null,"id":3,"to":{"direct":"C"},"data":"hi"}"#,
        )
        .unwrap();
        assert_eq!(env.body.scope(), Some(&Scope::Direct("C".into())));
        let env = Envelope::decode(
            br#"{"type":"Signal","sender":"A","group":"lab","id":4,"to":"broadcast","name":"wave"}"#,
        )
        .unwrap();
        assert_eq!(env.body.scope(), Some(&Scope::Broadcast));

        let group = Envelope {
            sender: "A".into(),
            group: None,
            id: Some(5),
            body: Body::Message {
                to: Scope::Group,
                data: Value::from(2),
            },
        };
        let json: serde_json::Value = serde_json::from_slice(&group.encode().unwrap()).unwrap();
        assert_eq!(json["to"], "group");
    }

    #[test]
    fn scope_audience() {
        assert!(Scope::Direct("C".into()).includes("C", false));
        assert!(!Scope::Direct("C".into()).includes("B", true));
        assert!(Scope::Group.includes("B", true));
        assert!(!Scope::Group.includes("B", false));
        assert!(Scope::Broadcast.includes("B", false));
    }

    #[test]
    fn text_values_stay_text() {
        let env = set(Value::Text("21".into()));
        let back = Envelope::decode(&env.encode().unwrap()).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn unknown_or_malformed_is_error() {
        assert!(Envelope::decode(br#"{"type":"Teleport","sender":"A","group":null}"#).is_err());
        assert!(Envelope::decode(br#"{"sender":"A","group":null}"#).is_err());
        assert!(Envelope::decode(b"\x00\x01garbage").is_err());
        assert!(Envelope::decode(b"").is_err());
    }

    #[test]
    fn discovery_and_ack_are_not_acked_kinds() {
        assert!(!Body::Discovery { version: 1 }.is_acked());
        assert!(!Body::Acknowledgement {
            receiver: "x".into()
        }
        .is_acked());
        assert!(Body::NotebookDeleteShared { key: "k".into() }.is_acked());
    }

    #[test]
    fn value_conversions() {
        assert_eq!(Value::Number(21.0).to_string(), "21");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(Value::Number(-3.0).to_string(), "-3");
        assert_eq!(Value::from("hi").to_string(), "hi");
        assert_eq!(Value::from(" 4.5 ").parse_number(), Some(4.5));
        assert_eq!(Value::from("four").parse_number(), None);
        assert_eq!(Value::from("NaN").parse_number(), None);
        assert_eq!(Value::from("inf").parse_number(), None);
        assert_eq!(Value::from("-infinity").parse_number(), None);
        assert!(!Value::Number(f64::NAN).is_transmissible());
        assert!(!Value::Number(f64::NEG_INFINITY).is_transmissible());
        assert!(Value::from("NaN").is_transmissible());
        assert_eq!(Value::from("4").as_number(), None);
        assert_eq!(Value::from(4).as_number(), Some(4.0));
        assert_eq!(Value::from(4).as_text(), None);
    }
}
