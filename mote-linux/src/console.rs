//! Console commands read from stdin.

use clap::{Args, Parser, Subcommand};
use mote_core::{Aggregate, Extremum, Scope, Value};

#[derive(Parser, Debug)]
#[command(name = "mote", no_binary_name = true)]
struct Line {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Set own notebook entry.
    Set {
        key: String,
        #[command(flatten)]
        value: Words,
    },
    /// Delete own entry.
    #[command(name = "del")]
    Delete { key: String },
    /// Set group-shared entry.
    Share {
        key: String,
        #[command(flatten)]
        value: Words,
    },
    /// Delete group-shared entry.
    Unshare { key: String },
    /// Read an entry (own by default).
    Get { key: String, device: Option<String> },
    /// Read group-shared entry.
    Shared { key: String },
    /// Aggregate a key over the group: max, min, sum or avg.
    #[command(name = "agg")]
    Aggregate { op: Aggregate, key: String },
    /// Device holding the max or min of a key.
    Who { which: Extremum, key: String },
    /// First device whose entry equals value.
    Find {
        key: String,
        #[command(flatten)]
        value: Words,
    },
    /// Keys held by a device.
    List { device: Option<String> },
    /// Members in discovery order.
    Peers,
    /// Send a message to the group, one device, or everyone on the channel.
    Say {
        #[command(flatten)]
        to: Audience,
        #[command(flatten)]
        data: Words,
    },
    /// Send a signal to the group, one device, or everyone on the channel.
    Signal {
        #[command(flatten)]
        to: Audience,
        name: String,
    },
    /// Show or change device name.
    Name { name: Option<String> },
    /// Show or change group; `-` leaves.
    Group {
        #[arg(allow_hyphen_values = true)]
        group: Option<String>,
    },
    /// Show or change channel.
    Channel { channel: Option<u8> },
}

/// Rest of the line, read as one value.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct Words {
    #[arg(required = true, num_args = 1.., allow_hyphen_values = true, trailing_var_arg = true)]
    words: Vec<String>,
}

impl Words {
    pub fn value(&self) -> Value {
        parse_value(&self.words.join(" "))
    }
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct Audience {
    /// Only this device, in any group.
    #[arg(short, long, value_name = "DEVICE", conflicts_with = "all")]
    to: Option<String>,
    /// Every device on the channel, across groups.
    #[arg(short, long)]
    all: bool,
}

impl Audience {
    pub fn scope(&self) -> Scope {
        match (&self.to, self.all) {
            (Some(device), _) => Scope::Direct(device.clone()),
            (None, true) => Scope::Broadcast,
            (None, false) => Scope::Group,
        }
    }
}

/// Numbers when the text reads as a finite number, text otherwise.
pub fn parse_value(s: &str) -> Value {
    match s.parse::<f64>() {
        Ok(n) if n.is_finite() => Value::Number(n),
        _ => Value::Text(s.to_owned()),
    }
}

/// Parse one input line. Blank lines yield `None`; `help` comes back as a displayable error.
pub fn parse(line: &str) -> Result<Option<Command>, clap::Error> {
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.is_empty() {
        return Ok(None);
    }
    Line::try_parse_from(words).map(|l| Some(l.command))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn value_of(cmd: Command) -> Value {
        match cmd {
            Command::Set { value, .. } | Command::Share { value, .. } | Command::Find { value, .. } => {
                value.value()
            }
            Command::Say { data, .. } => data.value(),
            other => panic!("no value in {other:?}"),
        }
    }

    #[test]
    fn blank_is_nothing() {
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn set_parses_numbers_and_text() {
        let set = parse("set temp 21").unwrap().unwrap();
        assert!(matches!(&set, Command::Set { key, .. } if key == "temp"));
        assert_eq!(value_of(set), Value::Number(21.0));
        assert_eq!(
            value_of(parse("set motd hello there").unwrap().unwrap()),
            Value::from("hello there")
        );
        assert_eq!(value_of(parse("set temp -3").unwrap().unwrap()), Value::Number(-3.0));
        assert!(parse("set temp").is_err());
    }

    #[test]
    fn non_finite_stays_text() {
        assert_eq!(parse_value("inf"), Value::from("inf"));
        assert_eq!(parse_value("NaN"), Value::from("NaN"));
        assert_eq!(parse_value("-2.5"), Value::Number(-2.5));
    }

    #[test]
    fn aggregates_and_extrema() {
        assert_eq!(
            parse("agg avg temp").unwrap(),
            Some(Command::Aggregate {
                op: Aggregate::Avg,
                key: "temp".into(),
            })
        );
        assert_eq!(
            parse("who min temp").unwrap(),
            Some(Command::Who {
                which: Extremum::Min,
                key: "temp".into(),
            })
        );
        assert!(parse("who sum temp").is_err());
    }

    #[test]
    fn message_audiences() {
        let Some(Command::Say { to, data }) = parse("say --to zuzuz hi there").unwrap() else {
            panic!("not a say");
        };
        assert_eq!(to.scope(), Scope::Direct("zuzuz".into()));
        assert_eq!(data.value(), Value::from("hi there"));

        let Some(Command::Signal { to, name }) = parse("signal wave").unwrap() else {
            panic!("not a signal");
        };
        assert_eq!(to.scope(), Scope::Group);
        assert_eq!(name, "wave");

        let Some(Command::Signal { to, .. }) = parse("signal -a fire").unwrap() else {
            panic!("not a signal");
        };
        assert_eq!(to.scope(), Scope::Broadcast);

        assert!(parse("say --to zuzuz").is_err());
        assert!(parse("say --to zuzuz --all hi").is_err());
    }

    #[test]
    fn group_and_channel() {
        assert_eq!(parse("group").unwrap(), Some(Command::Group { group: None }));
        assert_eq!(
            parse("group -").unwrap(),
            Some(Command::Group {
                group: Some("-".into())
            })
        );
        assert_eq!(
            parse("group lab").unwrap(),
            Some(Command::Group {
                group: Some("lab".into())
            })
        );
        assert_eq!(
            parse("channel 255").unwrap(),
            Some(Command::Channel { channel: Some(255) })
        );
        assert!(parse("channel 256").is_err());
        assert!(parse("frobnicate").is_err());
    }

    #[test]
    fn help_is_rendered_by_clap() {
        assert_eq!(parse("help").unwrap_err().kind(), ErrorKind::DisplayHelp);
        assert_eq!(parse("help say").unwrap_err().kind(), ErrorKind::DisplayHelp);
    }

    #[test]
    fn get_with_device() {
        assert_eq!(
            parse("get temp zuzuv").unwrap(),
            Some(Command::Get {
                key: "temp".into(),
                device: Some("zuzuv".into()),
            })
        );
    }
}
