//! External event traces
//!
//! A trace is a plain-text list of timed contact and message events, one per
//! line, in the style of the connectivity traces recorded from real devices:
//!
//! ```text
//! # time CONN a b up|down [rate]
//! 0    CONN 0 1 up 250k
//! 0    C    M1 0 2 1k 60
//! 30   CONN 0 1 down
//! # time C id from to size [ttl]; `to` may be a,b,c or *
//! 40   C    M2 1 0,2 500
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use ferry_core::{HostId, Message, MessageId, Recipients, SimTime, parse_size};
use thiserror::Error;

/// Errors raised while reading a trace
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("Failed to read trace {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Trace line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

/// One timed event of a trace
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    /// A contact between two hosts comes up or goes down
    Connection {
        time: SimTime,
        a: HostId,
        b: HostId,
        up: bool,
        /// Transfer rate in bytes per second, `None` for the run default
        rate: Option<f64>,
    },

    /// A host creates a message
    Create {
        time: SimTime,
        id: MessageId,
        from: HostId,
        to: Recipients,
        size: u64,
        /// TTL in minutes, `None` for the router default
        ttl: Option<u32>,
    },
}

impl TraceEvent {
    pub fn time(&self) -> SimTime {
        match self {
            TraceEvent::Connection { time, .. } | TraceEvent::Create { time, .. } => *time,
        }
    }

    /// Highest host address the event mentions
    fn max_host(&self) -> Option<HostId> {
        match self {
            TraceEvent::Connection { a, b, .. } => Some((*a).max(*b)),
            TraceEvent::Create { from, to, .. } => {
                let group = match to {
                    Recipients::Unicast(to) => Some(*to),
                    Recipients::Multicast(group) => group.last().copied(),
                    Recipients::Broadcast => None,
                };
                Some(group.map_or(*from, |g| g.max(*from)))
            }
        }
    }

    /// Build the message a `Create` event stands for
    pub fn to_message(&self) -> Option<Message> {
        let TraceEvent::Create {
            time,
            id,
            from,
            to,
            size,
            ttl,
        } = self
        else {
            return None;
        };
        let message = Message::new(id.clone(), *from, to.clone(), *size, *time);
        Some(match ttl {
            Some(minutes) => message.with_ttl(*minutes),
            None => message,
        })
    }
}

/// Events of a trace, sorted by time
///
/// Events with equal timestamps keep their order in the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    events: Vec<TraceEvent>,
}

impl Trace {
    /// Parse a trace from text
    pub fn parse(text: &str) -> Result<Self, TraceError> {
        let mut events = Vec::new();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let event = parse_line(line).map_err(|reason| TraceError::Parse {
                line: index + 1,
                reason,
            })?;
            events.push(event);
        }
        events.sort_by(|a, b| a.time().total_cmp(&b.time()));
        Ok(Self { events })
    }

    /// Read and parse a trace file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TraceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of hosts needed to run the trace
    pub fn host_count(&self) -> u32 {
        self.events
            .iter()
            .filter_map(TraceEvent::max_host)
            .max()
            .map_or(0, |h| h.0 + 1)
    }

    /// Time of the last event
    pub fn end_time(&self) -> SimTime {
        self.events.last().map_or(0.0, TraceEvent::time)
    }
}

fn parse_line(line: &str) -> Result<TraceEvent, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [time, kind, rest @ ..] = fields.as_slice() else {
        return Err(format!("expected at least two fields in {line:?}"));
    };
    let time: SimTime = time
        .parse()
        .map_err(|_| format!("invalid time {time:?}"))?;
    if !time.is_finite() || time < 0.0 {
        return Err(format!("time {time} must be a non-negative number"));
    }

    match *kind {
        "CONN" => parse_connection(time, rest),
        "C" => parse_create(time, rest),
        other => Err(format!("unknown event type {other:?}")),
    }
}

fn parse_connection(time: SimTime, fields: &[&str]) -> Result<TraceEvent, String> {
    let (a, b, state, rate) = match fields {
        [a, b, state] => (a, b, state, None),
        [a, b, state, rate] => (a, b, state, Some(rate)),
        _ => return Err("expected CONN <a> <b> up|down [rate]".to_string()),
    };
    let up = match *state {
        "up" => true,
        "down" => false,
        other => return Err(format!("expected up or down, got {other:?}")),
    };
    let rate = match rate {
        Some(raw) => Some(
            parse_size(raw)
                .map(|r| r as f64)
                .ok_or_else(|| format!("invalid rate {raw:?}"))?,
        ),
        None => None,
    };
    let (a, b) = (parse_host(a)?, parse_host(b)?);
    if a == b {
        return Err(format!("host {a} cannot connect to itself"));
    }
    Ok(TraceEvent::Connection { time, a, b, up, rate })
}

fn parse_create(time: SimTime, fields: &[&str]) -> Result<TraceEvent, String> {
    let (id, from, to, size, ttl) = match fields {
        [id, from, to, size] => (id, from, to, size, None),
        [id, from, to, size, ttl] => (id, from, to, size, Some(ttl)),
        _ => return Err("expected C <id> <from> <to> <size> [ttl]".to_string()),
    };
    let from = parse_host(from)?;
    let to = parse_recipients(to)?;
    if to == Recipients::Unicast(from) {
        return Err(format!("message {id} is addressed to its own sender"));
    }
    let size = parse_size(size).ok_or_else(|| format!("invalid size {size:?}"))?;
    let ttl = match ttl {
        Some(raw) => Some(raw.parse().map_err(|_| format!("invalid ttl {raw:?}"))?),
        None => None,
    };
    Ok(TraceEvent::Create {
        time,
        id: MessageId::from(*id),
        from,
        to,
        size,
        ttl,
    })
}

fn parse_host(raw: &str) -> Result<HostId, String> {
    raw.parse()
        .map(HostId)
        .map_err(|_| format!("invalid host address {raw:?}"))
}

fn parse_recipients(raw: &str) -> Result<Recipients, String> {
    if raw == "*" {
        return Ok(Recipients::Broadcast);
    }
    if !raw.contains(',') {
        return parse_host(raw).map(Recipients::Unicast);
    }
    let group = raw
        .split(',')
        .map(parse_host)
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(Recipients::Multicast(group))
}
