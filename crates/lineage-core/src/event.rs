//! Lifecycle events consumed by the process tree.
//!
//! Events are produced by the capture layer, one stream per observing
//! client, and stamped with the host monotonic clock.

use std::fmt;

use lineage_common::time::Timestamp;
use strum::{Display, EnumIter, EnumString};

use crate::process::{ProcessKey, ProcessRecord};

/// Identifier of an observing client.
///
/// The set of clients is fixed and known when the tree is built, so that
/// every watermark starts at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum ClientId {
    /// Client subscribed to authorization events.
    Auth,
    /// Client subscribed to notification events.
    Notify,
}

#[derive(Debug, Clone)]
pub struct Event {
    /// Machine time at which the event was observed.
    pub timestamp: Timestamp,
    /// Subject of the event: the parent for fork, the replaced incarnation
    /// for exec, the exited process for exit.
    pub process: ProcessKey,
    pub payload: Payload,
}

#[derive(Debug, Clone)]
pub enum Payload {
    /// A new child process. Its parent key names the process it was forked from.
    Fork { child: ProcessRecord },
    /// The subject replaced its image. `target` is the new incarnation and
    /// shares the subject pid.
    Exec { target: ProcessRecord },
    Exit,
    /// Any other event. It only advances the client watermark.
    Other,
}

impl Event {
    pub fn fork(timestamp: impl Into<Timestamp>, child: ProcessRecord) -> Self {
        Self {
            timestamp: timestamp.into(),
            process: child.parent_key(),
            payload: Payload::Fork { child },
        }
    }

    pub fn exec(timestamp: impl Into<Timestamp>, old: ProcessKey, target: ProcessRecord) -> Self {
        Self {
            timestamp: timestamp.into(),
            process: old,
            payload: Payload::Exec { target },
        }
    }

    pub fn exit(timestamp: impl Into<Timestamp>, process: ProcessKey) -> Self {
        Self {
            timestamp: timestamp.into(),
            process,
            payload: Payload::Exit,
        }
    }

    pub fn other(timestamp: impl Into<Timestamp>, process: ProcessKey) -> Self {
        Self {
            timestamp: timestamp.into(),
            process,
            payload: Payload::Other,
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Fork { child } => write!(f, "fork {{ child: {} }}", child.key()),
            Payload::Exec { target } => write!(f, "exec {{ target: {} }}", target.key()),
            Payload::Exit => write!(f, "exit"),
            Payload::Other => write!(f, "other"),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}] {}", self.timestamp, self.process, self.payload)
    }
}
