//! Text protocol spoken with the X-Plane plugin
//!
//! Outbound (SimLink → plugin):
//! - `read:<ref>\n` subscribes to a dataref
//! - `write:<ref>:<value>\n` sets a dataref or fires a command
//!
//! Inbound (plugin → SimLink):
//! - `<prefix>:<ref>:<value>\n`, reported to the router as
//!   `<prefix>:<ref>` with `<value>` as payload

use crate::ProtocolError;

/// Message sent to the X-Plane plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XPlaneMessage {
    /// Subscribe to periodic updates for a dataref
    Read { reference: String },
    /// Set a dataref or trigger a command
    Write { reference: String, value: String },
}

impl XPlaneMessage {
    /// Encode to a wire line including the trailing delimiter
    pub fn encode(&self) -> String {
        match self {
            XPlaneMessage::Read { reference } => format!("read:{}\n", reference),
            XPlaneMessage::Write { reference, value } => {
                format!("write:{}:{}\n", reference, value)
            }
        }
    }
}

/// Value update received from the X-Plane plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XPlaneUpdate {
    pub prefix: String,
    pub reference: String,
    pub value: String,
}

impl XPlaneUpdate {
    /// Parse one inbound line (without delimiter)
    ///
    /// The line must split on `:` into exactly three fields. Datarefs
    /// containing `:` are therefore rejected.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let mut fields = line.split(':');
        match (fields.next(), fields.next(), fields.next(), fields.next()) {
            (Some(prefix), Some(reference), Some(value), None) => Ok(Self {
                prefix: prefix.to_string(),
                reference: reference.to_string(),
                value: value.to_string(),
            }),
            _ => Err(ProtocolError::MalformedMessage(line.to_string())),
        }
    }

    /// Name reported to the router, `<prefix>:<ref>`
    pub fn sim_event_name(&self) -> String {
        format!("{}:{}", self.prefix, self.reference)
    }
}
