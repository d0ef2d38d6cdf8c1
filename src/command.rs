use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::time::Instant;

use crate::protocol::{CommandKind, CommandType};

pub type Parameters = Map<String, Value>;

pub(crate) fn hex_bytes<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

/// How a command reached the printer state, which decides whether text
/// may be merged into the previous entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOrigin {
    /// Decoded from a connection's byte stream.
    #[default]
    Stream,
    /// A distinct call that must start a new text block.
    Direct,
    /// A second observation of output already recorded through another path.
    Mirrored,
}

/// One decoded protocol unit.
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    pub timestamp: DateTime<Local>,
    #[serde(skip)]
    pub received: Instant,
    pub command_type: CommandType,
    #[serde(serialize_with = "hex_bytes")]
    pub raw_data: Vec<u8>,
    pub kind: CommandKind,
    pub origin: CommandOrigin,
}

impl Command {
    pub fn new(kind: CommandKind, raw_data: Vec<u8>) -> Self {
        Self {
            timestamp: Local::now(),
            received: Instant::now(),
            command_type: kind.command_type(),
            raw_data,
            kind,
            origin: CommandOrigin::Stream,
        }
    }

    /// A text command whose raw bytes are the UTF-8 of `text`.
    pub fn text(text: &str) -> Self {
        Self::new(
            CommandKind::Text {
                text: text.to_string(),
            },
            text.as_bytes().to_vec(),
        )
    }

    pub fn with_origin(mut self, origin: CommandOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// The decoded key/value parameters, without the type tag.
    pub fn parameters(&self) -> Parameters {
        match serde_json::to_value(&self.kind) {
            Ok(Value::Object(mut map)) => {
                map.remove("type");
                map
            }
            _ => Parameters::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Qr,
    Image,
    Barcode,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Qr => "qr",
            ContentType::Image => "image",
            ContentType::Barcode => "barcode",
        }
    }
}

/// One logical unit of printed output.
#[derive(Debug, Clone, Serialize)]
pub struct PrintJob {
    pub timestamp: DateTime<Local>,
    pub content_type: ContentType,
    #[serde(serialize_with = "hex_bytes")]
    pub data: Vec<u8>,
    pub parameters: Parameters,
}

impl PrintJob {
    pub fn new(content_type: ContentType, data: Vec<u8>, parameters: Parameters) -> Self {
        Self {
            timestamp: Local::now(),
            content_type,
            data,
            parameters,
        }
    }

    pub fn summary(&self) -> String {
        format!("{} at {}", self.content_type.as_str(), self.timestamp.to_rfc3339())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}
