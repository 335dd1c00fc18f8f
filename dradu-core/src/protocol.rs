//! Wire protocol for the dradu session server.
//!
//! A message is a text header followed by an optional binary body:
//!
//! ```text
//! dradu/<MAJOR>.<MINOR> <Type>\n
//! <key>:<value>\n
//! ...
//! contentLength:<n>\n
//! \n
//! <n bytes of body>
//! ```
//!
//! This module owns the version constant and the codec; the transport layer
//! only moves the bytes.
//!
//! # Design goals
//! - **Closed type set**: inbound types parse into [`MsgType`]; an unknown
//!   name is a [`ProtocolError`], never a silently-passed string.
//! - **Major-version gate**: `dradu/<ver>` is compatible iff the major
//!   component equals ours; minor differences are accepted.
//! - **Synthetic length**: `contentLength` is emitted from the body on
//!   encode and extracted into [`MessageHead::content_length`] on parse, so
//!   it never round-trips as an ordinary header.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

pub const PROTOCOL_VERSION: &str = "0.1";

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("malformed start line")]
    MalformedStartLine,
    #[error("unknown scheme `{0}`")]
    WrongScheme(String),
    #[error("incompatible protocol version `{0}`")]
    IncompatibleVersion(String),
    #[error("unknown message type `{0}`")]
    UnknownType(String),
    #[error("header line `{0}` has no colon")]
    MalformedHeader(String),
    #[error("contentLength `{0}` is not a non-negative integer")]
    BadContentLength(String),
}

/// The closed set of message types. Parsing is case-insensitive; the
/// canonical rendering is capitalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Init,
    Join,
    Ok,
    Synced,
    Map,
    File,
    Msg,
    Player,
    Quit,
}

impl MsgType {
    pub fn as_str(self) -> &'static str {
        match self {
            MsgType::Init => "Init",
            MsgType::Join => "Join",
            MsgType::Ok => "Ok",
            MsgType::Synced => "Synced",
            MsgType::Map => "Map",
            MsgType::File => "File",
            MsgType::Msg => "Msg",
            MsgType::Player => "Player",
            MsgType::Quit => "Quit",
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MsgType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const ALL: [MsgType; 9] = [
            MsgType::Init,
            MsgType::Join,
            MsgType::Ok,
            MsgType::Synced,
            MsgType::Map,
            MsgType::File,
            MsgType::Msg,
            MsgType::Player,
            MsgType::Quit,
        ];
        ALL.into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ProtocolError::UnknownType(s.to_string()))
    }
}

fn compatible_version(ver: &str) -> bool {
    ver.split('.').next() == PROTOCOL_VERSION.split('.').next()
}

/// A full message, ready to encode or just reassembled from the wire.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MsgType,
    headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(kind: MsgType) -> Self {
        Self {
            kind,
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// A `contentType:json` message whose body is the serialized payload.
    pub fn json<T: Serialize>(kind: MsgType, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(kind)
            .with_header("contentType", "json")
            .with_body(serde_json::to_vec(payload)?))
    }

    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!("dradu/{PROTOCOL_VERSION} {}\n", self.kind);
        for (key, value) in &self.headers {
            out.push_str(key);
            out.push(':');
            out.push_str(value);
            out.push('\n');
        }
        out.push_str(&format!("contentLength:{}\n\n", self.body.len()));
        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

/// The parsed header of one message; the body, if any, still has to be read
/// off the connection.
#[derive(Debug, PartialEq)]
pub struct MessageHead {
    pub kind: MsgType,
    pub headers: BTreeMap<String, String>,
    pub content_length: usize,
}

impl MessageHead {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let mut lines = text.trim_end().lines();
        let start = lines.next().ok_or(ProtocolError::MalformedStartLine)?;
        let (proto, type_name) = start
            .split_once(' ')
            .ok_or(ProtocolError::MalformedStartLine)?;
        let (scheme, version) = proto
            .split_once('/')
            .ok_or(ProtocolError::MalformedStartLine)?;
        if scheme != "dradu" {
            return Err(ProtocolError::WrongScheme(scheme.to_string()));
        }
        if !compatible_version(version) {
            return Err(ProtocolError::IncompatibleVersion(version.to_string()));
        }
        let kind = type_name.parse()?;

        let mut headers = BTreeMap::new();
        let mut content_length = 0;
        for line in lines {
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| ProtocolError::MalformedHeader(line.to_string()))?;
            let value = value.trim_start();
            if key == "contentLength" {
                content_length = value
                    .parse()
                    .map_err(|_| ProtocolError::BadContentLength(value.to_string()))?;
            } else {
                headers.insert(key.to_string(), value.to_string());
            }
        }
        Ok(Self {
            kind,
            headers,
            content_length,
        })
    }

    pub fn into_message(self, body: Vec<u8>) -> Message {
        Message {
            kind: self.kind,
            headers: self.headers,
            body,
        }
    }
}
