//! Wire codec
//!
//! A frame is two lines of UTF-8 text:
//!
//! ```text
//! <action>:<topic>:<version>[:<requestId>[:<parentRequestId>][:<timeoutMillis>]]
//! <payload-json>
//! ```
//!
//! Optional header fields are positional, so the encoder emits the shortest
//! suffix that still carries every field that is set (see [`HeaderShape`]).
//! Empty positional fields decode as absent.

use crate::error::Result;
use crate::protocol::{ActionType, Envelope, Header, Payload};
use crate::request_id::is_uuid4;
use crate::topic;
use semver::{Comparator, Op, Prerelease, Version, VersionReq};
use thiserror::Error;

/// Protocol version spoken by this client unless configured otherwise
pub const PROTOCOL_VERSION: &str = "1.0.0";

const MAX_HEADER_FIELDS: usize = 6;

/// Reasons an inbound frame is rejected. Checked in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid message format: missing header or payload")]
    MissingSection,

    #[error("invalid action type: {0}")]
    InvalidAction(String),

    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    #[error("too many header fields: {0}")]
    TooManyFields(usize),

    #[error("invalid request id: {0}")]
    InvalidRequestId(String),

    #[error("invalid parent request id: {0}")]
    InvalidParentRequestId(String),

    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("failed to parse payload: {0}")]
    InvalidPayload(String),
}

/// The four header layouts the encoder can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderShape {
    /// `action:topic:version`
    Base,
    /// `action:topic:version:id`
    WithRequestId,
    /// `action:topic:version:id:parent`
    WithParent,
    /// `action:topic:version:id:parent:timeout`
    WithTimeout,
}

impl HeaderShape {
    /// Pick the shortest layout that carries every optional field set on `header`
    pub fn of(header: &Header) -> Self {
        if header.timeout.is_some() {
            HeaderShape::WithTimeout
        } else if header.parent_request_id.is_some() {
            HeaderShape::WithParent
        } else if header.request_id.is_some() {
            HeaderShape::WithRequestId
        } else {
            HeaderShape::Base
        }
    }
}

/// Encodes and decodes frames for one local protocol version
#[derive(Debug, Clone)]
pub struct FrameCodec {
    version: Version,
    accepts: VersionReq,
}

impl FrameCodec {
    /// Create a codec that accepts any version with the same major as `version`
    pub fn new(version: Version) -> Self {
        let accepts = VersionReq {
            comparators: vec![Comparator {
                op: Op::Caret,
                major: version.major,
                minor: None,
                patch: None,
                pre: Prerelease::EMPTY,
            }],
        };
        Self { version, accepts }
    }

    /// Local protocol version
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Returns true if frames stamped with `version` are accepted
    pub fn is_compatible(&self, version: &str) -> bool {
        Version::parse(version)
            .map(|v| self.accepts.matches(&v))
            .unwrap_or(false)
    }

    /// Encode a header and payload into frame text
    pub fn encode(&self, header: &Header, payload: &Payload) -> Result<String> {
        let mut frame = encode_header(header);
        frame.push('\n');
        frame.push_str(&serde_json::to_string(payload)?);
        Ok(frame)
    }

    /// Size in bytes of the encoded frame
    pub fn frame_size(&self, header: &Header, payload: &Payload) -> Result<usize> {
        Ok(self.encode(header, payload)?.len())
    }

    /// Decode frame text. Nothing is returned unless every check passes.
    pub fn decode(&self, frame: &str) -> std::result::Result<Envelope, DecodeError> {
        let (header_line, payload_line) = frame
            .split_once('\n')
            .ok_or(DecodeError::MissingSection)?;
        let header_line = header_line.strip_suffix('\r').unwrap_or(header_line);
        let payload_line = payload_line.trim_end_matches(['\r', '\n']);
        if header_line.is_empty() || payload_line.is_empty() {
            return Err(DecodeError::MissingSection);
        }

        let header = self.decode_header(header_line)?;

        let value: serde_json::Value = serde_json::from_str(payload_line)
            .map_err(|e| DecodeError::InvalidPayload(e.to_string()))?;
        let payload = Payload::from_value(value).map_err(|kind| {
            DecodeError::InvalidPayload(format!("expected a JSON object, got {}", kind))
        })?;

        Ok(Envelope { header, payload })
    }

    fn decode_header(&self, line: &str) -> std::result::Result<Header, DecodeError> {
        let fields: Vec<&str> = line.split(':').collect();
        let field = |i: usize| fields.get(i).copied().unwrap_or("");

        let action = field(0)
            .parse::<ActionType>()
            .map_err(DecodeError::InvalidAction)?;

        let topic = field(1);
        if !topic::is_valid(topic) {
            return Err(DecodeError::InvalidTopic(topic.to_string()));
        }

        let version = field(2);
        if !self.is_compatible(version) {
            return Err(DecodeError::UnsupportedVersion(version.to_string()));
        }

        if fields.len() > MAX_HEADER_FIELDS {
            return Err(DecodeError::TooManyFields(fields.len()));
        }

        let request_id = non_empty(field(3));
        if let Some(id) = request_id {
            if !is_uuid4(id) {
                return Err(DecodeError::InvalidRequestId(id.to_string()));
            }
        }

        let parent_request_id = non_empty(field(4));
        if let Some(id) = parent_request_id {
            if !is_uuid4(id) {
                return Err(DecodeError::InvalidParentRequestId(id.to_string()));
            }
        }

        let timeout = match non_empty(field(5)) {
            Some(raw) => Some(
                raw.parse::<u64>()
                    .map_err(|_| DecodeError::InvalidTimeout(raw.to_string()))?,
            ),
            None => None,
        };

        Ok(Header {
            action,
            topic: topic.to_string(),
            version: version.to_string(),
            request_id: request_id.map(str::to_string),
            parent_request_id: parent_request_id.map(str::to_string),
            timeout,
        })
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(Version::new(1, 0, 0))
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn encode_header(header: &Header) -> String {
    let mut line = format!("{}:{}:{}", header.action, header.topic, header.version);
    let id = header.request_id.as_deref().unwrap_or("");
    let parent = header.parent_request_id.as_deref().unwrap_or("");

    match HeaderShape::of(header) {
        HeaderShape::Base => {}
        HeaderShape::WithRequestId => {
            line.push(':');
            line.push_str(id);
        }
        HeaderShape::WithParent => {
            line.push(':');
            line.push_str(id);
            line.push(':');
            line.push_str(parent);
        }
        HeaderShape::WithTimeout => {
            let timeout = header.timeout.unwrap_or_default();
            line.push_str(&format!(":{}:{}:{}", id, parent, timeout));
        }
    }

    line
}
