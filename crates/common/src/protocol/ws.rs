// WebSocket message types for the huddle-sync.v1 protocol.
//
// The same frames travel over the SSE fallback: server->client frames as
// `data:` lines, client->server frames as HTTP POST bodies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{
    Location, MetricUpdate, PresenceRecord, PublishJob, PublishOptions, TextOperation,
};

pub const CURRENT_PROTOCOL_VERSION: &str = "huddle-sync.v1";

/// All message types in the huddle-sync.v1 protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Client -> Server: initial handshake.
    Hello {
        protocol_version: String,
        session_token: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        resume_token: Option<String>,
    },

    /// Server -> Client: handshake acknowledgement.
    HelloAck {
        server_time: String,
        resume_accepted: bool,
        resume_token: String,
    },

    /// Client -> Server: register interest in a topic.
    Subscribe { topic: Topic },

    /// Client -> Server: drop interest in a topic.
    Unsubscribe { topic: Topic },

    /// Bidirectional: a full presence record for one user.
    Presence { record: PresenceRecord },

    /// Server -> Client: a user left the subscribed scope.
    PresenceLeave { user_id: String },

    /// Bidirectional: typing indicator for a location.
    Typing {
        user_id: String,
        location: Location,
        active: bool,
    },

    /// Bidirectional: one collaborative text edit.
    Operation { content_id: Uuid, op: TextOperation },

    /// Server -> Client: confirms a client-originated operation.
    OperationAck {
        content_id: Uuid,
        op_id: Uuid,
        clock: u64,
    },

    /// Client -> Server: publish-job control.
    JobRequest { action: JobAction },

    /// Server -> Client: authoritative publish-job state.
    JobUpdate { job: PublishJob },

    /// Server -> Client: coalesced analytics updates.
    MetricBatch { updates: Vec<MetricUpdate> },

    /// Server -> Client: error.
    Error {
        code: String,
        message: String,
        retryable: bool,
    },
}

/// Publish-job control actions carried by `JobRequest`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum JobAction {
    Start {
        job: PublishJob,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        options: Option<PublishOptions>,
    },
    Cancel { job_id: String },
    Retry {
        job_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        platforms: Option<Vec<String>>,
    },
}

/// A server-side subscription topic.
///
/// Wire form is a stable string: `workspace:<uuid>`, `content:<uuid>`,
/// `execution:<uuid>`, `metric:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Topic {
    Workspace(Uuid),
    Content(Uuid),
    Execution(Uuid),
    Metric(String),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workspace(id) => write!(f, "workspace:{id}"),
            Self::Content(id) => write!(f, "content:{id}"),
            Self::Execution(id) => write!(f, "execution:{id}"),
            Self::Metric(id) => write!(f, "metric:{id}"),
        }
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.to_string()
    }
}

impl FromStr for Topic {
    type Err = ProtocolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (kind, raw_id) = value
            .split_once(':')
            .ok_or_else(|| ProtocolError::InvalidTopic(value.to_string()))?;
        if kind == "metric" {
            if raw_id.is_empty() {
                return Err(ProtocolError::InvalidTopic(value.to_string()));
            }
            return Ok(Self::Metric(raw_id.to_string()));
        }
        let id = Uuid::parse_str(raw_id)
            .map_err(|_| ProtocolError::InvalidTopic(value.to_string()))?;
        match kind {
            "workspace" => Ok(Self::Workspace(id)),
            "content" => Ok(Self::Content(id)),
            "execution" => Ok(Self::Execution(id)),
            _ => Err(ProtocolError::InvalidTopic(value.to_string())),
        }
    }
}

impl TryFrom<String> for Topic {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid topic `{0}`")]
    InvalidTopic(String),
}
