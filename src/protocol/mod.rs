//! Wire messages for the five gateway RPCs.
//!
//! The gateway assumes a schema-typed carrier; these structs are the schema.
//! `GatewayRequest`/`GatewayReply` are the framed bodies the TCP carrier in
//! `network` moves around, one request per connection, one reply frame per
//! stream element.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AutoOffsetReset {
    #[default]
    Unset,
    Earliest,
    Latest,
}

/// Names a (session, partition) pair handed out by SUBSCRIBE and echoed
/// back on RECEIVE and ACK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub session_id: String,
    pub partition: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub topic: String,
    pub key: Bytes,
    pub value: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReply {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub topic: String,
    pub group: String,
    pub group_version: u32,
    pub auto_offset_reset: AutoOffsetReset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeReply {
    pub assignment: Assignment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveRequest {
    pub assignment: Assignment,
    /// Reserved for auto-ack on reconnect; carried but not consulted.
    pub last_known_offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiveRecord {
    pub offset: u64,
    pub replay: bool,
    pub key: Bytes,
    pub value: Bytes,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiveReply {
    pub record: ReceiveRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckRequest {
    pub assignment: Assignment,
    pub offset: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetOffsetsRequest {
    pub topic: String,
    pub group: String,
    pub group_version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetOffsetsReply {
    pub offsets: HashMap<u32, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum StatusCode {
    Internal = 13,
}

/// Transport-level terminal status, only ever sent for failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Status {
        Status {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

/// Framed request body, one per connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "verb")]
pub enum GatewayRequest {
    Publish(PublishRequest),
    Subscribe(SubscribeRequest),
    Receive(ReceiveRequest),
    Ack(AckRequest),
    GetOffsets(GetOffsetsRequest),
}

/// Framed reply body. Unary verbs send exactly one, streaming verbs send a
/// sequence; `Error` is always terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum GatewayReply {
    Publish(PublishReply),
    Assignment(SubscribeReply),
    Record(ReceiveReply),
    Ack {},
    Offsets(GetOffsetsReply),
    Error(Status),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_round_trips_as_json() {
        let request = GatewayRequest::Subscribe(SubscribeRequest {
            topic: "events".to_string(),
            group: "billing".to_string(),
            group_version: 2,
            auto_offset_reset: AutoOffsetReset::Earliest,
        });
        let encoded = serde_json::to_vec(&request).unwrap();
        let decoded: GatewayRequest = serde_json::from_slice(&encoded).unwrap();
        match decoded {
            GatewayRequest::Subscribe(r) => {
                assert_eq!(r.topic, "events");
                assert_eq!(r.group_version, 2);
                assert_eq!(r.auto_offset_reset, AutoOffsetReset::Earliest);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_auto_offset_reset_defaults_to_unset() {
        assert_eq!(AutoOffsetReset::default(), AutoOffsetReset::Unset);
    }
}
