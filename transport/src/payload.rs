//! JSON wire envelope, one datagram per message:
//! `{"type": <kind>, "data": {...}}`. Identifiers travel as decimal
//! strings so the full 160 bits round-trip.

use serde::{Deserialize, Serialize};
use udht_logic::Id;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBody {
    pub protocol_name: String,
    pub random_id: Id,
    pub sender: Id,
    pub sender_host: String,
    pub sender_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp_time: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub contact: Id,
    pub protocol_name: String,
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseBody {
    pub random_id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contacts: Option<Vec<ContactInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ResponseBody {
    pub fn empty(random_id: Id) -> Self {
        ResponseBody {
            random_id,
            ..Default::default()
        }
    }

    pub fn with_contacts(random_id: Id, contacts: Vec<ContactInfo>) -> Self {
        ResponseBody {
            random_id,
            contacts: Some(contacts),
            ..Default::default()
        }
    }

    pub fn with_value(random_id: Id, value: String) -> Self {
        ResponseBody {
            random_id,
            value: Some(value),
            ..Default::default()
        }
    }

    pub fn error(random_id: Id, message: impl Into<String>) -> Self {
        ResponseBody {
            random_id,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Packet {
    Ping(RequestBody),
    Store(RequestBody),
    FindNode(RequestBody),
    FindValue(RequestBody),
    PingResponse(ResponseBody),
    StoreResponse(ResponseBody),
    FindNodeResponse(ResponseBody),
    FindValueResponse(ResponseBody),
    Error(ResponseBody),
}

impl Packet {
    /// The response payload, when this is a response-shaped packet.
    pub fn response(&self) -> Option<&ResponseBody> {
        match self {
            Packet::PingResponse(body)
            | Packet::StoreResponse(body)
            | Packet::FindNodeResponse(body)
            | Packet::FindValueResponse(body)
            | Packet::Error(body) => Some(body),
            _ => None,
        }
    }
}

/// Best-effort nonce recovery from a datagram that failed to decode, so
/// the error reply can still correlate. Zero when nothing usable is there.
pub fn extract_random_id(raw: &[u8]) -> Id {
    serde_json::from_slice::<serde_json::Value>(raw)
        .ok()
        .and_then(|v| match &v["data"]["random_id"] {
            serde_json::Value::String(s) => Id::from_decimal(s).ok(),
            serde_json::Value::Number(n) => n.as_u64().map(Id::from_u64),
            _ => None,
        })
        .unwrap_or(Id::ZERO)
}
