//! Wire messages
//!
//! Server frames are JSON objects tagged by which keys they carry, not by a
//! discriminant; one frame may carry a clock reference, a liveness flag and
//! several list deltas at once. Known keys decode into typed fields and
//! every other key lands in [`ServerMessage::topics`].
//!
//! ```text
//! {"server_time": 1700000000.5, "live": true,
//!  "riders_points": {"alice": {"add_block": [..]}}}
//! ```
//!
//! Client frames carry the full subscription set:
//!
//! ```text
//! {"subscriptions": ["riders_points", "riders_values"]}
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::constants::VALUE_TOPICS;

/// One server frame (also the shape of `GET state`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    /// Server clock, seconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_time: Option<f64>,
    /// Fingerprint of the client build the server expects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_hash: Option<String>,
    /// What the server is about to send.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sending: Option<String>,
    /// Whether the event is live.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live: Option<bool>,
    /// Server is still loading the event; ask again later.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loading: Option<bool>,
    /// Current config version tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
    /// Current routes version tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routes_hash: Option<String>,
    /// Error the server hit while serving this client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Every other key: value maps and list topics.
    #[serde(flatten)]
    pub topics: BTreeMap<String, Value>,
}

impl ServerMessage {
    /// Decode a text frame.
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Value-map topics carried by this frame, as `(topic, {entity: values})`.
    pub fn value_topics(&self) -> impl Iterator<Item = (&str, &serde_json::Map<String, Value>)> {
        self.topics.iter().filter_map(|(topic, value)| {
            let entities = value.as_object()?;
            is_value_topic(topic).then_some((topic.as_str(), entities))
        })
    }

    /// List topics carried by this frame, as `(topic, {entity: descriptor})`.
    ///
    /// Only object-valued keys qualify.
    pub fn list_topics(&self) -> impl Iterator<Item = (&str, &serde_json::Map<String, Value>)> {
        self.topics.iter().filter_map(|(topic, value)| {
            let entities = value.as_object()?;
            (!is_value_topic(topic)).then_some((topic.as_str(), entities))
        })
    }

    /// Whether the frame carries anything beyond the clock.
    pub fn is_empty(&self) -> bool {
        self == &Self {
            server_time: self.server_time,
            ..Self::default()
        }
    }
}

/// Whether `topic` is a value-map topic rather than a list topic.
pub fn is_value_topic(topic: &str) -> bool {
    VALUE_TOPICS.contains(&topic)
}

/// Client-to-server frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFrame {
    /// Every active topic, sorted.
    pub subscriptions: Vec<String>,
}

impl ClientFrame {
    /// Frame announcing `topics`.
    pub fn subscriptions(topics: &BTreeSet<String>) -> Self {
        Self {
            subscriptions: topics.iter().cloned().collect(),
        }
    }

    /// Encode to a text frame.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{\"subscriptions\":[]}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_mixed_frame() {
        let text = json!({
            "server_time": 1_700_000_000.5,
            "live": true,
            "config_hash": "abc",
            "riders_values": {"alice": {"speed": 30}},
            "riders_points": {"alice": {"add_block": []}},
            "riders_off_route": {"bob": {}},
            "status": "ignored scalar"
        })
        .to_string();
        let message = ServerMessage::from_text(&text).unwrap();

        assert_eq!(message.server_time, Some(1_700_000_000.5));
        assert_eq!(message.live, Some(true));
        assert_eq!(message.config_hash.as_deref(), Some("abc"));
        assert!(message.client_hash.is_none());

        let values: Vec<_> = message.value_topics().map(|(t, _)| t).collect();
        assert_eq!(values, vec!["riders_values"]);
        let lists: Vec<_> = message.list_topics().map(|(t, _)| t).collect();
        assert_eq!(lists, vec!["riders_off_route", "riders_points"]);
    }

    #[test]
    fn test_loading_and_live_flags() {
        let message = ServerMessage::from_text(r#"{"loading": true}"#).unwrap();
        assert_eq!(message.loading, Some(true));
        let message = ServerMessage::from_text(r#"{"live": false}"#).unwrap();
        assert_eq!(message.live, Some(false));
        assert!(!message.is_empty());
    }

    #[test]
    fn test_error_frame() {
        let message =
            ServerMessage::from_text(r#"{"error": "Error getting tracker: timeout"}"#).unwrap();
        assert_eq!(message.error.as_deref(), Some("Error getting tracker: timeout"));
        assert!(message.topics.is_empty());
        assert!(!message.is_empty());
    }

    #[test]
    fn test_empty_frame() {
        assert!(ServerMessage::from_text("{}").unwrap().is_empty());
        assert!(ServerMessage::from_text(r#"{"server_time": 1}"#).unwrap().is_empty());
        assert!(ServerMessage::from_text("[]").is_err());
    }

    #[test]
    fn test_client_frame() {
        let topics: BTreeSet<String> = ["riders_values", "riders_points"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            ClientFrame::subscriptions(&topics).to_text(),
            r#"{"subscriptions":["riders_points","riders_values"]}"#
        );
    }
}
