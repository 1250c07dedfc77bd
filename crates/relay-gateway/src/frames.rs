//! Client transport frame protocol (§6). Externally tagged by frame name so
//! the wire shape matches the spec's own `name { fields }` notation exactly
//! (e.g. `{"subscribe": {"channels": [...]}}`).

use relay_common::error::ErrorFrame;
use relay_domain::event::EventFrame;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe {
        channels: Vec<String>,
        replay_from: Option<String>,
        replay_count: Option<usize>,
        filter: Option<String>,
        correlation_id: Option<Uuid>,
    },
    Unsubscribe {
        channels: Vec<String>,
        correlation_id: Option<Uuid>,
    },
    Publish {
        channel: String,
        #[serde(rename = "type")]
        event_type: String,
        payload: serde_json::Value,
        delivery: Option<String>,
        partition_key: Option<String>,
        correlation_id: Option<Uuid>,
    },
    Ping {
        correlation_id: Option<Uuid>,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum ServerFrame {
    Subscribed {
        channels: Vec<String>,
        correlation_id: Option<Uuid>,
    },
    Unsubscribed {
        channels: Vec<String>,
        correlation_id: Option<Uuid>,
    },
    Ack {
        event_id: String,
        correlation_id: Option<Uuid>,
    },
    Pong {
        correlation_id: Option<Uuid>,
    },
    Event {
        #[serde(flatten)]
        event: EventFrame,
    },
    Error {
        #[serde(flatten)]
        error: ErrorFrame,
    },
}

impl ServerFrame {
    pub fn error(err: &relay_common::error::Error, correlation_id: Option<Uuid>) -> Self {
        ServerFrame::Error {
            error: err.to_frame(correlation_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_frame_parses_minimal_body() {
        let raw = r#"{"frame":"subscribe","channels":["org:00000000-0000-0000-0000-000000000000:chat"]}"#;
        let frame: ClientFrame = serde_json::from_str(raw).unwrap();
        match frame {
            ClientFrame::Subscribe { channels, replay_from, .. } => {
                assert_eq!(channels.len(), 1);
                assert!(replay_from.is_none());
            }
            _ => panic!("expected Subscribe"),
        }
    }

    #[test]
    fn publish_frame_requires_type_and_channel() {
        let raw = r#"{"frame":"publish","channel":"org:x:chat","type":"msg","payload":{}}"#;
        let frame: ClientFrame = serde_json::from_str(raw).unwrap();
        assert!(matches!(frame, ClientFrame::Publish { .. }));
    }

    #[test]
    fn server_frame_serializes_with_frame_tag() {
        let frame = ServerFrame::Pong { correlation_id: None };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["frame"], "pong");
    }
}
