use actix::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolViolation;
use crate::game::{CastleSide, Color, PieceKind};

/// Message sent from a client to the relay
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Join {
        app: String,
        room: String,
        #[serde(default)]
        meta: Value,
    },
    SetMeta {
        patch: Map<String, Value>,
    },
    Direct {
        to: String,
        #[serde(default)]
        payload: Value,
    },
    Signal {
        to: String,
        signal: PeerSignal,
    },
    Broadcast {
        #[serde(default)]
        payload: Value,
    },
}

/// Metadata of one room member as listed in `welcome`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MemberMeta {
    pub id: String,
    pub meta: Value,
}

/// Message sent from the relay to a client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Welcome {
        id: String,
        peers: Vec<String>,
        #[serde(default)]
        peer_meta: Vec<MemberMeta>,
        #[serde(default)]
        meta: Value,
    },
    PeerJoined {
        id: String,
        #[serde(default)]
        meta: Value,
    },
    PeerLeft {
        id: String,
    },
    PeerMeta {
        id: String,
        #[serde(default)]
        meta: Value,
    },
    MetaUpdated {
        meta: Value,
    },
    Direct {
        from: String,
        #[serde(default)]
        payload: Value,
    },
    Broadcast {
        from: String,
        #[serde(default)]
        payload: Value,
    },
    Signal {
        from: String,
        signal: PeerSignal,
    },
    Error {
        reason: String,
    },
}

impl ServerMessage {
    pub fn error(reason: impl Into<String>) -> Self {
        ServerMessage::Error {
            reason: reason.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_m_line_index: Option<u32>,
}

/// Negotiation payload passed through the relay's `signal` message
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PeerSignal {
    Sdp(SessionDescription),
    Ice(IceCandidate),
}

/// Game traffic on an open peer channel
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum GameMessage {
    Start {
        /// Color the receiver plays
        #[serde(alias = "yourColor")]
        assigned_color: Color,
        time_control_id: String,
    },
    Move {
        from: [i32; 2],
        to: [i32; 2],
        #[serde(default, skip_serializing_if = "Option::is_none")]
        marker: Option<CastleSide>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        promotion: Option<PieceKind>,
    },
    Resign {
        color: Color,
    },
    Timeout {
        color: Color,
    },
}

/// Challenge traffic carried in relay `direct` payloads
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum LobbyMessage {
    Challenge {
        room_code: String,
        time_control_id: String,
        from_name: String,
    },
    ChallengeAccepted {
        room_code: String,
        time_control_id: String,
        by_name: String,
    },
    ChallengeDeclined {
        room_code: String,
        by_name: String,
    },
}

/// Decode a JSON value into one of the closed message enums
pub fn decode_payload<T: serde::de::DeserializeOwned>(payload: &Value) -> Result<T, ProtocolViolation> {
    Ok(T::deserialize(payload)?)
}

/// Serialize a message into a JSON value for embedding as a payload
pub fn encode_payload<T: Serialize>(message: &T) -> Value {
    serde_json::to_value(message).unwrap_or(Value::Null)
}

/// Text frame pushed to a relay session actor
#[derive(Message)]
#[rtype(result = "()")]
pub struct RelayText(pub String);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_messages_use_kebab_tags() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "set-meta", "patch": {"status": "playing"}})).unwrap();
        assert!(matches!(msg, ClientMessage::SetMeta { .. }));

        let join = ClientMessage::Join {
            app: "chess3d".into(),
            room: "lobby".into(),
            meta: json!({"name": "Ada"}),
        };
        assert_eq!(
            serde_json::to_value(&join).unwrap(),
            json!({"type": "join", "app": "chess3d", "room": "lobby", "meta": {"name": "Ada"}})
        );
    }

    #[test]
    fn welcome_uses_camel_case_fields() {
        let welcome = ServerMessage::Welcome {
            id: "a".into(),
            peers: vec!["b".into()],
            peer_meta: vec![MemberMeta {
                id: "b".into(),
                meta: json!({"name": "Bo"}),
            }],
            meta: json!({"name": "Ada"}),
        };
        let value = serde_json::to_value(&welcome).unwrap();
        assert_eq!(value["type"], "welcome");
        assert_eq!(value["peerMeta"][0]["id"], "b");
    }

    #[test]
    fn signals_round_trip_with_browser_field_names() {
        let raw = json!({
            "type": "signal",
            "to": "peer",
            "signal": {"ice": {"candidate": "tcp 10.0.0.2 4000", "sdpMid": "0", "sdpMLineIndex": 0}}
        });
        let msg: ClientMessage = serde_json::from_value(raw.clone()).unwrap();
        match &msg {
            ClientMessage::Signal { signal: PeerSignal::Ice(ice), .. } => {
                assert_eq!(ice.sdp_m_line_index, Some(0));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(serde_json::to_value(&msg).unwrap(), raw);

        let sdp: PeerSignal =
            serde_json::from_value(json!({"sdp": {"type": "offer", "sdp": "v=0"}})).unwrap();
        assert_eq!(
            sdp,
            PeerSignal::Sdp(SessionDescription {
                kind: SdpKind::Offer,
                sdp: "v=0".into()
            })
        );
    }

    #[test]
    fn move_message_matches_wire_shape() {
        let value = json!({"type": "move", "from": [6, 4], "to": [4, 4]});
        let msg: GameMessage = decode_payload(&value).unwrap();
        assert_eq!(
            msg,
            GameMessage::Move {
                from: [6, 4],
                to: [4, 4],
                marker: None,
                promotion: None
            }
        );
        assert_eq!(encode_payload(&msg), value);

        let castle: GameMessage =
            decode_payload(&json!({"type": "move", "from": [7, 4], "to": [7, 6], "marker": "castleK"})).unwrap();
        assert!(matches!(castle, GameMessage::Move { marker: Some(CastleSide::Kingside), .. }));
    }

    #[test]
    fn start_accepts_legacy_color_field() {
        let msg: GameMessage =
            decode_payload(&json!({"type": "start", "yourColor": "b", "timeControlId": "blitz"})).unwrap();
        assert_eq!(
            msg,
            GameMessage::Start {
                assigned_color: Color::Black,
                time_control_id: "blitz".into()
            }
        );
        assert_eq!(encode_payload(&msg)["assignedColor"], "b");
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(decode_payload::<GameMessage>(&json!({"type": "move", "from": [6, 4]})).is_err());
        assert!(decode_payload::<GameMessage>(&json!({"type": "resign", "color": "purple"})).is_err());
        assert!(decode_payload::<GameMessage>(&json!({"type": "draw-offer"})).is_err());
        assert!(decode_payload::<GameMessage>(&json!("move")).is_err());
    }

    #[test]
    fn lobby_messages_carry_names() {
        let msg: LobbyMessage = decode_payload(&json!({
            "type": "challenge-declined", "roomCode": "ABC123", "byName": "Bo"
        }))
        .unwrap();
        assert_eq!(
            msg,
            LobbyMessage::ChallengeDeclined {
                room_code: "ABC123".into(),
                by_name: "Bo".into()
            }
        );
    }
}
