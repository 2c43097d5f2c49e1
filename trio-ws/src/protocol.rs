use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GameError;
use crate::ledger::RecordEntry;
use crate::model::{JoinUser, Room};

/// Inbound command codes.
pub mod cmd {
    pub const READY: i32 = 0;
    pub const START: i32 = 1;
    pub const LOOK_CARD: i32 = 2;
    pub const GIVE_UP: i32 = 3;
    pub const BET: i32 = 4;
    pub const COMPARE: i32 = 5;
    pub const AUTO_BET: i32 = 6;
}

/// Outbound event codes. 0..5 double as seat states.
pub mod event {
    pub const JOIN_USER: i32 = 0;
    pub const READY_USER: i32 = 1;
    pub const PLAYING_USER: i32 = 2;
    pub const GIVE_UP_USER: i32 = 3;
    pub const COMPARE_LOSE_USER: i32 = 4;
    pub const WIN_USER: i32 = 5;
    pub const LOOK_CARD: i32 = 6;
    pub const BET_CHIPS: i32 = 7;
    pub const AUTO_BETTING: i32 = 8;
    pub const CURRENT_USER: i32 = 9;
    pub const ERROR: i32 = 10;
    pub const OVER: i32 = 11;
}

/// REST response codes.
pub mod code {
    pub const OK: i32 = 10000;
    pub const PARAM_ERROR: i32 = 10001;
    pub const BAD_STAKES: i32 = 10008;
    pub const NOT_LOGIN: i32 = 10012;
    pub const GAME_NOT_EXIST: i32 = 20001;
    pub const SYSTEM_ERROR: i32 = 99999;
}

/// One frame received from a client.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReceiveMsg {
    #[serde(rename = "type")]
    pub kind: i32,
    pub curr_round: i32,
    pub bet_chips: i64,
    pub compare_id: i64,
    pub is_auto_bet: bool,
}

/// Body of `POST /api/game/create`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGameReq {
    pub minimum: usize,
    pub low_bet_chips: i64,
    pub top_bet_chips: i64,
    pub total_rounds: i32,
}

/// Common header of every outbound frame.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub msg_type: i32,
    pub msg_id: String,
}

impl Envelope {
    pub fn new(msg_type: i32) -> Self {
        Envelope {
            msg_type,
            msg_id: Uuid::new_v4().simple().to_string(),
        }
    }
}

/// Event details attached to a broadcast; unset fields stay off the wire.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMsg {
    #[serde(rename = "type")]
    pub kind: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub win_user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compare_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bet_chips: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_second: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countdown_second: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animation_second: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub myself_card: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_game_over: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_bet_chips: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<RecordEntry>>,
}

impl EventMsg {
    pub fn new(kind: i32) -> Self {
        EventMsg {
            kind,
            ..Default::default()
        }
    }
}

/// Room state pushed to every connection of the room.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMsg {
    #[serde(flatten)]
    pub msg: Envelope,
    pub room: Room,
    pub users: Vec<JoinUser>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<EventMsg>,
    pub bet_chips: Vec<i64>,
    pub timestamp: i64,
}

/// Private reveal of a seat's own three cards.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardMsg {
    #[serde(flatten)]
    pub msg: Envelope,
    pub card: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bet_chips: Option<i64>,
}

/// Targeted showdown reveal: seat id -> card string.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowdownMsg {
    #[serde(flatten)]
    pub msg: Envelope,
    pub cards: HashMap<i64, String>,
}

/// Ack for an auto-bet toggle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoBetMsg {
    #[serde(flatten)]
    pub msg: Envelope,
    pub is_auto_bet: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMsg {
    #[serde(flatten)]
    pub msg: Envelope,
    pub message: String,
}

impl ErrorMsg {
    pub fn new(error: &GameError) -> Self {
        ErrorMsg {
            msg: Envelope::new(event::ERROR),
            message: error.to_string(),
        }
    }
}

/// REST response wrapper.
#[derive(Debug, Clone, Serialize)]
pub struct Response<T: Serialize> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> Response<T> {
    pub fn ok(data: T) -> Self {
        Response {
            code: code::OK,
            message: "OK".to_string(),
            data: Some(data),
        }
    }

    pub fn fail(code: i32, message: impl Into<String>) -> Self {
        Response {
            code,
            message: message.into(),
            data: None,
        }
    }
}

pub fn encode<T: Serialize>(frame: &T) -> String {
    serde_json::to_string(frame).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_msg_tolerates_missing_fields() {
        let msg: ReceiveMsg = serde_json::from_str(r#"{"type":4,"currRound":2}"#).unwrap();
        assert_eq!(msg.kind, cmd::BET);
        assert_eq!(msg.curr_round, 2);
        assert_eq!(msg.compare_id, 0);
        assert!(!msg.is_auto_bet);
    }

    #[test]
    fn event_msg_omits_unset_fields() {
        let event = EventMsg {
            user_id: Some(9),
            ..EventMsg::new(event::BET_CHIPS)
        };
        let json = encode(&event);
        assert_eq!(json, r#"{"type":7,"userId":9}"#);
    }

    #[test]
    fn envelope_ids_are_unique_and_dashless() {
        let a = Envelope::new(event::ERROR);
        let b = Envelope::new(event::ERROR);
        assert_ne!(a.msg_id, b.msg_id);
        assert!(!a.msg_id.contains('-'));
    }

    #[test]
    fn error_frame_carries_floor() {
        let frame = ErrorMsg::new(&GameError::RaiseInsufficient { floor: 20 });
        let json = encode(&frame);
        assert!(json.contains(r#""msgType":10"#));
        assert!(json.contains("at least 20"));
    }
}
