//! Lobby presence: who is online and whether they can be challenged.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::error::ChallengeRefused;
use crate::models::config::DEFAULT_PLAYER_NAME;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Lobby,
    Playing,
}

impl PresenceStatus {
    /// Anything but `playing` counts as being in the lobby
    pub fn from_meta(meta: &Value) -> Self {
        match meta.get("status").and_then(Value::as_str) {
            Some("playing") => PresenceStatus::Playing,
            _ => PresenceStatus::Lobby,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PresenceStatus::Lobby => "lobby",
            PresenceStatus::Playing => "playing",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PresenceStatus::Lobby => "in lobby",
            PresenceStatus::Playing => "playing",
        }
    }
}

/// One row of the lobby list
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OnlinePlayer {
    pub id: String,
    pub name: String,
    pub status: PresenceStatus,
    pub is_self: bool,
}

pub fn presence_meta(name: &str, status: PresenceStatus) -> Value {
    json!({ "name": name, "status": status.as_str() })
}

fn display_name(meta: &Value) -> String {
    let name = meta.get("name").and_then(Value::as_str).unwrap_or("").trim();
    if name.is_empty() {
        DEFAULT_PLAYER_NAME.to_string()
    } else {
        name.to_string()
    }
}

/// Self first, then everyone else by name
pub fn build_roster(local_id: Option<&str>, local_meta: &Value, peers: &BTreeMap<String, Value>) -> Vec<OnlinePlayer> {
    let mut roster = Vec::with_capacity(peers.len() + 1);
    if let Some(id) = local_id {
        roster.push(OnlinePlayer {
            id: id.to_string(),
            name: display_name(local_meta),
            status: PresenceStatus::from_meta(local_meta),
            is_self: true,
        });
    }
    for (id, meta) in peers {
        if Some(id.as_str()) == local_id {
            continue;
        }
        roster.push(OnlinePlayer {
            id: id.clone(),
            name: display_name(meta),
            status: PresenceStatus::from_meta(meta),
            is_self: false,
        });
    }
    roster.sort_by(|a, b| {
        b.is_self
            .cmp(&a.is_self)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            .then_with(|| a.id.cmp(&b.id))
    });
    roster
}

/// Find a player that may be challenged right now
pub fn check_challenge_target<'a>(
    roster: &'a [OnlinePlayer],
    target_id: &str,
    in_network_game: bool,
) -> Result<&'a OnlinePlayer, ChallengeRefused> {
    if in_network_game {
        return Err(ChallengeRefused::InGame);
    }
    let target = roster
        .iter()
        .find(|p| p.id == target_id && !p.is_self)
        .ok_or(ChallengeRefused::TargetGone)?;
    if target.status == PresenceStatus::Playing {
        return Err(ChallengeRefused::TargetPlaying(target.name.clone()));
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers() -> BTreeMap<String, Value> {
        let mut peers = BTreeMap::new();
        peers.insert("p1".to_string(), json!({"name": "zed", "status": "playing"}));
        peers.insert("p2".to_string(), json!({"name": "Bo", "status": "away"}));
        peers.insert("p3".to_string(), json!({"status": "lobby"}));
        peers
    }

    #[test]
    fn roster_lists_self_first_then_by_name() {
        let roster = build_roster(Some("me"), &json!({"name": "Zoe", "status": "lobby"}), &peers());
        let names: Vec<&str> = roster.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Zoe", "Bo", "Player", "zed"]);
        assert!(roster[0].is_self);
        assert_eq!(roster[1].status, PresenceStatus::Lobby);
        assert_eq!(roster[3].status, PresenceStatus::Playing);
    }

    #[test]
    fn roster_without_welcome_has_no_self() {
        let roster = build_roster(None, &Value::Null, &peers());
        assert_eq!(roster.len(), 3);
        assert!(roster.iter().all(|p| !p.is_self));
    }

    #[test]
    fn challenge_targets_are_checked() {
        let roster = build_roster(Some("me"), &json!({"name": "Ada"}), &peers());
        assert_eq!(
            check_challenge_target(&roster, "p2", true),
            Err(ChallengeRefused::InGame)
        );
        assert_eq!(
            check_challenge_target(&roster, "gone", false),
            Err(ChallengeRefused::TargetGone)
        );
        assert_eq!(
            check_challenge_target(&roster, "me", false),
            Err(ChallengeRefused::TargetGone)
        );
        assert_eq!(
            check_challenge_target(&roster, "p1", false),
            Err(ChallengeRefused::TargetPlaying("zed".to_string()))
        );
        assert_eq!(check_challenge_target(&roster, "p2", false).map(|p| p.name.as_str()), Ok("Bo"));
        assert_eq!(
            ChallengeRefused::TargetPlaying("zed".to_string()).to_string(),
            "zed is already playing."
        );
    }

    #[test]
    fn meta_round_trips_status() {
        let meta = presence_meta("Ada", PresenceStatus::Playing);
        assert_eq!(meta, json!({"name": "Ada", "status": "playing"}));
        assert_eq!(PresenceStatus::from_meta(&meta), PresenceStatus::Playing);
        assert_eq!(PresenceStatus::Lobby.label(), "in lobby");
    }
}
