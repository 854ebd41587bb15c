use actix::Addr;
use log::{info, warn};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::models::config::sanitize_player_name;
use crate::models::messages::MemberMeta;
use crate::websocket::RelaySession;

/// Members of one relay room, keyed by session id
#[derive(Debug, Default, Clone)]
pub struct Room {
    pub members: BTreeMap<String, Value>,
}

/// What a successful join produced
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    pub room_key: String,
    /// Final metadata of the joining member
    pub meta: Value,
    /// Members that were already in the room
    pub peers: Vec<MemberMeta>,
}

/// Room bookkeeping for the relay, independent of sockets
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
    member_rooms: HashMap<String, String>,
}

impl RoomRegistry {
    pub fn room_key(app: &str, room: &str) -> String {
        format!("{}/{}", app, room)
    }

    pub fn room_of(&self, id: &str) -> Option<&str> {
        self.member_rooms.get(id).map(String::as_str)
    }

    /// Ids of every member of `id`'s room except `id` itself
    pub fn roommates(&self, id: &str) -> Vec<String> {
        self.room_of(id)
            .and_then(|key| self.rooms.get(key))
            .map(|room| room.members.keys().filter(|m| *m != id).cloned().collect())
            .unwrap_or_default()
    }

    pub fn same_room(&self, a: &str, b: &str) -> bool {
        match (self.room_of(a), self.room_of(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Place `id` in `app/room`. A session may only join once.
    pub fn join(&mut self, id: &str, app: &str, room: &str, meta: Value) -> Result<JoinOutcome, String> {
        if self.member_rooms.contains_key(id) {
            return Err("already joined".to_string());
        }
        if app.trim().is_empty() || room.trim().is_empty() {
            return Err("app and room are required".to_string());
        }

        let mut meta = match meta {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err("meta must be an object".to_string()),
        };

        let room_key = Self::room_key(app, room);
        let entry = self.rooms.entry(room_key.clone()).or_default();

        if let Some(raw) = meta.get("name").cloned() {
            let taken: Vec<String> = entry
                .members
                .values()
                .filter_map(|m| m.get("name").and_then(Value::as_str).map(str::to_string))
                .collect();
            let wanted = sanitize_player_name(raw.as_str().unwrap_or_default());
            meta.insert("name".to_string(), Value::String(unique_name(&wanted, &taken)));
        }
        let meta = Value::Object(meta);

        let peers = entry
            .members
            .iter()
            .map(|(peer, peer_meta)| MemberMeta {
                id: peer.clone(),
                meta: peer_meta.clone(),
            })
            .collect();

        entry.members.insert(id.to_string(), meta.clone());
        self.member_rooms.insert(id.to_string(), room_key.clone());
        info!("Session {} joined room {}", id, room_key);

        Ok(JoinOutcome { room_key, meta, peers })
    }

    /// Shallow-merge `patch` into the member's metadata and return the result
    pub fn set_meta(&mut self, id: &str, patch: Map<String, Value>) -> Option<Value> {
        let key = self.member_rooms.get(id)?.clone();
        let room = self.rooms.get_mut(&key)?;

        let taken: Vec<String> = room
            .members
            .iter()
            .filter(|(member, _)| *member != id)
            .filter_map(|(_, m)| m.get("name").and_then(Value::as_str).map(str::to_string))
            .collect();

        let current = room.members.get_mut(id)?;
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        if let Value::Object(map) = current {
            for (field, value) in patch {
                if field == "name" {
                    let wanted = sanitize_player_name(value.as_str().unwrap_or_default());
                    map.insert(field, Value::String(unique_name(&wanted, &taken)));
                } else {
                    map.insert(field, value);
                }
            }
        }
        Some(current.clone())
    }

    /// Remove `id`; returns the room key and the remaining members
    pub fn leave(&mut self, id: &str) -> Option<(String, Vec<String>)> {
        let key = self.member_rooms.remove(id)?;
        let remaining = match self.rooms.get_mut(&key) {
            Some(room) => {
                room.members.remove(id);
                room.members.keys().cloned().collect::<Vec<_>>()
            }
            None => {
                warn!("Room {} missing for session {}", key, id);
                Vec::new()
            }
        };
        if remaining.is_empty() {
            info!("Room {} is empty. Dropping it.", key);
            self.rooms.remove(&key);
        }
        Some((key, remaining))
    }
}

/// `name`, or `name (2)`, `name (3)`… whichever is not yet taken
fn unique_name(name: &str, taken: &[String]) -> String {
    if !taken.iter().any(|t| t == name) {
        return name.to_string();
    }
    (2..)
        .map(|n| format!("{} ({})", name, n))
        .find(|candidate| !taken.iter().any(|t| t == candidate))
        .unwrap_or_else(|| name.to_string())
}

/// Lock a mutex, recovering the data if a previous holder panicked
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Application state shared between relay connections
#[derive(Default)]
pub struct AppState {
    pub rooms: Mutex<RoomRegistry>,
    pub sessions: Mutex<HashMap<String, Addr<RelaySession>>>,
}
