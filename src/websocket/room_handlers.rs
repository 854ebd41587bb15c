use actix_web_actors::ws;
use log::{info, warn};
use serde_json::{Map, Value};

use crate::models::{lock, MemberMeta, PeerSignal, ServerMessage};
use crate::websocket::handler::RelaySession;

impl RelaySession {
    pub fn handle_join(&mut self, app: String, room: String, meta: Value, ctx: &mut ws::WebsocketContext<Self>) {
        info!("Session {} joining {}/{}", self.id, app, room);

        let outcome = lock(&self.app_state.rooms).join(&self.id, &app, &room, meta);
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(reason) => {
                warn!("Join refused for {}: {}", self.id, reason);
                self.reply(ctx, &ServerMessage::error(reason));
                return;
            }
        };

        // Tell the newcomer who is already here
        let welcome = ServerMessage::Welcome {
            id: self.id.clone(),
            peers: outcome.peers.iter().map(|p| p.id.clone()).collect(),
            peer_meta: outcome.peers.clone(),
            meta: outcome.meta.clone(),
        };
        self.reply(ctx, &welcome);

        // Tell everyone else about the newcomer
        let others: Vec<String> = outcome.peers.into_iter().map(|MemberMeta { id, .. }| id).collect();
        let joined = ServerMessage::PeerJoined {
            id: self.id.clone(),
            meta: outcome.meta,
        };
        self.send_to_many(&others, &joined);
    }

    pub fn handle_set_meta(&mut self, patch: Map<String, Value>, ctx: &mut ws::WebsocketContext<Self>) {
        let (meta, others) = {
            let mut rooms = lock(&self.app_state.rooms);
            let meta = rooms.set_meta(&self.id, patch);
            (meta, rooms.roommates(&self.id))
        };

        let meta = match meta {
            Some(meta) => meta,
            None => {
                warn!("set-meta from {} before join", self.id);
                self.reply(ctx, &ServerMessage::error("not joined"));
                return;
            }
        };

        self.reply(ctx, &ServerMessage::MetaUpdated { meta: meta.clone() });
        let update = ServerMessage::PeerMeta {
            id: self.id.clone(),
            meta,
        };
        self.send_to_many(&others, &update);
    }

    pub fn handle_direct(&mut self, to: String, payload: Value, ctx: &mut ws::WebsocketContext<Self>) {
        let message = ServerMessage::Direct {
            from: self.id.clone(),
            payload,
        };
        self.forward(&to, &message, ctx);
    }

    pub fn handle_signal(&mut self, to: String, signal: PeerSignal, ctx: &mut ws::WebsocketContext<Self>) {
        let message = ServerMessage::Signal {
            from: self.id.clone(),
            signal,
        };
        self.forward(&to, &message, ctx);
    }

    pub fn handle_broadcast(&mut self, payload: Value, ctx: &mut ws::WebsocketContext<Self>) {
        let others = {
            let rooms = lock(&self.app_state.rooms);
            if rooms.room_of(&self.id).is_none() {
                None
            } else {
                Some(rooms.roommates(&self.id))
            }
        };

        match others {
            Some(others) => {
                let message = ServerMessage::Broadcast {
                    from: self.id.clone(),
                    payload,
                };
                let delivered = self.send_to_many(&others, &message);
                info!("Broadcast from {} reached {} peers", self.id, delivered);
            }
            None => self.reply(ctx, &ServerMessage::error("not joined")),
        }
    }

    /// Deliver to a member of the same room, or answer with an error
    fn forward(&self, to: &str, message: &ServerMessage, ctx: &mut ws::WebsocketContext<Self>) {
        let allowed = to != self.id && lock(&self.app_state.rooms).same_room(&self.id, to);
        if !allowed || !self.send_to(to, message) {
            warn!("Session {} addressed unknown peer {}", self.id, to);
            self.reply(ctx, &ServerMessage::error("unknown peer"));
        }
    }
}
