use actix::*;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{info, warn};
use uuid::Uuid;

use crate::models::{lock, AppState, ClientMessage, RelayText, ServerMessage};

/// One relay websocket connection
pub struct RelaySession {
    pub id: String,
    pub app_state: web::Data<AppState>,
}

impl Actor for RelaySession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        // Register the actor with the application state
        let addr = ctx.address();
        let total_sessions = {
            let mut sessions = lock(&self.app_state.sessions);
            sessions.insert(self.id.clone(), addr);
            sessions.len()
        };

        info!("Relay connection started: {}", self.id);
        info!("Total active sessions: {}", total_sessions);
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        // Remove the member from its room and tell whoever is left
        let left = lock(&self.app_state.rooms).leave(&self.id);
        if let Some((room_key, remaining)) = left {
            info!("Removed {} from room {}", self.id, room_key);
            let message = ServerMessage::PeerLeft { id: self.id.clone() };
            self.send_to_many(&remaining, &message);
        }

        // Remove the actor from the sessions
        let total_sessions = {
            let mut sessions = lock(&self.app_state.sessions);
            sessions.remove(&self.id);
            sessions.len()
        };
        info!("Relay connection closed: {}", self.id);
        info!("Total active sessions: {}", total_sessions);

        Running::Stop
    }
}

impl Handler<RelayText> for RelaySession {
    type Result = ();

    fn handle(&mut self, msg: RelayText, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

// WebSocket message handler
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RelaySession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                // Do nothing for pong messages
            }
            Ok(ws::Message::Text(text)) => {
                match serde_json::from_str::<ClientMessage>(text.as_ref()) {
                    Ok(client_msg) => {
                        self.handle_message(client_msg, ctx);
                    }
                    Err(e) => {
                        warn!("Error parsing message from {}: {}", self.id, e);
                        self.reply(ctx, &ServerMessage::error(format!("invalid message: {}", e)));
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                warn!("Binary messages are not supported");
                self.reply(ctx, &ServerMessage::error("binary messages are not supported"));
            }
            Ok(ws::Message::Close(reason)) => {
                info!("Connection closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            _ => {
                ctx.stop();
            }
        }
    }
}

impl RelaySession {
    /// Send a message on this session's own socket
    pub fn reply(&self, ctx: &mut ws::WebsocketContext<Self>, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(text) => ctx.text(text),
            Err(e) => warn!("Error serializing message: {}", e),
        }
    }

    /// Send a message to another session by id. Returns false if it is gone.
    pub fn send_to(&self, peer_id: &str, message: &ServerMessage) -> bool {
        self.send_to_many(&[peer_id.to_string()], message) == 1
    }

    /// Send a message to every listed session, returning how many were reached
    pub fn send_to_many(&self, peer_ids: &[String], message: &ServerMessage) -> usize {
        if peer_ids.is_empty() {
            return 0;
        }

        // Serialize the message once
        let message_str = match serde_json::to_string(message) {
            Ok(s) => s,
            Err(e) => {
                warn!("Error serializing message: {}", e);
                return 0;
            }
        };

        let sessions = lock(&self.app_state.sessions);
        let mut delivered = 0;
        for peer_id in peer_ids {
            match sessions.get(peer_id) {
                Some(addr) => {
                    addr.do_send(RelayText(message_str.clone()));
                    delivered += 1;
                }
                None => warn!("Session not found for id: {}", peer_id),
            }
        }
        delivered
    }

    pub fn handle_message(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match msg {
            ClientMessage::Join { app, room, meta } => self.handle_join(app, room, meta, ctx),
            ClientMessage::SetMeta { patch } => self.handle_set_meta(patch, ctx),
            ClientMessage::Direct { to, payload } => self.handle_direct(to, payload, ctx),
            ClientMessage::Signal { to, signal } => self.handle_signal(to, signal, ctx),
            ClientMessage::Broadcast { payload } => self.handle_broadcast(payload, ctx),
        }
    }
}

/// WebSocket connection handler
pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    // Generate a unique ID for this connection
    let id = Uuid::new_v4().to_string();
    info!("New relay connection request: {}", id);

    let session = RelaySession {
        id,
        app_state: app_state.clone(),
    };

    ws::start(session, &req, stream)
}
