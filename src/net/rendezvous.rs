//! Client side of the relay protocol.
//!
//! [`RendezvousState`] is the socket-free bookkeeping; [`RendezvousClient`]
//! is the actor that owns the websocket and reports [`RelayEvent`]s.

use actix::prelude::*;
use awc::error::WsProtocolError;
use awc::ws::{Frame, Message as WsMessage};
use futures::channel::{mpsc, oneshot};
use futures::StreamExt;
use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::ConnectionError;
use crate::models::{ClientMessage, PeerSignal, ServerMessage};

/// Lifecycle of one relay connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Welcomed,
    Closed,
    Failed,
}

/// Data delivered by `welcome`
#[derive(Debug, Clone, PartialEq)]
pub struct Welcome {
    pub id: String,
    pub peers: Vec<String>,
    pub peer_meta: BTreeMap<String, Value>,
    pub meta: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RendezvousEvent {
    Welcomed(Welcome),
    PeerJoined { id: String, meta: Value },
    PeerLeft { id: String },
    PeerMeta { id: String, meta: Value },
    SelfMeta { meta: Value },
    Direct { from: String, payload: Value, broadcast: bool },
    Signal { from: String, signal: PeerSignal },
    Status(String),
    Failed(ConnectionError),
    Closed,
}

/// Event from the relay connection identified by `link`
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct RelayEvent {
    pub link: u64,
    pub event: RendezvousEvent,
}

/// Relay view held by a client: own id and metadata plus every peer's metadata
#[derive(Debug, Clone)]
pub struct RendezvousState {
    pub state: ConnectionState,
    pub local_id: Option<String>,
    pub meta: Value,
    pub peer_meta: BTreeMap<String, Value>,
}

impl RendezvousState {
    pub fn new(meta: Value) -> Self {
        RendezvousState {
            state: ConnectionState::Idle,
            local_id: None,
            meta,
            peer_meta: BTreeMap::new(),
        }
    }

    /// Mark the socket as being opened. Only valid from `Idle`.
    pub fn begin(&mut self) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Idle {
            return Err(ConnectionError::AlreadyConnected);
        }
        self.state = ConnectionState::Connecting;
        Ok(())
    }

    pub fn is_welcomed(&self) -> bool {
        self.state == ConnectionState::Welcomed
    }

    /// Fold a relay message into the state and report what happened
    pub fn apply(&mut self, msg: ServerMessage) -> Vec<RendezvousEvent> {
        match msg {
            ServerMessage::Welcome {
                id,
                peers,
                peer_meta,
                meta,
            } => {
                self.state = ConnectionState::Welcomed;
                self.local_id = Some(id.clone());
                if meta.is_object() {
                    self.meta = meta;
                }
                self.peer_meta = peer_meta.into_iter().map(|m| (m.id, m.meta)).collect();
                for peer in &peers {
                    self.peer_meta.entry(peer.clone()).or_insert(Value::Null);
                }
                let welcome = Welcome {
                    id,
                    peers,
                    peer_meta: self.peer_meta.clone(),
                    meta: self.meta.clone(),
                };
                vec![
                    RendezvousEvent::SelfMeta {
                        meta: self.meta.clone(),
                    },
                    RendezvousEvent::Welcomed(welcome),
                ]
            }
            ServerMessage::PeerJoined { id, meta } => {
                self.peer_meta.insert(id.clone(), meta.clone());
                vec![RendezvousEvent::PeerJoined { id, meta }]
            }
            ServerMessage::PeerLeft { id } => {
                self.peer_meta.remove(&id);
                vec![RendezvousEvent::PeerLeft { id }]
            }
            ServerMessage::PeerMeta { id, meta } => {
                self.peer_meta.insert(id.clone(), meta.clone());
                vec![RendezvousEvent::PeerMeta { id, meta }]
            }
            ServerMessage::MetaUpdated { meta } => {
                if !meta.is_object() {
                    return Vec::new();
                }
                self.meta = meta.clone();
                vec![RendezvousEvent::SelfMeta { meta }]
            }
            ServerMessage::Direct { from, payload } => vec![RendezvousEvent::Direct {
                from,
                payload,
                broadcast: false,
            }],
            ServerMessage::Broadcast { from, payload } => vec![RendezvousEvent::Direct {
                from,
                payload,
                broadcast: true,
            }],
            ServerMessage::Signal { from, signal } => vec![RendezvousEvent::Signal { from, signal }],
            ServerMessage::Error { reason } => {
                if self.is_welcomed() {
                    vec![RendezvousEvent::Status(format!("server error: {}", reason))]
                } else {
                    self.state = ConnectionState::Failed;
                    vec![RendezvousEvent::Failed(ConnectionError::Server(reason))]
                }
            }
        }
    }

    /// The socket closed. Before welcome this is a failure.
    pub fn on_closed(&mut self) -> RendezvousEvent {
        let event = match self.state {
            ConnectionState::Connecting | ConnectionState::Idle => {
                self.state = ConnectionState::Failed;
                RendezvousEvent::Failed(ConnectionError::ClosedBeforeWelcome)
            }
            ConnectionState::Failed => RendezvousEvent::Closed,
            _ => {
                self.state = ConnectionState::Closed;
                RendezvousEvent::Closed
            }
        };
        self.local_id = None;
        self.peer_meta.clear();
        event
    }
}

/// Parameters of a relay connection
#[derive(Debug, Clone)]
pub struct RendezvousConfig {
    pub url: String,
    pub app: String,
    pub room: String,
    pub meta: Value,
}

/// Send a client message over the relay socket
#[derive(Message, Debug, Clone)]
#[rtype(result = "bool")]
pub struct SendRelay(pub ClientMessage);

/// Close the relay socket
#[derive(Message, Debug, Clone, Copy)]
#[rtype(result = "()")]
pub struct CloseRelay;

/// Actor owning one relay websocket
pub struct RendezvousClient {
    link: u64,
    config: RendezvousConfig,
    state: RendezvousState,
    outbound: Option<mpsc::UnboundedSender<WsMessage>>,
    events: Recipient<RelayEvent>,
    welcome: Option<oneshot::Sender<Result<Welcome, ConnectionError>>>,
}

impl RendezvousClient {
    /// Start connecting. The receiver completes on `welcome` or on failure.
    pub fn connect(
        link: u64,
        config: RendezvousConfig,
        events: Recipient<RelayEvent>,
    ) -> (Addr<RendezvousClient>, oneshot::Receiver<Result<Welcome, ConnectionError>>) {
        let (tx, rx) = oneshot::channel();
        let state = RendezvousState::new(config.meta.clone());
        let client = RendezvousClient {
            link,
            config,
            state,
            outbound: None,
            events,
            welcome: Some(tx),
        };
        (client.start(), rx)
    }

    fn emit(&self, event: RendezvousEvent) {
        self.events.do_send(RelayEvent {
            link: self.link,
            event,
        });
    }

    fn send(&self, msg: &ClientMessage) -> bool {
        let outbound = match &self.outbound {
            Some(outbound) => outbound,
            None => return false,
        };
        match serde_json::to_string(msg) {
            Ok(text) => outbound.unbounded_send(WsMessage::Text(text.into())).is_ok(),
            Err(e) => {
                warn!("Error serializing relay message: {}", e);
                false
            }
        }
    }

    fn fail(&mut self, error: ConnectionError, ctx: &mut Context<Self>) {
        warn!("Relay link {} failed: {}", self.link, error);
        self.state.state = ConnectionState::Failed;
        match self.welcome.take() {
            Some(tx) => {
                let _ = tx.send(Err(error));
            }
            None => self.emit(RendezvousEvent::Failed(error)),
        }
        ctx.stop();
    }

    fn handle_server_message(&mut self, msg: ServerMessage, ctx: &mut Context<Self>) {
        for event in self.state.apply(msg) {
            match event {
                RendezvousEvent::Welcomed(welcome) => {
                    info!(
                        "Relay link {} joined {}/{} as {}",
                        self.link, self.config.app, self.config.room, welcome.id
                    );
                    if let Some(tx) = self.welcome.take() {
                        let _ = tx.send(Ok(welcome.clone()));
                    }
                    self.emit(RendezvousEvent::Welcomed(welcome));
                }
                RendezvousEvent::Failed(error) => {
                    self.fail(error, ctx);
                    return;
                }
                other => self.emit(other),
            }
        }
    }
}

impl Actor for RendezvousClient {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        if let Err(e) = self.state.begin() {
            self.fail(e, ctx);
            return;
        }
        debug!("Relay link {} connecting to {}", self.link, self.config.url);

        let url = self.config.url.clone();
        async move { awc::Client::new().ws(url).connect().await }
            .into_actor(self)
            .map(|res, act, ctx| match res {
                Ok((_response, framed)) => {
                    let (sink, stream) = framed.split();
                    let (tx, rx) = mpsc::unbounded::<WsMessage>();
                    actix_rt::spawn(rx.map(Ok::<_, WsProtocolError>).forward(sink));
                    act.outbound = Some(tx);
                    ctx.add_stream(stream);

                    // The join goes out as soon as the socket is open
                    let join = ClientMessage::Join {
                        app: act.config.app.clone(),
                        room: act.config.room.clone(),
                        meta: act.config.meta.clone(),
                    };
                    act.send(&join);
                }
                Err(e) => act.fail(ConnectionError::Socket(e.to_string()), ctx),
            })
            .wait(ctx);
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.unbounded_send(WsMessage::Close(None));
        }
        if let Some(tx) = self.welcome.take() {
            let _ = tx.send(Err(ConnectionError::ClosedBeforeWelcome));
        }
        info!("Relay link {} closed", self.link);
        Running::Stop
    }
}

impl StreamHandler<Result<Frame, WsProtocolError>> for RendezvousClient {
    fn handle(&mut self, frame: Result<Frame, WsProtocolError>, ctx: &mut Context<Self>) {
        match frame {
            Ok(Frame::Text(bytes)) => match serde_json::from_slice::<ServerMessage>(&bytes) {
                Ok(msg) => self.handle_server_message(msg, ctx),
                Err(e) => warn!("Relay link {} dropped malformed message: {}", self.link, e),
            },
            Ok(Frame::Ping(bytes)) => {
                if let Some(outbound) = &self.outbound {
                    let _ = outbound.unbounded_send(WsMessage::Pong(bytes));
                }
            }
            Ok(Frame::Close(reason)) => {
                debug!("Relay link {} got close: {:?}", self.link, reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(e) => {
                if self.state.is_welcomed() {
                    self.emit(RendezvousEvent::Status("socket error".to_string()));
                } else {
                    self.fail(ConnectionError::Socket(e.to_string()), ctx);
                }
            }
        }
    }

    fn finished(&mut self, ctx: &mut Context<Self>) {
        match self.state.on_closed() {
            RendezvousEvent::Failed(error) => self.fail(error, ctx),
            event => {
                self.emit(RendezvousEvent::Status("socket closed".to_string()));
                self.emit(event);
                ctx.stop();
            }
        }
    }
}

impl Handler<SendRelay> for RendezvousClient {
    type Result = bool;

    fn handle(&mut self, msg: SendRelay, _: &mut Context<Self>) -> bool {
        self.send(&msg.0)
    }
}

impl Handler<CloseRelay> for RendezvousClient {
    type Result = ();

    fn handle(&mut self, _: CloseRelay, ctx: &mut Context<Self>) {
        // Closing deliberately is not a failure
        self.welcome.take();
        ctx.stop();
    }
}

/// Helper for building a `set-meta` patch
pub fn meta_patch(field: &str, value: Value) -> ClientMessage {
    let mut patch = Map::new();
    patch.insert(field.to_string(), value);
    ClientMessage::SetMeta { patch }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MemberMeta;
    use serde_json::json;

    fn welcome() -> ServerMessage {
        ServerMessage::Welcome {
            id: "me".into(),
            peers: vec!["p1".into()],
            peer_meta: vec![MemberMeta {
                id: "p1".into(),
                meta: json!({"name": "Bo"}),
            }],
            meta: json!({"name": "Ada (2)"}),
        }
    }

    #[test]
    fn second_begin_is_already_connected() {
        let mut state = RendezvousState::new(Value::Null);
        state.begin().unwrap();
        assert_eq!(state.begin(), Err(ConnectionError::AlreadyConnected));
    }

    #[test]
    fn welcome_records_id_and_peers() {
        let mut state = RendezvousState::new(json!({"name": "Ada"}));
        state.begin().unwrap();
        let events = state.apply(welcome());
        assert!(state.is_welcomed());
        assert_eq!(state.local_id.as_deref(), Some("me"));
        assert_eq!(state.meta["name"], "Ada (2)");
        assert_eq!(state.peer_meta["p1"]["name"], "Bo");
        assert!(matches!(events.last(), Some(RendezvousEvent::Welcomed(w)) if w.peers == vec!["p1".to_string()]));
    }

    #[test]
    fn error_before_welcome_fails_after_is_status() {
        let mut state = RendezvousState::new(Value::Null);
        state.begin().unwrap();
        let events = state.apply(ServerMessage::error("room full"));
        assert_eq!(
            events,
            vec![RendezvousEvent::Failed(ConnectionError::Server("room full".into()))]
        );
        assert_eq!(state.state, ConnectionState::Failed);

        let mut state = RendezvousState::new(Value::Null);
        state.begin().unwrap();
        state.apply(welcome());
        let events = state.apply(ServerMessage::error("unknown peer"));
        assert_eq!(events, vec![RendezvousEvent::Status("server error: unknown peer".into())]);
        assert!(state.is_welcomed());
    }

    #[test]
    fn close_before_welcome_is_a_failure() {
        let mut state = RendezvousState::new(Value::Null);
        state.begin().unwrap();
        assert_eq!(
            state.on_closed(),
            RendezvousEvent::Failed(ConnectionError::ClosedBeforeWelcome)
        );

        let mut state = RendezvousState::new(Value::Null);
        state.begin().unwrap();
        state.apply(welcome());
        assert_eq!(state.on_closed(), RendezvousEvent::Closed);
        assert_eq!(state.state, ConnectionState::Closed);
    }

    #[test]
    fn peer_traffic_updates_meta() {
        let mut state = RendezvousState::new(Value::Null);
        state.begin().unwrap();
        state.apply(welcome());
        state.apply(ServerMessage::PeerJoined {
            id: "p2".into(),
            meta: json!({"name": "Cy"}),
        });
        state.apply(ServerMessage::PeerMeta {
            id: "p1".into(),
            meta: json!({"name": "Bo", "status": "playing"}),
        });
        state.apply(ServerMessage::PeerLeft { id: "p2".into() });
        assert_eq!(state.peer_meta.len(), 1);
        assert_eq!(state.peer_meta["p1"]["status"], "playing");
    }
}
