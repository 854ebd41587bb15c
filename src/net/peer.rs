//! Per-peer channel negotiation on top of the relay's `signal` passthrough.
//!
//! [`PeerLink`] does not touch sockets itself. It returns the signals that
//! must be relayed and drives a [`ChannelBackend`] for the transport.

use log::{debug, info, warn};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::ChannelError;
use crate::models::{IceCandidate, PeerSignal, SdpKind, SessionDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStage {
    New,
    Negotiating,
    Open,
    Closed,
    Failed,
}

/// Transport that carries messages once negotiation completes
pub trait ChannelBackend {
    /// Prepare a channel as the initiator and describe it
    fn create_offer(&mut self, peer: &str) -> Result<SessionDescription, ChannelError>;

    /// Prepare a channel from a remote offer and describe our side
    fn accept_offer(&mut self, peer: &str, offer: &SessionDescription) -> Result<SessionDescription, ChannelError>;

    fn accept_answer(&mut self, peer: &str, answer: &SessionDescription) -> Result<(), ChannelError>;

    fn add_remote_candidate(&mut self, peer: &str, candidate: &IceCandidate) -> Result<(), ChannelError>;

    fn send(&mut self, peer: &str, text: String) -> Result<(), ChannelError>;

    fn close_peer(&mut self, peer: &str);
}

/// Transport notification about one peer
#[derive(Debug, Clone, PartialEq)]
pub struct PeerEvent {
    pub peer: String,
    pub kind: PeerEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeerEventKind {
    LocalCandidate(IceCandidate),
    Open,
    Message(String),
    Closed,
    Failed(String),
}

impl PeerEvent {
    pub fn new(peer: &str, kind: PeerEventKind) -> Self {
        PeerEvent {
            peer: peer.to_string(),
            kind,
        }
    }
}

/// Signal to relay to `to`
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundSignal {
    pub to: String,
    pub signal: PeerSignal,
}

#[derive(Debug, Clone)]
pub struct PeerConnection {
    pub stage: PeerStage,
    pub pending_candidates: Vec<IceCandidate>,
    pub has_remote_description: bool,
}

impl PeerConnection {
    fn new() -> Self {
        PeerConnection {
            stage: PeerStage::New,
            pending_candidates: Vec::new(),
            has_remote_description: false,
        }
    }
}

pub struct PeerLink<B: ChannelBackend> {
    local_id: Option<String>,
    backend: B,
    peers: BTreeMap<String, PeerConnection>,
    peer_meta: BTreeMap<String, Value>,
}

impl<B: ChannelBackend> PeerLink<B> {
    pub fn new(backend: B) -> Self {
        PeerLink {
            local_id: None,
            backend,
            peers: BTreeMap::new(),
            peer_meta: BTreeMap::new(),
        }
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn stage(&self, peer: &str) -> Option<PeerStage> {
        self.peers.get(peer).map(|p| p.stage)
    }

    pub fn connection(&self, peer: &str) -> Option<&PeerConnection> {
        self.peers.get(peer)
    }

    pub fn peer_meta(&self, peer: &str) -> Option<&Value> {
        self.peer_meta.get(peer)
    }

    pub fn open_peers(&self) -> Vec<String> {
        self.peers
            .iter()
            .filter(|(_, p)| p.stage == PeerStage::Open)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// The lexicographically smaller id makes the offer
    pub fn should_initiate(&self, peer: &str) -> bool {
        match &self.local_id {
            Some(local) => local.as_str() < peer,
            None => false,
        }
    }

    /// Set up connections to everyone already in the room
    pub fn on_welcome(
        &mut self,
        local_id: &str,
        peers: &[String],
        peer_meta: &BTreeMap<String, Value>,
    ) -> Vec<OutboundSignal> {
        self.local_id = Some(local_id.to_string());
        self.peer_meta = peer_meta.clone();

        let mut out = Vec::new();
        for peer in peers {
            out.extend(self.ensure_peer(peer));
        }
        out
    }

    pub fn on_peer_joined(&mut self, peer: &str, meta: Value) -> Vec<OutboundSignal> {
        self.peer_meta.insert(peer.to_string(), meta);
        self.ensure_peer(peer)
    }

    pub fn on_peer_meta(&mut self, peer: &str, meta: Value) {
        self.peer_meta.insert(peer.to_string(), meta);
    }

    pub fn on_peer_left(&mut self, peer: &str) {
        self.peer_meta.remove(peer);
        self.remove_peer(peer);
    }

    /// Create the connection record and make the offer if it is our turn to
    fn ensure_peer(&mut self, peer: &str) -> Vec<OutboundSignal> {
        if Some(peer) == self.local_id.as_deref() {
            return Vec::new();
        }
        if self.peers.contains_key(peer) {
            return Vec::new();
        }
        self.peers.insert(peer.to_string(), PeerConnection::new());

        if !self.should_initiate(peer) {
            debug!("Waiting for offer from {}", peer);
            return Vec::new();
        }
        match self.backend.create_offer(peer) {
            Ok(offer) => {
                self.set_stage(peer, PeerStage::Negotiating);
                info!("Sent offer to {}", peer);
                vec![OutboundSignal {
                    to: peer.to_string(),
                    signal: PeerSignal::Sdp(offer),
                }]
            }
            Err(e) => {
                warn!("Could not create offer for {}: {}", peer, e);
                self.set_stage(peer, PeerStage::Failed);
                Vec::new()
            }
        }
    }

    /// Apply a signal relayed from `from`
    pub fn on_signal(&mut self, from: &str, signal: PeerSignal) -> Result<Vec<OutboundSignal>, ChannelError> {
        if Some(from) == self.local_id.as_deref() {
            return Err(ChannelError::BadSignal("signal from self".to_string()));
        }
        self.peers.entry(from.to_string()).or_insert_with(PeerConnection::new);

        match signal {
            PeerSignal::Sdp(description) => self.on_description(from, description),
            PeerSignal::Ice(candidate) => {
                let ready = self.peers.get(from).map_or(false, |p| p.has_remote_description);
                if ready {
                    self.backend.add_remote_candidate(from, &candidate)?;
                } else if let Some(conn) = self.peers.get_mut(from) {
                    conn.pending_candidates.push(candidate);
                }
                Ok(Vec::new())
            }
        }
    }

    fn on_description(
        &mut self,
        from: &str,
        description: SessionDescription,
    ) -> Result<Vec<OutboundSignal>, ChannelError> {
        let mut out = Vec::new();
        match description.kind {
            SdpKind::Offer => {
                let answer = match self.backend.accept_offer(from, &description) {
                    Ok(answer) => answer,
                    Err(e) => {
                        self.set_stage(from, PeerStage::Failed);
                        return Err(e);
                    }
                };
                out.push(OutboundSignal {
                    to: from.to_string(),
                    signal: PeerSignal::Sdp(answer),
                });
            }
            SdpKind::Answer => {
                if let Err(e) = self.backend.accept_answer(from, &description) {
                    self.set_stage(from, PeerStage::Failed);
                    return Err(e);
                }
            }
        }

        let pending = match self.peers.get_mut(from) {
            Some(conn) => {
                conn.has_remote_description = true;
                if conn.stage == PeerStage::New {
                    conn.stage = PeerStage::Negotiating;
                }
                std::mem::take(&mut conn.pending_candidates)
            }
            None => Vec::new(),
        };
        for candidate in pending {
            self.backend.add_remote_candidate(from, &candidate)?;
        }
        Ok(out)
    }

    /// Fold a transport event into the stage table. Local candidates become
    /// signals for the relay; inbound messages are returned as text.
    pub fn on_channel_event(&mut self, event: PeerEvent) -> ChannelUpdate {
        let PeerEvent { peer, kind } = event;
        if !self.peers.contains_key(&peer) {
            debug!("Ignoring channel event for unknown peer {}", peer);
            return ChannelUpdate::None;
        }
        match kind {
            PeerEventKind::LocalCandidate(candidate) => ChannelUpdate::Signal(OutboundSignal {
                to: peer,
                signal: PeerSignal::Ice(candidate),
            }),
            PeerEventKind::Open => {
                info!("Channel to {} is open", peer);
                self.set_stage(&peer, PeerStage::Open);
                ChannelUpdate::Opened(peer)
            }
            PeerEventKind::Message(text) => ChannelUpdate::Message { from: peer, text },
            PeerEventKind::Closed => {
                info!("Channel to {} closed", peer);
                self.set_stage(&peer, PeerStage::Closed);
                ChannelUpdate::Closed(peer)
            }
            PeerEventKind::Failed(reason) => {
                warn!("Channel to {} failed: {}", peer, reason);
                self.set_stage(&peer, PeerStage::Failed);
                ChannelUpdate::Failed { peer, reason }
            }
        }
    }

    pub fn send_to(&mut self, peer: &str, payload: &Value) -> Result<(), ChannelError> {
        match self.stage(peer) {
            Some(PeerStage::Open) => self.backend.send(peer, payload.to_string()),
            Some(_) => Err(ChannelError::NotOpen(peer.to_string())),
            None => Err(ChannelError::UnknownPeer(peer.to_string())),
        }
    }

    /// Send to every open channel and return how many took it
    pub fn broadcast(&mut self, payload: &Value) -> usize {
        let text = payload.to_string();
        let mut sent = 0;
        for peer in self.open_peers() {
            match self.backend.send(&peer, text.clone()) {
                Ok(()) => sent += 1,
                Err(e) => warn!("Broadcast to {} failed: {}", peer, e),
            }
        }
        sent
    }

    pub fn remove_peer(&mut self, peer: &str) {
        if self.peers.remove(peer).is_some() {
            self.backend.close_peer(peer);
        }
    }

    pub fn close(&mut self) {
        let peers: Vec<String> = self.peers.keys().cloned().collect();
        for peer in peers {
            self.backend.close_peer(&peer);
        }
        self.peers.clear();
        self.peer_meta.clear();
        self.local_id = None;
    }

    fn set_stage(&mut self, peer: &str, stage: PeerStage) {
        if let Some(conn) = self.peers.get_mut(peer) {
            conn.stage = stage;
        }
    }
}

/// What a transport event means for the owner of the link
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelUpdate {
    None,
    Signal(OutboundSignal),
    Opened(String),
    Message { from: String, text: String },
    Closed(String),
    Failed { peer: String, reason: String },
}
