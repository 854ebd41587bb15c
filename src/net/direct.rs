//! Direct TCP channels between two players.
//!
//! The initiator listens and advertises `tcp <host> <port>` candidates; the
//! responder dials the first candidate and proves itself with the offer's
//! token. After the `HELLO` line both sides exchange newline-delimited JSON.

use actix_rt::task::JoinHandle;
use futures::channel::mpsc;
use futures::StreamExt;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::ChannelError;
use crate::models::{IceCandidate, SdpKind, SessionDescription};
use crate::net::peer::{ChannelBackend, PeerEvent, PeerEventKind};

const PROTOCOL: &str = "p2p-chess/1";
const HELLO: &str = "HELLO";
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

type LineReader = Lines<BufReader<OwnedReadHalf>>;

struct DirectPeer {
    token: String,
    outbound: mpsc::UnboundedSender<String>,
    /// Present until a task takes over the channel
    outbound_rx: Option<mpsc::UnboundedReceiver<String>>,
    task: Option<JoinHandle<()>>,
}

impl DirectPeer {
    fn new(token: String) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded();
        DirectPeer {
            token,
            outbound,
            outbound_rx: Some(outbound_rx),
            task: None,
        }
    }
}

pub struct DirectBackend {
    bind_host: String,
    advertise_host: String,
    events: mpsc::UnboundedSender<PeerEvent>,
    peers: HashMap<String, DirectPeer>,
}

impl DirectBackend {
    pub fn new(bind_host: &str, advertise_host: &str, events: mpsc::UnboundedSender<PeerEvent>) -> Self {
        DirectBackend {
            bind_host: bind_host.to_string(),
            advertise_host: advertise_host.to_string(),
            events,
            peers: HashMap::new(),
        }
    }

    fn peer_mut(&mut self, peer: &str) -> Result<&mut DirectPeer, ChannelError> {
        self.peers
            .get_mut(peer)
            .ok_or_else(|| ChannelError::UnknownPeer(peer.to_string()))
    }
}

impl ChannelBackend for DirectBackend {
    fn create_offer(&mut self, peer: &str) -> Result<SessionDescription, ChannelError> {
        let listener = std::net::TcpListener::bind((self.bind_host.as_str(), 0))?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        let listener = TcpListener::from_std(listener)?;

        let token = Uuid::new_v4().to_string();
        let mut state = DirectPeer::new(token.clone());
        let outbound_rx = state
            .outbound_rx
            .take()
            .ok_or_else(|| ChannelError::Transport("channel already taken".to_string()))?;
        state.task = Some(actix_rt::spawn(accept_channel(
            peer.to_string(),
            listener,
            token.clone(),
            outbound_rx,
            self.events.clone(),
        )));
        if let Some(old) = self.peers.insert(peer.to_string(), state) {
            abort(old);
        }
        info!("Listening for {} on port {}", peer, port);

        let candidate = IceCandidate {
            candidate: format!("tcp {} {}", self.advertise_host, port),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        };
        let _ = self
            .events
            .unbounded_send(PeerEvent::new(peer, PeerEventKind::LocalCandidate(candidate)));

        Ok(SessionDescription {
            kind: SdpKind::Offer,
            sdp: format!("{} tcp passive token={}", PROTOCOL, token),
        })
    }

    fn accept_offer(&mut self, peer: &str, offer: &SessionDescription) -> Result<SessionDescription, ChannelError> {
        let token = parse_offer_token(&offer.sdp)?;
        if let Some(old) = self.peers.insert(peer.to_string(), DirectPeer::new(token)) {
            abort(old);
        }
        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: format!("{} tcp active", PROTOCOL),
        })
    }

    fn accept_answer(&mut self, peer: &str, answer: &SessionDescription) -> Result<(), ChannelError> {
        self.peer_mut(peer)?;
        if !answer.sdp.starts_with(PROTOCOL) {
            return Err(ChannelError::BadSignal(format!("unsupported answer '{}'", answer.sdp)));
        }
        Ok(())
    }

    fn add_remote_candidate(&mut self, peer: &str, candidate: &IceCandidate) -> Result<(), ChannelError> {
        let (host, port) = parse_candidate(&candidate.candidate)?;
        let events = self.events.clone();
        let state = self.peer_mut(peer)?;
        let outbound_rx = match state.outbound_rx.take() {
            Some(rx) => rx,
            None => {
                debug!("Ignoring extra candidate for {}", peer);
                return Ok(());
            }
        };
        info!("Dialing {} at {}:{}", peer, host, port);
        state.task = Some(actix_rt::spawn(dial_channel(
            peer.to_string(),
            host,
            port,
            state.token.clone(),
            outbound_rx,
            events,
        )));
        Ok(())
    }

    fn send(&mut self, peer: &str, text: String) -> Result<(), ChannelError> {
        let state = self.peer_mut(peer)?;
        state
            .outbound
            .unbounded_send(text)
            .map_err(|_| ChannelError::NotOpen(peer.to_string()))
    }

    fn close_peer(&mut self, peer: &str) {
        if let Some(state) = self.peers.remove(peer) {
            debug!("Closing direct channel to {}", peer);
            abort(state);
        }
    }
}

impl Drop for DirectBackend {
    fn drop(&mut self) {
        for (_, state) in self.peers.drain() {
            abort(state);
        }
    }
}

fn abort(state: DirectPeer) {
    if let Some(task) = state.task {
        task.abort();
    }
}

fn parse_offer_token(sdp: &str) -> Result<String, ChannelError> {
    let mut parts = sdp.split_whitespace();
    if parts.next() != Some(PROTOCOL) {
        return Err(ChannelError::BadSignal(format!("unsupported offer '{}'", sdp)));
    }
    parts
        .find_map(|part| part.strip_prefix("token="))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ChannelError::BadSignal("offer has no token".to_string()))
}

fn parse_candidate(candidate: &str) -> Result<(String, u16), ChannelError> {
    let parts: Vec<&str> = candidate.split_whitespace().collect();
    match parts.as_slice() {
        ["tcp", host, port] => {
            let port = port
                .parse::<u16>()
                .map_err(|_| ChannelError::BadSignal(format!("bad port in '{}'", candidate)))?;
            Ok((host.to_string(), port))
        }
        _ => Err(ChannelError::BadSignal(format!("unsupported candidate '{}'", candidate))),
    }
}

async fn accept_channel(
    peer: String,
    listener: TcpListener,
    token: String,
    outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<PeerEvent>,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                let _ = events.unbounded_send(PeerEvent::new(&peer, PeerEventKind::Failed(e.to_string())));
                return;
            }
        };
        match expect_hello(stream, &token).await {
            Ok(io) => {
                drop(listener);
                run_channel(peer, io, outbound, events).await;
                return;
            }
            Err(e) => warn!("Rejected direct connection from {}: {}", addr, e),
        }
    }
}

async fn expect_hello(stream: TcpStream, token: &str) -> Result<(LineReader, OwnedWriteHalf), ChannelError> {
    let (read, write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    let first = timeout(HANDSHAKE_TIMEOUT, lines.next_line())
        .await
        .map_err(|_| ChannelError::Transport("handshake timed out".to_string()))??;
    match first {
        Some(line) if line.trim() == format!("{} {}", HELLO, token) => Ok((lines, write)),
        Some(_) => Err(ChannelError::BadSignal("wrong session token".to_string())),
        None => Err(ChannelError::Transport("closed during handshake".to_string())),
    }
}

async fn dial_channel(
    peer: String,
    host: String,
    port: u16,
    token: String,
    outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<PeerEvent>,
) {
    let connected = async {
        let stream = timeout(DIAL_TIMEOUT, TcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|_| ChannelError::Transport(format!("dial {}:{} timed out", host, port)))??;
        let (read, mut write) = stream.into_split();
        write.write_all(format!("{} {}\n", HELLO, token).as_bytes()).await?;
        Ok::<_, ChannelError>((BufReader::new(read).lines(), write))
    }
    .await;

    match connected {
        Ok(io) => run_channel(peer, io, outbound, events).await,
        Err(e) => {
            warn!("Could not reach {}: {}", peer, e);
            let _ = events.unbounded_send(PeerEvent::new(&peer, PeerEventKind::Failed(e.to_string())));
        }
    }
}

async fn run_channel(
    peer: String,
    (mut lines, mut write): (LineReader, OwnedWriteHalf),
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<PeerEvent>,
) {
    let _ = events.unbounded_send(PeerEvent::new(&peer, PeerEventKind::Open));

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        let _ = events.unbounded_send(PeerEvent::new(&peer, PeerEventKind::Message(line.to_string())));
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Read from {} failed: {}", peer, e);
                    break;
                }
            },
            text = outbound.next() => match text {
                Some(text) => {
                    if let Err(e) = write.write_all(format!("{}\n", text).as_bytes()).await {
                        warn!("Write to {} failed: {}", peer, e);
                        break;
                    }
                }
                None => break,
            },
        }
    }

    let _ = write.shutdown().await;
    let _ = events.unbounded_send(PeerEvent::new(&peer, PeerEventKind::Closed));
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<PeerEvent>) -> PeerEvent {
        timeout(Duration::from_secs(5), rx.next())
            .await
            .expect("timed out waiting for channel event")
            .expect("event stream ended")
    }

    #[test]
    fn offers_and_candidates_parse() {
        assert_eq!(
            parse_offer_token("p2p-chess/1 tcp passive token=abc").unwrap(),
            "abc"
        );
        assert!(parse_offer_token("v=0 o=- 1 2 IN IP4 0.0.0.0").is_err());
        assert!(parse_offer_token("p2p-chess/1 tcp passive").is_err());

        assert_eq!(
            parse_candidate("tcp 10.1.2.3 4567").unwrap(),
            ("10.1.2.3".to_string(), 4567)
        );
        assert!(parse_candidate("candidate:1 1 udp 2122260223 10.0.0.1 5000 typ host").is_err());
        assert!(parse_candidate("tcp host notaport").is_err());
    }

    #[actix_rt::test]
    async fn two_backends_exchange_lines() {
        let (a_tx, mut a_rx) = mpsc::unbounded();
        let (b_tx, mut b_rx) = mpsc::unbounded();
        let mut alice = DirectBackend::new("127.0.0.1", "127.0.0.1", a_tx);
        let mut bob = DirectBackend::new("127.0.0.1", "127.0.0.1", b_tx);

        let offer = alice.create_offer("bob").unwrap();
        let answer = bob.accept_offer("alice", &offer).unwrap();
        alice.accept_answer("bob", &answer).unwrap();

        let candidate = match next_event(&mut a_rx).await.kind {
            PeerEventKind::LocalCandidate(candidate) => candidate,
            other => panic!("expected candidate, got {:?}", other),
        };
        bob.add_remote_candidate("alice", &candidate).unwrap();

        assert_eq!(next_event(&mut a_rx).await.kind, PeerEventKind::Open);
        assert_eq!(next_event(&mut b_rx).await.kind, PeerEventKind::Open);

        alice.send("bob", r#"{"type":"resign","color":"w"}"#.to_string()).unwrap();
        assert_eq!(
            next_event(&mut b_rx).await.kind,
            PeerEventKind::Message(r#"{"type":"resign","color":"w"}"#.to_string())
        );

        bob.send("alice", "pong".to_string()).unwrap();
        assert_eq!(
            next_event(&mut a_rx).await,
            PeerEvent::new("bob", PeerEventKind::Message("pong".to_string()))
        );

        alice.close_peer("bob");
        assert_eq!(next_event(&mut b_rx).await.kind, PeerEventKind::Closed);
    }

    #[actix_rt::test]
    async fn wrong_token_is_turned_away() {
        let (a_tx, mut a_rx) = mpsc::unbounded();
        let mut alice = DirectBackend::new("127.0.0.1", "127.0.0.1", a_tx);
        alice.create_offer("bob").unwrap();
        let candidate = match next_event(&mut a_rx).await.kind {
            PeerEventKind::LocalCandidate(candidate) => candidate,
            other => panic!("expected candidate, got {:?}", other),
        };

        let (b_tx, mut b_rx) = mpsc::unbounded();
        let mut mallory = DirectBackend::new("127.0.0.1", "127.0.0.1", b_tx);
        let forged = SessionDescription {
            kind: SdpKind::Offer,
            sdp: "p2p-chess/1 tcp passive token=forged".to_string(),
        };
        mallory.accept_offer("alice", &forged).unwrap();
        mallory.add_remote_candidate("alice", &candidate).unwrap();

        // The dialer believes it connected; the listener drops it
        assert_eq!(next_event(&mut b_rx).await.kind, PeerEventKind::Open);
        assert_eq!(next_event(&mut b_rx).await.kind, PeerEventKind::Closed);
        assert!(timeout(Duration::from_millis(200), a_rx.next()).await.is_err());
    }

    #[test]
    fn unknown_peers_are_reported() {
        let (tx, _rx) = mpsc::unbounded();
        let mut backend = DirectBackend::new("127.0.0.1", "127.0.0.1", tx);
        assert_eq!(
            backend.send("nobody", "x".to_string()),
            Err(ChannelError::UnknownPeer("nobody".to_string()))
        );
        let candidate = IceCandidate {
            candidate: "tcp 127.0.0.1 1".to_string(),
            sdp_mid: None,
            sdp_m_line_index: None,
        };
        assert!(backend.add_remote_candidate("nobody", &candidate).is_err());
    }
}
