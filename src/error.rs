use thiserror::Error;

/// Why a move request was refused. The session is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveRejected {
    #[error("no game in progress")]
    NotStarted,
    #[error("game is over")]
    GameOver,
    #[error("square [{0}, {1}] is off the board")]
    OutOfRange(i32, i32),
    #[error("no piece on {0}")]
    NoPiece(String),
    #[error("piece on {0} does not belong to the side to move")]
    WrongTurn(String),
    #[error("illegal move {0}")]
    Illegal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotationError {
    #[error("invalid FEN: {0}")]
    Fen(String),
    #[error("invalid UCI move '{0}'")]
    Uci(String),
    #[error("move '{0}' is not legal here")]
    IllegalMove(String),
}

/// Relay or peer connection failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("already connected")]
    AlreadyConnected,
    #[error("socket error: {0}")]
    Socket(String),
    #[error("connection closed before welcome")]
    ClosedBeforeWelcome,
    #[error("relay error: {0}")]
    Server(String),
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("actor mailbox error: {0}")]
    Mailbox(String),
    #[error("connection attempt superseded")]
    Superseded,
    #[error("Enter your name.")]
    MissingName,
    #[error("Missing room code")]
    MissingRoomCode,
}

impl From<actix::MailboxError> for ConnectionError {
    fn from(e: actix::MailboxError) -> Self {
        ConnectionError::Mailbox(e.to_string())
    }
}

/// Move-search failures. All of them are recovered with a random move.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchError {
    #[error("search timed out")]
    Timeout,
    #[error("search cancelled")]
    Cancelled,
    #[error("search superseded by a newer request")]
    Superseded,
    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),
}

impl From<actix::MailboxError> for SearchError {
    fn from(e: actix::MailboxError) -> Self {
        SearchError::EngineUnavailable(e.to_string())
    }
}

/// A network message that was malformed or arrived out of turn.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("out-of-turn message: {0}")]
    OutOfTurn(String),
    #[error("unknown peer {0}")]
    UnknownPeer(String),
    #[error("not in a network game")]
    NotInGame,
    #[error("move rejected: {0}")]
    Rejected(#[from] MoveRejected),
}

impl From<serde_json::Error> for ProtocolViolation {
    fn from(e: serde_json::Error) -> Self {
        ProtocolViolation::Malformed(e.to_string())
    }
}

/// Peer channel failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("no open channel to {0}")]
    NotOpen(String),
    #[error("unknown peer {0}")]
    UnknownPeer(String),
    #[error("bad signal: {0}")]
    BadSignal(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<std::io::Error> for ChannelError {
    fn from(e: std::io::Error) -> Self {
        ChannelError::Transport(e.to_string())
    }
}

/// Why a lobby challenge could not be sent
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChallengeRefused {
    #[error("Finish the current game before challenging another player.")]
    InGame,
    #[error("Selected player is no longer online.")]
    TargetGone,
    #[error("{0} is already playing.")]
    TargetPlaying(String),
    #[error("Lobby is not connected.")]
    NotConnected,
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
