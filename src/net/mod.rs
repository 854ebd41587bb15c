pub mod direct;
pub mod peer;
pub mod presence;
pub mod rendezvous;
pub mod sync;

pub use direct::DirectBackend;
pub use peer::{ChannelBackend, ChannelUpdate, OutboundSignal, PeerEvent, PeerEventKind, PeerLink, PeerStage};
pub use presence::{build_roster, check_challenge_target, presence_meta, OnlinePlayer, PresenceStatus};
pub use rendezvous::{
    CloseRelay, ConnectionState, RelayEvent, RendezvousClient, RendezvousConfig, RendezvousEvent,
    RendezvousState, SendRelay, Welcome,
};
pub use sync::{apply_peer_message, move_message, parse_game_message, Challenge, ChallengeState, LobbyAction, SyncOutcome};
