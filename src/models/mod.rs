pub mod app_state;
pub mod config;
pub mod game_state;
pub mod messages;

// Re-export important types
pub use app_state::*;
pub use game_state::*;
pub use messages::*;
