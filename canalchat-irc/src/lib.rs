//! IRC Session (C2) and Frame Parser (C3): connects to Twitch IRC,
//! keeps joined channels in sync with the Channel Registry, and turns
//! the wire protocol into parsed, pre-identity-resolution frames.

pub mod config;
pub mod frame;
pub mod parser;
pub mod session;

pub use config::IrcConfig;
pub use frame::RawFrame;
pub use parser::{
    parse_frame, ParsedChatMessage, ParsedFrame, ParsedGiftSub, ParsedModAction, ParsedRaid,
    ParsedSubscription,
};
pub use session::{IrcSession, SessionState};
