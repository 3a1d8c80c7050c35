//! strix-channels — chat platform adapters
//!
//! Discord is the only platform today. The adapter stays deliberately thin:
//! it decides which messages to answer and hands the text to the rule engine
//! in strix-core, which owns everything else.

pub mod discord;
pub mod throttle;

pub use discord::{DISCORD_MESSAGE_LIMIT, DiscordBot};
pub use throttle::Throttle;
