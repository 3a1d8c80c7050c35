//! Discord adapter
//!
//! Answers direct messages unconditionally and guild messages only when the
//! bot is mentioned, so a classroom channel can carry normal conversation
//! without the bot butting in. Messages from other bots are ignored to keep
//! two bots from talking to each other forever.

use std::sync::{Arc, OnceLock};

use anyhow::{Context as _, Result};
use serenity::all::{Client, Context, EventHandler, GatewayIntents, Message, Ready, UserId};
use serenity::async_trait;
use tracing::{debug, error, info};

use strix_core::RuleEngine;

use crate::throttle::Throttle;

/// Discord's hard per-message character cap.
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;

/// The running bot: serenity client wiring around the rule engine.
pub struct DiscordBot {
    token: String,
    engine: Arc<RuleEngine>,
    throttle: Throttle,
}

impl DiscordBot {
    pub fn new(token: String, engine: Arc<RuleEngine>, throttle: Throttle) -> Self {
        Self {
            token,
            engine,
            throttle,
        }
    }

    /// Connect to the gateway and serve messages until the process stops.
    pub async fn run(self) -> Result<()> {
        let intents = GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;
        let handler = Handler {
            engine: self.engine,
            throttle: self.throttle,
            bot_id: OnceLock::new(),
        };
        let mut client = Client::builder(&self.token, intents)
            .event_handler(handler)
            .await
            .context("failed to build the Discord client")?;
        client
            .start()
            .await
            .context("the Discord gateway connection ended")?;
        Ok(())
    }
}

struct Handler {
    engine: Arc<RuleEngine>,
    throttle: Throttle,
    /// Set once by `ready`; until then guild mentions cannot be recognized.
    bot_id: OnceLock<UserId>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        let _ = self.bot_id.set(ready.user.id);
        info!("connected to Discord as '{}'", ready.user.name);
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(text) = self.addressed_text(&msg) else {
            return;
        };
        if !self.throttle.allow(&throttle_key(msg.author.id)) {
            debug!("dropping a throttled message from '{}'", msg.author.name);
            return;
        }

        debug!("'{}' asks: {text}", msg.author.name);
        // Answers can take a while; the typing indicator tells the student
        // the bot heard them.
        let _ = msg.channel_id.broadcast_typing(&ctx.http).await;

        let reply = self.engine.respond(&text).await;
        let reply = truncate_reply(&reply);
        if let Err(e) = msg.channel_id.say(&ctx.http, reply).await {
            error!("failed to send a reply: {e}");
        }
    }
}

impl Handler {
    /// The text this bot should answer, or `None` when the message is not
    /// addressed to it. DMs always count; guild messages count only when the
    /// bot is mentioned, with the mention tokens stripped.
    fn addressed_text(&self, msg: &Message) -> Option<String> {
        let bot_id = self.bot_id.get().copied();
        let is_dm = msg.guild_id.is_none();
        let mentioned = bot_id.is_some_and(|id| msg.mentions.iter().any(|user| user.id == id));
        if !is_dm && !mentioned {
            return None;
        }
        let text = match bot_id {
            Some(id) => strip_mentions(&msg.content, id),
            None => msg.content.trim().to_string(),
        };
        if text.is_empty() { None } else { Some(text) }
    }
}

/// Throttle key for a sender. Account ids are unique and stable where
/// display names are neither.
fn throttle_key(author: UserId) -> String {
    author.to_string()
}

/// Remove `<@id>` and `<@!id>` mention tokens addressed to the bot.
pub fn strip_mentions(content: &str, bot_id: UserId) -> String {
    content
        .replace(&format!("<@{bot_id}>"), "")
        .replace(&format!("<@!{bot_id}>"), "")
        .trim()
        .to_string()
}

/// Cut a reply to Discord's message cap without splitting a character.
pub fn truncate_reply(text: &str) -> String {
    if text.chars().count() <= DISCORD_MESSAGE_LIMIT {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(DISCORD_MESSAGE_LIMIT - 1).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_both_mention_forms() {
        let id = UserId::new(42);
        assert_eq!(strip_mentions("<@42> hello", id), "hello");
        assert_eq!(strip_mentions("<@!42> hello", id), "hello");
        assert_eq!(strip_mentions("hello <@42> there", id), "hello  there");
        assert_eq!(strip_mentions("no mention", id), "no mention");
    }

    #[test]
    fn throttle_keys_are_account_ids() {
        assert_eq!(throttle_key(UserId::new(42)), "42");
        // Two accounts sharing a display name still throttle independently.
        assert_ne!(throttle_key(UserId::new(7)), throttle_key(UserId::new(8)));
    }

    #[test]
    fn leaves_other_mentions_alone() {
        let id = UserId::new(42);
        assert_eq!(strip_mentions("<@99> hello", id), "<@99> hello");
    }

    #[test]
    fn short_replies_pass_through() {
        assert_eq!(truncate_reply("hello"), "hello");
        let exactly = "a".repeat(DISCORD_MESSAGE_LIMIT);
        assert_eq!(truncate_reply(&exactly), exactly);
    }

    #[test]
    fn long_replies_are_cut_to_the_cap() {
        let long = "a".repeat(DISCORD_MESSAGE_LIMIT + 100);
        let cut = truncate_reply(&long);
        assert_eq!(cut.chars().count(), DISCORD_MESSAGE_LIMIT);
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn truncation_respects_multibyte_characters() {
        let long = "ø".repeat(DISCORD_MESSAGE_LIMIT + 7);
        let cut = truncate_reply(&long);
        assert_eq!(cut.chars().count(), DISCORD_MESSAGE_LIMIT);
        assert!(cut.starts_with('ø'));
    }
}
