//! strix-core — the brain of the strix Discord bot
//!
//! Everything that is not a chat platform lives here: the layered
//! [`config::Settings`], the CSV-driven [`engine::RuleEngine`], the two-phase
//! [`provider::ModelProvider`] that lets the backend route each question to
//! the model best suited to answer it, and the [`doctor`] checks that tell an
//! operator why a deployment is misbehaving.

pub mod config;
pub mod doctor;
pub mod engine;
pub mod provider;

pub use config::Settings;
pub use engine::RuleEngine;
pub use provider::{
    Backend, ModelClient, ModelProvider, ProviderConfig, ProviderError, RequestOutcome,
    RequestState,
};
