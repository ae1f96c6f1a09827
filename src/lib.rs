//! linetab: the interactive parts of the LineTab product site as bevy plugins.
//!
//! - a product chat assistant that streams replies from an openai-compatible
//!   endpoint through the `llm` crate, with a canned offline reply when no key
//!   is configured and an apology when a request fails or times out.
//! - a bounded, seeded bubble particle field for the landing intro.
//! - the intro sequence (splash, bubbles, page) that owns the field's lifetime.
//! - dilution/dosing helpers for the how-to-use page.
//! - never blocks the main thread: on native replies are driven on a tiny
//!   tokio runtime; on wasm on bevy's async pool.
//!
//! api docs for the provider side: https://docs.rs/llm
//!   - message builder/roles:     `llm::chat::{ChatMessage, ChatRole}`
//!   - streaming:                 `llm::chat::{StreamResponse, StreamChoice, StreamDelta}`

use bevy::prelude::*;

pub mod bubbles;
pub mod chat;
pub mod config;
pub mod dosing;
pub mod error;
pub mod intro;

pub use bubbles::{BubbleFieldPlugin, BubbleMarker, ParticleField};
pub use chat::{ChatAssistantPlugin, ChatPipeline, close_chat, send_user_text};
pub use config::{BubbleConfig, ChatConfig};
pub use dosing::{BleachRatio, bleach_ratio, tablets_for_volume};
pub use error::{ChatError, ConfigError, DosingError};
pub use intro::{IntroCompleted, IntroPhase, IntroPhaseChanged, IntroPlugin, IntroSequence};

/// everything the site needs: chat, bubble field and intro.
/// chat sessions are still spawned by the app (see [`ChatPipeline::from_config`]).
#[derive(Default)]
pub struct LineTabPlugin {
    pub bubbles: BubbleConfig,
    pub intro: IntroSequence,
}

impl Plugin for LineTabPlugin {
    fn build(&self, app: &mut App) {
        info!(target: "linetab", "LineTabPlugin: build()");
        app.add_plugins((
            ChatAssistantPlugin,
            BubbleFieldPlugin { config: self.bubbles.clone() },
            IntroPlugin { sequence: self.intro.clone() },
        ));
    }
}
