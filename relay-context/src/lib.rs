//! Conversational context manager for the chat relay.
//!
//! Decides what history goes out with each turn, shrinks it proactively
//! (trimming, per-turn compaction) and reactively (condensing the dialogue
//! when the model reports a context overflow), and serializes turns per
//! conversation.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod client;
pub mod compactor;
pub mod composer;
pub mod lock;
pub mod recovery;
pub mod relay;
pub mod store;
pub mod summarizer;
pub mod trimmer;
pub mod types;

pub use client::CompletionClient;
pub use compactor::HistoryCompactor;
pub use composer::{compose, situational_preamble, TurnRequest};
pub use lock::ConversationLocks;
pub use recovery::{OverflowRecovery, RecoveryOutcome, RecoveryState, RetryPrompt};
pub use relay::{ChatRelay, EndpointFactory, TurnReply, TurnStatus};
pub use store::{ConfigStore, MemoryStore, SessionStore, SqliteStore, Store, CONFIGS, SESSIONS};
pub use summarizer::{hard_truncate, local_compact, zip_text, Origin, Summarizer};
pub use trimmer::ContextTrimmer;
pub use types::{approximate_size, transcript, ConversationConfig, Endpoint, History, MessageRole, Turn};
