//! Storylet Pilot - click automation for storylet-style browser games
//!
//! This library drives a repeating "locate, act, wait, judge" loop over a
//! page of clickable choices: it finds controls by what a player reads on
//! them, clicks them the way a pointer would, waits for the page to
//! re-render, and decides whether to continue, retry or stop.
//!
//! ## Modes
//!
//! - Sequence mode replays a recording made with [`record::Recorder`].
//! - Loop mode re-derives each step from the live page, either from card
//!   rules or from ranked branch titles.
//!
//! The page itself is behind the [`page::Page`] trait; [`page::MemoryPage`]
//! is an in-memory implementation for tests and demos.

pub mod automation;
pub mod config;
pub mod dom;
pub mod locate;
pub mod pacing;
pub mod page;
pub mod record;

pub use automation::{
    ActionRecord, Session, SessionError, SequencerState, StatusUpdate, StopReason, Trigger,
};
pub use config::{load_config, load_config_file, ConfigError, FailurePolicy, LoadedConfig, Settings};
pub use locate::{Locator, TargetDescriptor};
pub use page::{MemoryPage, Page};
