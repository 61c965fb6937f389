//! Pacing
//!
//! The game re-renders on its own schedule and rate-limits obvious bots, so
//! every wait the automation makes gets a random extra on top of its
//! configured base.

pub mod humanize;

pub use humanize::Humanizer;
