//! Automation loop
//!
//! Everything that turns a step description into clicks: waiting for
//! controls, dispatching pointer events, judging outcomes and the state
//! machine that ties them together.

pub mod classify;
pub mod dispatch;
pub mod observer;
pub mod poll;
pub mod sequencer;
pub mod session;
pub mod source;

pub use classify::{Classify, ClassifyContext, OutcomeClassifier, Verdict};
pub use dispatch::Dispatcher;
pub use observer::Trigger;
pub use poll::{pause, poll_until};
pub use sequencer::{
    CycleOutcome, RunControl, Sequencer, SequencerState, StatusCallback, StatusUpdate, StopReason,
};
pub use session::{Session, SessionError};
pub use source::{
    ActionRecord, BranchPrioritySource, CardRuleSource, EquipHighestSource, NextStep,
    SequenceSource, StepSource,
};
