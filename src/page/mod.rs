//! Page host interface
//!
//! The automation never owns the document it drives. A host (a browser
//! bridge, or [`MemoryPage`] in tests and demos) hands out snapshots of the
//! current tree, delivers low-level pointer events, and announces every
//! mutation through a generation counter.

mod memory;

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::dom::{Dom, NodeId};

pub use memory::{DispatchedEvent, MemoryPage};

/// Low-level input events, in the order a real click produces them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerEvent {
    PointerDown,
    MouseDown,
    PointerUp,
    MouseUp,
    Click,
}

impl fmt::Display for PointerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PointerEvent::PointerDown => "pointerdown",
            PointerEvent::MouseDown => "mousedown",
            PointerEvent::PointerUp => "pointerup",
            PointerEvent::MouseUp => "mouseup",
            PointerEvent::Click => "click",
        };
        f.write_str(name)
    }
}

/// Errors reported by a page host
#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error("Node {0:?} is no longer attached to the document")]
    Detached(NodeId),
    #[error("Page rejected {event} on node {node:?}: {reason}")]
    Rejected {
        node: NodeId,
        event: PointerEvent,
        reason: String,
    },
}

/// A live document the automation can read and click
pub trait Page: Send + Sync {
    /// Current state of the document
    fn snapshot(&self) -> Arc<Dom>;

    /// Deliver one input event to `node`
    fn dispatch(&self, node: NodeId, event: PointerEvent) -> Result<(), PageError>;

    /// Outline a control so the operator can follow along
    fn set_highlight(&self, _node: NodeId, _on: bool) -> Result<(), PageError> {
        Ok(())
    }

    /// Mutation generation; changes whenever the document does
    fn changes(&self) -> watch::Receiver<u64>;
}
