//! Action dispatcher
//!
//! The game binds its handlers to individual pointer phases, so a bare
//! synthetic click is unreliable. Every activation replays the whole
//! press/release/click sequence instead.

use crate::locate::ControlHandle;
use crate::page::{Page, PageError, PointerEvent};

/// Events of one activation, in delivery order
pub const CLICK_SEQUENCE: [PointerEvent; 5] = [
    PointerEvent::PointerDown,
    PointerEvent::MouseDown,
    PointerEvent::PointerUp,
    PointerEvent::MouseUp,
    PointerEvent::Click,
];

#[derive(Debug, Clone, Copy, Default)]
pub struct Dispatcher {
    /// Outline the control while it is being clicked
    pub highlight: bool,
}

impl Dispatcher {
    pub fn new(highlight: bool) -> Self {
        Self { highlight }
    }

    /// Activate `control` the way a player's click would
    pub fn dispatch(&self, page: &dyn Page, control: &ControlHandle) -> Result<(), PageError> {
        log::debug!("Clicking '{}' ({:?})", control.label, control.node);

        if self.highlight {
            page.set_highlight(control.node, true)?;
        }
        for event in CLICK_SEQUENCE {
            page.dispatch(control.node, event)?;
        }
        if self.highlight {
            // The click may have re-rendered the control away
            if let Err(e) = page.set_highlight(control.node, false) {
                log::debug!("Could not clear highlight: {}", e);
            }
        }
        Ok(())
    }
}
