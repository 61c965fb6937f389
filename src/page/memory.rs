use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::watch;

use super::{Page, PageError, PointerEvent};
use crate::dom::{Dom, NodeId, Selector};

type Mutation = Arc<dyn Fn(&mut Dom) + Send + Sync>;

/// One event delivered to a [`MemoryPage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchedEvent {
    pub node: NodeId,
    pub event: PointerEvent,
}

/// Scripted response to a click
struct Reaction {
    target: Selector,
    delay: Duration,
    apply: Mutation,
}

struct Inner {
    dom: RwLock<Arc<Dom>>,
    generation: watch::Sender<u64>,
    events: Mutex<Vec<DispatchedEvent>>,
    highlights: Mutex<Vec<(NodeId, bool)>>,
    reactions: Mutex<Vec<Reaction>>,
}

/// In-memory page host
///
/// Clones share the same document. Scripted reactions model the game's
/// re-rendering after a click; a non-zero delay applies the change from a
/// spawned task, the way the real page updates asynchronously.
#[derive(Clone)]
pub struct MemoryPage {
    inner: Arc<Inner>,
}

impl Default for MemoryPage {
    fn default() -> Self {
        Self::new(Dom::new())
    }
}

impl MemoryPage {
    pub fn new(dom: Dom) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                dom: RwLock::new(Arc::new(dom)),
                generation,
                events: Mutex::new(Vec::new()),
                highlights: Mutex::new(Vec::new()),
                reactions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Mutate the document and announce the change
    pub fn update(&self, mutation: impl FnOnce(&mut Dom)) {
        {
            let mut dom = self.inner.dom.write().unwrap_or_else(PoisonError::into_inner);
            mutation(Arc::make_mut(&mut dom));
        }
        self.inner.generation.send_modify(|g| *g += 1);
    }

    /// Run `mutation` every time a control matching `target` is clicked
    pub fn on_click(
        &self,
        target: Selector,
        delay: Duration,
        mutation: impl Fn(&mut Dom) + Send + Sync + 'static,
    ) {
        self.inner
            .reactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Reaction {
                target,
                delay,
                apply: Arc::new(mutation),
            });
    }

    /// Every event delivered so far
    pub fn events(&self) -> Vec<DispatchedEvent> {
        self.inner
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Nodes that received a `click`, in order
    pub fn clicks(&self) -> Vec<NodeId> {
        self.events()
            .into_iter()
            .filter(|e| e.event == PointerEvent::Click)
            .map(|e| e.node)
            .collect()
    }

    /// Number of clicks delivered to elements with the given `id`
    pub fn clicks_on(&self, id: &str) -> usize {
        let dom = self.snapshot();
        self.clicks()
            .into_iter()
            .filter(|&n| dom.element(n).and_then(|el| el.id()) == Some(id))
            .count()
    }

    pub fn highlights(&self) -> Vec<(NodeId, bool)> {
        self.inner
            .highlights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn react(&self, node: NodeId) {
        let dom = self.snapshot();
        let triggered: Vec<(Duration, Mutation)> = self
            .inner
            .reactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.target.matches(&dom, node))
            .map(|r| (r.delay, r.apply.clone()))
            .collect();

        for (delay, apply) in triggered {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) if !delay.is_zero() => {
                    let page = self.clone();
                    handle.spawn(async move {
                        tokio::time::sleep(delay).await;
                        page.update(|dom| apply(dom));
                    });
                }
                _ => self.update(|dom| apply(dom)),
            }
        }
    }
}

impl Page for MemoryPage {
    fn snapshot(&self) -> Arc<Dom> {
        self.inner
            .dom
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn dispatch(&self, node: NodeId, event: PointerEvent) -> Result<(), PageError> {
        if !self.snapshot().is_attached(node) {
            return Err(PageError::Detached(node));
        }
        self.inner
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(DispatchedEvent { node, event });

        if event == PointerEvent::Click {
            self.react(node);
        }
        Ok(())
    }

    fn set_highlight(&self, node: NodeId, on: bool) -> Result<(), PageError> {
        self.inner
            .highlights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((node, on));
        Ok(())
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.inner.generation.subscribe()
    }
}
