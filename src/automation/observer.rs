//! Change observer
//!
//! Two background tasks wake the sequencer: a debounced watch on the page's
//! mutation counter and a coarse periodic tick. Neither runs a cycle itself;
//! both only offer a [`Trigger`] to the run's single-consumer queue, which
//! refuses it while a cycle is in flight.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};

use super::sequencer::RunControl;

/// Why the sequencer is being asked to re-evaluate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The page stopped changing after a burst of mutations
    Mutation,
    /// Periodic timer
    Tick,
    /// Requested by the host
    Manual,
}

/// Offer a [`Trigger::Mutation`] once the page has been quiet for `debounce`
pub fn spawn_mutation_watcher(
    mut changes: watch::Receiver<u64>,
    debounce: Duration,
    control: Arc<RunControl>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let cancel = control.cancel_token().clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                changed = changes.changed() => if changed.is_err() { return },
            }

            // Wait out the burst
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = sleep(debounce) => break,
                    changed = changes.changed() => if changed.is_err() { return },
                }
            }

            if !control.offer(Trigger::Mutation) {
                log::trace!("Mutation trigger skipped");
            }
        }
    })
}

/// Offer a [`Trigger::Tick`] every `period`
pub fn spawn_ticker(period: Duration, control: Arc<RunControl>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let cancel = control.cancel_token().clone();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if !control.offer(Trigger::Tick) {
                        log::trace!("Tick trigger skipped");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{Dom, ElementBuilder};
    use crate::page::{MemoryPage, Page};

    #[tokio::test(start_paused = true)]
    async fn test_mutations_are_debounced() {
        let page = MemoryPage::new(Dom::new());
        let (control, mut triggers) = RunControl::new(None);
        let watcher = spawn_mutation_watcher(
            page.changes(),
            Duration::from_millis(800),
            control.clone(),
        );

        for _ in 0..5 {
            page.update(|dom| {
                let root = dom.root();
                dom.append(root, ElementBuilder::new("p"));
            });
            sleep(Duration::from_millis(100)).await;
        }
        assert!(triggers.try_recv().is_err());

        sleep(Duration::from_millis(1000)).await;
        assert_eq!(triggers.try_recv().ok(), Some(Trigger::Mutation));
        assert!(triggers.try_recv().is_err());

        control.cancel_token().cancel();
        watcher.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_skips_while_in_flight() {
        let (control, mut triggers) = RunControl::new(None);
        let ticker = spawn_ticker(Duration::from_millis(2000), control.clone());

        control.set_in_flight(true);
        sleep(Duration::from_millis(2500)).await;
        assert!(triggers.try_recv().is_err());

        control.set_in_flight(false);
        sleep(Duration::from_millis(2000)).await;
        assert_eq!(triggers.try_recv().ok(), Some(Trigger::Tick));

        control.cancel_token().cancel();
        ticker.await.unwrap();
    }
}
