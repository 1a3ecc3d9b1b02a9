//! Confirmation thread for switch inputs.
//!
//! Switch interrupts only push an event onto a bounded channel; a dedicated
//! thread waits out the settle delay, re-samples the input and reports edges
//! that are still asserted. Interrupt context therefore never sleeps or locks.
use crate::util::SharedClock;
use crossbeam_channel as xch;
use plate_traits::SwitchInput;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Pending edges beyond this are dropped; a confirmed edge stops motion anyway.
const EVENT_CAPACITY: usize = 16;

enum WatchEvent {
    Edge(usize),
    Shutdown,
}

/// Owns the interrupt registrations of a set of switches. Dropping it
/// unsubscribes every input and joins the thread.
pub(crate) struct SwitchWatcher {
    inputs: Vec<Arc<dyn SwitchInput>>,
    tx: xch::Sender<WatchEvent>,
    handle: Option<JoinHandle<()>>,
}

impl SwitchWatcher {
    /// Subscribe to every input and call `on_confirmed(key)` for each edge that
    /// is still asserted after `settle`.
    pub(crate) fn spawn<K, F>(
        name: &str,
        inputs: Vec<(K, Arc<dyn SwitchInput>)>,
        settle: Duration,
        clock: SharedClock,
        mut on_confirmed: F,
    ) -> crate::Result<Self>
    where
        K: Copy + Send + std::fmt::Debug + 'static,
        F: FnMut(K) + Send + 'static,
    {
        let (tx, rx) = xch::bounded::<WatchEvent>(EVENT_CAPACITY);
        let keys: Vec<K> = inputs.iter().map(|(k, _)| *k).collect();
        let switches: Vec<Arc<dyn SwitchInput>> = inputs.into_iter().map(|(_, s)| s).collect();

        let thread_switches = switches.clone();
        let thread_name = format!("{name}-switches");
        let handle = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                for ev in rx {
                    let idx = match ev {
                        WatchEvent::Edge(idx) => idx,
                        WatchEvent::Shutdown => break,
                    };
                    clock.sleep(settle);
                    if thread_switches[idx].is_asserted() {
                        on_confirmed(keys[idx]);
                    } else {
                        tracing::debug!(switch = ?keys[idx], "switch edge did not persist; ignored");
                    }
                }
                tracing::trace!("switch watcher exiting");
            })
            .map_err(|e| eyre::eyre!("spawn switch watcher for {name}: {e}"))?;

        let watcher = Self {
            inputs: switches,
            tx,
            handle: Some(handle),
        };
        for (idx, input) in watcher.inputs.iter().enumerate() {
            let tx = watcher.tx.clone();
            input
                .subscribe(Box::new(move || {
                    // never block in interrupt context
                    let _ = tx.try_send(WatchEvent::Edge(idx));
                }))
                .map_err(|e| crate::hw_error::report(name, &e))?;
        }
        Ok(watcher)
    }
}

impl Drop for SwitchWatcher {
    fn drop(&mut self) {
        for input in &self.inputs {
            if let Err(e) = input.unsubscribe() {
                tracing::warn!(error = %e, "switch unsubscribe failed");
            }
        }
        let _ = self.tx.send(WatchEvent::Shutdown);
        // the last owner may be an `on_confirmed` callback on the watcher thread
        if let Some(handle) = self.handle.take()
            && handle.thread().id() != std::thread::current().id()
            && let Err(e) = handle.join()
        {
            tracing::warn!(?e, "switch watcher panicked during shutdown");
        }
    }
}
