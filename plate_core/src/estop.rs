//! Latching emergency stop input.
use crate::error::{AxisError, Result};
use crate::util::SharedClock;
use crate::watch::SwitchWatcher;
use plate_traits::SwitchInput;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EstopInput;

/// Runs `on_trip` once when the input asserts and stays tripped until `rearm`.
///
/// Dropping the value releases the input subscription.
pub struct EmergencyStop {
    input: Arc<dyn SwitchInput>,
    tripped: Arc<AtomicBool>,
    _watcher: SwitchWatcher,
}

impl std::fmt::Debug for EmergencyStop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmergencyStop")
            .field("tripped", &self.is_tripped())
            .finish_non_exhaustive()
    }
}

impl EmergencyStop {
    pub fn arm<F>(
        input: Arc<dyn SwitchInput>,
        settle: Duration,
        clock: SharedClock,
        on_trip: F,
    ) -> Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let tripped = Arc::new(AtomicBool::new(false));
        let on_trip = Arc::new(on_trip);

        let watcher = {
            let tripped = Arc::clone(&tripped);
            let on_trip = Arc::clone(&on_trip);
            SwitchWatcher::spawn(
                "estop",
                vec![(EstopInput, Arc::clone(&input))],
                settle,
                clock,
                move |_| {
                    if !tripped.swap(true, Ordering::SeqCst) {
                        tracing::error!("emergency stop asserted");
                        on_trip();
                    }
                },
            )?
        };

        // pressed before we subscribed: no edge will come
        if input.is_asserted() && !tripped.swap(true, Ordering::SeqCst) {
            tracing::error!("emergency stop asserted at arm time");
            on_trip();
        }
        tracing::info!("emergency stop armed");
        Ok(Self {
            input,
            tripped,
            _watcher: watcher,
        })
    }

    #[must_use]
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Clear the latch. Fails while the input is still asserted.
    pub fn rearm(&self) -> Result<()> {
        if self.input.is_asserted() {
            return Err(eyre::Report::new(AxisError::EmergencyStop));
        }
        self.tripped.store(false, Ordering::SeqCst);
        tracing::info!("emergency stop re-armed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plate_hardware::sim::SimSwitch;
    use plate_traits::test_clock::TestClock;
    use std::sync::atomic::AtomicU32;

    fn wait_for(cond: impl Fn() -> bool) -> bool {
        for _ in 0..400 {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn armed(sw: &SimSwitch) -> (EmergencyStop, Arc<AtomicU32>) {
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let estop = EmergencyStop::arm(
            Arc::new(sw.clone()),
            Duration::from_millis(10),
            Arc::new(TestClock::new()),
            move || {
                c.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();
        (estop, count)
    }

    #[test]
    fn trips_once_and_latches() {
        let sw = SimSwitch::new();
        let (estop, count) = armed(&sw);
        assert!(!estop.is_tripped());
        sw.set_asserted(true);
        assert!(wait_for(|| estop.is_tripped()));
        sw.set_asserted(false);
        sw.set_asserted(true);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(estop.is_tripped());
    }

    #[test]
    fn already_pressed_trips_at_arm() {
        let sw = SimSwitch::new();
        sw.set_asserted(true);
        let (estop, count) = armed(&sw);
        assert!(estop.is_tripped());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rearm_requires_release() {
        let sw = SimSwitch::new();
        sw.set_asserted(true);
        let (estop, _count) = armed(&sw);
        let err = estop.rearm().unwrap_err();
        assert_eq!(err.downcast_ref::<AxisError>(), Some(&AxisError::EmergencyStop));
        sw.set_asserted(false);
        estop.rearm().unwrap();
        assert!(!estop.is_tripped());
    }

    #[test]
    fn glitch_is_ignored() {
        let sw = SimSwitch::new();
        let (estop, count) = armed(&sw);
        sw.glitch();
        std::thread::sleep(Duration::from_millis(50));
        assert!(!estop.is_tripped());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
