//! Maps `Box<dyn Error>` from trait boundaries to typed `AxisError`.
//!
//! The traits in `plate_traits` use `Box<dyn Error + Send + Sync>`; this module
//! converts those to our typed error enum, with an optional feature-gated path
//! for `plate_hardware::HwError` downcasting.

use crate::error::AxisError;

/// Map a trait-boundary error to a typed `AxisError`.
///
/// Known hardware error types are downcast first, then string heuristics apply.
pub fn map_hw_error(axis: &str, e: &(dyn std::error::Error + 'static)) -> AxisError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<plate_hardware::error::HwError>() {
            return match hw {
                plate_hardware::error::HwError::Timeout => AxisError::SensorTimeout {
                    axis: axis.to_string(),
                },
                other => AxisError::HardwareFault(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        AxisError::SensorTimeout {
            axis: axis.to_string(),
        }
    } else {
        AxisError::Hardware(s)
    }
}

/// Convenience for `map_err` at trait call sites.
pub(crate) fn report(axis: &str, e: &plate_traits::BoxError) -> eyre::Report {
    eyre::Report::new(map_hw_error(axis, e.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_fallback_detects_timeouts() {
        let e = std::io::Error::other("read timeout on pin 17");
        assert!(matches!(
            map_hw_error("x", &e),
            AxisError::SensorTimeout { axis } if axis == "x"
        ));
        let e = std::io::Error::other("pin busy");
        assert_eq!(map_hw_error("y", &e), AxisError::Hardware("pin busy".into()));
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn downcasts_hw_error() {
        let e = plate_hardware::HwError::Gpio("export failed".into());
        assert!(matches!(map_hw_error("x", &e), AxisError::HardwareFault(s) if s.contains("export failed")));
        let e = plate_hardware::HwError::Timeout;
        assert!(matches!(map_hw_error("x", &e), AxisError::SensorTimeout { .. }));
    }
}
