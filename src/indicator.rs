//! Busy indicator: one digital output held high while a capture cycle
//! is in progress.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndicatorError {
    #[error("failed to drive indicator at {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Capability interface over the status output.
pub trait StatusIndicator {
    fn set_busy(&mut self, busy: bool) -> Result<(), IndicatorError>;
}

impl<T: StatusIndicator + ?Sized> StatusIndicator for Box<T> {
    fn set_busy(&mut self, busy: bool) -> Result<(), IndicatorError> {
        (**self).set_busy(busy)
    }
}

/// Indicator for hosts with no output line: state changes are logged.
#[derive(Debug, Default)]
pub struct LogIndicator;

impl StatusIndicator for LogIndicator {
    fn set_busy(&mut self, busy: bool) -> Result<(), IndicatorError> {
        tracing::debug!(busy, "Status indicator");
        Ok(())
    }
}

/// Drives a sysfs LED `brightness` or GPIO `value` file.
#[derive(Debug)]
pub struct SysfsIndicator {
    path: PathBuf,
    active_low: bool,
}

impl SysfsIndicator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            active_low: false,
        }
    }

    /// Inverts the written level, for LEDs wired to light on low.
    pub fn active_low(mut self) -> Self {
        self.active_low = true;
        self
    }
}

impl StatusIndicator for SysfsIndicator {
    fn set_busy(&mut self, busy: bool) -> Result<(), IndicatorError> {
        let level = if busy != self.active_low { b"1" } else { b"0" };
        std::fs::write(&self.path, level).map_err(|source| IndicatorError::Write {
            path: self.path.display().to_string(),
            source,
        })
    }
}

/// Records every level change.
#[derive(Debug, Default)]
pub struct MockIndicator {
    history: Vec<bool>,
}

impl MockIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every value passed to `set_busy`, in order.
    pub fn history(&self) -> &[bool] {
        &self.history
    }

    pub fn is_busy(&self) -> bool {
        self.history.last().copied().unwrap_or(false)
    }
}

impl StatusIndicator for MockIndicator {
    fn set_busy(&mut self, busy: bool) -> Result<(), IndicatorError> {
        self.history.push(busy);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysfs_indicator_writes_levels() {
        let path = std::env::temp_dir().join(format!("meter-cam-led-{}", std::process::id()));
        let mut led = SysfsIndicator::new(&path);

        led.set_busy(true).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"1");
        led.set_busy(false).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"0");

        let mut inverted = SysfsIndicator::new(&path).active_low();
        inverted.set_busy(true).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"0");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_sysfs_indicator_reports_missing_file() {
        let mut led = SysfsIndicator::new("/nonexistent/meter-cam/brightness");
        assert!(matches!(
            led.set_busy(true),
            Err(IndicatorError::Write { .. })
        ));
    }
}
