//! Panel driver capability.
//!
//! The render pipeline is the only component that talks to the panel. The
//! concrete matrix binding lives behind `PanelDriver` so the rest of the
//! system (and the tests) can run against a mock, the same way the original
//! hardware layer falls back to mock mode when the matrix library is absent.

use super::frame::Frame;
use thiserror::Error;

/// Transient panel write failure, retried on the next tick
#[derive(Error, Debug)]
#[error("Panel write failed: {0}")]
pub struct HardwareFault(pub String);

/// Capability contract for the physical panel
pub trait PanelDriver: Send {
    /// Push one full frame to the panel
    fn write_frame(&mut self, frame: &Frame) -> Result<(), HardwareFault>;

    /// Forward a brightness change to the panel hardware (0-100)
    fn set_brightness(&mut self, percent: u8);
}

/// Mock panel for development without hardware
///
/// Counts writes and remembers the last frame so the pipeline tests can
/// observe exactly what reached the hardware boundary.
pub struct MockPanel {
    writes: u64,
    brightness: u8,
    last_frame: Option<Frame>,
}

impl MockPanel {
    pub fn new() -> Self {
        Self {
            writes: 0,
            brightness: 100,
            last_frame: None,
        }
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    pub fn last_frame(&self) -> Option<&Frame> {
        self.last_frame.as_ref()
    }
}

impl Default for MockPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl PanelDriver for MockPanel {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), HardwareFault> {
        self.writes += 1;
        tracing::trace!("Mock panel write: {}x{}", frame.width(), frame.height());
        self.last_frame = Some(frame.clone());
        Ok(())
    }

    fn set_brightness(&mut self, percent: u8) {
        self.brightness = percent.min(100);
        tracing::debug!("Mock panel brightness: {}", self.brightness);
    }
}
