//! Frame composition, panel capability, and the render pipeline.

pub mod frame;
pub mod panel;
pub mod pipeline;

pub use frame::{Canvas, Frame, Rgb};
pub use panel::{HardwareFault, MockPanel, PanelDriver};
pub use pipeline::{DisplayHandle, DisplayStatus, RenderPipeline};
