//! rgbpanel Hardware Library
//!
//! Double-buffered driver for HUB75 RGB LED matrix panels attached to the
//! Raspberry Pi GPIO header. Application code draws into off-screen
//! [`FrameBuffer`]s and hands them to [`MatrixController::swap`], which makes
//! them visible on the next vsync pulse of the refresh thread.

pub mod canvas;
pub mod color;
pub mod config;
pub mod controller;
pub mod error;
pub mod framebuffer;
pub mod gpio;
pub mod mapper;
pub mod mapping;
pub mod panel;
pub mod refresh;
pub mod runtime;

pub use canvas::{parse_hex_color, Canvas, Rgb};
pub use color::{ChannelOrder, RenderSettings, MAX_PWM_BITS};
pub use config::{HardwareConfig, RuntimeConfig};
pub use controller::MatrixController;
pub use error::{Error, Result};
pub use framebuffer::FrameBuffer;
pub use mapper::{available_pixel_mappers, MultiplexKind, PixelMap, MAX_PIXELS};
pub use mapping::HardwareMapping;
pub use panel::{EmulatedPanel, GpioPanel, Panel};
