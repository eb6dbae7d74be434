//! Error types for the rgbpanel hardware library.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when configuring or driving the matrix.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or contradictory topology / PWM parameters.
    #[error("Invalid matrix configuration: {0}")]
    Configuration(String),

    /// GPIO register block could not be opened or mapped.
    #[error("Cannot access GPIO device {device}: {source}")]
    HardwareAccess {
        device: String,
        #[source]
        source: std::io::Error,
    },

    /// Another process holds the exclusive claim on the GPIO device.
    #[error("GPIO device {0} is already in use by another process")]
    GpioBusy(String),

    /// Buffer copy between differently sized buffers.
    #[error("Buffer dimension mismatch: expected {expected_width}x{expected_height}, got {width}x{height}")]
    DimensionMismatch {
        expected_width: usize,
        expected_height: usize,
        width: usize,
        height: usize,
    },

    /// Serialized frame payload has the wrong length.
    #[error("Framebuffer size mismatch: expected {expected} bytes, got {actual}")]
    FramebufferSize { expected: usize, actual: usize },

    /// Operation on a controller after teardown.
    #[error("Matrix controller is closed")]
    Closed,

    /// Pixel mapper name not registered.
    #[error("No such pixel mapper: {0}")]
    UnknownMapper(String),

    /// Pixel mapper rejected its parameters or the current topology.
    #[error("Pixel mapper {mapper}: {reason}")]
    MapperParameter { mapper: String, reason: String },

    /// Privilege drop after hardware initialization failed.
    #[error("Failed to drop privileges: {0}")]
    Privileges(String),

    /// Refresh thread could not be spawned.
    #[error("Failed to start refresh thread: {0}")]
    Thread(#[source] std::io::Error),
}

impl Error {
    /// Returns true for errors raised by configuration validation.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_) | Error::UnknownMapper(_) | Error::MapperParameter { .. }
        )
    }
}
