//! Error handling for SerialBench-RS
//!
//! This module defines the crate error type and a Result alias used
//! throughout the connection manager.

use thiserror::Error;

/// Main error type for SerialBench-RS operations
#[derive(Error, Debug)]
pub enum SerialBenchError {
    /// A session for this port already exists
    #[error("Port {0} is already connected")]
    AlreadyConnected(String),

    /// The port has no open session
    #[error("Port {0} is not connected")]
    NotConnected(String),

    /// Open/read/write failure at the OS or driver boundary
    #[error("Transport error on {port}: {message}")]
    Transport { port: String, message: String },

    /// The ingestion pipeline no longer accepts chunks
    #[error("Pipeline for {0} is closed")]
    PipelineClosed(String),

    /// Identification already populated the device properties
    #[error("Properties for {0} are already set")]
    PropertiesAlreadySet(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<SerialBenchError>,
    },
}

impl SerialBenchError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        SerialBenchError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Build a transport error for a port
    pub fn transport(port: impl Into<String>, message: impl std::fmt::Display) -> Self {
        SerialBenchError::Transport {
            port: port.into(),
            message: message.to_string(),
        }
    }

    /// Wrap a serialport error raised while working with `port`
    pub fn from_serialport(port: impl Into<String>, err: serialport::Error) -> Self {
        Self::transport(port, err.description)
    }

    /// Whether this error (or the error it wraps) is `AlreadyConnected`
    pub fn is_already_connected(&self) -> bool {
        match self {
            SerialBenchError::AlreadyConnected(_) => true,
            SerialBenchError::WithContext { source, .. } => source.is_already_connected(),
            _ => false,
        }
    }
}

/// Result type alias for SerialBench-RS operations
pub type Result<T> = std::result::Result<T, SerialBenchError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
