//! Error types for the castore crate.
//!
//! This module defines a unified error enumeration used across the object
//! model, the converter registry, the processing engine, storage drivers,
//! the KV interlock, and the facade. It integrates with `thiserror` to
//! provide rich `Display` implementations and error source chaining where
//! applicable.
//!
//! Notes:
//! - Each variant carries contextual details via its message payload.
//! - Variants cover validation, I/O, converter dispatch, engine
//!   concurrency, and generic custom errors.

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the castore library.
///
/// - Used across the object model, converters, engine, storage drivers
///   and the facade.
/// - Implements `std::error::Error` via `thiserror`.
pub enum StoreError {
    /// No object exists at the requested id.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The supplied id is not a valid object identifier.
    #[error("invalid object id: {0}")]
    InvalidId(String),

    /// The supplied path escapes its bucket or contains illegal components.
    #[error("invalid object path: {0}")]
    InvalidPath(String),

    /// Original content type does not match any pattern in the manifest.
    #[error("content type `{0}` is not accepted by this group's manifest")]
    UnsupportedContentType(String),

    /// A caller-supplied custom id collides with an existing object.
    #[error("custom id already in use: {0}")]
    CustomIdInUse(String),

    /// Underlying storage backend I/O failure.
    #[error("storage driver I/O error: {0}")]
    DriverIo(String),

    /// A converter failed while running a task.
    #[error("converter `{0}` failed: {1}")]
    ConverterError(String, String),

    /// No registered converter can handle any action in a task.
    #[error("no converter registered for task `{0}`")]
    NoConvertersForTask(String),

    /// The engine could not acquire the per-object interlock.
    #[error("object is already being processed: {0}")]
    ObjectInProcessing(String),

    /// The path generator exhausted its retry budget.
    #[error("path generator exhausted candidates for template `{0}`")]
    PathExhausted(String),

    /// An event could not be decoded.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// A task references a source item that does not exist.
    #[error("task `{0}` references missing source item `{1}`")]
    MissingSource(String, String),

    /// A converter returned Skip/empty output but the input reader could
    /// not be rewound for the next action.
    #[error("could not reset reader for task `{0}`")]
    ReaderResetFailed(String),

    /// Configuration is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error from underlying reader/writer.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Image decode/encode failure.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Generic custom error for miscellaneous failures.
    #[error("{0}")]
    Custom(String),
}

impl StoreError {
    /// True when this error corresponds to a missing object/item.
    ///
    /// The facade and projection rely on this to treat a projection miss
    /// as a cache event rather than a client-visible NOT_FOUND.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
