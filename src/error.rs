//! Error types for the enrollment workflow.
//!
//! This module defines every error that can abort an enrollment: rejected CSR
//! submissions, HTTP transport faults, crypto library faults, store faults,
//! and caller-initiated cancellation.

use std::time::Duration;

use thiserror::Error;

use crate::client::FailedResponse;

/// Result type alias using [`EnrollError`].
pub type Result<T> = std::result::Result<T, EnrollError>;

/// Errors that can occur during certificate enrollment.
#[derive(Debug, Error)]
pub enum EnrollError {
    /// The CA answered the CSR submission with a non-2xx status.
    ///
    /// The same response snapshot is delivered to `xhrError` listeners.
    #[error("CSR submission rejected: {0}")]
    SubmissionRejected(FailedResponse),

    /// HTTP transport error (connection refused, timeout, body read failure).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Fault raised by the OpenSSL crypto library.
    #[error("Crypto error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),

    /// Key pair generation failed outside the crypto library itself.
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Persistent store read or write failed.
    #[error("Store error: {0}")]
    Store(String),

    /// TLS configuration error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Invalid subject attribute input.
    #[error("Invalid subject: {0}")]
    InvalidSubject(String),

    /// The CA response did not contain a usable certificate.
    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    /// Malformed `data:` URI.
    #[error("Invalid data URI: {0}")]
    InvalidDataUri(String),

    /// Invalid configuration file or value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Base64 decoding error.
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller cancelled the enrollment.
    #[error("Enrollment cancelled")]
    Cancelled,

    /// The configured deadline elapsed before the certificate was issued.
    #[error("Enrollment deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

impl EnrollError {
    /// Create a store error with the given message.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a key generation error with the given message.
    pub fn key_generation(msg: impl Into<String>) -> Self {
        Self::KeyGeneration(msg.into())
    }

    /// Create a TLS error with the given message.
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// Create an invalid subject error with the given message.
    pub fn invalid_subject(msg: impl Into<String>) -> Self {
        Self::InvalidSubject(msg.into())
    }

    /// Create an invalid certificate error with the given message.
    pub fn invalid_certificate(msg: impl Into<String>) -> Self {
        Self::InvalidCertificate(msg.into())
    }

    /// Create an invalid data URI error with the given message.
    pub fn invalid_data_uri(msg: impl Into<String>) -> Self {
        Self::InvalidDataUri(msg.into())
    }

    /// Create a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns the failed CA response if this is a rejected submission.
    pub fn failed_response(&self) -> Option<&FailedResponse> {
        match self {
            Self::SubmissionRejected(response) => Some(response),
            _ => None,
        }
    }

    /// Returns true if the caller stopped the workflow (cancel or deadline).
    pub fn is_abandoned(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded(_))
    }
}
