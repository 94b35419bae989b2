//! CA polling client.
//!
//! This module provides [`CaClient`], which implements the enrollment
//! protocol against the CA. The CSR's SHA-256 digest is the request
//! identity, so the polling URL can be recomputed from the CSR alone and
//! every request in the loop is safe to repeat.
//!
//! | Request | Status | Next step |
//! |---|---|---|
//! | `GET {base}/{digest}` | 200 | body is the certificate PEM; done |
//! | `GET {base}/{digest}` | 404 | `POST` the CSR to the same URL |
//! | `GET {base}/{digest}` | other | wait the poll interval, `GET` again |
//! | `POST {base}/{digest}` | 2xx | `GET` again |
//! | `POST {base}/{digest}` | other | fail with [`EnrollError::SubmissionRejected`] |

use std::fmt;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use url::Url;

use crate::bundle::mime;
use crate::config::EnrollmentConfig;
use crate::error::{EnrollError, Result};
use crate::events::{EnrollmentStage, ProgressDispatcher, ProgressEvent};
use crate::tls::build_http_client;

/// Lowercase hex SHA-256 digest of the CSR PEM text.
pub fn request_id(csr_pem: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(csr_pem.as_bytes());
    hex::encode(hasher.finalize())
}

/// Polling URL for a CSR: `{base}/{request_id(csr)}`.
///
/// Base and digest are joined with exactly one `/`.
pub fn polling_url(base: &Url, csr_pem: &str) -> Result<Url> {
    let base = base.as_str().trim_end_matches('/');
    Ok(Url::parse(&format!("{}/{}", base, request_id(csr_pem)))?)
}

/// Snapshot of a failed CA response, handed to `xhrError` listeners and
/// carried by [`EnrollError::SubmissionRejected`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Canonical reason phrase, if the status has one.
    pub reason: Option<String>,
    /// Request URL.
    pub url: String,
    /// Response body.
    pub body: String,
}

impl FailedResponse {
    async fn capture(response: reqwest::Response) -> Self {
        let status = response.status();
        let url = response.url().to_string();
        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<unreadable body: {}>", e));

        Self {
            status: status.as_u16(),
            reason: status.canonical_reason().map(str::to_string),
            url,
            body,
        }
    }
}

impl fmt::Display for FailedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;
        if let Some(ref reason) = self.reason {
            write!(f, " {}", reason)?;
        }
        write!(f, " from {}", self.url)?;
        if !self.body.is_empty() {
            write!(f, " - {}", self.body)?;
        }
        Ok(())
    }
}

/// HTTP client for the CA endpoint.
///
/// # Example
///
/// ```no_run
/// use caramel_request::{CaClient, EnrollmentConfig};
/// use caramel_request::events::ProgressDispatcher;
///
/// # async fn example(csr_pem: &str) -> Result<(), Box<dyn std::error::Error>> {
/// let config = EnrollmentConfig::builder()
///     .ca_url("https://ca.example.com/")?
///     .build()?;
///
/// let client = CaClient::new(&config)?;
/// let certificate_pem = client
///     .fetch_certificate(csr_pem, &ProgressDispatcher::new())
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CaClient {
    http: reqwest::Client,
    base_url: Url,
    poll_interval: Duration,
}

impl CaClient {
    /// Create a client for the CA configured in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if TLS configuration fails.
    pub fn new(config: &EnrollmentConfig) -> Result<Self> {
        let http = build_http_client(config)?;
        Ok(Self::with_http_client(
            http,
            config.ca_url.clone(),
            config.poll_interval,
        ))
    }

    /// Create a client around an existing reqwest client.
    pub fn with_http_client(http: reqwest::Client, base_url: Url, poll_interval: Duration) -> Self {
        Self {
            http,
            base_url,
            poll_interval,
        }
    }

    /// CA base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Delay between polls while issuance is pending.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Polling URL for `csr_pem` at this CA.
    pub fn request_url(&self, csr_pem: &str) -> Result<Url> {
        polling_url(&self.base_url, csr_pem)
    }

    /// Poll the CA until it returns the certificate for `csr_pem`.
    ///
    /// Submits the CSR when the CA does not know it. While the CA reports
    /// anything other than 200 or 404 the request is treated as pending and
    /// retried after the poll interval with no retry limit; drop the future
    /// (or use [`Enrollment::run_with_cancel`](crate::Enrollment::run_with_cancel))
    /// to give up.
    ///
    /// # Errors
    ///
    /// - [`EnrollError::SubmissionRejected`] if the CSR POST is not 2xx
    /// - [`EnrollError::Http`] on transport failures
    pub async fn fetch_certificate(
        &self,
        csr_pem: &str,
        events: &ProgressDispatcher,
    ) -> Result<String> {
        let url = self.request_url(csr_pem)?;

        loop {
            events.set_stage(EnrollmentStage::Polling);
            events.emit(ProgressEvent::GetCertificate);
            tracing::debug!("GET {}", url);

            let response = self.http.get(url.clone()).send().await?;
            let status = response.status();

            match status {
                StatusCode::OK => {
                    let certificate = response.text().await?;
                    events.emit(ProgressEvent::GotCertificate);
                    tracing::info!("Certificate issued for {}", url);
                    return Ok(certificate);
                }
                StatusCode::NOT_FOUND => {
                    events.emit(ProgressEvent::PostCsr);
                    self.submit_csr(&url, csr_pem, events).await?;
                    events.emit(ProgressEvent::PostedCsr);
                }
                _ => {
                    if status.is_server_error() {
                        // Still treated as pending; a CA outage shows up here
                        tracing::warn!("CA returned {} for {}; polling again", status, url);
                    } else {
                        tracing::debug!("CA returned {}; certificate not issued yet", status);
                    }
                    events.emit(ProgressEvent::WaitingForCertificate);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// POST the CSR PEM to the polling URL.
    async fn submit_csr(&self, url: &Url, csr_pem: &str, events: &ProgressDispatcher) -> Result<()> {
        events.set_stage(EnrollmentStage::AwaitingPost);
        tracing::debug!("POST {}", url);

        let response = self
            .http
            .post(url.clone())
            .header(CONTENT_TYPE, mime::PKCS10)
            .body(csr_pem.to_string())
            .send()
            .await?;

        if response.status().is_success() {
            tracing::info!("CSR submitted to {}", url);
            return Ok(());
        }

        let failed = FailedResponse::capture(response).await;
        tracing::error!("CSR submission failed: {}", failed);
        events.emit(ProgressEvent::XhrError {
            response: failed.clone(),
        });
        Err(EnrollError::SubmissionRejected(failed))
    }
}
