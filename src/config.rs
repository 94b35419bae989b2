// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration types for the enrollment workflow.
//!
//! This module provides the [`EnrollmentConfig`] builder used by library
//! callers and the TOML file schema ([`EnrollmentFile`]) used by the
//! command-line tool.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{EnrollError, Result};
use crate::subject::{Subject, SubjectAttribute};

/// Default prefix for store keys.
pub const DEFAULT_KEY_PREFIX: &str = "caramel-request-";

/// Default delay between polls while the CA has not issued the certificate.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(15_000);

/// Default RSA modulus size.
pub const DEFAULT_KEY_BITS: u32 = 2048;

/// Smallest RSA modulus size accepted.
pub const MIN_KEY_BITS: u32 = 1024;

/// Default HTTP request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for an enrollment.
#[derive(Clone)]
pub struct EnrollmentConfig {
    /// CA base URL. The polling URL is `{ca_url}/{sha256hex(csr)}`.
    pub ca_url: Url,

    /// Prefix for all store keys.
    pub key_prefix: String,

    /// Ordered subject for new CSRs.
    pub subject: Subject,

    /// Delay between polls while issuance is pending.
    pub poll_interval: Duration,

    /// RSA modulus size for new keys.
    pub key_bits: u32,

    /// HTTP request timeout.
    pub timeout: Duration,

    /// Trust anchor configuration for the CA endpoint.
    pub trust_anchors: TrustAnchors,

    /// PEM-encoded CA certificates the issued certificate must chain to.
    ///
    /// Empty skips the check and accepts any certificate matching the key.
    pub issuer_certs: Vec<Vec<u8>>,

    /// Overall deadline for [`Enrollment::run`](crate::Enrollment::run).
    ///
    /// `None` polls for as long as the CA reports the request as pending.
    pub deadline: Option<Duration>,
}

impl std::fmt::Debug for EnrollmentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrollmentConfig")
            .field("ca_url", &self.ca_url.as_str())
            .field("key_prefix", &self.key_prefix)
            .field("subject", &self.subject.to_string())
            .field("poll_interval", &self.poll_interval)
            .field("key_bits", &self.key_bits)
            .field("timeout", &self.timeout)
            .field("trust_anchors", &self.trust_anchors)
            .field("issuer_certs", &self.issuer_certs.len())
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl EnrollmentConfig {
    /// Create a new configuration builder.
    pub fn builder() -> EnrollmentConfigBuilder {
        EnrollmentConfigBuilder::new()
    }
}

/// Builder for [`EnrollmentConfig`].
#[derive(Default)]
pub struct EnrollmentConfigBuilder {
    ca_url: Option<Url>,
    key_prefix: Option<String>,
    subject: Subject,
    poll_interval: Option<Duration>,
    key_bits: Option<u32>,
    timeout: Option<Duration>,
    trust_anchors: Option<TrustAnchors>,
    issuer_certs: Vec<Vec<u8>>,
    deadline: Option<Duration>,
}

impl EnrollmentConfigBuilder {
    /// Create a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the CA base URL.
    pub fn ca_url(mut self, url: impl AsRef<str>) -> std::result::Result<Self, url::ParseError> {
        self.ca_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Set the CA base URL from a pre-parsed URL.
    pub fn ca_url_parsed(mut self, url: Url) -> Self {
        self.ca_url = Some(url);
        self
    }

    /// Set the store key prefix.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Set the full subject.
    pub fn subject(mut self, subject: Subject) -> Self {
        self.subject = subject;
        self
    }

    /// Append one subject attribute.
    pub fn subject_attribute(mut self, short_name: impl Into<String>, value: impl Into<String>) -> Self {
        self.subject.push(short_name, value);
        self
    }

    /// Set the delay between polls.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Set the RSA modulus size for new keys.
    pub fn key_bits(mut self, bits: u32) -> Self {
        self.key_bits = Some(bits);
        self
    }

    /// Set the HTTP request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Use Mozilla's root CA store for the CA endpoint.
    pub fn trust_webpki_roots(mut self) -> Self {
        self.trust_anchors = Some(TrustAnchors::WebPki);
        self
    }

    /// Trust only the given PEM-encoded CA certificates.
    pub fn trust_explicit(mut self, ca_certs: Vec<Vec<u8>>) -> Self {
        self.trust_anchors = Some(TrustAnchors::Explicit(ca_certs));
        self
    }

    /// Accept any server certificate (insecure, for testing only).
    pub fn trust_any_insecure(mut self) -> Self {
        self.trust_anchors = Some(TrustAnchors::InsecureAcceptAny);
        self
    }

    /// Require the issued certificate to chain to one of these PEM CA certificates.
    pub fn verify_issued_against(mut self, ca_certs: Vec<Vec<u8>>) -> Self {
        self.issuer_certs = ca_certs;
        self
    }

    /// Give up after `deadline` with [`EnrollError::DeadlineExceeded`].
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the CA URL is missing or not http(s), if the key
    /// size is too small or if the poll interval is zero.
    pub fn build(self) -> std::result::Result<EnrollmentConfig, &'static str> {
        let ca_url = self.ca_url.ok_or("ca_url is required")?;
        if !matches!(ca_url.scheme(), "http" | "https") {
            return Err("ca_url must be an http or https URL");
        }

        let key_bits = self.key_bits.unwrap_or(DEFAULT_KEY_BITS);
        if key_bits < MIN_KEY_BITS {
            return Err("key_bits must be at least 1024");
        }

        let poll_interval = self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL);
        if poll_interval.is_zero() {
            return Err("poll_interval must be greater than zero");
        }

        Ok(EnrollmentConfig {
            ca_url,
            key_prefix: self
                .key_prefix
                .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            subject: self.subject,
            poll_interval,
            key_bits,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            trust_anchors: self.trust_anchors.unwrap_or(TrustAnchors::WebPki),
            issuer_certs: self.issuer_certs,
            deadline: self.deadline,
        })
    }
}

/// Trust anchor configuration for the CA's TLS certificate.
#[derive(Clone, Default)]
pub enum TrustAnchors {
    /// Use Mozilla's root CA store (webpki-roots).
    #[default]
    WebPki,

    /// Use the given PEM-encoded CA certificates only.
    Explicit(Vec<Vec<u8>>),

    /// Accept any server certificate (INSECURE - for testing only).
    InsecureAcceptAny,
}

impl std::fmt::Debug for TrustAnchors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WebPki => write!(f, "WebPki"),
            Self::Explicit(certs) => write!(f, "Explicit({} certs)", certs.len()),
            Self::InsecureAcceptAny => write!(f, "InsecureAcceptAny"),
        }
    }
}

/// TOML configuration file for the command-line tool.
///
/// ```toml
/// subject = ["C=SE", "O=Gurk", "CN=Gurk"]
///
/// [ca]
/// url = "https://ca.example.com/"
/// ca_cert = "/etc/caramel/ca.pem"
/// issuer_cert = "/etc/caramel/issuer.pem"
/// timeout_secs = 30
///
/// [storage]
/// dir = "/var/lib/caramel"
/// prefix = "caramel-request-"
///
/// [polling]
/// interval_ms = 15000
/// deadline_secs = 3600
/// key_bits = 2048
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnrollmentFile {
    /// Subject attributes as `NAME=value`, in order.
    #[serde(default)]
    pub subject: Vec<String>,

    /// CA endpoint settings.
    #[serde(default)]
    pub ca: CaSection,

    /// Artifact storage settings.
    #[serde(default)]
    pub storage: StorageSection,

    /// Polling and key settings.
    #[serde(default)]
    pub polling: PollingSection,
}

/// `[ca]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaSection {
    /// CA base URL.
    pub url: Option<String>,
    /// PEM file with the CA certificate that signs the CA endpoint's TLS cert.
    pub ca_cert: Option<PathBuf>,
    /// PEM file with the CA certificate the issued certificate must chain to.
    pub issuer_cert: Option<PathBuf>,
    /// Skip TLS verification of the CA endpoint (testing only).
    #[serde(default)]
    pub insecure: bool,
    /// HTTP timeout in seconds.
    pub timeout_secs: Option<u64>,
}

/// `[storage]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageSection {
    /// Directory for the file store.
    pub dir: Option<PathBuf>,
    /// Store key prefix.
    pub prefix: Option<String>,
}

/// `[polling]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollingSection {
    /// Poll interval in milliseconds.
    pub interval_ms: Option<u64>,
    /// Overall deadline in seconds.
    pub deadline_secs: Option<u64>,
    /// RSA modulus size.
    pub key_bits: Option<u32>,
}

impl EnrollmentFile {
    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| EnrollError::config(format!("Invalid TOML: {e}")))
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| EnrollError::config(format!("TOML serialize: {e}")))
    }

    /// Read and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            EnrollError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&contents)
    }

    /// Parsed subject.
    pub fn subject(&self) -> Result<Subject> {
        self.subject
            .iter()
            .map(|s| s.parse::<SubjectAttribute>())
            .collect()
    }

    /// Convert into a config builder. The CA certificate file, if set, is read here.
    pub fn to_builder(&self) -> Result<EnrollmentConfigBuilder> {
        let mut builder = EnrollmentConfig::builder().subject(self.subject()?);

        if let Some(ref url) = self.ca.url {
            builder = builder.ca_url(url)?;
        }
        match (&self.ca.ca_cert, self.ca.insecure) {
            (Some(_), true) => {
                return Err(EnrollError::config("ca.ca_cert and ca.insecure are exclusive"));
            }
            (Some(path), false) => builder = builder.trust_explicit(vec![read_pem(path)?]),
            (None, true) => builder = builder.trust_any_insecure(),
            (None, false) => {}
        }
        if let Some(ref path) = self.ca.issuer_cert {
            builder = builder.verify_issued_against(vec![read_pem(path)?]);
        }
        if let Some(secs) = self.ca.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(ref prefix) = self.storage.prefix {
            builder = builder.key_prefix(prefix);
        }
        if let Some(ms) = self.polling.interval_ms {
            builder = builder.poll_interval(Duration::from_millis(ms));
        }
        if let Some(secs) = self.polling.deadline_secs {
            builder = builder.deadline(Duration::from_secs(secs));
        }
        if let Some(bits) = self.polling.key_bits {
            builder = builder.key_bits(bits);
        }

        Ok(builder)
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| EnrollError::config(format!("Failed to read {}: {}", path.display(), e)))
}
