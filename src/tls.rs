//! HTTP client construction for the CA endpoint.
//!
//! The CA is reached over HTTPS with rustls. Trust anchors come from the
//! [`EnrollmentConfig`]: the webpki root store, an explicit CA bundle, or
//! (for tests) no verification at all.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};

use crate::config::{EnrollmentConfig, TrustAnchors};
use crate::error::{EnrollError, Result};

/// Build a reqwest Client with the appropriate TLS configuration.
pub fn build_http_client(config: &EnrollmentConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.timeout)
        .user_agent(crate::USER_AGENT)
        .use_rustls_tls();

    match &config.trust_anchors {
        TrustAnchors::WebPki => {
            builder = builder.tls_built_in_root_certs(true);
        }
        TrustAnchors::Explicit(ca_certs) => {
            if ca_certs.is_empty() {
                return Err(EnrollError::tls("Explicit trust anchors are empty"));
            }
            builder = builder.tls_built_in_root_certs(false);
            for ca_pem in ca_certs {
                let cert = reqwest::Certificate::from_pem(ca_pem).map_err(|e| {
                    EnrollError::tls(format!("Failed to parse CA certificate: {}", e))
                })?;
                builder = builder.add_root_certificate(cert);
            }
        }
        TrustAnchors::InsecureAcceptAny => {
            tracing::warn!("TLS certificate verification of the CA endpoint is disabled");
            builder = builder
                .tls_built_in_root_certs(false)
                .danger_accept_invalid_certs(true);
        }
    }

    builder = builder.min_tls_version(reqwest::tls::Version::TLS_1_2);

    // The CA answers GETs with the certificate PEM
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/pkix-cert, text/plain, */*"),
    );
    builder = builder.default_headers(headers);

    builder
        .build()
        .map_err(|e| EnrollError::tls(format!("Failed to build HTTP client: {}", e)))
}
