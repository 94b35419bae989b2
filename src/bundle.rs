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

//! PKCS#12 bundle assembly and `data:` URI transport encoding.
//!
//! The issued certificate and the enrollment private key are packed into a
//! password-less PKCS#12 container and handed back as a
//! `data:application/x-pkcs12;base64,...` URI. The CSR and certificate are
//! reported to listeners in the same encoding.

use std::fmt;

use base64::prelude::*;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKeyRef, Private};
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::{X509StoreContext, X509};

use crate::error::{EnrollError, Result};

/// MIME types used in `data:` URIs.
pub mod mime {
    /// PKCS#10 certificate signing request.
    pub const PKCS10: &str = "application/pkcs10";
    /// X.509 certificate.
    pub const PKIX_CERT: &str = "application/pkix-cert";
    /// PKCS#12 bundle.
    pub const PKCS12: &str = "application/x-pkcs12";
}

/// Friendly name stored on the bundle's key and certificate bags.
pub const BUNDLE_FRIENDLY_NAME: &str = "caramel";

/// Encode bytes as a base64 `data:` URI.
///
/// The payload is the base64 of the raw bytes, so binary content such as
/// PKCS#12 DER survives unchanged.
pub fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, BASE64_STANDARD.encode(bytes))
}

/// A decoded base64 `data:` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    /// Media type, e.g. `application/x-pkcs12`.
    pub mime: String,
    /// Decoded payload.
    pub data: Vec<u8>,
}

impl DataUri {
    /// Parse a `data:{mime};base64,{payload}` URI.
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("data:")
            .ok_or_else(|| EnrollError::invalid_data_uri("missing data: scheme"))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| EnrollError::invalid_data_uri("missing ',' separator"))?;
        let mime = header
            .strip_suffix(";base64")
            .ok_or_else(|| EnrollError::invalid_data_uri("only base64 payloads are supported"))?;

        Ok(Self {
            mime: mime.to_string(),
            data: BASE64_STANDARD.decode(payload)?,
        })
    }

    /// Payload as UTF-8 text (PEM payloads).
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.data)
            .map_err(|e| EnrollError::invalid_data_uri(format!("payload is not UTF-8: {}", e)))
    }
}

impl fmt::Display for DataUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&data_uri(&self.mime, &self.data))
    }
}

/// Build a password-less PKCS#12 container and return its DER encoding.
///
/// `certificate_pem` may carry a chain; the first certificate is the leaf and
/// any further ones are added as CA certificates. Key and certificate bags are
/// stored unencrypted and the MAC uses the empty password.
///
/// # Errors
///
/// Returns [`EnrollError::Crypto`] if the PEM cannot be decoded or the
/// certificate does not match `private_key`.
pub fn build_pkcs12(private_key: &PKeyRef<Private>, certificate_pem: &str) -> Result<Vec<u8>> {
    let mut certs = X509::stack_from_pem(certificate_pem.as_bytes())?.into_iter();
    let leaf = certs
        .next()
        .ok_or_else(|| EnrollError::invalid_certificate("PEM contains no certificate"))?;

    let mut builder = Pkcs12::builder();
    builder
        .name(BUNDLE_FRIENDLY_NAME)
        .pkey(private_key)
        .cert(&leaf)
        // -1 selects no encryption for the key and certificate bags
        .key_algorithm(Nid::from_raw(-1))
        .cert_algorithm(Nid::from_raw(-1));

    let chain: Vec<X509> = certs.collect();
    if !chain.is_empty() {
        let mut ca = Stack::new()?;
        for cert in chain {
            ca.push(cert)?;
        }
        builder.ca(ca);
    }

    Ok(builder.build2("")?.to_der()?)
}

/// Check that the issued certificate chains to one of `ca_certs`.
///
/// `ca_certs` holds PEM documents, each with one or more CA certificates.
/// Further certificates after the leaf in `certificate_pem` are offered as
/// untrusted intermediates.
///
/// # Errors
///
/// Returns [`EnrollError::InvalidCertificate`] if no anchor is configured or
/// the chain does not verify, and [`EnrollError::Crypto`] if a PEM cannot be
/// decoded.
pub fn verify_issued_certificate(certificate_pem: &str, ca_certs: &[Vec<u8>]) -> Result<()> {
    let mut certs = X509::stack_from_pem(certificate_pem.as_bytes())?.into_iter();
    let leaf = certs
        .next()
        .ok_or_else(|| EnrollError::invalid_certificate("PEM contains no certificate"))?;

    let mut intermediates = Stack::new()?;
    for cert in certs {
        intermediates.push(cert)?;
    }

    let mut anchors = 0;
    let mut store = X509StoreBuilder::new()?;
    for pem in ca_certs {
        for ca in X509::stack_from_pem(pem)? {
            store.add_cert(ca)?;
            anchors += 1;
        }
    }
    if anchors == 0 {
        return Err(EnrollError::invalid_certificate("no issuing CA certificate configured"));
    }
    let store = store.build();

    let mut context = X509StoreContext::new()?;
    let failure = context.init(&store, &leaf, &intermediates, |c| {
        if c.verify_cert()? {
            Ok(None)
        } else {
            Ok(Some(c.error()))
        }
    })?;

    match failure {
        None => {
            tracing::debug!("Issued certificate verified against {} CA certificate(s)", anchors);
            Ok(())
        }
        Some(reason) => Err(EnrollError::invalid_certificate(format!(
            "issued certificate does not verify against the issuing CA: {}",
            reason.error_string()
        ))),
    }
}

/// Build the PKCS#12 bundle and return it as a `data:application/x-pkcs12` URI.
pub fn assemble_bundle(private_key: &PKeyRef<Private>, certificate_pem: &str) -> Result<String> {
    let der = build_pkcs12(private_key, certificate_pem)?;
    tracing::debug!("Assembled PKCS#12 bundle ({} bytes)", der.len());
    Ok(data_uri(mime::PKCS12, &der))
}
