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

//! CSR (Certificate Signing Request) generation utilities.
//!
//! This module provides a builder for PKCS#10 requests and the cached
//! lookup used by the enrollment workflow. A CSR is built once, stored as
//! LF-only PEM, and reused verbatim afterwards: its SHA-256 digest is the
//! request identity at the CA.

use openssl::hash::MessageDigest;
use openssl::x509::{X509Req, X509ReqBuilder};

use crate::error::{EnrollError, Result};
use crate::events::{ProgressDispatcher, ProgressEvent};
use crate::keys::{normalize_pem, KeyPair};
use crate::store::{PrefixedStore, StoreKey};
use crate::subject::Subject;

/// Builder for creating Certificate Signing Requests.
///
/// Attributes are encoded in the order they are added.
///
/// # Example
///
/// ```no_run
/// use caramel_request::csr::CsrBuilder;
/// use caramel_request::keys::{generate_key_pem, KeyPair};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (private_pem, public_pem) = generate_key_pem(2048).await?;
/// let key_pair = KeyPair::from_pem(&private_pem, &public_pem)?;
///
/// let csr_pem = CsrBuilder::new()
///     .country("SE")
///     .organization("Gurk")
///     .common_name("Gurk")
///     .build_pem(&key_pair)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct CsrBuilder {
    subject: Subject,
}

impl CsrBuilder {
    /// Create a new CSR builder with an empty subject.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for an existing subject.
    pub fn with_subject(subject: Subject) -> Self {
        Self { subject }
    }

    /// Add an arbitrary attribute by short name.
    pub fn attribute(mut self, short_name: impl Into<String>, value: impl Into<String>) -> Self {
        self.subject.push(short_name, value);
        self
    }

    /// Add the Common Name (CN).
    pub fn common_name(self, cn: impl Into<String>) -> Self {
        self.attribute("CN", cn)
    }

    /// Add the Organization (O).
    pub fn organization(self, org: impl Into<String>) -> Self {
        self.attribute("O", org)
    }

    /// Add the Organizational Unit (OU).
    pub fn organizational_unit(self, ou: impl Into<String>) -> Self {
        self.attribute("OU", ou)
    }

    /// Add the Country (C).
    pub fn country(self, country: impl Into<String>) -> Self {
        self.attribute("C", country)
    }

    /// Add the State/Province (ST).
    pub fn state(self, state: impl Into<String>) -> Self {
        self.attribute("ST", state)
    }

    /// Add the Locality (L).
    pub fn locality(self, locality: impl Into<String>) -> Self {
        self.attribute("L", locality)
    }

    /// Build and sign the request with the key pair's private key (SHA-256).
    pub fn build(&self, key_pair: &KeyPair) -> Result<X509Req> {
        let name = self.subject.to_x509_name()?;

        let mut builder = X509ReqBuilder::new()?;
        builder.set_version(0)?;
        builder.set_subject_name(&name)?;
        builder.set_pubkey(key_pair.public_key())?;
        builder.sign(key_pair.private_key(), MessageDigest::sha256())?;

        Ok(builder.build())
    }

    /// Build the request and encode it as LF-only PEM.
    pub fn build_pem(&self, key_pair: &KeyPair) -> Result<String> {
        let pem = self.build(key_pair)?.to_pem()?;
        let pem = String::from_utf8(pem)
            .map_err(|e| EnrollError::invalid_subject(format!("CSR PEM is not UTF-8: {}", e)))?;
        Ok(normalize_pem(&pem))
    }
}

/// Returns true if the CSR PEM carries the key pair's public key.
pub fn csr_matches_key(csr_pem: &str, key_pair: &KeyPair) -> Result<bool> {
    let req = X509Req::from_pem(csr_pem.as_bytes())?;
    let public_key = req.public_key()?;
    Ok(public_key.public_eq(key_pair.public_key()))
}

/// Load the cached CSR, or build, persist and return a new one.
///
/// Emits `foundCsr` or `generatingCsr`. A cached CSR is returned byte for
/// byte and an empty one is rebuilt; if it does not belong to `key_pair` a warning is logged but the CSR
/// is still used.
pub async fn obtain_csr(
    store: &PrefixedStore,
    events: &ProgressDispatcher,
    key_pair: &KeyPair,
    subject: &Subject,
) -> Result<String> {
    if let Some(csr_pem) = store.get(StoreKey::Csr).await? {
        events.emit(ProgressEvent::FoundCsr);
        tracing::info!("Using cached CSR {}", store.full_key(StoreKey::Csr));

        match csr_matches_key(&csr_pem, key_pair) {
            Ok(true) => {}
            Ok(false) => tracing::warn!("Cached CSR does not match the cached key pair"),
            Err(e) => tracing::warn!("Cached CSR could not be parsed: {}", e),
        }
        return Ok(csr_pem);
    }

    events.emit(ProgressEvent::GeneratingCsr);
    tracing::info!("Generating CSR for {}", subject);

    let csr_pem = CsrBuilder::with_subject(subject.clone()).build_pem(key_pair)?;
    store.set(StoreKey::Csr, &csr_pem).await?;

    store.require(StoreKey::Csr).await
}
