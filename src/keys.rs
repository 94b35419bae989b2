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

//! Key material management.
//!
//! The enrollment key pair is generated once and cached in the store. Every
//! later run loads the cached pair instead of generating a new one, because a
//! new key would produce a new CSR and therefore a new polling URL.

use openssl::pkey::{PKey, Private, Public};
use openssl::rsa::Rsa;

use crate::error::{EnrollError, Result};
use crate::events::{ProgressDispatcher, ProgressEvent};
use crate::store::{PrefixedStore, StoreKey};

/// RSA key pair with its PEM encodings.
#[derive(Clone)]
pub struct KeyPair {
    private_key: PKey<Private>,
    public_key: PKey<Public>,
    private_pem: String,
    public_pem: String,
}

impl KeyPair {
    /// Decode a key pair from PEM.
    ///
    /// The private key may be PKCS#8 or traditional RSA PEM.
    pub fn from_pem(private_pem: &str, public_pem: &str) -> Result<Self> {
        let private_key = PKey::private_key_from_pem(private_pem.as_bytes())?;
        let public_key = PKey::public_key_from_pem(public_pem.as_bytes())?;
        Ok(Self {
            private_key,
            public_key,
            private_pem: private_pem.to_string(),
            public_pem: public_pem.to_string(),
        })
    }

    /// Private key.
    pub fn private_key(&self) -> &PKey<Private> {
        &self.private_key
    }

    /// Public key.
    pub fn public_key(&self) -> &PKey<Public> {
        &self.public_key
    }

    /// PEM of the private key, as stored.
    pub fn private_pem(&self) -> &str {
        &self.private_pem
    }

    /// PEM of the public key, as stored.
    pub fn public_pem(&self) -> &str {
        &self.public_pem
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("bits", &self.private_key.bits())
            .field("public_pem", &self.public_pem)
            .finish_non_exhaustive()
    }
}

/// Remove carriage returns so stored PEM is LF-only.
pub fn normalize_pem(pem: &str) -> String {
    pem.replace('\r', "")
}

/// Generate a fresh RSA key pair and return `(private_pem, public_pem)`.
///
/// Generation runs on the blocking thread pool.
pub async fn generate_key_pem(bits: u32) -> Result<(String, String)> {
    tokio::task::spawn_blocking(move || -> Result<(String, String)> {
        let rsa = Rsa::generate(bits)?;
        let key = PKey::from_rsa(rsa)?;
        let private_pem = pem_string(key.private_key_to_pem_pkcs8()?)?;
        let public_pem = pem_string(key.public_key_to_pem()?)?;
        Ok((normalize_pem(&private_pem), normalize_pem(&public_pem)))
    })
    .await
    .map_err(|e| EnrollError::key_generation(format!("key generation task failed: {}", e)))?
}

/// Load the cached key pair, or generate and persist a new one.
///
/// Emits `foundKey` or `generatingKey`. A cached private key is never
/// replaced; an empty stored value is treated as no key.
pub async fn obtain_key_pair(
    store: &PrefixedStore,
    events: &ProgressDispatcher,
    bits: u32,
) -> Result<KeyPair> {
    match store.get(StoreKey::PrivateKey).await? {
        Some(private_pem) => {
            events.emit(ProgressEvent::FoundKey);
            tracing::info!("Using cached key pair {}", store.full_key(StoreKey::PrivateKey));

            let public_pem = match store.get(StoreKey::PublicKey).await? {
                Some(pem) => pem,
                None => {
                    tracing::warn!("Cached public key missing; deriving it from the private key");
                    let private_key = PKey::private_key_from_pem(private_pem.as_bytes())?;
                    let pem = normalize_pem(&pem_string(private_key.public_key_to_pem()?)?);
                    store.set(StoreKey::PublicKey, &pem).await?;
                    pem
                }
            };
            KeyPair::from_pem(&private_pem, &public_pem)
        }
        None => {
            events.emit(ProgressEvent::GeneratingKey);
            tracing::info!("Generating {}-bit RSA key pair", bits);

            let (private_pem, public_pem) = generate_key_pem(bits).await?;
            store.set(StoreKey::PrivateKey, &private_pem).await?;
            store.set(StoreKey::PublicKey, &public_pem).await?;

            // Decode what was persisted so both paths yield identical material
            KeyPair::from_pem(
                &store.require(StoreKey::PrivateKey).await?,
                &store.require(StoreKey::PublicKey).await?,
            )
        }
    }
}

fn pem_string(pem: Vec<u8>) -> Result<String> {
    String::from_utf8(pem).map_err(|e| EnrollError::key_generation(format!("PEM is not UTF-8: {}", e)))
}
