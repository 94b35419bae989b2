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

//! Enrollment workflow coordinator.
//!
//! [`Enrollment`] runs the stages in order: key pair, CSR, CA polling and
//! PKCS#12 bundling. Each stage persists its output before the next one
//! starts, so an interrupted enrollment resumes where it stopped when it is
//! run again with the same store and key prefix.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use caramel_request::{Enrollment, EnrollmentConfig, FileStore, Subject};
//! use caramel_request::events::{EventKind, ProgressEvent};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EnrollmentConfig::builder()
//!     .ca_url("https://ca.example.com/")?
//!     .subject(Subject::parse("C=SE,O=Gurk,CN=Gurk")?)
//!     .build()?;
//!
//! let mut enrollment = Enrollment::new(config, Arc::new(FileStore::new("/var/lib/caramel")))?;
//! enrollment.on(EventKind::RequestUri, |event: &ProgressEvent| {
//!     if let ProgressEvent::RequestUri { url } = event {
//!         println!("Waiting for {url}");
//!     }
//! });
//!
//! let bundle_uri = enrollment.run().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::bundle::{assemble_bundle, data_uri, mime, verify_issued_certificate};
use crate::client::CaClient;
use crate::config::EnrollmentConfig;
use crate::csr::obtain_csr;
use crate::error::{EnrollError, Result};
use crate::events::{EnrollmentStage, EventKind, ProgressDispatcher, ProgressEvent, ProgressListener};
use crate::keys::obtain_key_pair;
use crate::store::{KeyValueStore, PrefixedStore};

/// A single enrollment against one CA with one store key prefix.
pub struct Enrollment {
    config: EnrollmentConfig,
    store: PrefixedStore,
    client: CaClient,
    events: ProgressDispatcher,
}

impl Enrollment {
    /// Create an enrollment with no listeners.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be configured.
    pub fn new(config: EnrollmentConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        Self::with_events(config, store, ProgressDispatcher::new())
    }

    /// Create an enrollment with a prepared dispatcher.
    pub fn with_events(
        config: EnrollmentConfig,
        store: Arc<dyn KeyValueStore>,
        events: ProgressDispatcher,
    ) -> Result<Self> {
        let client = CaClient::new(&config)?;
        let store = PrefixedStore::new(store, config.key_prefix.clone());
        Ok(Self {
            config,
            store,
            client,
            events,
        })
    }

    /// Configuration of this enrollment.
    pub fn config(&self) -> &EnrollmentConfig {
        &self.config
    }

    /// Register a listener for one event kind.
    pub fn on(&mut self, kind: EventKind, listener: impl ProgressListener + 'static) -> &mut Self {
        self.events.on(kind, listener);
        self
    }

    /// Register a listener by camelCase event name.
    ///
    /// Returns false, and registers nothing, if the name is not recognized.
    pub fn on_named(&mut self, name: &str, listener: impl ProgressListener + 'static) -> bool {
        self.events.on_named(name, listener)
    }

    /// Register a listener for every event kind.
    pub fn on_all(&mut self, listener: impl ProgressListener + 'static) -> &mut Self {
        self.events.on_all(listener);
        self
    }

    /// Event dispatcher, for registering shared listeners.
    pub fn events_mut(&mut self) -> &mut ProgressDispatcher {
        &mut self.events
    }

    /// Current workflow stage.
    pub fn stage(&self) -> EnrollmentStage {
        self.events.stage()
    }

    /// Watch stage transitions.
    pub fn subscribe_stage(&self) -> watch::Receiver<EnrollmentStage> {
        self.events.subscribe_stage()
    }

    /// Run the enrollment and return the `data:application/x-pkcs12` bundle URI.
    ///
    /// Without a configured deadline this polls until the CA issues the
    /// certificate or rejects the CSR submission.
    pub async fn run(&self) -> Result<String> {
        self.run_with_cancel(CancellationToken::new()).await
    }

    /// Run the enrollment until it completes or `cancel` fires.
    ///
    /// Cancellation takes effect at the next suspension point (HTTP request,
    /// poll wait or store access) and yields [`EnrollError::Cancelled`].
    /// Persisted key material and CSR are kept, so a later run resumes.
    pub async fn run_with_cancel(&self, cancel: CancellationToken) -> Result<String> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EnrollError::Cancelled),
            result = self.run_until_deadline() => result,
        };

        match result {
            Ok(bundle_uri) => {
                self.events.set_stage(EnrollmentStage::Done);
                Ok(bundle_uri)
            }
            Err(e) => {
                let stage = self.events.stage();
                self.events.set_stage(EnrollmentStage::Failed);
                if e.is_abandoned() {
                    tracing::warn!("Enrollment stopped during {:?}: {}", stage, e);
                } else {
                    tracing::error!("Enrollment failed during {:?}: {}", stage, e);
                }
                Err(e)
            }
        }
    }

    async fn run_until_deadline(&self) -> Result<String> {
        match self.config.deadline {
            Some(deadline) => tokio::time::timeout(deadline, self.run_stages())
                .await
                .map_err(|_| EnrollError::DeadlineExceeded(deadline))?,
            None => self.run_stages().await,
        }
    }

    async fn run_stages(&self) -> Result<String> {
        self.events.set_stage(EnrollmentStage::NeedKey);
        let key_pair = obtain_key_pair(&self.store, &self.events, self.config.key_bits).await?;

        self.events.set_stage(EnrollmentStage::NeedCsr);
        let csr_pem = obtain_csr(&self.store, &self.events, &key_pair, &self.config.subject).await?;
        self.events.emit(ProgressEvent::CsrData {
            uri: data_uri(mime::PKCS10, csr_pem.as_bytes()),
        });

        let url = self.client.request_url(&csr_pem)?;
        tracing::info!("Polling {} for the certificate", url);
        self.events.emit(ProgressEvent::RequestUri {
            url: url.to_string(),
        });

        let certificate_pem = self.client.fetch_certificate(&csr_pem, &self.events).await?;
        if !self.config.issuer_certs.is_empty() {
            verify_issued_certificate(&certificate_pem, &self.config.issuer_certs)?;
        }
        self.events.emit(ProgressEvent::CertificateData {
            uri: data_uri(mime::PKIX_CERT, certificate_pem.as_bytes()),
        });

        self.events.set_stage(EnrollmentStage::Bundling);
        let bundle_uri = assemble_bundle(key_pair.private_key(), &certificate_pem)?;
        tracing::info!("Enrollment complete");

        Ok(bundle_uri)
    }
}

impl std::fmt::Debug for Enrollment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enrollment")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}
