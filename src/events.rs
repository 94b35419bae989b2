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

//! Progress events and listener registration.
//!
//! Every stage of the enrollment reports what it is doing through a
//! [`ProgressEvent`]. Callers register [`ProgressListener`]s per
//! [`EventKind`] on a [`ProgressDispatcher`]; events without a registered
//! listener are dropped.
//!
//! # Example
//!
//! ```
//! use caramel_request::events::{EventKind, ProgressDispatcher, ProgressEvent};
//!
//! let mut events = ProgressDispatcher::new();
//! events.on(EventKind::RequestUri, |event: &ProgressEvent| {
//!     if let ProgressEvent::RequestUri { url } = event {
//!         println!("Polling {url}");
//!     }
//! });
//! // Unknown names are ignored.
//! assert!(!events.on_named("noSuchEvent", |_: &ProgressEvent| {}));
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::client::FailedResponse;

/// Kinds of progress events. Each kind has a stable camelCase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A new key pair is being generated.
    GeneratingKey,
    /// A cached key pair was found.
    FoundKey,
    /// A new CSR is being generated.
    GeneratingCsr,
    /// A cached CSR was found.
    FoundCsr,
    /// CSR data URI is available.
    CsrData,
    /// Polling URL is available.
    RequestUri,
    /// Querying the CA for the certificate.
    GetCertificate,
    /// The CA does not know the CSR yet; submitting it.
    PostCsr,
    /// CSR submission accepted.
    PostedCsr,
    /// CSR submission rejected.
    XhrError,
    /// Certificate not issued yet; waiting before the next query.
    WaitingForCertificate,
    /// Certificate received.
    GotCertificate,
    /// Certificate data URI is available.
    CertificateData,
}

impl EventKind {
    /// All event kinds in workflow order.
    pub const ALL: [EventKind; 13] = [
        Self::GeneratingKey,
        Self::FoundKey,
        Self::GeneratingCsr,
        Self::FoundCsr,
        Self::CsrData,
        Self::RequestUri,
        Self::GetCertificate,
        Self::PostCsr,
        Self::PostedCsr,
        Self::XhrError,
        Self::WaitingForCertificate,
        Self::GotCertificate,
        Self::CertificateData,
    ];

    /// Event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GeneratingKey => "generatingKey",
            Self::FoundKey => "foundKey",
            Self::GeneratingCsr => "generatingCsr",
            Self::FoundCsr => "foundCsr",
            Self::CsrData => "csrData",
            Self::RequestUri => "requestUri",
            Self::GetCertificate => "getCertificate",
            Self::PostCsr => "postCsr",
            Self::PostedCsr => "postedCsr",
            Self::XhrError => "xhrError",
            Self::WaitingForCertificate => "waitingForCertificate",
            Self::GotCertificate => "gotCertificate",
            Self::CertificateData => "certificateData",
        }
    }

    /// Look up a kind by name. Returns `None` for unrecognized names.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A progress signal with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A new key pair is being generated.
    GeneratingKey,
    /// A cached key pair was found.
    FoundKey,
    /// A new CSR is being generated.
    GeneratingCsr,
    /// A cached CSR was found.
    FoundCsr,
    /// CSR as a `data:application/pkcs10;base64,...` URI.
    CsrData {
        /// The data URI.
        uri: String,
    },
    /// The URL the CA is polled at.
    RequestUri {
        /// Polling URL.
        url: String,
    },
    /// Querying the CA.
    GetCertificate,
    /// Submitting the CSR.
    PostCsr,
    /// CSR submission accepted.
    PostedCsr,
    /// CSR submission rejected.
    XhrError {
        /// Snapshot of the failed response.
        response: FailedResponse,
    },
    /// Certificate not issued yet.
    WaitingForCertificate,
    /// Certificate received.
    GotCertificate,
    /// Certificate as a `data:application/pkix-cert;base64,...` URI.
    CertificateData {
        /// The data URI.
        uri: String,
    },
}

impl ProgressEvent {
    /// Kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::GeneratingKey => EventKind::GeneratingKey,
            Self::FoundKey => EventKind::FoundKey,
            Self::GeneratingCsr => EventKind::GeneratingCsr,
            Self::FoundCsr => EventKind::FoundCsr,
            Self::CsrData { .. } => EventKind::CsrData,
            Self::RequestUri { .. } => EventKind::RequestUri,
            Self::GetCertificate => EventKind::GetCertificate,
            Self::PostCsr => EventKind::PostCsr,
            Self::PostedCsr => EventKind::PostedCsr,
            Self::XhrError { .. } => EventKind::XhrError,
            Self::WaitingForCertificate => EventKind::WaitingForCertificate,
            Self::GotCertificate => EventKind::GotCertificate,
            Self::CertificateData { .. } => EventKind::CertificateData,
        }
    }
}

/// Where the workflow currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnrollmentStage {
    /// Obtaining the key pair.
    NeedKey,
    /// Obtaining the CSR.
    NeedCsr,
    /// Querying the CA or waiting between queries.
    Polling,
    /// Submitting the CSR.
    AwaitingPost,
    /// Building the PKCS#12 bundle.
    Bundling,
    /// Bundle delivered.
    Done,
    /// Aborted by an error, cancellation or deadline.
    Failed,
}

/// Receives progress events.
///
/// Implemented for any `Fn(&ProgressEvent) + Send + Sync` closure.
pub trait ProgressListener: Send + Sync {
    /// Handle an event.
    fn on_event(&self, event: &ProgressEvent);
}

impl<F> ProgressListener for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_event(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Listener that forwards every event to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingListener;

impl ProgressListener for LoggingListener {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::XhrError { response } => {
                tracing::error!(event = %event.kind(), "{}", response);
            }
            ProgressEvent::RequestUri { url } => {
                tracing::info!(event = %event.kind(), url = %url);
            }
            // Data URIs are too long to log
            _ => tracing::info!(event = %event.kind()),
        }
    }
}

/// Routes events to the listeners registered for their kind and tracks the
/// current [`EnrollmentStage`].
pub struct ProgressDispatcher {
    listeners: Vec<(Option<EventKind>, Arc<dyn ProgressListener>)>,
    stage: watch::Sender<EnrollmentStage>,
}

impl Default for ProgressDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressDispatcher {
    /// Create a dispatcher with no listeners.
    pub fn new() -> Self {
        let (stage, _) = watch::channel(EnrollmentStage::NeedKey);
        Self {
            listeners: Vec::new(),
            stage,
        }
    }

    /// Register a listener for one event kind.
    pub fn on(&mut self, kind: EventKind, listener: impl ProgressListener + 'static) {
        self.listeners.push((Some(kind), Arc::new(listener)));
    }

    /// Register a listener by event name.
    ///
    /// Returns `false` and registers nothing if the name is not recognized.
    pub fn on_named(&mut self, name: &str, listener: impl ProgressListener + 'static) -> bool {
        match EventKind::from_name(name) {
            Some(kind) => {
                self.on(kind, listener);
                true
            }
            None => {
                tracing::debug!("Ignoring listener for unknown event {:?}", name);
                false
            }
        }
    }

    /// Register a listener for every event kind.
    pub fn on_all(&mut self, listener: impl ProgressListener + 'static) {
        self.listeners.push((None, Arc::new(listener)));
    }

    /// Register a shared listener for every event kind.
    pub fn on_all_shared(&mut self, listener: Arc<dyn ProgressListener>) {
        self.listeners.push((None, listener));
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Deliver an event to its listeners. Events nobody listens for are dropped.
    pub fn emit(&self, event: ProgressEvent) {
        let kind = event.kind();
        for (filter, listener) in &self.listeners {
            if filter.map_or(true, |k| k == kind) {
                listener.on_event(&event);
            }
        }
    }

    /// Current stage.
    pub fn stage(&self) -> EnrollmentStage {
        *self.stage.borrow()
    }

    /// Move to a new stage.
    pub fn set_stage(&self, stage: EnrollmentStage) {
        let previous = self.stage.send_replace(stage);
        if previous != stage {
            tracing::debug!("Enrollment stage {:?} -> {:?}", previous, stage);
        }
    }

    /// Watch stage transitions.
    pub fn subscribe_stage(&self) -> watch::Receiver<EnrollmentStage> {
        self.stage.subscribe()
    }
}

impl fmt::Debug for ProgressDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressDispatcher")
            .field("listeners", &self.listeners.len())
            .field("stage", &self.stage())
            .finish()
    }
}
