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

//! # caramel-request
//!
//! A client for the Caramel certificate enrollment protocol.
//!
//! The client generates an RSA key pair, builds and signs a PKCS#10 CSR, and
//! polls the CA at `{base}/{sha256(csr)}` until the certificate is issued. The
//! key and the issued certificate are returned as a password-less PKCS#12
//! bundle encoded as a `data:application/x-pkcs12;base64,...` URI.
//!
//! ## Features
//!
//! - **Async-first design** using Tokio
//! - **Resumable**: key pair and CSR are cached in a [`KeyValueStore`], so a
//!   restarted enrollment keeps polling the same request
//! - **Idempotent protocol**: the request identity is the CSR digest, no
//!   server-side session state is needed
//! - **Typed progress events** with per-kind listeners
//! - **Cancellation and deadlines** for the otherwise unbounded poll loop
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use caramel_request::{Enrollment, EnrollmentConfig, MemoryStore, Subject};
//! use caramel_request::events::LoggingListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EnrollmentConfig::builder()
//!         .ca_url("https://ca.example.com/")?
//!         .subject(Subject::parse("C=SE,O=Gurk,CN=Gurk")?)
//!         .build()?;
//!
//!     let mut enrollment = Enrollment::new(config, Arc::new(MemoryStore::new()))?;
//!     enrollment.on_all(LoggingListener);
//!
//!     let bundle_uri = enrollment.run().await?;
//!     println!("{}", &bundle_uri[..40]);
//!     Ok(())
//! }
//! ```
//!
//! ## Protocol
//!
//! | Request | Status | Meaning |
//! |---|---|---|
//! | `GET {base}/{sha256hex(csr)}` | 200 | certificate PEM in the body |
//! | `GET {base}/{sha256hex(csr)}` | 404 | CSR unknown, client POSTs it |
//! | `GET {base}/{sha256hex(csr)}` | other | pending, client polls again |
//! | `POST {base}/{sha256hex(csr)}` | 2xx | CSR accepted |
//!
//! ## Cargo Features
//!
//! - `cli` (default): Builds the `caramel-request` command-line tool

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod bundle;
pub mod client;
pub mod config;
pub mod csr;
pub mod enroll;
pub mod error;
pub mod events;
pub mod keys;
pub mod store;
pub mod subject;
pub mod tls;

// Re-export main types at crate root for convenience
pub use bundle::{assemble_bundle, data_uri, verify_issued_certificate, DataUri};
pub use client::{polling_url, request_id, CaClient, FailedResponse};
pub use config::{EnrollmentConfig, EnrollmentConfigBuilder, EnrollmentFile, TrustAnchors};
pub use enroll::Enrollment;
pub use error::{EnrollError, Result};
pub use events::{EnrollmentStage, EventKind, ProgressDispatcher, ProgressEvent, ProgressListener};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use subject::{Subject, SubjectAttribute};

pub use tokio_util::sync::CancellationToken;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent string for HTTP requests.
pub const USER_AGENT: &str = concat!("caramel-request/", env!("CARGO_PKG_VERSION"));
