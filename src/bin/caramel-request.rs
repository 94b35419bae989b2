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

//! Caramel Certificate Request Command-Line Tool
//!
//! Requests a certificate from a Caramel CA and writes the resulting
//! PKCS#12 bundle. Key pair and CSR are kept in a store directory so an
//! interrupted request continues polling the same CSR when run again.
//!
//! # Usage
//!
//! ```text
//! caramel-request [OPTIONS] [CA_URL]
//!
//! Arguments:
//!   [CA_URL]                  CA base URL
//!
//! Options:
//!   -s, --subject <ATTR>      Subject attribute as NAME=value (repeatable, in order)
//!   -c, --config <PATH>       Path to configuration file
//!   -d, --store-dir <DIR>     Directory for the key pair and CSR
//!       --prefix <PREFIX>     Store key prefix
//!   -o, --output <PATH>       Write the PKCS#12 bundle (DER) here
//!       --cert-output <PATH>  Write the issued certificate (PEM) here
//!       --ca-cert <PATH>      CA certificate for verifying the CA endpoint
//!       --issuer-cert <PATH>  CA certificate the issued certificate must chain to
//!       --poll-interval <S>   Seconds between polls while pending
//!       --deadline <S>        Give up after this many seconds
//!   -v, --verbose             Enable verbose output
//!   -q, --quiet               Suppress non-error output
//! ```
//!
//! # Examples
//!
//! ```bash
//! # Request a certificate and write it as a .p12 file
//! caramel-request https://ca.example.com/ -s C=SE -s O=Gurk -s CN=Gurk -o gurk.p12
//!
//! # Use a configuration file, giving up after an hour
//! caramel-request --config /etc/caramel/request.toml --deadline 3600
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use caramel_request::events::LoggingListener;
use caramel_request::store::FileStore;
use caramel_request::{
    CancellationToken, DataUri, Enrollment, EnrollmentConfig, EnrollmentFile, EventKind,
    ProgressEvent, SubjectAttribute,
};
use clap::Parser;

/// Default store directory when neither the CLI nor the config sets one.
const DEFAULT_STORE_DIR: &str = ".caramel";

/// Caramel Certificate Request Command-Line Tool
#[derive(Parser)]
#[command(name = "caramel-request")]
#[command(author = "U.S. Federal Government")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Request a certificate from a Caramel CA", long_about = None)]
struct Cli {
    /// CA base URL (overrides config)
    #[arg(value_name = "CA_URL")]
    ca_url: Option<String>,

    /// Subject attribute as NAME=value, repeatable; order is preserved
    #[arg(short, long = "subject", value_name = "ATTR")]
    subject: Vec<SubjectAttribute>,

    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory holding the cached key pair and CSR
    #[arg(short = 'd', long, value_name = "DIR")]
    store_dir: Option<PathBuf>,

    /// Store key prefix
    #[arg(long, value_name = "PREFIX")]
    prefix: Option<String>,

    /// Write the PKCS#12 bundle (DER) to this file
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Write the issued certificate (PEM) to this file
    #[arg(long, value_name = "PATH")]
    cert_output: Option<PathBuf>,

    /// PEM CA certificate used to verify the CA endpoint
    #[arg(long, value_name = "PATH")]
    ca_cert: Option<PathBuf>,

    /// PEM CA certificate the issued certificate is verified against
    #[arg(long, value_name = "PATH")]
    issuer_cert: Option<PathBuf>,

    /// Seconds between polls while the certificate is pending
    #[arg(long, value_name = "SECONDS")]
    poll_interval: Option<u64>,

    /// Give up after this many seconds
    #[arg(long, value_name = "SECONDS")]
    deadline: Option<u64>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        tracing::Level::ERROR
    } else if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    // Create runtime for async operations
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let file = match cli.config {
        Some(ref path) => EnrollmentFile::load(path)?,
        None => EnrollmentFile::default(),
    };

    let config = build_config(&cli, &file)?;
    let store_dir = cli
        .store_dir
        .clone()
        .or_else(|| file.storage.dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR));

    tracing::info!("CA: {}", config.ca_url);
    tracing::info!("Subject: {}", config.subject);
    tracing::debug!("Store: {}", store_dir.display());

    let mut enrollment = Enrollment::new(config, Arc::new(FileStore::new(store_dir)))?;
    enrollment.on_all(LoggingListener);

    let certificate_pem = Arc::new(Mutex::new(None::<String>));
    let sink = certificate_pem.clone();
    enrollment.on(EventKind::CertificateData, move |event: &ProgressEvent| {
        if let ProgressEvent::CertificateData { uri } = event {
            if let Ok(data) = DataUri::parse(uri) {
                if let Ok(mut slot) = sink.lock() {
                    *slot = data.text().ok().map(str::to_string);
                }
            }
        }
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; the request can be resumed by running again");
            ctrl_c.cancel();
        }
    });

    let bundle_uri = enrollment.run_with_cancel(cancel).await?;

    if let Some(ref path) = cli.cert_output {
        let pem = certificate_pem
            .lock()
            .map_err(|_| "certificate listener panicked")?
            .clone()
            .ok_or("issued certificate was not reported")?;
        tokio::fs::write(path, pem).await?;
        tracing::info!("Certificate written to {}", path.display());
    }

    match cli.output {
        Some(ref path) => {
            let bundle = DataUri::parse(&bundle_uri)?;
            tokio::fs::write(path, &bundle.data).await?;
            tracing::info!("PKCS#12 bundle written to {}", path.display());
        }
        None => println!("{}", bundle_uri),
    }

    Ok(())
}

/// Merge the configuration file with command-line overrides.
fn build_config(
    cli: &Cli,
    file: &EnrollmentFile,
) -> Result<EnrollmentConfig, Box<dyn std::error::Error>> {
    let mut builder = file.to_builder()?;

    if let Some(ref url) = cli.ca_url {
        builder = builder.ca_url(url)?;
    }
    if !cli.subject.is_empty() {
        builder = builder.subject(cli.subject.iter().cloned().collect());
    }
    if let Some(ref prefix) = cli.prefix {
        builder = builder.key_prefix(prefix);
    }
    if let Some(ref path) = cli.ca_cert {
        builder = builder.trust_explicit(vec![std::fs::read(path)?]);
    }
    if let Some(ref path) = cli.issuer_cert {
        builder = builder.verify_issued_against(vec![std::fs::read(path)?]);
    }
    if let Some(secs) = cli.poll_interval {
        builder = builder.poll_interval(Duration::from_secs(secs));
    }
    if let Some(secs) = cli.deadline {
        builder = builder.deadline(Duration::from_secs(secs));
    }

    Ok(builder.build()?)
}
