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

//! Integration tests for key and CSR reuse across runs

use std::sync::Arc;
use std::time::Duration;

use crate::integration::{seed_store, test_config, test_config_builder, MockCa, Recorder};
use caramel_request::config::DEFAULT_KEY_PREFIX;
use caramel_request::keys::generate_key_pem;
use caramel_request::store::{PrefixedStore, StoreKey};
use caramel_request::{DataUri, EnrollError, Enrollment, EventKind, FileStore, MemoryStore};

#[tokio::test]
async fn test_cached_key_pair_is_reused() {
    let (mock, _fake) = MockCa::start_fake(0).await;
    let (private_pem, public_pem) = generate_key_pem(1024).await.unwrap();

    let store = Arc::new(MemoryStore::new());
    let prefixed = PrefixedStore::new(store.clone(), DEFAULT_KEY_PREFIX);
    prefixed.set(StoreKey::PrivateKey, &private_pem).await.unwrap();
    prefixed.set(StoreKey::PublicKey, &public_pem).await.unwrap();

    let recorder = Recorder::new();
    let mut enrollment = Enrollment::new(test_config(&mock.url()), store).unwrap();
    enrollment.on_all(recorder.clone());
    enrollment.run().await.unwrap();

    assert_eq!(recorder.count(EventKind::GeneratingKey), 0);
    assert_eq!(recorder.kinds()[..2], [EventKind::FoundKey, EventKind::GeneratingCsr]);
    assert_eq!(
        prefixed.get(StoreKey::PrivateKey).await.unwrap().as_deref(),
        Some(private_pem.as_str())
    );
    assert_eq!(
        prefixed.get(StoreKey::PublicKey).await.unwrap().as_deref(),
        Some(public_pem.as_str())
    );
}

#[tokio::test]
async fn test_cached_csr_is_reused_verbatim() {
    let (mock, fake) = MockCa::start_fake(0).await;
    let store = Arc::new(MemoryStore::new());
    let (_, csr_pem) = seed_store(store.clone()).await;

    let recorder = Recorder::new();
    let mut enrollment = Enrollment::new(test_config(&mock.url()), store.clone()).unwrap();
    enrollment.on_all(recorder.clone());
    enrollment.run().await.unwrap();

    assert_eq!(recorder.count(EventKind::GeneratingCsr), 0);
    assert_eq!(recorder.count(EventKind::FoundCsr), 1);

    let reported = DataUri::parse(&recorder.data_uri(EventKind::CsrData).unwrap()).unwrap();
    assert_eq!(reported.text().unwrap(), csr_pem);
    assert_eq!(recorder.request_uri().unwrap(), mock.polling_url_for(&csr_pem));
    assert!(fake.issued_for(&csr_pem).is_some());

    let prefixed = PrefixedStore::new(store, DEFAULT_KEY_PREFIX);
    assert_eq!(
        prefixed.get(StoreKey::Csr).await.unwrap().as_deref(),
        Some(csr_pem.as_str())
    );
}

#[tokio::test]
async fn test_second_run_polls_same_request() {
    let (mock, _fake) = MockCa::start_fake(0).await;
    let store = Arc::new(MemoryStore::new());

    let first = Recorder::new();
    let mut enrollment = Enrollment::new(test_config(&mock.url()), store.clone()).unwrap();
    enrollment.on_all(first.clone());
    enrollment.run().await.unwrap();

    let second = Recorder::new();
    let mut enrollment = Enrollment::new(test_config(&mock.url()), store).unwrap();
    enrollment.on_all(second.clone());
    enrollment.run().await.unwrap();

    assert_eq!(first.request_uri(), second.request_uri());
    assert_eq!(second.count(EventKind::FoundKey), 1);
    assert_eq!(second.count(EventKind::FoundCsr), 1);
    assert_eq!(second.count(EventKind::PostCsr), 0);
    assert_eq!(mock.request_methods().await, ["GET", "POST", "GET", "GET"]);
}

#[tokio::test]
async fn test_file_store_resumes_after_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let (mock, fake) = MockCa::start_fake(usize::MAX).await;

    let config = test_config_builder(&mock.url())
        .deadline(Duration::from_millis(300))
        .build()
        .unwrap();
    let first = Recorder::new();
    let mut enrollment = Enrollment::new(config, Arc::new(FileStore::new(dir.path()))).unwrap();
    enrollment.on_all(first.clone());
    assert!(matches!(
        enrollment.run().await,
        Err(EnrollError::DeadlineExceeded(_))
    ));

    // Key and CSR were persisted before polling started
    let csr_file = format!("{}csr", DEFAULT_KEY_PREFIX);
    assert!(dir.path().join(&csr_file).exists());

    fake.set_pending_polls(0);

    let second = Recorder::new();
    let mut enrollment = Enrollment::new(
        test_config(&mock.url()),
        Arc::new(FileStore::new(dir.path())),
    )
    .unwrap();
    enrollment.on_all(second.clone());
    let bundle_uri = enrollment.run().await.unwrap();

    assert!(bundle_uri.starts_with("data:application/x-pkcs12;base64,"));
    assert_eq!(first.request_uri(), second.request_uri());
    assert_eq!(
        second.kinds()[..2],
        [EventKind::FoundKey, EventKind::FoundCsr]
    );

    let posts = mock
        .request_methods()
        .await
        .into_iter()
        .filter(|m| m == "POST")
        .count();
    assert_eq!(posts, 1);
}
