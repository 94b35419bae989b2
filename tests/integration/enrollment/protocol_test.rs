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

//! Integration tests for the GET/POST polling protocol

use std::sync::Arc;

use crate::integration::{seed_store, sha256_hex, test_config, test_config_builder, MockCa, Recorder};
use caramel_request::{
    DataUri, EnrollError, Enrollment, EnrollmentStage, EventKind, MemoryStore, ProgressEvent,
};

#[tokio::test]
async fn test_fresh_enrollment_event_sequence() {
    let (mock, fake) = MockCa::start_fake(0).await;
    let recorder = Recorder::new();

    let mut enrollment =
        Enrollment::new(test_config(&mock.url()), Arc::new(MemoryStore::new())).unwrap();
    enrollment.on_all(recorder.clone());

    let bundle_uri = enrollment.run().await.expect("Enrollment failed");

    assert!(bundle_uri.starts_with("data:application/x-pkcs12;base64,"));
    assert_eq!(
        recorder.kinds(),
        vec![
            EventKind::GeneratingKey,
            EventKind::GeneratingCsr,
            EventKind::CsrData,
            EventKind::RequestUri,
            EventKind::GetCertificate,
            EventKind::PostCsr,
            EventKind::PostedCsr,
            EventKind::GetCertificate,
            EventKind::GotCertificate,
            EventKind::CertificateData,
        ]
    );
    assert_eq!(mock.request_methods().await, ["GET", "POST", "GET"]);
    assert_eq!(enrollment.stage(), EnrollmentStage::Done);

    // The reported certificate is the one the CA issued for the reported CSR
    let csr_uri = DataUri::parse(&recorder.data_uri(EventKind::CsrData).unwrap()).unwrap();
    assert_eq!(csr_uri.mime, "application/pkcs10");
    let csr_pem = csr_uri.text().unwrap();

    let cert_uri =
        DataUri::parse(&recorder.data_uri(EventKind::CertificateData).unwrap()).unwrap();
    assert_eq!(cert_uri.mime, "application/pkix-cert");
    assert_eq!(Some(cert_uri.text().unwrap().to_string()), fake.issued_for(csr_pem));
}

#[tokio::test]
async fn test_polling_url_is_base_slash_csr_digest() {
    let (mock, _fake) = MockCa::start_fake(0).await;
    let recorder = Recorder::new();

    let mut enrollment =
        Enrollment::new(test_config(&mock.url()), Arc::new(MemoryStore::new())).unwrap();
    enrollment.on_all(recorder.clone());
    enrollment.run().await.unwrap();

    let csr_uri = DataUri::parse(&recorder.data_uri(EventKind::CsrData).unwrap()).unwrap();
    let csr_pem = csr_uri.text().unwrap();

    let url = recorder.request_uri().unwrap();
    assert_eq!(url, format!("{}/{}", mock.url(), sha256_hex(csr_pem)));
    assert_eq!(url, mock.polling_url_for(csr_pem));

    // wiremock reports requests against its own host name, so compare paths
    let expected_path = url::Url::parse(&url).unwrap().path().to_string();
    let requested = mock.inner().received_requests().await.unwrap();
    let seen: Vec<(String, String)> = requested
        .iter()
        .map(|r| (r.method.to_string(), r.url.path().to_string()))
        .collect();
    assert_eq!(
        seen,
        [
            ("GET".to_string(), expected_path.clone()),
            ("POST".to_string(), expected_path.clone()),
            ("GET".to_string(), expected_path),
        ]
    );
}

#[tokio::test]
async fn test_trailing_slash_in_base_url() {
    let (mock, _fake) = MockCa::start_fake(0).await;
    let recorder = Recorder::new();

    let base = format!("{}/", mock.url());
    let mut enrollment = Enrollment::new(test_config(&base), Arc::new(MemoryStore::new())).unwrap();
    enrollment.on_all(recorder.clone());
    enrollment.run().await.unwrap();

    let url = recorder.request_uri().unwrap();
    assert!(!url.contains("//requests"));
    assert!(!url.contains("requests//"));
}

#[tokio::test]
async fn test_issued_certificate_needs_single_get() {
    let (mock, fake) = MockCa::start_fake(0).await;
    let store = Arc::new(MemoryStore::new());
    let (_, csr_pem) = seed_store(store.clone()).await;
    fake.issue_now(&csr_pem);

    let recorder = Recorder::new();
    let mut enrollment = Enrollment::new(test_config(&mock.url()), store).unwrap();
    enrollment.on_all(recorder.clone());
    enrollment.run().await.unwrap();

    assert_eq!(mock.request_methods().await, ["GET"]);
    assert_eq!(
        recorder.kinds(),
        vec![
            EventKind::FoundKey,
            EventKind::FoundCsr,
            EventKind::CsrData,
            EventKind::RequestUri,
            EventKind::GetCertificate,
            EventKind::GotCertificate,
            EventKind::CertificateData,
        ]
    );
}

#[tokio::test]
async fn test_pending_status_waits_then_polls_again() {
    let (mock, _fake) = MockCa::start_fake(2).await;
    let recorder = Recorder::new();

    let mut enrollment =
        Enrollment::new(test_config(&mock.url()), Arc::new(MemoryStore::new())).unwrap();
    enrollment.on_all(recorder.clone());
    enrollment.run().await.unwrap();

    assert_eq!(
        mock.request_methods().await,
        ["GET", "POST", "GET", "GET", "GET"]
    );
    assert_eq!(recorder.count(EventKind::WaitingForCertificate), 2);
    assert_eq!(recorder.count(EventKind::GetCertificate), 4);
    assert_eq!(recorder.count(EventKind::PostCsr), 1);
}

#[tokio::test]
async fn test_server_error_while_polling_is_pending() {
    let mock = MockCa::start().await;
    mock.mock_status("GET", 503, 1, "maintenance").await;
    mock.mount_fake_ca(0).await;

    let recorder = Recorder::new();
    let mut enrollment =
        Enrollment::new(test_config(&mock.url()), Arc::new(MemoryStore::new())).unwrap();
    enrollment.on_all(recorder.clone());

    assert!(enrollment.run().await.is_ok());
    assert_eq!(mock.request_methods().await, ["GET", "GET", "POST", "GET"]);
    assert_eq!(
        recorder.kinds()[4..],
        [
            EventKind::GetCertificate,
            EventKind::WaitingForCertificate,
            EventKind::GetCertificate,
            EventKind::PostCsr,
            EventKind::PostedCsr,
            EventKind::GetCertificate,
            EventKind::GotCertificate,
            EventKind::CertificateData,
        ]
    );
}

#[tokio::test]
async fn test_rejected_submission_aborts() {
    let (mock, fake) = MockCa::start_fake(0).await;
    fake.set_post_status(500);

    let recorder = Recorder::new();
    let mut enrollment =
        Enrollment::new(test_config(&mock.url()), Arc::new(MemoryStore::new())).unwrap();
    enrollment.on_all(recorder.clone());

    let err = enrollment.run().await.unwrap_err();
    let response = match err {
        EnrollError::SubmissionRejected(ref response) => response.clone(),
        other => panic!("Expected SubmissionRejected, got {:?}", other),
    };
    assert_eq!(response.status, 500);
    assert_eq!(response.body, "request rejected");
    assert_eq!(response.url, recorder.request_uri().unwrap());

    // The listener saw the same response, and nothing was requested after it
    let xhr = recorder
        .events()
        .into_iter()
        .find_map(|e| match e {
            ProgressEvent::XhrError { response } => Some(response),
            _ => None,
        })
        .unwrap();
    assert_eq!(xhr, response);
    assert_eq!(recorder.kinds().last(), Some(&EventKind::XhrError));
    assert_eq!(recorder.count(EventKind::PostedCsr), 0);
    assert_eq!(mock.request_methods().await, ["GET", "POST"]);
    assert_eq!(enrollment.stage(), EnrollmentStage::Failed);
}

#[tokio::test]
async fn test_named_listeners() {
    let (mock, _fake) = MockCa::start_fake(0).await;
    let recorder = Recorder::new();

    let mut enrollment =
        Enrollment::new(test_config(&mock.url()), Arc::new(MemoryStore::new())).unwrap();
    assert!(enrollment.on_named("requestUri", recorder.clone()));
    assert!(enrollment.on_named("gotCertificate", recorder.clone()));
    assert!(!enrollment.on_named("notAnEvent", recorder.clone()));

    enrollment.run().await.unwrap();
    assert_eq!(
        recorder.kinds(),
        vec![EventKind::RequestUri, EventKind::GotCertificate]
    );
}

#[tokio::test]
async fn test_insecure_trust_config_enrolls() {
    let (mock, _fake) = MockCa::start_fake(0).await;
    let config = test_config_builder(&mock.url())
        .trust_any_insecure()
        .build()
        .unwrap();

    let enrollment = Enrollment::new(config, Arc::new(MemoryStore::new())).unwrap();
    assert!(enrollment.run().await.is_ok());
    assert_eq!(mock.request_methods().await, ["GET", "POST", "GET"]);
}
