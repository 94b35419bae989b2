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

//! Integration tests for the PKCS#12 bundle returned by an enrollment

use std::sync::Arc;

use crate::integration::{seed_store, test_config, test_config_builder, MockCa, Recorder, TestCa};
use caramel_request::{DataUri, EnrollError, Enrollment, EventKind, MemoryStore};
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::x509::X509;

#[tokio::test]
async fn test_bundle_contains_key_and_issued_certificate() {
    let (mock, fake) = MockCa::start_fake(0).await;
    let store = Arc::new(MemoryStore::new());
    let (key_pair, csr_pem) = seed_store(store.clone()).await;

    let mut enrollment = Enrollment::new(test_config(&mock.url()), store).unwrap();
    let recorder = Recorder::new();
    enrollment.on_all(recorder.clone());

    let bundle_uri = enrollment.run().await.unwrap();
    let bundle = DataUri::parse(&bundle_uri).unwrap();
    assert_eq!(bundle.mime, "application/x-pkcs12");

    // No password protects the container
    let parsed = Pkcs12::from_der(&bundle.data)
        .unwrap()
        .parse2("")
        .expect("Bundle should open with the empty password");

    let bundled_key = parsed.pkey.expect("Bundle has a private key");
    assert!(bundled_key.public_eq(key_pair.private_key()));
    assert_eq!(
        bundled_key.private_key_to_der().unwrap(),
        key_pair.private_key().private_key_to_der().unwrap()
    );

    let issued = X509::from_pem(fake.issued_for(&csr_pem).unwrap().as_bytes()).unwrap();
    let bundled_cert = parsed.cert.expect("Bundle has a certificate");
    assert_eq!(bundled_cert.to_der().unwrap(), issued.to_der().unwrap());

    let cn = bundled_cert
        .subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .unwrap()
        .data()
        .as_utf8()
        .unwrap()
        .to_string();
    assert_eq!(cn, "Gurk");

    assert!(recorder.data_uri(EventKind::CertificateData).is_some());
}

#[tokio::test]
async fn test_certificate_with_chain() {
    let mock = MockCa::start().await;
    let fake = mock.mount_fake_ca(0).await;
    let store = Arc::new(MemoryStore::new());
    let (_, csr_pem) = seed_store(store.clone()).await;

    let leaf = fake.issue_now(&csr_pem);
    let ca_pem = String::from_utf8(fake.ca().cert().to_pem().unwrap()).unwrap();
    wiremock::Mock::given(wiremock::matchers::method("GET"))
        .respond_with(
            wiremock::ResponseTemplate::new(200).set_body_string(format!("{}{}", leaf, ca_pem)),
        )
        .with_priority(1)
        .mount(mock.inner())
        .await;

    let enrollment = Enrollment::new(test_config(&mock.url()), store).unwrap();
    let bundle = DataUri::parse(&enrollment.run().await.unwrap()).unwrap();
    let parsed = Pkcs12::from_der(&bundle.data).unwrap().parse2("").unwrap();

    let chain = parsed.ca.expect("Bundle has CA certificates");
    assert_eq!(chain.len(), 1);
    assert_eq!(
        chain.iter().next().unwrap().to_der().unwrap(),
        fake.ca().cert().to_der().unwrap()
    );
}

#[tokio::test]
async fn test_certificate_for_another_key_fails_bundling() {
    let mock = MockCa::start().await;
    let fake = mock.mount_fake_ca(0).await;

    // The CA answers with a certificate for a different CSR
    let (_, foreign_csr) = seed_store(Arc::new(MemoryStore::new())).await;
    let foreign_cert = fake.issue_now(&foreign_csr);
    wiremock::Mock::given(wiremock::matchers::method("GET"))
        .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(foreign_cert))
        .with_priority(1)
        .mount(mock.inner())
        .await;

    let enrollment =
        Enrollment::new(test_config(&mock.url()), Arc::new(MemoryStore::new())).unwrap();
    let result = enrollment.run().await;
    assert!(matches!(result, Err(EnrollError::Crypto(_))));
}

#[tokio::test]
async fn test_issued_certificate_verified_against_issuer() {
    let (mock, fake) = MockCa::start_fake(0).await;
    let config = test_config_builder(&mock.url())
        .verify_issued_against(vec![fake.ca().cert_pem()])
        .build()
        .unwrap();

    let enrollment = Enrollment::new(config, Arc::new(MemoryStore::new())).unwrap();
    let bundle = DataUri::parse(&enrollment.run().await.unwrap()).unwrap();
    assert!(Pkcs12::from_der(&bundle.data).unwrap().parse2("").is_ok());
}

#[tokio::test]
async fn test_certificate_from_unknown_issuer_is_rejected() {
    let (mock, _fake) = MockCa::start_fake(0).await;
    let stranger = TestCa::new();
    let config = test_config_builder(&mock.url())
        .verify_issued_against(vec![stranger.cert_pem()])
        .build()
        .unwrap();

    let recorder = Recorder::new();
    let mut enrollment = Enrollment::new(config, Arc::new(MemoryStore::new())).unwrap();
    enrollment.on_all(recorder.clone());

    let result = enrollment.run().await;
    assert!(matches!(result, Err(EnrollError::InvalidCertificate(_))));
    assert_eq!(recorder.count(EventKind::GotCertificate), 1);
    assert_eq!(recorder.count(EventKind::CertificateData), 0);
}
