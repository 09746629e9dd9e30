// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP health probe against a local mock server.

use std::time::Duration;

use sessionbox_environment::{HealthProbe, HttpHealthProbe};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_ok_response_is_responding() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .expect(1)
        .mount(&server)
        .await;

    let probe = HttpHealthProbe::new(Duration::from_secs(2));
    assert!(probe.is_responding(&server.uri()).await);
}

#[tokio::test]
async fn test_non_200_is_not_responding() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let probe = HttpHealthProbe::default();
    assert!(!probe.is_responding(&server.uri()).await);
}

#[tokio::test]
async fn test_no_content_is_not_responding() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let probe = HttpHealthProbe::default();
    assert!(!probe.is_responding(&server.uri()).await);
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let probe = HttpHealthProbe::new(Duration::from_millis(200));
    assert!(!probe.is_responding(&server.uri()).await);
}

#[tokio::test]
async fn test_unreachable_is_not_responding() {
    let probe = HttpHealthProbe::new(Duration::from_millis(500));
    assert!(!probe.is_responding("http://127.0.0.1:1").await);
}
