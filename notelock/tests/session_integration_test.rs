// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Session Integration Tests
//!
//! Credential lifecycle against the in-process server: registration,
//! sign-out/sign-in round trips, wrong-password rejection, outdated
//! protocol detection, and 401 reauthentication.

mod common;

use common::{launch_app, LocalSyncServer};
use notelock_domain::error::NotelockError;
use notelock_domain::repositories::{ApiClient, RegistrationRequest};
use notelock_domain::services::CryptoOperator;
use notelock_domain::value_objects::KeyParamsOrigination;

const EMAIL: &str = "user@example.com";
const PASSWORD: &str = "correct horse battery staple";

#[tokio::test]
async fn test_register_sign_out_sign_in_yields_same_user() {
    let server = LocalSyncServer::new();
    let ctx = launch_app(server.clone(), "session-test").await;

    let registered = ctx.app.register(EMAIL, PASSWORD).await.unwrap();
    ctx.app.sign_out().await.unwrap();
    assert!(!ctx.app.session_service().is_signed_in());

    let outcome = ctx.app.sign_in(EMAIL, PASSWORD).await.unwrap();
    assert_eq!(outcome.user.uuid, registered.uuid);
    assert_eq!(outcome.user.email, EMAIL);
    assert!(!outcome.outdated_protocol);
    assert!(ctx.app.session_service().is_signed_in());
}

#[tokio::test]
async fn test_wrong_password_is_an_error_response() {
    let server = LocalSyncServer::new();
    let ctx = launch_app(server.clone(), "session-test").await;
    ctx.app.register(EMAIL, PASSWORD).await.unwrap();
    ctx.app.sign_out().await.unwrap();

    let result = ctx.app.sign_in(EMAIL, "not the password").await;
    match result {
        Err(NotelockError::ApiError { status, .. }) => assert_eq!(status, 401),
        other => panic!("expected a 401 api error, got {:?}", other.map(|_| ())),
    }
    assert!(!ctx.app.session_service().is_signed_in());
}

#[tokio::test]
async fn test_sign_in_against_legacy_account_warns_outdated() {
    let server = LocalSyncServer::new();

    // Seed a v002 account the way an old client would have created it.
    let operator = notelock::infrastructure::adapters::Operator002::new();
    let root = operator
        .create_root_key(EMAIL, PASSWORD, KeyParamsOrigination::Registration)
        .unwrap();
    server
        .register(RegistrationRequest {
            email: EMAIL.to_string(),
            server_password: root.server_password().unwrap().to_string(),
            key_params: root.key_params().clone(),
        })
        .await
        .unwrap();

    let ctx = launch_app(server.clone(), "legacy-test").await;
    let outcome = ctx.app.sign_in(EMAIL, PASSWORD).await.unwrap();
    assert!(outcome.outdated_protocol);
}

#[tokio::test]
async fn test_invalid_session_reauthenticates_and_retries_once() {
    let server = LocalSyncServer::new();
    let ctx = launch_app(server.clone(), "reauth-test").await;
    ctx.app.register(EMAIL, PASSWORD).await.unwrap();
    ctx.app.sync().await.unwrap();

    // Revoke everything server-side; the next sync hits a 401, fails the
    // refresh exchange, and falls back to the scripted password prompt.
    *ctx.challenge.password.lock() = Some(PASSWORD.to_string());
    server.revoke_all_sessions();
    ctx.app.sync().await.unwrap();
    assert!(ctx.app.session_service().is_signed_in());
}

#[tokio::test]
async fn test_reauth_challenge_cancellation_aborts() {
    let server = LocalSyncServer::new();
    let ctx = launch_app(server.clone(), "reauth-cancel").await;
    ctx.app.register(EMAIL, PASSWORD).await.unwrap();

    // No scripted password: the challenge resolves to None.
    server.revoke_all_sessions();
    assert!(ctx.app.sync().await.is_err());
}
