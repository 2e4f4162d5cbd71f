//! Tests for logout, multi-device sessions, and bulk revocation.

mod common;

use axum::http::StatusCode;
use common::{body_json, cookie_value, extract_set_cookies, has_cleared_cookie, setup};
use gradekeep::db::Role;

#[tokio::test]
async fn test_logout_deletes_only_the_matching_session() {
    let ctx = setup().await;
    ctx.create_user("alice@school.test", "Alice", Role::Teacher, Some("correct-password"))
        .await;

    // Two devices.
    let cookies_a = ctx.login_cookies("alice@school.test", "correct-password").await;
    let cookies_b = ctx.login_cookies("alice@school.test", "correct-password").await;
    assert_eq!(ctx.count_refresh_rows().await, 2);

    let response = ctx.request("GET", "/api/auth/logout", Some(&cookies_a), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cleared = extract_set_cookies(&response);
    assert!(has_cleared_cookie(&cleared, "accesstoken"));
    assert!(has_cleared_cookie(&cleared, "refreshtoken"));

    // Device A's row is gone, device B still refreshes.
    assert_eq!(ctx.count_refresh_rows().await, 1);

    let refresh_b = cookies_b
        .split("refreshtoken=")
        .nth(1)
        .unwrap()
        .to_string();
    let response = ctx
        .request(
            "POST",
            "/api/auth/refresh",
            Some(&format!("refreshtoken={}", refresh_b)),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_logout_is_idempotent() {
    let ctx = setup().await;

    // No session at all: still 200, cookies cleared.
    let response = ctx.request("GET", "/api/auth/logout", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let cleared = extract_set_cookies(&response);
    assert!(has_cleared_cookie(&cleared, "accesstoken"));
    assert!(has_cleared_cookie(&cleared, "refreshtoken"));
}

#[tokio::test]
async fn test_list_sessions_marks_current_device() {
    let ctx = setup().await;
    ctx.create_user("alice@school.test", "Alice", Role::Teacher, Some("correct-password"))
        .await;

    let cookies_a = ctx.login_cookies("alice@school.test", "correct-password").await;
    let _cookies_b = ctx.login_cookies("alice@school.test", "correct-password").await;

    let response = ctx.request("GET", "/api/sessions", Some(&cookies_a), None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let sessions = body["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 2);
    let current: Vec<_> = sessions
        .iter()
        .filter(|s| s["is_current"] == true)
        .collect();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0]["device_info"], "gradekeep-tests");
}

#[tokio::test]
async fn test_revoke_single_session() {
    let ctx = setup().await;
    ctx.create_user("alice@school.test", "Alice", Role::Teacher, Some("correct-password"))
        .await;

    let cookies_a = ctx.login_cookies("alice@school.test", "correct-password").await;
    let cookies_b = ctx.login_cookies("alice@school.test", "correct-password").await;

    // Revoke the other device from device A.
    let response = ctx.request("GET", "/api/sessions", Some(&cookies_a), None).await;
    let body = body_json(response).await;
    let other_id = body["sessions"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["is_current"] == false)
        .unwrap()["id"]
        .as_i64()
        .unwrap();

    let response = ctx
        .request(
            "DELETE",
            &format!("/api/sessions/{}", other_id),
            Some(&cookies_a),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["revoked"], true);

    // Device B's refresh token is dead.
    let refresh_b = cookies_b.split("refreshtoken=").nth(1).unwrap().to_string();
    let response = ctx
        .request(
            "POST",
            "/api/auth/refresh",
            Some(&format!("refreshtoken={}", refresh_b)),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_cannot_revoke_another_users_session() {
    let ctx = setup().await;
    ctx.create_user("alice@school.test", "Alice", Role::Teacher, Some("alice-password"))
        .await;
    ctx.create_user("bob@school.test", "Bob", Role::Parent, Some("bob-password-1"))
        .await;

    let alice_cookies = ctx.login_cookies("alice@school.test", "alice-password").await;
    let bob_cookies = ctx.login_cookies("bob@school.test", "bob-password-1").await;

    let response = ctx.request("GET", "/api/sessions", Some(&bob_cookies), None).await;
    let bob_session_id = body_json(response).await["sessions"][0]["id"]
        .as_i64()
        .unwrap();

    let response = ctx
        .request(
            "DELETE",
            &format!("/api/sessions/{}", bob_session_id),
            Some(&alice_cookies),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["revoked"], false);

    // Bob is unaffected.
    let refresh_bob = bob_cookies.split("refreshtoken=").nth(1).unwrap().to_string();
    let response = ctx
        .request(
            "POST",
            "/api/auth/refresh",
            Some(&format!("refreshtoken={}", refresh_bob)),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_logout_all_revokes_every_device_but_not_other_users() {
    let ctx = setup().await;
    ctx.create_user("alice@school.test", "Alice", Role::Teacher, Some("alice-password"))
        .await;
    ctx.create_user("bob@school.test", "Bob", Role::Parent, Some("bob-password-1"))
        .await;

    let alice_a = ctx.login_cookies("alice@school.test", "alice-password").await;
    let _alice_b = ctx.login_cookies("alice@school.test", "alice-password").await;
    let bob_cookies = ctx.login_cookies("bob@school.test", "bob-password-1").await;
    assert_eq!(ctx.count_refresh_rows().await, 3);

    let response = ctx
        .request("POST", "/api/auth/logout_all", Some(&alice_a), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["revoked"], 2);
    assert_eq!(ctx.count_refresh_rows().await, 1);

    // Alice's own refresh no longer works.
    let refresh_a = alice_a.split("refreshtoken=").nth(1).unwrap().to_string();
    let response = ctx
        .request(
            "POST",
            "/api/auth/refresh",
            Some(&format!("refreshtoken={}", refresh_a)),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Bob's does.
    let refresh_bob = bob_cookies.split("refreshtoken=").nth(1).unwrap().to_string();
    let response = ctx
        .request(
            "POST",
            "/api/auth/refresh",
            Some(&format!("refreshtoken={}", refresh_bob)),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_sessions_require_authentication() {
    let ctx = setup().await;

    let response = ctx.request("GET", "/api/sessions", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = ctx.request("POST", "/api/auth/logout_all", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
