use std::sync::Arc;

use axum::http::StatusCode;
use common_auth::Role;
use serde_json::json;
use storefront_auth::lifecycle::RotationError;
use tokio::task::JoinSet;

mod support;
use support::TestApp;

const CONTENDERS: usize = 16;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rotations_have_exactly_one_winner() {
    let app = TestApp::new();
    let user = app.seed_user("alice", "wonderland", Role::Admin).await;
    let original = app.sessions.issue(user.id).await.unwrap();
    let original = Arc::new(original.value);

    let barrier = Arc::new(tokio::sync::Barrier::new(CONTENDERS));
    let mut tasks = JoinSet::new();
    for _ in 0..CONTENDERS {
        let sessions = app.sessions.clone();
        let value = original.clone();
        let barrier = barrier.clone();
        tasks.spawn(async move {
            barrier.wait().await;
            sessions.rotate(&value).await
        });
    }

    let mut winners = Vec::new();
    let mut losers = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.expect("task panicked") {
            Ok(token) => winners.push(token),
            Err(RotationError::Invalid) => losers += 1,
            Err(other) => panic!("unexpected rotation error: {other}"),
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(losers, CONTENDERS - 1);
    assert_eq!(app.store.count_for(user.id), 1);
    assert!(!app.sessions.is_valid(&original).await);
    assert!(app.sessions.is_valid(&winners[0].value).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_refresh_requests_issue_one_pair() {
    let app = Arc::new(TestApp::new());
    app.seed_user("alice", "wonderland", Role::Admin).await;
    let (_, refresh) = app.login("alice", "wonderland").await;

    let first = {
        let app = app.clone();
        let refresh = refresh.clone();
        tokio::spawn(async move {
            app.post_json("/api/auth/refresh", json!({ "refreshToken": refresh }))
                .await
                .0
        })
    };
    let second = {
        let app = app.clone();
        tokio::spawn(async move {
            app.post_json("/api/auth/refresh", json!({ "refreshToken": refresh }))
                .await
                .0
        })
    };

    let mut statuses = vec![first.await.unwrap(), second.await.unwrap()];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::UNAUTHORIZED]);
    assert_eq!(app.store.len(), 1);
}
