use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower::ServiceExt;

use knitted_drain::backend::{FollowService, QueueService};
use knitted_drain::drain::DrainSettings;
use knitted_drain::model::{FollowEvent, QueueMessage};
use knitted_drain::trigger::{router, AppState, SCHEDULED_HEADER};

#[derive(Clone, Default)]
struct StaticQueue {
    messages: Vec<QueueMessage>,
    panic_on_pop: bool,
    archived: Arc<Mutex<Vec<i64>>>,
}

#[async_trait::async_trait]
impl QueueService for StaticQueue {
    async fn pop(&self, _queue_name: &str, count: u32) -> Result<Vec<QueueMessage>> {
        if self.panic_on_pop {
            panic!("queue client exploded");
        }
        Ok(self.messages.iter().take(count as usize).cloned().collect())
    }

    async fn archive(&self, _queue_name: &str, message_id: i64) -> Result<bool> {
        self.archived.lock().await.push(message_id);
        Ok(true)
    }
}

#[derive(Clone, Default)]
struct AcceptingFollow {
    calls: Arc<Mutex<Vec<FollowEvent>>>,
}

#[async_trait::async_trait]
impl FollowService for AcceptingFollow {
    async fn apply_follow_event(&self, event: &FollowEvent) -> Result<()> {
        self.calls.lock().await.push(event.clone());
        Ok(())
    }
}

fn state(queue: StaticQueue, follow: AcceptingFollow) -> AppState {
    AppState::new(Arc::new(queue), Arc::new(follow), DrainSettings::default())
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn post_drains_and_reports_count() {
    let queue = StaticQueue {
        messages: vec![
            QueueMessage::new(
                1,
                json!({ "action": "follow", "data": { "follower_id": "A", "following_id": "B" } }),
            ),
            QueueMessage::new(2, json!({})),
        ],
        ..Default::default()
    };
    let follow = AcceptingFollow::default();
    let app = router(state(queue.clone(), follow.clone()));

    let response = app
        .oneshot(Request::post("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({ "success": true, "message": "Processed 1 messages" })
    );
    assert_eq!(*queue.archived.lock().await, vec![1]);
    assert_eq!(follow.calls.lock().await.len(), 1);
}

#[tokio::test]
async fn scheduled_header_is_accepted_on_drain_route() {
    let app = router(state(StaticQueue::default(), AcceptingFollow::default()));

    let response = app
        .oneshot(
            Request::post("/drain")
                .header(SCHEDULED_HEADER, "true")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({ "success": true, "message": "Processed 0 messages" })
    );
}

#[tokio::test]
async fn unexpected_failure_answers_500() {
    let queue = StaticQueue {
        panic_on_pop: true,
        ..Default::default()
    };
    let app = router(state(queue, AcceptingFollow::default()));

    let response = app
        .oneshot(Request::post("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("queue client exploded"));
    assert!(body.get("message").is_none());
}

#[tokio::test]
async fn health_answers_ok() {
    let app = router(state(StaticQueue::default(), AcceptingFollow::default()));

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn get_on_drain_route_is_rejected() {
    let app = router(state(StaticQueue::default(), AcceptingFollow::default()));

    let response = app
        .oneshot(Request::get("/drain").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
