pub mod bridge;

use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::{domain::UpdateEnvelope, infrastructure::shutdown::ShutdownListener};

use bridge::{ForwardError, UpdateSender};

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("malformed update payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    #[error(transparent)]
    Forward(#[from] ForwardError),
}

struct WebhookState {
    token: String,
    secret: Option<String>,
    updates: UpdateSender,
}

impl WebhookState {
    fn accepts_path(&self, segment: &str) -> bool {
        bool::from(segment.as_bytes().ct_eq(self.token.as_bytes()))
    }

    fn accepts_secret(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = &self.secret else {
            return true;
        };
        headers
            .get(SECRET_HEADER)
            .map(|value| bool::from(value.as_bytes().ct_eq(expected.as_bytes())))
            .unwrap_or(false)
    }

    fn dispatch(&self, body: &[u8]) -> Result<i64, DispatchError> {
        let update = UpdateEnvelope::parse(body)?;
        let update_id = update.update_id;
        self.updates.forward(update)?;
        Ok(update_id)
    }
}

/// The delivery boundary: `POST /<token>` and nothing else.
pub fn router(token: impl Into<String>, secret: Option<String>, updates: UpdateSender) -> Router {
    let state = Arc::new(WebhookState {
        token: token.into(),
        secret,
        updates,
    });
    Router::new()
        .route("/:segment", post(receive_update))
        .with_state(state)
}

async fn receive_update(
    State(state): State<Arc<WebhookState>>,
    Path(segment): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    if !state.accepts_path(&segment) {
        return (StatusCode::NOT_FOUND, "not found");
    }
    if !state.accepts_secret(&headers) {
        tracing::warn!(target: "webhook", "delivery rejected: secret token mismatch");
        return (StatusCode::UNAUTHORIZED, "unauthorized");
    }

    match state.dispatch(&body) {
        Ok(update_id) => {
            tracing::debug!(target: "webhook", update_id, "update forwarded");
            (StatusCode::OK, "OK")
        }
        Err(DispatchError::MalformedPayload(err)) => {
            tracing::warn!(target: "webhook", error = %err, bytes = body.len(), "malformed update payload");
            (StatusCode::BAD_REQUEST, "malformed update payload")
        }
        Err(DispatchError::Forward(err)) => {
            tracing::warn!(target: "webhook", error = %err, "update not accepted");
            (StatusCode::SERVICE_UNAVAILABLE, "try again later")
        }
    }
}

pub async fn serve(listener: TcpListener, app: Router, mut shutdown: ShutdownListener) -> Result<()> {
    let local_addr = listener.local_addr()?;
    tracing::info!(target: "webhook", addr = %local_addr, "webhook server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.notified().await })
        .await?;
    tracing::info!(target: "webhook", "webhook server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::webhook::bridge::{channel, UpdateReceiver};

    const TOKEN: &str = "123456:secret-token";

    fn app(secret: Option<&str>) -> (Router, UpdateReceiver) {
        let (tx, rx) = channel(4);
        (router(TOKEN, secret.map(str::to_string), tx), rx)
    }

    fn post_to(path: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), 1024).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn well_formed_delivery_is_forwarded_once() {
        let (app, mut rx) = app(None);
        let payload = r#"{"update_id": 42, "message": {"message_id": 1, "text": "/help"}}"#;
        let response = app
            .oneshot(post_to(&format!("/{TOKEN}"), payload))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "OK");
        let forwarded = rx.try_recv().unwrap();
        assert_eq!(forwarded, UpdateEnvelope::parse(payload.as_bytes()).unwrap());
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn malformed_delivery_is_rejected() {
        let (app, mut rx) = app(None);
        let response = app
            .oneshot(post_to(&format!("/{TOKEN}"), "{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn other_paths_are_not_accepted() {
        let nested = format!("/{TOKEN}/extra");
        for path in ["/", "/wrong-token", "/123456:secret-tokenX", nested.as_str()] {
            let (app, mut rx) = app(None);
            let response = app
                .oneshot(post_to(path, r#"{"update_id": 1}"#))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "path {path}");
            assert!(rx.try_recv().is_none());
        }
    }

    #[tokio::test]
    async fn only_post_is_routed() {
        let (app, mut rx) = app(None);
        let request = Request::builder()
            .method(Method::GET)
            .uri(format!("/{TOKEN}"))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn secret_header_is_enforced_when_configured() {
        let (app, mut rx) = app(Some("hush"));
        let response = app
            .clone()
            .oneshot(post_to(&format!("/{TOKEN}"), r#"{"update_id": 1}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(rx.try_recv().is_none());

        let mut request = post_to(&format!("/{TOKEN}"), r#"{"update_id": 2}"#);
        request
            .headers_mut()
            .insert(SECRET_HEADER, "hush".parse().unwrap());
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(rx.try_recv().unwrap().update_id, 2);
    }

    #[tokio::test]
    async fn full_queue_yields_service_unavailable() {
        let (tx, mut rx) = channel(1);
        let app = router(TOKEN, None, tx);
        let first = app
            .clone()
            .oneshot(post_to(&format!("/{TOKEN}"), r#"{"update_id": 1}"#))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let second = app
            .oneshot(post_to(&format!("/{TOKEN}"), r#"{"update_id": 2}"#))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(rx.try_recv().unwrap().update_id, 1);
        assert!(rx.try_recv().is_none());
    }
}
