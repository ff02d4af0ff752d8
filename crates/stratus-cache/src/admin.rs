//! Admin endpoints for the cache stage.
//!
//! Three routes, mounted by the host under a prefix of its choosing:
//!
//! | Method | Path | Effect |
//! |---|---|---|
//! | GET | `/flush` | drop all entries |
//! | GET | `/dump` | stream a snapshot of the store |
//! | POST | `/load_dump` | merge a snapshot back in |

use crate::persist;
use crate::Inner;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use std::sync::Arc;
use stratus_store::StoreError;
use tracing::info;

/// Upper bound on `/load_dump` request bodies.
const MAX_LOAD_DUMP_BYTES: usize = 64 * 1024 * 1024;

/// Builds the admin router.
pub(crate) fn router(inner: Arc<Inner>) -> Router {
    Router::new()
        .route("/flush", get(flush_handler))
        .route("/dump", get(dump_handler))
        .route("/load_dump", post(load_dump_handler))
        .layer(DefaultBodyLimit::max(MAX_LOAD_DUMP_BYTES))
        .with_state(inner)
}

/// GET /flush - Drops all cached entries.
async fn flush_handler(State(inner): State<Arc<Inner>>) -> StatusCode {
    let entries = inner.store.len();
    inner.store.flush();
    inner.metrics.set_size(0);
    info!(tag = %inner.config.tag, entries, "cache flushed via admin");
    StatusCode::OK
}

/// GET /dump - Returns a snapshot of the store as an octet stream.
async fn dump_handler(State(inner): State<Arc<Inner>>) -> Response {
    match inner
        .store
        .dump(persist::marshal_key, persist::marshal_message)
    {
        Ok((bytes, _)) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// POST /load_dump - Merges a snapshot from the request body.
async fn load_dump_handler(State(inner): State<Arc<Inner>>, body: Bytes) -> Response {
    match inner
        .store
        .load_dump(&body, persist::unmarshal_key, persist::unmarshal_message)
    {
        Ok(entries) => {
            inner.metrics.set_size(inner.store.len());
            info!(tag = %inner.config.tag, entries, "cache snapshot loaded via admin");
            StatusCode::OK.into_response()
        }
        Err(e @ StoreError::Closed) => {
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use crate::{CacheConfig, CacheStage};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use hickory_proto::op::{Message, MessageType, Query, ResponseCode};
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{Name, RData, Record, RecordType};
    use std::net::Ipv4Addr;
    use std::str::FromStr;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn warmed_stage() -> CacheStage {
        use crate::context::{ChainWalker, QueryContext, Stage};
        use async_trait::async_trait;

        struct Upstream;

        #[async_trait]
        impl Stage for Upstream {
            async fn execute(
                &self,
                qctx: &mut QueryContext,
                _next: ChainWalker,
            ) -> crate::context::Result<()> {
                let mut response = Message::new();
                response.set_id(qctx.query().id());
                response.set_message_type(MessageType::Response);
                response.set_response_code(ResponseCode::NoError);
                if let Some(query) = qctx.query().queries().first() {
                    response.add_answer(Record::from_rdata(
                        query.name().clone(),
                        300,
                        RData::A(A::from(Ipv4Addr::new(1, 2, 3, 4))),
                    ));
                }
                qctx.set_response(response);
                Ok(())
            }
        }

        let cache = CacheStage::new(CacheConfig::default()).await.unwrap();
        let chain = ChainWalker::new(vec![Arc::new(cache.clone()), Arc::new(Upstream)]);

        let mut message = Message::new();
        message.set_id(7);
        message.add_query(Query::query(
            Name::from_str("example.com.").unwrap(),
            RecordType::A,
        ));
        let mut qctx = QueryContext::new(message);
        chain.next(&mut qctx).await.unwrap();

        cache
    }

    #[tokio::test]
    async fn test_flush_empties_the_cache() {
        let cache = warmed_stage().await;
        assert_eq!(cache.len(), 1);

        let response = cache
            .api_router()
            .oneshot(
                Request::builder()
                    .uri("/flush")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_dump_then_load_round_trips() {
        let cache = warmed_stage().await;

        let response = cache
            .api_router()
            .oneshot(Request::builder().uri("/dump").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok()),
            Some("application/octet-stream")
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        let restored = CacheStage::new(CacheConfig::default()).await.unwrap();
        let response = restored
            .api_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/load_dump")
                    .body(Body::from(bytes))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(restored.len(), 1);
    }

    #[tokio::test]
    async fn test_load_dump_rejects_garbage() {
        let cache = CacheStage::new(CacheConfig::default()).await.unwrap();

        let response = cache
            .api_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/load_dump")
                    .body(Body::from("definitely not a snapshot"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(cache.is_empty());
    }
}
