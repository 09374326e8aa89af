//! Axum middleware for request tracking and observability.
//!
//! The correlation-id layer:
//!
//! 1. **Extracts** the id from `X-Correlation-ID` (or generates a UUID)
//! 2. **Stores** it in request extensions for handler access
//! 3. **Creates a tracing span** with `correlation_id`, method and path
//! 4. **Counts** the request by status class
//! 5. **Injects** the id into the response `X-Correlation-ID` header

use axum::{extract::Request, http::HeaderValue, response::Response};
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Header name for correlation ID.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Create a layer that adds correlation ID tracking to all requests.
///
/// # Example
///
/// ```ignore
/// let app = Router::new()
///     .route("/api/bookings", post(propose_booking))
///     .layer(correlation_id_layer());
/// ```
#[must_use]
pub const fn correlation_id_layer() -> CorrelationIdLayer {
    CorrelationIdLayer
}

/// Layer for correlation ID tracking.
#[derive(Clone, Debug)]
pub struct CorrelationIdLayer;

impl<S> Layer<S> for CorrelationIdLayer {
    type Service = CorrelationIdMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationIdMiddleware { inner }
    }
}

/// Middleware service for correlation ID tracking.
#[derive(Clone, Debug)]
pub struct CorrelationIdMiddleware<S> {
    inner: S,
}

impl<S> Service<Request> for CorrelationIdMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let correlation_id = req
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        req.extensions_mut().insert(correlation_id);

        let method = req.method().clone();
        let span = tracing::info_span!(
            "http_request",
            correlation_id = %correlation_id,
            method = %method,
            path = %req.uri().path(),
        );

        let started = Instant::now();
        let fut = self.inner.call(req);

        Box::pin(async move {
            let mut response = fut.instrument(span).await?;

            let status = response.status();
            let class = match status.as_u16() {
                200..=399 => "ok",
                400..=499 => "client_error",
                _ => "server_error",
            };
            metrics::counter!("seatbook.http.requests", "method" => method.to_string(), "status" => class)
                .increment(1);
            metrics::histogram!("seatbook.http.duration_seconds").record(started.elapsed().as_secs_f64());

            if let Ok(header_value) = HeaderValue::from_str(&correlation_id.to_string()) {
                response
                    .headers_mut()
                    .insert(CORRELATION_ID_HEADER, header_value);
            }

            Ok(response)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::Request, routing::get};
    use tower::ServiceExt;

    async fn echo_id(req: Request<Body>) -> String {
        req.extensions()
            .get::<Uuid>()
            .map_or_else(|| "missing".to_string(), Uuid::to_string)
    }

    async fn call(header: Option<&str>) -> (String, String) {
        let app = Router::new()
            .route("/echo", get(echo_id))
            .layer(correlation_id_layer());
        let mut builder = Request::builder().uri("/echo");
        if let Some(value) = header {
            builder = builder.header(CORRELATION_ID_HEADER, value);
        }
        let response = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let returned = response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .expect("correlation header on every response")
            .to_str()
            .unwrap()
            .to_string();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (returned, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn incoming_id_is_kept_and_visible_to_handlers() {
        let id = Uuid::new_v4().to_string();
        let (returned, seen) = call(Some(&id)).await;
        assert_eq!(returned, id);
        assert_eq!(seen, id);
    }

    #[tokio::test]
    async fn missing_or_malformed_id_is_replaced() {
        for header in [None, Some("not-a-uuid")] {
            let (returned, seen) = call(header).await;
            assert!(Uuid::parse_str(&returned).is_ok());
            assert_eq!(returned, seen);
        }
    }
}
