//! Axum server setup and router configuration.

use crate::api::extractors::RequestId;
use crate::api::{payments, webhooks};
use crate::shutdown::shutdown_signal;
use crate::state::AppState;
use axum::{
    Json, Router,
    extract::Request,
    http::HeaderValue,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::Instrument;
use uuid::Uuid;

/// Header used to propagate or return the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the main application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/payments", payments::router())
        .nest("/api/webhooks", webhooks::router())
        .layer(middleware::from_fn(request_id))
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Simple health check - returns OK if the server is running.
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Assign a request id, run the request inside a span carrying it, and echo
/// it in the response.
///
/// An incoming `x-request-id` is kept if it is short and printable.
async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestId(id.clone()));
    let span = tracing::info_span!(
        "request",
        request_id = %id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let mut response = next.run(req).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Run the server with graceful shutdown support.
pub async fn run_server(router: Router, addr: SocketAddr) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, StatusCode};
    use rust_decimal::Decimal;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;
    use storefront_core::config::{CheckoutConfig, RateLimitConfig, SharedConfig};
    use storefront_core::entities::{NewPayment, PaymentStatus};
    use storefront_core::events::{IpnReceivedReceiver, ipn_received_channel};
    use storefront_core::idempotency::IdempotencyLedger;
    use storefront_core::services::PaymentService;
    use storefront_core::testing::{MemoryPaymentRepository, ScriptedGateway, rejection};
    use storefront_sdk::objects::{CartItem, DeliveryAddress};
    use storefront_sdk::pesapal::GatewayReply;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        repo: Arc<MemoryPaymentRepository>,
        gateway: Arc<ScriptedGateway>,
        ipn_rx: IpnReceivedReceiver,
    }

    fn test_app(rate_limit: RateLimitConfig) -> TestApp {
        let repo = Arc::new(MemoryPaymentRepository::new());
        let gateway = Arc::new(ScriptedGateway::new());
        let config = SharedConfig::new(
            CheckoutConfig {
                app_base_url: Some("https://shop.example.com".parse().unwrap()),
                ipn_ids: vec!["ipn-1".to_string()],
            },
            rate_limit,
        );
        let service = Arc::new(PaymentService::new(
            repo.clone(),
            gateway.clone(),
            IdempotencyLedger::in_memory(),
            config.checkout.clone(),
        ));
        let (ipn_tx, ipn_rx) = ipn_received_channel();
        let router = build_router(AppState::new(service, config, ipn_tx));
        TestApp {
            router,
            repo,
            gateway,
            ipn_rx,
        }
    }

    fn app() -> TestApp {
        test_app(RateLimitConfig::default())
    }

    async fn seed_pending(repo: &MemoryPaymentRepository, tracking_id: &str) {
        repo.seed_payment(
            NewPayment {
                merchant_reference: "ORDER-1-abcdef".to_string(),
                amount: Decimal::new(1500, 0),
                currency: "UGX".to_string(),
                description: "Mug".to_string(),
                customer_email: Some("jane@example.com".to_string()),
                customer_phone: None,
                delivery_address: DeliveryAddress {
                    email_address: Some("jane@example.com".to_string()),
                    ..Default::default()
                },
                cart_items: vec![CartItem {
                    product_id: "mug".to_string(),
                    name: "Mug".to_string(),
                    price: Decimal::new(1500, 0),
                    quantity: 1,
                }],
                ipn_id_used: Some("ipn-1".to_string()),
                callback_url_used: None,
            },
            tracking_id,
            PaymentStatus::Pending,
        )
        .await;
    }

    fn json_request(method: Method, uri: &str, body: Value) -> Request {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_sets_request_id() {
        let app = app();
        let response = app
            .router
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));

        let response = app
            .router
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(REQUEST_ID_HEADER, "req-abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-abc");
    }

    #[tokio::test]
    async fn test_verify_requires_tracking_id() {
        let app = app();
        let response = app
            .router
            .oneshot(json_request(Method::POST, "/api/payments/verify", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["message"],
            "Order Tracking ID is required."
        );
    }

    #[tokio::test]
    async fn test_verify_completed_payment() {
        let app = app();
        seed_pending(&app.repo, "TRACK-1").await;
        app.gateway.push_status_code(1).await;

        let response = app
            .router
            .oneshot(json_request(
                Method::POST,
                "/api/payments/verify",
                json!({ "orderTrackingId": "TRACK-1" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "COMPLETED");
        assert_eq!(body["confirmationCode"], "CONF-1");
        assert_eq!(body["orderDetails"]["merchantReference"], "ORDER-1-abcdef");
        assert_eq!(app.repo.order_count().await, 1);
    }

    #[tokio::test]
    async fn test_verify_gateway_rejection_is_502() {
        let app = app();
        app.gateway
            .push_status(Ok(GatewayReply::Rejected(rejection("400", "Invalid tracking id"))))
            .await;

        let response = app
            .router
            .oneshot(json_request(
                Method::POST,
                "/api/payments/verify",
                json!({ "orderTrackingId": "TRACK-X" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["pesapal_error_code"], "400");
        assert_eq!(body["message"], "Invalid tracking id");
    }

    #[tokio::test]
    async fn test_verify_unknown_payment_is_404() {
        let app = app();
        app.gateway.push_status_code(2).await;

        let response = app
            .router
            .oneshot(json_request(
                Method::POST,
                "/api/payments/verify",
                json!({ "orderTrackingId": "MISSING" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["status"], "FAILED");
        assert_eq!(body["confirmationCode"], "CONF-2");
    }

    #[tokio::test]
    async fn test_initiate_validation_error() {
        let app = app();
        let response = app
            .router
            .oneshot(json_request(
                Method::POST,
                "/api/payments/initiate",
                json!({ "amount": 0, "currency": "UGX" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["message"], "Invalid or missing amount.");
    }

    #[tokio::test]
    async fn test_initiate_returns_redirect() {
        let app = app();
        app.gateway
            .push_submit(Ok(GatewayReply::Accepted(
                storefront_sdk::pesapal::SubmitOrderResponse {
                    order_tracking_id: Some("TRACK-9".to_string()),
                    redirect_url: Some("https://pay.example.com/r/9".to_string()),
                    ..Default::default()
                },
            )))
            .await;

        let response = app
            .router
            .oneshot(json_request(
                Method::POST,
                "/api/payments/initiate",
                json!({
                    "amount": 1500,
                    "currency": "UGX",
                    "description": "Order from storefront",
                    "billing_address": { "phone_number": "+256700000000" },
                    "items": [{ "_id": "mug", "name": "Mug", "price": 1500, "quantity": 1 }]
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await["redirectUrl"],
            "https://pay.example.com/r/9"
        );
    }

    #[tokio::test]
    async fn test_ipn_get_acknowledges_and_queues() {
        let mut app = app();
        let response = app
            .router
            .oneshot(
                Request::builder()
                    .uri("/api/webhooks/pesapal/ipn?OrderTrackingId=TRACK-1&OrderMerchantReference=ORDER-1&OrderNotificationType=IPNCHANGE")
                    .header(REQUEST_ID_HEADER, "req-ipn")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["orderTrackingId"], "TRACK-1");
        assert_eq!(body["orderNotificationType"], "IPNCHANGE");
        assert_eq!(body["status"], 200);

        let event = app.ipn_rx.try_recv().unwrap();
        assert_eq!(event.notification.tracking_id, "TRACK-1");
        assert_eq!(event.request_id, "req-ipn");
    }

    #[tokio::test]
    async fn test_ipn_post_with_missing_parameters() {
        let mut app = app();
        let response = app
            .router
            .oneshot(json_request(
                Method::POST,
                "/api/webhooks/pesapal/ipn",
                json!({ "OrderTrackingId": "TRACK-1" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], 500);
        assert_eq!(body["orderMerchantReference"], "UNKNOWN");
        assert_eq!(
            body["message"],
            "IPN received but missing required parameters."
        );
        assert!(app.ipn_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ipn_rate_limit() {
        let app = test_app(RateLimitConfig {
            enabled: true,
            window: Duration::from_secs(60),
            verify_max: 1,
            ipn_max: 1,
        });
        let request = || {
            Request::builder()
                .uri("/api/webhooks/pesapal/ipn?OrderTrackingId=T&OrderMerchantReference=M&OrderNotificationType=IPNCHANGE")
                .header("x-forwarded-for", "203.0.113.9")
                .body(Body::empty())
                .unwrap()
        };

        let first = app.router.clone().oneshot(request()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.router.oneshot(request()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = body_json(second).await;
        assert_eq!(body["status"], 429);
        assert_eq!(body["message"], "Too many IPN requests");
    }

    #[tokio::test]
    async fn test_verify_rate_limit() {
        let app = test_app(RateLimitConfig {
            enabled: true,
            window: Duration::from_secs(60),
            verify_max: 1,
            ipn_max: 1,
        });
        let request = || json_request(Method::POST, "/api/payments/verify", json!({}));

        let first = app.router.clone().oneshot(request()).await.unwrap();
        assert_eq!(first.status(), StatusCode::BAD_REQUEST);

        let second = app.router.oneshot(request()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            body_json(second).await["message"],
            "Too many requests. Please try again later."
        );
    }
}
