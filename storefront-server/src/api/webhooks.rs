//! Gateway webhook handlers.
//!
//! # Endpoints
//!
//! - `GET|POST /pesapal/ipn` – Pesapal instant payment notification
//!
//! The gateway is acknowledged with HTTP 200 as soon as the parameters are
//! checked. Processing happens in the `IpnProcessor` and never affects the
//! acknowledgement.

use axum::{
    Json, Router,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use storefront_core::events::IpnReceived;
use storefront_sdk::objects::{IpnAck, IpnQuery};
use tokio::sync::mpsc::error::TrySendError;

use crate::api::extractors::{ClientKey, RequestId};
use crate::state::{AppState, RateLimited};

/// Build the webhooks router.
pub fn router() -> Router<AppState> {
    Router::new().route("/pesapal/ipn", get(ipn_get).post(ipn_post))
}

/// IPN delivered as query parameters.
async fn ipn_get(
    State(state): State<AppState>,
    client: ClientKey,
    request_id: RequestId,
    query: Result<Query<IpnQuery>, QueryRejection>,
) -> Response {
    let query = query.map(|Query(q)| q).unwrap_or_default();
    handle_ipn(&state, client, request_id, query).await
}

/// IPN delivered as a JSON body.
async fn ipn_post(
    State(state): State<AppState>,
    client: ClientKey,
    request_id: RequestId,
    body: Result<Json<IpnQuery>, JsonRejection>,
) -> Response {
    let query = body.map(|Json(q)| q).unwrap_or_default();
    handle_ipn(&state, client, request_id, query).await
}

#[derive(Serialize)]
struct IpnRateLimited {
    status: u16,
    message: &'static str,
}

async fn handle_ipn(
    state: &AppState,
    ClientKey(client): ClientKey,
    RequestId(request_id): RequestId,
    query: IpnQuery,
) -> Response {
    if !state.allow(RateLimited::Ipn, &client).await {
        tracing::warn!(client = %client, "IPN rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(IpnRateLimited {
                status: 429,
                message: "Too many IPN requests",
            }),
        )
            .into_response();
    }

    tracing::info!(
        tracking_id = ?query.order_tracking_id,
        merchant_reference = ?query.order_merchant_reference,
        notification_type = ?query.order_notification_type,
        "IPN received"
    );

    let Some(notification) = query.clone().into_notification() else {
        tracing::error!("IPN missing required parameters");
        return (StatusCode::OK, Json(IpnAck::incomplete(&query))).into_response();
    };

    let ack = IpnAck::received(&notification);
    let tracking_id = notification.tracking_id.clone();
    match state.ipn_tx.try_send(IpnReceived {
        notification,
        request_id,
    }) {
        Ok(()) => tracing::debug!(tracking_id = %tracking_id, "IPN queued for processing"),
        Err(TrySendError::Full(_)) => {
            tracing::error!(tracking_id = %tracking_id, "IPN queue full; notification dropped")
        }
        Err(TrySendError::Closed(_)) => {
            tracing::error!(tracking_id = %tracking_id, "IPN processor stopped; notification dropped")
        }
    }

    (StatusCode::OK, Json(ack)).into_response()
}
