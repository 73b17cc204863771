//! Checkout payment handlers.
//!
//! # Endpoints
//!
//! - `POST /initiate` – create a pending payment and get the gateway redirect
//! - `POST /verify`   – query and record the gateway status of a payment

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use storefront_core::services::{InitiateError, VerifyError};
use storefront_sdk::objects::{ErrorBody, InitiatePaymentRequest, VerifyPaymentRequest};

use crate::api::extractors::ClientKey;
use crate::state::{AppState, RateLimited};

/// Build the payments router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/initiate", post(initiate_payment))
        .route("/verify", post(verify_payment))
}

/// `POST /initiate` — start a checkout.
async fn initiate_payment(
    State(state): State<AppState>,
    payload: Result<Json<InitiatePaymentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, PaymentApiError> {
    let Json(request) = payload.map_err(PaymentApiError::InvalidBody)?;
    let response = state.payments.initiate_payment(request).await?;
    Ok(Json(response))
}

/// `POST /verify` — verify a payment after the gateway redirect.
async fn verify_payment(
    State(state): State<AppState>,
    ClientKey(client): ClientKey,
    payload: Result<Json<VerifyPaymentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, PaymentApiError> {
    if !state.allow(RateLimited::Verify, &client).await {
        tracing::warn!(client = %client, "Verify rate limit exceeded");
        return Err(PaymentApiError::RateLimited);
    }

    let tracking_id = payload
        .ok()
        .and_then(|Json(body)| body.order_tracking_id)
        .filter(|id| !id.trim().is_empty())
        .ok_or(PaymentApiError::MissingTrackingId)?;

    let response = state.payments.verify_payment(&tracking_id).await?;
    Ok(Json(response))
}

/// Errors that can occur in payment handlers.
#[derive(Debug)]
enum PaymentApiError {
    InvalidBody(JsonRejection),
    MissingTrackingId,
    RateLimited,
    Initiate(InitiateError),
    Verify(VerifyError),
}

impl From<InitiateError> for PaymentApiError {
    fn from(e: InitiateError) -> Self {
        PaymentApiError::Initiate(e)
    }
}

impl From<VerifyError> for PaymentApiError {
    fn from(e: VerifyError) -> Self {
        PaymentApiError::Verify(e)
    }
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

impl IntoResponse for PaymentApiError {
    fn into_response(self) -> Response {
        match self {
            PaymentApiError::InvalidBody(rejection) => {
                tracing::debug!(error = %rejection, "Rejected payment request body");
                (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorBody::message("Invalid request body.")),
                )
                    .into_response()
            }
            PaymentApiError::MissingTrackingId => (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody::message("Order Tracking ID is required.")),
            )
                .into_response(),
            PaymentApiError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ErrorBody::message("Too many requests. Please try again later.")),
            )
                .into_response(),
            PaymentApiError::Initiate(e) => {
                if e.status_code() >= 500 {
                    tracing::error!(error = %e, "Payment initiation failed");
                }
                (status(e.status_code()), Json(e.to_body())).into_response()
            }
            PaymentApiError::Verify(e) => {
                tracing::error!(error = %e, "Payment verification failed");
                (status(e.status_code()), Json(e.to_body())).into_response()
            }
        }
    }
}
