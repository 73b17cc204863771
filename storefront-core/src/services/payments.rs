//! Payment orchestration: initiation, verification and IPN processing.
//!
//! Verification and IPN processing may race for the same tracking id. Both
//! converge on [`PaymentRepository::update_payment_status`], whose
//! conditional update never regresses a terminal payment, and on
//! [`ensure_order_for_completed_payment`], whose unique insert creates at
//! most one order per payment.

use std::sync::Arc;

use rand::Rng;
use rust_decimal::Decimal;
use storefront_sdk::objects::{
    CartItem, ErrorBody, InitiatePaymentRequest, InitiatePaymentResponse, IpnNotification, OrderDetails,
    PaymentStatus as SdkPaymentStatus, VerifyPaymentResponse,
};
use storefront_sdk::pesapal::{
    ApiError, BillingAddress, GatewayError, GatewayReply, SubmitOrderRequest, TransactionStatus,
};
use thiserror::Error;
use tracing::{error, info, warn};

use super::order_ensurer::{ensure_order_for_completed_payment, line_total};
use crate::config::{CheckoutConfig, ConfigStore};
use crate::entities::{NewPayment, Payment, PaymentStatus, StatusUpdate};
use crate::gateway::PaymentGateway;
use crate::idempotency::{IdempotencyLedger, LedgerEvent};
use crate::repository::{PaymentRepository, RepositoryError};
use crate::retry::{RetryPolicy, with_retry};

const MSG_CONFIGURATION: &str = "Server configuration error.";
const MSG_INITIATE_FAILED: &str = "Failed to initiate payment.";
const MSG_INVALID_SUBMIT_RESPONSE: &str =
    "Invalid response received from Pesapal after order submission.";
const MSG_STATUS_REJECTED: &str = "Failed to get transaction status from Pesapal.";
const MSG_STATUS_TRANSPORT: &str = "Failed to communicate with payment provider for status check.";
const MSG_NOT_FOUND: &str =
    "Payment record not found or failed to update in our system after verification.";
const MSG_VERIFY_INTERNAL: &str = "Internal server error during verification process.";

/// Reasons an initiation request is rejected before any side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid or missing amount.")]
    Amount,
    #[error("Invalid or missing currency code.")]
    Currency,
    #[error("Invalid or missing description.")]
    Description,
    #[error("Billing/delivery address with email or phone number is required.")]
    Contact,
    #[error("Cart items are missing or invalid.")]
    Items,
}

#[derive(Debug, Error)]
pub enum InitiateError {
    #[error("checkout configuration incomplete: {0}")]
    Configuration(&'static str),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("gateway rejected order: {0}")]
    GatewayRejected(ApiError),

    #[error("gateway response lacks tracking id or redirect url")]
    InvalidGatewayResponse,

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl InitiateError {
    pub fn status_code(&self) -> u16 {
        match self {
            InitiateError::Validation(_) => 400,
            _ => 500,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        match self {
            InitiateError::Configuration(_) => ErrorBody::message(MSG_CONFIGURATION),
            InitiateError::Validation(v) => ErrorBody::message(v.to_string()),
            InitiateError::GatewayRejected(api) => ErrorBody {
                pesapal_error_code: api.code.clone(),
                ..ErrorBody::message(
                    api.message
                        .clone()
                        .filter(|m| !m.trim().is_empty())
                        .unwrap_or_else(|| MSG_INITIATE_FAILED.to_string()),
                )
            },
            InitiateError::InvalidGatewayResponse => {
                ErrorBody::message(MSG_INVALID_SUBMIT_RESPONSE)
            }
            InitiateError::Gateway(_) | InitiateError::Repository(_) => {
                ErrorBody::message(MSG_INITIATE_FAILED)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("gateway rejected status query with code {code}")]
    GatewayRejected {
        code: String,
        message: Option<String>,
    },

    #[error("gateway status query failed: {source}")]
    GatewayTransport {
        /// Pesapal error code found in the failed response body, if any.
        code: Option<String>,
        #[source]
        source: GatewayError,
    },

    #[error("no payment record for tracking id")]
    NotFound {
        status: SdkPaymentStatus,
        confirmation_code: Option<String>,
        status_description: Option<String>,
    },

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl VerifyError {
    pub fn status_code(&self) -> u16 {
        match self {
            VerifyError::GatewayRejected { .. } | VerifyError::GatewayTransport { .. } => 502,
            VerifyError::NotFound { .. } => 404,
            VerifyError::Repository(_) => 500,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        match self {
            VerifyError::GatewayRejected { code, message } => ErrorBody {
                pesapal_error_code: Some(code.clone()),
                ..ErrorBody::message(
                    message
                        .clone()
                        .filter(|m| !m.trim().is_empty())
                        .unwrap_or_else(|| MSG_STATUS_REJECTED.to_string()),
                )
            },
            VerifyError::GatewayTransport { code, .. } => ErrorBody {
                pesapal_error_code: code.clone(),
                ..ErrorBody::message(MSG_STATUS_TRANSPORT)
            },
            VerifyError::NotFound {
                status,
                confirmation_code,
                status_description,
            } => ErrorBody {
                status: Some(*status),
                confirmation_code: confirmation_code.clone(),
                status_description: status_description.clone(),
                ..ErrorBody::message(MSG_NOT_FOUND)
            },
            VerifyError::Repository(_) => ErrorBody::message(MSG_VERIFY_INTERNAL),
        }
    }
}

/// What [`PaymentService::process_ipn`] did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpnOutcome {
    /// The stored payment was already terminal; the gateway was not called.
    SkippedTerminal(PaymentStatus),
    /// The gateway answered the status query with an error object.
    GatewayRejected,
    /// No payment carries the tracking id.
    RecordMissing,
    /// The payment was updated; holds the stored status afterwards.
    Updated(PaymentStatus),
    /// A gateway or repository failure stopped processing.
    Failed,
}

/// Orchestrates the payment lifecycle over a repository and a gateway.
pub struct PaymentService {
    repo: Arc<dyn PaymentRepository>,
    gateway: Arc<dyn PaymentGateway>,
    ledger: IdempotencyLedger,
    checkout: ConfigStore<CheckoutConfig>,
    retry: RetryPolicy,
}

impl PaymentService {
    pub fn new(
        repo: Arc<dyn PaymentRepository>,
        gateway: Arc<dyn PaymentGateway>,
        ledger: IdempotencyLedger,
        checkout: ConfigStore<CheckoutConfig>,
    ) -> Self {
        Self {
            repo,
            gateway,
            ledger,
            checkout,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn ledger(&self) -> &IdempotencyLedger {
        &self.ledger
    }

    /// Create a pending payment and submit it to the gateway.
    ///
    /// Returns the hosted payment page the customer is redirected to.
    pub async fn initiate_payment(
        &self,
        request: InitiatePaymentRequest,
    ) -> Result<InitiatePaymentResponse, InitiateError> {
        let (ipn_id, callback_url) = {
            let checkout = self.checkout.read().await;
            let ipn_id = checkout.default_ipn_id().map(str::to_string);
            match (ipn_id, checkout.callback_url()) {
                (Some(ipn_id), Some(callback_url)) => (ipn_id, callback_url),
                (None, _) => {
                    error!("Missing IPN id for payment initiation");
                    return Err(InitiateError::Configuration("ipn_ids"));
                }
                (_, None) => {
                    error!("Missing application base URL for payment initiation");
                    return Err(InitiateError::Configuration("app_base_url"));
                }
            }
        };

        let checkout = validate_initiation(request)?;
        let merchant_reference = generate_merchant_reference();

        let payment = self
            .repo
            .create_pending_payment(NewPayment {
                merchant_reference: merchant_reference.clone(),
                amount: checkout.amount,
                currency: checkout.currency.clone(),
                description: checkout.description.clone(),
                customer_email: checkout.address.email().map(str::to_string),
                customer_phone: checkout.address.phone().map(str::to_string),
                delivery_address: checkout.address.clone(),
                cart_items: checkout.items,
                ipn_id_used: Some(ipn_id.clone()),
                callback_url_used: Some(callback_url.clone()),
            })
            .await
            .inspect_err(|e| error!(error = %e, "Failed to create pending payment"))?;
        info!(
            payment_id = %payment.id,
            merchant_reference = %merchant_reference,
            "Created pending payment record"
        );

        let order = SubmitOrderRequest {
            id: merchant_reference.clone(),
            currency: checkout.currency,
            amount: checkout.amount,
            description: checkout.description,
            callback_url,
            notification_id: ipn_id,
            billing_address: BillingAddress::from(&checkout.address),
        };

        info!(merchant_reference = %merchant_reference, "Submitting order to Pesapal");
        let submitted = match self.gateway.submit_order(&order).await {
            Ok(GatewayReply::Accepted(submitted)) => submitted,
            Ok(GatewayReply::Rejected(api)) => {
                error!(
                    merchant_reference = %merchant_reference,
                    code = ?api.code,
                    message = ?api.message,
                    "Pesapal rejected order submission"
                );
                return Err(InitiateError::GatewayRejected(api));
            }
            Err(e) => {
                error!(merchant_reference = %merchant_reference, error = %e, "Order submission failed");
                return Err(e.into());
            }
        };

        let (Some(tracking_id), Some(redirect_url)) = (
            submitted.order_tracking_id.filter(|v| !v.is_empty()),
            submitted.redirect_url.filter(|v| !v.is_empty()),
        ) else {
            error!(merchant_reference = %merchant_reference, "Invalid Pesapal SubmitOrder response");
            return Err(InitiateError::InvalidGatewayResponse);
        };

        self.repo
            .update_payment_tracking_id(payment.id, &tracking_id)
            .await
            .inspect_err(|e| error!(payment_id = %payment.id, error = %e, "Failed to store tracking id"))?;
        info!(
            payment_id = %payment.id,
            tracking_id = %tracking_id,
            "Updated payment with Pesapal tracking ID"
        );

        Ok(InitiatePaymentResponse {
            redirect_url,
            merchant_reference,
        })
    }

    /// Query the gateway for a payment's status and record it.
    pub async fn verify_payment(
        &self,
        tracking_id: &str,
    ) -> Result<VerifyPaymentResponse, VerifyError> {
        info!(tracking_id, "Verifying payment status");
        let reply = with_retry(&self.retry, || self.gateway.get_transaction_status(tracking_id))
            .await
            .map_err(|source| {
                error!(tracking_id, error = %source, "Status query failed after retries");
                VerifyError::GatewayTransport {
                    code: source.gateway_code(),
                    source,
                }
            })?;

        let transaction = match reply {
            GatewayReply::Accepted(transaction) => transaction,
            GatewayReply::Rejected(api) => {
                error!(
                    tracking_id,
                    code = ?api.code,
                    message = ?api.message,
                    "Pesapal returned error for status check"
                );
                return Err(VerifyError::GatewayRejected {
                    code: api.code.unwrap_or_default(),
                    message: api.message,
                });
            }
        };
        info!(tracking_id, status_code = ?transaction.status_code, "Pesapal status response");

        let update = status_update(&transaction);
        let reported_status = update.status;
        let reported_code = update.confirmation_code.clone();
        let reported_description = update.status_description.clone();

        info!(tracking_id, status = %reported_status, "Updating payment status");
        let Some(payment) = self
            .repo
            .update_payment_status(tracking_id, update)
            .await
            .inspect_err(|e| error!(tracking_id, error = %e, "Failed to update payment status"))?
        else {
            error!(tracking_id, "No payment record for verified tracking id");
            return Err(VerifyError::NotFound {
                status: reported_status.into(),
                confirmation_code: reported_code,
                status_description: reported_description,
            });
        };

        if payment.status == PaymentStatus::Completed {
            self.ensure_order(&payment).await;
        }

        self.ledger
            .mark_processed(LedgerEvent::Verify, tracking_id)
            .await;

        info!(tracking_id, status = %payment.status, "Verification succeeded");
        Ok(VerifyPaymentResponse {
            status: payment.status.into(),
            status_description: payment
                .pesapal_status_description
                .clone()
                .or(reported_description),
            confirmation_code: payment.pesapal_confirmation_code.clone().or(reported_code),
            order_details: order_details(&payment),
        })
    }

    /// Handle one IPN delivery. Never fails; the outcome is informational.
    pub async fn process_ipn(&self, notification: &IpnNotification) -> IpnOutcome {
        let tracking_id = notification.tracking_id.as_str();

        match self.repo.get_payment_by_tracking_id(tracking_id).await {
            Ok(Some(payment)) if payment.status.is_terminal() => {
                info!(tracking_id, status = %payment.status, "IPN skipped: terminal state");
                return IpnOutcome::SkippedTerminal(payment.status);
            }
            Ok(_) => {}
            Err(e) => {
                // The conditional update still protects terminal records.
                warn!(tracking_id, error = %e, "Failed to read payment before IPN processing");
            }
        }

        info!(tracking_id, "Querying Pesapal status");
        let transaction = match with_retry(&self.retry, || {
            self.gateway.get_transaction_status(tracking_id)
        })
        .await
        {
            Ok(GatewayReply::Accepted(transaction)) => transaction,
            Ok(GatewayReply::Rejected(api)) => {
                error!(
                    tracking_id,
                    code = ?api.code,
                    message = ?api.message,
                    "IPN status check rejected by Pesapal"
                );
                return IpnOutcome::GatewayRejected;
            }
            Err(e) => {
                error!(tracking_id, error = %e, "IPN status check failed");
                return IpnOutcome::Failed;
            }
        };

        let update = status_update(&transaction);
        let payment = match self.repo.update_payment_status(tracking_id, update).await {
            Ok(Some(payment)) => payment,
            Ok(None) => {
                warn!(tracking_id, "No payment record found for IPN tracking id");
                return IpnOutcome::RecordMissing;
            }
            Err(e) => {
                error!(tracking_id, error = %e, "Failed to update payment status from IPN");
                return IpnOutcome::Failed;
            }
        };
        info!(tracking_id, status = %payment.status, "Payment status updated from IPN");

        if payment.status == PaymentStatus::Completed {
            self.ensure_order(&payment).await;
            info!(
                tracking_id,
                merchant_reference = %notification.merchant_reference,
                "Payment completed"
            );
        } else {
            info!(tracking_id, status = %payment.status, "Payment not completed; no completion actions");
        }

        self.ledger.mark_processed(LedgerEvent::Ipn, tracking_id).await;
        IpnOutcome::Updated(payment.status)
    }

    /// Create the order for a completed payment, logging failures.
    ///
    /// A failure here leaves a completed payment without an order. It is
    /// reported but does not change the payment or the caller's response.
    async fn ensure_order(&self, payment: &Payment) {
        match ensure_order_for_completed_payment(self.repo.as_ref(), payment).await {
            Ok(ensured) => info!(
                payment_id = %payment.id,
                order_id = %ensured.order.id,
                existed = ensured.existed,
                "Order ensured for completed payment"
            ),
            Err(e) => error!(
                payment_id = %payment.id,
                error = %e,
                "Completed payment has no order: order creation failed"
            ),
        }
    }
}

/// Validated contents of an initiation request.
struct CheckoutRequest {
    amount: Decimal,
    currency: String,
    description: String,
    address: storefront_sdk::objects::DeliveryAddress,
    items: Vec<CartItem>,
}

fn validate_initiation(request: InitiatePaymentRequest) -> Result<CheckoutRequest, ValidationError> {
    let amount = request
        .amount
        .filter(|a| *a > Decimal::ZERO)
        .ok_or(ValidationError::Amount)?;
    let currency = request
        .currency
        .filter(|c| c.chars().count() == 3)
        .ok_or(ValidationError::Currency)?;
    let description = request
        .description
        .filter(|d| !d.trim().is_empty())
        .ok_or(ValidationError::Description)?;
    let address = request
        .billing_address
        .filter(|a| a.has_contact())
        .ok_or(ValidationError::Contact)?;
    let items = request
        .items
        .filter(|i| !i.is_empty() && i.iter().all(valid_item))
        .ok_or(ValidationError::Items)?;
    Ok(CheckoutRequest {
        amount,
        currency,
        description,
        address,
        items,
    })
}

/// A positive quantity and price whose line total fits a `Decimal`.
fn valid_item(item: &CartItem) -> bool {
    item.quantity > 0 && item.price > Decimal::ZERO && line_total(item).is_some()
}

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `ORDER-<unix millis>-<6 random base36 chars>`
pub fn generate_merchant_reference() -> String {
    let millis = time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    let mut rng = rand::rng();
    let suffix: String = (0..6)
        .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
        .collect();
    format!("ORDER-{millis}-{suffix}")
}

/// Build the repository update for a gateway status.
///
/// Pesapal's `description` is preferred over `payment_status_description`.
fn status_update(transaction: &TransactionStatus) -> StatusUpdate {
    fn present(value: &Option<String>) -> Option<String> {
        value.clone().filter(|v| !v.trim().is_empty())
    }
    StatusUpdate {
        status: PaymentStatus::from_gateway_code(transaction.status_code),
        payment_method: present(&transaction.payment_method),
        confirmation_code: present(&transaction.confirmation_code),
        status_description: present(&transaction.description)
            .or_else(|| present(&transaction.payment_status_description)),
    }
}

fn order_details(payment: &Payment) -> OrderDetails {
    OrderDetails {
        merchant_reference: payment.merchant_reference.clone(),
        total_amount: payment.amount,
        currency: payment.currency.clone(),
        items: payment.cart_items.0.clone(),
        delivery_address: payment.delivery_address.0.clone(),
        customer_email: payment.customer_email.clone(),
        customer_phone: payment.customer_phone.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        MemoryPaymentRepository, ScriptedGateway, rejection, status_with_code, transport_error,
    };
    use crate::idempotency::{IdempotencyStore, LedgerError, MemoryIdempotencyStore};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use storefront_sdk::objects::{CartItem, DeliveryAddress};
    use storefront_sdk::pesapal::SubmitOrderResponse;
    use url::Url;

    struct Harness {
        repo: Arc<MemoryPaymentRepository>,
        gateway: Arc<ScriptedGateway>,
        service: PaymentService,
    }

    fn checkout_config() -> CheckoutConfig {
        CheckoutConfig {
            app_base_url: Some(Url::parse("https://shop.example.com").unwrap()),
            ipn_ids: vec!["ipn-1".to_string(), "ipn-2".to_string()],
        }
    }

    fn harness_with(config: CheckoutConfig) -> Harness {
        harness_with_ledger(config, IdempotencyLedger::in_memory())
    }

    fn harness_with_ledger(config: CheckoutConfig, ledger: IdempotencyLedger) -> Harness {
        let repo = Arc::new(MemoryPaymentRepository::new());
        let gateway = Arc::new(ScriptedGateway::new());
        let service = PaymentService::new(
            repo.clone(),
            gateway.clone(),
            ledger,
            ConfigStore::new(config),
        )
        .with_retry_policy(RetryPolicy {
            retries: 2,
            delay: Duration::from_millis(1),
            factor: 2,
        });
        Harness {
            repo,
            gateway,
            service,
        }
    }

    fn harness() -> Harness {
        harness_with(checkout_config())
    }

    fn valid_request() -> InitiatePaymentRequest {
        InitiatePaymentRequest {
            amount: Some(Decimal::new(1500, 0)),
            currency: Some("UGX".to_string()),
            description: Some("Order from storefront".to_string()),
            billing_address: Some(DeliveryAddress {
                email_address: Some("jane@example.com".to_string()),
                first_name: Some("Jane".to_string()),
                ..Default::default()
            }),
            items: Some(vec![CartItem {
                product_id: "prod-1".to_string(),
                name: "Mug".to_string(),
                price: Decimal::new(1500, 0),
                quantity: 1,
            }]),
        }
    }

    fn set_first_item(request: &mut InitiatePaymentRequest, price: Decimal, quantity: u32) {
        if let Some(item) = request.items.as_mut().and_then(|items| items.first_mut()) {
            item.price = price;
            item.quantity = quantity;
        }
    }

    fn new_payment() -> NewPayment {
        NewPayment {
            merchant_reference: generate_merchant_reference(),
            amount: Decimal::new(1500, 0),
            currency: "UGX".to_string(),
            description: "Order from storefront".to_string(),
            customer_email: Some("jane@example.com".to_string()),
            customer_phone: None,
            delivery_address: DeliveryAddress {
                email_address: Some("jane@example.com".to_string()),
                ..Default::default()
            },
            cart_items: vec![CartItem {
                product_id: "prod-1".to_string(),
                name: "Mug".to_string(),
                price: Decimal::new(1500, 0),
                quantity: 1,
            }],
            ipn_id_used: Some("ipn-1".to_string()),
            callback_url_used: Some("https://shop.example.com/payment/callback".to_string()),
        }
    }

    fn notification(tracking_id: &str) -> IpnNotification {
        IpnNotification {
            tracking_id: tracking_id.to_string(),
            merchant_reference: "ORDER-1".to_string(),
            notification_type: "IPNCHANGE".to_string(),
        }
    }

    fn accepted_submission() -> SubmitOrderResponse {
        SubmitOrderResponse {
            order_tracking_id: Some("TRACK-1".to_string()),
            merchant_reference: None,
            redirect_url: Some("https://pay.example.com/redirect".to_string()),
            error: None,
            status: Some("200".to_string()),
        }
    }

    #[test]
    fn test_merchant_references_are_unique() {
        let refs: HashSet<String> = (0..1000).map(|_| generate_merchant_reference()).collect();
        assert_eq!(refs.len(), 1000);
        let sample = refs.iter().next().unwrap();
        let parts: Vec<&str> = sample.split('-').collect();
        assert_eq!(parts[0], "ORDER");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].bytes().all(|b| BASE36.contains(&b)));
    }

    #[tokio::test]
    async fn test_initiate_success_persists_tracking_id() {
        let h = harness();
        h.gateway.push_submit(Ok(GatewayReply::Accepted(accepted_submission()))).await;

        let response = h.service.initiate_payment(valid_request()).await.unwrap();

        assert_eq!(response.redirect_url, "https://pay.example.com/redirect");
        let payments = h.repo.payments().await;
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].pesapal_tracking_id.as_deref(), Some("TRACK-1"));
        assert_eq!(payments[0].status, PaymentStatus::Pending);
        assert_eq!(payments[0].merchant_reference, response.merchant_reference);

        let submitted = h.gateway.submitted_orders().await;
        assert_eq!(submitted[0].notification_id, "ipn-1");
        assert_eq!(
            submitted[0].callback_url,
            "https://shop.example.com/payment/callback"
        );
        assert_eq!(submitted[0].billing_address.email_address, "jane@example.com");
        assert_eq!(submitted[0].billing_address.phone_number, "");
    }

    #[tokio::test]
    async fn test_initiate_validation_failures() {
        let cases: [(fn(&mut InitiatePaymentRequest), ValidationError); 10] = [
            (|r| r.amount = Some(Decimal::ZERO), ValidationError::Amount),
            (|r| r.amount = Some(Decimal::new(-5, 0)), ValidationError::Amount),
            (|r| r.amount = None, ValidationError::Amount),
            (|r| r.currency = Some("UG".to_string()), ValidationError::Currency),
            (|r| r.description = Some("  ".to_string()), ValidationError::Description),
            (
                |r| {
                    r.billing_address = Some(DeliveryAddress {
                        first_name: Some("Jane".to_string()),
                        ..Default::default()
                    })
                },
                ValidationError::Contact,
            ),
            (|r| r.items = Some(vec![]), ValidationError::Items),
            (|r| set_first_item(r, Decimal::new(1500, 0), 0), ValidationError::Items),
            (|r| set_first_item(r, Decimal::ZERO, 1), ValidationError::Items),
            (
                |r| {
                    let huge = Decimal::from_str_exact("50000000000000000000000000000").unwrap();
                    set_first_item(r, huge, 2)
                },
                ValidationError::Items,
            ),
        ];

        let h = harness();
        for (mutate, expected) in cases {
            let mut request = valid_request();
            mutate(&mut request);
            let err = h.service.initiate_payment(request).await.unwrap_err();
            assert_eq!(err.status_code(), 400);
            assert!(matches!(err, InitiateError::Validation(v) if v == expected));
        }
        assert!(h.repo.payments().await.is_empty());
        assert_eq!(h.gateway.submit_calls(), 0);
    }

    #[tokio::test]
    async fn test_initiate_requires_configuration_before_validation() {
        let h = harness_with(CheckoutConfig {
            app_base_url: Some(Url::parse("https://shop.example.com").unwrap()),
            ipn_ids: vec![" ".to_string()],
        });
        let err = h
            .service
            .initiate_payment(InitiatePaymentRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.to_body().message, "Server configuration error.");
        assert!(h.repo.payments().await.is_empty());
    }

    #[tokio::test]
    async fn test_initiate_incomplete_gateway_response() {
        let h = harness();
        let mut submission = accepted_submission();
        submission.redirect_url = None;
        h.gateway.push_submit(Ok(GatewayReply::Accepted(submission))).await;

        let err = h.service.initiate_payment(valid_request()).await.unwrap_err();

        assert_eq!(err.status_code(), 500);
        assert_eq!(
            err.to_body().message,
            "Invalid response received from Pesapal after order submission."
        );
        let payments = h.repo.payments().await;
        assert_eq!(payments[0].status, PaymentStatus::Pending);
        assert_eq!(payments[0].pesapal_tracking_id, None);
    }

    #[tokio::test]
    async fn test_initiate_gateway_rejection() {
        let h = harness();
        h.gateway
            .push_submit(Ok(GatewayReply::Rejected(rejection("invalid_currency", "Bad currency"))))
            .await;

        let err = h.service.initiate_payment(valid_request()).await.unwrap_err();

        assert_eq!(err.status_code(), 500);
        let body = err.to_body();
        assert_eq!(body.message, "Bad currency");
        assert_eq!(body.pesapal_error_code.as_deref(), Some("invalid_currency"));
    }

    #[tokio::test]
    async fn test_verify_maps_gateway_codes() {
        let cases = [
            (1, SdkPaymentStatus::Completed),
            (2, SdkPaymentStatus::Failed),
            (3, SdkPaymentStatus::Reversed),
            (0, SdkPaymentStatus::Invalid),
            (99, SdkPaymentStatus::Pending),
        ];
        for (code, expected) in cases {
            let h = harness();
            h.repo
                .seed_payment(new_payment(), "TRACK-1", PaymentStatus::Pending)
                .await;
            h.gateway.push_status_code(code).await;

            let response = h.service.verify_payment("TRACK-1").await.unwrap();

            assert_eq!(response.status, expected, "status code {code}");
            assert_eq!(response.confirmation_code, Some(format!("CONF-{code}")));
            assert_eq!(
                response.status_description.as_deref(),
                Some("Gateway description")
            );
            let orders = if expected == SdkPaymentStatus::Completed { 1 } else { 0 };
            assert_eq!(h.repo.order_count().await, orders);
        }
    }

    #[tokio::test]
    async fn test_verify_returns_order_details_from_snapshot() {
        let h = harness();
        let payment = h
            .repo
            .seed_payment(new_payment(), "TRACK-1", PaymentStatus::Pending)
            .await;
        h.gateway.push_status_code(1).await;

        let response = h.service.verify_payment("TRACK-1").await.unwrap();

        let details = response.order_details;
        assert_eq!(details.merchant_reference, payment.merchant_reference);
        assert_eq!(details.total_amount, Decimal::new(1500, 0));
        assert_eq!(details.items.len(), 1);
        assert_eq!(details.customer_email.as_deref(), Some("jane@example.com"));
        assert!(h.service.ledger().is_processed(LedgerEvent::Verify, "TRACK-1").await);
    }

    #[tokio::test]
    async fn test_verify_retries_transport_failure() {
        let h = harness();
        h.repo
            .seed_payment(new_payment(), "TRACK-1", PaymentStatus::Pending)
            .await;
        h.gateway.push_status(Err(transport_error())).await;
        h.gateway.push_status_code(1).await;

        let response = h.service.verify_payment("TRACK-1").await.unwrap();

        assert_eq!(response.status, SdkPaymentStatus::Completed);
        assert_eq!(h.gateway.status_calls(), 2);
    }

    #[tokio::test]
    async fn test_verify_transport_failure_after_retries() {
        let h = harness();
        for _ in 0..3 {
            h.gateway
                .push_status(Err(GatewayError::Status {
                    endpoint: "Transactions/GetTransactionStatus",
                    status: 500,
                    body: r#"{"error":{"code":"server_error"}}"#.to_string(),
                }))
                .await;
        }

        let err = h.service.verify_payment("TRACK-1").await.unwrap_err();

        assert_eq!(h.gateway.status_calls(), 3);
        assert_eq!(err.status_code(), 502);
        let body = err.to_body();
        assert_eq!(
            body.message,
            "Failed to communicate with payment provider for status check."
        );
        assert_eq!(body.pesapal_error_code.as_deref(), Some("server_error"));
    }

    #[tokio::test]
    async fn test_verify_business_error_is_502_with_code() {
        let h = harness();
        h.gateway
            .push_status(Ok(GatewayReply::Rejected(ApiError {
                error_type: None,
                code: Some("400".to_string()),
                message: None,
            })))
            .await;

        let err = h.service.verify_payment("TRACK-1").await.unwrap_err();

        assert_eq!(h.gateway.status_calls(), 1);
        assert_eq!(err.status_code(), 502);
        let body = err.to_body();
        assert_eq!(body.pesapal_error_code.as_deref(), Some("400"));
        assert_eq!(body.message, "Failed to get transaction status from Pesapal.");
    }

    #[tokio::test]
    async fn test_verify_missing_record_is_404_with_mapped_status() {
        let h = harness();
        h.gateway.push_status_code(2).await;

        let err = h.service.verify_payment("UNKNOWN-TRACK").await.unwrap_err();

        assert_eq!(err.status_code(), 404);
        let body = err.to_body();
        assert_eq!(body.status, Some(SdkPaymentStatus::Failed));
        assert_eq!(body.confirmation_code.as_deref(), Some("CONF-2"));
        assert_eq!(body.status_description.as_deref(), Some("Gateway description"));
    }

    #[tokio::test]
    async fn test_verify_repository_failure_is_500() {
        let h = harness();
        h.repo.set_unavailable(true);
        h.gateway.push_status_code(1).await;

        let err = h.service.verify_payment("TRACK-1").await.unwrap_err();

        assert_eq!(err.status_code(), 500);
        assert_eq!(
            err.to_body().message,
            "Internal server error during verification process."
        );
    }

    #[tokio::test]
    async fn test_verify_succeeds_when_order_creation_fails() {
        let h = harness();
        h.repo
            .seed_payment(new_payment(), "TRACK-1", PaymentStatus::Pending)
            .await;
        h.repo.set_orders_unavailable(true);
        h.gateway.push_status_code(1).await;

        let response = h.service.verify_payment("TRACK-1").await.unwrap();

        assert_eq!(response.status, SdkPaymentStatus::Completed);
        assert_eq!(h.repo.order_count().await, 0);
        assert_eq!(h.repo.payments().await[0].status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_verify_succeeds_when_line_total_overflows() {
        let h = harness();
        let mut payment = new_payment();
        payment.cart_items[0].price =
            Decimal::from_str_exact("50000000000000000000000000000").unwrap();
        payment.cart_items[0].quantity = 2;
        h.repo
            .seed_payment(payment, "TRACK-1", PaymentStatus::Pending)
            .await;
        h.gateway.push_status_code(1).await;

        let response = h.service.verify_payment("TRACK-1").await.unwrap();

        assert_eq!(response.status, SdkPaymentStatus::Completed);
        assert_eq!(h.repo.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_verify_does_not_regress_terminal_payment() {
        let h = harness();
        h.repo
            .seed_payment(new_payment(), "TRACK-1", PaymentStatus::Completed)
            .await;
        h.gateway.push_status_code(2).await;

        let response = h.service.verify_payment("TRACK-1").await.unwrap();

        assert_eq!(response.status, SdkPaymentStatus::Completed);
        assert_eq!(h.repo.status_update_count(), 0);
    }

    #[tokio::test]
    async fn test_verify_records_chargeback() {
        let h = harness();
        h.repo
            .seed_payment(new_payment(), "TRACK-1", PaymentStatus::Completed)
            .await;
        h.gateway.push_status_code(3).await;

        let response = h.service.verify_payment("TRACK-1").await.unwrap();

        assert_eq!(response.status, SdkPaymentStatus::Reversed);
    }

    #[tokio::test]
    async fn test_ipn_twice_creates_one_order() {
        let h = harness();
        h.repo
            .seed_payment(new_payment(), "TRACK-1", PaymentStatus::Pending)
            .await;
        h.gateway.push_status_code(1).await;
        h.gateway.push_status_code(1).await;

        let first = h.service.process_ipn(&notification("TRACK-1")).await;
        let second = h.service.process_ipn(&notification("TRACK-1")).await;

        assert_eq!(first, IpnOutcome::Updated(PaymentStatus::Completed));
        assert_eq!(second, IpnOutcome::SkippedTerminal(PaymentStatus::Completed));
        assert_eq!(h.gateway.status_calls(), 1);
        assert_eq!(h.repo.status_update_count(), 1);
        assert_eq!(h.repo.order_count().await, 1);
        assert!(h.service.ledger().is_processed(LedgerEvent::Ipn, "TRACK-1").await);
    }

    #[tokio::test]
    async fn test_ipn_completes_payment_when_order_creation_fails() {
        let h = harness();
        h.repo
            .seed_payment(new_payment(), "TRACK-1", PaymentStatus::Pending)
            .await;
        h.repo.set_orders_unavailable(true);
        h.gateway.push_status_code(1).await;

        let outcome = h.service.process_ipn(&notification("TRACK-1")).await;

        assert_eq!(outcome, IpnOutcome::Updated(PaymentStatus::Completed));
        assert_eq!(h.repo.order_count().await, 0);
        assert_eq!(h.repo.payments().await[0].status, PaymentStatus::Completed);
    }

    /// Counts reads so tests can assert which paths consult the ledger.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryIdempotencyStore,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl IdempotencyStore for CountingStore {
        async fn contains(&self, key: &str) -> Result<bool, LedgerError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.contains(key).await
        }

        async fn insert(&self, key: &str, ttl: Duration) -> Result<(), LedgerError> {
            self.inner.insert(key, ttl).await
        }

        async fn purge_expired(&self) -> Result<u64, LedgerError> {
            self.inner.purge_expired().await
        }
    }

    #[tokio::test]
    async fn test_ipn_does_not_read_ledger() {
        let store = Arc::new(CountingStore::default());
        let ledger = IdempotencyLedger::new(store.clone(), Duration::from_secs(300));
        let h = harness_with_ledger(checkout_config(), ledger);
        h.repo
            .seed_payment(new_payment(), "TRACK-1", PaymentStatus::Pending)
            .await;
        h.gateway.push_status_code(2).await;
        h.gateway.push_status_code(2).await;

        h.service.process_ipn(&notification("TRACK-1")).await;
        h.service.process_ipn(&notification("TRACK-1")).await;

        assert_eq!(store.reads.load(Ordering::SeqCst), 0);
        assert_eq!(h.gateway.status_calls(), 1);
    }

    #[tokio::test]
    async fn test_ipn_for_completed_payment_skips_gateway() {
        let h = harness();
        h.repo
            .seed_payment(new_payment(), "TRACK-1", PaymentStatus::Completed)
            .await;

        let outcome = h.service.process_ipn(&notification("TRACK-1")).await;

        assert_eq!(outcome, IpnOutcome::SkippedTerminal(PaymentStatus::Completed));
        assert_eq!(h.gateway.status_calls(), 0);
    }

    #[tokio::test]
    async fn test_ipn_gateway_rejection_aborts() {
        let h = harness();
        h.repo
            .seed_payment(new_payment(), "TRACK-1", PaymentStatus::Pending)
            .await;
        h.gateway
            .push_status(Ok(GatewayReply::Rejected(rejection("400", "Invalid tracking"))))
            .await;

        let outcome = h.service.process_ipn(&notification("TRACK-1")).await;

        assert_eq!(outcome, IpnOutcome::GatewayRejected);
        assert_eq!(h.repo.status_update_count(), 0);
        assert!(!h.service.ledger().is_processed(LedgerEvent::Ipn, "TRACK-1").await);
    }

    #[tokio::test]
    async fn test_ipn_unknown_tracking_id() {
        let h = harness();
        h.gateway.push_status_code(1).await;

        let outcome = h.service.process_ipn(&notification("MISSING")).await;

        assert_eq!(outcome, IpnOutcome::RecordMissing);
        assert_eq!(h.repo.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_ipn_transport_failure_is_swallowed() {
        let h = harness();
        h.repo
            .seed_payment(new_payment(), "TRACK-1", PaymentStatus::Pending)
            .await;

        let outcome = h.service.process_ipn(&notification("TRACK-1")).await;

        assert_eq!(outcome, IpnOutcome::Failed);
        assert_eq!(h.gateway.status_calls(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_verify_and_ipn_race_create_one_order() {
        let h = harness();
        h.repo
            .seed_payment(new_payment(), "TRACK-1", PaymentStatus::Pending)
            .await;
        h.gateway.push_status_code(1).await;
        h.gateway.push_status_code(1).await;

        let service = Arc::new(h.service);
        let verify = {
            let service = service.clone();
            tokio::spawn(async move { service.verify_payment("TRACK-1").await })
        };
        let ipn = {
            let service = service.clone();
            tokio::spawn(async move { service.process_ipn(&notification("TRACK-1")).await })
        };

        let verified = verify.await.unwrap().unwrap();
        let _ = ipn.await.unwrap();

        assert_eq!(verified.status, SdkPaymentStatus::Completed);
        assert_eq!(h.repo.order_count().await, 1);
    }

    #[test]
    fn test_status_description_prefers_description() {
        let mut transaction = status_with_code(1);
        transaction.description = Some("Payment completed".to_string());
        assert_eq!(
            status_update(&transaction).status_description.as_deref(),
            Some("Payment completed")
        );

        transaction.description = Some(String::new());
        assert_eq!(
            status_update(&transaction).status_description.as_deref(),
            Some("Gateway description")
        );
    }
}
