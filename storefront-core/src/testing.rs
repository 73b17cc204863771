//! In-memory doubles for service and router tests.
//!
//! Enabled for this crate's own tests and, for downstream crates, through
//! the `testing` feature.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use sqlx::types::Json;
use storefront_sdk::pesapal::{
    ApiError, GatewayError, GatewayReply, SubmitOrderRequest, SubmitOrderResponse,
    TransactionStatus,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::entities::{
    NewOrder, NewOrderItem, NewPayment, Order, OrderItem, OrderStatus, Payment, PaymentStatus,
    StatusUpdate,
};
use crate::gateway::PaymentGateway;
use crate::repository::{CreateOrderError, PaymentRepository, RepositoryError};

fn now() -> time::PrimitiveDateTime {
    let now = time::OffsetDateTime::now_utc();
    time::PrimitiveDateTime::new(now.date(), now.time())
}

#[derive(Debug, Default)]
struct MemoryState {
    payments: HashMap<Uuid, Payment>,
    orders: HashMap<Uuid, Order>,
    next_item_id: i64,
}

/// [`PaymentRepository`] over a mutex-guarded map.
///
/// Applies the same transition rule and unique constraint as the
/// PostgreSQL implementation.
#[derive(Debug, Default)]
pub struct MemoryPaymentRepository {
    state: Mutex<MemoryState>,
    status_updates: AtomicUsize,
    unavailable: AtomicBool,
    orders_unavailable: AtomicBool,
}

impl MemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a database error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make only order lookups and inserts fail; payments keep working.
    pub fn set_orders_unavailable(&self, unavailable: bool) {
        self.orders_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `update_payment_status` calls that changed a row.
    pub fn status_update_count(&self) -> usize {
        self.status_updates.load(Ordering::SeqCst)
    }

    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    pub async fn payments(&self) -> Vec<Payment> {
        self.state.lock().await.payments.values().cloned().collect()
    }

    /// Insert a payment that already carries a tracking id and status.
    pub async fn seed_payment(
        &self,
        payment: NewPayment,
        tracking_id: &str,
        status: PaymentStatus,
    ) -> Payment {
        let mut payment = build_payment(payment);
        payment.pesapal_tracking_id = Some(tracking_id.to_string());
        payment.status = status;
        self.state
            .lock()
            .await
            .payments
            .insert(payment.id, payment.clone());
        payment
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn check_orders_available(&self) -> Result<(), RepositoryError> {
        self.check_available()?;
        if self.orders_unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

fn build_payment(payment: NewPayment) -> Payment {
    let now = now();
    Payment {
        id: Uuid::now_v7(),
        merchant_reference: payment.merchant_reference,
        pesapal_tracking_id: None,
        amount: payment.amount,
        currency: payment.currency,
        description: payment.description,
        customer_email: payment.customer_email,
        customer_phone: payment.customer_phone,
        delivery_address: Json(payment.delivery_address),
        cart_items: Json(payment.cart_items),
        status: PaymentStatus::Pending,
        pesapal_status_description: None,
        pesapal_confirmation_code: None,
        payment_method: None,
        ipn_id_used: payment.ipn_id_used,
        callback_url_used: payment.callback_url_used,
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl PaymentRepository for MemoryPaymentRepository {
    async fn create_pending_payment(&self, payment: NewPayment) -> Result<Payment, RepositoryError> {
        self.check_available()?;
        let payment = build_payment(payment);
        self.state
            .lock()
            .await
            .payments
            .insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn update_payment_tracking_id(
        &self,
        payment_id: Uuid,
        tracking_id: &str,
    ) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let payment = state
            .payments
            .get_mut(&payment_id)
            .ok_or(RepositoryError::PaymentNotFound(payment_id))?;
        payment.pesapal_tracking_id = Some(tracking_id.to_string());
        payment.updated_at = now();
        Ok(())
    }

    async fn update_payment_status(
        &self,
        tracking_id: &str,
        update: StatusUpdate,
    ) -> Result<Option<Payment>, RepositoryError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let Some(payment) = state
            .payments
            .values_mut()
            .find(|p| p.pesapal_tracking_id.as_deref() == Some(tracking_id))
        else {
            return Ok(None);
        };
        if !payment.status.can_transition_to(update.status) {
            return Ok(Some(payment.clone()));
        }
        payment.status = update.status;
        if update.payment_method.is_some() {
            payment.payment_method = update.payment_method;
        }
        if update.confirmation_code.is_some() {
            payment.pesapal_confirmation_code = update.confirmation_code;
        }
        if update.status_description.is_some() {
            payment.pesapal_status_description = update.status_description;
        }
        payment.updated_at = now();
        self.status_updates.fetch_add(1, Ordering::SeqCst);
        Ok(Some(payment.clone()))
    }

    async fn get_payment_by_tracking_id(
        &self,
        tracking_id: &str,
    ) -> Result<Option<Payment>, RepositoryError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .payments
            .values()
            .find(|p| p.pesapal_tracking_id.as_deref() == Some(tracking_id))
            .cloned())
    }

    async fn find_order_by_payment_id(
        &self,
        payment_id: Uuid,
    ) -> Result<Option<Order>, RepositoryError> {
        self.check_orders_available()?;
        Ok(self.state.lock().await.orders.get(&payment_id).cloned())
    }

    async fn create_order_and_items_atomic(
        &self,
        order: NewOrder,
        items: Vec<NewOrderItem>,
    ) -> Result<Order, CreateOrderError> {
        self.check_orders_available()?;
        let mut state = self.state.lock().await;
        if state.orders.contains_key(&order.payment_id) {
            return Err(CreateOrderError::Duplicate(order.payment_id));
        }
        let order_id = Uuid::now_v7();
        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            state.next_item_id += 1;
            lines.push(OrderItem {
                id: state.next_item_id,
                order_id,
                product_id: item.product_id,
                product_name: item.product_name,
                quantity: item.quantity,
                unit_price: item.unit_price,
                line_total: item.line_total,
            });
        }
        let order = Order {
            id: order_id,
            payment_id: order.payment_id,
            total_amount: order.total_amount,
            currency: order.currency,
            shipping_address: Json(order.shipping_address),
            billing_address: Json(order.billing_address),
            customer_email: order.customer_email,
            customer_phone: order.customer_phone,
            status: OrderStatus::Completed,
            created_at: now(),
            items: lines,
        };
        state.orders.insert(order.payment_id, order.clone());
        Ok(order)
    }
}

/// [`PaymentGateway`] that replays queued replies and counts calls.
///
/// An empty queue answers with a transport error.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    submit_replies: Mutex<VecDeque<Result<GatewayReply<SubmitOrderResponse>, GatewayError>>>,
    status_replies: Mutex<VecDeque<Result<GatewayReply<TransactionStatus>, GatewayError>>>,
    submitted: Mutex<Vec<SubmitOrderRequest>>,
    submit_calls: AtomicUsize,
    status_calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_submit(&self, reply: Result<GatewayReply<SubmitOrderResponse>, GatewayError>) {
        self.submit_replies.lock().await.push_back(reply);
    }

    pub async fn push_status(&self, reply: Result<GatewayReply<TransactionStatus>, GatewayError>) {
        self.status_replies.lock().await.push_back(reply);
    }

    /// Queue an accepted status reply carrying `status_code`.
    pub async fn push_status_code(&self, status_code: i64) {
        self.push_status(Ok(GatewayReply::Accepted(status_with_code(status_code))))
            .await;
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub async fn submitted_orders(&self) -> Vec<SubmitOrderRequest> {
        self.submitted.lock().await.clone()
    }
}

/// An accepted transaction status with plausible metadata.
pub fn status_with_code(status_code: i64) -> TransactionStatus {
    TransactionStatus {
        payment_method: Some("Visa".to_string()),
        confirmation_code: Some(format!("CONF-{status_code}")),
        payment_status_description: Some("Gateway description".to_string()),
        status_code: Some(status_code),
        status: Some("200".to_string()),
        ..Default::default()
    }
}

/// A business rejection as Pesapal sends it.
pub fn rejection(code: &str, message: &str) -> ApiError {
    ApiError {
        error_type: Some("api_error".to_string()),
        code: Some(code.to_string()),
        message: Some(message.to_string()),
    }
}

/// A transport-level failure.
pub fn transport_error() -> GatewayError {
    GatewayError::Status {
        endpoint: "Transactions/GetTransactionStatus",
        status: 503,
        body: "service unavailable".to_string(),
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn submit_order(
        &self,
        order: &SubmitOrderRequest,
    ) -> Result<GatewayReply<SubmitOrderResponse>, GatewayError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.submitted.lock().await.push(order.clone());
        self.submit_replies
            .lock()
            .await
            .pop_front()
            .unwrap_or(Err(GatewayError::Malformed {
                endpoint: "Transactions/SubmitOrderRequest",
                reason: "no scripted reply",
            }))
    }

    async fn get_transaction_status(
        &self,
        _tracking_id: &str,
    ) -> Result<GatewayReply<TransactionStatus>, GatewayError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.status_replies
            .lock()
            .await
            .pop_front()
            .unwrap_or(Err(GatewayError::Malformed {
                endpoint: "Transactions/GetTransactionStatus",
                reason: "no scripted reply",
            }))
    }
}
