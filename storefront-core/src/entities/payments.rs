use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use rust_decimal::Decimal;
use sqlx::types::Json;
use storefront_sdk::objects::{CartItem, DeliveryAddress, PaymentStatus as SdkPaymentStatus};
use uuid::Uuid;

/// Payment status for database operations.
///
/// This is the sqlx::Type version. For API/DTO use, see
/// `storefront_sdk::objects::PaymentStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE", type_name = "payment_status")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Reversed,
    Invalid,
}

impl PaymentStatus {
    /// Map a Pesapal `status_code` to a payment status.
    ///
    /// Unknown and absent codes leave the payment pending.
    pub fn from_gateway_code(code: Option<i64>) -> Self {
        match code {
            Some(0) => PaymentStatus::Invalid,
            Some(1) => PaymentStatus::Completed,
            Some(2) => PaymentStatus::Failed,
            Some(3) => PaymentStatus::Reversed,
            _ => PaymentStatus::Pending,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// Whether a stored payment in this status accepts `next`.
    ///
    /// Pending accepts anything. A terminal status only accepts itself, plus
    /// the chargeback edge from completed to reversed.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        self == PaymentStatus::Pending
            || self == next
            || (self == PaymentStatus::Completed && next == PaymentStatus::Reversed)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", SdkPaymentStatus::from(*self))
    }
}

impl From<PaymentStatus> for SdkPaymentStatus {
    fn from(value: PaymentStatus) -> Self {
        match value {
            PaymentStatus::Pending => SdkPaymentStatus::Pending,
            PaymentStatus::Completed => SdkPaymentStatus::Completed,
            PaymentStatus::Failed => SdkPaymentStatus::Failed,
            PaymentStatus::Reversed => SdkPaymentStatus::Reversed,
            PaymentStatus::Invalid => SdkPaymentStatus::Invalid,
        }
    }
}

impl From<SdkPaymentStatus> for PaymentStatus {
    fn from(value: SdkPaymentStatus) -> Self {
        match value {
            SdkPaymentStatus::Pending => PaymentStatus::Pending,
            SdkPaymentStatus::Completed => PaymentStatus::Completed,
            SdkPaymentStatus::Failed => PaymentStatus::Failed,
            SdkPaymentStatus::Reversed => PaymentStatus::Reversed,
            SdkPaymentStatus::Invalid => PaymentStatus::Invalid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub merchant_reference: String,
    pub pesapal_tracking_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub delivery_address: Json<DeliveryAddress>,
    pub cart_items: Json<Vec<CartItem>>,
    pub status: PaymentStatus,
    pub pesapal_status_description: Option<String>,
    pub pesapal_confirmation_code: Option<String>,
    pub payment_method: Option<String>,
    pub ipn_id_used: Option<String>,
    pub callback_url_used: Option<String>,
    pub created_at: time::PrimitiveDateTime,
    pub updated_at: time::PrimitiveDateTime,
}

/// A payment about to be submitted to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub merchant_reference: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub delivery_address: DeliveryAddress,
    pub cart_items: Vec<CartItem>,
    pub ipn_id_used: Option<String>,
    pub callback_url_used: Option<String>,
}

/// Status and gateway metadata reported for a tracking id.
///
/// `None` fields keep whatever is already stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: PaymentStatus,
    pub payment_method: Option<String>,
    pub confirmation_code: Option<String>,
    pub status_description: Option<String>,
}

#[derive(Debug, Clone)]
/// Insert a payment in the pending state.
pub struct InsertPendingPayment {
    pub payment: NewPayment,
}

impl Processor<InsertPendingPayment> for DatabaseProcessor {
    type Output = Payment;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertPendingPayment")]
    async fn process(&self, insert: InsertPendingPayment) -> Result<Payment, sqlx::Error> {
        let p = insert.payment;
        sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (
                id, merchant_reference, amount, currency, description,
                customer_email, customer_phone, delivery_address, cart_items,
                status, ipn_id_used, callback_url_used
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'PENDING', $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(p.merchant_reference)
        .bind(p.amount)
        .bind(p.currency)
        .bind(p.description)
        .bind(p.customer_email)
        .bind(p.customer_phone)
        .bind(Json(p.delivery_address))
        .bind(Json(p.cart_items))
        .bind(p.ipn_id_used)
        .bind(p.callback_url_used)
        .fetch_one(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Attach the gateway tracking id to a payment. Returns the affected row count.
pub struct SetPaymentTrackingId {
    pub payment_id: Uuid,
    pub tracking_id: String,
}

impl Processor<SetPaymentTrackingId> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:SetPaymentTrackingId")]
    async fn process(&self, update: SetPaymentTrackingId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET pesapal_tracking_id = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(update.payment_id)
        .bind(update.tracking_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
pub struct GetPaymentByTrackingId {
    pub tracking_id: String,
}

impl Processor<GetPaymentByTrackingId> for DatabaseProcessor {
    type Output = Option<Payment>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetPaymentByTrackingId")]
    async fn process(&self, query: GetPaymentByTrackingId) -> Result<Option<Payment>, sqlx::Error> {
        sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE pesapal_tracking_id = $1")
            .bind(query.tracking_id)
            .fetch_optional(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Apply a status update if the stored status accepts it.
///
/// Returns the updated row, the unchanged row when the transition is
/// refused, or `None` when no payment carries the tracking id.
pub struct UpdatePaymentStatus {
    pub tracking_id: String,
    pub update: StatusUpdate,
}

impl Processor<UpdatePaymentStatus> for DatabaseProcessor {
    type Output = Option<Payment>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:UpdatePaymentStatus")]
    async fn process(&self, query: UpdatePaymentStatus) -> Result<Option<Payment>, sqlx::Error> {
        let update = query.update;
        // Mirrors PaymentStatus::can_transition_to in a single statement so
        // concurrent writers cannot regress a terminal payment.
        let updated = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET status = $2,
                payment_method = COALESCE($3, payment_method),
                pesapal_confirmation_code = COALESCE($4, pesapal_confirmation_code),
                pesapal_status_description = COALESCE($5, pesapal_status_description),
                updated_at = now()
            WHERE pesapal_tracking_id = $1
              AND (
                status = 'PENDING'
                OR status = $2
                OR (status = 'COMPLETED' AND $2 = 'REVERSED'::payment_status)
              )
            RETURNING *
            "#,
        )
        .bind(&query.tracking_id)
        .bind(update.status)
        .bind(update.payment_method)
        .bind(update.confirmation_code)
        .bind(update.status_description)
        .fetch_optional(&self.pool)
        .await?;

        if updated.is_some() {
            return Ok(updated);
        }

        let stored = self
            .process(GetPaymentByTrackingId {
                tracking_id: query.tracking_id,
            })
            .await?;
        if let Some(payment) = &stored {
            tracing::debug!(
                tracking_id = ?payment.pesapal_tracking_id,
                stored = %payment.status,
                requested = %update.status,
                "Refused status transition on terminal payment"
            );
        }
        Ok(stored)
    }
}
