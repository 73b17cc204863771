//! Persistence contract used by the payment services.
//!
//! [`PaymentRepository`] is the seam between orchestration and storage.
//! [`PgPaymentRepository`] implements it on top of the entity processors;
//! tests use the in-memory implementation from [`crate::testing`].

use async_trait::async_trait;
use kanau::processor::Processor;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::entities::orders::{GetOrderByPaymentId, InsertOrderWithItems};
use crate::entities::payments::{
    GetPaymentByTrackingId, InsertPendingPayment, SetPaymentTrackingId, UpdatePaymentStatus,
};
use crate::entities::{NewOrder, NewOrderItem, NewPayment, Order, Payment, StatusUpdate};
use crate::framework::DatabaseProcessor;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("payment not found: {0}")]
    PaymentNotFound(Uuid),

    /// The unique insert reported a duplicate but no order could be read back.
    #[error("order for payment {0} not found after duplicate insert")]
    OrderMissing(Uuid),

    /// A stored cart line whose price times quantity does not fit a decimal.
    #[error("line total overflows for product {product_id} of payment {payment_id}")]
    LineTotalOverflow { payment_id: Uuid, product_id: String },
}

/// Failure of the atomic order insert.
#[derive(Debug, Error)]
pub enum CreateOrderError {
    /// Another writer created the order for this payment first.
    #[error("order already exists for payment {0}")]
    Duplicate(Uuid),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn create_pending_payment(&self, payment: NewPayment) -> Result<Payment, RepositoryError>;

    async fn update_payment_tracking_id(
        &self,
        payment_id: Uuid,
        tracking_id: &str,
    ) -> Result<(), RepositoryError>;

    /// Apply `update` to the payment with this tracking id.
    ///
    /// Returns `None` when no payment matches. A refused transition returns
    /// the stored payment unchanged.
    async fn update_payment_status(
        &self,
        tracking_id: &str,
        update: StatusUpdate,
    ) -> Result<Option<Payment>, RepositoryError>;

    async fn get_payment_by_tracking_id(
        &self,
        tracking_id: &str,
    ) -> Result<Option<Payment>, RepositoryError>;

    async fn find_order_by_payment_id(
        &self,
        payment_id: Uuid,
    ) -> Result<Option<Order>, RepositoryError>;

    async fn create_order_and_items_atomic(
        &self,
        order: NewOrder,
        items: Vec<NewOrderItem>,
    ) -> Result<Order, CreateOrderError>;
}

/// PostgreSQL-backed [`PaymentRepository`].
#[derive(Debug, Clone)]
pub struct PgPaymentRepository {
    processor: DatabaseProcessor,
}

impl PgPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            processor: DatabaseProcessor { pool },
        }
    }
}

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    async fn create_pending_payment(&self, payment: NewPayment) -> Result<Payment, RepositoryError> {
        Ok(self
            .processor
            .process(InsertPendingPayment { payment })
            .await?)
    }

    async fn update_payment_tracking_id(
        &self,
        payment_id: Uuid,
        tracking_id: &str,
    ) -> Result<(), RepositoryError> {
        let rows = self
            .processor
            .process(SetPaymentTrackingId {
                payment_id,
                tracking_id: tracking_id.to_string(),
            })
            .await?;
        if rows == 0 {
            return Err(RepositoryError::PaymentNotFound(payment_id));
        }
        Ok(())
    }

    async fn update_payment_status(
        &self,
        tracking_id: &str,
        update: StatusUpdate,
    ) -> Result<Option<Payment>, RepositoryError> {
        Ok(self
            .processor
            .process(UpdatePaymentStatus {
                tracking_id: tracking_id.to_string(),
                update,
            })
            .await?)
    }

    async fn get_payment_by_tracking_id(
        &self,
        tracking_id: &str,
    ) -> Result<Option<Payment>, RepositoryError> {
        Ok(self
            .processor
            .process(GetPaymentByTrackingId {
                tracking_id: tracking_id.to_string(),
            })
            .await?)
    }

    async fn find_order_by_payment_id(
        &self,
        payment_id: Uuid,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .processor
            .process(GetOrderByPaymentId { payment_id })
            .await?)
    }

    async fn create_order_and_items_atomic(
        &self,
        order: NewOrder,
        items: Vec<NewOrderItem>,
    ) -> Result<Order, CreateOrderError> {
        let payment_id = order.payment_id;
        match self
            .processor
            .process(InsertOrderWithItems { order, items })
            .await
        {
            Ok(order) => Ok(order),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(CreateOrderError::Duplicate(payment_id))
            }
            Err(e) => Err(RepositoryError::Database(e).into()),
        }
    }
}
