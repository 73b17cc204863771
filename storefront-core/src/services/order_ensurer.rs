//! Exactly-once order creation for completed payments.

use rust_decimal::Decimal;
use storefront_sdk::objects::CartItem;
use tracing::{debug, info};

use crate::entities::{NewOrder, NewOrderItem, Order, Payment};
use crate::repository::{CreateOrderError, PaymentRepository, RepositoryError};

/// Result of [`ensure_order_for_completed_payment`].
#[derive(Debug, Clone, PartialEq)]
pub struct EnsuredOrder {
    /// `true` when the order was created by an earlier call or a racing
    /// writer rather than this one.
    pub existed: bool,
    pub order: Order,
}

/// Make sure `payment` has exactly one order.
///
/// Returns the existing order if there is one. Otherwise creates the order
/// from the payment's snapshot; if a concurrent writer wins the unique
/// insert, the winner's order is returned instead.
pub async fn ensure_order_for_completed_payment(
    repo: &dyn PaymentRepository,
    payment: &Payment,
) -> Result<EnsuredOrder, RepositoryError> {
    if let Some(order) = repo.find_order_by_payment_id(payment.id).await? {
        info!(
            order_id = %order.id,
            payment_id = %payment.id,
            "Order already exists; skipping creation"
        );
        return Ok(EnsuredOrder {
            existed: true,
            order,
        });
    }

    info!(payment_id = %payment.id, "No existing order found, creating new order");
    let (order, items) = order_from_payment(payment)?;
    debug!(payment_id = %payment.id, items = items.len(), "Creating order with items");

    match repo.create_order_and_items_atomic(order, items).await {
        Ok(order) => {
            info!(order_id = %order.id, payment_id = %payment.id, "Successfully created order");
            Ok(EnsuredOrder {
                existed: false,
                order,
            })
        }
        Err(CreateOrderError::Duplicate(payment_id)) => {
            info!(%payment_id, "Lost order creation race; loading existing order");
            let order = repo
                .find_order_by_payment_id(payment_id)
                .await?
                .ok_or(RepositoryError::OrderMissing(payment_id))?;
            Ok(EnsuredOrder {
                existed: true,
                order,
            })
        }
        Err(CreateOrderError::Repository(e)) => Err(e),
    }
}

/// Build the order row and item snapshots for a payment.
fn order_from_payment(payment: &Payment) -> Result<(NewOrder, Vec<NewOrderItem>), RepositoryError> {
    // Payments only capture one address; it doubles as the billing address.
    let order = NewOrder {
        payment_id: payment.id,
        total_amount: payment.amount,
        currency: payment.currency.clone(),
        shipping_address: payment.delivery_address.0.clone(),
        billing_address: payment.delivery_address.0.clone(),
        customer_email: payment.customer_email.clone(),
        customer_phone: payment.customer_phone.clone(),
    };
    let items = payment
        .cart_items
        .0
        .iter()
        .map(|item| {
            let total = line_total(item).ok_or_else(|| RepositoryError::LineTotalOverflow {
                payment_id: payment.id,
                product_id: item.product_id.clone(),
            })?;
            Ok(NewOrderItem {
                product_id: item.product_id.clone(),
                product_name: item.name.clone(),
                quantity: i64::from(item.quantity),
                unit_price: item.price,
                line_total: total,
            })
        })
        .collect::<Result<Vec<_>, RepositoryError>>()?;
    Ok((order, items))
}

/// `price * quantity`, or `None` if it does not fit a `Decimal`.
pub(crate) fn line_total(item: &CartItem) -> Option<Decimal> {
    item.price.checked_mul(Decimal::from(item.quantity))
}
