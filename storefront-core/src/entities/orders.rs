use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use rust_decimal::Decimal;
use sqlx::types::Json;
use storefront_sdk::objects::DeliveryAddress;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE", type_name = "order_status")]
pub enum OrderStatus {
    Completed,
    Shipped,
    Delivered,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Order {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub total_amount: Decimal,
    pub currency: String,
    pub shipping_address: Json<DeliveryAddress>,
    pub billing_address: Json<DeliveryAddress>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub status: OrderStatus,
    pub created_at: time::PrimitiveDateTime,
    #[sqlx(skip)]
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: Uuid,
    pub product_id: String,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub payment_id: Uuid,
    pub total_amount: Decimal,
    pub currency: String,
    pub shipping_address: DeliveryAddress,
    pub billing_address: DeliveryAddress,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderItem {
    pub product_id: String,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Clone)]
/// Fetch the order created for a payment, with its items.
pub struct GetOrderByPaymentId {
    pub payment_id: Uuid,
}

impl Processor<GetOrderByPaymentId> for DatabaseProcessor {
    type Output = Option<Order>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetOrderByPaymentId")]
    async fn process(&self, query: GetOrderByPaymentId) -> Result<Option<Order>, sqlx::Error> {
        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE payment_id = $1")
            .bind(query.payment_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(mut order) = order else {
            return Ok(None);
        };
        order.items = sqlx::query_as::<_, OrderItem>(
            "SELECT * FROM order_items WHERE order_id = $1 ORDER BY id",
        )
        .bind(order.id)
        .fetch_all(&self.pool)
        .await?;
        Ok(Some(order))
    }
}

#[derive(Debug, Clone)]
/// Insert an order and its items in one transaction.
///
/// Fails with a unique violation when the payment already has an order.
pub struct InsertOrderWithItems {
    pub order: NewOrder,
    pub items: Vec<NewOrderItem>,
}

impl Processor<InsertOrderWithItems> for DatabaseProcessor {
    type Output = Order;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertOrderWithItems")]
    async fn process(&self, insert: InsertOrderWithItems) -> Result<Order, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut order = Order::insert_tx(&mut tx, insert.order).await?;
        for item in insert.items {
            let item = OrderItem::insert_tx(&mut tx, order.id, item).await?;
            order.items.push(item);
        }
        tx.commit().await?;
        Ok(order)
    }
}

impl Order {
    /// Insert the order row within a transaction.
    pub async fn insert_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        order: NewOrder,
    ) -> Result<Order, sqlx::Error> {
        sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (
                id, payment_id, total_amount, currency, shipping_address,
                billing_address, customer_email, customer_phone, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'COMPLETED')
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(order.payment_id)
        .bind(order.total_amount)
        .bind(order.currency)
        .bind(Json(order.shipping_address))
        .bind(Json(order.billing_address))
        .bind(order.customer_email)
        .bind(order.customer_phone)
        .fetch_one(&mut **tx)
        .await
    }
}

impl OrderItem {
    /// Insert one order line within a transaction.
    pub async fn insert_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        order_id: Uuid,
        item: NewOrderItem,
    ) -> Result<OrderItem, sqlx::Error> {
        sqlx::query_as::<_, OrderItem>(
            r#"
            INSERT INTO order_items (order_id, product_id, product_name, quantity, unit_price, line_total)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(order_id)
        .bind(item.product_id)
        .bind(item.product_name)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.line_total)
        .fetch_one(&mut **tx)
        .await
    }
}
