pub mod orders;
pub mod payments;
pub mod processed_events;

pub use orders::{NewOrder, NewOrderItem, Order, OrderItem, OrderStatus};
pub use payments::{NewPayment, Payment, PaymentStatus, StatusUpdate};
