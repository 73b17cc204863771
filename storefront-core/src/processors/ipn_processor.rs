//! IpnProcessor processor.
//!
//! The IpnProcessor is responsible for:
//! - Receiving `IpnReceived` events queued by the webhook handler
//! - Running each notification through [`PaymentService::process_ipn`] in its
//!   own task, inside a span carrying the originating request id
//! - Waiting for in-flight notifications before shutting down

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span};

use crate::events::{IpnReceived, IpnReceivedReceiver};
use crate::services::{IpnOutcome, PaymentService};

/// IpnProcessor handles IPN notifications after they were acknowledged.
pub struct IpnProcessor {
    service: Arc<PaymentService>,
    ipn_rx: IpnReceivedReceiver,
    shutdown_rx: watch::Receiver<bool>,
}

impl IpnProcessor {
    pub fn new(
        service: Arc<PaymentService>,
        ipn_rx: IpnReceivedReceiver,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            service,
            ipn_rx,
            shutdown_rx,
        }
    }

    /// Run the IpnProcessor until shutdown or until every sender is dropped.
    pub async fn run(mut self) {
        info!("IpnProcessor started");
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                Ok(()) = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("IpnProcessor received shutdown signal");
                        break;
                    }
                }

                Some(event) = self.ipn_rx.recv() => {
                    in_flight.spawn(handle_event(self.service.clone(), event));
                }

                // Reap finished tasks so the set does not grow unbounded.
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_join(joined);
                }

                else => {
                    info!("IpnReceived channel closed");
                    break;
                }
            }
        }

        if !in_flight.is_empty() {
            info!(in_flight = in_flight.len(), "Waiting for in-flight IPN tasks");
        }
        while let Some(joined) = in_flight.join_next().await {
            log_join(joined);
        }

        info!("IpnProcessor shutdown complete");
    }
}

async fn handle_event(service: Arc<PaymentService>, event: IpnReceived) -> IpnOutcome {
    let span = info_span!(
        "ipn",
        request_id = %event.request_id,
        tracking_id = %event.notification.tracking_id,
    );
    async move {
        let outcome = service.process_ipn(&event.notification).await;
        debug!(?outcome, "IPN processed");
        outcome
    }
    .instrument(span)
    .await
}

fn log_join(joined: Result<IpnOutcome, tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "IPN task panicked or was cancelled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CheckoutConfig, ConfigStore};
    use crate::entities::{NewPayment, PaymentStatus};
    use crate::events::ipn_received_channel;
    use crate::idempotency::IdempotencyLedger;
    use crate::testing::{MemoryPaymentRepository, ScriptedGateway};
    use rust_decimal::Decimal;
    use storefront_sdk::objects::{CartItem, DeliveryAddress, IpnNotification};

    fn new_payment(reference: &str) -> NewPayment {
        NewPayment {
            merchant_reference: reference.to_string(),
            amount: Decimal::new(500, 0),
            currency: "KES".to_string(),
            description: "Tea".to_string(),
            customer_email: None,
            customer_phone: Some("+254700000000".to_string()),
            delivery_address: DeliveryAddress {
                phone_number: Some("+254700000000".to_string()),
                ..Default::default()
            },
            cart_items: vec![CartItem {
                product_id: "tea".to_string(),
                name: "Tea".to_string(),
                price: Decimal::new(500, 0),
                quantity: 1,
            }],
            ipn_id_used: None,
            callback_url_used: None,
        }
    }

    fn event(tracking_id: &str) -> IpnReceived {
        IpnReceived {
            notification: IpnNotification {
                tracking_id: tracking_id.to_string(),
                merchant_reference: "ORDER-1".to_string(),
                notification_type: "IPNCHANGE".to_string(),
            },
            request_id: "req-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_processes_queued_events_before_exit() {
        let repo = Arc::new(MemoryPaymentRepository::new());
        let gateway = Arc::new(ScriptedGateway::new());
        repo.seed_payment(new_payment("ORDER-1"), "TRACK-1", PaymentStatus::Pending)
            .await;
        repo.seed_payment(new_payment("ORDER-2"), "TRACK-2", PaymentStatus::Pending)
            .await;
        gateway.push_status_code(1).await;
        gateway.push_status_code(1).await;

        let service = Arc::new(PaymentService::new(
            repo.clone(),
            gateway.clone(),
            IdempotencyLedger::in_memory(),
            ConfigStore::new(CheckoutConfig::default()),
        ));
        let (tx, rx) = ipn_received_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let processor = IpnProcessor::new(service, rx, shutdown_rx);

        tx.send(event("TRACK-1")).await.unwrap();
        tx.send(event("TRACK-2")).await.unwrap();
        drop(tx);
        processor.run().await;

        let payments = repo.payments().await;
        assert!(payments.iter().all(|p| p.status == PaymentStatus::Completed));
        assert_eq!(gateway.status_calls(), 2);
        assert_eq!(repo.order_count().await, 2);
    }

    #[tokio::test]
    async fn test_stops_on_shutdown_signal() {
        let service = Arc::new(PaymentService::new(
            Arc::new(MemoryPaymentRepository::new()),
            Arc::new(ScriptedGateway::new()),
            IdempotencyLedger::in_memory(),
            ConfigStore::new(CheckoutConfig::default()),
        ));
        let (_tx, rx) = ipn_received_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(IpnProcessor::new(service, rx, shutdown_rx).run());

        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
