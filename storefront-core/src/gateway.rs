//! Gateway seam used by the payment services.

use async_trait::async_trait;
use storefront_sdk::pesapal::{
    GatewayError, GatewayReply, PesapalClient, SubmitOrderRequest, SubmitOrderResponse,
    TransactionStatus,
};

/// The subset of the Pesapal API the checkout flow depends on.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn submit_order(
        &self,
        order: &SubmitOrderRequest,
    ) -> Result<GatewayReply<SubmitOrderResponse>, GatewayError>;

    async fn get_transaction_status(
        &self,
        tracking_id: &str,
    ) -> Result<GatewayReply<TransactionStatus>, GatewayError>;
}

#[async_trait]
impl PaymentGateway for PesapalClient {
    async fn submit_order(
        &self,
        order: &SubmitOrderRequest,
    ) -> Result<GatewayReply<SubmitOrderResponse>, GatewayError> {
        PesapalClient::submit_order(self, order).await
    }

    async fn get_transaction_status(
        &self,
        tracking_id: &str,
    ) -> Result<GatewayReply<TransactionStatus>, GatewayError> {
        PesapalClient::get_transaction_status(self, tracking_id).await
    }
}
