//! Gateway administration subcommands.
//!
//! One-shot calls against the Pesapal API using the configured credentials.
//! Results are printed to stdout as JSON.

use anyhow::bail;
use clap::{Subcommand, ValueEnum};
use rust_decimal::Decimal;
use serde::Serialize;
use storefront_sdk::pesapal::{
    CancelOrderRequest, GatewayReply, IpnNotificationKind, PesapalClient, RefundRequest,
    RegisterIpnRequest,
};
use url::Url;

#[derive(Subcommand, Debug)]
pub enum AdminCommand {
    /// Register an IPN URL and print the assigned IPN id
    RegisterIpn {
        /// Publicly reachable IPN endpoint
        #[arg(long)]
        url: Url,
        /// How Pesapal should deliver notifications
        #[arg(long, value_enum, default_value_t = NotificationType::Get)]
        notification_type: NotificationType,
    },
    /// List IPN URLs registered for these credentials
    ListIpns,
    /// Request a refund for a completed payment
    Refund {
        #[arg(long)]
        confirmation_code: String,
        #[arg(long)]
        amount: Decimal,
        #[arg(long)]
        username: String,
        #[arg(long)]
        remarks: String,
    },
    /// Cancel a payment that has not been completed
    Cancel {
        #[arg(long)]
        tracking_id: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationType {
    Get,
    Post,
}

impl From<NotificationType> for IpnNotificationKind {
    fn from(value: NotificationType) -> Self {
        match value {
            NotificationType::Get => IpnNotificationKind::Get,
            NotificationType::Post => IpnNotificationKind::Post,
        }
    }
}

/// Run an administration command.
pub async fn run(command: AdminCommand, client: &PesapalClient) -> anyhow::Result<()> {
    let output = match command {
        AdminCommand::RegisterIpn {
            url,
            notification_type,
        } => {
            let request = RegisterIpnRequest {
                url: url.to_string(),
                ipn_notification_type: notification_type.into(),
            };
            render(client.register_ipn(&request).await?)?
        }
        AdminCommand::ListIpns => render(client.list_ipns().await?)?,
        AdminCommand::Refund {
            confirmation_code,
            amount,
            username,
            remarks,
        } => {
            if amount <= Decimal::ZERO {
                bail!("refund amount must be greater than zero");
            }
            let request = RefundRequest {
                confirmation_code,
                amount,
                username,
                remarks,
            };
            render(client.request_refund(&request).await?)?
        }
        AdminCommand::Cancel { tracking_id } => {
            let request = CancelOrderRequest {
                order_tracking_id: tracking_id,
            };
            render(client.cancel_order(&request).await?)?
        }
    };
    println!("{output}");
    Ok(())
}

/// Pretty JSON of an accepted reply; a rejection becomes an error.
fn render<T: Serialize>(reply: GatewayReply<T>) -> anyhow::Result<String> {
    match reply {
        GatewayReply::Accepted(value) => Ok(serde_json::to_string_pretty(&value)?),
        GatewayReply::Rejected(error) => bail!("Pesapal rejected the request: {error}"),
    }
}
