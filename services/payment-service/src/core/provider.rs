// /shop-platform/services/payment-service/src/core/provider.rs

use std::collections::HashMap;
use uuid::Uuid;

use super::momo::MomoProvider;
use crate::{
    models::{Payment, PaymentStatus, RefundStatus},
    utils::error::{AppError, AppResult},
};

pub const MOMO: &str = "MOMO";

/// Payment intent handed to a gateway
#[derive(Debug, Clone)]
pub struct PaymentData {
    pub order_id: Uuid,
    /// Integer minor units
    pub amount: i64,
    pub order_info: String,
    pub redirect_url: String,
    pub ipn_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatePaymentResult {
    pub pay_url: String,
    /// Order reference the gateway knows this attempt by
    pub provider_order_ref: String,
}

/// Verified callback mapped to a payment outcome
#[derive(Debug, Clone, PartialEq)]
pub struct IpnOutcome {
    pub order_id: Uuid,
    pub provider_order_ref: String,
    pub amount: i64,
    pub provider_txn_id: String,
    pub status: PaymentStatus,
    pub result_code: i64,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct RefundData {
    pub order_ref: String,
    pub amount: i64,
    pub provider_txn_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundResult {
    pub provider_refund_id: String,
    pub status: RefundStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentStatusResult {
    /// SUCCESS / FAILED when the gateway reports a final outcome,
    /// PROCESSING while the customer has not finished
    pub status: PaymentStatus,
    pub provider_txn_id: Option<String>,
    pub result_code: i64,
}

/// Closed set of supported gateways
#[derive(Clone)]
pub enum PaymentGateway {
    Momo(MomoProvider),
}

impl PaymentGateway {
    pub fn name(&self) -> &'static str {
        match self {
            PaymentGateway::Momo(_) => MOMO,
        }
    }

    pub async fn create_payment(&self, data: &PaymentData) -> AppResult<CreatePaymentResult> {
        match self {
            PaymentGateway::Momo(p) => p.create_payment(data).await,
        }
    }

    pub fn handle_ipn(&self, body: &[u8]) -> AppResult<IpnOutcome> {
        match self {
            PaymentGateway::Momo(p) => p.handle_ipn(body),
        }
    }

    pub async fn refund(&self, data: &RefundData) -> AppResult<RefundResult> {
        match self {
            PaymentGateway::Momo(p) => p.refund(data).await,
        }
    }

    pub async fn get_payment_status(&self, payment: &Payment) -> AppResult<PaymentStatusResult> {
        match self {
            PaymentGateway::Momo(p) => p.get_payment_status(payment).await,
        }
    }
}

/// Name → gateway lookup. Names are case-insensitive.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    gateways: HashMap<String, PaymentGateway>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, gateway: PaymentGateway) -> Self {
        self.register(gateway);
        self
    }

    pub fn register(&mut self, gateway: PaymentGateway) {
        self.gateways.insert(gateway.name().to_string(), gateway);
    }

    pub fn get(&self, name: &str) -> AppResult<&PaymentGateway> {
        self.gateways
            .get(&name.to_ascii_uppercase())
            .ok_or_else(|| AppError::ProviderNotFound(name.to_string()))
    }
}
