// /shop-platform/services/payment-service/src/core/momo.rs

use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use super::provider::{
    CreatePaymentResult, IpnOutcome, PaymentData, PaymentStatusResult, RefundData, RefundResult,
};
use crate::{
    config::MomoConfig,
    models::{Payment, PaymentStatus, RefundStatus},
    utils::error::{AppError, AppResult},
};

type HmacSha256 = Hmac<Sha256>;

const REQUEST_TYPE: &str = "captureWallet";
const LANG: &str = "vi";

/// Gateway result codes meaning "customer has not finished yet"
const STILL_PROCESSING_CODES: [i64; 3] = [1000, 7000, 7002];
/// 10 = refund already accepted for this transaction
const REFUND_ACCEPTED_CODES: [i64; 2] = [0, 10];

// ========================= WIRE TYPES =========================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MomoCreatePaymentRequest {
    pub partner_code: String,
    pub request_id: String,
    pub amount: i64,
    pub order_id: String,
    pub order_info: String,
    pub redirect_url: String,
    pub ipn_url: String,
    pub request_type: String,
    pub extra_data: String,
    pub lang: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MomoCreatePaymentResponse {
    result_code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    pay_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MomoIpnRequest {
    pub partner_code: String,
    pub order_id: String,
    pub request_id: String,
    pub amount: i64,
    #[serde(default)]
    pub order_info: String,
    #[serde(default)]
    pub order_type: String,
    pub trans_id: i64,
    pub result_code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub pay_type: String,
    pub response_time: i64,
    #[serde(default)]
    pub extra_data: String,
    pub signature: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MomoRefundRequest {
    partner_code: String,
    order_id: String,
    request_id: String,
    amount: i64,
    trans_id: i64,
    lang: String,
    description: String,
    signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MomoRefundResponse {
    result_code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    trans_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MomoQueryRequest {
    partner_code: String,
    order_id: String,
    request_id: String,
    lang: String,
    signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MomoQueryResponse {
    result_code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    trans_id: Option<i64>,
}

// ========================= SIGNATURES =========================

/// Lower-case hex HMAC-SHA256
pub fn hmac_sha256_hex(secret: &str, raw: &str) -> AppResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Configuration(format!("invalid signing key: {}", e)))?;
    mac.update(raw.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Canonical string signed on payment creation
pub fn create_raw_signature(access_key: &str, req: &MomoCreatePaymentRequest) -> String {
    format!(
        "accessKey={}&amount={}&extraData={}&ipnUrl={}&orderId={}&orderInfo={}&partnerCode={}&redirectUrl={}&requestId={}&requestType={}",
        access_key,
        req.amount,
        req.extra_data,
        req.ipn_url,
        req.order_id,
        req.order_info,
        req.partner_code,
        req.redirect_url,
        req.request_id,
        req.request_type,
    )
}

/// Canonical string signed by the gateway on IPN callbacks
pub fn ipn_raw_signature(access_key: &str, ipn: &MomoIpnRequest) -> String {
    format!(
        "accessKey={}&amount={}&extraData={}&message={}&orderId={}&orderInfo={}&orderType={}&partnerCode={}&payType={}&requestId={}&responseTime={}&resultCode={}&transId={}",
        access_key,
        ipn.amount,
        ipn.extra_data,
        ipn.message,
        ipn.order_id,
        ipn.order_info,
        ipn.order_type,
        ipn.partner_code,
        ipn.pay_type,
        ipn.request_id,
        ipn.response_time,
        ipn.result_code,
        ipn.trans_id,
    )
}

fn refund_raw_signature(access_key: &str, req: &MomoRefundRequest) -> String {
    format!(
        "accessKey={}&amount={}&description={}&orderId={}&partnerCode={}&requestId={}&transId={}",
        access_key, req.amount, req.description, req.order_id, req.partner_code, req.request_id, req.trans_id,
    )
}

fn query_raw_signature(access_key: &str, req: &MomoQueryRequest) -> String {
    format!(
        "accessKey={}&orderId={}&partnerCode={}&requestId={}",
        access_key, req.order_id, req.partner_code, req.request_id,
    )
}

/// Map a query result code to a payment status
pub fn status_from_query_code(code: i64) -> PaymentStatus {
    match code {
        0 => PaymentStatus::Success,
        c if STILL_PROCESSING_CODES.contains(&c) => PaymentStatus::Processing,
        _ => PaymentStatus::Failed,
    }
}

// ========================= PROVIDER =========================

/// Client untuk integrasi dengan MoMo e-wallet gateway
#[derive(Clone)]
pub struct MomoProvider {
    client: Client,
    config: MomoConfig,
}

impl MomoProvider {
    pub fn new(config: MomoConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn sign(&self, raw: &str) -> AppResult<String> {
        hmac_sha256_hex(&self.config.secret_key, raw)
    }

    /// Sign an IPN body the way the gateway does
    pub fn sign_ipn(&self, ipn: &MomoIpnRequest) -> AppResult<String> {
        self.sign(&ipn_raw_signature(&self.config.access_key, ipn))
    }

    async fn post_json<Req, Resp>(&self, url: &str, body: &Req) -> AppResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::ProviderTransient(format!("MoMo request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ProviderTransient(format!("MoMo returned {}: {}", status, error_text)));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| AppError::ProviderProtocol(format!("Failed to parse MoMo response: {}", e)))
    }

    /// Create payment transaction
    pub async fn create_payment(&self, data: &PaymentData) -> AppResult<CreatePaymentResult> {
        let request_id = Uuid::new_v4().to_string();
        let provider_order_ref = format!("{}_{}", data.order_id, request_id);

        let mut req = MomoCreatePaymentRequest {
            partner_code: self.config.partner_code.clone(),
            request_id,
            amount: data.amount,
            order_id: provider_order_ref.clone(),
            order_info: data.order_info.clone(),
            redirect_url: data.redirect_url.clone(),
            ipn_url: data.ipn_url.clone(),
            request_type: REQUEST_TYPE.to_string(),
            extra_data: String::new(),
            lang: LANG.to_string(),
            signature: String::new(),
        };
        req.signature = self.sign(&create_raw_signature(&self.config.access_key, &req))?;

        tracing::debug!(order_ref = %provider_order_ref, "Creating MoMo payment");

        let resp: MomoCreatePaymentResponse = self.post_json(&self.config.endpoint, &req).await?;
        if resp.result_code != 0 {
            tracing::warn!(
                order_ref = %provider_order_ref,
                "MoMo rejected payment: {} (code: {})",
                resp.message,
                resp.result_code
            );
            return Err(AppError::ProviderProtocol(format!(
                "momo returned an error: {} (code: {})",
                resp.message, resp.result_code
            )));
        }
        if resp.pay_url.is_empty() {
            return Err(AppError::ProviderProtocol("momo response has no payUrl".to_string()));
        }

        Ok(CreatePaymentResult {
            pay_url: resp.pay_url,
            provider_order_ref,
        })
    }

    /// Verify and decode an IPN body
    pub fn handle_ipn(&self, body: &[u8]) -> AppResult<IpnOutcome> {
        let ipn: MomoIpnRequest = serde_json::from_slice(body)
            .map_err(|e| AppError::Decode(format!("failed to decode IPN request: {}", e)))?;

        let raw = ipn_raw_signature(&self.config.access_key, &ipn);
        let supplied = hex::decode(ipn.signature.trim())
            .map_err(|_| AppError::Signature("signature is not hex".to_string()))?;

        let mut mac = HmacSha256::new_from_slice(self.config.secret_key.as_bytes())
            .map_err(|e| AppError::Configuration(e.to_string()))?;
        mac.update(raw.as_bytes());
        if mac.verify_slice(&supplied).is_err() {
            tracing::warn!(order_ref = %ipn.order_id, "MoMo IPN signature verification failed");
            return Err(AppError::Signature(format!("invalid IPN signature for {}", ipn.order_id)));
        }

        let original = ipn.order_id.split('_').next().unwrap_or_default();
        let order_id = Uuid::parse_str(original)
            .map_err(|_| AppError::Decode(format!("invalid order reference {}", ipn.order_id)))?;

        let status = if ipn.result_code == 0 {
            PaymentStatus::Success
        } else {
            PaymentStatus::Failed
        };

        tracing::info!(
            %order_id,
            trans_id = ipn.trans_id,
            result_code = ipn.result_code,
            "MoMo IPN verified"
        );

        Ok(IpnOutcome {
            order_id,
            provider_order_ref: ipn.order_id,
            amount: ipn.amount,
            provider_txn_id: ipn.trans_id.to_string(),
            status,
            result_code: ipn.result_code,
            message: ipn.message,
        })
    }

    /// Process refund melalui MoMo
    pub async fn refund(&self, data: &RefundData) -> AppResult<RefundResult> {
        let trans_id: i64 = data.provider_txn_id.parse().map_err(|_| {
            AppError::ProviderProtocol(format!("invalid provider transaction id {}", data.provider_txn_id))
        })?;

        let mut req = MomoRefundRequest {
            partner_code: self.config.partner_code.clone(),
            order_id: data.order_ref.clone(),
            request_id: Uuid::new_v4().to_string(),
            amount: data.amount,
            trans_id,
            lang: LANG.to_string(),
            description: data.reason.clone(),
            signature: String::new(),
        };
        req.signature = self.sign(&refund_raw_signature(&self.config.access_key, &req))?;

        let resp: MomoRefundResponse = self.post_json(&self.config.refund_endpoint, &req).await?;
        if !REFUND_ACCEPTED_CODES.contains(&resp.result_code) {
            return Err(AppError::ProviderProtocol(format!(
                "momo refund failed with code {}: {}",
                resp.result_code, resp.message
            )));
        }

        Ok(RefundResult {
            provider_refund_id: resp.trans_id.to_string(),
            status: RefundStatus::Completed,
        })
    }

    /// Ask the gateway what happened to a payment
    pub async fn get_payment_status(&self, payment: &Payment) -> AppResult<PaymentStatusResult> {
        let order_ref = payment
            .provider_order_ref
            .clone()
            .unwrap_or_else(|| payment.order_id.to_string());

        let mut req = MomoQueryRequest {
            partner_code: self.config.partner_code.clone(),
            order_id: order_ref,
            request_id: Uuid::new_v4().to_string(),
            lang: LANG.to_string(),
            signature: String::new(),
        };
        req.signature = self.sign(&query_raw_signature(&self.config.access_key, &req))?;

        let resp: MomoQueryResponse = self.post_json(&self.config.query_endpoint, &req).await?;
        let status = status_from_query_code(resp.result_code);

        tracing::debug!(
            order_id = %payment.order_id,
            result_code = resp.result_code,
            %status,
            "MoMo status query: {}",
            resp.message
        );

        Ok(PaymentStatusResult {
            status,
            provider_txn_id: resp.trans_id.filter(|t| *t > 0).map(|t| t.to_string()),
            result_code: resp.result_code,
        })
    }
}
