//! HTTP payment gateway client
//!
//! Thin JSON-over-HTTP client for the refund endpoint. The gateway's own
//! wire protocol (signing, certificates) is terminated by an adapter in
//! front of this endpoint and is not the core's concern.

use async_trait::async_trait;
use shared::{ServiceError, ServiceResult};
use std::time::Duration;

use super::{InstallmentGateway, PaymentGateway, RefundRequest, RefundResponse};

const REQUEST_TIMEOUT_SECS: u64 = 10;

pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPaymentGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn post_refund(&self, req: &RefundRequest) -> ServiceResult<RefundResponse> {
        let url = format!("{}/refund", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(|e| ServiceError::Gateway(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ServiceError::Gateway(format!(
                "refund endpoint returned {}",
                response.status()
            )));
        }
        response
            .json::<RefundResponse>()
            .await
            .map_err(|e| ServiceError::Gateway(format!("invalid refund response: {e}")))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn refund(&self, req: &RefundRequest) -> ServiceResult<RefundResponse> {
        tracing::info!(order_no = %req.order_no, refund_no = %req.refund_no, "Requesting gateway refund");
        self.post_refund(req).await
    }
}

#[async_trait]
impl InstallmentGateway for HttpPaymentGateway {
    async fn refund(&self, req: &RefundRequest) -> ServiceResult<RefundResponse> {
        tracing::info!(order_no = %req.order_no, refund_no = %req.refund_no, "Requesting installment refund");
        self.post_refund(req).await
    }
}
