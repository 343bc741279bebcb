//! Refund dispatcher
//!
//! Operator-side refund of a paid order, branched on the payment method.
//! Gateway calls run outside any transaction; only the resulting state
//! change is written transactionally.

use shared::models::{Order, PaymentMethod, RefundStatus};
use shared::{ServiceError, ServiceResult};

use super::OrderService;
use crate::db::Store;
use crate::external::{InstallmentGateway, RefundRequest};
use crate::queue::Task;

impl OrderService {
    /// Dispatch a refund for a paid order.
    ///
    /// Alipay refunds resolve synchronously against the gateway. An
    /// installment refund only flips the order to PROCESSING and hands
    /// off to the queue worker. A refund request for an unpaid order is
    /// an internal inconsistency, not user error.
    ///
    /// Only orders still in PENDING or APPLIED are dispatchable:
    /// PROCESSING means a refund is already in flight, and SUCCESS /
    /// FAILED are terminal. Without this guard a repeated dispatch would
    /// hit the gateway twice for the same money.
    pub async fn refund_order(&self, order_no: &str) -> ServiceResult<Order> {
        let order = self
            .store
            .get_order(order_no)?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_no}")))?;

        if !order.is_paid() {
            tracing::error!(order_no, "Refund requested for an unpaid order");
            return Err(ServiceError::InternalInconsistency(format!(
                "refund requested for unpaid order {order_no}"
            )));
        }
        if !matches!(
            order.refund_status,
            RefundStatus::Pending | RefundStatus::Applied
        ) {
            tracing::warn!(order_no, status = ?order.refund_status, "Refund already dispatched, skipping");
            return Err(ServiceError::Invalid(format!(
                "refund for order {order_no} was already dispatched"
            )));
        }
        let method = order.payment_method.ok_or_else(|| {
            ServiceError::InternalInconsistency(format!(
                "paid order {order_no} has no payment method"
            ))
        })?;

        match method {
            PaymentMethod::Alipay => {
                let refund_no = shared::util::new_refund_no();
                let request = RefundRequest {
                    order_no: order.no.clone(),
                    amount: order.total_amount,
                    refund_no: refund_no.clone(),
                };
                let response = self.gateway.refund(&request).await?;

                self.store.with_txn(|txn| {
                    let mut order = self
                        .store
                        .get_order_txn(txn, order_no)?
                        .ok_or_else(|| ServiceError::NotFound(format!("order {order_no}")))?;
                    order.refund_no = Some(refund_no.clone());
                    match &response.sub_code {
                        Some(code) => {
                            tracing::warn!(order_no, sub_code = %code, "Gateway rejected refund");
                            order.refund_status = RefundStatus::Failed;
                            order
                                .extra
                                .insert("refund_failed_code".into(), serde_json::json!(code));
                        }
                        None => {
                            tracing::info!(order_no, refund_no = %refund_no, "Refund succeeded");
                            order.refund_status = RefundStatus::Success;
                        }
                    }
                    self.store.put_order(txn, &order)?;
                    Ok(order)
                })
            }
            PaymentMethod::Wechat => {
                tracing::error!(order_no, method = %method, "Refund method not supported");
                Err(ServiceError::Unsupported(
                    "wechat refunds are not yet available".into(),
                ))
            }
            PaymentMethod::Installment => {
                let refund_no = shared::util::new_refund_no();
                let order = self.store.with_txn(|txn| {
                    let mut order = self
                        .store
                        .get_order_txn(txn, order_no)?
                        .ok_or_else(|| ServiceError::NotFound(format!("order {order_no}")))?;
                    order.refund_no = Some(refund_no.clone());
                    order.refund_status = RefundStatus::Processing;
                    self.store.put_order(txn, &order)?;
                    Ok(order)
                })?;

                self.queue.enqueue(
                    Task::RefundInstallment {
                        order_no: order.no.clone(),
                    },
                    0,
                )?;
                tracing::info!(order_no, refund_no = %refund_no, "Installment refund queued");
                Ok(order)
            }
        }
    }
}

/// Queue handler: settle an installment refund against its subsystem.
///
/// Idempotent under re-delivery: a no-op unless the order is still
/// PROCESSING. Transport errors bubble up so the queue retries.
pub async fn resolve_installment_refund(
    store: &Store,
    gateway: &dyn InstallmentGateway,
    order_no: &str,
) -> ServiceResult<()> {
    let order = store
        .get_order(order_no)?
        .ok_or_else(|| ServiceError::NotFound(format!("order {order_no}")))?;
    if order.refund_status != RefundStatus::Processing {
        tracing::debug!(order_no, status = ?order.refund_status, "Installment refund already settled");
        return Ok(());
    }
    let refund_no = order.refund_no.clone().ok_or_else(|| {
        ServiceError::InternalInconsistency(format!(
            "order {order_no} is PROCESSING without a refund number"
        ))
    })?;

    let request = RefundRequest {
        order_no: order.no.clone(),
        amount: order.total_amount,
        refund_no,
    };
    let response = gateway.refund(&request).await?;

    store.with_txn(|txn| {
        let mut order = store
            .get_order_txn(txn, order_no)?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_no}")))?;
        if order.refund_status != RefundStatus::Processing {
            return Ok(());
        }
        match &response.sub_code {
            Some(code) => {
                tracing::warn!(order_no, sub_code = %code, "Installment subsystem rejected refund");
                order.refund_status = RefundStatus::Failed;
                order
                    .extra
                    .insert("refund_failed_code".into(), serde_json::json!(code));
            }
            None => {
                tracing::info!(order_no, "Installment refund settled");
                order.refund_status = RefundStatus::Success;
            }
        }
        store.put_order(txn, &order)?;
        Ok(())
    })
}
