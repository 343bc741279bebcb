//! End-to-end order lifecycle against a real on-disk database
//!
//! Drives the public service API the way a transport layer would:
//! place, pay, review, refund, and let the queue worker do its part.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use shared::ServiceResult;
use shared::models::{
    CouponCode, DiscountType, PaymentMethod, Product, ProductSku, RefundStatus, UserAddress,
};
use store_server::db::Store;
use store_server::external::{
    InstallmentGateway, PaymentGateway, RefundRequest, RefundResponse,
};
use store_server::orders::{OrderItemInput, OrderService, ReviewInput};
use store_server::queue::{QueueWorker, Task};

/// Gateway stub that always accepts and counts its calls
struct AcceptingGateway {
    calls: AtomicU32,
}

impl AcceptingGateway {
    fn new() -> Self {
        Self { calls: AtomicU32::new(0) }
    }
}

#[async_trait]
impl PaymentGateway for AcceptingGateway {
    async fn refund(&self, _req: &RefundRequest) -> ServiceResult<RefundResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RefundResponse::default())
    }
}

#[async_trait]
impl InstallmentGateway for AcceptingGateway {
    async fn refund(&self, _req: &RefundRequest) -> ServiceResult<RefundResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RefundResponse::default())
    }
}

fn seed_catalog(store: &Store) {
    let product = Product::new("p1", "Mechanical Keyboard");
    let sku = ProductSku {
        id: "sku-1".into(),
        product_id: "p1".into(),
        title: "87-key, brown switches".into(),
        price: "249.00".parse().unwrap(),
        stock: 50,
    };
    let address = UserAddress {
        id: "addr-1".into(),
        user_id: "u1".into(),
        line: "1 Example Road".into(),
        zip: "100000".into(),
        contact_name: "Li Lei".into(),
        contact_phone: "13800000000".into(),
        last_used_at: None,
    };
    let coupon = CouponCode {
        code: "SAVE20".into(),
        name: "20 percent off".into(),
        discount_type: DiscountType::Percentage,
        value: "20".parse().unwrap(),
        total: 100,
        used: 0,
        min_amount: "100.00".parse().unwrap(),
        not_before: None,
        not_after: None,
        enabled: true,
    };
    store
        .with_txn(|txn| {
            store.put_product(txn, &product)?;
            store.put_sku(txn, &sku)?;
            store.put_address(txn, &address)?;
            store.put_coupon(txn, &coupon)?;
            Ok(())
        })
        .unwrap();
}

#[tokio::test]
async fn test_full_lifecycle_place_pay_review_refund() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("store.redb");
    let store = Store::open(db_path.to_str().unwrap()).unwrap();
    seed_catalog(&store);

    let gateway = Arc::new(AcceptingGateway::new());
    let svc = OrderService::new(store.clone(), gateway.clone());
    let worker = QueueWorker::new(store.clone(), Arc::new(AcceptingGateway::new()));

    // Place with a 20% coupon: 249.00 -> 199.20
    let order = svc
        .place(
            "u1",
            "addr-1",
            "leave at the door",
            &[OrderItemInput { sku_id: "sku-1".into(), amount: 1 }],
            Some("SAVE20"),
        )
        .unwrap();
    assert_eq!(order.total_amount, "199.20".parse().unwrap());
    assert_eq!(store.get_sku("sku-1").unwrap().unwrap().stock, 49);

    // Pay, then let the worker run the sold-count reactor
    svc.mark_paid(&order.no, PaymentMethod::Alipay).unwrap();
    worker.drain_due().await;
    assert_eq!(store.get_product("p1").unwrap().unwrap().sold_count, 1);

    // Review, then the rating reactor
    svc.submit_review(
        &order.no,
        &[ReviewInput {
            sku_id: "sku-1".into(),
            rating: 4,
            content: "solid build".into(),
        }],
    )
    .unwrap();
    worker.drain_due().await;
    let product = store.get_product("p1").unwrap().unwrap();
    assert_eq!(product.review_count, 1);
    assert!((product.rating - 4.0).abs() < f64::EPSILON);

    // Refund synchronously through the gateway
    let refunded = svc.refund_order(&order.no).await.unwrap();
    assert_eq!(refunded.refund_status, RefundStatus::Success);
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);

    // Everything above survives a process restart
    drop(svc);
    drop(worker);
    drop(store);
    let reopened = Store::open(db_path.to_str().unwrap()).unwrap();
    let persisted = reopened.get_order(&order.no).unwrap().unwrap();
    assert_eq!(persisted.refund_status, RefundStatus::Success);
    assert!(persisted.reviewed);
}

#[tokio::test]
async fn test_unpaid_order_closed_by_worker() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("store.redb").to_str().unwrap()).unwrap();
    seed_catalog(&store);

    let mut svc = OrderService::new(store.clone(), Arc::new(AcceptingGateway::new()));
    // Zero TTL: the closer is due immediately
    svc.set_ttls(0, 0);

    let order = svc
        .place(
            "u1",
            "addr-1",
            "",
            &[OrderItemInput { sku_id: "sku-1".into(), amount: 2 }],
            Some("SAVE20"),
        )
        .unwrap();
    assert_eq!(store.get_sku("sku-1").unwrap().unwrap().stock, 48);
    assert_eq!(store.get_coupon("SAVE20").unwrap().unwrap().used, 1);

    let worker = QueueWorker::new(store.clone(), Arc::new(AcceptingGateway::new()));
    worker.drain_due().await;

    let closed = store.get_order(&order.no).unwrap().unwrap();
    assert!(closed.closed);
    assert_eq!(store.get_sku("sku-1").unwrap().unwrap().stock, 50);
    assert_eq!(store.get_coupon("SAVE20").unwrap().unwrap().used, 0);
    assert!(svc.queue().pending().unwrap().is_empty());

    // A closed order cannot be paid
    let err = svc.mark_paid(&order.no, PaymentMethod::Alipay).unwrap_err();
    assert!(matches!(err, shared::ServiceError::Invalid(_)));
}

#[tokio::test]
async fn test_installment_refund_settled_by_worker() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("store.redb").to_str().unwrap()).unwrap();
    seed_catalog(&store);

    let svc = OrderService::new(store.clone(), Arc::new(AcceptingGateway::new()));
    let order = svc
        .place(
            "u1",
            "addr-1",
            "",
            &[OrderItemInput { sku_id: "sku-1".into(), amount: 1 }],
            None,
        )
        .unwrap();
    svc.mark_paid(&order.no, PaymentMethod::Installment).unwrap();

    let processing = svc.refund_order(&order.no).await.unwrap();
    assert_eq!(processing.refund_status, RefundStatus::Processing);

    let installment = Arc::new(AcceptingGateway::new());
    let worker = QueueWorker::new(store.clone(), installment.clone());
    worker.drain_due().await;

    let settled = store.get_order(&order.no).unwrap().unwrap();
    assert_eq!(settled.refund_status, RefundStatus::Success);
    assert_eq!(installment.calls.load(Ordering::SeqCst), 1);
    // Both the installment task and the pending closer may have fired;
    // the refund task itself must be gone
    let leftover = svc
        .queue()
        .pending()
        .unwrap()
        .into_iter()
        .any(|t| matches!(t.task, Task::RefundInstallment { .. }));
    assert!(!leftover);
}

#[tokio::test]
async fn test_user_refund_application_flags_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("store.redb").to_str().unwrap()).unwrap();
    seed_catalog(&store);

    let svc = OrderService::new(store.clone(), Arc::new(AcceptingGateway::new()));
    let order = svc
        .place(
            "u1",
            "addr-1",
            "",
            &[OrderItemInput { sku_id: "sku-1".into(), amount: 1 }],
            None,
        )
        .unwrap();
    svc.mark_paid(&order.no, PaymentMethod::Alipay).unwrap();

    let applied = svc.apply_refund(&order.no, "wrong size").unwrap();
    assert_eq!(applied.refund_status, RefundStatus::Applied);
    assert_eq!(
        applied.extra.get("refund_reason"),
        Some(&serde_json::json!("wrong size"))
    );

    // Applying twice is rejected
    let err = svc.apply_refund(&order.no, "changed my mind").unwrap_err();
    assert!(matches!(err, shared::ServiceError::Invalid(_)));
}
