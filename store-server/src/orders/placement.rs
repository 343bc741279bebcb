//! Order placement workflows
//!
//! Three entry points, one per order type. All of them create the order,
//! decrement stock and settle the coupon inside a single transaction, then
//! schedule the deferred closer after the commit.

use rust_decimal::Decimal;
use shared::models::{AddressSnapshot, Order, OrderItem, OrderType};
use shared::{ServiceError, ServiceResult};

use super::{OrderItemInput, OrderService};
use crate::queue::Task;
use crate::{coupons, inventory};

impl OrderService {
    /// Place a normal (cart checkout) order.
    ///
    /// Coupon validation runs twice: a cheap instrument-level pre-check
    /// before the transaction, and a definitive re-check against the
    /// computed total inside it. The usage counter is consumed last;
    /// losing that race aborts the placement wholesale.
    pub fn place(
        &self,
        user_id: &str,
        address_id: &str,
        remark: &str,
        items: &[OrderItemInput],
        coupon_code: Option<&str>,
    ) -> ServiceResult<Order> {
        if items.is_empty() {
            return Err(ServiceError::Invalid("order has no items".into()));
        }
        let now = shared::util::now_millis();

        if let Some(code) = coupon_code {
            let coupon = self
                .store
                .get_coupon(code)?
                .ok_or_else(|| ServiceError::CouponUnavailable("this coupon does not exist".into()))?;
            coupons::check_available(&coupon, user_id, None, self.coupon_policy.as_ref(), now)?;
        }

        let order = self.store.with_txn(|txn| {
            let mut address = self
                .store
                .get_address_txn(txn, address_id)?
                .ok_or_else(|| ServiceError::NotFound(format!("address {address_id}")))?;
            if address.user_id != user_id {
                return Err(ServiceError::Invalid(
                    "address does not belong to this user".into(),
                ));
            }
            address.last_used_at = Some(now);
            self.store.put_address(txn, &address)?;

            let no = self.store.next_order_no(txn)?;
            let mut order = Order::new(no, user_id, OrderType::Normal, address.snapshot(), remark, now);

            let mut total = Decimal::ZERO;
            for input in items {
                if input.amount == 0 {
                    return Err(ServiceError::Invalid(format!(
                        "zero quantity for sku {}",
                        input.sku_id
                    )));
                }
                let sku = self
                    .store
                    .get_sku_txn(txn, &input.sku_id)?
                    .ok_or_else(|| ServiceError::NotFound(format!("sku {}", input.sku_id)))?;
                let product = self
                    .store
                    .get_product_txn(txn, &sku.product_id)?
                    .ok_or_else(|| ServiceError::NotFound(format!("product {}", sku.product_id)))?;
                if !product.on_sale {
                    return Err(ServiceError::Invalid(format!(
                        "product {} is not on sale",
                        product.id
                    )));
                }

                total += Self::line_total(sku.price, input.amount);
                order.items.push(OrderItem {
                    product_id: sku.product_id.clone(),
                    sku_id: input.sku_id.clone(),
                    price: sku.price,
                    amount: input.amount,
                    rating: None,
                    review: None,
                    reviewed_at: None,
                });
                inventory::decrease_stock(&self.store, txn, &input.sku_id, input.amount)?;
            }

            if let Some(code) = coupon_code {
                let coupon = self
                    .store
                    .get_coupon_txn(txn, code)?
                    .ok_or_else(|| ServiceError::NotFound(format!("coupon {code}")))?;
                coupons::check_available(
                    &coupon,
                    user_id,
                    Some(total),
                    self.coupon_policy.as_ref(),
                    now,
                )?;
                total = coupon.adjusted_price(total);
                if coupons::change_used(&self.store, txn, code, 1)?.is_none() {
                    return Err(ServiceError::CouponUnavailable(
                        "this coupon has been fully redeemed".into(),
                    ));
                }
                tracing::debug!(code, discount = %coupon.description(), "Coupon applied");
                order.coupon_code = Some(code.to_string());
            }

            order.total_amount = total;
            self.store.put_order(txn, &order)?;

            let sku_ids: Vec<String> = items.iter().map(|i| i.sku_id.clone()).collect();
            self.cart.remove(user_id, &sku_ids)?;
            Ok(order)
        })?;

        self.queue.enqueue(
            Task::CloseOrder {
                order_no: order.no.clone(),
            },
            self.order_ttl_secs,
        )?;
        tracing::info!(
            order_no = %order.no,
            user_id,
            total = %order.total_amount,
            coupon = coupon_code.unwrap_or("-"),
            "Order placed"
        );
        Ok(order)
    }

    /// Place a crowdfunding pledge: single SKU, no coupon, and a closer
    /// delay capped at the campaign end.
    pub fn place_crowdfunding(
        &self,
        user_id: &str,
        address_id: &str,
        sku_id: &str,
        amount: u32,
    ) -> ServiceResult<Order> {
        if amount == 0 {
            return Err(ServiceError::Invalid(format!("zero quantity for sku {sku_id}")));
        }
        let now = shared::util::now_millis();

        let (order, campaign_end_at) = self.store.with_txn(|txn| {
            let mut address = self
                .store
                .get_address_txn(txn, address_id)?
                .ok_or_else(|| ServiceError::NotFound(format!("address {address_id}")))?;
            if address.user_id != user_id {
                return Err(ServiceError::Invalid(
                    "address does not belong to this user".into(),
                ));
            }
            address.last_used_at = Some(now);
            self.store.put_address(txn, &address)?;

            let sku = self
                .store
                .get_sku_txn(txn, sku_id)?
                .ok_or_else(|| ServiceError::NotFound(format!("sku {sku_id}")))?;
            let product = self
                .store
                .get_product_txn(txn, &sku.product_id)?
                .ok_or_else(|| ServiceError::NotFound(format!("product {}", sku.product_id)))?;
            let campaign = product.crowdfunding.as_ref().ok_or_else(|| {
                ServiceError::Invalid(format!("product {} has no crowdfunding campaign", product.id))
            })?;
            if now >= campaign.end_at {
                return Err(ServiceError::Invalid("crowdfunding campaign has ended".into()));
            }

            let no = self.store.next_order_no(txn)?;
            let mut order = Order::new(
                no,
                user_id,
                OrderType::Crowdfunding,
                address.snapshot(),
                "",
                now,
            );
            order.items.push(OrderItem {
                product_id: sku.product_id.clone(),
                sku_id: sku_id.to_string(),
                price: sku.price,
                amount,
                rating: None,
                review: None,
                reviewed_at: None,
            });
            order.total_amount = Self::line_total(sku.price, amount);
            inventory::decrease_stock(&self.store, txn, sku_id, amount)?;
            self.store.put_order(txn, &order)?;
            Ok((order, campaign.end_at))
        })?;

        let delay = self.crowdfunding_close_delay(campaign_end_at, now);
        self.queue.enqueue(
            Task::CloseOrder {
                order_no: order.no.clone(),
            },
            delay,
        )?;
        tracing::info!(
            order_no = %order.no,
            user_id,
            total = %order.total_amount,
            close_in_secs = delay,
            "Crowdfunding order placed"
        );
        Ok(order)
    }

    /// Place a seckill (flash sale) order: exactly one unit of one SKU.
    ///
    /// The volatile gate sheds obviously doomed requests before any
    /// transaction; the durable stock row stays the source of truth and
    /// is decremented first inside the transaction. The gate is only
    /// decremented after the commit, as a secondary signal.
    pub fn place_seckill(
        &self,
        user_id: &str,
        address: AddressSnapshot,
        sku_id: &str,
    ) -> ServiceResult<Order> {
        if self.gate.is_exhausted(sku_id) {
            return Err(ServiceError::OutOfStock(sku_id.to_string()));
        }
        let now = shared::util::now_millis();

        let order = self.store.with_txn(|txn| {
            let sku = self
                .store
                .get_sku_txn(txn, sku_id)?
                .ok_or_else(|| ServiceError::NotFound(format!("sku {sku_id}")))?;
            let product = self
                .store
                .get_product_txn(txn, &sku.product_id)?
                .ok_or_else(|| ServiceError::NotFound(format!("product {}", sku.product_id)))?;
            if !product.on_sale {
                return Err(ServiceError::Invalid(format!(
                    "product {} is not on sale",
                    product.id
                )));
            }

            inventory::decrease_stock(&self.store, txn, sku_id, 1)?;

            let no = self.store.next_order_no(txn)?;
            let mut order = Order::new(no, user_id, OrderType::Seckill, address.clone(), "", now);
            order.items.push(OrderItem {
                product_id: sku.product_id.clone(),
                sku_id: sku_id.to_string(),
                price: sku.price,
                amount: 1,
                rating: None,
                review: None,
                reviewed_at: None,
            });
            order.total_amount = sku.price;
            self.store.put_order(txn, &order)?;
            Ok(order)
        })?;

        self.gate.decrement(sku_id);
        self.queue.enqueue(
            Task::CloseOrder {
                order_no: order.no.clone(),
            },
            self.seckill_order_ttl_secs,
        )?;
        tracing::info!(order_no = %order.no, user_id, sku_id, "Seckill order placed");
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::external::{
        MemoryCart, PaymentGateway, RefundRequest, RefundResponse, UnrestrictedUsage,
    };
    use async_trait::async_trait;
    use shared::models::{CouponCode, CrowdfundingCampaign, DiscountType, Product, ProductSku, UserAddress};
    use std::sync::Arc;

    struct NoGateway;

    #[async_trait]
    impl PaymentGateway for NoGateway {
        async fn refund(&self, _req: &RefundRequest) -> shared::ServiceResult<RefundResponse> {
            Ok(RefundResponse::default())
        }
    }

    fn address(user_id: &str) -> UserAddress {
        UserAddress {
            id: "addr-1".into(),
            user_id: user_id.into(),
            line: "1 Example Road".into(),
            zip: "100000".into(),
            contact_name: "Li Lei".into(),
            contact_phone: "13800000000".into(),
            last_used_at: None,
        }
    }

    fn seed_catalog(store: &Store, stock: u32, price: &str) {
        let product = Product::new("p1", "Keyboard");
        let sku = ProductSku {
            id: "sku-1".into(),
            product_id: "p1".into(),
            title: "Keyboard 87-key".into(),
            price: price.parse().unwrap(),
            stock,
        };
        store
            .with_txn(|txn| {
                store.put_product(txn, &product)?;
                store.put_sku(txn, &sku)?;
                store.put_address(txn, &address("u1"))?;
                Ok(())
            })
            .unwrap();
    }

    fn service(store: &Store) -> OrderService {
        OrderService::new(store.clone(), Arc::new(NoGateway))
    }

    #[test]
    fn test_place_decrements_stock_and_schedules_closer() {
        let store = Store::open_in_memory().unwrap();
        seed_catalog(&store, 10, "49.90");
        let svc = service(&store);

        let order = svc
            .place(
                "u1",
                "addr-1",
                "ship fast",
                &[OrderItemInput { sku_id: "sku-1".into(), amount: 3 }],
                None,
            )
            .unwrap();

        assert_eq!(order.total_amount, "149.70".parse().unwrap());
        assert_eq!(store.get_sku("sku-1").unwrap().unwrap().stock, 7);
        let pending = svc.queue().pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task.order_no(), order.no);
    }

    #[test]
    fn test_place_out_of_stock_rolls_back_everything() {
        let store = Store::open_in_memory().unwrap();
        seed_catalog(&store, 2, "49.90");
        let svc = service(&store);

        let err = svc
            .place(
                "u1",
                "addr-1",
                "",
                &[OrderItemInput { sku_id: "sku-1".into(), amount: 3 }],
                None,
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::OutOfStock(_)));
        // No order, no stock change, no queued closer
        assert_eq!(store.count_orders().unwrap(), 0);
        assert_eq!(store.get_sku("sku-1").unwrap().unwrap().stock, 2);
        assert!(svc.queue().pending().unwrap().is_empty());
    }

    #[test]
    fn test_place_with_coupon_adjusts_total_and_consumes_usage() {
        let store = Store::open_in_memory().unwrap();
        seed_catalog(&store, 10, "20.00");
        let coupon = CouponCode {
            code: "TENOFF".into(),
            name: "ten off".into(),
            discount_type: DiscountType::FixedAmount,
            value: "10.00".parse().unwrap(),
            total: 5,
            used: 0,
            min_amount: "10.01".parse().unwrap(),
            not_before: None,
            not_after: None,
            enabled: true,
        };
        store.with_txn(|txn| Ok(store.put_coupon(txn, &coupon)?)).unwrap();
        let svc = service(&store);

        let order = svc
            .place(
                "u1",
                "addr-1",
                "",
                &[OrderItemInput { sku_id: "sku-1".into(), amount: 1 }],
                Some("TENOFF"),
            )
            .unwrap();
        assert_eq!(order.total_amount, "10.00".parse().unwrap());
        assert_eq!(order.coupon_code.as_deref(), Some("TENOFF"));
        assert_eq!(store.get_coupon("TENOFF").unwrap().unwrap().used, 1);
    }

    #[test]
    fn test_place_coupon_below_min_amount_rejected() {
        let store = Store::open_in_memory().unwrap();
        // Total will be exactly 10.00, one cent short of the minimum
        seed_catalog(&store, 10, "10.00");
        let coupon = CouponCode {
            code: "TENOFF".into(),
            name: "ten off".into(),
            discount_type: DiscountType::FixedAmount,
            value: "10.00".parse().unwrap(),
            total: 5,
            used: 0,
            min_amount: "10.01".parse().unwrap(),
            not_before: None,
            not_after: None,
            enabled: true,
        };
        store.with_txn(|txn| Ok(store.put_coupon(txn, &coupon)?)).unwrap();
        let svc = service(&store);

        let err = svc
            .place(
                "u1",
                "addr-1",
                "",
                &[OrderItemInput { sku_id: "sku-1".into(), amount: 1 }],
                Some("TENOFF"),
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::CouponUnavailable(_)));
        // Rolled back: no order, stock and usage untouched
        assert_eq!(store.count_orders().unwrap(), 0);
        assert_eq!(store.get_sku("sku-1").unwrap().unwrap().stock, 10);
        assert_eq!(store.get_coupon("TENOFF").unwrap().unwrap().used, 0);
    }

    #[test]
    fn test_concurrent_placement_single_unit() {
        let store = Store::open_in_memory().unwrap();
        seed_catalog(&store, 1, "49.90");
        store
            .with_txn(|txn| {
                let mut a = address("u2");
                a.id = "addr-2".into();
                store.put_address(txn, &a)?;
                Ok(())
            })
            .unwrap();

        let svc = Arc::new(service(&store));
        let mut handles = Vec::new();
        for (user, addr) in [("u1", "addr-1"), ("u2", "addr-2")] {
            let svc = Arc::clone(&svc);
            handles.push(std::thread::spawn(move || {
                svc.place(
                    user,
                    addr,
                    "",
                    &[OrderItemInput { sku_id: "sku-1".into(), amount: 1 }],
                    None,
                )
            }));
        }
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let oks = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(oks, 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(ServiceError::OutOfStock(_)))));
        assert_eq!(store.get_sku("sku-1").unwrap().unwrap().stock, 0);
        assert_eq!(store.count_orders().unwrap(), 1);
    }

    #[test]
    fn test_concurrent_coupon_single_use() {
        let store = Store::open_in_memory().unwrap();
        seed_catalog(&store, 10, "20.00");
        store
            .with_txn(|txn| {
                let mut a = address("u2");
                a.id = "addr-2".into();
                store.put_address(txn, &a)?;
                Ok(())
            })
            .unwrap();
        let coupon = CouponCode {
            code: "ONCE".into(),
            name: "single use".into(),
            discount_type: DiscountType::FixedAmount,
            value: "5.00".parse().unwrap(),
            total: 1,
            used: 0,
            min_amount: Decimal::ZERO,
            not_before: None,
            not_after: None,
            enabled: true,
        };
        store.with_txn(|txn| Ok(store.put_coupon(txn, &coupon)?)).unwrap();

        let svc = Arc::new(service(&store));
        let mut handles = Vec::new();
        for (user, addr) in [("u1", "addr-1"), ("u2", "addr-2")] {
            let svc = Arc::clone(&svc);
            handles.push(std::thread::spawn(move || {
                svc.place(
                    user,
                    addr,
                    "",
                    &[OrderItemInput { sku_id: "sku-1".into(), amount: 1 }],
                    Some("ONCE"),
                )
            }));
        }
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let oks = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(oks, 1);
        // The loser is fully rolled back: one order, its stock decrement only
        assert_eq!(store.count_orders().unwrap(), 1);
        assert_eq!(store.get_sku("sku-1").unwrap().unwrap().stock, 9);
        assert_eq!(store.get_coupon("ONCE").unwrap().unwrap().used, 1);
    }

    #[test]
    fn test_crowdfunding_close_delay_capped_by_campaign_end() {
        let store = Store::open_in_memory().unwrap();
        let now = shared::util::now_millis();
        let mut product = Product::new("p1", "Prototype Synth");
        product.crowdfunding = Some(CrowdfundingCampaign {
            end_at: now + 30_000,
            target_amount: "100000.00".parse().unwrap(),
        });
        let sku = ProductSku {
            id: "sku-1".into(),
            product_id: "p1".into(),
            title: "Early bird".into(),
            price: "499.00".parse().unwrap(),
            stock: 100,
        };
        store
            .with_txn(|txn| {
                store.put_product(txn, &product)?;
                store.put_sku(txn, &sku)?;
                store.put_address(txn, &address("u1"))?;
                Ok(())
            })
            .unwrap();

        let svc = service(&store);
        let order = svc.place_crowdfunding("u1", "addr-1", "sku-1", 1).unwrap();
        assert_eq!(order.order_type, OrderType::Crowdfunding);

        // The campaign ends in ~30s, well inside the 1800s default TTL
        let pending = svc.queue().pending().unwrap();
        assert_eq!(pending.len(), 1);
        let delay_ms = pending[0].fire_at - now;
        assert!(delay_ms <= 30_000, "delay was {delay_ms}ms");
        assert!(delay_ms >= 25_000, "delay was {delay_ms}ms");
    }

    #[test]
    fn test_crowdfunding_requires_campaign() {
        let store = Store::open_in_memory().unwrap();
        seed_catalog(&store, 10, "49.90");
        let svc = service(&store);
        let err = svc
            .place_crowdfunding("u1", "addr-1", "sku-1", 1)
            .unwrap_err();
        assert!(matches!(err, ServiceError::Invalid(_)));
    }

    #[test]
    fn test_seckill_durable_stock_wins_over_gate() {
        let store = Store::open_in_memory().unwrap();
        seed_catalog(&store, 1, "9.90");
        let svc = Arc::new(service(&store));
        // Gate deliberately primed above the durable stock
        svc.seckill_gate().prime("sku-1", 5);

        let snapshot = address("u1").snapshot();
        let mut handles = Vec::new();
        for i in 0..4 {
            let svc = Arc::clone(&svc);
            let snapshot = snapshot.clone();
            handles.push(std::thread::spawn(move || {
                svc.place_seckill(&format!("u{i}"), snapshot, "sku-1")
            }));
        }
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let oks = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(oks, 1);
        assert_eq!(store.get_sku("sku-1").unwrap().unwrap().stock, 0);
        assert_eq!(store.count_orders().unwrap(), 1);
    }

    #[test]
    fn test_seckill_gate_never_ends_positive() {
        // durable = 1, volatile = 1, two concurrent buyers
        let store = Store::open_in_memory().unwrap();
        seed_catalog(&store, 1, "9.90");
        let svc = Arc::new(service(&store));
        svc.seckill_gate().prime("sku-1", 1);

        let snapshot = address("u1").snapshot();
        let mut handles = Vec::new();
        for i in 0..2 {
            let svc = Arc::clone(&svc);
            let snapshot = snapshot.clone();
            handles.push(std::thread::spawn(move || {
                svc.place_seckill(&format!("u{i}"), snapshot, "sku-1")
            }));
        }
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(store.get_sku("sku-1").unwrap().unwrap().stock, 0);
        // With stock gone the gate must not report availability
        assert!(svc.seckill_gate().remaining("sku-1") <= 0);
    }

    #[test]
    fn test_seckill_exhausted_gate_sheds_before_txn() {
        let store = Store::open_in_memory().unwrap();
        seed_catalog(&store, 5, "9.90");
        let svc = service(&store);
        svc.seckill_gate().prime("sku-1", 0);

        let err = svc
            .place_seckill("u1", address("u1").snapshot(), "sku-1")
            .unwrap_err();
        assert!(matches!(err, ServiceError::OutOfStock(_)));
        // Durable stock untouched by the shed request
        assert_eq!(store.get_sku("sku-1").unwrap().unwrap().stock, 5);
    }

    #[test]
    fn test_cart_lines_removed_on_placement() {
        let store = Store::open_in_memory().unwrap();
        seed_catalog(&store, 10, "49.90");
        let cart = Arc::new(MemoryCart::new());
        cart.add("u1", "sku-1");
        cart.add("u1", "sku-other");

        let mut svc = service(&store);
        svc.set_cart(cart.clone());
        svc.set_coupon_policy(Arc::new(UnrestrictedUsage));
        svc.place(
            "u1",
            "addr-1",
            "",
            &[OrderItemInput { sku_id: "sku-1".into(), amount: 1 }],
            None,
        )
        .unwrap();

        assert!(!cart.contains("u1", "sku-1"));
        assert!(cart.contains("u1", "sku-other"));
    }
}
