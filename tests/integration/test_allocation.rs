//! OS number allocation under contention.

use std::collections::HashSet;
use std::sync::Arc;

use repair_desk_lib::error::AppError;
use repair_desk_lib::models::{OrderFilters, OrderScope, OrderSector};
use repair_desk_lib::services::MemoryDurableStore;
use repair_desk_lib::services::os_number::OrderNumberStore;

use super::test_helpers::*;

fn phone_scope() -> OrderScope {
    OrderScope::new(OWNER_ID, OrderSector::Phone)
}

async fn active_numbers(ctx: &TestContext) -> Vec<i32> {
    let filters = OrderFilters {
        limit: 200,
        ..Default::default()
    };
    let (orders, _) = ctx
        .service
        .list(OrderSector::Phone, &filters)
        .await
        .unwrap();
    orders.into_iter().map(|o| o.os_number).collect()
}

#[tokio::test]
async fn test_sequential_creates_get_consecutive_numbers() {
    let ctx = TestContext::new();

    for expected in 1..=3 {
        let saved = ctx
            .service
            .create(OrderSector::Phone, phone_fields("Ana", None), None)
            .await
            .unwrap();
        assert_eq!(saved.order.os_number, expected);
        assert!(saved.retries.is_empty());
        assert_eq!(saved.order.situation_id, Some(ctx.in_queue));
    }

    // Computer orders number independently.
    let saved = ctx
        .service
        .create(OrderSector::Computer, computer_fields("Bruno"), None)
        .await
        .unwrap();
    assert_eq!(saved.order.os_number, 1);
}

#[tokio::test]
async fn test_concurrent_creates_for_same_number_stay_unique() {
    let ctx = TestContext::new();

    let (a, b) = tokio::join!(
        ctx.service
            .create(OrderSector::Phone, phone_fields("Carla", Some(42)), None),
        ctx.service
            .create(OrderSector::Phone, phone_fields("Diego", Some(42)), None),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_ne!(a.order.os_number, b.order.os_number);
    assert!(a.order.os_number == 42 || b.order.os_number == 42);
    let reassigned = if a.order.os_number == 42 { &b } else { &a };
    assert!(reassigned.reassigned_from.is_some() || !reassigned.retries.is_empty());
}

#[tokio::test]
async fn test_lost_race_is_retried_with_new_number() {
    let ctx = TestContext::new();
    ctx.store.steal_next_inserts(2);

    let saved = ctx
        .service
        .create(OrderSector::Phone, phone_fields("Elisa", Some(10)), None)
        .await
        .unwrap();

    assert_eq!(saved.retries.len(), 2);
    assert_eq!(saved.retries[0].attempt, 1);
    assert_ne!(saved.order.os_number, 10);
    assert_eq!(
        saved.retries.last().map(|r| r.new_number),
        Some(saved.order.os_number)
    );

    let numbers = active_numbers(&ctx).await;
    let unique: HashSet<_> = numbers.iter().collect();
    assert_eq!(unique.len(), numbers.len());
    assert_eq!(numbers.len(), 3);
}

#[tokio::test]
async fn test_retries_stop_at_limit() {
    let ctx = TestContext::new();
    let service = build_service(
        ctx.store.clone(),
        ctx.blobs.clone(),
        Arc::new(MemoryDurableStore::new()),
        3,
    );
    ctx.store.steal_next_inserts(u32::MAX);

    let err = service
        .create(OrderSector::Phone, phone_fields("Fabio", Some(1)), None)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Conflict(_)));
    assert!(err.to_string().contains("3 attempts"));
    // One rival order per attempt, nothing of ours.
    assert_eq!(ctx.store.active_count(phone_scope()), 3);
}

#[tokio::test]
async fn test_taken_number_is_reassigned_before_saving() {
    let ctx = TestContext::new();
    ctx.service
        .create(OrderSector::Phone, phone_fields("Gabi", Some(5)), None)
        .await
        .unwrap();

    let saved = ctx
        .service
        .create(OrderSector::Phone, phone_fields("Hugo", Some(5)), None)
        .await
        .unwrap();

    let existing = saved.reassigned_from.expect("conflict should be reported");
    assert_eq!(existing.os_number, 5);
    assert_eq!(existing.client_name, "Gabi");
    assert_eq!(existing.device_label, "Samsung Galaxy A54");
    assert_eq!(saved.order.os_number, 6);
}

#[tokio::test]
async fn test_oracle_outage_falls_back_to_probing() {
    let ctx = TestContext::new();
    for _ in 0..3 {
        ctx.service
            .create(OrderSector::Phone, phone_fields("Iris", None), None)
            .await
            .unwrap();
    }

    ctx.store.set_oracle_down(true);
    assert!(ctx.store.next_number(phone_scope()).await.is_err());

    let suggested = ctx.service.next_number(OrderSector::Phone).await.unwrap();
    assert_eq!(suggested, 4);

    let saved = ctx
        .service
        .create(OrderSector::Phone, phone_fields("Joana", Some(2)), None)
        .await
        .unwrap();
    assert_eq!(saved.order.os_number, 4);
}

#[tokio::test]
async fn test_editing_keeps_own_number_and_rejects_taken_one() {
    let ctx = TestContext::new();
    let first = ctx
        .service
        .create(OrderSector::Phone, phone_fields("Kleber", Some(1)), None)
        .await
        .unwrap()
        .order;
    ctx.service
        .create(OrderSector::Phone, phone_fields("Lia", Some(2)), None)
        .await
        .unwrap();

    // Re-submitting its own number is not a conflict.
    let mut fields = phone_fields("Kleber Souza", Some(1));
    fields.defect = Some("Screen and battery".to_string());
    let saved = ctx
        .service
        .update(OrderSector::Phone, first.id, fields, None)
        .await
        .unwrap();
    assert!(saved.reassigned_from.is_none());
    assert_eq!(saved.order.os_number, 1);
    assert_eq!(saved.order.client_name, "Kleber Souza");

    // Taking order 2's number moves this order to a free one instead.
    let mut fields = phone_fields("Kleber Souza", Some(2));
    fields.defect = None;
    let saved = ctx
        .service
        .update(OrderSector::Phone, first.id, fields, None)
        .await
        .unwrap();
    assert_eq!(saved.reassigned_from.map(|e| e.os_number), Some(2));
    assert_eq!(saved.order.os_number, 3);
}

#[tokio::test]
async fn test_deleted_orders_release_their_number() {
    let ctx = TestContext::new();
    let order = ctx
        .service
        .create(OrderSector::Phone, phone_fields("Mara", Some(9)), None)
        .await
        .unwrap()
        .order;
    ctx.service
        .delete(OrderSector::Phone, order.id)
        .await
        .unwrap();

    assert!(
        ctx.service
            .check_number(OrderSector::Phone, 9, None)
            .await
            .unwrap()
            .is_none()
    );
    assert!(matches!(
        ctx.service.get(OrderSector::Phone, order.id).await,
        Err(AppError::NotFound(_))
    ));
}
