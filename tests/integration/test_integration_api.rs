//! The key-authenticated integration endpoint.

use serde_json::json;

use super::test_helpers::*;

const IP: &str = "203.0.113.10";

#[actix_rt::test]
async fn test_missing_key_is_rejected() {
    let ctx = TestContext::new();
    let app = create_test_app(&ctx).await;

    let (status, body) = call_integration(
        &app,
        None,
        IP,
        json!({ "action": "list", "table": "phone_orders" }),
    )
    .await;

    assert_eq!(status, 401);
    assert!(body["error"].as_str().unwrap().contains("X-Integration-Key"));
    assert!(body.get("success").is_none());
}

#[actix_rt::test]
async fn test_repeated_bad_keys_block_the_address() {
    let ctx = TestContext::new();
    let app = create_test_app(&ctx).await;
    let list = json!({ "action": "list", "table": "phone_orders" });

    for _ in 0..4 {
        let (status, _) = call_integration(&app, Some("wrong-key"), IP, list.clone()).await;
        assert_eq!(status, 401);
    }
    let (status, body) = call_integration(&app, Some("wrong-key"), IP, list.clone()).await;
    assert_eq!(status, 429);
    assert!(body["error"].is_string());

    // Even the right key is refused while the block lasts.
    let (status, _) = call_integration(&app, Some(INTEGRATION_KEY), IP, list.clone()).await;
    assert_eq!(status, 429);

    let (status, _) = call_integration(&app, Some(INTEGRATION_KEY), "198.51.100.7", list).await;
    assert_eq!(status, 200);
}

#[actix_rt::test]
async fn test_rotating_forwarded_header_does_not_dodge_the_block() {
    let ctx = TestContext::new();
    let app = create_test_app(&ctx).await;
    let list = json!({ "action": "list", "table": "phone_orders" });

    for i in 0..4 {
        let spoofed = format!("10.9.9.{}", i);
        let (status, _) =
            call_integration_via(&app, Some("wrong-key"), IP, Some(&spoofed), list.clone()).await;
        assert_eq!(status, 401);
    }
    let (status, _) =
        call_integration_via(&app, Some("wrong-key"), IP, Some("10.9.9.200"), list).await;
    assert_eq!(status, 429);
}

#[actix_rt::test]
async fn test_proxy_mode_counts_forwarded_clients_separately() {
    let ctx = TestContext::behind_proxy();
    let app = create_test_app(&ctx).await;
    let list = json!({ "action": "list", "table": "phone_orders" });
    let proxy = "192.0.2.50";

    for _ in 0..5 {
        call_integration_via(&app, Some("wrong-key"), proxy, Some("198.51.100.1"), list.clone())
            .await;
    }
    let (status, _) = call_integration_via(
        &app,
        Some(INTEGRATION_KEY),
        proxy,
        Some("198.51.100.1"),
        list.clone(),
    )
    .await;
    assert_eq!(status, 429);

    let (status, _) =
        call_integration_via(&app, Some(INTEGRATION_KEY), proxy, Some("198.51.100.2"), list)
            .await;
    assert_eq!(status, 200);
}

#[actix_rt::test]
async fn test_successful_auth_resets_failures() {
    let ctx = TestContext::new();
    let app = create_test_app(&ctx).await;
    let list = json!({ "action": "list", "table": "computer_orders" });

    for _ in 0..4 {
        call_integration(&app, Some("wrong-key"), IP, list.clone()).await;
    }
    let (status, _) = call_integration(&app, Some(INTEGRATION_KEY), IP, list.clone()).await;
    assert_eq!(status, 200);

    let (status, _) = call_integration(&app, Some("wrong-key"), IP, list).await;
    assert_eq!(status, 401);
}

#[actix_rt::test]
async fn test_create_reports_missing_fields() {
    let ctx = TestContext::new();
    let app = create_test_app(&ctx).await;

    let (status, body) = call_integration(
        &app,
        Some(INTEGRATION_KEY),
        IP,
        json!({
            "action": "create",
            "table": "phone_orders",
            "data": { "client_name": "Quito", "device_model": "iPhone 12", "defect": "No signal" }
        }),
    )
    .await;

    assert_eq!(status, 400);
    let error = body["error"].as_str().unwrap();
    assert!(error.contains("client_phone"), "{}", error);
    assert!(!error.contains("client_name"));
}

#[actix_rt::test]
async fn test_order_lifecycle() {
    let ctx = TestContext::new();
    let app = create_test_app(&ctx).await;

    let (status, created) = call_integration(
        &app,
        Some(INTEGRATION_KEY),
        IP,
        json!({
            "action": "create",
            "table": "phone_orders",
            "data": {
                "client_name": "Renata",
                "client_phone": "11 95555-0000",
                "device_brand": "Motorola",
                "device_model": "Moto G84",
                "defect": "Battery drains fast"
            }
        }),
    )
    .await;
    assert_eq!(status, 201);
    assert_eq!(created["success"], true);
    assert_eq!(created["data"]["os_number"], 1);
    assert_eq!(created["data"]["situation_id"], ctx.in_queue.to_string());
    let id = created["data"]["id"].as_str().unwrap().to_string();

    let (status, listed) = call_integration(
        &app,
        Some(INTEGRATION_KEY),
        IP,
        json!({ "action": "list", "table": "phone_orders", "filters": { "client_name": "ren" } }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["data"][0]["id"], id.as_str());

    let (status, updated) = call_integration(
        &app,
        Some(INTEGRATION_KEY),
        IP,
        json!({
            "action": "update",
            "table": "phone_orders",
            "id": id,
            "data": { "value_cents": 18900, "client_notified": true }
        }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(updated["data"]["value_cents"], 18900);
    assert_eq!(updated["data"]["client_notified"], true);
    assert_eq!(updated["data"]["client_name"], "Renata");

    let (status, cleared) = call_integration(
        &app,
        Some(INTEGRATION_KEY),
        IP,
        json!({
            "action": "update",
            "table": "phone_orders",
            "id": id,
            "data": { "value_cents": null, "device_brand": "" }
        }),
    )
    .await;
    assert_eq!(status, 200);
    assert!(cleared["data"]["value_cents"].is_null());
    assert!(cleared["data"]["device_brand"].is_null());
    assert_eq!(cleared["data"]["client_notified"], true);

    let (status, fetched) = call_integration(
        &app,
        Some(INTEGRATION_KEY),
        IP,
        json!({ "action": "get", "table": "phone_orders", "id": id }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(fetched["data"]["device_model"], "Moto G84");

    let (status, deleted) = call_integration(
        &app,
        Some(INTEGRATION_KEY),
        IP,
        json!({ "action": "delete", "table": "phone_orders", "id": id }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(deleted["data"]["deleted"], true);

    let (status, body) = call_integration(
        &app,
        Some(INTEGRATION_KEY),
        IP,
        json!({ "action": "get", "table": "phone_orders", "id": id }),
    )
    .await;
    assert_eq!(status, 404);
    assert!(body["error"].is_string());
}

#[actix_rt::test]
async fn test_lookup_actions() {
    let ctx = TestContext::new();
    let app = create_test_app(&ctx).await;

    let (status, body) = call_integration(
        &app,
        Some(INTEGRATION_KEY),
        IP,
        json!({ "action": "get_situations" }),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(body["data"][0]["name"], DEFAULT_SITUATION);
    assert_eq!(body["data"][0]["id"], ctx.in_queue.to_string());
}

#[actix_rt::test]
async fn test_unknown_table_and_action() {
    let ctx = TestContext::new();
    let app = create_test_app(&ctx).await;

    let (status, body) = call_integration(
        &app,
        Some(INTEGRATION_KEY),
        IP,
        json!({ "action": "list", "table": "tablet_orders" }),
    )
    .await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("tablet_orders"));

    let (status, body) = call_integration(
        &app,
        Some(INTEGRATION_KEY),
        IP,
        json!({ "action": "truncate", "table": "phone_orders" }),
    )
    .await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("truncate"));

    let (status, _) = call_integration(
        &app,
        Some(INTEGRATION_KEY),
        IP,
        json!({ "action": "get", "table": "phone_orders", "id": "not-a-uuid" }),
    )
    .await;
    assert_eq!(status, 400);
}
