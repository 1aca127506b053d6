//! Technician-facing order, draft and admin routes.

use actix_web::test;
use serde_json::{Value, json};

use super::test_helpers::*;

fn get(uri: &str) -> test::TestRequest {
    test::TestRequest::get()
        .uri(uri)
        .insert_header(("X-Integration-Key", INTEGRATION_KEY))
}

fn post_json(uri: &str, body: Value) -> test::TestRequest {
    test::TestRequest::post()
        .uri(uri)
        .insert_header(("X-Integration-Key", INTEGRATION_KEY))
        .set_json(body)
}

fn phone_body(client: &str, os_number: Option<i32>) -> Value {
    serde_json::to_value(phone_fields(client, os_number)).unwrap()
}

#[actix_rt::test]
async fn test_next_number_and_check_number() {
    let ctx = TestContext::new();
    let app = create_test_app(&ctx).await;

    let resp = test::call_service(&app, get("/api/v1/orders/phone/next-number").to_request()).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["os_number"], 1);

    let resp = test::call_service(
        &app,
        post_json("/api/v1/orders/phone", phone_body("Sara", Some(7))).to_request(),
    )
    .await;
    assert_eq!(resp.status(), 201);
    let created: Value = test::read_body_json(resp).await;
    assert_eq!(created["order"]["os_number"], 7);
    assert!(created["reassigned_from"].is_null());
    let id = created["order"]["id"].as_str().unwrap().to_string();

    let resp = test::call_service(
        &app,
        get("/api/v1/orders/phone/check-number/7").to_request(),
    )
    .await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["exists"], true);
    assert_eq!(body["existing"]["client_name"], "Sara");
    assert_eq!(body["existing"]["device_label"], "Samsung Galaxy A54");

    // Checking an order's own number while editing it is not a conflict.
    let resp = test::call_service(
        &app,
        get(&format!("/api/v1/orders/phone/check-number/7?exclude={}", id)).to_request(),
    )
    .await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["exists"], false);

    // The other sector has its own numbering.
    let resp = test::call_service(
        &app,
        get("/api/v1/orders/computer/check-number/7").to_request(),
    )
    .await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["exists"], false);
}

#[actix_rt::test]
async fn test_create_with_taken_number_reports_reassignment() {
    let ctx = TestContext::new();
    let app = create_test_app(&ctx).await;

    for client in ["Tiago", "Ursula"] {
        let resp = test::call_service(
            &app,
            post_json("/api/v1/orders/phone", phone_body(client, Some(3))).to_request(),
        )
        .await;
        assert_eq!(resp.status(), 201);
        if client == "Ursula" {
            let body: Value = test::read_body_json(resp).await;
            assert_eq!(body["order"]["os_number"], 4);
            assert_eq!(body["reassigned_from"]["os_number"], 3);
            assert_eq!(body["reassigned_from"]["client_name"], "Tiago");
        }
    }

    let resp = test::call_service(&app, get("/api/v1/orders/phone?limit=10").to_request()).await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["orders"][0]["os_number"], 4);
    assert_eq!(body["orders"][1]["os_number"], 3);
}

#[actix_rt::test]
async fn test_invalid_requests() {
    let ctx = TestContext::new();
    let app = create_test_app(&ctx).await;

    let resp = test::call_service(&app, get("/api/v1/orders/tablet/next-number").to_request()).await;
    assert_eq!(resp.status(), 400);

    let resp = test::call_service(
        &app,
        post_json("/api/v1/orders/computer", json!({ "client_name": "Vera" })).to_request(),
    )
    .await;
    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    let message = body["message"].as_str().unwrap();
    assert!(message.contains("equipment_type"));
    assert!(message.contains("defect"));

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/api/v1/orders/phone")
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 401);
}

#[actix_rt::test]
async fn test_upload_then_create_moves_media() {
    let ctx = TestContext::new();
    let app = create_test_app(&ctx).await;

    let body = multipart_body(&[
        ("label.png", "image/png", png_bytes(32, 32)),
        ("walkaround.mov", "application/octet-stream", vec![0, 0, 0, 20]),
        ("notes.txt", "text/plain", b"not media".to_vec()),
    ]);
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/drafts/tab-1/phone/new/media")
            .insert_header(("X-Integration-Key", INTEGRATION_KEY))
            .insert_header((
                "Content-Type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(body)
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let report: Value = test::read_body_json(resp).await;
    assert_eq!(report["uploaded"].as_array().unwrap().len(), 2);
    assert_eq!(report["failed"][0]["name"], "notes.txt");
    assert_eq!(report["files"][0]["name"], "label.jpg");
    assert_eq!(report["files"][0]["type"], "image");
    assert_eq!(report["files"][1]["type"], "video");

    let temp_path = report["files"][1]["path"].as_str().unwrap().to_string();
    assert_eq!(
        ctx.blobs.content_type(&temp_path).as_deref(),
        Some("video/quicktime")
    );

    // Reopening the draft (e.g. after a page reload) shows the same files.
    let resp = test::call_service(&app, get("/api/v1/drafts/tab-1/phone/new").to_request()).await;
    let draft: Value = test::read_body_json(resp).await;
    assert_eq!(draft["files"].as_array().unwrap().len(), 2);

    let resp = test::call_service(
        &app,
        post_json(
            "/api/v1/orders/phone?draft_session=tab-1",
            phone_body("Wagner", None),
        )
        .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 201);
    let created: Value = test::read_body_json(resp).await;
    let id = created["order"]["id"].as_str().unwrap();
    let media = created["order"]["media_files"].as_array().unwrap();
    assert_eq!(media.len(), 2);
    for file in media {
        assert!(file["path"].as_str().unwrap().starts_with(id));
    }
    assert!(!ctx.blobs.contains(&temp_path));

    let resp = test::call_service(&app, get("/api/v1/drafts/tab-1/phone/new").to_request()).await;
    let draft: Value = test::read_body_json(resp).await;
    assert!(draft["files"].as_array().unwrap().is_empty());
}

#[actix_rt::test]
async fn test_upload_limit_applies_per_file() {
    let ctx = TestContext::new();
    let app = create_test_app_with_limit(&ctx, 1024).await;

    // Together well over the limit; only the big one is refused.
    let body = multipart_body(&[
        ("small-1.mp4", "video/mp4", vec![7; 900]),
        ("huge.mp4", "video/mp4", vec![8; 4096]),
        ("small-2.mp4", "video/mp4", vec![9; 900]),
    ]);
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/drafts/tab-3/phone/new/media")
            .insert_header(("X-Integration-Key", INTEGRATION_KEY))
            .insert_header((
                "Content-Type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(body)
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let report: Value = test::read_body_json(resp).await;
    assert_eq!(report["uploaded"].as_array().unwrap().len(), 2);
    assert_eq!(report["failed"].as_array().unwrap().len(), 1);
    assert_eq!(report["failed"][0]["name"], "huge.mp4");
    assert!(
        report["failed"][0]["message"]
            .as_str()
            .unwrap()
            .contains("upload limit")
    );
    assert_eq!(report["files"].as_array().unwrap().len(), 2);
    assert_eq!(ctx.blobs.paths().len(), 2);
}

#[actix_rt::test]
async fn test_remove_media_and_close_session() {
    let ctx = TestContext::new();
    let app = create_test_app(&ctx).await;

    let body = multipart_body(&[
        ("a.mp4", "video/mp4", vec![1, 2, 3]),
        ("b.mp4", "video/mp4", vec![4, 5, 6]),
    ]);
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/drafts/tab-2/computer/new/media")
            .insert_header(("X-Integration-Key", INTEGRATION_KEY))
            .insert_header((
                "Content-Type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(body)
            .to_request(),
    )
    .await;
    let report: Value = test::read_body_json(resp).await;
    let first = report["files"][0]["path"].as_str().unwrap().to_string();
    let second = report["files"][1]["path"].as_str().unwrap().to_string();

    let resp = test::call_service(
        &app,
        test::TestRequest::delete()
            .uri(&format!(
                "/api/v1/drafts/tab-2/computer/new/media?path={}",
                urlencoding::encode(&first)
            ))
            .insert_header(("X-Integration-Key", INTEGRATION_KEY))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["files"].as_array().unwrap().len(), 1);
    assert!(!ctx.blobs.contains(&first));

    let resp = test::call_service(
        &app,
        test::TestRequest::delete()
            .uri("/api/v1/drafts/tab-2")
            .insert_header(("X-Integration-Key", INTEGRATION_KEY))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 204);
    assert!(!ctx.blobs.contains(&second));

    let resp = test::call_service(
        &app,
        get("/api/v1/drafts/tab-2/computer/new").to_request(),
    )
    .await;
    let body: Value = test::read_body_json(resp).await;
    assert!(body["files"].as_array().unwrap().is_empty());
}

#[actix_rt::test]
async fn test_admin_rotates_integration_key() {
    let ctx = TestContext::new();
    let app = create_test_app(&ctx).await;
    let new_key = "rotated-integration-key-abcdefghij";

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/admin/integration-key")
            .insert_header(("X-Admin-Key", "not-the-admin-key"))
            .set_json(json!({ "key": new_key }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 401);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/admin/integration-key")
            .insert_header(("X-Admin-Key", ADMIN_KEY))
            .set_json(json!({ "key": "short" }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 400);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/admin/integration-key")
            .insert_header(("X-Admin-Key", ADMIN_KEY))
            .set_json(json!({ "key": new_key }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["rotated"], true);
    assert!(body.get("generated_key").is_none_or(Value::is_null));

    let (status, _) = call_integration(
        &app,
        Some(INTEGRATION_KEY),
        "192.0.2.1",
        json!({ "action": "get_situations" }),
    )
    .await;
    assert_eq!(status, 401);

    let (status, _) = call_integration(
        &app,
        Some(new_key),
        "192.0.2.1",
        json!({ "action": "get_situations" }),
    )
    .await;
    assert_eq!(status, 200);
}

#[actix_rt::test]
async fn test_health_without_database() {
    let ctx = TestContext::new();
    let app = create_test_app(&ctx).await;

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/api/v1/ready").to_request(),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["database"], "in-memory");
}
