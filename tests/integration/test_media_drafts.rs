//! Media drafts across saves, restarts and storage failures.

use std::sync::Arc;

use repair_desk_lib::models::{MediaKind, OrderFields, OrderScope, OrderSector};
use repair_desk_lib::services::media::RawFile;
use repair_desk_lib::services::media_set::DraftKey;
use repair_desk_lib::services::{BlobStore, DurableStore, FileDurableStore};

use super::test_helpers::*;

fn photo(name: &str) -> RawFile {
    RawFile::new(name, Some("image/png".to_string()), png_bytes(64, 48))
}

fn clip(name: &str) -> RawFile {
    RawFile::new(name, Some("application/octet-stream".to_string()), vec![0, 0, 0, 32, 1, 2])
}

#[tokio::test]
async fn test_new_order_media_moves_out_of_temp_on_first_save() {
    let ctx = TestContext::new();
    let key = DraftKey::new("tab-new", OrderSector::Computer, None).unwrap();

    let report = ctx
        .service
        .media()
        .process_batch(key.clone(), vec![photo("front.png"), clip("boot.mp4")])
        .await
        .unwrap();
    assert!(report.failed.is_empty());
    assert!(
        report
            .files
            .iter()
            .all(|f| f.path.starts_with("computer/temp/"))
    );
    assert_eq!(report.files[0].name, "front.jpg");
    assert_eq!(report.files[0].kind, MediaKind::Image);
    assert_eq!(report.files[1].kind, MediaKind::Video);

    let saved = ctx
        .service
        .create(OrderSector::Computer, computer_fields("Nina"), Some(key.clone()))
        .await
        .unwrap();

    let prefix = format!("computer/{}/", saved.order.id);
    assert_eq!(saved.order.media_files.len(), 2);
    for file in &saved.order.media_files {
        assert!(file.path.starts_with(&prefix), "{} not relocated", file.path);
        assert!(ctx.blobs.contains(&file.path));
    }
    assert!(ctx.blobs.paths().iter().all(|p| !p.contains("/temp/")));

    // The stored order carries the relocated list and the draft is gone.
    let stored = ctx
        .service
        .get(OrderSector::Computer, saved.order.id)
        .await
        .unwrap();
    assert_eq!(stored.media_files, saved.order.media_files);
    assert!(ctx.drafts.get(&key.storage_key()).is_none());
}

#[tokio::test]
async fn test_failed_move_keeps_temp_path() {
    let ctx = TestContext::new();
    let key = DraftKey::new("tab-move", OrderSector::Phone, None).unwrap();

    let report = ctx
        .service
        .media()
        .process_batch(key.clone(), vec![clip("a.mp4"), clip("b.webm")])
        .await
        .unwrap();
    let stuck = report.files[0].path.clone();
    ctx.blobs.fail_path(&stuck);

    let saved = ctx
        .service
        .create(OrderSector::Phone, phone_fields("Otto", None), Some(key))
        .await
        .unwrap();

    let paths: Vec<_> = saved
        .order
        .media_files
        .iter()
        .map(|f| f.path.clone())
        .collect();
    assert!(paths.contains(&stuck));
    assert!(
        paths
            .iter()
            .any(|p| p.starts_with(&format!("{}/", saved.order.id)))
    );
}

#[tokio::test]
async fn test_draft_survives_restart_and_urls_are_resigned() {
    let dir = tempfile::tempdir().unwrap();
    let first = TestContext::with_drafts(Arc::new(FileDurableStore::new(dir.path()).unwrap()));
    let key = DraftKey::new("tab-restart", OrderSector::Phone, None).unwrap();

    let report = first
        .service
        .media()
        .process_batch(key.clone(), vec![photo("serial.png")])
        .await
        .unwrap();
    let original = report.files[0].clone();

    // A new process reading the same session directory and the same bucket.
    let drafts = Arc::new(FileDurableStore::new(dir.path()).unwrap());
    let second = build_service(first.store.clone(), first.blobs.clone(), drafts, 10);

    let files = second.open_draft(key).await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path, original.path);
    assert_ne!(files[0].url, original.url);
}

#[tokio::test]
async fn test_existing_order_draft_merges_server_and_local_files() {
    let ctx = TestContext::new();
    let order = ctx
        .service
        .create(OrderSector::Phone, phone_fields("Paula", None), None)
        .await
        .unwrap()
        .order;
    let key = DraftKey::new("tab-edit", OrderSector::Phone, Some(order.id)).unwrap();

    // Uploaded before the server list was loaded (e.g. the camera app
    // reloaded the form).
    let local = ctx
        .service
        .media()
        .process_batch(key.clone(), vec![clip("local.mp4")])
        .await
        .unwrap()
        .files;
    assert!(local[0].path.starts_with(&format!("{}/", order.id)));

    // Meanwhile the saved order gained a file of its own.
    let server = ctx
        .service
        .media()
        .process_file(clip("server.mp4"), &OrderSector::Phone.order_prefix(order.id))
        .await
        .unwrap();
    let mut fields = phone_fields("Paula", None);
    fields.media_files = Some(vec![server.clone()]);
    ctx.service
        .update(OrderSector::Phone, order.id, fields, None)
        .await
        .unwrap();

    let files = ctx.service.open_draft(key.clone()).await.unwrap();
    let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec![server.path.as_str(), local[0].path.as_str()]);

    // Loading again does not duplicate anything.
    let again = ctx.service.open_draft(key).await.unwrap();
    assert_eq!(again.len(), 2);
}

#[tokio::test]
async fn test_edit_through_unopened_draft_keeps_saved_media() {
    let ctx = TestContext::new();
    let new_key = DraftKey::new("tab-a", OrderSector::Phone, None).unwrap();
    ctx.service
        .media()
        .process_batch(new_key.clone(), vec![clip("before.mp4")])
        .await
        .unwrap();
    let order = ctx
        .service
        .create(OrderSector::Phone, phone_fields("Sara", None), Some(new_key))
        .await
        .unwrap()
        .order;
    assert_eq!(order.media_files.len(), 1);

    // A second tab edits the order without ever loading its media.
    let edit_key = DraftKey::new("tab-b", OrderSector::Phone, Some(order.id)).unwrap();
    let fields = OrderFields {
        client_name: Some("Sara Lima".to_string()),
        ..Default::default()
    };
    let updated = ctx
        .service
        .update(OrderSector::Phone, order.id, fields, Some(edit_key))
        .await
        .unwrap()
        .order;

    assert_eq!(updated.client_name, "Sara Lima");
    assert_eq!(updated.media_files, order.media_files);
}

#[tokio::test]
async fn test_uploads_into_unopened_draft_are_appended_on_edit() {
    let ctx = TestContext::new();
    let new_key = DraftKey::new("tab-a", OrderSector::Phone, None).unwrap();
    ctx.service
        .media()
        .process_batch(new_key.clone(), vec![clip("first.mp4")])
        .await
        .unwrap();
    let order = ctx
        .service
        .create(OrderSector::Phone, phone_fields("Tais", None), Some(new_key))
        .await
        .unwrap()
        .order;

    let edit_key = DraftKey::new("tab-c", OrderSector::Phone, Some(order.id)).unwrap();
    let added = ctx
        .service
        .media()
        .process_batch(edit_key.clone(), vec![clip("second.mp4")])
        .await
        .unwrap()
        .uploaded;

    let fields = OrderFields {
        client_name: Some("Tais".to_string()),
        ..Default::default()
    };
    let updated = ctx
        .service
        .update(OrderSector::Phone, order.id, fields, Some(edit_key.clone()))
        .await
        .unwrap()
        .order;

    let paths: Vec<_> = updated.media_files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![order.media_files[0].path.as_str(), added[0].path.as_str()]
    );
    assert!(ctx.drafts.get(&edit_key.storage_key()).is_none());
}

#[tokio::test]
async fn test_failed_media_list_write_still_reports_the_created_order() {
    let ctx = TestContext::new();
    let key = DraftKey::new("tab-write", OrderSector::Phone, None).unwrap();
    let temp_path = ctx
        .service
        .media()
        .process_batch(key.clone(), vec![clip("a.mp4")])
        .await
        .unwrap()
        .files[0]
        .path
        .clone();
    ctx.store.set_media_writes_down(true);

    let saved = ctx
        .service
        .create(OrderSector::Phone, phone_fields("Uli", None), Some(key.clone()))
        .await
        .unwrap();

    let scope = OrderScope::new(OWNER_ID, OrderSector::Phone);
    assert_eq!(ctx.store.active_count(scope), 1);
    assert_eq!(saved.order.media_files[0].path, temp_path);
    assert!(ctx.drafts.get(&key.storage_key()).is_none());
}

#[tokio::test]
async fn test_lost_media_list_is_recovered_from_storage() {
    let ctx = TestContext::new();
    let order = ctx
        .service
        .create(OrderSector::Phone, phone_fields("Rita", None), None)
        .await
        .unwrap()
        .order;
    ctx.blobs
        .upload(
            &format!("{}/1700000000000_abcdefghij.jpg", order.id),
            vec![1, 2, 3],
            "image/jpeg",
            false,
        )
        .await
        .unwrap();

    let key = DraftKey::new("tab-recover", OrderSector::Phone, Some(order.id)).unwrap();
    let files = ctx.service.open_draft(key).await.unwrap();

    assert_eq!(files.len(), 1);
    assert_eq!(files[0].kind, MediaKind::Image);
    assert_eq!(files[0].name, "1700000000000_abcdefghij.jpg");
}

#[tokio::test]
async fn test_remove_keeps_entry_when_blob_delete_fails() {
    let ctx = TestContext::new();
    let key = DraftKey::new("tab-remove", OrderSector::Phone, None).unwrap();
    let files = ctx
        .service
        .media()
        .process_batch(key.clone(), vec![clip("a.mp4"), clip("b.mp4")])
        .await
        .unwrap()
        .files;

    ctx.blobs.fail_path(&files[0].path);
    assert!(
        ctx.service
            .media()
            .remove_file(key.clone(), &files[0].path)
            .await
            .is_err()
    );
    assert_eq!(
        ctx.service.media().draft_files(key.clone()).unwrap().len(),
        2
    );

    let remaining = ctx
        .service
        .media()
        .remove_file(key, &files[1].path)
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(!ctx.blobs.contains(&files[1].path));
}

#[tokio::test]
async fn test_closing_session_forgets_its_drafts() {
    let ctx = TestContext::new();
    let phone = DraftKey::new("tab-close", OrderSector::Phone, None).unwrap();
    let computer = DraftKey::new("tab-close", OrderSector::Computer, None).unwrap();
    let other = DraftKey::new("tab-other", OrderSector::Phone, None).unwrap();

    let mut paths = Vec::new();
    for key in [&phone, &computer, &other] {
        let report = ctx
            .service
            .media()
            .process_batch(key.clone(), vec![clip("x.mp4")])
            .await
            .unwrap();
        paths.push(report.files[0].path.clone());
    }

    ctx.service.media().close_session("tab-close").await;

    assert!(!ctx.blobs.contains(&paths[0]));
    assert!(!ctx.blobs.contains(&paths[1]));
    assert!(ctx.blobs.contains(&paths[2]));
    assert!(ctx.service.media().draft_files(phone).unwrap().is_empty());
    assert!(ctx.service.media().draft_files(computer).unwrap().is_empty());
    assert_eq!(ctx.service.media().draft_files(other).unwrap().len(), 1);
}
