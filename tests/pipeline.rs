//! Batch pipeline against in-memory fakes of the retrieval store and gateway.

mod common;

use std::sync::atomic::Ordering;

use common::{payload, write_bundle, FakeGateway, FakeStore, Harness};
use intel_hub::archive;
use intel_hub::error::HubError;
use intel_hub::ingest::BatchOptions;
use intel_hub::jobs;
use intel_hub::llm::ModelTier;
use intel_hub::progress::NoProgress;

const REPORT: &str = "# Gulf Digital Economy 2024\n\nPublished by the IMF in 2024.\n\nBody text.\n";

async fn state_of(h: &Harness, key: &str) -> (String, Option<String>, Option<String>) {
    let row: (String, Option<String>, Option<String>) =
        sqlx::query_as("SELECT state, summary, error FROM documents WHERE bundle_key = ?")
            .bind(key)
            .fetch_one(&h.pool)
            .await
            .unwrap();
    row
}

#[tokio::test]
async fn batch_counters_converge_with_a_broken_bundle() {
    let h = Harness::new().await;
    let root = h.reports();
    let mut bundles = Vec::new();
    for key in ["alpha", "bravo", "charlie"] {
        bundles.push(write_bundle(&root, key, REPORT, &[1, 2]));
    }
    let broken = root.join("delta");
    std::fs::create_dir_all(&broken).unwrap();
    std::fs::write(broken.join("delta.md"), "   \n").unwrap();
    bundles.push(broken);

    let opts = BatchOptions {
        concurrent: 3,
        ..Default::default()
    };
    let report = h.pipeline().process_batch(bundles, &opts, &NoProgress).await.unwrap();
    assert_eq!(report.total, 4);
    assert_eq!(report.completed, 3);
    assert_eq!(report.failed, 1);
    assert!(report.errors[0].1.starts_with("ParseError"));

    let job = jobs::get_job(&h.pool, &report.job_id).await.unwrap();
    assert_eq!(job.job.status, "completed");
    assert_eq!(job.job.total_items, 4);
    assert_eq!(job.job.processed_items + job.job.failed_items, 4);
    assert_eq!(job.job.failed_items, 1);

    // The unparseable bundle never gets a document row.
    assert_eq!(h.count("SELECT COUNT(*) FROM documents").await, 3);
    for key in ["alpha", "bravo", "charlie"] {
        let (state, summary, error) = state_of(&h, key).await;
        assert_eq!(state, "completed");
        assert!(!summary.unwrap_or_default().is_empty());
        assert!(error.is_none());
    }
}

#[tokio::test]
async fn extracted_items_are_split_by_type() {
    let gateway = FakeGateway::default();
    *gateway.extraction_default.lock().unwrap() = payload(3, 5, 0, 2, 1);
    let h = Harness::with(FakeStore::default(), gateway).await;
    let bundle = write_bundle(&h.reports(), "outlook", REPORT, &[1, 2, 3]);

    let report = h
        .pipeline()
        .process_batch(vec![bundle], &BatchOptions::default(), &NoProgress)
        .await
        .unwrap();
    assert_eq!(report.completed, 1);

    assert_eq!(h.count("SELECT COUNT(*) FROM extracted_items").await, 11);
    for (kind, n) in [
        ("finding", 3),
        ("statistic", 5),
        ("quote", 0),
        ("insight", 2),
        ("recommendation", 1),
    ] {
        let got = h
            .count(&format!(
                "SELECT COUNT(*) FROM extracted_items WHERE item_type = '{}'",
                kind
            ))
            .await;
        assert_eq!(got, n, "{}", kind);
    }

    let hook: Option<String> = sqlx::query_scalar("SELECT briefing_hook FROM documents")
        .fetch_one(&h.pool)
        .await
        .unwrap();
    assert_eq!(hook.as_deref(), Some("Open with this."));
}

#[tokio::test]
async fn invalid_extraction_json_fails_the_document() {
    let gateway = FakeGateway::default();
    gateway.extract_for("CORRUPT-MARKER", "this is not json");
    let h = Harness::with(FakeStore::default(), gateway).await;
    let bundle = write_bundle(
        &h.reports(),
        "garbled",
        "# Garbled\n\nCORRUPT-MARKER in the text.\n",
        &[1],
    );

    let report = h
        .pipeline()
        .process_batch(vec![bundle], &BatchOptions::default(), &NoProgress)
        .await
        .unwrap();
    assert_eq!(report.failed, 1);

    let (state, summary, error) = state_of(&h, "garbled").await;
    assert_eq!(state, "failed");
    assert!(summary.is_none());
    assert!(error.unwrap().starts_with("ExtractionError"));

    // One call plus one retry.
    assert_eq!(h.gateway.calls_for(ModelTier::Extraction), 2);

    let job = jobs::get_job(&h.pool, &report.job_id).await.unwrap();
    assert_eq!(job.job.failed_items, 1);
    assert_eq!(job.job.processed_items, 0);
    assert_eq!(job.job.status, "failed");
    assert_eq!(h.count("SELECT COUNT(*) FROM extracted_items").await, 0);
}

#[tokio::test]
async fn resubmission_skips_unless_forced() {
    let h = Harness::new().await;
    let bundle = write_bundle(&h.reports(), "stable", REPORT, &[1]);
    let pipeline = h.pipeline();

    pipeline
        .process_batch(vec![bundle.clone()], &BatchOptions::default(), &NoProgress)
        .await
        .unwrap();
    let first_id: String = sqlx::query_scalar("SELECT id FROM documents")
        .fetch_one(&h.pool)
        .await
        .unwrap();

    let again = pipeline
        .process_batch(vec![bundle.clone()], &BatchOptions::default(), &NoProgress)
        .await
        .unwrap();
    assert_eq!(again.skipped, 1);
    assert_eq!(h.count("SELECT COUNT(*) FROM documents").await, 1);
    assert_eq!(h.gateway.calls_for(ModelTier::Extraction), 1);

    let job = jobs::get_job(&h.pool, &again.job_id).await.unwrap();
    assert_eq!(job.job.status, "completed");
    assert_eq!(job.job.skipped_items, 1);
    assert_eq!(job.job.processed_items, 1);

    let forced = BatchOptions {
        force: true,
        ..Default::default()
    };
    let report = pipeline.process_batch(vec![bundle], &forced, &NoProgress).await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(h.gateway.calls_for(ModelTier::Extraction), 2);
    // Unchanged text reuses the store document.
    assert_eq!(h.store.uploads.load(Ordering::SeqCst), 1);
    assert!(h.store.deleted.lock().unwrap().is_empty());

    let id: String = sqlx::query_scalar("SELECT id FROM documents")
        .fetch_one(&h.pool)
        .await
        .unwrap();
    assert_eq!(id, first_id);
    assert_eq!(h.count("SELECT COUNT(*) FROM extracted_items").await, 5);
}

#[tokio::test]
async fn transient_upload_errors_are_retried() {
    let store = FakeStore::default();
    store.upload_failures.store(2, Ordering::SeqCst);
    let h = Harness::with(store, FakeGateway::default()).await;
    let bundle = write_bundle(&h.reports(), "flaky", REPORT, &[1]);

    let report = h
        .pipeline()
        .process_batch(vec![bundle], &BatchOptions::default(), &NoProgress)
        .await
        .unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(h.store.uploads.load(Ordering::SeqCst), 3);

    let store_id: Option<String> = sqlx::query_scalar("SELECT store_doc_id FROM documents")
        .fetch_one(&h.pool)
        .await
        .unwrap();
    assert_eq!(store_id.as_deref(), Some("store-flaky"));
}

#[tokio::test]
async fn exhausted_upload_retries_fail_before_extraction() {
    let store = FakeStore::default();
    store.upload_failures.store(10, Ordering::SeqCst);
    let h = Harness::with(store, FakeGateway::default()).await;
    let bundle = write_bundle(&h.reports(), "down", REPORT, &[1]);

    let report = h
        .pipeline()
        .process_batch(vec![bundle], &BatchOptions::default(), &NoProgress)
        .await
        .unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(h.store.uploads.load(Ordering::SeqCst), 3);
    assert_eq!(h.gateway.calls(), 0);

    let (state, _, error) = state_of(&h, "down").await;
    assert_eq!(state, "failed");
    assert!(error.unwrap().starts_with("IndexUploadError"));
}

#[tokio::test]
async fn failed_document_is_reprocessed_in_place() {
    let h = Harness::new().await;
    let bundle = write_bundle(&h.reports(), "retry-me", REPORT, &[1]);
    let pipeline = h.pipeline();

    h.gateway.set_failing(true);
    let first = pipeline
        .process_batch(vec![bundle.clone()], &BatchOptions::default(), &NoProgress)
        .await
        .unwrap();
    assert_eq!(first.failed, 1);
    let (state, _, _) = state_of(&h, "retry-me").await;
    assert_eq!(state, "failed");

    h.gateway.set_failing(false);
    let second = pipeline
        .process_batch(vec![bundle], &BatchOptions::default(), &NoProgress)
        .await
        .unwrap();
    assert_eq!(second.completed, 1);

    let (state, summary, error) = state_of(&h, "retry-me").await;
    assert_eq!(state, "completed");
    assert!(summary.is_some());
    assert!(error.is_none());
    assert_eq!(h.count("SELECT COUNT(*) FROM documents").await, 1);
}

#[tokio::test]
async fn reprocess_by_document_id() {
    let h = Harness::new().await;
    let bundle = write_bundle(&h.reports(), "again", REPORT, &[1]);
    let pipeline = h.pipeline();
    pipeline
        .process_batch(vec![bundle], &BatchOptions::default(), &NoProgress)
        .await
        .unwrap();
    let id: String = sqlx::query_scalar("SELECT id FROM documents")
        .fetch_one(&h.pool)
        .await
        .unwrap();

    let report = pipeline.reprocess(&id, "test").await.unwrap();
    assert_eq!(report.completed, 1);
    let job = jobs::get_job(&h.pool, &report.job_id).await.unwrap();
    assert_eq!(job.job.kind, "reprocess");

    assert!(pipeline.reprocess("missing", "test").await.is_err());
}

#[tokio::test]
async fn pages_outside_the_content_map_are_flagged() {
    let gateway = FakeGateway::default();
    // Statistics cite page 2; the bundle only maps page 1.
    *gateway.extraction_default.lock().unwrap() = payload(1, 1, 0, 0, 0);
    let h = Harness::with(FakeStore::default(), gateway).await;
    let bundle = write_bundle(&h.reports(), "short", REPORT, &[1]);

    h.pipeline()
        .process_batch(vec![bundle], &BatchOptions::default(), &NoProgress)
        .await
        .unwrap();

    let warnings: String = sqlx::query_scalar("SELECT page_warnings_json FROM documents")
        .fetch_one(&h.pool)
        .await
        .unwrap();
    let warnings: Vec<String> = serde_json::from_str(&warnings).unwrap();
    assert_eq!(warnings.len(), 1);

    // The page is still stored as reported.
    let page: Option<i64> =
        sqlx::query_scalar("SELECT page FROM extracted_items WHERE item_type = 'statistic'")
            .fetch_one(&h.pool)
            .await
            .unwrap();
    assert_eq!(page, Some(2));
}

#[tokio::test]
async fn changed_text_replaces_the_store_document() {
    let h = Harness::new().await;
    let bundle = write_bundle(&h.reports(), "revised", REPORT, &[1]);
    let pipeline = h.pipeline();
    pipeline
        .process_batch(vec![bundle.clone()], &BatchOptions::default(), &NoProgress)
        .await
        .unwrap();

    std::fs::write(bundle.join("revised.md"), "# Gulf Digital Economy 2024\n\nRevised edition.\n").unwrap();
    let forced = BatchOptions {
        force: true,
        ..Default::default()
    };
    let report = pipeline.process_batch(vec![bundle], &forced, &NoProgress).await.unwrap();
    assert_eq!(report.completed, 1);

    let store_id: Option<String> = sqlx::query_scalar("SELECT store_doc_id FROM documents")
        .fetch_one(&h.pool)
        .await
        .unwrap();
    assert_eq!(store_id.as_deref(), Some("store-revised-v2"));
    assert_eq!(*h.store.deleted.lock().unwrap(), vec!["store-revised".to_string()]);
}

#[tokio::test]
async fn persist_failure_fails_only_that_document() {
    let h = Harness::new().await;
    let root = h.reports();
    let good = write_bundle(&root, "sound", REPORT, &[1]);
    let bad = write_bundle(&root, "rejected", REPORT, &[1]);
    sqlx::query(
        r#"
        CREATE TRIGGER reject_items BEFORE INSERT ON extracted_items
        WHEN NEW.document_id = (SELECT id FROM documents WHERE bundle_key = 'rejected')
        BEGIN SELECT RAISE(ABORT, 'disk quota exceeded'); END
        "#,
    )
    .execute(&h.pool)
    .await
    .unwrap();

    let opts = BatchOptions {
        concurrent: 2,
        ..Default::default()
    };
    let report = h.pipeline().process_batch(vec![good, bad], &opts, &NoProgress).await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(report.failed, 1);

    let (state, summary, error) = state_of(&h, "rejected").await;
    assert_eq!(state, "failed");
    assert!(summary.is_none());
    assert!(error.unwrap().starts_with("StorageWriteError"));
    let rejected_items = h
        .count(
            "SELECT COUNT(*) FROM extracted_items i JOIN documents d ON d.id = i.document_id \
             WHERE d.bundle_key = 'rejected'",
        )
        .await;
    assert_eq!(rejected_items, 0);

    let (state, _, _) = state_of(&h, "sound").await;
    assert_eq!(state, "completed");
    assert_eq!(h.count("SELECT COUNT(*) FROM extracted_items").await, 5);

    let job = jobs::get_job(&h.pool, &report.job_id).await.unwrap();
    assert_eq!(job.job.processed_items, 1);
    assert_eq!(job.job.failed_items, 1);
}

#[tokio::test]
async fn unpacked_bundles_stay_reprocessable() {
    let h = Harness::new().await;
    let scratch = tempfile::TempDir::new().unwrap();
    let unpacked = write_bundle(scratch.path(), "uploaded_report", REPORT, &[1]);
    let kept = archive::keep_bundles(&[unpacked], &h.config.bundles_dir()).unwrap();
    let pipeline = h.pipeline();
    pipeline
        .process_batch(kept, &BatchOptions::default(), &NoProgress)
        .await
        .unwrap();
    drop(scratch);

    let id: String = sqlx::query_scalar("SELECT id FROM documents")
        .fetch_one(&h.pool)
        .await
        .unwrap();
    let report = pipeline.reprocess(&id, "test").await.unwrap();
    assert_eq!(report.completed, 1);

    let (state, _, error) = state_of(&h, "uploaded_report").await;
    assert_eq!(state, "completed");
    assert!(error.is_none());
}

#[tokio::test]
async fn vanished_bundle_leaves_completed_document_alone() {
    let h = Harness::new().await;
    let bundle = write_bundle(&h.reports(), "ephemeral", REPORT, &[1]);
    let pipeline = h.pipeline();
    pipeline
        .process_batch(vec![bundle.clone()], &BatchOptions::default(), &NoProgress)
        .await
        .unwrap();
    let id: String = sqlx::query_scalar("SELECT id FROM documents")
        .fetch_one(&h.pool)
        .await
        .unwrap();
    std::fs::remove_dir_all(&bundle).unwrap();

    let err = pipeline.reprocess(&id, "test").await.unwrap_err();
    assert!(matches!(err, HubError::BadRequest(_)));

    // A forced batch that still names the path fails the item, not the document.
    let report = pipeline
        .process_batch(vec![bundle], &BatchOptions::reprocess("test"), &NoProgress)
        .await
        .unwrap();
    assert_eq!(report.failed, 1);

    let (state, summary, error) = state_of(&h, "ephemeral").await;
    assert_eq!(state, "completed");
    assert!(summary.is_some());
    assert!(error.is_none());
    assert_eq!(h.count("SELECT COUNT(*) FROM extracted_items").await, 5);
}
