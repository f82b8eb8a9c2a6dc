//! RAGFlow client against a local stub of the dataset and retrieval API.

use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use intel_hub::config::RetrievalConfig;
use intel_hub::error::StoreError;
use intel_hub::ragflow::{RagflowClient, RetrievalQuery, RetrievalStore};

#[derive(Clone, Default)]
struct Recorded {
    deletes: Arc<Mutex<Vec<(String, Value)>>>,
    retrievals: Arc<Mutex<Vec<Value>>>,
}

async fn datasets() -> Json<Value> {
    Json(json!({"code": 0, "data": [{"id": "ds-1", "name": "Intelligence Hub"}]}))
}

/// `gone` answers with a store-level error code.
async fn delete_documents(
    State(rec): State<Recorded>,
    Path(dataset): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    rec.deletes.lock().unwrap().push((dataset, body.clone()));
    if body["ids"][0] == "gone" {
        return Json(json!({"code": 102, "message": "document not found"}));
    }
    Json(json!({"code": 0}))
}

async fn retrieval(State(rec): State<Recorded>, Json(body): Json<Value>) -> Json<Value> {
    rec.retrievals.lock().unwrap().push(body);
    Json(json!({"code": 0, "data": {"chunks": [
        {"document_id": "doc-a", "document_keyword": "a.md", "content": "alpha", "similarity": 0.9},
        {"document_id": "doc-b", "document_keyword": "b.md", "content": "beta", "similarity": 0.4}
    ]}}))
}

async fn stub() -> (RagflowClient, Recorded) {
    let rec = Recorded::default();
    let app = Router::new()
        .route("/api/v1/datasets", get(datasets))
        .route("/api/v1/datasets/{id}/documents", delete(delete_documents))
        .route("/api/v1/retrieval", post(retrieval))
        .with_state(rec.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = RetrievalConfig {
        base_url: format!("http://{}", addr),
        ..Default::default()
    };
    (RagflowClient::new(config, "rf-test".to_string()).unwrap(), rec)
}

#[tokio::test]
async fn delete_targets_the_resolved_dataset() {
    let (client, rec) = stub().await;

    client.delete_document("doc-old").await.unwrap();
    let deletes = rec.deletes.lock().unwrap().clone();
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].0, "ds-1");
    assert_eq!(deletes[0].1, json!({"ids": ["doc-old"]}));

    let err = client.delete_document("gone").await.unwrap_err();
    assert!(matches!(err, StoreError::Api { code: 102, .. }));
}

#[tokio::test]
async fn retrieval_scopes_and_truncates() {
    let (client, rec) = stub().await;

    let chunks = client
        .retrieve(&RetrievalQuery {
            question: "compute".to_string(),
            document_ids: vec!["doc-a".to_string()],
            top_k: 1,
        })
        .await
        .unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].store_doc_id, "doc-a");

    let body = rec.retrievals.lock().unwrap()[0].clone();
    assert_eq!(body["dataset_ids"], json!(["ds-1"]));
    assert_eq!(body["document_ids"], json!(["doc-a"]));
    assert_eq!(body["top_k"], 1);
}
