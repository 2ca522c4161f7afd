mod common;

use chrono::NaiveDate;
use common::*;
use gmind::config::{EnrichmentConfig, OllamaConfig};
use gmind::enrich::Enricher;
use gmind::error::Error;
use gmind::ollama::InferenceService;
use std::sync::Arc;

async fn enricher_with(ai: Option<Arc<FakeInference>>) -> (tempfile::TempDir, gmind::db::Database, Enricher) {
    let (dir, db) = temp_db().await;
    db.insert_message_if_absent(&remote("a", "alice@example.com", "Deadline", 1_000))
        .await
        .unwrap();
    let ai = ai.map(|a| a as Arc<dyn InferenceService>);
    let enricher = Enricher::new(
        db.clone(),
        ai,
        &OllamaConfig::default(),
        &EnrichmentConfig::default(),
    );
    (dir, db, enricher)
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 2, 20).unwrap()
}

#[tokio::test]
async fn combined_answer_sets_both_signals() {
    let ai = Arc::new(FakeInference::new(4));
    ai.respond_with("重要度:5, 期限:2024-03-01");
    let (_dir, db, enricher) = enricher_with(Some(ai.clone())).await;
    db.set_body("a", "<p>Submit the report by March 1st.</p>")
        .await
        .unwrap();

    let found = enricher.extract_signals_on("a", today()).await.unwrap();
    assert_eq!(found.importance, Some(5));
    assert_eq!(found.deadline, NaiveDate::from_ymd_opt(2024, 3, 1));

    let a = db.get_message("a").await.unwrap().unwrap();
    assert_eq!(a.importance, 5);
    assert_eq!(a.deadline.as_deref(), Some("2024-03-01"));
}

#[tokio::test]
async fn empty_answer_leaves_stored_signals_alone() {
    let ai = Arc::new(FakeInference::new(4));
    ai.respond_with("重要度:, 期限:なし");
    let (_dir, db, enricher) = enricher_with(Some(ai)).await;
    db.set_body("a", "fyi").await.unwrap();
    db.set_signals("a", Some(3), None).await.unwrap();

    let found = enricher.extract_signals_on("a", today()).await.unwrap();
    assert!(found.is_empty());

    let a = db.get_message("a").await.unwrap().unwrap();
    assert_eq!(a.importance, 3);
    assert_eq!(a.deadline, None);
}

#[tokio::test]
async fn extraction_without_a_body_asks_nothing() {
    let ai = Arc::new(FakeInference::new(4));
    let (_dir, _db, enricher) = enricher_with(Some(ai.clone())).await;

    let found = enricher.extract_signals_on("a", today()).await.unwrap();
    assert!(found.is_empty());
    assert_eq!(ai.generate_calls(), 0);
}

#[tokio::test]
async fn vectorize_strips_markup_and_truncates() {
    let ai = Arc::new(FakeInference::new(4));
    let (_dir, db, enricher) = enricher_with(Some(ai)).await;

    let long = format!("<div>{}</div>", "あ".repeat(5000));
    enricher.vectorize("a", &long).await.unwrap();

    let stored = db.get_vector("a").await.unwrap().unwrap();
    assert_eq!(stored.content.chars().count(), enricher.char_budget());
    assert!(stored.content.chars().all(|c| c == 'あ'));
    assert_eq!(stored.vector.len(), 4);
}

#[tokio::test]
async fn vectorize_overwrites_the_previous_vector() {
    let ai = Arc::new(FakeInference::new(4));
    ai.embed_as("second", vec![0.0, 0.0, 0.0, 1.0]);
    let (_dir, db, enricher) = enricher_with(Some(ai)).await;

    enricher.vectorize("a", "first text").await.unwrap();
    enricher.vectorize("a", "second").await.unwrap();

    let stored = db.get_vector("a").await.unwrap().unwrap();
    assert_eq!(stored.content, "second");
    assert_eq!(stored.vector, vec![0.0, 0.0, 0.0, 1.0]);
}

#[tokio::test]
async fn missing_inference_client_is_service_unavailable() {
    let (_dir, db, enricher) = enricher_with(None).await;
    db.set_body("a", "body").await.unwrap();

    let err = enricher.vectorize("a", "text").await.unwrap_err();
    assert!(matches!(err, Error::ServiceUnavailable("inference")));
    assert!(enricher.summarize("a").await.is_err());
    assert!(db.get_vector("a").await.unwrap().is_none());
}
