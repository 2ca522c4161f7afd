mod common;

use common::*;
use gmind::error::Error;
use std::sync::atomic::Ordering;

async fn store(h: &Harness, id: &str, vector: &[f32]) {
    h.db.insert_message_if_absent(&remote(id, "x@example.com", id, 1_000))
        .await
        .unwrap();
    h.db.save_vector(id, id, vector).await.unwrap();
}

#[tokio::test]
async fn results_are_ranked_by_dot_product() {
    let h = Harness::new(Vec::new()).await;
    store(&h, "invoice", &[2.0, 0.0, 0.0, 0.0]).await;
    store(&h, "receipt", &[1.0, 1.0, 0.0, 0.0]).await;
    store(&h, "party", &[0.0, 0.0, 3.0, 0.0]).await;
    store(&h, "refund", &[-1.0, 0.0, 0.0, 5.0]).await;
    h.ai.embed_as("billing", vec![1.0, 0.5, 0.0, 0.0]);

    let results = h.search.search("billing").await.unwrap();
    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["invoice", "receipt", "party", "refund"]);
    assert_eq!(results[0].score, 2.0);
    assert_eq!(results[1].score, 1.5);
    assert_eq!(results[3].score, -1.0);
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));

    let messages = h.search.search_messages("billing").await.unwrap();
    let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["invoice", "receipt", "party", "refund"]);
}

#[tokio::test]
async fn at_most_ten_results_and_deterministic() {
    let h = Harness::new(Vec::new()).await;
    for i in 0..15 {
        let weight = (i % 5) as f32;
        store(&h, &format!("m{:02}", i), &[weight, 1.0, 0.0, 0.0]).await;
    }
    h.ai.embed_as("anything", vec![1.0, 1.0, 1.0, 1.0]);

    let first = h.search.search("anything").await.unwrap();
    assert_eq!(first.len(), 10);
    assert!(first.windows(2).all(|w| w[0].score >= w[1].score));
    assert_eq!(first[0].id, "m04");
    assert_eq!(first, h.search.search("anything").await.unwrap());
}

#[tokio::test]
async fn mixed_dimensions_are_rejected() {
    let h = Harness::new(Vec::new()).await;
    store(&h, "ok", &[1.0, 0.0, 0.0, 0.0]).await;
    store(&h, "old-model", &[1.0, 0.0]).await;

    let err = h.search.search("query").await.unwrap_err();
    assert!(matches!(
        err,
        Error::DimensionMismatch {
            query: 4,
            stored: 2
        }
    ));
}

#[tokio::test]
async fn blank_query_does_not_call_the_model() {
    let h = Harness::new(Vec::new()).await;
    store(&h, "a", &[1.0, 0.0, 0.0, 0.0]).await;

    assert!(h.search.search("   ").await.unwrap().is_empty());
    assert!(h.search.search_messages("").await.unwrap().is_empty());
    assert_eq!(h.ai.embed_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_store_and_model_failures() {
    let h = Harness::new(Vec::new()).await;
    assert!(h.search.search("hello").await.unwrap().is_empty());
    assert!(h.search.search_messages("hello").await.unwrap().is_empty());

    h.ai.fail_embed.store(true, Ordering::SeqCst);
    let err = h.search.search("hello").await.unwrap_err();
    assert!(matches!(err, Error::Inference(_)));
}
