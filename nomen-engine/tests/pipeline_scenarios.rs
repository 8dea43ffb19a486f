//! End-to-end normalization scenarios against an in-memory database

mod helpers;

use helpers::{build_pipeline, create_test_db, oracle_config, Behavior, FakeTransport};
use nomen_common::Error;
use nomen_engine::models::{SessionStatus, StageStatus, StageType};
use nomen_engine::services::oracle::OracleClient;
use nomen_engine::workflow::{AiStageOptions, NormalizationPipeline};
use std::sync::Arc;

async fn assert_consistent(pipeline: &NormalizationPipeline, session_id: i64) {
    let history = pipeline.get_history(session_id).await.unwrap();
    assert_eq!(history.session.stages_count as usize, history.stages.len());
    match history.stages.last() {
        Some(last) => assert_eq!(history.session.current_name, last.output_name),
        None => assert_eq!(history.session.current_name, history.session.original_name),
    }
}

#[tokio::test]
async fn test_misspelled_hammer_is_corrected_and_classified() {
    let pool = create_test_db().await;
    let pipeline = build_pipeline(&pool, None).await;

    let session = pipeline.start_session(1, "молотак строительный 500гр").await.unwrap();
    let pattern = pipeline.apply_pattern_stage(session.id).await.unwrap();
    assert_eq!(pattern.output_name, "молоток строительный 500 г");
    assert!(!pattern.applied_patterns.is_empty());

    let outcome = pipeline
        .apply_categorization_stage(session.id, "top_priority")
        .await
        .unwrap();
    let result = outcome.classification;
    assert!(result.final_confidence > 0.0);
    assert!(result.final_confidence <= 1.0);
    assert!(pipeline_tree_contains(&pool, &result.final_code).await);
    assert_eq!(outcome.stage.stage_type, StageType::Categorization);
    assert_eq!(outcome.stage.output_name, "молоток строительный 500 г");
    assert_eq!(outcome.stage.classification_strategy.as_deref(), Some("top_priority"));

    assert_consistent(&pipeline, session.id).await;
}

async fn pipeline_tree_contains(pool: &sqlx::SqlitePool, code: &str) -> bool {
    let found: Option<String> = sqlx::query_scalar("SELECT code FROM kpved_classifier WHERE code = ?")
        .bind(code)
        .fetch_optional(pool)
        .await
        .unwrap();
    found.is_some()
}

#[tokio::test]
async fn test_revert_to_second_of_three_stages() {
    let pool = create_test_db().await;
    let transport = FakeTransport::replying(
        r#"{"normalized_name": "Молоток строительный 500 г", "confidence": 0.9, "reasoning": "регистр"}"#,
    );
    let oracle = Arc::new(OracleClient::new(&oracle_config(1, 3, 500), transport));
    let pipeline = build_pipeline(&pool, Some(oracle)).await;

    let session = pipeline.start_session(1, "молотак строительный 500гр").await.unwrap();
    pipeline.apply_pattern_stage(session.id).await.unwrap();
    pipeline
        .apply_ai_stage(session.id, &AiStageOptions::default())
        .await
        .unwrap();
    pipeline
        .apply_categorization_stage(session.id, "top_priority")
        .await
        .unwrap();

    let stages = pipeline.get_history(session.id).await.unwrap().stages;
    assert_eq!(stages.len(), 3);

    let reverted = pipeline.revert_stage(session.id, stages[1].id).await.unwrap();
    assert_eq!(reverted.stages_count, 2);
    assert_eq!(reverted.current_name, stages[1].output_name);
    assert_eq!(reverted.status, SessionStatus::Reverted);

    // Reverting again to the same stage changes nothing
    let again = pipeline.revert_stage(session.id, stages[1].id).await.unwrap();
    assert_eq!(again.stages_count, reverted.stages_count);
    assert_eq!(again.current_name, reverted.current_name);

    assert_consistent(&pipeline, session.id).await;
}

#[tokio::test]
async fn test_oracle_timeouts_produce_failed_stage() {
    let pool = create_test_db().await;
    let transport = FakeTransport::new(Behavior::Hang);
    let oracle = Arc::new(OracleClient::new(&oracle_config(1, 3, 50), transport.clone()));
    let pipeline = build_pipeline(&pool, Some(oracle)).await;

    let session = pipeline.start_session(1, "молотак строительный 500гр").await.unwrap();
    let stage = pipeline
        .apply_ai_stage(session.id, &AiStageOptions::default())
        .await
        .unwrap();

    assert_eq!(transport.calls(), 3);
    assert_eq!(stage.status, StageStatus::Failed);
    assert_eq!(stage.output_name, stage.input_name);
    assert!(stage.error_message.is_some());

    let history = pipeline.get_history(session.id).await.unwrap();
    assert_eq!(history.session.status, SessionStatus::InProgress);
    assert_eq!(history.stages.len(), 1);
    assert_consistent(&pipeline, session.id).await;
}

#[tokio::test]
async fn test_non_transient_oracle_error_is_not_retried() {
    let pool = create_test_db().await;
    let transport = FakeTransport::new(Behavior::Fail(nomen_engine::services::OracleError::Api(
        401,
        "invalid key".to_string(),
    )));
    let oracle = Arc::new(OracleClient::new(&oracle_config(1, 3, 500), transport.clone()));
    let pipeline = build_pipeline(&pool, Some(oracle)).await;

    let session = pipeline.start_session(1, "молоток").await.unwrap();
    let stage = pipeline
        .apply_ai_stage(session.id, &AiStageOptions::default())
        .await
        .unwrap();

    assert_eq!(transport.calls(), 1);
    assert_eq!(stage.status, StageStatus::Failed);
}

#[tokio::test]
async fn test_revert_rejects_unknown_and_foreign_stages() {
    let pool = create_test_db().await;
    let pipeline = build_pipeline(&pool, None).await;

    let first = pipeline.start_session(1, "молотак строительный 500гр").await.unwrap();
    let second = pipeline.start_session(2, "Болт М10х50 оцинк.").await.unwrap();
    pipeline.apply_pattern_stage(first.id).await.unwrap();
    let foreign = pipeline.apply_pattern_stage(second.id).await.unwrap();

    let before = pipeline.get_history(first.id).await.unwrap();

    let err = pipeline.revert_stage(first.id, 9999).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    let err = pipeline.revert_stage(first.id, foreign.id).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    let after = pipeline.get_history(first.id).await.unwrap();
    assert_eq!(after.session.current_name, before.session.current_name);
    assert_eq!(after.session.stages_count, before.session.stages_count);
    assert_eq!(after.session.status, before.session.status);
}

#[tokio::test]
async fn test_ai_stage_requires_oracle() {
    let pool = create_test_db().await;
    let pipeline = build_pipeline(&pool, None).await;
    assert!(!pipeline.ai_enabled());

    let session = pipeline.start_session(1, "молоток").await.unwrap();
    let err = pipeline
        .apply_ai_stage(session.id, &AiStageOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    // Deterministic stages still work
    pipeline.apply_pattern_stage(session.id).await.unwrap();
    assert_consistent(&pipeline, session.id).await;
}

#[tokio::test]
async fn test_concurrent_stages_on_one_session_stay_consistent() {
    let pool = create_test_db().await;
    let pipeline = build_pipeline(&pool, None).await;
    let session_id = pipeline
        .start_session(1, "молотак строительный 500гр")
        .await
        .unwrap()
        .id;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pipeline = Arc::clone(&pipeline);
        handles.push(tokio::spawn(async move {
            pipeline.apply_pattern_stage(session_id).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let history = pipeline.get_history(session_id).await.unwrap();
    assert_eq!(history.stages.len(), 8);
    let ordinals: Vec<i64> = history.stages.iter().map(|s| s.ordinal).collect();
    assert_eq!(ordinals, (1..=8).collect::<Vec<i64>>());
    assert_consistent(&pipeline, session_id).await;
}
