mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{create_product_schema, development, product_type, Harness, SlowExecutor, TestDb};
use eav_schema_sync::backup::BackupType;
use eav_schema_sync::schema::{AttributeConfig, BackendType, EntityTypeConfig};
use eav_schema_sync::sync::events::{SYNC_COMPLETED, SYNC_FAILED, SYNC_STARTED};
use eav_schema_sync::sync::{SyncOptions, SyncState, SyncStatus, SyncStrategy};
use pretty_assertions::assert_eq;
use serde_json::json;

fn category_type() -> EntityTypeConfig {
    EntityTypeConfig::new("category", "category")
        .with_attribute("name", AttributeConfig::new(BackendType::Varchar))
}

#[tokio::test]
async fn additive_sync_backs_up_and_applies() {
    let harness = Harness::new(vec![product_type()], development()).await;
    harness.db.create_entity_table("product").await;
    harness
        .db
        .exec("INSERT INTO product (created_at) VALUES ('2024-01-01 00:00:00')")
        .await;

    let result = harness
        .engine
        .sync("product", &SyncOptions::default())
        .await
        .unwrap();

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.status, SyncStatus::Completed);
    assert_eq!(
        result.states,
        vec![
            SyncState::Analyzing,
            SyncState::Validating,
            SyncState::BackingUp,
            SyncState::Applying,
            SyncState::Verifying,
            SyncState::Completed,
        ]
    );
    assert_eq!(result.applied_changes.len(), 1);
    assert_eq!(result.metadata["verification"], json!("passed"));

    let backups = harness.backups.list_backups(Some("product")).await.unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].backup_type, BackupType::Full);
    assert_eq!(result.backup_id.as_deref(), Some(backups[0].id.as_str()));

    assert_eq!(harness.db.tables().await, vec!["product", "product_varchar"]);
    assert_eq!(harness.db.count("product").await, 1);
    assert!(harness.analyzer.analyze("product").await.unwrap().is_in_sync());
}

#[tokio::test]
async fn dry_run_leaves_the_database_untouched() {
    let harness = Harness::new(vec![product_type()], development()).await;
    harness.db.create_entity_table("product").await;
    let before = harness.analyzer.analyze("product").await.unwrap();
    let tables = harness.db.tables().await;

    let result = harness
        .engine
        .sync("product", &SyncOptions::default().dry_run(true))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.status, SyncStatus::DryRun);
    assert!(result.applied_changes.is_empty());
    assert!(result.backup_id.is_none());
    assert_eq!(result.states.last(), Some(&SyncState::DryRun));
    let preview = result.metadata["preview_sql"].as_array().unwrap();
    assert!(preview[0].as_str().unwrap().starts_with("CREATE TABLE \"product_varchar\""));

    harness.analyzer.clear_cache();
    let after = harness.analyzer.analyze("product").await.unwrap();
    assert_eq!(after.differences.descriptions(), before.differences.descriptions());
    assert_eq!(harness.db.tables().await, tables);
    assert!(harness.backups.list_backups(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn additive_strategy_skips_drop_differences() {
    let harness = Harness::new(vec![product_type()], development()).await;
    create_product_schema(&harness.db).await;
    harness.db.create_value_table("product_int", "INT").await;

    let result = harness
        .engine
        .sync("product", &SyncOptions::default().skip_validation(true))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.status, SyncStatus::NoApplicableChanges);
    assert!(harness.db.tables().await.contains(&"product_int".to_string()));
}

#[tokio::test]
async fn destructive_differences_fail_validation_without_force() {
    let harness = Harness::new(vec![product_type()], development()).await;
    create_product_schema(&harness.db).await;
    harness.db.create_value_table("product_int", "INT").await;
    let tables = harness.db.tables().await;

    let result = harness
        .engine
        .sync("product", &SyncOptions::default())
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.status, SyncStatus::ValidationFailed);
    assert!(!result.errors.is_empty());
    assert!(!result.states.contains(&SyncState::Applying));
    assert_eq!(harness.db.tables().await, tables);
    assert!(harness.backups.list_backups(None).await.unwrap().is_empty());
    assert_eq!(harness.events.names(), vec![SYNC_STARTED, SYNC_FAILED]);
}

#[tokio::test]
async fn drops_are_refused_even_when_forced() {
    let harness = Harness::new(vec![product_type()], development()).await;
    create_product_schema(&harness.db).await;
    harness.db.create_value_table("product_int", "INT").await;

    let options = SyncOptions::default()
        .strategy(SyncStrategy::Full)
        .force(true);
    let result = harness.engine.sync("product", &options).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.status, SyncStatus::Failed);
    assert!(result.errors[0].contains("Dropping structures is not supported"));
    assert!(result.backup_id.is_some());
    assert_eq!(result.states.last(), Some(&SyncState::Failed));
    assert!(harness.db.tables().await.contains(&"product_int".to_string()));
}

#[tokio::test]
async fn type_mismatch_needs_manual_migration() {
    let harness = Harness::new(vec![product_type()], development()).await;
    harness.db.create_entity_table("product").await;
    harness.db.create_value_table("product_varchar", "INT").await;
    harness
        .db
        .exec("CREATE INDEX idx_product_sku ON product_varchar (attribute_id, value)")
        .await;

    let additive = harness
        .engine
        .sync("product", &SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(additive.status, SyncStatus::NoApplicableChanges);

    let full = harness
        .engine
        .sync("product", &SyncOptions::default().strategy(SyncStrategy::Full))
        .await
        .unwrap();
    assert_eq!(full.status, SyncStatus::Failed);
    assert!(full.errors[0].contains("Manual migration required"));
    assert!(full.backup_id.is_none());
}

#[tokio::test]
async fn second_sync_finds_nothing_to_do() {
    let harness = Harness::new(vec![product_type()], development()).await;
    harness.db.create_entity_table("product").await;
    harness.db.create_value_table("product_varchar", "VARCHAR(255)").await;
    let options = SyncOptions::default().strategy(SyncStrategy::Full);

    let first = harness.engine.sync("product", &options).await.unwrap();
    assert_eq!(first.status, SyncStatus::Completed);
    assert!(first.backup_id.is_none());

    let second = harness.engine.sync("product", &options).await.unwrap();
    assert_eq!(second.status, SyncStatus::InSync);
    assert!(second.success);
    assert_eq!(second.states, vec![SyncState::Analyzing, SyncState::Completed]);

    assert_eq!(
        harness.events.names(),
        vec![SYNC_STARTED, SYNC_COMPLETED, SYNC_STARTED, SYNC_COMPLETED]
    );
}

#[tokio::test]
async fn sync_all_reports_every_entity_type() {
    let harness = Harness::new(vec![product_type(), category_type()], development()).await;
    harness.db.create_entity_table("product").await;
    harness.db.create_entity_table("category").await;
    harness.db.create_value_table("category_varchar", "VARCHAR(255)").await;

    let results = harness.engine.sync_all(&SyncOptions::default()).await;

    let codes: Vec<&str> = results.keys().map(String::as_str).collect();
    assert_eq!(codes, vec!["product", "category"]);
    assert_eq!(results["product"].status, SyncStatus::Completed);
    assert_eq!(results["category"].status, SyncStatus::InSync);
    assert!(results.values().all(|r| r.success));
}

#[tokio::test]
async fn empty_database_converges_in_one_sync() {
    let harness = Harness::new(vec![product_type()], development()).await;

    let first = harness
        .engine
        .sync("product", &SyncOptions::default())
        .await
        .unwrap();

    assert!(first.success, "errors: {:?}", first.errors);
    assert_eq!(first.status, SyncStatus::Completed);
    assert_eq!(first.applied_changes.len(), 2);
    assert_eq!(first.metadata["verification"], json!("passed"));
    assert_eq!(harness.db.tables().await, vec!["product", "product_varchar"]);

    let second = harness
        .engine
        .sync("product", &SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(second.status, SyncStatus::InSync);
}

#[tokio::test]
async fn dry_run_on_empty_database_previews_every_table() {
    let harness = Harness::new(vec![product_type()], development()).await;

    let result = harness
        .engine
        .sync("product", &SyncOptions::default().dry_run(true))
        .await
        .unwrap();

    assert_eq!(result.status, SyncStatus::DryRun);
    assert_eq!(result.metadata["would_apply"].as_array().unwrap().len(), 2);
    assert!(harness.db.tables().await.is_empty());
}

#[tokio::test]
async fn concurrent_syncs_of_one_entity_type_do_not_race() {
    let harness = Harness::new(vec![product_type()], development()).await;
    harness.db.create_entity_table("product").await;
    let options = SyncOptions::default();

    let (a, b) = tokio::join!(
        harness.engine.sync("product", &options),
        harness.engine.sync("product", &options)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.success, "errors: {:?}", a.errors);
    assert!(b.success, "errors: {:?}", b.errors);
    let mut statuses = vec![a.status.as_str(), b.status.as_str()];
    statuses.sort_unstable();
    assert_eq!(statuses, vec!["completed", "in_sync"]);
    assert_eq!(harness.db.tables().await, vec!["product", "product_varchar"]);
}

#[tokio::test]
async fn failing_difference_rolls_back_earlier_ones() {
    let entity = product_type().with_attribute("qty", AttributeConfig::new(BackendType::Int));
    let harness = Harness::new(vec![entity], development()).await;
    harness.db.create_entity_table("product").await;
    harness.db.create_value_table("product_int", "TEXT").await;

    let result = harness
        .engine
        .sync("product", &SyncOptions::default().strategy(SyncStrategy::Full))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.status, SyncStatus::Failed);
    assert!(result.errors[0].contains("Manual migration required"));
    assert!(result.applied_changes.is_empty());
    assert!(result.backup_id.is_some());
    assert_eq!(harness.db.tables().await, vec!["product", "product_int"]);
}

#[tokio::test]
async fn timeout_during_apply_fails_and_rolls_back() {
    let db = TestDb::new().await;
    db.create_entity_table("product").await;
    let slow = Arc::new(SlowExecutor::new(db.connection.clone(), Duration::from_secs(5)));
    let harness = Harness::with_executor(db, slow, vec![product_type()], development());

    let options = SyncOptions::default().timeout(Duration::from_millis(500));
    let result = harness.engine.sync("product", &options).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.status, SyncStatus::Failed);
    assert!(result.errors[0].contains("exceeded"), "errors: {:?}", result.errors);
    assert!(result.states.contains(&SyncState::Applying));
    assert!(!result.states.contains(&SyncState::Verifying));
    assert_eq!(harness.db.tables().await, vec!["product"]);
    assert_eq!(harness.events.names(), vec![SYNC_STARTED, SYNC_FAILED]);
}

#[tokio::test]
async fn sync_all_keeps_going_after_one_failure() {
    let harness = Harness::new(vec![product_type(), category_type()], development()).await;
    harness.db.create_entity_table("product").await;
    harness.db.create_entity_table("category").await;
    harness.db.create_value_table("category_varchar", "INT").await;

    let options = SyncOptions::default().strategy(SyncStrategy::Full);
    let results = harness.engine.sync_all(&options).await;

    assert_eq!(results.len(), 2);
    assert_eq!(results["product"].status, SyncStatus::Completed);
    assert!(results["product"].success);
    assert_eq!(results["category"].status, SyncStatus::Failed);
    assert!(results["category"].errors[0].contains("Manual migration required"));
    assert!(harness
        .db
        .tables()
        .await
        .contains(&"product_varchar".to_string()));
}
