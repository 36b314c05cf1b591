//! End-to-end runs of the synthetic provider against the scratch database
//! named by `DATALIB_TEST_DATABASE_URL`. Every test returns early when it is
//! unset.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use datalib_core::schema::{self, ASSET_KEY, EOD_KEY};
use datalib_core::{RunStatus, Subscription};
use datalib_storage::{Library, SubscriptionManager};
use datalib_sync::{scheduled_run, Runner};
use tokio_cron_scheduler::JobScheduler;
use sqlx::Row;

async fn library() -> Option<Library> {
    let url = std::env::var("DATALIB_TEST_DATABASE_URL").ok()?;
    let library = match Library::open(&url).await {
        Ok(library) => library,
        Err(_) => Library::init(&url, "Test Library", "tests")
            .await
            .expect("initialize test library"),
    };
    Some(library)
}

async fn count(library: &Library, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(library.pool()).await.unwrap()
}

#[tokio::test]
async fn three_asset_universe_is_idempotent() {
    let Some(library) = library().await else { return };
    let manager = SubscriptionManager::new(library.pool().clone(), None);
    let sub = Subscription::new("synthetic", "Universe", &schema::data_types(&[ASSET_KEY]), BTreeMap::new());
    manager.create(&sub).await.unwrap();
    let table = sub.table_for(ASSET_KEY).unwrap().to_string();
    let runner = Runner::new(library.clone(), None);

    let first = runner.run(vec![sub.clone()]).await.unwrap();
    assert_eq!(first.summaries.len(), 1);
    assert_eq!(first.summaries[0].status, RunStatus::Completed);
    assert_eq!(first.summaries[0].num_observations, 3);
    assert_eq!(first.sink.saved, 3);
    assert_eq!(count(&library, &format!("SELECT count(*) FROM {table}")).await, 3);

    let old = sqlx::query(&format!(
        "SELECT active, delisted, last_updated FROM {table} WHERE ticker = 'OLD' AND composite_figi = 'BBG000000001'"
    ))
    .fetch_one(library.pool())
    .await
    .unwrap();
    assert!(!old.get::<bool, _>("active"));
    assert!(old.get::<Option<chrono::NaiveDate>, _>("delisted").is_some());
    let first_stamp: chrono::DateTime<chrono::Utc> = old.get("last_updated");

    runner.run(vec![sub.clone()]).await.unwrap();
    assert_eq!(count(&library, &format!("SELECT count(*) FROM {table}")).await, 3);
    let second_stamp: chrono::DateTime<chrono::Utc> = sqlx::query_scalar(&format!(
        "SELECT last_updated FROM {table} WHERE ticker = 'OLD'"
    ))
    .fetch_one(library.pool())
    .await
    .unwrap();
    assert!(second_stamp > first_stamp);

    let stored = library
        .subscription_by_prefix(&sub.id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.total_records, 6);
    assert_eq!(stored.num_records_last_import, 3);
    assert_eq!(stored.total_securities, 2);
    assert!(stored.last_run.is_some());

    manager.delete(&stored).await.unwrap();
}

#[tokio::test]
async fn partitioned_prices_land_in_partitions() {
    let Some(library) = library().await else { return };
    let manager = SubscriptionManager::new(library.pool().clone(), None);
    let sub = Subscription::new("synthetic", "Daily Prices", &schema::data_types(&[EOD_KEY]), BTreeMap::new());
    manager.create(&sub).await.unwrap();
    let table = sub.table_for(EOD_KEY).unwrap().to_string();

    let report = Runner::new(library.clone(), None)
        .run(vec![sub.clone()])
        .await
        .unwrap();
    assert_eq!(report.summaries[0].num_observations, 5);
    assert_eq!(count(&library, &format!("SELECT count(*) FROM {table}")).await, 5);
    assert_eq!(
        count(&library, &format!("SELECT count(*) FROM {table} WHERE adj_close = close")).await,
        5
    );

    let stored = library
        .subscription_by_prefix(&sub.id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.first_obs_date, report.summaries[0].first_event_date);
    assert_eq!(stored.last_obs_date, report.summaries[0].last_event_date);
    let row = sqlx::query("SELECT count(*) AS n FROM subscriptions WHERE id = $1")
        .bind(sub.id)
        .fetch_one(library.pool())
        .await
        .unwrap();
    assert_eq!(row.get::<i64, _>("n"), 1);

    manager.delete(&stored).await.unwrap();
}

#[tokio::test]
async fn unknown_dataset_fails_before_fetching() {
    let Some(library) = library().await else { return };
    let sub = Subscription::new("synthetic", "Nope", &[], BTreeMap::new());
    let err = Runner::new(library, None)
        .run(vec![sub.clone()])
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("no dataset"), "{err:#}");
}

#[tokio::test]
async fn unstartable_subscription_does_not_lose_earlier_bookkeeping() {
    let Some(library) = library().await else { return };
    let manager = SubscriptionManager::new(library.pool().clone(), None);
    let universe = Subscription::new("synthetic", "Universe", &schema::data_types(&[ASSET_KEY]), BTreeMap::new());
    let prices = Subscription::new("synthetic", "Daily Prices", &schema::data_types(&[EOD_KEY]), BTreeMap::new());
    manager.create(&universe).await.unwrap();
    manager.create(&prices).await.unwrap();

    // Partitions cannot be added under a missing parent table.
    let eod_table = prices.table_for(EOD_KEY).unwrap().to_string();
    sqlx::raw_sql(&format!("DROP TABLE {eod_table}"))
        .execute(library.pool())
        .await
        .unwrap();

    let report = Runner::new(library.clone(), None)
        .run(vec![universe.clone(), prices.clone()])
        .await
        .unwrap();
    assert_eq!(report.summaries.len(), 2);
    assert_eq!(report.summaries[0].status, RunStatus::Completed);
    assert_eq!(report.summaries[1].status, RunStatus::Failed);
    assert!(report.summaries[1].error.as_deref().unwrap().contains("partitions"));
    assert_eq!(report.sink.saved, 3);

    let stored = library
        .subscription_by_prefix(&universe.id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.total_records, 3);
    assert!(stored.last_run.is_some());

    manager.delete(&stored).await.unwrap();
    manager.delete(&prices).await.unwrap();
}

#[tokio::test]
async fn scheduled_job_runs_the_subscription() {
    let Some(library) = library().await else { return };
    let manager = SubscriptionManager::new(library.pool().clone(), None);
    let mut sub = Subscription::new("synthetic", "Universe", &schema::data_types(&[ASSET_KEY]), BTreeMap::new());
    sub.schedule = "* * * * * *".into();
    manager.create(&sub).await.unwrap();

    let runner = Arc::new(Runner::new(library.clone(), None));
    let mut sched = JobScheduler::new().await.unwrap();
    sched.add(scheduled_run(runner.clone(), sub.clone()).unwrap()).await.unwrap();
    sched.start().await.unwrap();

    let mut last_run = None;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let stored = library
            .subscription_by_prefix(&sub.id.to_string())
            .await
            .unwrap()
            .unwrap();
        if stored.last_run.is_some() {
            last_run = stored.last_run;
            break;
        }
    }
    sched.shutdown().await.unwrap();
    runner.idle().await;
    assert!(last_run.is_some(), "no scheduled run was recorded");

    manager.delete(&sub).await.unwrap();
}
