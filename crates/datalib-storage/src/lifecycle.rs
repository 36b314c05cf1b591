use std::sync::Arc;

use chrono::{Datelike, Utc};
use datalib_core::{partition_buckets, slugify, CoreError, Subscription};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::healthcheck::{CheckSpec, HealthMonitor, MonitorError};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("{step}: {source}")]
    Database {
        step: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("subscription {0} does not exist")]
    NotFound(Uuid),
    /// The database change is already committed when this is returned.
    #[error("health monitor: {0}")]
    Monitor(#[from] MonitorError),
}

fn db(step: &'static str) -> impl FnOnce(sqlx::Error) -> LifecycleError {
    move |source| LifecycleError::Database { step, source }
}

/// Health check parameters for a subscription: `"<name> <dataset> (<id5>)"`.
pub fn check_spec(subscription: &Subscription) -> CheckSpec {
    let id5 = &subscription.id.simple().to_string()[..5];
    CheckSpec {
        name: format!("{} {} ({id5})", subscription.name, subscription.dataset),
        slug: slugify(&format!(
            "{} {} {} {id5}",
            subscription.name, subscription.provider, subscription.dataset
        )),
        tags: subscription.data_types.clone(),
        schedule: subscription.schedule.clone(),
    }
}

/// Creates, re-partitions, toggles and deletes subscriptions. Every database
/// step runs in one transaction; monitor calls only happen after commit.
#[derive(Clone)]
pub struct SubscriptionManager {
    pool: PgPool,
    monitor: Option<Arc<dyn HealthMonitor>>,
}

impl SubscriptionManager {
    pub fn new(pool: PgPool, monitor: Option<Arc<dyn HealthMonitor>>) -> Self {
        Self { pool, monitor }
    }

    /// Creates every data table and its initial partitions, then inserts the
    /// subscription row. Either all of it commits or none of it does.
    pub async fn create(&self, subscription: &Subscription) -> Result<(), LifecycleError> {
        let tables = subscription.tables()?;
        let mut tx = self.pool.begin().await.map_err(db("beginning create"))?;

        for (table, data_type) in &tables {
            debug!(table, data_type = data_type.name, "creating data table");
            sqlx::raw_sql(&data_type.expanded_schema(table))
                .execute(&mut *tx)
                .await
                .map_err(db("creating data table"))?;
        }

        create_partitions(&mut tx, subscription, Utc::now().year()).await?;

        sqlx::query(
            r#"
            INSERT INTO subscriptions
                ("id", "name", "provider", "dataset", "config", "data_tables", "data_types",
                 "schedule", "health_check_id", "schema_version", "created_by")
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(subscription.id)
        .bind(&subscription.name)
        .bind(&subscription.provider)
        .bind(&subscription.dataset)
        .bind(Json(&subscription.config))
        .bind(&subscription.data_tables)
        .bind(&subscription.data_types)
        .bind(&subscription.schedule)
        .bind(&subscription.health_check_id)
        .bind(subscription.schema_version)
        .bind(&subscription.created_by)
        .execute(&mut *tx)
        .await
        .map_err(db("inserting subscription row"))?;

        tx.commit().await.map_err(db("committing create"))?;
        info!(
            subscription_id = %subscription.id,
            tables = tables.len(),
            "created subscription"
        );
        Ok(())
    }

    /// Adds any partitions missing for the current year. Safe to repeat.
    pub async fn manage_partitions(&self, subscription: &Subscription) -> Result<(), LifecycleError> {
        if !subscription.is_partitioned() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(db("beginning partitioning"))?;
        create_partitions(&mut tx, subscription, Utc::now().year()).await?;
        tx.commit().await.map_err(db("committing partitions"))?;
        Ok(())
    }

    pub async fn activate(&self, subscription: &Subscription) -> Result<(), LifecycleError> {
        self.set_active(subscription, true).await?;
        if let Some((monitor, id)) = self.attached_monitor(subscription) {
            monitor.resume(id).await?;
        }
        Ok(())
    }

    pub async fn deactivate(&self, subscription: &Subscription) -> Result<(), LifecycleError> {
        self.set_active(subscription, false).await?;
        if let Some((monitor, id)) = self.attached_monitor(subscription) {
            monitor.pause(id).await?;
        }
        Ok(())
    }

    /// Drops partitions, then data tables, then the row; the health check
    /// is deleted only once that has committed.
    pub async fn delete(&self, subscription: &Subscription) -> Result<(), LifecycleError> {
        let mut tables = subscription.partition_tables(Utc::now().year())?;
        tables.extend(subscription.data_tables.iter().cloned());

        let mut tx = self.pool.begin().await.map_err(db("beginning delete"))?;
        for table in &tables {
            info!(table = %table, "dropping table");
            sqlx::raw_sql(&format!("DROP TABLE IF EXISTS {table}"))
                .execute(&mut *tx)
                .await
                .map_err(db("dropping table"))?;
        }
        let deleted = sqlx::query("DELETE FROM subscriptions WHERE id = $1")
            .bind(subscription.id)
            .execute(&mut *tx)
            .await
            .map_err(db("deleting subscription row"))?;
        if deleted.rows_affected() == 0 {
            return Err(LifecycleError::NotFound(subscription.id));
        }
        tx.commit().await.map_err(db("committing delete"))?;
        info!(subscription_id = %subscription.id, "deleted subscription");

        if let Some((monitor, id)) = self.attached_monitor(subscription) {
            monitor.delete(id).await?;
        }
        Ok(())
    }

    async fn set_active(&self, subscription: &Subscription, active: bool) -> Result<(), LifecycleError> {
        let mut tx = self.pool.begin().await.map_err(db("beginning status change"))?;
        let updated = sqlx::query("UPDATE subscriptions SET active = $2 WHERE id = $1")
            .bind(subscription.id)
            .bind(active)
            .execute(&mut *tx)
            .await
            .map_err(db("updating active flag"))?;
        if updated.rows_affected() == 0 {
            return Err(LifecycleError::NotFound(subscription.id));
        }
        tx.commit().await.map_err(db("committing status change"))?;
        info!(subscription_id = %subscription.id, active, "changed subscription status");
        Ok(())
    }

    fn attached_monitor<'a>(&'a self, subscription: &'a Subscription) -> Option<(&'a dyn HealthMonitor, &'a str)> {
        let id = subscription.health_check_id.as_deref().filter(|id| !id.is_empty())?;
        match &self.monitor {
            Some(monitor) => Some((monitor.as_ref(), id)),
            None => {
                warn!(
                    subscription_id = %subscription.id,
                    check_id = id,
                    "subscription has a health check but no monitor is configured"
                );
                None
            }
        }
    }
}

async fn create_partitions(
    conn: &mut PgConnection,
    subscription: &Subscription,
    current_year: i32,
) -> Result<(), LifecycleError> {
    let buckets = partition_buckets(current_year);
    for (table, data_type) in subscription.tables()? {
        if !data_type.is_partitioned {
            continue;
        }
        for bucket in &buckets {
            let sql = bucket.create_sql(table);
            debug!(sql = %sql, "creating partition table");
            sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(&sql))
                .await
                .map_err(db("creating partition"))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use datalib_core::data_type;
    use datalib_core::schema::{ASSET_KEY, EOD_KEY};
    use std::collections::BTreeMap;

    #[test]
    fn check_spec_names_and_tags_the_subscription() {
        let mut sub = Subscription::new(
            "polygon",
            "Stock Tickers",
            &[data_type(ASSET_KEY).unwrap(), data_type(EOD_KEY).unwrap()],
            BTreeMap::new(),
        );
        sub.id = Uuid::parse_str("1a2b3c4d-0000-4000-8000-000000000000").unwrap();
        let spec = check_spec(&sub);
        assert_eq!(spec.name, "Polygon Stock Tickers (1a2b3)");
        assert_eq!(spec.slug, "polygon-polygon-stock-tickers-1a2b3");
        assert_eq!(spec.tags, vec!["asset-description", "eod"]);
        assert_eq!(spec.schedule, "0 0 * * 1-5");
    }
}
