//! Library administration behind the CLI: subscribing, lookups by id prefix
//! and the provider catalogue.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use datalib_core::Subscription;
use datalib_providers::{provider_for, providers, ConfigError};
use datalib_storage::{check_spec, HealthMonitor, Library, SubscriptionManager};
use tracing::{info, warn};

use crate::daemon::validate_schedule;

#[derive(Debug, Clone, Default)]
pub struct SubscribeRequest {
    pub provider: String,
    pub dataset: String,
    pub name: Option<String>,
    pub schedule: Option<String>,
    pub config: BTreeMap<String, String>,
}

/// Validates a request into an unsaved subscription. Nothing is written.
pub fn build_subscription(request: &SubscribeRequest) -> Result<Subscription> {
    let provider = provider_for(&request.provider)
        .ok_or_else(|| ConfigError::UnknownProvider(request.provider.clone()))?;
    let dataset = provider.dataset(&request.dataset).ok_or_else(|| ConfigError::UnknownDataset {
        provider: request.provider.clone(),
        dataset: request.dataset.clone(),
    })?;
    provider
        .validate_config(&request.config)
        .with_context(|| format!("configuring {}", provider.name()))?;

    let mut sub = Subscription::new(
        provider.name(),
        dataset.name(),
        &dataset.data_types(),
        request.config.clone(),
    );
    if let Some(name) = request.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        sub.name = name.to_string();
    }
    if let Some(schedule) = request.schedule.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        validate_schedule(schedule)?;
        sub.schedule = schedule.to_string();
    }
    sub.validate()?;
    Ok(sub)
}

/// Creates the subscription's tables and row. With a monitor, its health
/// check is created first and removed again if the database step fails.
pub async fn subscribe(
    library: &Library,
    monitor: Option<Arc<dyn HealthMonitor>>,
    request: &SubscribeRequest,
) -> Result<Subscription> {
    let mut sub = build_subscription(request)?;
    sub.created_by = library.owner.clone();

    if let Some(monitor) = &monitor {
        let id = monitor
            .create(&check_spec(&sub))
            .await
            .context("creating health check")?;
        info!(check_id = %id, "created health check");
        sub.health_check_id = Some(id);
    }

    let manager = SubscriptionManager::new(library.pool().clone(), monitor.clone());
    if let Err(err) = manager.create(&sub).await {
        if let (Some(monitor), Some(id)) = (&monitor, &sub.health_check_id) {
            if let Err(cleanup) = monitor.delete(id).await {
                warn!(check_id = %id, error = %cleanup, "could not remove orphaned health check");
            }
        }
        return Err(err).context("creating subscription");
    }
    Ok(sub)
}

/// Looks up each id prefix; any miss fails the whole lookup.
pub async fn find_subscriptions(library: &Library, prefixes: &[String]) -> Result<Vec<Subscription>> {
    let mut found = Vec::with_capacity(prefixes.len());
    for prefix in prefixes {
        match library.subscription_by_prefix(prefix).await? {
            Some(sub) => found.push(sub),
            None => bail!("no subscription matches id `{prefix}`"),
        }
    }
    Ok(found)
}

pub fn subscription_report(sub: &Subscription) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Subscription {} [{}]", sub.name, sub.short_id());
    let _ = writeln!(out, "  Provider:  {}", sub.provider);
    let _ = writeln!(out, "  Dataset:   {}", sub.dataset);
    let _ = writeln!(out, "  Schedule:  {}", sub.schedule);
    if let Some(check) = &sub.health_check_id {
        let _ = writeln!(out, "  Health check: {check}");
    }
    let _ = writeln!(out, "  Tables:");
    for (data_type, table) in sub.data_types.iter().zip(&sub.data_tables) {
        let _ = writeln!(out, "    * {table} ({data_type})");
    }
    out
}

/// Every provider, or one provider with its datasets and config prompts.
pub fn providers_report(name: Option<&str>) -> Result<String> {
    let mut out = String::new();
    let Some(name) = name else {
        for provider in providers() {
            let _ = writeln!(out, "{}\n  {}\n", provider.name(), provider.description());
        }
        return Ok(out);
    };

    let provider = provider_for(name).ok_or_else(|| ConfigError::UnknownProvider(name.to_string()))?;
    let _ = writeln!(out, "{}\n  {}\n", provider.name(), provider.description());
    let _ = writeln!(out, "Datasets:");
    for dataset in provider.datasets() {
        let (from, to) = dataset.date_range();
        let types: Vec<_> = dataset.data_types().iter().map(|dt| dt.name).collect();
        let _ = writeln!(
            out,
            "  * {} ({} to {}) [{}]\n    {}",
            dataset.name(),
            from,
            to,
            types.join(", "),
            dataset.description()
        );
    }
    let prompts = provider.config_description();
    if !prompts.is_empty() {
        let _ = writeln!(out, "Configuration:");
        let required = provider.required_config();
        for (key, prompt) in prompts {
            let optional = if required.contains(&key) { "" } else { " (optional)" };
            let _ = writeln!(out, "  {key}{optional}: {prompt}");
        }
    }
    Ok(out)
}
