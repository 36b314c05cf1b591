use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use datalib_core::Subscription;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::runner::Runner;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

fn weekday_name(token: &str) -> String {
    match token.parse::<usize>() {
        Ok(n) if n <= 7 => WEEKDAYS[n % 7].to_string(),
        _ => token.to_string(),
    }
}

/// Rewrites a subscription schedule for the scheduler: a seconds field is
/// prepended to 5-field expressions and numeric days of the week become
/// names (`0`/`7` is Sunday). Step values after `/` are left alone.
pub fn cron_expression(schedule: &str) -> Result<String> {
    let mut fields: Vec<String> = schedule.split_whitespace().map(str::to_string).collect();
    match fields.len() {
        5 => fields.insert(0, "0".to_string()),
        6 => {}
        n => bail!("cron schedule `{schedule}` has {n} fields, expected 5 or 6"),
    }

    let dow = fields[5]
        .split(',')
        .map(|item| {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (item, None),
            };
            let range = range.split('-').map(weekday_name).collect::<Vec<_>>().join("-");
            match step {
                Some(step) => format!("{range}/{step}"),
                None => range,
            }
        })
        .collect::<Vec<_>>()
        .join(",");
    fields[5] = dow;
    Ok(fields.join(" "))
}

/// Normalises `schedule` and checks the scheduler accepts it.
pub fn validate_schedule(schedule: &str) -> Result<String> {
    let cron = cron_expression(schedule)?;
    Job::new_async(cron.as_str(), |_id, _l| Box::pin(async {}))
        .with_context(|| format!("invalid cron schedule `{schedule}`"))?;
    Ok(cron)
}

/// A job that runs `subscription` alone through `runner` on every tick.
pub fn scheduled_run(runner: Arc<Runner>, subscription: Subscription) -> Result<Job> {
    let cron = validate_schedule(&subscription.schedule)?;
    Job::new_async(cron.as_str(), move |_uuid, _l| {
        let runner = runner.clone();
        let sub = subscription.clone();
        Box::pin(async move {
            let id = sub.id;
            if let Err(err) = runner.run(vec![sub]).await {
                error!(subscription_id = %id, error = %format!("{err:#}"), "scheduled run failed");
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))
}

/// Schedules every active subscription on its own cron and runs until
/// Ctrl-C. A subscription whose schedule is unusable is logged and left out.
/// In-flight runs are then cancelled and given a short grace to record
/// their summaries.
pub async fn run_daemon(runner: Runner, subscriptions: Vec<Subscription>) -> Result<()> {
    let runner = Arc::new(runner);
    let mut sched = JobScheduler::new().await.context("creating scheduler")?;

    let mut scheduled = 0usize;
    for sub in subscriptions.into_iter().filter(|s| s.active) {
        let (id, schedule) = (sub.id, sub.schedule.clone());
        let job = match scheduled_run(runner.clone(), sub) {
            Ok(job) => job,
            Err(err) => {
                error!(subscription_id = %id, schedule = %schedule, error = %format!("{err:#}"), "skipping subscription");
                continue;
            }
        };
        sched.add(job).await.context("adding scheduler job")?;
        scheduled += 1;
    }
    if scheduled == 0 {
        warn!("no active subscriptions to schedule");
    }

    sched.start().await.context("starting scheduler")?;
    info!(jobs = scheduled, "daemon started");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    runner.cancel_token().cancel();
    sched.shutdown().await.context("stopping scheduler")?;
    if tokio::time::timeout(SHUTDOWN_GRACE, runner.idle()).await.is_err() {
        warn!("runs still in flight after shutdown grace");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_schedules_gain_seconds_and_day_names() {
        assert_eq!(cron_expression("0 0 * * 1-5").unwrap(), "0 0 0 * * MON-FRI");
        assert_eq!(cron_expression("30 6 * * 0,6").unwrap(), "0 30 6 * * SUN,SAT");
        assert_eq!(cron_expression("*/15 * * * *").unwrap(), "0 */15 * * * *");
        assert_eq!(cron_expression("0 0 12 * * 7").unwrap(), "0 0 12 * * SUN");
    }

    #[test]
    fn steps_and_names_pass_through() {
        assert_eq!(cron_expression("0 9 * * 1-5/2").unwrap(), "0 0 9 * * MON-FRI/2");
        assert_eq!(cron_expression("0 9 * * TUE").unwrap(), "0 0 9 * * TUE");
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        assert!(cron_expression("0 0 * *").is_err());
        assert!(cron_expression("").is_err());
    }

    #[tokio::test]
    async fn normalised_default_schedule_parses() {
        let cron = validate_schedule(datalib_core::DEFAULT_SCHEDULE).unwrap();
        assert_eq!(cron, "0 0 0 * * MON-FRI");
    }

    #[tokio::test]
    async fn out_of_range_fields_are_rejected() {
        assert!(cron_expression("99 99 * * 1").is_ok());
        let err = validate_schedule("99 99 * * 1").unwrap_err();
        assert!(format!("{err:#}").contains("99 99 * * 1"), "{err:#}");
        assert!(validate_schedule("0 25 * * *").is_err());
        assert!(validate_schedule("30 17 * * 1-5").is_ok());
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn scheduled_run_future_is_send() {
        // Type-level: the job body must be Send to be boxed for the scheduler.
        fn job_body(runner: Arc<Runner>, sub: Subscription) {
            let body = async move { runner.run(vec![sub]).await };
            assert_send(&body);
        }
        let _: fn(Arc<Runner>, Subscription) = job_body;
        let _: fn(Arc<Runner>, Subscription) -> Result<Job> = scheduled_run;
    }
}
