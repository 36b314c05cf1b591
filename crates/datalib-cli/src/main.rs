use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use datalib_core::RunStatus;
use datalib_providers::config::parse_pairs;
use datalib_storage::{Library, SubscriptionManager};
use datalib_sync::admin::{providers_report, subscription_report};
use datalib_sync::{
    default_path, find_subscriptions, init_logging, run_daemon, subscribe, AppConfig, Runner, SubscribeRequest,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "datalib")]
#[command(about = "Build and maintain a Postgres library of financial data")]
struct Cli {
    /// Config file (default: $HOME/.datalib.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Migrate a fresh database, record the library and write the config file
    Init {
        #[arg(long)]
        database_url: String,
        #[arg(long, default_value = "Financial Data Library")]
        name: String,
        #[arg(long, default_value = "")]
        owner: String,
    },
    /// Run subscriptions once by id prefix, or schedule every active one
    Run { ids: Vec<String> },
    /// Create a subscription to a provider dataset
    Subscribe {
        provider: String,
        #[arg(long)]
        dataset: String,
        #[arg(long)]
        name: Option<String>,
        /// 5-field cron, New York time
        #[arg(long)]
        schedule: Option<String>,
        /// Create a healthchecks.io check for the subscription
        #[arg(long)]
        monitor: bool,
        /// Provider config as key=value, repeatable
        #[arg(long = "set", value_name = "KEY=VALUE")]
        settings: Vec<String>,
    },
    /// Deactivate a subscription, or drop it with --delete
    Unsubscribe {
        id: String,
        #[arg(long)]
        yes: bool,
        #[arg(long)]
        delete: bool,
    },
    /// Re-activate a subscription
    Enable { id: String },
    /// Summarize the library
    Info,
    /// List providers, or one provider's datasets and config keys
    Providers { name: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => default_path()?,
    };
    let config = AppConfig::load(&config_path).await?;
    init_logging(&config.log_level);

    match cli.command.unwrap_or(Commands::Info) {
        Commands::Init {
            database_url,
            name,
            owner,
        } => {
            let library = Library::init(&database_url, &name, &owner).await?;
            let mut saved = config.clone();
            saved.database.url = database_url;
            saved.save(&config_path).await?;
            println!("initialized library `{}`; config written to {}", library.name, config_path.display());
            library.close().await;
        }
        Commands::Run { ids } => {
            let library = Library::open(config.database_url()?).await?;
            let runner = Runner::new(library.clone(), config.monitor()?);
            if ids.is_empty() {
                let subscriptions = library.subscriptions().await?;
                run_daemon(runner, subscriptions).await?;
            } else {
                let subscriptions = find_subscriptions(&library, &ids).await?;
                let cancel = runner.cancel_token();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("interrupt received; cancelling");
                        cancel.cancel();
                    }
                });
                let report = runner.run(subscriptions).await?;
                for summary in &report.summaries {
                    let outcome = match (&summary.status, &summary.error) {
                        (RunStatus::Completed, _) => "completed".to_string(),
                        (status, Some(err)) => format!("{status}: {err}"),
                        (status, None) => status.to_string(),
                    };
                    println!(
                        "{} {} observations in {}s ({outcome})",
                        summary.subscription_name,
                        summary.num_observations,
                        summary.elapsed().num_seconds()
                    );
                }
                println!(
                    "saved {} records, dropped {}, failed {}",
                    report.sink.saved, report.sink.dropped, report.sink.failed
                );
            }
            library.close().await;
        }
        Commands::Subscribe {
            provider,
            dataset,
            name,
            schedule,
            monitor,
            settings,
        } => {
            let settings = parse_pairs(settings.iter().map(String::as_str)).map_err(anyhow::Error::msg)?;
            let monitor = if monitor {
                match config.monitor()? {
                    Some(client) => Some(client),
                    None => bail!("--monitor needs healthchecks.api_key in the config file"),
                }
            } else {
                None
            };
            let library = Library::open(config.database_url()?).await?;
            let request = SubscribeRequest {
                provider,
                dataset,
                name,
                schedule,
                config: settings,
            };
            let sub = subscribe(&library, monitor, &request).await?;
            print!("{}", subscription_report(&sub));
            library.close().await;
        }
        Commands::Unsubscribe { id, yes, delete } => {
            let library = Library::open(config.database_url()?).await?;
            let sub = find_subscriptions(&library, &[id]).await?.remove(0);
            let verb = if delete { "Delete" } else { "Deactivate" };
            if !yes && !confirm(&format!("{verb} {} {} [{}]?", sub.name, sub.dataset, sub.short_id())).await? {
                println!("aborted");
                return Ok(());
            }
            let manager = SubscriptionManager::new(library.pool().clone(), config.monitor()?);
            if delete {
                manager.delete(&sub).await.context("deleting subscription")?;
            } else {
                manager.deactivate(&sub).await.context("deactivating subscription")?;
            }
            println!("{verb}d {} [{}]", sub.name, sub.short_id());
            library.close().await;
        }
        Commands::Enable { id } => {
            let library = Library::open(config.database_url()?).await?;
            let sub = find_subscriptions(&library, &[id]).await?.remove(0);
            SubscriptionManager::new(library.pool().clone(), config.monitor()?)
                .activate(&sub)
                .await
                .context("activating subscription")?;
            println!("Enabled {} [{}]", sub.name, sub.short_id());
            library.close().await;
        }
        Commands::Info => {
            let library = Library::open(config.database_url()?).await?;
            print!("{}", library.summary().await?);
            library.close().await;
        }
        Commands::Providers { name } => {
            print!("{}", providers_report(name.as_deref())?);
        }
    }

    Ok(())
}

async fn confirm(question: &str) -> Result<bool> {
    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(format!("{question} [y/N] ").as_bytes())
        .await
        .context("writing prompt")?;
    stdout.flush().await.context("writing prompt")?;

    let mut answer = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut answer)
        .await
        .context("reading answer")?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn subscribe_collects_repeated_settings() {
        let cli = Cli::try_parse_from([
            "datalib",
            "--config",
            "/tmp/lib.yaml",
            "subscribe",
            "polygon",
            "--dataset",
            "Stock Tickers",
            "--set",
            "apiKey=abc",
            "--set",
            "rateLimit=5",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/lib.yaml")));
        match cli.command {
            Some(Commands::Subscribe {
                provider,
                dataset,
                settings,
                monitor,
                ..
            }) => {
                assert_eq!(provider, "polygon");
                assert_eq!(dataset, "Stock Tickers");
                assert_eq!(settings, ["apiKey=abc", "rateLimit=5"]);
                assert!(!monitor);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn run_takes_any_number_of_ids() {
        let cli = Cli::try_parse_from(["datalib", "run"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Run { ids }) if ids.is_empty()));
        let cli = Cli::try_parse_from(["datalib", "run", "1a2b", "3c4d"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Run { ids }) if ids == ["1a2b", "3c4d"]));
    }
}
