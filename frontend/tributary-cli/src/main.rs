mod cli;
mod service;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tributary_core::providers::FileProvider;
use tributary_core::{Aggregator, Notification, Options, Provider};

use crate::service::ServiceConfig;

fn main() {
    if let Err(error) = run() {
        eprintln!("tributary failed: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args = cli::Cli::parse_args();
    tributary_core::logging::init_tracing(&args.log_level);

    let options = match &args.options {
        Some(path) => tributary_core::options::load_from_file(path)
            .with_context(|| format!("failed to load options from '{}'", path.display()))?,
        None => Options::default(),
    };

    let runtime = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    runtime.block_on(aggregate(args, options))
}

async fn aggregate(args: cli::Cli, options: Options) -> anyhow::Result<()> {
    let aggregator = Aggregator::new(ServiceConfig::new(), options)?;

    let mut providers: Vec<Arc<dyn Provider>> = Vec::with_capacity(args.files.len());
    for pattern in &args.files {
        let mut provider = FileProvider::new([pattern])?;
        if let Some(format) = args.format {
            provider = provider.with_format(format);
        }
        if args.watch {
            provider = provider.with_poll_interval(Duration::from_millis(args.poll_ms.max(1)));
        }
        providers.push(Arc::new(provider));
    }

    aggregator
        .fetch(&providers)
        .await
        .context("failed to aggregate configuration")?;
    print_record(&aggregator).await?;

    if !args.watch {
        aggregator.shutdown().await?;
        return Ok(());
    }

    let mut notifications = aggregator.subscribe().await;
    aggregator.watch(&[]).await?;
    tracing::info!(files = args.files.len(), "watching for changes");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            notification = notifications.recv() => match notification {
                Some(Notification::Updates(updates)) if updates.is_empty() => {}
                Some(Notification::Updates(updates)) => {
                    for update in &updates {
                        eprintln!("{}: {} -> {} ({})", update.path, update.old, update.new, update.provider);
                    }
                    print_record(&aggregator).await?;
                }
                Some(Notification::Failed(err)) => {
                    tracing::warn!(%err, "reload failed, keeping previous values");
                }
                None => break,
            },
        }
    }

    aggregator.shutdown().await?;
    Ok(())
}

async fn print_record(aggregator: &Aggregator<ServiceConfig>) -> anyhow::Result<()> {
    let record = aggregator.snapshot().await;
    let rendered =
        serde_json::to_string_pretty(&record).context("failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}
