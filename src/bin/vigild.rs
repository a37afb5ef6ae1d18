use std::collections::HashMap;

use clap::Parser;
use tracing::{debug, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};
use vigil::config::{Config, read_config_file};
use vigil::notify::ChannelConfig;
use vigil::registry::default_rules;
use vigil::runtime::Runtime;

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: Option<String>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("vigil", LevelFilter::TRACE),
        ("vigild", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();

    let args = Args::parse();
    trace!("started with args: {args:?}");

    let mut config = match &args.file {
        Some(path) => read_config_file(path)?,
        None => Config::default(),
    };

    if config.rules.is_empty() {
        debug!("no rules configured, installing default rule set");
        config.rules = default_rules();
    }

    apply_env_channels(&mut config);

    let runtime = Runtime::start(config)?;

    tokio::signal::ctrl_c().await?;
    runtime.shutdown().await;

    Ok(())
}

/// Environment-provided notification channels, matching the deployment
/// convention of WEBHOOK_URL / SLACK_WEBHOOK_URL variables.
fn apply_env_channels(config: &mut Config) {
    if let Ok(url) = std::env::var("WEBHOOK_URL")
        && !config.channels.contains_key("default")
    {
        let mut headers = HashMap::new();
        headers.insert("X-Source".to_string(), "metrics-service".to_string());
        config
            .channels
            .insert("default".to_string(), ChannelConfig::Webhook { url, headers });
    }

    if let Ok(url) = std::env::var("SLACK_WEBHOOK_URL")
        && !config.channels.contains_key("slack")
    {
        config
            .channels
            .insert("slack".to_string(), ChannelConfig::Slack { url });
    }
}
