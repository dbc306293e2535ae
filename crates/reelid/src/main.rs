use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use reelid_core::{bot::ChatBot, config::Config};
use reelid_instagram::{BridgeConfig, InstagramClient, RealtimeBridge};
use reelid_openai::{OpenAiClassifier, OpenAiClient, OpenAiConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Arc::new(Config::load().context("invalid configuration")?);
    let _log = reelid_core::logging::init("reelid", &cfg.log_file)
        .context("failed to initialize logging")?;

    if cfg.openai_api_key.is_none() {
        warn!("OPENAI_API_KEY is not set; every classification will fail");
    }

    let instagram = Arc::new(
        InstagramClient::new(cfg.ig_api_base_url.clone())
            .context("failed to build instagram client")?,
    );
    let (realtime, events) = RealtimeBridge::new(BridgeConfig {
        program: cfg.realtime_bridge_cmd.clone(),
        args: cfg.realtime_bridge_args.clone(),
        session_file: cfg.session_file.clone(),
    });
    let classifier = OpenAiClassifier::new(
        OpenAiClient::new(OpenAiConfig::from(cfg.as_ref()))
            .context("failed to build openai client")?,
    );

    let bot = ChatBot::create(
        cfg.clone(),
        instagram.clone(),
        instagram,
        Arc::new(realtime),
        Arc::new(classifier),
    )
    .await
    .context("failed to log in")?;

    bot.start()
        .await
        .context("failed to connect to the realtime feed")?;

    tokio::select! {
        _ = bot.run(events) => warn!("Realtime event channel closed"),
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!("Failed to listen for ctrl-c: {e}");
            }
            info!("Shutting down");
        }
    }

    bot.shutdown().await;
    Ok(())
}
