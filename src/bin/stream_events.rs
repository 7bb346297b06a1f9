use std::error::Error;
use std::sync::Arc;

use sorobangraph::models::LiveMessage;
use sorobangraph::{BroadcastHub, CaptiveCore, IngestionConfig, Ingester, MemorySink};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = IngestionConfig::from_env()?;

    let default_level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let cancel = CancellationToken::new();
    let source = CaptiveCore::new(&config)?;
    let sink = Arc::new(MemorySink::new());
    let mut ingester = Ingester::new(&config, sink)?.with_source(Box::new(source));

    if config.enable_live_stream {
        let (hub, _hub_task) = BroadcastHub::spawn(config.hub_queue, config.subscriber_buffer, cancel.clone());
        let mut subscription = hub.subscribe().await?;
        ingester = ingester.with_hub(hub);

        log::info!("capturing contract events, each one is printed to stdout as JSON");
        tokio::spawn(async move {
            while let Some(message) = subscription.recv().await {
                if let LiveMessage::ContractEvent(_) = message.as_ref() {
                    match serde_json::to_string(message.as_ref()) {
                        Ok(line) => println!("{}", line),
                        Err(err) => log::error!("cannot serialize live message: {}", err),
                    }
                }
            }
        });
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("received ctrl-c, shutting down");
            }
            cancel.cancel();
        });
    }

    let stats = ingester.stats();
    ingester.run(cancel.clone()).await?;
    cancel.cancel();

    println!("{}", serde_json::to_string_pretty(&stats.snapshot())?);
    Ok(())
}
