use anyhow::Context;
use exsync::{ChannelSpec, ExchangeFactory, ExchangeType, InitRequest};
use std::time::Duration;
use tracing::{info, warn};

/// Follows the public stores of one exchange and prints the top of book.
///
/// Usage: `exsync [binance|bybit|gmocoin] [SYMBOL]`
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let exchange: ExchangeType = args.next().as_deref().unwrap_or("bybit").parse()?;
    let symbol = args.next().unwrap_or_else(|| exchange.default_symbol().to_string());

    // Market data only; private channels are skipped without credentials
    let config = ExchangeFactory::config_from_env(exchange);
    let rest = ExchangeFactory::create_rest_client(exchange, &config)?;
    let wrapper = ExchangeFactory::create_wrapper(exchange, config)?;
    wrapper.start()?;

    let subscribed = wrapper.subscribe(ChannelSpec::Public, Some(&symbol))?;
    info!(%exchange, %symbol, subscribed, "Subscribing");

    if let Err(e) = wrapper
        .initialize(vec![InitRequest::with_params("orderbook", [("symbol", symbol.as_str())])], rest)
        .await
    {
        warn!(error = %e, "Orderbook snapshot unavailable, waiting for the stream");
    }

    wrapper.connect(None).await.context("connecting public stream")?;

    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let (ask, bid) = wrapper.orderbook().best(&symbol);
                let last = wrapper.ticker().snapshot().into_iter().find(|t| t.symbol == symbol);
                println!(
                    "{} {} bid {} ask {} last {}",
                    exchange,
                    symbol,
                    bid.map_or_else(|| "-".to_string(), |l| format!("{}@{}", l.size, l.price)),
                    ask.map_or_else(|| "-".to_string(), |l| format!("{}@{}", l.size, l.price)),
                    last.map_or_else(|| "-".to_string(), |t| t.price.to_string()),
                );
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    wrapper.close();
    Ok(())
}
