//! Bar replay CLI.
//!
//! Loads candles from a JSON array, optionally opens one market position,
//! replays the bars through the execution engine until the end or the cut
//! point, then prints statistics and trades as JSON.
//!
//! An infinite profit factor (wins and no losses) prints as `null`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use replay_backtest::{position_size_for_risk, FillModel, MarketOrder};
use replay_core::{CandleSeries, Config, OrderSide, PlaybackSpeed};
use replay_scheduler::ReplayEvent;
use replay_session::{ReplaySession, SessionHandle};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "replay-cli", about = "Replay historical candles through a simulated account")]
struct Cli {
    /// JSON file holding an array of {time, open, high, low, close}.
    #[arg(long)]
    candles: PathBuf,

    /// JSON configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Cut point index: replay stops here.
    #[arg(long)]
    cut: Option<usize>,

    /// Playback speed multiplier (0.5, 1, 2, 5, 10, 20, 50, 100).
    #[arg(long)]
    speed: Option<f64>,

    /// Open a market position before playing.
    #[arg(long, value_enum)]
    side: Option<Side>,

    /// Position size. Derived from --risk when omitted and a stop is given.
    #[arg(long)]
    size: Option<f64>,

    #[arg(long)]
    stop_loss: Option<f64>,

    #[arg(long)]
    take_profit: Option<f64>,

    /// Fraction of the balance risked on the position (e.g. 0.01).
    #[arg(long)]
    risk: Option<f64>,

    /// Index of the bar to enter on.
    #[arg(long, default_value_t = 0)]
    enter_at: usize,
}

#[derive(Clone, Copy, ValueEnum)]
enum Side {
    Long,
    Short,
}

impl From<Side> for OrderSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(speed) = cli.speed {
        config.replay.default_speed = PlaybackSpeed::try_from(speed).map_err(anyhow::Error::msg)?;
    }

    let series = CandleSeries::load_json(&cli.candles)
        .with_context(|| format!("loading candles {}", cli.candles.display()))?;
    if series.is_empty() {
        bail!("{} holds no candles", cli.candles.display());
    }
    info!(candles = series.len(), cut = ?cli.cut, speed = %config.replay.default_speed, "starting replay");

    let handle = ReplaySession::spawn(series.clone(), &config, cli.cut);
    let mut events = handle.subscribe().await?;

    if let Some(side) = cli.side {
        open_position(&handle, &series, &config, &cli, side).await?;
    }

    handle.play().await?;
    while let Some(event) = events.recv().await {
        match event {
            ReplayEvent::IndexChange(index) => debug!(index, "bar"),
            ReplayEvent::End | ReplayEvent::CutPointReached => {
                info!(?event, "replay finished");
                break;
            }
            other => debug!(event = ?other, "replay event"),
        }
    }

    let closed = handle.close_all_positions().await?;
    if !closed.is_empty() {
        info!(count = closed.len(), "closed remaining positions at the last bar");
    }

    let stats = handle.stats().await?;
    let trades = handle.trades().await?;
    let fill_model = FillModel::new(config.execution.clone());
    let commission: f64 = trades.iter().map(|t| fill_model.round_trip_cost(t)).sum();
    handle.destroy().await;

    let report = serde_json::json!({
        "symbol": config.account.symbol,
        "statistics": stats,
        "trades": trades,
        "estimated_commission": commission,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

async fn open_position(
    handle: &SessionHandle,
    series: &CandleSeries,
    config: &Config,
    cli: &Cli,
    side: Side,
) -> Result<()> {
    check_enter_at(cli.enter_at, handle.state().await?.end_index)?;
    handle.jump_to_index(cli.enter_at).await?;
    let state = handle.state().await?;
    let entry = state
        .current_index
        .and_then(|index| series.get(index))
        .map(|candle| candle.close)
        .context("no bar under the cursor to enter on")?;

    let balance = config.account.initial_balance;
    let size = match (cli.size, cli.risk, cli.stop_loss) {
        (Some(size), _, _) => size,
        (None, Some(risk), Some(stop)) => position_size_for_risk(balance, risk, entry, stop),
        (None, Some(_), None) => bail!("--risk needs --stop-loss to size the position"),
        (None, None, _) => 1.0,
    };
    if !(size.is_finite() && size > 0.0) {
        bail!("position size must be positive (got {size})");
    }

    let mut order = MarketOrder::new(side.into(), size);
    if let Some(stop) = cli.stop_loss {
        order = order
            .with_stop_loss(stop)
            .with_initial_risk((entry - stop).abs() * size);
    }
    if let Some(target) = cli.take_profit {
        order = order.with_take_profit(target);
    }

    let position = handle.market_order(order).await?;
    info!(
        id = %position.id,
        side = ?position.side,
        size = position.size,
        entry = position.entry_price,
        "entered position"
    );
    Ok(())
}

/// The entry bar must leave at least one bar to replay; `play` from the last
/// bar restarts at the first.
fn check_enter_at(enter_at: usize, end_index: usize) -> Result<()> {
    if enter_at >= end_index {
        bail!("--enter-at {enter_at} must be before the last playable bar ({end_index})");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_at_must_precede_end() {
        assert!(check_enter_at(0, 10).is_ok());
        assert!(check_enter_at(9, 10).is_ok());
        assert!(check_enter_at(10, 10).is_err());
        assert!(check_enter_at(25, 10).is_err());
    }
}
