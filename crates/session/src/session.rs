//! Replay session actor and its handle.

use replay_backtest::{
    BacktestStatistics, ExecutionEngine, ExitReason, MarketOrder, OrderId, PendingOrder, Position,
    PositionId, TradeResult,
};
use replay_core::{
    Candle, CandleSeries, Config, Error, PlaybackSpeed, ReplayMode, Result, TimestampSecs,
};
use replay_scheduler::{ReplayEvent, ReplayScheduler, ReplayState, TickOutcome};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace};

const COMMAND_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<T>;

/// Messages accepted by the actor.
#[derive(Debug)]
enum Command {
    Play,
    Pause,
    Toggle,
    Stop,
    Reset,
    StepForward,
    StepBackward,
    JumpToIndex(usize),
    JumpToStart,
    JumpToEnd,
    JumpToPercentage(f64),
    SetSpeed(PlaybackSpeed),
    SpeedUp,
    SpeedDown,
    SetMode(ReplayMode),
    SetCutPoint(Option<usize>),
    SetStartIndex(usize),
    SetAutoScroll(bool),
    Subscribe(Reply<mpsc::UnboundedReceiver<ReplayEvent>>),
    State(Reply<ReplayState>),
    Progress(Reply<f64>),
    MarketOrder(MarketOrder, Reply<Result<Position>>),
    PlaceLimitOrder(PendingOrder),
    CancelLimitOrder(OrderId, Reply<Option<PendingOrder>>),
    ModifyPosition {
        id: PositionId,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
        reply: Reply<bool>,
    },
    ClosePosition(PositionId, Reply<Result<Option<TradeResult>>>),
    CloseAllPositions(Reply<Result<Vec<TradeResult>>>),
    Positions(Reply<Vec<Position>>),
    PendingOrders(Reply<Vec<PendingOrder>>),
    Trades(Reply<Vec<TradeResult>>),
    Stats(Reply<BacktestStatistics>),
    ResetAccount,
    Shutdown(Reply<()>),
}

enum Next {
    Command(Option<Command>),
    Tick,
}

/// The actor: sole owner of scheduler, engine and candles.
pub struct ReplaySession {
    series: CandleSeries,
    scheduler: ReplayScheduler,
    engine: ExecutionEngine,
    /// Running interval tagged with the ticker generation it was built for.
    timer: Option<(u64, Interval)>,
    /// Latest bar time the account has seen, through a feed or an order.
    /// Bars at or before it are never fed again.
    high_water: Option<TimestampSecs>,
}

impl ReplaySession {
    /// Spawn a session on the current tokio runtime.
    pub fn spawn(series: CandleSeries, config: &Config, cut_point: Option<usize>) -> SessionHandle {
        let scheduler = ReplayScheduler::with_candles(&config.replay, series.len(), cut_point);
        let engine = ExecutionEngine::new(&config.account);
        let session = Self {
            series,
            scheduler,
            engine,
            timer: None,
            high_water: None,
        };

        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        debug!(candles = session.series.len(), ?cut_point, "replay session spawned");
        tokio::spawn(session.run(rx));
        SessionHandle { commands: tx }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            let next = match self.timer.as_mut() {
                Some((_, interval)) => tokio::select! {
                    command = commands.recv() => Next::Command(command),
                    _ = interval.tick() => Next::Tick,
                },
                None => Next::Command(commands.recv().await),
            };

            match next {
                Next::Tick => self.on_tick(),
                Next::Command(Some(Command::Shutdown(ack))) => {
                    commands.close();
                    self.scheduler.destroy();
                    let _ = ack.send(());
                    break;
                }
                Next::Command(Some(command)) => self.handle(command),
                // Every handle dropped.
                Next::Command(None) => {
                    self.scheduler.destroy();
                    break;
                }
            }
            self.sync_timer();
        }
        debug!("replay session stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Play => self.scheduler.play(),
            Command::Pause => self.scheduler.pause(),
            Command::Toggle => self.scheduler.toggle(),
            Command::Stop => self.scheduler.stop(),
            Command::Reset => self.scheduler.reset(),
            Command::StepForward => {
                let before = self.scheduler.current_index();
                self.scheduler.step_forward();
                if let Some(index) = self.scheduler.current_index() {
                    if before != Some(index) {
                        self.feed(index);
                    }
                }
            }
            Command::StepBackward => self.scheduler.step_backward(),
            Command::JumpToIndex(index) => self.scheduler.jump_to_index(index),
            Command::JumpToStart => self.scheduler.jump_to_start(),
            Command::JumpToEnd => self.scheduler.jump_to_end(),
            Command::JumpToPercentage(percent) => self.scheduler.jump_to_percentage(percent),
            Command::SetSpeed(speed) => self.scheduler.set_speed(speed),
            Command::SpeedUp => self.scheduler.speed_up(),
            Command::SpeedDown => self.scheduler.speed_down(),
            Command::SetMode(mode) => self.scheduler.set_mode(mode),
            Command::SetCutPoint(cut_point) => self.scheduler.set_cut_point(cut_point),
            Command::SetStartIndex(index) => self.scheduler.set_start_index(index),
            Command::SetAutoScroll(enabled) => self.scheduler.set_auto_scroll(enabled),
            Command::Subscribe(reply) => {
                let _ = reply.send(self.scheduler.subscribe());
            }
            Command::State(reply) => {
                let _ = reply.send(self.scheduler.state());
            }
            Command::Progress(reply) => {
                let _ = reply.send(self.scheduler.progress());
            }
            Command::MarketOrder(order, reply) => {
                let result = self.cursor_candle().map(|candle| {
                    self.advance_high_water(candle.time);
                    self.engine.execute_market_order(&order, &candle)
                });
                let _ = reply.send(result);
            }
            Command::PlaceLimitOrder(order) => self.engine.place_limit_order(order),
            Command::CancelLimitOrder(id, reply) => {
                let _ = reply.send(self.engine.cancel_limit_order(id));
            }
            Command::ModifyPosition {
                id,
                stop_loss,
                take_profit,
                reply,
            } => {
                let _ = reply.send(self.engine.modify_position(id, stop_loss, take_profit));
            }
            Command::ClosePosition(id, reply) => {
                let result = self.cursor_candle().map(|candle| {
                    self.engine
                        .close_position(id, candle.close, candle.time, ExitReason::Manual)
                });
                let _ = reply.send(result);
            }
            Command::CloseAllPositions(reply) => {
                let result = self
                    .cursor_candle()
                    .map(|candle| self.engine.close_all_positions(candle.close, candle.time));
                let _ = reply.send(result);
            }
            Command::Positions(reply) => {
                let _ = reply.send(self.engine.positions());
            }
            Command::PendingOrders(reply) => {
                let _ = reply.send(self.engine.pending_orders());
            }
            Command::Trades(reply) => {
                let _ = reply.send(self.engine.trades());
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.engine.stats());
            }
            Command::ResetAccount => {
                self.engine.reset();
                self.high_water = None;
            }
            // Handled by the run loop.
            Command::Shutdown(_) => {}
        }
    }

    fn on_tick(&mut self) {
        if let TickOutcome::Advanced(index) = self.scheduler.tick() {
            self.feed(index);
        }
    }

    /// Feed the candle at `index` to the engine, unless the account has
    /// already seen that bar or a later one (e.g. after `play` wrapped).
    fn feed(&mut self, index: usize) {
        let Some(candle) = self.series.get(index).copied() else {
            return;
        };
        if self.high_water.is_some_and(|seen| candle.time <= seen) {
            trace!(index, "candle already seen, not fed");
            return;
        }
        self.advance_high_water(candle.time);
        let closed = self.engine.update_positions(&candle);
        trace!(index, closed = closed.len(), "candle fed");
    }

    fn advance_high_water(&mut self, time: TimestampSecs) {
        self.high_water = Some(self.high_water.map_or(time, |seen| seen.max(time)));
    }

    fn cursor_candle(&self) -> Result<Candle> {
        self.scheduler
            .current_index()
            .and_then(|index| self.series.get(index))
            .copied()
            .ok_or_else(|| Error::data("no candle under the replay cursor"))
    }

    /// Make the running interval match what the scheduler asks for.
    fn sync_timer(&mut self) {
        match self.scheduler.ticker() {
            None => self.timer = None,
            Some(ticker) => {
                let current = self.timer.as_ref().map(|(generation, _)| *generation);
                if current != Some(ticker.generation) {
                    let mut interval = interval_at(Instant::now() + ticker.period, ticker.period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    trace!(period_ms = ticker.period.as_millis() as u64, "replay timer started");
                    self.timer = Some((ticker.generation, interval));
                }
            }
        }
    }
}

/// Cloneable handle to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
}

impl SessionHandle {
    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::session("replay session has stopped"))
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        rx.await.map_err(|_| Error::session("replay session dropped the reply"))
    }

    pub async fn play(&self) -> Result<()> {
        self.send(Command::Play).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.send(Command::Pause).await
    }

    pub async fn toggle(&self) -> Result<()> {
        self.send(Command::Toggle).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(Command::Stop).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.send(Command::Reset).await
    }

    /// Step one bar forward; the new bar is fed to the engine.
    pub async fn step_forward(&self) -> Result<()> {
        self.send(Command::StepForward).await
    }

    /// Step one bar back. Nothing is re-fed.
    pub async fn step_backward(&self) -> Result<()> {
        self.send(Command::StepBackward).await
    }

    pub async fn jump_to_index(&self, index: usize) -> Result<()> {
        self.send(Command::JumpToIndex(index)).await
    }

    pub async fn jump_to_start(&self) -> Result<()> {
        self.send(Command::JumpToStart).await
    }

    pub async fn jump_to_end(&self) -> Result<()> {
        self.send(Command::JumpToEnd).await
    }

    pub async fn jump_to_percentage(&self, percent: f64) -> Result<()> {
        self.send(Command::JumpToPercentage(percent)).await
    }

    pub async fn set_speed(&self, speed: PlaybackSpeed) -> Result<()> {
        self.send(Command::SetSpeed(speed)).await
    }

    pub async fn speed_up(&self) -> Result<()> {
        self.send(Command::SpeedUp).await
    }

    pub async fn speed_down(&self) -> Result<()> {
        self.send(Command::SpeedDown).await
    }

    pub async fn set_mode(&self, mode: ReplayMode) -> Result<()> {
        self.send(Command::SetMode(mode)).await
    }

    pub async fn set_cut_point(&self, cut_point: Option<usize>) -> Result<()> {
        self.send(Command::SetCutPoint(cut_point)).await
    }

    pub async fn clear_cut_point(&self) -> Result<()> {
        self.set_cut_point(None).await
    }

    pub async fn set_start_index(&self, index: usize) -> Result<()> {
        self.send(Command::SetStartIndex(index)).await
    }

    pub async fn set_auto_scroll(&self, enabled: bool) -> Result<()> {
        self.send(Command::SetAutoScroll(enabled)).await
    }

    /// Receive every replay event emitted from now on.
    pub async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<ReplayEvent>> {
        self.request(Command::Subscribe).await
    }

    pub async fn state(&self) -> Result<ReplayState> {
        self.request(Command::State).await
    }

    pub async fn progress(&self) -> Result<f64> {
        self.request(Command::Progress).await
    }

    /// Open a position at the close of the bar under the cursor.
    ///
    /// Fails with [`Error::Data`] when no cursor is set.
    pub async fn market_order(&self, order: MarketOrder) -> Result<Position> {
        self.request(|reply| Command::MarketOrder(order, reply)).await?
    }

    pub async fn place_limit_order(&self, order: PendingOrder) -> Result<()> {
        self.send(Command::PlaceLimitOrder(order)).await
    }

    pub async fn cancel_limit_order(&self, id: OrderId) -> Result<Option<PendingOrder>> {
        self.request(|reply| Command::CancelLimitOrder(id, reply)).await
    }

    pub async fn modify_position(
        &self,
        id: PositionId,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<bool> {
        self.request(|reply| Command::ModifyPosition {
            id,
            stop_loss,
            take_profit,
            reply,
        })
        .await
    }

    /// Close a position manually at the close of the bar under the cursor.
    pub async fn close_position(&self, id: PositionId) -> Result<Option<TradeResult>> {
        self.request(|reply| Command::ClosePosition(id, reply)).await?
    }

    /// Close every position at the close of the bar under the cursor.
    pub async fn close_all_positions(&self) -> Result<Vec<TradeResult>> {
        self.request(Command::CloseAllPositions).await?
    }

    pub async fn positions(&self) -> Result<Vec<Position>> {
        self.request(Command::Positions).await
    }

    pub async fn pending_orders(&self) -> Result<Vec<PendingOrder>> {
        self.request(Command::PendingOrders).await
    }

    pub async fn trades(&self) -> Result<Vec<TradeResult>> {
        self.request(Command::Trades).await
    }

    pub async fn stats(&self) -> Result<BacktestStatistics> {
        self.request(Command::Stats).await
    }

    /// Reset the account: initial balance, no positions, orders or trades.
    pub async fn reset_account(&self) -> Result<()> {
        self.send(Command::ResetAccount).await
    }

    /// Stop the session. Safe to call more than once.
    pub async fn destroy(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }
}
