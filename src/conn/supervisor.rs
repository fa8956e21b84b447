use crate::{
    conn::{
        receive_handler::ReceiveLoop, tcp_client, CancelReason, ChannelSide, ChannelState,
        LinkConfiguration, LinkEvent, LinkParams, LinkState, LinkStatistics, PendingRegistry,
        ReceiveHandler, RegistryStatistics, SendHandler, TraceSource, UnsolicitedHandler,
    },
    protocol::{
        mti::{netmgmt, response_code},
        Message, MessageCodec, Mti,
    },
    FepError, FepResult,
};
use debug_ignore::DebugIgnore;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, watch};

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(15);
const SIGN_OFF_DEADLINE: Duration = Duration::from_secs(2);
const SWEEP_PERIOD: Duration = Duration::from_millis(50);
const CHANNEL_NAME: &str = "FISC";

/// The dual-channel link supervisor.
///
/// Composes the send handler, the receive handler and the pending
/// registry; runs sign-on, heartbeats and reconnection across the pair.
/// All request/response traffic goes through
/// [`send_and_receive`](Self::send_and_receive), which correlates the
/// asynchronous response arriving on the independent receive connection
/// back to its caller by trace number.
#[derive(Debug)]
pub struct SwitchLink {
    inner: Arc<LinkInner>,
}

#[derive(Debug)]
struct LinkInner {
    params: LinkParams,
    config: LinkConfiguration,
    codec: MessageCodec,
    registry: PendingRegistry,
    traces: TraceSource,
    stats: Arc<LinkStatistics>,
    unsolicited: DebugIgnore<UnsolicitedHandler>,
    state_tx: watch::Sender<LinkState>,
    channels: Mutex<Channels>,
    send_handler: tokio::sync::RwLock<Option<Arc<SendHandler>>>,
    receive_handler: Mutex<Option<ReceiveHandler>>,
    events_tx: mpsc::Sender<LinkEvent>,
    closing: AtomicBool,
    heartbeat_misses: AtomicU32,
    last_heartbeat: Mutex<Instant>,
    // incarnation counters; stale handler events are ignored by them
    send_generation: AtomicU64,
    receive_generation: AtomicU64,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

// Channel-pair bookkeeping behind one short-lived lock.
#[derive(Debug, Default)]
struct Channels {
    send: ChannelState,
    receive: ChannelState,
    signed_on: bool,
    was_signed_on: bool,
    failed: bool,
}

impl SwitchLink {
    /// Creates a link over the given addressing, configuration and codec.
    ///
    /// `unsolicited` receives every inbound message that matches no
    /// pending request (peer-initiated echoes, late responses). The link
    /// starts disconnected; call [`connect`](Self::connect).
    pub fn new(
        params: LinkParams,
        config: LinkConfiguration,
        codec: MessageCodec,
        unsolicited: impl Fn(&str, Message) + Send + Sync + 'static,
    ) -> Self {
        let registry = PendingRegistry::new(config.max_in_flight());
        let stats = Arc::new(LinkStatistics::new());
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        let (events_tx, events_rx) = mpsc::channel(32);

        let inner = Arc::new(LinkInner {
            params,
            config,
            codec,
            registry: registry.clone(),
            traces: TraceSource::new(),
            stats,
            unsolicited: DebugIgnore(Arc::new(unsolicited)),
            state_tx,
            channels: Mutex::new(Channels::default()),
            send_handler: tokio::sync::RwLock::new(None),
            receive_handler: Mutex::new(None),
            events_tx,
            closing: AtomicBool::new(false),
            heartbeat_misses: AtomicU32::new(0),
            last_heartbeat: Mutex::new(Instant::now()),
            send_generation: AtomicU64::new(0),
            receive_generation: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
        });

        let mut tasks = vec![
            tokio::spawn(event_loop(Arc::downgrade(&inner), events_rx)),
            tokio::spawn(heartbeat_loop(Arc::downgrade(&inner))),
            registry.spawn_sweeper(SWEEP_PERIOD),
        ];
        if let Ok(mut slot) = inner.tasks.lock() {
            slot.append(&mut tasks);
        }
        Self { inner }
    }

    /// Opens both connections concurrently, each with a backoff-limited
    /// retry. Per the failure policy the call succeeds when both sides
    /// are up, or — under `FailWhenBothDown` — when at least one is.
    pub async fn connect(&self) -> FepResult<()> {
        self.inner.connect().await
    }

    /// Performs the sign-on exchange (0800 / code "001"). Idempotent: a
    /// second call on a signed-on link returns without a wire exchange.
    pub async fn sign_on(&self) -> FepResult<()> {
        if self.inner.channels.lock()?.signed_on {
            debug!("already signed on, skipping exchange");
            return Ok(());
        }
        self.inner.sign_on_exchange().await
    }

    /// Sends `message`, correlating the response arriving on the receive
    /// connection by trace. A trace is assigned if field 11 is absent.
    ///
    /// Fails fast with `ConnectionDown` per the failure policy, with
    /// `Overloaded` when the in-flight window is full, and resolves with
    /// `Timeout` if no response arrives in time. Dropping the returned
    /// future cancels the pending entry.
    pub async fn send_and_receive(
        &self,
        message: Message,
        timeout: Duration,
    ) -> FepResult<Message> {
        self.inner.exchange(message, timeout, true).await
    }

    /// Signs off (best effort), cancels all pending requests with
    /// `Shutdown`, and closes both connections.
    pub async fn close(&self) -> FepResult<()> {
        self.inner.close().await
    }

    /// The current pair state.
    pub fn state(&self) -> LinkState {
        *self.inner.state_tx.borrow()
    }

    /// A watch on pair-state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.inner.state_tx.subscribe()
    }

    /// Link counters.
    pub fn statistics(&self) -> Arc<LinkStatistics> {
        Arc::clone(&self.inner.stats)
    }

    /// Registry counters.
    pub fn registry_statistics(&self) -> RegistryStatistics {
        self.inner.registry.statistics()
    }
}

impl Drop for SwitchLink {
    fn drop(&mut self) {
        if let Ok(tasks) = self.inner.tasks.lock() {
            for task in tasks.iter() {
                task.abort();
            }
        }
    }
}

impl LinkInner {
    // --- state bookkeeping ----------------------------------------------

    fn update_channels(&self, apply: impl FnOnce(&mut Channels)) {
        let state = match self.channels.lock() {
            Ok(mut channels) => {
                apply(&mut channels);
                if channels.failed {
                    LinkState::Failed
                } else {
                    LinkState::from_channels(
                        channels.send,
                        channels.receive,
                        channels.signed_on,
                        channels.was_signed_on,
                    )
                }
            }
            Err(_poisoned) => LinkState::Failed,
        };
        if self.state_tx.send_replace(state) != state {
            debug!("link state -> {state:?}");
        }
    }

    fn snapshot(&self) -> (ChannelState, ChannelState, bool) {
        self.channels
            .lock()
            .map_or((ChannelState::Disconnected, ChannelState::Disconnected, true), |c| {
                (c.send, c.receive, c.failed)
            })
    }

    fn side_addr(&self, side: ChannelSide) -> &str {
        match side {
            ChannelSide::Send => self.params.send_addr(),
            ChannelSide::Receive => self.params.receive_addr(),
        }
    }

    fn set_side_state(&self, side: ChannelSide, state: ChannelState) {
        self.update_channels(|channels| match side {
            ChannelSide::Send => channels.send = state,
            ChannelSide::Receive => channels.receive = state,
        });
    }

    // --- connect / reconnect --------------------------------------------

    async fn connect(&self) -> FepResult<()> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(FepError::Shutdown);
        }
        info!("connecting dual link: {}", self.params);
        let (send_result, receive_result) = tokio::join!(
            self.connect_side_with_retry(ChannelSide::Send),
            self.connect_side_with_retry(ChannelSide::Receive),
        );
        if send_result.is_ok() && receive_result.is_ok() {
            return Ok(());
        }
        let lenient = matches!(
            self.config.failure_policy(),
            crate::conn::FailurePolicy::FailWhenBothDown
        );
        if lenient && (send_result.is_ok() || receive_result.is_ok()) {
            warn!("dual link came up partially: {}", self.params);
            return Ok(());
        }
        self.update_channels(|channels| channels.failed = true);
        Err(send_result
            .err()
            .or_else(|| receive_result.err())
            .unwrap_or_else(|| FepError::ConnectionDown("connect failed".to_string())))
    }

    async fn connect_side_with_retry(&self, side: ChannelSide) -> FepResult<()> {
        self.set_side_state(side, ChannelState::Connecting);
        let budget = self.config.reconnect_max_attempts().max(1);
        let mut last_error = None;
        for attempt in 1..=budget {
            if self.closing.load(Ordering::SeqCst) {
                return Err(FepError::Shutdown);
            }
            if attempt > 1 {
                tokio::time::sleep(backoff_delay(attempt - 1)).await;
            }
            match tcp_client::connect(self.side_addr(side), self.config.connect_timeout()).await {
                Ok(stream) => {
                    self.install_handler(side, stream).await;
                    self.set_side_state(side, ChannelState::Connected);
                    debug!("{} channel connected (attempt {attempt})", side.name());
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "{} channel connect attempt {attempt}/{budget} failed: {e}",
                        side.name()
                    );
                    last_error = Some(e);
                }
            }
        }
        self.set_side_state(side, ChannelState::Disconnected);
        Err(last_error
            .unwrap_or_else(|| FepError::ConnectionDown(format!("{} channel", side.name()))))
    }

    async fn install_handler(&self, side: ChannelSide, stream: tokio::net::TcpStream) {
        match side {
            ChannelSide::Send => {
                let generation = self.send_generation.fetch_add(1, Ordering::SeqCst) + 1;
                let handler = Arc::new(SendHandler::new(
                    stream,
                    self.codec.clone(),
                    Arc::clone(&self.stats),
                    self.events_tx.clone(),
                    generation,
                ));
                *self.send_handler.write().await = Some(handler);
            }
            ChannelSide::Receive => {
                let generation = self.receive_generation.fetch_add(1, Ordering::SeqCst) + 1;
                let (read_half, write_half) = stream.into_split();
                let handler = ReceiveHandler::spawn(
                    read_half,
                    write_half,
                    ReceiveLoop {
                        channel_name: CHANNEL_NAME,
                        codec: self.codec.clone(),
                        registry: self.registry.clone(),
                        stats: Arc::clone(&self.stats),
                        events: self.events_tx.clone(),
                        unsolicited: DebugIgnore(Arc::clone(&self.unsolicited.0)),
                        read_timeout: self.config.read_timeout(),
                        generation,
                    },
                );
                if let Ok(mut slot) = self.receive_handler.lock() {
                    *slot = Some(handler);
                }
            }
        }
    }

    async fn reconnect_side(&self, side: ChannelSide) {
        self.set_side_state(side, ChannelState::Reconnecting);
        let budget = self.config.reconnect_max_attempts().max(1);
        for attempt in 1..=budget {
            if self.closing.load(Ordering::SeqCst) {
                return;
            }
            let delay = backoff_delay(attempt);
            debug!(
                "reconnecting {} channel in {delay:?} (attempt {attempt}/{budget})",
                side.name()
            );
            tokio::time::sleep(delay).await;
            match tcp_client::connect(self.side_addr(side), self.config.connect_timeout()).await {
                Ok(stream) => {
                    self.install_handler(side, stream).await;
                    self.set_side_state(side, ChannelState::Connected);
                    self.stats.add_reconnect();
                    info!("{} channel reconnected", side.name());
                    self.resume_session().await;
                    return;
                }
                Err(e) => warn!(
                    "{} channel reconnect attempt {attempt}/{budget} failed: {e}",
                    side.name()
                ),
            }
        }
        error!(
            "{} channel reconnection budget exhausted, link failed",
            side.name()
        );
        self.update_channels(|channels| channels.failed = true);
        self.registry.cancel_all(&CancelReason::ConnectionDown(
            "reconnection budget exhausted".to_string(),
        ));
    }

    // After a reconnect, a link that had a session re-runs sign-on as
    // soon as both sides are up again.
    async fn resume_session(&self) {
        let resume = self.channels.lock().map_or(false, |channels| {
            channels.was_signed_on && channels.send.is_up() && channels.receive.is_up()
        });
        if resume {
            match self.sign_on_exchange().await {
                Ok(()) => info!("session re-established after reconnect"),
                Err(e) => warn!("re-sign-on after reconnect failed: {e}"),
            }
        }
    }

    // --- session management ---------------------------------------------

    async fn sign_on_exchange(&self) -> FepResult<()> {
        let mut message = Message::new(Mti::NETWORK_MANAGEMENT)
            .with(Message::FIELD_NETMGMT_CODE, netmgmt::SIGN_ON);
        if !self.params.institution_id().is_empty() {
            message.set(32, self.params.institution_id())?;
        }
        let response = self
            .exchange(message, self.config.connect_timeout(), true)
            .await?;
        match response.response_code() {
            Some(response_code::APPROVED) => {
                self.heartbeat_misses.store(0, Ordering::Relaxed);
                self.update_channels(|channels| {
                    channels.signed_on = true;
                    channels.was_signed_on = true;
                    if channels.send.is_up() {
                        channels.send = ChannelState::SignedOn;
                    }
                    if channels.receive.is_up() {
                        channels.receive = ChannelState::SignedOn;
                    }
                });
                self.stats.add_sign_on();
                info!("signed on to the switch");
                Ok(())
            }
            code => Err(FepError::Switch {
                code: code.unwrap_or("").to_string(),
            }),
        }
    }

    async fn sign_off_exchange(&self) {
        let message = Message::new(Mti::NETWORK_MANAGEMENT)
            .with(Message::FIELD_NETMGMT_CODE, netmgmt::SIGN_OFF);
        match self.exchange(message, SIGN_OFF_DEADLINE, false).await {
            Ok(_) => debug!("signed off"),
            Err(e) => debug!("sign-off not acknowledged: {e}"),
        }
    }

    // --- the request path -----------------------------------------------

    async fn exchange(
        &self,
        mut message: Message,
        timeout: Duration,
        check_admission: bool,
    ) -> FepResult<Message> {
        if check_admission {
            if self.closing.load(Ordering::SeqCst) {
                return Err(FepError::Shutdown);
            }
            let (send, receive, failed) = self.snapshot();
            if failed {
                return Err(FepError::ConnectionDown(
                    "link failed permanently".to_string(),
                ));
            }
            if !self.config.failure_policy().admits(send, receive) {
                return Err(FepError::ConnectionDown(format!(
                    "policy {:?} rejects submissions while send={send:?}, receive={receive:?}",
                    self.config.failure_policy()
                )));
            }
        }

        let trace = match message.trace() {
            Some(trace) => trace.to_string(),
            None => {
                let trace = self.traces.next_free(&self.registry)?;
                message.set(Message::FIELD_STAN, trace.clone())?;
                trace
            }
        };
        let pending = self
            .registry
            .register(trace.clone(), Instant::now() + timeout, CHANNEL_NAME)?;

        let handler = self.send_handler.read().await.clone();
        let Some(handler) = handler else {
            drop(pending);
            return Err(FepError::ConnectionDown(
                "send channel is not connected".to_string(),
            ));
        };
        if let Err(e) = handler.write(&message).await {
            drop(pending);
            let generation = self.send_generation.load(Ordering::SeqCst);
            let _ = self.events_tx.try_send(LinkEvent::ChannelDown {
                side: ChannelSide::Send,
                generation,
                reason: format!("write failed: {e}"),
            });
            return Err(e);
        }
        pending.await
    }

    // --- heartbeat -------------------------------------------------------

    async fn heartbeat_tick(&self) {
        if self.closing.load(Ordering::SeqCst) {
            return;
        }
        let (send, receive, failed) = self.snapshot();
        if failed || !send.is_up() || !receive.is_up() {
            return;
        }
        let interval = self.config.heartbeat_interval();
        let idle = self
            .send_handler
            .read()
            .await
            .as_ref()
            .map_or(Duration::ZERO, |handler| handler.write_idle());
        let since_last = self
            .last_heartbeat
            .lock()
            .map_or(Duration::ZERO, |last| last.elapsed());
        // scheduled probe and idle watchdog funnel into the same
        // exchange; the dedup window keeps them from doubling up
        if since_last < interval && idle < interval {
            return;
        }
        if since_last < interval / 2 {
            return;
        }
        if let Ok(mut last) = self.last_heartbeat.lock() {
            *last = Instant::now();
        }
        self.stats.add_heartbeat_sent();
        let message = Message::new(Mti::NETWORK_MANAGEMENT)
            .with(Message::FIELD_NETMGMT_CODE, netmgmt::ECHO_TEST);
        let deadline = (interval / 2).min(Duration::from_secs(5));
        match self.exchange(message, deadline, true).await {
            Ok(_) => {
                trace!("heartbeat answered");
                self.heartbeat_misses.store(0, Ordering::Relaxed);
            }
            Err(e) => {
                let misses = self.heartbeat_misses.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("heartbeat missed ({misses} consecutive): {e}");
                self.stats.add_heartbeat_missed();
                if misses >= 2 {
                    self.heartbeat_misses.store(0, Ordering::Relaxed);
                    let generation = self.send_generation.load(Ordering::SeqCst);
                    let _ = self.events_tx.try_send(LinkEvent::ChannelDown {
                        side: ChannelSide::Send,
                        generation,
                        reason: "two consecutive heartbeats missed".to_string(),
                    });
                }
            }
        }
    }

    // --- event handling --------------------------------------------------

    async fn handle_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::ReadStale { side } => {
                debug!("{} channel reported stale reads", side.name());
            }
            LinkEvent::ChannelDown {
                side,
                generation,
                reason,
            } => {
                if self.closing.load(Ordering::SeqCst) {
                    return;
                }
                let current = match side {
                    ChannelSide::Send => self.send_generation.load(Ordering::SeqCst),
                    ChannelSide::Receive => self.receive_generation.load(Ordering::SeqCst),
                };
                if generation != current {
                    debug!(
                        "ignoring stale down-event for {} channel (gen {generation}, now {current})",
                        side.name()
                    );
                    return;
                }
                warn!("{} channel down: {reason}", side.name());
                self.drop_handler(side).await;
                self.update_channels(|channels| {
                    channels.signed_on = false;
                    match side {
                        ChannelSide::Send => channels.send = ChannelState::Disconnected,
                        ChannelSide::Receive => channels.receive = ChannelState::Disconnected,
                    }
                });
                if self.config.failure_policy().cancels_pending_on(side) {
                    self.registry
                        .cancel_all(&CancelReason::ConnectionDown(reason));
                }
                if self.config.is_auto_reconnect() {
                    self.reconnect_side(side).await;
                }
            }
        }
    }

    async fn drop_handler(&self, side: ChannelSide) {
        match side {
            ChannelSide::Send => {
                if let Some(handler) = self.send_handler.write().await.take() {
                    handler.shutdown().await;
                }
            }
            ChannelSide::Receive => {
                let handler = self.receive_handler.lock().ok().and_then(|mut slot| slot.take());
                if let Some(handler) = handler {
                    handler.shutdown();
                }
            }
        }
    }

    // --- teardown --------------------------------------------------------

    async fn close(&self) -> FepResult<()> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("closing dual link");
        let signed_on = self.channels.lock().map_or(false, |c| c.signed_on);
        if signed_on {
            self.sign_off_exchange().await;
        }
        self.registry.cancel_all(&CancelReason::Shutdown);
        self.drop_handler(ChannelSide::Send).await;
        self.drop_handler(ChannelSide::Receive).await;
        self.update_channels(|channels| {
            channels.send = ChannelState::Disconnected;
            channels.receive = ChannelState::Disconnected;
            channels.signed_on = false;
            channels.failed = false;
        });
        if let Ok(tasks) = self.tasks.lock() {
            for task in tasks.iter() {
                task.abort();
            }
        }
        Ok(())
    }
}

async fn event_loop(inner: Weak<LinkInner>, mut events_rx: mpsc::Receiver<LinkEvent>) {
    while let Some(event) = events_rx.recv().await {
        match inner.upgrade() {
            Some(inner) => inner.handle_event(event).await,
            None => break,
        }
    }
}

async fn heartbeat_loop(inner: Weak<LinkInner>) {
    // run at a quarter of the interval so the idle watchdog reacts
    // between scheduled probes
    let period = match inner.upgrade() {
        Some(inner) => (inner.config.heartbeat_interval() / 4).max(Duration::from_millis(100)),
        None => return,
    };
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match inner.upgrade() {
            Some(inner) => inner.heartbeat_tick().await,
            None => break,
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1_u32 << attempt.saturating_sub(1).min(6);
    (BACKOFF_BASE * factor).min(BACKOFF_CAP)
}
