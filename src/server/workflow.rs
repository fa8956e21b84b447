use crate::{
    protocol::{mti::response_code, Message},
    server::handler::{build_response, InboundContext, InboundHandler},
    FepResult,
};
use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use debug_ignore::DebugIgnore;
use std::{
    sync::{Arc, Weak},
    time::{Duration, Instant},
};
use tokio::sync::mpsc;

/// A financial request handed to the external workflow engine.
#[derive(Debug)]
pub struct WorkflowJob {
    /// The correlation key; completions join back through it.
    pub trace: String,
    /// The decoded request.
    pub message: Message,
}

/// Routes financial traffic (0200/0400) onto an event bus for an
/// external workflow engine and joins the asynchronous outcomes back to
/// the waiting channel sessions by trace.
///
/// Waiting sessions live in a TTL-bounded callback map, swept on every
/// insert and by a low-rate timer; an entry that outlives the TTL gets a
/// "response received too late" reply. Non-financial traffic falls
/// through to the wrapped handler. Pair this gateway with a session
/// response deadline comfortably above the TTL, so the timeout reply
/// originates here and not from the session watchdog.
#[derive(Debug)]
pub struct WorkflowGateway {
    bus_tx: mpsc::Sender<WorkflowJob>,
    callbacks: DashMap<String, WaitingSession>,
    ttl: Duration,
    fallback: DebugIgnore<Arc<dyn InboundHandler>>,
}

#[derive(Debug)]
struct WaitingSession {
    ctx: InboundContext,
    inserted_at: Instant,
}

const ROUTED_MTIS: [u16; 2] = [200, 400];

impl WorkflowGateway {
    /// Creates the gateway. The returned receiver is the event bus; the
    /// workflow engine consumes [`WorkflowJob`]s from it and reports
    /// outcomes through [`complete`](Self::complete).
    pub fn new(
        bus_capacity: usize,
        ttl: Duration,
        fallback: Arc<dyn InboundHandler>,
    ) -> (Arc<Self>, mpsc::Receiver<WorkflowJob>) {
        let (bus_tx, bus_rx) = mpsc::channel(bus_capacity);
        let gateway = Arc::new(Self {
            bus_tx,
            callbacks: DashMap::new(),
            ttl,
            fallback: DebugIgnore(fallback),
        });
        spawn_sweeper(Arc::downgrade(&gateway), ttl / 2);
        (gateway, bus_rx)
    }

    /// Joins a workflow outcome back to its waiting session. Returns
    /// false when the trace is unknown — already expired or never routed.
    pub fn complete(&self, trace: &str, response: Message) -> bool {
        match self.callbacks.remove(trace) {
            Some((_, waiting)) => {
                if let Err(e) = waiting.ctx.respond(response) {
                    warn!("workflow completion for trace {trace} undeliverable: {e}");
                }
                true
            }
            None => {
                debug!("workflow completion for unknown trace {trace}");
                false
            }
        }
    }

    /// Number of sessions currently awaiting a workflow outcome.
    pub fn pending(&self) -> usize {
        self.callbacks.len()
    }

    /// Expires waiting sessions older than the TTL with a
    /// "response received too late" reply.
    pub fn sweep(&self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .callbacks
            .iter()
            .filter(|entry| now.duration_since(entry.inserted_at) >= self.ttl)
            .map(|entry| entry.key().clone())
            .collect();
        for trace in expired {
            if let Some((_, waiting)) = self.callbacks.remove(&trace) {
                warn!("workflow outcome for trace {trace} overdue, replying late");
                match build_response(waiting.ctx.message(), response_code::RESPONSE_TOO_LATE) {
                    Ok(reply) => {
                        let _ = waiting.ctx.respond(reply);
                    }
                    Err(e) => warn!("cannot build late reply for trace {trace}: {e}"),
                }
            }
        }
    }
}

#[async_trait]
impl InboundHandler for WorkflowGateway {
    async fn handle(&self, ctx: InboundContext) -> FepResult<()> {
        let message = ctx.message();
        let routed = ROUTED_MTIS.contains(&message.mti().as_u16());
        let Some(trace) = message.trace().map(ToString::to_string) else {
            // the session layer requires field 11, this is belt and braces
            ctx.respond(build_response(message, response_code::INVALID_TRANSACTION)?)?;
            return Ok(());
        };
        if !routed {
            return self.fallback.handle(ctx).await;
        }

        self.sweep();
        let job = WorkflowJob {
            trace: trace.clone(),
            message: message.clone(),
        };
        match self.callbacks.entry(trace.clone()) {
            Entry::Occupied(_) => {
                warn!("trace {trace} is already awaiting a workflow outcome");
                ctx.respond(build_response(
                    ctx.message(),
                    response_code::INVALID_TRANSACTION,
                )?)?;
                return Ok(());
            }
            Entry::Vacant(vacant) => {
                vacant.insert(WaitingSession {
                    ctx,
                    inserted_at: Instant::now(),
                });
            }
        }
        if let Err(e) = self.bus_tx.try_send(job) {
            // bus full or engine gone: answer rather than hold the session
            warn!("event bus rejected trace {trace}: {e}");
            if let Some((_, waiting)) = self.callbacks.remove(&trace) {
                waiting.ctx.respond(build_response(
                    waiting.ctx.message(),
                    response_code::SYSTEM_MALFUNCTION,
                )?)?;
            }
        }
        Ok(())
    }
}

fn spawn_sweeper(gateway: Weak<WorkflowGateway>, period: Duration) {
    let period = period.max(Duration::from_millis(50));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match gateway.upgrade() {
                Some(gateway) => gateway.sweep(),
                None => break,
            }
        }
    });
}
