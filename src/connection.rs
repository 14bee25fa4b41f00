//! The owning task: pairs a transport with a [`RequestManager`], drives
//! it with `tokio::select!` over inbound frames, caller submissions, and
//! per-record timers, and exposes a cloneable [`ConnectionHandle`] to the
//! rest of the process (spec §5).
//!
//! Grounded in the same split the teacher keeps between connection state
//! and the socket loop that drives it (`src/conn.rs`'s
//! `InternalConnection`), widened with a command channel and a
//! `DelayQueue` of per-request deadlines the way xitca-postgres's
//! `driver/mod.rs` multiplexes its own connection task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::error::{CloseReason, Result, RntbdError};
use crate::frame::FrameCodec;
use crate::manager::RequestManager;
use crate::request::{RequestArgs, StoreResponse};

/// A caller-pluggable liveness probe, polled on a fixed interval while a
/// connection is open. A failing probe tears the connection down with
/// [`CloseReason::UnhealthyChannel`], draining the pending table exactly
/// as a transport error would (spec §6).
#[async_trait::async_trait]
pub trait HealthCheck: Send + Sync + 'static {
    async fn is_healthy(&self) -> bool;
}

/// Default probe used when a caller doesn't supply its own: always
/// healthy.
pub struct AlwaysHealthy;

#[async_trait::async_trait]
impl HealthCheck for AlwaysHealthy {
    async fn is_healthy(&self) -> bool {
        true
    }
}

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
/// How often the connection task checks for callers who dropped their
/// receiver without waiting for a reply, so their record can be cancelled
/// and its deadline timer disarmed (spec §4.6, §5 Cancellation) instead of
/// sitting pending until it times out.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(250);

enum Command {
    Submit {
        args: RequestArgs,
        reply: oneshot::Sender<Result<StoreResponse>>,
    },
    Shutdown,
}

/// Cloneable caller-facing handle to a running [`Connection`]. Cheap to
/// clone; every clone shares the same underlying task.
#[derive(Clone)]
pub struct ConnectionHandle {
    commands: mpsc::Sender<Command>,
    endpoint: Arc<str>,
}

impl ConnectionHandle {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Submits one request and awaits its outcome. Resolves to `Err` if
    /// the connection task is gone, was closed exceptionally before this
    /// request settled, or the request itself failed or timed out.
    pub async fn submit(&self, args: RequestArgs) -> Result<StoreResponse> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Submit { args, reply })
            .await
            .map_err(|_| RntbdError::UnexpectedFrame("connection task is no longer running"))?;
        rx.await
            .map_err(|_| RntbdError::UnexpectedFrame("connection task dropped the reply channel"))?
    }

    /// Requests a graceful shutdown: the connection task drains its
    /// pending table with [`CloseReason::OnDeregister`] and exits.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

/// Owns the transport and the [`RequestManager`] driving it.
pub struct Connection<T> {
    transport: Framed<T, FrameCodec>,
    manager: RequestManager,
    commands: mpsc::Receiver<Command>,
    timers: DelayQueue<u64>,
    timer_keys: HashMap<u64, delay_queue::Key>,
    health: Arc<dyn HealthCheck>,
    endpoint: Arc<str>,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Spawns the connection task with the default, always-healthy probe.
    pub fn spawn(transport: T, config: ConnectionConfig, endpoint: impl Into<Arc<str>>) -> ConnectionHandle {
        Self::spawn_with_health(transport, config, endpoint, Arc::new(AlwaysHealthy))
    }

    pub fn spawn_with_health(
        transport: T,
        config: ConnectionConfig,
        endpoint: impl Into<Arc<str>>,
        health: Arc<dyn HealthCheck>,
    ) -> ConnectionHandle {
        let endpoint: Arc<str> = endpoint.into();
        let (tx, rx) = mpsc::channel(32);
        let manager = RequestManager::new(config, endpoint.clone());
        let connection = Connection {
            transport: Framed::new(transport, FrameCodec),
            manager,
            commands: rx,
            timers: DelayQueue::new(),
            timer_keys: HashMap::new(),
            health,
            endpoint: endpoint.clone(),
        };
        debug!(endpoint = %endpoint, "connection registered");
        tokio::spawn(connection.run());
        ConnectionHandle { commands: tx, endpoint }
    }

    async fn run(mut self) {
        let mut health_tick = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        health_tick.tick().await; // first tick fires immediately
        let mut cancel_tick = tokio::time::interval(CANCEL_POLL_INTERVAL);
        cancel_tick.tick().await;

        loop {
            tokio::select! {
                frame = self.transport.next() => {
                    match frame {
                        Some(Ok(frame)) => {
                            let settled_id = if frame.is_context_frame() { None } else { Some(frame.transport_request_id) };
                            if let Err(err) = self.manager.on_frame(frame) {
                                warn!(error = %err, endpoint = %self.endpoint, "protocol error, closing exceptionally");
                                self.close(CloseReason::OnClose).await;
                                return;
                            }
                            if let Some(id) = settled_id {
                                if let Some(key) = self.timer_keys.remove(&id) {
                                    self.timers.try_remove(&key);
                                }
                            }
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, endpoint = %self.endpoint, "frame decode error, closing exceptionally");
                            self.close(CloseReason::OnClose).await;
                            return;
                        }
                        None => {
                            debug!(endpoint = %self.endpoint, "transport closed by peer");
                            self.close(CloseReason::OnClose).await;
                            return;
                        }
                    }
                }
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Submit { args, reply }) => self.handle_submit(args, reply),
                        Some(Command::Shutdown) | None => {
                            self.close(CloseReason::OnDeregister).await;
                            return;
                        }
                    }
                }
                Some(expired) = self.timers.next() => {
                    match expired {
                        Ok(expired) => {
                            let id = expired.into_inner();
                            self.timer_keys.remove(&id);
                            if self.manager.expire(id) {
                                warn!(request_id = id, endpoint = %self.endpoint, "request timed out");
                            }
                        }
                        Err(err) => warn!(error = %err, endpoint = %self.endpoint, "timer wheel error"),
                    }
                }
                _ = health_tick.tick() => {
                    if !self.health.is_healthy().await {
                        warn!(endpoint = %self.endpoint, "health check failed, closing exceptionally");
                        self.close(CloseReason::UnhealthyChannel).await;
                        return;
                    }
                }
                _ = cancel_tick.tick() => {
                    for id in self.manager.reap_cancelled() {
                        if let Some(key) = self.timer_keys.remove(&id) {
                            self.timers.try_remove(&key);
                        }
                    }
                }
            }

            if let Err(err) = self.flush_outbound().await {
                warn!(error = %err, endpoint = %self.endpoint, "write failed, closing exceptionally");
                self.close(CloseReason::OnClose).await;
                return;
            }
        }
    }

    fn handle_submit(&mut self, args: RequestArgs, reply: oneshot::Sender<Result<StoreResponse>>) {
        if !self.manager.serviceable(1) {
            let _ = reply.send(Err(RntbdError::UnexpectedFrame("pending request limit reached")));
            return;
        }
        let (id, timeout) = self.manager.submit(args, reply);
        let key = self.timers.insert(id, timeout);
        self.timer_keys.insert(id, key);
    }

    async fn flush_outbound(&mut self) -> Result<()> {
        for frame in self.manager.drain_outbound() {
            self.transport.send(frame).await?;
        }
        Ok(())
    }

    async fn close(&mut self, reason: CloseReason) {
        self.manager.close_exceptionally(reason);
        for key in self.timer_keys.values() {
            self.timers.try_remove(key);
        }
        self.timer_keys.clear();

        // Graceful outbound-close precedes tearing down the transport
        // (spec §4.4 step 4): `SinkExt::close` flushes whatever is still
        // buffered before shutting the writer down, rather than dropping
        // it unflushed.
        if let Err(err) = self.transport.close().await {
            warn!(error = %err, endpoint = %self.endpoint, "error closing transport during shutdown");
        }
    }
}
