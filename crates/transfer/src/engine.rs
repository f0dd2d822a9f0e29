//! The transfer engine: one reactor thread multiplexing many downloads.
//!
//! Producer threads hand transfers over through a [`TaskQueue`] of
//! commands and wake the reactor with a [`Notify`]. The reactor owns a
//! single-threaded tokio runtime; every admitted transfer becomes a task
//! on it, throttled by a per-host semaphore.

use crate::transfer::Finish;
use crate::{EngineConfig, EngineError, Transfer, TransferError, TransferId, TransferStatus};
use futures_util::{FutureExt, StreamExt};
use imgview_scheduler::TaskQueue;
use log::{debug, error, trace, warn};
use reqwest::header::{HeaderMap, CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode, Url};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tokio::runtime::Runtime;
use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{self, MissedTickBehavior};

enum Command {
    Submit(Transfer),
    Resume(Transfer),
}

struct EngineShared {
    commands: TaskQueue<Command>,
    wake: Notify,
    stop: AtomicBool,
    active: AtomicUsize,
}

impl EngineShared {
    fn retire(&self, transfer: &Transfer, finish: Finish) {
        self.active.fetch_sub(1, Ordering::AcqRel);
        transfer.finish(finish);
    }

    fn cancel_pending(&self) {
        for command in self.commands.drain() {
            if let Command::Submit(transfer) = command {
                self.retire(&transfer, Finish::Cancelled);
            }
        }
    }
}

enum Reactor {
    Idle,
    Running(JoinHandle<()>),
    Stopped,
}

/// Multiplexes HTTP transfers onto a single background thread.
///
/// Constructing an engine spawns nothing; the reactor thread starts on
/// [`TransferEngine::start`] or the first [`TransferEngine::submit`].
/// Dropping the engine shuts it down and cancels whatever is in flight.
pub struct TransferEngine {
    config: Arc<EngineConfig>,
    shared: Arc<EngineShared>,
    reactor: Mutex<Reactor>,
}

impl TransferEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config: Arc::new(config),
            shared: Arc::new(EngineShared {
                commands: TaskQueue::new(),
                wake: Notify::new(),
                stop: AtomicBool::new(false),
                active: AtomicUsize::new(0),
            }),
            reactor: Mutex::new(Reactor::Idle),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn lock_reactor(&self) -> MutexGuard<'_, Reactor> {
        self.reactor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the reactor thread. Idempotent while running.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut reactor = self.lock_reactor();
        self.ensure_running(&mut reactor)
    }

    fn ensure_running(&self, reactor: &mut Reactor) -> Result<(), EngineError> {
        match reactor {
            Reactor::Running(_) => Ok(()),
            Reactor::Stopped => Err(EngineError::ShutDown),
            Reactor::Idle => {
                *reactor = Reactor::Running(self.spawn_reactor()?);
                Ok(())
            }
        }
    }

    fn spawn_reactor(&self) -> Result<JoinHandle<()>, EngineError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| EngineError::Start(e.to_string()))?;

        let client = {
            let _guard = runtime.enter();
            Client::builder()
                .connect_timeout(self.config.connect_timeout())
                .redirect(reqwest::redirect::Policy::limited(self.config.max_redirects))
                .user_agent(self.config.user_agent.clone())
                .build()
                .map_err(|e| EngineError::Start(e.to_string()))?
        };

        let reactor = ReactorLoop {
            shared: self.shared.clone(),
            config: self.config.clone(),
            client,
        };
        debug!(
            "starting transfer reactor ({} connections per host)",
            self.config.max_connections_per_host
        );
        thread::Builder::new()
            .name("imgview-transfer-reactor".into())
            .spawn(move || reactor.run_on(runtime))
            .map_err(|e| EngineError::Start(e.to_string()))
    }

    /// Hand an idle transfer to the engine. Starts the reactor if needed.
    ///
    /// After shutdown the transfer is finished as cancelled and
    /// [`EngineError::ShutDown`] is returned.
    pub fn submit(&self, transfer: &Transfer) -> Result<(), EngineError> {
        let mut reactor = self.lock_reactor();
        if matches!(*reactor, Reactor::Stopped) {
            drop(reactor);
            if transfer.status() == TransferStatus::Idle {
                transfer.finish(Finish::Cancelled);
            }
            return Err(EngineError::ShutDown);
        }
        self.ensure_running(&mut reactor)?;

        if !transfer.mark_submitted() {
            return Err(EngineError::NotIdle(transfer.id()));
        }
        self.shared.active.fetch_add(1, Ordering::AcqRel);
        self.shared.commands.push(Command::Submit(transfer.clone()));
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Create a transfer for `url` and submit it.
    pub fn fetch(&self, url: impl Into<String>) -> Result<Transfer, EngineError> {
        let transfer = Transfer::new(url);
        self.submit(&transfer)?;
        Ok(transfer)
    }

    /// Clear a transfer's pause flag and wake the reactor for it.
    pub fn resume(&self, transfer: &Transfer) -> Result<(), EngineError> {
        let reactor = self.lock_reactor();
        if matches!(*reactor, Reactor::Stopped) {
            return Err(EngineError::ShutDown);
        }
        transfer.resume();
        if matches!(*reactor, Reactor::Running(_)) {
            self.shared.commands.push(Command::Resume(transfer.clone()));
            self.shared.wake.notify_one();
        }
        Ok(())
    }

    /// Transfers submitted and not yet finished.
    pub fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lock_reactor(), Reactor::Running(_))
    }

    /// Stop the reactor and cancel every queued or active transfer.
    ///
    /// Blocks until the reactor thread has exited. Idempotent, and safe on
    /// an engine that never started.
    pub fn shutdown(&self) {
        let handle = {
            let mut reactor = self.lock_reactor();
            match std::mem::replace(&mut *reactor, Reactor::Stopped) {
                Reactor::Running(handle) => Some(handle),
                Reactor::Idle | Reactor::Stopped => None,
            }
        };
        self.shared.stop.store(true, Ordering::Release);
        self.shared.wake.notify_one();

        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                warn!("transfer engine shut down from its own reactor thread");
            } else if handle.join().is_err() {
                error!("transfer reactor thread panicked");
            }
        }
        self.shared.cancel_pending();
    }
}

impl Drop for TransferEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum Stop {
    Cancelled,
    Failed(TransferError),
}

impl From<TransferError> for Stop {
    fn from(err: TransferError) -> Self {
        Stop::Failed(err)
    }
}

enum Wakeup {
    Commands,
    Tick,
    Joined(Result<(Transfer, Finish), JoinError>),
}

struct ReactorLoop {
    shared: Arc<EngineShared>,
    config: Arc<EngineConfig>,
    client: Client,
}

impl ReactorLoop {
    fn run_on(self, runtime: Runtime) {
        runtime.block_on(self.run());
        debug!("transfer reactor stopped");
    }

    async fn run(self) {
        let mut tasks: JoinSet<(Transfer, Finish)> = JoinSet::new();
        let mut in_flight: HashMap<TransferId, Transfer> = HashMap::new();
        let mut hosts: HashMap<String, Arc<Semaphore>> = HashMap::new();
        let mut tick = time::interval(self.config.tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            for command in self.shared.commands.drain() {
                match command {
                    Command::Submit(transfer) => {
                        self.admit(transfer, &mut tasks, &mut in_flight, &mut hosts)
                    }
                    Command::Resume(transfer) => transfer.resume(),
                }
            }
            if self.shared.stop.load(Ordering::Acquire) {
                break;
            }

            let wakeup = tokio::select! {
                _ = self.shared.wake.notified() => Wakeup::Commands,
                _ = tick.tick() => Wakeup::Tick,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => Wakeup::Joined(joined),
            };
            match wakeup {
                Wakeup::Commands => {}
                Wakeup::Tick => {
                    prune_idle_hosts(&mut hosts);
                    trace!("{} transfers in flight", in_flight.len());
                }
                Wakeup::Joined(Ok((transfer, finish))) => {
                    in_flight.remove(&transfer.id());
                    self.shared.retire(&transfer, finish);
                }
                Wakeup::Joined(Err(err)) => error!("transfer task ended abnormally: {err}"),
            }
        }

        tasks.shutdown().await;
        for (_, transfer) in in_flight.drain() {
            self.shared.retire(&transfer, Finish::Cancelled);
        }
        self.shared.cancel_pending();
    }

    fn admit(
        &self,
        transfer: Transfer,
        tasks: &mut JoinSet<(Transfer, Finish)>,
        in_flight: &mut HashMap<TransferId, Transfer>,
        hosts: &mut HashMap<String, Arc<Semaphore>>,
    ) {
        if transfer.is_cancelled() {
            self.shared.retire(&transfer, Finish::Cancelled);
            return;
        }
        let url = transfer.url();
        let key = match host_key(&url) {
            Ok(key) => key,
            Err(err) => {
                warn!("rejecting transfer {}: {err}", transfer.id());
                self.shared.retire(&transfer, Finish::Failed(err));
                return;
            }
        };
        let limit = self.config.max_connections_per_host.max(1);
        let host = hosts
            .entry(key)
            .or_insert_with(|| Arc::new(Semaphore::new(limit)))
            .clone();

        debug!("admitting transfer {} for {url}", transfer.id());
        in_flight.insert(transfer.id(), transfer.clone());
        let client = self.client.clone();
        let config = self.config.clone();
        tasks.spawn(async move {
            let driven = AssertUnwindSafe(drive(&client, &transfer, host, &config))
                .catch_unwind()
                .await;
            let finish = match driven {
                Ok(Ok(())) => Finish::Completed,
                Ok(Err(Stop::Cancelled)) => Finish::Cancelled,
                Ok(Err(Stop::Failed(err))) => Finish::Failed(err),
                Err(_) => {
                    error!("transfer {} panicked", transfer.id());
                    Finish::Failed(TransferError::Request("transfer task panicked".into()))
                }
            };
            (transfer, finish)
        });
    }
}

fn host_key(url: &str) -> Result<String, TransferError> {
    let parsed = Url::parse(url).map_err(|e| TransferError::InvalidUrl(format!("{url}: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| TransferError::InvalidUrl(format!("{url}: missing host")))?;
    match parsed.port_or_known_default() {
        Some(port) => Ok(format!("{host}:{port}")),
        None => Ok(host.to_string()),
    }
}

/// Forget hosts no transfer holds a handle to.
fn prune_idle_hosts(hosts: &mut HashMap<String, Arc<Semaphore>>) {
    hosts.retain(|_, host| Arc::strong_count(host) > 1);
}

/// Resolves once the transfer's cancel flag is set.
async fn cancelled(transfer: &Transfer) {
    loop {
        if transfer.is_cancelled() {
            return;
        }
        transfer.wake_signal().notified().await;
    }
}

async fn wait_while_paused(transfer: &Transfer) -> Result<(), Stop> {
    loop {
        if transfer.is_cancelled() {
            return Err(Stop::Cancelled);
        }
        if !transfer.is_paused() {
            return Ok(());
        }
        transfer.wake_signal().notified().await;
    }
}

async fn drive(
    client: &Client,
    transfer: &Transfer,
    host: Arc<Semaphore>,
    config: &EngineConfig,
) -> Result<(), Stop> {
    // A paused transfer must not sit on one of the host's connections.
    let _permit = loop {
        wait_while_paused(transfer).await?;
        let permit = tokio::select! {
            permit = host.clone().acquire_owned() => permit.map_err(|_| Stop::Cancelled)?,
            _ = cancelled(transfer) => return Err(Stop::Cancelled),
        };
        if !transfer.is_paused() {
            break permit;
        }
    };

    let mut retries = 0;
    loop {
        match attempt(client, transfer, config).await {
            Err(Stop::Failed(err)) if err.is_transient() && retries < config.max_retries => {
                retries += 1;
                warn!(
                    "transfer {} {err}, retrying ({retries}/{})",
                    transfer.id(),
                    config.max_retries
                );
            }
            result => return result,
        }
    }
}

/// One request. Resumes with a `Range` header when bytes were already
/// received; a server that ignores it has the known prefix skipped.
async fn attempt(client: &Client, transfer: &Transfer, config: &EngineConfig) -> Result<(), Stop> {
    wait_while_paused(transfer).await?;
    let resume_from = transfer.begin_attempt();
    let stall = config.stall_timeout();

    let mut request = client.get(transfer.url());
    if resume_from > 0 {
        request = request.header(RANGE, format!("bytes={resume_from}-"));
    }

    let response = tokio::select! {
        sent = time::timeout(stall, request.send()) => match sent {
            Err(_) => return Err(TransferError::Timeout.into()),
            Ok(Err(err)) => return Err(TransferError::from_reqwest(&err).into()),
            Ok(Ok(response)) => response,
        },
        _ = cancelled(transfer) => return Err(Stop::Cancelled),
    };

    let status = response.status();
    if !status.is_success() {
        return Err(TransferError::Status(status.as_u16()).into());
    }
    let mut skip = 0u64;
    if status == StatusCode::PARTIAL_CONTENT {
        if let Some(total) = content_range_total(response.headers()) {
            transfer.set_total(total);
        }
    } else {
        skip = resume_from;
        if let Some(len) = response.content_length() {
            transfer.set_total(len);
        }
    }

    let mut body = response.bytes_stream();
    loop {
        wait_while_paused(transfer).await?;
        let next = tokio::select! {
            next = time::timeout(stall, body.next()) => next.map_err(|_| TransferError::Timeout)?,
            _ = cancelled(transfer) => return Err(Stop::Cancelled),
        };
        let chunk = match next {
            None => return Ok(()),
            Some(Err(err)) => return Err(TransferError::from_reqwest(&err).into()),
            Some(Ok(chunk)) => chunk,
        };

        let mut data = &chunk[..];
        if skip > 0 {
            let n = skip.min(data.len() as u64) as usize;
            data = &data[n..];
            skip -= n as u64;
        }
        if !data.is_empty() && !transfer.append(data) {
            return Err(Stop::Cancelled);
        }
        trace!("transfer {}: +{} bytes", transfer.id(), data.len());
    }
}

/// Total length from `Content-Range: bytes a-b/total`.
fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    value.rsplit_once('/')?.1.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_host_key() {
        assert_eq!(host_key("http://example.com/a.png").unwrap(), "example.com:80");
        assert_eq!(host_key("https://example.com/a").unwrap(), "example.com:443");
        assert_eq!(host_key("http://127.0.0.1:8080/x").unwrap(), "127.0.0.1:8080");
        assert!(matches!(host_key("not a url"), Err(TransferError::InvalidUrl(_))));
    }

    #[test]
    fn test_content_range_total() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_range_total(&headers), None);
        headers.insert(CONTENT_RANGE, HeaderValue::from_static("bytes 100-199/200"));
        assert_eq!(content_range_total(&headers), Some(200));
        headers.insert(CONTENT_RANGE, HeaderValue::from_static("bytes 0-9/*"));
        assert_eq!(content_range_total(&headers), None);
    }

    #[test]
    fn test_prune_idle_hosts() {
        let mut hosts = HashMap::new();
        let busy = Arc::new(Semaphore::new(2));
        hosts.insert("busy:80".to_string(), busy.clone());
        hosts.insert("idle:80".to_string(), Arc::new(Semaphore::new(2)));

        prune_idle_hosts(&mut hosts);
        assert!(hosts.contains_key("busy:80"));
        assert!(!hosts.contains_key("idle:80"));

        drop(busy);
        prune_idle_hosts(&mut hosts);
        assert!(hosts.is_empty());
    }

    #[test]
    fn test_new_engine_spawns_nothing() {
        let engine = TransferEngine::new(EngineConfig::default());
        assert!(!engine.is_running());
        assert_eq!(engine.active_count(), 0);
        engine.shutdown();
        engine.shutdown();
        assert!(!engine.is_running());
    }

    #[test]
    fn test_start_is_idempotent() {
        let engine = TransferEngine::new(EngineConfig::default());
        engine.start().unwrap();
        engine.start().unwrap();
        assert!(engine.is_running());
        engine.shutdown();
        assert!(matches!(engine.start(), Err(EngineError::ShutDown)));
    }

    #[test]
    fn test_submit_after_shutdown_cancels() {
        let engine = TransferEngine::new(EngineConfig::default());
        engine.shutdown();
        let transfer = Transfer::new("http://127.0.0.1:9/a");
        assert!(matches!(engine.submit(&transfer), Err(EngineError::ShutDown)));
        assert_eq!(transfer.status(), TransferStatus::Cancelled);
    }

    #[test]
    fn test_invalid_url_fails_without_request() {
        let engine = TransferEngine::new(EngineConfig::default());
        let transfer = engine.fetch("::nonsense::").unwrap();
        let outcome = transfer.wait();
        assert!(matches!(
            outcome,
            crate::TransferOutcome::Failed(TransferError::InvalidUrl(_))
        ));
        assert_eq!(engine.active_count(), 0);
    }

    #[test]
    fn test_resubmitting_in_flight_transfer_is_rejected() {
        let engine = TransferEngine::new(EngineConfig::default());
        let transfer = Transfer::new("http://127.0.0.1:9/a");
        transfer.pause();
        engine.submit(&transfer).unwrap();
        assert!(matches!(
            engine.submit(&transfer),
            Err(EngineError::NotIdle(id)) if id == transfer.id()
        ));
        engine.shutdown();
        assert_eq!(transfer.wait(), crate::TransferOutcome::Cancelled);
    }
}
