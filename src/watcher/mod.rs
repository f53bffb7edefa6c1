
use crate::bbs::{
    ActualLrp, ActualLrpFilter, DomainSet, Event, EventSource, EventSubscriber, SchedulingInfo,
    SchedulingInfoFilter, WorkloadSnapshots,
};
use crate::emitter::{RegistryEmitter, TcpRouteEmitter};
use crate::error::EmitterError;
use crate::handler::RouteHandler;
use crate::server::state::{EmitterStats, StatsHandle};
use rand::Rng;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

const EVENT_QUEUE_DEPTH: usize = 1024;
const SUBSCRIBE_BACKOFF_BASE: Duration = Duration::from_millis(200);
const SUBSCRIBE_BACKOFF_MAX: Duration = Duration::from_secs(5);
/// Consecutive subscribe failures after which the watcher gives up and the
/// process exits non-zero.
const MAX_SUBSCRIBE_FAILURES: u32 = 10;

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub cell_id: String,
    pub sync_interval: Duration,
    pub emit_interval: Duration,
    pub snapshot_timeout: Duration,
}

struct Snapshot {
    desired: Vec<SchedulingInfo>,
    actuals: Vec<ActualLrp>,
    domains: DomainSet,
}

/// Owns the event subscription and the sync/emit tickers, and serialises all
/// table mutation through one dispatcher loop.
///
/// State machine: no subscription exists until the first snapshot fetch
/// succeeds. While a snapshot fetch is in flight, incoming events are
/// buffered and replayed in arrival order after the swap; if the fetch
/// fails, the buffer is discarded along with the snapshot.
pub struct Watcher<S, E, R, T>
where
    S: WorkloadSnapshots,
    E: EventSubscriber,
    R: RegistryEmitter,
    T: TcpRouteEmitter,
{
    store: S,
    subscriber: E,
    handler: RouteHandler<R, T>,
    config: WatcherConfig,
    stats: StatsHandle,
}

impl<S, E, R, T> Watcher<S, E, R, T>
where
    S: WorkloadSnapshots,
    E: EventSubscriber,
    R: RegistryEmitter,
    T: TcpRouteEmitter,
{
    pub fn new(
        store: S,
        subscriber: E,
        handler: RouteHandler<R, T>,
        config: WatcherConfig,
        stats: StatsHandle,
    ) -> Self {
        Self {
            store,
            subscriber,
            handler,
            config,
            stats,
        }
    }

    pub async fn run(mut self, shutdown: Arc<Notify>) -> anyhow::Result<()> {
        let (event_tx, mut event_rx) = mpsc::channel::<Event>(EVENT_QUEUE_DEPTH);
        let (fatal_tx, mut fatal_rx) = mpsc::channel::<anyhow::Error>(1);
        let (snapshot_tx, mut snapshot_rx) = mpsc::channel::<anyhow::Result<Snapshot>>(1);

        let mut sync_ticker = tokio::time::interval(self.config.sync_interval);
        sync_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first emit waits a full interval; the initial sync already
        // asserts the state.
        let mut emit_ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.emit_interval,
            self.config.emit_interval,
        );
        emit_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut cache: VecDeque<Event> = VecDeque::new();
        let mut syncing = false;
        let mut sync_task: Option<JoinHandle<()>> = None;
        let mut reader: Option<JoinHandle<()>> = None;

        info!(
            "watcher: started, cell_id={}, sync_interval={}s, emit_interval={}s",
            if self.config.cell_id.is_empty() {
                "<all>"
            } else {
                self.config.cell_id.as_str()
            },
            self.config.sync_interval.as_secs(),
            self.config.emit_interval.as_secs(),
        );

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    if let Some(reader) = reader.take() {
                        reader.abort();
                    }
                    if let Some(sync) = sync_task.take() {
                        sync.abort();
                    }
                    info!("watcher: shutdown complete");
                    return Ok(());
                }

                Some(error) = fatal_rx.recv() => {
                    if let Some(reader) = reader.take() {
                        reader.abort();
                    }
                    if let Some(sync) = sync_task.take() {
                        sync.abort();
                    }
                    return Err(error);
                }

                _ = sync_ticker.tick() => {
                    if syncing {
                        debug!("watcher: sync in flight, dropping tick");
                    } else {
                        syncing = true;
                        let store = self.store.clone();
                        let cell_id = self.config.cell_id.clone();
                        let deadline = self.config.snapshot_timeout;
                        let results = snapshot_tx.clone();
                        sync_task = Some(tokio::spawn(async move {
                            let result = fetch_snapshot(store, cell_id, deadline).await;
                            let _ = results.send(result).await;
                        }));
                    }
                }

                Some(result) = snapshot_rx.recv() => {
                    syncing = false;
                    sync_task = None;
                    match result {
                        Ok(snapshot) => {
                            if reader.is_none() {
                                reader = Some(spawn_subscription(
                                    self.subscriber.clone(),
                                    event_tx.clone(),
                                    fatal_tx.clone(),
                                ));
                            }
                            let started = Instant::now();
                            self.handler
                                .sync(snapshot.desired, snapshot.actuals, snapshot.domains)
                                .await;
                            metrics::histogram!("RouteEmitterSyncDuration")
                                .record(started.elapsed().as_secs_f64());
                            while let Some(event) = cache.pop_front() {
                                self.dispatch(event).await;
                            }
                            self.publish_stats();
                        }
                        Err(e) => {
                            // The last good table stays live; the next tick
                            // retries. No duration metric for a failed sync.
                            error!("watcher: sync failed, error={}", e);
                            cache.clear();
                        }
                    }
                }

                _ = emit_ticker.tick() => {
                    self.handler.emit_all().await;
                    metrics::gauge!("RoutesTotal").set(self.handler.route_count() as f64);
                    metrics::counter!("RoutesSynced").increment(1);
                    self.publish_stats();
                }

                event = event_rx.recv() => {
                    if let Some(event) = event {
                        if syncing {
                            cache.push_back(event);
                        } else {
                            self.dispatch(event).await;
                        }
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, event: Event) {
        // Cell-scoped mode can see a running instance of a process whose
        // scheduling info was outside the snapshot filter; fetch it on
        // demand before the event is applied.
        if !self.config.cell_id.is_empty() {
            if let Some(actual) = running_actual_of(&event) {
                if actual.cell_id == self.config.cell_id
                    && self.handler.should_refresh_desired(actual)
                {
                    let process_guid = actual.process_guid.clone();
                    self.refresh_desired(process_guid).await;
                }
            }
        }
        self.handler.handle_event(event).await;
    }

    async fn refresh_desired(&mut self, process_guid: String) {
        let fetch = self.store.scheduling_info(process_guid.clone());
        match tokio::time::timeout(self.config.snapshot_timeout, fetch).await {
            Ok(Ok(Some(info))) => {
                debug!(
                    "watcher: refreshed missing desired, process_guid={}",
                    process_guid
                );
                self.handler.refresh_desired(vec![info]).await;
            }
            Ok(Ok(None)) => {
                debug!(
                    "watcher: no scheduling info for running actual, process_guid={}",
                    process_guid
                );
            }
            Ok(Err(e)) => {
                error!(
                    "watcher: failed to refresh desired, process_guid={}, error={}",
                    process_guid, e
                );
            }
            Err(_) => {
                error!(
                    "watcher: refresh desired timed out, process_guid={}",
                    process_guid
                );
            }
        }
    }

    fn publish_stats(&self) {
        self.stats.store(Arc::new(EmitterStats {
            routes_total: self.handler.route_count(),
            tcp_routes_total: self.handler.tcp_route_count(),
            http_endpoints: self.handler.http_endpoint_count(),
            synced: true,
        }));
    }
}

fn running_actual_of(event: &Event) -> Option<&ActualLrp> {
    match event {
        Event::ActualCreated { actual } if actual.is_running() => Some(actual),
        Event::ActualChanged { after, .. } if after.is_running() => Some(after),
        _ => None,
    }
}

/// Issue the snapshot reads for one sync round. Cluster-wide mode reads all
/// three in parallel; cell-scoped mode must read the actuals first because
/// the scheduling-info filter is derived from them. Any failed or timed-out
/// read cancels the round.
async fn fetch_snapshot<S: WorkloadSnapshots>(
    store: S,
    cell_id: String,
    deadline: Duration,
) -> anyhow::Result<Snapshot> {
    let actuals_fut = with_timeout(
        deadline,
        store.actual_lrps(ActualLrpFilter {
            cell_id: cell_id.clone(),
        }),
    );
    let domains_fut = with_timeout(deadline, store.domains());

    if cell_id.is_empty() {
        let desired_fut = with_timeout(
            deadline,
            store.scheduling_infos(SchedulingInfoFilter::default()),
        );
        let (actuals, domains, desired) =
            tokio::try_join!(actuals_fut, domains_fut, desired_fut)?;
        Ok(Snapshot {
            desired,
            actuals,
            domains: DomainSet::new(domains),
        })
    } else {
        let (actuals, domains) = tokio::try_join!(actuals_fut, domains_fut)?;
        let mut process_guids: Vec<String> =
            actuals.iter().map(|a| a.process_guid.clone()).collect();
        process_guids.sort();
        process_guids.dedup();

        let desired = if process_guids.is_empty() {
            Vec::new()
        } else {
            with_timeout(
                deadline,
                store.scheduling_infos(SchedulingInfoFilter { process_guids }),
            )
            .await?
        };
        Ok(Snapshot {
            desired,
            actuals,
            domains: DomainSet::new(domains),
        })
    }
}

async fn with_timeout<V>(
    deadline: Duration,
    fut: impl Future<Output = anyhow::Result<V>>,
) -> anyhow::Result<V> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => anyhow::bail!("snapshot read timed out after {:?}", deadline),
    }
}

/// Background reader owning the subscription connection. Re-subscribes with
/// capped, jittered backoff on any stream fault; gives up (fatally) only
/// after too many consecutive subscribe failures.
fn spawn_subscription<E: EventSubscriber>(
    subscriber: E,
    events: mpsc::Sender<Event>,
    fatal: mpsc::Sender<anyhow::Error>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = SUBSCRIBE_BACKOFF_BASE;
        let mut failures: u32 = 0;

        loop {
            match subscriber.subscribe().await {
                Ok(mut stream) => {
                    info!("watcher: subscribed to event stream");
                    failures = 0;
                    backoff = SUBSCRIBE_BACKOFF_BASE;

                    loop {
                        match stream.next_event().await {
                            Some(Ok(event)) => {
                                if events.send(event).await.is_err() {
                                    return;
                                }
                            }
                            Some(Err(e)) => {
                                error!("watcher: event-source-error, error={}", e);
                                break;
                            }
                            None => {
                                error!("watcher: event-source-error, stream closed");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    error!(
                        "watcher: subscribe failed, attempt={}, error={}",
                        failures, e
                    );
                    if failures >= MAX_SUBSCRIBE_FAILURES {
                        let _ = fatal
                            .send(
                                EmitterError::SubscriptionLost(format!(
                                    "subscribe failed after {} attempts: {}",
                                    failures, e
                                ))
                                .into(),
                            )
                            .await;
                        return;
                    }
                }
            }

            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..100));
            tokio::time::sleep(backoff + jitter).await;
            backoff = (backoff * 2).min(SUBSCRIBE_BACKOFF_MAX);
        }
    })
}
