//! Engine loop - bounded pipeline from task to alert
//!
//! Tasks flow PENDING -> PROBING -> SCORING -> PUBLISHING -> DONE, each
//! stage owned by one component. A bounded queue feeds a semaphore-capped
//! worker pool; backpressure is explicit at both. Shutdown is cooperative:
//! workers check the signal between stages, and a cancelled task never
//! reaches the publisher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::gateway::{ChainGateway, EndpointHealthSnapshot, RpcTransport};
use crate::models::config::EngineConfig;
use crate::models::errors::{EngineError, EngineResult, ErrorCode};
use crate::models::types::{AnalysisTask, EngineStats, TaskState};
use crate::probe::TokenProbe;
use crate::publisher::{AlertPublisher, PublishOutcome};
use crate::scorer::RiskScorer;
use crate::stream::StreamTransport;

const QUEUE_CAPACITY: usize = 1024;

/// Monotonic counters shared across workers
#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    published: AtomicU64,
    suppressed: AtomicU64,
    requeued: AtomicU64,
    queue_depth: AtomicU64,
    in_flight: AtomicU64,
    latency_sum_ms: AtomicU64,
    latency_count: AtomicU64,
    last_publish_unix_ms: AtomicU64,
}

/// Shared, immutable-after-construction engine context
struct EngineCtx {
    config: EngineConfig,
    gateway: Arc<ChainGateway>,
    probe: TokenProbe,
    scorer: RiskScorer,
    publisher: AlertPublisher,
    counters: Counters,
    /// Most recent terminal error per chain, for the health report
    last_chain_error: DashMap<u64, String>,
}

/// The detection engine. Construct once, `submit` from anywhere, drive
/// with a single `run` call.
pub struct Engine {
    ctx: Arc<EngineCtx>,
    queue_tx: mpsc::Sender<AnalysisTask>,
    queue_rx: tokio::sync::Mutex<Option<mpsc::Receiver<AnalysisTask>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        rpc_transport: Arc<dyn RpcTransport>,
        stream_transport: Arc<dyn StreamTransport>,
    ) -> EngineResult<Self> {
        config.validate()?;

        let gateway = Arc::new(ChainGateway::new(&config, rpc_transport));
        let probe = TokenProbe::new(gateway.clone(), config.probe.clone());
        let scorer = RiskScorer::new(config.scoring.clone());
        let publisher = AlertPublisher::new(stream_transport, config.publisher.clone());

        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);

        info!(
            "🚀 Engine ready: {} chains, {} workers",
            gateway.chains().len(),
            config.max_concurrent_tasks
        );

        Ok(Self {
            ctx: Arc::new(EngineCtx {
                config,
                gateway,
                probe,
                scorer,
                publisher,
                counters: Counters::default(),
                last_chain_error: DashMap::new(),
            }),
            queue_tx,
            queue_rx: tokio::sync::Mutex::new(Some(queue_rx)),
            shutdown_tx,
        })
    }

    /// Enqueue one analysis task. Applies backpressure when the queue is
    /// full rather than dropping.
    pub async fn submit(&self, task: AnalysisTask) -> EngineResult<()> {
        self.ctx.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.ctx.counters.queue_depth.fetch_add(1, Ordering::Relaxed);
        debug!(
            "📥 Queued {} on chain {} ({}, attempt {})",
            task.token_address,
            task.chain_id,
            task.trigger.as_str(),
            task.attempt
        );
        self.queue_tx.send(task).await.map_err(|_| {
            self.ctx.counters.queue_depth.fetch_sub(1, Ordering::Relaxed);
            EngineError::new(ErrorCode::Unknown, "task queue closed")
        })
    }

    /// Signal cooperative shutdown. In-flight tasks stop at their next
    /// stage boundary; queued tasks are abandoned.
    pub fn shutdown(&self) {
        info!("🛑 Shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Drive the worker pool until shutdown. Single-shot: a second call
    /// returns immediately.
    pub async fn run(&self) {
        let mut rx = match self.queue_rx.lock().await.take() {
            Some(rx) => rx,
            None => return,
        };

        let workers = self.ctx.config.max_concurrent_tasks;
        let pool = Arc::new(Semaphore::new(workers));
        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                next = rx.recv() => {
                    let task = match next {
                        Some(task) => task,
                        None => break,
                    };
                    let permit = match pool.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };

                    self.ctx.counters.queue_depth.fetch_sub(1, Ordering::Relaxed);
                    self.ctx.counters.in_flight.fetch_add(1, Ordering::Relaxed);

                    let ctx = self.ctx.clone();
                    let requeue = self.queue_tx.clone();
                    let cancel = self.shutdown_tx.subscribe();
                    tokio::spawn(async move {
                        process_task(ctx.clone(), task, requeue, cancel).await;
                        ctx.counters.in_flight.fetch_sub(1, Ordering::Relaxed);
                        drop(permit);
                    });
                }
            }
        }

        // Drain: every worker holds a permit until done
        if let Ok(all) = pool.acquire_many(workers as u32).await {
            drop(all);
        }
        info!("👋 Engine stopped: {:?}", self.stats());
    }

    pub fn stats(&self) -> EngineStats {
        let c = &self.ctx.counters;
        let count = c.latency_count.load(Ordering::Relaxed);
        let avg_latency_ms = if count > 0 {
            c.latency_sum_ms.load(Ordering::Relaxed) as f64 / count as f64
        } else {
            0.0
        };
        EngineStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            published: c.published.load(Ordering::Relaxed),
            suppressed: c.suppressed.load(Ordering::Relaxed),
            requeued: c.requeued.load(Ordering::Relaxed),
            avg_latency_ms,
        }
    }

    /// Point-in-time health report: queue depth, in-flight count, per-chain
    /// endpoint health, and the last terminal error per chain.
    pub fn health_report(&self) -> HealthReport {
        let c = &self.ctx.counters;
        let chains = self
            .ctx
            .gateway
            .chains()
            .into_iter()
            .map(|chain_id| ChainHealth {
                chain_id,
                endpoints: self.ctx.gateway.endpoint_health(chain_id),
                last_error: self
                    .ctx
                    .last_chain_error
                    .get(&chain_id)
                    .map(|e| e.value().clone()),
            })
            .collect();

        let last_publish = c.last_publish_unix_ms.load(Ordering::Relaxed);
        HealthReport {
            queue_depth: c.queue_depth.load(Ordering::Relaxed),
            in_flight: c.in_flight.load(Ordering::Relaxed),
            stats: self.stats(),
            chains,
            last_publish_unix_ms: (last_publish > 0).then_some(last_publish),
        }
    }
}

/// Run one task through the full pipeline
async fn process_task(
    ctx: Arc<EngineCtx>,
    task: AnalysisTask,
    requeue: mpsc::Sender<AnalysisTask>,
    cancel: watch::Receiver<bool>,
) {
    let started = Instant::now();
    let mut state = TaskState::Pending;

    if let Err(e) = cancellation_gate(&cancel) {
        finish_cancelled(&ctx, &task, state, &e);
        return;
    }

    state = TaskState::Probing;
    let probe = match ctx.probe.probe(&task).await {
        Ok(probe) => probe,
        Err(e) => {
            handle_stage_error(&ctx, task, state, e, &requeue);
            return;
        }
    };

    if let Err(e) = cancellation_gate(&cancel) {
        finish_cancelled(&ctx, &task, state, &e);
        return;
    }

    state = TaskState::Scoring;
    let verdict = ctx.scorer.score(&probe, &task.aux);

    // Last cancellation gate before the side effect: a cancelled task must
    // never publish.
    if let Err(e) = cancellation_gate(&cancel) {
        finish_cancelled(&ctx, &task, state, &e);
        return;
    }

    state = TaskState::Publishing;
    match ctx.publisher.publish(&task, &probe, &verdict).await {
        Ok(PublishOutcome::Published(_)) => {
            ctx.counters.published.fetch_add(1, Ordering::Relaxed);
            ctx.counters
                .last_publish_unix_ms
                .store(unix_ms(), Ordering::Relaxed);
        }
        Ok(PublishOutcome::Duplicate(_) | PublishOutcome::Suppressed) => {
            ctx.counters.suppressed.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            handle_stage_error(&ctx, task, state, e, &requeue);
            return;
        }
    }

    let latency = started.elapsed().as_millis() as u64;
    ctx.counters.completed.fetch_add(1, Ordering::Relaxed);
    ctx.counters.latency_sum_ms.fetch_add(latency, Ordering::Relaxed);
    ctx.counters.latency_count.fetch_add(1, Ordering::Relaxed);
    debug!(
        "✅ {} on chain {} done in {}ms (run {})",
        task.token_address, task.chain_id, latency, task.run_id
    );
}

/// Retryable errors requeue with backoff until the attempt budget runs out;
/// everything else is terminal for this task. Returns immediately: the
/// backoff wait runs on a detached timer so the worker slot frees instead
/// of idling through the delay.
fn handle_stage_error(
    ctx: &Arc<EngineCtx>,
    mut task: AnalysisTask,
    state: TaskState,
    error: EngineError,
    requeue: &mpsc::Sender<AnalysisTask>,
) {
    ctx.last_chain_error
        .insert(task.chain_id, error.to_string());

    if error.code.is_retryable() && task.attempt < ctx.config.max_task_attempts {
        let backoff = ctx.config.requeue_backoff * task.attempt;
        warn!(
            "🔄 Requeueing {} on chain {} after {} in {} (attempt {}/{}, backoff {:?})",
            task.token_address,
            task.chain_id,
            error.code_str(),
            state.as_str(),
            task.attempt,
            ctx.config.max_task_attempts,
            backoff
        );
        task.attempt += 1;
        ctx.counters.requeued.fetch_add(1, Ordering::Relaxed);

        let ctx = ctx.clone();
        let requeue = requeue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            ctx.counters.queue_depth.fetch_add(1, Ordering::Relaxed);
            if requeue.send(task).await.is_err() {
                ctx.counters.queue_depth.fetch_sub(1, Ordering::Relaxed);
                ctx.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        });
        return;
    }

    error!(
        "❌ {} on chain {} failed in {}: {}",
        task.token_address,
        task.chain_id,
        state.as_str(),
        error
    );
    ctx.counters.failed.fetch_add(1, Ordering::Relaxed);
}

/// Stage-boundary check: a signalled shutdown turns into a task error so
/// cancellation carries its own code through the pipeline accounting.
fn cancellation_gate(cancel: &watch::Receiver<bool>) -> EngineResult<()> {
    if *cancel.borrow() {
        Err(EngineError::cancelled())
    } else {
        Ok(())
    }
}

fn finish_cancelled(ctx: &Arc<EngineCtx>, task: &AnalysisTask, state: TaskState, error: &EngineError) {
    debug!(
        "🚪 {} for {} on chain {} in {}",
        error.code_str(),
        task.token_address,
        task.chain_id,
        state.as_str()
    );
    ctx.counters.cancelled.fetch_add(1, Ordering::Relaxed);
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Serializable health snapshot for operators
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub queue_depth: u64,
    pub in_flight: u64,
    pub stats: EngineStats,
    pub chains: Vec<ChainHealth>,
    pub last_publish_unix_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainHealth {
    pub chain_id: u64,
    pub endpoints: Vec<EndpointHealthSnapshot>,
    pub last_error: Option<String>,
}
