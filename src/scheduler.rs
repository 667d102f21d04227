// ABOUTME: Interval-based background job scheduler over tokio tasks
// ABOUTME: Jobs log their own failures and can never crash the scheduler
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

//! Background job scheduling.
//!
//! Three recurring jobs keep the system healthy without inbound traffic:
//! the periodic sync pass, proactive token refresh ahead of expiry, and
//! webhook-subscription renewal. Jobs are infallible futures; anything that
//! can go wrong inside one is logged there and the tick loop keeps running.

use crate::cache::CacheProvider;
use crate::oauth::TokenLifecycleManager;
use crate::sync::SyncEngine;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Interval between proactive token refresh passes
pub const PROACTIVE_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// Interval between webhook-subscription renewal passes
pub const SUBSCRIPTION_RENEWAL_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
/// Renew subscriptions expiring within this many hours
pub const SUBSCRIPTION_RENEWAL_HORIZON_HOURS: i64 = 48;

type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

struct ScheduledJob {
    name: &'static str,
    interval: Duration,
    run: JobFn,
}

/// Recurring-interval and enqueue-now job execution
#[derive(Default)]
pub struct JobScheduler {
    jobs: Vec<ScheduledJob>,
}

/// Handle that stops the scheduler's tasks when dropped or shut down
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signal all job loops to stop and wait for them
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "scheduler task did not shut down cleanly");
            }
        }
    }
}

impl JobScheduler {
    /// Create an empty scheduler
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a recurring job. The first run happens one interval after
    /// start, not immediately.
    pub fn register_interval<F, Fut>(&mut self, name: &'static str, interval: Duration, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.jobs.push(ScheduledJob {
            name,
            interval,
            run: Arc::new(move || Box::pin(job()) as JobFuture),
        });
    }

    /// Run a one-shot job immediately on a background task
    pub fn enqueue<Fut>(name: &'static str, job: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            tracing::debug!(job = name, "enqueued job started");
            job.await;
            tracing::debug!(job = name, "enqueued job finished");
        });
    }

    /// Start every registered job on its own task
    #[must_use]
    pub fn start(self) -> SchedulerHandle {
        let (shutdown, _) = watch::channel(false);
        let mut tasks = Vec::with_capacity(self.jobs.len());

        for job in self.jobs {
            let mut shutdown_rx = shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(job.interval);
                // The first tick fires immediately; consume it so jobs run
                // one interval after start.
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            tracing::debug!(job = job.name, "scheduled job started");
                            // A panicking tick must not kill the interval loop.
                            match tokio::spawn((job.run)()).await {
                                Ok(()) => {
                                    tracing::debug!(job = job.name, "scheduled job finished");
                                }
                                Err(e) => {
                                    tracing::error!(job = job.name, error = %e, "scheduled job panicked");
                                }
                            }
                        }
                        _ = shutdown_rx.changed() => {
                            tracing::debug!(job = job.name, "scheduled job stopping");
                            break;
                        }
                    }
                }
            }));
        }

        SchedulerHandle { shutdown, tasks }
    }
}

/// Register the standard recurring jobs: periodic sync, proactive token
/// refresh and webhook-subscription renewal.
pub fn register_default_jobs<C: CacheProvider + 'static>(
    scheduler: &mut JobScheduler,
    engine: Arc<SyncEngine<C>>,
    tokens: Arc<TokenLifecycleManager<C>>,
    sync_interval: Duration,
    webhook_callback_url: String,
) {
    let sync_engine = engine.clone();
    scheduler.register_interval("periodic_sync", sync_interval, move || {
        let engine = sync_engine.clone();
        async move { engine.sync_all_periodic().await }
    });

    scheduler.register_interval("proactive_refresh", PROACTIVE_REFRESH_INTERVAL, move || {
        let tokens = tokens.clone();
        async move { tokens.refresh_all_expiring().await }
    });

    scheduler.register_interval(
        "subscription_renewal",
        SUBSCRIPTION_RENEWAL_INTERVAL,
        move || {
            let engine = engine.clone();
            let callback_url = webhook_callback_url.clone();
            async move {
                engine
                    .renew_webhook_subscriptions(
                        &callback_url,
                        SUBSCRIPTION_RENEWAL_HORIZON_HOURS,
                    )
                    .await;
            }
        },
    );
}
