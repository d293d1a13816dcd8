use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepStats {
    pub step: String,
    pub decisions: u64,
    pub filtered: u64,
    pub passed: u64,
    pub first_decision: Option<DateTime<Utc>>,
    pub last_decision: Option<DateTime<Utc>>,
    pub total_processing_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_posts: u64,
    pub total_filtered: u64,
    pub total_passed: u64,
    pub verdict_cache_hits: u64,
    pub classifier_calls: u64,
    pub classifier_cache_hits: u64,
    pub classifier_errors: u64,
    pub fail_opens: u64,
    pub rate_limited_skips: u64,
    pub setup_errors: u64,
    pub dismiss_successes: u64,
    pub dismiss_failures: u64,
    pub start_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Default for GlobalStats {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            total_posts: 0,
            total_filtered: 0,
            total_passed: 0,
            verdict_cache_hits: 0,
            classifier_calls: 0,
            classifier_cache_hits: 0,
            classifier_errors: 0,
            fail_opens: 0,
            rate_limited_skips: 0,
            setup_errors: 0,
            dismiss_successes: 0,
            dismiss_failures: 0,
            start_time: now,
            last_updated: now,
        }
    }
}

/// Outcome of one classifier request as seen by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Flagged,
    Clear,
    CacheHit,
    RateLimited,
    FailOpen,
    Error,
}

#[derive(Debug, Clone)]
pub enum StatEvent {
    PostDecided {
        step: String,
        filtered: bool,
        processing_time_ms: u64,
    },
    VerdictCacheHit,
    ClassifierCall {
        capability: String,
        outcome: CallOutcome,
    },
    SetupError {
        message: String,
    },
    DismissAttempt {
        success: bool,
    },
}

enum Message {
    Event(StatEvent),
    Flush(oneshot::Sender<()>),
}

#[derive(Default)]
struct StatsState {
    global: GlobalStats,
    steps: HashMap<String, StepStats>,
    last_setup_error: Option<String>,
}

/// In-memory counters fed through a channel so recording never blocks a
/// pipeline run. Needs a running tokio runtime.
pub struct StatisticsCollector {
    sender: mpsc::UnboundedSender<Message>,
    state: Arc<Mutex<StatsState>>,
    _handle: tokio::task::JoinHandle<()>,
}

impl StatisticsCollector {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(StatsState::default()));

        let worker_state = state.clone();
        let handle = tokio::spawn(async move {
            Self::stats_worker(worker_state, receiver).await;
        });

        Self {
            sender,
            state,
            _handle: handle,
        }
    }

    pub fn record_event(&self, event: StatEvent) {
        if let Err(e) = self.sender.send(Message::Event(event)) {
            log::warn!("Failed to send statistics event: {e}");
        }
    }

    /// Waits until every event recorded so far has been applied.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(Message::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn get_stats(&self) -> (GlobalStats, Vec<StepStats>) {
        let state = lock(&self.state);
        let mut steps: Vec<StepStats> = state.steps.values().cloned().collect();
        steps.sort_by(|a, b| b.decisions.cmp(&a.decisions).then(a.step.cmp(&b.step)));
        (state.global.clone(), steps)
    }

    pub fn last_setup_error(&self) -> Option<String> {
        lock(&self.state).last_setup_error.clone()
    }

    pub fn reset_stats(&self) {
        let mut state = lock(&self.state);
        *state = StatsState::default();
    }

    async fn stats_worker(
        state: Arc<Mutex<StatsState>>,
        mut receiver: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(message) = receiver.recv().await {
            match message {
                Message::Event(event) => Self::process_event(event, &mut lock(&state)),
                Message::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
    }

    fn process_event(event: StatEvent, state: &mut StatsState) {
        let now = Utc::now();
        state.global.last_updated = now;

        match event {
            StatEvent::PostDecided {
                step,
                filtered,
                processing_time_ms,
            } => {
                let stats = state
                    .steps
                    .entry(step.clone())
                    .or_insert_with(|| StepStats {
                        step: step.clone(),
                        decisions: 0,
                        filtered: 0,
                        passed: 0,
                        first_decision: Some(now),
                        last_decision: Some(now),
                        total_processing_time_ms: 0,
                    });

                stats.decisions += 1;
                stats.last_decision = Some(now);
                stats.total_processing_time_ms += processing_time_ms;
                state.global.total_posts += 1;

                if filtered {
                    stats.filtered += 1;
                    state.global.total_filtered += 1;
                } else {
                    stats.passed += 1;
                    state.global.total_passed += 1;
                }
            }
            StatEvent::VerdictCacheHit => {
                state.global.verdict_cache_hits += 1;
            }
            StatEvent::ClassifierCall { outcome, .. } => match outcome {
                CallOutcome::CacheHit => state.global.classifier_cache_hits += 1,
                CallOutcome::RateLimited => state.global.rate_limited_skips += 1,
                CallOutcome::FailOpen => {
                    state.global.classifier_calls += 1;
                    state.global.fail_opens += 1;
                }
                CallOutcome::Error => {
                    state.global.classifier_calls += 1;
                    state.global.classifier_errors += 1;
                }
                CallOutcome::Flagged | CallOutcome::Clear => state.global.classifier_calls += 1,
            },
            StatEvent::SetupError { message } => {
                state.global.setup_errors += 1;
                state.last_setup_error = Some(message);
            }
            StatEvent::DismissAttempt { success } => {
                if success {
                    state.global.dismiss_successes += 1;
                } else {
                    state.global.dismiss_failures += 1;
                }
            }
        }
    }
}

fn lock(state: &Mutex<StatsState>) -> MutexGuard<'_, StatsState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Records into an optional collector; components run fine without one.
pub(crate) fn record(stats: &Option<Arc<StatisticsCollector>>, event: StatEvent) {
    if let Some(stats) = stats {
        stats.record_event(event);
    }
}
