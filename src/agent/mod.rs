//! Agent loop: walks the timeline one post at a time and asks the host to
//! stop showing posts the filter chain rejects.

pub mod locator;

use crate::config::{Mode, Settings};
use crate::error::AgentError;
use crate::filter::FilterChain;
use crate::inspector::{inspect, is_reply};
use crate::page::{Marker, Page, PostNode, ScrollAlign};
use crate::statistics::{record, StatEvent, StatisticsCollector};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant, MissedTickBehavior};

const DISALLOWED_SURFACE: &str = "/notifications";
const MAX_SCROLL_WAIT: Duration = Duration::from_secs(1);
const PASS_DELAY: Duration = Duration::from_millis(500);
const LOAD_MORE_SCROLL_PX: i32 = 500;

/// Human input seen while the loop is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    PointerMove,
    Wheel,
    Touch,
    Key,
    UserScroll,
    /// Scrolls issued by the agent itself.
    ProgrammaticScroll,
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Inactive,
    /// Disallowed surface; the loop was stopped.
    Stopped,
    /// A previous tick is still running.
    Busy,
    /// Human activity within the pause window.
    Paused,
    NoPosts,
    /// Every post was already handled; scrolled to load more.
    ScrolledForMore,
    Passed { post_id: String },
    Filtered { post_id: String, reason: String, dismissed: bool },
}

struct RunningTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct AgentCore {
    page: Arc<dyn Page>,
    chain: Arc<FilterChain>,
    stats: Option<Arc<StatisticsCollector>>,
    settings: RwLock<Arc<Settings>>,
    active: AtomicBool,
    processing: AtomicBool,
    cursor: AtomicUsize,
    last_interaction: Mutex<Instant>,
}

/// Clears the in-flight flag however the tick ends.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl AgentCore {
    fn settings(&self) -> Arc<Settings> {
        self.settings
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn deactivate(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            self.page.set_agent_indicator(false);
            log::info!("Agent mode stopped");
        }
    }

    fn since_interaction(&self) -> Duration {
        let last = *self.last_interaction.lock().unwrap_or_else(|p| p.into_inner());
        Instant::now().saturating_duration_since(last)
    }

    /// Cursor scan with wraparound: the next post not yet handled. Replies
    /// met on the way are marked handled and skipped.
    fn next_candidate(&self, posts: &[Arc<dyn PostNode>]) -> Option<usize> {
        let mut index = self.cursor.load(Ordering::SeqCst);
        for _ in 0..posts.len() {
            if index >= posts.len() {
                index = 0;
            }
            let post = &posts[index];
            if !post.has_marker(Marker::AgentProcessed) {
                if is_reply(&post.snapshot()) {
                    log::debug!("Skipping reply at index {index}");
                    post.set_marker(Marker::AgentProcessed);
                } else {
                    self.cursor.store(index, Ordering::SeqCst);
                    return Some(index);
                }
            }
            index += 1;
        }
        None
    }

    async fn tick(&self) -> TickOutcome {
        if !self.active.load(Ordering::SeqCst) {
            return TickOutcome::Inactive;
        }
        let settings = self.settings();
        if !settings.enabled {
            return TickOutcome::Inactive;
        }

        if self.page.path().contains(DISALLOWED_SURFACE) {
            log::info!("Navigated to notifications, stopping agent");
            self.deactivate();
            return TickOutcome::Stopped;
        }

        if self.processing.swap(true, Ordering::SeqCst) {
            log::debug!("Still processing previous post");
            return TickOutcome::Busy;
        }
        let _guard = ProcessingGuard(&self.processing);

        let idle = self.since_interaction();
        if idle < settings.pause_duration() {
            log::debug!("Agent paused for user interaction ({idle:?} ago)");
            return TickOutcome::Paused;
        }

        let posts = self.page.posts();
        if posts.is_empty() {
            log::debug!("No posts on page");
            return TickOutcome::NoPosts;
        }

        let Some(index) = self.next_candidate(&posts) else {
            log::debug!("All posts processed, scrolling for more");
            self.page.scroll_by(LOAD_MORE_SCROLL_PX);
            self.cursor.store(0, Ordering::SeqCst);
            return TickOutcome::ScrolledForMore;
        };
        let post = posts[index].clone();

        post.scroll_into_view(ScrollAlign::Center);
        sleep(settings.scroll_delay().min(MAX_SCROLL_WAIT)).await;

        let signals = inspect(post.as_ref()).await;
        let verdict = self.chain.decide(&signals, &settings).await;

        let outcome = match verdict.reason() {
            Some(reason) => {
                sleep(settings.click_delay()).await;
                // A stop during evaluation cancels the action, not the evaluation.
                let dismissed = if self.active.load(Ordering::SeqCst) {
                    let dismissed =
                        locator::dismiss(self.page.as_ref(), post.as_ref(), settings.allow_menu_guess)
                            .await;
                    record(&self.stats, StatEvent::DismissAttempt { success: dismissed });
                    dismissed
                } else {
                    log::info!("Agent stopped before dismissing post {}", signals.id);
                    false
                };
                sleep(settings.click_delay()).await;
                TickOutcome::Filtered {
                    post_id: signals.id.clone(),
                    reason: reason.to_string(),
                    dismissed,
                }
            }
            None => {
                log::debug!("Post {} passed", signals.id);
                sleep(PASS_DELAY).await;
                TickOutcome::Passed {
                    post_id: signals.id.clone(),
                }
            }
        };

        post.set_marker(Marker::AgentProcessed);
        self.cursor.store(index + 1, Ordering::SeqCst);
        outcome
    }
}

pub struct AgentLoop {
    core: Arc<AgentCore>,
    task: Mutex<Option<RunningTask>>,
}

impl AgentLoop {
    pub fn new(
        page: Arc<dyn Page>,
        chain: Arc<FilterChain>,
        stats: Option<Arc<StatisticsCollector>>,
    ) -> Self {
        Self {
            core: Arc::new(AgentCore {
                page,
                chain,
                stats,
                settings: RwLock::new(Arc::new(Settings::default())),
                active: AtomicBool::new(false),
                processing: AtomicBool::new(false),
                cursor: AtomicUsize::new(0),
                last_interaction: Mutex::new(Instant::now()),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        self.core.active.load(Ordering::SeqCst)
    }

    /// Starts the loop, restarting it if it is already running.
    pub fn start(&self, settings: Arc<Settings>) -> Result<(), AgentError> {
        self.stop();

        if settings.mode != Mode::Agent {
            log::warn!("Agent mode not started: mode is not agent");
            return Err(AgentError::WrongMode);
        }
        if !settings.enabled {
            log::warn!("Agent mode not started: extension disabled");
            return Err(AgentError::Disabled);
        }
        let path = self.core.page.path();
        if path.contains(DISALLOWED_SURFACE) {
            log::warn!("Agent mode blocked on {path}");
            return Err(AgentError::DisallowedSurface(path));
        }

        let period = settings.agent_period();
        log::info!(
            "Starting agent mode (scroll {:?}, click {:?}, pause {:?})",
            settings.scroll_delay(),
            settings.click_delay(),
            settings.pause_duration()
        );

        *self
            .core
            .settings
            .write()
            .unwrap_or_else(|p| p.into_inner()) = settings;
        *self
            .core
            .last_interaction
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Instant::now();
        self.core.cursor.store(0, Ordering::SeqCst);
        self.core.active.store(true, Ordering::SeqCst);
        self.core.page.set_agent_indicator(true);

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let core = self.core.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        core.tick().await;
                        if !core.active.load(Ordering::SeqCst) {
                            break;
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        *self.task.lock().unwrap_or_else(|p| p.into_inner()) = Some(RunningTask { shutdown, handle });
        Ok(())
    }

    /// Cancels the timer and retracts the indicator. A tick already in
    /// flight finishes its evaluation but does not dismiss anything.
    pub fn stop(&self) {
        let task = self.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(task) = task {
            let _ = task.shutdown.send(true);
            drop(task.handle);
        }
        self.core.deactivate();
    }

    /// Human input pauses automation; the agent's own scrolls do not count.
    pub fn record_interaction(&self, kind: Interaction) {
        if kind == Interaction::ProgrammaticScroll || !self.is_active() {
            return;
        }
        *self
            .core
            .last_interaction
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Instant::now();
        log::debug!("User interaction ({kind:?}), pausing agent");
    }

    /// Runs one tick directly, outside the timer.
    pub async fn tick(&self) -> TickOutcome {
        self.core.tick().await
    }
}

impl Drop for AgentLoop {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().unwrap_or_else(|p| p.into_inner()).take() {
            task.handle.abort();
        }
    }
}
