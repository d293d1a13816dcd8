//! Wires the components together for one page and handles control commands.

use crate::agent::AgentLoop;
use crate::config::{Mode, Settings};
use crate::filter::{FilterChain, FilterVerdict};
use crate::inspector::{inspect, is_reply};
use crate::page::{Marker, Page, PostNode};
use crate::scheduler::{IntersectionEntry, ReadyReceiver, ViewportScheduler};
use crate::statistics::StatisticsCollector;
use crate::visibility::VisibilityController;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Messages from a control surface (popup, settings page).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Command {
    Toggle { enabled: bool },
    ModeChange { mode: Mode },
    SettingsUpdated { settings: Box<Settings> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResponse {
    pub success: bool,
    /// Why agent mode did not start, when it was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_error: Option<String>,
}

pub struct ZenRuntime {
    page: Arc<dyn Page>,
    settings: RwLock<Arc<Settings>>,
    chain: Arc<FilterChain>,
    visibility: VisibilityController,
    scheduler: ViewportScheduler,
    agent: AgentLoop,
}

impl ZenRuntime {
    /// Builds the runtime and returns the receiver of posts ready for
    /// evaluation; feed it to [`ZenRuntime::run`] or drain it manually.
    pub fn new(
        page: Arc<dyn Page>,
        chain: Arc<FilterChain>,
        settings: Settings,
        stats: Option<Arc<StatisticsCollector>>,
    ) -> (Self, ReadyReceiver) {
        let settings = Arc::new(settings.normalized());
        let (scheduler, ready) = ViewportScheduler::new(settings.viewport_margin_px);
        let agent = AgentLoop::new(page.clone(), chain.clone(), stats);
        let runtime = Self {
            page,
            settings: RwLock::new(settings),
            chain,
            visibility: VisibilityController::new(),
            scheduler,
            agent,
        };
        (runtime, ready)
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn replace_settings(&self, settings: Settings) -> Arc<Settings> {
        let settings = Arc::new(settings.normalized());
        self.scheduler.set_margin(settings.viewport_margin_px);
        *self.settings.write().unwrap_or_else(|p| p.into_inner()) = settings.clone();
        settings
    }

    pub fn chain(&self) -> &FilterChain {
        &self.chain
    }

    pub fn visibility(&self) -> &VisibilityController {
        &self.visibility
    }

    pub fn scheduler(&self) -> &ViewportScheduler {
        &self.scheduler
    }

    pub fn agent(&self) -> &AgentLoop {
        &self.agent
    }

    /// Applies the current snapshot: agent on or off, existing posts queued.
    pub fn init(&self) -> CommandResponse {
        let settings = self.settings();
        let agent_error = self.apply_mode(&settings);
        if settings.enabled {
            self.process_existing_posts();
        }
        CommandResponse {
            success: true,
            agent_error,
        }
    }

    fn apply_mode(&self, settings: &Arc<Settings>) -> Option<String> {
        if settings.enabled && settings.mode == Mode::Agent {
            self.start_agent(settings)
        } else {
            self.agent.stop();
            None
        }
    }

    fn start_agent(&self, settings: &Arc<Settings>) -> Option<String> {
        match self.agent.start(settings.clone()) {
            Ok(()) => None,
            Err(e) => {
                log::warn!("{e}");
                Some(e.to_string())
            }
        }
    }

    /// Manual-mode pipeline for one post. Returns the verdict when the post
    /// was evaluated.
    pub async fn process_post(&self, node: &dyn PostNode) -> Option<FilterVerdict> {
        let settings = self.settings();
        if !settings.enabled || node.has_marker(Marker::Processing) {
            return None;
        }
        if is_reply(&node.snapshot()) {
            // Permanent: replies are never evaluated.
            node.set_marker(Marker::Processing);
            return None;
        }

        node.set_marker(Marker::Processing);
        let signals = inspect(node).await;
        let verdict = self.chain.decide(&signals, &settings).await;

        // Toggle or mode may have changed while the chain ran.
        if let Some(reason) = verdict.reason() {
            let current = self.settings();
            if current.enabled && current.mode == Mode::Default {
                self.visibility
                    .hide(node, signals.author_handle.as_deref(), reason);
            }
        }
        node.clear_marker(Marker::Processing);
        Some(verdict)
    }

    /// Queues every post on the page that has not been observed yet.
    pub fn process_existing_posts(&self) -> usize {
        if !self.settings().enabled {
            return 0;
        }
        let pending: Vec<Arc<dyn PostNode>> = self
            .page
            .posts()
            .into_iter()
            .filter(|post| !post.has_marker(Marker::Observed))
            .collect();
        let count = pending.len();
        self.scheduler.on_insertions(pending);
        count
    }

    pub fn on_insertions(&self, nodes: Vec<Arc<dyn PostNode>>) {
        if self.settings().enabled {
            self.scheduler.on_insertions(nodes);
        }
    }

    /// Host removed these nodes from the page.
    pub fn on_removals(&self, node_keys: &[u64]) -> usize {
        self.scheduler.on_removals(node_keys)
    }

    pub fn on_intersections(&self, entries: Vec<IntersectionEntry>) -> usize {
        if !self.settings().enabled {
            return 0;
        }
        self.scheduler.on_intersections(entries)
    }

    /// Evaluates everything currently on the ready queue, in order.
    pub async fn drain_ready(&self, ready: &mut ReadyReceiver) -> Vec<FilterVerdict> {
        let mut verdicts = Vec::new();
        while let Ok(node) = ready.try_recv() {
            if let Some(verdict) = self.process_post(node.as_ref()).await {
                verdicts.push(verdict);
            }
        }
        verdicts
    }

    /// Evaluates posts as they become ready. Different posts may be in the
    /// pipeline at the same time.
    pub async fn run(self: Arc<Self>, mut ready: ReadyReceiver) {
        while let Some(node) = ready.recv().await {
            let runtime = self.clone();
            tokio::spawn(async move {
                runtime.process_post(node.as_ref()).await;
            });
        }
        log::debug!("Ready queue closed");
    }

    pub fn handle_command(&self, command: Command) -> CommandResponse {
        let mut agent_error = None;
        match command {
            Command::Toggle { enabled } => {
                let settings = self.replace_settings(Settings {
                    enabled,
                    ..(*self.settings()).clone()
                });
                log::info!("Filtering {}", if enabled { "enabled" } else { "disabled" });
                if enabled {
                    self.process_existing_posts();
                    if settings.mode == Mode::Agent {
                        agent_error = self.start_agent(&settings);
                    }
                } else {
                    self.agent.stop();
                    self.visibility.show_all(self.page.as_ref());
                }
            }
            Command::ModeChange { mode } => {
                let settings = self.replace_settings(Settings {
                    mode,
                    ..(*self.settings()).clone()
                });
                log::info!("Mode changed to {mode:?}");
                self.agent.stop();
                if settings.enabled && mode == Mode::Agent {
                    agent_error = self.start_agent(&settings);
                } else {
                    self.process_existing_posts();
                }
            }
            Command::SettingsUpdated { settings } => {
                let settings = self.replace_settings(*settings);
                log::info!("Settings reloaded");
                agent_error = self.apply_mode(&settings);
                if settings.enabled {
                    self.chain.verdicts().clear();
                    self.process_existing_posts();
                }
            }
        }
        CommandResponse {
            success: true,
            agent_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let toggle: Command = serde_json::from_str(r#"{"action":"toggle","enabled":true}"#).unwrap();
        assert!(matches!(toggle, Command::Toggle { enabled: true }));

        let mode: Command =
            serde_json::from_str(r#"{"action":"modeChange","mode":"agent"}"#).unwrap();
        assert!(matches!(mode, Command::ModeChange { mode: Mode::Agent }));

        let update: Command = serde_json::from_str(
            r#"{"action":"settingsUpdated","settings":{"enabled":true,"blacklist":["scam"]}}"#,
        )
        .unwrap();
        match update {
            Command::SettingsUpdated { settings } => {
                assert!(settings.enabled);
                assert_eq!(settings.blacklist, vec!["scam".to_string()]);
                assert_eq!(settings.click_delay, 3000);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
