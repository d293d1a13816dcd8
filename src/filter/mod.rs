//! Filter chain.
//!
//! Fixed step order, evaluated one step at a time; the first step that
//! reaches a decision ends the run:
//! reply guard -> verdict cache -> account policy -> keyword policy ->
//! topic lock-in -> visual moderation -> credibility -> pass.

pub mod images;

use crate::classifier::{Classifier, ClassifyRequest};
use crate::config::Settings;
use crate::error::ClassifierError;
use crate::inspector::PostSignals;
use crate::statistics::{record, StatEvent, StatisticsCollector};
use images::ImageFetcher;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

const LOCK_IN_TEXT_CHARS: usize = 1000;
const DEFAULT_VERDICT_CAPACITY: usize = 5000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum FilterVerdict {
    Pass,
    Filtered { reason: String },
}

impl FilterVerdict {
    pub fn filtered(reason: impl Into<String>) -> Self {
        FilterVerdict::Filtered {
            reason: reason.into(),
        }
    }

    pub fn should_filter(&self) -> bool {
        matches!(self, FilterVerdict::Filtered { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            FilterVerdict::Pass => None,
            FilterVerdict::Filtered { reason } => Some(reason),
        }
    }
}

/// The step that produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    ReplyGuard,
    Cache,
    AccountPolicy,
    KeywordPolicy,
    TopicLockIn,
    VisualModeration,
    Credibility,
    Default,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::ReplyGuard => "reply-guard",
            Step::Cache => "cache",
            Step::AccountPolicy => "account-policy",
            Step::KeywordPolicy => "keyword-policy",
            Step::TopicLockIn => "topic-lock-in",
            Step::VisualModeration => "visual-moderation",
            Step::Credibility => "credibility",
            Step::Default => "default",
        }
    }
}

/// Verdicts memoized per post id, oldest evicted first once full.
#[derive(Debug)]
pub struct VerdictCache {
    inner: Mutex<VerdictEntries>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct VerdictEntries {
    verdicts: HashMap<String, FilterVerdict>,
    order: VecDeque<String>,
}

impl VerdictCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VerdictEntries::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, post_id: &str) -> Option<FilterVerdict> {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.verdicts.get(post_id).cloned()
    }

    pub fn insert(&self, post_id: &str, verdict: FilterVerdict) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if inner
            .verdicts
            .insert(post_id.to_string(), verdict)
            .is_none()
        {
            inner.order.push_back(post_id.to_string());
        }
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.verdicts.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.verdicts.clear();
        inner.order.clear();
    }
}

impl Default for VerdictCache {
    fn default() -> Self {
        Self::new(DEFAULT_VERDICT_CAPACITY)
    }
}

/// Outcome of one step: decided, or fall through to the next.
enum StepResult {
    Decided(FilterVerdict),
    Continue,
}

/// Per-run bookkeeping.
#[derive(Default)]
struct Run {
    setup_error: Option<ClassifierError>,
}

impl Run {
    fn classifier_failed(&mut self, step: Step, error: ClassifierError) {
        if error.is_setup_error() {
            log::error!("{}: {error}", step.as_str());
            self.setup_error = Some(error);
        } else {
            log::warn!("{} classifier failed, failing open: {error}", step.as_str());
        }
    }
}

pub struct FilterChain {
    classifier: Arc<dyn Classifier>,
    fetcher: Arc<dyn ImageFetcher>,
    verdicts: VerdictCache,
    stats: Option<Arc<StatisticsCollector>>,
}

impl FilterChain {
    pub fn new(classifier: Arc<dyn Classifier>, fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self {
            classifier,
            fetcher,
            verdicts: VerdictCache::default(),
            stats: None,
        }
    }

    pub fn with_statistics(mut self, stats: Arc<StatisticsCollector>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn verdicts(&self) -> &VerdictCache {
        &self.verdicts
    }

    /// Decides whether to filter a post. Always produces a verdict:
    /// classifier failures fail open. A missing credential is logged as an
    /// error and reported to statistics, and the verdict of that run is not
    /// memoized so the post is decided again once the setup is fixed.
    pub async fn decide(&self, signals: &PostSignals, settings: &Settings) -> FilterVerdict {
        if signals.is_reply {
            return FilterVerdict::Pass;
        }

        if let Some(cached) = self.verdicts.get(&signals.id) {
            log::debug!("Verdict cache hit for post {}", signals.id);
            record(&self.stats, StatEvent::VerdictCacheHit);
            return cached;
        }

        let started = Instant::now();
        let mut run = Run::default();
        let (step, verdict) = self.evaluate(signals, settings, &mut run).await;

        log::debug!(
            "Post {} decided by {}: {:?}",
            signals.id,
            step.as_str(),
            verdict
        );
        record(
            &self.stats,
            StatEvent::PostDecided {
                step: step.as_str().to_string(),
                filtered: verdict.should_filter(),
                processing_time_ms: started.elapsed().as_millis() as u64,
            },
        );

        match run.setup_error {
            Some(error) => record(
                &self.stats,
                StatEvent::SetupError {
                    message: error.to_string(),
                },
            ),
            None => self.verdicts.insert(&signals.id, verdict.clone()),
        }
        verdict
    }

    async fn evaluate(
        &self,
        signals: &PostSignals,
        settings: &Settings,
        run: &mut Run,
    ) -> (Step, FilterVerdict) {
        if let StepResult::Decided(v) = account_policy(signals, settings) {
            return (Step::AccountPolicy, v);
        }
        if let StepResult::Decided(v) = keyword_policy(signals, settings) {
            return (Step::KeywordPolicy, v);
        }
        if let StepResult::Decided(v) = self.topic_lock_in(signals, settings, run).await {
            return (Step::TopicLockIn, v);
        }
        if let StepResult::Decided(v) = self.visual_moderation(signals, settings, run).await {
            return (Step::VisualModeration, v);
        }
        if let StepResult::Decided(v) = credibility_policy(signals, settings) {
            return (Step::Credibility, v);
        }
        (Step::Default, FilterVerdict::Pass)
    }

    async fn topic_lock_in(
        &self,
        signals: &PostSignals,
        settings: &Settings,
        run: &mut Run,
    ) -> StepResult {
        if !settings.lock_in_mode || signals.text.trim().is_empty() {
            return StepResult::Continue;
        }

        let request = ClassifyRequest::CryptoTopic {
            text: signals.text.chars().take(LOCK_IN_TEXT_CHARS).collect(),
        };
        match self.classifier.classify(&request, settings).await {
            Ok(true) => StepResult::Decided(FilterVerdict::Pass),
            Ok(false) => StepResult::Decided(FilterVerdict::filtered("Non-crypto (Lock-in)")),
            Err(e) => {
                run.classifier_failed(Step::TopicLockIn, e);
                StepResult::Continue
            }
        }
    }

    async fn visual_moderation(
        &self,
        signals: &PostSignals,
        settings: &Settings,
        run: &mut Run,
    ) -> StepResult {
        if !settings.enable_image_filter {
            return StepResult::Continue;
        }

        let source_text = Some(signals.text.clone()).filter(|t| !t.trim().is_empty());
        let request_for = |image| ClassifyRequest::ImageModeration {
            image,
            source_text: source_text.clone(),
            threshold: settings.sexual_threshold,
            use_free_tier: settings.use_free_image_moderation,
        };

        if signals.image_refs.is_empty() {
            // Without images the free moderation endpoint still screens the text.
            if source_text.is_none() || !self.classifier.free_tier_active(settings) {
                return StepResult::Continue;
            }
            return match self.classifier.classify(&request_for(None), settings).await {
                Ok(true) => StepResult::Decided(FilterVerdict::filtered("NSFW detected")),
                Ok(false) => StepResult::Continue,
                Err(e) => {
                    run.classifier_failed(Step::VisualModeration, e);
                    StepResult::Continue
                }
            };
        }

        for url in &signals.image_refs {
            let image = images::image_input(self.fetcher.as_ref(), url).await;
            match self.classifier.classify(&request_for(Some(image)), settings).await {
                Ok(true) => return StepResult::Decided(FilterVerdict::filtered("NSFW detected")),
                Ok(false) => {}
                Err(e) => {
                    let setup = e.is_setup_error();
                    run.classifier_failed(Step::VisualModeration, e);
                    if setup {
                        break;
                    }
                }
            }
        }
        StepResult::Continue
    }
}

fn normalize_handle(handle: &str) -> String {
    handle.trim().trim_start_matches('@').to_lowercase()
}

fn account_policy(signals: &PostSignals, settings: &Settings) -> StepResult {
    let Some(author) = signals.author_handle.as_deref() else {
        return StepResult::Continue;
    };
    let author = normalize_handle(author);

    if settings
        .account_blacklist
        .iter()
        .any(|h| normalize_handle(h) == author)
    {
        return StepResult::Decided(FilterVerdict::filtered(format!("Blacklisted @{author}")));
    }
    if settings
        .account_allowlist
        .iter()
        .any(|h| normalize_handle(h) == author)
    {
        return StepResult::Decided(FilterVerdict::Pass);
    }
    StepResult::Continue
}

fn meaningful(keywords: &[String]) -> Vec<String> {
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

fn keyword_policy(signals: &PostSignals, settings: &Settings) -> StepResult {
    if !settings.enable_keyword_filter {
        return StepResult::Continue;
    }
    let blocked = meaningful(&settings.blacklist);
    let allowed = meaningful(&settings.allowlist);
    if blocked.is_empty() && allowed.is_empty() {
        return StepResult::Continue;
    }

    let text = signals.text.to_lowercase();
    if let Some(keyword) = blocked.iter().find(|k| text.contains(k.as_str())) {
        log::debug!("Blacklisted keyword matched: {keyword}");
        return StepResult::Decided(FilterVerdict::filtered("Blacklisted keyword"));
    }
    if allowed.is_empty() {
        return StepResult::Continue;
    }
    if allowed.iter().any(|k| text.contains(k.as_str())) {
        StepResult::Decided(FilterVerdict::Pass)
    } else {
        StepResult::Decided(FilterVerdict::filtered("Not in allowlist"))
    }
}

fn credibility_policy(signals: &PostSignals, settings: &Settings) -> StepResult {
    if !settings.enable_credibility_filter {
        return StepResult::Continue;
    }
    match signals.credibility_score {
        Some(score) if score < settings.credibility_threshold => {
            StepResult::Decided(FilterVerdict::filtered(format!("Low credibility ({score})")))
        }
        _ => StepResult::Continue,
    }
}
