//! Classifier gateway.
//!
//! One entry point for every content classifier the filter chain consults.
//! Results are cached by content fingerprint. The free moderation endpoint
//! is retried with backoff and fails open; paid chat providers get a single
//! attempt and report errors to the caller.

pub mod cache;
pub mod providers;
pub mod rate_limit;
pub mod transport;

use crate::config::{ProviderId, Settings};
use crate::error::ClassifierError;
use crate::statistics::{record, CallOutcome, StatEvent, StatisticsCollector};
use async_trait::async_trait;
use cache::ClassifierCache;
use providers::{ChatMessage, ProviderSpec};
use rate_limit::RateLimitState;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use transport::HttpTransport;

const MAX_FREE_TIER_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(1000);
const BACKOFF_CAP: Duration = Duration::from_millis(10_000);
const TEXT_FINGERPRINT_CHARS: usize = 100;
const INLINE_FINGERPRINT_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageInput {
    Url(String),
    Inline { media_type: String, base64: String },
}

impl ImageInput {
    pub fn to_url(&self) -> String {
        match self {
            ImageInput::Url(url) => url.clone(),
            ImageInput::Inline { media_type, base64 } => {
                format!("data:{media_type};base64,{base64}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClassifyRequest {
    /// Is the image sexually suggestive? Without an image the source text is
    /// moderated instead (free tier only).
    ImageModeration {
        image: Option<ImageInput>,
        source_text: Option<String>,
        threshold: f64,
        use_free_tier: bool,
    },
    /// Is the text about crypto?
    CryptoTopic { text: String },
}

impl ClassifyRequest {
    pub fn capability(&self) -> &'static str {
        match self {
            ClassifyRequest::ImageModeration { .. } => "image-moderation",
            ClassifyRequest::CryptoTopic { .. } => "crypto-topic-text",
        }
    }

    /// Cache key derived from content, never from the post.
    pub fn fingerprint(&self) -> String {
        match self {
            ClassifyRequest::ImageModeration {
                image: Some(ImageInput::Url(url)),
                ..
            } => format!("img_{url}"),
            ClassifyRequest::ImageModeration {
                image: Some(ImageInput::Inline { base64, .. }),
                ..
            } => format!("img_{}", prefix(base64, INLINE_FINGERPRINT_CHARS)),
            ClassifyRequest::ImageModeration {
                image: None,
                source_text,
                ..
            } => format!(
                "modtext_{}",
                prefix(source_text.as_deref().unwrap_or_default(), TEXT_FINGERPRINT_CHARS)
            ),
            ClassifyRequest::CryptoTopic { text } => {
                format!("text_{}", prefix(text, TEXT_FINGERPRINT_CHARS))
            }
        }
    }
}

fn prefix(s: &str, chars: usize) -> &str {
    match s.char_indices().nth(chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Anything the filter chain can ask for a yes/no classification.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        request: &ClassifyRequest,
        settings: &Settings,
    ) -> Result<bool, ClassifierError>;

    /// Whether image moderation would take the free moderation path.
    fn free_tier_active(&self, settings: &Settings) -> bool {
        settings.use_free_image_moderation && settings.image_provider == ProviderId::Openai
    }
}

pub struct ClassifierGateway {
    transport: Arc<dyn HttpTransport>,
    cache: ClassifierCache,
    rate_limit: Arc<RateLimitState>,
    stats: Option<Arc<StatisticsCollector>>,
}

impl ClassifierGateway {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            cache: ClassifierCache::default(),
            rate_limit: Arc::new(RateLimitState::new()),
            stats: None,
        }
    }

    pub fn with_rate_limit(mut self, rate_limit: Arc<RateLimitState>) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_statistics(mut self, stats: Arc<StatisticsCollector>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn cache(&self) -> &ClassifierCache {
        &self.cache
    }

    pub fn rate_limit(&self) -> &RateLimitState {
        &self.rate_limit
    }

    /// Connectivity check used by the settings page.
    pub async fn test_provider(
        &self,
        provider: ProviderId,
        api_key: &str,
        settings: &Settings,
    ) -> Result<(), ClassifierError> {
        if api_key.trim().is_empty() {
            return Err(ClassifierError::MissingConfig("API key is required".to_string()));
        }
        let spec = ProviderSpec::resolve(provider, &settings.custom_provider_config);
        if provider == ProviderId::Custom && spec.base_url.is_empty() {
            return Err(ClassifierError::MissingConfig(
                "Base URL is required for custom provider".to_string(),
            ));
        }

        let reply = providers::chat(
            self.transport.as_ref(),
            &spec,
            api_key,
            &[ChatMessage::user("Say \"ok\" if you can read this.")],
            false,
        )
        .await?;
        log::info!("Provider test response from {}: {}", spec.name, reply.trim());
        Ok(())
    }

    fn credential<'a>(
        &self,
        provider: ProviderId,
        settings: &'a Settings,
    ) -> Result<&'a str, ClassifierError> {
        settings.api_key_for(provider).ok_or_else(|| {
            log::error!("API key not configured for {}", provider.as_str());
            ClassifierError::Unavailable(provider.as_str().to_string())
        })
    }

    fn store(&self, key: String, result: bool) {
        self.cache.insert(key, result, Instant::now());
    }

    fn record_call(&self, request: &ClassifyRequest, outcome: CallOutcome) {
        record(
            &self.stats,
            StatEvent::ClassifierCall {
                capability: request.capability().to_string(),
                outcome,
            },
        );
    }

    /// Free moderation endpoint. Never returns an error: once the attempts
    /// are used up, or on an error that is not worth retrying, the answer is
    /// "not flagged".
    async fn moderate_free_tier(
        &self,
        request: &ClassifyRequest,
        input: &str,
        api_key: &str,
        threshold: f64,
    ) -> bool {
        if let Some(wait) = self.rate_limit.remaining(Instant::now()) {
            log::info!(
                "Rate limit cooldown active, skipping moderation (wait {}s)",
                wait.as_secs_f64().ceil()
            );
            self.record_call(request, CallOutcome::RateLimited);
            return false;
        }

        let headers = vec![("Authorization".to_string(), format!("Bearer {api_key}"))];
        let body = providers::moderation_body(input);
        let mut last_error: Option<ClassifierError> = None;

        for attempt in 0..MAX_FREE_TIER_ATTEMPTS {
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                log::debug!("Moderation retry attempt {} after {:?}", attempt + 1, delay);
                tokio::time::sleep(delay).await;
            }

            let outcome = match self
                .transport
                .post_json(providers::OPENAI_MODERATION_URL, &headers, &body)
                .await
            {
                Err(e) => Err(e),
                Ok(response) if response.is_success() => {
                    providers::parse_moderation(&response.body, threshold)
                }
                Ok(response) => {
                    if response.status == 429 {
                        let wait = rate_limit::parse_retry_after(response.retry_after.as_deref());
                        self.rate_limit.activate_until(Instant::now() + wait);
                        log::warn!(
                            "Rate limit hit (429), cooling down for {}s (attempt {})",
                            wait.as_secs(),
                            attempt + 1
                        );
                    } else {
                        log::error!("Moderation API error {}: {}", response.status, response.body);
                    }
                    Err(ClassifierError::Http {
                        status: response.status,
                        body: response.body,
                    })
                }
            };

            match outcome {
                Ok(flagged) => {
                    self.store(request.fingerprint(), flagged);
                    self.rate_limit.clear();
                    self.record_call(
                        request,
                        if flagged {
                            CallOutcome::Flagged
                        } else {
                            CallOutcome::Clear
                        },
                    );
                    return flagged;
                }
                Err(e) => {
                    let retry = e.is_retryable();
                    log::warn!("Moderation attempt {} failed: {e}", attempt + 1);
                    last_error = Some(e);
                    if !retry {
                        break;
                    }
                }
            }
        }

        log::warn!(
            "Moderation failed, failing open (not filtering): {}",
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string())
        );
        self.record_call(request, CallOutcome::FailOpen);
        false
    }

    async fn classify_uncached(
        &self,
        request: &ClassifyRequest,
        settings: &Settings,
    ) -> Result<bool, ClassifierError> {
        match request {
            ClassifyRequest::ImageModeration {
                image,
                source_text,
                threshold,
                use_free_tier,
            } => {
                let provider = settings.image_provider;
                let api_key = self.credential(provider, settings)?;
                let spec = ProviderSpec::resolve(provider, &settings.custom_provider_config);
                log::debug!("Using {} for image moderation", spec.name);

                if *use_free_tier && spec.supports_moderation {
                    let input = match (image, source_text) {
                        (Some(image), _) => image.to_url(),
                        (None, Some(text)) if !text.trim().is_empty() => text.clone(),
                        _ => return Ok(false),
                    };
                    return Ok(self
                        .moderate_free_tier(request, &input, api_key, *threshold)
                        .await);
                }

                let Some(image) = image else {
                    log::debug!("No image and no free moderation path, nothing to classify");
                    return Ok(false);
                };
                let messages = providers::vision_messages(&image.to_url());
                let reply =
                    providers::chat(self.transport.as_ref(), &spec, api_key, &messages, true)
                        .await?;
                let flagged = providers::interpret_yes_no(&reply);
                log::debug!("{} vision reply {:?} -> flagged={flagged}", spec.name, reply.trim());
                self.store(request.fingerprint(), flagged);
                Ok(flagged)
            }
            ClassifyRequest::CryptoTopic { text } => {
                let provider = settings.crypto_provider;
                let api_key = self.credential(provider, settings)?;
                let spec = ProviderSpec::resolve(provider, &settings.custom_provider_config);
                log::debug!("Using {} for crypto detection ({} chars)", spec.name, text.len());

                let messages = providers::crypto_messages(text);
                let reply =
                    providers::chat(self.transport.as_ref(), &spec, api_key, &messages, false)
                        .await?;
                let about_topic = providers::interpret_yes_no(&reply);
                self.store(request.fingerprint(), about_topic);
                Ok(about_topic)
            }
        }
    }
}

/// 1s, 2s, 4s ... capped at 10s, for retry `attempt` (1-based).
fn backoff_delay(attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    BACKOFF_BASE.saturating_mul(factor).min(BACKOFF_CAP)
}

#[async_trait]
impl Classifier for ClassifierGateway {
    async fn classify(
        &self,
        request: &ClassifyRequest,
        settings: &Settings,
    ) -> Result<bool, ClassifierError> {
        if let ClassifyRequest::CryptoTopic { text } = request {
            if text.trim().is_empty() {
                return Ok(false);
            }
        }

        let key = request.fingerprint();
        if let Some(result) = self.cache.get(&key, Instant::now()) {
            log::debug!("{} cache HIT ({key:.60})", request.capability());
            self.record_call(request, CallOutcome::CacheHit);
            return Ok(result);
        }
        log::debug!("{} cache MISS ({key:.60})", request.capability());

        // The free moderation path records its own outcomes.
        let free_path = matches!(
            request,
            ClassifyRequest::ImageModeration {
                use_free_tier: true,
                ..
            }
        ) && self.free_tier_active(settings);

        let result = self.classify_uncached(request, settings).await;
        match &result {
            Ok(_) if free_path => {}
            Ok(true) => self.record_call(request, CallOutcome::Flagged),
            Ok(false) => self.record_call(request, CallOutcome::Clear),
            Err(e) if e.is_setup_error() => {}
            Err(_) => self.record_call(request, CallOutcome::Error),
        }
        result
    }
}
