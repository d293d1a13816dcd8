//! Post inspector: turns a raw post snapshot into normalized signals.

use crate::page::{ElementInfo, PostNode, RawImage, RawPost};
use crate::probe::{first_match, Probe};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const IMAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(2);

const REPLY_MARKERS: [&str; 2] = ["Replying to", "Membalas"];

const SYSTEM_PATHS: [&str; 6] = [
    "home",
    "explore",
    "notifications",
    "messages",
    "settings",
    "compose",
];

lazy_static! {
    static ref STATUS_ID: Regex = Regex::new(r"/status/(\d+)").unwrap();
    static ref FIRST_NUMBER: Regex = Regex::new(r"\d+").unwrap();
    static ref LEADING_NUMBER: Regex = Regex::new(r"^\s*(\d+)").unwrap();
    static ref CREDIBILITY_TEXT: [Regex; 3] = [
        Regex::new(r"(?i)credibility[:\s]+(\d+)").unwrap(),
        Regex::new(r"(?i)cred[:\s]+(\d+)").unwrap(),
        Regex::new(r"(?i)ethos[:\s]+(\d+)").unwrap(),
    ];
    static ref CREDIBILITY_PROBES: Vec<Probe<RawPost, u32>> = credibility_probes();
}

static FALLBACK_IDS: AtomicU64 = AtomicU64::new(1);

/// Normalized view of one post, captured once per inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostSignals {
    pub id: String,
    pub text: String,
    pub image_refs: Vec<String>,
    pub author_handle: Option<String>,
    pub is_reply: bool,
    pub credibility_score: Option<u32>,
}

/// Numeric id from the post's permalink.
pub fn status_id(raw: &RawPost) -> Option<String> {
    raw.links
        .iter()
        .find_map(|href| STATUS_ID.captures(href))
        .map(|caps| caps[1].to_string())
}

/// Permalink id, or a process-unique fallback for posts without one.
pub fn derive_post_id(raw: &RawPost) -> String {
    status_id(raw).unwrap_or_else(|| {
        let n = FALLBACK_IDS.fetch_add(1, Ordering::Relaxed);
        format!("fallback-{}-{n}", chrono::Utc::now().timestamp_millis())
    })
}

/// Cheap reply check. The "Replying to" line in the author header is the
/// reliable signal; post text that merely starts with it is the fallback.
/// Missed replies are treated as main posts.
pub fn is_reply(raw: &RawPost) -> bool {
    let header = raw.header_texts.join(" ");
    if REPLY_MARKERS.iter().any(|m| header.contains(m)) {
        log::debug!("Reply detected (header text)");
        return true;
    }

    let full = raw.full_text.trim_start();
    if REPLY_MARKERS.iter().any(|m| full.starts_with(m)) {
        log::debug!("Reply detected (leading text)");
        return true;
    }

    false
}

pub fn extract_text(raw: &RawPost) -> String {
    raw.body_text
        .iter()
        .chain(raw.fallback_texts.iter())
        .next()
        .cloned()
        .unwrap_or_else(|| raw.full_text.clone())
}

fn is_content_image(src: &str) -> bool {
    let is_media = src.contains("media") || src.contains("twimg.com");
    let avatar = src.contains("profile_images") || src.contains("profile_banners");
    let emoji = src.contains("emoji");
    let icon = src.contains("icon") || src.contains("svg");
    let thumbnail = src.contains("name=small") || src.contains("name=tiny");
    is_media && !avatar && !emoji && !icon && !thumbnail
}

/// Discovery passes, most specific first: media URLs, images labelled as
/// such, images inside the photo container, then anything else.
fn discovery_pass(image: &RawImage, src: &str) -> usize {
    if src.contains("media") {
        0
    } else if image.alt.as_deref().is_some_and(|alt| alt.contains("Image")) {
        1
    } else if image.in_media_container {
        2
    } else {
        3
    }
}

/// Content image URLs, de-duplicated, in discovery order.
pub fn extract_images(raw: &RawPost) -> Vec<String> {
    let mut candidates: Vec<(usize, &str)> = raw
        .images
        .iter()
        .filter_map(|image| {
            let src = image.resolved_src()?;
            Some((discovery_pass(image, src), src))
        })
        .collect();
    // Stable: document order within a pass.
    candidates.sort_by_key(|(pass, _)| *pass);

    let mut seen = HashSet::new();
    let mut images = Vec::new();
    for (_, src) in candidates {
        if is_content_image(src) && seen.insert(src) {
            log::debug!("Found image: {:.80}", src);
            images.push(src.to_string());
        }
    }

    images
}

const SITE_HOSTS: [&str; 2] = ["x.com", "twitter.com"];

fn is_site_host(host: &str) -> bool {
    SITE_HOSTS
        .iter()
        .any(|site| host == *site || host.ends_with(&format!(".{site}")))
}

/// Relative links, or absolute ones on the site itself. Links leaving the
/// site never name the author.
fn handle_from_href(href: &str) -> Option<String> {
    let path = if href.starts_with("http://") || href.starts_with("https://") {
        let url = url::Url::parse(href).ok()?;
        if !is_site_host(&url.host_str()?.to_lowercase()) {
            return None;
        }
        url.path().to_string()
    } else {
        href.to_string()
    };

    if !path.starts_with('/') || path.contains("/i/") || path.contains("/compose/") {
        return None;
    }

    let handle = path.trim_start_matches('/').split('/').next()?.to_lowercase();
    if handle.is_empty() || SYSTEM_PATHS.contains(&handle.as_str()) {
        return None;
    }
    Some(handle)
}

/// Author handle, lower-cased. Permalinks are tried before other links
/// because they always start with the author's handle.
pub fn extract_username(raw: &RawPost) -> Option<String> {
    let permalinks = raw.links.iter().filter(|href| href.contains("/status/"));
    let username = permalinks
        .chain(raw.links.iter())
        .find_map(|href| handle_from_href(href));

    if username.is_none() {
        log::debug!("Could not extract username from post");
    }
    username
}

fn positive(digits: &str) -> Option<u32> {
    digits.parse::<u32>().ok().filter(|n| *n > 0)
}

fn number_in_text(text: &str) -> Option<u32> {
    FIRST_NUMBER
        .find(text.trim())
        .and_then(|m| positive(m.as_str()))
}

fn number_in_attributes(badge: &ElementInfo) -> Option<u32> {
    ["data-credibility", "data-ethos-credibility", "data-score", "data-value"]
        .iter()
        .find_map(|name| badge.attr(name))
        .and_then(|value| LEADING_NUMBER.captures(value))
        .and_then(|caps| positive(&caps[1]))
}

fn badge_score(badge: &ElementInfo) -> Option<u32> {
    number_in_attributes(badge)
        .or_else(|| number_in_text(&badge.text))
        .or_else(|| badge.attr("title").and_then(number_in_text))
}

fn badge_probe(
    name: &'static str,
    matches: impl Fn(&ElementInfo) -> bool + Send + Sync + 'static,
) -> Probe<RawPost, u32> {
    Probe::new(name, move |raw: &RawPost| {
        raw.badges
            .iter()
            .filter(|badge| matches(*badge))
            .find_map(badge_score)
    })
}

fn credibility_probes() -> Vec<Probe<RawPost, u32>> {
    vec![
        Probe::new("badge-point-text", |raw: &RawPost| {
            raw.badges
                .iter()
                .filter(|b| b.has_class("credibility-badge-point"))
                .find_map(|b| number_in_text(&b.text))
        }),
        badge_probe("badge-point", |b| b.has_class("credibility-badge-point")),
        badge_probe("badge", |b| b.has_class("credibility-badge")),
        badge_probe("data-credibility", |b| b.attr("data-credibility").is_some()),
        badge_probe("data-ethos-credibility", |b| {
            b.attr("data-ethos-credibility").is_some()
        }),
        badge_probe("class-credibility", |b| b.class_contains("credibility")),
        badge_probe("class-ethos", |b| b.class_contains("ethos")),
        Probe::new("post-text", |raw: &RawPost| {
            CREDIBILITY_TEXT.iter().find_map(|pattern| {
                pattern
                    .captures(&raw.full_text)
                    .and_then(|caps| positive(&caps[1]))
            })
        }),
    ]
}

/// First positive score any probe can parse. Zero or non-numeric values
/// count as "no score".
pub fn credibility_score(raw: &RawPost) -> Option<u32> {
    let hit = first_match(CREDIBILITY_PROBES.as_slice(), raw)?;
    log::debug!("Credibility score {} via {}", hit.value, hit.probe);
    Some(hit.value)
}

/// Builds signals from an already captured snapshot.
pub fn signals_from_raw(raw: &RawPost) -> PostSignals {
    PostSignals {
        id: derive_post_id(raw),
        text: extract_text(raw),
        image_refs: extract_images(raw),
        author_handle: extract_username(raw),
        is_reply: is_reply(raw),
        credibility_score: credibility_score(raw),
    }
}

/// Waits until every image in the post settled, for at most `IMAGE_LOAD_TIMEOUT`.
pub async fn wait_for_images(node: &dyn PostNode, image_count: usize) {
    if image_count == 0 {
        return;
    }

    // Images load in parallel in the page; awaiting them in turn finishes
    // when the slowest one does.
    let all_settled = async {
        for index in 0..image_count {
            node.image_settled(index).await;
        }
    };

    if tokio::time::timeout(IMAGE_LOAD_TIMEOUT, all_settled)
        .await
        .is_err()
    {
        log::debug!("Image load timeout, proceeding anyway");
    }
}

/// Full inspection of a live node: text is read first, images only after
/// they had a chance to load.
pub async fn inspect(node: &dyn PostNode) -> PostSignals {
    let before = node.snapshot();
    wait_for_images(node, before.images.len()).await;
    let after = node.snapshot();

    PostSignals {
        id: derive_post_id(&before),
        text: extract_text(&before),
        image_refs: extract_images(&after),
        author_handle: extract_username(&after),
        is_reply: is_reply(&before),
        credibility_score: credibility_score(&after),
    }
}
