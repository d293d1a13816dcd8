#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use zen_filter::classifier::transport::{HttpResponse, HttpTransport};
use zen_filter::classifier::{Classifier, ClassifyRequest};
use zen_filter::error::{ClassifierError, ClickError};
use zen_filter::page::{
    ClickStrategy, ElementInfo, Marker, MenuQuery, Page, Placeholder, PostNode, RawImage, RawPost,
    ScrollAlign,
};
use zen_filter::Settings;

pub fn post(id: &str, author: &str, text: &str) -> RawPost {
    RawPost {
        links: vec![format!("/{author}"), format!("/{author}/status/{id}")],
        header_texts: vec![format!("{author} @{author}")],
        body_text: Some(text.to_string()),
        full_text: format!("{author} @{author} {text}"),
        ..Default::default()
    }
}

pub fn reply(id: &str, author: &str, text: &str) -> RawPost {
    let mut raw = post(id, author, text);
    raw.header_texts.push("Replying to @someone".to_string());
    raw
}

pub fn with_images(mut raw: RawPost, urls: &[&str]) -> RawPost {
    raw.images = urls
        .iter()
        .map(|url| RawImage {
            src: Some(url.to_string()),
            in_media_container: true,
            ..Default::default()
        })
        .collect();
    raw
}

pub fn more_button() -> ElementInfo {
    ElementInfo {
        tag: "button".to_string(),
        aria_label: Some("More".to_string()),
        ..Default::default()
    }
}

pub fn menu_item(text: &str) -> ElementInfo {
    ElementInfo {
        tag: "div".to_string(),
        role: Some("menuitem".to_string()),
        text: text.to_string(),
        ..Default::default()
    }
}

static NEXT_KEY: AtomicUsize = AtomicUsize::new(1);

/// In-memory post node.
pub struct FakePost {
    key: u64,
    raw: Mutex<RawPost>,
    markers: Mutex<HashSet<Marker>>,
    id_tag: Mutex<Option<String>>,
    content: Mutex<String>,
    pub placeholder: Mutex<Option<Placeholder>>,
    controls: Vec<ElementInfo>,
    pub control_clicks: Mutex<Vec<(usize, ClickStrategy)>>,
    pub control_scrolls: Mutex<Vec<(usize, ScrollAlign)>>,
    pub scrolls: AtomicUsize,
}

impl FakePost {
    pub fn new(raw: RawPost) -> Arc<Self> {
        Self::with_controls(raw, vec![more_button()])
    }

    pub fn with_controls(raw: RawPost, controls: Vec<ElementInfo>) -> Arc<Self> {
        let content = format!("<article>{}</article>", raw.full_text);
        Arc::new(Self {
            key: NEXT_KEY.fetch_add(1, Ordering::Relaxed) as u64,
            raw: Mutex::new(raw),
            markers: Mutex::new(HashSet::new()),
            id_tag: Mutex::new(None),
            content: Mutex::new(content),
            placeholder: Mutex::new(None),
            controls,
            control_clicks: Mutex::new(Vec::new()),
            control_scrolls: Mutex::new(Vec::new()),
            scrolls: AtomicUsize::new(0),
        })
    }

    pub fn markers(&self) -> HashSet<Marker> {
        self.markers.lock().unwrap().clone()
    }

    pub fn current_content(&self) -> String {
        self.content.lock().unwrap().clone()
    }

    pub fn is_hidden(&self) -> bool {
        self.placeholder.lock().unwrap().is_some()
    }
}

#[async_trait]
impl PostNode for FakePost {
    fn node_key(&self) -> u64 {
        self.key
    }

    fn snapshot(&self) -> RawPost {
        self.raw.lock().unwrap().clone()
    }

    fn has_marker(&self, marker: Marker) -> bool {
        self.markers.lock().unwrap().contains(&marker)
    }

    fn set_marker(&self, marker: Marker) {
        self.markers.lock().unwrap().insert(marker);
    }

    fn clear_marker(&self, marker: Marker) {
        self.markers.lock().unwrap().remove(&marker);
    }

    fn post_id_tag(&self) -> Option<String> {
        self.id_tag.lock().unwrap().clone()
    }

    fn set_post_id_tag(&self, id: Option<&str>) {
        *self.id_tag.lock().unwrap() = id.map(str::to_string);
    }

    fn content(&self) -> String {
        self.current_content()
    }

    fn show_placeholder(&self, placeholder: &Placeholder) {
        *self.content.lock().unwrap() = format!("<div>{}</div>", placeholder.caption());
        *self.placeholder.lock().unwrap() = Some(placeholder.clone());
    }

    fn restore(&self, content: Option<&str>) {
        *self.placeholder.lock().unwrap() = None;
        if let Some(content) = content {
            *self.content.lock().unwrap() = content.to_string();
        }
    }

    fn scroll_into_view(&self, _align: ScrollAlign) {
        self.scrolls.fetch_add(1, Ordering::Relaxed);
    }

    fn controls(&self) -> Vec<ElementInfo> {
        self.controls.clone()
    }

    fn scroll_control_into_view(&self, index: usize, align: ScrollAlign) {
        self.control_scrolls.lock().unwrap().push((index, align));
    }

    fn click_control(&self, index: usize, strategy: ClickStrategy) -> Result<(), ClickError> {
        self.control_clicks.lock().unwrap().push((index, strategy));
        Ok(())
    }

    async fn image_settled(&self, _index: usize) {}
}

/// In-memory page with a scripted menu.
pub struct FakePage {
    path: Mutex<String>,
    posts: Mutex<Vec<Arc<FakePost>>>,
    pub menu: Mutex<Vec<ElementInfo>>,
    /// Strategies the menu item rejects.
    pub rejected: Mutex<Vec<ClickStrategy>>,
    pub menu_clicks: Mutex<Vec<(usize, ClickStrategy)>>,
    pub menu_scrolls: Mutex<Vec<(usize, ScrollAlign)>>,
    pub scrolled: Mutex<Vec<i32>>,
    pub click_aways: AtomicUsize,
    pub indicator: AtomicBool,
}

impl FakePage {
    pub fn new(path: &str, posts: Vec<Arc<FakePost>>) -> Arc<Self> {
        Arc::new(Self {
            path: Mutex::new(path.to_string()),
            posts: Mutex::new(posts),
            menu: Mutex::new(vec![
                menu_item("Not interested in this post"),
                menu_item("Follow"),
            ]),
            rejected: Mutex::new(Vec::new()),
            menu_clicks: Mutex::new(Vec::new()),
            menu_scrolls: Mutex::new(Vec::new()),
            scrolled: Mutex::new(Vec::new()),
            click_aways: AtomicUsize::new(0),
            indicator: AtomicBool::new(false),
        })
    }

    pub fn navigate(&self, path: &str) {
        *self.path.lock().unwrap() = path.to_string();
    }

    pub fn push_post(&self, post: Arc<FakePost>) {
        self.posts.lock().unwrap().push(post);
    }

    pub fn set_menu(&self, items: Vec<ElementInfo>) {
        *self.menu.lock().unwrap() = items;
    }

    pub fn menu_click_count(&self) -> usize {
        self.menu_clicks.lock().unwrap().len()
    }

    pub fn indicator_visible(&self) -> bool {
        self.indicator.load(Ordering::SeqCst)
    }
}

impl Page for FakePage {
    fn path(&self) -> String {
        self.path.lock().unwrap().clone()
    }

    fn posts(&self) -> Vec<Arc<dyn PostNode>> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.clone() as Arc<dyn PostNode>)
            .collect()
    }

    fn scroll_by(&self, dy: i32) {
        self.scrolled.lock().unwrap().push(dy);
    }

    fn menu_items(&self, query: MenuQuery) -> Vec<ElementInfo> {
        if query == MenuQuery::MenuItemRole {
            self.menu.lock().unwrap().clone()
        } else {
            Vec::new()
        }
    }

    fn scroll_menu_item_into_view(&self, _query: MenuQuery, index: usize, align: ScrollAlign) {
        self.menu_scrolls.lock().unwrap().push((index, align));
    }

    fn click_menu_item(
        &self,
        _query: MenuQuery,
        index: usize,
        strategy: ClickStrategy,
    ) -> Result<(), ClickError> {
        if self.rejected.lock().unwrap().contains(&strategy) {
            return Err(ClickError {
                strategy: strategy.as_str().to_string(),
                reason: "rejected".to_string(),
            });
        }
        self.menu_clicks.lock().unwrap().push((index, strategy));
        Ok(())
    }

    fn click_away(&self) {
        self.click_aways.fetch_add(1, Ordering::SeqCst);
    }

    fn set_agent_indicator(&self, visible: bool) {
        self.indicator.store(visible, Ordering::SeqCst);
    }
}

/// Transport that plays back canned responses and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, ClassifierError>>>,
    /// Returned once the script runs out.
    fallback: Mutex<Option<HttpResponse>>,
    pub requests: Mutex<Vec<(String, serde_json::Value)>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, status: u16, body: &str) {
        self.responses.lock().unwrap().push_back(Ok(HttpResponse {
            status,
            retry_after: None,
            body: body.to_string(),
        }));
    }

    pub fn push_rate_limited(&self, retry_after: Option<&str>) {
        self.responses.lock().unwrap().push_back(Ok(HttpResponse {
            status: 429,
            retry_after: retry_after.map(str::to_string),
            body: "rate limited".to_string(),
        }));
    }

    pub fn push_error(&self, error: ClassifierError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn always(&self, status: u16, body: &str) {
        *self.fallback.lock().unwrap() = Some(HttpResponse {
            status,
            retry_after: None,
            body: body.to_string(),
        });
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn post_json(
        &self,
        url: &str,
        _headers: &[(String, String)],
        body: &serde_json::Value,
    ) -> Result<HttpResponse, ClassifierError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), body.clone()));
        if let Some(response) = self.responses.lock().unwrap().pop_front() {
            return response;
        }
        match self.fallback.lock().unwrap().clone() {
            Some(response) => Ok(response),
            None => Err(ClassifierError::Transport("script exhausted".to_string())),
        }
    }
}

pub fn moderation_json(flagged: bool, sexual_score: f64) -> String {
    serde_json::json!({
        "results": [{
            "flagged": flagged,
            "categories": { "sexual": flagged },
            "category_scores": { "sexual": sexual_score, "harassment": 0.0 }
        }]
    })
    .to_string()
}

pub fn chat_json(reply: &str) -> String {
    serde_json::json!({
        "choices": [{ "message": { "role": "assistant", "content": reply } }]
    })
    .to_string()
}

/// Classifier answering from a closure and counting calls per capability.
pub struct MockClassifier {
    answer: Box<dyn Fn(&ClassifyRequest) -> Result<bool, ClassifierError> + Send + Sync>,
    pub calls: Mutex<Vec<ClassifyRequest>>,
    pub free_tier: bool,
}

impl MockClassifier {
    pub fn new(
        answer: impl Fn(&ClassifyRequest) -> Result<bool, ClassifierError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            answer: Box::new(answer),
            calls: Mutex::new(Vec::new()),
            free_tier: true,
        })
    }

    pub fn always(result: bool) -> Arc<Self> {
        Self::new(move |_| Ok(result))
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, capability: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.capability() == capability)
            .count()
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn classify(
        &self,
        request: &ClassifyRequest,
        _settings: &Settings,
    ) -> Result<bool, ClassifierError> {
        self.calls.lock().unwrap().push(request.clone());
        (self.answer)(request)
    }

    fn free_tier_active(&self, settings: &Settings) -> bool {
        self.free_tier && settings.use_free_image_moderation
    }
}

pub fn image_url(request: &ClassifyRequest) -> Option<String> {
    match request {
        ClassifyRequest::ImageModeration {
            image: Some(image), ..
        } => Some(image.to_url()),
        _ => None,
    }
}
