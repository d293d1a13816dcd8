//! Host page capabilities.
//!
//! The timeline markup is owned by a third-party site and changes without
//! notice, so the core never touches it directly. Adapters implement
//! [`Page`] and [`PostNode`] and hand over plain snapshots ([`RawPost`],
//! [`ElementInfo`]); every heuristic that interprets those snapshots lives in
//! the core and can be tested against fixtures.

use crate::error::ClickError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Attribute snapshot of a single element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementInfo {
    pub tag: String,
    pub role: Option<String>,
    pub aria_label: Option<String>,
    pub test_id: Option<String>,
    pub aria_haspopup: Option<String>,
    pub text: String,
    /// Remaining attributes (`class`, `title`, `data-*`).
    pub attributes: HashMap<String, String>,
}

impl ElementInfo {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .map(|c| c.split_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }

    pub fn class_contains(&self, fragment: &str) -> bool {
        self.attr("class")
            .map(|c| c.contains(fragment))
            .unwrap_or(false)
    }

    /// Buttons and elements that declare themselves as buttons.
    pub fn is_clickable(&self) -> bool {
        self.tag.eq_ignore_ascii_case("button") || self.role.as_deref() == Some("button")
    }

    pub fn trimmed_text(&self) -> &str {
        self.text.trim()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawImage {
    pub src: Option<String>,
    pub data_src: Option<String>,
    pub current_src: Option<String>,
    pub alt: Option<String>,
    /// Inside the site's photo container or a `/photo/` link.
    pub in_media_container: bool,
}

impl RawImage {
    /// Lazy-loaded images expose their URL under different attributes.
    pub fn resolved_src(&self) -> Option<&str> {
        [&self.src, &self.data_src, &self.current_src]
            .into_iter()
            .filter_map(|s| s.as_deref())
            .find(|s| !s.is_empty())
    }
}

/// Everything the inspector needs from one post, captured at once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawPost {
    /// Anchor `href`s in document order.
    pub links: Vec<String>,
    /// Author header blocks (display name, handle, "Replying to" line).
    pub header_texts: Vec<String>,
    /// The post's primary text container, if the site rendered one.
    pub body_text: Option<String>,
    /// Secondary text containers (language-tagged, auto-direction) in order.
    pub fallback_texts: Vec<String>,
    pub full_text: String,
    pub images: Vec<RawImage>,
    /// Elements that may carry a credibility score.
    pub badges: Vec<ElementInfo>,
}

/// State markers kept on a post node for the lifetime of the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    /// Registered with the viewport watcher and evaluated once.
    Observed,
    /// A pipeline run is in flight (permanent for replies).
    Processing,
    /// The agent loop has already handled this post.
    AgentProcessed,
    Filtered,
    /// Content swapped for a placeholder.
    Replaced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAlign {
    Center,
    Nearest,
}

/// Ways of delivering a click, tried in order when one is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickStrategy {
    Direct,
    MouseEvent,
    PointerSequence,
}

impl ClickStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClickStrategy::Direct => "direct",
            ClickStrategy::MouseEvent => "mouse-event",
            ClickStrategy::PointerSequence => "pointer-sequence",
        }
    }
}

/// Document-level queries for the items of an open menu, most specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuQuery {
    MenuItemRole,
    ItemInsideMenu,
    ItemInsideDropdown,
    MenuChild,
    OptionRole,
}

impl MenuQuery {
    pub const ALL: [MenuQuery; 5] = [
        MenuQuery::MenuItemRole,
        MenuQuery::ItemInsideMenu,
        MenuQuery::ItemInsideDropdown,
        MenuQuery::MenuChild,
        MenuQuery::OptionRole,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MenuQuery::MenuItemRole => "role=menuitem",
            MenuQuery::ItemInsideMenu => "menu > menuitem",
            MenuQuery::ItemInsideDropdown => "dropdown > menuitem",
            MenuQuery::MenuChild => "menu > div",
            MenuQuery::OptionRole => "role=option",
        }
    }
}

/// What replaces a hidden post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub message: String,
    pub author: Option<String>,
    pub reason: String,
}

impl Placeholder {
    pub fn new(author: Option<&str>, reason: &str) -> Self {
        Self {
            message: "Post hidden by Zen".to_string(),
            author: author.map(str::to_string),
            reason: reason.to_string(),
        }
    }

    /// `@handle · reason`, or `Post · reason` for unknown authors.
    pub fn caption(&self) -> String {
        match &self.author {
            Some(author) => format!("@{} · {}", author, self.reason),
            None => format!("Post · {}", self.reason),
        }
    }
}

/// One post node on the host page.
#[async_trait]
pub trait PostNode: Send + Sync {
    /// Identity of the node for this page session.
    fn node_key(&self) -> u64;

    fn snapshot(&self) -> RawPost;

    fn has_marker(&self, marker: Marker) -> bool;
    fn set_marker(&self, marker: Marker);
    fn clear_marker(&self, marker: Marker);

    fn post_id_tag(&self) -> Option<String>;
    fn set_post_id_tag(&self, id: Option<&str>);

    /// Serialized markup of the post's contents.
    fn content(&self) -> String;
    fn show_placeholder(&self, placeholder: &Placeholder);
    /// Drops placeholder styling and, when given, puts the original markup back.
    fn restore(&self, content: Option<&str>);

    fn scroll_into_view(&self, align: ScrollAlign);

    /// Buttons and button-like elements inside the post, in document order.
    fn controls(&self) -> Vec<ElementInfo>;
    fn scroll_control_into_view(&self, index: usize, align: ScrollAlign);
    fn click_control(&self, index: usize, strategy: ClickStrategy) -> Result<(), ClickError>;

    /// Resolves once the image at `index` of the snapshot loaded or failed.
    async fn image_settled(&self, index: usize);
}

/// The page hosting the timeline.
pub trait Page: Send + Sync {
    fn path(&self) -> String;

    /// Post nodes currently in the document, in document order.
    fn posts(&self) -> Vec<Arc<dyn PostNode>>;

    fn scroll_by(&self, dy: i32);

    fn menu_items(&self, query: MenuQuery) -> Vec<ElementInfo>;
    fn scroll_menu_item_into_view(&self, query: MenuQuery, index: usize, align: ScrollAlign);
    fn click_menu_item(
        &self,
        query: MenuQuery,
        index: usize,
        strategy: ClickStrategy,
    ) -> Result<(), ClickError>;

    /// Click on an inert area to dismiss an open menu.
    fn click_away(&self);

    fn set_agent_indicator(&self, visible: bool);
}
