//! Placeholder swapping for filtered posts.

use crate::inspector::derive_post_id;
use crate::page::{Marker, Page, Placeholder, PostNode};
use std::collections::HashMap;
use std::sync::Mutex;

/// Original markup of hidden posts, by post id.
#[derive(Debug, Default)]
pub struct HiddenPostStore {
    content: Mutex<HashMap<String, String>>,
}

impl HiddenPostStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps the first content stored for an id.
    pub fn store(&self, post_id: &str, content: String) {
        let mut map = self.content.lock().unwrap_or_else(|p| p.into_inner());
        map.entry(post_id.to_string()).or_insert(content);
    }

    pub fn take(&self, post_id: &str) -> Option<String> {
        let mut map = self.content.lock().unwrap_or_else(|p| p.into_inner());
        map.remove(post_id)
    }

    pub fn contains(&self, post_id: &str) -> bool {
        let map = self.content.lock().unwrap_or_else(|p| p.into_inner());
        map.contains_key(post_id)
    }

    pub fn len(&self) -> usize {
        self.content.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct VisibilityController {
    hidden: HiddenPostStore,
}

impl VisibilityController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hidden(&self) -> &HiddenPostStore {
        &self.hidden
    }

    /// Swaps the post for a placeholder. A post already replaced is left alone.
    pub fn hide(&self, node: &dyn PostNode, author: Option<&str>, reason: &str) {
        if node.has_marker(Marker::Replaced) {
            return;
        }

        let post_id = node
            .post_id_tag()
            .unwrap_or_else(|| derive_post_id(&node.snapshot()));
        self.hidden.store(&post_id, node.content());

        node.set_post_id_tag(Some(&post_id));
        node.set_marker(Marker::Filtered);
        node.set_marker(Marker::Replaced);
        node.show_placeholder(&Placeholder::new(author, reason));
        log::info!("Hid post {post_id}: {reason}");
    }

    /// Puts the original content back and clears every marker so the post
    /// is evaluated afresh. Without stored content only the styling is undone.
    pub fn show(&self, node: &dyn PostNode) {
        let stored = node.post_id_tag().and_then(|id| self.hidden.take(&id));
        if stored.is_none() && node.has_marker(Marker::Replaced) {
            log::debug!("No stored content for hidden post, restoring styling only");
        }
        node.restore(stored.as_deref());

        for marker in [
            Marker::Filtered,
            Marker::Replaced,
            Marker::Processing,
            Marker::Observed,
        ] {
            node.clear_marker(marker);
        }
        node.set_post_id_tag(None);
    }

    /// Restores every filtered post on the page.
    pub fn show_all(&self, page: &dyn Page) -> usize {
        let mut restored = 0;
        for node in page.posts() {
            if node.has_marker(Marker::Filtered) || node.has_marker(Marker::Replaced) {
                self.show(node.as_ref());
                restored += 1;
            }
        }
        if restored > 0 {
            log::info!("Restored {restored} hidden posts");
        }
        restored
    }
}
