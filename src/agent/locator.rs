//! Dismiss-action locator: opens a post's "more" menu and picks the
//! "not interested" entry.
//!
//! Every outcome is a plain success flag. Failures are logged and the menu
//! is closed again, so the caller's tick always completes.

use crate::page::{ClickStrategy, ElementInfo, MenuQuery, Page, PostNode, ScrollAlign};
use crate::probe::{first_match, position, Probe, ProbeMatch};
use lazy_static::lazy_static;
use std::time::Duration;
use tokio::time::sleep;

const TARGET_LABEL: &str = "Not interested in this post";
const TARGET_PREFIX: &str = "Not interested";

const POST_SCROLL_SETTLE: Duration = Duration::from_millis(300);
const CONTROL_SCROLL_SETTLE: Duration = Duration::from_millis(200);
const MENU_OPEN_WAIT: Duration = Duration::from_millis(1500);
const MENU_RENDER_WAIT: Duration = Duration::from_millis(300);
const AFTER_ITEM_CLICK: Duration = Duration::from_millis(500);
const MENU_CLOSE_WAIT: Duration = Duration::from_millis(300);

const GUESS_PROBE: &str = "first-item-guess";

lazy_static! {
    static ref MENU_BUTTON_PROBES: Vec<Probe<[ElementInfo], usize>> = menu_button_probes();
    static ref MENU_ITEM_PROBES: Vec<Probe<[ElementInfo], usize>> = menu_item_probes();
    static ref MENU_GUESS: Vec<Probe<[ElementInfo], usize>> = vec![Probe::new(
        GUESS_PROBE,
        |items: &[ElementInfo]| {
            let first = items.first()?.text.to_lowercase();
            let resembles = first.contains("not interested")
                || (first.contains("not") && first.contains("interested"));
            resembles.then_some(0)
        }
    )];
}

fn aria_lower(el: &ElementInfo) -> String {
    el.aria_label.as_deref().unwrap_or_default().to_lowercase()
}

fn is_tag(el: &ElementInfo, tag: &str) -> bool {
    el.tag.eq_ignore_ascii_case(tag)
}

fn menu_button_probes() -> Vec<Probe<[ElementInfo], usize>> {
    vec![
        Probe::new("aria-label-more", |controls: &[ElementInfo]| {
            position(controls, |el| {
                is_tag(el, "button") && el.aria_label.as_deref() == Some("More")
            })
        }),
        Probe::new("aria-label-contains-more", |controls: &[ElementInfo]| {
            position(controls, |el| is_tag(el, "button") && aria_lower(el).contains("more"))
        }),
        Probe::new("test-id-caret", |controls: &[ElementInfo]| {
            position(controls, |el| el.test_id.as_deref() == Some("caret"))
        }),
        Probe::new("haspopup-menu", |controls: &[ElementInfo]| {
            position(controls, |el| {
                (is_tag(el, "div") || is_tag(el, "button"))
                    && el.aria_haspopup.as_deref() == Some("menu")
            })
        }),
        Probe::new("clickable-scan", |controls: &[ElementInfo]| {
            position(controls, |el| {
                el.is_clickable()
                    && (aria_lower(el).contains("more") || el.test_id.as_deref() == Some("caret"))
            })
        }),
    ]
}

fn menu_item_probes() -> Vec<Probe<[ElementInfo], usize>> {
    vec![
        Probe::new("exact-label", |items: &[ElementInfo]| {
            position(items, |el| el.trimmed_text() == TARGET_LABEL)
        }),
        Probe::new("label-prefix", |items: &[ElementInfo]| {
            position(items, |el| el.trimmed_text().starts_with(TARGET_PREFIX))
        }),
        Probe::new("label-contains", |items: &[ElementInfo]| {
            position(items, |el| {
                el.trimmed_text()
                    .to_lowercase()
                    .contains("not interested in this")
            })
        }),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    /// The item was guessed from loose wording and may be the wrong action.
    Low,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MenuItemMatch {
    pub index: usize,
    pub probe: &'static str,
    pub confidence: Confidence,
}

pub fn find_menu_button(controls: &[ElementInfo]) -> Option<ProbeMatch<usize>> {
    first_match(MENU_BUTTON_PROBES.as_slice(), controls)
}

/// Locates the "not interested" entry. The first-item guess is only tried
/// when `allow_guess` is set and every label probe came up empty.
pub fn find_menu_item(items: &[ElementInfo], allow_guess: bool) -> Option<MenuItemMatch> {
    if let Some(hit) = first_match(MENU_ITEM_PROBES.as_slice(), items) {
        return Some(MenuItemMatch {
            index: hit.value,
            probe: hit.probe,
            confidence: Confidence::High,
        });
    }
    if !allow_guess {
        return None;
    }
    first_match(MENU_GUESS.as_slice(), items).map(|hit| MenuItemMatch {
        index: hit.value,
        probe: hit.probe,
        confidence: Confidence::Low,
    })
}

/// Items of the open menu from the first query that finds any.
fn open_menu_items(page: &dyn Page) -> Option<(MenuQuery, Vec<ElementInfo>)> {
    MenuQuery::ALL.iter().find_map(|query| {
        let items = page.menu_items(*query);
        if items.is_empty() {
            None
        } else {
            log::debug!("Found {} menu items via {}", items.len(), query.name());
            Some((*query, items))
        }
    })
}

async fn close_menu(page: &dyn Page) {
    page.click_away();
    sleep(MENU_CLOSE_WAIT).await;
}

/// Opens the post's menu and clicks "not interested".
pub async fn dismiss(page: &dyn Page, node: &dyn PostNode, allow_guess: bool) -> bool {
    let Some(button) = find_menu_button(&node.controls()) else {
        log::warn!("Menu button not found; post left in place");
        return false;
    };
    log::debug!("Menu button found via {}", button.probe);

    node.scroll_into_view(ScrollAlign::Center);
    sleep(POST_SCROLL_SETTLE).await;
    node.scroll_control_into_view(button.value, ScrollAlign::Nearest);
    sleep(CONTROL_SCROLL_SETTLE).await;

    if let Err(e) = node.click_control(button.value, ClickStrategy::Direct) {
        log::debug!("{e}; retrying with a synthetic mouse event");
        if let Err(e) = node.click_control(button.value, ClickStrategy::MouseEvent) {
            log::warn!("Could not open post menu: {e}");
            return false;
        }
    }

    sleep(MENU_OPEN_WAIT).await;
    sleep(MENU_RENDER_WAIT).await;

    let Some((query, items)) = open_menu_items(page) else {
        log::warn!("No menu items found; menu did not open");
        page.click_away();
        return false;
    };

    let Some(item) = find_menu_item(&items, allow_guess) else {
        log::warn!("\"{TARGET_PREFIX}\" option not found in {} menu items", items.len());
        close_menu(page).await;
        return false;
    };
    if item.confidence == Confidence::Low {
        log::warn!(
            "Clicking guessed menu item {:?}; it may not be the intended action",
            items[item.index].trimmed_text()
        );
    } else {
        log::debug!("Menu item found via {}", item.probe);
    }

    page.scroll_menu_item_into_view(query, item.index, ScrollAlign::Nearest);
    sleep(CONTROL_SCROLL_SETTLE).await;

    let clicked = [
        ClickStrategy::Direct,
        ClickStrategy::MouseEvent,
        ClickStrategy::PointerSequence,
    ]
    .into_iter()
    .any(|strategy| match page.click_menu_item(query, item.index, strategy) {
        Ok(()) => true,
        Err(e) => {
            log::debug!("{e}");
            false
        }
    });

    sleep(AFTER_ITEM_CLICK).await;

    if clicked {
        log::info!("Dismissed post via \"not interested\"");
    } else {
        log::warn!("All click strategies failed on the menu item");
        page.click_away();
    }
    clicked
}
