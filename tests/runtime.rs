mod common;

use async_trait::async_trait;
use common::*;
use std::sync::Arc;
use std::time::Duration;
use zen_filter::classifier::{Classifier, ClassifyRequest};
use zen_filter::error::ClassifierError;
use zen_filter::filter::images::UrlPassthrough;
use zen_filter::page::{Marker, PostNode};
use zen_filter::runtime::Command;
use zen_filter::scheduler::IntersectionEntry;
use zen_filter::visibility::VisibilityController;
use zen_filter::{FilterChain, FilterVerdict, Mode, Settings, ZenRuntime};

fn settings() -> Settings {
    Settings {
        enabled: true,
        enable_image_filter: false,
        blacklist: vec!["scam".to_string()],
        ..Default::default()
    }
}

fn runtime_for(
    page: Arc<FakePage>,
    settings: Settings,
) -> (ZenRuntime, zen_filter::scheduler::ReadyReceiver) {
    let chain = FilterChain::new(MockClassifier::always(false), Arc::new(UrlPassthrough));
    ZenRuntime::new(page, Arc::new(chain), settings, None)
}

/// Takes a second to answer and never considers anything on topic.
struct SlowClassifier;

#[async_trait]
impl Classifier for SlowClassifier {
    async fn classify(
        &self,
        _request: &ClassifyRequest,
        _settings: &Settings,
    ) -> Result<bool, ClassifierError> {
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok(false)
    }
}

#[tokio::test]
async fn test_filtered_post_is_hidden_in_default_mode() {
    let bad = FakePost::new(post("1", "bob", "obvious scam link"));
    let page = FakePage::new("/home", vec![bad.clone()]);
    let (runtime, _ready) = runtime_for(page, settings());
    let original = bad.current_content();

    let verdict = runtime.process_post(bad.as_ref()).await;

    assert_eq!(verdict, Some(FilterVerdict::filtered("Blacklisted keyword")));
    assert!(bad.is_hidden());
    let placeholder = bad.placeholder.lock().unwrap().clone().unwrap();
    assert_eq!(placeholder.caption(), "@bob · Blacklisted keyword");
    assert!(bad.has_marker(Marker::Filtered));
    assert!(bad.has_marker(Marker::Replaced));
    assert!(!bad.has_marker(Marker::Processing));
    assert_eq!(bad.post_id_tag().as_deref(), Some("1"));
    assert!(runtime.visibility().hidden().contains("1"));
    assert_ne!(bad.current_content(), original);
}

#[tokio::test]
async fn test_agent_mode_does_not_hide() {
    let bad = FakePost::new(post("1", "bob", "scam"));
    let page = FakePage::new("/home", vec![bad.clone()]);
    let (runtime, _ready) = runtime_for(
        page,
        Settings {
            mode: Mode::Agent,
            ..settings()
        },
    );

    let verdict = runtime.process_post(bad.as_ref()).await;
    assert!(verdict.unwrap().should_filter());
    assert!(!bad.is_hidden());
}

#[tokio::test]
async fn test_replies_are_parked_permanently() {
    let answer = FakePost::new(reply("2", "bob", "scam"));
    let page = FakePage::new("/home", vec![answer.clone()]);
    let (runtime, _ready) = runtime_for(page, settings());

    assert_eq!(runtime.process_post(answer.as_ref()).await, None);
    assert!(answer.has_marker(Marker::Processing));
    assert!(!answer.is_hidden());
}

#[tokio::test]
async fn test_disabled_runtime_does_nothing() {
    let bad = FakePost::new(post("1", "bob", "scam"));
    let page = FakePage::new("/home", vec![bad.clone()]);
    let (runtime, mut ready) = runtime_for(
        page,
        Settings {
            enabled: false,
            ..settings()
        },
    );

    assert_eq!(runtime.process_post(bad.as_ref()).await, None);
    assert_eq!(runtime.process_existing_posts(), 0);
    assert_eq!(
        runtime.on_intersections(vec![IntersectionEntry::visible(bad.clone())]),
        0
    );
    assert!(runtime.drain_ready(&mut ready).await.is_empty());
}

#[test]
fn test_hide_is_idempotent_and_show_restores() {
    let node = FakePost::new(post("3", "carol", "hi"));
    let original = node.current_content();
    let visibility = VisibilityController::new();

    visibility.hide(node.as_ref(), Some("carol"), "Blacklisted keyword");
    let hidden_content = node.current_content();
    visibility.hide(node.as_ref(), Some("carol"), "NSFW detected");
    assert_eq!(node.current_content(), hidden_content);
    assert_eq!(
        node.placeholder.lock().unwrap().as_ref().unwrap().reason,
        "Blacklisted keyword"
    );

    node.set_marker(Marker::Observed);
    visibility.show(node.as_ref());
    assert_eq!(node.current_content(), original);
    assert!(!node.is_hidden());
    assert!(node.markers().is_empty());
    assert_eq!(node.post_id_tag(), None);
    assert!(visibility.hidden().is_empty());
}

#[test]
fn test_show_without_stored_content_only_clears_state() {
    let node = FakePost::new(post("4", "dave", "hi"));
    VisibilityController::new().hide(node.as_ref(), None, "NSFW detected");
    let placeholder_content = node.current_content();

    // A fresh controller has lost the stored markup.
    VisibilityController::new().show(node.as_ref());
    assert_eq!(node.current_content(), placeholder_content);
    assert!(!node.is_hidden());
    assert!(!node.has_marker(Marker::Replaced));
    assert!(!node.has_marker(Marker::Filtered));
}

#[tokio::test]
async fn test_posts_are_evaluated_once_when_near_viewport() {
    let bad = FakePost::new(post("5", "erin", "scam"));
    let good = FakePost::new(post("6", "frank", "hello"));
    let page = FakePage::new("/home", vec![bad.clone(), good.clone()]);
    let (runtime, mut ready) = runtime_for(page, settings());

    assert_eq!(runtime.process_existing_posts(), 2);
    assert_eq!(runtime.scheduler().register_pending(), 2);

    // Far below the fold: nothing happens yet.
    let queued = runtime.on_intersections(vec![
        IntersectionEntry::new(bad.clone(), 800),
        IntersectionEntry::new(good.clone(), 800),
    ]);
    assert_eq!(queued, 0);
    assert!(runtime.drain_ready(&mut ready).await.is_empty());

    let queued = runtime.on_intersections(vec![
        IntersectionEntry::new(bad.clone(), 60),
        IntersectionEntry::visible(good.clone()),
    ]);
    assert_eq!(queued, 2);
    assert!(bad.has_marker(Marker::Observed));
    assert_eq!(runtime.scheduler().watched_count(), 0);

    let verdicts = runtime.drain_ready(&mut ready).await;
    assert_eq!(
        verdicts,
        vec![FilterVerdict::filtered("Blacklisted keyword"), FilterVerdict::Pass]
    );
    assert!(bad.is_hidden());

    // Observed posts are not registered or queued again.
    runtime.on_insertions(vec![bad.clone(), good.clone()]);
    assert_eq!(
        runtime.on_intersections(vec![IntersectionEntry::visible(good.clone())]),
        0
    );
    assert!(runtime.drain_ready(&mut ready).await.is_empty());
}

#[tokio::test]
async fn test_toggle_off_restores_hidden_posts() {
    let bad = FakePost::new(post("7", "gina", "scam"));
    let page = FakePage::new("/home", vec![bad.clone()]);
    let (runtime, _ready) = runtime_for(page, settings());

    runtime.process_post(bad.as_ref()).await;
    assert!(bad.is_hidden());

    let response = runtime.handle_command(Command::Toggle { enabled: false });
    assert!(response.success);
    assert!(!runtime.settings().enabled);
    assert!(!bad.is_hidden());
    assert!(!bad.has_marker(Marker::Filtered));

    runtime.handle_command(Command::Toggle { enabled: true });
    assert_eq!(runtime.scheduler().register_pending(), 1);
}

#[tokio::test]
async fn test_settings_update_clears_verdicts_and_applies_snapshot() {
    let post_a = FakePost::new(post("8", "hank", "scam"));
    let page = FakePage::new("/home", vec![post_a.clone()]);
    let (runtime, _ready) = runtime_for(page, settings());

    runtime.process_post(post_a.as_ref()).await;
    assert_eq!(runtime.chain().verdicts().len(), 1);

    let updated = Settings {
        blacklist: Vec::new(),
        click_delay: 0,
        ..settings()
    };
    runtime.handle_command(Command::SettingsUpdated {
        settings: Box::new(updated),
    });

    assert!(runtime.chain().verdicts().is_empty());
    assert!(runtime.settings().blacklist.is_empty());
    assert_eq!(runtime.settings().click_delay, 3000);
}

#[tokio::test]
async fn test_mode_change_starts_and_stops_agent() {
    let page = FakePage::new("/home", Vec::new());
    let (runtime, _ready) = runtime_for(page.clone(), settings());

    let response = runtime.handle_command(Command::ModeChange { mode: Mode::Agent });
    assert_eq!(response.agent_error, None);
    assert!(runtime.agent().is_active());
    assert!(page.indicator_visible());

    runtime.handle_command(Command::ModeChange { mode: Mode::Default });
    assert!(!runtime.agent().is_active());
    assert!(!page.indicator_visible());

    page.navigate("/notifications");
    let response = runtime.handle_command(Command::ModeChange { mode: Mode::Agent });
    assert!(response.agent_error.unwrap().contains("/notifications"));
    assert!(!runtime.agent().is_active());
}

#[tokio::test(start_paused = true)]
async fn test_verdict_is_not_applied_after_disable() {
    let off_topic = FakePost::new(post("9", "iris", "my cat"));
    let page = FakePage::new("/home", vec![off_topic.clone()]);
    let chain = FilterChain::new(Arc::new(SlowClassifier), Arc::new(UrlPassthrough));
    let settings = Settings {
        lock_in_mode: true,
        ..settings()
    };
    let (runtime, _ready) = ZenRuntime::new(page, Arc::new(chain), settings, None);
    let runtime = Arc::new(runtime);

    let evaluation = tokio::spawn({
        let runtime = runtime.clone();
        let node = off_topic.clone();
        async move { runtime.process_post(node.as_ref()).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    runtime.handle_command(Command::Toggle { enabled: false });

    let verdict = evaluation.await.unwrap();
    assert_eq!(verdict, Some(FilterVerdict::filtered("Non-crypto (Lock-in)")));
    assert!(!runtime.settings().enabled);
    assert!(!off_topic.is_hidden());
    assert!(!off_topic.has_marker(Marker::Replaced));
    assert!(runtime.visibility().hidden().is_empty());
}

#[tokio::test]
async fn test_removed_posts_are_no_longer_watched() {
    let kept = FakePost::new(post("10", "jane", "hello"));
    let gone = FakePost::new(post("11", "karl", "scam"));
    let page = FakePage::new("/home", vec![kept.clone(), gone.clone()]);
    let (runtime, mut ready) = runtime_for(page, settings());

    runtime.process_existing_posts();
    assert_eq!(runtime.scheduler().register_pending(), 2);

    assert_eq!(runtime.on_removals(&[gone.node_key(), 9_999]), 1);
    assert_eq!(runtime.scheduler().watched_count(), 1);

    // A removed node that still reports an intersection is not evaluated.
    assert_eq!(
        runtime.on_intersections(vec![
            IntersectionEntry::visible(gone.clone()),
            IntersectionEntry::visible(kept.clone()),
        ]),
        1
    );
    assert_eq!(runtime.drain_ready(&mut ready).await, vec![FilterVerdict::Pass]);
    assert!(!gone.has_marker(Marker::Observed));
}

#[tokio::test]
async fn test_removal_before_registration_drops_pending_node() {
    let gone = FakePost::new(post("12", "lena", "scam"));
    let page = FakePage::new("/home", vec![gone.clone()]);
    let (runtime, _ready) = runtime_for(page, settings());

    runtime.on_insertions(vec![gone.clone()]);
    assert_eq!(runtime.on_removals(&[gone.node_key()]), 1);
    assert_eq!(runtime.scheduler().watched_count(), 0);
}
