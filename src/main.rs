use clap::{Arg, Command};
use log::LevelFilter;
use serde::Deserialize;
use std::process;
use std::sync::Arc;
use zen_filter::classifier::transport::ReqwestTransport;
use zen_filter::classifier::ClassifierGateway;
use zen_filter::filter::images::InliningFetcher;
use zen_filter::filter::FilterChain;
use zen_filter::inspector::signals_from_raw;
use zen_filter::page::RawPost;
use zen_filter::statistics::StatisticsCollector;
use zen_filter::{ProviderId, Settings};

#[tokio::main]
async fn main() {
    let matches = Command::new("zen-filter")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Timeline content filter: keyword, account, topic, image and credibility rules")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Settings file path")
                .default_value("zen-filter.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Write default settings to FILE")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Load the settings file and print what it enables")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("test-post")
                .long("test-post")
                .value_name("FILE")
                .help("Run the filter chain on a JSON post snapshot (or a list of them)")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-provider")
                .long("test-provider")
                .value_name("PROVIDER")
                .help("Check connectivity to openai, claude, kimi or custom")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("api-key")
                .long("api-key")
                .value_name("KEY")
                .help("Key for --test-provider (defaults to the configured one)")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("zen-filter.yaml");
    let settings = match load_settings(config_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error loading settings: {e:#}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        print_settings(&settings);
        return;
    }

    if let Some(provider) = matches.get_one::<String>("test-provider") {
        let api_key = matches.get_one::<String>("api-key").map(String::as_str);
        test_provider(&settings, provider, api_key).await;
        return;
    }

    if let Some(post_file) = matches.get_one::<String>("test-post") {
        if let Err(e) = test_post_file(&settings, post_file).await {
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
        return;
    }

    println!("Nothing to do. See --help.");
}

fn load_settings(path: &str) -> anyhow::Result<Settings> {
    if std::path::Path::new(path).exists() {
        Settings::from_file(path)
    } else {
        log::warn!("Settings file '{path}' not found, using defaults");
        Ok(Settings::default())
    }
}

fn generate_default_config(path: &str) {
    match Settings::default().to_file(path) {
        Ok(()) => {
            println!("Default settings written to: {path}");
            println!("Add API keys under apiKeys before enabling image or lock-in filtering.");
        }
        Err(e) => {
            eprintln!("Error writing settings file: {e}");
            process::exit(1);
        }
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

fn print_settings(settings: &Settings) {
    println!("🔍 Settings");
    println!("  enabled:            {}", on_off(settings.enabled));
    println!("  mode:               {:?}", settings.mode);
    println!("  lock-in mode:       {}", on_off(settings.lock_in_mode));
    println!(
        "  image filter:       {} (free moderation {}, provider {})",
        on_off(settings.enable_image_filter),
        on_off(settings.use_free_image_moderation),
        settings.image_provider.as_str()
    );
    println!("  crypto provider:    {}", settings.crypto_provider.as_str());
    println!(
        "  keyword filter:     {} ({} blocked, {} allowed)",
        on_off(settings.enable_keyword_filter),
        settings.blacklist.len(),
        settings.allowlist.len()
    );
    println!(
        "  accounts:           {} blocked, {} allowed",
        settings.account_blacklist.len(),
        settings.account_allowlist.len()
    );
    println!(
        "  credibility filter: {} (threshold {})",
        on_off(settings.enable_credibility_filter),
        settings.credibility_threshold
    );
    println!(
        "  agent timings:      scroll {}ms, click {}ms, pause {}ms",
        settings.scroll_delay, settings.click_delay, settings.pause_duration
    );

    for (label, provider, needed) in [
        ("image", settings.image_provider, settings.enable_image_filter),
        ("crypto", settings.crypto_provider, settings.lock_in_mode),
    ] {
        if needed && settings.api_key_for(provider).is_none() {
            println!(
                "⚠️  {label} classification needs an API key for {}",
                provider.as_str()
            );
        }
    }
    println!("✅ Settings loaded");
}

async fn test_provider(settings: &Settings, provider: &str, api_key: Option<&str>) {
    let provider: ProviderId = match provider.parse() {
        Ok(provider) => provider,
        Err(e) => {
            eprintln!("❌ {e}");
            process::exit(1);
        }
    };
    let api_key = api_key
        .or_else(|| settings.api_key_for(provider))
        .unwrap_or_default();

    let gateway = ClassifierGateway::new(Arc::new(ReqwestTransport::default()));
    match gateway.test_provider(provider, api_key, settings).await {
        Ok(()) => println!("✅ Connected to {}", provider.as_str()),
        Err(e) => {
            eprintln!("❌ {}: {e}", provider.as_str());
            process::exit(1);
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PostFixture {
    Many(Vec<RawPost>),
    One(Box<RawPost>),
}

async fn test_post_file(settings: &Settings, post_file: &str) -> anyhow::Result<()> {
    use anyhow::Context;

    let content = std::fs::read_to_string(post_file)
        .with_context(|| format!("reading post snapshot {post_file}"))?;
    let posts = match serde_json::from_str::<PostFixture>(&content)
        .with_context(|| format!("parsing post snapshot {post_file}"))?
    {
        PostFixture::Many(posts) => posts,
        PostFixture::One(post) => vec![*post],
    };

    let stats = Arc::new(StatisticsCollector::new());
    let gateway = ClassifierGateway::new(Arc::new(ReqwestTransport::default()))
        .with_statistics(stats.clone());
    let chain = FilterChain::new(Arc::new(gateway), Arc::new(InliningFetcher::default()))
        .with_statistics(stats.clone());

    println!("🧪 Testing {} post(s) from {post_file}", posts.len());
    println!();

    for raw in &posts {
        let signals = signals_from_raw(raw);
        println!("Post {}", signals.id);
        println!(
            "  author: {}",
            signals.author_handle.as_deref().unwrap_or("(unknown)")
        );
        println!("  text:   {}", truncate_string(&signals.text, 80));
        println!("  images: {}", signals.image_refs.len());
        if let Some(score) = signals.credibility_score {
            println!("  credibility: {score}");
        }
        if signals.is_reply {
            println!("  reply: yes (never filtered)");
        }

        let verdict = chain.decide(&signals, settings).await;
        match verdict.reason() {
            Some(reason) => println!("  ❌ FILTER: {reason}"),
            None => println!("  ✅ PASS"),
        }
        println!();
    }

    stats.flush().await;
    let (global, steps) = stats.get_stats();
    println!("📊 Statistics");
    println!(
        "  posts: {} ({} filtered, {} passed)",
        global.total_posts, global.total_filtered, global.total_passed
    );
    println!(
        "  classifier: {} calls, {} cache hits, {} errors, {} fail-open, {} rate-limited",
        global.classifier_calls,
        global.classifier_cache_hits,
        global.classifier_errors,
        global.fail_opens,
        global.rate_limited_skips
    );
    for step in &steps {
        println!(
            "  {:<18} {} decisions ({} filtered)",
            step.step, step.decisions, step.filtered
        );
    }
    if let Some(error) = stats.last_setup_error() {
        println!("⚠️  Setup error: {error}");
    }
    Ok(())
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
