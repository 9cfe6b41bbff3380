//! Cache command - inspect and repair the build cache

use crate::cache::{format_bytes, BuildCache, CacheEntryInfo, CacheKey, CacheState};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::{Config, ConfigManager};
use crate::error::SwsResult;
use crate::ui::{self, UiContext};
use chrono::Utc;
use console::style;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> SwsResult<()> {
    let cache = BuildCache::new(
        ConfigManager::cache_dir(config),
        config.cache.lease_timeout(),
    );

    match args.action {
        CacheAction::List { format } => list_entries(&cache, format).await,
        CacheAction::Show { key } => show_entry(&cache, &key.parse()?).await,
        CacheAction::Reclaim { key } => match key {
            Some(key) => reclaim_one(&cache, &key.parse()?).await,
            None => reclaim_all(&cache).await,
        },
    }
}

async fn list_entries(cache: &BuildCache, format: OutputFormat) -> SwsResult<()> {
    let entries = cache.list().await?;

    match format {
        OutputFormat::Table => print_entry_table(&entries),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Plain => {
            for entry in &entries {
                println!("{}", entry.key);
            }
        }
    }
    Ok(())
}

fn styled_state(state: CacheState) -> String {
    match state {
        CacheState::Ready => style("ready").green().to_string(),
        CacheState::Building => style("building").yellow().to_string(),
        CacheState::Absent => style("absent").dim().to_string(),
    }
}

fn print_entry_table(entries: &[CacheEntryInfo]) {
    if entries.is_empty() {
        println!("No cache entries found.");
        return;
    }

    println!(
        "{:<14} {:<10} {:<10} {:<18} {:<20}",
        "KEY", "STATE", "SIZE", "HOLDER", "MODIFIED"
    );
    println!("{}", "-".repeat(76));

    let mut total = 0u64;
    for entry in entries {
        total += entry.size_bytes.unwrap_or(0);
        let modified = entry
            .modified_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:<14} {:<10} {:<10} {:<18} {:<20}",
            &entry.key[..12.min(entry.key.len())],
            styled_state(entry.state),
            entry.size_bytes.map(format_bytes).unwrap_or_else(|| "-".to_string()),
            entry.holder.as_deref().unwrap_or("-"),
            modified
        );
    }

    println!();
    println!(
        "Total: {} entr{} ({})",
        entries.len(),
        if entries.len() == 1 { "y" } else { "ies" },
        format_bytes(total)
    );
}

async fn show_entry(cache: &BuildCache, key: &CacheKey) -> SwsResult<()> {
    let ctx = UiContext::detect();
    let info = cache.info(key).await?;

    println!("Entry: {}", info.key);
    ui::key_value(&ctx, "state", &styled_state(info.state));
    if let Some(size) = info.size_bytes {
        ui::key_value(&ctx, "size", &format_bytes(size));
    }
    if let Some(holder) = &info.holder {
        ui::key_value(&ctx, "holder", holder);
    }
    if let Some(age) = info.age_secs {
        let timeout = cache.lease_timeout().as_secs();
        let age_display = if age >= timeout {
            format!("{}s (stale, timeout {}s)", age, timeout)
        } else {
            format!("{}s", age)
        };
        ui::key_value(&ctx, "lease age", &age_display);
    }
    if let Some(modified) = info.modified_at {
        ui::key_value(&ctx, "modified", &modified.to_rfc3339());
    }
    Ok(())
}

async fn reclaim_one(cache: &BuildCache, key: &CacheKey) -> SwsResult<()> {
    let ctx = UiContext::detect();
    if cache.reclaim_if_stale(key, Utc::now()).await? {
        ui::step_ok_detail(&ctx, "Reclaimed stale lease", key.short());
    } else {
        ui::step_warn_hint(
            &ctx,
            &format!("No stale lease on {}", key.short()),
            "Only leases older than lease_timeout_secs are reclaimed",
        );
    }
    Ok(())
}

async fn reclaim_all(cache: &BuildCache) -> SwsResult<()> {
    let ctx = UiContext::detect();
    let reclaimed = cache.reclaim_all_stale(Utc::now()).await?;

    if reclaimed.is_empty() {
        ui::step_info(&ctx, "No stale leases");
        return Ok(());
    }
    for key in &reclaimed {
        ui::step_ok_detail(&ctx, "Reclaimed stale lease", key.short());
    }
    Ok(())
}
