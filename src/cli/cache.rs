use super::ui;
use crate::core::cache::{CacheStats, MarketCache};
use crate::store::SnapshotStore;
use anyhow::{Result, bail};
use chrono::{DateTime, Duration, Utc};
use comfy_table::Cell;

/// How `cache prune` selects entries to drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneRule {
    OlderThanHours(i64),
    Oldest(usize),
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map_or("-".to_string(), |t| {
        t.with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M")
            .to_string()
    })
}

pub fn display_stats(stats: &CacheStats, max_age: Duration) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![ui::header_cell("Cache"), ui::header_cell("")]);
    table.add_row(vec![Cell::new("Entries"), Cell::new(stats.entries)]);
    table.add_row(vec![
        Cell::new("Oldest fetch"),
        Cell::new(format_time(stats.oldest)),
    ]);
    table.add_row(vec![
        Cell::new("Newest fetch"),
        Cell::new(format_time(stats.newest)),
    ]);
    table.add_row(vec![
        Cell::new("Fresh for"),
        Cell::new(format!("{} min", max_age.num_minutes())),
    ]);
    table.to_string()
}

/// Applies `rule` to `cache` and returns how many entries were removed.
pub fn prune(cache: &MarketCache, rule: PruneRule) -> Result<usize> {
    match rule {
        PruneRule::OlderThanHours(hours) if hours < 0 => {
            bail!("--older-than-hours must not be negative")
        }
        PruneRule::OlderThanHours(hours) => {
            let Some(cutoff) = Duration::try_hours(hours)
                .and_then(|age| Utc::now().checked_sub_signed(age))
            else {
                bail!("--older-than-hours {hours} is out of range")
            };
            Ok(cache.remove_older_than(cutoff))
        }
        PruneRule::Oldest(count) => Ok(cache.remove_oldest(count)),
    }
}

pub fn run_stats(store: &SnapshotStore, max_age: Duration) -> Result<()> {
    let cache = MarketCache::new();
    store.load_into(&cache)?;
    println!("{}", display_stats(&cache.stats(), max_age));
    Ok(())
}

pub fn run_prune(store: &SnapshotStore, rule: PruneRule) -> Result<()> {
    let cache = MarketCache::new();
    store.load_into(&cache)?;
    let removed = prune(&cache, rule)?;
    store.replace_all(&cache)?;
    println!(
        "Removed {} cached entries, {} left",
        ui::style_text(&removed.to_string(), ui::StyleType::TotalLabel),
        cache.len()
    );
    Ok(())
}
