//! Store maintenance commands.

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use imgward_core::store::{snapshot::SNAPSHOT_VERSION, StoreSnapshot};
use imgward_core::{Config, StoreStats};
use serde::Serialize;

use crate::utils::{self, Output};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsReport {
    #[serde(flatten)]
    stats: StoreStats,
    near_duplicate_groups: usize,
}

#[derive(Serialize)]
struct Compacted {
    folded: usize,
    records: usize,
}

pub fn stats(config: &Config, out: Output) -> Result<()> {
    let store = utils::open_store(config)?;
    let report = StatsReport {
        stats: store.stats(),
        near_duplicate_groups: store.near_duplicate_groups().len(),
    };

    if out.json {
        return utils::print_json(&report);
    }
    if out.pretty() {
        let s = &report.stats;
        println!("   {} {}", "Store:".dimmed(), config.store.path.display());
        println!("   {} {}", "Records:".dimmed(), s.records);
        println!("   {} {}", "Phish:".dimmed(), s.phish.to_string().red());
        println!("   {} {}", "Benign:".dimmed(), s.benign.to_string().green());
        println!("   {} {}", "Unlabeled:".dimmed(), s.unlabeled);
        println!("   {} {}", "Observations:".dimmed(), s.total_seen);
        println!(
            "   {} {}",
            "Near-duplicate groups:".dimmed(),
            report.near_duplicate_groups
        );
    }
    Ok(())
}

/// Export every record, to a file when `path` is given, else to stdout as JSON.
pub fn export(config: &Config, path: Option<PathBuf>, out: Output) -> Result<()> {
    let store = utils::open_store(config)?;

    match path {
        Some(path) => {
            store
                .save_to(&path)
                .with_context(|| format!("Failed to write export: {}", path.display()))?;
            if out.pretty() {
                println!(
                    "{} {} record(s) to {}",
                    "Exported".green().bold(),
                    store.len(),
                    path.display()
                );
            }
            Ok(())
        }
        None => utils::print_json(&StoreSnapshot {
            version: SNAPSHOT_VERSION,
            records: store.records(),
        }),
    }
}

pub fn compact(config: &Config, out: Output) -> Result<()> {
    let store = utils::open_store(config)?;
    let folded = store.compact();
    if folded > 0 {
        store.save().context("Failed to write store")?;
    }

    if out.json {
        utils::print_json(&Compacted {
            folded,
            records: store.len(),
        })?;
    } else if out.pretty() {
        println!(
            "{} folded {} duplicate record(s), {} remain",
            "Compacted:".green().bold(),
            folded,
            store.len()
        );
    }
    Ok(())
}
