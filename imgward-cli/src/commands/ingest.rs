//! Ingest command implementation.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use imgward_core::{Config, FingerprintExtractor, Label};
use serde::Serialize;
use tracing::{info, warn};

use crate::utils::{self, Output};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Ingested {
    file: String,
    id: String,
    content_hash: String,
    inserted: bool,
    seen_count: u64,
}

/// Execute the ingest command.
pub fn execute(
    config: &Config,
    files: Vec<PathBuf>,
    label: Label,
    provenance: Option<String>,
    out: Output,
) -> Result<()> {
    let store = utils::open_store(config)?;
    let extractor = FingerprintExtractor::new(config.extractor.clone());

    let mut ingested = Vec::with_capacity(files.len());
    let mut skipped = Vec::new();
    for file in &files {
        let bytes = utils::read_file(file)?;
        let set = match extractor.extract(&bytes) {
            Ok(set) => set,
            Err(e) if e.is_attachment_local() => {
                warn!(path = %file.display(), error = %e, "Skipping file");
                skipped.push(file.display().to_string());
                continue;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to fingerprint {}", file.display()))
            }
        };

        let name = utils::file_name(file).unwrap_or_else(|| file.display().to_string());
        let source = provenance.clone().unwrap_or_else(|| name.clone());
        if let Some((record, inserted)) = store.ingest(&set, label, source) {
            info!(path = %file.display(), id = %record.id, inserted, "Ingested file");
            ingested.push(Ingested {
                file: name,
                id: record.id.to_string(),
                content_hash: record.content_hash.to_hex(),
                inserted,
                seen_count: record.seen_count,
            });
        }
    }

    if ingested.is_empty() {
        bail!("No files could be fingerprinted ({} skipped)", skipped.len());
    }
    store.save().context("Failed to write store")?;

    if out.json {
        utils::print_json(&ingested)?;
    } else if !out.quiet {
        println!();
        println!(
            "{}",
            format!("Ingested {} file(s) as {:?}", ingested.len(), label)
                .green()
                .bold()
        );
        println!();
        for row in &ingested {
            let state = if row.inserted { "new".green() } else { "merged".yellow() };
            println!(
                "   {} {} {} (seen {}x)",
                format!("{}:", row.file).dimmed(),
                &row.content_hash[..16],
                state,
                row.seen_count
            );
        }
        for file in &skipped {
            println!("   {} {}", format!("{file}:").dimmed(), "not an image, skipped".yellow());
        }
    }
    Ok(())
}
