//! Whitelist command implementations.

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use imgward_core::{Config, FingerprintExtractor, WardenError, WhitelistSet};
use serde::Serialize;
use tracing::info;

use crate::utils::{self, Output};

#[derive(Serialize)]
struct Added {
    added: usize,
}

/// Whitelist each file. Undecodable files are whitelisted by content hash.
pub fn add(config: &Config, files: Vec<PathBuf>, out: Output) -> Result<()> {
    let gate = utils::open_gate(config)?;
    let extractor = FingerprintExtractor::new(config.extractor.clone());

    let mut added: usize = 0;
    for file in &files {
        let bytes = utils::read_file(file)?;
        added += match extractor.extract(&bytes) {
            Ok(set) => gate.whitelist_fingerprints(&set),
            Err(WardenError::Decode { content_hash, .. }) => {
                let mut entry = WhitelistSet::default();
                entry.content_hashes.insert(content_hash);
                gate.union_whitelist(&entry)
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to fingerprint {}", file.display()))
            }
        };
        info!(path = %file.display(), "Whitelisted file");
    }

    gate.save_whitelist().context("Failed to write whitelist")?;

    if out.json {
        utils::print_json(&Added { added })?;
    } else if !out.quiet {
        println!(
            "{} {} new whitelist entr{}",
            "Whitelisted:".green().bold(),
            added,
            if added == 1 { "y" } else { "ies" }
        );
    }
    Ok(())
}

pub fn list(config: &Config, out: Output) -> Result<()> {
    let whitelist = utils::open_gate(config)?.whitelist();

    if out.json {
        return utils::print_json(&whitelist);
    }
    if out.quiet {
        return Ok(());
    }
    if whitelist.is_empty() {
        println!("{}", "Whitelist is empty".dimmed());
        return Ok(());
    }
    for hash in &whitelist.content_hashes {
        println!("{} {}", "content   ".dimmed(), hash);
    }
    for hash in &whitelist.perceptual_hashes {
        println!("{} {}", "perceptual".dimmed(), hash);
    }
    Ok(())
}
