//! Reconcile command implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use colored::Colorize;
use imgward_core::{
    Config, CorpusSource, Fingerprint, FingerprintExtractor, FingerprintStore,
    ObservedFingerprint, ReconcileReport, Reconciler, WardenError,
};
use tracing::{debug, info, warn};

use crate::utils::{self, Output};

/// Corpora read from image directories on disk.
struct DirectoryCorpus {
    observed: PathBuf,
    reference: Option<PathBuf>,
    extractor: FingerprintExtractor,
    store: Arc<FingerprintStore>,
}

impl DirectoryCorpus {
    fn files(dir: &Path) -> imgward_core::Result<Vec<PathBuf>> {
        utils::list_files(dir).map_err(|e| WardenError::CollaboratorUnavailable(format!("{e:#}")))
    }

    fn read(path: &Path) -> imgward_core::Result<Vec<u8>> {
        std::fs::read(path).map_err(|e| {
            WardenError::CollaboratorUnavailable(format!("cannot read {}: {e}", path.display()))
        })
    }
}

#[async_trait]
impl CorpusSource for DirectoryCorpus {
    async fn observed(&self, limit: usize) -> imgward_core::Result<Vec<ObservedFingerprint>> {
        let mut observed = Vec::new();
        for path in Self::files(&self.observed)?.into_iter().take(limit) {
            let bytes = Self::read(&path)?;
            observed.push(match self.extractor.extract(&bytes) {
                Ok(set) => ObservedFingerprint::from(&set),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Observed file has no fingerprint");
                    ObservedFingerprint {
                        content_hash: self.extractor.content_hash(&bytes),
                        perceptual_hashes: Vec::new(),
                    }
                }
            });
        }
        Ok(observed)
    }

    async fn reference(&self) -> imgward_core::Result<Vec<Fingerprint>> {
        let Some(dir) = &self.reference else {
            return Ok(self.store.phish_fingerprints());
        };

        let mut reference = Vec::new();
        for path in Self::files(dir)? {
            let bytes = Self::read(&path)?;
            match self.extractor.extract(&bytes) {
                Ok(set) => reference.extend(set.perceptual_hashes().iter().cloned()),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping reference file"),
            }
        }
        Ok(reference)
    }
}

/// Execute the reconcile command.
pub async fn execute(
    config: &Config,
    observed: PathBuf,
    reference: Option<PathBuf>,
    watch: bool,
    out: Output,
) -> Result<()> {
    let store = utils::open_store(config)?;
    let gate = utils::open_gate(config)?;

    let corpus = DirectoryCorpus {
        observed,
        reference,
        extractor: FingerprintExtractor::new(config.extractor.clone()),
        store,
    };
    let job = Reconciler::from_config(Arc::new(corpus), gate, config).with_persistence(true);

    let report = job.run().await.context("Reconciliation aborted")?;
    print_report(&report, out)?;

    if watch {
        let handle = Arc::new(job).spawn_periodic();
        if out.pretty() {
            println!();
            println!(
                "{} every {}s, Ctrl-C to stop",
                "Watching:".dimmed(),
                config.reconcile.interval_secs
            );
        }
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        handle.abort();
        info!("Reconciliation watch stopped");
    }
    Ok(())
}

fn print_report(report: &ReconcileReport, out: Output) -> Result<()> {
    if out.json {
        utils::print_json(report)?;
    } else if !out.quiet {
        println!();
        println!("{}", "Reconciliation complete".green().bold());
        println!();
        println!("   {} {}", "Observed:".dimmed(), report.observed);
        println!("   {} {}", "True positives:".dimmed(), report.true_positives);
        println!(
            "   {} {}",
            "False positives:".dimmed(),
            report.false_positives.to_string().yellow()
        );
        if report.unclassified > 0 {
            println!("   {} {}", "Unclassified:".dimmed(), report.unclassified);
        }
        println!(
            "   {} {}",
            "Newly whitelisted:".dimmed(),
            report.newly_whitelisted
        );
    }
    Ok(())
}
