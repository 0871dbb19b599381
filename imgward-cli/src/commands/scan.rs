//! Scan command implementation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::{ColoredString, Colorize};
use imgward_core::{
    Attachment, Config, EnforcementReport, Enforcer, EventDecision, FingerprintStore, ImageEvent,
    LogSink, Outcome, Pipeline, ScopeRef, Tier,
};
use serde::Serialize;
use tracing::info;

use crate::exit_codes::MatchFound;
use crate::utils::{self, Output};

/// Secondary evidence: a stored record sharing most tile cells with an
/// attachment. Never changes the tier.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PartialMatch {
    attachment: Option<String>,
    record: String,
    cells: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScanReport<'a> {
    decision: &'a EventDecision,
    enforcement: Option<&'a EnforcementReport>,
    partial_matches: &'a [PartialMatch],
}

/// Execute the scan command.
pub async fn execute(
    config: &Config,
    files: Vec<PathBuf>,
    scope: ScopeRef,
    out: Output,
) -> Result<()> {
    let mut attachments = Vec::with_capacity(files.len());
    for file in &files {
        let bytes = utils::read_file(file)?;
        info!(path = %file.display(), bytes = bytes.len(), "Read file");
        attachments.push(Attachment::new(utils::file_name(file), bytes));
    }

    let store = utils::open_store(config)?;
    let gate = utils::open_gate(config)?;
    let pipeline = Pipeline::new(config, store.clone(), gate);

    let decision = pipeline
        .evaluate(&ImageEvent {
            scope,
            subject: "cli".into(),
            attachments,
        })
        .await;

    let enforcer = Enforcer::new(Arc::new(LogSink), &config.pipeline);
    let enforcement = enforcer
        .enforce(&decision)
        .await
        .context("Failed to apply moderation action")?;
    let partial = partial_matches(config, &store, &decision);

    if out.json {
        utils::print_json(&ScanReport {
            decision: &decision,
            enforcement: enforcement.as_ref(),
            partial_matches: &partial,
        })?;
    } else if !out.quiet {
        print_decision(&decision, &partial, enforcer.is_dry_run());
    }

    if decision.is_actionable() {
        return Err(MatchFound {
            tier: decision.verdict.tier,
            action: decision.action,
        }
        .into());
    }
    Ok(())
}

fn partial_matches(
    config: &Config,
    store: &FingerprintStore,
    decision: &EventDecision,
) -> Vec<PartialMatch> {
    let grid = config.extractor.tile_grid as usize;
    let min_cells = grid * grid / 2 + 1;
    let max_cell_distance = config.policy.strong_distance;

    decision
        .attachments
        .iter()
        .filter_map(|a| Some((a, a.fingerprints.as_ref()?)))
        .flat_map(|(attachment, set)| {
            store
                .find_tile_matches(set, max_cell_distance, min_cells)
                .into_iter()
                .map(|(cells, record)| PartialMatch {
                    attachment: attachment.name.clone(),
                    record: record.id.to_string(),
                    cells,
                })
        })
        .collect()
}

fn banner(text: &str, paint: fn(&str) -> ColoredString) {
    println!();
    println!("{}", paint("╔════════════════════════════════════════╗"));
    println!("{}", paint(&format!("║{text:^40}║")).bold());
    println!("{}", paint("╚════════════════════════════════════════╝"));
    println!();
}

fn print_decision(decision: &EventDecision, partial: &[PartialMatch], dry_run: bool) {
    if decision.exempt {
        banner("EXEMPT", |s| s.cyan());
        println!("   {} {}", "Scope:".dimmed(), decision.scope);
        return;
    }

    match decision.verdict.tier {
        Tier::Strong => banner("STRONG MATCH", |s| s.red()),
        Tier::Moderate => banner("MODERATE MATCH", |s| s.yellow()),
        Tier::None => banner("NO MATCH", |s| s.green()),
    }

    for attachment in &decision.attachments {
        let name = attachment.name.as_deref().unwrap_or("<unnamed>");
        let detail = match attachment.outcome {
            Outcome::Filtered => "skipped (extension)".dimmed().to_string(),
            Outcome::Whitelisted => "whitelisted".green().to_string(),
            Outcome::TimedOut => "extraction timed out".yellow().to_string(),
            Outcome::Undecodable if !attachment.verdict.is_actionable() => {
                "not an image".yellow().to_string()
            }
            _ => {
                let v = &attachment.verdict;
                match (v.exact_content_match, v.best_distance) {
                    (true, _) => format!("{} (exact content)", v.tier),
                    (false, Some(d)) => format!("{} (distance {d}, {} phish hits)", v.tier, v.labeled_hit_count),
                    (false, None) => v.tier.to_string(),
                }
            }
        };
        println!("   {} {}", format!("{name}:").dimmed(), detail);
    }

    if !partial.is_empty() {
        println!();
        for p in partial {
            println!(
                "   {} {} shares {} tiles with record {}",
                "Partial:".dimmed(),
                p.attachment.as_deref().unwrap_or("<unnamed>"),
                p.cells,
                p.record
            );
        }
    }

    println!();
    if decision.is_actionable() {
        let action = decision.action.to_string().red().bold();
        if dry_run {
            println!("   {} {} {}", "Action:".dimmed(), action, "(dry run, not applied)".dimmed());
        } else {
            println!("   {} {}", "Action:".dimmed(), action);
        }
    } else {
        println!("   {} {}", "Action:".dimmed(), "none".green());
    }
}
