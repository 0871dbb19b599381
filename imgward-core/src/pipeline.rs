//! The decision pipeline: Gate → Extractor → Matcher → Policy.
//!
//! [`Pipeline::evaluate`] turns one inbound event into an [`EventDecision`]
//! without side effects beyond the enforcement log. Applying the decided
//! action is the caller's business, usually through an [`Enforcer`] wrapping
//! a [`ModerationSink`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, PipelineConfig};
use crate::error::{Result, WardenError};
use crate::fingerprint::{ContentHash, FingerprintExtractor, FingerprintSet};
use crate::gate::{ExemptionGate, ScopeRef};
use crate::matcher::{self, MatchVerdict, Tier};
use crate::policy::{Action, EnforcementPolicy};
use crate::reconcile::{EnforcementLog, ObservedFingerprint};
use crate::store::FingerprintStore;

/// One attachment of an inbound event.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: Option<String>,
    pub bytes: Arc<[u8]>,
}

impl Attachment {
    pub fn new(name: Option<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name,
            bytes: bytes.into(),
        }
    }
}

/// An inbound message carrying images.
#[derive(Debug, Clone)]
pub struct ImageEvent {
    pub scope: ScopeRef,
    /// Opaque reference to the author or message the action targets
    pub subject: String,
    pub attachments: Vec<Attachment>,
}

/// What happened to a single attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    /// File extension outside the allowed list
    Filtered,
    Whitelisted,
    Evaluated,
    /// Not a usable image; only the exact content hash was checked
    Undecodable,
    /// Extraction deadline hit; only the exact content hash was checked
    TimedOut,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentDecision {
    pub name: Option<String>,
    pub content_hash: Option<ContentHash>,
    pub outcome: Outcome,
    pub verdict: MatchVerdict,
    pub action: Action,
    /// Extracted fingerprints, kept for callers that want secondary evidence
    #[serde(skip)]
    pub fingerprints: Option<FingerprintSet>,
}

impl AttachmentDecision {
    fn filtered(name: Option<String>) -> Self {
        Self {
            name,
            content_hash: None,
            outcome: Outcome::Filtered,
            verdict: MatchVerdict::none(),
            action: Action::None,
            fingerprints: None,
        }
    }
}

/// Aggregate decision for an event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDecision {
    pub scope: ScopeRef,
    pub subject: String,
    pub exempt: bool,
    /// Strongest attachment verdict
    pub verdict: MatchVerdict,
    /// Most severe attachment action
    pub action: Action,
    pub attachments: Vec<AttachmentDecision>,
}

impl EventDecision {
    fn exempt(event: &ImageEvent) -> Self {
        Self {
            scope: event.scope.clone(),
            subject: event.subject.clone(),
            exempt: true,
            verdict: MatchVerdict::none(),
            action: Action::None,
            attachments: Vec::new(),
        }
    }

    fn aggregate(event: &ImageEvent, attachments: Vec<AttachmentDecision>) -> Self {
        let verdict = attachments
            .iter()
            .map(|a| &a.verdict)
            .max_by(|a, b| {
                a.tier.cmp(&b.tier).then_with(|| {
                    // Closer is stronger; a missing distance ranks last.
                    let da = a.best_distance.unwrap_or(u32::MAX);
                    let db = b.best_distance.unwrap_or(u32::MAX);
                    db.cmp(&da)
                })
            })
            .cloned()
            .unwrap_or_default();
        let action = attachments
            .iter()
            .map(|a| a.action)
            .max()
            .unwrap_or_default();

        Self {
            scope: event.scope.clone(),
            subject: event.subject.clone(),
            exempt: false,
            verdict,
            action,
            attachments,
        }
    }

    pub fn is_actionable(&self) -> bool {
        !self.action.is_none()
    }
}

/// Wires the gate, extractor, store and policy into one ordered flow.
#[derive(Debug, Clone)]
pub struct Pipeline {
    extractor: Arc<FingerprintExtractor>,
    store: Arc<FingerprintStore>,
    gate: Arc<ExemptionGate>,
    policy: EnforcementPolicy,
    config: PipelineConfig,
    log: Arc<EnforcementLog>,
}

impl Pipeline {
    pub fn new(config: &Config, store: Arc<FingerprintStore>, gate: Arc<ExemptionGate>) -> Self {
        Self {
            extractor: Arc::new(FingerprintExtractor::new(config.extractor.clone())),
            store,
            gate,
            policy: config.policy,
            config: config.pipeline.clone(),
            log: Arc::new(EnforcementLog::new(config.pipeline.enforcement_log_capacity)),
        }
    }

    pub fn store(&self) -> &Arc<FingerprintStore> {
        &self.store
    }

    pub fn gate(&self) -> &Arc<ExemptionGate> {
        &self.gate
    }

    pub fn log(&self) -> &Arc<EnforcementLog> {
        &self.log
    }

    pub fn extractor(&self) -> &Arc<FingerprintExtractor> {
        &self.extractor
    }

    pub fn policy(&self) -> &EnforcementPolicy {
        &self.policy
    }

    /// Evaluate every attachment of `event`.
    ///
    /// Per-attachment failures (decode errors, timeouts) never abort the
    /// event; they only mean that attachment gets no perceptual verdict.
    #[instrument(skip_all, fields(scope = %event.scope, attachments = event.attachments.len()))]
    pub async fn evaluate(&self, event: &ImageEvent) -> EventDecision {
        if self.gate.is_exempt(&event.scope) {
            debug!("Scope exempt, skipping event");
            return EventDecision::exempt(event);
        }

        let mut decisions = Vec::with_capacity(event.attachments.len());
        for attachment in &event.attachments {
            decisions.push(self.evaluate_attachment(attachment).await);
        }

        let decision = EventDecision::aggregate(event, decisions);
        if decision.is_actionable() {
            info!(
                subject = %decision.subject,
                tier = %decision.verdict.tier,
                action = %decision.action,
                "Event matched known-bad content"
            );
        }
        decision
    }

    async fn evaluate_attachment(&self, attachment: &Attachment) -> AttachmentDecision {
        if !self.is_allowed(attachment.name.as_deref()) {
            debug!(name = ?attachment.name, "Attachment extension not scanned");
            return AttachmentDecision::filtered(attachment.name.clone());
        }

        let content_hash = self.extractor.content_hash(&attachment.bytes);
        let (outcome, fingerprints) = match self.extract(attachment).await {
            Ok(set) => (Outcome::Evaluated, Some(set)),
            Err(WardenError::ExtractTimeout(ms)) => {
                warn!(content_hash = %content_hash.short(), timeout_ms = ms, "Extraction timed out");
                (Outcome::TimedOut, None)
            }
            Err(e) => {
                warn!(content_hash = %content_hash.short(), error = %e, "Attachment not decodable");
                (Outcome::Undecodable, None)
            }
        };

        let (outcome, verdict) = match &fingerprints {
            Some(set) if self.gate.is_whitelisted(set, &content_hash) => {
                (Outcome::Whitelisted, MatchVerdict::none())
            }
            Some(set) => (
                outcome,
                matcher::decide(set, &self.store, &content_hash, &self.policy),
            ),
            None if self.gate.is_content_whitelisted(&content_hash) => {
                (Outcome::Whitelisted, MatchVerdict::none())
            }
            None => (outcome, matcher::decide_exact(&self.store, &content_hash)),
        };

        let action = self.policy.action_for(verdict.tier);
        if !action.is_none() {
            self.log.record(match &fingerprints {
                Some(set) => ObservedFingerprint::from(set),
                None => ObservedFingerprint {
                    content_hash,
                    perceptual_hashes: Vec::new(),
                },
            });
        }

        AttachmentDecision {
            name: attachment.name.clone(),
            content_hash: Some(content_hash),
            outcome,
            verdict,
            action,
            fingerprints,
        }
    }

    /// Extraction off the async workers, bounded by the configured deadline.
    async fn extract(&self, attachment: &Attachment) -> Result<FingerprintSet> {
        let extractor = self.extractor.clone();
        let bytes = attachment.bytes.clone();
        let deadline = Duration::from_millis(self.config.extract_timeout_ms);

        let task = tokio::task::spawn_blocking(move || extractor.extract(&bytes));
        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(WardenError::Decode {
                content_hash: self.extractor.content_hash(&attachment.bytes),
                reason: format!("extraction task failed: {join}"),
            }),
            Err(_) => Err(WardenError::ExtractTimeout(self.config.extract_timeout_ms)),
        }
    }

    fn is_allowed(&self, name: Option<&str>) -> bool {
        let allowed = &self.config.allowed_extensions;
        if allowed.is_empty() {
            return true;
        }
        match name.and_then(|n| Path::new(n).extension()).and_then(|e| e.to_str()) {
            Some(ext) => allowed.iter().any(|a| a.eq_ignore_ascii_case(ext)),
            None => true,
        }
    }
}

/// A concrete moderation action for the platform collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enforcement {
    pub action: Action,
    pub subject: String,
    pub reason: String,
    /// Only set for [`Action::Timeout`]
    pub timeout: Option<Duration>,
}

/// Platform side of moderation (delete, timeout, kick, ban).
#[async_trait]
pub trait ModerationSink: Send + Sync {
    async fn apply_action(&self, enforcement: &Enforcement) -> Result<()>;
}

/// Sink that only records the action in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl ModerationSink for LogSink {
    async fn apply_action(&self, enforcement: &Enforcement) -> Result<()> {
        info!(
            action = %enforcement.action,
            subject = %enforcement.subject,
            reason = %enforcement.reason,
            "Moderation action"
        );
        Ok(())
    }
}

/// Result of [`Enforcer::enforce`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcementReport {
    pub enforcement: Enforcement,
    /// `false` in dry-run mode
    pub applied: bool,
}

/// Applies decided actions through a [`ModerationSink`].
pub struct Enforcer {
    sink: Arc<dyn ModerationSink>,
    dry_run: bool,
    timeout: Duration,
}

impl std::fmt::Debug for Enforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enforcer")
            .field("dry_run", &self.dry_run)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Enforcer {
    pub fn new(sink: Arc<dyn ModerationSink>, config: &PipelineConfig) -> Self {
        Self {
            sink,
            dry_run: config.dry_run,
            timeout: Duration::from_secs(config.timeout_minutes.saturating_mul(60)),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Apply the decision's action. `None` when there is nothing to do; the
    /// sink is never called for `Action::None`.
    pub async fn enforce(&self, decision: &EventDecision) -> Result<Option<EnforcementReport>> {
        if decision.action.is_none() {
            return Ok(None);
        }

        let enforcement = Enforcement {
            action: decision.action,
            subject: decision.subject.clone(),
            reason: reason(&decision.verdict),
            timeout: (decision.action == Action::Timeout).then_some(self.timeout),
        };

        if self.dry_run {
            info!(
                action = %enforcement.action,
                subject = %enforcement.subject,
                "Dry run, action not applied"
            );
            return Ok(Some(EnforcementReport {
                enforcement,
                applied: false,
            }));
        }

        self.sink
            .apply_action(&enforcement)
            .await
            .map_err(|e| match e {
                WardenError::Sink(_) => e,
                other => WardenError::Sink(other.to_string()),
            })?;
        Ok(Some(EnforcementReport {
            enforcement,
            applied: true,
        }))
    }
}

fn reason(verdict: &MatchVerdict) -> String {
    match (verdict.tier, verdict.exact_content_match, verdict.best_distance) {
        (Tier::Strong, true, _) => "exact match with known content".to_string(),
        (tier, _, Some(d)) => format!("{tier} match with known-bad image (distance {d})"),
        (tier, _, None) => format!("{tier} match with known-bad image"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprint;
    use crate::store::{KnownRecord, Label};
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        applied: Mutex<Vec<Enforcement>>,
    }

    #[async_trait]
    impl ModerationSink for RecordingSink {
        async fn apply_action(&self, enforcement: &Enforcement) -> Result<()> {
            self.applied.lock().unwrap().push(enforcement.clone());
            Ok(())
        }
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(
            &Config::default(),
            Arc::new(FingerprintStore::default()),
            Arc::new(ExemptionGate::default()),
        )
    }

    fn event(attachments: Vec<Attachment>) -> ImageEvent {
        ImageEvent {
            scope: ScopeRef::channel("general"),
            subject: "user:1".into(),
            attachments,
        }
    }

    fn decision_with(action: Action, tier: Tier) -> EventDecision {
        EventDecision {
            scope: ScopeRef::channel("general"),
            subject: "user:1".into(),
            exempt: false,
            verdict: MatchVerdict {
                tier,
                best_distance: Some(2),
                ..MatchVerdict::default()
            },
            action,
            attachments: Vec::new(),
        }
    }

    #[test]
    fn test_extension_filter() {
        let p = pipeline();
        assert!(p.is_allowed(Some("scam.PNG")));
        assert!(p.is_allowed(Some("noext")));
        assert!(p.is_allowed(None));
        assert!(!p.is_allowed(Some("notes.txt")));
    }

    #[tokio::test]
    async fn test_exempt_scope_skips_everything() {
        let mut config = Config::default();
        config.gate.exempt_channels.push("general".into());
        let p = Pipeline::new(
            &config,
            Arc::new(FingerprintStore::default()),
            Arc::new(ExemptionGate::new(&config.gate)),
        );

        let decision = p
            .evaluate(&event(vec![Attachment::new(None, b"x".to_vec())]))
            .await;
        assert!(decision.exempt);
        assert!(decision.attachments.is_empty());
        assert_eq!(decision.action, Action::None);
    }

    #[tokio::test]
    async fn test_undecodable_uses_exact_content() {
        let p = pipeline();
        let blob = b"not an image at all".to_vec();
        let set = FingerprintSet::new(ContentHash::of(&blob)).with_perceptual(Fingerprint::from_u64(1));
        p.store()
            .upsert(KnownRecord::from_fingerprints(&set, Label::Phish, "t", Utc::now()).unwrap());

        let decision = p
            .evaluate(&event(vec![
                Attachment::new(Some("a.png".into()), blob),
                Attachment::new(Some("b.png".into()), b"garbage".to_vec()),
                Attachment::new(Some("c.txt".into()), b"text".to_vec()),
            ]))
            .await;

        let outcomes: Vec<Outcome> = decision.attachments.iter().map(|a| a.outcome).collect();
        assert_eq!(
            outcomes,
            vec![Outcome::Undecodable, Outcome::Undecodable, Outcome::Filtered]
        );
        assert_eq!(decision.attachments[0].verdict.tier, Tier::Strong);
        assert_eq!(decision.attachments[1].verdict.tier, Tier::None);
        assert_eq!(decision.verdict.tier, Tier::Strong);
        assert_eq!(decision.action, Action::Ban);
        assert_eq!(p.log().len(), 1);
    }

    #[tokio::test]
    async fn test_whitelisted_content_wins() {
        let p = pipeline();
        let blob = b"whitelisted blob".to_vec();
        let set = FingerprintSet::new(ContentHash::of(&blob)).with_perceptual(Fingerprint::from_u64(1));
        p.store()
            .upsert(KnownRecord::from_fingerprints(&set, Label::Phish, "t", Utc::now()).unwrap());
        p.gate().whitelist_fingerprints(&set);

        let decision = p.evaluate(&event(vec![Attachment::new(None, blob)])).await;
        assert_eq!(decision.attachments[0].outcome, Outcome::Whitelisted);
        assert_eq!(decision.action, Action::None);
        assert!(p.log().is_empty());
    }

    #[tokio::test]
    async fn test_enforcer_dry_run_never_calls_sink() {
        let sink = Arc::new(RecordingSink::default());
        let enforcer = Enforcer::new(sink.clone(), &PipelineConfig::default());
        assert!(enforcer.is_dry_run());

        let report = enforcer
            .enforce(&decision_with(Action::Ban, Tier::Strong))
            .await
            .unwrap()
            .unwrap();
        assert!(!report.applied);
        assert!(sink.applied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enforcer_applies_timeout_with_duration() {
        let sink = Arc::new(RecordingSink::default());
        let config = PipelineConfig {
            dry_run: false,
            timeout_minutes: 20,
            ..PipelineConfig::default()
        };
        let enforcer = Enforcer::new(sink.clone(), &config);

        let report = enforcer
            .enforce(&decision_with(Action::Timeout, Tier::Moderate))
            .await
            .unwrap()
            .unwrap();
        assert!(report.applied);
        assert_eq!(
            report.enforcement.timeout,
            Some(Duration::from_secs(20 * 60))
        );
        assert_eq!(sink.applied.lock().unwrap().len(), 1);

        assert!(enforcer
            .enforce(&decision_with(Action::None, Tier::None))
            .await
            .unwrap()
            .is_none());
        assert_eq!(sink.applied.lock().unwrap().len(), 1);
    }
}
