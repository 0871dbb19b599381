//! Imgward Core - perceptual fingerprint matching for known-bad images
//!
//! This crate decides whether an inbound image is a repeat of known phishing
//! or scam imagery, and what moderation action that earns, while leaving
//! legitimate repeated imagery (memes, approved assets) alone.
//!
//! # Features
//!
//! - Frame-sampled, augmented perceptual and gradient hashing (GIF/WebP aware)
//! - Deduplicating labeled fingerprint store with crash-consistent snapshots
//! - Tiered matching (`none` / `moderate` / `strong`) with labeled corroboration
//! - Channel/thread exemptions and a content whitelist checked before matching
//! - False-positive reconciliation that grows the whitelist from enforcement history
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use imgward_core::{
//!     Attachment, Config, ExemptionGate, FingerprintStore, ImageEvent, Pipeline, ScopeRef,
//! };
//!
//! # async fn example(bytes: Vec<u8>) -> imgward_core::Result<()> {
//! let config = Config::load(None)?;
//! let store = Arc::new(FingerprintStore::open(&config.store.path, Arc::new(imgward_core::SystemClock))?);
//! let gate = Arc::new(ExemptionGate::open(&config.gate, &config.store.whitelist_path)?);
//! let pipeline = Pipeline::new(&config, store, gate);
//!
//! let decision = pipeline
//!     .evaluate(&ImageEvent {
//!         scope: ScopeRef::channel("general"),
//!         subject: "message:42".into(),
//!         attachments: vec![Attachment::new(Some("promo.png".into()), bytes)],
//!     })
//!     .await;
//! println!("{} -> {}", decision.verdict.tier, decision.action);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod gate;
pub mod matcher;
pub mod pipeline;
pub mod policy;
pub mod reconcile;
pub mod store;

// Re-export main types for convenience
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{
    Config, ExtractorConfig, GateConfig, PipelineConfig, ReconcileConfig, StoreConfig,
};
pub use error::{Result, WardenError};
pub use fingerprint::{
    hamming_distance, ContentHash, Fingerprint, FingerprintExtractor, FingerprintSet,
    HashAlgorithm, PerceptualHasher, TileSignature,
};
pub use gate::{ExemptionGate, ScopeKind, ScopeRef, WhitelistSet};
pub use matcher::{decide, MatchVerdict, Tier};
pub use pipeline::{
    Attachment, AttachmentDecision, Enforcement, EnforcementReport, Enforcer, EventDecision,
    ImageEvent, LogSink, ModerationSink, Outcome, Pipeline,
};
pub use policy::{Action, EnforcementPolicy, TierActions};
pub use reconcile::{
    CorpusSource, EnforcementLog, LoggedCorpus, ObservedFingerprint, ReconcileReport,
    ReconcileState, Reconciler, StaticCorpus,
};
pub use store::{FingerprintStore, KnownRecord, Label, StoreStats};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    /// Ingest a labeled record, then match a near copy end to end.
    #[test]
    fn test_ingest_then_match() {
        let store = FingerprintStore::default();
        let known = FingerprintSet::new(ContentHash::of(b"scam banner"))
            .with_perceptual(Fingerprint::from_u64(0xDEAD_BEEF));
        let (record, inserted) = store.ingest(&known, Label::Phish, "msg:7").unwrap();
        assert!(inserted);
        assert_eq!(record.seen_count, 1);

        let query = FingerprintSet::new(ContentHash::of(b"reposted banner"))
            .with_perceptual(Fingerprint::from_u64(0xDEAD_BEEF ^ 0b101));
        let policy = EnforcementPolicy::default();
        let verdict = decide(&query, &store, &query.content_hash(), &policy);

        assert_eq!(verdict.tier, Tier::Strong);
        assert_eq!(verdict.best_distance, Some(2));
        assert_eq!(verdict.best_match, Some(record.id));
        assert_eq!(policy.action_for(verdict.tier), Action::Ban);
        assert!(record.last_seen_at <= Utc::now());
    }
}
