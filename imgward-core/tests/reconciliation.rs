//! Reconciliation against a live store and enforcement log.

use std::sync::Arc;

use imgward_core::{
    Attachment, Config, ContentHash, EnforcementLog, ExemptionGate, Fingerprint,
    FingerprintSet, FingerprintStore, ImageEvent, Label, LoggedCorpus, ObservedFingerprint,
    Pipeline, ReconcileState, Reconciler, ScopeRef, StaticCorpus, Tier, WardenError,
};

fn set(content: &[u8], phash: u64) -> FingerprintSet {
    FingerprintSet::new(ContentHash::of(content)).with_perceptual(Fingerprint::from_u64(phash))
}

#[tokio::test]
async fn test_reconcile_never_touches_phish_records() {
    let store = Arc::new(FingerprintStore::default());
    store.ingest(&set(b"scam", 0), Label::Phish, "ops").unwrap();
    store
        .ingest(&set(b"meme", u64::MAX), Label::Unlabeled, "ops")
        .unwrap();
    let before = store.records();

    let log = Arc::new(EnforcementLog::new(100));
    log.record(ObservedFingerprint::from(&set(b"scam-copy", 1)));
    log.record(ObservedFingerprint::from(&set(b"meme", u64::MAX)));

    let gate = Arc::new(ExemptionGate::default());
    let job = Reconciler::new(
        Arc::new(LoggedCorpus::new(log, store.clone())),
        gate.clone(),
        8,
        1000,
    );

    let report = job.run().await.unwrap();
    assert_eq!(report.true_positives, 1);
    assert_eq!(report.false_positives, 1);
    assert_eq!(store.records(), before);
    assert!(gate.is_content_whitelisted(&ContentHash::of(b"meme")));
    assert!(!gate.is_content_whitelisted(&ContentHash::of(b"scam-copy")));

    let whitelist = gate.whitelist();
    job.run().await.unwrap();
    assert_eq!(gate.whitelist(), whitelist);
    assert_eq!(job.state(), ReconcileState::Idle);
}

#[tokio::test]
async fn test_observed_limit_bounds_the_corpus() {
    let gate = Arc::new(ExemptionGate::default());
    let observed = (0..5u8)
        .map(|i| ObservedFingerprint::from(&set(&[i], u64::MAX)))
        .collect();
    let job = Reconciler::new(
        Arc::new(StaticCorpus {
            observed,
            reference: vec![Fingerprint::from_u64(0)],
        }),
        gate.clone(),
        8,
        2,
    );

    let report = job.run().await.unwrap();
    assert_eq!(report.observed, 2);
    assert_eq!(report.false_positives, 2);
}

#[tokio::test]
async fn test_no_phish_records_means_empty_reference() {
    let store = Arc::new(FingerprintStore::default());
    let log = Arc::new(EnforcementLog::new(10));
    log.record(ObservedFingerprint::from(&set(b"x", 1)));

    let gate = Arc::new(ExemptionGate::default());
    let job = Reconciler::new(Arc::new(LoggedCorpus::new(log, store)), gate.clone(), 8, 100);
    assert!(matches!(
        job.run().await,
        Err(WardenError::CorpusEmpty("reference"))
    ));
    assert!(gate.whitelist().is_empty());
}

#[tokio::test]
async fn test_whitelisted_false_positive_stops_firing() {
    // A meme got stored as phish by mistake, then relabeled benign by an
    // operator; the enforcement log still holds the hits it caused.
    let meme = b"not an image, matched by exact content".to_vec();
    let store = Arc::new(FingerprintStore::default());
    store.ingest(&set(&meme, 0xAAAA), Label::Phish, "ops").unwrap();
    store.ingest(&set(b"real scam", 0), Label::Phish, "ops").unwrap();

    let gate = Arc::new(ExemptionGate::default());
    let pipeline = Pipeline::new(&Config::default(), store.clone(), gate.clone());
    let event = ImageEvent {
        scope: ScopeRef::channel("general"),
        subject: "message:9".into(),
        attachments: vec![Attachment::new(None, meme.clone())],
    };
    assert_eq!(pipeline.evaluate(&event).await.verdict.tier, Tier::Strong);
    assert_eq!(pipeline.log().len(), 1);

    store.set_label(&ContentHash::of(&meme), Label::Benign);

    // Undecodable observations carry no perceptual hash and are left alone.
    let job = Reconciler::new(
        Arc::new(LoggedCorpus::new(pipeline.log().clone(), store.clone())),
        gate.clone(),
        8,
        100,
    );
    let report = job.run().await.unwrap();
    assert_eq!(report.unclassified, 1);
    assert_eq!(report.newly_whitelisted, 0);

    // With its perceptual hash known, the same hit is a false positive.
    let corpus = StaticCorpus {
        observed: vec![ObservedFingerprint::from(&set(&meme, u64::MAX))],
        reference: store.phish_fingerprints(),
    };
    Reconciler::new(Arc::new(corpus), gate.clone(), 8, 100)
        .run()
        .await
        .unwrap();
    assert_eq!(pipeline.evaluate(&event).await.verdict.tier, Tier::None);
}

#[tokio::test]
async fn test_failed_save_leaves_whitelist_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let parent = dir.path().join("state");
    let path = parent.join("whitelist.json");
    let gate = Arc::new(ExemptionGate::open(&Default::default(), &path).unwrap());

    // A regular file where the directory should be makes every save fail.
    std::fs::write(&parent, b"in the way").unwrap();

    let corpus = StaticCorpus {
        observed: vec![ObservedFingerprint::from(&set(b"meme", u64::MAX))],
        reference: vec![Fingerprint::from_u64(0)],
    };
    let job = Reconciler::new(Arc::new(corpus), gate.clone(), 8, 100).with_persistence(true);

    assert!(matches!(job.run().await, Err(WardenError::StoreIo { .. })));
    assert!(gate.whitelist().is_empty());
    assert!(!gate.is_content_whitelisted(&ContentHash::of(b"meme")));
    assert_eq!(job.state(), ReconcileState::Idle);

    // Once the disk recovers the retry sees the entries as new and saves them.
    std::fs::remove_file(&parent).unwrap();
    let report = job.run().await.unwrap();
    assert_eq!(report.newly_whitelisted, 2);
    assert!(path.exists());

    let reopened = ExemptionGate::open(&Default::default(), &path).unwrap();
    assert_eq!(reopened.whitelist(), gate.whitelist());
    assert!(reopened.is_content_whitelisted(&ContentHash::of(b"meme")));
}
