//! Store snapshot round-trips.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use imgward_core::{
    ContentHash, FixedClock, Fingerprint, FingerprintSet, FingerprintStore, Label,
    TileSignature, WardenError,
};

fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    ))
}

fn populate(store: &FingerprintStore, clock: &FixedClock) {
    let full = FingerprintSet::new(ContentHash::of(b"banner"))
        .with_perceptual(Fingerprint::from_u64(0x1111))
        .with_gradient(Fingerprint::from_u64(0x2222))
        .with_tiles(TileSignature {
            grid: 2,
            cells: (0..4).map(Fingerprint::from_u64).collect(),
        });
    store.ingest(&full, Label::Phish, "thread:1").unwrap();

    clock.advance(Duration::minutes(5));
    store.ingest(&full, Label::Phish, "thread:2").unwrap();

    let bare = FingerprintSet::new(ContentHash::of(b"logo")).with_perceptual(Fingerprint::from_u64(7));
    store.ingest(&bare, Label::Benign, "ops").unwrap();
}

#[test]
fn test_json_roundtrip_is_lossless() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let clock = clock();

    let store = FingerprintStore::open(&path, clock.clone()).unwrap();
    assert!(store.is_empty());
    populate(&store, &clock);
    store.save().unwrap();

    let reloaded = FingerprintStore::open(&path, clock).unwrap();
    assert_eq!(reloaded.records(), store.records());
    assert_eq!(reloaded.records()[0].seen_count, 2);
    assert!(reloaded.records()[1].gradient_hash.is_none());
}

#[cfg(feature = "cbor")]
#[test]
fn test_cbor_roundtrip_is_lossless() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.cbor");
    let clock = clock();

    let store = FingerprintStore::open(&path, clock.clone()).unwrap();
    populate(&store, &clock);
    store.save().unwrap();

    let reloaded = FingerprintStore::open(&path, clock).unwrap();
    assert_eq!(reloaded.records(), store.records());
}

#[test]
fn test_snapshot_uses_camel_case_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let clock = clock();

    let store = FingerprintStore::open(&path, clock.clone()).unwrap();
    populate(&store, &clock);
    store.save().unwrap();

    let json: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    let first = &json["records"][0];
    for field in [
        "contentHash",
        "perceptualHash",
        "gradientHash",
        "tileSignature",
        "label",
        "provenance",
        "firstSeenAt",
        "lastSeenAt",
        "seenCount",
    ] {
        assert!(first.get(field).is_some(), "missing field {field}");
    }
    assert_eq!(first["label"], "phish");
    assert_eq!(json["version"], 1);
}

#[test]
fn test_corrupt_snapshot_leaves_memory_intact() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let clock = clock();

    let store = FingerprintStore::open(&path, clock.clone()).unwrap();
    populate(&store, &clock);
    let before = store.records();

    std::fs::write(&path, b"[truncated").unwrap();
    assert!(matches!(store.load(), Err(WardenError::StoreIo { .. })));
    assert_eq!(store.records(), before);
}
