#![no_main]

//! Fuzz target for store snapshot decoding
//!
//! Snapshots live on disk and may be truncated or hand-edited. Both
//! encodings must reject bad input with an error.
//!
//! Run with: cargo +nightly fuzz run fuzz_snapshot

use imgward_core::store::snapshot::{decode, SnapshotFormat};
use imgward_core::store::StoreSnapshot;
use imgward_core::WhitelistSet;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = decode::<StoreSnapshot>(data, SnapshotFormat::Json);
    let _ = decode::<StoreSnapshot>(data, SnapshotFormat::Cbor);
    let _ = decode::<WhitelistSet>(data, SnapshotFormat::Json);
});
