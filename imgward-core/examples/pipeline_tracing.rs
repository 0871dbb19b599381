//! Example showing the decision pipeline's tracing output.
//!
//! Run with: cargo run -p imgward-core --example pipeline_tracing

use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use imgward_core::{
    Attachment, Config, Enforcer, ExemptionGate, FingerprintExtractor, FingerprintStore,
    ImageEvent, Label, LogSink, Pipeline, ScopeRef, SystemClock,
};
use tracing_subscriber::{fmt, EnvFilter};

fn lure_png() -> Vec<u8> {
    let img = ImageBuffer::from_fn(160, 120, |x, y| {
        let stripe = if (x / 10) % 2 == 0 { 200 } else { 40 };
        Rgb([stripe, (y * 2) as u8, ((x + y) % 256) as u8])
    });
    let mut buffer = Cursor::new(Vec::new());
    if let Err(e) = DynamicImage::ImageRgb8(img).write_to(&mut buffer, ImageFormat::Png) {
        eprintln!("Failed to encode demo image: {e}");
    }
    buffer.into_inner()
}

#[tokio::main]
async fn main() {
    fmt()
        .with_env_filter(EnvFilter::new("imgward_core=debug,info"))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    println!("=== Imgward Pipeline Tracing Demo ===\n");

    let config = Config::default();
    let store = Arc::new(FingerprintStore::new(Arc::new(SystemClock)));
    let gate = Arc::new(ExemptionGate::new(&config.gate));

    let bytes = lure_png();
    let extractor = FingerprintExtractor::new(config.extractor.clone());
    match extractor.extract(&bytes) {
        Ok(set) => {
            store.ingest(&set, Label::Phish, "demo");
        }
        Err(e) => {
            eprintln!("Failed to fingerprint demo image: {e}");
            return;
        }
    }

    let pipeline = Pipeline::new(&config, store, gate);
    let event = ImageEvent {
        scope: ScopeRef::channel("general"),
        subject: "user-42".into(),
        attachments: vec![Attachment::new(Some("lure.png".into()), bytes)],
    };

    println!("\nEvaluating event...\n");
    let decision = pipeline.evaluate(&event).await;
    println!("\nTier:   {}", decision.verdict.tier);
    println!("Action: {}", decision.action);

    let enforcer = Enforcer::new(Arc::new(LogSink), &config.pipeline);
    match enforcer.enforce(&decision).await {
        Ok(Some(report)) => println!("Applied: {}", report.applied),
        Ok(None) => println!("Nothing to enforce"),
        Err(e) => println!("Enforcement failed: {e}"),
    }
}
