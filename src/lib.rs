//! # mediscript
//!
//! Extract structured medication data from photographed paper prescriptions
//! using a multimodal Vision Language Model (VLM).
//!
//! ## Why enhance first?
//!
//! Phone photos of handwritten prescriptions arrive with uneven lighting,
//! paper texture and faint ink. A fixed, deterministic enhancement pipeline
//! turns them into a clean near-binary page before the model sees them, and
//! a tolerant parser turns the model's semi-structured reply back into a
//! strict record.
//!
//! ## Pipeline Overview
//!
//! ```text
//! JPEG / PNG
//!  │
//!  ├─ 1. Input    read local file or download from URL, sniff + decode
//!  ├─ 2. Enhance  resize → grayscale → threshold → denoise → sharpen → contrast
//!  ├─ 3. Encode   PNG → base64
//!  ├─ 4. VLM      one request: fixed prompt + enhanced image, no retry
//!  ├─ 5. Parse    fenced block → quote fix → JSON object → back-fill
//!  └─ 6. Output   PrescriptionRecord, JSON / CSV export, per-run stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mediscript::{run, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider from GEMINI_API_KEY, MEDISCRIPT_PROVIDER/MEDISCRIPT_MODEL, or auto-detected
//!     let config = ExtractionConfig::default();
//!     let report = run("prescription.jpg", &config).await?;
//!     match &report.outcome {
//!         Ok(record) => {
//!             println!("{}", record.to_json_pretty()?);
//!             std::fs::write("medications.csv", record.medications_csv()?)?;
//!         }
//!         Err(failure) => eprintln!("No data extracted: {failure}"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! The enhancement pipeline and the parser are usable on their own:
//!
//! ```rust
//! use mediscript::{enhance, parse_response, EnhancementConfig};
//! use image::{DynamicImage, GrayImage, Luma};
//!
//! let photo = DynamicImage::ImageLuma8(GrayImage::from_pixel(30, 40, Luma([200])));
//! let config = EnhancementConfig { target_height: 20, ..EnhancementConfig::default() };
//! assert_eq!(enhance(&photo, &config).height(), 20);
//!
//! let record = parse_response("```json\n{\"patient_name\": \"Jane Doe\"}\n```").unwrap();
//! assert_eq!(record.date, "N/A");
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `mediscript` binary (clap + anyhow + tracing-subscriber + indicatif + dotenvy) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! mediscript = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{EnhancementConfig, ExtractionConfig, ExtractionConfigBuilder};
pub use error::{ExtractionFailure, MediscriptError, ParseFailure, ServiceError, ServiceFailureKind};
pub use extract::{enhance_only, run, run_batch, run_from_bytes, run_sync, PrescriptionExtractor};
pub use output::{
    EnhancementStage, ExtractionReport, MedicationEntry, PrescriptionRecord, RunStats, Stage,
};
pub use pipeline::encode::EncodedImage;
pub use pipeline::enhance::{enhance, enhance_traced, enhance_with_trace, Enhanced};
pub use pipeline::llm::{LlmVisionClient, VisionClient};
pub use pipeline::parse::parse_response;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
