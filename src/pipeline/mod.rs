//! Pipeline stages for prescription extraction.
//!
//! Each submodule implements exactly one transformation step.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ enhance ──▶ encode ──▶ llm ──▶ parse
//! (path/URL) (6 stages)  (base64)  (VLM)   (record)
//! ```
//!
//! 1. [`input`]   — read a local path or download a URL, sniff JPEG/PNG, decode
//! 2. [`enhance`] — resize, grayscale, threshold, denoise, sharpen, contrast;
//!    the numeric kernels live in [`filters`]. CPU-bound, so callers run it
//!    in `spawn_blocking`
//! 3. [`encode`]  — PNG-encode and base64-wrap the enhanced image
//! 4. [`llm`]     — one request to the inference service; the only stage with
//!    network I/O besides URL download
//! 5. [`parse`]   — recover a record from the model's free text

pub mod encode;
pub mod enhance;
pub mod filters;
pub mod input;
pub mod llm;
pub mod parse;
