//! Extraction entry points: image in, [`ExtractionReport`] out.
//!
//! A run is `load → enhance → encode → one inference call → parse`. Only
//! the first step and client resolution can fail fatally; everything after
//! enhancement ends up in [`ExtractionReport::outcome`] so callers always
//! get "a record, or nothing plus a diagnostic".

use crate::config::{EnhancementConfig, ExtractionConfig, DEFAULT_MODEL};
use crate::error::{ExtractionFailure, MediscriptError, ServiceError, ServiceFailureKind};
use crate::output::{ExtractionReport, PrescriptionRecord, RunStats, Stage};
use crate::pipeline::enhance::{self, Enhanced};
use crate::pipeline::{encode, input, llm, parse};
use crate::progress::ProgressCallback;
use crate::prompts::{EXTRACTION_PROMPT, EXTRACTION_PROMPT_VERSION};
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use image::{DynamicImage, GenericImageView};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Owns the inference client and the per-run settings.
///
/// Holds no per-run state, so one extractor can serve any number of
/// concurrent runs.
pub struct PrescriptionExtractor {
    client: Arc<dyn llm::VisionClient>,
    prompt: String,
    enhancement: EnhancementConfig,
    api_timeout_secs: u64,
    download_timeout_secs: u64,
    trace: bool,
    progress: Option<ProgressCallback>,
}

impl PrescriptionExtractor {
    /// Resolve the inference client named by `config` and build an extractor.
    ///
    /// # Errors
    /// [`MediscriptError::ProviderNotConfigured`] when no client can be built,
    /// [`MediscriptError::InvalidConfig`] when the enhancement values are unusable.
    pub fn new(config: &ExtractionConfig) -> Result<Self, MediscriptError> {
        config.enhancement.validate()?;
        let client = resolve_client(config)?;
        Ok(Self::with_client(client, config))
    }

    /// Build an extractor around an existing client, ignoring the provider
    /// fields of `config`.
    pub fn with_client(client: Arc<dyn llm::VisionClient>, config: &ExtractionConfig) -> Self {
        Self {
            client,
            prompt: config
                .prompt
                .clone()
                .unwrap_or_else(|| EXTRACTION_PROMPT.to_string()),
            enhancement: config.enhancement,
            api_timeout_secs: config.api_timeout_secs,
            download_timeout_secs: config.download_timeout_secs,
            trace: config.trace,
            progress: config.progress_callback.clone(),
        }
    }

    /// Label of the inference client, for logs and summaries.
    pub fn client_name(&self) -> &str {
        self.client.name()
    }

    /// Send an already-enhanced image with the extraction prompt and parse
    /// the answer. Exactly one request is made.
    ///
    /// `.ok()` on the result is the "record or nothing" view.
    pub async fn extract_prescription(
        &self,
        image: &DynamicImage,
    ) -> Result<PrescriptionRecord, ExtractionFailure> {
        let encoded = encode::encode_image(image).map_err(|e| {
            ServiceError::new(
                ServiceFailureKind::Other,
                format!("image encoding failed: {e}"),
            )
        })?;

        if let Some(ref cb) = self.progress {
            cb.on_request_start();
        }
        debug!(
            "Requesting extraction from {} (prompt {})",
            self.client.name(),
            EXTRACTION_PROMPT_VERSION
        );
        let raw = llm::request_extraction(
            self.client.as_ref(),
            &self.prompt,
            &encoded,
            self.api_timeout_secs,
        )
        .await?;
        if let Some(ref cb) = self.progress {
            cb.on_request_complete(raw.len());
        }

        parse::parse_response(&raw).map_err(|failure| {
            warn!("Unparseable response: {}", failure.reason);
            debug!("Raw response: {}", failure.raw);
            failure.into()
        })
    }

    /// Full run for a path or URL.
    pub async fn process(&self, input_str: &str) -> Result<ExtractionReport, MediscriptError> {
        let total_start = Instant::now();
        info!("Starting extraction: {}", input_str);
        if let Some(ref cb) = self.progress {
            cb.on_run_start(input_str);
        }

        // ── Step 1: Load and decode ──────────────────────────────────────
        let decode_start = Instant::now();
        let loaded = input::load_image(input_str, self.download_timeout_secs).await?;
        let decode_ms = decode_start.elapsed().as_millis() as u64;

        self.process_image(input_str, loaded.image, decode_ms, total_start)
            .await
    }

    /// Full run for JPEG or PNG bytes already in memory.
    pub async fn process_bytes(
        &self,
        bytes: &[u8],
        source_name: &str,
    ) -> Result<ExtractionReport, MediscriptError> {
        let total_start = Instant::now();
        info!("Starting extraction: {} ({} bytes)", source_name, bytes.len());
        if let Some(ref cb) = self.progress {
            cb.on_run_start(source_name);
        }

        let image = input::decode_image_bytes(bytes, source_name)?;
        let decode_ms = total_start.elapsed().as_millis() as u64;
        self.process_image(source_name, image, decode_ms, total_start)
            .await
    }

    async fn process_image(
        &self,
        source: &str,
        image: DynamicImage,
        decode_duration_ms: u64,
        total_start: Instant,
    ) -> Result<ExtractionReport, MediscriptError> {
        let (original_width, original_height) = image.dimensions();

        // ── Step 2: Enhance ──────────────────────────────────────────────
        let enhance_start = Instant::now();
        let Enhanced { image: enhanced, stages } =
            enhance_blocking(image, self.enhancement, self.trace, self.progress.clone()).await?;
        let enhance_duration_ms = enhance_start.elapsed().as_millis() as u64;
        let (enhanced_width, enhanced_height) = enhanced.dimensions();
        debug!(
            "Enhanced {}x{} → {}x{} in {}ms",
            original_width, original_height, enhanced_width, enhanced_height, enhance_duration_ms
        );

        // ── Step 3: Inference + parse ────────────────────────────────────
        let inference_start = Instant::now();
        let outcome = self.extract_prescription(&enhanced).await;
        let inference_duration_ms = inference_start.elapsed().as_millis() as u64;

        match &outcome {
            Ok(record) => info!(
                "Extracted record from {}: {} medication(s)",
                source,
                record.medications.len()
            ),
            Err(failure) => warn!("No data extracted from {}: {}", source, failure),
        }
        if let Some(ref cb) = self.progress {
            cb.on_run_complete(source, outcome.is_ok());
        }

        let stats = RunStats {
            original_width,
            original_height,
            enhanced_width,
            enhanced_height,
            decode_duration_ms,
            enhance_duration_ms,
            inference_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };

        Ok(ExtractionReport {
            source: source.to_string(),
            enhanced,
            stages,
            outcome,
            stats,
        })
    }
}

/// Extract a prescription from a local image file or HTTP/HTTPS URL.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(ExtractionReport)` whenever the image could be loaded, even if the
/// service failed or its answer was unparseable (check
/// [`ExtractionReport::outcome`]).
///
/// # Errors
/// Returns `Err(MediscriptError)` only for fatal errors:
/// - File not found / permission denied / download failure
/// - Not a JPEG or PNG, or undecodable
/// - No inference provider configured
///
/// # Example
/// ```rust,no_run
/// use mediscript::{run, ExtractionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let report = run("prescription.jpg", &ExtractionConfig::default()).await?;
/// match report.record() {
///     Some(rx) => println!("{}", rx.to_json_pretty()?),
///     None => eprintln!("No data extracted"),
/// }
/// # Ok(())
/// # }
/// ```
pub async fn run(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionReport, MediscriptError> {
    let extractor = PrescriptionExtractor::new(config)?;
    extractor.process(input_str.as_ref()).await
}

/// Synchronous wrapper around [`run`].
///
/// Creates a temporary tokio runtime internally.
pub fn run_sync(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionReport, MediscriptError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| MediscriptError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(run(input_str, config))
}

/// Extract a prescription from JPEG or PNG bytes in memory.
pub async fn run_from_bytes(
    bytes: &[u8],
    config: &ExtractionConfig,
) -> Result<ExtractionReport, MediscriptError> {
    let extractor = PrescriptionExtractor::new(config)?;
    extractor.process_bytes(bytes, "<memory>").await
}

/// Run several images, at most `config.concurrency` at a time.
///
/// Runs share the inference client and nothing else. Results come back in
/// input order, each with its own fatal-or-report outcome.
///
/// # Errors
/// Only client resolution is fatal for the whole batch.
pub async fn run_batch<I, S>(
    inputs: I,
    config: &ExtractionConfig,
) -> Result<Vec<(String, Result<ExtractionReport, MediscriptError>)>, MediscriptError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let extractor = PrescriptionExtractor::new(config)?;
    let inputs: Vec<String> = inputs.into_iter().map(Into::into).collect();
    info!(
        "Batch of {} image(s), concurrency {}",
        inputs.len(),
        config.concurrency
    );

    let extractor = &extractor;
    let mut results: Vec<(usize, String, Result<ExtractionReport, MediscriptError>)> =
        stream::iter(inputs.into_iter().enumerate().map(move |(idx, input_str)| async move {
            let result = extractor.process(&input_str).await;
            (idx, input_str, result)
        }))
        .buffer_unordered(config.concurrency.max(1))
        .collect()
        .await;

    results.sort_by_key(|(idx, _, _)| *idx);
    Ok(results.into_iter().map(|(_, s, r)| (s, r)).collect())
}

/// Load and enhance an image without contacting any inference service.
///
/// Does not require an API key.
pub async fn enhance_only(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<Enhanced, MediscriptError> {
    config.enhancement.validate()?;
    let loaded = input::load_image(input_str.as_ref(), config.download_timeout_secs).await?;
    enhance_blocking(
        loaded.image,
        config.enhancement,
        config.trace,
        config.progress_callback.clone(),
    )
    .await
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Run the CPU-bound enhancement pipeline off the async executor.
async fn enhance_blocking(
    image: DynamicImage,
    config: EnhancementConfig,
    trace: bool,
    progress: Option<ProgressCallback>,
) -> Result<Enhanced, MediscriptError> {
    tokio::task::spawn_blocking(move || {
        let observer = |stage: Stage, w: u32, h: u32| {
            if let Some(ref cb) = progress {
                cb.on_stage_complete(stage, w, h);
            }
        };
        enhance::enhance_observed(&image, &config, trace, &observer)
    })
    .await
    .map_err(|e| MediscriptError::Internal(format!("Enhancement task failed: {}", e)))
}

/// Model used when a provider is named but no model is given.
fn default_model_for(provider_name: &str) -> Option<&'static str> {
    match provider_name {
        "gemini" => Some(DEFAULT_MODEL),
        "openai" => Some("gpt-4.1-nano"),
        _ => None,
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, MediscriptError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        MediscriptError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the inference client, from most-specific to least-specific.
///
/// 1. **Pre-built client** (`config.client`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`).
/// 3. **Environment pair** (`MEDISCRIPT_PROVIDER` + `MEDISCRIPT_MODEL`).
/// 4. **`GEMINI_API_KEY`**: Gemini with `config.model` or [`DEFAULT_MODEL`].
/// 5. **Auto-detection** (`ProviderFactory::from_env`).
fn resolve_client(config: &ExtractionConfig) -> Result<Arc<dyn llm::VisionClient>, MediscriptError> {
    if let Some(ref client) = config.client {
        return Ok(Arc::clone(client));
    }

    let (provider, label) = resolve_provider(config)?;
    info!("Using inference provider {}", label);
    Ok(Arc::new(llm::LlmVisionClient::new(
        provider,
        label,
        config.temperature,
        config.max_tokens,
    )))
}

fn resolve_provider(
    config: &ExtractionConfig,
) -> Result<(Arc<dyn LLMProvider>, String), MediscriptError> {
    if let Some(ref name) = config.provider_name {
        let model = match config.model.as_deref().or_else(|| default_model_for(name)) {
            Some(m) => m,
            None => {
                return Err(MediscriptError::ProviderNotConfigured {
                    provider: name.clone(),
                    hint: format!("No default model is known for '{name}'. Pass --model."),
                })
            }
        };
        let provider = create_vision_provider(name, model)?;
        return Ok((provider, format!("{name}/{model}")));
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("MEDISCRIPT_PROVIDER"),
        std::env::var("MEDISCRIPT_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            let provider = create_vision_provider(&prov, &model)?;
            return Ok((provider, format!("{prov}/{model}")));
        }
    }

    if let Ok(key) = std::env::var("GEMINI_API_KEY") {
        if !key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            let provider = create_vision_provider("gemini", model)?;
            return Ok((provider, format!("gemini/{model}")));
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| MediscriptError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No inference provider could be auto-detected from environment.\n\
                Set GEMINI_API_KEY (or another provider key) in the environment or .env.\n\
                Error: {}",
                e
            ),
        })?;
    Ok((llm_provider, "auto".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encode::EncodedImage;
    use async_trait::async_trait;
    use image::{GrayImage, Luma};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        reply: Result<String, ServiceError>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(reply: Result<String, ServiceError>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl llm::VisionClient for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn describe(&self, _prompt: &str, image: &EncodedImage) -> Result<String, ServiceError> {
            assert_eq!(image.mime_type, "image/png");
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }
    }

    fn config_with(client: Arc<dyn llm::VisionClient>) -> ExtractionConfig {
        ExtractionConfig::builder()
            .client(client)
            .target_height(16)
            .build()
            .unwrap()
    }

    fn blank() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 8, Luma([255])))
    }

    #[test]
    fn explicit_client_wins() {
        let client = Scripted::new(Ok("{}".into()));
        let extractor = PrescriptionExtractor::new(&config_with(client)).unwrap();
        assert_eq!(extractor.client_name(), "scripted");
    }

    #[test]
    fn unknown_provider_without_model_is_not_configured() {
        let config = ExtractionConfig::builder()
            .provider_name("someprovider")
            .build()
            .unwrap();
        match PrescriptionExtractor::new(&config) {
            Err(MediscriptError::ProviderNotConfigured { provider, .. }) => {
                assert_eq!(provider, "someprovider")
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[test]
    fn default_models() {
        assert_eq!(default_model_for("gemini"), Some(DEFAULT_MODEL));
        assert_eq!(default_model_for("nope"), None);
    }

    #[tokio::test]
    async fn extract_parses_fenced_reply() {
        let client = Scripted::new(Ok("```json\n{\"doctor_name\": \"Dr. Shah\"}\n```".into()));
        let extractor = PrescriptionExtractor::new(&config_with(client.clone())).unwrap();
        let record = extractor.extract_prescription(&blank()).await.unwrap();
        assert_eq!(record.doctor_name, "Dr. Shah");
        assert_eq!(record.patient_name, "N/A");
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn service_failure_is_not_retried() {
        let client = Scripted::new(Err(ServiceError::new(
            ServiceFailureKind::RateLimited,
            "429",
        )));
        let extractor = PrescriptionExtractor::new(&config_with(client.clone())).unwrap();
        let failure = extractor.extract_prescription(&blank()).await.unwrap_err();
        assert!(matches!(
            failure,
            ExtractionFailure::Service {
                kind: ServiceFailureKind::RateLimited,
                ..
            }
        ));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn process_bytes_reports_stats() {
        let client = Scripted::new(Ok("{}".into()));
        let extractor = PrescriptionExtractor::new(&config_with(client)).unwrap();
        let png = encode::png_bytes(&blank()).unwrap();
        let report = extractor.process_bytes(&png, "mem.png").await.unwrap();
        assert_eq!(report.source, "mem.png");
        assert_eq!((report.stats.original_width, report.stats.original_height), (8, 8));
        assert_eq!(report.stats.enhanced_height, 16);
        assert!(report.stages.is_none());
        assert!(report.record().is_some());
    }

    #[tokio::test]
    async fn invalid_enhancement_is_rejected_up_front() {
        let mut config = config_with(Scripted::new(Ok("{}".into())));
        config.enhancement.denoise_search_window = 4;
        assert!(matches!(
            PrescriptionExtractor::new(&config),
            Err(MediscriptError::InvalidConfig(_))
        ));
    }
}
