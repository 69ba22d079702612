//! Configuration types for prescription extraction.
//!
//! Two structs split the knobs by concern:
//!
//! * [`EnhancementConfig`] — the eight numeric parameters of the image
//!   enhancement pipeline. These are values, not tuning hints: two runs with
//!   equal configs over equal input produce byte-identical images.
//! * [`ExtractionConfig`] — everything else (inference client, prompt,
//!   timeouts, batch concurrency), built via [`ExtractionConfigBuilder`].

use crate::error::MediscriptError;
use crate::pipeline::llm::VisionClient;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Target page height after the resize stage.
pub const DEFAULT_TARGET_HEIGHT: u32 = 1200;
/// Side of the Gaussian window used by adaptive thresholding.
pub const DEFAULT_THRESHOLD_BLOCK_SIZE: u32 = 11;
/// Constant subtracted from the local mean before comparing.
pub const DEFAULT_THRESHOLD_C: i32 = 2;
/// Non-local-means filter strength `h`.
pub const DEFAULT_DENOISE_STRENGTH: f32 = 10.0;
/// Side of the patch compared by non-local means.
pub const DEFAULT_DENOISE_TEMPLATE_WINDOW: u32 = 7;
/// Side of the neighbourhood searched by non-local means.
pub const DEFAULT_DENOISE_SEARCH_WINDOW: u32 = 21;
/// Centre weight of the 3×3 sharpening kernel; neighbours are −1.
pub const DEFAULT_SHARPEN_CENTER_WEIGHT: i32 = 9;
/// Contrast multiplier of the final stage.
pub const DEFAULT_CONTRAST_FACTOR: f32 = 1.5;

/// Default vision model when the Gemini key is used.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Numeric parameters of the enhancement pipeline.
///
/// # Example
/// ```rust
/// use mediscript::EnhancementConfig;
///
/// let config = EnhancementConfig {
///     target_height: 600,
///     ..EnhancementConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnhancementConfig {
    pub target_height: u32,
    pub adaptive_threshold_block_size: u32,
    pub adaptive_threshold_c: i32,
    pub denoise_strength: f32,
    pub denoise_template_window: u32,
    pub denoise_search_window: u32,
    pub sharpen_center_weight: i32,
    pub contrast_factor: f32,
}

impl Default for EnhancementConfig {
    fn default() -> Self {
        Self {
            target_height: DEFAULT_TARGET_HEIGHT,
            adaptive_threshold_block_size: DEFAULT_THRESHOLD_BLOCK_SIZE,
            adaptive_threshold_c: DEFAULT_THRESHOLD_C,
            denoise_strength: DEFAULT_DENOISE_STRENGTH,
            denoise_template_window: DEFAULT_DENOISE_TEMPLATE_WINDOW,
            denoise_search_window: DEFAULT_DENOISE_SEARCH_WINDOW,
            sharpen_center_weight: DEFAULT_SHARPEN_CENTER_WEIGHT,
            contrast_factor: DEFAULT_CONTRAST_FACTOR,
        }
    }
}

impl EnhancementConfig {
    /// Check the window sizes and factors the filters depend on.
    pub fn validate(&self) -> Result<(), MediscriptError> {
        if self.target_height == 0 {
            return Err(MediscriptError::InvalidConfig(
                "target height must be ≥ 1".into(),
            ));
        }
        for (name, v) in [
            ("adaptive threshold block size", self.adaptive_threshold_block_size),
            ("denoise template window", self.denoise_template_window),
            ("denoise search window", self.denoise_search_window),
        ] {
            if v < 3 || v % 2 == 0 {
                return Err(MediscriptError::InvalidConfig(format!(
                    "{name} must be odd and ≥ 3, got {v}"
                )));
            }
        }
        if self.denoise_strength.is_nan() || self.denoise_strength <= 0.0 {
            return Err(MediscriptError::InvalidConfig(format!(
                "denoise strength must be > 0, got {}",
                self.denoise_strength
            )));
        }
        if self.contrast_factor.is_nan() || self.contrast_factor < 0.0 {
            return Err(MediscriptError::InvalidConfig(format!(
                "contrast factor must be ≥ 0, got {}",
                self.contrast_factor
            )));
        }
        Ok(())
    }
}

/// Configuration for one or more extraction runs.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use mediscript::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .model("gemini-2.0-flash")
///     .api_timeout_secs(30)
///     .trace(true)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Enhancement pipeline parameters.
    pub enhancement: EnhancementConfig,

    /// Vision model identifier. If None, uses [`DEFAULT_MODEL`] or the
    /// provider's own default.
    pub model: Option<String>,

    /// Provider name understood by edgequake-llm ("gemini", "openai", ...).
    pub provider_name: Option<String>,

    /// Pre-constructed inference client. Takes precedence over `provider_name`.
    pub client: Option<Arc<dyn VisionClient>>,

    /// Custom extraction prompt. If None, uses [`crate::prompts::EXTRACTION_PROMPT`].
    pub prompt: Option<String>,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Transcription wants the model faithful to the page, not creative.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 2048.
    pub max_tokens: usize,

    /// Timeout for the single inference call, in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Number of images processed at once by [`crate::extract::run_batch`]. Default: 4.
    pub concurrency: usize,

    /// Capture every enhancement stage in the report. Default: false.
    pub trace: bool,

    /// Optional progress sink.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            enhancement: EnhancementConfig::default(),
            model: None,
            provider_name: None,
            client: None,
            prompt: None,
            temperature: 0.1,
            max_tokens: 2048,
            api_timeout_secs: 60,
            download_timeout_secs: 120,
            concurrency: 4,
            trace: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("enhancement", &self.enhancement)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("client", &self.client.as_ref().map(|_| "<dyn VisionClient>"))
            .field("prompt", &self.prompt.as_ref().map(|p| p.len()))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("concurrency", &self.concurrency)
            .field("trace", &self.trace)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn enhancement(mut self, enhancement: EnhancementConfig) -> Self {
        self.config.enhancement = enhancement;
        self
    }

    pub fn target_height(mut self, px: u32) -> Self {
        self.config.enhancement.target_height = px;
        self
    }

    pub fn contrast_factor(mut self, factor: f32) -> Self {
        self.config.enhancement.contrast_factor = factor;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn client(mut self, client: Arc<dyn VisionClient>) -> Self {
        self.config.client = Some(client);
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn trace(mut self, v: bool) -> Self {
        self.config.trace = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, MediscriptError> {
        let c = &self.config;
        c.enhancement.validate()?;
        if c.api_timeout_secs == 0 {
            return Err(MediscriptError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.concurrency == 0 {
            return Err(MediscriptError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}
