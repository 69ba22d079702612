//! Six-stage prescription image enhancement.
//!
//! ```text
//! original ─▶ resize ─▶ grayscale ─▶ threshold ─▶ denoise ─▶ sharpen ─▶ contrast
//!             (1200px)   (BT.601)    (gaussian)   (NL-means)  (3×3)     (×1.5)
//! ```
//!
//! The order is fixed. Thresholding before denoising is what lets the
//! non-local-means pass clean binarisation speckle; sharpening after it
//! restores the stroke edges the averaging softened. Reordering changes
//! the output, so there is exactly one entry point that runs all stages.
//!
//! Input colour handling: colour images are processed as RGB8 (alpha
//! dropped), everything else as Luma8. The pipeline never fails; an empty
//! image passes through every stage as an empty image.

use crate::config::EnhancementConfig;
use crate::output::{EnhancementStage, Stage};
use crate::pipeline::filters;
use image::{DynamicImage, GenericImageView, GrayImage};
use std::time::Instant;
use tracing::debug;

/// Result of [`enhance_with_trace`].
#[derive(Debug, Clone)]
pub struct Enhanced {
    /// Final-stage image (Luma8).
    pub image: DynamicImage,
    /// Every stage in pipeline order, when tracing was requested.
    pub stages: Option<Vec<EnhancementStage>>,
}

/// Run the pipeline and return only the final image.
pub fn enhance(image: &DynamicImage, config: &EnhancementConfig) -> DynamicImage {
    enhance_with_trace(image, config, false).image
}

/// Run the pipeline and return the final image plus all seven captured stages.
pub fn enhance_traced(image: &DynamicImage, config: &EnhancementConfig) -> (DynamicImage, Vec<EnhancementStage>) {
    let Enhanced { image, stages } = enhance_with_trace(image, config, true);
    (image, stages.unwrap_or_default())
}

/// Run the pipeline, capturing stages when `trace` is set.
pub fn enhance_with_trace(image: &DynamicImage, config: &EnhancementConfig, trace: bool) -> Enhanced {
    enhance_observed(image, config, trace, &|_, _, _| {})
}

/// Run the pipeline, reporting each completed stage to `observer` as
/// `(stage, width, height)`.
pub fn enhance_observed(
    image: &DynamicImage,
    config: &EnhancementConfig,
    trace: bool,
    observer: &dyn Fn(Stage, u32, u32),
) -> Enhanced {
    let mut recorder = Recorder {
        stages: trace.then(|| Vec::with_capacity(Stage::ALL.len())),
        observer,
        clock: Instant::now(),
    };

    let original = display_form(image);
    recorder.capture(Stage::Original, &original);

    let resized = resize_to_height(&original, config.target_height);
    recorder.capture(Stage::Resized, &resized);

    let gray = to_grayscale(&resized);
    recorder.capture_gray(Stage::Grayscale, &gray);

    let thresholded = filters::adaptive_threshold_gaussian(
        &gray,
        config.adaptive_threshold_block_size,
        config.adaptive_threshold_c,
    );
    recorder.capture_gray(Stage::Thresholded, &thresholded);

    let denoised = filters::denoise_nl_means(
        &thresholded,
        config.denoise_strength,
        config.denoise_template_window,
        config.denoise_search_window,
    );
    recorder.capture_gray(Stage::Denoised, &denoised);

    let sharpened = filters::sharpen3x3(&denoised, config.sharpen_center_weight);
    recorder.capture_gray(Stage::EdgeEnhanced, &sharpened);

    let contrasted = filters::contrast_about_mean(&sharpened, config.contrast_factor);
    recorder.capture_gray(Stage::ContrastEnhanced, &contrasted);

    Enhanced {
        image: DynamicImage::ImageLuma8(contrasted),
        stages: recorder.stages,
    }
}

/// Scale to `target_height`, preserving aspect ratio.
///
/// Shrinking uses area averaging, enlarging uses Catmull-Rom. An image that
/// is already `target_height` tall is returned unchanged.
pub fn resize_to_height(image: &DynamicImage, target_height: u32) -> DynamicImage {
    let (w, h) = image.dimensions();
    if h == target_height || h == 0 || w == 0 {
        return image.clone();
    }
    let new_w = ((w as u64 * target_height as u64) / h as u64).max(1) as u32;
    let shrink = h > target_height;

    if image.color().has_color() {
        let rgb = image.to_rgb8();
        DynamicImage::ImageRgb8(if shrink {
            filters::resize_area(&rgb, new_w, target_height)
        } else {
            filters::resize_cubic(&rgb, new_w, target_height)
        })
    } else {
        let luma = image.to_luma8();
        DynamicImage::ImageLuma8(if shrink {
            filters::resize_area(&luma, new_w, target_height)
        } else {
            filters::resize_cubic(&luma, new_w, target_height)
        })
    }
}

/// Collapse colour to BT.601 luma; single-channel input is copied as-is.
pub fn to_grayscale(image: &DynamicImage) -> GrayImage {
    match image {
        DynamicImage::ImageLuma8(g) => g.clone(),
        img if img.color().has_color() => filters::luma_from_rgb(&img.to_rgb8()),
        img => img.to_luma8(),
    }
}

/// Normalise to the colour space stages are displayed in: RGB8 or Luma8.
fn display_form(image: &DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_) => image.clone(),
        img if img.color().has_color() => DynamicImage::ImageRgb8(img.to_rgb8()),
        img => DynamicImage::ImageLuma8(img.to_luma8()),
    }
}

struct Recorder<'a> {
    stages: Option<Vec<EnhancementStage>>,
    observer: &'a dyn Fn(Stage, u32, u32),
    clock: Instant,
}

impl Recorder<'_> {
    fn capture(&mut self, stage: Stage, image: &DynamicImage) {
        let (w, h) = image.dimensions();
        self.report(stage, w, h);
        if let Some(stages) = self.stages.as_mut() {
            stages.push(EnhancementStage {
                stage,
                image: image.clone(),
            });
        }
    }

    fn capture_gray(&mut self, stage: Stage, image: &GrayImage) {
        let (w, h) = image.dimensions();
        self.report(stage, w, h);
        if let Some(stages) = self.stages.as_mut() {
            stages.push(EnhancementStage {
                stage,
                image: DynamicImage::ImageLuma8(image.clone()),
            });
        }
    }

    fn report(&mut self, stage: Stage, w: u32, h: u32) {
        debug!(
            "{} → {}x{} px in {}ms",
            stage,
            w,
            h,
            self.clock.elapsed().as_millis()
        );
        self.clock = Instant::now();
        (self.observer)(stage, w, h);
    }
}
