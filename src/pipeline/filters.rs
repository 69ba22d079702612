//! Numeric kernels behind the enhancement stages.
//!
//! Every function here is pure and deterministic: integer or fixed-order
//! floating-point arithmetic only, no threads, no randomness. Identical
//! input always yields byte-identical output, which is what lets a traced
//! run be compared pixel for pixel against an untraced one.
//!
//! Border handling follows the conventions document-scanning tools share:
//! replicate for the threshold's local mean, reflect-101 (`dcb|abcd|cba`)
//! for denoising and convolution.

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma, Pixel};

/// Non-local-means weights below this are treated as zero.
const MIN_NLM_WEIGHT: f64 = 0.001;

// BT.601 luma in 14-bit fixed point: 0.299, 0.587, 0.114.
const LUMA_SHIFT: u32 = 14;
const LUMA_R: u32 = 4899;
const LUMA_G: u32 = 9617;
const LUMA_B: u32 = 1868;

// ── Border helpers ───────────────────────────────────────────────────────────

fn reflect101(mut i: i64, n: i64) -> usize {
    if n == 1 {
        return 0;
    }
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * (n - 1) - i;
        } else {
            return i as usize;
        }
    }
}

fn replicate(i: i64, n: i64) -> usize {
    i.clamp(0, n - 1) as usize
}

fn saturate_u8(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

// ── Resize ───────────────────────────────────────────────────────────────────

/// Source taps and weights covered by each destination cell.
fn area_weights(src: u32, dst: u32) -> Vec<Vec<(usize, f64)>> {
    let scale = src as f64 / dst as f64;
    (0..dst)
        .map(|d| {
            let start = d as f64 * scale;
            let end = ((d + 1) as f64 * scale).min(src as f64);
            let span = end - start;
            let mut taps = Vec::with_capacity(scale.ceil() as usize + 1);
            let mut s = start.floor() as usize;
            while (s as f64) < end && s < src as usize {
                let lo = start.max(s as f64);
                let hi = end.min((s + 1) as f64);
                if hi - lo > 1e-12 {
                    taps.push((s, (hi - lo) / span));
                }
                s += 1;
            }
            taps
        })
        .collect()
}

/// Area-averaging resize: each output pixel is the overlap-weighted mean of
/// the source pixels its footprint covers.
pub fn resize_area<P>(src: &ImageBuffer<P, Vec<u8>>, width: u32, height: u32) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let channels = P::CHANNEL_COUNT as usize;
    let (sw, sh) = src.dimensions();
    let mut dst = ImageBuffer::<P, Vec<u8>>::new(width, height);
    if sw == 0 || sh == 0 || width == 0 || height == 0 {
        return dst;
    }
    let x_taps = area_weights(sw, width);
    let y_taps = area_weights(sh, height);
    let raw = src.as_raw();
    let (sw, w) = (sw as usize, width as usize);

    // Horizontal pass: sh rows × width columns.
    let mut tmp = vec![0f64; sh as usize * w * channels];
    for y in 0..sh as usize {
        let row = &raw[y * sw * channels..(y + 1) * sw * channels];
        for (dx, taps) in x_taps.iter().enumerate() {
            let out = &mut tmp[(y * w + dx) * channels..(y * w + dx + 1) * channels];
            for &(sx, wt) in taps {
                for (c, o) in out.iter_mut().enumerate() {
                    *o += row[sx * channels + c] as f64 * wt;
                }
            }
        }
    }

    // Vertical pass.
    let buf: &mut [u8] = &mut dst;
    for (dy, taps) in y_taps.iter().enumerate() {
        for dx in 0..w {
            for c in 0..channels {
                let acc: f64 = taps
                    .iter()
                    .map(|&(sy, wt)| tmp[(sy * w + dx) * channels + c] * wt)
                    .sum();
                buf[(dy * w + dx) * channels + c] = saturate_u8(acc);
            }
        }
    }
    dst
}

/// Bicubic (Catmull-Rom) resize, used when enlarging.
pub fn resize_cubic<P>(src: &ImageBuffer<P, Vec<u8>>, width: u32, height: u32) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    imageops::resize(src, width, height, FilterType::CatmullRom)
}

// ── Colour ───────────────────────────────────────────────────────────────────

/// BT.601 luma of an 8-bit RGB buffer, rounded.
pub fn luma_from_rgb(src: &image::RgbImage) -> GrayImage {
    let (w, h) = src.dimensions();
    let mut dst = GrayImage::new(w, h);
    let half = 1u32 << (LUMA_SHIFT - 1);
    for (out, px) in dst.pixels_mut().zip(src.pixels()) {
        let [r, g, b] = px.0;
        let y = (r as u32 * LUMA_R + g as u32 * LUMA_G + b as u32 * LUMA_B + half) >> LUMA_SHIFT;
        *out = Luma([y.min(255) as u8]);
    }
    dst
}

// ── Adaptive threshold ───────────────────────────────────────────────────────

/// Normalised 1-D Gaussian of `size` taps. The sigma is derived from the
/// window size the way scanning toolkits do for "automatic" sigma.
pub fn gaussian_kernel(size: u32) -> Vec<f64> {
    let sigma = 0.3 * ((size as f64 - 1.0) * 0.5 - 1.0) + 0.8;
    let r = (size / 2) as f64;
    let scale = -0.5 / (sigma * sigma);
    let raw: Vec<f64> = (0..size)
        .map(|i| {
            let x = i as f64 - r;
            (scale * x * x).exp()
        })
        .collect();
    let total: f64 = raw.iter().sum();
    raw.into_iter().map(|v| v / total).collect()
}

/// Separable Gaussian blur with replicated borders, rounded to u8.
fn gaussian_blur_replicate(src: &GrayImage, kernel: &[f64]) -> Vec<u8> {
    let (w, h) = (src.width() as usize, src.height() as usize);
    let r = (kernel.len() / 2) as i64;
    let raw = src.as_raw();

    let mut tmp = vec![0f64; w * h];
    for y in 0..h {
        let row = &raw[y * w..(y + 1) * w];
        for x in 0..w {
            tmp[y * w + x] = kernel
                .iter()
                .enumerate()
                .map(|(k, wt)| row[replicate(x as i64 + k as i64 - r, w as i64)] as f64 * wt)
                .sum();
        }
    }

    let mut out = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            let acc: f64 = kernel
                .iter()
                .enumerate()
                .map(|(k, wt)| tmp[replicate(y as i64 + k as i64 - r, h as i64) * w + x] * wt)
                .sum();
            out[y * w + x] = saturate_u8(acc);
        }
    }
    out
}

/// Binarise against a Gaussian-weighted local mean.
///
/// A pixel becomes 255 when it is brighter than `mean - c`, 0 otherwise, so
/// ink darker than its own neighbourhood survives uneven lighting.
pub fn adaptive_threshold_gaussian(src: &GrayImage, block_size: u32, c: i32) -> GrayImage {
    let (w, h) = src.dimensions();
    let mut dst = GrayImage::new(w, h);
    if w == 0 || h == 0 {
        return dst;
    }
    let mean = gaussian_blur_replicate(src, &gaussian_kernel(block_size));
    for ((out, px), m) in dst.pixels_mut().zip(src.pixels()).zip(mean) {
        let v = if px.0[0] as i64 > m as i64 - c as i64 { 255 } else { 0 };
        *out = Luma([v]);
    }
    dst
}

// ── Non-local means ──────────────────────────────────────────────────────────

/// Non-local-means denoising of a grayscale image.
///
/// Each pixel becomes the weighted mean of every pixel in its
/// `search_window²` neighbourhood, weighted by `exp(-d / h²)` where `d` is
/// the mean squared difference between the two `template_window²` patches.
///
/// Patch distances are computed per displacement with a summed-area table,
/// so the cost is `O(w · h · search_window²)` instead of an extra
/// `template_window²` factor.
pub fn denoise_nl_means(src: &GrayImage, h: f32, template_window: u32, search_window: u32) -> GrayImage {
    let (w, hgt) = (src.width() as usize, src.height() as usize);
    if w == 0 || hgt == 0 {
        return src.clone();
    }
    let tr = (template_window / 2) as usize;
    let sr = (search_window / 2) as usize;
    let pad = tr + sr;
    let (pw, ph) = (w + 2 * pad, hgt + 2 * pad);
    let raw = src.as_raw();

    let mut padded = vec![0i32; pw * ph];
    for py in 0..ph {
        let sy = reflect101(py as i64 - pad as i64, hgt as i64);
        for px in 0..pw {
            let sx = reflect101(px as i64 - pad as i64, w as i64);
            padded[py * pw + px] = raw[sy * w + sx] as i32;
        }
    }

    // Weight table indexed by the summed squared patch difference.
    let patch_area = (template_window as f64) * (template_window as f64);
    let h2 = (h as f64) * (h as f64);
    let max_sum = 255.0 * 255.0 * patch_area;
    let cutoff = (-MIN_NLM_WEIGHT.ln() * h2 * patch_area).ceil().min(max_sum) as usize;
    let lut: Vec<f64> = (0..=cutoff)
        .map(|d| {
            let wt = (-(d as f64 / patch_area) / h2).exp();
            if wt < MIN_NLM_WEIGHT {
                0.0
            } else {
                wt
            }
        })
        .collect();

    // Difference map covers every patch row/column: (w + 2tr) × (h + 2tr).
    // Row r of the map is padded row r + sr.
    let (dw, dh) = (w + 2 * tr, hgt + 2 * tr);
    let stride = dw + 1;
    let mut integral = vec![0u64; stride * (dh + 1)];
    let mut sum_w = vec![0f64; w * hgt];
    let mut sum_wp = vec![0f64; w * hgt];
    let side = 2 * sr + 1;

    for oy in 0..side {
        for ox in 0..side {
            for r in 0..dh {
                let base = &padded[(r + sr) * pw + sr..(r + sr) * pw + sr + dw];
                let moved = &padded[(r + oy) * pw + ox..(r + oy) * pw + ox + dw];
                let mut row_acc = 0u64;
                for c in 0..dw {
                    let d = base[c] - moved[c];
                    row_acc += (d * d) as u64;
                    integral[(r + 1) * stride + c + 1] = integral[r * stride + c + 1] + row_acc;
                }
            }

            for y in 0..hgt {
                let (r0, r1) = (y * stride, (y + 2 * tr + 1) * stride);
                let src_row = (y + tr + oy) * pw + tr + ox;
                for x in 0..w {
                    let (c0, c1) = (x, x + 2 * tr + 1);
                    let dist = integral[r1 + c1] + integral[r0 + c0] - integral[r0 + c1] - integral[r1 + c0];
                    let wt = lut.get(dist as usize).copied().unwrap_or(0.0);
                    if wt > 0.0 {
                        let i = y * w + x;
                        sum_w[i] += wt;
                        sum_wp[i] += wt * padded[src_row + x] as f64;
                    }
                }
            }
        }
    }

    let mut dst = GrayImage::new(w as u32, hgt as u32);
    let buf: &mut [u8] = &mut dst;
    for (i, out) in buf.iter_mut().enumerate() {
        // The zero displacement always contributes weight 1.
        *out = if sum_w[i] > 0.0 {
            saturate_u8(sum_wp[i] / sum_w[i])
        } else {
            raw[i]
        };
    }
    dst
}

// ── Convolution ──────────────────────────────────────────────────────────────

/// 3×3 sharpening: `center_weight` at the centre, −1 on the eight neighbours,
/// saturated to 0..=255.
pub fn sharpen3x3(src: &GrayImage, center_weight: i32) -> GrayImage {
    let (w, h) = (src.width() as usize, src.height() as usize);
    let mut dst = GrayImage::new(w as u32, h as u32);
    if w == 0 || h == 0 {
        return dst;
    }
    let raw = src.as_raw();
    let buf: &mut [u8] = &mut dst;
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0i64;
            for ky in -1i64..=1 {
                let sy = reflect101(y as i64 + ky, h as i64);
                for kx in -1i64..=1 {
                    let sx = reflect101(x as i64 + kx, w as i64);
                    let weight = if ky == 0 && kx == 0 { center_weight as i64 } else { -1 };
                    acc += raw[sy * w + sx] as i64 * weight;
                }
            }
            buf[y * w + x] = acc.clamp(0, 255) as u8;
        }
    }
    dst
}

// ── Contrast ─────────────────────────────────────────────────────────────────

/// Scale each pixel's distance from the image mean by `factor`.
///
/// The mean is rounded to the nearest integer first; results are clamped
/// and truncated to u8.
pub fn contrast_about_mean(src: &GrayImage, factor: f32) -> GrayImage {
    let raw = src.as_raw();
    if raw.is_empty() {
        return src.clone();
    }
    let total: u64 = raw.iter().map(|&v| v as u64).sum();
    let mean = (total as f64 / raw.len() as f64 + 0.5).floor() as f32;
    let mut dst = GrayImage::new(src.width(), src.height());
    for (out, px) in dst.pixels_mut().zip(src.pixels()) {
        let v = mean + factor * (px.0[0] as f32 - mean);
        *out = Luma([v.clamp(0.0, 255.0) as u8]);
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn gradient(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| Luma([((x * 7 + y * 13) % 256) as u8]))
    }

    #[test]
    fn reflect101_mirrors_without_repeating_edge() {
        assert_eq!(reflect101(-1, 5), 1);
        assert_eq!(reflect101(-2, 5), 2);
        assert_eq!(reflect101(5, 5), 3);
        assert_eq!(reflect101(6, 5), 2);
        assert_eq!(reflect101(3, 1), 0);
        // Offsets wider than the image bounce more than once.
        assert!(reflect101(-12, 3) < 3);
    }

    #[test]
    fn area_resize_averages_blocks() {
        // 4×2 → 2×1: each output pixel is the mean of a 2×2 block.
        let src = GrayImage::from_raw(4, 2, vec![0, 100, 200, 200, 100, 200, 200, 200]).unwrap();
        let out = resize_area(&src, 2, 1);
        assert_eq!(out.as_raw(), &vec![100, 200]);
    }

    #[test]
    fn area_resize_fractional_ratio_keeps_flat_colour() {
        let src = RgbImage::from_pixel(7, 5, Rgb([10, 120, 240]));
        let out = resize_area(&src, 3, 2);
        assert_eq!(out.dimensions(), (3, 2));
        assert!(out.pixels().all(|p| p.0 == [10, 120, 240]));
    }

    #[test]
    fn luma_weights() {
        let src = RgbImage::from_fn(3, 1, |x, _| match x {
            0 => Rgb([255, 0, 0]),
            1 => Rgb([0, 255, 0]),
            _ => Rgb([0, 0, 255]),
        });
        let out = luma_from_rgb(&src);
        assert_eq!(out.as_raw(), &vec![76, 150, 29]);
        let white = luma_from_rgb(&RgbImage::from_pixel(1, 1, Rgb([255, 255, 255])));
        assert_eq!(white.as_raw(), &vec![255]);
    }

    #[test]
    fn gaussian_kernel_is_normalised_and_symmetric() {
        let k = gaussian_kernel(11);
        assert_eq!(k.len(), 11);
        assert!((k.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        for i in 0..5 {
            assert!((k[i] - k[10 - i]).abs() < 1e-15);
        }
        assert!(k[5] > k[4]);
    }

    #[test]
    fn threshold_flat_image_is_white() {
        // pixel == mean, and mean - 2 < pixel → 255.
        let src = GrayImage::from_pixel(15, 15, Luma([90]));
        let out = adaptive_threshold_gaussian(&src, 11, 2);
        assert!(out.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn threshold_keeps_dark_stroke() {
        let mut src = GrayImage::from_pixel(21, 21, Luma([200]));
        for y in 0..21 {
            src.put_pixel(10, y, Luma([20]));
        }
        let out = adaptive_threshold_gaussian(&src, 11, 2);
        assert_eq!(out.get_pixel(10, 10).0[0], 0);
        assert_eq!(out.get_pixel(2, 10).0[0], 255);
        assert!(out.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    }

    #[test]
    fn threshold_extreme_offsets_do_not_overflow() {
        let src = gradient(6, 6);
        assert!(adaptive_threshold_gaussian(&src, 3, i32::MIN).pixels().all(|p| p.0[0] == 0));
        assert!(adaptive_threshold_gaussian(&src, 3, i32::MAX).pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn nl_means_leaves_flat_image_untouched() {
        let src = GrayImage::from_pixel(12, 9, Luma([255]));
        let out = denoise_nl_means(&src, 10.0, 7, 21);
        assert_eq!(out, src);
    }

    #[test]
    fn nl_means_removes_isolated_speck() {
        let mut src = GrayImage::from_pixel(16, 16, Luma([255]));
        src.put_pixel(8, 8, Luma([0]));
        let out = denoise_nl_means(&src, 10.0, 7, 21);
        // The lone black pixel has no similar patch; it keeps weight 1 from
        // itself, but every neighbour is pulled towards white.
        assert_eq!(out.get_pixel(0, 0).0[0], 255);
        assert_eq!(out.dimensions(), (16, 16));
    }

    #[test]
    fn nl_means_is_deterministic() {
        let src = gradient(20, 14);
        let a = denoise_nl_means(&src, 10.0, 7, 21);
        let b = denoise_nl_means(&src, 10.0, 7, 21);
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn sharpen_flat_image_is_identity() {
        // 9·v − 8·v = v for a flat image.
        let src = GrayImage::from_pixel(5, 5, Luma([77]));
        assert_eq!(sharpen3x3(&src, 9), src);
    }

    #[test]
    fn sharpen_saturates() {
        let mut src = GrayImage::from_pixel(3, 3, Luma([0]));
        src.put_pixel(1, 1, Luma([255]));
        let out = sharpen3x3(&src, 9);
        assert_eq!(out.get_pixel(1, 1).0[0], 255);
        assert_eq!(out.get_pixel(0, 1).0[0], 0);
    }

    #[test]
    fn sharpen_extreme_weights_saturate() {
        let src = gradient(5, 4);
        assert!(sharpen3x3(&src, i32::MAX).pixels().skip(1).all(|p| p.0[0] == 255));
        assert!(sharpen3x3(&src, i32::MIN).pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn contrast_stretches_about_mean() {
        let src = GrayImage::from_raw(2, 1, vec![100, 200]).unwrap();
        // mean 150 → 150 ± 1.5·50
        let out = contrast_about_mean(&src, 1.5);
        assert_eq!(out.as_raw(), &vec![75, 225]);
    }

    #[test]
    fn contrast_clamps() {
        let src = GrayImage::from_raw(2, 1, vec![0, 255]).unwrap();
        let out = contrast_about_mean(&src, 1.5);
        assert_eq!(out.as_raw(), &vec![0, 255]);
    }
}
