use image::{DynamicImage, GrayImage};
use imageproc::{distance_transform::Norm, filter::gaussian_blur_f32, morphology::close};
use log::debug;
use logging_timer::time;

use crate::{
    config::{LineRemovalConfig, PreprocessConfig},
    types::BinaryMask,
};

/// Binarizes a decoded image into an ink mask of the same size.
#[time]
pub fn preprocess(image: &DynamicImage, config: &PreprocessConfig) -> BinaryMask {
    preprocess_gray(&image.to_luma8(), config)
}

/// Same as [`preprocess`] for an image that is already grayscale.
pub fn preprocess_gray(gray: &GrayImage, config: &PreprocessConfig) -> BinaryMask {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return BinaryMask::new(width, height);
    }

    let smoothed = gaussian_blur_f32(gray, config.smoothing_sigma);
    let mut mask = adaptive_threshold(&smoothed, config.threshold_sigma, config.threshold_offset);

    if let Some(line_removal) = &config.line_removal {
        mask = remove_lines(&mask, line_removal);
    }

    if config.close_radius > 0 {
        mask = BinaryMask::from_image(close(mask.as_image(), Norm::LInf, config.close_radius));
    }

    normalize_polarity(&mut mask);
    mask
}

/// Marks a pixel as ink when it is at least `offset` darker than the
/// Gaussian-weighted mean of its neighbourhood.
pub fn adaptive_threshold(img: &GrayImage, sigma: f32, offset: u8) -> BinaryMask {
    let local_mean = gaussian_blur_f32(img, sigma);
    let mut mask = BinaryMask::new(img.width(), img.height());
    for (x, y, pixel) in img.enumerate_pixels() {
        let threshold = local_mean.get_pixel(x, y).0[0] as i16 - offset as i16;
        if pixel.0[0] as i16 <= threshold {
            mask.set(x, y, true);
        }
    }
    mask
}

/// Removes long horizontal and vertical ink runs from the centre of the
/// mask. A margin around every corner is left alone so corner markers are
/// never touched.
pub fn remove_lines(mask: &BinaryMask, config: &LineRemovalConfig) -> BinaryMask {
    let (width, height) = mask.dimensions();
    let margin_w = (width as f32 * config.corner_margin) as u32;
    let margin_h = (height as f32 * config.corner_margin) as u32;
    if width <= margin_w * 2 || height <= margin_h * 2 {
        return mask.clone();
    }

    let (x_start, x_end) = (margin_w, width - margin_w);
    let (y_start, y_end) = (margin_h, height - margin_h);
    let mut lines = BinaryMask::new(width, height);

    for y in y_start..y_end {
        for_each_long_run(
            x_start,
            x_end,
            config.min_line_length,
            |x| mask.is_foreground(x, y),
            |x| lines.set(x, y, true),
        );
    }

    for x in x_start..x_end {
        for_each_long_run(
            y_start,
            y_end,
            config.min_line_length,
            |y| mask.is_foreground(x, y),
            |y| lines.set(x, y, true),
        );
    }

    let removed = lines.foreground_count();
    debug!(
        "line removal cleared {} pixels inside x={}..{} y={}..{}",
        removed, x_start, x_end, y_start, y_end
    );

    let mut out = mask.clone();
    for (x, y, pixel) in lines.as_image().enumerate_pixels() {
        if pixel.0[0] != 0 {
            out.set(x, y, false);
        }
    }
    out
}

/// Calls `mark` for every index of each ink run in `start..end` that is at
/// least `min_len` long. This is a morphological opening with a line-shaped
/// structuring element, restricted to the range.
fn for_each_long_run(
    start: u32,
    end: u32,
    min_len: u32,
    is_ink: impl Fn(u32) -> bool,
    mut mark: impl FnMut(u32),
) {
    let mut run_start = None;
    for i in start..=end {
        let ink = i < end && is_ink(i);
        match (ink, run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(s)) => {
                if i - s >= min_len {
                    (s..i).for_each(&mut mark);
                }
                run_start = None;
            }
            _ => {}
        }
    }
}

/// Makes sure ink is the minority. Returns whether the mask was inverted.
pub fn normalize_polarity(mask: &mut BinaryMask) -> bool {
    let ratio = mask.foreground_ratio();
    if ratio > 0.5 {
        debug!("mask is {:.1}% ink, inverting", ratio * 100.0);
        mask.invert();
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use image::{Luma, Rgb, RgbImage};
    use imageproc::{drawing::draw_filled_rect_mut, rect::Rect};

    use super::*;

    fn paper_with_square() -> GrayImage {
        let mut img = GrayImage::from_pixel(100, 100, Luma([255]));
        draw_filled_rect_mut(&mut img, Rect::at(35, 35).of_size(30, 30), Luma([0]));
        img
    }

    #[test]
    fn dark_square_is_solid_ink() {
        let mask = preprocess_gray(&paper_with_square(), &PreprocessConfig::detection());
        assert_eq!(mask.dimensions(), (100, 100));
        assert!(mask.is_foreground(36, 50));
        assert!(mask.is_foreground(50, 37));
        // the middle of a filled shape stays ink, not just its outline
        assert!(mask.is_foreground(50, 50));
        assert_eq!(mask.foreground_count_in(&Rect::at(40, 40).of_size(20, 20)), 400);
        assert!(!mask.is_foreground(5, 5));
        assert!(!mask.is_foreground(95, 95));
        assert!(mask.foreground_ratio() < 0.5);
    }

    #[test]
    fn color_input_is_accepted() {
        let mut img = RgbImage::from_pixel(60, 60, Rgb([250, 240, 230]));
        for y in 20..40 {
            for x in 20..40 {
                img.put_pixel(x, y, Rgb([10, 10, 40]));
            }
        }
        let mask = preprocess(&DynamicImage::ImageRgb8(img), &PreprocessConfig::detection());
        assert_eq!(mask.dimensions(), (60, 60));
        assert!(mask.is_foreground(21, 30));
        assert!(!mask.is_foreground(2, 2));
    }

    #[test]
    fn uniform_image_has_no_ink() {
        let img = GrayImage::from_pixel(40, 30, Luma([128]));
        let mask = preprocess_gray(&img, &PreprocessConfig::detection());
        assert_eq!(mask.foreground_count(), 0);
    }

    #[test]
    fn flat_image_never_ends_up_mostly_ink() {
        let img = GrayImage::from_pixel(40, 30, Luma([128]));
        let config = PreprocessConfig {
            threshold_offset: 0,
            close_radius: 0,
            ..PreprocessConfig::detection()
        };
        let mask = preprocess_gray(&img, &config);
        assert_eq!(mask.foreground_count(), 0);
    }

    #[test]
    fn empty_image_yields_empty_mask() {
        let mask = preprocess_gray(&GrayImage::new(0, 0), &PreprocessConfig::detection());
        assert_eq!(mask.dimensions(), (0, 0));
    }

    #[test]
    fn normalize_polarity_inverts_majority_ink() {
        let mut mask = BinaryMask::new(10, 10);
        for y in 0..10 {
            for x in 0..7 {
                mask.set(x, y, true);
            }
        }
        assert!(normalize_polarity(&mut mask));
        assert_eq!(mask.foreground_count(), 30);
        assert!(!normalize_polarity(&mut mask));
    }

    #[test]
    fn remove_lines_spares_corners_and_short_marks() {
        let mut mask = BinaryMask::new(200, 200);
        // table line through the centre
        for x in 0..200 {
            mask.set(x, 100, true);
        }
        // vertical rule
        for y in 5..195 {
            mask.set(120, y, true);
        }
        // corner marker
        for y in 5..25 {
            for x in 5..25 {
                mask.set(x, y, true);
            }
        }
        // a filled bubble in the centre
        for y in 60..70 {
            for x in 60..72 {
                mask.set(x, y, true);
            }
        }

        let cleaned = remove_lines(&mask, &LineRemovalConfig::default());

        assert!(!cleaned.is_foreground(100, 100));
        assert!(!cleaned.is_foreground(120, 80));
        // outside the protected centre the line survives
        assert!(cleaned.is_foreground(10, 100));
        assert!(cleaned.is_foreground(120, 10));
        assert!(cleaned.is_foreground(15, 15));
        assert!(cleaned.is_foreground(65, 65));
    }
}
