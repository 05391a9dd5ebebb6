use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_cross_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use log::{debug, warn};

use crate::{
    bubbles::{block_regions, choice_letter, BubbleCell, SampledAnswers},
    config::GridConfig,
    image_utils::{BLUE, CYAN, DARK_BLUE, GREEN, ORANGE, PINK, RED},
    locate::{FiducialMarker, LocatedSheet},
    types::{BinaryMask, CanonicalSheet, Size},
};

/// Receives intermediate results as a sheet moves through the pipeline.
/// Every method does nothing by default.
pub trait SheetObserver {
    fn on_mask(&self, _mask: &BinaryMask) {}
    fn on_markers(&self, _mask: &BinaryMask, _candidates: &[FiducialMarker]) {}
    fn on_canonical(&self, _located: &LocatedSheet) {}
    fn on_cells(&self, _sheet: &CanonicalSheet, _grid: &GridConfig, _sampled: &SampledAnswers) {}
}

pub struct NoopObserver;

impl SheetObserver for NoopObserver {}

/// Creates a path for a debug image.
pub fn debug_image_path(base: &Path, label: &str) -> PathBuf {
    let mut result = PathBuf::from(base);
    result.set_file_name(format!(
        "{}_debug_{}.png",
        base.file_stem().unwrap_or_default().to_string_lossy(),
        label
    ));
    result
}

/// Writes a PNG next to the input image for each pipeline stage.
pub struct ImageDebugWriter {
    input_path: Option<PathBuf>,
}

impl ImageDebugWriter {
    pub fn new(input_path: PathBuf) -> Self {
        Self {
            input_path: Some(input_path),
        }
    }

    pub fn disabled() -> Self {
        Self { input_path: None }
    }

    /// Draws on a colour copy of `base` and saves it as `label`. Failures to
    /// save are logged and otherwise ignored.
    pub fn write(&self, label: &str, base: &GrayImage, draw: impl FnOnce(&mut RgbImage)) {
        let Some(input_path) = &self.input_path else {
            return;
        };

        let mut canvas = DynamicImage::ImageLuma8(base.clone()).into_rgb8();
        draw(&mut canvas);

        let path = debug_image_path(input_path, label);
        match canvas.save(&path) {
            Ok(()) => debug!("wrote debug image {}", path.display()),
            Err(e) => warn!("failed to write debug image {}: {}", path.display(), e),
        }
    }
}

impl SheetObserver for ImageDebugWriter {
    fn on_mask(&self, mask: &BinaryMask) {
        self.write("mask", mask.as_image(), |_| {});
    }

    fn on_markers(&self, mask: &BinaryMask, candidates: &[FiducialMarker]) {
        self.write("markers", mask.as_image(), |canvas| {
            draw_marker_candidates_debug_image_mut(canvas, candidates);
        });
    }

    fn on_canonical(&self, located: &LocatedSheet) {
        self.write("canonical", located.sheet.mask().as_image(), |_| {});
    }

    fn on_cells(&self, sheet: &CanonicalSheet, grid: &GridConfig, sampled: &SampledAnswers) {
        self.write("grid", sheet.mask().as_image(), |canvas| {
            draw_grid_debug_image_mut(canvas, grid, sampled);
        });
    }
}

/// Outlines every marker candidate and marks its centroid.
pub fn draw_marker_candidates_debug_image_mut(
    canvas: &mut RgbImage,
    candidates: &[FiducialMarker],
) {
    for candidate in candidates {
        draw_hollow_rect_mut(canvas, candidate.bounds, GREEN);

        let polygon = &candidate.polygon;
        for (i, start) in polygon.iter().enumerate() {
            let end = polygon[(i + 1) % polygon.len()];
            draw_line_segment_mut(
                canvas,
                (start.x as f32, start.y as f32),
                (end.x as f32, end.y as f32),
                BLUE,
            );
        }

        draw_cross_mut(
            canvas,
            RED,
            candidate.centroid.x.round() as i32,
            candidate.centroid.y.round() as i32,
        );
    }
}

/// Outlines the answer blocks and every bubble cell. Sample rects of marked
/// answers are green, ambiguous rows orange, everything else dark blue.
pub fn draw_grid_debug_image_mut(
    canvas: &mut RgbImage,
    grid: &GridConfig,
    sampled: &SampledAnswers,
) {
    let size = Size {
        width: canvas.width(),
        height: canvas.height(),
    };
    for region in block_regions(grid, size) {
        draw_hollow_rect_mut(canvas, region, CYAN);
    }

    for cell in &sampled.cells {
        draw_hollow_rect_mut(canvas, cell.geometry.bounds, PINK);
        draw_hollow_rect_mut(canvas, cell.geometry.sample, sample_color(cell, sampled));
    }
}

fn sample_color(cell: &BubbleCell, sampled: &SampledAnswers) -> Rgb<u8> {
    let answer = sampled.answers.get(cell.geometry.question).flatten();
    if answer == Some(choice_letter(cell.geometry.choice as usize)) {
        GREEN
    } else if sampled.ambiguous.contains(&cell.geometry.question) {
        ORANGE
    } else {
        DARK_BLUE
    }
}
