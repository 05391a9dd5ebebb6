use image::DynamicImage;
use imageproc::point::Point;
use log::info;
use logging_timer::time;
use rayon::prelude::*;
use serde::Serialize;

use crate::{
    bubbles::{sample_answers, BubbleCell},
    config::{ConfigError, SheetConfig},
    debug::SheetObserver,
    grading::{grade_answers, AnswerKey, GradeReport},
    locate::{find_marker_candidates, locate_from_candidates, LocateError},
    preprocess::preprocess,
    types::AnswerRecord,
};

/// Where in the pipeline a sheet failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Input,
    Configuration,
    Localization,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum InterpretError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error(transparent)]
    Locate(#[from] LocateError),
}

impl InterpretError {
    pub fn stage(&self) -> Stage {
        match self {
            InterpretError::InvalidImage(_) => Stage::Input,
            InterpretError::InvalidConfig(_) => Stage::Configuration,
            InterpretError::Locate(_) => Stage::Localization,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InterpretedSheet {
    pub answers: AnswerRecord,
    /// Questions with ink but no dominant choice.
    pub ambiguous: Vec<u32>,
    pub cells: Vec<BubbleCell>,
    /// Corner marker centroids in the input image, TL, TR, BR, BL.
    pub corners: [Point<f32>; 4],
}

#[derive(Debug, Clone)]
pub struct GradedSheet {
    pub sheet: InterpretedSheet,
    pub report: GradeReport,
}

/// Reads the answers off a single photographed or scanned sheet.
#[time]
pub fn interpret_sheet(
    image: &DynamicImage,
    config: &SheetConfig,
    observer: &dyn SheetObserver,
) -> Result<InterpretedSheet, InterpretError> {
    config.validate()?;

    if image.width() == 0 || image.height() == 0 {
        return Err(InterpretError::InvalidImage(format!(
            "image has no pixels ({}x{})",
            image.width(),
            image.height()
        )));
    }

    let mask = preprocess(image, &config.preprocess);
    observer.on_mask(&mask);

    let candidates = find_marker_candidates(&mask, &config.locator);
    observer.on_markers(&mask, &candidates);

    let located = locate_from_candidates(&mask, candidates, config.canonical_size)?;
    observer.on_canonical(&located);

    let sampled = sample_answers(&located.sheet, &config.grid);
    observer.on_cells(&located.sheet, &config.grid, &sampled);

    info!(
        "read {} of {} questions ({} ambiguous)",
        sampled.answers.answered(),
        sampled.answers.len(),
        sampled.ambiguous.len()
    );

    Ok(InterpretedSheet {
        answers: sampled.answers,
        ambiguous: sampled.ambiguous,
        cells: sampled.cells,
        corners: located.corners,
    })
}

/// Reads a sheet and grades it against `key`.
pub fn grade_sheet(
    image: &DynamicImage,
    config: &SheetConfig,
    key: &AnswerKey,
    observer: &dyn SheetObserver,
) -> Result<GradedSheet, InterpretError> {
    let sheet = interpret_sheet(image, config, observer)?;
    let report = grade_answers(&sheet.answers, key);
    info!(
        "score {:.2} ({}/{} correct)",
        report.summary.score, report.summary.correct, report.summary.total
    );
    Ok(GradedSheet { sheet, report })
}

/// Grades many sheets in parallel. Results are in the same order as
/// `images`; one failing sheet does not affect the others.
#[time]
pub fn grade_sheet_batch<O>(
    images: &[DynamicImage],
    config: &SheetConfig,
    key: &AnswerKey,
    observer: &O,
) -> Vec<Result<GradedSheet, InterpretError>>
where
    O: SheetObserver + Sync,
{
    images
        .par_iter()
        .map(|image| grade_sheet(image, config, key, observer))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use image::{GrayImage, Luma};

    use super::*;
    use crate::{
        debug::NoopObserver,
        locate::{FiducialMarker, LocatedSheet},
        types::{BinaryMask, Zone},
    };

    fn blank_paper(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([255])))
    }

    #[derive(Default)]
    struct CountingObserver {
        masks: AtomicUsize,
        candidates: AtomicUsize,
        canonical: AtomicUsize,
    }

    impl SheetObserver for CountingObserver {
        fn on_mask(&self, _mask: &BinaryMask) {
            self.masks.fetch_add(1, Ordering::SeqCst);
        }

        fn on_markers(&self, _mask: &BinaryMask, candidates: &[FiducialMarker]) {
            self.candidates.fetch_add(candidates.len(), Ordering::SeqCst);
        }

        fn on_canonical(&self, _located: &LocatedSheet) {
            self.canonical.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn empty_image_is_an_input_error() {
        let err = interpret_sheet(
            &DynamicImage::ImageLuma8(GrayImage::new(0, 0)),
            &SheetConfig::default(),
            &NoopObserver,
        )
        .unwrap_err();
        assert!(matches!(err, InterpretError::InvalidImage(_)));
        assert_eq!(err.stage(), Stage::Input);
    }

    #[test]
    fn invalid_config_is_rejected_before_processing() {
        let mut config = SheetConfig::default();
        config.grid.choices = 0;
        let observer = CountingObserver::default();
        let err = interpret_sheet(&blank_paper(100, 100), &config, &observer).unwrap_err();
        assert_eq!(err.stage(), Stage::Configuration);
        assert_eq!(observer.masks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn blank_paper_has_no_markers() {
        let observer = CountingObserver::default();
        let err =
            interpret_sheet(&blank_paper(400, 560), &SheetConfig::default(), &observer).unwrap_err();
        assert_eq!(
            err,
            InterpretError::Locate(LocateError::MarkerNotFound {
                missing: Zone::ALL.to_vec()
            })
        );
        assert_eq!(err.stage(), Stage::Localization);
        assert_eq!(
            err.to_string(),
            "corner marker not found in zone(s): TL, TR, BR, BL"
        );
        assert_eq!(observer.masks.load(Ordering::SeqCst), 1);
        assert_eq!(observer.candidates.load(Ordering::SeqCst), 0);
        assert_eq!(observer.canonical.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn degenerate_markers_fail_at_localization() {
        let corner = Point::new(5.0, 5.0);
        let err = InterpretError::from(LocateError::DegenerateQuad {
            corners: [corner; 4],
        });
        assert_eq!(err.stage(), Stage::Localization);
        assert!(err.to_string().contains("usable quadrilateral"));
    }

    #[test]
    fn batch_keeps_order_and_isolates_failures() {
        let images = vec![
            blank_paper(200, 280),
            DynamicImage::ImageLuma8(GrayImage::new(0, 0)),
            blank_paper(300, 420),
        ];
        let key = AnswerKey::from_letters("ABC".chars());
        let observer = CountingObserver::default();
        let results = grade_sheet_batch(&images, &SheetConfig::default(), &key, &observer);

        let stages = results
            .iter()
            .map(|r| r.as_ref().map_err(|e| e.stage()).err())
            .collect::<Vec<_>>();
        assert_eq!(
            stages,
            vec![
                Some(Stage::Localization),
                Some(Stage::Input),
                Some(Stage::Localization)
            ]
        );
        assert_eq!(observer.masks.load(Ordering::SeqCst), 2);
    }
}
