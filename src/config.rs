//! Calibration values for every stage of the pipeline.
//!
//! All of these are tuned against real sheets rather than derived, so they
//! are plain data: every struct deserializes from JSON with defaults filled
//! in for anything the file leaves out.

use serde::{Deserialize, Serialize};

use crate::types::Size;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be within {min}..={max}, got {value}")]
    OutOfRange {
        name: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },
    #[error("{name} must be greater than zero")]
    NotPositive { name: &'static str },
    #[error("{start_name} ({start}) must be less than {end_name} ({end})")]
    EmptyRange {
        start_name: &'static str,
        start: f32,
        end_name: &'static str,
        end: f32,
    },
    #[error("expected {expected} choice spans, got {actual}")]
    ChoiceSpanCount { expected: usize, actual: usize },
    #[error("at most 26 choices are supported, got {0}")]
    TooManyChoices(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SheetConfig {
    pub canonical_size: Size<u32>,
    pub preprocess: PreprocessConfig,
    pub locator: LocatorConfig,
    pub grid: GridConfig,
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            canonical_size: Size {
                width: 1000,
                height: 1414,
            },
            preprocess: PreprocessConfig::default(),
            locator: LocatorConfig::default(),
            grid: GridConfig::default(),
        }
    }
}

impl SheetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.canonical_size.width == 0 {
            return Err(ConfigError::NotPositive {
                name: "canonicalSize.width",
            });
        }
        if self.canonical_size.height == 0 {
            return Err(ConfigError::NotPositive {
                name: "canonicalSize.height",
            });
        }
        self.preprocess.validate()?;
        self.locator.validate()?;
        self.grid.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreprocessConfig {
    /// Sigma of the noise-suppressing blur.
    pub smoothing_sigma: f32,
    /// Sigma of the Gaussian window used as the local threshold mean.
    pub threshold_sigma: f32,
    /// How much darker than its neighbourhood a pixel must be to count as ink.
    pub threshold_offset: u8,
    /// Radius of the closing applied after thresholding; 0 disables it.
    pub close_radius: u8,
    pub line_removal: Option<LineRemovalConfig>,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self::detection()
    }
}

impl PreprocessConfig {
    /// Keeps corner markers intact; no table-line suppression.
    pub fn detection() -> Self {
        Self {
            smoothing_sigma: 1.1,
            // wide enough that a fully filled bubble stays solid
            threshold_sigma: 10.0,
            threshold_offset: 10,
            close_radius: 1,
            line_removal: None,
        }
    }

    /// Suppresses ruled table lines away from the corners.
    pub fn with_line_removal() -> Self {
        Self {
            line_removal: Some(LineRemovalConfig::default()),
            ..Self::detection()
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.smoothing_sigma > 0.0) {
            return Err(ConfigError::NotPositive {
                name: "preprocess.smoothingSigma",
            });
        }
        if !(self.threshold_sigma > 0.0) {
            return Err(ConfigError::NotPositive {
                name: "preprocess.thresholdSigma",
            });
        }
        if let Some(line_removal) = &self.line_removal {
            check_range(
                "preprocess.lineRemoval.cornerMargin",
                line_removal.corner_margin,
                0.0,
                0.5,
            )?;
            if line_removal.min_line_length == 0 {
                return Err(ConfigError::NotPositive {
                    name: "preprocess.lineRemoval.minLineLength",
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LineRemovalConfig {
    /// Fraction of each dimension around the corners left untouched.
    pub corner_margin: f32,
    /// Shortest ink run treated as a ruled line.
    pub min_line_length: u32,
}

impl Default for LineRemovalConfig {
    fn default() -> Self {
        Self {
            corner_margin: 0.15,
            min_line_length: 40,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocatorConfig {
    pub padding: u32,
    /// Noise floor for marker contour area, in square pixels.
    pub min_marker_area: f32,
    /// Upper bound on marker area as a fraction of the image area.
    pub max_area_fraction: f32,
    /// Polygon approximation tolerance as a fraction of the perimeter.
    pub approx_epsilon: f64,
    pub min_vertices: usize,
    pub max_vertices: usize,
    pub min_aspect: f32,
    pub max_aspect: f32,
    /// How close to two adjoining edges a marker must be, as a fraction of
    /// the image width/height.
    pub corner_proximity: f32,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            padding: 20,
            min_marker_area: 1000.0,
            max_area_fraction: 0.35,
            approx_epsilon: 0.02,
            min_vertices: 4,
            max_vertices: 6,
            min_aspect: 0.6,
            max_aspect: 1.5,
            corner_proximity: 0.15,
        }
    }
}

impl LocatorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "locator.maxAreaFraction",
            self.max_area_fraction,
            0.0,
            1.0,
        )?;
        check_range("locator.cornerProximity", self.corner_proximity, 0.0, 0.5)?;
        if !(self.approx_epsilon > 0.0) {
            return Err(ConfigError::NotPositive {
                name: "locator.approxEpsilon",
            });
        }
        if self.min_vertices > self.max_vertices {
            return Err(ConfigError::EmptyRange {
                start_name: "locator.minVertices",
                start: self.min_vertices as f32,
                end_name: "locator.maxVertices",
                end: self.max_vertices as f32,
            });
        }
        if !(self.min_aspect < self.max_aspect) {
            return Err(ConfigError::EmptyRange {
                start_name: "locator.minAspect",
                start: self.min_aspect,
                end_name: "locator.maxAspect",
                end: self.max_aspect,
            });
        }
        Ok(())
    }
}

/// A vertical strip of the sheet holding a run of consecutive questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnBlock {
    pub x_start: f32,
    pub x_end: f32,
    pub questions: u32,
}

/// Horizontal extent of one choice inside a column block, as fractions of
/// the block width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceSpan {
    pub start: f32,
    pub end: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GridConfig {
    /// Top of the answer area as a fraction of sheet height (skips the header).
    pub roi_top: f32,
    /// Bottom of the answer area as a fraction of sheet height.
    pub roi_bottom: f32,
    pub columns: Vec<ColumnBlock>,
    pub choices: u32,
    /// Per-choice spans; evenly split when absent.
    pub choice_spans: Option<Vec<ChoiceSpan>>,
    /// Fraction trimmed from each side of a cell before counting.
    pub inner_margin: f32,
    pub min_fill_threshold: u32,
    pub margin_factor: f32,
    /// Radius of an opening applied before counting; 0 disables it.
    pub stroke_radius: u8,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            roi_top: 0.22,
            roi_bottom: 0.95,
            columns: vec![
                ColumnBlock {
                    x_start: 0.08,
                    x_end: 0.48,
                    questions: 15,
                },
                ColumnBlock {
                    x_start: 0.52,
                    x_end: 0.92,
                    questions: 15,
                },
            ],
            choices: 5,
            choice_spans: None,
            inner_margin: 0.3,
            min_fill_threshold: 100,
            margin_factor: 1.5,
            stroke_radius: 0,
        }
    }
}

impl GridConfig {
    pub fn question_count(&self) -> u32 {
        self.columns.iter().map(|c| c.questions).sum()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_range("grid.roiTop", self.roi_top, 0.0, 1.0)?;
        check_range("grid.roiBottom", self.roi_bottom, 0.0, 1.0)?;
        if !(self.roi_top < self.roi_bottom) {
            return Err(ConfigError::EmptyRange {
                start_name: "grid.roiTop",
                start: self.roi_top,
                end_name: "grid.roiBottom",
                end: self.roi_bottom,
            });
        }
        if self.choices == 0 {
            return Err(ConfigError::NotPositive {
                name: "grid.choices",
            });
        }
        if self.choices > 26 {
            return Err(ConfigError::TooManyChoices(self.choices));
        }
        if self.question_count() == 0 {
            return Err(ConfigError::NotPositive {
                name: "grid.columns[].questions",
            });
        }
        for column in &self.columns {
            check_range("grid.columns[].xStart", column.x_start, 0.0, 1.0)?;
            check_range("grid.columns[].xEnd", column.x_end, 0.0, 1.0)?;
            if !(column.x_start < column.x_end) {
                return Err(ConfigError::EmptyRange {
                    start_name: "grid.columns[].xStart",
                    start: column.x_start,
                    end_name: "grid.columns[].xEnd",
                    end: column.x_end,
                });
            }
        }
        if let Some(spans) = &self.choice_spans {
            if spans.len() != self.choices as usize {
                return Err(ConfigError::ChoiceSpanCount {
                    expected: self.choices as usize,
                    actual: spans.len(),
                });
            }
            for span in spans {
                check_range("grid.choiceSpans[].start", span.start, 0.0, 1.0)?;
                check_range("grid.choiceSpans[].end", span.end, 0.0, 1.0)?;
                if !(span.start < span.end) {
                    return Err(ConfigError::EmptyRange {
                        start_name: "grid.choiceSpans[].start",
                        start: span.start,
                        end_name: "grid.choiceSpans[].end",
                        end: span.end,
                    });
                }
            }
        }
        check_range("grid.innerMargin", self.inner_margin, 0.0, 0.49)?;
        if !(self.margin_factor > 0.0) {
            return Err(ConfigError::NotPositive {
                name: "grid.marginFactor",
            });
        }
        Ok(())
    }
}

fn check_range(name: &'static str, value: f32, min: f32, max: f32) -> Result<(), ConfigError> {
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            min,
            max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SheetConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.grid.question_count(), 30);
        assert_eq!(config.canonical_size.width, 1000);
        assert_eq!(config.canonical_size.height, 1414);
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let config: SheetConfig = serde_json::from_str(
            r#"{
                "grid": { "minFillThreshold": 250, "choices": 4 },
                "preprocess": { "lineRemoval": { "minLineLength": 60 } }
            }"#,
        )
        .unwrap();

        assert_eq!(config.grid.min_fill_threshold, 250);
        assert_eq!(config.grid.choices, 4);
        assert_eq!(config.grid.margin_factor, 1.5);
        assert_eq!(config.grid.columns.len(), 2);
        let line_removal = config.preprocess.line_removal.unwrap();
        assert_eq!(line_removal.min_line_length, 60);
        assert_eq!(line_removal.corner_margin, 0.15);
        assert_eq!(config.locator, LocatorConfig::default());
    }

    #[test]
    fn rejects_inverted_roi() {
        let mut config = SheetConfig::default();
        config.grid.roi_top = 0.9;
        config.grid.roi_bottom = 0.2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyRange {
                start_name: "grid.roiTop",
                ..
            })
        ));
    }

    #[test]
    fn rejects_mismatched_choice_spans() {
        let mut config = SheetConfig::default();
        config.grid.choice_spans = Some(vec![ChoiceSpan {
            start: 0.0,
            end: 0.5,
        }]);
        assert_eq!(
            config.validate(),
            Err(ConfigError::ChoiceSpanCount {
                expected: 5,
                actual: 1
            })
        );
    }

    #[test]
    fn rejects_non_positive_sigma() {
        let mut config = SheetConfig::default();
        config.preprocess.smoothing_sigma = 0.0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::NotPositive {
                name: "preprocess.smoothingSigma"
            })
        );
    }

    #[test]
    fn line_removal_profile_keeps_detection_thresholds() {
        let profile = PreprocessConfig::with_line_removal();
        assert_eq!(profile.threshold_offset, 10);
        assert_eq!(profile.line_removal, Some(LineRemovalConfig::default()));
    }
}
