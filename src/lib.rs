//! Reads filled-in multiple-choice answer sheets from photos or scans.
//!
//! A sheet goes through four stages: [`preprocess`] turns the image into an
//! ink mask, [`locate`] finds the four corner markers and rectifies the sheet,
//! [`bubbles`] reads one answer per question off the rectified grid, and
//! [`grading`] compares those answers with a key. [`interpret`] ties them
//! together.

pub mod bubbles;
pub mod config;
pub mod debug;
pub mod geometry;
pub mod grading;
pub mod homography;
pub mod image_utils;
pub mod interpret;
pub mod locate;
pub mod preprocess;
pub mod types;

pub use config::SheetConfig;
pub use debug::{ImageDebugWriter, NoopObserver, SheetObserver};
pub use grading::{AnswerKey, GradeReport};
pub use interpret::{
    grade_sheet, grade_sheet_batch, interpret_sheet, GradedSheet, InterpretError,
    InterpretedSheet, Stage,
};
pub use types::AnswerRecord;
