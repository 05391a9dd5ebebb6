use std::collections::BTreeMap;
use std::fmt::Display;

use image::{GrayImage, Luma};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

use crate::image_utils::{count_pixels, count_pixels_in_rect, BACKGROUND, FOREGROUND};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size<T> {
    pub width: T,
    pub height: T,
}

/// One of the four corners of a sheet, named from the viewer's point of view.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Zone {
    #[serde(rename = "TL")]
    TopLeft,
    #[serde(rename = "TR")]
    TopRight,
    #[serde(rename = "BR")]
    BottomRight,
    #[serde(rename = "BL")]
    BottomLeft,
}

impl Zone {
    pub const ALL: [Zone; 4] = [
        Zone::TopLeft,
        Zone::TopRight,
        Zone::BottomRight,
        Zone::BottomLeft,
    ];

    /// Picks the zone for a point given the midpoint of the image.
    pub fn for_point(x: f32, y: f32, mid_x: f32, mid_y: f32) -> Self {
        match (x < mid_x, y < mid_y) {
            (true, true) => Zone::TopLeft,
            (false, true) => Zone::TopRight,
            (false, false) => Zone::BottomRight,
            (true, false) => Zone::BottomLeft,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Zone::TopLeft => 0,
            Zone::TopRight => 1,
            Zone::BottomRight => 2,
            Zone::BottomLeft => 3,
        }
    }
}

impl Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Zone::TopLeft => "TL",
            Zone::TopRight => "TR",
            Zone::BottomRight => "BR",
            Zone::BottomLeft => "BL",
        };
        write!(f, "{}", name)
    }
}

/// An ink/background image. Pixels are either [`FOREGROUND`] (ink) or
/// [`BACKGROUND`], nothing in between.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryMask(GrayImage);

impl BinaryMask {
    /// Creates an all-background mask.
    pub fn new(width: u32, height: u32) -> Self {
        Self(GrayImage::from_pixel(width, height, BACKGROUND))
    }

    /// Wraps an image, treating every non-zero pixel as ink.
    pub fn from_image(mut img: GrayImage) -> Self {
        for pixel in img.pixels_mut() {
            if pixel.0[0] != 0 {
                *pixel = FOREGROUND;
            }
        }
        Self(img)
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    pub fn is_foreground(&self, x: u32, y: u32) -> bool {
        *self.0.get_pixel(x, y) == FOREGROUND
    }

    pub fn set(&mut self, x: u32, y: u32, foreground: bool) {
        let value: Luma<u8> = if foreground { FOREGROUND } else { BACKGROUND };
        self.0.put_pixel(x, y, value);
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.0
    }

    pub fn foreground_count(&self) -> u32 {
        count_pixels(&self.0, &FOREGROUND)
    }

    /// Counts ink pixels inside `rect`, clipped to the mask.
    pub fn foreground_count_in(&self, rect: &Rect) -> u32 {
        count_pixels_in_rect(&self.0, rect, &FOREGROUND)
    }

    /// Fraction of the mask that is ink. An empty mask has no ink.
    pub fn foreground_ratio(&self) -> f32 {
        let total = self.0.width() as u64 * self.0.height() as u64;
        if total == 0 {
            return 0.0;
        }
        self.foreground_count() as f32 / total as f32
    }

    /// Swaps ink and background.
    pub fn invert(&mut self) {
        image::imageops::invert(&mut self.0);
    }
}

/// A rectified sheet. Its dimensions always equal the configured canonical
/// size, so bubble geometry is the same for every sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalSheet {
    mask: BinaryMask,
}

impl CanonicalSheet {
    /// Wraps `mask` as a canonical sheet, or returns `None` if it is not
    /// exactly `size`.
    pub fn from_mask(mask: BinaryMask, size: Size<u32>) -> Option<Self> {
        if mask.dimensions() != (size.width, size.height) {
            return None;
        }
        Some(Self { mask })
    }

    /// Wraps warp output, which is allocated at the canonical size.
    pub(crate) fn from_warped(mask: BinaryMask) -> Self {
        Self { mask }
    }

    pub fn size(&self) -> Size<u32> {
        Size {
            width: self.mask.width(),
            height: self.mask.height(),
        }
    }

    pub fn mask(&self) -> &BinaryMask {
        &self.mask
    }
}

/// Rendering of an unanswered question in text output.
pub const EMPTY_MARK: &str = "-";

/// Parses a single answer letter. Blank strings and [`EMPTY_MARK`] mean no
/// answer; letters are normalized to upper case.
pub fn parse_answer(s: &str) -> Result<Option<char>, String> {
    let s = s.trim();
    if s.is_empty() || s == EMPTY_MARK {
        return Ok(None);
    }
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => Ok(Some(c.to_ascii_uppercase())),
        _ => Err(format!("invalid answer {:?}, expected a single letter", s)),
    }
}

/// The choice detected for each question, or `None` where nothing was
/// clearly marked. Questions are numbered from 1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<u32, Option<String>>")]
pub struct AnswerRecord(BTreeMap<u32, Option<char>>);

impl AnswerRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, question: u32, answer: Option<char>) {
        self.0.insert(question, answer);
    }

    /// `None` if the question is not in the record at all, `Some(None)` if it
    /// was left empty.
    pub fn get(&self, question: u32) -> Option<Option<char>> {
        self.0.get(&question).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, Option<char>)> + '_ {
        self.0.iter().map(|(q, a)| (*q, *a))
    }

    pub fn answered(&self) -> usize {
        self.0.values().filter(|a| a.is_some()).count()
    }
}

impl TryFrom<BTreeMap<u32, Option<String>>> for AnswerRecord {
    type Error = String;

    fn try_from(raw: BTreeMap<u32, Option<String>>) -> Result<Self, Self::Error> {
        let mut record = AnswerRecord::new();
        for (question, answer) in raw {
            let answer = match answer {
                Some(s) => parse_answer(&s)?,
                None => None,
            };
            record.insert(question, answer);
        }
        Ok(record)
    }
}

impl FromIterator<(u32, Option<char>)> for AnswerRecord {
    fn from_iter<I: IntoIterator<Item = (u32, Option<char>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
