use imageproc::{distance_transform::Norm, morphology::open, rect::Rect};
use log::debug;
use logging_timer::time;

use crate::{
    config::GridConfig,
    geometry::inset_rect,
    types::{AnswerRecord, BinaryMask, CanonicalSheet, Size},
};

/// Where a single (question, choice) bubble sits on the canonical sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellGeometry {
    /// 1-based question number.
    pub question: u32,
    /// 0-based choice index, `0` is `A`.
    pub choice: u32,
    /// The whole cell.
    pub bounds: Rect,
    /// The part of the cell that is counted, with the inner margin removed.
    pub sample: Rect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BubbleCell {
    pub geometry: CellGeometry,
    /// Ink pixels inside the sample rect.
    pub fill: u32,
}

/// Outcome of looking at one row of bubbles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowDecision {
    /// One choice clearly dominates.
    Marked(usize),
    /// Something is filled but no single choice dominates.
    Ambiguous,
    /// Nothing reaches the fill threshold.
    Blank,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampledAnswers {
    pub answers: AnswerRecord,
    /// Every cell, row by row, choices left to right.
    pub cells: Vec<BubbleCell>,
    /// Questions that had ink but no dominant choice. They are recorded as
    /// empty in `answers`.
    pub ambiguous: Vec<u32>,
}

/// The letter for a 0-based choice index.
pub fn choice_letter(choice: usize) -> char {
    (b'A' + (choice % 26) as u8) as char
}

/// The area of each column block that holds bubbles, in canonical pixels.
pub fn block_regions(config: &GridConfig, size: Size<u32>) -> Vec<Rect> {
    let (top, bottom) = roi_rows(config, size);
    config
        .columns
        .iter()
        .filter_map(|column| {
            let x0 = (size.width as f32 * column.x_start) as u32;
            let x1 = (size.width as f32 * column.x_end) as u32;
            if x1 <= x0 || bottom <= top {
                return None;
            }
            Some(Rect::at(x0 as i32, top as i32).of_size(x1 - x0, bottom - top))
        })
        .collect()
}

/// Lays out every bubble cell for a sheet of the given size. Questions are
/// numbered from 1 down the first block, then down the next, and so on.
pub fn layout_cells(config: &GridConfig, size: Size<u32>) -> Vec<CellGeometry> {
    let (top, bottom) = roi_rows(config, size);
    let roi_height = bottom.saturating_sub(top);
    let mut cells = Vec::with_capacity((config.question_count() * config.choices) as usize);
    let mut question = 1;

    for column in &config.columns {
        let x0 = (size.width as f32 * column.x_start) as u32;
        let x1 = (size.width as f32 * column.x_end) as u32;
        let block_width = x1.saturating_sub(x0);
        let row_height = roi_height.checked_div(column.questions).unwrap_or(0);

        for row in 0..column.questions {
            let y = top + row * row_height;
            for choice in 0..config.choices {
                let (start, end) = choice_extent(config, block_width, choice);
                let bounds = Rect::at((x0 + start) as i32, y as i32)
                    .of_size(end.saturating_sub(start).max(1), row_height.max(1));
                cells.push(CellGeometry {
                    question,
                    choice,
                    bounds,
                    sample: inset_rect(&bounds, config.inner_margin),
                });
            }
            question += 1;
        }
    }

    cells
}

fn roi_rows(config: &GridConfig, size: Size<u32>) -> (u32, u32) {
    (
        (size.height as f32 * config.roi_top) as u32,
        (size.height as f32 * config.roi_bottom) as u32,
    )
}

/// Horizontal extent of a choice relative to the left edge of its block.
fn choice_extent(config: &GridConfig, block_width: u32, choice: u32) -> (u32, u32) {
    if let Some(span) = config
        .choice_spans
        .as_ref()
        .and_then(|spans| spans.get(choice as usize))
    {
        return (
            (block_width as f32 * span.start) as u32,
            (block_width as f32 * span.end) as u32,
        );
    }
    let width = block_width / config.choices.max(1);
    (choice * width, (choice + 1) * width)
}

/// Decides which choice, if any, a row of fill counts represents.
///
/// A choice is marked only when its count reaches `min_fill`, exceeds the
/// row average by `margin_factor`, and no other choice has the same count.
pub fn decide_row(counts: &[u32], min_fill: u32, margin_factor: f32) -> RowDecision {
    let Some((best, max)) = counts
        .iter()
        .copied()
        .enumerate()
        .fold(None, |acc: Option<(usize, u32)>, (i, count)| match acc {
            Some((_, max)) if max >= count => acc,
            _ => Some((i, count)),
        })
    else {
        return RowDecision::Blank;
    };

    if max < min_fill {
        return RowDecision::Blank;
    }

    let average = counts.iter().map(|&c| c as f64).sum::<f64>() / counts.len() as f64;
    let tied = counts.iter().filter(|&&c| c == max).count() > 1;

    if max as f64 > average * margin_factor as f64 && !tied {
        RowDecision::Marked(best)
    } else {
        RowDecision::Ambiguous
    }
}

/// Counts ink in every bubble of the sheet and decides each question.
#[time]
pub fn sample_answers(sheet: &CanonicalSheet, config: &GridConfig) -> SampledAnswers {
    let normalized;
    let mask = if config.stroke_radius > 0 {
        normalized = BinaryMask::from_image(open(
            sheet.mask().as_image(),
            Norm::LInf,
            config.stroke_radius,
        ));
        &normalized
    } else {
        sheet.mask()
    };

    let cells = layout_cells(config, sheet.size())
        .into_iter()
        .map(|geometry| BubbleCell {
            fill: mask.foreground_count_in(&geometry.sample),
            geometry,
        })
        .collect::<Vec<_>>();

    let mut answers = AnswerRecord::new();
    let mut ambiguous = vec![];

    for row in cells.chunks(config.choices.max(1) as usize) {
        let question = row[0].geometry.question;
        let counts = row.iter().map(|cell| cell.fill).collect::<Vec<_>>();
        let decision = decide_row(&counts, config.min_fill_threshold, config.margin_factor);
        debug!("Q{:>3}: fills {:?} -> {:?}", question, counts, decision);

        match decision {
            RowDecision::Marked(choice) => answers.insert(question, Some(choice_letter(choice))),
            RowDecision::Ambiguous => {
                ambiguous.push(question);
                answers.insert(question, None);
            }
            RowDecision::Blank => answers.insert(question, None),
        }
    }

    debug!(
        "sampled {} questions: {} answered, {} ambiguous",
        answers.len(),
        answers.answered(),
        ambiguous.len()
    );

    SampledAnswers {
        answers,
        cells,
        ambiguous,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::config::{ChoiceSpan, ColumnBlock};

    const SIZE: Size<u32> = Size {
        width: 1000,
        height: 1414,
    };

    fn fill_rect(mask: &mut BinaryMask, rect: &Rect) {
        for y in rect.top()..=rect.bottom() {
            for x in rect.left()..=rect.right() {
                mask.set(x as u32, y as u32, true);
            }
        }
    }

    fn blank_sheet() -> BinaryMask {
        BinaryMask::new(SIZE.width, SIZE.height)
    }

    fn cell_for(cells: &[CellGeometry], question: u32, choice: u32) -> CellGeometry {
        *cells
            .iter()
            .find(|c| c.question == question && c.choice == choice)
            .unwrap()
    }

    #[test]
    fn default_layout_matches_sheet_geometry() {
        let config = GridConfig::default();
        let cells = layout_cells(&config, SIZE);
        assert_eq!(cells.len(), 150);

        // roi is rows 311..1343, 1032 px for 15 questions -> 68 px rows
        let q1a = cell_for(&cells, 1, 0);
        assert_eq!(q1a.bounds, Rect::at(80, 311).of_size(80, 68));
        assert_eq!(q1a.sample, Rect::at(104, 331).of_size(32, 28));

        let q2a = cell_for(&cells, 2, 0);
        assert_eq!(q2a.bounds.top(), 311 + 68);

        // the second block starts numbering at 16
        let q16e = cell_for(&cells, 16, 4);
        assert_eq!(q16e.bounds.left(), 520 + 4 * 80);
        assert_eq!(q16e.bounds.top(), 311);
    }

    #[test]
    fn choice_spans_override_even_split() {
        let config = GridConfig {
            columns: vec![ColumnBlock {
                x_start: 0.0,
                x_end: 0.5,
                questions: 1,
            }],
            choices: 2,
            choice_spans: Some(vec![
                ChoiceSpan {
                    start: 0.1,
                    end: 0.3,
                },
                ChoiceSpan {
                    start: 0.6,
                    end: 0.9,
                },
            ]),
            inner_margin: 0.0,
            ..GridConfig::default()
        };
        let cells = layout_cells(&config, SIZE);
        assert_eq!(cells[0].bounds.left(), 50);
        assert_eq!(cells[0].bounds.width(), 100);
        assert_eq!(cells[1].bounds.left(), 300);
        assert_eq!(cells[1].bounds.width(), 150);
    }

    #[test]
    fn block_regions_cover_the_roi() {
        let regions = block_regions(&GridConfig::default(), SIZE);
        assert_eq!(
            regions,
            vec![
                Rect::at(80, 311).of_size(400, 1032),
                Rect::at(520, 311).of_size(400, 1032),
            ]
        );
    }

    #[test]
    fn decide_row_picks_dominant_choice() {
        assert_eq!(decide_row(&[0, 0, 600, 10, 0], 100, 1.5), RowDecision::Marked(2));
        assert_eq!(decide_row(&[0, 0, 0, 0, 0], 100, 1.5), RowDecision::Blank);
        assert_eq!(decide_row(&[0, 0, 99, 0, 0], 100, 1.5), RowDecision::Blank);
        assert_eq!(decide_row(&[], 100, 1.5), RowDecision::Blank);
    }

    #[test]
    fn decide_row_treats_ties_and_crowded_rows_as_ambiguous() {
        assert_eq!(decide_row(&[500, 500, 0, 0, 0], 100, 1.5), RowDecision::Ambiguous);
        assert_eq!(
            decide_row(&[400, 390, 380, 410, 400], 100, 1.5),
            RowDecision::Ambiguous
        );
    }

    #[test]
    fn blank_sheet_has_only_empty_answers() {
        let sheet = CanonicalSheet::from_mask(blank_sheet(), SIZE).unwrap();
        let sampled = sample_answers(&sheet, &GridConfig::default());
        assert_eq!(sampled.answers.len(), 30);
        assert_eq!(sampled.answers.answered(), 0);
        assert!(sampled.ambiguous.is_empty());
        assert!(sampled.cells.iter().all(|cell| cell.fill == 0));
    }

    #[test]
    fn double_marked_row_is_empty_and_reported() {
        let config = GridConfig::default();
        let cells = layout_cells(&config, SIZE);
        let mut mask = blank_sheet();
        fill_rect(&mut mask, &cell_for(&cells, 4, 1).bounds);
        fill_rect(&mut mask, &cell_for(&cells, 4, 3).bounds);
        let sheet = CanonicalSheet::from_mask(mask, SIZE).unwrap();

        let sampled = sample_answers(&sheet, &config);
        assert_eq!(sampled.answers.get(4), Some(None));
        assert_eq!(sampled.ambiguous, vec![4]);
    }

    #[test]
    fn stroke_normalization_ignores_thin_strokes() {
        let config = GridConfig {
            stroke_radius: 2,
            ..GridConfig::default()
        };
        let cells = layout_cells(&config, SIZE);
        let mut mask = blank_sheet();
        // a filled bubble for Q1 and a one-pixel scribble across Q2's choice A
        fill_rect(&mut mask, &cell_for(&cells, 1, 2).bounds);
        let q2a = cell_for(&cells, 2, 0).bounds;
        for x in q2a.left()..=q2a.right() {
            for y in q2a.top()..=q2a.bottom() {
                if (x + y) % 3 == 0 {
                    mask.set(x as u32, y as u32, true);
                }
            }
        }
        let sheet = CanonicalSheet::from_mask(mask, SIZE).unwrap();

        let sampled = sample_answers(&sheet, &config);
        assert_eq!(sampled.answers.get(1), Some(Some('C')));
        assert_eq!(sampled.answers.get(2), Some(None));
    }

    proptest! {
        #[test]
        fn one_blob_per_row_is_read_back(choices in prop::collection::vec(0u32..5, 30)) {
            let config = GridConfig::default();
            let cells = layout_cells(&config, SIZE);
            let mut mask = blank_sheet();
            for (i, &choice) in choices.iter().enumerate() {
                fill_rect(&mut mask, &cell_for(&cells, i as u32 + 1, choice).sample);
            }
            let sheet = CanonicalSheet::from_mask(mask, SIZE).unwrap();

            let sampled = sample_answers(&sheet, &config);
            for (i, &choice) in choices.iter().enumerate() {
                prop_assert_eq!(
                    sampled.answers.get(i as u32 + 1),
                    Some(Some(choice_letter(choice as usize)))
                );
            }
            prop_assert!(sampled.ambiguous.is_empty());
        }
    }
}
