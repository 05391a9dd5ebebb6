use std::collections::BTreeMap;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::types::{parse_answer, AnswerRecord};

/// The expected letter for each question, numbered from 1. The key decides
/// how many questions a sheet is graded on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AnswerKeyFile")]
pub struct AnswerKey(BTreeMap<u32, char>);

/// Key files are either `{"1": "A", "2": "C"}` or `["A", "C"]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum AnswerKeyFile {
    // keys stay strings here: untagged buffering does not parse numeric map keys
    Map(BTreeMap<String, String>),
    List(Vec<String>),
}

impl TryFrom<AnswerKeyFile> for AnswerKey {
    type Error = String;

    fn try_from(file: AnswerKeyFile) -> Result<Self, Self::Error> {
        let entries = match file {
            AnswerKeyFile::Map(map) => map
                .into_iter()
                .map(|(question, answer)| {
                    let question = question
                        .trim()
                        .parse::<u32>()
                        .map_err(|_| format!("invalid question number {:?}", question))?;
                    Ok((question, answer))
                })
                .collect::<Result<Vec<_>, String>>()?,
            AnswerKeyFile::List(list) => (1..).zip(list).collect(),
        };

        let mut key = BTreeMap::new();
        for (question, answer) in entries {
            if question == 0 {
                return Err("question numbers start at 1".to_string());
            }
            match parse_answer(&answer)? {
                Some(letter) => {
                    key.insert(question, letter);
                }
                None => return Err(format!("question {} has no expected answer", question)),
            }
        }
        Ok(AnswerKey(key))
    }
}

impl AnswerKey {
    /// Builds a key from letters for questions 1, 2, 3, ...
    pub fn from_letters(letters: impl IntoIterator<Item = char>) -> Self {
        Self(
            (1..)
                .zip(letters.into_iter().map(|c| c.to_ascii_uppercase()))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, question: u32) -> Option<char> {
        self.0.get(&question).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, char)> + '_ {
        self.0.iter().map(|(q, a)| (*q, *a))
    }
}

impl FromIterator<(u32, char)> for AnswerKey {
    fn from_iter<I: IntoIterator<Item = (u32, char)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(q, c)| (q, c.to_ascii_uppercase()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GradeStatus {
    Correct,
    Wrong,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeDetail {
    pub question: u32,
    pub student: Option<char>,
    pub expected: char,
    pub status: GradeStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSummary {
    pub correct: u32,
    pub wrong: u32,
    pub empty: u32,
    pub total: u32,
    /// Percentage of correct answers, rounded to two decimals.
    pub score: f64,
}

/// The detected answers did not cover the same number of questions as the
/// key. Grading still uses the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyLengthMismatch {
    pub key: usize,
    pub detected: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeReport {
    pub summary: GradeSummary,
    pub details: Vec<GradeDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_length_mismatch: Option<KeyLengthMismatch>,
}

/// Grades detected answers against a key. Questions missing from `answers`
/// count as empty and answers to questions not in the key are ignored.
pub fn grade_answers(answers: &AnswerRecord, key: &AnswerKey) -> GradeReport {
    let key_length_mismatch = if answers.len() != key.len() {
        warn!(
            "answer key has {} questions but {} were detected; grading against the key",
            key.len(),
            answers.len()
        );
        Some(KeyLengthMismatch {
            key: key.len(),
            detected: answers.len(),
        })
    } else {
        None
    };

    let details = key
        .iter()
        .map(|(question, expected)| {
            let student = answers.get(question).flatten();
            let status = match student {
                None => GradeStatus::Empty,
                Some(answer) if answer == expected => GradeStatus::Correct,
                Some(_) => GradeStatus::Wrong,
            };
            GradeDetail {
                question,
                student,
                expected,
                status,
            }
        })
        .collect::<Vec<_>>();

    let count = |status: GradeStatus| {
        details
            .iter()
            .filter(|detail| detail.status == status)
            .count() as u32
    };
    let correct = count(GradeStatus::Correct);
    let total = details.len() as u32;

    GradeReport {
        summary: GradeSummary {
            correct,
            wrong: count(GradeStatus::Wrong),
            empty: count(GradeStatus::Empty),
            total,
            score: score(correct, total),
        },
        details,
        key_length_mismatch,
    }
}

/// `100 * correct / total` rounded to two decimals, or 0 with no questions.
/// Exact halves round to the even hundredth, so 1 of 32 scores 3.12.
pub fn score(correct: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    // work in hundredths of a percent so ties are detected exactly
    let (total, scaled) = (total as u64, 10_000 * correct as u64);
    let (mut hundredths, remainder) = (scaled / total, scaled % total);
    if 2 * remainder > total || (2 * remainder == total && hundredths % 2 == 1) {
        hundredths += 1;
    }
    hundredths as f64 / 100.0
}
