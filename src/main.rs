extern crate log;
extern crate pretty_env_logger;

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::exit;

use clap::{arg, command, value_parser, ArgMatches, Command};
use rayon::prelude::*;
use serde::{de::DeserializeOwned, Serialize};

use omr_scan::{
    grade_sheet,
    types::{AnswerRecord, EMPTY_MARK},
    AnswerKey, GradeReport, GradedSheet, ImageDebugWriter, InterpretError, SheetConfig, Stage,
};

fn main() {
    pretty_env_logger::init_custom_env("LOG");

    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("scan", scan_matches)) => scan(scan_matches),
        Some(("template", template_matches)) => template(template_matches),
        _ => unreachable!("a subcommand is required"),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SheetOutput {
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    answers: Option<AnswerRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ambiguous: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    grade: Option<GradeReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorOutput>,
}

#[derive(Serialize)]
struct ErrorOutput {
    stage: Stage,
    message: String,
}

fn scan(matches: &ArgMatches) {
    let debug = matches.get_flag("debug");
    let key_path = matches
        .get_one::<String>("key")
        .expect("answer key path is required");
    let image_paths = matches
        .get_many::<String>("images")
        .expect("at least one image is required")
        .map(PathBuf::from)
        .collect::<Vec<_>>();

    let key: AnswerKey = match read_json(Path::new(key_path)) {
        Ok(key) => key,
        Err(e) => {
            eprintln!("Error loading answer key: {}", e);
            exit(1);
        }
    };

    let config: SheetConfig = match matches.get_one::<String>("config") {
        Some(config_path) => match read_json(Path::new(config_path)) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                exit(1);
            }
        },
        None => SheetConfig::default(),
    };

    if let Err(e) = config.validate() {
        eprintln!("Error: invalid config: {}", e);
        exit(1);
    }

    let results = image_paths
        .par_iter()
        .map(|path| scan_one(path, &config, &key, debug))
        .collect::<Vec<_>>();

    let mut failures = 0;
    let mut outputs = Vec::with_capacity(results.len());
    for (path, result) in image_paths.iter().zip(results) {
        print_result(path, &result);
        if result.is_err() {
            failures += 1;
        }
        outputs.push(sheet_output(path, result));
    }

    if let Some(output_path) = matches.get_one::<String>("output") {
        if let Err(e) = write_json(Path::new(output_path), &outputs) {
            eprintln!("Error writing {}: {}", output_path, e);
            exit(1);
        }
    }

    if failures > 0 {
        eprintln!("{} of {} sheets could not be read", failures, image_paths.len());
        exit(1);
    }
}

fn scan_one(
    path: &Path,
    config: &SheetConfig,
    key: &AnswerKey,
    debug: bool,
) -> Result<GradedSheet, InterpretError> {
    let image = image::open(path)
        .map_err(|e| InterpretError::InvalidImage(format!("{}: {}", path.display(), e)))?;

    let observer = if debug {
        ImageDebugWriter::new(path.to_path_buf())
    } else {
        ImageDebugWriter::disabled()
    };

    grade_sheet(&image, config, key, &observer)
}

fn print_result(path: &Path, result: &Result<GradedSheet, InterpretError>) {
    match result {
        Ok(graded) => {
            let summary = &graded.report.summary;
            println!(
                "{}: {:.2} ({} correct, {} wrong, {} empty of {})",
                path.display(),
                summary.score,
                summary.correct,
                summary.wrong,
                summary.empty,
                summary.total
            );
            for detail in &graded.report.details {
                let student = detail
                    .student
                    .map_or_else(|| EMPTY_MARK.to_string(), |c| c.to_string());
                println!(
                    "  Q{:<3} {} / {}  {:?}",
                    detail.question, student, detail.expected, detail.status
                );
            }
            if !graded.sheet.ambiguous.is_empty() {
                println!("  ambiguous: {:?}", graded.sheet.ambiguous);
            }
            if let Some(mismatch) = graded.report.key_length_mismatch {
                println!(
                    "  note: key has {} questions, sheet has {}",
                    mismatch.key, mismatch.detected
                );
            }
        }
        Err(e) => {
            eprintln!("{}: failed at {:?}: {}", path.display(), e.stage(), e);
        }
    }
}

fn sheet_output(path: &Path, result: Result<GradedSheet, InterpretError>) -> SheetOutput {
    let path = path.display().to_string();
    match result {
        Ok(graded) => SheetOutput {
            path,
            answers: Some(graded.sheet.answers),
            ambiguous: Some(graded.sheet.ambiguous),
            grade: Some(graded.report),
            error: None,
        },
        Err(e) => SheetOutput {
            path,
            answers: None,
            ambiguous: None,
            grade: None,
            error: Some(ErrorOutput {
                stage: e.stage(),
                message: e.to_string(),
            }),
        },
    }
}

fn template(matches: &ArgMatches) {
    let questions = *matches
        .get_one::<u32>("questions")
        .expect("questions has a default");
    let key = AnswerKey::from_letters(std::iter::repeat('A').take(questions as usize));
    match serde_json::to_string_pretty(&key) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(1);
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, String> {
    let json = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    serde_json::from_str(&json).map_err(|e| format!("{}: {}", path.display(), e))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    let file = File::create(path).map_err(|e| e.to_string())?;
    serde_json::to_writer_pretty(BufWriter::new(file), value).map_err(|e| e.to_string())
}

#[allow(clippy::cognitive_complexity)]
fn cli() -> Command {
    command!()
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("scan")
                .about("Read and grade answer sheet images")
                .arg(arg!(-k --key <PATH> "Path to answer key JSON").required(true))
                .arg(arg!(-c --config <PATH> "Path to sheet config JSON"))
                .arg(arg!(-d --debug "Write debug images next to each input"))
                .arg(arg!(-o --output <PATH> "Write all results to this JSON file"))
                .arg(arg!(images: <IMAGE> ... "Paths to sheet images").required(true)),
        )
        .subcommand(
            Command::new("template")
                .about("Print an answer key template")
                .arg(
                    arg!(-q --questions <N> "Number of questions")
                        .value_parser(value_parser!(u32))
                        .default_value("30"),
                ),
        )
}
