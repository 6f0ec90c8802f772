use crate::cli::DecodeArgs;
use crate::exit_codes;
use crate::output;
use imu_telemetry::streaming::SampleDecoder;
use imu_telemetry::ChannelMode;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};

/// Rejected lines reported individually before we only count
const MAX_REPORTED_ERRORS: usize = 20;

#[derive(Serialize)]
struct LineError {
    line: usize,
    error: String,
}

#[derive(Serialize, Default)]
struct DecodeSummary {
    mode: String,
    lines: usize,
    blank: usize,
    decoded: usize,
    dropped: usize,
    errors: Vec<LineError>,
}

pub fn execute(args: DecodeArgs) -> i32 {
    let mode: ChannelMode = match args.mode.parse() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::CONFIG_ERROR;
        }
    };

    let reader: Box<dyn BufRead> = match &args.file {
        Some(path) => match File::open(path) {
            Ok(file) => Box::new(BufReader::new(file)),
            Err(e) => {
                eprintln!("Error: cannot open '{}': {}", path, e);
                return exit_codes::INPUT_ERROR;
            }
        },
        None => Box::new(BufReader::new(std::io::stdin())),
    };

    let decoder = SampleDecoder::new(mode);
    let mut summary = DecodeSummary {
        mode: mode.to_string(),
        ..Default::default()
    };

    // Raw bytes so one invalid UTF-8 line does not abort the whole input
    for (index, raw) in reader.split(b'\n').enumerate() {
        let raw = match raw {
            Ok(raw) => raw,
            Err(e) => {
                eprintln!("Error: read failed: {}", e);
                return exit_codes::INPUT_ERROR;
            }
        };
        let line_no = index + 1;

        let text = String::from_utf8_lossy(&raw);
        if text.trim().is_empty() {
            summary.blank += 1;
            continue;
        }
        summary.lines += 1;

        let decoded = match std::str::from_utf8(&raw) {
            Ok(line) => decoder.decode(line).map_err(|e| e.to_string()),
            Err(e) => Err(format!("invalid UTF-8: {}", e)),
        };

        match decoded {
            Ok(sample) => {
                summary.decoded += 1;
                if args.samples {
                    if let Err(e) = output::print_json(&sample, true) {
                        eprintln!("Error: {}", e);
                        return exit_codes::EXECUTION_ERROR;
                    }
                }
            }
            Err(error) => {
                summary.dropped += 1;
                log::debug!("line {}: {}", line_no, error);
                if summary.errors.len() < MAX_REPORTED_ERRORS {
                    summary.errors.push(LineError {
                        line: line_no,
                        error,
                    });
                }
            }
        }
    }

    let json = match output::to_json(&summary, args.compact) {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    };
    if args.samples {
        eprintln!("{}", json);
    } else if let Err(e) = output::print_line(&json) {
        eprintln!("Error: {}", e);
        return exit_codes::EXECUTION_ERROR;
    }

    if args.strict && summary.dropped > 0 {
        eprintln!("Error: {} of {} lines dropped", summary.dropped, summary.lines);
        return exit_codes::INPUT_ERROR;
    }
    exit_codes::SUCCESS
}
