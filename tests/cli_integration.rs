use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn imu() -> Command {
    let mut cmd = Command::cargo_bin("imu-telemetry").unwrap();
    // Keep a developer's .env or shell settings out of the tests
    for key in [
        "IMU_BUFFER_CAPACITY",
        "IMU_CONNECT_TIMEOUT_MS",
        "IMU_STOP_TIMEOUT_MS",
        "IMU_MAX_LINE_BYTES",
        "IMU_THROUGHPUT_WINDOW_MS",
        "IMU_REMOTE_COMMAND",
        "IMU_LOCAL_DECIMATION",
        "IMU_SSH_BINARY",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

fn ndjson_file(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    file.flush().unwrap();
    file
}

fn last_json_line(stdout: &[u8]) -> serde_json::Value {
    let text = String::from_utf8(stdout.to_vec()).unwrap();
    let last = text.lines().filter(|l| !l.trim().is_empty()).last().unwrap();
    serde_json::from_str(last).unwrap()
}

// =============================================================================
// GENERAL
// =============================================================================

#[test]
fn test_no_args_shows_help() {
    imu()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn test_version_flag() {
    imu()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("imu-telemetry"));
}

// =============================================================================
// RATES SUBCOMMAND
// =============================================================================

#[test]
fn test_rates_plan() {
    let output = imu()
        .args(["rates", "--device-hz", "200", "--stream-hz", "25", "--record-hz", "100", "--compact"])
        .assert()
        .success();

    let plan = last_json_line(&output.get_output().stdout);
    assert_eq!(plan["stream"]["factor"], 8);
    assert_eq!(plan["stream"]["effective_hz"], 25.0);
    assert_eq!(plan["record"]["factor"], 2);
    assert_eq!(plan["record"]["effective_hz"], 100.0);
}

#[test]
fn test_rates_target_above_device_rate() {
    let output = imu()
        .args(["rates", "--device-hz", "50", "--stream-hz", "200", "--compact"])
        .assert()
        .success();

    let plan = last_json_line(&output.get_output().stdout);
    assert_eq!(plan["stream"]["factor"], 1);
    assert_eq!(plan["stream"]["effective_hz"], 50.0);
    // Recording defaults to full rate
    assert_eq!(plan["record"]["factor"], 1);
}

#[test]
fn test_rates_zero_device_rate_is_config_error() {
    imu()
        .args(["rates", "--device-hz", "0", "--stream-hz", "25"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("device rate"));
}

// =============================================================================
// DECODE SUBCOMMAND
// =============================================================================

#[test]
fn test_decode_counts_drops() {
    let file = ndjson_file(&[
        r#"{"timestamp_ns": 1, "t_s": 0.0, "sensor_id": "imu0", "ax": 1, "ay": 2, "az": 3}"#,
        "garbage",
        "",
        r#"{"timestamp_ns": 2, "t_s": 0.01, "sensor_id": "imu0", "ax": 1}"#,
        r#"{"timestamp_ns": 3, "t_s": 0.02, "sensor_id": "imu0", "ax": 4, "ay": 5, "az": 6, "extra": true}"#,
    ]);

    let output = imu()
        .args(["decode", "--mode", "accel", "--compact", "--file"])
        .arg(file.path())
        .assert()
        .success();

    let summary = last_json_line(&output.get_output().stdout);
    assert_eq!(summary["mode"], "accel");
    assert_eq!(summary["lines"], 4);
    assert_eq!(summary["blank"], 1);
    assert_eq!(summary["decoded"], 2);
    assert_eq!(summary["dropped"], 2);
    assert_eq!(summary["errors"][0]["line"], 2);
    assert_eq!(summary["errors"][1]["line"], 4);
}

#[test]
fn test_decode_samples_from_stdin() {
    let input = concat!(
        r#"{"timestamp_ns": 7, "t_s": 0.5, "sensor_id": "imu1", "gx": 0.1, "gy": 0.2, "gz": 0.3, "temp_c": 31.5}"#,
        "\n"
    );

    let output = imu()
        .args(["decode", "--mode", "gyro+temp", "--samples"])
        .write_stdin(input)
        .assert()
        .success()
        .stderr(predicate::str::contains("\"decoded\": 1"));

    let sample = last_json_line(&output.get_output().stdout);
    assert_eq!(sample["timestamp_ns"], 7);
    assert_eq!(sample["sensor_id"], "imu1");
    assert_eq!(sample["gz"], 0.3);
    assert_eq!(sample["temp_c"], 31.5);
    assert!(sample.get("ax").is_none());
}

#[test]
fn test_decode_strict_fails_on_drop() {
    let file = ndjson_file(&["[1, 2, 3]"]);
    imu()
        .args(["decode", "--mode", "6axis", "--strict", "--file"])
        .arg(file.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("1 of 1 lines dropped"));
}

#[test]
fn test_decode_unknown_mode() {
    imu()
        .args(["decode", "--mode", "9axis"])
        .write_stdin("")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("unknown channel mode"));
}

#[test]
fn test_decode_missing_file() {
    imu()
        .args(["decode", "--file", "/nonexistent/telemetry.ndjson"])
        .assert()
        .code(2);
}

// =============================================================================
// STREAM SUBCOMMAND
// =============================================================================

#[cfg(unix)]
#[test]
fn test_stream_local_session_summary() {
    let command = r#"i=0; while true; do echo "{{\"timestamp_ns\": $i, \"t_s\": 0.0, \"sensor_id\": \"imu0\", \"ax\": 1, \"ay\": 2, \"az\": 3}}"; i=$((i+1)); sleep 0.01; done"#;

    let output = imu()
        .args([
            "stream",
            "--local",
            "--mode",
            "accel",
            "--device-hz",
            "100",
            "--stream-hz",
            "100",
            "--duration",
            "0.5",
            "--report-ms",
            "100",
            "--compact",
            "--command",
            command,
        ])
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .success();

    let summary = last_json_line(&output.get_output().stdout);
    assert_eq!(summary["stopped_by"], "duration");
    assert_eq!(summary["mode"], "accel");
    assert!(summary["metrics"]["decoded_count"].as_u64().unwrap() > 0);
    assert_eq!(summary["metrics"]["drop_count"], 0);
    assert!(summary["command"].as_str().unwrap().starts_with("i=0;"));
}

#[cfg(unix)]
#[test]
fn test_stream_rejects_bad_rate_before_launch() {
    imu()
        .args([
            "stream",
            "--local",
            "--device-hz",
            "0",
            "--stream-hz",
            "25",
            "--command",
            "touch /should/not/run",
        ])
        .assert()
        .code(3);
}

#[cfg(unix)]
#[test]
fn test_stream_process_exits_immediately() {
    imu()
        .args([
            "stream",
            "--local",
            "--device-hz",
            "100",
            "--stream-hz",
            "10",
            "--command",
            "exit 1",
        ])
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .code(4)
        .stderr(predicate::str::contains("exited before sending data"));
}

#[cfg(unix)]
#[test]
fn test_stream_interrupt_prints_summary() {
    use std::io::{BufRead, BufReader};
    use std::process::Stdio;

    let command = r#"i=0; while true; do echo "{{\"timestamp_ns\": $i, \"t_s\": 0.0, \"sensor_id\": \"imu0\", \"ax\": 1, \"ay\": 2, \"az\": 3}}"; i=$((i+1)); sleep 0.01; done"#;

    let mut cmd = std::process::Command::new(assert_cmd::cargo::cargo_bin("imu-telemetry"));
    for (key, _) in std::env::vars().filter(|(k, _)| k.starts_with("IMU_")) {
        cmd.env_remove(key);
    }
    let mut child = cmd
        .args([
            "stream",
            "--local",
            "--mode",
            "accel",
            "--device-hz",
            "100",
            "--stream-hz",
            "100",
            "--report-ms",
            "50",
            "--compact",
            "--command",
            command,
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let mut lines = BufReader::new(child.stdout.take().unwrap()).lines();
    // Two reports means the run loop is up and listening for the signal
    for _ in 0..2 {
        lines.next().unwrap().unwrap();
    }
    unsafe {
        libc::kill(child.id() as i32, libc::SIGINT);
    }

    let rest: Vec<String> = lines.map(|l| l.unwrap()).collect();
    let status = child.wait().unwrap();
    assert!(status.success(), "exit status {:?}", status);

    let summary: serde_json::Value = serde_json::from_str(rest.last().unwrap()).unwrap();
    assert_eq!(summary["stopped_by"], "interrupt");
    assert!(summary["metrics"]["decoded_count"].as_u64().unwrap() > 0);
}
