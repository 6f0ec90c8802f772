use std::io::{ErrorKind, Write};

/// Serialize a value to JSON (pretty or compact).
pub fn to_json<T: serde::Serialize>(value: &T, compact: bool) -> Result<String, String> {
    let result = if compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    };
    result.map_err(|e| format!("JSON serialization failed: {}", e))
}

/// Write one line to stdout. A closed pipe (e.g. `| head`) is not an error.
pub fn print_line(line: &str) -> Result<(), String> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    match handle
        .write_all(line.as_bytes())
        .and_then(|_| handle.write_all(b"\n"))
        .and_then(|_| handle.flush())
    {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
        Err(e) => Err(format!("Failed to write to stdout: {}", e)),
    }
}

/// Serialize and print in one step
pub fn print_json<T: serde::Serialize>(value: &T, compact: bool) -> Result<(), String> {
    print_line(&to_json(value, compact)?)
}
