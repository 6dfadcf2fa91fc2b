//! Stdout discipline for the runner.
//!
//! # Important
//!
//! - **stdout**: the query result (raw CSV) or a single JSON summary line
//! - **stderr**: logs and diagnostics (the tracing subscriber writes there)
//! - **Never use `println!`**: It may add `\r\n` on Windows

use std::io::Write;

use serde::Serialize;

use crate::error::Result;
use crate::query::{OutcomeSummary, QueryOutcome};

/// Write the result bytes to `out` exactly as transferred and flush.
pub fn write_result<W: Write>(out: &mut W, result: &[u8]) -> std::io::Result<()> {
    out.write_all(result)?;
    out.flush()
}

/// Write a value as a single JSON line to `out`.
pub fn write_json_line<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<()> {
    let json = serde_json::to_string(value)?;
    out.write_all(json.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

/// Summary line with the result text included.
#[derive(Debug, Serialize)]
pub struct JsonReport<'a> {
    #[serde(flatten)]
    pub summary: OutcomeSummary,
    pub result: &'a str,
}

/// Print an outcome to stdout.
///
/// With `json` set, prints one summary line that includes the result text.
/// Otherwise prints the result text only.
pub fn print_outcome(outcome: &QueryOutcome, json: bool) -> Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    if json {
        let text = outcome.text();
        let report = JsonReport {
            summary: outcome.summary(),
            result: &text,
        };
        write_json_line(&mut handle, &report)
    } else {
        write_result(&mut handle, &outcome.result)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ExecutionPlan;
    use bytes::Bytes;
    use std::time::Duration;

    #[test]
    fn test_write_result_is_byte_exact() {
        let mut out = Vec::new();
        write_result(&mut out, b"a,b\n1,2").unwrap();
        assert_eq!(out, b"a,b\n1,2");

        let mut out = Vec::new();
        write_result(&mut out, b"a,b\n").unwrap();
        assert_eq!(out, b"a,b\n");

        let mut out = Vec::new();
        write_result(&mut out, b"").unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_json_report_is_one_line() {
        let outcome = QueryOutcome {
            result: Bytes::from_static(b"1,2\n3,4\n"),
            plan: ExecutionPlan {
                plan_id: 5,
                total_result_size: 8,
            },
            bytes_transferred: 8,
            bytes_available: 8,
            size_mismatch: None,
            elapsed: Duration::from_millis(1),
        };
        let text = outcome.text();
        let report = JsonReport {
            summary: outcome.summary(),
            result: &text,
        };
        let mut out = Vec::new();
        write_json_line(&mut out, &report).unwrap();

        let line = String::from_utf8(out).unwrap();
        assert_eq!(line.matches('\n').count(), 1);
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["plan"]["plan_id"], 5);
        assert_eq!(value["result"], "1,2\n3,4\n");
        assert_eq!(value["complete"], true);
    }
}
