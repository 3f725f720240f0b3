use std::io::Write;

use sandbox::{ExecutionResult, ExitStatus};
use serde::Serialize;
use uuid::Uuid;

use crate::error::CliResult;

/// JSON shape of an [`ExecutionResult`].
#[derive(Debug, Serialize)]
pub struct ResultView {
    pub run_id: Uuid,
    pub exit_status: String,
    pub exit_code: i32,
    pub violation: Option<String>,
    pub stdout: String,
    pub stderr: String,
    pub wall_clock_ms: u64,
    pub cpu_time_ms: Option<u64>,
    pub peak_memory_bytes: Option<u64>,
    pub truncated: bool,
    pub io_error: Option<String>,
}

impl From<&ExecutionResult> for ResultView {
    fn from(result: &ExecutionResult) -> Self {
        let exit_status = match result.exit_status {
            ExitStatus::Exited(code) => format!("exited({code})"),
            ExitStatus::Signaled(sig) => format!("signaled({sig})"),
            ExitStatus::TerminatedByPolicy(kind) => format!("terminated_by_policy({kind})"),
            ExitStatus::Cancelled => "cancelled".to_string(),
            ExitStatus::EnforcerFault => "enforcer_fault".to_string(),
        };
        Self {
            run_id: result.run_id,
            exit_status,
            exit_code: result.exit_status.code(),
            violation: result.violation().map(|v| v.to_string()),
            stdout: result.stdout_lossy(),
            stderr: result.stderr_lossy(),
            wall_clock_ms: millis(result.wall_clock_duration),
            cpu_time_ms: result.cpu_time_used.map(millis),
            peak_memory_bytes: result.peak_memory_used,
            truncated: result.truncated,
            io_error: result.io_error.clone(),
        }
    }
}

fn millis(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

pub fn json(result: &ExecutionResult, out: &mut impl Write) -> CliResult<()> {
    serde_json::to_writer_pretty(&mut *out, &ResultView::from(result))
        .map_err(std::io::Error::from)?;
    writeln!(out)?;
    Ok(())
}

/// Replay the child's output, then a one-line summary on `err`.
pub fn text(result: &ExecutionResult, out: &mut impl Write, err: &mut impl Write) -> CliResult<()> {
    out.write_all(&result.stdout)?;
    out.flush()?;
    err.write_all(&result.stderr)?;

    let view = ResultView::from(result);
    let mut summary = format!(
        "[sandbox] {} in {} ms",
        result.exit_status, view.wall_clock_ms
    );
    if let Some(cpu) = view.cpu_time_ms {
        summary.push_str(&format!(", cpu {cpu} ms"));
    }
    if let Some(peak) = view.peak_memory_bytes {
        summary.push_str(&format!(", peak rss {} KiB", peak / 1024));
    }
    if result.truncated {
        summary.push_str(", output truncated");
    }
    if let Some(e) = &result.io_error {
        summary.push_str(&format!(", capture error: {e}"));
    }
    writeln!(err, "{summary}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sandbox::ViolationKind;

    use super::*;

    fn result(exit_status: ExitStatus) -> ExecutionResult {
        ExecutionResult {
            run_id: Uuid::nil(),
            exit_status,
            stdout: b"hello\n".to_vec(),
            stderr: b"warn\n".to_vec(),
            wall_clock_duration: Duration::from_millis(1200),
            cpu_time_used: Some(Duration::from_millis(30)),
            peak_memory_used: Some(4 * 1024 * 1024),
            truncated: false,
            io_error: None,
        }
    }

    #[test]
    fn json_reports_violation() {
        let mut buf = Vec::new();
        json(
            &result(ExitStatus::TerminatedByPolicy(ViolationKind::WallClock)),
            &mut buf,
        )
        .unwrap();

        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value["exit_status"], "terminated_by_policy(wall_clock)");
        assert_eq!(value["exit_code"], 124);
        assert_eq!(value["violation"], "wall_clock");
        assert_eq!(value["stdout"], "hello\n");
        assert_eq!(value["wall_clock_ms"], 1200);
    }

    #[test]
    fn text_replays_streams_and_summarizes() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        text(&result(ExitStatus::Exited(0)), &mut out, &mut err).unwrap();

        assert_eq!(out, b"hello\n");
        let err = String::from_utf8(err).unwrap();
        assert!(err.starts_with("warn\n"), "got: {err}");
        assert!(
            err.contains("[sandbox] exited with code 0 in 1200 ms, cpu 30 ms"),
            "got: {err}"
        );
        assert!(err.contains("peak rss 4096 KiB"), "got: {err}");
    }
}
