//! Bandwidth tests through `speedtest-cli --json`.

use std::time::Duration;

use crate::collect::{SpeedTester, parse_object, run_command};
use crate::error::Result;
use crate::store::unix_now;
use crate::value::Row;

/// Default per-run timeout. A full download plus upload test takes tens of
/// seconds on a satellite link.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

/// Runs a configurable speedtest command that prints one JSON object.
#[derive(Debug, Clone)]
pub struct SpeedtestCli {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl Default for SpeedtestCli {
    fn default() -> Self {
        Self::new("speedtest-cli", vec!["--json".to_string()])
    }
}

impl SpeedtestCli {
    /// Creates a runner for `program args...`.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Overrides the per-run timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl SpeedTester for SpeedtestCli {
    async fn run_speedtest(&self) -> Result<Row> {
        tracing::debug!(program = %self.program, "running speedtest");
        let output = run_command(&self.program, &self.args, self.timeout).await?;
        parse_speedtest(&output, unix_now())
    }
}

/// Parses `speedtest-cli --json` output into a row stamped `now`.
///
/// Nested `client` and `server` objects are flattened (`server.sponsor`).
/// The tool's own `timestamp` string is dropped in favour of `now`.
///
/// # Errors
///
/// Returns a [`FetchError`](crate::error::FetchError) if the output is not a
/// JSON object.
pub fn parse_speedtest(output: &[u8], now: f64) -> Result<Row> {
    let mut body = parse_object("speedtest", output)?;
    body.remove("timestamp");
    Ok(Row::from_json_object(now, body))
}
