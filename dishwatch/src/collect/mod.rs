//! External collaborators: the dish, the speedtest tool and the host network.
//!
//! The poller talks to its data sources through the traits defined here so
//! tests can substitute in-process fakes. The provided implementations shell
//! out to `grpcurl` and `speedtest-cli` with a per-call timeout; a child that
//! overruns its budget is killed.

pub mod grpcurl;
pub mod ip;
pub mod speedtest;

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::{FetchError, Result};
use crate::obstruction::ObstructionMap;
use crate::unroll::HistorySnapshot;
use crate::value::Row;

pub use grpcurl::GrpcurlDish;
pub use ip::{LocalAddress, PublicAddress};
pub use speedtest::SpeedtestCli;

/// The satellite dish.
pub trait Dish: Send + Sync + 'static {
    /// Fetches the current status as a flattened row stamped with the fetch
    /// time.
    fn fetch_status(&self) -> impl Future<Output = Result<Row>> + Send;

    /// Fetches the raw ring-buffer history.
    fn fetch_history(&self) -> impl Future<Output = Result<HistorySnapshot>> + Send;

    /// Fetches the sky obstruction map.
    fn fetch_obstruction_map(&self) -> impl Future<Output = Result<ObstructionMap>> + Send;
}

/// A bandwidth test runner.
pub trait SpeedTester: Send + Sync + 'static {
    /// Runs one test and returns its result as a flattened row.
    fn run_speedtest(&self) -> impl Future<Output = Result<Row>> + Send;
}

/// Resolves the address of this host on the dish network.
pub trait AddressResolver: Send + Sync {
    /// Returns the local IP address, or `None` if it cannot be determined.
    fn local_ip(&self) -> Option<String>;
}

/// Runs `program args...` and returns its stdout.
///
/// The child is killed if `timeout` elapses first.
///
/// # Errors
///
/// Returns [`FetchError::Spawn`], [`FetchError::Timeout`] or
/// [`FetchError::ExitStatus`].
pub(crate) async fn run_command(program: &str, args: &[String], timeout: Duration) -> Result<Vec<u8>> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| FetchError::Spawn {
            program: program.to_string(),
            source: e,
        })?;

    // Dropping the timed-out future drops the child, which kills it.
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| FetchError::Timeout {
            program: program.to_string(),
            timeout,
        })?
        .map_err(|e| FetchError::Spawn {
            program: program.to_string(),
            source: e,
        })?;

    if !output.status.success() {
        return Err(FetchError::ExitStatus {
            program: program.to_string(),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
        .into());
    }

    Ok(output.stdout)
}

/// Parses `bytes` as a JSON object.
pub(crate) fn parse_object(
    what: &'static str,
    bytes: &[u8],
) -> Result<serde_json::Map<String, serde_json::Value>> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| FetchError::Parse { what, source: e })?;
    match value {
        serde_json::Value::Object(object) => Ok(object),
        _ => Err(FetchError::MissingField {
            what,
            field: "<object>",
        }
        .into()),
    }
}
