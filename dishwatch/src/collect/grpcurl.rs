//! Dish access through `grpcurl`.
//!
//! The dish exposes a single gRPC method, `SpaceX.API.Device.Device/Handle`,
//! that dispatches on the request body:
//!
//! ```text
//! grpcurl -plaintext -d '{"get_status":{}}' 192.168.100.1:9200 SpaceX.API.Device.Device/Handle
//! ```
//!
//! Responses wrap their payload in a single member (`dishGetStatus`,
//! `dishGetHistory`).

use std::time::Duration;

use crate::collect::{Dish, parse_object, run_command};
use crate::error::{FetchError, Result};
use crate::obstruction::ObstructionMap;
use crate::store::unix_now;
use crate::unroll::HistorySnapshot;
use crate::value::Row;

/// Default dish gRPC address.
pub const DEFAULT_DISH_ADDR: &str = "192.168.100.1:9200";

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const HANDLE_METHOD: &str = "SpaceX.API.Device.Device/Handle";

/// Fetches dish telemetry by invoking `grpcurl`.
#[derive(Debug, Clone)]
pub struct GrpcurlDish {
    program: String,
    address: String,
    timeout: Duration,
}

impl GrpcurlDish {
    /// Creates a client for the dish at `address` (`host:port`).
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            program: "grpcurl".to_string(),
            address: address.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Overrides the `grpcurl` executable.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Overrides the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The dish address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Command-line arguments for one `Handle` call.
    pub fn args(&self, request: &str) -> Vec<String> {
        vec![
            "-plaintext".to_string(),
            "-d".to_string(),
            format!("{{\"{request}\":{{}}}}"),
            self.address.clone(),
            HANDLE_METHOD.to_string(),
        ]
    }

    async fn call(&self, request: &str) -> Result<Vec<u8>> {
        run_command(&self.program, &self.args(request), self.timeout).await
    }
}

impl Dish for GrpcurlDish {
    async fn fetch_status(&self) -> Result<Row> {
        let output = self.call("get_status").await?;
        parse_status(&output, unix_now())
    }

    async fn fetch_history(&self) -> Result<HistorySnapshot> {
        let output = self.call("get_history").await?;
        parse_history(&output)
    }

    async fn fetch_obstruction_map(&self) -> Result<ObstructionMap> {
        let output = self.call("dish_get_obstruction_map").await?;
        parse_obstruction_map(&output)
    }
}

fn unwrap_member(
    what: &'static str,
    field: &'static str,
    output: &[u8],
) -> Result<serde_json::Map<String, serde_json::Value>> {
    let mut response = parse_object(what, output)?;
    match response.remove(field) {
        Some(serde_json::Value::Object(body)) => Ok(body),
        _ => Err(FetchError::MissingField { what, field }.into()),
    }
}

/// Parses a `get_status` response into a row stamped `now`.
///
/// # Errors
///
/// Returns a [`FetchError`] if the output is not JSON or lacks
/// `dishGetStatus`.
pub fn parse_status(output: &[u8], now: f64) -> Result<Row> {
    let body = unwrap_member("status", "dishGetStatus", output)?;
    Ok(Row::from_json_object(now, body))
}

/// Parses a `get_history` response.
///
/// # Errors
///
/// Returns a [`FetchError`] if the output is not JSON or lacks
/// `dishGetHistory` or its cursor.
pub fn parse_history(output: &[u8]) -> Result<HistorySnapshot> {
    let body = unwrap_member("history", "dishGetHistory", output)?;
    HistorySnapshot::from_json(body)
}

/// Parses a `dish_get_obstruction_map` response.
///
/// # Errors
///
/// Returns a [`FetchError`] if the output is not JSON or lacks
/// `dishGetObstructionMap` or its grid members.
pub fn parse_obstruction_map(output: &[u8]) -> Result<ObstructionMap> {
    let body = unwrap_member("obstruction map", "dishGetObstructionMap", output)?;
    ObstructionMap::from_json(body)
}
