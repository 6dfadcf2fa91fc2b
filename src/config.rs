//! Runner configuration.
//!
//! Load order: built-in defaults, then an optional JSON file, then
//! explicit command-line overrides.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::buffer::{check_buffer_size, RESULT_BUFFER_SIZE};
use crate::client::{
    DEFAULT_ADRFAM, DEFAULT_SUBNQN, DEFAULT_TRADDR, DEFAULT_TRSVCID, DEFAULT_TRTYPE,
};
use crate::error::{CsqError, Result};
use crate::query::QueryRequest;
use crate::session::{SessionOptions, DEFAULT_POLL_BATCH};
use crate::transport::TransportEndpoint;

/// Query run when none is configured.
pub const DEFAULT_QUERY: &str = "SELECT min(vertex_id) AS VID, min(x) as X, min(y) as Y, \
     min(z) as Z, avg(e) AS E FROM s3object WHERE \
     x > 1.5 AND x < 1.6 AND y > 1.5 AND y < 1.6 AND z > 1.5 AND z < 1.6 \
     GROUP BY vertex_id ORDER BY E";

/// Everything the runner needs for one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub trtype: String,
    pub adrfam: String,
    pub traddr: String,
    pub trsvcid: String,
    pub subnqn: String,
    /// Object the query runs against.
    pub object_id: u32,
    pub query: String,
    /// Session timeout in milliseconds (none = wait forever).
    pub timeout_ms: Option<u64>,
    pub buffer_size: usize,
    pub poll_batch: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            trtype: DEFAULT_TRTYPE.to_string(),
            adrfam: DEFAULT_ADRFAM.to_string(),
            traddr: DEFAULT_TRADDR.to_string(),
            trsvcid: DEFAULT_TRSVCID.to_string(),
            subnqn: DEFAULT_SUBNQN.to_string(),
            object_id: 0,
            query: DEFAULT_QUERY.to_string(),
            timeout_ms: None,
            buffer_size: RESULT_BUFFER_SIZE,
            poll_batch: DEFAULT_POLL_BATCH,
        }
    }
}

/// Values given explicitly on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub trtype: Option<String>,
    pub adrfam: Option<String>,
    pub traddr: Option<String>,
    pub trsvcid: Option<String>,
    pub subnqn: Option<String>,
    pub object_id: Option<u32>,
    pub query: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl RunnerConfig {
    /// Load from a JSON file; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: RunnerConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, then `path` if given, then `overrides`.
    pub fn resolve(path: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Apply explicit overrides.
    pub fn apply(&mut self, overrides: Overrides) {
        let Overrides {
            trtype,
            adrfam,
            traddr,
            trsvcid,
            subnqn,
            object_id,
            query,
            timeout_ms,
        } = overrides;

        if let Some(v) = trtype {
            self.trtype = v;
        }
        if let Some(v) = adrfam {
            self.adrfam = v;
        }
        if let Some(v) = traddr {
            self.traddr = v;
        }
        if let Some(v) = trsvcid {
            self.trsvcid = v;
        }
        if let Some(v) = subnqn {
            self.subnqn = v;
        }
        if let Some(v) = object_id {
            self.object_id = v;
        }
        if let Some(v) = query {
            self.query = v;
        }
        if timeout_ms.is_some() {
            self.timeout_ms = timeout_ms;
        }
    }

    /// Reject empty fields, an empty query, a bad buffer size and a zero timeout.
    pub fn validate(&self) -> Result<()> {
        self.endpoint().validate()?;
        check_buffer_size(self.buffer_size)?;
        if self.query.is_empty() {
            return Err(CsqError::InvalidConfig("query must not be empty".to_string()));
        }
        if self.timeout_ms == Some(0) {
            return Err(CsqError::InvalidConfig("timeout_ms must be > 0".to_string()));
        }
        Ok(())
    }

    /// Endpoint built from the transport fields.
    pub fn endpoint(&self) -> TransportEndpoint {
        TransportEndpoint {
            trtype: self.trtype.clone(),
            adrfam: self.adrfam.clone(),
            traddr: self.traddr.clone(),
            trsvcid: self.trsvcid.clone(),
            subnqn: self.subnqn.clone(),
        }
    }

    /// The configured query against the configured object.
    pub fn request(&self) -> QueryRequest {
        QueryRequest::new(self.query.clone(), self.object_id)
    }

    /// Session options, cancelled by `cancel`.
    pub fn session_options(&self, cancel: CancellationToken) -> SessionOptions {
        let mut options = SessionOptions::default()
            .with_cancellation(cancel)
            .with_buffer_size(self.buffer_size)
            .with_poll_batch(self.poll_batch);
        if let Some(ms) = self.timeout_ms {
            options = options.with_timeout(Duration::from_millis(ms));
        }
        options
    }
}
