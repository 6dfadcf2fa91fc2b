//! Transport identification strings.
//!
//! Format: `trtype:<T> adrfam:<F> traddr:<A> trsvcid:<P> subnqn:<N>`
//!
//! Keys are case-insensitive and separated by whitespace. Values may
//! contain `:` (only the first one splits key from value).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CsqError, Result};

/// Well-known name of the fabric discovery service.
pub const DISCOVERY_NQN: &str = "nqn.2014-08.org.nvmexpress.discovery";

/// Parsed transport identification.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransportId {
    /// Transport type (e.g. `tcp`, `rdma`).
    pub trtype: String,
    /// Address family (e.g. `ipv4`).
    pub adrfam: String,
    /// Transport address.
    pub traddr: String,
    /// Transport service id (port).
    pub trsvcid: String,
    /// Subsystem name.
    pub subnqn: String,
}

impl TransportId {
    /// Transport id addressing the discovery service at an endpoint.
    pub fn discovery(trtype: &str, adrfam: &str, traddr: &str, trsvcid: &str) -> Self {
        Self {
            trtype: trtype.to_string(),
            adrfam: adrfam.to_string(),
            traddr: traddr.to_string(),
            trsvcid: trsvcid.to_string(),
            subnqn: DISCOVERY_NQN.to_string(),
        }
    }

    /// Same endpoint, different subsystem.
    pub fn with_subnqn(&self, subnqn: &str) -> Self {
        Self {
            subnqn: subnqn.to_string(),
            ..self.clone()
        }
    }

    /// Parse a transport identification string.
    ///
    /// # Example
    ///
    /// ```
    /// use csq_client::transport::TransportId;
    ///
    /// let trid = TransportId::parse("trtype:tcp adrfam:ipv4 traddr:10.0.0.2 trsvcid:4420").unwrap();
    /// assert_eq!(trid.traddr, "10.0.0.2");
    /// ```
    pub fn parse(s: &str) -> Result<Self> {
        let mut trid = Self::default();
        for token in s.split_whitespace() {
            let (key, value) = token.split_once(':').ok_or_else(|| {
                CsqError::InvalidTransportId(format!("expected key:value, got '{}'", token))
            })?;
            if value.is_empty() {
                return Err(CsqError::InvalidTransportId(format!(
                    "empty value for '{}'",
                    key
                )));
            }
            let slot = match key.to_ascii_lowercase().as_str() {
                "trtype" => &mut trid.trtype,
                "adrfam" => &mut trid.adrfam,
                "traddr" => &mut trid.traddr,
                "trsvcid" => &mut trid.trsvcid,
                "subnqn" => &mut trid.subnqn,
                _ => {
                    return Err(CsqError::InvalidTransportId(format!(
                        "unknown key '{}'",
                        key
                    )))
                }
            };
            *slot = value.to_string();
        }
        if trid.trtype.is_empty() {
            return Err(CsqError::InvalidTransportId("missing trtype".to_string()));
        }
        Ok(trid)
    }

    /// Short URL-ish form used in discovery logs.
    pub fn display_url(&self) -> String {
        format!(
            "{}+{}://{}:{}/{}",
            self.trtype, self.adrfam, self.traddr, self.trsvcid, self.subnqn
        )
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = [
            ("trtype", &self.trtype),
            ("adrfam", &self.adrfam),
            ("traddr", &self.traddr),
            ("trsvcid", &self.trsvcid),
            ("subnqn", &self.subnqn),
        ];
        let mut first = true;
        for (key, value) in fields {
            if value.is_empty() {
                continue;
            }
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}:{}", key, value)?;
            first = false;
        }
        Ok(())
    }
}

/// Where to find the target: a fabric endpoint plus the subsystem to attach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportEndpoint {
    pub trtype: String,
    pub adrfam: String,
    pub traddr: String,
    pub trsvcid: String,
    /// Exact name of the subsystem to attach.
    pub subnqn: String,
}

impl TransportEndpoint {
    /// Transport id for discovery at this endpoint.
    pub fn discovery_trid(&self) -> TransportId {
        TransportId::discovery(&self.trtype, &self.adrfam, &self.traddr, &self.trsvcid)
    }

    /// Subsystem filter for the locator.
    pub fn subsystem_filter(&self) -> &str {
        &self.subnqn
    }

    /// Check that every field is set.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("trtype", &self.trtype),
            ("adrfam", &self.adrfam),
            ("traddr", &self.traddr),
            ("trsvcid", &self.trsvcid),
            ("subnqn", &self.subnqn),
        ] {
            if value.trim().is_empty() {
                return Err(CsqError::InvalidConfig(format!("{} must not be empty", name)));
            }
        }
        Ok(())
    }
}
