//! Client builder and one-shot query driver.
//!
//! The [`QueryClientBuilder`] provides a fluent API for the endpoint and
//! session knobs. The [`QueryClient`] runs each query through the full
//! lifecycle:
//! 1. Discover and attach the subsystem
//! 2. Run a [`QuerySession`] on it
//! 3. Detach
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use csq_client::transport::{LoopbackSubsystem, LoopbackTransport};
//! use csq_client::{QueryClientBuilder, QueryRequest};
//!
//! let transport = LoopbackTransport::new().with_subsystem(
//!     LoopbackSubsystem::new("nqn.test:subsystem1").with_object(3, "id,name\n1,a\n"),
//! );
//! let client = QueryClientBuilder::new()
//!     .subnqn("nqn.test:subsystem1")
//!     .timeout(Duration::from_secs(5))
//!     .build(&transport)
//!     .unwrap();
//!
//! let outcome = client.run(&QueryRequest::new("SELECT * FROM s3object", 3)).unwrap();
//! assert_eq!(outcome.bytes_transferred, 12);
//! ```

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::buffer::check_buffer_size;
use crate::error::Result;
use crate::locator::ControllerLocator;
use crate::query::{QueryOutcome, QueryRequest};
use crate::session::{QuerySession, SessionOptions};
use crate::transport::{Transport, TransportEndpoint};

/// Default transport type.
pub const DEFAULT_TRTYPE: &str = "tcp";
/// Default address family.
pub const DEFAULT_ADRFAM: &str = "ipv4";
/// Default target address.
pub const DEFAULT_TRADDR: &str = "127.0.0.1";
/// Default service id.
pub const DEFAULT_TRSVCID: &str = "4420";
/// Default subsystem name.
pub const DEFAULT_SUBNQN: &str = "nqn.2023-10.gov.lanl:xxx:ssd1";

/// Endpoint with every field at its default.
pub fn default_endpoint() -> TransportEndpoint {
    TransportEndpoint {
        trtype: DEFAULT_TRTYPE.to_string(),
        adrfam: DEFAULT_ADRFAM.to_string(),
        traddr: DEFAULT_TRADDR.to_string(),
        trsvcid: DEFAULT_TRSVCID.to_string(),
        subnqn: DEFAULT_SUBNQN.to_string(),
    }
}

/// Builder for configuring a [`QueryClient`].
pub struct QueryClientBuilder {
    endpoint: TransportEndpoint,
    options: SessionOptions,
}

impl QueryClientBuilder {
    /// Create a new builder with default endpoint and options.
    pub fn new() -> Self {
        Self {
            endpoint: default_endpoint(),
            options: SessionOptions::default(),
        }
    }

    /// Replace the whole endpoint.
    pub fn endpoint(mut self, endpoint: TransportEndpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Transport type (`tcp`, `rdma`, `loopback`).
    ///
    /// Default: tcp
    pub fn trtype(mut self, trtype: &str) -> Self {
        self.endpoint.trtype = trtype.to_string();
        self
    }

    /// Address family.
    ///
    /// Default: ipv4
    pub fn adrfam(mut self, adrfam: &str) -> Self {
        self.endpoint.adrfam = adrfam.to_string();
        self
    }

    /// Target address.
    ///
    /// Default: 127.0.0.1
    pub fn traddr(mut self, traddr: &str) -> Self {
        self.endpoint.traddr = traddr.to_string();
        self
    }

    /// Service id, usually the port.
    ///
    /// Default: 4420
    pub fn trsvcid(mut self, trsvcid: &str) -> Self {
        self.endpoint.trsvcid = trsvcid.to_string();
        self
    }

    /// Subsystem to attach (exact match).
    pub fn subnqn(mut self, subnqn: &str) -> Self {
        self.endpoint.subnqn = subnqn.to_string();
        self
    }

    /// Replace all session options.
    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Bound each query run.
    ///
    /// Default: no timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Cancel in-flight queries when `token` fires.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.options.cancel = Some(token);
        self
    }

    /// Set the result buffer size.
    ///
    /// Default: 4096
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.options.buffer_size = size;
        self
    }

    /// Set the completions reaped per poll.
    ///
    /// Default: 0 (all available)
    pub fn poll_batch(mut self, batch: u32) -> Self {
        self.options.poll_batch = batch;
        self
    }

    /// Validate and bind to `transport`.
    pub fn build<T: Transport>(self, transport: &T) -> Result<QueryClient<'_, T>> {
        self.endpoint.validate()?;
        check_buffer_size(self.options.buffer_size)?;
        Ok(QueryClient {
            transport,
            endpoint: self.endpoint,
            options: self.options,
        })
    }
}

impl Default for QueryClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs queries against one endpoint.
pub struct QueryClient<'t, T: Transport> {
    transport: &'t T,
    endpoint: TransportEndpoint,
    options: SessionOptions,
}

impl<'t, T: Transport> QueryClient<'t, T> {
    /// Configured endpoint.
    pub fn endpoint(&self) -> &TransportEndpoint {
        &self.endpoint
    }

    /// Run one query: attach, execute, detach.
    pub fn run(&self, request: &QueryRequest) -> Result<QueryOutcome> {
        // 1. Attach the subsystem
        let ctrlr = ControllerLocator::new(self.transport).locate_endpoint(&self.endpoint)?;

        // 2. Run the session (resources are released inside)
        let outcome = {
            let mut session =
                QuerySession::new(self.transport, ctrlr.controller(), self.options.clone());
            session.run(request)
        };

        // 3. Detach
        ctrlr.detach();
        let outcome = outcome?;
        info!("Done!");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CsqError;
    use crate::transport::{LoopbackSubsystem, LoopbackTransport};

    #[test]
    fn test_builder_defaults() {
        let transport = LoopbackTransport::new();
        let client = QueryClientBuilder::new().build(&transport).unwrap();
        assert_eq!(client.endpoint(), &default_endpoint());
        assert_eq!(client.endpoint().subnqn, "nqn.2023-10.gov.lanl:xxx:ssd1");
    }

    #[test]
    fn test_builder_method_chaining() {
        let transport = LoopbackTransport::new();
        let client = QueryClientBuilder::new()
            .trtype("loopback")
            .adrfam("ipv4")
            .traddr("10.0.0.2")
            .trsvcid("4421")
            .subnqn("nqn.x")
            .buffer_size(8192)
            .poll_batch(4)
            .build(&transport)
            .unwrap();
        assert_eq!(client.endpoint().trtype, "loopback");
        assert_eq!(client.endpoint().adrfam, "ipv4");
        assert_eq!(client.endpoint().traddr, "10.0.0.2");
        assert_eq!(client.endpoint().trsvcid, "4421");
        assert_eq!(client.options.buffer_size, 8192);
    }

    #[test]
    fn test_build_rejects_bad_values() {
        let transport = LoopbackTransport::new();
        assert!(matches!(
            QueryClientBuilder::new().traddr(" ").build(&transport).err(),
            Some(CsqError::InvalidConfig(_))
        ));
        assert!(matches!(
            QueryClientBuilder::new().buffer_size(0).build(&transport).err(),
            Some(CsqError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_run_detaches_on_success_and_failure() {
        let transport = LoopbackTransport::new()
            .with_subsystem(LoopbackSubsystem::new("nqn.a").with_object(0, "r\n"));
        let client = QueryClientBuilder::new().subnqn("nqn.a").build(&transport).unwrap();

        assert_eq!(client.run(&QueryRequest::new("q", 0)).unwrap().text(), "r\n");
        assert_eq!(transport.attached_controllers(), 0);

        // Unknown object fails the plan.
        assert!(client.run(&QueryRequest::new("q", 9)).is_err());
        assert_eq!(transport.attached_controllers(), 0);
        assert_eq!(transport.outstanding_qpairs(), 0);
    }
}
