//! # csq-client
//!
//! Client for offloading queries to a computational-storage controller over
//! a block-command transport.
//!
//! A query runs as a two-phase exchange on one I/O queue pair:
//!
//! - **Write execution plan** (`0x95`): the query text is staged in a DMA
//!   buffer; the controller answers with a plan id and the result size
//! - **Get compute result** (`0x92`): the controller fills the same
//!   (re-zeroed) buffer with CSV and reports how many bytes it wrote
//!
//! Discovery, queue pairs, DMA memory and completion polling come from a
//! driver behind the [`transport::Transport`] trait. The in-process
//! [`transport::LoopbackTransport`] target implements it for tests and
//! local runs.
//!
//! ## Example
//!
//! ```
//! use csq_client::transport::{LoopbackSubsystem, LoopbackTransport};
//! use csq_client::{QueryClientBuilder, QueryRequest};
//!
//! let transport = LoopbackTransport::new().with_subsystem(
//!     LoopbackSubsystem::new("nqn.2023-10.gov.lanl:xxx:ssd1").with_object(0, "VID,X\n1,1.55\n"),
//! );
//! let client = QueryClientBuilder::new().build(&transport).unwrap();
//! let outcome = client.run(&QueryRequest::new("SELECT * FROM s3object", 0)).unwrap();
//! assert_eq!(outcome.text(), "VID,X\n1,1.55\n");
//! ```

pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod locator;
pub mod output;
pub mod protocol;
pub mod session;
pub mod transport;

mod client;
mod query;

pub use client::{default_endpoint, QueryClient, QueryClientBuilder};
pub use error::{CsqError, Phase, Result, TransportError};
pub use query::{ExecutionPlan, OutcomeSummary, QueryOutcome, QueryRequest, SizeMismatch};
pub use session::{QuerySession, SessionOptions, SessionState};
