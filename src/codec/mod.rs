//! Codec module - the two vendor commands and their completions.
//!
//! - [`WriteExecutionPlan`] (`0x95`) carries the query text and yields a
//!   [`PlanAccepted`] completion (plan id, declared result size).
//! - [`GetComputeResult`] (`0x92`) fetches the result and yields a
//!   [`ResultFetched`] completion (bytes transferred, bytes available).
//!
//! # Design
//!
//! Commands are plain structs with `encode`/`decode` against the fixed
//! [`Command`](crate::protocol::Command) layout. Completions are decoded per
//! phase, since the same two result words mean different things for each
//! opcode.
//!
//! # Example
//!
//! ```
//! use csq_client::codec::{GetComputeResult, WriteExecutionPlan};
//!
//! let plan = WriteExecutionPlan::single_shot(b"SELECT * FROM s3object", 0).unwrap();
//! let cmd = plan.encode();
//! assert_eq!(cmd.opc, 0x95);
//! assert_eq!(cmd.rsvd3, 0x020203);
//!
//! let fetch = GetComputeResult::new(4096, 7).unwrap();
//! let cmd = fetch.encode();
//! assert_eq!(cmd.opc, 0x92);
//! assert_eq!(cmd.cdw11(), 7 << 16);
//! ```

mod fetch;
mod plan;

pub use fetch::{GetComputeResult, ResultFetched};
pub use plan::{PlanAccepted, WriteExecutionPlan};

use crate::error::{CsqError, Result};
use crate::protocol::Command;

/// Reject a command whose opcode does not match the expected one.
pub(crate) fn expect_opcode(cmd: &Command, opc: u8) -> Result<()> {
    if cmd.opc != opc {
        return Err(CsqError::Protocol(format!(
            "Expected opcode {:#04x}, got {:#04x}",
            opc, cmd.opc
        )));
    }
    Ok(())
}
