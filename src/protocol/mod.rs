//! Protocol module - fixed command/completion layouts and packed flags.
//!
//! This module implements the wire structures shared with the transport:
//! - 64-byte submission entry ([`Command`])
//! - 16-byte completion entry ([`Completion`]) and its [`Status`]
//! - Packed dword 3 flags ([`PlanFlags`], [`FetchFlags`])

mod completion;
mod flags;
mod wire_format;

pub use completion::{sct, Completion, Status, COMPLETION_SIZE};
pub use flags::{unpack as unpack_flags, FetchFlags, OutputFormat, PlanFlags, QueryDialect};
pub use wire_format::{opcode, Command, COMMAND_SIZE, DEFAULT_NSID, PLAN_ID_UNASSIGNED};
