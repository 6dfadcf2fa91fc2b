//! Packed command flags (dword 3).
//!
//! ```text
//! ┌──────────┬───────────────┬───────────────┬─────────────────────────┐
//! │ 31..24   │ 23..16        │ 15..8         │ 7..0                    │
//! │ reserved │ query dialect │ output format │ bit 0, bit 1 per opcode │
//! └──────────┴───────────────┴───────────────┴─────────────────────────┘
//! ```
//!
//! For `0x95` bit 0 is "run" and bit 1 is "wait"; for `0x92` bit 0 is
//! "return header" and bit 1 is "release resource".

const DIALECT_SHIFT: u32 = 16;
const FORMAT_SHIFT: u32 = 8;
const BIT0: u32 = 0b01;
const BIT1: u32 = 0b10;

/// Query dialect understood by the remote engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QueryDialect {
    /// S3 Select style SQL.
    S3Select = 0x02,
}

/// Format the remote engine renders results in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputFormat {
    /// Comma-separated values.
    Csv = 0x02,
}

/// Flags for the write execution plan command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanFlags {
    pub dialect: QueryDialect,
    pub format: OutputFormat,
    /// Execute the plan right after it is written.
    pub run: bool,
    /// Complete the command only once execution has finished.
    pub wait: bool,
}

impl PlanFlags {
    /// Pack into the dword 3 value.
    ///
    /// ```
    /// use csq_client::protocol::PlanFlags;
    ///
    /// assert_eq!(PlanFlags::default().encode(), 0x020203);
    /// ```
    pub fn encode(&self) -> u32 {
        pack(
            self.dialect as u8,
            self.format as u8,
            self.run,
            self.wait,
        )
    }
}

impl Default for PlanFlags {
    fn default() -> Self {
        Self {
            dialect: QueryDialect::S3Select,
            format: OutputFormat::Csv,
            run: true,
            wait: true,
        }
    }
}

/// Flags for the get compute result command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchFlags {
    pub dialect: QueryDialect,
    pub format: OutputFormat,
    /// Prepend a header row to the result.
    pub header: bool,
    /// Free the plan on the remote side once the result is returned.
    pub release: bool,
}

impl FetchFlags {
    /// Pack into the dword 3 value.
    ///
    /// ```
    /// use csq_client::protocol::FetchFlags;
    ///
    /// assert_eq!(FetchFlags::default().encode(), 0x020202);
    /// ```
    pub fn encode(&self) -> u32 {
        pack(
            self.dialect as u8,
            self.format as u8,
            self.header,
            self.release,
        )
    }
}

impl Default for FetchFlags {
    fn default() -> Self {
        Self {
            dialect: QueryDialect::S3Select,
            format: OutputFormat::Csv,
            header: false,
            release: true,
        }
    }
}

#[inline]
fn pack(dialect: u8, format: u8, bit0: bool, bit1: bool) -> u32 {
    let mut v = (u32::from(dialect) << DIALECT_SHIFT) | (u32::from(format) << FORMAT_SHIFT);
    if bit0 {
        v |= BIT0;
    }
    if bit1 {
        v |= BIT1;
    }
    v
}

/// Split a dword 3 value into (dialect, format, bit 0, bit 1).
#[inline]
pub fn unpack(raw: u32) -> (u8, u8, bool, bool) {
    (
        (raw >> DIALECT_SHIFT) as u8,
        (raw >> FORMAT_SHIFT) as u8,
        raw & BIT0 != 0,
        raw & BIT1 != 0,
    )
}
