//! Completion entry with typed accessors.
//!
//! Implements the 16-byte completion format:
//! ```text
//! ┌──────────┬──────────┬────────┬────────┬────────┬────────┐
//! │ Dword 0  │ Dword 1  │ SQ Head│ SQ ID  │ Cmd ID │ Status │
//! │ "low"    │ "high"   │ 2 B    │ 2 B    │ 2 B    │ 2 B    │
//! └──────────┴──────────┴────────┴────────┴────────┴────────┘
//! ```
//!
//! The two result words mean different things per opcode; see
//! [`crate::codec`] for the per-phase interpretation.

use crate::error::{CsqError, Result};

/// Completion size in bytes (fixed, exactly 16).
pub const COMPLETION_SIZE: usize = 16;

/// Status code types.
pub mod sct {
    pub const GENERIC: u8 = 0x0;
    pub const COMMAND_SPECIFIC: u8 = 0x1;
    pub const MEDIA_ERROR: u8 = 0x2;
    pub const PATH: u8 = 0x3;
    pub const VENDOR_SPECIFIC: u8 = 0x7;
}

/// Decoded status half-word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status {
    /// Phase tag (bit 0).
    pub phase: bool,
    /// Status code (bits 1-8).
    pub code: u8,
    /// Status code type (bits 9-11).
    pub code_type: u8,
    /// Command retry delay (bits 12-13).
    pub retry_delay: u8,
    /// More information available (bit 14).
    pub more: bool,
    /// Do not retry (bit 15).
    pub do_not_retry: bool,
}

impl Status {
    /// Successful status.
    pub const SUCCESS: Status = Status {
        phase: false,
        code: 0,
        code_type: 0,
        retry_delay: 0,
        more: false,
        do_not_retry: false,
    };

    /// Build a status with the given type and code.
    pub fn new(code_type: u8, code: u8) -> Self {
        Self {
            code_type: code_type & 0x7,
            code,
            ..Self::SUCCESS
        }
    }

    /// Decode the raw half-word.
    pub fn from_raw(raw: u16) -> Self {
        Self {
            phase: raw & 0x1 != 0,
            code: ((raw >> 1) & 0xFF) as u8,
            code_type: ((raw >> 9) & 0x7) as u8,
            retry_delay: ((raw >> 12) & 0x3) as u8,
            more: raw & (1 << 14) != 0,
            do_not_retry: raw & (1 << 15) != 0,
        }
    }

    /// Encode to the raw half-word.
    pub fn to_raw(&self) -> u16 {
        let mut raw = (u16::from(self.code) << 1)
            | (u16::from(self.code_type & 0x7) << 9)
            | (u16::from(self.retry_delay & 0x3) << 12);
        if self.phase {
            raw |= 1;
        }
        if self.more {
            raw |= 1 << 14;
        }
        if self.do_not_retry {
            raw |= 1 << 15;
        }
        raw
    }

    /// Mark as "do not retry".
    pub fn with_dnr(mut self) -> Self {
        self.do_not_retry = true;
        self
    }

    /// Check if this status is an error.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.code != 0 || self.code_type != 0
    }

    /// Check if the failed command may be resubmitted.
    ///
    /// Only generic and path-related statuses without DNR qualify.
    pub fn is_retryable(&self) -> bool {
        self.is_error()
            && !self.do_not_retry
            && matches!(self.code_type, sct::GENERIC | sct::PATH)
    }

    /// Human-readable status string.
    pub fn description(&self) -> String {
        let text = match (self.code_type, self.code) {
            (sct::GENERIC, 0x00) => "SUCCESS",
            (sct::GENERIC, 0x01) => "INVALID OPCODE",
            (sct::GENERIC, 0x02) => "INVALID FIELD",
            (sct::GENERIC, 0x03) => "COMMAND ID CONFLICT",
            (sct::GENERIC, 0x04) => "DATA TRANSFER ERROR",
            (sct::GENERIC, 0x05) => "ABORTED - POWER LOSS",
            (sct::GENERIC, 0x06) => "INTERNAL DEVICE ERROR",
            (sct::GENERIC, 0x07) => "ABORTED - BY REQUEST",
            (sct::GENERIC, 0x08) => "ABORTED - SQ DELETION",
            (sct::GENERIC, 0x09) => "ABORTED - FAILED FUSED",
            (sct::GENERIC, 0x0A) => "ABORTED - MISSING FUSED",
            (sct::GENERIC, 0x0B) => "INVALID NAMESPACE OR FORMAT",
            (sct::GENERIC, 0x0C) => "COMMAND SEQUENCE ERROR",
            (sct::GENERIC, 0x80) => "LBA OUT OF RANGE",
            (sct::GENERIC, 0x81) => "CAPACITY EXCEEDED",
            (sct::GENERIC, 0x82) => "NAMESPACE NOT READY",
            (sct::PATH, 0x00) => "INTERNAL PATH ERROR",
            (sct::PATH, 0x01) => "ASYMMETRIC ACCESS PERSISTENT LOSS",
            (sct::PATH, 0x02) => "ASYMMETRIC ACCESS INACCESSIBLE",
            (sct::PATH, 0x03) => "ASYMMETRIC ACCESS TRANSITION",
            (sct::PATH, 0x60) => "CONTROLLER PATHING ERROR",
            (sct::PATH, 0x70) => "HOST PATHING ERROR",
            (sct::PATH, 0x71) => "COMMAND ABORTED BY HOST",
            (sct::VENDOR_SPECIFIC, _) => "VENDOR SPECIFIC",
            _ => "UNKNOWN",
        };
        format!("{} ({:02x}/{:02x})", text, self.code_type, self.code)
    }
}

/// A completion entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Completion {
    /// Dword 0 ("low" result word).
    pub cdw0: u32,
    /// Dword 1 ("high" result word).
    pub cdw1: u32,
    /// Submission queue head pointer.
    pub sqhd: u16,
    /// Submission queue id.
    pub sqid: u16,
    /// Identifier of the command this completes.
    pub cid: u16,
    /// Completion status.
    pub status: Status,
}

impl Completion {
    /// Create a successful completion for the given command id.
    pub fn success(cid: u16, cdw0: u32, cdw1: u32) -> Self {
        Self {
            cdw0,
            cdw1,
            cid,
            ..Self::default()
        }
    }

    /// Create a failed completion for the given command id.
    pub fn error(cid: u16, status: Status) -> Self {
        Self {
            cid,
            status,
            ..Self::default()
        }
    }

    /// The "low" result word.
    #[inline]
    pub fn low(&self) -> u32 {
        self.cdw0
    }

    /// The "high" result word.
    #[inline]
    pub fn high(&self) -> u32 {
        self.cdw1
    }

    /// Check if this completion reports an error.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.status.is_error()
    }

    /// Encode to the 16-byte wire layout (Little Endian).
    pub fn encode(&self) -> [u8; COMPLETION_SIZE] {
        let mut buf = [0u8; COMPLETION_SIZE];
        buf[0..4].copy_from_slice(&self.cdw0.to_le_bytes());
        buf[4..8].copy_from_slice(&self.cdw1.to_le_bytes());
        buf[8..10].copy_from_slice(&self.sqhd.to_le_bytes());
        buf[10..12].copy_from_slice(&self.sqid.to_le_bytes());
        buf[12..14].copy_from_slice(&self.cid.to_le_bytes());
        buf[14..16].copy_from_slice(&self.status.to_raw().to_le_bytes());
        buf
    }

    /// Decode from the 16-byte wire layout.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < COMPLETION_SIZE {
            return Err(CsqError::Protocol(format!(
                "Completion needs {} bytes, got {}",
                COMPLETION_SIZE,
                buf.len()
            )));
        }
        Ok(Self {
            cdw0: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            cdw1: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            sqhd: u16::from_le_bytes([buf[8], buf[9]]),
            sqid: u16::from_le_bytes([buf[10], buf[11]]),
            cid: u16::from_le_bytes([buf[12], buf[13]]),
            status: Status::from_raw(u16::from_le_bytes([buf[14], buf[15]])),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_is_not_error() {
        let cpl = Completion::success(1, 7, 120);
        assert!(!cpl.is_error());
        assert_eq!(cpl.low(), 7);
        assert_eq!(cpl.high(), 120);
    }

    #[test]
    fn test_status_bit_layout() {
        // sc=0x04, sct=0x1, crd=2, more, dnr, phase
        let raw: u16 = 1 | (0x04 << 1) | (0x1 << 9) | (0x2 << 12) | (1 << 14) | (1 << 15);
        let status = Status::from_raw(raw);
        assert!(status.phase);
        assert_eq!(status.code, 0x04);
        assert_eq!(status.code_type, 0x1);
        assert_eq!(status.retry_delay, 0x2);
        assert!(status.more);
        assert!(status.do_not_retry);
        assert_eq!(status.to_raw(), raw);
    }

    #[test]
    fn test_phase_bit_alone_is_not_error() {
        assert!(!Status::from_raw(0x1).is_error());
    }

    #[test]
    fn test_retry_classification() {
        assert!(Status::new(sct::GENERIC, 0x04).is_retryable());
        assert!(Status::new(sct::PATH, 0x00).is_retryable());
        assert!(!Status::new(sct::GENERIC, 0x04).with_dnr().is_retryable());
        assert!(!Status::new(sct::MEDIA_ERROR, 0x81).is_retryable());
        assert!(!Status::new(sct::COMMAND_SPECIFIC, 0x02).is_retryable());
        assert!(!Status::SUCCESS.is_retryable());
    }

    #[test]
    fn test_description() {
        assert_eq!(
            Status::new(sct::GENERIC, 0x01).description(),
            "INVALID OPCODE (00/01)"
        );
        assert!(Status::new(sct::VENDOR_SPECIFIC, 0x33)
            .description()
            .starts_with("VENDOR SPECIFIC"));
        assert!(Status::new(sct::MEDIA_ERROR, 0x99)
            .description()
            .starts_with("UNKNOWN"));
    }

    #[test]
    fn test_completion_wire_layout() {
        let cpl = Completion {
            cdw0: 0x0102_0304,
            cdw1: 120,
            sqhd: 3,
            sqid: 1,
            cid: 0x00AB,
            status: Status::new(sct::GENERIC, 0x02),
        };
        let bytes = cpl.encode();
        assert_eq!(&bytes[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[4..8], &[120, 0, 0, 0]);
        // No reserved dword: sq head follows dword 1 directly.
        assert_eq!(&bytes[8..10], &[3, 0]);
        assert_eq!(&bytes[10..12], &[1, 0]);
        assert_eq!(&bytes[12..14], &[0xAB, 0x00]);
        assert_eq!(&bytes[14..16], &[0x04, 0x00]);
        assert_eq!(Completion::decode(&bytes).unwrap(), cpl);
    }

    #[test]
    fn test_decode_too_short() {
        assert!(Completion::decode(&[0u8; 15]).is_err());
    }
}
