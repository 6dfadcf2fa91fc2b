//! Fixed command layout.
//!
//! Vendor commands ride in the transport's 64-byte submission entry:
//! ```text
//! ┌────────┬──────┬────────┬────────┬──────────┬──────────┬────────┬─────────┬──────────────┐
//! │ Opcode │ Fuse │ Cmd ID │ NSID   │ Dword 2  │ Dword 3  │ MPTR   │ DPTR    │ Dwords 10-15 │
//! │ 1 byte │ 1 B  │ 2 B    │ 4 B    │ obj space│ flags    │ 8 B    │ 16 B    │ 6 x 4 B      │
//! └────────┴──────┴────────┴────────┴──────────┴──────────┴────────┴─────────┴──────────────┘
//! ```
//!
//! All multi-byte integers are Little Endian. The data pointer is owned by
//! the transport, which fills it from the buffer handed to the submission.

use crate::error::{CsqError, Result};

/// Command size in bytes (fixed, exactly 64).
pub const COMMAND_SIZE: usize = 64;

/// Namespace every vendor command targets.
pub const DEFAULT_NSID: u32 = 0x1;

/// Plan id sentinel meaning "no plan assigned yet".
pub const PLAN_ID_UNASSIGNED: u32 = 0xFFFF_0000;

/// Vendor opcodes.
pub mod opcode {
    /// Write execution plan.
    pub const WRITE_EXECUTION_PLAN: u8 = 0x95;
    /// Get compute result.
    pub const GET_COMPUTE_RESULT: u8 = 0x92;
}

/// A submission entry in the transport's fixed layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Command {
    /// Opcode.
    pub opc: u8,
    /// Command identifier (assigned by the transport on submission).
    pub cid: u16,
    /// Namespace id.
    pub nsid: u32,
    /// Dword 2: object space selector.
    pub rsvd2: u32,
    /// Dword 3: packed command flags.
    pub rsvd3: u32,
    /// Dwords 10 through 15.
    pub cdw: [u32; 6],
}

impl Command {
    /// Create a zeroed command with the given opcode and namespace.
    pub fn new(opc: u8, nsid: u32) -> Self {
        Self {
            opc,
            nsid,
            ..Self::default()
        }
    }

    /// Dword 10 (first argument).
    #[inline]
    pub fn cdw10(&self) -> u32 {
        self.cdw[0]
    }

    /// Dword 11.
    #[inline]
    pub fn cdw11(&self) -> u32 {
        self.cdw[1]
    }

    /// Dword 12.
    #[inline]
    pub fn cdw12(&self) -> u32 {
        self.cdw[2]
    }

    /// Dword 13.
    #[inline]
    pub fn cdw13(&self) -> u32 {
        self.cdw[3]
    }

    /// Dword 14.
    #[inline]
    pub fn cdw14(&self) -> u32 {
        self.cdw[4]
    }

    /// Dword 15.
    #[inline]
    pub fn cdw15(&self) -> u32 {
        self.cdw[5]
    }

    /// Encode to the 64-byte wire layout.
    ///
    /// # Example
    ///
    /// ```
    /// use csq_client::protocol::{Command, COMMAND_SIZE};
    ///
    /// let cmd = Command::new(0x95, 1);
    /// let bytes = cmd.encode();
    /// assert_eq!(bytes.len(), COMMAND_SIZE);
    /// assert_eq!(bytes[0], 0x95);
    /// ```
    pub fn encode(&self) -> [u8; COMMAND_SIZE] {
        let mut buf = [0u8; COMMAND_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `COMMAND_SIZE` (64 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= COMMAND_SIZE);
        buf[..COMMAND_SIZE].fill(0);
        buf[0] = self.opc;
        buf[2..4].copy_from_slice(&self.cid.to_le_bytes());
        buf[4..8].copy_from_slice(&self.nsid.to_le_bytes());
        buf[8..12].copy_from_slice(&self.rsvd2.to_le_bytes());
        buf[12..16].copy_from_slice(&self.rsvd3.to_le_bytes());
        // 16..40: metadata and data pointers, left for the transport.
        for (i, dw) in self.cdw.iter().enumerate() {
            let off = 40 + i * 4;
            buf[off..off + 4].copy_from_slice(&dw.to_le_bytes());
        }
    }

    /// Decode from the 64-byte wire layout.
    ///
    /// Pointer fields are ignored. Returns an error if the buffer is short
    /// or the fuse/PSDT byte is non-zero.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < COMMAND_SIZE {
            return Err(CsqError::Protocol(format!(
                "Command needs {} bytes, got {}",
                COMMAND_SIZE,
                buf.len()
            )));
        }
        if buf[1] != 0 {
            return Err(CsqError::Protocol(format!(
                "Fuse/PSDT byte must be 0, got {:#x}",
                buf[1]
            )));
        }
        let dword =
            |off: usize| u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
        let mut cdw = [0u32; 6];
        for (i, dw) in cdw.iter_mut().enumerate() {
            *dw = dword(40 + i * 4);
        }
        Ok(Self {
            opc: buf[0],
            cid: u16::from_le_bytes([buf[2], buf[3]]),
            nsid: dword(4),
            rsvd2: dword(8),
            rsvd3: dword(12),
            cdw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_size_is_exactly_64() {
        assert_eq!(COMMAND_SIZE, 64);
        assert_eq!(Command::new(0x95, 1).encode().len(), 64);
    }

    #[test]
    fn test_field_offsets_little_endian() {
        let mut cmd = Command::new(opcode::WRITE_EXECUTION_PLAN, DEFAULT_NSID);
        cmd.cid = 0x0102;
        cmd.rsvd2 = 0;
        cmd.rsvd3 = 0x0002_0203;
        cmd.cdw = [0x11, 0x22, PLAN_ID_UNASSIGNED, 0, 0x11, 0];
        let bytes = cmd.encode();

        assert_eq!(bytes[0], 0x95);
        assert_eq!(bytes[1], 0);
        assert_eq!(&bytes[2..4], &[0x02, 0x01]);
        assert_eq!(&bytes[4..8], &[0x01, 0, 0, 0]);
        assert_eq!(&bytes[8..12], &[0, 0, 0, 0]);
        assert_eq!(&bytes[12..16], &[0x03, 0x02, 0x02, 0x00]);
        assert!(bytes[16..40].iter().all(|b| *b == 0));
        assert_eq!(&bytes[40..44], &[0x11, 0, 0, 0]);
        assert_eq!(&bytes[44..48], &[0x22, 0, 0, 0]);
        assert_eq!(&bytes[48..52], &[0x00, 0x00, 0xFF, 0xFF]);
        assert_eq!(&bytes[56..60], &[0x11, 0, 0, 0]);
    }

    #[test]
    fn test_decode_reads_back_fields() {
        let mut cmd = Command::new(opcode::GET_COMPUTE_RESULT, DEFAULT_NSID);
        cmd.rsvd3 = 0x0002_0202;
        cmd.cdw[0] = 4096;
        cmd.cdw[1] = 7 << 16;
        let decoded = Command::decode(&cmd.encode()).unwrap();
        assert_eq!(decoded, cmd);
        assert_eq!(decoded.cdw10(), 4096);
        assert_eq!(decoded.cdw11(), 7 << 16);
        assert_eq!(decoded.cdw13(), 0);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; 63];
        assert!(Command::decode(&buf).is_err());
    }

    #[test]
    fn test_decode_rejects_fused_command() {
        let mut bytes = Command::new(0x95, 1).encode();
        bytes[1] = 0x40;
        let err = Command::decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("Fuse/PSDT"));
    }

    #[test]
    fn test_encode_into_clears_stale_bytes() {
        let mut buf = [0xAAu8; COMMAND_SIZE];
        Command::new(0x92, 1).encode_into(&mut buf);
        assert_eq!(buf[0], 0x92);
        assert!(buf[16..40].iter().all(|b| *b == 0));
    }
}
