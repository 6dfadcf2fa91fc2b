//! Get compute result (`0x92`).

use super::expect_opcode;
use crate::error::{CsqError, Result};
use crate::protocol::{
    opcode, unpack_flags, Command, Completion, FetchFlags, OutputFormat, QueryDialect,
    DEFAULT_NSID,
};

/// Plan ids travel in the upper half of dword 11.
const PLAN_ID_SHIFT: u32 = 16;

/// Retrieval of a computed result into a host buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetComputeResult {
    /// Namespace id.
    pub nsid: u32,
    /// Object space selector (dword 2).
    pub object_space: u32,
    /// Packed flags (dword 3).
    pub flags: FetchFlags,
    /// Host buffer capacity offered for the result (dword 10).
    pub capacity: u32,
    /// Plan id from the plan submission completion (dword 11, upper 16 bits).
    pub plan_id: u32,
    /// Sequence number / result offset (dword 13).
    pub sequence: u32,
}

impl GetComputeResult {
    /// Fetch the whole result of `plan_id` into a buffer of `capacity` bytes.
    ///
    /// Fails if the plan id does not fit the 16-bit field.
    pub fn new(capacity: u32, plan_id: u32) -> Result<Self> {
        if plan_id > u32::from(u16::MAX) {
            return Err(CsqError::Protocol(format!(
                "Plan id {:#x} does not fit in 16 bits",
                plan_id
            )));
        }
        Ok(Self {
            nsid: DEFAULT_NSID,
            object_space: 0,
            flags: FetchFlags::default(),
            capacity,
            plan_id,
            sequence: 0,
        })
    }

    /// Encode into the fixed command layout.
    pub fn encode(&self) -> Command {
        let mut cmd = Command::new(opcode::GET_COMPUTE_RESULT, self.nsid);
        cmd.rsvd2 = self.object_space;
        cmd.rsvd3 = self.flags.encode();
        cmd.cdw[0] = self.capacity;
        cmd.cdw[1] = self.plan_id << PLAN_ID_SHIFT;
        cmd.cdw[3] = self.sequence;
        cmd
    }

    /// Decode from the fixed command layout.
    pub fn decode(cmd: &Command) -> Result<Self> {
        expect_opcode(cmd, opcode::GET_COMPUTE_RESULT)?;
        let (dialect, format, header, release) = unpack_flags(cmd.rsvd3);
        if dialect != QueryDialect::S3Select as u8 || format != OutputFormat::Csv as u8 {
            return Err(CsqError::Protocol(format!(
                "Unsupported fetch flags {:#08x}",
                cmd.rsvd3
            )));
        }
        Ok(Self {
            nsid: cmd.nsid,
            object_space: cmd.rsvd2,
            flags: FetchFlags {
                dialect: QueryDialect::S3Select,
                format: OutputFormat::Csv,
                header,
                release,
            },
            capacity: cmd.cdw10(),
            plan_id: cmd.cdw11() >> PLAN_ID_SHIFT,
            sequence: cmd.cdw13(),
        })
    }
}

/// Completion of a get compute result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultFetched {
    /// Bytes written into the host buffer (low word).
    pub bytes_transferred: u32,
    /// Total result bytes the controller reports as available (high word).
    pub bytes_available: u32,
}

impl ResultFetched {
    /// Interpret a successful result fetch completion.
    pub fn from_completion(cpl: &Completion) -> Self {
        Self {
            bytes_transferred: cpl.low(),
            bytes_available: cpl.high(),
        }
    }

    /// Completion a controller sends back for this fetch.
    pub fn to_completion(&self, cid: u16) -> Completion {
        Completion::success(cid, self.bytes_transferred, self.bytes_available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields() {
        let cmd = GetComputeResult::new(4096, 5).unwrap().encode();

        assert_eq!(cmd.opc, 0x92);
        assert_eq!(cmd.nsid, 0x1);
        assert_eq!(cmd.rsvd2, 0);
        assert_eq!(cmd.rsvd3, 0x0002_0202);
        assert_eq!(cmd.cdw10(), 4096);
        assert_eq!(cmd.cdw11(), 0x0005_0000);
        assert_eq!(cmd.cdw12(), 0);
        assert_eq!(cmd.cdw13(), 0);
    }

    #[test]
    fn test_plan_id_too_wide() {
        assert!(GetComputeResult::new(4096, 0x1_0000).is_err());
        assert!(GetComputeResult::new(4096, 0xFFFF).is_ok());
    }

    #[test]
    fn test_decode_recovers_plan_id() {
        let fetch = GetComputeResult::new(4096, 0xBEEF).unwrap();
        let decoded = GetComputeResult::decode(&fetch.encode()).unwrap();
        assert_eq!(decoded, fetch);
        assert_eq!(decoded.plan_id, 0xBEEF);
    }

    #[test]
    fn test_result_fetched_reads_low_then_high() {
        let cpl = Completion::success(2, 118, 120);
        let fetched = ResultFetched::from_completion(&cpl);
        assert_eq!(fetched.bytes_transferred, 118);
        assert_eq!(fetched.bytes_available, 120);
    }
}
