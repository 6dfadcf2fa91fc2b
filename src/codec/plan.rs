//! Write execution plan (`0x95`).

use super::expect_opcode;
use crate::error::{CsqError, Result};
use crate::protocol::{
    opcode, unpack_flags, Command, Completion, OutputFormat, PlanFlags, QueryDialect,
    DEFAULT_NSID, PLAN_ID_UNASSIGNED,
};

/// Submission of a query as an execution plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteExecutionPlan {
    /// Namespace id.
    pub nsid: u32,
    /// Object space selector (dword 2).
    pub object_space: u32,
    /// Packed flags (dword 3).
    pub flags: PlanFlags,
    /// Query bytes carried by this command (dword 10).
    pub transfer_len: u32,
    /// Target object id (dword 11).
    pub object_id: u32,
    /// Plan id, `PLAN_ID_UNASSIGNED` for a new plan (dword 12).
    pub plan_id: u32,
    /// Offset of this chunk within the query text (dword 13).
    pub plan_offset: u32,
    /// Total query text size (dword 14).
    pub total_len: u32,
}

impl WriteExecutionPlan {
    /// Plan for a query sent in one transfer.
    pub fn single_shot(query: &[u8], object_id: u32) -> Result<Self> {
        let len = u32::try_from(query.len()).map_err(|_| CsqError::QueryTooLarge {
            len: query.len(),
            max: u32::MAX as usize,
        })?;
        Ok(Self {
            nsid: DEFAULT_NSID,
            object_space: 0,
            flags: PlanFlags::default(),
            transfer_len: len,
            object_id,
            plan_id: PLAN_ID_UNASSIGNED,
            plan_offset: 0,
            total_len: len,
        })
    }

    /// Encode into the fixed command layout.
    pub fn encode(&self) -> Command {
        let mut cmd = Command::new(opcode::WRITE_EXECUTION_PLAN, self.nsid);
        cmd.rsvd2 = self.object_space;
        cmd.rsvd3 = self.flags.encode();
        cmd.cdw[0] = self.transfer_len;
        cmd.cdw[1] = self.object_id;
        cmd.cdw[2] = self.plan_id;
        cmd.cdw[3] = self.plan_offset;
        cmd.cdw[4] = self.total_len;
        cmd
    }

    /// Decode from the fixed command layout.
    pub fn decode(cmd: &Command) -> Result<Self> {
        expect_opcode(cmd, opcode::WRITE_EXECUTION_PLAN)?;
        let (dialect, format, run, wait) = unpack_flags(cmd.rsvd3);
        if dialect != QueryDialect::S3Select as u8 || format != OutputFormat::Csv as u8 {
            return Err(CsqError::Protocol(format!(
                "Unsupported plan flags {:#08x}",
                cmd.rsvd3
            )));
        }
        Ok(Self {
            nsid: cmd.nsid,
            object_space: cmd.rsvd2,
            flags: PlanFlags {
                dialect: QueryDialect::S3Select,
                format: OutputFormat::Csv,
                run,
                wait,
            },
            transfer_len: cmd.cdw10(),
            object_id: cmd.cdw11(),
            plan_id: cmd.cdw12(),
            plan_offset: cmd.cdw13(),
            total_len: cmd.cdw14(),
        })
    }

    /// Check if this chunk carries the whole query text.
    #[inline]
    pub fn is_single_shot(&self) -> bool {
        self.plan_offset == 0 && self.transfer_len == self.total_len
    }
}

/// Completion of a write execution plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanAccepted {
    /// Plan id assigned by the controller (low word).
    pub plan_id: u32,
    /// Total result size the controller declares (high word).
    pub total_result_size: u32,
}

impl PlanAccepted {
    /// Interpret a successful plan submission completion.
    pub fn from_completion(cpl: &Completion) -> Self {
        Self {
            plan_id: cpl.low(),
            total_result_size: cpl.high(),
        }
    }

    /// Completion a controller sends back for this plan.
    pub fn to_completion(&self, cid: u16) -> Completion {
        Completion::success(cid, self.plan_id, self.total_result_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_shot_fields() {
        let query = b"SELECT s._1 FROM s3object s";
        let cmd = WriteExecutionPlan::single_shot(query, 42).unwrap().encode();

        assert_eq!(cmd.opc, 0x95);
        assert_eq!(cmd.nsid, 0x1);
        assert_eq!(cmd.rsvd2, 0);
        assert_eq!(cmd.rsvd3, 0x0002_0203);
        assert_eq!(cmd.cdw10(), query.len() as u32);
        assert_eq!(cmd.cdw11(), 42);
        assert_eq!(cmd.cdw12(), 0xFFFF_0000);
        assert_eq!(cmd.cdw13(), 0);
        assert_eq!(cmd.cdw14(), cmd.cdw10());
        assert_eq!(cmd.cdw15(), 0);
    }

    #[test]
    fn test_decode_matches_encode() {
        let plan = WriteExecutionPlan::single_shot(b"SELECT 1", 3).unwrap();
        let decoded = WriteExecutionPlan::decode(&plan.encode()).unwrap();
        assert_eq!(decoded, plan);
        assert!(decoded.is_single_shot());
    }

    #[test]
    fn test_decode_rejects_wrong_opcode() {
        let cmd = Command::new(opcode::GET_COMPUTE_RESULT, 1);
        let err = WriteExecutionPlan::decode(&cmd).unwrap_err();
        assert!(err.to_string().contains("Expected opcode 0x95"));
    }

    #[test]
    fn test_decode_rejects_unknown_dialect() {
        let mut cmd = WriteExecutionPlan::single_shot(b"x", 0).unwrap().encode();
        cmd.rsvd3 = 0x0005_0203;
        assert!(WriteExecutionPlan::decode(&cmd).is_err());
    }

    #[test]
    fn test_plan_accepted_reads_low_then_high() {
        let cpl = Completion::success(9, 5, 120);
        let accepted = PlanAccepted::from_completion(&cpl);
        assert_eq!(accepted.plan_id, 5);
        assert_eq!(accepted.total_result_size, 120);
        assert_eq!(accepted.to_completion(9), cpl);
    }
}
