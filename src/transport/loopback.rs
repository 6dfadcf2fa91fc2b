//! In-process loopback target.
//!
//! Emulates a computational-storage controller behind a discovery service:
//! subsystems with one namespace and a set of objects, executing the vendor
//! command set against a pluggable query engine. Faults can be injected to
//! exercise every error path of a session.
//!
//! # Example
//!
//! ```
//! use csq_client::transport::{LoopbackSubsystem, LoopbackTransport};
//!
//! let transport = LoopbackTransport::new().with_subsystem(
//!     LoopbackSubsystem::new("nqn.test:subsystem1").with_object(0, "a,b\n1,2\n"),
//! );
//! assert_eq!(transport.attached_controllers(), 0);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tracing::debug;

use super::{DmaBuffer, Transport, TransportId, DISCOVERY_NQN};
use crate::codec::{GetComputeResult, PlanAccepted, ResultFetched, WriteExecutionPlan};
use crate::error::{CsqError, Phase, Result};
use crate::protocol::{opcode, sct, Command, Completion, Status, PLAN_ID_UNASSIGNED};

/// Transport type that selects the loopback target.
pub const LOOPBACK_TRTYPE: &str = "loopback";

const NSID: u32 = 1;
const SC_INVALID_OPCODE: u8 = 0x01;
const SC_INVALID_FIELD: u8 = 0x02;
const SC_DATA_TRANSFER_ERROR: u8 = 0x04;

/// Query engine: (query text, object bytes) -> result bytes.
pub type QueryEngine = Arc<dyn Fn(&str, &[u8]) -> Vec<u8> + Send + Sync>;

/// A subsystem exposed by the loopback discovery service.
#[derive(Debug, Clone)]
pub struct LoopbackSubsystem {
    subnqn: String,
    has_namespace: bool,
    namespace_active: bool,
    objects: HashMap<u32, Bytes>,
}

impl LoopbackSubsystem {
    /// Subsystem with an active namespace 1 and no objects.
    pub fn new(subnqn: &str) -> Self {
        Self {
            subnqn: subnqn.to_string(),
            has_namespace: true,
            namespace_active: true,
            objects: HashMap::new(),
        }
    }

    /// Store an object under `id`.
    pub fn with_object(mut self, id: u32, data: impl Into<Bytes>) -> Self {
        self.objects.insert(id, data.into());
        self
    }

    /// Report namespace 1 as present but inactive.
    pub fn with_inactive_namespace(mut self) -> Self {
        self.namespace_active = false;
        self
    }

    /// Expose no namespace at all.
    pub fn without_namespace(mut self) -> Self {
        self.has_namespace = false;
        self
    }

    /// Subsystem name.
    pub fn subnqn(&self) -> &str {
        &self.subnqn
    }
}

/// Faults to inject into the loopback target.
#[derive(Debug, Clone, Default)]
pub struct LoopbackFaults {
    /// Fail queue pair allocation.
    pub fail_qpair_alloc: bool,
    /// Fail DMA buffer allocation.
    pub fail_buffer_alloc: bool,
    /// Refuse to queue commands with this opcode.
    pub reject_opcode: Option<u8>,
    /// Complete plan submissions with this status.
    pub plan_status: Option<Status>,
    /// Complete result fetches with this status.
    pub fetch_status: Option<Status>,
    /// Added to the result size declared at plan submission.
    pub declared_size_skew: i64,
    /// Never complete commands with this opcode.
    pub stall_opcode: Option<u8>,
    /// Report this many bytes transferred instead of the real count.
    pub report_transferred: Option<u32>,
    /// Deliver a completion for an unknown command id before each real one.
    pub stray_completion: bool,
}

/// A command as the target received it.
#[derive(Debug, Clone)]
pub struct Submission {
    /// The command, with the assigned command id.
    pub command: Command,
    /// Data the host staged for it (query text for `0x95`, empty otherwise).
    pub payload: Bytes,
}

/// Attached loopback controller.
#[derive(Debug)]
pub struct LoopbackController {
    subsystem: usize,
    detached: bool,
}

/// Loopback I/O queue pair.
#[derive(Debug)]
pub struct LoopbackQueuePair {
    sqid: u16,
    subsystem: usize,
    next_cid: u16,
    sq_head: u16,
    pending: VecDeque<Completion>,
    freed: bool,
}

/// Heap memory standing in for DMA memory.
#[derive(Debug)]
pub struct LoopbackBuffer {
    data: Vec<u8>,
    freed: bool,
}

impl DmaBuffer for LoopbackBuffer {
    fn as_slice(&self) -> &[u8] {
        &self.data
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

#[derive(Default)]
struct Inner {
    faults: LoopbackFaults,
    plans: HashMap<(usize, u32), Bytes>,
    next_plan_id: u32,
    next_sqid: u16,
    attached: usize,
    qpairs: usize,
    qpair_frees: usize,
    buffers: usize,
    submissions: Vec<Submission>,
}

/// In-process target implementing [`Transport`].
pub struct LoopbackTransport {
    subsystems: Vec<LoopbackSubsystem>,
    listen: Option<(String, String)>,
    engine: QueryEngine,
    inner: Mutex<Inner>,
}

impl LoopbackTransport {
    /// Empty target answering discovery at any address.
    ///
    /// The default engine returns the addressed object unchanged.
    pub fn new() -> Self {
        Self {
            subsystems: Vec::new(),
            listen: None,
            engine: Arc::new(|_query: &str, object: &[u8]| object.to_vec()),
            inner: Mutex::new(Inner {
                next_plan_id: 1,
                next_sqid: 1,
                ..Inner::default()
            }),
        }
    }

    /// Add a subsystem.
    pub fn with_subsystem(mut self, subsystem: LoopbackSubsystem) -> Self {
        self.subsystems.push(subsystem);
        self
    }

    /// Only answer discovery at `traddr:trsvcid`.
    pub fn listening_on(mut self, traddr: &str, trsvcid: &str) -> Self {
        self.listen = Some((traddr.to_string(), trsvcid.to_string()));
        self
    }

    /// Replace the query engine.
    pub fn with_engine<F>(mut self, engine: F) -> Self
    where
        F: Fn(&str, &[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        self.engine = Arc::new(engine);
        self
    }

    /// Replace the injected faults.
    pub fn set_faults(&self, faults: LoopbackFaults) {
        self.lock().faults = faults;
    }

    /// Controllers currently attached.
    pub fn attached_controllers(&self) -> usize {
        self.lock().attached
    }

    /// Queue pairs currently allocated.
    pub fn outstanding_qpairs(&self) -> usize {
        self.lock().qpairs
    }

    /// Queue pairs freed so far.
    pub fn qpair_frees(&self) -> usize {
        self.lock().qpair_frees
    }

    /// DMA buffers currently allocated.
    pub fn outstanding_buffers(&self) -> usize {
        self.lock().buffers
    }

    /// Plans registered and not yet released.
    pub fn live_plans(&self) -> usize {
        self.lock().plans.len()
    }

    /// Every command received so far, in order.
    pub fn submissions(&self) -> Vec<Submission> {
        self.lock().submissions.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn execute_plan(
        &self,
        inner: &mut Inner,
        subsystem: usize,
        cmd: &Command,
        buf: &LoopbackBuffer,
    ) -> Completion {
        let cid = cmd.cid;
        let plan = match WriteExecutionPlan::decode(cmd) {
            Ok(plan) => plan,
            Err(_) => return invalid(cid, SC_INVALID_FIELD),
        };
        if let Some(status) = inner.faults.plan_status {
            return Completion::error(cid, status);
        }
        if !plan.is_single_shot() || plan.plan_id != PLAN_ID_UNASSIGNED || plan.nsid != NSID {
            return invalid(cid, SC_INVALID_FIELD);
        }
        let len = plan.transfer_len as usize;
        if len > buf.len() {
            return invalid(cid, SC_DATA_TRANSFER_ERROR);
        }
        let object = match self.subsystems[subsystem].objects.get(&plan.object_id) {
            Some(object) => object,
            None => return invalid(cid, SC_INVALID_FIELD),
        };

        let query = String::from_utf8_lossy(&buf.as_slice()[..len]);
        let result = (self.engine)(&*query, &object[..]);
        let plan_id = inner.next_plan_id & 0xFFFF;
        inner.next_plan_id = inner.next_plan_id.wrapping_add(1);
        let declared = (result.len() as i64 + inner.faults.declared_size_skew)
            .clamp(0, i64::from(u32::MAX)) as u32;
        debug!(plan_id, declared, actual = result.len(), "loopback plan registered");
        inner.plans.insert((subsystem, plan_id), Bytes::from(result));

        PlanAccepted {
            plan_id,
            total_result_size: declared,
        }
        .to_completion(cid)
    }

    fn fetch_result(
        &self,
        inner: &mut Inner,
        subsystem: usize,
        cmd: &Command,
        buf: &mut LoopbackBuffer,
    ) -> Completion {
        let cid = cmd.cid;
        let fetch = match GetComputeResult::decode(cmd) {
            Ok(fetch) => fetch,
            Err(_) => return invalid(cid, SC_INVALID_FIELD),
        };
        if let Some(status) = inner.faults.fetch_status {
            return Completion::error(cid, status);
        }
        let key = (subsystem, fetch.plan_id);
        let result = match inner.plans.get(&key) {
            Some(result) => result.clone(),
            None => return invalid(cid, SC_INVALID_FIELD),
        };
        let offset = fetch.sequence as usize;
        if offset > result.len() {
            return invalid(cid, SC_INVALID_FIELD);
        }

        let remaining = &result[offset..];
        let n = remaining
            .len()
            .min(fetch.capacity as usize)
            .min(buf.len());
        buf.as_mut_slice()[..n].copy_from_slice(&remaining[..n]);
        if fetch.flags.release {
            inner.plans.remove(&key);
        }

        ResultFetched {
            bytes_transferred: inner.faults.report_transferred.unwrap_or(n as u32),
            bytes_available: result.len() as u32,
        }
        .to_completion(cid)
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(cid: u16, code: u8) -> Completion {
    Completion::error(cid, Status::new(sct::GENERIC, code).with_dnr())
}

fn phase_for(opc: u8) -> Phase {
    match opc {
        opcode::WRITE_EXECUTION_PLAN => Phase::SubmitPlan,
        opcode::GET_COMPUTE_RESULT => Phase::FetchResult,
        _ => Phase::Setup,
    }
}

impl Transport for LoopbackTransport {
    type Controller = LoopbackController;
    type QueuePair = LoopbackQueuePair;
    type Buffer = LoopbackBuffer;

    fn probe(
        &self,
        trid: &TransportId,
        on_probe: &mut dyn FnMut(&TransportId) -> bool,
        on_attach: &mut dyn FnMut(&TransportId, Self::Controller),
    ) -> Result<()> {
        if let Some((traddr, trsvcid)) = &self.listen {
            if &trid.traddr != traddr || &trid.trsvcid != trsvcid {
                return Err(CsqError::Discovery(format!(
                    "no discovery service at {}:{}",
                    trid.traddr, trid.trsvcid
                )));
            }
        }

        for (idx, subsystem) in self.subsystems.iter().enumerate() {
            if trid.subnqn != DISCOVERY_NQN && trid.subnqn != subsystem.subnqn {
                continue;
            }
            let found = trid.with_subnqn(&subsystem.subnqn);
            if !on_probe(&found) {
                continue;
            }
            self.lock().attached += 1;
            on_attach(
                &found,
                LoopbackController {
                    subsystem: idx,
                    detached: false,
                },
            );
        }
        Ok(())
    }

    fn detach(&self, ctrlr: &mut Self::Controller) {
        if !ctrlr.detached {
            ctrlr.detached = true;
            self.lock().attached -= 1;
        }
    }

    fn namespace_active(&self, ctrlr: &Self::Controller, nsid: u32) -> Option<bool> {
        let subsystem = &self.subsystems[ctrlr.subsystem];
        if ctrlr.detached || nsid != NSID || !subsystem.has_namespace {
            return None;
        }
        Some(subsystem.namespace_active)
    }

    fn alloc_io_qpair(&self, ctrlr: &Self::Controller) -> Result<Self::QueuePair> {
        let mut inner = self.lock();
        if inner.faults.fail_qpair_alloc || ctrlr.detached {
            return Err(CsqError::QueuePairAllocation(
                "loopback: no queue pair available".to_string(),
            ));
        }
        let sqid = inner.next_sqid;
        inner.next_sqid = inner.next_sqid.wrapping_add(1);
        inner.qpairs += 1;
        Ok(LoopbackQueuePair {
            sqid,
            subsystem: ctrlr.subsystem,
            next_cid: 0,
            sq_head: 0,
            pending: VecDeque::new(),
            freed: false,
        })
    }

    fn free_io_qpair(&self, qpair: &mut Self::QueuePair) {
        if !qpair.freed {
            qpair.freed = true;
            if !qpair.pending.is_empty() {
                debug!(sqid = qpair.sqid, n = qpair.pending.len(), "dropping unreaped completions");
            }
            qpair.pending.clear();
            let mut inner = self.lock();
            inner.qpairs -= 1;
            inner.qpair_frees += 1;
        }
    }

    fn alloc_dma_buffer(&self, size: usize, align: usize) -> Result<Self::Buffer> {
        let mut inner = self.lock();
        if inner.faults.fail_buffer_alloc || size == 0 || !align.is_power_of_two() {
            return Err(CsqError::BufferAllocation { size });
        }
        inner.buffers += 1;
        Ok(LoopbackBuffer {
            data: vec![0u8; size],
            freed: false,
        })
    }

    fn free_dma_buffer(&self, buf: &mut Self::Buffer) {
        if !buf.freed {
            buf.freed = true;
            self.lock().buffers -= 1;
        }
    }

    fn submit_io_raw(
        &self,
        _ctrlr: &Self::Controller,
        qpair: &mut Self::QueuePair,
        cmd: &Command,
        buf: &mut Self::Buffer,
    ) -> Result<u16> {
        let phase = phase_for(cmd.opc);
        if qpair.freed || buf.freed {
            return Err(CsqError::SubmissionRejected {
                phase,
                reason: "queue pair or buffer already freed".to_string(),
            });
        }
        let mut inner = self.lock();
        if inner.faults.reject_opcode == Some(cmd.opc) {
            return Err(CsqError::SubmissionRejected {
                phase,
                reason: "loopback: submission queue full".to_string(),
            });
        }

        let cid = qpair.next_cid;
        qpair.next_cid = qpair.next_cid.wrapping_add(1);
        qpair.sq_head = qpair.sq_head.wrapping_add(1);
        let mut command = *cmd;
        command.cid = cid;

        let payload = if cmd.opc == opcode::WRITE_EXECUTION_PLAN {
            let len = (cmd.cdw10() as usize).min(buf.len());
            Bytes::copy_from_slice(&buf.as_slice()[..len])
        } else {
            Bytes::new()
        };
        inner.submissions.push(Submission { command, payload });

        let mut completion = match cmd.opc {
            opcode::WRITE_EXECUTION_PLAN => {
                self.execute_plan(&mut inner, qpair.subsystem, &command, buf)
            }
            opcode::GET_COMPUTE_RESULT => {
                self.fetch_result(&mut inner, qpair.subsystem, &command, buf)
            }
            _ => invalid(cid, SC_INVALID_OPCODE),
        };

        if inner.faults.stall_opcode == Some(cmd.opc) {
            debug!(cid, opc = cmd.opc, "loopback stalling command");
            return Ok(cid);
        }
        if inner.faults.stray_completion {
            let mut stray = Completion::success(cid.wrapping_add(0x100), 0xDEAD, 0xBEEF);
            stray.sqid = qpair.sqid;
            qpair.pending.push_back(stray);
        }
        completion.sqid = qpair.sqid;
        completion.sqhd = qpair.sq_head;
        qpair.pending.push_back(completion);
        Ok(cid)
    }

    fn process_completions(
        &self,
        qpair: &mut Self::QueuePair,
        max: u32,
        on_completion: &mut dyn FnMut(&Completion),
    ) -> Result<usize> {
        if qpair.freed {
            return Err(CsqError::InvalidState("queue pair already freed".to_string()));
        }
        let limit = if max == 0 { usize::MAX } else { max as usize };
        let mut reaped = 0;
        while reaped < limit {
            match qpair.pending.pop_front() {
                Some(cpl) => {
                    on_completion(&cpl);
                    reaped += 1;
                }
                None => break,
            }
        }
        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> LoopbackTransport {
        LoopbackTransport::new()
            .with_subsystem(LoopbackSubsystem::new("nqn.test:subsystem1").with_object(0, "x,y\n"))
            .with_subsystem(LoopbackSubsystem::new("nqn.test:other"))
    }

    fn discovery() -> TransportId {
        TransportId::discovery("tcp", "ipv4", "127.0.0.1", "4420")
    }

    #[test]
    fn test_probe_reports_every_subsystem() {
        let t = transport();
        let mut seen = Vec::new();
        t.probe(
            &discovery(),
            &mut |trid| {
                seen.push(trid.subnqn.clone());
                false
            },
            &mut |_, _| panic!("nothing accepted"),
        )
        .unwrap();
        assert_eq!(seen, vec!["nqn.test:subsystem1", "nqn.test:other"]);
        assert_eq!(t.attached_controllers(), 0);
    }

    #[test]
    fn test_probe_wrong_address() {
        let t = transport().listening_on("10.0.0.1", "4420");
        let err = t.probe(&discovery(), &mut |_| true, &mut |_, _| {}).unwrap_err();
        assert!(matches!(err, CsqError::Discovery(_)));
    }

    #[test]
    fn test_attach_detach_counts() {
        let t = transport();
        let mut ctrlrs = Vec::new();
        t.probe(&discovery(), &mut |_| true, &mut |_, c| ctrlrs.push(c))
            .unwrap();
        assert_eq!(t.attached_controllers(), 2);
        for c in &mut ctrlrs {
            t.detach(c);
            t.detach(c);
        }
        assert_eq!(t.attached_controllers(), 0);
    }

    #[test]
    fn test_unknown_opcode_completes_with_error() {
        let t = transport();
        let mut ctrlr = None;
        t.probe(&discovery(), &mut |_| true, &mut |_, c| {
            ctrlr.get_or_insert(c);
        })
        .unwrap();
        let ctrlr = ctrlr.unwrap();
        let mut qp = t.alloc_io_qpair(&ctrlr).unwrap();
        let mut buf = t.alloc_dma_buffer(4096, 4096).unwrap();
        let cid = t
            .submit_io_raw(&ctrlr, &mut qp, &Command::new(0x01, 1), &mut buf)
            .unwrap();

        let mut got = Vec::new();
        let n = t
            .process_completions(&mut qp, 0, &mut |c| got.push(*c))
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(got[0].cid, cid);
        assert_eq!(got[0].status.code, SC_INVALID_OPCODE);

        t.free_io_qpair(&mut qp);
        t.free_dma_buffer(&mut buf);
        assert_eq!(t.outstanding_qpairs(), 0);
        assert_eq!(t.outstanding_buffers(), 0);
    }

    #[test]
    fn test_buffer_alloc_rejects_bad_alignment() {
        let t = transport();
        assert!(t.alloc_dma_buffer(4096, 3).is_err());
        assert!(t.alloc_dma_buffer(0, 4096).is_err());
        assert_eq!(t.outstanding_buffers(), 0);
    }
}
