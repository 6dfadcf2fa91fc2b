//! Query execution session.
//!
//! Drives one query through the two-phase exchange:
//!
//! ```text
//! Idle ──► PlanSubmitted(AwaitingPlan) ──► PlanSubmitted(AwaitingResult) ──► Completed
//!   │               │                                  │
//!   └───────────────┴──────────────► Failed ◄──────────┘
//! ```
//!
//! 1. Allocate a queue pair and a result buffer, stage the query text
//! 2. Submit the execution plan, poll for its completion
//! 3. Zero the buffer, submit the result fetch with the assigned plan id
//! 4. Poll for the fetch completion and cut the result at the transferred size
//!
//! Only one command is outstanding at a time. Completions are delivered on
//! the calling thread from inside the transport's polling call. Queue pair
//! and buffer are released on every exit path, the queue pair first so no
//! command can still target the buffer when it is freed.
//!
//! # Example
//!
//! ```
//! use csq_client::locator::ControllerLocator;
//! use csq_client::session::{QuerySession, SessionOptions};
//! use csq_client::transport::{LoopbackSubsystem, LoopbackTransport, TransportId};
//! use csq_client::QueryRequest;
//!
//! let transport = LoopbackTransport::new().with_subsystem(
//!     LoopbackSubsystem::new("nqn.test:subsystem1").with_object(0, "1,2\n"),
//! );
//! let trid = TransportId::discovery("tcp", "ipv4", "127.0.0.1", "4420");
//! let ctrlr = ControllerLocator::new(&transport)
//!     .locate(&trid, "nqn.test:subsystem1")
//!     .unwrap();
//!
//! let mut session = QuerySession::new(&transport, ctrlr.controller(), SessionOptions::default());
//! let outcome = session.run(&QueryRequest::new("SELECT * FROM s3object", 0)).unwrap();
//! assert_eq!(outcome.text(), "1,2\n");
//! ```

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::{check_buffer_size, check_query_fits, ResultBuffer, RESULT_BUFFER_SIZE};
use crate::codec::{GetComputeResult, PlanAccepted, ResultFetched, WriteExecutionPlan};
use crate::error::{CsqError, Phase, Result, TransportError};
use crate::protocol::{Command, Completion};
use crate::query::{ExecutionPlan, QueryOutcome, QueryRequest, SizeMismatch};
use crate::transport::{QueuePairGuard, Transport};

/// Reap every available completion per poll.
pub const DEFAULT_POLL_BATCH: u32 = 0;

/// Knobs for a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Upper bound on the whole exchange. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Cancels the wait between polls.
    pub cancel: Option<CancellationToken>,
    /// Result buffer size.
    pub buffer_size: usize,
    /// Completions reaped per poll (0 = all).
    pub poll_batch: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            cancel: None,
            buffer_size: RESULT_BUFFER_SIZE,
            poll_batch: DEFAULT_POLL_BATCH,
        }
    }
}

impl SessionOptions {
    /// Bound the whole exchange, both phases included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Abort the wait between polls once `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Result buffer size in bytes. Checked when the session runs.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Completions reaped per poll (0 = all).
    pub fn with_poll_batch(mut self, batch: u32) -> Self {
        self.poll_batch = batch;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }
}

/// Sub-step while a plan is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Waiting for the plan submission completion.
    AwaitingPlan,
    /// Waiting for the result fetch completion.
    AwaitingResult,
}

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    PlanSubmitted(Step),
    Completed,
    Failed,
}

impl SessionState {
    /// Check if the session has finished, successfully or not.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

/// Resources held while a query is in flight. Field order is drop order.
struct Resources<'t, T: Transport> {
    qpair: QueuePairGuard<'t, T>,
    buffer: ResultBuffer<'t, T>,
}

/// Catches the completion of the one outstanding command.
#[derive(Debug)]
struct CompletionSlot {
    expected: u16,
    completion: Option<Completion>,
}

impl CompletionSlot {
    fn new(expected: u16) -> Self {
        Self {
            expected,
            completion: None,
        }
    }

    fn on_completion(&mut self, cpl: &Completion) {
        if cpl.cid != self.expected || self.completion.is_some() {
            warn!(
                cid = cpl.cid,
                expected = self.expected,
                "ignoring completion for a command that is not outstanding"
            );
            return;
        }
        self.completion = Some(*cpl);
    }
}

/// One query against one attached controller.
pub struct QuerySession<'t, T: Transport> {
    transport: &'t T,
    controller: &'t T::Controller,
    options: SessionOptions,
    state: SessionState,
    resources: Option<Resources<'t, T>>,
    plan: Option<ExecutionPlan>,
}

impl<'t, T: Transport> QuerySession<'t, T> {
    /// Create an idle session borrowing `controller`.
    pub fn new(transport: &'t T, controller: &'t T::Controller, options: SessionOptions) -> Self {
        Self {
            transport,
            controller,
            options,
            state: SessionState::Idle,
            resources: None,
            plan: None,
        }
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Plan assigned by the controller, once known.
    #[inline]
    pub fn plan(&self) -> Option<ExecutionPlan> {
        self.plan
    }

    /// Run `request` to completion.
    ///
    /// Blocks until the result is fetched, a completion reports an error, the
    /// timeout expires or the cancellation token fires. A session runs at
    /// most one query.
    pub fn run(&mut self, request: &QueryRequest) -> Result<QueryOutcome> {
        if self.state != SessionState::Idle {
            return Err(CsqError::InvalidState(format!(
                "session already used ({:?})",
                self.state
            )));
        }

        let started = Instant::now();
        let result = self.execute(request, started);
        self.release();

        match &result {
            Ok(_) => self.state = SessionState::Completed,
            Err(e) => {
                debug!(state = ?self.state, "query failed: {}", e);
                self.state = SessionState::Failed;
            }
        }
        result
    }

    fn execute(&mut self, request: &QueryRequest, started: Instant) -> Result<QueryOutcome> {
        let query = request.as_bytes();
        check_buffer_size(self.options.buffer_size)?;
        check_query_fits(query, self.options.buffer_size)?;
        if self.options.is_cancelled() {
            return Err(CsqError::Cancelled {
                phase: Phase::Setup,
            });
        }

        let qpair = QueuePairGuard::alloc(self.transport, self.controller)?;
        let buffer = ResultBuffer::alloc(self.transport, self.options.buffer_size)?;
        let res = self.resources.insert(Resources { qpair, buffer });
        res.buffer.stage_query(query)?;

        // Phase 1: write execution plan.
        let plan_cmd = WriteExecutionPlan::single_shot(query, request.object_id)?.encode();
        self.state = SessionState::PlanSubmitted(Step::AwaitingPlan);
        let cpl = submit_and_wait(
            self.transport,
            self.controller,
            res,
            &plan_cmd,
            &self.options,
            Phase::SubmitPlan,
            started,
        )?;
        let accepted = on_plan_submitted(&cpl)?;
        info!(
            "query plan submitted: id={}, result_size={} B",
            accepted.plan_id, accepted.total_result_size
        );
        let plan = ExecutionPlan {
            plan_id: accepted.plan_id,
            total_result_size: accepted.total_result_size,
        };
        self.plan = Some(plan);

        // Phase 2: get compute result into the re-zeroed buffer.
        res.buffer.zero();
        let capacity = u32::try_from(res.buffer.capacity()).map_err(|_| {
            CsqError::InvalidConfig(format!("buffer of {} bytes", res.buffer.capacity()))
        })?;
        let fetch_cmd = GetComputeResult::new(capacity, accepted.plan_id)?.encode();
        self.state = SessionState::PlanSubmitted(Step::AwaitingResult);
        let cpl = submit_and_wait(
            self.transport,
            self.controller,
            res,
            &fetch_cmd,
            &self.options,
            Phase::FetchResult,
            started,
        )?;
        let (fetched, size_mismatch) = on_result_fetched(&cpl, &plan)?;
        info!(
            "query results obtained: {} B / {} B",
            fetched.bytes_transferred, fetched.bytes_available
        );

        let result = res.buffer.take_result(fetched.bytes_transferred as usize)?;
        Ok(QueryOutcome {
            result,
            plan,
            bytes_transferred: fetched.bytes_transferred,
            bytes_available: fetched.bytes_available,
            size_mismatch,
            elapsed: started.elapsed(),
        })
    }

    /// Free the queue pair, then the buffer.
    fn release(&mut self) {
        if let Some(res) = self.resources.take() {
            res.qpair.release();
            res.buffer.release();
            debug!("session resources released");
        }
    }
}

/// Submit `cmd` and poll until its completion arrives.
fn submit_and_wait<T: Transport>(
    transport: &T,
    controller: &T::Controller,
    res: &mut Resources<'_, T>,
    cmd: &Command,
    options: &SessionOptions,
    phase: Phase,
    started: Instant,
) -> Result<Completion> {
    let cid = transport
        .submit_io_raw(controller, res.qpair.get_mut(), cmd, res.buffer.dma_mut())
        .map_err(|e| match e {
            CsqError::SubmissionRejected { .. } => e,
            other => CsqError::SubmissionRejected {
                phase,
                reason: other.to_string(),
            },
        })?;
    debug!(cid, opc = cmd.opc, %phase, "command submitted");

    let mut slot = CompletionSlot::new(cid);
    loop {
        transport.process_completions(res.qpair.get_mut(), options.poll_batch, &mut |cpl| {
            slot.on_completion(cpl)
        })?;
        if let Some(cpl) = slot.completion.take() {
            return Ok(cpl);
        }
        if options.is_cancelled() {
            return Err(CsqError::Cancelled { phase });
        }
        if let Some(timeout) = options.timeout {
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(CsqError::Timeout { phase, elapsed });
            }
        }
        std::hint::spin_loop();
    }
}

/// Interpret the plan submission completion.
fn on_plan_submitted(cpl: &Completion) -> Result<PlanAccepted> {
    if cpl.is_error() {
        let err = TransportError::from_status(Phase::SubmitPlan, cpl.status);
        debug!(cid = cpl.cid, "I/O error status: {}", err.description);
        return Err(err.into());
    }
    Ok(PlanAccepted::from_completion(cpl))
}

/// Interpret the result fetch completion against the declared plan.
fn on_result_fetched(
    cpl: &Completion,
    plan: &ExecutionPlan,
) -> Result<(ResultFetched, Option<SizeMismatch>)> {
    if cpl.is_error() {
        let err = TransportError::from_status(Phase::FetchResult, cpl.status);
        debug!(cid = cpl.cid, "I/O error status: {}", err.description);
        return Err(err.into());
    }
    let fetched = ResultFetched::from_completion(cpl);
    let mismatch = if fetched.bytes_available != plan.total_result_size {
        warn!(
            declared = plan.total_result_size,
            observed = fetched.bytes_available,
            "result size changed between plan submission and fetch; continuing"
        );
        Some(SizeMismatch {
            declared: plan.total_result_size,
            observed: fetched.bytes_available,
        })
    } else {
        None
    };
    Ok((fetched, mismatch))
}
