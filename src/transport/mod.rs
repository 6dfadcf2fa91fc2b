//! Transport module - the block-command transport seam.
//!
//! Controller discovery, queue pairs, DMA memory and completion polling
//! belong to an external driver. This crate talks to it through the
//! [`Transport`] trait:
//! - Probe/attach/detach of controllers matching a [`TransportId`]
//! - Allocation/free of I/O queue pairs and DMA-capable buffers
//! - Raw submission of a fixed-layout [`Command`]
//! - Polling that delivers [`Completion`]s on the calling thread
//!
//! [`LoopbackTransport`] is an in-process target implementing the vendor
//! command set, for tests and local runs.

mod guard;
mod loopback;
mod trid;

pub use guard::QueuePairGuard;
pub use loopback::{
    LoopbackFaults, LoopbackSubsystem, LoopbackTransport, QueryEngine, Submission,
    LOOPBACK_TRTYPE,
};
pub use trid::{TransportEndpoint, TransportId, DISCOVERY_NQN};

use crate::error::Result;
use crate::protocol::{Command, Completion};

/// Physically contiguous, transfer-capable memory handed out by a transport.
pub trait DmaBuffer {
    /// View the buffer contents.
    fn as_slice(&self) -> &[u8];

    /// Mutable view of the buffer contents.
    fn as_mut_slice(&mut self) -> &mut [u8];

    /// Buffer size in bytes.
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Check if the buffer has zero size.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Driver interface for controllers reachable over a fabric.
///
/// All calls happen on the thread that drives the session; completions are
/// delivered synchronously from inside [`Transport::process_completions`].
pub trait Transport {
    /// Attached controller handle.
    type Controller;
    /// I/O queue pair bound to a controller.
    type QueuePair;
    /// DMA-capable buffer.
    type Buffer: DmaBuffer;

    /// Run discovery against `trid`.
    ///
    /// `on_probe` is asked about every controller the discovery service
    /// reports; returning `true` attaches it and hands the handle to
    /// `on_attach`, returning `false` skips it.
    fn probe(
        &self,
        trid: &TransportId,
        on_probe: &mut dyn FnMut(&TransportId) -> bool,
        on_attach: &mut dyn FnMut(&TransportId, Self::Controller),
    ) -> Result<()>;

    /// Detach a controller. The handle must not be used afterwards.
    fn detach(&self, ctrlr: &mut Self::Controller);

    /// Activity of namespace `nsid`, or `None` if the controller has no such namespace.
    fn namespace_active(&self, ctrlr: &Self::Controller, nsid: u32) -> Option<bool>;

    /// Allocate an I/O queue pair on `ctrlr`.
    fn alloc_io_qpair(&self, ctrlr: &Self::Controller) -> Result<Self::QueuePair>;

    /// Free a queue pair, aborting any command still outstanding on it.
    fn free_io_qpair(&self, qpair: &mut Self::QueuePair);

    /// Allocate a zeroed DMA buffer.
    fn alloc_dma_buffer(&self, size: usize, align: usize) -> Result<Self::Buffer>;

    /// Free a DMA buffer. The handle must not be used afterwards.
    fn free_dma_buffer(&self, buf: &mut Self::Buffer);

    /// Queue `cmd` with `buf` as its data buffer. Returns the command id.
    fn submit_io_raw(
        &self,
        ctrlr: &Self::Controller,
        qpair: &mut Self::QueuePair,
        cmd: &Command,
        buf: &mut Self::Buffer,
    ) -> Result<u16>;

    /// Reap up to `max` completions (0 = all available), invoking
    /// `on_completion` for each. Returns the number reaped.
    fn process_completions(
        &self,
        qpair: &mut Self::QueuePair,
        max: u32,
        on_completion: &mut dyn FnMut(&Completion),
    ) -> Result<usize>;
}
