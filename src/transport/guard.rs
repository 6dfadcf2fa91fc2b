//! Scoped ownership of an I/O queue pair.

use super::Transport;
use crate::error::{CsqError, Result};

/// Queue pair that is freed when the guard goes out of scope.
pub struct QueuePairGuard<'t, T: Transport> {
    transport: &'t T,
    qpair: T::QueuePair,
    released: bool,
}

impl<'t, T: Transport> QueuePairGuard<'t, T> {
    /// Allocate a queue pair on `ctrlr`.
    pub fn alloc(transport: &'t T, ctrlr: &T::Controller) -> Result<Self> {
        let qpair = transport.alloc_io_qpair(ctrlr).map_err(|e| match e {
            CsqError::QueuePairAllocation(_) => e,
            other => CsqError::QueuePairAllocation(other.to_string()),
        })?;
        Ok(Self {
            transport,
            qpair,
            released: false,
        })
    }

    /// Mutable access for submission and polling.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T::QueuePair {
        &mut self.qpair
    }

    /// Free the queue pair now.
    pub fn release(mut self) {
        self.free();
    }

    fn free(&mut self) {
        if !self.released {
            self.transport.free_io_qpair(&mut self.qpair);
            self.released = true;
        }
    }
}

impl<T: Transport> Drop for QueuePairGuard<'_, T> {
    fn drop(&mut self) {
        self.free();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{LoopbackFaults, LoopbackSubsystem, LoopbackTransport, TransportId};

    fn attached(transport: &LoopbackTransport) -> <LoopbackTransport as Transport>::Controller {
        let mut found = None;
        transport
            .probe(
                &TransportId::discovery("tcp", "ipv4", "127.0.0.1", "4420"),
                &mut |_| true,
                &mut |_, c| found = Some(c),
            )
            .unwrap();
        found.unwrap()
    }

    #[test]
    fn test_drop_frees_queue_pair() {
        let transport = LoopbackTransport::new().with_subsystem(LoopbackSubsystem::new("nqn.a"));
        let ctrlr = attached(&transport);
        {
            let _guard = QueuePairGuard::alloc(&transport, &ctrlr).unwrap();
            assert_eq!(transport.outstanding_qpairs(), 1);
        }
        assert_eq!(transport.outstanding_qpairs(), 0);
    }

    #[test]
    fn test_release_is_not_repeated_on_drop() {
        let transport = LoopbackTransport::new().with_subsystem(LoopbackSubsystem::new("nqn.a"));
        let ctrlr = attached(&transport);
        let guard = QueuePairGuard::alloc(&transport, &ctrlr).unwrap();
        guard.release();
        assert_eq!(transport.outstanding_qpairs(), 0);
        assert_eq!(transport.qpair_frees(), 1);
    }

    #[test]
    fn test_alloc_failure_is_typed() {
        let transport = LoopbackTransport::new().with_subsystem(LoopbackSubsystem::new("nqn.a"));
        let ctrlr = attached(&transport);
        transport.set_faults(LoopbackFaults {
            fail_qpair_alloc: true,
            ..LoopbackFaults::default()
        });
        let err = QueuePairGuard::alloc(&transport, &ctrlr).err().unwrap();
        assert!(matches!(err, CsqError::QueuePairAllocation(_)));
        assert_eq!(transport.outstanding_qpairs(), 0);
    }
}
