//! Controller locator.
//!
//! Runs discovery against an endpoint and attaches the one controller whose
//! subsystem name equals the filter exactly. Namespace 1 must be active.

use tracing::{debug, info, warn};

use crate::error::{CsqError, Result};
use crate::protocol::DEFAULT_NSID;
use crate::transport::{Transport, TransportEndpoint, TransportId};

/// Finds and attaches controllers through a [`Transport`].
pub struct ControllerLocator<'t, T: Transport> {
    transport: &'t T,
    nsid: u32,
}

impl<'t, T: Transport> ControllerLocator<'t, T> {
    /// Locator that requires namespace 1 on the attached controller.
    pub fn new(transport: &'t T) -> Self {
        Self {
            transport,
            nsid: DEFAULT_NSID,
        }
    }

    /// Locate using a configured endpoint.
    pub fn locate_endpoint(
        &self,
        endpoint: &TransportEndpoint,
    ) -> Result<AttachedController<'t, T>> {
        endpoint.validate()?;
        self.locate(&endpoint.discovery_trid(), endpoint.subsystem_filter())
    }

    /// Attach the controller named `subsystem_filter` found via `trid`.
    ///
    /// Only an exact match is accepted. If discovery reports the same
    /// subsystem more than once, the first attach wins and the rest are
    /// detached again.
    pub fn locate(
        &self,
        trid: &TransportId,
        subsystem_filter: &str,
    ) -> Result<AttachedController<'t, T>> {
        let transport = self.transport;
        let mut attached: Option<(TransportId, T::Controller)> = None;

        let probed = transport.probe(
            trid,
            &mut |found| {
                info!("Found {}", found.display_url());
                let accept = found.subnqn == subsystem_filter;
                if !accept {
                    debug!(subnqn = %found.subnqn, "skipping subsystem");
                }
                accept
            },
            &mut |found, mut ctrlr| {
                if attached.is_some() {
                    warn!(subnqn = %found.subnqn, "duplicate controller, detaching");
                    transport.detach(&mut ctrlr);
                    return;
                }
                info!("Attached to {}", found.subnqn);
                attached = Some((found.clone(), ctrlr));
            },
        );

        if let Err(e) = probed {
            if let Some((_, mut ctrlr)) = attached.take() {
                transport.detach(&mut ctrlr);
            }
            return Err(match e {
                CsqError::Discovery(_) => e,
                other => CsqError::Discovery(other.to_string()),
            });
        }

        let (trid, controller) = attached.ok_or_else(|| CsqError::ControllerNotFound {
            subnqn: subsystem_filter.to_string(),
        })?;
        let ctrlr = AttachedController {
            transport,
            trid,
            controller,
            detached: false,
        };

        match transport.namespace_active(&ctrlr.controller, self.nsid) {
            Some(true) => Ok(ctrlr),
            state => {
                warn!(nsid = self.nsid, ?state, "namespace not usable");
                // Dropping `ctrlr` detaches it.
                Err(CsqError::NamespaceUnavailable { nsid: self.nsid })
            }
        }
    }
}

/// An attached controller, detached on drop.
pub struct AttachedController<'t, T: Transport> {
    transport: &'t T,
    trid: TransportId,
    controller: T::Controller,
    detached: bool,
}

impl<'t, T: Transport> AttachedController<'t, T> {
    /// Transport id of the attached subsystem.
    #[inline]
    pub fn trid(&self) -> &TransportId {
        &self.trid
    }

    /// Subsystem name.
    #[inline]
    pub fn subnqn(&self) -> &str {
        &self.trid.subnqn
    }

    /// Controller handle for sessions.
    #[inline]
    pub fn controller(&self) -> &T::Controller {
        &self.controller
    }

    /// Detach now.
    pub fn detach(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.detached {
            self.transport.detach(&mut self.controller);
            self.detached = true;
            debug!(subnqn = %self.trid.subnqn, "controller detached");
        }
    }
}

impl<T: Transport> Drop for AttachedController<'_, T> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{LoopbackSubsystem, LoopbackTransport};

    fn discovery() -> TransportId {
        TransportId::discovery("tcp", "ipv4", "127.0.0.1", "4420")
    }

    fn transport() -> LoopbackTransport {
        LoopbackTransport::new()
            .with_subsystem(LoopbackSubsystem::new("nqn.test:subsystem1"))
            .with_subsystem(LoopbackSubsystem::new("nqn.test:subsystem10"))
    }

    #[test]
    fn test_exact_match_attaches() {
        let t = transport();
        let ctrlr = ControllerLocator::new(&t)
            .locate(&discovery(), "nqn.test:subsystem1")
            .unwrap();
        assert_eq!(ctrlr.subnqn(), "nqn.test:subsystem1");
        assert_eq!(ctrlr.trid().traddr, "127.0.0.1");
        assert_eq!(t.attached_controllers(), 1);
        ctrlr.detach();
        assert_eq!(t.attached_controllers(), 0);
    }

    #[test]
    fn test_no_match_is_not_found() {
        let t = transport();
        let err = ControllerLocator::new(&t)
            .locate(&discovery(), "nqn.test:subsystem2")
            .err()
            .unwrap();
        assert!(matches!(
            err,
            CsqError::ControllerNotFound { ref subnqn } if subnqn == "nqn.test:subsystem2"
        ));
        assert_eq!(t.attached_controllers(), 0);
    }

    #[test]
    fn test_prefix_does_not_match() {
        let t = transport();
        let err = ControllerLocator::new(&t)
            .locate(&discovery(), "nqn.test:subsystem")
            .err()
            .unwrap();
        assert!(matches!(err, CsqError::ControllerNotFound { .. }));
    }

    #[test]
    fn test_inactive_namespace_detaches() {
        let t = LoopbackTransport::new()
            .with_subsystem(LoopbackSubsystem::new("nqn.a").with_inactive_namespace())
            .with_subsystem(LoopbackSubsystem::new("nqn.b").without_namespace());
        for name in ["nqn.a", "nqn.b"] {
            let err = ControllerLocator::new(&t).locate(&discovery(), name).err().unwrap();
            assert!(matches!(err, CsqError::NamespaceUnavailable { nsid: 1 }));
            assert_eq!(t.attached_controllers(), 0);
        }
    }

    #[test]
    fn test_duplicate_subsystem_keeps_first() {
        let t = LoopbackTransport::new()
            .with_subsystem(LoopbackSubsystem::new("nqn.a"))
            .with_subsystem(LoopbackSubsystem::new("nqn.a"));
        let ctrlr = ControllerLocator::new(&t).locate(&discovery(), "nqn.a").unwrap();
        assert_eq!(t.attached_controllers(), 1);
        drop(ctrlr);
        assert_eq!(t.attached_controllers(), 0);
    }

    #[test]
    fn test_discovery_error() {
        let t = transport().listening_on("10.1.1.1", "4420");
        let err = ControllerLocator::new(&t)
            .locate(&discovery(), "nqn.test:subsystem1")
            .err()
            .unwrap();
        assert!(matches!(err, CsqError::Discovery(_)));
    }

    #[test]
    fn test_locate_endpoint_validates() {
        let t = transport();
        let endpoint = TransportEndpoint {
            trtype: "tcp".into(),
            adrfam: "ipv4".into(),
            traddr: "".into(),
            trsvcid: "4420".into(),
            subnqn: "nqn.test:subsystem1".into(),
        };
        let err = ControllerLocator::new(&t).locate_endpoint(&endpoint).err().unwrap();
        assert!(matches!(err, CsqError::InvalidConfig(_)));
    }
}
