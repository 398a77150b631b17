//! Bulk endpoint resolution
//!
//! Probe needs exactly one bulk-IN and one bulk-OUT endpoint. This module
//! picks them out of the active alternate setting's descriptor list.

use crate::bus::{Direction, EndpointDescriptor, TransferKind};
use crate::error::{DriverError, Result};

/// The bulk endpoint pair probe settled on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedEndpoints {
    pub bulk_in: EndpointDescriptor,
    pub bulk_out: EndpointDescriptor,
}

/// Resolve the first bulk-IN and first bulk-OUT endpoint, in list order
///
/// Endpoints of other kinds or directions are skipped, and anything after
/// the first match in each direction is ignored. Fails with
/// [`DriverError::NoEndpoints`] unless both are found.
pub fn resolve_bulk_pair(endpoints: &[EndpointDescriptor]) -> Result<ResolvedEndpoints> {
    let bulk_in = endpoints
        .iter()
        .find(|ep| ep.kind == TransferKind::Bulk && ep.direction == Direction::In);
    let bulk_out = endpoints
        .iter()
        .find(|ep| ep.kind == TransferKind::Bulk && ep.direction == Direction::Out);

    match (bulk_in, bulk_out) {
        (Some(bulk_in), Some(bulk_out)) => Ok(ResolvedEndpoints {
            bulk_in: *bulk_in,
            bulk_out: *bulk_out,
        }),
        _ => Err(DriverError::NoEndpoints),
    }
}
