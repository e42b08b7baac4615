//! Connection Parameter Management
//!
//! Pushes the host's preferred connection parameters, PHY and data length
//! to the peer once a link exists. Requests are issued one per poll so the
//! stack never sees overlapping procedures.

use crate::core::intents::{Intent, PendingIntents};
use crate::state::{ConnectionParams, DataLengthParams, DeviceParams, LinkStatus, PhyParams};

/// Link procedure errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// A procedure is already running
    Busy,
    NotConnected,
    /// The stack refused the parameters
    Rejected,
}

/// Link parameter procedures offered by the BLE stack
pub trait LinkControl {
    fn update_conn_params(&mut self, params: &ConnectionParams) -> Result<(), LinkError>;
    fn update_phy(&mut self, phy: &PhyParams) -> Result<(), LinkError>;
    fn update_data_length(&mut self, params: &DataLengthParams) -> Result<(), LinkError>;
}

/// Request every preferred parameter on a fresh link
pub fn request_all(intents: &PendingIntents) {
    for intent in Intent::LINK_PRIORITY {
        intents.raise(intent);
    }
}

/// Drop pending requests left over from a previous link
pub fn clear_requests(intents: &PendingIntents) {
    for intent in Intent::LINK_PRIORITY {
        intents.clear(intent);
    }
}

/// Issue at most one pending link request
///
/// `Busy` consumes the request like success does; the peer will report
/// whatever it settles on.
pub fn apply_pending<L: LinkControl>(
    link: &mut L,
    status: &LinkStatus,
    params: &DeviceParams,
    intents: &PendingIntents,
) -> Option<Intent> {
    if !status.is_connected() {
        return None;
    }

    let intent = intents.first_of(&Intent::LINK_PRIORITY)?;
    intents.clear(intent);

    let result = match intent {
        Intent::ApplyConnParams => link.update_conn_params(&params.preferred.conn),
        Intent::ApplyPhy => link.update_phy(&params.preferred.phy),
        _ => link.update_data_length(&params.preferred.data_length),
    };

    match result {
        Ok(()) => debug!("CONNECTION: {:?} requested", intent),
        Err(LinkError::Busy) => debug!("CONNECTION: {:?} skipped, procedure busy", intent),
        Err(e) => warn!("CONNECTION: {:?} failed: {:?}", intent, e),
    }
    Some(intent)
}
