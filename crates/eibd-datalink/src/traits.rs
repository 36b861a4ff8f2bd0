use eibd_core::lpdu::{LData, Lpdu};
use eibd_core::{DecodeError, EncodeError, GroupAddress, IndividualAddress};
use thiserror::Error;

use crate::flagpole::Flagpole;

/// Errors that can occur at the data-link layer.
#[derive(Debug, Error)]
pub enum DataLinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("unsupported by this medium: {0}")]
    Unsupported(&'static str),
    #[error("medium not connected")]
    NotConnected,
    #[error("connection to the medium lost")]
    ConnectionLost,
    #[error("medium stopped")]
    Stopped,
}

/// One physical or virtual EIB medium.
///
/// All methods take `&self`; implementations synchronise internally so one
/// thread can block in [`receive`](Layer2Interface::receive) while others
/// send or switch modes.
pub trait Layer2Interface: Send + Sync {
    /// Enters normal operation mode.
    fn open(&self) -> Result<(), DataLinkError>;
    /// Leaves normal operation mode.
    fn close(&self) -> Result<(), DataLinkError>;

    /// Queues `frame` for transmission.
    fn send(&self, frame: LData) -> Result<(), DataLinkError>;

    /// Waits for the next frame. Returns `None` once `stop` is raised or the
    /// medium is gone; check [`connection_lost`](Layer2Interface::connection_lost)
    /// to tell the two apart.
    fn receive(&self, stop: &Flagpole) -> Option<Lpdu>;

    fn enter_busmonitor(&self) -> Result<(), DataLinkError>;
    fn leave_busmonitor(&self) -> Result<(), DataLinkError>;
    fn open_vbusmonitor(&self) -> Result<(), DataLinkError>;
    fn close_vbusmonitor(&self) -> Result<(), DataLinkError>;

    fn add_address(&self, addr: IndividualAddress) -> Result<(), DataLinkError>;
    fn remove_address(&self, addr: IndividualAddress) -> Result<(), DataLinkError>;
    fn add_group_address(&self, addr: GroupAddress) -> Result<(), DataLinkError>;
    fn remove_group_address(&self, addr: GroupAddress) -> Result<(), DataLinkError>;

    fn default_address(&self) -> IndividualAddress;

    fn connection_lost(&self) -> bool;

    fn send_queue_empty(&self) -> bool;
}
