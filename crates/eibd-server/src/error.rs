use eibd_core::EncodeError;
use eibd_datalink::DataLinkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Layer3Error {
    #[error("a busmonitor is active")]
    BusmonitorActive,
    #[error("normal-mode subscribers are registered")]
    NormalModeActive,
    #[error("address already held by a connection")]
    AddressLocked,
    #[error("driver error: {0}")]
    Driver(#[from] DataLinkError),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("layer3 stopped")]
    Stopped,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Layer3(#[from] Layer3Error),
    #[error("datalink error: {0}")]
    DataLink(#[from] DataLinkError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid group address: {0}")]
    InvalidGroupAddress(String),
}
