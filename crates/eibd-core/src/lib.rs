//! EIB/KNX frame encoding and decoding.
//!
//! `eibd-core` holds the pure codecs used by the bus-access daemon: the
//! link-layer frame (LPDU), the transport and application layers stacked on
//! its payload (TPDU, APDU), and the cEMI representation carried inside
//! EIBnet/IP. Nothing here performs I/O or keeps state.
//!
//! # Feature flags
//!
//! - **`std`** (default): enables `std::error::Error` implementations.
//! - **`serde`**: derives `Serialize`/`Deserialize` on addresses and PDUs.
//! - **`defmt`**: derives `defmt::Format` on the small value types.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

/// Individual and group addresses.
pub mod address;
/// APDU (application layer) variants and their codecs.
pub mod apdu;
/// cEMI message framing for `L_Data` services.
pub mod cemi;
/// Byte reader/writer used by every codec.
pub mod encoding;
/// Error types for encoding and decoding operations.
pub mod error;
/// LPDU (link layer) frames: `L_Data`, busmonitor captures, acknowledgements.
pub mod lpdu;
/// TPDU (transport layer) control and data units.
pub mod tpdu;

pub use address::{AddressParseError, Destination, GroupAddress, IndividualAddress};
pub use apdu::Apdu;
pub use cemi::{CemiFrame, MessageCode};
pub use error::{DecodeError, EncodeError};
pub use lpdu::{Busmonitor, LData, Lpdu, Priority};
pub use tpdu::Tpdu;
