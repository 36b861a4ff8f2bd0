pub mod messages;
pub mod packet;
pub mod router;
pub mod socket;
pub mod tunnel;
