pub mod connection;
pub mod eibnet_server;
pub mod error;
pub mod groupcache;
pub mod layer3;
pub mod layer4;

pub use connection::{ConnectionConfig, TConnection};
pub use eibnet_server::{EibnetServer, ServerConfig};
pub use error::{Layer3Error, ServerError};
pub use groupcache::{GroupCache, GroupCacheConfig, GroupCacheEntry};
pub use layer3::{BusmonitorSink, IndividualLock, LDataSink, Layer3, Layer3Handle, SubscriptionId};
pub use layer4::{
    BroadcastComm, GroupApduComm, GroupComm, GroupSocket, TBroadcast, TGroup, TIndividual, TTpdu,
    TpduComm,
};
