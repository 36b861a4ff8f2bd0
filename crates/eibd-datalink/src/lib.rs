pub mod eibnet;
pub mod flagpole;
pub mod loopback;
pub mod mailbox;
pub mod mode;
pub mod thread;
pub mod traits;

pub use eibnet::packet::{EibnetPacket, ServiceType};
pub use eibnet::router::{EibnetRouter, RouterConfig};
pub use eibnet::socket::{EibnetSocket, Received, SourceFilter};
pub use eibnet::tunnel::{EibnetTunnel, TunnelConfig};
pub use flagpole::{Flag, Flagpole};
pub use loopback::Loopback;
pub use mailbox::Mailbox;
pub use mode::MonitorMode;
pub use thread::Worker;
pub use traits::{DataLinkError, Layer2Interface};
