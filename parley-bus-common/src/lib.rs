pub mod message;
pub mod policy;
pub mod status;

pub use message::{Body, Message, MethodSignature};
pub use policy::{ArgumentError, Field, FieldType, Policy};
pub use status::Status;

/// Peer id of the bus daemon. Requests addressed to the daemon itself use it
pub const BUS_PEER_ID: u32 = 0;

pub const DEFAULT_BUS_SOCKET_PATH: &str = "/var/run/parley.bus.socket";
/// Environment variable overriding [DEFAULT_BUS_SOCKET_PATH]
pub const BUS_SOCKET_PATH_ENV: &str = "PARLEY_BUS_SOCKET";
