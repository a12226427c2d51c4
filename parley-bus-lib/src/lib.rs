//! ## Parley bus lib
//!
//! A client library to expose objects on the Parley bus and to watch remote objects.
//!
//! A client connects to the bus daemon over a Unix domain socket. The daemon
//! assigns the client an id, routes method calls to the objects the client
//! registered, and notifies subscribers when objects they watch go away.
//! Messages are BSON documents, see [parley_bus_common::Message].
//!
//! To connect call [Context::connect]. The [Context] is single-threaded: method handlers
//! and the tasks they spawn run on a [tokio::task::LocalSet], one at a time.
//!
//! ### Objects
//! An [Object] is a named set of methods. Each method has a [parley_bus_common::Policy]
//! (argument schema), which is checked before the handler runs. Register an object
//! with [Context::add_object].
//!
//! ### Deferred replies
//! A handler may not be able to answer right away. [Request::defer] suspends the call
//! and returns a [DeferredRequest], which is the only way to complete the call later.
//! See `examples/deferred_reply.rs`.
//!
//! ### Subscribers
//! A [Subscriber] watches remote objects. Register it with [Context::register_subscriber],
//! then call [Connection::subscribe] for each object to watch. The subscriber removal
//! handler is called with an object id once the object goes away.
//!
//! ### Polling
//! Incoming calls, notifications and outgoing replies are processed only while
//! the context is polled. Use [Context::run] to poll until the bus disconnects,
//! or [Context::poll] to combine the context with other futures.
//!
//! ### Testing
//! The `testing` feature adds [testing::MockBus], an in-process bus double, which
//! serves a single client over an in-memory stream.

mod calls_registry;
pub mod codec;
mod connection;
mod context;
mod error;
mod object;
mod request;
mod subscriber;
#[cfg(feature = "testing")]
pub mod testing;

pub use codec::MessageCodec;
pub use connection::Connection;
pub use context::{default_socket_path, Context};
pub use error::{Error, Result};
pub use object::Object;
pub use request::{DeferredRequest, Request};
pub use subscriber::Subscriber;
