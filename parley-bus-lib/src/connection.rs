use std::fmt::{self, Debug, Formatter};

use log::{debug, info};
use tokio::sync::mpsc::UnboundedSender;

use parley_bus_common::{Body, Message, BUS_PEER_ID};

use crate::{calls_registry::CallsRegistry, Error, Subscriber};

/// Bus connection handle.
///
/// Cheap to clone. Outgoing messages are queued and written to the socket
/// by the [crate::Context] loop, so the handle is only useful while the
/// context is being polled
#[derive(Clone)]
pub struct Connection {
    /// Client id assigned by the bus
    client_id: u32,
    /// Outgoing messages queue
    writer: UnboundedSender<Message>,
    calls: CallsRegistry,
}

impl Connection {
    pub(crate) fn new(client_id: u32, writer: UnboundedSender<Message>) -> Self {
        Self {
            client_id,
            writer,
            calls: CallsRegistry::default(),
        }
    }

    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    /// Subscribe `subscriber` to the object `target_id`. The subscriber gets a
    /// removal notification once the target object goes away.
    ///
    /// Returns [Error::Status] if the bus refuses the subscription,
    /// e.g. [parley_bus_common::Status::NotFound] for an unknown target
    pub async fn subscribe(&self, subscriber: &Subscriber, target_id: u32) -> crate::Result<()> {
        let object_id = subscriber.object_id().ok_or(Error::NotRegistered)?;

        debug!("Subscribing {object_id:#x} to {target_id:#x}");
        self.call(Body::Subscribe {
            object_id,
            target_id,
        })
        .await?;

        info!("Subscriber {object_id:#x} is watching {target_id:#x}");
        Ok(())
    }

    /// Queue a message to be sent
    pub(crate) fn send(&self, message: Message) -> crate::Result<()> {
        self.writer.send(message).map_err(|_| Error::Disconnected)
    }

    /// Make a bus request and wait for its completion.
    /// *Returns* payload messages of the response
    pub(crate) async fn call(&self, body: Body) -> crate::Result<Vec<Body>> {
        let (seq, response) = self.calls.register();

        if let Err(e) = self.send(Message::new(seq, BUS_PEER_ID, body)) {
            self.calls.cancel(seq);
            return Err(e);
        }

        // Sender is dropped if the connection is gone
        response.await.map_err(|_| Error::Disconnected)?
    }

    pub(crate) fn calls(&self) -> &CallsRegistry {
        &self.calls
    }
}

impl Debug for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Connection: {:#x}", self.client_id)
    }
}
