use std::{
    collections::HashMap,
    env,
    path::{Path, PathBuf},
    rc::Rc,
};

use bson::Document;
use futures::{
    future::{self, LocalBoxFuture},
    pin_mut, select_biased,
    stream::FuturesUnordered,
    FutureExt, SinkExt, StreamExt,
};
use log::{debug, error, info, trace, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::UnixStream,
    signal::ctrl_c,
    sync::mpsc::{self, UnboundedReceiver},
};
use tokio_util::codec::Framed;

use parley_bus_common::{Body, Message, Status, BUS_SOCKET_PATH_ENV, DEFAULT_BUS_SOCKET_PATH};

use crate::{request::ReplyTarget, Connection, Error, MessageCodec, Object, Request, Subscriber};

type HandlersStreamType = FuturesUnordered<LocalBoxFuture<'static, ()>>;

/// Socket path used if none given: [BUS_SOCKET_PATH_ENV] if set, [DEFAULT_BUS_SOCKET_PATH] otherwise
pub fn default_socket_path() -> PathBuf {
    env::var_os(BUS_SOCKET_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BUS_SOCKET_PATH))
}

enum Event {
    Outgoing(Option<Message>),
    Incoming(Option<crate::Result<Message>>),
    HandlerDone,
}

/// Bus client context: a bus connection, registered objects and subscribers.
///
/// The context is single-threaded. Method handlers and the tasks they spawn
/// share state through [Rc], so the context must be polled inside a
/// [tokio::task::LocalSet]
pub struct Context<S = UnixStream> {
    framed: Framed<S, MessageCodec>,
    /// Messages queued by [Connection] handles
    outgoing: UnboundedReceiver<Message>,
    connection: Connection,
    /// Registered objects by object id
    objects: HashMap<u32, Rc<Object>>,
    /// Registered subscribers by object id
    subscribers: HashMap<u32, Subscriber>,
    /// Running method handlers
    handlers: HandlersStreamType,
}

impl Context<UnixStream> {
    /// Connect to the bus at `socket_path`, or at [default_socket_path] if not given
    pub async fn connect(socket_path: Option<&Path>) -> crate::Result<Self> {
        let path = socket_path
            .map(Path::to_path_buf)
            .unwrap_or_else(default_socket_path);

        info!("Connecting to the bus at: {:?}", path);

        let stream = UnixStream::connect(&path)
            .await
            .map_err(|source| Error::Connect { path, source })?;

        Self::with_stream(stream).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Context<S> {
    /// Make a context using an established bus `stream`. Waits for the bus greeting
    pub async fn with_stream(stream: S) -> crate::Result<Self> {
        let mut framed = Framed::new(stream, MessageCodec);

        let client_id = match framed.next().await {
            Some(Ok(Message {
                body: Body::Hello { client_id },
                ..
            })) => client_id,
            Some(Ok(message)) => {
                return Err(Error::Protocol(format!(
                    "expected bus greeting, got {message:?}"
                )))
            }
            Some(Err(e)) => return Err(e),
            None => return Err(Error::Disconnected),
        };

        info!("Connected to the bus as {client_id:#x}");

        let (writer, outgoing) = mpsc::unbounded_channel();

        let handlers: HandlersStreamType = FuturesUnordered::new();
        // Keeps the stream from terminating when there are no handlers running
        handlers.push(Box::pin(future::pending()));

        Ok(Self {
            framed,
            outgoing,
            connection: Connection::new(client_id, writer),
            objects: HashMap::new(),
            subscribers: HashMap::new(),
            handlers,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Register an `object` at the bus.
    /// *Returns* the bus object id
    pub async fn add_object(&mut self, object: Object) -> crate::Result<u32> {
        let response = self
            .call(Body::AddObject {
                name: Some(object.name().to_owned()),
                methods: object.signatures(),
            })
            .await?;

        let object_id = Self::added_object_id(response)?;
        info!("Registered object '{}' as {object_id:#x}", object.name());

        self.objects.insert(object_id, Rc::new(object));
        Ok(object_id)
    }

    /// Register a `subscriber` at the bus to be able to subscribe it to remote objects
    pub async fn register_subscriber(&mut self, subscriber: &Subscriber) -> crate::Result<()> {
        let response = self
            .call(Body::AddObject {
                name: None,
                methods: Vec::new(),
            })
            .await?;

        let object_id = Self::added_object_id(response)?;
        info!("Registered subscriber as {object_id:#x}");

        subscriber.set_object_id(object_id);
        self.subscribers.insert(object_id, subscriber.clone());
        Ok(())
    }

    /// Run the context loop until the bus disconnects or the process is interrupted.
    /// Consumes the context, which closes the connection on return
    pub async fn run(mut self) -> crate::Result<()> {
        let interrupt = ctrl_c().fuse();
        pin_mut!(interrupt);

        loop {
            select_biased! {
                result = self.poll().fuse() => match result {
                    Ok(()) => {}
                    Err(Error::Disconnected) => {
                        info!("Bus connection closed");
                        return Ok(());
                    }
                    Err(e) => {
                        error!("Bus connection failure: {e}");
                        return Err(e);
                    }
                },
                result = interrupt => match result {
                    Ok(()) => {
                        info!("Interrupted. Leaving the bus");
                        return Ok(());
                    }
                    Err(e) => warn!("Failed to listen for the interrupt signal: {e}"),
                }
            }
        }
    }

    /// Process a single event: send a queued message, handle an incoming
    /// message, or finish a method handler.
    ///
    /// Returns [Error::Disconnected] if the bus closed the connection
    pub async fn poll(&mut self) -> crate::Result<()> {
        let event = select_biased! {
            message = self.outgoing.recv().fuse() => Event::Outgoing(message),
            message = self.framed.next().fuse() => Event::Incoming(message),
            _ = self.handlers.next() => Event::HandlerDone,
        };

        match event {
            Event::Outgoing(Some(message)) => {
                trace!("Outgoing message: {message:?}");

                match self.framed.send(message).await {
                    // Nothing is written if a message fails to encode
                    Err(e @ (Error::Encode(_) | Error::Protocol(_))) => {
                        warn!("Dropped an outgoing message: {e}");
                        Ok(())
                    }
                    result => result,
                }
            }
            // Self connection handle keeps the queue open
            Event::Outgoing(None) => Err(Error::Disconnected),
            Event::Incoming(Some(Ok(message))) => {
                trace!("Incoming message: {message:?}");
                self.handle_message(message);
                Ok(())
            }
            Event::Incoming(Some(Err(e))) => Err(e),
            Event::Incoming(None) => Err(Error::Disconnected),
            Event::HandlerDone => Ok(()),
        }
    }

    /// Make a bus request, polling the context until a response arrives
    async fn call(&mut self, body: Body) -> crate::Result<Vec<Body>> {
        let connection = self.connection.clone();
        let response = async move { connection.call(body).await }.fuse();
        pin_mut!(response);

        loop {
            select_biased! {
                result = response => return result,
                // Need to poll self to send the request and receive the response
                polled = self.poll().fuse() => polled?,
            }
        }
    }

    fn added_object_id(response: Vec<Body>) -> crate::Result<u32> {
        response
            .into_iter()
            .find_map(|body| match body {
                Body::ObjectAdded { object_id } => Some(object_id),
                _ => None,
            })
            .ok_or_else(|| Error::Protocol("no object id in the registration response".into()))
    }

    fn handle_message(&mut self, message: Message) {
        let Message { seq, peer, body } = message;

        match body {
            Body::Invoke {
                object_id,
                method,
                args,
            } => self.handle_invoke(ReplyTarget { seq, peer }, object_id, method, args),
            Body::ObjectRemoved {
                object_id,
                target_id,
            } => self.handle_object_removed(object_id, target_id),
            Body::Hello { .. } | Body::AddObject { .. } | Body::Subscribe { .. } => {
                warn!("Unexpected message from the bus: {body:?}")
            }
            body => {
                if !self.connection.calls().resolve(seq, body) {
                    warn!("Response for an unknown request {seq}");
                }
            }
        }
    }

    fn handle_invoke(
        &mut self,
        target: ReplyTarget,
        object_id: u32,
        method_name: String,
        args: Document,
    ) {
        let Some(object) = self.objects.get(&object_id).cloned() else {
            warn!("Call for an unknown object {object_id:#x}");
            self.send_status(target, Status::NotFound);
            return;
        };

        let Some(method) = object.method(&method_name) else {
            warn!("Unknown method '{}' of '{}' requested", method_name, object.name());
            self.send_status(target, Status::MethodNotFound);
            return;
        };

        let args = match method.policy.parse(&args) {
            Ok(args) => args,
            Err(e) => {
                warn!("Invalid '{}.{}' call: {e}", object.name(), method_name);
                self.send_status(target, Status::InvalidArgument);
                return;
            }
        };

        debug!(
            "Method call {}.{} from {:#x}. Params: {args:?}",
            object.name(),
            method_name,
            target.peer
        );

        let request = Request::new(
            self.connection.clone(),
            target,
            object.name_handle(),
            method_name,
        );
        let deferred = request.deferred_flag();
        let handler_future = (method.handler)(request, args);

        let connection = self.connection.clone();
        self.handlers.push(Box::pin(async move {
            let result = handler_future.await;

            if deferred.get() {
                trace!("Call {} deferred", target.seq);
                return;
            }

            let status = match result {
                Ok(()) => Status::Ok,
                Err(e) => {
                    debug!("Method handler failed: {e}");
                    e.status()
                }
            };

            if let Err(e) = connection.send(Message::status(target.seq, target.peer, status)) {
                warn!("Failed to complete call {}: {e}", target.seq);
            }
        }));
    }

    fn handle_object_removed(&self, object_id: u32, target_id: u32) {
        match self.subscribers.get(&object_id) {
            Some(subscriber) => {
                debug!("Subscriber {object_id:#x} target {target_id:#x} went away");
                subscriber.handle_remove(target_id)
            }
            None => warn!("Removal notification for an unknown subscriber {object_id:#x}"),
        }
    }

    fn send_status(&self, target: ReplyTarget, status: Status) {
        if let Err(e) = self
            .connection
            .send(Message::status(target.seq, target.peer, status))
        {
            warn!("Failed to reply to call {}: {e}", target.seq);
        }
    }
}

impl<S> Drop for Context<S> {
    fn drop(&mut self) {
        debug!("Leaving the bus");
        // Fail requests still waiting for a response
        self.connection.calls().clear();
    }
}
