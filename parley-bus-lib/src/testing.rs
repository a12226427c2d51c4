//! In-process bus double.
//!
//! [MockBus] serves a single [crate::Context] over an in-memory stream. It
//! greets the client, registers objects, keeps subscriptions, injects method
//! calls and emits removal notifications. It doesn't route anything between
//! clients.

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    rc::Rc,
};

use async_channel::{Receiver, Sender};
use bson::Document;
use futures::{select_biased, FutureExt, SinkExt, StreamExt};
use log::{debug, warn};
use tokio::{
    io::DuplexStream,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
};
use tokio_util::codec::Framed;

use parley_bus_common::{Body, Message, Status, BUS_PEER_ID};

use crate::MessageCodec;

/// Client id assigned to the served client
pub const CLIENT_ID: u32 = 0x51;
/// Peer id of the mock caller making method calls
pub const CALLER_ID: u32 = 0x7e57;
const FIRST_OBJECT_ID: u32 = 0x100;
const STREAM_BUFFER_SIZE: usize = 64 * 1024;

enum Event {
    Outgoing(Option<Message>),
    Incoming(Option<crate::Result<Message>>),
}

/// Reply to an injected method call
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Data(Document),
    Status(Status),
}

/// Method call made with [MockBus::invoke]
pub struct Invocation {
    replies: Receiver<Reply>,
}

impl Invocation {
    /// Reply received so far, if any
    pub fn try_reply(&self) -> Option<Reply> {
        self.replies.try_recv().ok()
    }

    /// Wait for the next reply
    pub async fn reply(&self) -> Option<Reply> {
        self.replies.recv().await.ok()
    }

    /// Wait for the call completion.
    /// *Returns* all payloads and the completion status
    pub async fn finish(self) -> (Vec<Document>, Status) {
        let mut payloads = Vec::new();

        while let Some(reply) = self.reply().await {
            match reply {
                Reply::Data(data) => payloads.push(data),
                Reply::Status(status) => return (payloads, status),
            }
        }

        (payloads, Status::ConnectionFailed)
    }
}

#[derive(Default)]
struct BusState {
    next_object_id: u32,
    next_seq: u32,
    /// Known objects. Subscribers and remote objects have no name
    objects: BTreeMap<u32, Option<String>>,
    /// (subscriber, target) pairs
    subscriptions: Vec<(u32, u32)>,
    /// Injected calls waiting for completion by `seq`
    invocations: HashMap<u32, Sender<Reply>>,
}

/// Bus double handle. Cheap to clone
#[derive(Clone)]
pub struct MockBus {
    state: Rc<RefCell<BusState>>,
    outgoing: UnboundedSender<Message>,
}

impl MockBus {
    /// Start serving. Must be called inside a [tokio::task::LocalSet].
    /// *Returns* the bus handle and a client stream to pass to [crate::Context::with_stream]
    pub fn start() -> (Self, DuplexStream) {
        let (bus_stream, client_stream) = tokio::io::duplex(STREAM_BUFFER_SIZE);
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();

        let this = Self {
            state: Rc::new(RefCell::new(BusState {
                next_object_id: FIRST_OBJECT_ID,
                ..Default::default()
            })),
            outgoing,
        };

        this.send(Message::new(
            0,
            BUS_PEER_ID,
            Body::Hello {
                client_id: CLIENT_ID,
            },
        ));

        tokio::task::spawn_local(
            this.clone()
                .serve(Framed::new(bus_stream, MessageCodec), outgoing_rx),
        );

        (this, client_stream)
    }

    /// Make an object with a given id known to the bus, as if another client registered it
    pub fn add_remote_object(&self, object_id: u32) {
        self.state.borrow_mut().objects.insert(object_id, None);
    }

    /// Id of a client object registered with a given `name`
    pub fn object_id(&self, name: &str) -> Option<u32> {
        self.state
            .borrow()
            .objects
            .iter()
            .find(|(_, object_name)| object_name.as_deref() == Some(name))
            .map(|(id, _)| *id)
    }

    /// Active (subscriber, target) subscriptions
    pub fn subscriptions(&self) -> Vec<(u32, u32)> {
        self.state.borrow().subscriptions.clone()
    }

    /// Call `method` of the client object `object_id`
    pub fn invoke(&self, object_id: u32, method: &str, args: Document) -> Invocation {
        let (sender, replies) = async_channel::unbounded();

        let seq = {
            let mut state = self.state.borrow_mut();
            state.next_seq += 1;

            let seq = state.next_seq;
            state.invocations.insert(seq, sender);
            seq
        };

        self.send(Message::new(
            seq,
            CALLER_ID,
            Body::Invoke {
                object_id,
                method: method.to_owned(),
                args,
            },
        ));

        Invocation { replies }
    }

    /// Remove object `target_id`, notifying its subscribers
    pub fn remove_object(&self, target_id: u32) {
        let subscribers: Vec<u32> = {
            let mut state = self.state.borrow_mut();
            state.objects.remove(&target_id);

            let (removed, kept) = state
                .subscriptions
                .drain(..)
                .partition(|(_, target)| *target == target_id);
            state.subscriptions = kept;

            removed.into_iter().map(|(subscriber, _)| subscriber).collect()
        };

        for object_id in subscribers {
            self.send(Message::new(
                0,
                BUS_PEER_ID,
                Body::ObjectRemoved {
                    object_id,
                    target_id,
                },
            ));
        }
    }

    fn send(&self, message: Message) {
        // Serving task is gone only if the client disconnected
        let _ = self.outgoing.send(message);
    }

    async fn serve(
        self,
        mut framed: Framed<DuplexStream, MessageCodec>,
        mut outgoing: UnboundedReceiver<Message>,
    ) {
        loop {
            let event = select_biased! {
                message = outgoing.recv().fuse() => Event::Outgoing(message),
                message = framed.next().fuse() => Event::Incoming(message),
            };

            match event {
                Event::Outgoing(Some(message)) => {
                    if let Err(e) = framed.send(message).await {
                        warn!("Mock bus failed to send a message: {e}");
                        return;
                    }
                }
                Event::Outgoing(None) => return,
                Event::Incoming(Some(Ok(message))) => self.handle_client_message(message),
                Event::Incoming(Some(Err(e))) => {
                    warn!("Mock bus failed to read a message: {e}");
                    return;
                }
                Event::Incoming(None) => {
                    debug!("Mock bus client disconnected");
                    return;
                }
            }
        }
    }

    fn handle_client_message(&self, message: Message) {
        let Message { seq, peer, body } = message;

        match body {
            Body::AddObject { name, .. } => self.handle_add_object(seq, name),
            Body::Subscribe {
                object_id,
                target_id,
            } => {
                let status = {
                    let mut state = self.state.borrow_mut();

                    if state.objects.contains_key(&target_id) {
                        state.subscriptions.push((object_id, target_id));
                        Status::Ok
                    } else {
                        Status::NotFound
                    }
                };

                self.send(Message::status(seq, BUS_PEER_ID, status));
            }
            Body::Data { data } => self.forward_reply(seq, peer, Reply::Data(data)),
            Body::Status { status } => self.forward_reply(seq, peer, Reply::Status(status)),
            body => warn!("Mock bus got unexpected message: {body:?}"),
        }
    }

    fn handle_add_object(&self, seq: u32, name: Option<String>) {
        let object_id = {
            let mut state = self.state.borrow_mut();

            if name.is_some() && state.objects.values().any(|known| *known == name) {
                None
            } else {
                let object_id = state.next_object_id;
                state.next_object_id += 1;
                state.objects.insert(object_id, name);
                Some(object_id)
            }
        };

        match object_id {
            Some(object_id) => {
                self.send(Message::new(seq, BUS_PEER_ID, Body::ObjectAdded { object_id }));
                self.send(Message::status(seq, BUS_PEER_ID, Status::Ok));
            }
            None => self.send(Message::status(seq, BUS_PEER_ID, Status::InvalidArgument)),
        }
    }

    fn forward_reply(&self, seq: u32, peer: u32, reply: Reply) {
        if peer != CALLER_ID {
            warn!("Reply addressed to an unknown peer {peer:#x}");
            return;
        }

        let mut state = self.state.borrow_mut();
        let completed = matches!(reply, Reply::Status(_));

        match state.invocations.get(&seq) {
            Some(sender) => {
                let _ = sender.try_send(reply);
            }
            None => {
                warn!("Reply for an unknown call {seq}: {reply:?}");
                return;
            }
        }

        if completed {
            state.invocations.remove(&seq);
        }
    }
}
