use bson::Document;
use serde::{Deserialize, Serialize};

use crate::{policy::Field, status::Status};

/// Method name and argument schema, announced to the bus on object registration
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MethodSignature {
    pub name: String,
    pub fields: Vec<Field>,
}

/// Bus frame
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Message {
    /// Request sequence number. Every message answering a request carries the request `seq`
    pub seq: u32,
    /// Peer the message is addressed to, or the peer it comes from
    pub peer: u32,
    pub body: Body,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Body {
    /// Bus greeting. Sent once right after the connection is accepted
    Hello { client_id: u32 },
    /// Request completion. Terminates a request
    Status { status: Status },
    /// Request payload
    Data { data: Document },
    /// Object registration. Subscribers register as objects without a name and methods
    AddObject {
        name: Option<String>,
        methods: Vec<MethodSignature>,
    },
    ObjectAdded { object_id: u32 },
    /// Incoming method call for a local object
    Invoke {
        object_id: u32,
        method: String,
        args: Document,
    },
    /// Subscribe `object_id` subscriber to the `target_id` object
    Subscribe { object_id: u32, target_id: u32 },
    /// Subscription target `target_id` of the `object_id` subscriber went away
    ObjectRemoved { object_id: u32, target_id: u32 },
}

impl Message {
    pub fn new(seq: u32, peer: u32, body: Body) -> Self {
        Self { seq, peer, body }
    }

    /// Message answering a request with a given `seq`
    pub fn status(seq: u32, peer: u32, status: Status) -> Self {
        Self::new(seq, peer, Body::Status { status })
    }

    pub fn data(seq: u32, peer: u32, data: Document) -> Self {
        Self::new(seq, peer, Body::Data { data })
    }
}
