use std::{
    cell::Cell,
    fmt::{self, Debug, Formatter},
    rc::Rc,
};

use bson::Document;
use log::{debug, warn};

use parley_bus_common::{Message, Status};

use crate::{codec, Connection};

/// Where a reply to a method call goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReplyTarget {
    pub seq: u32,
    pub peer: u32,
}

/// Incoming method call.
///
/// A handler either completes the call by returning from the handler, or
/// takes the call continuation with [Request::defer] and completes it later
pub struct Request {
    connection: Connection,
    target: ReplyTarget,
    object_name: Rc<str>,
    method: String,
    /// Shared with the dispatcher, which must not complete a deferred call
    deferred: Rc<Cell<bool>>,
}

impl Request {
    pub(crate) fn new(
        connection: Connection,
        target: ReplyTarget,
        object_name: Rc<str>,
        method: String,
    ) -> Self {
        Self {
            connection,
            target,
            object_name,
            method,
            deferred: Rc::new(Cell::new(false)),
        }
    }

    pub(crate) fn deferred_flag(&self) -> Rc<Cell<bool>> {
        self.deferred.clone()
    }

    /// Name of the called object
    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Caller peer id
    pub fn peer(&self) -> u32 {
        self.target.peer
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Send a reply payload. The call is still completed when the handler returns
    pub fn reply(&self, data: Document) -> crate::Result<()> {
        let message = Message::data(self.target.seq, self.target.peer, data);
        codec::check_frame_len(&message)?;

        self.connection.send(message)
    }

    /// Suspend the call completion. The caller gets no reply until the
    /// returned [DeferredRequest] is consumed
    pub fn defer(self) -> DeferredRequest {
        debug!(
            "Deferring '{}' call {} from {:#x}",
            self.method, self.target.seq, self.target.peer
        );

        self.deferred.set(true);
        DeferredRequest {
            connection: self.connection,
            target: Some(self.target),
        }
    }
}

impl Debug for Request {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Request: {}.{} [{}]",
            self.object_name, self.method, self.target.seq
        )
    }
}

/// Continuation of a deferred method call. Completing consumes it, so a call
/// can't be completed twice
#[must_use = "caller gets no reply unless the request is completed"]
pub struct DeferredRequest {
    connection: Connection,
    /// Taken on completion
    target: Option<ReplyTarget>,
}

impl DeferredRequest {
    /// Send the reply payload and complete the call with [Status::Ok].
    ///
    /// A payload which doesn't fit into a frame completes the call with a
    /// failure status instead
    pub fn reply(mut self, data: Document) -> crate::Result<()> {
        let Some(target) = self.target.take() else {
            return Ok(());
        };

        let message = Message::data(target.seq, target.peer, data);
        if let Err(e) = codec::check_frame_len(&message) {
            self.connection
                .send(Message::status(target.seq, target.peer, e.status()))?;
            return Err(e);
        }

        self.connection.send(message)?;
        self.connection
            .send(Message::status(target.seq, target.peer, Status::Ok))
    }

    /// Complete the call with a `status` without a payload
    pub fn complete(mut self, status: Status) -> crate::Result<()> {
        match self.target.take() {
            Some(target) => self
                .connection
                .send(Message::status(target.seq, target.peer, status)),
            None => Ok(()),
        }
    }
}

impl Drop for DeferredRequest {
    fn drop(&mut self) {
        if let Some(target) = self.target {
            warn!(
                "Deferred call {} from {:#x} dropped without a reply",
                target.seq, target.peer
            );
        }
    }
}

impl Debug for DeferredRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "DeferredRequest: {:?}", self.target)
    }
}
