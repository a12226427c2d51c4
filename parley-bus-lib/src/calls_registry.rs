use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
};

use log::trace;
use tokio::sync::oneshot;

use parley_bus_common::{Body, Status};

use crate::Error;

pub(crate) type CallResult = crate::Result<Vec<Body>>;

struct Call {
    /// Payload received so far
    data: Vec<Body>,
    reply: oneshot::Sender<CallResult>,
}

/// Accounts outgoing requests and routes incoming responses to the proper caller.
/// A call collects payload messages until the terminating [Body::Status]
#[derive(Clone, Default)]
pub(crate) struct CallsRegistry {
    seq_counter: Rc<Cell<u32>>,
    calls: Rc<RefCell<HashMap<u32, Call>>>,
}

impl CallsRegistry {
    /// Allocate a sequence number for a new call.
    /// *Returns* the `seq` and a receiver to await for the call result
    pub fn register(&self) -> (u32, oneshot::Receiver<CallResult>) {
        let seq = self.seq_counter.get().wrapping_add(1);
        self.seq_counter.set(seq);

        let (reply, receiver) = oneshot::channel();
        self.calls.borrow_mut().insert(
            seq,
            Call {
                data: Vec::new(),
                reply,
            },
        );

        trace!("Registered a call with seq {seq}");
        (seq, receiver)
    }

    pub fn cancel(&self, seq: u32) {
        self.calls.borrow_mut().remove(&seq);
    }

    /// Drop all pending calls. Their callers receive [Error::Disconnected]
    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }

    /// Resolve a call with an incoming message `body`.
    /// *Returns* `false` if there is no call with a given `seq`
    pub fn resolve(&self, seq: u32, body: Body) -> bool {
        let mut calls = self.calls.borrow_mut();

        match body {
            Body::Status { status } => match calls.remove(&seq) {
                Some(call) => {
                    trace!("Call {seq} completed: {status}");

                    let result = if status == Status::Ok {
                        Ok(call.data)
                    } else {
                        Err(Error::Status(status))
                    };

                    // Caller may be gone already
                    let _ = call.reply.send(result);
                    true
                }
                None => false,
            },
            body => match calls.get_mut(&seq) {
                Some(call) => {
                    call.data.push(body);
                    true
                }
                None => false,
            },
        }
    }

    #[cfg(test)]
    pub fn has_call(&self, seq: u32) -> bool {
        self.calls.borrow().contains_key(&seq)
    }
}
