use std::{
    cell::{Cell, RefCell},
    fmt::{self, Debug, Formatter},
    rc::Rc,
};

use log::debug;

type RemoveHandler = Rc<dyn Fn(u32)>;

#[derive(Default)]
struct Inner {
    /// Bus object id. Assigned on registration
    object_id: Cell<Option<u32>>,
    remove_handler: RefCell<Option<RemoveHandler>>,
}

/// Watcher of remote objects lifecycle.
///
/// The handle is cheap to clone, all clones share the same removal handler.
/// Register it with [crate::Context::register_subscriber], then subscribe to
/// objects with [crate::Connection::subscribe]
#[derive(Clone, Default)]
pub struct Subscriber {
    inner: Rc<Inner>,
}

impl Subscriber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a handler called with a target id when a subscription target goes away.
    /// Replaces a previously set handler for all subscriptions of the subscriber
    pub fn set_remove_handler<F: Fn(u32) + 'static>(&self, handler: F) {
        *self.inner.remove_handler.borrow_mut() = Some(Rc::new(handler));
    }

    /// Bus object id, if registered
    pub fn object_id(&self) -> Option<u32> {
        self.inner.object_id.get()
    }

    pub(crate) fn set_object_id(&self, object_id: u32) {
        self.inner.object_id.set(Some(object_id))
    }

    pub(crate) fn handle_remove(&self, target_id: u32) {
        // Release the borrow before calling, the handler may replace itself
        let handler = self.inner.remove_handler.borrow().clone();

        match handler {
            Some(handler) => handler(target_id),
            None => debug!("Object {target_id:#x} went away. No handler set"),
        }
    }
}

impl Debug for Subscriber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Subscriber: {:?}", self.object_id())
    }
}
