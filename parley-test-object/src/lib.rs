//! ## Parley test object
//!
//! Exposes the object `test` on the Parley bus:
//! - `hello(id: int32?, msg: string?)` replies `{ message: "test received a message: <msg>" }`
//!   one second after the call. The call is deferred until then;
//! - `watch(id: int32)` subscribes to the object `id` and logs once the object goes away.
//!
//! ## Usage
//! ```sh
//! Parley bus test object
//!
//! Usage: parley-test-object [OPTIONS]
//!
//! Options:
//!   -s, --socket <SOCKET>  Bus socket path. Uses $PARLEY_BUS_SOCKET or the system bus socket if not set
//!   -h, --help             Print help
//!   -V, --version          Print version
//! ```

pub mod args;

use std::{cell::RefCell, rc::Rc, time::Duration};

use bson::doc;
use log::{error, info, warn};
use serde::Deserialize;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    task::{self, LocalSet},
    time,
};

use parley_bus_common::{Field, FieldType, Policy, Status};
use parley_bus_lib::{Context, Object, Request, Subscriber};

use crate::args::Args;

pub const OBJECT_NAME: &str = "test";
/// Delay before `hello` completes
pub const HELLO_REPLY_DELAY: Duration = Duration::from_millis(1000);
/// `hello` message if the caller sent none
pub const UNKNOWN_MESSAGE: &str = "(unknown)";

pub const EXIT_SUCCESS: u8 = 0;
/// Bus loop ended with an error
pub const EXIT_FAILURE: u8 = 1;
/// Bus is unreachable. Seen as `-1` by a shell
pub const EXIT_CONNECT_FAILURE: u8 = 255;

#[derive(Deserialize, Debug)]
pub struct HelloArgs {
    pub id: Option<i32>,
    pub msg: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct WatchArgs {
    pub id: i32,
}

pub fn hello_policy() -> Policy {
    Policy::new([
        Field::optional("id", FieldType::Int32),
        Field::optional("msg", FieldType::String),
    ])
}

pub fn watch_policy() -> Policy {
    Policy::new([Field::required("id", FieldType::Int32)])
}

/// The `test` object state: the watch subscriber and ids of the objects
/// which went away
#[derive(Clone, Default)]
pub struct TestService {
    subscriber: Subscriber,
    removed: Rc<RefCell<Vec<u32>>>,
}

impl TestService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `test` object
    pub fn object(&self) -> parley_bus_lib::Result<Object> {
        let mut object = Object::new(OBJECT_NAME);

        object.register_method("hello", hello_policy(), Self::hello)?;

        let this = self.clone();
        object.register_method("watch", watch_policy(), move |request, args: WatchArgs| {
            let this = this.clone();
            async move { this.watch(request, args).await }
        })?;

        Ok(object)
    }

    /// Subscriber used by `watch`. Registered by [serve]
    pub fn subscriber(&self) -> &Subscriber {
        &self.subscriber
    }

    /// Ids of the watched objects which went away
    pub fn removed_objects(&self) -> Vec<u32> {
        self.removed.borrow().clone()
    }

    async fn hello(request: Request, args: HelloArgs) -> parley_bus_lib::Result<()> {
        let message = format!(
            "{} received a message: {}",
            request.object_name(),
            args.msg.as_deref().unwrap_or(UNKNOWN_MESSAGE)
        );

        let deferred = request.defer();

        task::spawn_local(async move {
            time::sleep(HELLO_REPLY_DELAY).await;

            if let Err(e) = deferred.reply(doc! { "message": message }) {
                warn!("Failed to send a deferred reply: {e}");
            }
        });

        Ok(())
    }

    async fn watch(&self, request: Request, args: WatchArgs) -> parley_bus_lib::Result<()> {
        let target_id = args.id as u32;

        // Single slot for all subscriptions. Latest watch call sets it
        let removed = self.removed.clone();
        self.subscriber.set_remove_handler(move |object_id| {
            info!("{}", removal_message(object_id));
            removed.borrow_mut().push(object_id);
        });

        let result = request
            .connection()
            .subscribe(&self.subscriber, target_id)
            .await;

        let status = match &result {
            Ok(()) => Status::Ok,
            Err(e) => e.status(),
        };
        info!("Watching object {target_id:#x}: {status}");

        result
    }
}

fn removal_message(object_id: u32) -> String {
    format!("Object {object_id:#010x} went away")
}

/// Register the `test` object and its watch subscriber, then run the bus
/// loop until the bus disconnects or the process is interrupted.
/// Registration failures are logged and don't stop the loop
pub async fn serve<S>(mut context: Context<S>, service: &TestService) -> parley_bus_lib::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let object = service.object()?;

    if let Err(e) = context.add_object(object).await {
        error!("Failed to add object: {}", e.status());
    }

    if let Err(e) = context.register_subscriber(service.subscriber()).await {
        error!("Failed to add watch handler: {}", e.status());
    }

    context.run().await
}

/// Connect to the bus and serve the `test` object until the loop exits.
/// *Returns* the process exit code
pub async fn run(args: Args) -> u8 {
    LocalSet::new()
        .run_until(async move {
            let context = match Context::connect(args.socket.as_deref()).await {
                Ok(context) => context,
                Err(e) => {
                    // Reported regardless of the log filter
                    eprintln!("{e}");
                    return EXIT_CONNECT_FAILURE;
                }
            };

            match serve(context, &TestService::new()).await {
                Ok(()) => EXIT_SUCCESS,
                Err(_) => EXIT_FAILURE,
            }
        })
        .await
}
