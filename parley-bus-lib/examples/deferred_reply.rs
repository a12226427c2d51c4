use std::time::Duration;

use bson::{doc, Document};
use log::LevelFilter;
use tokio::{task, time};

use parley_bus_common::Policy;
use parley_bus_lib::{Context, Object, Request};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    pretty_env_logger::formatted_builder()
        .filter_level(LevelFilter::Debug)
        .init();

    task::LocalSet::new()
        .run_until(async {
            let mut context = Context::connect(None).await.unwrap();

            let mut object = Object::new("clock");
            object
                .register_method(
                    "later",
                    Policy::default(),
                    |request: Request, _: Document| async move {
                        let deferred = request.defer();

                        task::spawn_local(async move {
                            time::sleep(Duration::from_secs(1)).await;
                            let _ = deferred.reply(doc! { "message": "one second later" });
                        });

                        Ok(())
                    },
                )
                .unwrap();

            context.add_object(object).await.unwrap();
            context.run().await.unwrap();
        })
        .await;
}
