use log::LevelFilter;
use tokio::{sync::mpsc, task};

use parley_bus_common::Status;
use parley_bus_lib::{Error, Subscriber};

use fixture::Fixture;

#[tokio::test(flavor = "current_thread")]
async fn test_object_removal() {
    task::LocalSet::new()
        .run_until(async {
            let mut fixture = Fixture::new(LevelFilter::Debug).await;

            let subscriber = Subscriber::new();
            fixture
                .context
                .register_subscriber(&subscriber)
                .await
                .expect("Failed to register subscriber");
            let subscriber_id = subscriber.object_id().expect("No subscriber id");

            let (removed_tx, mut removed) = mpsc::unbounded_channel();
            subscriber.set_remove_handler(move |target_id| {
                let _ = removed_tx.send(target_id);
            });

            let connection = fixture.context.connection().clone();
            let bus = fixture.run();
            bus.add_remote_object(0x1234);
            bus.add_remote_object(0x4321);

            connection
                .subscribe(&subscriber, 0x1234)
                .await
                .expect("Failed to subscribe");
            connection
                .subscribe(&subscriber, 0x4321)
                .await
                .expect("Failed to subscribe");

            assert_eq!(
                bus.subscriptions(),
                vec![(subscriber_id, 0x1234), (subscriber_id, 0x4321)]
            );

            bus.remove_object(0x4321);
            assert_eq!(removed.recv().await, Some(0x4321));

            bus.remove_object(0x1234);
            assert_eq!(removed.recv().await, Some(0x1234));

            assert!(bus.subscriptions().is_empty());
            assert!(removed.try_recv().is_err());
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_last_handler_wins() {
    task::LocalSet::new()
        .run_until(async {
            let mut fixture = Fixture::new(LevelFilter::Debug).await;

            let subscriber = Subscriber::new();
            fixture
                .context
                .register_subscriber(&subscriber)
                .await
                .expect("Failed to register subscriber");

            let (removed_tx, mut removed) = mpsc::unbounded_channel();

            let first_tx = removed_tx.clone();
            subscriber.set_remove_handler(move |target_id| {
                let _ = first_tx.send(("first", target_id));
            });

            let connection = fixture.context.connection().clone();
            let bus = fixture.run();
            bus.add_remote_object(0x10);
            bus.add_remote_object(0x20);

            connection
                .subscribe(&subscriber, 0x10)
                .await
                .expect("Failed to subscribe");

            subscriber.set_remove_handler(move |target_id| {
                let _ = removed_tx.send(("second", target_id));
            });
            connection
                .subscribe(&subscriber, 0x20)
                .await
                .expect("Failed to subscribe");

            bus.remove_object(0x10);
            assert_eq!(removed.recv().await, Some(("second", 0x10)));
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_unknown_target() {
    task::LocalSet::new()
        .run_until(async {
            let mut fixture = Fixture::new(LevelFilter::Debug).await;

            let subscriber = Subscriber::new();
            fixture
                .context
                .register_subscriber(&subscriber)
                .await
                .expect("Failed to register subscriber");

            let connection = fixture.context.connection().clone();
            let bus = fixture.run();

            assert!(matches!(
                connection.subscribe(&subscriber, 0x1234).await,
                Err(Error::Status(Status::NotFound))
            ));
            assert!(bus.subscriptions().is_empty());
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_unregistered_subscriber() {
    task::LocalSet::new()
        .run_until(async {
            let fixture = Fixture::new(LevelFilter::Debug).await;

            let connection = fixture.context.connection().clone();
            let bus = fixture.run();
            bus.add_remote_object(0x1234);

            assert!(matches!(
                connection.subscribe(&Subscriber::new(), 0x1234).await,
                Err(Error::NotRegistered)
            ));
        })
        .await;
}
