use bacwatch_client::{
    ClientError, CovUpdate, ShutdownToken, SimulatedDevice, SimulatedEngine, SubscriberConfig,
    SubscriptionKey, SubscriptionState, Supervisor,
};
use bacwatch_core::{DataValue, DeviceAddress, ObjectId, ObjectType};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, timeout};

const TARGET_DEVICE: u32 = 2640;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn target() -> ObjectId {
    ObjectId::new(ObjectType::AnalogValue, 40250)
}

fn address() -> DeviceAddress {
    DeviceAddress::Ip("192.168.2.233:47808".parse::<SocketAddr>().unwrap())
}

fn site(configure: impl FnOnce(SimulatedDevice) -> SimulatedDevice) -> Arc<SimulatedEngine> {
    let device = SimulatedDevice::new(TARGET_DEVICE, address())
        .with_point(target(), "Zone temp", DataValue::Real(20.0))
        .with_point(
            ObjectId::new(ObjectType::AnalogInput, 1),
            "Outdoor air",
            DataValue::Real(8.5),
        )
        .with_point(
            ObjectId::new(ObjectType::BinaryValue, 3),
            "Supply fan",
            DataValue::Enumerated(1),
        );
    Arc::new(
        SimulatedEngine::new()
            .with_device(SimulatedDevice::new(
                17,
                "192.168.2.17:47808".parse::<SocketAddr>().unwrap(),
            ))
            .with_device(configure(device)),
    )
}

fn config() -> SubscriberConfig {
    SubscriberConfig {
        discovery_window_secs: 2,
        lookup_timeout_secs: 1,
        enumeration_timeout_secs: 5,
        request_timeout_ms: 500,
        ..SubscriberConfig::default()
    }
}

fn key() -> SubscriptionKey {
    SubscriptionKey::new(1, target())
}

async fn until_active(supervisor: &Supervisor<SimulatedEngine>) {
    timeout(Duration::from_secs(5), async {
        while !supervisor.subscriptions().is_active(key()) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscription never became active");
}

#[tokio::test]
async fn full_run_tracks_notifications_until_shutdown() {
    init_logging();
    let engine = site(|d| d);
    let token = ShutdownToken::new();
    let supervisor = Arc::new(Supervisor::new(engine.clone(), config(), token.clone()));

    let run = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.run().await }
    });
    until_active(&supervisor).await;

    let repository = supervisor.repository();
    assert_eq!(repository.len(), 4);
    assert!(engine.set_present_value(TARGET_DEVICE, target(), DataValue::Real(21.5)));
    assert_eq!(
        repository.get(target()).unwrap().present_value(),
        Some(&DataValue::Real(21.5))
    );

    assert!(token.trigger());
    let summary = timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(summary.device.unwrap().address, address());
    assert_eq!(summary.objects, 4);
    assert_eq!(summary.enumeration.unwrap().listed, 4);
    assert!(summary.dispatch.applied >= 1);
    assert_eq!(summary.subscriptions.len(), 1);
    assert_eq!(summary.subscriptions[0].state, SubscriptionState::Unsubscribed);
    assert!(summary.subscriptions[0].notifications >= 1);

    assert_eq!(engine.start_count(), 1);
    assert_eq!(engine.stop_count(), 1);
    assert_eq!(engine.handler_count(), 0);
    assert!(engine.remote_subscriptions(TARGET_DEVICE).is_empty());
    assert_eq!(engine.local_config().unwrap().device_instance, 1235);
}

#[tokio::test]
async fn shutdown_twice_tears_down_once() {
    init_logging();
    let engine = site(|d| d);
    let token = ShutdownToken::new();
    let supervisor = Arc::new(Supervisor::new(engine.clone(), config(), token.clone()));

    let run = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.run().await }
    });
    until_active(&supervisor).await;

    tokio::join!(supervisor.shutdown(), supervisor.shutdown());
    supervisor.shutdown().await;
    assert!(token.is_triggered());
    run.await.unwrap().unwrap();

    let cancels = engine
        .subscribe_requests()
        .iter()
        .filter(|r| r.is_cancel())
        .count();
    assert_eq!(cancels, 1);
    assert_eq!(engine.stop_count(), 1);
    assert_eq!(supervisor.subscriptions().state(key()), SubscriptionState::Unsubscribed);
}

#[tokio::test(start_paused = true)]
async fn missing_device_is_reported_after_teardown() {
    init_logging();
    let engine = Arc::new(SimulatedEngine::new());
    let token = ShutdownToken::new();
    let supervisor = Supervisor::new(engine.clone(), config(), token.clone());

    let err = supervisor.run().await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::NotFound {
            device_instance: TARGET_DEVICE
        }
    ));
    assert!(token.is_triggered());
    assert_eq!(engine.stop_count(), 1);
    assert_eq!(engine.handler_count(), 0);
}

#[tokio::test]
async fn refused_subscription_aborts_startup() {
    init_logging();
    let engine = site(SimulatedDevice::rejecting_subscriptions);
    let supervisor = Supervisor::new(engine.clone(), config(), ShutdownToken::new());

    let err = supervisor.run().await.unwrap_err();
    assert!(err.is_rejection());
    // The repository was populated before the refusal.
    assert_eq!(supervisor.repository().len(), 4);
    assert_eq!(supervisor.subscriptions().state(key()), SubscriptionState::Unsubscribed);
    assert_eq!(engine.stop_count(), 1);
    assert_eq!(engine.handler_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_discovery_abandons_startup() {
    init_logging();
    let engine = Arc::new(SimulatedEngine::new());
    let token = ShutdownToken::new();
    let supervisor = Supervisor::new(engine.clone(), config(), token.clone());

    let trigger = tokio::spawn(async move {
        sleep(Duration::from_millis(500)).await;
        token.trigger();
    });
    let summary = supervisor.run().await.unwrap();
    trigger.await.unwrap();

    assert_eq!(summary.device, None);
    assert!(summary.uptime < Duration::from_secs(2));
    assert_eq!(engine.stop_count(), 1);
    assert_eq!(engine.handler_count(), 0);
}

#[tokio::test]
async fn invalid_config_is_rejected_before_the_engine_starts() {
    let engine = site(|d| d);
    let config = SubscriberConfig {
        targets: Vec::new(),
        ..config()
    };
    let supervisor = Supervisor::new(engine.clone(), config, ShutdownToken::new());
    let err = supervisor.run().await.unwrap_err();
    assert!(matches!(err, ClientError::Config(_)));
    assert_eq!(engine.start_count(), 0);
}

#[tokio::test]
async fn hook_sees_updates_and_is_drained_on_shutdown() {
    init_logging();
    let engine = site(|d| d);
    let token = ShutdownToken::new();
    let seen: Arc<Mutex<Vec<CovUpdate>>> = Arc::default();
    let sink = seen.clone();
    let supervisor = Arc::new(
        Supervisor::new(engine.clone(), config(), token.clone())
            .with_hook(move |update| sink.lock().unwrap().push(update))
            .unwrap(),
    );

    let run = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.run().await }
    });
    until_active(&supervisor).await;
    engine.set_present_value(TARGET_DEVICE, target(), DataValue::Real(23.0));

    token.trigger();
    run.await.unwrap().unwrap();

    let seen = seen.lock().unwrap();
    let update = seen
        .iter()
        .find(|u| u.present_value == Some(DataValue::Real(23.0)))
        .expect("hook missed the update");
    assert_eq!(update.object_id, target());
    assert_eq!(update.device_id, ObjectId::device(TARGET_DEVICE));
}
