use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use shadow_env::{EnvConfig, EnvError, RemoteEnv, ShadowEnv, WorkerEnd, link_pair};
use shadow_kernel::{Registry, ScriptCatalog, Teardown};
use shadow_protocol::{ChangeTrail, ChangeTrailEntry, PropValue, Uuid, ViewMessage, WireMessage};
use shadow_view::ComponentContext;
use tokio::sync::mpsc;

fn create_trail(uuid: Uuid) -> ChangeTrail {
    vec![ChangeTrailEntry::CreateEntity {
        uuid,
        token: "thing".into(),
        parent: None,
        order: 0,
    }]
    .into()
}

fn set_trail(uuid: Uuid) -> ChangeTrail {
    vec![ChangeTrailEntry::SetProperty {
        uuid,
        name: "n".into(),
        value: PropValue::from(1),
    }]
    .into()
}

/// Worker stand-in that says `ready`, reports the `confirm` flag of every
/// trail it sees, and acks confirmed trails only when `ack` is set.
fn fake_worker(end: WorkerEnd, ack: bool) -> mpsc::UnboundedReceiver<bool> {
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let WorkerEnd {
            to_view,
            mut from_view,
        } = end;
        to_view.send(WireMessage::Ready.encode().unwrap()).unwrap();
        while let Some(frame) = from_view.recv().await {
            if let Ok(WireMessage::ChangeTrail { id, confirm, .. }) = WireMessage::decode(frame) {
                let _ = seen_tx.send(confirm);
                if confirm && ack {
                    let _ = to_view.send(WireMessage::ChangeTrailAck { id }.encode().unwrap());
                }
            }
        }
    });
    seen_rx
}

#[tokio::test(start_paused = true)]
async fn confirmed_apply_without_ack_times_out_and_forgets_the_wait() {
    let (link, end) = link_pair();
    let _seen = fake_worker(end, false);
    let config = EnvConfig::default().with_ack_timeout(Duration::from_millis(200));
    let mut env = RemoteEnv::with_link(config, link);
    env.start().await.unwrap();

    let err = env
        .apply_change_trail(set_trail(Uuid::new_v4()), true)
        .await
        .unwrap_err();

    match err {
        EnvError::Timeout { operation, after } => {
            assert_eq!(operation, "apply_change_trail");
            assert_eq!(after, Duration::from_millis(200));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(env.pending_waits(), 0);
    env.destroy().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn import_without_ack_times_out_and_forgets_the_wait() {
    let (link, end) = link_pair();
    let _seen = fake_worker(end, true);
    let config = EnvConfig {
        import_timeout: Duration::from_millis(300),
        ..EnvConfig::default()
    };
    let mut env = RemoteEnv::with_link(config, link);
    env.start().await.unwrap();

    match env.import_script("scripts/never-acked.js").await {
        Err(EnvError::Timeout { operation, after }) => {
            assert_eq!(operation, "import_script");
            assert_eq!(after, Duration::from_millis(300));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(env.pending_waits(), 0);
}

#[tokio::test]
async fn worker_dropping_the_link_fails_waits_as_closed() {
    let (link, end) = link_pair();
    tokio::spawn(async move {
        let WorkerEnd {
            to_view,
            mut from_view,
        } = end;
        to_view.send(WireMessage::Ready.encode().unwrap()).unwrap();
        let _ = from_view.recv().await;
        drop(from_view);
        drop(to_view);
    });
    let config = EnvConfig::default().with_ack_timeout(Duration::from_secs(60));
    let mut env = RemoteEnv::with_link(config, link);
    env.start().await.unwrap();

    let started = std::time::Instant::now();
    let err = env
        .apply_change_trail(set_trail(Uuid::new_v4()), true)
        .await
        .unwrap_err();
    assert!(matches!(err, EnvError::ChannelClosed), "unexpected {err:?}");
    assert!(started.elapsed() < Duration::from_secs(30));
    assert_eq!(env.pending_waits(), 0);

    assert!(matches!(
        env.apply_change_trail(set_trail(Uuid::new_v4()), false).await,
        Err(EnvError::ChannelClosed)
    ));
    assert!(matches!(
        env.import_script("scripts/meter.js").await,
        Err(EnvError::ChannelClosed)
    ));
    env.destroy().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn start_times_out_when_worker_stays_silent() {
    let (link, _end) = link_pair();
    let config = EnvConfig {
        ready_timeout: Duration::from_millis(50),
        ..EnvConfig::default()
    };
    let mut env = RemoteEnv::with_link(config, link);

    assert!(matches!(
        env.start().await,
        Err(EnvError::Timeout {
            operation: "start",
            ..
        })
    ));
    assert!(matches!(
        env.apply_change_trail(set_trail(Uuid::new_v4()), false).await,
        Err(EnvError::Destroyed)
    ));
}

#[tokio::test(start_paused = true)]
async fn structural_trails_wait_for_an_ack() {
    let (link, end) = link_pair();
    let mut seen = fake_worker(end, true);
    let mut env = RemoteEnv::with_link(EnvConfig::default(), link);
    assert!(matches!(
        env.apply_change_trail(set_trail(Uuid::new_v4()), false).await,
        Err(EnvError::NotStarted)
    ));
    env.start().await.unwrap();
    let uuid = Uuid::new_v4();

    env.apply_change_trail(create_trail(uuid), false).await.unwrap();
    assert_eq!(seen.recv().await, Some(true));

    env.apply_change_trail(set_trail(uuid), false).await.unwrap();
    assert_eq!(seen.recv().await, Some(false));
    assert_eq!(env.pending_waits(), 0);
}

#[tokio::test(start_paused = true)]
async fn structural_upgrade_can_be_disabled() {
    let (link, end) = link_pair();
    let mut seen = fake_worker(end, false);
    let config = EnvConfig::default().with_confirm_structural_changes(false);
    let mut env = RemoteEnv::with_link(config, link);
    env.start().await.unwrap();

    env.apply_change_trail(create_trail(Uuid::new_v4()), false)
        .await
        .unwrap();
    assert_eq!(seen.recv().await, Some(false));
}

#[tokio::test]
async fn round_trip_through_a_worker_thread() {
    let teardowns = Arc::new(AtomicUsize::new(0));
    let mut catalog = ScriptCatalog::new();
    {
        let teardowns = teardowns.clone();
        catalog.register("scripts/meter.js", move |registry: &mut Registry| {
            let teardowns = teardowns.clone();
            registry.define("meter", move |cx| {
                let level = cx.use_property("level");
                let dispatcher = cx.dispatcher();
                cx.create_effect(move || {
                    if let Some(PropValue::Json(level)) = level.get() {
                        dispatcher.dispatch("levelChanged", json!({ "level": level }));
                    }
                    Ok(())
                });
                let teardowns = teardowns.clone();
                let teardown: Teardown = Box::new(move || {
                    teardowns.fetch_add(1, Ordering::SeqCst);
                });
                Ok(Some(teardown))
            });
            Ok(())
        });
    }
    let mut env = RemoteEnv::new(EnvConfig::default(), catalog)
        .with_setup(|registry| {
            registry.append_route("dashboard", ["meter"]);
            Ok(())
        });
    let (tx, mut rx) = mpsc::unbounded_channel::<ViewMessage>();
    env.on_message_to_view(Box::new(move |message| {
        let _ = tx.send(message);
    }));

    env.start().await.unwrap();
    env.import_script("scripts/meter.js").await.unwrap();
    match env.import_script("scripts/missing.js").await {
        Err(EnvError::ScriptImport { url, .. }) => assert_eq!(url, "scripts/missing.js"),
        other => panic!("unexpected {other:?}"),
    }

    let mut view = ComponentContext::new();
    let dashboard = view.create_component("dashboard", None).unwrap();
    view.set_property(dashboard, "level", 7).unwrap();
    env.apply_change_trail(view.flush(), true).await.unwrap();

    let message = rx.recv().await.unwrap();
    assert_eq!(message.uuid, dashboard);
    assert_eq!(message.message_type, "levelChanged");
    assert_eq!(message.data, PropValue::Json(json!({ "level": 7 })));

    view.set_property(dashboard, "pixels", vec![1u8, 2, 3]).unwrap();
    env.apply_change_trail(view.flush(), true).await.unwrap();

    env.destroy().await.unwrap();
    assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    assert!(matches!(
        env.apply_change_trail(ChangeTrail::new(), false).await,
        Err(EnvError::Destroyed)
    ));
    env.destroy().await.unwrap();
}
