mod common;

use std::sync::Arc;
use std::time::Duration;

use rstest::{fixture, rstest};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use common::TTL;
use ride_dispatch::cache::models::{AvailabilityStatus, GeoPoint};
use ride_dispatch::cache::operations::BusMessage;
use ride_dispatch::cache::{EntityKey, MemoryPresenceStore, MessageBus, PresenceStore, VehicleClass};
use ride_dispatch::socket::{
    Ack, ConnectionRegistry, Delivery, Flow, InboundFrame, LocationUpdate, Relay, ServerEvent,
    Session, SessionState,
};

struct World {
    presence: Arc<MemoryPresenceStore>,
    connections: Arc<ConnectionRegistry>,
}

impl World {
    fn connect(&self, conn_id: &str) -> (Session, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.add(conn_id, tx);
        let session = Session::new(conn_id, self.presence.clone(), self.connections.clone());
        (session, rx)
    }

    async fn nearby_cars(&self) -> Vec<String> {
        self.presence
            .nearby(VehicleClass::Car, GeoPoint::new(1.0, 1.0), 1.0, &[])
            .await
            .expect("nearby")
            .into_iter()
            .map(|n| n.id)
            .collect()
    }
}

#[fixture]
fn world() -> World {
    World {
        presence: Arc::new(MemoryPresenceStore::new(TTL)),
        connections: Arc::new(ConnectionRegistry::new()),
    }
}

fn frame(event: &str, data: Value, id: Option<i64>) -> InboundFrame {
    InboundFrame {
        event: event.to_string(),
        data,
        id: id.map(Value::from),
    }
}

fn received(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn ack_of(events: &[ServerEvent]) -> Option<&Ack> {
    events.iter().find_map(|e| match e {
        ServerEvent::Ack(ack) => Some(ack),
        _ => None,
    })
}

async fn register_driver(session: &mut Session, id: &str) {
    let flow = session
        .handle(frame(
            "register",
            json!({
                "role": "driver",
                "id": id,
                "lat": 1.0,
                "lng": 1.0,
                "vehicle_type": "car",
                "availabilityStatus": "available"
            }),
            None,
        ))
        .await;
    assert_eq!(flow, Flow::Continue);
}

async fn register_rider(session: &mut Session, id: &str) {
    let flow = session
        .handle(frame("register", json!({ "role": "rider", "id": id }), None))
        .await;
    assert_eq!(flow, Flow::Continue);
}

#[rstest]
#[tokio::test]
async fn driver_registration_writes_presence_and_index(world: World) {
    let (mut session, mut rx) = world.connect("conn-d1");
    let flow = session
        .handle(frame(
            "register",
            json!({
                "role": "driver",
                "id": "d1",
                "lat": 1.0,
                "lng": 1.0,
                "vehicle_type": "car",
                "availabilityStatus": "available"
            }),
            Some(1),
        ))
        .await;

    assert_eq!(flow, Flow::Continue);
    assert_eq!(session.state(), &SessionState::Registered(EntityKey::driver("d1")));
    assert_eq!(ack_of(&received(&mut rx)), Some(&Ack::ok(json!(1))));

    let record = world
        .presence
        .get(&EntityKey::driver("d1"))
        .await
        .expect("get")
        .expect("record");
    assert_eq!(record.socket_id.as_deref(), Some("conn-d1"));
    assert_eq!(record.vehicle_class, Some(VehicleClass::Car));
    assert_eq!(world.nearby_cars().await, vec!["d1"]);
}

#[rstest]
#[tokio::test]
async fn busy_driver_leaves_index_but_keeps_last_location(world: World) {
    let (mut session, _rx) = world.connect("conn-d1");
    register_driver(&mut session, "d1").await;
    assert_eq!(world.nearby_cars().await, vec!["d1"]);

    session
        .handle(frame(
            "updateLocation",
            json!({ "lat": 1.0, "lng": 1.0, "availabilityStatus": "busy" }),
            None,
        ))
        .await;

    assert!(world.nearby_cars().await.is_empty());
    let record = world
        .presence
        .get(&EntityKey::driver("d1"))
        .await
        .expect("get")
        .expect("record");
    assert_eq!(record.location, Some(GeoPoint::new(1.0, 1.0)));
    assert_eq!(record.availability, Some(AvailabilityStatus::Busy));
}

#[rstest]
#[tokio::test]
async fn disconnect_removes_driver_from_every_index(world: World) {
    let (mut session, _rx) = world.connect("conn-d1");
    register_driver(&mut session, "d1").await;
    session
        .handle(frame(
            "updateLocation",
            json!({ "lat": 1.0, "lng": 1.0, "vehicleClass": "motorcycle" }),
            None,
        ))
        .await;
    assert!(world
        .presence
        .is_indexed(VehicleClass::Motorcycle, "d1")
        .await
        .expect("indexed"));

    session.close().await;

    assert_eq!(session.state(), &SessionState::Closed);
    assert!(world.presence.get(&EntityKey::driver("d1")).await.expect("get").is_none());
    for class in VehicleClass::ALL {
        assert!(!world.presence.is_indexed(class, "d1").await.expect("indexed"));
    }
    assert!(!world.connections.is_live("conn-d1"));
    assert_eq!(session.handle(frame("register", json!({}), None)).await, Flow::Disconnect);
}

#[rstest]
#[tokio::test]
async fn late_close_of_old_connection_keeps_reconnected_driver(world: World) {
    let (mut old, _old_rx) = world.connect("conn-old");
    register_driver(&mut old, "d1").await;
    let (mut new, _new_rx) = world.connect("conn-new");
    register_driver(&mut new, "d1").await;

    old.close().await;

    let record = world
        .presence
        .get(&EntityKey::driver("d1"))
        .await
        .expect("get")
        .expect("record kept");
    assert_eq!(record.socket_id.as_deref(), Some("conn-new"));
    assert_eq!(world.nearby_cars().await, vec!["d1"]);
    assert!(world.connections.is_live("conn-new"));
    assert!(!world.connections.is_live("conn-old"));

    new.close().await;
    assert!(world.presence.get(&EntityKey::driver("d1")).await.expect("get").is_none());
    assert!(world.nearby_cars().await.is_empty());
}

#[rstest]
#[case(json!({ "id": "d1" }))]
#[case(json!({ "role": "driver" }))]
#[case(json!({ "role": "admin", "id": "x" }))]
#[case(json!({ "role": "driver", "id": "a:b" }))]
#[case(json!("not an object"))]
#[tokio::test]
async fn malformed_identity_disconnects(world: World, #[case] data: Value) {
    let (mut session, mut rx) = world.connect("conn-x");
    let flow = session.handle(frame("register", data, Some(9))).await;

    assert_eq!(flow, Flow::Disconnect);
    assert_eq!(session.state(), &SessionState::Unregistered);
    let events = received(&mut rx);
    let ack = ack_of(&events).expect("ack");
    assert!(!ack.success);
    assert!(ack.error.is_some());
}

#[rstest]
#[tokio::test]
async fn unknown_event_keeps_connection_open(world: World) {
    let (mut session, mut rx) = world.connect("conn-d1");
    register_driver(&mut session, "d1").await;
    received(&mut rx);

    let flow = session
        .handle(frame("subscribeToDriver", json!({ "driverId": "d2" }), Some(3)))
        .await;

    assert_eq!(flow, Flow::Continue);
    let events = received(&mut rx);
    assert_eq!(
        events,
        vec![
            ServerEvent::notice("Unknown event: 'subscribeToDriver'"),
            ServerEvent::Ack(Ack::err(json!(3), "Event 'subscribeToDriver' is not supported.")),
        ]
    );

    // 没有 id 时只回提示
    session.handle(frame("acceptRide", json!({}), None)).await;
    assert_eq!(received(&mut rx), vec![ServerEvent::notice("Unknown event: 'acceptRide'")]);
}

#[rstest]
#[tokio::test]
async fn events_before_register_and_double_register_are_rejected(world: World) {
    let (mut session, mut rx) = world.connect("conn-r1");

    let flow = session
        .handle(frame("subscribeToDriver", json!({ "driverId": "d1" }), Some(1)))
        .await;
    assert_eq!(flow, Flow::Continue);
    let events = received(&mut rx);
    assert!(matches!(events.first(), Some(ServerEvent::Message(_))));
    assert!(!ack_of(&events).expect("ack").success);

    register_rider(&mut session, "r1").await;
    received(&mut rx);
    session
        .handle(frame("register", json!({ "role": "rider", "id": "r2" }), Some(2)))
        .await;
    assert_eq!(
        ack_of(&received(&mut rx)),
        Some(&Ack::err(json!(2), "Connection is already registered."))
    );
    assert_eq!(session.identity(), Some(&EntityKey::rider("r1")));
}

#[rstest]
#[case(json!({ "lng": 1.0 }))]
#[case(json!({ "lat": "1.0", "lng": 1.0 }))]
#[case(json!({ "lat": 91.0, "lng": 1.0 }))]
#[tokio::test]
async fn driver_location_requires_numeric_coordinates(world: World, #[case] data: Value) {
    let (mut session, mut rx) = world.connect("conn-d1");
    register_driver(&mut session, "d1").await;
    received(&mut rx);

    let flow = session.handle(frame("updateLocation", data, Some(5))).await;

    assert_eq!(flow, Flow::Continue);
    let events = received(&mut rx);
    let ack = ack_of(&events).expect("ack");
    assert_eq!(ack.id, json!(5));
    assert!(!ack.success);
}

#[rstest]
#[tokio::test]
async fn rider_location_is_stored_but_never_indexed(world: World) {
    let (mut session, mut rx) = world.connect("conn-r1");
    register_rider(&mut session, "r1").await;
    session
        .handle(frame("updateLocation", json!({ "lat": 1.0, "lng": 1.0 }), Some(4)))
        .await;

    assert_eq!(ack_of(&received(&mut rx)), Some(&Ack::ok(json!(4))));
    let record = world
        .presence
        .get(&EntityKey::rider("r1"))
        .await
        .expect("get")
        .expect("record");
    assert_eq!(record.location, Some(GeoPoint::new(1.0, 1.0)));
    assert!(world.nearby_cars().await.is_empty());
}

#[rstest]
#[tokio::test]
async fn subscribed_rider_gets_snapshot_then_live_updates(world: World) {
    let (mut driver, _driver_rx) = world.connect("conn-d1");
    register_driver(&mut driver, "d1").await;
    let (mut rider, mut rider_rx) = world.connect("conn-r1");
    register_rider(&mut rider, "r1").await;
    received(&mut rider_rx);

    rider
        .handle(frame("subscribeToDriver", json!({ "driverId": "d1" }), Some(1)))
        .await;
    let events = received(&mut rider_rx);
    assert_eq!(
        events,
        vec![
            ServerEvent::LocationUpdate(LocationUpdate {
                driver_id: "d1".into(),
                latitude: 1.0,
                longitude: 1.0,
                heading: None,
                speed: None,
            }),
            ServerEvent::Ack(Ack::ok(json!(1))),
        ]
    );

    driver
        .handle(frame(
            "updateLocation",
            json!({ "lat": 1.001, "lng": 1.0, "heading_deg": 180.0, "speed_kph": 30.0 }),
            None,
        ))
        .await;
    assert_eq!(
        received(&mut rider_rx),
        vec![ServerEvent::LocationUpdate(LocationUpdate {
            driver_id: "d1".into(),
            latitude: 1.001,
            longitude: 1.0,
            heading: Some(180.0),
            speed: Some(30.0),
        })]
    );

    rider
        .handle(frame("unsubscribeFromDriver", json!({ "driverId": "d1" }), None))
        .await;
    driver
        .handle(frame("updateLocation", json!({ "lat": 1.002, "lng": 1.0 }), None))
        .await;
    assert!(received(&mut rider_rx).is_empty());
}

#[rstest]
#[tokio::test]
async fn rider_disconnect_leaves_every_group(world: World) {
    let (mut driver, _driver_rx) = world.connect("conn-d1");
    register_driver(&mut driver, "d1").await;
    let (mut rider, _rider_rx) = world.connect("conn-r1");
    register_rider(&mut rider, "r1").await;
    for driver_id in ["d1", "d2"] {
        rider
            .handle(frame("subscribeToDriver", json!({ "driverId": driver_id }), None))
            .await;
    }
    assert_eq!(world.connections.rooms_of("conn-r1").len(), 2);

    rider.close().await;

    assert!(world.connections.rooms_of("conn-r1").is_empty());
    assert!(world.presence.get(&EntityKey::rider("r1")).await.expect("get").is_none());
    assert_eq!(world.connections.broadcast("driver:d1", &ServerEvent::notice("x")), 0);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn heartbeat_keeps_presence_alive(world: World) {
    let (mut session, _rx) = world.connect("conn-d1");
    register_driver(&mut session, "d1").await;

    tokio::time::advance(TTL / 2).await;
    session.heartbeat().await;
    tokio::time::advance(TTL / 2 + Duration::from_secs(1)).await;

    assert!(world.presence.get(&EntityKey::driver("d1")).await.expect("get").is_some());
    assert_eq!(world.nearby_cars().await, vec!["d1"]);

    tokio::time::advance(TTL).await;
    assert!(world.presence.get(&EntityKey::driver("d1")).await.expect("get").is_none());
    assert!(world.nearby_cars().await.is_empty());
}

#[rstest]
#[tokio::test]
async fn relay_delivers_only_to_local_connections(world: World) {
    let (mut session, mut rx) = world.connect("conn-d1");
    register_driver(&mut session, "d1").await;
    received(&mut rx);
    let relay = Relay::new(
        world.presence.clone(),
        world.presence.clone(),
        world.connections.clone(),
    );

    let offer = BusMessage {
        channel: "driver:d1".into(),
        payload: json!({ "type": "NEW_RIDE_REQUEST", "ride_id": "ride-1" }).to_string(),
    };
    assert_eq!(relay.deliver(&offer).await.expect("deliver"), Delivery::Delivered);
    assert_eq!(
        received(&mut rx),
        vec![ServerEvent::Message(json!({ "type": "NEW_RIDE_REQUEST", "ride_id": "ride-1" }))]
    );

    // 记录指向其他进程的连接
    world
        .presence
        .upsert(
            &EntityKey::rider("r1"),
            &ride_dispatch::cache::models::PresenceFields {
                socket_id: Some("conn-elsewhere".into()),
                ..Default::default()
            },
        )
        .await
        .expect("upsert");
    let remote = BusMessage {
        channel: "rider:r1".into(),
        payload: "{}".into(),
    };
    assert_eq!(relay.deliver(&remote).await.expect("deliver"), Delivery::NotLocal);

    let offline = BusMessage {
        channel: "driver:nobody".into(),
        payload: "{}".into(),
    };
    assert_eq!(relay.deliver(&offline).await.expect("deliver"), Delivery::NoConnection);

    let lock = BusMessage {
        channel: "driver:is_reviewing:d1".into(),
        payload: "true".into(),
    };
    assert_eq!(relay.deliver(&lock).await.expect("deliver"), Delivery::NotAnEntity);
}

#[rstest]
#[tokio::test]
async fn relay_forwards_published_messages(world: World) {
    let (mut session, mut rx) = world.connect("conn-r1");
    register_rider(&mut session, "r1").await;
    received(&mut rx);

    let relay = Relay::new(
        world.presence.clone(),
        world.presence.clone(),
        world.connections.clone(),
    );
    let task = tokio::spawn(async move { relay.run().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    world
        .presence
        .publish("rider:r1", r#"{"type":"RIDE_CANCELLED","ride_id":"ride-1","reason":"x"}"#)
        .await
        .expect("publish");

    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("relayed in time")
        .expect("event");
    assert_eq!(
        event,
        ServerEvent::Message(json!({ "type": "RIDE_CANCELLED", "ride_id": "ride-1", "reason": "x" }))
    );
    task.abort();
}
