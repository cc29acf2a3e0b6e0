mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    connected_pair, endpoint, fast_settings, listen, wait_until, Directory, Named, Other, Shelf,
};
use grainrpc_endpoint::{ByRef, Endpoint};

fn others(endpoint: &Endpoint) -> usize {
    endpoint
        .servants()
        .iter()
        .filter(|info| info.interface == "tests.Other")
        .count()
}

#[test]
fn remote_objects_keep_their_identity() {
    let (server, client, _addr) = connected_pair();
    server
        .create_servant::<dyn Directory>(1, Arc::new(Shelf::default()))
        .expect("servant should register");
    let directory = client
        .create_proxy::<dyn Directory>(1)
        .expect("proxy should register");

    let first = directory.create("first".to_string()).expect("create should succeed");
    let second = directory.create("second".to_string()).expect("create should succeed");
    assert_eq!(first.name().expect("name should succeed"), "first");

    assert!(directory
        .is_same(first.clone(), first.clone())
        .expect("comparison should succeed"));
    assert!(!directory
        .is_same(first.clone(), second.clone())
        .expect("comparison should succeed"));

    directory.remember(first.clone()).expect("remember should succeed");
    let recalled = directory
        .recall()
        .expect("recall should succeed")
        .expect("an object was remembered");
    assert!(recalled.ptr_eq(&first), "the same grain yields the same proxy");
}

#[test]
fn local_objects_come_back_as_themselves() {
    let (server, client, _addr) = connected_pair();
    server
        .create_servant::<dyn Directory>(1, Arc::new(Shelf::default()))
        .expect("servant should register");
    let directory = client
        .create_proxy::<dyn Directory>(1)
        .expect("proxy should register");

    let local: Arc<dyn Other> = Arc::new(Named("local".to_string()));
    directory
        .remember(ByRef::new(Arc::clone(&local)))
        .expect("remember should succeed");
    assert_eq!(others(&client), 1);

    let recalled = directory
        .recall()
        .expect("recall should succeed")
        .expect("an object was remembered");
    assert!(Arc::ptr_eq(recalled.as_arc(), &local));

    // Sending it again reuses the servant.
    directory
        .remember(ByRef::new(Arc::clone(&local)))
        .expect("remember should succeed");
    assert_eq!(others(&client), 1);
}

#[test]
fn released_proxies_free_the_remote_servant() {
    let (server, client, _addr) = connected_pair();
    server
        .create_servant::<dyn Directory>(1, Arc::new(Shelf::default()))
        .expect("servant should register");
    let directory = client
        .create_proxy::<dyn Directory>(1)
        .expect("proxy should register");

    let local: Arc<dyn Other> = Arc::new(Named("temporary".to_string()));
    directory
        .remember(ByRef::new(Arc::clone(&local)))
        .expect("remember should succeed");
    assert_eq!(others(&client), 1);

    directory.forget().expect("forget should succeed");
    assert!(
        wait_until(Duration::from_secs(5), || others(&client) == 0),
        "the server's garbage collector should release the servant"
    );
    assert!(client.collection_stats().num_servants_collected >= 1);
    assert!(server.collection_stats().num_proxies_collected >= 1);
    assert_eq!(local.name().expect("local calls still work"), "temporary");
}

#[test]
fn dropped_proxies_are_collected() {
    let (_server, client, _addr) = connected_pair();
    let proxy = client
        .create_proxy::<dyn Other>(42)
        .expect("proxy should register");
    assert!(client.proxies().iter().any(|info| info.grain_id == 42));

    drop(proxy);
    client.collect_garbage();
    assert!(!client.proxies().iter().any(|info| info.grain_id == 42));
    assert!(client.statistics().gc_sweeps >= 1);
}

#[test]
fn objects_passed_again_during_release_stay_reachable() {
    let server = Endpoint::builder("server")
        .with_settings(fast_settings().with_gc_interval(Duration::from_millis(1)))
        .build()
        .expect("endpoint should build");
    let addr = listen(&server);
    let client = endpoint("client");
    client.connect(&addr).expect("client should connect");
    assert!(wait_until(Duration::from_secs(5), || server.is_connected()));
    server
        .create_servant::<dyn Directory>(1, Arc::new(Shelf::default()))
        .expect("servant should register");
    let directory = client
        .create_proxy::<dyn Directory>(1)
        .expect("proxy should register");

    // The server drops its proxy after every call, so releases race with
    // the next reference to the same object.
    let local: Arc<dyn Other> = Arc::new(Named("local".to_string()));
    for round in 0..500 {
        let name = directory
            .describe(ByRef::new(Arc::clone(&local)))
            .unwrap_or_else(|err| panic!("round {round}: {err}"));
        assert_eq!(name, "local");
    }
    assert!(
        wait_until(Duration::from_secs(5), || others(&client) == 0),
        "the last release should still free the servant"
    );
}

#[test]
fn implicit_servants_do_not_outlive_the_connection() {
    let (server, client, addr) = connected_pair();
    server
        .create_servant::<dyn Directory>(1, Arc::new(Shelf::default()))
        .expect("servant should register");
    let directory = client
        .create_proxy::<dyn Directory>(1)
        .expect("proxy should register");

    for _ in 0..3 {
        let local: Arc<dyn Other> = Arc::new(Named("pinned".to_string()));
        directory
            .remember(ByRef::new(Arc::clone(&local)))
            .expect("remember should succeed");
        assert_eq!(others(&client), 1);

        client.disconnect();
        assert_eq!(others(&client), 0);
        assert_eq!(Arc::strong_count(&local), 1, "the subject is no longer pinned");

        assert!(wait_until(Duration::from_secs(5), || !server.is_connected()));
        client.connect(&addr).expect("client should reconnect");
        assert!(wait_until(Duration::from_secs(5), || server.is_connected()));
    }
}
