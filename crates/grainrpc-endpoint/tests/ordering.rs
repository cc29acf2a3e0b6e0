mod common;

use std::sync::atomic::Ordering;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use common::{
    connected_pair, wait_until, Bounce, Caller, Gauge, Journal, Log, Loop, Meter, Relay,
};
use grainrpc_endpoint::ByRef;

#[test]
fn serialized_calls_run_in_issue_order() {
    let (server, client, _addr) = connected_pair();
    let log = Arc::new(Log::default());
    server
        .create_servant::<dyn Journal>(1, Arc::clone(&log) as Arc<dyn Journal>)
        .expect("servant should register");
    let journal = client
        .create_proxy::<dyn Journal>(1)
        .expect("proxy should register");

    let expected: Vec<u64> = (0..200).collect();
    let tasks: Vec<_> = expected
        .iter()
        .map(|value| {
            let journal = Arc::clone(&journal);
            let value = *value;
            let handle = thread::spawn(move || journal.append(value));
            thread::sleep(Duration::from_micros(200));
            handle
        })
        .collect();
    for task in tasks {
        task.join()
            .expect("caller should not panic")
            .expect("append should succeed");
    }

    assert_eq!(log.max_active.load(Ordering::SeqCst), 1);
    let entries = journal.entries().expect("entries should be readable");
    assert_eq!(entries.len(), expected.len());
}

#[test]
fn calls_from_one_thread_keep_their_order() {
    let (server, client, _addr) = connected_pair();
    let log = Arc::new(Log::default());
    server
        .create_servant::<dyn Journal>(1, Arc::clone(&log) as Arc<dyn Journal>)
        .expect("servant should register");
    let journal = client
        .create_proxy::<dyn Journal>(1)
        .expect("proxy should register");

    for value in 0..100 {
        journal.append(value).expect("append should succeed");
    }
    let entries = journal.entries().expect("entries should be readable");
    assert_eq!(entries, (0..100).collect::<Vec<_>>());
    assert_eq!(log.max_active.load(Ordering::SeqCst), 1);
}

#[test]
fn one_way_calls_return_immediately_and_still_arrive() {
    let (server, client, _addr) = connected_pair();
    let log = Arc::new(Log::default());
    server
        .create_servant::<dyn Journal>(1, Arc::clone(&log) as Arc<dyn Journal>)
        .expect("servant should register");
    let journal = client
        .create_proxy::<dyn Journal>(1)
        .expect("proxy should register");

    for value in 0..10 {
        journal.note(value).expect("one-way calls report success");
    }
    assert_eq!(client.num_pending_method_calls(), 0);
    assert!(wait_until(Duration::from_secs(5), || {
        journal.entries().map(|entries| entries.len()).unwrap_or(0) == 10
    }));
}

#[test]
fn serialized_method_can_call_back_into_its_own_key() {
    let (server, client, _addr) = connected_pair();
    server
        .create_servant::<dyn Relay>(1, Arc::new(Loop))
        .expect("servant should register");
    let relay = client
        .create_proxy::<dyn Relay>(1)
        .expect("proxy should register");
    let caller: Arc<dyn Caller> = Arc::new(Bounce(Arc::clone(&relay)));

    let (done, result) = mpsc::channel();
    thread::spawn(move || {
        let _ = done.send(relay.outer(ByRef::new(caller)));
    });
    let answer = result
        .recv_timeout(Duration::from_secs(10))
        .expect("the nested call should not deadlock");
    assert_eq!(answer.expect("outer should succeed"), 42);
}

fn hammer(threads: usize, calls: usize, call: impl Fn(usize) + Send + Sync + 'static) {
    let call = Arc::new(call);
    let handles: Vec<_> = (0..threads)
        .map(|index| {
            let call = Arc::clone(&call);
            thread::spawn(move || {
                for _ in 0..calls {
                    call(index);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("caller should not panic");
    }
}

#[test]
fn per_type_calls_never_overlap_across_grains() {
    let (server, client, _addr) = connected_pair();
    let meter = Meter::default();
    let gauges: Vec<_> = (1..=4)
        .map(|grain_id| {
            server
                .create_servant::<dyn Gauge>(grain_id, Arc::new(meter.clone()))
                .expect("servant should register");
            client
                .create_proxy::<dyn Gauge>(grain_id)
                .expect("proxy should register")
        })
        .collect();

    hammer(4, 40, move |index| {
        gauges[index].per_type().expect("per_type should succeed");
    });
    assert_eq!(meter.max_active.load(Ordering::SeqCst), 1);
}

#[test]
fn per_method_calls_never_overlap() {
    let (server, client, _addr) = connected_pair();
    let meter = Meter::default();
    server
        .create_servant::<dyn Gauge>(1, Arc::new(meter.clone()))
        .expect("servant should register");
    let gauge = client
        .create_proxy::<dyn Gauge>(1)
        .expect("proxy should register");

    hammer(4, 40, move |_| {
        gauge.per_method().expect("per_method should succeed");
    });
    assert_eq!(meter.max_active.load(Ordering::SeqCst), 1);
}
