#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use grainrpc_endpoint::{
    remote_interface, ByRef, CallResult, Endpoint, EndpointAddr, EndpointSettings, LatencySettings,
    RpcError, Task,
};
use serde::{Deserialize, Serialize};

remote_interface! {
    /// Plain arithmetic used by most tests.
    pub trait Calculator as "tests.Calculator" {
        fn add(&self, a: i64, b: i64) -> CallResult<i64>;
        fn divide(&self, a: i64, b: i64) -> CallResult<i64>;
        fn slow_echo(&self, value: String, delay_ms: u64) -> CallResult<String>;
        fn deferred(&self, value: i64) -> Task<i64>;
        fn unstarted(&self) -> Task<i64>;
    }
}

remote_interface! {
    pub trait Other as "tests.Other" {
        fn name(&self) -> CallResult<String>;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("cannot divide {dividend} by zero")]
pub struct DivideByZero {
    pub dividend: i64,
}

pub struct Calc;

impl Calculator for Calc {
    fn add(&self, a: i64, b: i64) -> CallResult<i64> {
        Ok(a + b)
    }

    fn divide(&self, a: i64, b: i64) -> CallResult<i64> {
        if b == 0 {
            return Err(RpcError::typed(&DivideByZero { dividend: a }));
        }
        Ok(a / b)
    }

    fn slow_echo(&self, value: String, delay_ms: u64) -> CallResult<String> {
        thread::sleep(Duration::from_millis(delay_ms));
        Ok(value)
    }

    fn deferred(&self, value: i64) -> Task<i64> {
        Task::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            Ok(value * 2)
        })
    }

    fn unstarted(&self) -> Task<i64> {
        Task::new(|| Ok(1))
    }
}

remote_interface! {
    /// Records the order in which calls arrive.
    pub trait Journal as "tests.Journal" {
        #[dispatch(SerializePerObject)]
        fn append(&self, value: u64) -> CallResult<()>;
        fn entries(&self) -> CallResult<Vec<u64>>;
        #[dispatch(Async)]
        fn note(&self, value: u64) -> CallResult<()>;
    }
}

#[derive(Default)]
pub struct Log {
    entries: Mutex<Vec<u64>>,
    active: AtomicU64,
    pub max_active: AtomicU64,
}

impl Journal for Log {
    fn append(&self, value: u64) -> CallResult<()> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(1));
        self.entries.lock().unwrap().push(value);
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn entries(&self) -> CallResult<Vec<u64>> {
        Ok(self.entries.lock().unwrap().clone())
    }

    fn note(&self, value: u64) -> CallResult<()> {
        self.entries.lock().unwrap().push(value);
        Ok(())
    }
}

remote_interface! {
    /// Hands out and takes back objects by reference.
    pub trait Directory as "tests.Directory" {
        fn create(&self, name: String) -> CallResult<ByRef<dyn Other>>;
        fn is_same(&self, first: ByRef<dyn Other>, second: ByRef<dyn Other>) -> CallResult<bool>;
        fn remember(&self, item: ByRef<dyn Other>) -> CallResult<()>;
        fn recall(&self) -> CallResult<Option<ByRef<dyn Other>>>;
        fn forget(&self) -> CallResult<()>;
        /// Calls back into `item` without keeping it.
        fn describe(&self, item: ByRef<dyn Other>) -> CallResult<String>;
    }
}

pub struct Named(pub String);

impl Other for Named {
    fn name(&self) -> CallResult<String> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
pub struct Shelf {
    remembered: Mutex<Option<ByRef<dyn Other>>>,
}

impl Directory for Shelf {
    fn create(&self, name: String) -> CallResult<ByRef<dyn Other>> {
        Ok(ByRef::new(Arc::new(Named(name)) as Arc<dyn Other>))
    }

    fn is_same(&self, first: ByRef<dyn Other>, second: ByRef<dyn Other>) -> CallResult<bool> {
        Ok(first.ptr_eq(&second))
    }

    fn remember(&self, item: ByRef<dyn Other>) -> CallResult<()> {
        *self.remembered.lock().unwrap() = Some(item);
        Ok(())
    }

    fn recall(&self) -> CallResult<Option<ByRef<dyn Other>>> {
        Ok(self.remembered.lock().unwrap().clone())
    }

    fn forget(&self) -> CallResult<()> {
        self.remembered.lock().unwrap().take();
        Ok(())
    }

    fn describe(&self, item: ByRef<dyn Other>) -> CallResult<String> {
        item.name()
    }
}

remote_interface! {
    /// Counts how many calls overlap.
    pub trait Gauge as "tests.Gauge" {
        #[dispatch(SerializePerType)]
        fn per_type(&self) -> CallResult<()>;
        #[dispatch(SerializePerMethod)]
        fn per_method(&self) -> CallResult<()>;
    }
}

/// Several meters can share one pair of counters.
#[derive(Clone, Default)]
pub struct Meter {
    active: Arc<AtomicU64>,
    pub max_active: Arc<AtomicU64>,
}

impl Meter {
    fn measure(&self) -> CallResult<()> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(1));
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Gauge for Meter {
    fn per_type(&self) -> CallResult<()> {
        self.measure()
    }

    fn per_method(&self) -> CallResult<()> {
        self.measure()
    }
}

remote_interface! {
    /// A serialized method that calls back into its own key.
    pub trait Relay as "tests.Relay" {
        #[dispatch(SerializePerObject)]
        fn outer(&self, caller: ByRef<dyn Caller>) -> CallResult<i64>;
        #[dispatch(SerializePerObject)]
        fn inner(&self) -> CallResult<i64>;
    }
}

remote_interface! {
    pub trait Caller as "tests.Caller" {
        fn call_back(&self) -> CallResult<i64>;
    }
}

pub struct Loop;

impl Relay for Loop {
    fn outer(&self, caller: ByRef<dyn Caller>) -> CallResult<i64> {
        caller.call_back()
    }

    fn inner(&self) -> CallResult<i64> {
        Ok(42)
    }
}

/// Lives on the calling side and reenters the relay.
pub struct Bounce(pub Arc<dyn Relay>);

impl Caller for Bounce {
    fn call_back(&self) -> CallResult<i64> {
        self.0.inner()
    }
}

/// Settings that keep tests fast and quiet.
pub fn fast_settings() -> EndpointSettings {
    EndpointSettings::default()
        .with_handshake_timeout(Duration::from_secs(5))
        .with_gc_interval(Duration::from_millis(20))
        .with_latency(LatencySettings::default().with_measurements(false))
}

pub fn endpoint(name: &str) -> Endpoint {
    Endpoint::builder(name)
        .with_settings(fast_settings())
        .build()
        .expect("endpoint should build")
}

pub fn listen(server: &Endpoint) -> EndpointAddr {
    server
        .bind(&EndpointAddr::loopback(0))
        .expect("server should bind")
}

/// A bound server and a client connected to it.
pub fn connected_pair() -> (Endpoint, Endpoint, EndpointAddr) {
    let server = endpoint("server");
    let addr = listen(&server);
    let client = endpoint("client");
    client.connect(&addr).expect("client should connect");
    assert!(
        wait_until(Duration::from_secs(5), || server.is_connected()),
        "server should see the connection"
    );
    (server, client, addr)
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}
