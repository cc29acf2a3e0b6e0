//! Two endpoints in one process passing objects by reference.
//!
//! The server hands out counters; the client gives one back and gets the
//! very same proxy again, while its own callback object is called by the
//! server through the connection.
//!
//! Run with:
//!   cargo run -p grainrpc --example shared-objects

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use grainrpc::{remote_interface, ByRef, CallResult, Endpoint, EndpointAddr};

remote_interface! {
    pub trait Counter as "demo.Counter" {
        fn increment(&self) -> CallResult<u64>;
    }
}

remote_interface! {
    pub trait Listener as "demo.Listener" {
        fn notify(&self, message: String) -> CallResult<()>;
    }
}

remote_interface! {
    pub trait Factory as "demo.Factory" {
        fn counter(&self) -> CallResult<ByRef<dyn Counter>>;
        fn same(&self, a: ByRef<dyn Counter>, b: ByRef<dyn Counter>) -> CallResult<bool>;
        fn subscribe(&self, listener: ByRef<dyn Listener>) -> CallResult<()>;
    }
}

#[derive(Default)]
struct Tally(AtomicU64);

impl Counter for Tally {
    fn increment(&self) -> CallResult<u64> {
        Ok(self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[derive(Default)]
struct Workshop {
    listeners: Mutex<Vec<ByRef<dyn Listener>>>,
}

impl Factory for Workshop {
    fn counter(&self) -> CallResult<ByRef<dyn Counter>> {
        let counter: Arc<dyn Counter> = Arc::new(Tally::default());
        for listener in self.listeners.lock().unwrap_or_else(|p| p.into_inner()).iter() {
            listener.notify("counter created".to_string())?;
        }
        Ok(ByRef::new(counter))
    }

    fn same(&self, a: ByRef<dyn Counter>, b: ByRef<dyn Counter>) -> CallResult<bool> {
        Ok(a.ptr_eq(&b))
    }

    fn subscribe(&self, listener: ByRef<dyn Listener>) -> CallResult<()> {
        self.listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(listener);
        Ok(())
    }
}

struct Printer;

impl Listener for Printer {
    fn notify(&self, message: String) -> CallResult<()> {
        println!("client heard: {message}");
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server = Endpoint::new("workshop")?;
    server.create_servant::<dyn Factory>(1, Arc::new(Workshop::default()))?;
    let addr = server.bind(&EndpointAddr::loopback(0))?;

    let client = Endpoint::new("customer")?;
    let id = client.connect(&addr)?;
    println!("connected to {} as connection {id}", addr);

    let factory = client.create_proxy::<dyn Factory>(1)?;
    factory.subscribe(ByRef::new(Arc::new(Printer) as Arc<dyn Listener>))?;

    let counter = factory.counter()?;
    counter.increment()?;
    println!("counter now at {}", counter.increment()?);
    println!(
        "server sees the same object: {}",
        factory.same(counter.clone(), counter.clone())?
    );

    client.disconnect();
    Ok(())
}
