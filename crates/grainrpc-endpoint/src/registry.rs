//! Servant and proxy tables of one endpoint.
//!
//! Servants are owned by the registry. Proxies are owned by the
//! application: the registry keeps only a weak back-reference, which the
//! periodic sweep prunes once the application drops its last handle.
//! Implicit proxies collected this way are reported to the peer so it can
//! drop the servant behind them.
//!
//! Both sides count references to implicit grains: the exporting side
//! counts every reference it sends, the importing side every reference it
//! receives for the current proxy. A release carries the received count,
//! and the servant survives until the sent count is used up. A reference
//! exported while the release was in flight thus keeps the servant alive.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{CallResult, EndpointError, Result};
use crate::ids::{is_reserved, GrainId, GrainIdGenerator};
use crate::interface::{InterfaceDescriptor, RemoteInterface};
use crate::message::ReleasedGrain;
use crate::proxy::{CallChannel, IncomingCall, ProxyHandle};

/// Address of the object behind an `Arc`, without its vtable.
pub(crate) fn object_address<I: ?Sized>(object: &Arc<I>) -> usize {
    Arc::as_ptr(object) as *const () as usize
}

trait ErasedProxy: Send + Sync {
    fn address(&self) -> Option<usize>;
    fn as_any(&self) -> &dyn Any;
}

impl<I: ?Sized + Send + Sync + 'static> ErasedProxy for Weak<I> {
    fn address(&self) -> Option<usize> {
        self.upgrade().map(|proxy| object_address(&proxy))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct ProxySlot {
    interface: &'static InterfaceDescriptor,
    proxy: Box<dyn ErasedProxy>,
    transient: bool,
    /// References to the grain received from the peer.
    references: u64,
}

impl ProxySlot {
    fn upgrade<I: ?Sized + RemoteInterface>(&self) -> Option<Arc<I>> {
        self.proxy
            .as_any()
            .downcast_ref::<Weak<I>>()
            .and_then(Weak::upgrade)
    }

    fn is_alive(&self) -> bool {
        self.proxy.address().is_some()
    }
}

#[derive(Default)]
struct ProxyTable {
    by_id: HashMap<GrainId, ProxySlot>,
    by_address: HashMap<usize, GrainId>,
    released: Vec<ReleasedGrain>,
}

trait ErasedSubject: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn invoke(&self, call: &mut IncomingCall) -> CallResult<Value>;
}

struct TypedSubject<I: ?Sized>(Arc<I>);

impl<I: ?Sized + RemoteInterface> ErasedSubject for TypedSubject<I> {
    fn as_any(&self) -> &dyn Any {
        &self.0
    }

    fn invoke(&self, call: &mut IncomingCall) -> CallResult<Value> {
        I::invoke(&self.0, call)
    }
}

/// A local subject exposed to the peer.
pub struct Servant {
    grain_id: GrainId,
    interface: &'static InterfaceDescriptor,
    address: usize,
    subject: Box<dyn ErasedSubject>,
    implicit: bool,
}

impl Servant {
    pub fn grain_id(&self) -> GrainId {
        self.grain_id
    }

    pub fn interface(&self) -> &'static InterfaceDescriptor {
        self.interface
    }

    /// True for servants created by by-reference marshalling.
    pub fn is_implicit(&self) -> bool {
        self.implicit
    }

    pub(crate) fn invoke(&self, call: &mut IncomingCall) -> CallResult<Value> {
        self.subject.invoke(call)
    }
}

#[derive(Default)]
struct ServantTable {
    by_id: HashMap<GrainId, Arc<Servant>>,
    by_subject: HashMap<(usize, &'static str), GrainId>,
    /// References to implicit servants sent and not yet released.
    exports: HashMap<GrainId, u64>,
}

impl ServantTable {
    fn remove(&mut self, grain_id: GrainId) -> Option<Arc<Servant>> {
        let servant = self.by_id.remove(&grain_id)?;
        self.by_subject
            .remove(&(servant.address, servant.interface.name));
        self.exports.remove(&grain_id);
        Some(servant)
    }
}

/// A registered grain, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrainInfo {
    pub grain_id: GrainId,
    pub interface: &'static str,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub num_proxies_collected: u64,
    pub num_servants_collected: u64,
    pub total_gc_time: Duration,
}

pub struct GrainRegistry {
    endpoint: String,
    proxies: Mutex<ProxyTable>,
    servants: Mutex<ServantTable>,
    ids: GrainIdGenerator,
    proxies_collected: AtomicU64,
    servants_collected: AtomicU64,
    gc_nanos: AtomicU64,
}

impl GrainRegistry {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            proxies: Mutex::new(ProxyTable::default()),
            servants: Mutex::new(ServantTable::default()),
            ids: GrainIdGenerator::new(),
            proxies_collected: AtomicU64::new(0),
            servants_collected: AtomicU64::new(0),
            gc_nanos: AtomicU64::new(0),
        }
    }

    fn proxies(&self) -> MutexGuard<'_, ProxyTable> {
        self.proxies.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn servants(&self) -> MutexGuard<'_, ServantTable> {
        self.servants.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers `subject` under `grain_id`.
    pub fn create_servant<I: ?Sized + RemoteInterface>(
        &self,
        grain_id: GrainId,
        subject: Arc<I>,
    ) -> Result<Arc<Servant>> {
        I::descriptor().validate()?;
        let mut servants = self.servants();
        if servants.by_id.contains_key(&grain_id) {
            return Err(EndpointError::InvalidArgument(format!(
                "a servant with id #{grain_id} already exists"
            )));
        }
        let servant = insert_servant(&mut servants, grain_id, subject, false);
        debug!(endpoint = %self.endpoint, grain = grain_id, interface = I::descriptor().name, "created servant");
        Ok(servant)
    }

    /// Returns the id of the servant wrapping `subject`, creating an
    /// implicit servant on first use. Each call counts as one reference
    /// handed to the peer.
    pub fn get_existing_or_create_new_servant<I: ?Sized + RemoteInterface>(
        &self,
        subject: &Arc<I>,
    ) -> Result<GrainId> {
        let descriptor = I::descriptor();
        let key = (object_address(subject), descriptor.name);
        let mut servants = self.servants();
        let grain_id = match servants.by_subject.get(&key) {
            Some(grain_id) => *grain_id,
            None => {
                descriptor.validate()?;
                let grain_id = self.ids.next_id()?;
                insert_servant(&mut servants, grain_id, Arc::clone(subject), true);
                debug!(endpoint = %self.endpoint, grain = grain_id, interface = descriptor.name, "created implicit servant");
                grain_id
            }
        };
        if servants.by_id.get(&grain_id).is_some_and(|servant| servant.implicit) {
            *servants.exports.entry(grain_id).or_default() += 1;
        }
        Ok(grain_id)
    }

    pub fn servant(&self, grain_id: GrainId) -> Option<Arc<Servant>> {
        self.servants().by_id.get(&grain_id).cloned()
    }

    /// Returns the subject of servant `grain_id` if it implements `I`.
    pub fn retrieve_subject<I: ?Sized + RemoteInterface>(&self, grain_id: GrainId) -> Option<Arc<I>> {
        let servant = self.servant(grain_id)?;
        match servant.subject.as_any().downcast_ref::<Arc<I>>() {
            Some(subject) => Some(Arc::clone(subject)),
            None => {
                warn!(
                    endpoint = %self.endpoint,
                    grain = grain_id,
                    expected = I::descriptor().name,
                    found = servant.interface.name,
                    "servant does not implement the requested interface"
                );
                None
            }
        }
    }

    pub fn remove_servant(&self, grain_id: GrainId) -> bool {
        self.servants().remove(grain_id).is_some()
    }

    /// Drops implicit servants the peer no longer references. A servant
    /// exported again after the peer collected its proxy stays until the
    /// peer releases those references too.
    pub fn release_servants(&self, grains: &[ReleasedGrain]) -> usize {
        let mut servants = self.servants();
        let mut released = 0;
        for grain in grains {
            let implicit = servants
                .by_id
                .get(&grain.grain_id)
                .is_some_and(|servant| servant.implicit);
            if !implicit {
                continue;
            }
            let outstanding = servants.exports.get(&grain.grain_id).copied().unwrap_or(0);
            let remaining = outstanding.saturating_sub(grain.references);
            if remaining > 0 {
                servants.exports.insert(grain.grain_id, remaining);
                debug!(
                    endpoint = %self.endpoint,
                    grain = grain.grain_id,
                    remaining,
                    "keeping servant with references in flight"
                );
                continue;
            }
            if servants.remove(grain.grain_id).is_some() {
                released += 1;
            }
        }
        drop(servants);

        if released > 0 {
            self.servants_collected
                .fetch_add(released as u64, Ordering::Relaxed);
            debug!(endpoint = %self.endpoint, released, "released implicit servants");
        }
        released
    }

    /// Creates and registers a proxy for the remote grain `grain_id`.
    pub(crate) fn create_proxy<I: ?Sized + RemoteInterface>(
        &self,
        grain_id: GrainId,
        channel: Weak<dyn CallChannel>,
    ) -> Result<Arc<I>> {
        let descriptor = I::descriptor();
        descriptor.validate()?;
        let mut proxies = self.proxies();
        if proxies.by_id.get(&grain_id).is_some_and(ProxySlot::is_alive) {
            return Err(EndpointError::InvalidArgument(format!(
                "a proxy with id #{grain_id} already exists"
            )));
        }
        Ok(insert_proxy(&mut proxies, grain_id, descriptor, channel, false))
    }

    /// Returns the live proxy for `grain_id`, or atomically registers a
    /// new one.
    pub(crate) fn get_existing_or_create_new_proxy<I: ?Sized + RemoteInterface>(
        &self,
        grain_id: GrainId,
        channel: Weak<dyn CallChannel>,
        transient: bool,
    ) -> Result<Arc<I>> {
        let descriptor = I::descriptor();
        let mut proxies = self.proxies();
        if let Some(slot) = proxies.by_id.get_mut(&grain_id) {
            if let Some(proxy) = slot.upgrade::<I>() {
                if transient {
                    slot.references += 1;
                }
                return Ok(proxy);
            }
            if slot.is_alive() {
                return Err(EndpointError::TypeMismatch(format!(
                    "proxy #{grain_id} implements '{}', not '{}'",
                    slot.interface.name, descriptor.name
                )));
            }
        }
        descriptor.validate()?;
        Ok(insert_proxy(&mut proxies, grain_id, descriptor, channel, transient))
    }

    /// The grain id of `proxy`, if it is a live proxy of this registry.
    pub fn proxy_id<I: ?Sized>(&self, proxy: &Arc<I>) -> Option<GrainId> {
        let address = object_address(proxy);
        let proxies = self.proxies();
        let grain_id = *proxies.by_address.get(&address)?;
        let slot = proxies.by_id.get(&grain_id)?;
        (slot.proxy.address() == Some(address)).then_some(grain_id)
    }

    /// Prunes proxies the application no longer references.
    pub fn remove_unused_proxies(&self) -> usize {
        let started = Instant::now();
        let mut proxies = self.proxies();
        let mut collected = Vec::new();
        proxies.by_id.retain(|grain_id, slot| {
            let alive = slot.is_alive();
            if !alive {
                collected.push(ReleasedGrain {
                    grain_id: *grain_id,
                    references: slot.references,
                });
            }
            alive
        });
        let ProxyTable {
            by_id,
            by_address,
            released,
        } = &mut *proxies;
        by_address.retain(|_, grain_id| by_id.contains_key(grain_id));
        released.extend(
            collected
                .iter()
                .filter(|grain| grain.references > 0 && !is_reserved(grain.grain_id)),
        );
        drop(proxies);

        let count = collected.len();
        if count > 0 {
            self.proxies_collected
                .fetch_add(count as u64, Ordering::Relaxed);
            debug!(endpoint = %self.endpoint, collected = count, "collected unused proxies");
        }
        let elapsed = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.gc_nanos.fetch_add(elapsed, Ordering::Relaxed);
        count
    }

    /// Takes the collected implicit proxies the peer should learn about.
    pub fn take_released(&self) -> Vec<ReleasedGrain> {
        std::mem::take(&mut self.proxies().released)
    }

    /// Forgets implicit proxies. Called when a connection ends: their
    /// servants on the peer do not outlive it.
    pub fn remove_transient_proxies(&self) -> usize {
        let mut proxies = self.proxies();
        let before = proxies.by_id.len();
        let ProxyTable {
            by_id,
            by_address,
            released,
        } = &mut *proxies;
        by_id.retain(|_, slot| !slot.transient);
        by_address.retain(|_, grain_id| by_id.contains_key(grain_id));
        released.clear();
        before - by_id.len()
    }

    /// Drops the servants created by by-reference marshalling. Called when
    /// a connection ends: the peer's proxies for them are gone.
    pub fn remove_implicit_servants(&self) -> usize {
        let mut servants = self.servants();
        let implicit: Vec<GrainId> = servants
            .by_id
            .values()
            .filter(|servant| servant.implicit)
            .map(|servant| servant.grain_id)
            .collect();
        let removed: Vec<Arc<Servant>> = implicit
            .iter()
            .filter_map(|grain_id| servants.remove(*grain_id))
            .collect();
        drop(servants);
        // Subjects are dropped outside the table lock.
        drop(removed);

        let count = implicit.len();
        if count > 0 {
            self.servants_collected
                .fetch_add(count as u64, Ordering::Relaxed);
            debug!(endpoint = %self.endpoint, count, "dropped implicit servants");
        }
        count
    }

    /// Drops every servant and forgets every proxy.
    pub fn clear(&self) {
        {
            let mut servants = self.servants();
            servants.by_id.clear();
            servants.by_subject.clear();
            servants.exports.clear();
        }
        let mut proxies = self.proxies();
        proxies.by_id.clear();
        proxies.by_address.clear();
        proxies.released.clear();
    }

    /// Live proxies, excluding the runtime's internal grains.
    pub fn proxy_list(&self) -> Vec<GrainInfo> {
        let proxies = self.proxies();
        let mut list: Vec<GrainInfo> = proxies
            .by_id
            .iter()
            .filter(|(grain_id, slot)| !is_reserved(**grain_id) && slot.is_alive())
            .map(|(grain_id, slot)| GrainInfo {
                grain_id: *grain_id,
                interface: slot.interface.name,
            })
            .collect();
        list.sort_by_key(|info| info.grain_id);
        list
    }

    /// Registered servants, excluding the runtime's internal grains.
    pub fn servant_list(&self) -> Vec<GrainInfo> {
        let servants = self.servants();
        let mut list: Vec<GrainInfo> = servants
            .by_id
            .values()
            .filter(|servant| !is_reserved(servant.grain_id))
            .map(|servant| GrainInfo {
                grain_id: servant.grain_id,
                interface: servant.interface.name,
            })
            .collect();
        list.sort_by_key(|info| info.grain_id);
        list
    }

    pub fn num_proxies(&self) -> usize {
        self.proxy_list().len()
    }

    pub fn num_servants(&self) -> usize {
        self.servants()
            .by_id
            .keys()
            .filter(|grain_id| !is_reserved(**grain_id))
            .count()
    }

    pub fn collection_stats(&self) -> CollectionStats {
        CollectionStats {
            num_proxies_collected: self.proxies_collected.load(Ordering::Relaxed),
            num_servants_collected: self.servants_collected.load(Ordering::Relaxed),
            total_gc_time: Duration::from_nanos(self.gc_nanos.load(Ordering::Relaxed)),
        }
    }
}

fn insert_servant<I: ?Sized + RemoteInterface>(
    servants: &mut ServantTable,
    grain_id: GrainId,
    subject: Arc<I>,
    implicit: bool,
) -> Arc<Servant> {
    let interface = I::descriptor();
    let address = object_address(&subject);
    let servant = Arc::new(Servant {
        grain_id,
        interface,
        address,
        subject: Box::new(TypedSubject(subject)),
        implicit,
    });
    servants.by_id.insert(grain_id, Arc::clone(&servant));
    servants
        .by_subject
        .entry((address, interface.name))
        .or_insert(grain_id);
    servant
}

fn insert_proxy<I: ?Sized + RemoteInterface>(
    proxies: &mut ProxyTable,
    grain_id: GrainId,
    interface: &'static InterfaceDescriptor,
    channel: Weak<dyn CallChannel>,
    transient: bool,
) -> Arc<I> {
    let proxy = I::create_proxy(ProxyHandle::new(grain_id, interface, channel));
    proxies.by_address.insert(object_address(&proxy), grain_id);
    proxies.by_id.insert(
        grain_id,
        ProxySlot {
            interface,
            proxy: Box::new(Arc::downgrade(&proxy)),
            transient,
            references: u64::from(transient),
        },
    );
    proxy
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::error::CallResult;
    use crate::ids::HEARTBEAT_GRAIN_ID;
    use crate::proxy::{ArgumentWriter, CallTarget, OutgoingCall};
    use crate::remote_interface;

    remote_interface! {
        trait Greeter as "test.Greeter" {
            fn greet(&self, name: String) -> CallResult<String>;
        }
    }

    remote_interface! {
        trait Counter as "test.Counter" {
            fn count(&self) -> CallResult<u64>;
        }
    }

    struct English;

    impl Greeter for English {
        fn greet(&self, name: String) -> CallResult<String> {
            Ok(format!("hello {name}"))
        }
    }

    struct Offline;

    impl CallChannel for Offline {
        fn send_call(
            &self,
            _target: CallTarget,
            _encode: &dyn Fn(&mut ArgumentWriter) -> CallResult<()>,
        ) -> OutgoingCall {
            OutgoingCall::failed(crate::error::RpcError::NotConnected {
                endpoint: "offline".to_string(),
            })
        }
    }

    fn channel() -> Weak<dyn CallChannel> {
        let channel: Arc<dyn CallChannel> = Arc::new(Offline);
        Arc::downgrade(&channel)
    }

    fn released(grain_id: GrainId, references: u64) -> ReleasedGrain {
        ReleasedGrain {
            grain_id,
            references,
        }
    }

    #[test]
    fn duplicate_servant_ids_are_rejected() {
        let registry = GrainRegistry::new("test");
        let subject: Arc<dyn Greeter> = Arc::new(English);
        registry.create_servant(1, Arc::clone(&subject)).unwrap();
        assert!(matches!(
            registry.create_servant(1, subject),
            Err(EndpointError::InvalidArgument(_))
        ));
    }

    #[test]
    fn retrieve_subject_checks_interface() {
        let registry = GrainRegistry::new("test");
        let subject: Arc<dyn Greeter> = Arc::new(English);
        registry.create_servant(7, Arc::clone(&subject)).unwrap();

        let found = registry.retrieve_subject::<dyn Greeter>(7).unwrap();
        assert!(Arc::ptr_eq(&found, &subject));
        assert!(registry.retrieve_subject::<dyn Counter>(7).is_none());
        assert!(registry.retrieve_subject::<dyn Greeter>(8).is_none());
    }

    #[test]
    fn same_subject_reuses_implicit_servant() {
        let registry = GrainRegistry::new("test");
        let subject: Arc<dyn Greeter> = Arc::new(English);
        let first = registry.get_existing_or_create_new_servant(&subject).unwrap();
        let second = registry.get_existing_or_create_new_servant(&subject).unwrap();
        assert_eq!(first, second);
        assert!(first >= 1 << 63);
        assert!(registry.servant(first).unwrap().is_implicit());

        let other: Arc<dyn Greeter> = Arc::new(English);
        let third = registry.get_existing_or_create_new_servant(&other).unwrap();
        assert_ne!(first, third);
    }

    #[test]
    fn release_only_drops_implicit_servants() {
        let registry = GrainRegistry::new("test");
        let explicit: Arc<dyn Greeter> = Arc::new(English);
        registry.create_servant(1, explicit).unwrap();
        let implicit: Arc<dyn Greeter> = Arc::new(English);
        let implicit_id = registry.get_existing_or_create_new_servant(&implicit).unwrap();

        assert_eq!(registry.release_servants(&[released(1, 1), released(implicit_id, 1)]), 1);
        assert!(registry.servant(1).is_some());
        assert!(registry.servant(implicit_id).is_none());
        assert_eq!(registry.collection_stats().num_servants_collected, 1);
    }

    #[test]
    fn servant_exported_again_survives_stale_release() {
        let registry = GrainRegistry::new("test");
        let subject: Arc<dyn Greeter> = Arc::new(English);
        let grain_id = registry.get_existing_or_create_new_servant(&subject).unwrap();
        // The peer collects its proxy after the first reference while the
        // second is still on the way.
        assert_eq!(registry.get_existing_or_create_new_servant(&subject).unwrap(), grain_id);

        assert_eq!(registry.release_servants(&[released(grain_id, 1)]), 0);
        assert!(registry.servant(grain_id).is_some());

        assert_eq!(registry.release_servants(&[released(grain_id, 1)]), 1);
        assert!(registry.servant(grain_id).is_none());

        // a fresh export after the release mints a new grain
        let again = registry.get_existing_or_create_new_servant(&subject).unwrap();
        assert_ne!(again, grain_id);
    }

    #[test]
    fn imported_references_are_counted_per_proxy() {
        let registry = GrainRegistry::new("test");
        let proxy = registry
            .get_existing_or_create_new_proxy::<dyn Greeter>(4, channel(), true)
            .unwrap();
        for _ in 0..2 {
            registry
                .get_existing_or_create_new_proxy::<dyn Greeter>(4, channel(), true)
                .unwrap();
        }
        drop(proxy);
        registry.remove_unused_proxies();
        assert_eq!(registry.take_released(), vec![released(4, 3)]);

        // a new proxy for the same grain starts counting afresh
        drop(
            registry
                .get_existing_or_create_new_proxy::<dyn Greeter>(4, channel(), true)
                .unwrap(),
        );
        registry.remove_unused_proxies();
        assert_eq!(registry.take_released(), vec![released(4, 1)]);
    }

    #[test]
    fn implicit_servants_are_dropped_on_disconnect() {
        let registry = GrainRegistry::new("test");
        let explicit: Arc<dyn Greeter> = Arc::new(English);
        registry.create_servant(1, explicit).unwrap();
        let subjects: Vec<Arc<dyn Greeter>> = (0..3)
            .map(|_| -> Arc<dyn Greeter> { Arc::new(English) })
            .collect();
        for subject in &subjects {
            registry.get_existing_or_create_new_servant(subject).unwrap();
        }
        assert_eq!(registry.num_servants(), 4);

        assert_eq!(registry.remove_implicit_servants(), 3);
        assert_eq!(registry.servant_list(), vec![GrainInfo { grain_id: 1, interface: "test.Greeter" }]);
        assert!(subjects.iter().all(|subject| Arc::strong_count(subject) == 1));
        assert_eq!(registry.collection_stats().num_servants_collected, 3);
    }

    #[test]
    fn proxies_are_deduplicated_by_id() {
        let registry = GrainRegistry::new("test");
        let first = registry
            .get_existing_or_create_new_proxy::<dyn Greeter>(3, channel(), true)
            .unwrap();
        let second = registry
            .get_existing_or_create_new_proxy::<dyn Greeter>(3, channel(), true)
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.proxy_id(&first), Some(3));
        assert!(matches!(
            registry.create_proxy::<dyn Greeter>(3, channel()),
            Err(EndpointError::InvalidArgument(_))
        ));
        assert!(matches!(
            registry.get_existing_or_create_new_proxy::<dyn Counter>(3, channel(), true),
            Err(EndpointError::TypeMismatch(_))
        ));
    }

    #[test]
    fn concurrent_lookups_yield_one_proxy() {
        let registry = Arc::new(GrainRegistry::new("test"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    registry
                        .get_existing_or_create_new_proxy::<dyn Greeter>(5, channel(), false)
                        .unwrap()
                })
            })
            .collect();
        let proxies: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for proxy in &proxies[1..] {
            assert!(Arc::ptr_eq(proxy, &proxies[0]));
        }
    }

    #[test]
    fn sweep_collects_dropped_proxies() {
        let registry = GrainRegistry::new("test");
        let kept = registry.create_proxy::<dyn Greeter>(1, channel()).unwrap();
        let dropped = registry
            .get_existing_or_create_new_proxy::<dyn Greeter>(2, channel(), true)
            .unwrap();
        drop(dropped);

        assert_eq!(registry.remove_unused_proxies(), 1);
        assert_eq!(registry.take_released(), vec![released(2, 1)]);
        assert!(registry.take_released().is_empty());
        assert_eq!(registry.proxy_list(), vec![GrainInfo { grain_id: 1, interface: "test.Greeter" }]);
        assert_eq!(registry.collection_stats().num_proxies_collected, 1);
        assert!(registry.proxy_id(&kept).is_some());

        // the id is free again
        let again = registry.create_proxy::<dyn Greeter>(2, channel()).unwrap();
        assert_eq!(registry.proxy_id(&again), Some(2));
    }

    #[test]
    fn transient_proxies_vanish_on_disconnect() {
        let registry = GrainRegistry::new("test");
        let explicit = registry.create_proxy::<dyn Greeter>(1, channel()).unwrap();
        let implicit = registry
            .get_existing_or_create_new_proxy::<dyn Greeter>(2, channel(), true)
            .unwrap();

        assert_eq!(registry.remove_transient_proxies(), 1);
        assert_eq!(registry.proxy_id(&explicit), Some(1));
        assert_eq!(registry.proxy_id(&implicit), None);
    }

    #[test]
    fn reserved_grains_are_hidden() {
        let registry = GrainRegistry::new("test");
        let subject: Arc<dyn Greeter> = Arc::new(English);
        registry.create_servant(HEARTBEAT_GRAIN_ID, subject).unwrap();
        let _proxy = registry
            .create_proxy::<dyn Greeter>(HEARTBEAT_GRAIN_ID, channel())
            .unwrap();

        assert!(registry.servant_list().is_empty());
        assert!(registry.proxy_list().is_empty());
        assert_eq!(registry.num_servants(), 0);
        assert_eq!(registry.num_proxies(), 0);
    }
}
