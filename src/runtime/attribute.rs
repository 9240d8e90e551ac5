//! Observable, typed, named attributes
//!
//! An [`Attribute`] is a named value of one [`ElementType`] with a set of
//! observers. Setting a value compares it with the current one first; only a
//! real change is stored and announced. Announcements never run on the
//! setter's thread: each observer subscription keeps its own queue of pending
//! values, and at most one drain job per subscription is in flight on the
//! [`Notifier`] pool. An observer therefore sees the changes of one attribute
//! in order and never concurrently; different observers are served in
//! dispatch order with no completion ordering between them.
//!
//! Proxy attributes expose the value of one or more source attributes (for
//! example from another stage of the pipeline) under their own name and type,
//! optionally remapping it on the way in and out.
//!
//! An [`AttributeSet`] is a block's (or endpoint's) property container. It can
//! cascade to a remote set: names not found locally are looked up remotely,
//! and itemization merges both with local entries taking precedence.

use bitflags::bitflags;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

use super::context::Runtime;
use super::errors::AttributeError;
use super::notifier::Notifier;
use super::types::{Element, ElementType, Value};

bitflags! {
    /// Static properties of an attribute.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AttributeFlags: u8 {
        /// Only the owner may change the value (via `publish`).
        const READ_ONLY = 0b01;
        /// Left out of itemization unless explicitly asked for.
        const HIDDEN = 0b10;
    }
}

bitflags! {
    /// Options for [`AttributeSet::itemize`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ItemizeFlags: u8 {
        const INCLUDE_HIDDEN = 0b01;
        /// Do not merge in the remote set of a cascaded set.
        const LOCAL_ONLY = 0b10;
    }
}

/// Receives attribute changes.
pub trait Observer: Send + Sync + 'static {
    fn on_change(&self, attribute: &str, value: &Value);
}

impl<F> Observer for F
where
    F: Fn(&str, &Value) + Send + Sync + 'static,
{
    fn on_change(&self, attribute: &str, value: &Value) {
        self(attribute, value)
    }
}

/// Handle returned by [`Attribute::observe`], used to unobserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// One discrete choice of an enumerated attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeOption {
    pub label: String,
    pub value: Value,
}

type MapFn = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

struct PendingQueue {
    values: VecDeque<Value>,
    scheduled: bool,
}

struct Subscription {
    id: ObserverId,
    attribute: Arc<str>,
    observer: Arc<dyn Observer>,
    active: AtomicBool,
    pending: Mutex<PendingQueue>,
}

impl Subscription {
    fn enqueue(self: &Arc<Self>, value: Value, notifier: &Notifier) {
        {
            let mut pending = self.pending.lock();
            pending.values.push_back(value);
            if pending.scheduled {
                return;
            }
            pending.scheduled = true;
        }
        let subscription = Arc::clone(self);
        notifier.submit(Box::new(move || subscription.drain()));
    }

    fn drain(&self) {
        loop {
            let value = {
                let mut pending = self.pending.lock();
                match pending.values.pop_front() {
                    Some(value) => value,
                    None => {
                        pending.scheduled = false;
                        return;
                    }
                }
            };
            if self.active.load(Ordering::Acquire) {
                self.observer.on_change(&self.attribute, &value);
            }
        }
    }
}

struct Proxy {
    sources: Vec<Attribute>,
    read: MapFn,
    write: Option<MapFn>,
    last: Mutex<Option<Value>>,
    bindings: Mutex<Vec<(usize, ObserverId)>>,
}

enum Storage {
    Local(Mutex<Value>),
    Proxy(Proxy),
}

struct AttributeInner {
    name: Arc<str>,
    description: String,
    element_type: ElementType,
    flags: AttributeFlags,
    options: Vec<AttributeOption>,
    storage: Storage,
    subscriptions: RwLock<Vec<Arc<Subscription>>>,
    next_id: AtomicU64,
    notifier: Arc<Notifier>,
}

impl Drop for AttributeInner {
    fn drop(&mut self) {
        if let Storage::Proxy(proxy) = &self.storage {
            for (index, id) in proxy.bindings.lock().drain(..) {
                if let Some(source) = proxy.sources.get(index) {
                    source.unobserve(id);
                }
            }
        }
    }
}

/// Shared handle to a named, typed, observable value.
#[derive(Clone)]
pub struct Attribute {
    inner: Arc<AttributeInner>,
}

impl Attribute {
    /// Start building a local attribute.
    pub fn builder(name: impl Into<String>, element_type: ElementType) -> AttributeBuilder {
        AttributeBuilder::new(name, element_type)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn description(&self) -> &str {
        &self.inner.description
    }

    pub fn element_type(&self) -> ElementType {
        self.inner.element_type
    }

    pub fn flags(&self) -> AttributeFlags {
        self.inner.flags
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.flags.contains(AttributeFlags::READ_ONLY)
    }

    pub fn is_hidden(&self) -> bool {
        self.inner.flags.contains(AttributeFlags::HIDDEN)
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self.inner.storage, Storage::Proxy(_))
    }

    /// Discrete choices, empty for free-valued attributes.
    pub fn options(&self) -> &[AttributeOption] {
        &self.inner.options
    }

    pub fn get_value(&self) -> Value {
        match &self.inner.storage {
            Storage::Local(value) => value.lock().clone(),
            Storage::Proxy(proxy) => proxy
                .sources
                .iter()
                .find_map(|source| (proxy.read)(&source.get_value()))
                .or_else(|| proxy.last.lock().clone())
                .unwrap_or_else(|| Value::default_for(self.inner.element_type)),
        }
    }

    /// Typed read.
    pub fn get<T: Element>(&self) -> Option<T> {
        T::from_value(&self.get_value())
    }

    /// Change the value from outside the owner.
    ///
    /// Returns `Ok(false)` if the value was already current, in which case
    /// no observer is notified.
    pub fn set_value(&self, value: Value) -> Result<bool, AttributeError> {
        if self.is_read_only() {
            return Err(AttributeError::ReadOnly(self.name().to_string()));
        }
        self.publish(value)
    }

    /// Typed write.
    pub fn set<T: Element>(&self, value: T) -> Result<bool, AttributeError> {
        self.set_value(value.into_value())
    }

    /// Change the value on behalf of the owner; ignores `READ_ONLY`.
    pub fn publish(&self, value: Value) -> Result<bool, AttributeError> {
        self.check(&value)?;
        match &self.inner.storage {
            Storage::Local(current) => {
                {
                    let mut current = current.lock();
                    // Events carry no state, every occurrence counts
                    if self.inner.element_type != ElementType::Event && *current == value {
                        return Ok(false);
                    }
                    *current = value.clone();
                }
                self.notify(value);
                Ok(true)
            }
            Storage::Proxy(proxy) => {
                let Some(write) = &proxy.write else {
                    return Err(AttributeError::ReadOnly(self.name().to_string()));
                };
                let mapped = write(&value).ok_or_else(|| AttributeError::Unmappable {
                    name: self.name().to_string(),
                    value: value.to_string(),
                })?;
                let mut changed = false;
                for source in &proxy.sources {
                    changed |= source.publish(mapped.clone())?;
                }
                Ok(changed)
            }
        }
    }

    /// Raise a one-shot event.
    pub fn fire(&self) {
        debug_assert_eq!(self.inner.element_type, ElementType::Event);
        if let Err(e) = self.publish(Value::Event) {
            trace!("fire on '{}' ignored: {}", self.name(), e);
        }
    }

    /// Register an observer; it is called off-thread on every change.
    pub fn observe(&self, observer: impl Observer) -> ObserverId {
        self.observe_arc(Arc::new(observer))
    }

    pub fn observe_arc(&self, observer: Arc<dyn Observer>) -> ObserverId {
        let id = ObserverId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let subscription = Arc::new(Subscription {
            id,
            attribute: Arc::clone(&self.inner.name),
            observer,
            active: AtomicBool::new(true),
            pending: Mutex::new(PendingQueue {
                values: VecDeque::new(),
                scheduled: false,
            }),
        });
        self.inner.subscriptions.write().push(subscription);
        id
    }

    /// Remove an observer. Returns false if it was not registered.
    ///
    /// Notifications already being delivered may still complete; queued ones
    /// are discarded.
    pub fn unobserve(&self, id: ObserverId) -> bool {
        let mut subscriptions = self.inner.subscriptions.write();
        match subscriptions.iter().position(|s| s.id == id) {
            Some(index) => {
                let subscription = subscriptions.remove(index);
                subscription.active.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub fn observer_count(&self) -> usize {
        self.inner.subscriptions.read().len()
    }

    pub fn ptr_eq(&self, other: &Attribute) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn check(&self, value: &Value) -> Result<(), AttributeError> {
        let expected = self.inner.element_type;
        if value.element_type() != expected {
            return Err(AttributeError::TypeMismatch {
                name: self.name().to_string(),
                expected,
                actual: value.element_type(),
            });
        }
        if !self.inner.options.is_empty() && !self.inner.options.iter().any(|o| o.value == *value) {
            return Err(AttributeError::InvalidOption {
                name: self.name().to_string(),
                value: value.to_string(),
            });
        }
        Ok(())
    }

    fn notify(&self, value: Value) {
        let snapshot: Vec<Arc<Subscription>> = self.inner.subscriptions.read().clone();
        trace!("'{}' = {} -> {} observers", self.name(), value, snapshot.len());
        for subscription in snapshot {
            subscription.enqueue(value.clone(), &self.inner.notifier);
        }
    }

    /// A source of this proxy changed: re-map and announce if different.
    fn forward(&self, value: &Value) {
        let Storage::Proxy(proxy) = &self.inner.storage else {
            return;
        };
        let Some(mapped) = (proxy.read)(value) else {
            return;
        };
        {
            let mut last = proxy.last.lock();
            if last.as_ref() == Some(&mapped) {
                return;
            }
            *last = Some(mapped.clone());
        }
        self.notify(mapped);
    }

    fn downgrade(&self) -> Weak<AttributeInner> {
        Arc::downgrade(&self.inner)
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("name", &self.name())
            .field("type", &self.element_type())
            .field("flags", &self.flags())
            .field("value", &self.get_value())
            .finish()
    }
}

/// Builder for local and proxy attributes.
pub struct AttributeBuilder {
    name: String,
    description: String,
    element_type: ElementType,
    flags: AttributeFlags,
    options: Vec<AttributeOption>,
    initial: Option<Value>,
    proxy: Option<(Vec<Attribute>, MapFn)>,
    write: Option<MapFn>,
}

impl AttributeBuilder {
    fn new(name: impl Into<String>, element_type: ElementType) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            element_type,
            flags: AttributeFlags::empty(),
            options: Vec::new(),
            initial: None,
            proxy: None,
            write: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn read_only(mut self) -> Self {
        self.flags |= AttributeFlags::READ_ONLY;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.flags |= AttributeFlags::HIDDEN;
        self
    }

    pub fn initial(mut self, value: impl Into<Value>) -> Self {
        self.initial = Some(value.into());
        self
    }

    pub fn option(mut self, label: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.push(AttributeOption {
            label: label.into(),
            value: value.into(),
        });
        self
    }

    /// Make this a proxy over `sources`; `read` maps a source value to this
    /// attribute's value (or `None` to skip that source).
    pub fn proxy_of<F>(mut self, sources: Vec<Attribute>, read: F) -> Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.proxy = Some((sources, Arc::new(read)));
        self
    }

    /// Let writes to a proxy flow back to its sources through `write`.
    pub fn write_back<F>(mut self, write: F) -> Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.write = Some(Arc::new(write));
        self
    }

    pub fn build(self, runtime: &Runtime) -> Attribute {
        self.build_with(Arc::clone(runtime.notifier()))
    }

    pub fn build_with(self, notifier: Arc<Notifier>) -> Attribute {
        let initial = self
            .initial
            .filter(|v| v.element_type() == self.element_type)
            .or_else(|| self.options.first().map(|o| o.value.clone()))
            .unwrap_or_else(|| Value::default_for(self.element_type));

        let (storage, sources) = match self.proxy {
            Some((sources, read)) => {
                let last = sources.iter().find_map(|s| read(&s.get_value()));
                let flags = if self.write.is_none() {
                    AttributeFlags::READ_ONLY
                } else {
                    AttributeFlags::empty()
                };
                let proxy = Proxy {
                    sources: sources.clone(),
                    read,
                    write: self.write,
                    last: Mutex::new(last),
                    bindings: Mutex::new(Vec::new()),
                };
                (Storage::Proxy(proxy), Some((sources, flags)))
            }
            None => (Storage::Local(Mutex::new(initial)), None),
        };

        let extra_flags = sources.as_ref().map_or(AttributeFlags::empty(), |(_, f)| *f);
        let attribute = Attribute {
            inner: Arc::new(AttributeInner {
                name: Arc::from(self.name),
                description: self.description,
                element_type: self.element_type,
                flags: self.flags | extra_flags,
                options: self.options,
                storage,
                subscriptions: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(0),
                notifier,
            }),
        };

        if let (Some((sources, _)), Storage::Proxy(proxy)) = (sources, &attribute.inner.storage) {
            let mut bindings = proxy.bindings.lock();
            for (index, source) in sources.iter().enumerate() {
                let weak = attribute.downgrade();
                let id = source.observe(move |_: &str, value: &Value| {
                    if let Some(inner) = weak.upgrade() {
                        Attribute { inner }.forward(value);
                    }
                });
                bindings.push((index, id));
            }
        }

        attribute
    }
}

/// Something a cascaded attribute set can fall back to.
pub trait RemoteAttributes: Send + Sync {
    fn remote_attributes(&self) -> Option<AttributeSet>;
}

/// Deepest chain of cascaded sets followed by a lookup.
const MAX_CASCADE_DEPTH: usize = 16;

#[derive(Default)]
struct SetInner {
    entries: RwLock<Vec<Attribute>>,
    remote: RwLock<Option<Arc<dyn RemoteAttributes>>>,
}

/// Ordered collection of attributes, optionally cascading to a remote set.
#[derive(Clone, Default)]
pub struct AttributeSet {
    inner: Arc<SetInner>,
}

/// Non-owning reference to an [`AttributeSet`].
#[derive(Clone)]
pub struct WeakAttributeSet {
    inner: Weak<SetInner>,
}

impl WeakAttributeSet {
    pub fn upgrade(&self) -> Option<AttributeSet> {
        self.inner.upgrade().map(|inner| AttributeSet { inner })
    }
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute, replacing any local one of the same name.
    pub fn insert(&self, attribute: Attribute) {
        let mut entries = self.inner.entries.write();
        match entries.iter_mut().find(|a| a.name() == attribute.name()) {
            Some(existing) => *existing = attribute,
            None => entries.push(attribute),
        }
    }

    pub fn remove(&self, name: &str) -> Option<Attribute> {
        let mut entries = self.inner.entries.write();
        let index = entries.iter().position(|a| a.name() == name)?;
        Some(entries.remove(index))
    }

    /// Fall back to `remote` for names not found locally.
    pub fn cascade_to(&self, remote: Arc<dyn RemoteAttributes>) {
        *self.inner.remote.write() = Some(remote);
    }

    pub fn clear_cascade(&self) {
        *self.inner.remote.write() = None;
    }

    pub fn is_cascaded(&self) -> bool {
        self.inner.remote.read().is_some()
    }

    /// Local attribute of that name, else the remote one.
    pub fn get_by_name(&self, name: &str) -> Option<Attribute> {
        self.lookup(name, 0)
    }

    /// Look up and fail with `NotFound` if absent.
    pub fn require(&self, name: &str) -> Result<Attribute, AttributeError> {
        self.get_by_name(name)
            .ok_or_else(|| AttributeError::NotFound(name.to_string()))
    }

    /// List attributes. Local entries come first; remote entries follow
    /// unless `LOCAL_ONLY` is given, minus any whose name is taken locally.
    pub fn itemize(&self, flags: ItemizeFlags) -> Vec<Attribute> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.collect(flags, 0, &mut seen, &mut out);
        out
    }

    /// Number of local entries.
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    pub fn downgrade(&self) -> WeakAttributeSet {
        WeakAttributeSet {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn ptr_eq(&self, other: &AttributeSet) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn remote(&self) -> Option<AttributeSet> {
        let remote = self.inner.remote.read().clone()?;
        remote.remote_attributes()
    }

    fn lookup(&self, name: &str, depth: usize) -> Option<Attribute> {
        let local = self
            .inner
            .entries
            .read()
            .iter()
            .find(|a| a.name() == name)
            .cloned();
        if local.is_some() || depth >= MAX_CASCADE_DEPTH {
            return local;
        }
        self.remote()?.lookup(name, depth + 1)
    }

    fn collect(
        &self,
        flags: ItemizeFlags,
        depth: usize,
        seen: &mut HashSet<String>,
        out: &mut Vec<Attribute>,
    ) {
        for attribute in self.inner.entries.read().iter() {
            if attribute.is_hidden() && !flags.contains(ItemizeFlags::INCLUDE_HIDDEN) {
                continue;
            }
            if seen.insert(attribute.name().to_string()) {
                out.push(attribute.clone());
            }
        }
        if flags.contains(ItemizeFlags::LOCAL_ONLY) || depth >= MAX_CASCADE_DEPTH {
            return;
        }
        if let Some(remote) = self.remote() {
            remote.collect(flags, depth + 1, seen, out);
        }
    }
}

impl RemoteAttributes for AttributeSet {
    fn remote_attributes(&self) -> Option<AttributeSet> {
        Some(self.clone())
    }
}

impl fmt::Debug for AttributeSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let names: Vec<String> = self
            .inner
            .entries
            .read()
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        f.debug_struct("AttributeSet")
            .field("local", &names)
            .field("cascaded", &self.is_cascaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{Receiver, unbounded};
    use std::thread;
    use std::time::Duration;

    fn notifier() -> Arc<Notifier> {
        Arc::new(Notifier::new(2, 4, 16).unwrap())
    }

    fn recorder(attribute: &Attribute) -> Receiver<Value> {
        let (tx, rx) = unbounded();
        attribute.observe(move |_: &str, value: &Value| {
            let _ = tx.send(value.clone());
        });
        rx
    }

    #[test]
    fn test_unchanged_value_does_not_notify() {
        let attr = Attribute::builder("gain", ElementType::Long)
            .initial(5i32)
            .build_with(notifier());
        let rx = recorder(&attr);

        assert_eq!(attr.set_value(Value::Long(5)), Ok(false));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_change_notifies_every_observer_once() {
        let attr = Attribute::builder("gain", ElementType::Long).build_with(notifier());
        let observers: Vec<_> = (0..3).map(|_| recorder(&attr)).collect();

        assert_eq!(attr.set::<i32>(9), Ok(true));
        for rx in &observers {
            assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), Value::Long(9));
            assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        }
    }

    #[test]
    fn test_notifications_arrive_off_thread_and_in_order() {
        let attr = Attribute::builder("freq", ElementType::LongLong).build_with(notifier());
        let (tx, rx) = unbounded();
        let setter = thread::current().id();
        attr.observe(move |_: &str, value: &Value| {
            tx.send((thread::current().id(), value.as_i64().unwrap())).unwrap();
        });

        for f in 1..=50i64 {
            attr.set(f).unwrap();
        }
        for expected in 1..=50i64 {
            let (thread_id, value) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
            assert_ne!(thread_id, setter);
            assert_eq!(value, expected);
        }
    }

    #[test]
    fn test_observer_never_runs_concurrently() {
        let attr = Attribute::builder("level", ElementType::Long).build_with(notifier());
        let busy = Arc::new(AtomicBool::new(false));
        let (tx, rx) = unbounded();
        {
            let busy = Arc::clone(&busy);
            attr.observe(move |_: &str, _: &Value| {
                assert!(!busy.swap(true, Ordering::SeqCst), "overlapping notification");
                thread::sleep(Duration::from_millis(2));
                busy.store(false, Ordering::SeqCst);
                tx.send(()).unwrap();
            });
        }
        for v in 0..20 {
            attr.set::<i32>(v + 1).unwrap();
        }
        for _ in 0..20 {
            rx.recv_timeout(Duration::from_secs(2)).unwrap();
        }
    }

    #[test]
    fn test_unobserve_stops_notifications() {
        let attr = Attribute::builder("mode", ElementType::Long).build_with(notifier());
        let (tx, rx) = unbounded();
        let id = attr.observe(move |_: &str, v: &Value| {
            let _ = tx.send(v.clone());
        });
        assert!(attr.unobserve(id));
        assert!(!attr.unobserve(id));
        attr.set::<i32>(3).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(attr.observer_count(), 0);
    }

    #[test]
    fn test_type_and_access_checks() {
        let n = notifier();
        let attr = Attribute::builder("rate", ElementType::Double).build_with(Arc::clone(&n));
        assert!(matches!(
            attr.set_value(Value::Long(1)),
            Err(AttributeError::TypeMismatch { .. })
        ));

        let locked = Attribute::builder("serial", ElementType::String)
            .read_only()
            .initial("abc")
            .build_with(n);
        assert!(matches!(
            locked.set_value("x".into()),
            Err(AttributeError::ReadOnly(_))
        ));
        assert_eq!(locked.publish("xyz".into()), Ok(true));
        assert_eq!(locked.get::<String>().as_deref(), Some("xyz"));
    }

    #[test]
    fn test_options_restrict_values() {
        let attr = Attribute::builder("window", ElementType::Long)
            .option("hann", 0i32)
            .option("blackman", 1i32)
            .build_with(notifier());
        assert_eq!(attr.options().len(), 2);
        assert_eq!(attr.get_value(), Value::Long(0));
        assert_eq!(attr.set::<i32>(1), Ok(true));
        assert!(matches!(
            attr.set::<i32>(7),
            Err(AttributeError::InvalidOption { .. })
        ));
    }

    #[test]
    fn test_event_fires_every_time() {
        let attr = Attribute::builder("syncFault", ElementType::Event)
            .read_only()
            .build_with(notifier());
        let rx = recorder(&attr);
        attr.fire();
        attr.fire();
        for _ in 0..2 {
            assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), Value::Event);
        }
    }

    #[test]
    fn test_proxy_halves_and_doubles() {
        let n = notifier();
        let block_size = Attribute::builder("blockSize", ElementType::Long)
            .initial(1024i32)
            .build_with(Arc::clone(&n));
        let frames = Attribute::builder("frameCount", ElementType::Long)
            .proxy_of(vec![block_size.clone()], |v| {
                v.as_i64()
                    .and_then(|b| Value::integer_of(ElementType::Long, b / 2))
            })
            .write_back(|v| {
                v.as_i64()
                    .and_then(|f| Value::integer_of(ElementType::Long, f * 2))
            })
            .build_with(n);

        assert!(frames.is_proxy());
        assert_eq!(frames.get_value(), Value::Long(512));

        let rx = recorder(&frames);
        block_size.set::<i32>(2048).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), Value::Long(1024));

        frames.set::<i32>(100).unwrap();
        assert_eq!(block_size.get::<i32>(), Some(200));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), Value::Long(100));
    }

    #[test]
    fn test_proxy_without_write_back_is_read_only() {
        let n = notifier();
        let source = Attribute::builder("src", ElementType::Long).build_with(Arc::clone(&n));
        let proxy = Attribute::builder("view", ElementType::LongLong)
            .proxy_of(vec![source.clone()], |v| v.as_i64().map(Value::LongLong))
            .build_with(n);
        assert!(proxy.is_read_only());
        assert!(proxy.set::<i64>(1).is_err());

        assert_eq!(source.observer_count(), 1);
        drop(proxy);
        assert_eq!(source.observer_count(), 0);
    }

    #[test]
    fn test_proxy_forwards_through_saturated_notifier() {
        let n = Arc::new(Notifier::new(1, 1, 1).unwrap());
        let source = Attribute::builder("src", ElementType::Long).build_with(Arc::clone(&n));
        source.observe(|_: &str, _: &Value| thread::sleep(Duration::from_millis(100)));
        let proxy = Attribute::builder("view", ElementType::Long)
            .proxy_of(vec![source.clone()], |v| {
                thread::sleep(Duration::from_millis(50));
                Some(v.clone())
            })
            .build_with(n);
        for _ in 0..4 {
            source.observe(|_: &str, _: &Value| {});
        }
        let rx = recorder(&proxy);

        let setter = {
            let source = source.clone();
            thread::spawn(move || source.set::<i32>(1))
        };
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Value::Long(1));
        assert_eq!(setter.join().unwrap(), Ok(true));

        source.set::<i32>(2).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Value::Long(2));
    }

    #[test]
    fn test_cascaded_lookup_prefers_local() {
        let n = notifier();
        let remote = AttributeSet::new();
        let long = |name: &str, value: i32| {
            Attribute::builder(name, ElementType::Long)
                .initial(value)
                .build_with(Arc::clone(&n))
        };
        remote.insert(long("x", 1));
        remote.insert(long("y", 2));

        let local = AttributeSet::new();
        local.insert(long("x", 10));
        local.cascade_to(Arc::new(remote.clone()));

        assert_eq!(local.get_by_name("x").unwrap().get::<i32>(), Some(10));
        assert_eq!(local.get_by_name("y").unwrap().get::<i32>(), Some(2));
        assert!(local.get_by_name("z").is_none());
        assert!(matches!(local.require("z"), Err(AttributeError::NotFound(_))));
    }

    #[test]
    fn test_itemize_merges_by_name() {
        let n = notifier();
        let remote = AttributeSet::new();
        remote.insert(Attribute::builder("x", ElementType::Long).build_with(Arc::clone(&n)));
        remote.insert(Attribute::builder("y", ElementType::Long).build_with(Arc::clone(&n)));
        remote.insert(
            Attribute::builder("secret", ElementType::Long)
                .hidden()
                .build_with(Arc::clone(&n)),
        );

        let local = AttributeSet::new();
        let local_x = Attribute::builder("x", ElementType::Long).build_with(Arc::clone(&n));
        local.insert(local_x.clone());
        local.insert(Attribute::builder("internal", ElementType::Bool).hidden().build_with(n));
        local.cascade_to(Arc::new(remote));

        let names = |items: Vec<Attribute>| {
            items
                .iter()
                .map(|a| a.name().to_string())
                .collect::<Vec<_>>()
        };

        let all = local.itemize(ItemizeFlags::empty());
        assert_eq!(names(all.clone()), vec!["x", "y"]);
        assert!(all[0].ptr_eq(&local_x));

        assert_eq!(
            names(local.itemize(ItemizeFlags::INCLUDE_HIDDEN)),
            vec!["x", "internal", "y", "secret"]
        );
        assert_eq!(names(local.itemize(ItemizeFlags::LOCAL_ONLY)), vec!["x"]);
        assert_eq!(
            names(local.itemize(ItemizeFlags::LOCAL_ONLY | ItemizeFlags::INCLUDE_HIDDEN)),
            vec!["x", "internal"]
        );
    }

    #[test]
    fn test_cascade_cycle_is_bounded() {
        let n = notifier();
        let a = AttributeSet::new();
        let b = AttributeSet::new();
        a.insert(Attribute::builder("only_a", ElementType::Bool).build_with(n));
        a.cascade_to(Arc::new(b.clone()));
        b.cascade_to(Arc::new(a.clone()));

        assert!(b.get_by_name("only_a").is_some());
        assert!(a.get_by_name("missing").is_none());
        assert_eq!(b.itemize(ItemizeFlags::empty()).len(), 1);

        // Break the reference cycle
        a.clear_cascade();
    }
}
