//! The device: owns the transport and the parsed catalogue, hands out
//! synchronous accessors and push subscriptions, and drives the device-wide
//! fault handling and interrupt-waiter threads.

use crate::accessor::RegisterAccessor;
use crate::codec::Cooked;
use crate::error::{Error, Result};
use crate::push::container::AsyncDomainsContainer;
use crate::push::controller::ControllerHandlerFactory;
use crate::push::domain::AsyncDomain;
use crate::push::manager::{AsyncAccessor, DEFAULT_QUEUE_CAPACITY};
use crate::transport::Transport;
use crate::types::{AccessFlags, VersionNumber};
use mapdev_utils::catalogue::{DataType, MetadataCatalogue, RegisterCatalogue};
use mapdev_utils::mapfile;
use mapdev_utils::path::RegisterPath;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

/// Slice used by waiter threads so the stop flag is honored promptly.
const WAIT_SLICE: Duration = Duration::from_millis(100);

struct DeviceState {
    opened: bool,
    exception: Option<String>,
}

/// The shared device core. Accessors, distributors and worker threads all
/// point here weakly; the [`Device`] handles own it.
pub(crate) struct DeviceShared<T: Transport> {
    transport: Arc<Mutex<T>>,
    catalogue: RegisterCatalogue,
    metadata: MetadataCatalogue,
    factory: ControllerHandlerFactory<T>,
    primaries: BTreeSet<u32>,
    state: Mutex<DeviceState>,
    /// Whether `activate_async_read` is in effect; queried shared, flipped
    /// exclusive.
    async_active: RwLock<bool>,
    domains: Mutex<HashMap<u32, Weak<AsyncDomain<T>>>>,
    container: AsyncDomainsContainer<T>,
    stop_waiters: Arc<AtomicBool>,
    waiter_threads: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Transport> DeviceShared<T> {
    pub fn transport(&self) -> &Arc<Mutex<T>> {
        &self.transport
    }

    pub fn catalogue(&self) -> &RegisterCatalogue {
        &self.catalogue
    }

    pub fn controller_factory(&self) -> &ControllerHandlerFactory<T> {
        &self.factory
    }

    /// Precondition for any transfer: open, and no unrecovered fault.
    pub fn check_transfer(&self) -> Result<()> {
        let state = self.state.lock().unwrap();
        if !state.opened {
            return Err(Error::logic("the device is not opened"));
        }
        if let Some(message) = &state.exception {
            return Err(Error::Runtime(message.clone()));
        }
        Ok(())
    }

    /// Word read against an already locked transport. A failing transfer
    /// feeds the device-wide exception path exactly once per fault episode.
    pub fn read_words_with(
        &self,
        transport: &mut T,
        bar: u64,
        address: u64,
        data: &mut [i32],
    ) -> Result<()> {
        transport.read(bar, address, data).map_err(|e| {
            let message = format!("read at bar {bar}, address {address} failed: {e}");
            self.set_exception(&message);
            Error::Runtime(message)
        })
    }

    pub fn write_words_with(
        &self,
        transport: &mut T,
        bar: u64,
        address: u64,
        data: &[i32],
    ) -> Result<()> {
        transport.write(bar, address, data).map_err(|e| {
            let message = format!("write at bar {bar}, address {address} failed: {e}");
            self.set_exception(&message);
            Error::Runtime(message)
        })
    }

    /// Checked word read including transport locking.
    pub fn read_words(&self, bar: u64, address: u64, data: &mut [i32]) -> Result<()> {
        self.check_transfer()?;
        let transport = Arc::clone(&self.transport);
        let mut guard = transport.lock().unwrap();
        self.read_words_with(&mut guard, bar, address, data)
    }

    /// Checked word write including transport locking.
    pub fn write_words(&self, bar: u64, address: u64, data: &[i32]) -> Result<()> {
        self.check_transfer()?;
        let transport = Arc::clone(&self.transport);
        let mut guard = transport.lock().unwrap();
        self.write_words_with(&mut guard, bar, address, data)
    }

    /// Records a runtime fault and starts the asynchronous fan-out. Only the
    /// first fault of an episode is distributed; later ones are absorbed
    /// until a successful `open` clears the state.
    pub fn set_exception(&self, message: &str) {
        {
            let mut state = self.state.lock().unwrap();
            if state.exception.is_some() {
                return;
            }
            state.exception = Some(message.to_string());
        }
        *self.async_active.write().unwrap() = false;
        log::error!("device fault: {message}");
        if let Err(e) = self.container.send_exceptions(message) {
            log::error!("cannot distribute device fault: {e}");
        }
    }

    pub fn live_domains(&self) -> Vec<Arc<AsyncDomain<T>>> {
        self.domains
            .lock()
            .unwrap()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// The domain gate of one primary interrupt line, created lazily. A
    /// domain created while async read is active starts out activated.
    pub fn domain_for(self: &Arc<Self>, line: u32) -> Arc<AsyncDomain<T>> {
        let domain = {
            let mut domains = self.domains.lock().unwrap();
            if let Some(domain) = domains.get(&line).and_then(Weak::upgrade) {
                return domain;
            }
            let domain = AsyncDomain::new(Arc::downgrade(self), line);
            domains.insert(line, Arc::downgrade(&domain));
            domain
        };
        if *self.async_active.read().unwrap() {
            domain.activate(VersionNumber::new());
        }
        domain
    }

    /// Entry point for one hardware event on a primary interrupt line.
    pub fn dispatch_interrupt(&self, line: u32) -> Result<()> {
        if !self.primaries.contains(&line) {
            return Err(Error::runtime(format!(
                "interrupt line {line} is not described by the map file"
            )));
        }
        if let Some(domain) = self.domains.lock().unwrap().get(&line).and_then(Weak::upgrade) {
            domain.trigger();
        }
        Ok(())
    }

    fn start_waiter_threads(self: &Arc<Self>) {
        let mut threads = self.waiter_threads.lock().unwrap();
        if !threads.is_empty() {
            return;
        }
        self.stop_waiters.store(false, Ordering::Relaxed);
        for line in &self.primaries {
            let line = *line;
            let Some(mut waiter) = self.transport.lock().unwrap().interrupt_waiter(line) else {
                continue;
            };
            let weak = Arc::downgrade(self);
            let stop = Arc::clone(&self.stop_waiters);
            let thread = std::thread::Builder::new()
                .name(format!("irq-{line}"))
                .spawn(move || {
                    log::debug!("interrupt waiter for line {line} running");
                    loop {
                        if stop.load(Ordering::Relaxed) {
                            return;
                        }
                        match waiter.wait(WAIT_SLICE) {
                            Ok(0) => {}
                            Ok(events) => {
                                if events > 1 {
                                    log::debug!("line {line}: {events} events since last wait");
                                }
                                let Some(shared) = weak.upgrade() else {
                                    return;
                                };
                                if let Err(e) = shared.dispatch_interrupt(line) {
                                    log::error!("{e}");
                                }
                            }
                            Err(e) => {
                                if let Some(shared) = weak.upgrade() {
                                    shared.set_exception(&format!(
                                        "interrupt wait on line {line} failed: {e}"
                                    ));
                                }
                                return;
                            }
                        }
                    }
                })
                .expect("spawn interrupt waiter thread");
            threads.push(thread);
        }
    }

    fn stop_waiter_threads(&self) {
        self.stop_waiters.store(true, Ordering::Relaxed);
        let current = std::thread::current().id();
        let mut threads = self.waiter_threads.lock().unwrap();
        for thread in threads.drain(..) {
            // a waiter can hold the last strong reference for a moment; when
            // teardown happens to run on it, detach instead of self-joining
            if thread.thread().id() == current {
                continue;
            }
            let _ = thread.join();
        }
    }
}

impl<T: Transport> Drop for DeviceShared<T> {
    fn drop(&mut self) {
        self.stop_waiter_threads();
    }
}

/// A handle to one mapped device. Cheap to clone; consumers on other threads
/// subscribe through their own clone.
pub struct Device<T: Transport> {
    shared: Arc<DeviceShared<T>>,
}

impl<T: Transport> Clone for Device<T> {
    fn clone(&self) -> Self {
        Device {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Transport> Device<T> {
    /// Creates a device from a transport and a map file.
    ///
    /// # Errors
    /// [`Error::Logic`] when the map file does not parse.
    pub fn new<P: AsRef<Path>>(transport: T, map_file: P) -> Result<Self> {
        let (catalogue, metadata) = mapfile::parse_file(map_file)?;
        Device::with_catalogue(transport, catalogue, metadata)
    }

    /// Creates a device from an already parsed catalogue.
    ///
    /// # Errors
    /// [`Error::Logic`] when the interrupt-controller metadata is malformed.
    pub fn with_catalogue(
        transport: T,
        catalogue: RegisterCatalogue,
        metadata: MetadataCatalogue,
    ) -> Result<Self> {
        let factory = ControllerHandlerFactory::from_metadata(&metadata)?;
        let primaries = catalogue.primary_interrupts();
        log::debug!(
            "device with {} registers, {} interrupt id(s)",
            catalogue.len(),
            catalogue.interrupt_ids().len()
        );
        let shared = Arc::new_cyclic(|weak: &Weak<DeviceShared<T>>| DeviceShared {
            transport: Arc::new(Mutex::new(transport)),
            catalogue,
            metadata,
            factory,
            primaries,
            state: Mutex::new(DeviceState {
                opened: false,
                exception: None,
            }),
            async_active: RwLock::new(false),
            domains: Mutex::new(HashMap::new()),
            container: AsyncDomainsContainer::new(weak.clone()),
            stop_waiters: Arc::new(AtomicBool::new(false)),
            waiter_threads: Mutex::new(Vec::new()),
        });
        Ok(Device { shared })
    }

    /// Opens (or re-opens) the transport. A pending exception fan-out is
    /// awaited first; a successful open clears the fault state.
    ///
    /// # Errors
    /// [`Error::Runtime`] when the transport cannot be opened.
    pub fn open(&self) -> Result<()> {
        self.shared.container.wait_until_idle();
        self.shared
            .transport
            .lock()
            .unwrap()
            .open()
            .map_err(|e| Error::runtime(format!("cannot open device: {e}")))?;
        let mut state = self.shared.state.lock().unwrap();
        state.opened = true;
        state.exception = None;
        log::info!("device opened");
        Ok(())
    }

    /// Deactivates distribution, stops the waiter threads and closes the
    /// transport.
    pub fn close(&self) {
        self.shared.stop_waiter_threads();
        for domain in self.shared.live_domains() {
            domain.deactivate();
        }
        *self.shared.async_active.write().unwrap() = false;
        self.shared.transport.lock().unwrap().close();
        self.shared.state.lock().unwrap().opened = false;
        log::info!("device closed");
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.state.lock().unwrap().opened
    }

    #[must_use]
    pub fn is_async_read_active(&self) -> bool {
        *self.shared.async_active.read().unwrap()
    }

    /// Starts push distribution: activates every live domain with a fresh
    /// version number and launches the interrupt-waiter threads. Must be
    /// called again after fault recovery.
    ///
    /// # Errors
    /// [`Error::Logic`] when the device is not opened.
    pub fn activate_async_read(&self) -> Result<()> {
        {
            let state = self.shared.state.lock().unwrap();
            if !state.opened {
                return Err(Error::logic("the device is not opened"));
            }
            if state.exception.is_some() {
                // a fault episode is in progress; recovery re-activates
                return Ok(());
            }
        }
        *self.shared.async_active.write().unwrap() = true;
        for domain in self.shared.live_domains() {
            domain.activate(VersionNumber::new());
        }
        self.shared.start_waiter_threads();
        log::debug!("async read activated");
        Ok(())
    }

    /// Reports a runtime fault, triggering the device-wide exception
    /// fan-out. Called internally by failing accessors; backends may call it
    /// for faults detected out of band.
    pub fn set_exception(&self, message: &str) {
        self.shared.set_exception(message);
    }

    /// Injects one hardware event on a primary interrupt line, as a
    /// transport waiter thread would.
    ///
    /// # Errors
    /// [`Error::Runtime`] when the line is not described by the map file.
    pub fn dispatch_interrupt(&self, line: u32) -> Result<()> {
        self.shared.dispatch_interrupt(line)
    }

    #[must_use]
    pub fn catalogue(&self) -> &RegisterCatalogue {
        &self.shared.catalogue
    }

    #[must_use]
    pub fn metadata(&self) -> &MetadataCatalogue {
        &self.shared.metadata
    }

    /// The owned transport; tests use this to reach the dummy hardware.
    #[must_use]
    pub fn transport(&self) -> &Arc<Mutex<T>> {
        &self.shared.transport
    }

    /// Creates a synchronous accessor for a register or numeric address.
    /// `n_elements == 0` selects the whole remaining register.
    ///
    /// # Errors
    /// [`Error::Logic`] for unknown registers and illegal mode/type
    /// combinations.
    pub fn accessor<U: Cooked>(
        &self,
        path: &str,
        n_elements: usize,
        offset_words: usize,
        flags: AccessFlags,
    ) -> Result<RegisterAccessor<U, T>> {
        if flags.wait_for_new_data {
            return Err(Error::logic(
                "synchronous accessors cannot use wait_for_new_data, use subscribe()",
            ));
        }
        let info = self.shared.catalogue.get(&RegisterPath::new(path))?;
        RegisterAccessor::new(&self.shared, info, n_elements, offset_words, flags)
    }

    /// Creates a push subscription on an interrupt register.
    ///
    /// # Errors
    /// [`Error::Logic`] when the register has no interrupt id.
    pub fn subscribe<U: Cooked>(
        &self,
        path: &str,
        n_elements: usize,
        offset_words: usize,
        flags: AccessFlags,
    ) -> Result<AsyncAccessor<U>> {
        self.subscribe_with_capacity(path, n_elements, offset_words, flags, DEFAULT_QUEUE_CAPACITY)
    }

    /// Like [`Device::subscribe`] with an explicit subscriber queue length.
    ///
    /// # Errors
    /// [`Error::Logic`] when the register has no interrupt id.
    pub fn subscribe_with_capacity<U: Cooked>(
        &self,
        path: &str,
        n_elements: usize,
        offset_words: usize,
        flags: AccessFlags,
        queue_capacity: usize,
    ) -> Result<AsyncAccessor<U>> {
        let info = self.shared.catalogue.get(&RegisterPath::new(path))?;
        if !info.supports_wait_for_new_data() {
            return Err(Error::logic(format!(
                "register `{}` does not support wait_for_new_data",
                info.path
            )));
        }
        if flags.raw && info.data_type() == DataType::Void {
            return Err(Error::logic(format!(
                "VOID register `{}` has no raw representation",
                info.path
            )));
        }
        let domain = self.shared.domain_for(info.interrupt_id[0]);
        domain.subscribe::<U>(info, n_elements, offset_words, flags, queue_capacity)
    }

    /// One-shot read of the first element of a register.
    ///
    /// # Errors
    /// Same as [`Device::accessor`] plus transfer errors.
    pub fn read_value<U: Cooked>(&self, path: &str) -> Result<U> {
        let mut accessor = self.accessor::<U>(path, 1, 0, AccessFlags::default())?;
        accessor.read()?;
        Ok(accessor.get().clone())
    }

    /// One-shot write of a scalar register.
    ///
    /// # Errors
    /// Same as [`Device::accessor`] plus transfer errors.
    pub fn write_value<U: Cooked>(&self, path: &str, value: U) -> Result<()> {
        let mut accessor = self.accessor::<U>(path, 1, 0, AccessFlags::default())?;
        accessor.set(value);
        accessor.write()
    }

    /// One-shot read of a whole 1-D register.
    ///
    /// # Errors
    /// Same as [`Device::accessor`] plus transfer errors.
    pub fn read_array<U: Cooked>(&self, path: &str) -> Result<Vec<U>> {
        let mut accessor = self.accessor::<U>(path, 0, 0, AccessFlags::default())?;
        accessor.read()?;
        Ok(accessor.as_slice().to_vec())
    }

    /// One-shot write of a whole 1-D register.
    ///
    /// # Errors
    /// [`Error::Logic`] when `values` does not match the register length,
    /// plus the usual transfer errors.
    pub fn write_array<U: Cooked>(&self, path: &str, values: &[U]) -> Result<()> {
        let mut accessor = self.accessor::<U>(path, 0, 0, AccessFlags::default())?;
        if accessor.n_elements() != values.len() {
            return Err(Error::logic(format!(
                "register `{path}` holds {} elements, {} given",
                accessor.n_elements(),
                values.len()
            )));
        }
        accessor.as_mut_slice().clone_from_slice(values);
        accessor.write()
    }

    pub(crate) fn shared(&self) -> &Arc<DeviceShared<T>> {
        &self.shared
    }
}
