//! Subscription management shared by the distributor kinds, and the consumer
//! side of a subscription.

use crate::accessor::Buffer;
use crate::codec::Cooked;
use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::types::{DataValidity, TransferElementId, VersionNumber};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Fallback length of a subscriber queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// What travels through a subscriber queue.
#[derive(Debug, Clone)]
pub(crate) enum QueueItem<U> {
    Data(Buffer<U>),
    Error(String),
    Interrupted,
}

/// Enqueues with "latest wins" overflow handling: when the bounded queue is
/// full the oldest entry is discarded in favour of the new one.
pub(crate) fn push_latest<U>(
    sender: &Sender<QueueItem<U>>,
    drain: &Receiver<QueueItem<U>>,
    item: QueueItem<U>,
) {
    let mut item = item;
    loop {
        match sender.try_send(item) {
            Ok(()) => return,
            Err(TrySendError::Full(rejected)) => {
                let _ = drain.try_recv();
                item = rejected;
            }
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
}

/// One subscription as seen by its distributor: fills a send buffer and
/// pushes copies into the subscriber queue. Implementations exist per cooked
/// user type; the distributor maps are type erased.
pub(crate) trait AsyncVariable<T: Transport>: Send {
    /// Transfers fresh data from the device using the already locked
    /// transport (no-op for variables without device data).
    fn poll(&mut self, shared: &crate::device::DeviceShared<T>, transport: &mut T) -> Result<()>;

    /// Stamps the send buffer with `version` (and the current validity).
    fn fill_send_buffer(&mut self, version: VersionNumber);

    /// Pushes a copy of the send buffer into the subscriber queue.
    fn send(&mut self);

    /// Pushes a runtime error into the subscriber queue.
    fn send_exception(&mut self, message: &str);
}

/// The per-distributor registry of subscriptions, keyed by accessor id.
///
/// The lock guards the map and the variables inside; producers hold it while
/// distributing so subscriptions and unsubscriptions cannot interleave.
pub(crate) struct SubscriptionMap<T: Transport> {
    vars: Mutex<HashMap<TransferElementId, Box<dyn AsyncVariable<T>>>>,
}

impl<T: Transport> SubscriptionMap<T> {
    pub fn new() -> Self {
        SubscriptionMap {
            vars: Mutex::new(HashMap::new()),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, HashMap<TransferElementId, Box<dyn AsyncVariable<T>>>> {
        self.vars.lock().unwrap()
    }

    pub fn remove(&self, id: TransferElementId) {
        self.vars.lock().unwrap().remove(&id);
    }

    pub fn send_exception_all(&self, message: &str) {
        for var in self.vars.lock().unwrap().values_mut() {
            var.send_exception(message);
        }
    }
}

/// The unsubscribe entry of a distributor; reentrant-safe and callable from
/// any consumer thread.
pub(crate) trait SubscriptionHost: Send + Sync {
    fn unsubscribe(&self, id: TransferElementId);
}

/// Consumer handle of one push subscription.
///
/// `read` suspends on the subscription queue until the distributor delivers
/// the next value, a fault arrives, or [`AsyncAccessor::interrupt`] unblocks
/// the read. Dropping the accessor unsubscribes; subscribers control the
/// lifetime of the distribution tree.
pub struct AsyncAccessor<U: Cooked> {
    id: TransferElementId,
    receiver: Receiver<QueueItem<U>>,
    self_sender: Sender<QueueItem<U>>,
    host: Arc<dyn SubscriptionHost>,
    buffer: Buffer<U>,
}

impl<U: Cooked> AsyncAccessor<U> {
    pub(crate) fn new(
        id: TransferElementId,
        receiver: Receiver<QueueItem<U>>,
        self_sender: Sender<QueueItem<U>>,
        host: Arc<dyn SubscriptionHost>,
        n_channels: usize,
        n_elements: usize,
    ) -> Self {
        AsyncAccessor {
            id,
            receiver,
            self_sender,
            host,
            buffer: Buffer::new(n_channels, n_elements),
        }
    }

    /// Blocks until the next value and moves it into the local buffer.
    ///
    /// # Errors
    /// [`Error::Runtime`] when the device reported a fault (delivered exactly
    /// once per fault episode) or the distributor is gone;
    /// [`Error::Interrupted`] after [`AsyncAccessor::interrupt`].
    pub fn read(&mut self) -> Result<()> {
        match self.receiver.recv() {
            Ok(item) => self.accept(item),
            Err(_) => Err(Error::runtime("the subscription's distributor is gone")),
        }
    }

    /// Non-blocking variant of [`AsyncAccessor::read`]; returns whether a new
    /// value was taken.
    ///
    /// # Errors
    /// Same as [`AsyncAccessor::read`].
    pub fn try_read(&mut self) -> Result<bool> {
        match self.receiver.try_recv() {
            Ok(item) => self.accept(item).map(|()| true),
            Err(crossbeam_channel::TryRecvError::Empty) => Ok(false),
            Err(crossbeam_channel::TryRecvError::Disconnected) => {
                Err(Error::runtime("the subscription's distributor is gone"))
            }
        }
    }

    /// Drains the queue, keeping only the newest value. Returns whether a
    /// new value was taken.
    ///
    /// # Errors
    /// Same as [`AsyncAccessor::read`]; an error stops the drain.
    pub fn read_latest(&mut self) -> Result<bool> {
        let mut updated = false;
        while self.try_read()? {
            updated = true;
        }
        Ok(updated)
    }

    fn accept(&mut self, item: QueueItem<U>) -> Result<()> {
        match item {
            QueueItem::Data(buffer) => {
                debug_assert!(buffer.version >= self.buffer.version);
                self.buffer = buffer;
                Ok(())
            }
            QueueItem::Error(message) => {
                self.buffer.validity = DataValidity::Faulty;
                Err(Error::Runtime(message))
            }
            QueueItem::Interrupted => Err(Error::Interrupted),
        }
    }

    /// Unblocks a pending [`AsyncAccessor::read`] with a sentinel. The queue
    /// stays intact.
    pub fn interrupt(&self) {
        push_latest(&self.self_sender, &self.receiver, QueueItem::Interrupted);
    }

    /// A handle for interrupting this accessor from another thread.
    #[must_use]
    pub fn interrupter(&self) -> Interrupter {
        let sender = self.self_sender.clone();
        let drain = self.receiver.clone();
        Interrupter {
            push: Box::new(move || push_latest(&sender, &drain, QueueItem::Interrupted)),
        }
    }

    #[must_use]
    pub fn id(&self) -> TransferElementId {
        self.id
    }

    #[must_use]
    pub fn version(&self) -> VersionNumber {
        self.buffer.version
    }

    #[must_use]
    pub fn validity(&self) -> DataValidity {
        self.buffer.validity
    }

    /// Channel 0 of the last value.
    #[must_use]
    pub fn as_slice(&self) -> &[U] {
        &self.buffer.value[0]
    }

    /// One channel of the last value.
    #[must_use]
    pub fn channel(&self, channel: usize) -> &[U] {
        &self.buffer.value[channel]
    }

    /// The first element of the last value.
    #[must_use]
    pub fn get(&self) -> &U {
        &self.buffer.value[0][0]
    }
}

impl<U: Cooked> Drop for AsyncAccessor<U> {
    fn drop(&mut self) {
        self.host.unsubscribe(self.id);
    }
}

/// Unblocks one accessor's pending read; see [`AsyncAccessor::interrupter`].
pub struct Interrupter {
    push: Box<dyn Fn() + Send + Sync>,
}

impl Interrupter {
    pub fn interrupt(&self) {
        (self.push)();
    }
}
