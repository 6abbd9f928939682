//! The triggered-poll distributor: on each trigger it reads a set of
//! synchronous accessors coherently and pushes the fresh values to all
//! subscribers of its interrupt line.

use super::manager::{
    push_latest,
    AsyncAccessor,
    AsyncVariable,
    QueueItem,
    SubscriptionHost,
    SubscriptionMap,
};
use super::trigger::TriggerDistributor;
use crate::accessor::{Buffer, RegisterAccessor};
use crate::codec::Cooked;
use crate::device::DeviceShared;
use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::types::{AccessFlags, TransferElementId, VersionNumber};
use crossbeam_channel::{bounded, Receiver, Sender};
use mapdev_utils::catalogue::RegisterInfo;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Coherent read pass over the member accessors of one poll distributor: all
/// transfers happen under a single transport lock acquisition, so one trigger
/// observes one consistent device state.
pub(crate) struct TransferGroup<T: Transport> {
    device: Weak<DeviceShared<T>>,
}

impl<T: Transport> TransferGroup<T> {
    fn read(
        &self,
        vars: &mut HashMap<TransferElementId, Box<dyn AsyncVariable<T>>>,
    ) -> Result<()> {
        let shared = self
            .device
            .upgrade()
            .ok_or_else(|| Error::runtime("the device owning this distributor is gone"))?;
        shared.check_transfer()?;
        let transport = Arc::clone(shared.transport());
        let mut guard = transport.lock().unwrap();
        vars.values_mut()
            .try_for_each(|var| var.poll(&shared, &mut guard))
    }
}

/// Distributor for data-carrying interrupt registers.
pub(crate) struct PollDistributor<T: Transport> {
    device: Weak<DeviceShared<T>>,
    group: TransferGroup<T>,
    subscriptions: SubscriptionMap<T>,
    /// Keeps the branch up to the domain alive.
    _parent: Arc<TriggerDistributor<T>>,
}

impl<T: Transport> PollDistributor<T> {
    pub fn new(device: Weak<DeviceShared<T>>, parent: Arc<TriggerDistributor<T>>) -> Arc<Self> {
        Arc::new(PollDistributor {
            group: TransferGroup {
                device: device.clone(),
            },
            device,
            subscriptions: SubscriptionMap::new(),
            _parent: parent,
        })
    }

    /// Registers a new subscriber and returns its accessor. While the domain
    /// is active the current register value is enqueued as initial value.
    pub fn subscribe<U: Cooked>(
        self: &Arc<Self>,
        info: RegisterInfo,
        n_elements: usize,
        offset_words: usize,
        flags: AccessFlags,
        queue_capacity: usize,
        domain_active: bool,
    ) -> Result<AsyncAccessor<U>> {
        let shared = self
            .device
            .upgrade()
            .ok_or_else(|| Error::runtime("the device owning this distributor is gone"))?;
        let sync_flags = AccessFlags {
            wait_for_new_data: false,
            ..flags
        };
        let accessor = RegisterAccessor::<U, T>::new(&shared, info, n_elements, offset_words, sync_flags)?;

        let id = TransferElementId::new();
        let (sender, receiver) = bounded(queue_capacity.max(1));
        let async_accessor = AsyncAccessor::new(
            id,
            receiver.clone(),
            sender.clone(),
            Arc::clone(self) as Arc<dyn SubscriptionHost>,
            accessor.n_channels(),
            accessor.n_elements(),
        );
        let pending = accessor.buffer().clone();
        let mut var = PolledAsyncVariable {
            accessor,
            sender,
            drain: receiver,
            pending,
        };

        // holding the map lock across the initial push keeps the value order
        // consistent with concurrent triggers
        let mut vars = self.subscriptions.lock();
        if domain_active && shared.check_transfer().is_ok() {
            let transport = Arc::clone(shared.transport());
            let mut guard = transport.lock().unwrap();
            match var.poll(&shared, &mut guard) {
                Ok(()) => {
                    var.fill_send_buffer(VersionNumber::new());
                    var.send();
                }
                Err(e) if e.is_runtime() => {
                    // the device-wide exception path is already running
                }
                Err(e) => return Err(e),
            }
        }
        vars.insert(id, Box::new(var));
        Ok(async_accessor)
    }

    /// Polls the transfer group and pushes the result with `version`.
    /// Transport faults are swallowed here: the failing accessor has already
    /// fed the device-wide exception path.
    pub fn trigger(&self, version: VersionNumber) {
        let mut vars = self.subscriptions.lock();
        if vars.is_empty() {
            return;
        }
        match self.group.read(&mut vars) {
            Ok(()) => {
                for var in vars.values_mut() {
                    var.fill_send_buffer(version);
                    var.send();
                }
            }
            Err(e) => {
                if !e.is_runtime() {
                    log::warn!("poll distributor skipped a trigger: {e}");
                }
            }
        }
    }

    /// Re-reads and distributes current values, used on (re-)activation.
    pub fn activate(&self, version: VersionNumber) {
        self.trigger(version);
    }

    pub fn deactivate(&self) {}

    pub fn send_exception(&self, message: &str) {
        self.subscriptions.send_exception_all(message);
    }
}

impl<T: Transport> SubscriptionHost for PollDistributor<T> {
    fn unsubscribe(&self, id: TransferElementId) {
        // dropping the variable drops its sync accessor, releasing the
        // transfer-group membership and, with the last one, this distributor
        self.subscriptions.remove(id);
    }
}

/// A poll-type subscription: owns the synchronous accessor doing the actual
/// device transfer.
struct PolledAsyncVariable<U: Cooked, T: Transport> {
    accessor: RegisterAccessor<U, T>,
    sender: Sender<QueueItem<U>>,
    drain: Receiver<QueueItem<U>>,
    pending: Buffer<U>,
}

impl<U: Cooked, T: Transport> AsyncVariable<T> for PolledAsyncVariable<U, T> {
    fn poll(&mut self, shared: &DeviceShared<T>, transport: &mut T) -> Result<()> {
        self.accessor.read_with(shared, transport)
    }

    fn fill_send_buffer(&mut self, version: VersionNumber) {
        self.pending = self.accessor.buffer().clone();
        self.pending.version = version;
    }

    fn send(&mut self) {
        push_latest(
            &self.sender,
            &self.drain,
            QueueItem::Data(self.pending.clone()),
        );
    }

    fn send_exception(&mut self, message: &str) {
        self.accessor.mark_faulty();
        push_latest(
            &self.sender,
            &self.drain,
            QueueItem::Error(message.to_string()),
        );
    }
}
