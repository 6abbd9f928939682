//! The variable distributor: pushes an opaque datum (the VOID trigger in the
//! supported case) to its subscribers whenever the interrupt fires.

use super::manager::{
    push_latest,
    AsyncAccessor,
    AsyncVariable,
    QueueItem,
    SubscriptionHost,
    SubscriptionMap,
};
use super::trigger::TriggerDistributor;
use crate::accessor::Buffer;
use crate::codec::Cooked;
use crate::device::DeviceShared;
use crate::error::Result;
use crate::transport::Transport;
use crate::types::{TransferElementId, VersionNumber};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::Arc;

/// Distributor for registers without device data: subscribers receive the
/// bare version-stamped tick.
pub(crate) struct VariableDistributor<T: Transport> {
    subscriptions: SubscriptionMap<T>,
    /// Keeps the branch up to the domain alive.
    _parent: Arc<TriggerDistributor<T>>,
}

impl<T: Transport> VariableDistributor<T> {
    pub fn new(parent: Arc<TriggerDistributor<T>>) -> Arc<Self> {
        Arc::new(VariableDistributor {
            subscriptions: SubscriptionMap::new(),
            _parent: parent,
        })
    }

    pub fn subscribe<U: Cooked>(
        self: &Arc<Self>,
        queue_capacity: usize,
        domain_active: bool,
    ) -> AsyncAccessor<U> {
        let id = TransferElementId::new();
        let (sender, receiver) = bounded(queue_capacity.max(1));
        let async_accessor = AsyncAccessor::new(
            id,
            receiver.clone(),
            sender.clone(),
            Arc::clone(self) as Arc<dyn SubscriptionHost>,
            1,
            1,
        );
        let mut var = VoidAsyncVariable {
            sender,
            drain: receiver,
            pending: Buffer::new(1, 1),
        };

        let mut vars = self.subscriptions.lock();
        if domain_active {
            var.stamp(VersionNumber::new());
            var.push();
        }
        vars.insert(id, Box::new(var));
        async_accessor
    }

    /// Stamps and pushes the current datum to every subscriber.
    pub fn distribute(&self, version: VersionNumber) {
        let mut vars = self.subscriptions.lock();
        for var in vars.values_mut() {
            var.fill_send_buffer(version);
            var.send();
        }
    }

    pub fn activate(&self, version: VersionNumber) {
        self.distribute(version);
    }

    pub fn deactivate(&self) {}

    pub fn send_exception(&self, message: &str) {
        self.subscriptions.send_exception_all(message);
    }
}

impl<T: Transport> SubscriptionHost for VariableDistributor<T> {
    fn unsubscribe(&self, id: TransferElementId) {
        self.subscriptions.remove(id);
    }
}

/// A subscription carrying no payload; only version and validity travel.
struct VoidAsyncVariable<U: Cooked> {
    sender: Sender<QueueItem<U>>,
    drain: Receiver<QueueItem<U>>,
    pending: Buffer<U>,
}

impl<U: Cooked> VoidAsyncVariable<U> {
    fn stamp(&mut self, version: VersionNumber) {
        self.pending.version = version;
    }

    fn push(&mut self) {
        push_latest(
            &self.sender,
            &self.drain,
            QueueItem::Data(self.pending.clone()),
        );
    }
}

impl<U: Cooked, T: Transport> AsyncVariable<T> for VoidAsyncVariable<U> {
    fn poll(&mut self, _shared: &DeviceShared<T>, _transport: &mut T) -> Result<()> {
        Ok(())
    }

    fn fill_send_buffer(&mut self, version: VersionNumber) {
        self.stamp(version);
    }

    fn send(&mut self) {
        self.push();
    }

    fn send_exception(&mut self, message: &str) {
        push_latest(
            &self.sender,
            &self.drain,
            QueueItem::Error(message.to_string()),
        );
    }
}
