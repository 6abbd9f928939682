//! The async domain: the lifecycle gate in front of one primary interrupt
//! line. All distribution below a primary line is serialized by the domain
//! lock, which also generates the version numbers, so every subscriber of
//! the line observes the same version sequence in the same order.

use super::manager::AsyncAccessor;
use super::trigger::{Parent, TriggerDistributor};
use crate::codec::Cooked;
use crate::device::DeviceShared;
use crate::error::Result;
use crate::transport::Transport;
use crate::types::{AccessFlags, VersionNumber};
use mapdev_utils::catalogue::{DataType, RegisterInfo};
use std::sync::{Arc, Mutex, Weak};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum DomainState {
    Inactive,
    Active,
    /// A runtime fault was distributed; nothing flows until a successful
    /// re-open activates the domain again.
    Failed,
}

struct DomainInner<T: Transport> {
    state: DomainState,
    target: Weak<TriggerDistributor<T>>,
    /// One-slot buffer resolving the race between an early hardware event
    /// and activation.
    pending_version: Option<VersionNumber>,
}

pub(crate) struct AsyncDomain<T: Transport> {
    device: Weak<DeviceShared<T>>,
    primary: u32,
    inner: Mutex<DomainInner<T>>,
}

impl<T: Transport> AsyncDomain<T> {
    pub fn new(device: Weak<DeviceShared<T>>, primary: u32) -> Arc<Self> {
        Arc::new(AsyncDomain {
            device,
            primary,
            inner: Mutex::new(DomainInner {
                state: DomainState::Inactive,
                target: Weak::new(),
                pending_version: None,
            }),
        })
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().unwrap().state == DomainState::Active
    }

    /// Entry point for one hardware event on the primary line. The version
    /// is generated under the domain lock.
    pub fn trigger(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            DomainState::Active => {
                let version = VersionNumber::new();
                if let Some(target) = inner.target.upgrade() {
                    if let Err(e) = target.trigger(version) {
                        log::error!("interrupt {} dispatch failed: {e}", self.primary);
                        if let Some(shared) = self.device.upgrade() {
                            shared.set_exception(&e.to_string());
                        }
                    }
                }
            }
            DomainState::Inactive => {
                // remember the event; activate() arbitrates which version
                // wins
                inner.pending_version = Some(VersionNumber::new());
            }
            DomainState::Failed => {}
        }
    }

    /// Activates distribution and resolves the early-event race: the newer
    /// of the activation version and a pending event version is forwarded,
    /// exactly once.
    pub fn activate(&self, version: VersionNumber) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = DomainState::Active;
        let effective = match inner.pending_version.take() {
            Some(pending) if pending > version => pending,
            _ => version,
        };
        if let Some(target) = inner.target.upgrade() {
            target.activate(effective);
        }
    }

    pub fn deactivate(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = DomainState::Inactive;
        inner.pending_version = None;
        if let Some(target) = inner.target.upgrade() {
            target.deactivate();
        }
    }

    /// Transitions to `Failed`, forwards the fault to all subscribers below
    /// this domain and discards pending data.
    pub fn send_exception(&self, message: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = DomainState::Failed;
        inner.pending_version = None;
        if let Some(target) = inner.target.upgrade() {
            target.send_exception(message);
        }
    }

    /// Creates a push subscription below this domain. VOID registers attach
    /// to the variable distributor of their line, data registers to the poll
    /// distributor.
    pub fn subscribe<U: Cooked>(
        self: &Arc<Self>,
        info: RegisterInfo,
        n_elements: usize,
        offset_words: usize,
        flags: AccessFlags,
        queue_capacity: usize,
    ) -> Result<AsyncAccessor<U>> {
        debug_assert_eq!(info.interrupt_id.first(), Some(&self.primary));

        let (root, active) = {
            let mut inner = self.inner.lock().unwrap();
            let root = match inner.target.upgrade() {
                Some(root) => root,
                None => {
                    let root = TriggerDistributor::new(
                        self.device.clone(),
                        vec![self.primary],
                        Parent::Root(Arc::clone(self)),
                    );
                    inner.target = Arc::downgrade(&root);
                    root
                }
            };
            (root, inner.state == DomainState::Active)
        };

        let ids = info.interrupt_id.clone();
        if info.data_type() == DataType::Void {
            let distributor = root.variable_distributor_recursive(&ids)?;
            Ok(distributor.subscribe::<U>(queue_capacity, active))
        } else {
            let distributor = root.poll_distributor_recursive(&ids)?;
            distributor.subscribe::<U>(info, n_elements, offset_words, flags, queue_capacity, active)
        }
    }

    /// The poll distributor serving `ids` (created when missing). Test hook
    /// for lifetime assertions.
    #[cfg(test)]
    pub(crate) fn poll_distributor_for(
        self: &Arc<Self>,
        ids: &[u32],
    ) -> Option<Arc<super::poll::PollDistributor<T>>> {
        let root = self.inner.lock().unwrap().target.upgrade()?;
        root.poll_distributor_recursive(ids).ok()
    }
}
