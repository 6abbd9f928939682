//! The per-line trigger distributor: a pure fan-out node feeding up to three
//! consumers of one interrupt line, all held weakly and created lazily on
//! first subscription.

use super::controller::ControllerHandler;
use super::domain::AsyncDomain;
use super::poll::PollDistributor;
use super::variable::VariableDistributor;
use crate::device::DeviceShared;
use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::types::VersionNumber;
use std::sync::{Arc, Mutex, Weak};

/// Who owns this distributor from above: the domain for the primary line,
/// a controller handler for nested lines. The reference is strong so that a
/// living branch keeps its path to the domain alive.
pub(crate) enum Parent<T: Transport> {
    Root(Arc<AsyncDomain<T>>),
    Controller(Arc<ControllerHandler<T>>),
}

struct Slots<T: Transport> {
    poll: Weak<PollDistributor<T>>,
    variable: Weak<VariableDistributor<T>>,
    controller: Weak<ControllerHandler<T>>,
}

pub(crate) struct TriggerDistributor<T: Transport> {
    device: Weak<DeviceShared<T>>,
    /// Controller-line path ending at this distributor's line.
    id: Vec<u32>,
    #[allow(dead_code)]
    parent: Parent<T>,
    slots: Mutex<Slots<T>>,
}

impl<T: Transport> TriggerDistributor<T> {
    pub fn new(device: Weak<DeviceShared<T>>, id: Vec<u32>, parent: Parent<T>) -> Arc<Self> {
        Arc::new(TriggerDistributor {
            device,
            id,
            parent,
            slots: Mutex::new(Slots {
                poll: Weak::new(),
                variable: Weak::new(),
                controller: Weak::new(),
            }),
        })
    }

    /// Descends `ids` (starting with this distributor's own line) to the
    /// poll distributor serving the terminal line, creating missing levels.
    pub fn poll_distributor_recursive(
        self: &Arc<Self>,
        ids: &[u32],
    ) -> Result<Arc<PollDistributor<T>>> {
        let mut slots = self.slots.lock().unwrap();
        if ids.len() == 1 {
            if let Some(poll) = slots.poll.upgrade() {
                return Ok(poll);
            }
            let poll = PollDistributor::new(self.device.clone(), Arc::clone(self));
            slots.poll = Arc::downgrade(&poll);
            return Ok(poll);
        }
        let controller = self.nested_controller(&mut slots)?;
        drop(slots);
        controller.poll_distributor_recursive(&ids[1..])
    }

    /// Same descent for the variable distributor of the terminal line.
    pub fn variable_distributor_recursive(
        self: &Arc<Self>,
        ids: &[u32],
    ) -> Result<Arc<VariableDistributor<T>>> {
        let mut slots = self.slots.lock().unwrap();
        if ids.len() == 1 {
            if let Some(variable) = slots.variable.upgrade() {
                return Ok(variable);
            }
            let variable = VariableDistributor::new(Arc::clone(self));
            slots.variable = Arc::downgrade(&variable);
            return Ok(variable);
        }
        let controller = self.nested_controller(&mut slots)?;
        drop(slots);
        controller.variable_distributor_recursive(&ids[1..])
    }

    fn nested_controller(
        self: &Arc<Self>,
        slots: &mut Slots<T>,
    ) -> Result<Arc<ControllerHandler<T>>> {
        if let Some(controller) = slots.controller.upgrade() {
            return Ok(controller);
        }
        let shared = self
            .device
            .upgrade()
            .ok_or_else(|| Error::runtime("the device owning this distributor is gone"))?;
        let controller = shared
            .controller_factory()
            .create(&shared, &self.id, Arc::clone(self))?;
        slots.controller = Arc::downgrade(&controller);
        Ok(controller)
    }

    /// Fans a version-stamped tick out to the live consumers: the poll
    /// distributor, the nested controller, the variable distributor.
    pub fn trigger(&self, version: VersionNumber) -> Result<()> {
        let (poll, controller, variable) = self.live_slots();
        if let Some(poll) = poll {
            poll.trigger(version);
        }
        if let Some(controller) = controller {
            controller.handle(version)?;
        }
        if let Some(variable) = variable {
            variable.distribute(version);
        }
        Ok(())
    }

    pub fn activate(&self, version: VersionNumber) {
        let (poll, controller, variable) = self.live_slots();
        if let Some(poll) = poll {
            poll.activate(version);
        }
        if let Some(controller) = controller {
            controller.activate(version);
        }
        if let Some(variable) = variable {
            variable.activate(version);
        }
    }

    pub fn deactivate(&self) {
        let (poll, controller, variable) = self.live_slots();
        if let Some(poll) = poll {
            poll.deactivate();
        }
        if let Some(controller) = controller {
            controller.deactivate();
        }
        if let Some(variable) = variable {
            variable.deactivate();
        }
    }

    pub fn send_exception(&self, message: &str) {
        let (poll, controller, variable) = self.live_slots();
        if let Some(poll) = poll {
            poll.send_exception(message);
        }
        if let Some(controller) = controller {
            controller.send_exception(message);
        }
        if let Some(variable) = variable {
            variable.send_exception(message);
        }
    }

    #[allow(clippy::type_complexity)]
    fn live_slots(
        &self,
    ) -> (
        Option<Arc<PollDistributor<T>>>,
        Option<Arc<ControllerHandler<T>>>,
        Option<Arc<VariableDistributor<T>>>,
    ) {
        let slots = self.slots.lock().unwrap();
        (
            slots.poll.upgrade(),
            slots.controller.upgrade(),
            slots.variable.upgrade(),
        )
    }
}
