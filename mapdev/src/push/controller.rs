//! The interrupt-controller-handler tree: one node per physical interrupt
//! controller, each owning its per-line trigger distributors weakly and
//! dispatching hardware events downwards.
//!
//! Controller types are registered by name; descriptions come from
//! `@INTERRUPT_HANDLER <controller-id> <json>` metadata lines of the map
//! file, e.g. `@INTERRUPT_HANDLER 0 {"name":"dummy","module":"APP0"}`.

use super::trigger::{Parent, TriggerDistributor};
use crate::device::DeviceShared;
use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::types::VersionNumber;
use mapdev_utils::catalogue::MetadataCatalogue;
use mapdev_utils::path::RegisterPath;
use packed_struct::prelude::*;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// Metadata key carrying one controller description per line.
pub const INTERRUPT_HANDLER_KEY: &str = "INTERRUPT_HANDLER";

/// The JSON payload of a controller description.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct HandlerConfig {
    pub name: String,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
}

/// Controller-type specific behavior plugged into a handler node.
pub(crate) trait IntcBackend<T: Transport>: Send + Sync {
    /// Dispatches one hardware event to the asserted lines of this
    /// controller.
    fn handle(&self, node: &ControllerHandler<T>, version: VersionNumber) -> Result<()>;

    /// Hook run when distribution (re-)activates, e.g. to re-arm the
    /// controller hardware.
    fn on_activate(&self, node: &ControllerHandler<T>) {
        let _ = node;
    }
}

/// One node of the controller tree.
pub(crate) struct ControllerHandler<T: Transport> {
    device: Weak<DeviceShared<T>>,
    /// Controller id: the line path from the root to this controller.
    id: Vec<u32>,
    /// Upwards link keeping the path to the domain alive.
    #[allow(dead_code)]
    parent: Arc<TriggerDistributor<T>>,
    children: Mutex<HashMap<u32, Weak<TriggerDistributor<T>>>>,
    backend: Box<dyn IntcBackend<T>>,
}

impl<T: Transport> ControllerHandler<T> {
    /// Returns the child trigger distributor under `line`, creating it when
    /// the weak slot is empty or expired.
    pub fn trigger_distributor(self: &Arc<Self>, line: u32) -> Arc<TriggerDistributor<T>> {
        let mut children = self.children.lock().unwrap();
        if let Some(child) = children.get(&line).and_then(Weak::upgrade) {
            return child;
        }
        let mut id = self.id.clone();
        id.push(line);
        let child =
            TriggerDistributor::new(self.device.clone(), id, Parent::Controller(Arc::clone(self)));
        children.insert(line, Arc::downgrade(&child));
        child
    }

    pub fn poll_distributor_recursive(
        self: &Arc<Self>,
        ids: &[u32],
    ) -> Result<Arc<super::poll::PollDistributor<T>>> {
        self.trigger_distributor(ids[0]).poll_distributor_recursive(ids)
    }

    pub fn variable_distributor_recursive(
        self: &Arc<Self>,
        ids: &[u32],
    ) -> Result<Arc<super::variable::VariableDistributor<T>>> {
        self.trigger_distributor(ids[0]).variable_distributor_recursive(ids)
    }

    /// Backend-specific dispatch of one hardware event.
    pub fn handle(&self, version: VersionNumber) -> Result<()> {
        self.backend.handle(self, version)
    }

    pub fn activate(&self, version: VersionNumber) {
        self.backend.on_activate(self);
        for child in self.live_children() {
            child.activate(version);
        }
    }

    pub fn deactivate(&self) {
        for child in self.live_children() {
            child.deactivate();
        }
    }

    pub fn send_exception(&self, message: &str) {
        for child in self.live_children() {
            child.send_exception(message);
        }
    }

    pub(crate) fn device(&self) -> Result<Arc<DeviceShared<T>>> {
        self.device
            .upgrade()
            .ok_or_else(|| Error::runtime("the device owning this controller is gone"))
    }

    /// Live child under `line`; `None` when the line is known but all its
    /// subscribers are gone, `Err` when the line is not known at all.
    fn known_child(&self, line: u32) -> Result<Option<Arc<TriggerDistributor<T>>>> {
        let children = self.children.lock().unwrap();
        match children.get(&line) {
            Some(weak) => Ok(weak.upgrade()),
            None => Err(Error::runtime(format!(
                "interrupt controller {:?} reports unknown active interrupt {line}",
                self.id
            ))),
        }
    }

    fn live_children(&self) -> Vec<Arc<TriggerDistributor<T>>> {
        self.children
            .lock()
            .unwrap()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }
}

/// Knows which controller handler to create for which controller id.
pub(crate) struct ControllerHandlerFactory<T: Transport> {
    descriptions: HashMap<Vec<u32>, HandlerConfig>,
    creators: HashMap<String, CreatorFn<T>>,
}

type CreatorFn<T> =
    fn(&Arc<DeviceShared<T>>, &HandlerConfig) -> Result<Box<dyn IntcBackend<T>>>;

impl<T: Transport> ControllerHandlerFactory<T> {
    /// Builds the factory from map-file metadata; the built-in controller
    /// types are pre-registered.
    pub fn from_metadata(metadata: &MetadataCatalogue) -> Result<Self> {
        let mut creators: HashMap<String, CreatorFn<T>> = HashMap::new();
        creators.insert("AXI4_INTC".to_string(), Axi4Intc::create);
        creators.insert("dummy".to_string(), DummyIntc::create);

        let mut descriptions = HashMap::new();
        for entry in metadata.get_all(INTERRUPT_HANDLER_KEY) {
            let (id_text, json) = entry.split_once(char::is_whitespace).ok_or_else(|| {
                Error::logic(format!(
                    "malformed {INTERRUPT_HANDLER_KEY} metadata `{entry}`: expected `<controller-id> <json>`"
                ))
            })?;
            let id = id_text
                .split(':')
                .map(|part| {
                    part.parse::<u32>().map_err(|_| {
                        Error::logic(format!("invalid controller id `{id_text}`"))
                    })
                })
                .collect::<Result<Vec<u32>>>()?;
            let config: HandlerConfig = serde_json::from_str(json.trim()).map_err(|e| {
                Error::logic(format!(
                    "invalid {INTERRUPT_HANDLER_KEY} description for controller `{id_text}`: {e}"
                ))
            })?;
            descriptions.insert(id, config);
        }
        Ok(ControllerHandlerFactory {
            descriptions,
            creators,
        })
    }

    /// Creates the handler node for a controller id.
    ///
    /// # Errors
    /// [`Error::Logic`] when the map file carries no description for the id
    /// or names an unregistered controller type.
    pub fn create(
        &self,
        shared: &Arc<DeviceShared<T>>,
        id: &[u32],
        parent: Arc<TriggerDistributor<T>>,
    ) -> Result<Arc<ControllerHandler<T>>> {
        let config = self.descriptions.get(id).ok_or_else(|| {
            Error::logic(format!(
                "no interrupt controller description for controller {id:?} in the map file"
            ))
        })?;
        let creator = self.creators.get(&config.name).ok_or_else(|| {
            Error::logic(format!("unknown interrupt controller type `{}`", config.name))
        })?;
        let backend = creator(shared, config)?;
        log::debug!("created {} controller handler for {id:?}", config.name);
        Ok(Arc::new(ControllerHandler {
            device: Arc::downgrade(shared),
            id: id.to_vec(),
            parent,
            children: Mutex::new(HashMap::new()),
            backend,
        }))
    }
}

/// The master-enable register at the top of an AXI4 interrupt controller.
#[derive(PackedStruct, Debug, Default, Copy, Clone)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "4")]
pub struct MasterEnable {
    #[packed_field(bits = "0")]
    master_enable: bool,
    #[packed_field(bits = "1")]
    hardware_interrupt_enable: bool,
}

/// Handler for the Xilinx AXI4 interrupt controller. The controller signals
/// a summary interrupt; all known lines are dispatched. With the `MER`
/// option the master-enable register is re-armed on activation.
struct Axi4Intc<T: Transport> {
    mer: Option<(u64, u64)>,
    _phantom: std::marker::PhantomData<fn() -> T>,
}

impl<T: Transport> Axi4Intc<T> {
    fn create(
        shared: &Arc<DeviceShared<T>>,
        config: &HandlerConfig,
    ) -> Result<Box<dyn IntcBackend<T>>> {
        let mer = if config.options.iter().any(|o| o == "MER") {
            let module = config.module.as_deref().ok_or_else(|| {
                Error::logic("AXI4_INTC with the MER option needs a module path")
            })?;
            let info = shared
                .catalogue()
                .get(&RegisterPath::new(module).join("MER"))?;
            Some((info.bar, info.address))
        } else {
            None
        };
        Ok(Box::new(Axi4Intc {
            mer,
            _phantom: std::marker::PhantomData,
        }))
    }
}

impl<T: Transport> IntcBackend<T> for Axi4Intc<T> {
    fn handle(&self, node: &ControllerHandler<T>, version: VersionNumber) -> Result<()> {
        for child in node.live_children() {
            child.trigger(version)?;
        }
        Ok(())
    }

    fn on_activate(&self, node: &ControllerHandler<T>) {
        let Some((bar, address)) = self.mer else {
            return;
        };
        let Ok(shared) = node.device() else {
            return;
        };
        let enable = MasterEnable {
            master_enable: true,
            hardware_interrupt_enable: true,
        };
        let word = i32::from_be_bytes(enable.pack().expect("static layout"));
        // a failing re-arm has already fed the exception path
        if let Err(e) = shared.write_words(bar, address, &[word]) {
            log::warn!("AXI4_INTC master-enable write failed: {e}");
        }
    }
}

/// Handler for the dummy interrupt controller of the shared-memory test
/// device: the asserted lines are read from an `active_ints` handshake
/// register below the configured module path.
struct DummyIntc<T: Transport> {
    bar: u64,
    address: u64,
    _phantom: std::marker::PhantomData<fn() -> T>,
}

impl<T: Transport> DummyIntc<T> {
    fn create(
        shared: &Arc<DeviceShared<T>>,
        config: &HandlerConfig,
    ) -> Result<Box<dyn IntcBackend<T>>> {
        let module = config.module.as_deref().ok_or_else(|| {
            Error::logic("dummy interrupt controller needs a module path")
        })?;
        let info = shared
            .catalogue()
            .get(&RegisterPath::new(module).join("active_ints"))?;
        if !info.is_readable() {
            return Err(Error::runtime(format!(
                "dummy interrupt controller: handshake register `{}` is not readable",
                info.path
            )));
        }
        Ok(Box::new(DummyIntc {
            bar: info.bar,
            address: info.address,
            _phantom: std::marker::PhantomData,
        }))
    }
}

impl<T: Transport> IntcBackend<T> for DummyIntc<T> {
    fn handle(&self, node: &ControllerHandler<T>, version: VersionNumber) -> Result<()> {
        let shared = node.device()?;
        let mut active = [0i32];
        shared.read_words(self.bar, self.address, &mut active)?;
        #[allow(clippy::cast_sign_loss)]
        let mask = active[0] as u32;
        for line in 0..32 {
            if mask & (1 << line) == 0 {
                continue;
            }
            if let Some(child) = node.known_child(line)? {
                child.trigger(version)?;
            }
        }
        Ok(())
    }
}
