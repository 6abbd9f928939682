//! Centralized exception distribution: one background thread per device fans
//! a runtime fault out into every async domain, one fault episode at a time.

use super::domain::AsyncDomain;
use crate::device::DeviceShared;
use crate::error::{Error, Result};
use crate::transport::Transport;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;

/// Work orders for the distributor thread. The typed stop message replaces
/// exception-based shutdown.
enum DistributionMessage {
    Exception(String),
    Stop,
}

pub(crate) struct AsyncDomainsContainer<T: Transport> {
    sender: Sender<DistributionMessage>,
    /// True while a fan-out is in flight; `open()` waits on this.
    sending: Arc<(Mutex<bool>, Condvar)>,
    thread: Mutex<Option<JoinHandle<()>>>,
    _phantom: std::marker::PhantomData<fn() -> T>,
}

impl<T: Transport> AsyncDomainsContainer<T> {
    pub fn new(device: Weak<DeviceShared<T>>) -> Self {
        let (sender, receiver) = bounded(2);
        let sending = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_sending = Arc::clone(&sending);
        let thread = std::thread::Builder::new()
            .name("exception-distributor".to_string())
            .spawn(move || distribute_exceptions(&device, &receiver, &thread_sending))
            .expect("spawn exception distributor thread");
        AsyncDomainsContainer {
            sender,
            sending,
            thread: Mutex::new(Some(thread)),
            _phantom: std::marker::PhantomData,
        }
    }

    /// Hands the active exception message to the distributor thread.
    ///
    /// # Errors
    /// [`Error::Logic`] when the previous distribution has not finished yet.
    pub fn send_exceptions(&self, message: &str) -> Result<()> {
        {
            let (lock, _) = &*self.sending;
            let mut sending = lock.lock().unwrap();
            if *sending {
                return Err(Error::logic(
                    "exception distribution requested before the previous one finished",
                ));
            }
            *sending = true;
        }
        let _ = self
            .sender
            .send(DistributionMessage::Exception(message.to_string()));
        Ok(())
    }

    /// Blocks until no fan-out is in flight. Called by `open()` so that
    /// recovery never overlaps a running distribution.
    pub fn wait_until_idle(&self) {
        let (lock, condvar) = &*self.sending;
        let mut sending = lock.lock().unwrap();
        while *sending {
            sending = condvar.wait(sending).unwrap();
        }
    }
}

impl<T: Transport> Drop for AsyncDomainsContainer<T> {
    fn drop(&mut self) {
        let _ = self.sender.send(DistributionMessage::Stop);
        if let Some(thread) = self.thread.lock().unwrap().take() {
            // the distributor briefly holds a strong device reference while
            // fanning out; when teardown runs on it, detach instead of
            // self-joining
            if thread.thread().id() == std::thread::current().id() {
                drop(thread);
            } else if thread.join().is_err() {
                // no recovery possible if the distributor thread is wedged
                log::error!("exception distributor thread failed to join, terminating");
                std::process::abort();
            }
        }
        let (lock, condvar) = &*self.sending;
        *lock.lock().unwrap() = false;
        condvar.notify_all();
    }
}

fn distribute_exceptions<T: Transport>(
    device: &Weak<DeviceShared<T>>,
    receiver: &Receiver<DistributionMessage>,
    sending: &Arc<(Mutex<bool>, Condvar)>,
) {
    while let Ok(message) = receiver.recv() {
        match message {
            DistributionMessage::Stop => return,
            DistributionMessage::Exception(text) => {
                if let Some(shared) = device.upgrade() {
                    let domains: Vec<Arc<AsyncDomain<T>>> = shared.live_domains();
                    log::debug!(
                        "distributing runtime error to {} async domain(s): {text}",
                        domains.len()
                    );
                    for domain in domains {
                        domain.send_exception(&text);
                    }
                }
                let (lock, condvar) = &**sending;
                *lock.lock().unwrap() = false;
                condvar.notify_all();
            }
        }
    }
}
