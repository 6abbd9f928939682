//! Shared-memory dummy transport used in testing the interface.
//!
//! Register words live in plain per-bar vectors sized from a catalogue. Tests
//! reach the memory behind the device's back with [`Mock::poke`] and
//! [`Mock::peek`], simulate transport death with [`Mock::set_broken`], and
//! inject hardware interrupts with [`Mock::fire`].

use super::{InterruptWaiter, Transport, TransportError};
use crossbeam_channel::{bounded, Receiver, Sender};
use mapdev_utils::catalogue::RegisterCatalogue;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Mock {
    bars: HashMap<u64, Vec<i32>>,
    open: bool,
    broken: bool,
    irq: HashMap<u32, Sender<()>>,
}

impl Mock {
    /// Builds a dummy sized to hold every register of the catalogue.
    #[must_use]
    pub fn new(catalogue: &RegisterCatalogue) -> Self {
        let mut bars: HashMap<u64, usize> = HashMap::new();
        for info in catalogue.iter() {
            let end = usize::try_from(info.address).unwrap_or(usize::MAX)
                + info.n_bytes as usize;
            let bar = bars.entry(info.bar).or_default();
            *bar = (*bar).max(end);
        }
        Mock {
            bars: bars
                .into_iter()
                .map(|(bar, bytes)| (bar, vec![0; bytes.div_ceil(4)]))
                .collect(),
            ..Mock::default()
        }
    }

    /// Makes every subsequent transfer fail until cleared, as if the device
    /// were unplugged.
    pub fn set_broken(&mut self, broken: bool) {
        self.broken = broken;
    }

    /// Asserts a hardware interrupt line once.
    pub fn fire(&mut self, line: u32) {
        if let Some(tx) = self.irq.get(&line) {
            let _ = tx.try_send(());
        }
    }

    /// Writes words directly into the dummy memory, bypassing open/broken
    /// checks.
    ///
    /// # Panics
    /// Panics when the target range does not exist.
    pub fn poke(&mut self, bar: u64, address: u64, data: &[i32]) {
        let word = usize::try_from(address / 4).unwrap();
        let mem = self.bars.get_mut(&bar).expect("bar exists");
        mem[word..word + data.len()].copy_from_slice(data);
    }

    /// Reads words directly from the dummy memory.
    ///
    /// # Panics
    /// Panics when the target range does not exist.
    #[must_use]
    pub fn peek(&self, bar: u64, address: u64, n_words: usize) -> Vec<i32> {
        let word = usize::try_from(address / 4).unwrap();
        self.bars.get(&bar).expect("bar exists")[word..word + n_words].to_vec()
    }

    fn range(&mut self, bar: u64, address: u64, n_words: usize) -> Result<&mut [i32], TransportError> {
        let out_of_range = TransportError::OutOfRange {
            bar,
            address,
            n_bytes: n_words * 4,
        };
        if address % 4 != 0 {
            return Err(out_of_range);
        }
        let word = usize::try_from(address / 4).map_err(|_| TransportError::OutOfRange {
            bar,
            address,
            n_bytes: n_words * 4,
        })?;
        self.bars
            .get_mut(&bar)
            .and_then(|mem| mem.get_mut(word..word + n_words))
            .ok_or(out_of_range)
    }

    fn check_usable(&self) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        if self.broken {
            return Err(TransportError::Device(
                "simulated transport failure".to_string(),
            ));
        }
        Ok(())
    }
}

impl Transport for Mock {
    fn open(&mut self) -> Result<(), TransportError> {
        if self.broken {
            return Err(TransportError::Device(
                "simulated transport failure".to_string(),
            ));
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read(&mut self, bar: u64, address: u64, data: &mut [i32]) -> Result<(), TransportError> {
        self.check_usable()?;
        let mem = self.range(bar, address, data.len())?;
        data.copy_from_slice(mem);
        Ok(())
    }

    fn write(&mut self, bar: u64, address: u64, data: &[i32]) -> Result<(), TransportError> {
        self.check_usable()?;
        let mem = self.range(bar, address, data.len())?;
        mem.copy_from_slice(data);
        Ok(())
    }

    fn interrupt_waiter(&mut self, line: u32) -> Option<Box<dyn InterruptWaiter>> {
        let (tx, rx) = bounded(64);
        self.irq.insert(line, tx);
        Some(Box::new(MockWaiter { rx }))
    }
}

struct MockWaiter {
    rx: Receiver<()>,
}

impl InterruptWaiter for MockWaiter {
    fn wait(&mut self, timeout: Duration) -> Result<u32, TransportError> {
        match self.rx.recv_timeout(timeout) {
            Ok(()) => {
                // collapse bursts the way a real event counter would
                let mut events = 1;
                while self.rx.try_recv().is_ok() {
                    events += 1;
                }
                Ok(events)
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Ok(0),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Err(
                TransportError::Device("interrupt source is gone".to_string()),
            ),
        }
    }
}
