//! Transport for UIO devices: register space is the mmap of `/dev/<name>`,
//! interrupts arrive as a running 32-bit event counter read from the same
//! file descriptor.

use super::{InterruptWaiter, Transport, TransportError};
use memmap2::{MmapMut, MmapOptions};
use nix::libc::O_SYNC;
use nix::poll::{poll, PollFd, PollFlags};
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::time::Duration;

#[derive(Debug)]
pub struct Uio {
    name: String,
    file: Option<File>,
    mem: Option<MmapMut>,
    size: usize,
}

impl Uio {
    /// Prepares a transport for `/dev/<name>`; nothing is touched until
    /// [`Transport::open`].
    #[must_use]
    pub fn new(name: &str) -> Self {
        Uio {
            name: name.to_string(),
            file: None,
            mem: None,
            size: 0,
        }
    }

    fn sysfs_map_attribute(&self, attribute: &str) -> Result<usize, TransportError> {
        let path = format!("/sys/class/uio/{}/maps/map0/{attribute}", self.name);
        let text = std::fs::read_to_string(&path)?;
        parse_sysfs_hex(&text).ok_or_else(|| {
            TransportError::Device(format!("cannot parse `{path}`: `{}`", text.trim()))
        })
    }

    fn mem(&mut self) -> Result<&mut MmapMut, TransportError> {
        self.mem.as_mut().ok_or(TransportError::NotOpen)
    }

    fn check_range(&self, bar: u64, address: u64, n_bytes: usize) -> Result<usize, TransportError> {
        let start = usize::try_from(address).map_err(|_| TransportError::OutOfRange {
            bar,
            address,
            n_bytes,
        })?;
        // a UIO device exposes a single window
        if bar != 0 || start % 4 != 0 || start + n_bytes > self.size {
            return Err(TransportError::OutOfRange {
                bar,
                address,
                n_bytes,
            });
        }
        Ok(start)
    }
}

/// Reads a hex attribute the way the kernel formats it (`0x1000\n`).
fn parse_sysfs_hex(text: &str) -> Option<usize> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    usize::from_str_radix(digits, 16).ok()
}

impl Transport for Uio {
    fn open(&mut self) -> Result<(), TransportError> {
        self.size = self.sysfs_map_attribute("size")?;
        let base = self.sysfs_map_attribute("addr")?;
        let file = File::options()
            .read(true)
            .write(true)
            .custom_flags(O_SYNC)
            .open(format!("/dev/{}", self.name))?;
        let mem = unsafe { MmapOptions::new().len(self.size).map_mut(&file)? };
        log::debug!(
            "uio device /dev/{} mapped, {} bytes at physical {base:#x}",
            self.name,
            self.size
        );
        self.file = Some(file);
        self.mem = Some(mem);
        Ok(())
    }

    fn close(&mut self) {
        self.mem = None;
        self.file = None;
    }

    fn is_open(&self) -> bool {
        self.mem.is_some()
    }

    fn read(&mut self, bar: u64, address: u64, data: &mut [i32]) -> Result<(), TransportError> {
        let start = self.check_range(bar, address, data.len() * 4)?;
        let mem = self.mem()?;
        for (i, word) in data.iter_mut().enumerate() {
            let offset = start + i * 4;
            *word = i32::from_le_bytes(mem[offset..offset + 4].try_into().unwrap());
        }
        Ok(())
    }

    fn write(&mut self, bar: u64, address: u64, data: &[i32]) -> Result<(), TransportError> {
        let start = self.check_range(bar, address, data.len() * 4)?;
        let mem = self.mem()?;
        for (i, word) in data.iter().enumerate() {
            let offset = start + i * 4;
            mem[offset..offset + 4].copy_from_slice(&word.to_le_bytes());
        }
        Ok(())
    }

    fn interrupt_waiter(&mut self, line: u32) -> Option<Box<dyn InterruptWaiter>> {
        // the kernel interface carries exactly one interrupt per device
        if line != 0 {
            return None;
        }
        let file = self.file.as_ref()?.try_clone().ok()?;
        Some(Box::new(UioWaiter {
            file,
            last_count: None,
        }))
    }
}

struct UioWaiter {
    file: File,
    last_count: Option<u32>,
}

impl InterruptWaiter for UioWaiter {
    fn wait(&mut self, timeout: Duration) -> Result<u32, TransportError> {
        let borrowed_fd = self.file.as_fd();
        let mut fds = [PollFd::new(&borrowed_fd, PollFlags::POLLIN)];
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let ready = poll(&mut fds, timeout.as_millis() as i32)
            .map_err(|e| TransportError::Device(format!("poll failed: {e}")))?;
        if ready == 0 || !fds[0].revents().is_some_and(|r| r.contains(PollFlags::POLLIN)) {
            return Ok(0);
        }

        // the read yields the running event count
        let mut count_bytes = [0u8; 4];
        self.file.read_exact(&mut count_bytes)?;
        let count = u32::from_ne_bytes(count_bytes);
        // overflow-safe modulo 2^32
        let events = match self.last_count {
            Some(last) => count.wrapping_sub(last),
            None => 1,
        };
        self.last_count = Some(count);

        // writing 1 re-arms the interrupt
        self.file.write_all(&1u32.to_ne_bytes())?;

        if events > 1 {
            log::debug!("uio: {} interrupt events since last wait", events);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sysfs_hex() {
        assert_eq!(parse_sysfs_hex("0x1000\n"), Some(0x1000));
        assert_eq!(parse_sysfs_hex("0X20"), Some(0x20));
        assert_eq!(parse_sysfs_hex("  2000 \n"), Some(0x2000));
        assert_eq!(parse_sysfs_hex("bogus"), None);
    }

    #[test]
    fn test_event_counter_delta() {
        // wrapping difference handles the 2^32 rollover
        assert_eq!(3u32.wrapping_sub(u32::MAX), 4);
    }
}
