//! Synchronous register accessors: typed views over one address window,
//! composed from a catalogue entry and a codec.
//!
//! Accessors hold a weak pointer to the owning device core: the device stays
//! the owner, accessors only borrow it for transfers.

use crate::codec::{Codec, Cooked};
use crate::device::DeviceShared;
use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::types::{AccessFlags, DataValidity, VersionNumber};
use mapdev_utils::catalogue::{DataType, RegisterInfo};
use std::any::TypeId;
use std::sync::{Arc, Weak};

/// The value block of one accessor: `[channels][elements]` plus the version
/// stamp and validity flag of the last transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer<U> {
    pub value: Vec<Vec<U>>,
    pub version: VersionNumber,
    pub validity: DataValidity,
}

impl<U: Clone + Default> Buffer<U> {
    #[must_use]
    pub fn new(n_channels: usize, n_elements: usize) -> Self {
        Buffer {
            value: vec![vec![U::default(); n_elements]; n_channels],
            version: VersionNumber::ZERO,
            validity: DataValidity::Ok,
        }
    }
}

/// Byte position of one channel word inside a 2-D block.
#[derive(Debug, Clone, Copy)]
struct ChannelSpan {
    byte_offset: usize,
    n_bytes: usize,
}

#[derive(Debug)]
enum Kind {
    /// Scalar or 1-D numeric window. `codec` is `None` in raw mode.
    Numeric { codec: Option<Codec> },
    /// Fixed-size NUL-padded text.
    Ascii,
    /// 2-D multiplexed area, demultiplexed channel-major.
    Muxed {
        codecs: Vec<Codec>,
        spans: Vec<ChannelSpan>,
    },
}

/// A typed synchronous accessor over one register.
#[derive(Debug)]
pub struct RegisterAccessor<U: Cooked, T: Transport> {
    device: Weak<DeviceShared<T>>,
    info: RegisterInfo,
    kind: Kind,
    /// Resolved transfer window.
    address: u64,
    n_words: usize,
    raw: Vec<i32>,
    buffer: Buffer<U>,
}

impl<U: Cooked, T: Transport> RegisterAccessor<U, T> {
    pub(crate) fn new(
        device: &Arc<DeviceShared<T>>,
        info: RegisterInfo,
        n_elements: usize,
        offset_words: usize,
        flags: AccessFlags,
    ) -> Result<Self> {
        if flags.raw {
            if TypeId::of::<U>() != TypeId::of::<i32>() {
                return Err(Error::logic(format!(
                    "raw access of register `{}` requires the i32 user type",
                    info.path
                )));
            }
            if info.is_2d() || info.data_type() == DataType::Ascii {
                return Err(Error::logic(format!(
                    "register `{}` does not support raw access",
                    info.path
                )));
            }
        }

        let register = info.path.to_string();
        let (kind, address, n_words, n_channels, n_per_channel) = match info.data_type() {
            DataType::Ascii => {
                if TypeId::of::<U>() != TypeId::of::<String>() {
                    return Err(Error::logic(format!(
                        "ASCII register `{register}` must be read with the string user type"
                    )));
                }
                if n_elements > 1 || offset_words != 0 {
                    return Err(Error::logic(format!(
                        "ASCII register `{register}` is a single text element"
                    )));
                }
                let n_words = (info.n_bytes as usize).div_ceil(4);
                (Kind::Ascii, info.address, n_words, 1, 1)
            }
            _ if info.is_2d() => {
                if n_elements != 0 || offset_words != 0 {
                    return Err(Error::logic(format!(
                        "2D register `{register}` only supports full-size access"
                    )));
                }
                let (codecs, spans) = muxed_layout(&info)?;
                let n_bytes = (info.n_blocks * info.bytes_per_block) as usize;
                (
                    Kind::Muxed { codecs, spans },
                    info.address,
                    n_bytes.div_ceil(4),
                    info.channels.len(),
                    info.n_blocks as usize,
                )
            }
            _ => {
                // scalar, 1-D and VOID registers; raw words are one 32-bit
                // word per element
                if info.data_type() != DataType::Void && info.n_bytes != 4 * info.n_elements {
                    return Err(Error::logic(format!(
                        "register `{register}` does not pack its elements into 32-bit words"
                    )));
                }
                let total = info.n_elements as usize;
                let n = if n_elements == 0 {
                    total.saturating_sub(offset_words)
                } else {
                    n_elements
                };
                if info.data_type() == DataType::Void {
                    if n_elements > 1 || offset_words != 0 {
                        return Err(Error::logic(format!(
                            "VOID register `{register}` has no addressable elements"
                        )));
                    }
                } else if offset_words + n > total || n == 0 {
                    return Err(Error::logic(format!(
                        "requested window [{offset_words}, {}) exceeds register `{register}` with {total} elements",
                        offset_words + n
                    )));
                }
                let codec = if flags.raw {
                    None
                } else {
                    Some(Codec::for_channel(&register, &info.channels[0])?)
                };
                let (address, n_words, n_cooked) = if info.data_type() == DataType::Void {
                    (0, 0, 1)
                } else {
                    (info.address + 4 * offset_words as u64, n, n)
                };
                (Kind::Numeric { codec }, address, n_words, 1, n_cooked)
            }
        };

        Ok(RegisterAccessor {
            device: Arc::downgrade(device),
            info,
            kind,
            address,
            n_words,
            raw: vec![0; n_words],
            buffer: Buffer::new(n_channels, n_per_channel),
        })
    }

    fn device(&self) -> Result<Arc<DeviceShared<T>>> {
        self.device
            .upgrade()
            .ok_or_else(|| Error::runtime("the device owning this accessor is gone"))
    }

    /// Reads from the device and decodes into the cooked buffer.
    ///
    /// # Errors
    /// [`Error::Logic`] when the register is not readable or the device is
    /// closed; [`Error::Runtime`] on transport faults (the device-wide
    /// exception path has then already been triggered).
    pub fn read(&mut self) -> Result<()> {
        let shared = self.device()?;
        shared.check_transfer()?;
        let transport = Arc::clone(shared.transport());
        let mut guard = transport.lock().unwrap();
        self.read_with(&shared, &mut guard)
    }

    /// Encodes the cooked buffer and writes it to the device.
    ///
    /// # Errors
    /// [`Error::Logic`] when the register is not writeable or a value cannot
    /// be encoded; [`Error::Runtime`] on transport faults.
    pub fn write(&mut self) -> Result<()> {
        if !self.info.is_writeable() {
            return Err(Error::logic(format!(
                "register `{}` is not writeable",
                self.info.path
            )));
        }
        if self.info.data_type() == DataType::Void {
            // a trigger register carries no data: accept the write as a no-op
            self.buffer.version = VersionNumber::new();
            return Ok(());
        }
        let shared = self.device()?;
        self.encode()?;
        shared.check_transfer()?;
        let transport = Arc::clone(shared.transport());
        let mut guard = transport.lock().unwrap();
        match shared.write_words_with(&mut guard, self.info.bar, self.address, &self.raw) {
            Ok(()) => {
                self.buffer.version = VersionNumber::new();
                Ok(())
            }
            Err(e) => {
                self.buffer.validity = DataValidity::Faulty;
                Err(e)
            }
        }
    }

    /// Transfer + decode against an already locked transport; used by the
    /// coherent group read of the poll distributors.
    pub(crate) fn read_with(&mut self, shared: &DeviceShared<T>, transport: &mut T) -> Result<()> {
        if !self.info.is_readable() {
            return Err(Error::logic(format!(
                "register `{}` is not readable",
                self.info.path
            )));
        }
        if self.n_words > 0 {
            if let Err(e) =
                shared.read_words_with(transport, self.info.bar, self.address, &mut self.raw)
            {
                self.buffer.validity = DataValidity::Faulty;
                return Err(e);
            }
        }
        self.decode()?;
        self.buffer.version = VersionNumber::new();
        self.buffer.validity = DataValidity::Ok;
        Ok(())
    }

    fn decode(&mut self) -> Result<()> {
        match &self.kind {
            Kind::Numeric { codec } => {
                if self.n_words == 0 {
                    // VOID: there is no payload, only the trigger itself
                    self.buffer.value[0][0] = match codec {
                        Some(c) => c.to_cooked(0)?,
                        None => U::default(),
                    };
                } else {
                    for (i, word) in self.raw.iter().enumerate() {
                        self.buffer.value[0][i] = match codec {
                            Some(c) => c.to_cooked(*word)?,
                            None => U::from_f64(f64::from(*word), "")?,
                        };
                    }
                }
            }
            Kind::Ascii => {
                let bytes = words_to_bytes(&self.raw, self.info.n_bytes as usize);
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                let text = String::from_utf8_lossy(&bytes[..end]).into_owned();
                self.buffer.value[0][0] =
                    U::from_text(text).expect("construction guarantees the string type");
            }
            Kind::Muxed { codecs, spans } => {
                let n_bytes = (self.info.n_blocks * self.info.bytes_per_block) as usize;
                let bytes = words_to_bytes(&self.raw, n_bytes);
                let bpb = self.info.bytes_per_block as usize;
                for (c, (codec, span)) in codecs.iter().zip(spans).enumerate() {
                    for b in 0..self.info.n_blocks as usize {
                        let at = b * bpb + span.byte_offset;
                        let word = load_le(&bytes[at..at + span.n_bytes]);
                        self.buffer.value[c][b] = codec.to_cooked(word)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn encode(&mut self) -> Result<()> {
        match &self.kind {
            Kind::Numeric { codec } => {
                for (i, cooked) in self.buffer.value[0].iter().enumerate() {
                    self.raw[i] = match codec {
                        Some(c) => c.to_raw(cooked)?,
                        #[allow(clippy::cast_possible_truncation)]
                        None => cooked.to_f64("")? as i32,
                    };
                }
            }
            Kind::Ascii => {
                let text = self.buffer.value[0][0]
                    .as_text()
                    .expect("construction guarantees the string type");
                let n_bytes = self.info.n_bytes as usize;
                if text.len() > n_bytes {
                    return Err(Error::logic(format!(
                        "text of {} bytes does not fit ASCII register `{}` of {n_bytes} bytes",
                        text.len(),
                        self.info.path
                    )));
                }
                let mut bytes = vec![0u8; self.n_words * 4];
                bytes[..text.len()].copy_from_slice(text.as_bytes());
                bytes_to_words(&bytes, &mut self.raw);
            }
            Kind::Muxed { codecs, spans } => {
                let bpb = self.info.bytes_per_block as usize;
                let mut bytes = vec![0u8; self.n_words * 4];
                for (c, (codec, span)) in codecs.iter().zip(spans).enumerate() {
                    for b in 0..self.info.n_blocks as usize {
                        let word = codec.to_raw(&self.buffer.value[c][b])?;
                        let at = b * bpb + span.byte_offset;
                        store_le(&mut bytes[at..at + span.n_bytes], word);
                    }
                }
                bytes_to_words(&bytes, &mut self.raw);
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &mapdev_utils::path::RegisterPath {
        &self.info.path
    }

    #[must_use]
    pub fn n_channels(&self) -> usize {
        self.buffer.value.len()
    }

    #[must_use]
    pub fn n_elements(&self) -> usize {
        self.buffer.value[0].len()
    }

    #[must_use]
    pub fn version(&self) -> VersionNumber {
        self.buffer.version
    }

    #[must_use]
    pub fn validity(&self) -> DataValidity {
        self.buffer.validity
    }

    #[must_use]
    pub fn is_writeable(&self) -> bool {
        self.info.is_writeable()
    }

    /// Channel 0 of the cooked buffer (the whole buffer for 1-D registers).
    #[must_use]
    pub fn as_slice(&self) -> &[U] {
        &self.buffer.value[0]
    }

    pub fn as_mut_slice(&mut self) -> &mut [U] {
        &mut self.buffer.value[0]
    }

    /// One channel of a 2-D register.
    #[must_use]
    pub fn channel(&self, channel: usize) -> &[U] {
        &self.buffer.value[channel]
    }

    pub fn channel_mut(&mut self, channel: usize) -> &mut [U] {
        &mut self.buffer.value[channel]
    }

    pub fn set(&mut self, value: U) {
        self.buffer.value[0][0] = value;
    }

    #[must_use]
    pub fn get(&self) -> &U {
        &self.buffer.value[0][0]
    }

    /// The untransformed int32 window of the last transfer.
    ///
    /// # Errors
    /// [`Error::Logic`] unless the accessor was created in raw mode.
    pub fn raw_buffer(&self) -> Result<&[i32]> {
        match &self.kind {
            Kind::Numeric { codec: None } => Ok(&self.raw),
            _ => Err(Error::logic(format!(
                "register `{}` was not opened in raw mode",
                self.info.path
            ))),
        }
    }

    pub(crate) fn buffer(&self) -> &Buffer<U> {
        &self.buffer
    }

    pub(crate) fn mark_faulty(&mut self) {
        self.buffer.validity = DataValidity::Faulty;
    }
}

fn muxed_layout(info: &RegisterInfo) -> Result<(Vec<Codec>, Vec<ChannelSpan>)> {
    let register = info.path.to_string();
    let mut codecs = Vec::with_capacity(info.channels.len());
    let mut spans = Vec::with_capacity(info.channels.len());
    for (i, ch) in info.channels.iter().enumerate() {
        let end_bits = if i + 1 < info.channels.len() {
            info.channels[i + 1].bit_offset
        } else {
            info.bytes_per_block * 8
        };
        let span = ChannelSpan {
            byte_offset: (ch.bit_offset / 8) as usize,
            n_bytes: ((end_bits - ch.bit_offset) / 8) as usize,
        };
        if ch.data_type == DataType::Ieee754 && span.n_bytes != 4 {
            return Err(Error::logic(format!(
                "IEEE754 channel {i} of `{register}` must be 4 bytes wide"
            )));
        }
        codecs.push(Codec::for_channel(&register, ch)?);
        spans.push(span);
    }
    Ok((codecs, spans))
}

fn words_to_bytes(words: &[i32], n_bytes: usize) -> Vec<u8> {
    let mut bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    bytes.truncate(n_bytes);
    bytes
}

fn bytes_to_words(bytes: &[u8], words: &mut [i32]) {
    for (i, word) in words.iter_mut().enumerate() {
        let mut chunk = [0u8; 4];
        let at = i * 4;
        let n = (bytes.len() - at).min(4);
        chunk[..n].copy_from_slice(&bytes[at..at + n]);
        *word = i32::from_le_bytes(chunk);
    }
}

/// Zero-extended little-endian load of a 1, 2 or 4 byte channel word.
fn load_le(bytes: &[u8]) -> i32 {
    let mut chunk = [0u8; 4];
    chunk[..bytes.len()].copy_from_slice(bytes);
    i32::from_le_bytes(chunk)
}

fn store_le(bytes: &mut [u8], word: i32) {
    let le = word.to_le_bytes();
    bytes.copy_from_slice(&le[..bytes.len()]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::transport::mock::Mock;
    use crate::types::Void;
    use mapdev_utils::mapfile;

    const MAP: &str = "\
STATUS 1 0 4 0 32 0 1 RO
GAIN 4 0x10 0x10 0 16 3 1 RW
TEMP 1 0x20 4 0 32 IEEE754 1 RO
NAME 1 0x30 8 0 32 ASCII 0 RW
TICK 0 0 0 0 0 0 0 INTERRUPT1:2
AREA_MULTIPLEXED_SEQUENCE_MUX 8 0x40 32 0
SEQUENCE_MUX_0 1 0x40 2 0 16 0 0
SEQUENCE_MUX_1 1 0x42 2 0 16 0 1
";

    fn device() -> Device<Mock> {
        let (catalogue, metadata) = mapfile::parse_str("test.map", MAP).unwrap();
        let transport = Mock::new(&catalogue);
        let dev = Device::with_catalogue(transport, catalogue, metadata).unwrap();
        dev.open().unwrap();
        dev
    }

    #[test]
    fn test_fixed_point_write_and_readback() {
        let dev = device();
        let mut gain = dev
            .accessor::<f64>("GAIN", 0, 0, AccessFlags::default())
            .unwrap();
        gain.as_mut_slice()
            .copy_from_slice(&[1.0, -1.0, 0.5, 2047.875]);
        gain.write().unwrap();

        // 16 bit two's complement patterns in the low half of each word
        let raw = dev.transport().lock().unwrap().peek(0, 0x10, 4);
        assert_eq!(raw, [8, 0xFFF8, 4, 16383]);

        let mut back = dev
            .accessor::<f64>("GAIN", 0, 0, AccessFlags::default())
            .unwrap();
        back.read().unwrap();
        assert_eq!(back.as_slice(), [1.0, -1.0, 0.5, 2047.875]);
        assert_eq!(back.validity(), DataValidity::Ok);
        assert!(back.version() > VersionNumber::ZERO);
    }

    #[test]
    fn test_window_with_offset() {
        let dev = device();
        dev.transport()
            .lock()
            .unwrap()
            .poke(0, 0x10, &[8, 16, 24, 32]);
        let mut gain = dev
            .accessor::<f64>("GAIN", 2, 2, AccessFlags::default())
            .unwrap();
        gain.read().unwrap();
        assert_eq!(gain.as_slice(), [3.0, 4.0]);

        assert!(dev
            .accessor::<f64>("GAIN", 3, 2, AccessFlags::default())
            .is_err());
    }

    #[test]
    fn test_ieee754_register() {
        let dev = device();
        #[allow(clippy::cast_possible_wrap)]
        dev.transport()
            .lock()
            .unwrap()
            .poke(0, 0x20, &[2.5f32.to_bits() as i32]);
        let mut temp = dev
            .accessor::<f32>("TEMP", 0, 0, AccessFlags::default())
            .unwrap();
        temp.read().unwrap();
        assert_eq!(*temp.get(), 2.5);

        // read-only register rejects writes
        assert!(matches!(temp.write(), Err(Error::Logic(_))));
    }

    #[test]
    fn test_raw_mode() {
        let dev = device();
        dev.transport().lock().unwrap().poke(0, 0x10, &[12, 0, 0, 0]);

        let mut raw = dev
            .accessor::<i32>("GAIN", 0, 0, AccessFlags::raw())
            .unwrap();
        raw.read().unwrap();
        // no fixed-point conversion in raw mode
        assert_eq!(raw.as_slice()[0], 12);
        assert_eq!(raw.raw_buffer().unwrap()[0], 12);

        raw.as_mut_slice()[1] = 0x7FFF;
        raw.write().unwrap();
        assert_eq!(dev.transport().lock().unwrap().peek(0, 0x14, 1), [0x7FFF]);

        // raw mode is i32 only, and only for numeric registers
        assert!(dev.accessor::<f64>("GAIN", 0, 0, AccessFlags::raw()).is_err());
        assert!(dev.accessor::<i32>("NAME", 0, 0, AccessFlags::raw()).is_err());
        assert!(dev.accessor::<i32>("MUX", 0, 0, AccessFlags::raw()).is_err());
        // and raw_buffer is only available in raw mode
        let cooked = dev
            .accessor::<f64>("GAIN", 0, 0, AccessFlags::default())
            .unwrap();
        assert!(cooked.raw_buffer().is_err());
    }

    #[test]
    fn test_ascii_register() {
        let dev = device();
        let mut name = dev
            .accessor::<String>("NAME", 0, 0, AccessFlags::default())
            .unwrap();
        name.set("HI".to_string());
        name.write().unwrap();

        let raw = dev.transport().lock().unwrap().peek(0, 0x30, 2);
        assert_eq!(raw, [i32::from_le_bytes([b'H', b'I', 0, 0]), 0]);

        let mut back = dev
            .accessor::<String>("NAME", 0, 0, AccessFlags::default())
            .unwrap();
        back.read().unwrap();
        assert_eq!(back.get(), "HI");

        // non-string user types are rejected
        assert!(dev.accessor::<i32>("NAME", 0, 0, AccessFlags::default()).is_err());
        // oversize text does not fit
        name.set("far too long for eight".to_string());
        assert!(name.write().is_err());
    }

    #[test]
    fn test_2d_demultiplexing() {
        let dev = device();
        // block b: channel 0 (u16) in the low half, channel 1 (s16) in the
        // high half
        let words: Vec<i32> = (0..8)
            .map(|b| {
                let ch0 = (100 + b) as u32;
                let ch1 = (-b) as i16;
                #[allow(clippy::cast_possible_wrap)]
                {
                    (ch0 | ((ch1 as u16 as u32) << 16)) as i32
                }
            })
            .collect();
        dev.transport().lock().unwrap().poke(0, 0x40, &words);

        let mut mux = dev
            .accessor::<i32>("MUX", 0, 0, AccessFlags::default())
            .unwrap();
        mux.read().unwrap();
        assert_eq!(mux.n_channels(), 2);
        assert_eq!(mux.n_elements(), 8);
        assert_eq!(mux.channel(0)[3], 103);
        assert_eq!(mux.channel(1)[3], -3);

        // multiplex on write
        mux.channel_mut(0)[3] = 999;
        mux.channel_mut(1)[3] = -999;
        mux.write().unwrap();
        let block3 = dev.transport().lock().unwrap().peek(0, 0x40 + 12, 1)[0];
        assert_eq!(block3 & 0xFFFF, 999);
        assert_eq!((block3 >> 16) as i16, -999);

        // the companion raw view covers the same bytes as flat int32
        let mut flat = dev
            .accessor::<i32>("MUX/MULTIPLEXED_RAW", 0, 0, AccessFlags::default())
            .unwrap();
        flat.read().unwrap();
        assert_eq!(flat.as_slice()[0], words[0]);
    }

    #[test]
    fn test_numeric_bar_address() {
        let dev = device();
        dev.transport().lock().unwrap().poke(0, 0x10, &[5, 6]);
        let mut window = dev
            .accessor::<i32>("BAR/0/16*8", 0, 0, AccessFlags::default())
            .unwrap();
        window.read().unwrap();
        assert_eq!(window.as_slice(), [5, 6]);

        window.as_mut_slice()[0] = 9;
        window.write().unwrap();
        assert_eq!(dev.transport().lock().unwrap().peek(0, 0x10, 1), [9]);
    }

    #[test]
    fn test_void_register_write_is_noop() {
        let dev = device();
        let mut tick = dev
            .accessor::<Void>("TICK", 0, 0, AccessFlags::default())
            .unwrap();
        tick.write().unwrap();
        let mut as_int = dev
            .accessor::<i32>("TICK", 0, 0, AccessFlags::default())
            .unwrap();
        as_int.read().unwrap();
        assert_eq!(*as_int.get(), 0);
    }

    #[test]
    fn test_one_shot_helpers() {
        let dev = device();
        dev.write_value::<f64>("GAIN", 1.5).unwrap();
        assert_eq!(dev.read_value::<f64>("GAIN").unwrap(), 1.5);
        assert_eq!(dev.transport().lock().unwrap().peek(0, 0x10, 1), [12]);

        dev.write_array::<f64>("GAIN", &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(dev.read_array::<f64>("GAIN").unwrap(), [1.0, 2.0, 3.0, 4.0]);
        assert!(dev.write_array::<f64>("GAIN", &[1.0]).is_err());

        dev.write_value::<String>("NAME", "ok".to_string()).unwrap();
        assert_eq!(dev.read_value::<String>("NAME").unwrap(), "ok");
    }

    #[test]
    fn test_unknown_register() {
        let dev = device();
        assert!(matches!(
            dev.accessor::<i32>("NO_SUCH", 0, 0, AccessFlags::default()),
            Err(Error::Logic(_))
        ));
    }

    #[test]
    fn test_closed_device_rejects_transfers() {
        let (catalogue, metadata) = mapfile::parse_str("test.map", MAP).unwrap();
        let transport = Mock::new(&catalogue);
        let dev = Device::with_catalogue(transport, catalogue, metadata).unwrap();
        let mut status = dev
            .accessor::<i32>("STATUS", 0, 0, AccessFlags::default())
            .unwrap();
        assert!(matches!(status.read(), Err(Error::Logic(_))));
    }

    #[test]
    fn test_sync_accessor_rejects_push_flag() {
        let dev = device();
        let flags = AccessFlags::wait_for_new_data();
        assert!(matches!(
            dev.accessor::<i32>("GAIN", 0, 0, flags),
            Err(Error::Logic(_))
        ));
    }

    #[test]
    fn test_transport_fault_marks_buffer_faulty() {
        let dev = device();
        let mut gain = dev
            .accessor::<f64>("GAIN", 0, 0, AccessFlags::default())
            .unwrap();
        gain.read().unwrap();
        dev.transport().lock().unwrap().set_broken(true);
        assert!(matches!(gain.read(), Err(Error::Runtime(_))));
        assert_eq!(gain.validity(), DataValidity::Faulty);
    }
}
