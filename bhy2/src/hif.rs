// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! The command and parameter protocol spoken over the host interface channels.
//!
//! Everything the host asks of the hub is a *command*: a 4 byte header (opcode and length,
//! little-endian) followed by the payload, written to the command channel and padded out to a
//! multiple of four bytes. Writing a parameter is a command whose opcode is the parameter ID.
//! Reading a parameter is a zero length command with [`PARAMETER_READ_FLAG`] set, answered on the
//! status channel with a status header (code and length) and the parameter contents.
//!
//! The status channel can also deliver status records asynchronously, like a FIFO. Parameter
//! reads need it to be synchronous, so [`HostInterface::with_sync_status`] switches it over for
//! the duration of an exchange.
use arrayvec::ArrayVec;
use embedded_hal::blocking::delay::DelayUs;
use log::{debug, trace, warn};

use crate::error::{Error, LibraryError};
use crate::fifo::{FifoBuffer, FifoType};
use crate::interface::Interface;
use crate::register::{Address, HostInterfaceControl, InterruptStatus, Register};
use crate::util::align_to_word;

/// The most bytes the first transfer of a command can carry, header included.
pub const COMMAND_PACKET_LEN: usize = 256;

/// Length of the command and status headers.
pub const COMMAND_HEADER_LEN: usize = 4;

/// How many times the interrupt status is checked for a status response before giving up.
pub const STATUS_READY_RETRIES: u32 = 100;

/// Time between status response checks.
pub const STATUS_READY_INTERVAL_US: u32 = 10_000;

/// The most bytes dropped per read when discarding an unwanted status payload.
const STATUS_DISCARD_CHUNK_LEN: usize = 64;

/// Set on a parameter ID to read the parameter instead of writing it.
pub const PARAMETER_READ_FLAG: u16 = 0x1000;

/// Command opcodes.
pub mod command {
    /// Upload firmware to program RAM. The length field is in 32-bit words, not bytes.
    pub const UPLOAD_TO_PROGRAM_RAM: u16 = 0x0002;
    pub const BOOT_PROGRAM_RAM: u16 = 0x0003;
    pub const ERASE_FLASH: u16 = 0x0004;
    pub const WRITE_FLASH: u16 = 0x0005;
    pub const BOOT_FLASH: u16 = 0x0006;
    pub const FIFO_FLUSH: u16 = 0x0009;
    pub const REQUEST_SELF_TEST: u16 = 0x000B;
    pub const REQUEST_FOC: u16 = 0x000C;
    pub const CONFIGURE_SENSOR: u16 = 0x000D;
}

/// Parameter IDs.
pub mod parameter {
    pub const FIRMWARE_VERSION: u16 = 0x0102;
    pub const FIFO_CONTROL: u16 = 0x0103;
    pub const META_EVENT_CONTROL_NON_WAKE_UP: u16 = 0x0104;
    pub const META_EVENT_CONTROL_WAKE_UP: u16 = 0x0105;
    pub const VIRTUAL_SENSOR_PRESENT: u16 = 0x011F;
    /// Add the sensor ID.
    pub const SENSOR_INFO_BASE: u16 = 0x0300;
    /// Add the sensor ID.
    pub const SENSOR_CONFIG_BASE: u16 = 0x0500;
    /// Add the physical sensor ID.
    pub const PHYSICAL_SENSOR_CONTROL_BASE: u16 = 0x0E00;
}

/// Codes of the status records sent in response to commands.
pub mod status_code {
    pub const SELF_TEST_RESULT: u16 = 0x0006;
    pub const FOC_RESULT: u16 = 0x0007;
    pub const FLASH_ERASE_COMPLETE: u16 = 0x000A;
    pub const FLASH_WRITE_COMPLETE: u16 = 0x000B;
}

/// Set on a sensor control code to read the value instead of writing it.
const SENSOR_CONTROL_READ_FLAG: u8 = 0x80;

/// Move up to `cap - packet.len()` bytes from the front of `source` onto the end of `packet`.
fn fill_packet(packet: &mut ArrayVec<u8, COMMAND_PACKET_LEN>, source: &mut &[u8], cap: usize) {
    let count = cap.saturating_sub(packet.len()).min(source.len());
    let (taken, rest) = source.split_at(count);
    // cap never exceeds COMMAND_PACKET_LEN, so this always fits
    packet.extend(taken.iter().copied());
    *source = rest;
}

/// The host interface to a sensor hub.
///
/// This is the low-level API: it knows how to frame commands, exchange parameters and pull bytes
/// out of the FIFOs, but nothing about what those bytes mean. Most users want [`Bhy2`][crate::Bhy2]
/// instead.
#[derive(Clone, Debug)]
pub struct HostInterface<IF, D> {
    interface: IF,
    delay: D,
    /// The most bytes moved in a single transfer, always a multiple of four.
    max_transfer: usize,
}

impl<IF, D> HostInterface<IF, D>
where
    IF: Interface,
    D: DelayUs<u32>,
{
    /// Create a host interface.
    ///
    /// `max_transfer_len` is the largest single read or write the bus can do, and is rounded down
    /// to a multiple of four.
    pub fn new(interface: IF, delay: D, max_transfer_len: usize) -> Result<Self, Error<IF>> {
        let max_transfer = max_transfer_len & !3;
        if max_transfer == 0 {
            return Err(LibraryError::InvalidParam("maximum transfer length must be at least 4").into());
        }
        Ok(Self {
            interface,
            delay,
            max_transfer,
        })
    }

    /// Give back the interface and delay.
    pub fn release(self) -> (IF, D) {
        (self.interface, self.delay)
    }

    pub fn max_transfer_len(&self) -> usize {
        self.max_transfer
    }

    pub fn delay_us(&mut self, us: u32) {
        self.delay.delay_us(us)
    }

    /// Read bytes starting at a register, split into multiple transfers as needed.
    ///
    /// The channels don't auto-increment, so every transfer from one reads the same register.
    /// Every other register does, so later transfers start further along the register file.
    pub fn read_registers(&mut self, address: Address, buffer: &mut [u8]) -> Result<(), Error<IF>> {
        let base = u8::from(address);
        let is_channel = base <= u8::from(Address::StatusChannel);
        let mut offset = 0usize;
        for chunk in buffer.chunks_mut(self.max_transfer) {
            let register = if is_channel {
                base
            } else {
                base.wrapping_add(offset as u8)
            };
            trace!("Reading {} bytes from {:#04X}", chunk.len(), register);
            self.interface
                .read_registers(register, chunk)
                .map_err(Error::BusError)?;
            offset += chunk.len();
        }
        Ok(())
    }

    /// Write bytes starting at a register.
    pub fn write_registers(&mut self, address: Address, data: &[u8]) -> Result<(), Error<IF>> {
        trace!("Writing {} bytes to {:?}", data.len(), address);
        self.interface
            .write_registers(address.into(), data)
            .map_err(Error::BusError)
    }

    pub fn read_register<R: Register>(&mut self) -> Result<R, Error<IF>> {
        let mut value = [0u8];
        self.read_registers(R::address(), &mut value)?;
        Ok(R::from(value[0]))
    }

    pub fn write_register<R: Register>(&mut self, register: R) -> Result<(), Error<IF>> {
        let value: u8 = register.into();
        self.write_registers(R::address(), &[value])
    }

    pub fn interrupt_status(&mut self) -> Result<InterruptStatus, Error<IF>> {
        self.read_register()
    }

    /// Execute a command with the given payload.
    pub fn execute_command(&mut self, opcode: u16, payload: &[u8]) -> Result<(), Error<IF>> {
        self.execute_command_with(opcode, &[], payload, None)
    }

    /// Execute a command, with some extra control over the framing.
    ///
    /// `prefix` is sent between the header and `payload` (the flash address of a flash write, for
    /// example). If `declared_len` is given, the header claims that many bytes instead of the
    /// prefix and payload length. The rest of the command is then expected to follow with
    /// [`write_command_data`][HostInterface::write_command_data].
    pub fn execute_command_with(
        &mut self,
        opcode: u16,
        prefix: &[u8],
        payload: &[u8],
        declared_len: Option<usize>,
    ) -> Result<(), Error<IF>> {
        let natural_len = prefix.len() + payload.len();
        let total_len = align_to_word(declared_len.unwrap_or(natural_len));
        let header_len = if opcode == command::UPLOAD_TO_PROGRAM_RAM {
            total_len / 4
        } else {
            total_len
        };
        if header_len > u16::MAX as usize {
            return Err(LibraryError::InvalidParam("command is too long").into());
        }
        debug!(
            "Executing command {:#06X} ({} bytes, {} declared)",
            opcode, natural_len, total_len
        );
        let mut packet: ArrayVec<u8, COMMAND_PACKET_LEN> = ArrayVec::new();
        packet.extend(opcode.to_le_bytes());
        packet.extend((header_len as u16).to_le_bytes());
        let cap = self.max_transfer.min(COMMAND_PACKET_LEN);
        let mut prefix = prefix;
        let mut payload = payload;
        // The header and prefix go out through the packet buffer; once the prefix has been sent,
        // the payload is written straight from the caller's slice.
        loop {
            fill_packet(&mut packet, &mut prefix, cap);
            fill_packet(&mut packet, &mut payload, cap);
            if prefix.is_empty() && payload.is_empty() {
                while packet.len() % 4 != 0 {
                    packet.push(0);
                }
            }
            self.write_registers(Address::CommandChannel, &packet)?;
            packet.clear();
            if prefix.is_empty() {
                break;
            }
        }
        self.write_command_data(payload)
    }

    /// Write raw bytes to the command channel, padding the end out to a multiple of four.
    ///
    /// This is for continuing a command started with a larger declared length.
    pub fn write_command_data(&mut self, data: &[u8]) -> Result<(), Error<IF>> {
        let aligned = data.len() & !3;
        let (body, tail) = data.split_at(aligned);
        for chunk in body.chunks(self.max_transfer) {
            self.write_registers(Address::CommandChannel, chunk)?;
        }
        if !tail.is_empty() {
            let mut word = [0u8; 4];
            word[..tail.len()].copy_from_slice(tail);
            self.write_registers(Address::CommandChannel, &word)?;
        }
        Ok(())
    }

    /// Run `f` with the status channel in synchronous mode.
    ///
    /// If the status channel was asynchronous it's switched back afterwards, whether or not `f`
    /// succeeded.
    pub fn with_sync_status<T, F>(&mut self, f: F) -> Result<T, Error<IF>>
    where
        F: FnOnce(&mut Self) -> Result<T, Error<IF>>,
    {
        let control: HostInterfaceControl = self.read_register()?;
        let was_async = control.async_status_channel();
        if was_async {
            let mut sync_control = control;
            sync_control.set_async_status_channel(false);
            self.write_register(sync_control)?;
        }
        let result = f(self);
        if was_async {
            let restored = self.write_register(control);
            // An error from `f` is more interesting than one from restoring the register
            return result.and_then(|value| restored.map(|_| value));
        }
        result
    }

    /// Poll the interrupt status until a status response is ready.
    ///
    /// The status is checked `retries` times, [`STATUS_READY_INTERVAL_US`] apart.
    pub fn wait_status_ready(&mut self, retries: u32) -> Result<(), Error<IF>> {
        for _ in 0..retries {
            if self.interrupt_status()?.status_ready() {
                return Ok(());
            }
            self.delay.delay_us(STATUS_READY_INTERVAL_US);
        }
        warn!("Timed out waiting for a status response");
        Err(LibraryError::Timeout.into())
    }

    /// Read a status header from the status channel, returning the code and payload length.
    pub fn read_status_header(&mut self) -> Result<(u16, usize), Error<IF>> {
        let mut header = [0u8; COMMAND_HEADER_LEN];
        self.read_registers(Address::StatusChannel, &mut header)?;
        let code = u16::from_le_bytes([header[0], header[1]]);
        let length = u16::from_le_bytes([header[2], header[3]]) as usize;
        trace!("Status {:#06X} with {} bytes", code, length);
        Ok((code, length))
    }

    /// Read `length` bytes of status payload into the start of `buffer`.
    ///
    /// A payload that doesn't fit is drained from the status channel and dropped.
    pub fn read_status_payload(
        &mut self,
        length: usize,
        buffer: &mut [u8],
    ) -> Result<usize, Error<IF>> {
        if length > buffer.len() {
            self.discard_status_payload(length)?;
            return Err(LibraryError::BufferTooSmall.into());
        }
        if length > 0 {
            self.read_registers(Address::StatusChannel, &mut buffer[..length])?;
        }
        Ok(length)
    }

    /// Read and drop `length` bytes of status payload, so the next read starts on a header.
    pub fn discard_status_payload(&mut self, length: usize) -> Result<(), Error<IF>> {
        if length > 0 {
            debug!("Discarding {} bytes of status payload", length);
        }
        let mut scratch = [0u8; STATUS_DISCARD_CHUNK_LEN];
        let piece_len = self.max_transfer.min(STATUS_DISCARD_CHUNK_LEN);
        let mut remaining = length;
        while remaining > 0 {
            let count = remaining.min(piece_len);
            self.read_registers(Address::StatusChannel, &mut scratch[..count])?;
            remaining -= count;
        }
        Ok(())
    }

    /// Execute a command and wait for the status response to it.
    ///
    /// The response must have the `expected` status code, and its payload is copied into
    /// `response`. Up to `retries` polls are made for the response.
    pub fn command_with_status(
        &mut self,
        opcode: u16,
        prefix: &[u8],
        payload: &[u8],
        expected: u16,
        retries: u32,
        response: &mut [u8],
    ) -> Result<usize, Error<IF>> {
        self.with_sync_status(|hif| {
            hif.execute_command_with(opcode, prefix, payload, None)?;
            hif.wait_status_ready(retries)?;
            let (code, length) = hif.read_status_header()?;
            if code != expected {
                warn!(
                    "Command {:#06X} answered with status {:#06X}, expected {:#06X}",
                    opcode, code, expected
                );
                hif.discard_status_payload(length)?;
                return Err(LibraryError::Timeout.into());
            }
            hif.read_status_payload(length, response)
        })
    }

    /// Request a parameter and read the status header of the response.
    ///
    /// The caller has to be holding the status channel in synchronous mode.
    fn request_parameter(&mut self, parameter: u16) -> Result<(u16, usize), Error<IF>> {
        self.execute_command(parameter | PARAMETER_READ_FLAG, &[])?;
        self.wait_status_ready(STATUS_READY_RETRIES)?;
        self.read_status_header()
    }

    /// Read a parameter into the start of `buffer`, returning its length.
    pub fn get_parameter(&mut self, parameter: u16, buffer: &mut [u8]) -> Result<usize, Error<IF>> {
        debug!("Reading parameter {:#06X}", parameter);
        self.with_sync_status(|hif| {
            let (code, length) = hif.request_parameter(parameter)?;
            if code != parameter {
                warn!(
                    "Parameter {:#06X} answered with status {:#06X}",
                    parameter, code
                );
                hif.discard_status_payload(length)?;
                return Err(LibraryError::Timeout.into());
            }
            hif.read_status_payload(length, buffer)
        })
    }

    /// Write a parameter.
    pub fn set_parameter(&mut self, parameter: u16, payload: &[u8]) -> Result<(), Error<IF>> {
        debug!("Writing {} bytes to parameter {:#06X}", payload.len(), parameter);
        self.execute_command(parameter, payload)
    }

    /// Write a physical sensor control value.
    pub fn set_sensor_control(
        &mut self,
        sensor_id: u8,
        code: u8,
        data: &[u8],
    ) -> Result<(), Error<IF>> {
        let parameter = parameter::PHYSICAL_SENSOR_CONTROL_BASE + sensor_id as u16;
        self.execute_command_with(parameter, &[code & !SENSOR_CONTROL_READ_FLAG], data, None)
    }

    /// Read a physical sensor control value into `buffer`, returning its length.
    ///
    /// The echoed control code is not included in `buffer`.
    pub fn get_sensor_control(
        &mut self,
        sensor_id: u8,
        code: u8,
        buffer: &mut [u8],
    ) -> Result<usize, Error<IF>> {
        let parameter = parameter::PHYSICAL_SENSOR_CONTROL_BASE + sensor_id as u16;
        let request = [code | SENSOR_CONTROL_READ_FLAG, 0, 0, 0];
        self.set_parameter(parameter, &request)?;
        self.with_sync_status(|hif| {
            let (echoed, length) = hif.request_parameter(parameter)?;
            if echoed != parameter {
                warn!(
                    "Sensor control {:#06X} answered with status {:#06X}",
                    parameter, echoed
                );
                hif.discard_status_payload(length)?;
                return Err(LibraryError::InvalidParam("sensor control parameter mismatch").into());
            }
            if length == 0 {
                return Err(LibraryError::InvalidParam("sensor control code mismatch").into());
            }
            let mut echoed_code = [0u8];
            hif.read_registers(Address::StatusChannel, &mut echoed_code)?;
            if echoed_code[0] & !SENSOR_CONTROL_READ_FLAG != code & !SENSOR_CONTROL_READ_FLAG {
                warn!(
                    "Sensor control code {:#04X} answered with {:#04X}",
                    code, echoed_code[0]
                );
                hif.discard_status_payload(length - 1)?;
                return Err(LibraryError::InvalidParam("sensor control code mismatch").into());
            }
            hif.read_status_payload(length - 1, buffer)
        })
    }

    /// Read as much of a FIFO as fits into the free space of `buffer`.
    ///
    /// The hub reports how many bytes are waiting when the previous batch has been read
    /// completely, and whatever doesn't fit is left in [remain_length][FifoBuffer::remain_length]
    /// for the next call. Returns how many bytes were read.
    pub fn fetch_fifo(
        &mut self,
        fifo_type: FifoType,
        buffer: &mut FifoBuffer<'_>,
    ) -> Result<usize, Error<IF>> {
        let channel = fifo_type.channel();
        if buffer.remain_length() == 0 {
            let mut available = [0u8; 2];
            self.read_registers(channel, &mut available)?;
            let available = u16::from_le_bytes(available) as usize;
            trace!("{} bytes waiting in the {:?} FIFO", available, fifo_type);
            buffer.set_remain_length(available);
        }
        let remain = buffer.remain_length();
        if remain == 0 {
            return Ok(0);
        }
        let free = buffer.free_space();
        if free.is_empty() {
            return Err(LibraryError::BufferTooSmall.into());
        }
        let count = remain.min(free.len());
        self.read_registers(channel, &mut free[..count])?;
        buffer.commit(count);
        buffer.set_remain_length(remain - count);
        Ok(count)
    }
}
