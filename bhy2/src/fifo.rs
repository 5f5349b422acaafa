// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Demultiplexing the FIFO byte streams into records.
//!
//! Each FIFO is a stream of records, every record starting with a sensor ID byte. The length of
//! a record isn't in the stream; it comes from the [`EventSizeTable`]. Sensor IDs from
//! [`SYSTEM_ID_THRESHOLD`] up are reserved for records the hub itself generates: timestamps, meta
//! events, debug messages and filler.
//!
//! Reads from the hub don't respect record boundaries, so a [`FifoBuffer`] keeps any trailing
//! partial record around and the next read is appended after it.
use log::{trace, warn};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::LibraryError;
use crate::register::{Address, InterruptStatus};
use crate::registry::{EventSizeTable, Registry};
use crate::util::Buffer;

/// Sensor IDs at or above this value are system records.
pub const SYSTEM_ID_THRESHOLD: u8 = 245;

/// Length of a timestamp tick, in nanoseconds (1/64 ms).
pub const TIMESTAMP_TICK_NS: u64 = 15_625;

/// The IDs of the records the hub generates itself.
pub mod system_id {
    pub const PADDING: u8 = 0;
    pub const TIMESTAMP_SMALL_DELTA_WAKE_UP: u8 = 245;
    pub const TIMESTAMP_LARGE_DELTA_WAKE_UP: u8 = 246;
    pub const TIMESTAMP_FULL_WAKE_UP: u8 = 247;
    pub const META_EVENT_WAKE_UP: u8 = 248;
    pub const RESERVED: u8 = 249;
    pub const DEBUG_MESSAGE: u8 = 250;
    pub const TIMESTAMP_SMALL_DELTA: u8 = 251;
    pub const TIMESTAMP_LARGE_DELTA: u8 = 252;
    pub const TIMESTAMP_FULL: u8 = 253;
    pub const META_EVENT: u8 = 254;
    pub const FILLER: u8 = 255;
}

/// The three FIFOs the hub exposes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FifoType {
    WakeUp = 0,
    NonWakeUp = 1,
    /// The status and debug channel, when it's in asynchronous mode.
    Status = 2,
}

impl FifoType {
    /// Every FIFO, in the order they're drained.
    pub const ALL: [FifoType; 3] = [FifoType::WakeUp, FifoType::NonWakeUp, FifoType::Status];

    pub fn from_raw(raw: u8) -> Result<Self, LibraryError> {
        Self::try_from_primitive(raw).map_err(|_| LibraryError::InvalidFifoType(raw))
    }

    /// The channel register this FIFO is read from.
    pub fn channel(self) -> Address {
        match self {
            FifoType::WakeUp => Address::WakeUpFifoChannel,
            FifoType::NonWakeUp => Address::NonWakeUpFifoChannel,
            FifoType::Status => Address::StatusChannel,
        }
    }

    /// Whether `status` says this FIFO has something for the host.
    pub fn is_pending(self, status: InterruptStatus) -> bool {
        match self {
            FifoType::WakeUp => status.wake_up_fifo(),
            FifoType::NonWakeUp => status.non_wake_up_fifo(),
            FifoType::Status => status.async_status(),
        }
    }

    pub(crate) fn index(self) -> usize {
        u8::from(self) as usize
    }
}

/// A single record, as handed to a [`SensorCallback`][crate::SensorCallback].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FifoEvent<'a> {
    pub sensor_id: u8,
    /// The FIFO the record was read from.
    pub fifo_type: FifoType,
    /// The running timestamp of that FIFO when the record was read, in ticks.
    pub timestamp: u64,
    /// The record payload, without the sensor ID byte.
    pub data: &'a [u8],
}

impl<'a> FifoEvent<'a> {
    /// The timestamp converted to nanoseconds.
    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp * TIMESTAMP_TICK_NS
    }
}

/// The FIFO control parameter: watermarks and sizes of the wake-up and non-wake-up FIFOs, in
/// bytes.
///
/// Only the watermarks can be changed; the sizes are fixed by the firmware.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FifoControl {
    pub wake_up_watermark: u32,
    pub wake_up_size: u32,
    pub non_wake_up_watermark: u32,
    pub non_wake_up_size: u32,
}

impl FifoControl {
    pub const LENGTH: usize = 16;

    pub fn from_bytes(mut buf: &[u8]) -> Result<Self, LibraryError> {
        if buf.len() < Self::LENGTH {
            return Err(LibraryError::InvalidData("FIFO control page is too short"));
        }
        Ok(Self {
            wake_up_watermark: buf.get_u32(),
            wake_up_size: buf.get_u32(),
            non_wake_up_watermark: buf.get_u32(),
            non_wake_up_size: buf.get_u32(),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        let mut page = [0u8; Self::LENGTH];
        page[0..4].copy_from_slice(&self.wake_up_watermark.to_le_bytes());
        page[4..8].copy_from_slice(&self.wake_up_size.to_le_bytes());
        page[8..12].copy_from_slice(&self.non_wake_up_watermark.to_le_bytes());
        page[12..16].copy_from_slice(&self.non_wake_up_size.to_le_bytes());
        page
    }
}

/// A byte arena for FIFO data, with cursors for what's been read from the hub and parsed.
///
/// `[0, read_pos)` has been parsed, `[read_pos, read_length)` is waiting to be parsed and
/// `remain_length` bytes are still in the hub waiting to be read.
#[derive(Debug)]
pub struct FifoBuffer<'b> {
    buffer: &'b mut [u8],
    read_pos: usize,
    read_length: usize,
    remain_length: usize,
}

impl<'b> FifoBuffer<'b> {
    pub fn new(buffer: &'b mut [u8]) -> Self {
        Self {
            buffer,
            read_pos: 0,
            read_length: 0,
            remain_length: 0,
        }
    }

    /// Forget everything, ready to drain a different FIFO.
    pub fn reset(&mut self) {
        self.read_pos = 0;
        self.read_length = 0;
        self.remain_length = 0;
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    pub fn read_length(&self) -> usize {
        self.read_length
    }

    /// Bytes the hub reported but haven't been read yet.
    pub fn remain_length(&self) -> usize {
        self.remain_length
    }

    pub(crate) fn set_remain_length(&mut self, remain_length: usize) {
        self.remain_length = remain_length;
    }

    /// The bytes read from the hub that haven't been parsed yet.
    pub fn unparsed(&self) -> &[u8] {
        &self.buffer[self.read_pos..self.read_length]
    }

    /// Move the unparsed bytes to the start of the buffer.
    pub fn compact(&mut self) {
        if self.read_pos > 0 {
            self.buffer.copy_within(self.read_pos..self.read_length, 0);
            self.read_length -= self.read_pos;
            self.read_pos = 0;
        }
    }

    /// The unused space after the unparsed bytes.
    pub fn free_space(&mut self) -> &mut [u8] {
        &mut self.buffer[self.read_length..]
    }

    /// Mark `count` bytes of [free space][FifoBuffer::free_space] as filled.
    pub(crate) fn commit(&mut self, count: usize) {
        self.read_length = (self.read_length + count).min(self.buffer.len());
    }

    /// Append as much of `data` as fits, returning how many bytes were copied.
    pub fn extend_from_slice(&mut self, data: &[u8]) -> usize {
        let free = self.free_space();
        let count = free.len().min(data.len());
        free[..count].copy_from_slice(&data[..count]);
        self.commit(count);
        count
    }
}

/// How far [`parse_fifo`] got through the buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParseOutcome {
    /// Every buffered byte was consumed.
    Consumed,
    /// The buffer ends partway through a record; more data is needed to finish it.
    PartialRecord,
}

/// Parse every complete record in `buffer`, handing sensor records to `registry`.
///
/// Timestamp records update `timestamp` in place, and every record is tagged with the running
/// value. Records with an unknown length are skipped one byte at a time, as there's no way to
/// tell where they end.
pub fn parse_fifo(
    buffer: &mut FifoBuffer<'_>,
    fifo_type: FifoType,
    timestamp: &mut u64,
    sizes: &EventSizeTable,
    registry: &mut Registry<'_>,
) -> ParseOutcome {
    while buffer.read_pos < buffer.read_length {
        let sensor_id = buffer.buffer[buffer.read_pos];
        let event_size = sizes.event_size(sensor_id) as usize;
        if event_size == 0 {
            warn!(
                "Skipping byte {:#04X} at offset {} in {:?} FIFO, unknown event size",
                sensor_id, buffer.read_pos, fifo_type
            );
            buffer.read_pos += 1;
            continue;
        }
        let end = buffer.read_pos + event_size;
        if end > buffer.read_length {
            trace!(
                "Partial record for sensor {} in {:?} FIFO ({} of {} bytes)",
                sensor_id,
                fifo_type,
                buffer.read_length - buffer.read_pos,
                event_size
            );
            return ParseOutcome::PartialRecord;
        }
        let mut payload = &buffer.buffer[buffer.read_pos + 1..end];
        match sensor_id {
            system_id::PADDING | system_id::FILLER | system_id::RESERVED => (),
            system_id::TIMESTAMP_SMALL_DELTA | system_id::TIMESTAMP_SMALL_DELTA_WAKE_UP => {
                *timestamp += payload.get_u8() as u64;
            }
            system_id::TIMESTAMP_LARGE_DELTA | system_id::TIMESTAMP_LARGE_DELTA_WAKE_UP => {
                *timestamp += payload.get_u16() as u64;
            }
            system_id::TIMESTAMP_FULL | system_id::TIMESTAMP_FULL_WAKE_UP => {
                *timestamp = payload.get_u40();
            }
            _ => {
                let event = FifoEvent {
                    sensor_id,
                    fifo_type,
                    timestamp: *timestamp,
                    data: payload,
                };
                if !registry.dispatch(&event) {
                    trace!("No callback for sensor {}", sensor_id);
                }
            }
        }
        buffer.read_pos = end;
    }
    ParseOutcome::Consumed
}
