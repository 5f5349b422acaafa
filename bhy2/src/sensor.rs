// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Decoded forms of the parameter pages and records that describe sensors.
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::LibraryError;
use crate::util::Buffer;

/// Accelerometer, corrected.
pub const SENSOR_ID_ACCELEROMETER: u8 = 4;
/// Gyroscope, corrected.
pub const SENSOR_ID_GYROSCOPE: u8 = 13;
/// Magnetometer, corrected.
pub const SENSOR_ID_MAGNETOMETER: u8 = 22;
/// Rotation vector.
pub const SENSOR_ID_ROTATION_VECTOR: u8 = 34;
/// Game rotation vector (no magnetometer).
pub const SENSOR_ID_GAME_ROTATION_VECTOR: u8 = 37;

/// The information page the hub reports for each virtual sensor.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SensorInfo {
    /// The sensor ID this page describes.
    pub sensor_type: u8,
    pub driver_id: u8,
    pub driver_version: u8,
    /// Current draw, in units of 0.1 mA.
    pub power: u8,
    pub max_range: u16,
    pub resolution: u16,
    /// Maximum sample rate in Hz.
    pub max_rate: f32,
    pub fifo_reserved: u32,
    pub fifo_max: u32,
    /// The length of this sensor's FIFO records, *including* the sensor ID byte.
    pub event_size: u8,
    /// Minimum sample rate in Hz.
    pub min_rate: f32,
}

impl SensorInfo {
    /// The length of the sensor information parameter page.
    pub const LENGTH: usize = 28;

    pub fn from_bytes(mut buf: &[u8]) -> Result<Self, LibraryError> {
        if buf.len() < Self::LENGTH {
            return Err(LibraryError::InvalidData(
                "sensor information page is too short",
            ));
        }
        Ok(Self {
            sensor_type: buf.get_u8(),
            driver_id: buf.get_u8(),
            driver_version: buf.get_u8(),
            power: buf.get_u8(),
            max_range: buf.get_u16(),
            resolution: buf.get_u16(),
            max_rate: buf.get_f32(),
            fifo_reserved: buf.get_u32(),
            fifo_max: buf.get_u32(),
            event_size: buf.get_u8(),
            min_rate: buf.get_f32(),
        })
    }
}

/// The current configuration of a virtual sensor.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SensorConfig {
    /// Sample rate in Hz. 0 means the sensor is disabled.
    pub sample_rate: f32,
    /// Reporting latency in milliseconds.
    pub latency: u32,
    pub sensitivity: u16,
    pub range: u16,
}

impl SensorConfig {
    /// The length of the sensor configuration parameter page.
    pub const LENGTH: usize = 12;

    pub fn from_bytes(mut buf: &[u8]) -> Result<Self, LibraryError> {
        if buf.len() < Self::LENGTH {
            return Err(LibraryError::InvalidData(
                "sensor configuration page is too short",
            ));
        }
        Ok(Self {
            sample_rate: buf.get_f32(),
            latency: buf.get_u32(),
            sensitivity: buf.get_u16(),
            range: buf.get_u16(),
        })
    }
}

/// Meta event types.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum MetaEventType {
    FlushComplete = 1,
    SampleRateChanged = 2,
    PowerModeChanged = 3,
    AlgorithmEvents = 5,
    SensorStatus = 6,
    BsxDoStepsMain = 7,
    BsxDoStepsCalib = 8,
    BsxGetOutputSignal = 9,
    SensorError = 11,
    FifoOverflow = 12,
    DynamicRangeChanged = 13,
    FifoWatermark = 14,
    Initialized = 16,
    TransferCause = 17,
    SensorFramework = 18,
    Reset = 19,
    Spacer = 20,
}

impl MetaEventType {
    /// The highest meta event type the hub knows about.
    pub const MAX: u8 = 20;
}

/// Whether a meta event type is reported, and whether reporting it raises the host interrupt.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MetaEventControl {
    pub enabled: bool,
    pub interrupt_enabled: bool,
}

/// A meta event record from either of the meta event sensor IDs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MetaEvent {
    /// The raw event type. Use [`MetaEvent::kind`] for the decoded form.
    pub event_type: u8,
    /// Usually the sensor ID the event is about.
    pub byte1: u8,
    pub byte2: u8,
}

impl MetaEvent {
    /// Decode the payload of a meta event record (everything after the sensor ID).
    pub fn from_bytes(buf: &[u8]) -> Result<Self, LibraryError> {
        match buf {
            [event_type, byte1, byte2, ..] => Ok(Self {
                event_type: *event_type,
                byte1: *byte1,
                byte2: *byte2,
            }),
            _ => Err(LibraryError::InvalidData("meta event record is too short")),
        }
    }

    /// The event type, if it's one this crate knows about.
    pub fn kind(&self) -> Option<MetaEventType> {
        MetaEventType::try_from_primitive(self.event_type).ok()
    }
}

/// A debug message record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DebugMessage<'a> {
    /// The message bytes, usually ASCII text.
    pub message: &'a [u8],
}

impl<'a> DebugMessage<'a> {
    const LENGTH_MASK: u8 = 0x1F;
    /// The most message bytes a single record can carry.
    pub const MAX_LENGTH: usize = 16;

    /// Decode the payload of a debug message record (everything after the sensor ID).
    pub fn from_bytes(buf: &'a [u8]) -> Result<Self, LibraryError> {
        let (flags, rest) = buf
            .split_first()
            .ok_or(LibraryError::InvalidData("debug message record is empty"))?;
        let length = (flags & Self::LENGTH_MASK) as usize;
        if length > Self::MAX_LENGTH || length > rest.len() {
            return Err(LibraryError::InvalidData(
                "debug message length is out of range",
            ));
        }
        Ok(Self {
            message: &rest[..length],
        })
    }
}

/// The outcome of a self test or a fast offset compensation for a physical sensor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CalibrationResult {
    pub sensor_id: u8,
    /// 0 on success, otherwise a sensor specific failure code.
    pub status: u8,
    /// Per-axis offsets (or deviations for a self test).
    pub offsets: [i16; 3],
}

impl CalibrationResult {
    /// The length of the status payload carrying a result.
    pub const LENGTH: usize = 8;

    pub fn from_bytes(mut buf: &[u8]) -> Result<Self, LibraryError> {
        if buf.len() < Self::LENGTH {
            return Err(LibraryError::InvalidData("calibration result is too short"));
        }
        Ok(Self {
            sensor_id: buf.get_u8(),
            status: buf.get_u8(),
            offsets: [buf.get_i16(), buf.get_i16(), buf.get_i16()],
        })
    }

    pub fn passed(&self) -> bool {
        self.status == 0
    }
}
