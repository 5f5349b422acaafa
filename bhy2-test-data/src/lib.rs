// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Fixture data for exercising the `bhy2` host interface without hardware.
//!
//! The values here are wire encodings, so they're spelled out independently of the constants in
//! `bhy2` itself. If the two disagree, the tests should catch it.

/// The magic bytes every firmware image starts with.
pub const FIRMWARE_MAGIC: [u8; 2] = [0x2A, 0x65];

/// Sensor IDs of the system records, as they appear on the wire.
pub mod system_id {
    pub const PADDING: u8 = 0;
    pub const TIMESTAMP_SMALL_DELTA_WAKE_UP: u8 = 245;
    pub const TIMESTAMP_LARGE_DELTA_WAKE_UP: u8 = 246;
    pub const TIMESTAMP_FULL_WAKE_UP: u8 = 247;
    pub const META_EVENT_WAKE_UP: u8 = 248;
    pub const DEBUG_MESSAGE: u8 = 250;
    pub const TIMESTAMP_SMALL_DELTA: u8 = 251;
    pub const TIMESTAMP_LARGE_DELTA: u8 = 252;
    pub const TIMESTAMP_FULL: u8 = 253;
    pub const META_EVENT: u8 = 254;
    pub const FILLER: u8 = 255;
}

/// Accelerometer sensor ID used by the fixtures.
pub const ACCELEROMETER_ID: u8 = 4;

/// Gyroscope sensor ID used by the fixtures.
pub const GYROSCOPE_ID: u8 = 13;

/// Accelerometer and gyroscope records are three 16-bit axes plus the ID byte.
pub const VECTOR_EVENT_SIZE: u8 = 7;

/// Build a FIFO byte stream record by record.
#[derive(Clone, Debug, Default)]
pub struct FifoStream {
    bytes: Vec<u8>,
}

impl FifoStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn padding(mut self) -> Self {
        self.bytes.push(system_id::PADDING);
        self
    }

    pub fn filler(mut self) -> Self {
        self.bytes.push(system_id::FILLER);
        self
    }

    pub fn small_delta(mut self, delta: u8) -> Self {
        self.bytes.push(system_id::TIMESTAMP_SMALL_DELTA);
        self.bytes.push(delta);
        self
    }

    pub fn large_delta(mut self, delta: u16) -> Self {
        self.bytes.push(system_id::TIMESTAMP_LARGE_DELTA);
        self.bytes.extend_from_slice(&delta.to_le_bytes());
        self
    }

    /// A full timestamp record. Only the low 40 bits of `ticks` are encoded.
    pub fn full_timestamp(mut self, ticks: u64) -> Self {
        self.bytes.push(system_id::TIMESTAMP_FULL);
        self.bytes.extend_from_slice(&ticks.to_le_bytes()[..5]);
        self
    }

    pub fn meta_event(mut self, wake_up: bool, event_type: u8, byte1: u8, byte2: u8) -> Self {
        self.bytes.push(if wake_up {
            system_id::META_EVENT_WAKE_UP
        } else {
            system_id::META_EVENT
        });
        self.bytes.extend_from_slice(&[event_type, byte1, byte2]);
        self
    }

    pub fn debug_message(mut self, message: &[u8]) -> Self {
        assert!(message.len() <= 16, "debug messages carry at most 16 bytes");
        self.bytes.push(system_id::DEBUG_MESSAGE);
        self.bytes.push(message.len() as u8);
        let mut data = [0u8; 16];
        data[..message.len()].copy_from_slice(message);
        self.bytes.extend_from_slice(&data);
        self
    }

    /// A sensor record with an arbitrary payload.
    pub fn event(mut self, sensor_id: u8, payload: &[u8]) -> Self {
        self.bytes.push(sensor_id);
        self.bytes.extend_from_slice(payload);
        self
    }

    /// A three axis record, as sent by the accelerometer and gyroscope.
    pub fn vector(self, sensor_id: u8, x: i16, y: i16, z: i16) -> Self {
        let mut payload = [0u8; 6];
        payload[0..2].copy_from_slice(&x.to_le_bytes());
        payload[2..4].copy_from_slice(&y.to_le_bytes());
        payload[4..6].copy_from_slice(&z.to_le_bytes());
        self.event(sensor_id, &payload)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// A typical non-wake-up FIFO capture: a full timestamp followed by interleaved accelerometer and
/// gyroscope samples at 100 Hz (640 ticks apart), with a meta event and some filler mixed in.
///
/// Returns the stream and the number of sensor records in it.
pub fn accelerometer_gyroscope_stream(samples: usize) -> (Vec<u8>, usize) {
    let mut stream = FifoStream::new()
        .full_timestamp(0x01_2345_6789)
        .meta_event(false, 2, ACCELEROMETER_ID, 0);
    for n in 0..samples {
        let v = n as i16;
        stream = stream
            .vector(ACCELEROMETER_ID, v, -v, 4096)
            .vector(GYROSCOPE_ID, 2 * v, 0, -2 * v)
            .large_delta(640);
        if n % 8 == 7 {
            stream = stream.filler().padding();
        }
    }
    (stream.into_bytes(), samples * 2)
}

/// A sensor information parameter page, as the hub would return it.
pub fn sensor_info_page(sensor_id: u8, event_size: u8) -> [u8; 28] {
    let mut page = [0u8; 28];
    page[0] = sensor_id;
    // driver ID and version
    page[1] = 0x01;
    page[2] = 0x02;
    // power
    page[3] = 0x0A;
    // max range
    page[4..6].copy_from_slice(&8u16.to_le_bytes());
    // resolution
    page[6..8].copy_from_slice(&16u16.to_le_bytes());
    page[8..12].copy_from_slice(&400f32.to_le_bytes());
    // reserved FIFO space
    page[12..16].copy_from_slice(&0u32.to_le_bytes());
    page[16..20].copy_from_slice(&1024u32.to_le_bytes());
    page[20] = event_size;
    page[21..25].copy_from_slice(&1.5625f32.to_le_bytes());
    page
}

/// A virtual sensor configuration parameter page.
pub fn sensor_config_page(sample_rate: f32, latency: u32) -> [u8; 12] {
    let mut page = [0u8; 12];
    page[0..4].copy_from_slice(&sample_rate.to_le_bytes());
    page[4..8].copy_from_slice(&latency.to_le_bytes());
    // sensitivity
    page[8..10].copy_from_slice(&0u16.to_le_bytes());
    // range
    page[10..12].copy_from_slice(&8u16.to_le_bytes());
    page
}

/// A firmware image of `length` bytes with a valid magic and a recognizable body.
pub fn firmware_image(length: usize) -> Vec<u8> {
    assert!(length >= FIRMWARE_MAGIC.len());
    let mut image: Vec<u8> = (0..length).map(|n| (n % 251) as u8).collect();
    image[..2].copy_from_slice(&FIRMWARE_MAGIC);
    image
}
