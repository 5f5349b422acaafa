// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Where FIFO records go once they've been parsed.
//!
//! [`Registry`] maps sensor IDs to callbacks, and [`EventSizeTable`] records how long each
//! sensor's FIFO records are. Both are owned by a [`Bhy2`][crate::Bhy2] session and handed to the
//! FIFO parser by reference, so separate sessions never share state.
use core::fmt;

use arrayvec::ArrayVec;
use bitvec::prelude::*;

use crate::error::LibraryError;
use crate::fifo::{system_id, FifoEvent, SYSTEM_ID_THRESHOLD};

/// How many callbacks can be registered at once.
pub const MAX_REGISTRATIONS: usize = 48;

/// A FIFO record handler.
///
/// Anything the handler needs (a channel, a buffer, some counters) is captured by the closure.
/// Handlers run inline while the FIFOs are being processed, so they should be quick.
pub type SensorCallback<'a> = &'a mut dyn FnMut(&FifoEvent<'_>);

/// Record lengths (including the ID byte) of the system records from 245 through 255.
const SYSTEM_EVENT_SIZES: [u8; 11] = [
    2,  // 245: small timestamp delta, wake-up
    3,  // 246: large timestamp delta, wake-up
    6,  // 247: full timestamp, wake-up
    4,  // 248: meta event, wake-up
    1,  // 249: reserved
    18, // 250: debug message
    2,  // 251: small timestamp delta
    3,  // 252: large timestamp delta
    6,  // 253: full timestamp
    4,  // 254: meta event
    1,  // 255: filler
];

struct Registration<'a> {
    sensor_id: u8,
    callback: SensorCallback<'a>,
}

/// A fixed size table of FIFO record handlers, at most one per sensor ID.
pub struct Registry<'a> {
    entries: ArrayVec<Registration<'a>, MAX_REGISTRATIONS>,
}

impl<'a> Registry<'a> {
    pub fn new() -> Self {
        Self {
            entries: ArrayVec::new(),
        }
    }

    /// Register `callback` for records from `sensor_id`.
    ///
    /// An existing registration is never replaced; [deregister][Registry::deregister] it first.
    pub fn register(
        &mut self,
        sensor_id: u8,
        callback: SensorCallback<'a>,
    ) -> Result<(), LibraryError> {
        if self.is_registered(sensor_id) {
            return Err(LibraryError::AlreadyRegistered(sensor_id));
        }
        self.entries
            .try_push(Registration {
                sensor_id,
                callback,
            })
            .map_err(|_| LibraryError::RegistryFull)
    }

    /// Remove the callback for `sensor_id`, if there is one.
    pub fn deregister(&mut self, sensor_id: u8) {
        self.entries.retain(|entry| entry.sensor_id != sensor_id);
    }

    pub fn is_registered(&self, sensor_id: u8) -> bool {
        self.entries.iter().any(|entry| entry.sensor_id == sensor_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hand `event` to the callback registered for its sensor ID.
    ///
    /// Returns whether there was a callback.
    pub(crate) fn dispatch(&mut self, event: &FifoEvent<'_>) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.sensor_id == event.sensor_id)
        {
            Some(entry) => {
                (entry.callback)(event);
                true
            }
            None => false,
        }
    }
}

impl Default for Registry<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.entries.iter().map(|entry| entry.sensor_id))
            .finish()
    }
}

/// The 32 byte bitmap of which virtual sensors the loaded firmware provides.
pub type SensorPresence = BitArray<[u8; 32], Lsb0>;

/// FIFO record lengths for every sensor ID.
///
/// Lengths include the leading sensor ID byte. 0 means the length is unknown, which is the case
/// for every sensor the firmware doesn't provide.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EventSizeTable {
    sizes: [u8; 256],
    present: SensorPresence,
}

impl EventSizeTable {
    /// A table that only knows the lengths of the system records.
    pub fn new() -> Self {
        let mut sizes = [0u8; 256];
        sizes[system_id::PADDING as usize] = 1;
        sizes[SYSTEM_ID_THRESHOLD as usize..].copy_from_slice(&SYSTEM_EVENT_SIZES);
        Self {
            sizes,
            present: SensorPresence::new([0u8; 32]),
        }
    }

    /// The record length for `sensor_id`, or 0 if it isn't known.
    pub fn event_size(&self, sensor_id: u8) -> u8 {
        self.sizes[sensor_id as usize]
    }

    /// Record that the firmware provides `sensor_id` with records `event_size` bytes long.
    ///
    /// System record lengths are fixed by the protocol and can't be changed.
    pub fn set_event_size(&mut self, sensor_id: u8, event_size: u8) -> Result<(), LibraryError> {
        if sensor_id >= SYSTEM_ID_THRESHOLD || sensor_id == system_id::PADDING {
            return Err(LibraryError::InvalidParam(
                "system record lengths are fixed",
            ));
        }
        if event_size == 0 {
            return Err(LibraryError::InvalidEventSize(sensor_id));
        }
        self.sizes[sensor_id as usize] = event_size;
        self.present.set(sensor_id as usize, true);
        Ok(())
    }

    /// Whether the firmware reported `sensor_id` as present.
    pub fn is_present(&self, sensor_id: u8) -> bool {
        self.present[sensor_id as usize]
    }

    /// The IDs of every sensor the firmware provides, in ascending order.
    pub fn present_sensors(&self) -> impl Iterator<Item = u8> + '_ {
        self.present.iter_ones().map(|index| index as u8)
    }
}

impl Default for EventSizeTable {
    fn default() -> Self {
        Self::new()
    }
}
