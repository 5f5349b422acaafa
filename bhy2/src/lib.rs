// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! A pure-Rust host driver for the BHI260 family of programmable sensor-fusion hubs.
//!
//! These hubs run their own firmware, which fuses the data from the attached physical sensors
//! into "virtual sensors". The host uploads (or boots) that firmware, configures which virtual
//! sensors it wants, and then drains the records the hub queues up in its FIFOs. This crate covers
//! all of that over either I²C or SPI, using the [`embedded-hal`][embedded-hal] blocking traits. It
//! is also `no_std` compatible, and doesn't allocate.
//!
//! [embedded-hal]: https://docs.rs/embedded-hal/0.2/embedded_hal/
//!
//! # Example
//! ```no_run
//! use linux_embedded_hal::{Delay, I2cdev};
//! use bhy2::{Bhy2, FifoEvent, I2cInterface, SENSOR_ID_ACCELEROMETER};
//!
//! let firmware = std::fs::read("Bosch_APP30_SHUTTLE_BHI260_aux_BMM150.fw")?;
//! let mut on_accel = |event: &FifoEvent<'_>| println!("{} {:?}", event.timestamp_ns(), event.data);
//! let bus = I2cdev::new("/dev/i2c-1")?;
//! let interface = I2cInterface::new(bus, I2cInterface::<I2cdev>::DEFAULT_ADDRESS);
//! let mut hub = Bhy2::new(interface, Delay, 64)?;
//! hub.soft_reset()?;
//! hub.upload_firmware_to_ram(&firmware)?;
//! hub.boot_from_ram()?;
//! hub.update_virtual_sensor_list()?;
//! hub.register_callback(SENSOR_ID_ACCELEROMETER, &mut on_accel)?;
//! hub.set_virtual_sensor_config(SENSOR_ID_ACCELEROMETER, 50.0, 0)?;
//! let mut work_buffer = [0u8; 2048];
//! loop {
//!     hub.get_and_process_fifo(&mut work_buffer)?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Layers
//! [`Bhy2`] is the session most users want. It owns the callback [`Registry`] and the
//! [`EventSizeTable`] the FIFO parser needs, so separate hubs never share state.
//!
//! Underneath it is [`HostInterface`], which knows how commands, parameters and status responses
//! are framed on the wire. It's exposed for anything `Bhy2` doesn't wrap, like physical sensor
//! control parameters. The bus itself is abstracted by [`Interface`], with implementations for
//! [I²C][I2cInterface] and [SPI][SpiInterface].
//!
//! # FIFO Records
//! Every record starts with a sensor ID byte, and the length of the rest of the record depends on
//! that ID. IDs from 245 up are system records (timestamps, meta events and debug messages) with
//! fixed lengths; everything else gets its length from the firmware's sensor list, so
//! [`update_virtual_sensor_list`][Bhy2::update_virtual_sensor_list] has to be called after the
//! firmware boots. Timestamp records are consumed by the parser and every other record is handed
//! to the callback registered for its ID, tagged with the running timestamp of its FIFO.
#![no_std]

pub mod driver;
pub mod error;
pub mod fifo;
pub mod firmware;
pub mod hif;
pub mod interface;
pub mod register;
pub mod registry;
pub mod sensor;
#[cfg(test)]
mod test;
mod util;

pub use driver::{Bhy2, MAX_SENSOR_LATENCY};
pub use error::{Error, LibraryError};
pub use fifo::{parse_fifo, FifoBuffer, FifoControl, FifoEvent, FifoType, ParseOutcome};
pub use firmware::{PartialUpload, UploadState, UploadTarget};
pub use hif::HostInterface;
pub use interface::{I2cInterface, Interface, SpiInterface};
pub use register::*;
pub use registry::{EventSizeTable, Registry, SensorCallback, SensorPresence};
pub use sensor::*;
