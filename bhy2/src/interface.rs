// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Byte-level register access to the sensor hub.
//!
//! The host interface only ever needs two primitives from the bus: read a run of bytes starting
//! at a register, and write a run of bytes starting at a register. The channel registers (the
//! command channel and the three FIFOs) don't auto-increment, so a long read or write to one of
//! them can be split into several transfers without changing its meaning.
//!
//! [`I2cInterface`] and [`SpiInterface`] adapt the blocking [`embedded-hal`][embedded-hal] traits
//! to [`Interface`]. Anything else (a bridge chip, a test double) can implement [`Interface`]
//! directly.
//!
//! [embedded-hal]: https://docs.rs/embedded-hal/0.2/embedded_hal/
#[cfg(feature = "std")]
extern crate std;

use core::fmt;

use arrayvec::ArrayVec;
use embedded_hal::blocking::{i2c, spi};
use embedded_hal::digital::v2::OutputPin;

/// The largest single I²C write (not counting the register address byte).
///
/// Longer writes are split into multiple transactions to the same register.
pub const I2C_MAX_WRITE_LEN: usize = 256;

/// Set on the register address byte to make an SPI transaction a read.
const SPI_READ_FLAG: u8 = 0x80;

/// Register access primitives the host interface is built on.
pub trait Interface {
    type Error;

    /// Fill `buffer` with bytes read starting at `register`.
    fn read_registers(&mut self, register: u8, buffer: &mut [u8]) -> Result<(), Self::Error>;

    /// Write all of `data` starting at `register`.
    fn write_registers(&mut self, register: u8, data: &[u8]) -> Result<(), Self::Error>;
}

/// An [`Interface`] for a sensor hub on an I²C bus.
#[derive(Clone, Debug)]
pub struct I2cInterface<I2C> {
    bus: I2C,
    address: u8,
}

impl<I2C> I2cInterface<I2C>
where
    I2C: i2c::WriteRead + i2c::Write,
{
    /// The default address when the SDO/address pin is pulled low.
    pub const DEFAULT_ADDRESS: u8 = 0x28;

    /// The alternate address when the SDO/address pin is pulled high.
    pub const ALTERNATE_ADDRESS: u8 = 0x29;

    pub fn new(bus: I2C, address: u8) -> Self {
        Self { bus, address }
    }

    /// Give the bus back.
    pub fn release(self) -> I2C {
        self.bus
    }
}

/// Errors from an I²C bus, keeping reads and writes apart as they're separate traits.
pub enum I2cError<I2C>
where
    I2C: i2c::WriteRead + i2c::Write,
{
    Read(<I2C as i2c::WriteRead>::Error),
    Write(<I2C as i2c::Write>::Error),
}

// Custom Debug implementation so that I2C doesn't need to implement Debug (like the one from
// linux-embedded-hal).
impl<I2C> fmt::Debug for I2cError<I2C>
where
    I2C: i2c::WriteRead + i2c::Write,
    <I2C as i2c::WriteRead>::Error: fmt::Debug,
    <I2C as i2c::Write>::Error: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            I2cError::Read(err) => f.debug_tuple("I2cError::Read").field(err).finish(),
            I2cError::Write(err) => f.debug_tuple("I2cError::Write").field(err).finish(),
        }
    }
}

impl<I2C> fmt::Display for I2cError<I2C>
where
    I2C: i2c::WriteRead + i2c::Write,
    <I2C as i2c::WriteRead>::Error: fmt::Debug,
    <I2C as i2c::Write>::Error: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            I2cError::Read(err) => write!(f, "I2C read failed: {:?}", err),
            I2cError::Write(err) => write!(f, "I2C write failed: {:?}", err),
        }
    }
}

#[cfg(feature = "std")]
impl<I2C> std::error::Error for I2cError<I2C>
where
    I2C: i2c::WriteRead + i2c::Write,
    <I2C as i2c::WriteRead>::Error: fmt::Debug,
    <I2C as i2c::Write>::Error: fmt::Debug,
{
}

impl<I2C> Interface for I2cInterface<I2C>
where
    I2C: i2c::WriteRead + i2c::Write,
{
    type Error = I2cError<I2C>;

    fn read_registers(&mut self, register: u8, buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.bus
            .write_read(self.address, &[register], buffer)
            .map_err(I2cError::Read)
    }

    fn write_registers(&mut self, register: u8, data: &[u8]) -> Result<(), Self::Error> {
        for chunk in data.chunks(I2C_MAX_WRITE_LEN) {
            let mut combined: ArrayVec<u8, { I2C_MAX_WRITE_LEN + 1 }> = ArrayVec::new();
            combined.push(register);
            // Can't overflow, the chunk is at most I2C_MAX_WRITE_LEN
            combined.extend(chunk.iter().copied());
            self.bus
                .write(self.address, &combined)
                .map_err(I2cError::Write)?;
        }
        Ok(())
    }
}

/// An [`Interface`] for a sensor hub on a SPI bus, with a manually driven chip select.
#[derive(Clone, Debug)]
pub struct SpiInterface<SPI, CS> {
    spi: SPI,
    chip_select: CS,
}

impl<SPI, CS> SpiInterface<SPI, CS> {
    pub fn new(spi: SPI, chip_select: CS) -> Self {
        Self { spi, chip_select }
    }

    /// Give the bus and chip select pin back.
    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.chip_select)
    }
}

/// Errors from a SPI bus or its chip select pin.
#[derive(Clone, Debug, PartialEq)]
pub enum SpiError<SpiE, PinE> {
    Spi(SpiE),
    Pin(PinE),
}

impl<SpiE, PinE> fmt::Display for SpiError<SpiE, PinE>
where
    SpiE: fmt::Debug,
    PinE: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpiError::Spi(err) => write!(f, "SPI transfer failed: {:?}", err),
            SpiError::Pin(err) => write!(f, "chip select failed: {:?}", err),
        }
    }
}

#[cfg(feature = "std")]
impl<SpiE, PinE> std::error::Error for SpiError<SpiE, PinE>
where
    SpiE: fmt::Debug,
    PinE: fmt::Debug,
{
}

impl<SPI, CS, SpiE, PinE> SpiInterface<SPI, CS>
where
    SPI: spi::Transfer<u8, Error = SpiE> + spi::Write<u8, Error = SpiE>,
    CS: OutputPin<Error = PinE>,
{
    /// Run `f` with the chip selected, always deselecting it afterwards.
    fn selected<F>(&mut self, f: F) -> Result<(), SpiError<SpiE, PinE>>
    where
        F: FnOnce(&mut SPI) -> Result<(), SpiE>,
    {
        self.chip_select.set_low().map_err(SpiError::Pin)?;
        let result = f(&mut self.spi).map_err(SpiError::Spi);
        let deselect = self.chip_select.set_high().map_err(SpiError::Pin);
        result.and(deselect)
    }
}

impl<SPI, CS, SpiE, PinE> Interface for SpiInterface<SPI, CS>
where
    SPI: spi::Transfer<u8, Error = SpiE> + spi::Write<u8, Error = SpiE>,
    CS: OutputPin<Error = PinE>,
{
    type Error = SpiError<SpiE, PinE>;

    fn read_registers(&mut self, register: u8, buffer: &mut [u8]) -> Result<(), Self::Error> {
        buffer.iter_mut().for_each(|b| *b = 0);
        self.selected(|spi| {
            spi.write(&[register | SPI_READ_FLAG])?;
            spi.transfer(buffer)?;
            Ok(())
        })
    }

    fn write_registers(&mut self, register: u8, data: &[u8]) -> Result<(), Self::Error> {
        self.selected(|spi| {
            spi.write(&[register & !SPI_READ_FLAG])?;
            spi.write(data)
        })
    }
}

#[cfg(test)]
mod test {
    extern crate std;

    use std::vec::Vec;

    use embedded_hal::blocking::{i2c, spi};
    use embedded_hal::digital::v2::OutputPin;

    use super::{I2cInterface, Interface, SpiError, SpiInterface, I2C_MAX_WRITE_LEN};

    #[derive(Default)]
    struct RecordingBus {
        writes: Vec<(u8, Vec<u8>)>,
        reads: Vec<(u8, Vec<u8>, usize)>,
    }

    impl i2c::Write for RecordingBus {
        type Error = ();

        fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Self::Error> {
            self.writes.push((address, bytes.to_vec()));
            Ok(())
        }
    }

    impl i2c::WriteRead for RecordingBus {
        type Error = ();

        fn write_read(
            &mut self,
            address: u8,
            bytes: &[u8],
            buffer: &mut [u8],
        ) -> Result<(), Self::Error> {
            self.reads.push((address, bytes.to_vec(), buffer.len()));
            buffer.iter_mut().for_each(|b| *b = 0xA5);
            Ok(())
        }
    }

    #[test]
    fn i2c_read_sends_register_address() {
        let mut iface = I2cInterface::new(RecordingBus::default(), 0x28);
        let mut buf = [0u8; 3];
        iface.read_registers(0x2D, &mut buf).unwrap();
        assert_eq!(buf, [0xA5; 3]);
        let bus = iface.release();
        assert_eq!(bus.reads, [(0x28, std::vec![0x2D], 3)]);
    }

    #[test]
    fn i2c_long_write_is_split() {
        let mut iface = I2cInterface::new(RecordingBus::default(), 0x29);
        let data = [0x11u8; I2C_MAX_WRITE_LEN + 10];
        iface.write_registers(0x00, &data).unwrap();
        let bus = iface.release();
        assert_eq!(bus.writes.len(), 2);
        assert_eq!(bus.writes[0].1.len(), I2C_MAX_WRITE_LEN + 1);
        assert_eq!(bus.writes[0].1[0], 0x00);
        assert_eq!(bus.writes[1].1.len(), 11);
        assert!(bus.writes.iter().all(|(address, _)| *address == 0x29));
    }

    #[derive(Default)]
    struct RecordingSpi {
        writes: Vec<Vec<u8>>,
        transfers: Vec<usize>,
        fail_transfers: bool,
    }

    impl spi::Write<u8> for RecordingSpi {
        type Error = ();

        fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
            self.writes.push(words.to_vec());
            Ok(())
        }
    }

    impl spi::Transfer<u8> for RecordingSpi {
        type Error = ();

        fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Self::Error> {
            self.transfers.push(words.len());
            if self.fail_transfers {
                return Err(());
            }
            words.iter_mut().for_each(|b| *b = 0x5A);
            Ok(words)
        }
    }

    /// Records every level the chip select is driven to, `true` being high.
    #[derive(Default)]
    struct RecordingPin {
        levels: Vec<bool>,
    }

    impl OutputPin for RecordingPin {
        type Error = ();

        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.levels.push(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.levels.push(true);
            Ok(())
        }
    }

    #[test]
    fn spi_read_sets_read_flag() {
        let mut iface = SpiInterface::new(RecordingSpi::default(), RecordingPin::default());
        let mut buf = [0u8; 3];
        iface.read_registers(0x2D, &mut buf).unwrap();
        assert_eq!(buf, [0x5A; 3]);
        let (spi, pin) = iface.release();
        assert_eq!(spi.writes, [std::vec![0xAD]]);
        assert_eq!(spi.transfers, [3]);
        assert_eq!(pin.levels, [false, true]);
    }

    #[test]
    fn spi_write_clears_read_flag() {
        let mut iface = SpiInterface::new(RecordingSpi::default(), RecordingPin::default());
        iface.write_registers(0x00, &[1, 2, 3, 4]).unwrap();
        let (spi, pin) = iface.release();
        assert_eq!(spi.writes, [std::vec![0x00], std::vec![1, 2, 3, 4]]);
        assert!(spi.transfers.is_empty());
        assert_eq!(pin.levels, [false, true]);
    }

    #[test]
    fn spi_failure_deselects_chip() {
        let spi = RecordingSpi {
            fail_transfers: true,
            ..Default::default()
        };
        let mut iface = SpiInterface::new(spi, RecordingPin::default());
        let mut buf = [0u8; 2];
        assert_eq!(
            iface.read_registers(0x03, &mut buf),
            Err(SpiError::Spi(()))
        );
        let (_, pin) = iface.release();
        assert_eq!(pin.levels, [false, true]);
    }
}
