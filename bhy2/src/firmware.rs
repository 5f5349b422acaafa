// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Uploading and booting firmware.
//!
//! Firmware can be uploaded straight into program RAM, or written to an attached flash device and
//! booted from there. Either way the hub verifies the image itself and reports the result in the
//! [boot status register][BootStatus].
//!
//! Images are usually too large to hold in memory on a microcontroller, so they can be uploaded a
//! piece at a time with [`PartialUpload`].
use embedded_hal::blocking::delay::DelayUs;
use log::{debug, info, warn};

use crate::error::{Error, LibraryError};
use crate::hif::{command, status_code, HostInterface, STATUS_READY_RETRIES};
use crate::interface::Interface;
use crate::register::BootStatus;

/// Every firmware image starts with these bytes.
pub const FIRMWARE_MAGIC: [u8; 2] = [0x2A, 0x65];

/// The flash address firmware images are written to.
pub const FLASH_START_ADDRESS: u32 = 0x1F84;

/// How much of an image goes into each flash write command.
pub const FLASH_CHUNK_LEN: usize = 1024;

/// How many times the boot status is checked for a verified image.
pub const BOOT_VERIFY_RETRIES: u32 = 100;

/// Time between boot status checks.
pub const BOOT_VERIFY_INTERVAL_US: u32 = 50_000;

/// How many times to check for flash erase completion. Erasing takes a while.
pub const FLASH_ERASE_RETRIES: u32 = 3_000;

/// Where firmware is being uploaded to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UploadTarget {
    Ram,
    Flash,
}

/// Progress of a firmware upload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UploadState {
    NotStarted,
    Uploading,
    /// The whole image has been sent, and the hub is checking it.
    AwaitingBootVerify,
    /// The hub accepted the image.
    Booted,
    /// Something went wrong, and the upload has to be started over.
    Failed,
}

/// Check that `image` starts like a firmware image.
pub fn check_image_header(image: &[u8]) -> Result<(), LibraryError> {
    if image.starts_with(&FIRMWARE_MAGIC) {
        Ok(())
    } else {
        Err(LibraryError::InvalidImage)
    }
}

/// A firmware upload sent in pieces.
///
/// ```no_run
/// # use bhy2::{HostInterface, PartialUpload, UploadTarget};
/// # fn upload<IF: bhy2::Interface, D: embedded_hal::blocking::delay::DelayUs<u32>>(
/// #     hif: &mut HostInterface<IF, D>,
/// #     total_len: usize,
/// #     mut next_piece: impl FnMut() -> Option<[u8; 256]>,
/// # ) -> Result<(), bhy2::Error<IF>> {
/// let mut upload = PartialUpload::new(UploadTarget::Ram, total_len)?;
/// while let Some(piece) = next_piece() {
///     upload.upload_chunk(hif, &piece)?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PartialUpload {
    target: UploadTarget,
    total_len: usize,
    position: usize,
    state: UploadState,
}

impl PartialUpload {
    pub fn new(target: UploadTarget, total_len: usize) -> Result<Self, LibraryError> {
        if total_len < FIRMWARE_MAGIC.len() {
            return Err(LibraryError::InvalidImage);
        }
        Ok(Self {
            target,
            total_len,
            position: 0,
            state: UploadState::NotStarted,
        })
    }

    pub fn target(&self) -> UploadTarget {
        self.target
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    /// How much of the image has been sent.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn total_len(&self) -> usize {
        self.total_len
    }

    pub fn remaining(&self) -> usize {
        self.total_len - self.position
    }

    /// Send the next piece of the image.
    ///
    /// Every piece but the last has to be a multiple of four bytes long. Once the last piece has
    /// been sent, this waits for the hub to verify the image.
    pub fn upload_chunk<IF, D>(
        &mut self,
        hif: &mut HostInterface<IF, D>,
        chunk: &[u8],
    ) -> Result<(), Error<IF>>
    where
        IF: Interface,
        D: DelayUs<u32>,
    {
        match self.state {
            UploadState::NotStarted | UploadState::Uploading => (),
            _ => return Err(LibraryError::InvalidParam("upload has already finished").into()),
        }
        if chunk.len() > self.remaining() {
            return Err(LibraryError::InvalidParam("chunk runs past the end of the image").into());
        }
        let is_last = chunk.len() == self.remaining();
        if !is_last && chunk.len() % 4 != 0 {
            return Err(LibraryError::InvalidParam("chunks must be a multiple of 4 bytes").into());
        }
        if self.position == 0 {
            if let Err(err) = check_image_header(chunk) {
                self.state = UploadState::Failed;
                return Err(err.into());
            }
        }
        self.state = UploadState::Uploading;
        let result = match self.target {
            UploadTarget::Ram => self.write_ram(hif, chunk),
            UploadTarget::Flash => self.write_flash(hif, chunk),
        };
        if let Err(err) = result {
            self.state = UploadState::Failed;
            return Err(err);
        }
        self.position += chunk.len();
        debug!(
            "Uploaded {} of {} firmware bytes",
            self.position, self.total_len
        );
        if is_last {
            self.state = UploadState::AwaitingBootVerify;
            match hif.wait_firmware_verified() {
                Ok(_) => self.state = UploadState::Booted,
                Err(err) => {
                    self.state = UploadState::Failed;
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn write_ram<IF, D>(&self, hif: &mut HostInterface<IF, D>, chunk: &[u8]) -> Result<(), Error<IF>>
    where
        IF: Interface,
        D: DelayUs<u32>,
    {
        if self.position == 0 {
            // The first piece carries the header, declaring the length of the whole image
            hif.execute_command_with(
                command::UPLOAD_TO_PROGRAM_RAM,
                &[],
                chunk,
                Some(self.total_len),
            )
        } else {
            hif.write_command_data(chunk)
        }
    }

    fn write_flash<IF, D>(
        &self,
        hif: &mut HostInterface<IF, D>,
        chunk: &[u8],
    ) -> Result<(), Error<IF>>
    where
        IF: Interface,
        D: DelayUs<u32>,
    {
        for (index, piece) in chunk.chunks(FLASH_CHUNK_LEN).enumerate() {
            let offset = self.position + index * FLASH_CHUNK_LEN;
            let address = FLASH_START_ADDRESS + offset as u32;
            hif.command_with_status(
                command::WRITE_FLASH,
                &address.to_le_bytes(),
                piece,
                status_code::FLASH_WRITE_COMPLETE,
                STATUS_READY_RETRIES,
                &mut [],
            )?;
        }
        Ok(())
    }
}

impl<IF, D> HostInterface<IF, D>
where
    IF: Interface,
    D: DelayUs<u32>,
{
    pub fn boot_status(&mut self) -> Result<BootStatus, Error<IF>> {
        self.read_register()
    }

    /// Poll the boot status until the hub reports a verified image.
    pub fn wait_firmware_verified(&mut self) -> Result<BootStatus, Error<IF>> {
        for _ in 0..BOOT_VERIFY_RETRIES {
            let status = self.boot_status()?;
            if status.verify_error() {
                warn!("Firmware failed verification (boot status {:?})", status);
                return Err(LibraryError::FirmwareVerifyFailed.into());
            }
            if status.firmware_verified() {
                return Ok(status);
            }
            self.delay_us(BOOT_VERIFY_INTERVAL_US);
        }
        warn!("Timed out waiting for firmware verification");
        Err(LibraryError::Timeout.into())
    }

    /// Upload a complete firmware image to program RAM and wait for it to be verified.
    pub fn upload_firmware_to_ram(&mut self, image: &[u8]) -> Result<(), Error<IF>> {
        info!("Uploading {} byte firmware image to RAM", image.len());
        let mut upload = PartialUpload::new(UploadTarget::Ram, image.len())?;
        upload.upload_chunk(self, image)
    }

    /// Write a complete firmware image to flash and wait for it to be verified.
    ///
    /// The flash has to have been [erased][HostInterface::erase_flash] first.
    pub fn upload_firmware_to_flash(&mut self, image: &[u8]) -> Result<(), Error<IF>> {
        info!("Writing {} byte firmware image to flash", image.len());
        let mut upload = PartialUpload::new(UploadTarget::Flash, image.len())?;
        upload.upload_chunk(self, image)
    }

    /// Erase the flash from `start_address` up to `end_address`.
    pub fn erase_flash(&mut self, start_address: u32, end_address: u32) -> Result<(), Error<IF>> {
        if end_address <= start_address {
            return Err(LibraryError::InvalidParam("flash erase range is empty").into());
        }
        info!(
            "Erasing flash from {:#X} to {:#X}",
            start_address, end_address
        );
        let mut payload = [0u8; 8];
        payload[..4].copy_from_slice(&start_address.to_le_bytes());
        payload[4..].copy_from_slice(&end_address.to_le_bytes());
        self.command_with_status(
            command::ERASE_FLASH,
            &[],
            &payload,
            status_code::FLASH_ERASE_COMPLETE,
            FLASH_ERASE_RETRIES,
            &mut [],
        )?;
        Ok(())
    }

    /// Start the firmware in program RAM.
    pub fn boot_from_ram(&mut self) -> Result<(), Error<IF>> {
        debug!("Booting from RAM");
        self.execute_command(command::BOOT_PROGRAM_RAM, &[])?;
        self.wait_firmware_verified()?;
        Ok(())
    }

    /// Load and start the firmware in flash.
    pub fn boot_from_flash(&mut self) -> Result<(), Error<IF>> {
        debug!("Booting from flash");
        self.execute_command(command::BOOT_FLASH, &[])?;
        self.wait_firmware_verified()?;
        Ok(())
    }
}
