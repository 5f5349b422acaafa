use std::env;
use std::path::Path;

use anyhow::{anyhow, Context};
use linux_embedded_hal::{Delay, I2cdev};
use log::info;

use bhy2::firmware::{FLASH_CHUNK_LEN, FLASH_START_ADDRESS};
use bhy2::{Bhy2, I2cInterface, PartialUpload, UploadState, UploadTarget};

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {
        return Err(anyhow!(
            "Three arguments required: <I2C bus> <firmware image> [ram|flash]"
        ));
    }
    let bus = I2cdev::new(Path::new(&args[1])).context("opening the I2C bus")?;
    let firmware = std::fs::read(&args[2]).context("reading the firmware image")?;
    let target = match args[3].as_ref() {
        "ram" => UploadTarget::Ram,
        "flash" => UploadTarget::Flash,
        _ => return Err(anyhow!("The third argument must be either ram or flash")),
    };

    let interface = I2cInterface::new(bus, I2cInterface::<I2cdev>::DEFAULT_ADDRESS);
    let mut hub = Bhy2::new(interface, Delay, 64)?;
    hub.soft_reset()?;
    let boot_status = hub.boot_status()?;
    if target == UploadTarget::Flash {
        if boot_status.no_flash() {
            return Err(anyhow!("No flash attached to the sensor hub"));
        }
        let end_address = FLASH_START_ADDRESS + firmware.len() as u32;
        info!("Erasing flash up to {:#X}", end_address);
        hub.erase_flash(FLASH_START_ADDRESS, end_address)?;
    }

    // Uploading in pieces so progress can be shown. Every piece but the last has to be a multiple
    // of four bytes long.
    let mut upload = PartialUpload::new(target, firmware.len())?;
    for chunk in firmware.chunks(FLASH_CHUNK_LEN * 4) {
        upload.upload_chunk(hub.hif(), chunk)?;
        println!(
            "{:6} of {} bytes uploaded",
            upload.position(),
            upload.total_len()
        );
    }
    if upload.state() != UploadState::Booted {
        return Err(anyhow!("Firmware was not accepted: {:?}", hub.boot_status()?));
    }

    match target {
        UploadTarget::Ram => hub.boot_from_ram()?,
        UploadTarget::Flash => hub.boot_from_flash()?,
    }
    hub.update_virtual_sensor_list()?;
    let mut version = [0u8; 32];
    let length = hub.firmware_version(&mut version)?;
    println!(
        "Booted kernel {} (user {}), firmware version {:02X?}",
        hub.kernel_version()?,
        hub.user_version()?,
        &version[..length]
    );
    let present: Vec<u8> = hub.event_sizes().present_sensors().collect();
    println!("Virtual sensors: {:?}", present);
    Ok(())
}
