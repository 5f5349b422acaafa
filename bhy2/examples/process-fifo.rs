use std::cell::Cell;
use std::env;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{anyhow, Context};
use linux_embedded_hal::{Delay, I2cdev};

use bhy2::fifo::system_id;
use bhy2::{
    Bhy2, DebugMessage, FifoEvent, I2cInterface, MetaEvent, SENSOR_ID_ACCELEROMETER,
    SENSOR_ID_GYROSCOPE,
};

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 || args.len() > 4 {
        return Err(anyhow!(
            "Two arguments required: <I2C bus> <firmware image> [sample rate]"
        ));
    }
    let bus = I2cdev::new(Path::new(&args[1])).context("opening the I2C bus")?;
    let firmware = std::fs::read(&args[2]).context("reading the firmware image")?;
    let sample_rate: f32 = match args.get(3) {
        Some(rate) => rate.parse().context("parsing the sample rate")?,
        None => 25.0,
    };

    let samples = Cell::new(0usize);
    let print_vector = |event: &FifoEvent<'_>| {
        samples.set(samples.get() + 1);
        let axis = |n: usize| i16::from_le_bytes([event.data[2 * n], event.data[2 * n + 1]]);
        println!(
            "{:>12} ns  sensor {:3}  {:6} {:6} {:6}",
            event.timestamp_ns(),
            event.sensor_id,
            axis(0),
            axis(1),
            axis(2)
        );
    };
    let mut on_accel = print_vector;
    let mut on_gyro = print_vector;
    let mut on_debug = |event: &FifoEvent<'_>| {
        if let Ok(message) = DebugMessage::from_bytes(event.data) {
            println!("debug: {}", String::from_utf8_lossy(message.message));
        }
    };
    let print_meta = |event: &FifoEvent<'_>| {
        if let Ok(meta) = MetaEvent::from_bytes(event.data) {
            println!(
                "{:?} meta event {:?} ({}, {})",
                event.fifo_type,
                meta.kind(),
                meta.byte1,
                meta.byte2
            );
        }
    };
    let mut on_meta = print_meta;
    let mut on_wake_up_meta = print_meta;

    let interface = I2cInterface::new(bus, I2cInterface::<I2cdev>::DEFAULT_ADDRESS);
    let mut hub = Bhy2::new(interface, Delay, 64)?;
    hub.soft_reset()?;
    println!(
        "Product {:#04X}, revision {:#04X}, ROM {:#06X}",
        hub.product_id()?,
        hub.revision_id()?,
        hub.rom_version()?
    );
    hub.upload_firmware_to_ram(&firmware)?;
    hub.boot_from_ram()?;
    println!("Kernel version {}", hub.kernel_version()?);
    hub.update_virtual_sensor_list()?;

    hub.register_callback(SENSOR_ID_ACCELEROMETER, &mut on_accel)?;
    hub.register_callback(SENSOR_ID_GYROSCOPE, &mut on_gyro)?;
    hub.register_callback(system_id::DEBUG_MESSAGE, &mut on_debug)?;
    hub.register_callback(system_id::META_EVENT, &mut on_meta)?;
    hub.register_callback(system_id::META_EVENT_WAKE_UP, &mut on_wake_up_meta)?;
    hub.set_virtual_sensor_config(SENSOR_ID_ACCELEROMETER, sample_rate, 0)?;
    hub.set_virtual_sensor_config(SENSOR_ID_GYROSCOPE, sample_rate, 0)?;

    let mut work_buffer = [0u8; 2048];
    let poll_interval = Duration::from_millis(10);
    while samples.get() < 1000 {
        if hub.interrupt_status()?.asserted() {
            hub.get_and_process_fifo(&mut work_buffer)?;
        } else {
            sleep(poll_interval);
        }
    }
    hub.set_virtual_sensor_config(SENSOR_ID_ACCELEROMETER, 0.0, 0)?;
    hub.set_virtual_sensor_config(SENSOR_ID_GYROSCOPE, 0.0, 0)?;
    Ok(())
}
