// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross

use bitvec::prelude::*;
use embedded_hal::blocking::delay::DelayUs;
use log::{debug, info, warn};
use paste::paste;

use crate::error::{Error, LibraryError};
use crate::firmware::{BOOT_VERIFY_INTERVAL_US, BOOT_VERIFY_RETRIES};
use crate::fifo::{
    parse_fifo, FifoBuffer, FifoControl, FifoType, SYSTEM_ID_THRESHOLD, TIMESTAMP_TICK_NS,
};
use crate::hif::{command, parameter, status_code, HostInterface, STATUS_READY_RETRIES};
use crate::interface::Interface;
use crate::register::*;
use crate::registry::{EventSizeTable, Registry, SensorCallback, SensorPresence};
use crate::sensor::{CalibrationResult, MetaEventControl, MetaEventType, SensorConfig, SensorInfo};
use crate::util::Buffer;

/// Written to the reset request register to reset the hub.
const RESET_REQUEST: u8 = 0x01;

/// The largest latency a virtual sensor can be configured with, in milliseconds.
pub const MAX_SENSOR_LATENCY: u32 = 0x00FF_FFFF;

/// DRY macro for the set_* methods in `Bhy2` that modify a single register bit.
macro_rules! set_register_field {
    { $register_access:ident, $field:ident, $doc:literal } => {
    paste! {
        #[doc = $doc]
        pub fn [< set_ $field >](&mut self, new_value: bool) -> Result<(), Error<IF>> {
            let mut current = self.$register_access()?;
            if current.$field() != new_value {
                current.[< set_ $field >](new_value);
                self.[< set_ $register_access >](current)
            } else {
                Ok(())
            }
        }
    }};
}

/// Getter and setter for one of the FIFO watermarks.
macro_rules! fifo_watermark {
    { $fifo:ident, $get_doc:literal, $set_doc:literal } => {
    paste! {
        #[doc = $get_doc]
        pub fn [< $fifo _fifo_watermark >](&mut self) -> Result<u32, Error<IF>> {
            Ok(self.fifo_control()?.[< $fifo _watermark >])
        }

        #[doc = $set_doc]
        pub fn [< set_ $fifo _fifo_watermark >](&mut self, watermark: u32) -> Result<(), Error<IF>> {
            let mut control = self.fifo_control()?;
            control.[< $fifo _watermark >] = watermark;
            self.hif
                .set_parameter(parameter::FIFO_CONTROL, &control.to_bytes())
        }
    }};
}

/// A session with a sensor hub.
///
/// The session owns the host interface, the callbacks for each sensor and what it knows about the
/// sensors the firmware provides. Callbacks can borrow from anything that outlives the session
/// (`'a`).
///
/// The usual sequence is to upload and boot firmware (unless it boots from flash on its own), read
/// the [sensor list][Bhy2::update_virtual_sensor_list], register callbacks, configure the sensors
/// of interest and then call [`get_and_process_fifo`][Bhy2::get_and_process_fifo] whenever the
/// host interrupt fires.
pub struct Bhy2<'a, IF, D> {
    hif: HostInterface<IF, D>,

    /// Callbacks for each sensor ID.
    registry: Registry<'a>,

    /// Record lengths for each sensor ID, from the firmware's sensor list.
    sizes: EventSizeTable,

    /// The running timestamp of each FIFO, in ticks.
    timestamps: [u64; 3],
}

impl<'a, IF, D> Bhy2<'a, IF, D>
where
    IF: Interface,
    D: DelayUs<u32>,
{
    /// Create a session. See [`HostInterface::new`] for what `max_transfer_len` means.
    pub fn new(interface: IF, delay: D, max_transfer_len: usize) -> Result<Self, Error<IF>> {
        let hif = HostInterface::new(interface, delay, max_transfer_len)?;
        Ok(Self::from_hif(hif))
    }

    pub fn from_hif(hif: HostInterface<IF, D>) -> Self {
        Self {
            hif,
            registry: Registry::new(),
            sizes: EventSizeTable::new(),
            timestamps: [0; 3],
        }
    }

    /// End the session, giving back the interface and delay.
    pub fn release(self) -> (IF, D) {
        self.hif.release()
    }

    /// Access the low-level host interface.
    pub fn hif(&mut self) -> &mut HostInterface<IF, D> {
        &mut self.hif
    }

    pub fn event_sizes(&self) -> &EventSizeTable {
        &self.sizes
    }

    /// The running timestamp of a FIFO, in ticks of [`TIMESTAMP_TICK_NS`].
    pub fn timestamp(&self, fifo_type: FifoType) -> u64 {
        self.timestamps[fifo_type.index()]
    }

    /// Register a callback for records from `sensor_id`.
    pub fn register_callback(
        &mut self,
        sensor_id: u8,
        callback: SensorCallback<'a>,
    ) -> Result<(), Error<IF>> {
        self.registry.register(sensor_id, callback)?;
        Ok(())
    }

    pub fn deregister_callback(&mut self, sensor_id: u8) {
        self.registry.deregister(sensor_id)
    }

    /// Drain every FIFO with data waiting, handing each record to its callback.
    ///
    /// `work_buffer` is used to hold data read from the hub. It has to be at least as long as the
    /// longest record, but larger buffers mean fewer bus transactions.
    pub fn get_and_process_fifo(&mut self, work_buffer: &mut [u8]) -> Result<(), Error<IF>> {
        if work_buffer.is_empty() {
            return Err(LibraryError::BufferTooSmall.into());
        }
        let status = self.hif.interrupt_status()?;
        let mut buffer = FifoBuffer::new(work_buffer);
        for fifo_type in FifoType::ALL {
            buffer.reset();
            let mut pending = fifo_type.is_pending(status);
            while pending || buffer.remain_length() > 0 {
                pending = false;
                buffer.compact();
                self.hif.fetch_fifo(fifo_type, &mut buffer)?;
                parse_fifo(
                    &mut buffer,
                    fifo_type,
                    &mut self.timestamps[fifo_type.index()],
                    &self.sizes,
                    &mut self.registry,
                );
            }
            let leftover = buffer.unparsed().len();
            if leftover > 0 {
                warn!(
                    "Dropping {} bytes of a partial record from the {:?} FIFO",
                    leftover, fifo_type
                );
            }
        }
        Ok(())
    }

    /// Read which virtual sensors the firmware provides.
    pub fn virtual_sensor_present(&mut self) -> Result<SensorPresence, Error<IF>> {
        let mut bitmap = [0u8; 32];
        self.hif
            .get_parameter(parameter::VIRTUAL_SENSOR_PRESENT, &mut bitmap)?;
        Ok(SensorPresence::new(bitmap))
    }

    /// Read the information page for a virtual sensor.
    pub fn sensor_info(&mut self, sensor_id: u8) -> Result<SensorInfo, Error<IF>> {
        let mut page = [0u8; SensorInfo::LENGTH];
        let length = self.hif.get_parameter(
            parameter::SENSOR_INFO_BASE + sensor_id as u16,
            &mut page,
        )?;
        Ok(SensorInfo::from_bytes(&page[..length])?)
    }

    /// Rebuild the event size table from the firmware's sensor list.
    ///
    /// This needs to be done after firmware is booted, and before any FIFO data can be parsed.
    /// The existing table is only replaced if every present sensor reports a usable event size.
    pub fn update_virtual_sensor_list(&mut self) -> Result<(), Error<IF>> {
        let present = self.virtual_sensor_present()?;
        let mut sizes = EventSizeTable::new();
        let sensor_ids = present
            .iter_ones()
            .map(|index| index as u8)
            .filter(|sensor_id| *sensor_id != 0 && *sensor_id < SYSTEM_ID_THRESHOLD);
        for sensor_id in sensor_ids {
            let info = self.sensor_info(sensor_id)?;
            debug!(
                "Sensor {} present with {} byte records",
                sensor_id, info.event_size
            );
            sizes.set_event_size(sensor_id, info.event_size)?;
        }
        self.sizes = sizes;
        Ok(())
    }

    /// Configure a virtual sensor. A `sample_rate` of 0 disables it.
    ///
    /// `latency` is in milliseconds, and can be at most [`MAX_SENSOR_LATENCY`].
    pub fn set_virtual_sensor_config(
        &mut self,
        sensor_id: u8,
        sample_rate: f32,
        latency: u32,
    ) -> Result<(), Error<IF>> {
        if latency > MAX_SENSOR_LATENCY {
            return Err(LibraryError::InvalidParam("latency is limited to 24 bits").into());
        }
        if sample_rate.is_nan() || sample_rate < 0.0 {
            return Err(LibraryError::InvalidParam("sample rate must be positive").into());
        }
        let mut payload = [0u8; 8];
        payload[0] = sensor_id;
        payload[1..5].copy_from_slice(&sample_rate.to_le_bytes());
        payload[5..8].copy_from_slice(&latency.to_le_bytes()[..3]);
        self.hif.execute_command(command::CONFIGURE_SENSOR, &payload)
    }

    /// Read the current configuration of a virtual sensor.
    pub fn virtual_sensor_config(&mut self, sensor_id: u8) -> Result<SensorConfig, Error<IF>> {
        let mut page = [0u8; SensorConfig::LENGTH];
        let length = self.hif.get_parameter(
            parameter::SENSOR_CONFIG_BASE + sensor_id as u16,
            &mut page,
        )?;
        Ok(SensorConfig::from_bytes(&page[..length])?)
    }

    /// Discard whatever a sensor has waiting in the FIFOs.
    ///
    /// A flush complete meta event is generated once it's done.
    pub fn flush_fifo(&mut self, sensor_id: u8) -> Result<(), Error<IF>> {
        self.hif
            .execute_command(command::FIFO_FLUSH, &[sensor_id, 0, 0, 0])
    }

    pub fn fifo_control(&mut self) -> Result<FifoControl, Error<IF>> {
        let mut page = [0u8; FifoControl::LENGTH];
        let length = self.hif.get_parameter(parameter::FIFO_CONTROL, &mut page)?;
        Ok(FifoControl::from_bytes(&page[..length])?)
    }

    fifo_watermark! {
        wake_up,
        "The wake-up FIFO watermark, in bytes.",
        "Set the wake-up FIFO watermark. The host interrupt fires once this much data is waiting."
    }

    fifo_watermark! {
        non_wake_up,
        "The non-wake-up FIFO watermark, in bytes.",
        "Set the non-wake-up FIFO watermark. The host interrupt fires once this much data is waiting."
    }

    fn meta_event_parameter(wake_up: bool) -> u16 {
        if wake_up {
            parameter::META_EVENT_CONTROL_WAKE_UP
        } else {
            parameter::META_EVENT_CONTROL_NON_WAKE_UP
        }
    }

    fn meta_event_page(&mut self, wake_up: bool) -> Result<[u8; 8], Error<IF>> {
        let mut page = [0u8; 8];
        self.hif
            .get_parameter(Self::meta_event_parameter(wake_up), &mut page)?;
        Ok(page)
    }

    /// Whether a meta event type is reported in the wake-up or non-wake-up FIFO.
    pub fn meta_event_control(
        &mut self,
        event_type: MetaEventType,
        wake_up: bool,
    ) -> Result<MetaEventControl, Error<IF>> {
        let page = self.meta_event_page(wake_up)?;
        // Two bits per event type, interrupt enable then enable, starting from type 1
        let bit = (u8::from(event_type) as usize - 1) * 2;
        let bits = page.view_bits::<Lsb0>();
        Ok(MetaEventControl {
            enabled: bits[bit + 1],
            interrupt_enabled: bits[bit],
        })
    }

    pub fn set_meta_event_control(
        &mut self,
        event_type: MetaEventType,
        wake_up: bool,
        control: MetaEventControl,
    ) -> Result<(), Error<IF>> {
        let mut page = self.meta_event_page(wake_up)?;
        let bit = (u8::from(event_type) as usize - 1) * 2;
        let bits = page.view_bits_mut::<Lsb0>();
        bits.set(bit, control.interrupt_enabled);
        bits.set(bit + 1, control.enabled);
        self.hif
            .set_parameter(Self::meta_event_parameter(wake_up), &page)
    }

    fn calibration_command(
        &mut self,
        opcode: u16,
        expected: u16,
        sensor_id: u8,
    ) -> Result<CalibrationResult, Error<IF>> {
        let mut response = [0u8; CalibrationResult::LENGTH];
        let length = self.hif.command_with_status(
            opcode,
            &[],
            &[sensor_id, 0, 0, 0],
            expected,
            STATUS_READY_RETRIES,
            &mut response,
        )?;
        let result = CalibrationResult::from_bytes(&response[..length])?;
        if result.sensor_id != sensor_id {
            return Err(LibraryError::InvalidData("calibration result is for a different sensor").into());
        }
        Ok(result)
    }

    /// Run the self test of a physical sensor.
    pub fn self_test(&mut self, sensor_id: u8) -> Result<CalibrationResult, Error<IF>> {
        info!("Running self test for physical sensor {}", sensor_id);
        self.calibration_command(
            command::REQUEST_SELF_TEST,
            status_code::SELF_TEST_RESULT,
            sensor_id,
        )
    }

    /// Run fast offset compensation for a physical sensor. The sensor needs to be still.
    pub fn fast_offset_compensation(
        &mut self,
        sensor_id: u8,
    ) -> Result<CalibrationResult, Error<IF>> {
        info!("Running offset compensation for physical sensor {}", sensor_id);
        self.calibration_command(command::REQUEST_FOC, status_code::FOC_RESULT, sensor_id)
    }

    /// Read the firmware version parameter into `buffer`, returning its length.
    pub fn firmware_version(&mut self, buffer: &mut [u8]) -> Result<usize, Error<IF>> {
        self.hif.get_parameter(parameter::FIRMWARE_VERSION, buffer)
    }

    fn read_u8(&mut self, address: Address) -> Result<u8, Error<IF>> {
        let mut value = [0u8];
        self.hif.read_registers(address, &mut value)?;
        Ok(value[0])
    }

    fn read_u16(&mut self, address: Address) -> Result<u16, Error<IF>> {
        let mut value = [0u8; 2];
        self.hif.read_registers(address, &mut value)?;
        Ok(u16::from_le_bytes(value))
    }

    pub fn product_id(&mut self) -> Result<u8, Error<IF>> {
        self.read_u8(Address::ProductId)
    }

    pub fn revision_id(&mut self) -> Result<u8, Error<IF>> {
        self.read_u8(Address::RevisionId)
    }

    pub fn chip_id(&mut self) -> Result<u8, Error<IF>> {
        self.read_u8(Address::ChipId)
    }

    pub fn rom_version(&mut self) -> Result<u16, Error<IF>> {
        self.read_u16(Address::RomVersion)
    }

    /// The version of the firmware kernel. 0 if no firmware is running.
    pub fn kernel_version(&mut self) -> Result<u16, Error<IF>> {
        self.read_u16(Address::KernelVersion)
    }

    pub fn user_version(&mut self) -> Result<u16, Error<IF>> {
        self.read_u16(Address::UserVersion)
    }

    pub fn host_status(&mut self) -> Result<u8, Error<IF>> {
        self.read_u8(Address::HostStatus)
    }

    pub fn feature_status(&mut self) -> Result<u8, Error<IF>> {
        self.read_u8(Address::FeatureStatus)
    }

    /// The last error the firmware reported. 0 means no error.
    pub fn error_value(&mut self) -> Result<u8, Error<IF>> {
        self.read_u8(Address::ErrorValue)
    }

    pub fn boot_status(&mut self) -> Result<BootStatus, Error<IF>> {
        self.hif.boot_status()
    }

    pub fn interrupt_status(&mut self) -> Result<InterruptStatus, Error<IF>> {
        self.hif.interrupt_status()
    }

    /// The time the host interrupt was last asserted, in nanoseconds.
    pub fn host_interrupt_timestamp_ns(&mut self) -> Result<u64, Error<IF>> {
        let mut raw = [0u8; 5];
        self.hif
            .read_registers(Address::HostInterruptTimestamp, &mut raw)?;
        let mut ticks = &raw[..];
        Ok(ticks.get_u40() * TIMESTAMP_TICK_NS)
    }

    /// Reset the hub, and wait for the host interface to come back.
    ///
    /// Any firmware in RAM is lost, so the sensor list and timestamps are forgotten as well.
    pub fn soft_reset(&mut self) -> Result<(), Error<IF>> {
        info!("Resetting sensor hub");
        self.hif
            .write_registers(Address::ResetRequest, &[RESET_REQUEST])?;
        self.sizes = EventSizeTable::new();
        self.timestamps = [0; 3];
        for _ in 0..BOOT_VERIFY_RETRIES {
            if self.boot_status()?.host_interface_ready() {
                return Ok(());
            }
            self.hif.delay_us(BOOT_VERIFY_INTERVAL_US);
        }
        warn!("Timed out waiting for the host interface after reset");
        Err(LibraryError::Timeout.into())
    }

    pub fn host_interface_control(&mut self) -> Result<HostInterfaceControl, Error<IF>> {
        self.hif.read_register()
    }

    pub fn set_host_interface_control(
        &mut self,
        register: HostInterfaceControl,
    ) -> Result<(), Error<IF>> {
        self.hif.write_register(register)
    }

    set_register_field!(
        host_interface_control,
        async_status_channel,
        "Deliver status and debug records through the status FIFO instead of on request."
    );
    set_register_field!(
        host_interface_control,
        host_suspended,
        "Tell the hub whether the host is suspended."
    );
    set_register_field!(
        host_interface_control,
        timestamp_event_control,
        "Report host interrupt timestamps as status records."
    );

    pub fn host_interrupt_control(&mut self) -> Result<HostInterruptControl, Error<IF>> {
        self.hif.read_register()
    }

    pub fn set_host_interrupt_control(
        &mut self,
        register: HostInterruptControl,
    ) -> Result<(), Error<IF>> {
        self.hif.write_register(register)
    }

    set_register_field!(
        host_interrupt_control,
        wake_up_fifo_disabled,
        "Mask the wake-up FIFO interrupt."
    );
    set_register_field!(
        host_interrupt_control,
        non_wake_up_fifo_disabled,
        "Mask the non-wake-up FIFO interrupt."
    );
    set_register_field!(
        host_interrupt_control,
        status_disabled,
        "Mask the synchronous status interrupt."
    );
    set_register_field!(
        host_interrupt_control,
        debug_disabled,
        "Mask the asynchronous status and debug interrupt."
    );
    set_register_field!(
        host_interrupt_control,
        fault_disabled,
        "Mask the fault interrupt."
    );
    set_register_field!(
        host_interrupt_control,
        active_low,
        "Drive the interrupt line active low."
    );
    set_register_field!(
        host_interrupt_control,
        edge_triggered,
        "Pulse the interrupt line instead of holding it."
    );
    set_register_field!(
        host_interrupt_control,
        open_drain,
        "Drive the interrupt line open drain."
    );

    /// Upload a firmware image to RAM. See [`HostInterface::upload_firmware_to_ram`].
    pub fn upload_firmware_to_ram(&mut self, image: &[u8]) -> Result<(), Error<IF>> {
        self.hif.upload_firmware_to_ram(image)
    }

    /// Write a firmware image to flash. See [`HostInterface::upload_firmware_to_flash`].
    pub fn upload_firmware_to_flash(&mut self, image: &[u8]) -> Result<(), Error<IF>> {
        self.hif.upload_firmware_to_flash(image)
    }

    pub fn erase_flash(&mut self, start_address: u32, end_address: u32) -> Result<(), Error<IF>> {
        self.hif.erase_flash(start_address, end_address)
    }

    /// Boot the firmware in RAM. The sensor list has to be [read][Bhy2::update_virtual_sensor_list]
    /// again afterwards.
    pub fn boot_from_ram(&mut self) -> Result<(), Error<IF>> {
        self.timestamps = [0; 3];
        self.hif.boot_from_ram()
    }

    /// Boot the firmware in flash. The sensor list has to be
    /// [read][Bhy2::update_virtual_sensor_list] again afterwards.
    pub fn boot_from_flash(&mut self) -> Result<(), Error<IF>> {
        self.timestamps = [0; 3];
        self.hif.boot_from_flash()
    }
}
