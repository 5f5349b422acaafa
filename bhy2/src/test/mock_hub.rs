// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
extern crate alloc;

use alloc::collections::{BTreeMap, VecDeque};
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{Cell, Ref, RefCell};

use embedded_hal::blocking::delay::DelayUs;

use crate::fifo::FifoType;
use crate::hif::{command, parameter, status_code, COMMAND_HEADER_LEN, PARAMETER_READ_FLAG};
use crate::interface::Interface;
use crate::register::Address;

/// The register map runs from 0x00 through 0x3F.
const REGISTER_COUNT: usize = 0x40;

const RECENT_OPERATIONS_QUEUE_LENGTH: usize = 64;

/// Boot status with only the host interface ready bit set, as after a reset with no firmware.
const BOOT_STATUS_READY: u8 = 0x10;

/// Boot status with the host interface ready and the RAM image verified.
const BOOT_STATUS_RAM_VERIFIED: u8 = 0x30;

const INTERRUPT_ASSERTED: u8 = 0x01;
const INTERRUPT_WAKE_UP_FIFO: u8 = 0x02;
const INTERRUPT_NON_WAKE_UP_FIFO: u8 = 0x08;
const INTERRUPT_STATUS_READY: u8 = 0x20;
const INTERRUPT_ASYNC_STATUS: u8 = 0x40;

const ASYNC_STATUS_CHANNEL: u8 = 0x80;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum MockError {
    /// The given register can't be accessed that way.
    IllegalAccess(u8),

    /// The requested operation is not allowed.
    ///
    /// This covers things like reading FIFO data without reading the available length first,
    /// reading more than is available, or a command header split across writes.
    IllegalOperation,

    /// A failure requested by the test.
    Injected,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum BusOperation {
    Write { register: u8, length: usize },
    Read { register: u8, length: usize },
}

/// A command as the hub saw it, reassembled from however many transfers it took.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ReceivedCommand {
    pub(crate) opcode: u16,
    /// The length field of the header, as sent.
    pub(crate) header_length: u16,
    /// Everything after the header, padding included.
    pub(crate) payload: Vec<u8>,
}

struct HubState {
    registers: [u8; REGISTER_COUNT],
    parameters: BTreeMap<u16, Vec<u8>>,
    sensor_controls: BTreeMap<u16, Vec<u8>>,
    pending_command: Option<(ReceivedCommand, usize)>,
    commands: Vec<ReceivedCommand>,
    command_transfers: Vec<usize>,
    status_response: VecDeque<u8>,
    fifos: [VecDeque<u8>; 3],
    fifo_remaining: [usize; 3],
    verified_boot_status: u8,
    calibration_status: u8,
    stall_status: bool,
    echo_override: Option<u16>,
    control_echo_override: Option<u8>,
    fail_writes_after: Option<usize>,
    write_count: usize,
    interrupt_status_reads: usize,
    hif_control_writes: Vec<u8>,
    recent_operations: VecDeque<BusOperation>,
}

impl HubState {
    fn new() -> Self {
        let mut registers = [0u8; REGISTER_COUNT];
        registers[Address::ProductId as usize] = 0x89;
        registers[Address::RevisionId as usize] = 0x03;
        registers[Address::RomVersion as usize..][..2].copy_from_slice(&0x142Eu16.to_le_bytes());
        registers[Address::ChipId as usize] = 0x70;
        registers[Address::BootStatus as usize] = BOOT_STATUS_READY;
        Self {
            registers,
            parameters: BTreeMap::new(),
            sensor_controls: BTreeMap::new(),
            pending_command: None,
            commands: Vec::new(),
            command_transfers: Vec::new(),
            status_response: VecDeque::new(),
            fifos: Default::default(),
            fifo_remaining: [0; 3],
            verified_boot_status: BOOT_STATUS_RAM_VERIFIED,
            calibration_status: 0,
            stall_status: false,
            echo_override: None,
            control_echo_override: None,
            fail_writes_after: None,
            write_count: 0,
            interrupt_status_reads: 0,
            hif_control_writes: Vec::new(),
            recent_operations: VecDeque::new(),
        }
    }

    fn async_status(&self) -> bool {
        self.registers[Address::HostInterfaceControl as usize] & ASYNC_STATUS_CHANNEL != 0
    }

    fn interrupt_status(&self) -> u8 {
        let mut status = 0;
        if !self.fifos[FifoType::WakeUp.index()].is_empty() {
            status |= INTERRUPT_WAKE_UP_FIFO;
        }
        if !self.fifos[FifoType::NonWakeUp.index()].is_empty() {
            status |= INTERRUPT_NON_WAKE_UP_FIFO;
        }
        if self.async_status() {
            if !self.fifos[FifoType::Status.index()].is_empty() {
                status |= INTERRUPT_ASYNC_STATUS;
            }
        } else if !self.status_response.is_empty() && !self.stall_status {
            status |= INTERRUPT_STATUS_READY;
        }
        if status != 0 {
            status |= INTERRUPT_ASSERTED;
        }
        status
    }

    fn queue_status(&mut self, code: u16, payload: &[u8]) {
        self.status_response.extend(code.to_le_bytes());
        self.status_response
            .extend((payload.len() as u16).to_le_bytes());
        self.status_response.extend(payload.iter().copied());
    }

    fn read_fifo(&mut self, index: usize, buffer: &mut [u8]) -> Result<(), MockError> {
        if self.fifo_remaining[index] == 0 {
            // A new batch, so this must be the read of how much is waiting
            if buffer.len() != 2 {
                return Err(MockError::IllegalOperation);
            }
            let available = self.fifos[index].len().min(u16::MAX as usize);
            buffer.copy_from_slice(&(available as u16).to_le_bytes());
            self.fifo_remaining[index] = available;
        } else {
            if buffer.len() > self.fifo_remaining[index] {
                return Err(MockError::IllegalOperation);
            }
            for byte in buffer.iter_mut() {
                *byte = self.fifos[index].pop_front().unwrap_or(0);
            }
            self.fifo_remaining[index] -= buffer.len();
        }
        Ok(())
    }

    fn read_status_response(&mut self, buffer: &mut [u8]) -> Result<(), MockError> {
        if buffer.len() > self.status_response.len() {
            return Err(MockError::IllegalOperation);
        }
        for byte in buffer.iter_mut() {
            *byte = self.status_response.pop_front().unwrap_or(0);
        }
        Ok(())
    }

    fn write_command_channel(&mut self, mut data: &[u8]) -> Result<(), MockError> {
        self.command_transfers.push(data.len());
        let (mut pending, expected) = match self.pending_command.take() {
            Some(pending) => pending,
            None => {
                if data.len() < COMMAND_HEADER_LEN {
                    return Err(MockError::IllegalOperation);
                }
                let opcode = u16::from_le_bytes([data[0], data[1]]);
                let header_length = u16::from_le_bytes([data[2], data[3]]);
                data = &data[COMMAND_HEADER_LEN..];
                let expected = if opcode == command::UPLOAD_TO_PROGRAM_RAM {
                    header_length as usize * 4
                } else {
                    header_length as usize
                };
                let received = ReceivedCommand {
                    opcode,
                    header_length,
                    payload: Vec::new(),
                };
                (received, expected)
            }
        };
        pending.payload.extend_from_slice(data);
        if pending.payload.len() > expected {
            return Err(MockError::IllegalOperation);
        } else if pending.payload.len() == expected {
            self.handle_command(&pending);
            self.commands.push(pending);
        } else {
            self.pending_command = Some((pending, expected));
        }
        Ok(())
    }

    fn handle_command(&mut self, received: &ReceivedCommand) {
        let opcode = received.opcode;
        let payload = &received.payload[..];
        let control_range = parameter::PHYSICAL_SENSOR_CONTROL_BASE
            ..parameter::PHYSICAL_SENSOR_CONTROL_BASE + 0x100;
        if opcode & PARAMETER_READ_FLAG != 0 {
            let parameter = opcode & !PARAMETER_READ_FLAG;
            let response = self.parameters.get(&parameter).cloned().unwrap_or_default();
            let code = self.echo_override.unwrap_or(parameter);
            self.queue_status(code, &response);
        } else if control_range.contains(&opcode) {
            let code = payload.first().copied().unwrap_or(0);
            if code & 0x80 != 0 {
                let echoed = self.control_echo_override.unwrap_or(code);
                let mut response = alloc::vec![echoed];
                if let Some(data) = self.sensor_controls.get(&opcode) {
                    response.extend_from_slice(data);
                }
                self.parameters.insert(opcode, response);
            } else {
                self.sensor_controls
                    .insert(opcode, payload.get(1..).unwrap_or_default().to_vec());
            }
        } else {
            match opcode {
                command::UPLOAD_TO_PROGRAM_RAM
                | command::BOOT_PROGRAM_RAM
                | command::BOOT_FLASH => {
                    self.registers[Address::BootStatus as usize] = self.verified_boot_status;
                }
                command::WRITE_FLASH => {
                    self.registers[Address::BootStatus as usize] = self.verified_boot_status;
                    self.queue_status(status_code::FLASH_WRITE_COMPLETE, &[]);
                }
                command::ERASE_FLASH => {
                    self.queue_status(status_code::FLASH_ERASE_COMPLETE, &[]);
                }
                command::REQUEST_SELF_TEST | command::REQUEST_FOC => {
                    let sensor_id = payload.first().copied().unwrap_or(0);
                    let mut result = [0u8; 8];
                    result[0] = sensor_id;
                    result[1] = self.calibration_status;
                    result[2..4].copy_from_slice(&(-3i16).to_le_bytes());
                    result[4..6].copy_from_slice(&5i16.to_le_bytes());
                    result[6..8].copy_from_slice(&(-7i16).to_le_bytes());
                    let code = if opcode == command::REQUEST_SELF_TEST {
                        status_code::SELF_TEST_RESULT
                    } else {
                        status_code::FOC_RESULT
                    };
                    self.queue_status(code, &result);
                }
                command::CONFIGURE_SENSOR => {
                    // sensor ID, f32 rate, 24-bit latency
                    let sensor_id = payload[0] as u16;
                    let mut page = [0u8; 12];
                    page[0..4].copy_from_slice(&payload[1..5]);
                    page[4..7].copy_from_slice(&payload[5..8]);
                    self.parameters
                        .insert(parameter::SENSOR_CONFIG_BASE + sensor_id, page.to_vec());
                }
                parameter::FIRMWARE_VERSION..=0x0FFF => {
                    self.parameters.insert(opcode, payload.to_vec());
                }
                _ => (),
            }
        }
    }

    fn reset(&mut self) {
        self.pending_command = None;
        self.status_response.clear();
        self.fifos.iter_mut().for_each(VecDeque::clear);
        self.fifo_remaining = [0; 3];
        self.registers[Address::HostInterfaceControl as usize] = 0;
        self.registers[Address::BootStatus as usize] = BOOT_STATUS_READY;
    }
}

/// A sensor hub simulated just deeply enough to exercise the host interface.
///
/// Clones share state, so keep a clone around to inspect the hub after handing one to the driver.
#[derive(Clone)]
pub(crate) struct MockSensorHub {
    state: Rc<RefCell<HubState>>,
}

impl MockSensorHub {
    pub(crate) fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(HubState::new())),
        }
    }

    pub(crate) fn register(&self, address: Address) -> u8 {
        self.state.borrow().registers[address as usize]
    }

    pub(crate) fn set_registers(&self, address: Address, data: &[u8]) {
        let start = address as usize;
        self.state.borrow_mut().registers[start..start + data.len()].copy_from_slice(data);
    }

    /// Set the contents returned when a parameter is read.
    pub(crate) fn set_parameter(&self, parameter: u16, data: &[u8]) {
        self.state
            .borrow_mut()
            .parameters
            .insert(parameter, data.to_vec());
    }

    pub(crate) fn parameter(&self, parameter: u16) -> Option<Vec<u8>> {
        self.state.borrow().parameters.get(&parameter).cloned()
    }

    pub(crate) fn push_fifo(&self, fifo_type: FifoType, data: &[u8]) {
        self.state.borrow_mut().fifos[fifo_type.index()].extend(data.iter().copied());
    }

    pub(crate) fn fifo_len(&self, fifo_type: FifoType) -> usize {
        self.state.borrow().fifos[fifo_type.index()].len()
    }

    /// The boot status after firmware is uploaded or booted.
    pub(crate) fn set_verified_boot_status(&self, status: u8) {
        self.state.borrow_mut().verified_boot_status = status;
    }

    /// The status byte reported by self tests and offset compensation.
    pub(crate) fn set_calibration_status(&self, status: u8) {
        self.state.borrow_mut().calibration_status = status;
    }

    /// Never report a status response as ready.
    pub(crate) fn set_stall_status(&self, stall: bool) {
        self.state.borrow_mut().stall_status = stall;
    }

    /// Answer parameter reads with this code instead of the parameter ID.
    pub(crate) fn set_echo_override(&self, code: Option<u16>) {
        self.state.borrow_mut().echo_override = code;
    }

    /// Echo this control code in sensor control reads instead of the requested one.
    pub(crate) fn set_control_echo_override(&self, code: Option<u8>) {
        self.state.borrow_mut().control_echo_override = code;
    }

    /// How many bytes of synchronous status response haven't been read yet.
    pub(crate) fn pending_status_len(&self) -> usize {
        self.state.borrow().status_response.len()
    }

    /// Fail every write after the first `count`.
    pub(crate) fn fail_writes_after(&self, count: usize) {
        let mut state = self.state.borrow_mut();
        state.fail_writes_after = Some(state.write_count + count);
    }

    pub(crate) fn commands(&self) -> Ref<Vec<ReceivedCommand>> {
        Ref::map(self.state.borrow(), |state| &state.commands)
    }

    /// The length of every write to the command channel.
    pub(crate) fn command_transfers(&self) -> Vec<usize> {
        self.state.borrow().command_transfers.clone()
    }

    pub(crate) fn interrupt_status_reads(&self) -> usize {
        self.state.borrow().interrupt_status_reads
    }

    /// Every value written to the host interface control register.
    pub(crate) fn hif_control_writes(&self) -> Vec<u8> {
        self.state.borrow().hif_control_writes.clone()
    }

    pub(crate) fn sensor_control(&self, sensor_id: u8) -> Option<Vec<u8>> {
        let parameter = parameter::PHYSICAL_SENSOR_CONTROL_BASE + sensor_id as u16;
        self.state.borrow().sensor_controls.get(&parameter).cloned()
    }

    pub(crate) fn recent_operations(&self) -> Ref<VecDeque<BusOperation>> {
        Ref::map(self.state.borrow(), |state| &state.recent_operations)
    }

    pub(crate) fn clear_log(&self) {
        let mut state = self.state.borrow_mut();
        state.commands.clear();
        state.command_transfers.clear();
        state.recent_operations.clear();
        state.interrupt_status_reads = 0;
    }

    fn add_operation(&self, operation: BusOperation) {
        let mut state = self.state.borrow_mut();
        state.recent_operations.push_front(operation);
        state
            .recent_operations
            .truncate(RECENT_OPERATIONS_QUEUE_LENGTH);
    }
}

impl Interface for MockSensorHub {
    type Error = MockError;

    fn read_registers(&mut self, register: u8, buffer: &mut [u8]) -> Result<(), Self::Error> {
        if buffer.is_empty() {
            return Err(MockError::IllegalOperation);
        }
        self.add_operation(BusOperation::Read {
            register,
            length: buffer.len(),
        });
        let mut state = self.state.borrow_mut();
        const WAKE_UP: u8 = Address::WakeUpFifoChannel as u8;
        const NON_WAKE_UP: u8 = Address::NonWakeUpFifoChannel as u8;
        const STATUS: u8 = Address::StatusChannel as u8;
        const INTERRUPT_STATUS: u8 = Address::InterruptStatus as u8;
        match register {
            WAKE_UP => state.read_fifo(FifoType::WakeUp.index(), buffer),
            NON_WAKE_UP => state.read_fifo(FifoType::NonWakeUp.index(), buffer),
            STATUS if state.async_status() => state.read_fifo(FifoType::Status.index(), buffer),
            STATUS => state.read_status_response(buffer),
            INTERRUPT_STATUS if buffer.len() == 1 => {
                state.interrupt_status_reads += 1;
                buffer[0] = state.interrupt_status();
                Ok(())
            }
            _ if register > STATUS && register as usize + buffer.len() <= REGISTER_COUNT => {
                let start = register as usize;
                buffer.copy_from_slice(&state.registers[start..start + buffer.len()]);
                Ok(())
            }
            _ => Err(MockError::IllegalAccess(register)),
        }
    }

    fn write_registers(&mut self, register: u8, data: &[u8]) -> Result<(), Self::Error> {
        {
            let mut state = self.state.borrow_mut();
            state.write_count += 1;
            if let Some(limit) = state.fail_writes_after {
                if state.write_count > limit {
                    return Err(MockError::Injected);
                }
            }
        }
        self.add_operation(BusOperation::Write {
            register,
            length: data.len(),
        });
        let mut state = self.state.borrow_mut();
        const COMMAND: u8 = Address::CommandChannel as u8;
        const STATUS: u8 = Address::StatusChannel as u8;
        const RESET_REQUEST: u8 = Address::ResetRequest as u8;
        const HOST_INTERFACE_CONTROL: u8 = Address::HostInterfaceControl as u8;
        match register {
            COMMAND => state.write_command_channel(data),
            RESET_REQUEST if data == [0x01] => {
                state.reset();
                Ok(())
            }
            HOST_INTERFACE_CONTROL if data.len() == 1 => {
                state.hif_control_writes.push(data[0]);
                state.registers[HOST_INTERFACE_CONTROL as usize] = data[0];
                Ok(())
            }
            _ if register > STATUS && register as usize + data.len() <= REGISTER_COUNT => {
                let start = register as usize;
                state.registers[start..start + data.len()].copy_from_slice(data);
                Ok(())
            }
            _ => Err(MockError::IllegalAccess(register)),
        }
    }
}

/// A delay that doesn't, keeping track of how long it was asked to wait instead.
#[derive(Clone, Debug, Default)]
pub(crate) struct MockDelay {
    elapsed_us: Rc<Cell<u64>>,
}

impl MockDelay {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn elapsed_us(&self) -> u64 {
        self.elapsed_us.get()
    }
}

impl DelayUs<u32> for MockDelay {
    fn delay_us(&mut self, us: u32) {
        self.elapsed_us.set(self.elapsed_us.get() + us as u64);
    }
}
