// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Host interface registers and the bit fields of the ones the driver manipulates.
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::util::is_bit_set;

/// Register addresses in the host interface register map.
///
/// Only the registers this crate uses are listed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Address {
    /// Channel 0, commands and parameter writes. Write-only, streaming.
    CommandChannel = 0x00,
    /// Channel 1, the wake-up FIFO. Read-only, streaming.
    WakeUpFifoChannel = 0x01,
    /// Channel 2, the non-wake-up FIFO. Read-only, streaming.
    NonWakeUpFifoChannel = 0x02,
    /// Channel 3, status and debug. Read-only, streaming.
    StatusChannel = 0x03,
    ChipControl = 0x05,
    HostInterfaceControl = 0x06,
    HostInterruptControl = 0x07,
    ResetRequest = 0x14,
    TimestampEventRequest = 0x15,
    HostControl = 0x16,
    HostStatus = 0x17,
    ProductId = 0x1C,
    RevisionId = 0x1D,
    /// Two bytes, little-endian.
    RomVersion = 0x1E,
    /// Two bytes, little-endian.
    KernelVersion = 0x20,
    /// Two bytes, little-endian.
    UserVersion = 0x22,
    FeatureStatus = 0x24,
    BootStatus = 0x25,
    /// Five bytes, little-endian, in timestamp ticks.
    HostInterruptTimestamp = 0x26,
    ChipId = 0x2B,
    InterruptStatus = 0x2D,
    ErrorValue = 0x2E,
    ErrorAux = 0x2F,
    DebugValue = 0x30,
    DebugState = 0x31,
}

impl From<Address> for u16 {
    fn from(address: Address) -> Self {
        u8::from(address) as u16
    }
}

/// Trait for the single byte registers with a structured layout.
pub trait Register: Into<u8> + From<u8> {
    /// The address of this register in the host interface register map.
    fn address() -> Address;
}

/// Generate a getter for a single flag bit.
macro_rules! flag_getter {
    ($name:ident, $bit:literal, $doc:literal) => {
        #[doc = $doc]
        pub fn $name(&self) -> bool {
            is_bit_set(self.0, $bit)
        }
    };
}

/// Generate a getter and a setter for a single flag bit.
macro_rules! flag_accessors {
    ($name:ident, $bit:literal, $doc:literal) => {
        flag_getter!($name, $bit, $doc);

        paste::paste! {
            #[doc = $doc]
            pub fn [< set_ $name >](&mut self, value: bool) {
                if value {
                    self.0 |= 1 << $bit;
                } else {
                    self.0 &= !(1 << $bit);
                }
            }
        }
    };
}

/// Boot status register (0x25).
///
/// Reports the progress of firmware verification and whether the host interface is usable.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BootStatus(u8);

impl BootStatus {
    flag_getter!(flash_detected, 0, "A flash device was detected.");
    flag_getter!(flash_verify_done, 1, "Firmware in flash has been verified.");
    flag_getter!(flash_verify_error, 2, "Firmware in flash failed verification.");
    flag_getter!(no_flash, 3, "No flash device is attached.");
    flag_getter!(
        host_interface_ready,
        4,
        "The host interface is ready for commands."
    );
    flag_getter!(
        firmware_verify_done,
        5,
        "Firmware uploaded to RAM has been verified."
    );
    flag_getter!(
        firmware_verify_error,
        6,
        "Firmware uploaded to RAM failed verification."
    );
    flag_getter!(firmware_idle, 7, "The firmware is halted.");

    /// The host interface is up and either the RAM or flash image has passed verification.
    pub fn firmware_verified(&self) -> bool {
        self.host_interface_ready()
            && (self.firmware_verify_done() || self.flash_verify_done())
            && !self.verify_error()
    }

    /// Either of the verify error bits are set.
    pub fn verify_error(&self) -> bool {
        self.firmware_verify_error() || self.flash_verify_error()
    }
}

impl Register for BootStatus {
    fn address() -> Address {
        Address::BootStatus
    }
}

impl From<u8> for BootStatus {
    fn from(raw: u8) -> Self {
        Self(raw)
    }
}

impl From<BootStatus> for u8 {
    fn from(register: BootStatus) -> Self {
        register.0
    }
}

/// Interrupt status register (0x2D).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct InterruptStatus(u8);

impl InterruptStatus {
    const WAKE_UP_FIFO_MASK: u8 = 0x06;
    const NON_WAKE_UP_FIFO_MASK: u8 = 0x18;

    flag_getter!(asserted, 0, "The host interrupt line is asserted.");
    flag_getter!(
        status_ready,
        5,
        "A synchronous status or parameter response is waiting in the status channel."
    );
    flag_getter!(
        async_status,
        6,
        "Asynchronous status or debug records are waiting in the status channel."
    );
    flag_getter!(reset_or_fault, 7, "The hub reset or hit a fault.");

    /// The wake-up FIFO has data ready, reached its latency or its watermark.
    pub fn wake_up_fifo(&self) -> bool {
        self.0 & Self::WAKE_UP_FIFO_MASK != 0
    }

    /// The non-wake-up FIFO has data ready, reached its latency or its watermark.
    pub fn non_wake_up_fifo(&self) -> bool {
        self.0 & Self::NON_WAKE_UP_FIFO_MASK != 0
    }
}

impl Register for InterruptStatus {
    fn address() -> Address {
        Address::InterruptStatus
    }
}

impl From<u8> for InterruptStatus {
    fn from(raw: u8) -> Self {
        Self(raw)
    }
}

impl From<InterruptStatus> for u8 {
    fn from(register: InterruptStatus) -> Self {
        register.0
    }
}

/// Host interface control register (0x06).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct HostInterfaceControl(u8);

impl HostInterfaceControl {
    flag_accessors!(
        abort_command_channel,
        0,
        "Abort the transfer on the command channel."
    );
    flag_accessors!(
        abort_wake_up_fifo,
        1,
        "Abort the transfer on the wake-up FIFO channel."
    );
    flag_accessors!(
        abort_non_wake_up_fifo,
        2,
        "Abort the transfer on the non-wake-up FIFO channel."
    );
    flag_accessors!(
        abort_status_channel,
        3,
        "Abort the transfer on the status channel."
    );
    flag_accessors!(
        host_suspended,
        4,
        "Tell the hub the host is suspended, so only wake-up events interrupt it."
    );
    flag_accessors!(
        timestamp_event_control,
        6,
        "Report host interrupt timestamps as status records."
    );
    flag_accessors!(
        async_status_channel,
        7,
        "Deliver status records asynchronously, like a FIFO, instead of on request."
    );
}

impl Register for HostInterfaceControl {
    fn address() -> Address {
        Address::HostInterfaceControl
    }
}

impl From<u8> for HostInterfaceControl {
    fn from(raw: u8) -> Self {
        Self(raw)
    }
}

impl From<HostInterfaceControl> for u8 {
    fn from(register: HostInterfaceControl) -> Self {
        register.0
    }
}

/// Host interrupt control register (0x07).
///
/// The "disable" bits mask individual interrupt sources; the remaining bits configure the
/// electrical behaviour of the interrupt line.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct HostInterruptControl(u8);

impl HostInterruptControl {
    flag_accessors!(
        wake_up_fifo_disabled,
        0,
        "Mask the wake-up FIFO interrupt."
    );
    flag_accessors!(
        non_wake_up_fifo_disabled,
        1,
        "Mask the non-wake-up FIFO interrupt."
    );
    flag_accessors!(
        status_disabled,
        2,
        "Mask the synchronous status interrupt."
    );
    flag_accessors!(
        debug_disabled,
        3,
        "Mask the asynchronous status and debug interrupt."
    );
    flag_accessors!(fault_disabled, 4, "Mask the fault interrupt.");
    flag_accessors!(active_low, 5, "Drive the interrupt line active low.");
    flag_accessors!(
        edge_triggered,
        6,
        "Pulse the interrupt line instead of holding it."
    );
    flag_accessors!(open_drain, 7, "Drive the interrupt line open drain.");
}

impl Register for HostInterruptControl {
    fn address() -> Address {
        Address::HostInterruptControl
    }
}

impl From<u8> for HostInterruptControl {
    fn from(raw: u8) -> Self {
        Self(raw)
    }
}

impl From<HostInterruptControl> for u8 {
    fn from(register: HostInterruptControl) -> Self {
        register.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn boot_status_verified() {
        // Host interface ready and RAM image verified
        assert!(BootStatus::from(0x30).firmware_verified());
        // Host interface ready and flash image verified
        assert!(BootStatus::from(0x12).firmware_verified());
        // Verified, but not ready yet
        assert!(!BootStatus::from(0x20).firmware_verified());
        // Ready and verified, but the RAM verification also flagged an error
        let status = BootStatus::from(0x70);
        assert!(!status.firmware_verified());
        assert!(status.verify_error());
    }

    #[test]
    fn interrupt_status_fifos() {
        let status = InterruptStatus::from(0x02);
        assert!(status.wake_up_fifo());
        assert!(!status.non_wake_up_fifo());
        let status = InterruptStatus::from(0x10);
        assert!(!status.wake_up_fifo());
        assert!(status.non_wake_up_fifo());
        let status = InterruptStatus::from(0x60);
        assert!(status.status_ready());
        assert!(status.async_status());
        assert!(!status.reset_or_fault());
    }

    #[test]
    fn host_interface_control_round_trip() {
        let mut register = HostInterfaceControl::from(0x10);
        assert!(register.host_suspended());
        assert!(!register.async_status_channel());
        register.set_async_status_channel(true);
        assert_eq!(u8::from(register), 0x90);
        register.set_host_suspended(false);
        assert_eq!(u8::from(register), 0x80);
    }

    #[test]
    fn host_interrupt_control_bits() {
        let mut register = HostInterruptControl::default();
        register.set_status_disabled(true);
        register.set_open_drain(true);
        assert_eq!(u8::from(register), 0x84);
        assert!(register.status_disabled());
        assert!(!register.debug_disabled());
    }
}
