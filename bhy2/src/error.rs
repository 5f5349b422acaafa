// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
#[cfg(feature = "std")]
extern crate std;

use core::fmt;

use crate::interface::Interface;

/// Errors that don't involve the bus.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LibraryError {
    /// An argument was out of range, or a response didn't match the request it answers.
    InvalidParam(&'static str),

    /// A firmware image doesn't start with the expected magic bytes.
    InvalidImage,

    /// A bounded wait expired, or a response echoed a different code than requested.
    Timeout,

    /// The hub rejected an uploaded firmware image.
    FirmwareVerifyFailed,

    /// A caller-provided buffer can't hold the data.
    BufferTooSmall,

    /// The value doesn't name one of the three FIFOs.
    InvalidFifoType(u8),

    /// A present sensor reported a zero event size, which would stall the FIFO parser.
    InvalidEventSize(u8),

    /// Every callback slot is in use.
    RegistryFull,

    /// The sensor ID already has a callback; deregister it first.
    AlreadyRegistered(u8),

    /// A value from the hub is malformed in some way.
    InvalidData(&'static str),
}

impl fmt::Display for LibraryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibraryError::InvalidParam(msg) => write!(f, "invalid parameter: {}", msg),
            LibraryError::InvalidImage => write!(f, "firmware image has an invalid header"),
            LibraryError::Timeout => write!(f, "timed out waiting for the sensor hub"),
            LibraryError::FirmwareVerifyFailed => write!(f, "firmware verification failed"),
            LibraryError::BufferTooSmall => write!(f, "buffer too small"),
            LibraryError::InvalidFifoType(raw) => write!(f, "invalid FIFO type {}", raw),
            LibraryError::InvalidEventSize(id) => {
                write!(f, "sensor {} reported an invalid event size", id)
            }
            LibraryError::RegistryFull => write!(f, "no free callback slots"),
            LibraryError::AlreadyRegistered(id) => {
                write!(f, "sensor {} already has a callback", id)
            }
            LibraryError::InvalidData(msg) => write!(f, "{}", msg),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for LibraryError {}

pub enum Error<IF>
where
    IF: Interface,
{
    /// Errors originating from the bus implementation.
    BusError(IF::Error),

    /// Errors originating from within this library.
    LibraryError(LibraryError),
}

impl<IF> Error<IF>
where
    IF: Interface,
{
    /// The library error, if this isn't a bus error.
    pub fn library_error(&self) -> Option<LibraryError> {
        match self {
            Error::BusError(_) => None,
            Error::LibraryError(err) => Some(*err),
        }
    }
}

// Custom Debug implementation so that the interface doesn't need to implement Debug.
impl<IF> fmt::Debug for Error<IF>
where
    IF: Interface,
    IF::Error: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BusError(bus_error) => f.debug_tuple("Error::BusError").field(bus_error).finish(),
            Error::LibraryError(err) => f.debug_tuple("Error::LibraryError").field(err).finish(),
        }
    }
}

impl<IF> fmt::Display for Error<IF>
where
    IF: Interface,
    IF::Error: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BusError(bus_error) => write!(f, "Bus Error: {:?}", bus_error),
            Error::LibraryError(err) => write!(f, "Library Error: {}", err),
        }
    }
}

impl<IF> Clone for Error<IF>
where
    IF: Interface,
    IF::Error: Clone,
{
    fn clone(&self) -> Self {
        match self {
            Error::BusError(bus_error) => Error::BusError(bus_error.clone()),
            Error::LibraryError(err) => Error::LibraryError(*err),
        }
    }
}

impl<IF> PartialEq for Error<IF>
where
    IF: Interface,
    IF::Error: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::BusError(lhs), Error::BusError(rhs)) => lhs == rhs,
            (Error::LibraryError(lhs), Error::LibraryError(rhs)) => lhs == rhs,
            _ => false,
        }
    }
}

#[cfg(feature = "std")]
impl<IF> std::error::Error for Error<IF>
where
    IF: Interface,
    IF::Error: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::BusError(bus_error) => Some(bus_error),
            Error::LibraryError(lib_err) => Some(lib_err),
        }
    }
}

impl<IF> From<LibraryError> for Error<IF>
where
    IF: Interface,
{
    fn from(lib_err: LibraryError) -> Self {
        Self::LibraryError(lib_err)
    }
}
