//! # sdmmc-server
//!
//! > A step-at-a-time SD/MMC driver written in Embedded Rust
//!
//! This crate talks to SD and MMC cards in SPI mode without ever blocking.
//! Card initialisation, single block reads and single block writes are each
//! written as explicit state machines. Every call into the driver performs
//! one bounded unit of work (send a command, clock a few bytes, check a
//! timer) and then hands control back, so a cooperative scheduler or an RTOS
//! task can interleave the card with other work.
//!
//! It is `#![no_std]` and does not use `alloc`.
//!
//! ## Using the crate
//!
//! You will need something that implements [`Transport`]: byte exchange,
//! chip select, SPI clock switching and a millisecond countdown timer. An
//! implementation over `embedded-hal` 1.0 is supplied as [`SpiTransport`].
//!
//! Requests go through a [`Transaction`] mailbox which is handed to
//! [`Server::step`] once per scheduler tick:
//!
//! ```rust
//! use sdmmc_server::{Device, Request, Server, Transaction, Transport};
//!
//! fn read_first_block<T: Transport>(transport: T) -> Option<[u8; 512]> {
//!     let mut server = Server::new(transport);
//!     let mut trans = Transaction::new();
//!     trans.device = Some(Device::new());
//!     trans.submit(Request::Init).ok()?;
//!     server.run(&mut trans).ok()?;
//!
//!     trans.sector = 0;
//!     trans.submit(Request::Read).ok()?;
//!     while !trans.is_idle() {
//!         // ... do other useful work here ...
//!         server.step(&mut trans);
//!     }
//!     trans.error_code.ok()?;
//!     let mut block = [0u8; 512];
//!     block.copy_from_slice(&trans.data);
//!     Some(block)
//! }
//! ```
//!
//! ## Features
//!
//! * `log`: Enabled by default. Generates log messages using the `log` crate.
//! * `defmt-log`: By turning off the default features and enabling the
//!   `defmt-log` feature you can configure this crate to log messages over defmt
//!   instead.
//!
//! You cannot enable both the `log` feature and the `defmt-log` feature.

#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]

#[cfg(test)]
#[macro_use]
extern crate hex_literal;

#[macro_use]
mod structure;

pub mod blockdevice;
pub mod sdcard;
pub mod server;

#[doc(inline)]
pub use blockdevice::{DataBuffer, BLOCK_LEN};

#[doc(inline)]
pub use sdcard::{
    CardType, Clock, ClockSpeed, DebugCounters, Device, Error, Options, SpiTransport, Timeouts,
    Transport, TransportError,
};

#[doc(inline)]
pub use server::{Occupied, Request, Server, Status, Transaction};

#[cfg(all(feature = "defmt-log", feature = "log"))]
compile_error!("Cannot enable both log and defmt-log");

#[cfg(feature = "log")]
use log::{debug, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace, warn};

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::debug! but does nothing at all
macro_rules! debug {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::trace! but does nothing at all
macro_rules! trace {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::warn! but does nothing at all
macro_rules! warn {
    ($($arg:tt)+) => {};
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
