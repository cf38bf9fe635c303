//! Board and silicon model for the CaribouLite SDR data path.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of what sits on the wires: the HAT's GPIO pin assignments, the
//! BCM2835 GPIO register window, the SMI stream character-device ioctls and
//! address encoding, the iCE40 slave-SPI configuration timing, and the
//! RFFC507x three-wire register framing.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`board`] | Reference HAT pin map and per-chip bus parameters |
//! | [`gpio`] | BCM2835 GPIO register offsets, function-select and pull codes |
//! | [`smi`] | SMI stream ioctl numbers, stream states, 5-bit address layout |
//! | [`spidev`] | Linux spidev ioctl numbers and the transfer descriptor size |
//! | [`ice40`] | iCE40 configuration timing and chunking constants |
//! | [`rffc`] | RFFC507x three-wire frame layout |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod board;
pub mod gpio;
pub mod ice40;
pub mod rffc;
pub mod smi;
pub mod spidev;
