// SPDX-License-Identifier: MIT OR Apache-2.0

#![doc = include_str!("../README.md")]

mod codec;
mod error;
mod frame;
mod util;

pub mod device;
pub mod server;

pub use codec::rtu;
pub use error::*;
pub use frame::*;
pub use util::Coil;
