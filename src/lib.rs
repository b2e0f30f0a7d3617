//! # HAL for the BM31x family of microcontrollers
//!
//! This is an implementation of the [`embedded-hal`] traits for the BM31x
//! family. The peripheral drivers are written once, generically, against the
//! family's shared IP blocks; the chip variants under [`chips`] contribute
//! only data — register base addresses, pin lists and signal routing tables.
//!
//! [`embedded-hal`]: https://crates.io/crates/embedded-hal
//!
//! # Usage
//!
//! ## Commonly used setup
//!
//! ```ignore
//! use bm31x_hal::{chips::bm310, clock::Strict, gpio::GlbExt, prelude::*};
//!
//! // Get access to the device specific peripherals
//! let dp = bm310::Peripherals::take().unwrap();
//! let mut parts = dp.glb.split();
//!
//! // Freeze the configuration of all the clocks in the system and store the
//! // frozen frequencies in `clocks`
//! let clocks = Strict::new()
//!     .use_xtal(24_000_000u32.Hz())
//!     .sys_clk(96_000_000u32.Hz())
//!     .freeze(&mut parts.clk_cfg)
//!     .unwrap();
//!
//! let mut led = parts.pin12.into_push_pull_output();
//! led.set_high();
//! ```
//!
//! # Pin and signal validation
//!
//! Pin identities, register addresses and routing decisions are compile-time
//! constants; a pin operation compiles down to the masked register access it
//! names. Peripheral constructors only accept pins whose alternate function
//! the chip's routing table lists for the requested signal, so a wrong pin
//! assignment is a type error, and a chip module that disagrees with its own
//! routing table does not build. The escape hatch for board variants that
//! pick pins at startup is `gpio::ErasedPin`, which defers the same table
//! check to runtime and reports it as a value.
//!
//! # Interrupt context
//!
//! No operation in this crate blocks without a bound, and none of them
//! allocate. Register read-modify-writes the crate performs are wrapped in
//! `critical_section::with`; on bare-metal targets link an implementation
//! such as the one your runtime crate provides (the `std` implementation
//! backs the host-side tests).

#![cfg_attr(not(test), no_std)]

pub mod chips;
pub mod clock;
pub mod divider;
pub mod dma;
pub mod gpio;
pub mod i2c;
pub mod mmio;
pub mod serial;
pub mod signal;
pub mod spi;
pub mod typelevel;

/// HAL crate prelude
pub mod prelude {
    pub use crate::clock::Gated as _bm31x_hal_clock_Gated;
    pub use crate::dma::DmaExt as _bm31x_hal_dma_DmaExt;
    pub use crate::gpio::GlbExt as _bm31x_hal_gpio_GlbExt;
    pub use embedded_time::rate::Extensions;
}
