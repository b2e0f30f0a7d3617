//! General Purpose Input/Output (GPIO)
//!
//! Pins are compile-time objects: [`Pin<PORT, N, MODE>`](Pin) carries its
//! port and bit index as type parameters, so every pin operation folds down
//! to a masked access of a constant register address. Mode changes move the
//! pin between type states (`Input<Floating>`, `Output<PushPull>`,
//! `Alternate<AF2>`, …); there is no runtime representation of "a pin
//! number" unless you explicitly [`erase`](Pin::erase) one.
//!
//! The concrete pins of a chip variant are declared by the [`gpio!`] macro in
//! its `chips` module and handed out through `split()` on the GLB peripheral:
//!
//! ```ignore
//! let dp = chips::bm310::Peripherals::take().unwrap();
//! let mut parts = dp.glb.split();
//! let mut led = parts.pin3.into_push_pull_output();
//! led.set_high();
//! ```
//!
//! ## Interrupt safety
//!
//! All pins of a port share their configuration and data registers. Every
//! read-modify-write this module performs (mode changes, output writes) runs
//! inside `critical_section::with`, so foreground code and interrupt
//! handlers may own different pins of the same port without extra locking.
//! This is the crate-wide policy; see the `mmio` module docs.

use core::convert::Infallible;
use core::marker::PhantomData;

use crate::mmio::{RO, RW};
use crate::signal::{NoRoute, Signal, SignalRoute};

/// GPIO port register block
#[repr(C)]
pub struct PortRegs {
    /// Output driver enable, one bit per pin.
    pub dir: RW<u32>,
    /// Output data.
    pub out: RW<u32>,
    /// Input data, hardware-owned.
    pub din: RO<u32>,
    /// Pull-up enable, one bit per pin.
    pub pull_up: RW<u32>,
    /// Pull-down enable, one bit per pin.
    pub pull_dn: RW<u32>,
    /// Open-drain enable, one bit per pin.
    pub open_drain: RW<u32>,
    /// High drive strength, one bit per pin.
    pub drive: RW<u32>,
    /// Routes the pin to its selected alternate function instead of GPIO.
    pub func_en: RW<u32>,
    /// Function select, 4 bits per pin, 8 pins per register.
    pub func_sel: [RW<u32>; 4],
}

impl PortRegs {
    /// Register block in its documented reset state: all pins floating
    /// GPIO inputs.
    pub const fn reset() -> Self {
        PortRegs {
            dir: RW::new(0),
            out: RW::new(0),
            din: RO::new(0),
            pull_up: RW::new(0),
            pull_dn: RW::new(0),
            open_drain: RW::new(0),
            drive: RW::new(0),
            func_en: RW::new(0),
            func_sel: [RW::new(0), RW::new(0), RW::new(0), RW::new(0)],
        }
    }
}

/// Binds a GPIO port singleton to its register block.
///
/// # Safety
///
/// `ptr` must return the base address of a GPIO port register block, and at
/// most one such binding may exist per block.
pub unsafe trait PortInstance {
    fn ptr() -> *const PortRegs;
}

/// Extension trait to split the GLB peripheral into pins and the clock
/// configuration token.
pub trait GlbExt {
    type Parts;
    fn split(self) -> Self::Parts;
}

/// Floating input (type state)
pub struct Floating;
/// Pulled down input (type state)
pub struct PullDown;
/// Pulled up input (type state)
pub struct PullUp;

/// Input mode (type state)
pub struct Input<MODE> {
    _mode: PhantomData<MODE>,
}

/// Open drain output (type state)
pub struct OpenDrain;
/// Push pull output (type state)
pub struct PushPull;

/// Output mode (type state)
pub struct Output<MODE> {
    _mode: PhantomData<MODE>,
}

/// Alternate function (type state)
pub struct Alternate<F> {
    _func: PhantomData<F>,
}

/// Function code known only at runtime (type state parameter for
/// [`Alternate`], used by [`ErasedPin`]).
pub struct Dyn;

/// An alternate-function selector with a compile-time function code.
pub trait Function {
    const CODE: u8;
}

macro_rules! alt_func {
    ($($AF:ident: $code:literal,)+) => {
        $(
            /// Alternate function (type state)
            pub struct $AF;
            impl Function for $AF {
                const CODE: u8 = $code;
            }
        )+
    };
}

alt_func! {
    AF0: 0,
    AF1: 1,
    AF2: 2,
    AF3: 3,
    AF4: 4,
    AF5: 5,
    AF6: 6,
    AF7: 7,
}

/// Output drive strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Drive {
    Standard,
    High,
}

/// A single pin of port `P`, bit index `N`, in mode `MODE`.
///
/// Zero-sized; constructing one has no runtime cost and mode changes compile
/// to the register writes they name, nothing else.
pub struct Pin<P, const N: u8, MODE> {
    _port: PhantomData<P>,
    _mode: PhantomData<MODE>,
}

impl<P, const N: u8, MODE> Pin<P, N, MODE> {
    const IN_RANGE: () = assert!(N < 32, "pin index out of range for a 32-bit port");

    #[doc(hidden)]
    pub const fn __new() -> Self {
        let _: () = Self::IN_RANGE;
        Pin {
            _port: PhantomData,
            _mode: PhantomData,
        }
    }

    /// The pin's bit index within its port.
    pub const fn index() -> u8 {
        N
    }
}

const fn mask(n: u8) -> u32 {
    1 << n
}

// Function select lives in a 4-bit lane of func_sel[n / 8].
fn write_func_sel(regs: &PortRegs, n: u8, code: u8) {
    let shift = (n as u32 % 8) * 4;
    regs.func_sel[n as usize / 8].modify(|r| (r & !(0xf << shift)) | ((code as u32 & 0xf) << shift));
}

impl<P: PortInstance, const N: u8, MODE> Pin<P, N, MODE> {
    fn regs() -> &'static PortRegs {
        unsafe { &*P::ptr() }
    }

    /// Configures the pin to operate as a push-pull output pin.
    pub fn into_push_pull_output(self) -> Pin<P, N, Output<PushPull>> {
        let regs = Self::regs();
        critical_section::with(|_| {
            regs.func_en.modify(|r| r & !mask(N));
            regs.open_drain.modify(|r| r & !mask(N));
            regs.pull_up.modify(|r| r & !mask(N));
            regs.pull_dn.modify(|r| r & !mask(N));
            regs.dir.modify(|r| r | mask(N));
        });
        Pin::__new()
    }

    /// Configures the pin to operate as an open-drain output pin.
    pub fn into_open_drain_output(self) -> Pin<P, N, Output<OpenDrain>> {
        let regs = Self::regs();
        critical_section::with(|_| {
            regs.func_en.modify(|r| r & !mask(N));
            regs.open_drain.modify(|r| r | mask(N));
            regs.pull_up.modify(|r| r & !mask(N));
            regs.pull_dn.modify(|r| r & !mask(N));
            regs.dir.modify(|r| r | mask(N));
        });
        Pin::__new()
    }

    /// Configures the pin to operate as a floating input pin.
    pub fn into_floating_input(self) -> Pin<P, N, Input<Floating>> {
        self.into_input(false, false)
    }

    /// Configures the pin to operate as a pull-up input pin.
    pub fn into_pull_up_input(self) -> Pin<P, N, Input<PullUp>> {
        self.into_input(true, false)
    }

    /// Configures the pin to operate as a pull-down input pin.
    pub fn into_pull_down_input(self) -> Pin<P, N, Input<PullDown>> {
        self.into_input(false, true)
    }

    fn into_input<M>(self, up: bool, down: bool) -> Pin<P, N, Input<M>> {
        let regs = Self::regs();
        critical_section::with(|_| {
            regs.func_en.modify(|r| r & !mask(N));
            regs.dir.modify(|r| r & !mask(N));
            regs.pull_up
                .modify(|r| if up { r | mask(N) } else { r & !mask(N) });
            regs.pull_dn
                .modify(|r| if down { r | mask(N) } else { r & !mask(N) });
        });
        Pin::__new()
    }

    /// Routes the pin to alternate function `F`.
    ///
    /// This only selects the mux position; which peripheral signal becomes
    /// usable is fixed by the chip's routing table, and the peripheral
    /// constructors only accept pin/function combinations that table
    /// contains.
    pub fn into_alternate<F: Function>(self) -> Pin<P, N, Alternate<F>> {
        let regs = Self::regs();
        critical_section::with(|_| {
            write_func_sel(regs, N, F::CODE);
            regs.dir.modify(|r| r & !mask(N));
            regs.func_en.modify(|r| r | mask(N));
        });
        Pin::__new()
    }

    /// Degrades the pin to a runtime-indexed [`ErasedPin`].
    pub fn erase(self) -> ErasedPin<P, MODE> {
        ErasedPin {
            index: N,
            _port: PhantomData,
            _mode: PhantomData,
        }
    }
}

impl<P: PortInstance, const N: u8, MODE> Pin<P, N, Output<MODE>> {
    /// Drives the pin high.
    #[inline]
    pub fn set_high(&mut self) {
        let regs = Self::regs();
        critical_section::with(|_| regs.out.modify(|r| r | mask(N)));
    }

    /// Drives the pin low.
    #[inline]
    pub fn set_low(&mut self) {
        let regs = Self::regs();
        critical_section::with(|_| regs.out.modify(|r| r & !mask(N)));
    }

    /// Inverts the output latch.
    #[inline]
    pub fn toggle(&mut self) {
        let regs = Self::regs();
        critical_section::with(|_| regs.out.modify(|r| r ^ mask(N)));
    }

    /// True if the output latch is high.
    #[inline]
    pub fn is_set_high(&self) -> bool {
        Self::regs().out.read() & mask(N) != 0
    }

    /// True if the output latch is low.
    #[inline]
    pub fn is_set_low(&self) -> bool {
        !self.is_set_high()
    }

    /// Selects the output drive strength.
    pub fn set_drive(&mut self, drive: Drive) {
        let regs = Self::regs();
        critical_section::with(|_| {
            regs.drive.modify(|r| match drive {
                Drive::High => r | mask(N),
                Drive::Standard => r & !mask(N),
            })
        });
    }
}

impl<P: PortInstance, const N: u8, MODE> Pin<P, N, Input<MODE>> {
    /// True if the pin reads high.
    #[inline]
    pub fn is_high(&self) -> bool {
        Self::regs().din.read() & mask(N) != 0
    }

    /// True if the pin reads low.
    #[inline]
    pub fn is_low(&self) -> bool {
        !self.is_high()
    }
}

// The internal pulls stay adjustable while a pin is in a digital alternate
// function; they are weak (~50k) and external resistors are usually the
// better choice.
impl<P: PortInstance, const N: u8, F> Pin<P, N, Alternate<F>> {
    pub fn set_pull_up(&mut self) {
        let regs = Self::regs();
        critical_section::with(|_| {
            regs.pull_up.modify(|r| r | mask(N));
            regs.pull_dn.modify(|r| r & !mask(N));
        });
    }

    pub fn set_pull_down(&mut self) {
        let regs = Self::regs();
        critical_section::with(|_| {
            regs.pull_dn.modify(|r| r | mask(N));
            regs.pull_up.modify(|r| r & !mask(N));
        });
    }

    pub fn set_floating(&mut self) {
        let regs = Self::regs();
        critical_section::with(|_| {
            regs.pull_up.modify(|r| r & !mask(N));
            regs.pull_dn.modify(|r| r & !mask(N));
        });
    }
}

// embedded-hal 1.0

impl<P: PortInstance, const N: u8, MODE> embedded_hal::digital::ErrorType for Pin<P, N, Output<MODE>> {
    type Error = Infallible;
}

impl<P: PortInstance, const N: u8, MODE> embedded_hal::digital::OutputPin for Pin<P, N, Output<MODE>> {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Pin::set_low(self);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Pin::set_high(self);
        Ok(())
    }
}

impl<P: PortInstance, const N: u8, MODE> embedded_hal::digital::StatefulOutputPin
    for Pin<P, N, Output<MODE>>
{
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        Ok(Pin::is_set_high(self))
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        Ok(Pin::is_set_low(self))
    }
}

impl<P: PortInstance, const N: u8, MODE> embedded_hal::digital::ErrorType for Pin<P, N, Input<MODE>> {
    type Error = Infallible;
}

impl<P: PortInstance, const N: u8, MODE> embedded_hal::digital::InputPin for Pin<P, N, Input<MODE>> {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(Pin::is_high(self))
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(Pin::is_low(self))
    }
}

// embedded-hal 0.2

impl<P: PortInstance, const N: u8, MODE> embedded_hal_zero::digital::v2::OutputPin
    for Pin<P, N, Output<MODE>>
{
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        Pin::set_low(self);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Pin::set_high(self);
        Ok(())
    }
}

impl<P: PortInstance, const N: u8, MODE> embedded_hal_zero::digital::v2::StatefulOutputPin
    for Pin<P, N, Output<MODE>>
{
    fn is_set_high(&self) -> Result<bool, Self::Error> {
        Ok(Pin::is_set_high(self))
    }

    fn is_set_low(&self) -> Result<bool, Self::Error> {
        Ok(Pin::is_set_low(self))
    }
}

impl<P: PortInstance, const N: u8, MODE> embedded_hal_zero::digital::v2::InputPin
    for Pin<P, N, Input<MODE>>
{
    type Error = Infallible;

    fn is_high(&self) -> Result<bool, Self::Error> {
        Ok(Pin::is_high(self))
    }

    fn is_low(&self) -> Result<bool, Self::Error> {
        Ok(Pin::is_low(self))
    }
}

/// A pin whose index is a runtime value.
///
/// The escape hatch for board-variant selection at startup: slower than
/// [`Pin`] (the mask is computed, the mux lane is indexed) and validated at
/// runtime instead of compile time. Everything else about the port contract
/// is unchanged.
pub struct ErasedPin<P, MODE> {
    index: u8,
    _port: PhantomData<P>,
    _mode: PhantomData<MODE>,
}

impl<P: PortInstance, MODE> ErasedPin<P, MODE> {
    fn regs() -> &'static PortRegs {
        unsafe { &*P::ptr() }
    }

    /// The pin's bit index within its port.
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Configures the pin to operate as a push-pull output pin.
    pub fn into_push_pull_output(self) -> ErasedPin<P, Output<PushPull>> {
        let regs = Self::regs();
        let m = mask(self.index);
        critical_section::with(|_| {
            regs.func_en.modify(|r| r & !m);
            regs.open_drain.modify(|r| r & !m);
            regs.pull_up.modify(|r| r & !m);
            regs.pull_dn.modify(|r| r & !m);
            regs.dir.modify(|r| r | m);
        });
        ErasedPin {
            index: self.index,
            _port: PhantomData,
            _mode: PhantomData,
        }
    }

    /// Configures the pin to operate as a floating input pin.
    pub fn into_floating_input(self) -> ErasedPin<P, Input<Floating>> {
        let regs = Self::regs();
        let m = mask(self.index);
        critical_section::with(|_| {
            regs.func_en.modify(|r| r & !m);
            regs.dir.modify(|r| r & !m);
            regs.pull_up.modify(|r| r & !m);
            regs.pull_dn.modify(|r| r & !m);
        });
        ErasedPin {
            index: self.index,
            _port: PhantomData,
            _mode: PhantomData,
        }
    }

    /// Routes the pin to the alternate function that carries `signal` of
    /// peripheral `instance`, if the routing table has such an entry.
    ///
    /// This is the runtime twin of [`Pin::into_alternate`]: the same
    /// validation, but deferred to initialization and reported as a value
    /// instead of failing the build. On failure the pin comes back untouched
    /// alongside the error.
    pub fn try_into_alternate(
        self,
        table: &[SignalRoute],
        signal: Signal,
        instance: u8,
    ) -> Result<ErasedPin<P, Alternate<Dyn>>, (Self, NoRoute)> {
        let func = match crate::signal::resolve(table, self.index, signal, instance) {
            Ok(func) => func,
            Err(e) => return Err((self, e)),
        };
        let regs = Self::regs();
        let m = mask(self.index);
        critical_section::with(|_| {
            write_func_sel(regs, self.index, func);
            regs.dir.modify(|r| r & !m);
            regs.func_en.modify(|r| r | m);
        });
        Ok(ErasedPin {
            index: self.index,
            _port: PhantomData,
            _mode: PhantomData,
        })
    }
}

impl<P: PortInstance, MODE> ErasedPin<P, Output<MODE>> {
    #[inline]
    pub fn set_high(&mut self) {
        let regs = Self::regs();
        let m = mask(self.index);
        critical_section::with(|_| regs.out.modify(|r| r | m));
    }

    #[inline]
    pub fn set_low(&mut self) {
        let regs = Self::regs();
        let m = mask(self.index);
        critical_section::with(|_| regs.out.modify(|r| r & !m));
    }

    #[inline]
    pub fn is_set_high(&self) -> bool {
        Self::regs().out.read() & mask(self.index) != 0
    }
}

impl<P: PortInstance, MODE> ErasedPin<P, Input<MODE>> {
    #[inline]
    pub fn is_high(&self) -> bool {
        Self::regs().din.read() & mask(self.index) != 0
    }

    #[inline]
    pub fn is_low(&self) -> bool {
        !self.is_high()
    }
}

impl<P: PortInstance, MODE> embedded_hal::digital::ErrorType for ErasedPin<P, Output<MODE>> {
    type Error = Infallible;
}

impl<P: PortInstance, MODE> embedded_hal::digital::OutputPin for ErasedPin<P, Output<MODE>> {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        ErasedPin::set_low(self);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        ErasedPin::set_high(self);
        Ok(())
    }
}

impl<P: PortInstance, MODE> embedded_hal::digital::ErrorType for ErasedPin<P, Input<MODE>> {
    type Error = Infallible;
}

impl<P: PortInstance, MODE> embedded_hal::digital::InputPin for ErasedPin<P, Input<MODE>> {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(ErasedPin::is_high(self))
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(ErasedPin::is_low(self))
    }
}

/// Declares the GPIO port, pins, GLB peripheral and clock controller binding
/// of one chip variant.
///
/// Everything chip-specific is in the invocation: register base addresses
/// and the list of bonded-out pins. The generated `split()` hands out each
/// pin exactly once, together with the [`ClkCfg`] token for the clock
/// configurator.
#[macro_export]
macro_rules! gpio {
    (
        port: $PORT:ident => $port_ptr:expr,
        clk: $CLK:ident => $clk_ptr:expr,
        glb: $GLB:ident,
        pins: [$($pin:ident: ($PinAlias:ident, $N:literal),)+]
    ) => {
        /// GPIO port singleton.
        pub struct $PORT {
            _ownership: (),
        }

        unsafe impl $crate::gpio::PortInstance for $PORT {
            fn ptr() -> *const $crate::gpio::PortRegs {
                $port_ptr
            }
        }

        /// Clock controller singleton.
        pub struct $CLK {
            _ownership: (),
        }

        unsafe impl $crate::clock::ClkInstance for $CLK {
            fn ptr() -> *const $crate::clock::ClkRegs {
                $clk_ptr
            }
        }

        $(
            /// Chip pin.
            pub type $PinAlias<MODE> = $crate::gpio::Pin<$PORT, $N, MODE>;
        )+

        /// Pins and configuration tokens obtained from `split()`.
        pub struct Parts {
            $(
                pub $pin: $PinAlias<$crate::gpio::Input<$crate::gpio::Floating>>,
            )+
            pub clk_cfg: $crate::clock::ClkCfg<$CLK>,
        }

        /// Global control peripheral: GPIO port plus clock controller.
        pub struct $GLB {
            pub(crate) _ownership: (),
        }

        impl $crate::gpio::GlbExt for $GLB {
            type Parts = Parts;

            fn split(self) -> Parts {
                Parts {
                    $(
                        $pin: $crate::gpio::Pin::__new(),
                    )+
                    clk_cfg: $crate::clock::ClkCfg::__new(),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{Signal, SignalRoute};

    static PORT_REGS: PortRegs = PortRegs::reset();
    static CLK_REGS: crate::clock::ClkRegs = crate::clock::ClkRegs::reset();

    crate::gpio! {
        port: PORT => &PORT_REGS,
        clk: CLK => &CLK_REGS,
        glb: GLB,
        pins: [
            pin0: (Pin0, 0),
            pin1: (Pin1, 1),
            pin2: (Pin2, 2),
            pin3: (Pin3, 3),
            pin4: (Pin4, 4),
            pin5: (Pin5, 5),
        ]
    }

    fn parts() -> Parts {
        GLB { _ownership: () }.split()
    }

    fn read_func_sel(regs: &PortRegs, n: u8) -> u8 {
        let shift = (n as u32 % 8) * 4;
        ((regs.func_sel[n as usize / 8].read() >> shift) & 0xf) as u8
    }

    #[test]
    fn output_round_trip() {
        let parts = parts();
        let mut pin = parts.pin0.into_push_pull_output();
        assert_eq!(PORT_REGS.dir.read() & 1, 1);

        pin.set_high();
        assert!(pin.is_set_high());
        pin.set_low();
        assert!(pin.is_set_low());
        pin.toggle();
        assert!(pin.is_set_high());
        pin.set_low();
    }

    #[test]
    fn output_writes_do_not_clobber_neighbours() {
        let parts = parts();
        let mut a = parts.pin1.into_push_pull_output();
        let mut b = parts.pin2.into_push_pull_output();
        a.set_high();
        b.set_high();
        b.set_low();
        // Pin 1 keeps its latch through pin 2's updates.
        assert!(a.is_set_high());
        assert!(b.is_set_low());
        a.set_low();
    }

    #[test]
    fn input_modes_program_the_pulls() {
        let parts = parts();
        let pin = parts.pin3.into_pull_up_input();
        assert_eq!(PORT_REGS.pull_up.read() & (1 << 3), 1 << 3);
        assert_eq!(PORT_REGS.pull_dn.read() & (1 << 3), 0);
        let pin = pin.into_pull_down_input();
        assert_eq!(PORT_REGS.pull_up.read() & (1 << 3), 0);
        assert_eq!(PORT_REGS.pull_dn.read() & (1 << 3), 1 << 3);
        let _ = pin.into_floating_input();
        assert_eq!(PORT_REGS.pull_dn.read() & (1 << 3), 0);
    }

    #[test]
    fn alternate_function_muxing() {
        let parts = parts();
        let _uart_pin = parts.pin4.into_alternate::<AF2>();
        assert_eq!(read_func_sel(&PORT_REGS, 4), 2);
        assert_eq!(PORT_REGS.func_en.read() & (1 << 4), 1 << 4);
    }

    #[test]
    fn erased_pin_runtime_routing() {
        const TABLE: &[SignalRoute] = &[SignalRoute {
            pin: 5,
            signal: Signal::UartTx,
            instance: 0,
            func: 3,
        }];

        let parts = parts();
        let erased = parts.pin5.erase();
        assert_eq!(erased.index(), 5);

        // Absent route is reported, pin comes back unchanged.
        let erased = match erased.try_into_alternate(TABLE, Signal::UartRx, 0) {
            Err((pin, _)) => pin,
            Ok(_) => panic!("route should not exist"),
        };
        assert_eq!(PORT_REGS.func_en.read() & (1 << 5), 0);

        let _routed = match erased.try_into_alternate(TABLE, Signal::UartTx, 0) {
            Ok(pin) => pin,
            Err(_) => panic!("route exists"),
        };
        assert_eq!(read_func_sel(&PORT_REGS, 5), 3);
        assert_eq!(PORT_REGS.func_en.read() & (1 << 5), 1 << 5);
    }
}
