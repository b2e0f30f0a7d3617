//! Serial communication (UART)
//!
//! To construct a [`Serial`] instance use the `Serial::new` function with a
//! tuple of mux-validated pins. The pins must carry the alternate function
//! the chip's routing table assigns to the UART signals; the pin parameter
//! simply does not accept anything else.
//!
//! ```ignore
//! let tx = parts.pin4.into_alternate::<AF2>();
//! let rx = parts.pin5.into_alternate::<AF2>();
//!
//! let mut serial = hal::serial::Serial::new(
//!     dp.uart0,
//!     (tx, rx),
//!     Config::default().baudrate(115_200u32.Bd()),
//!     &clocks,
//! )?;
//! ```
//!
//! The baud divisor is derived from the frozen clock tree. After a runtime
//! clock switch the stored divisor is stale; call [`Serial::refresh_baud`]
//! with the new `Clocks` before the next transfer. [`Serial::clock_generation`]
//! tells which clock generation the current divisor belongs to.

use crate::clock::{Clocks, Gated};
use crate::divider::{self, DividerError};
use crate::mmio::{Bit, Field, RO, RW, WO};
use embedded_time::rate::{Baud, Extensions};

/// UART register block
#[repr(C)]
pub struct UartRegs {
    /// Enable, frame format and flow control.
    pub ctrl: RW<u32>,
    /// Baud divisor, 16x oversampled.
    pub baud: RW<u32>,
    /// Status flags, hardware-owned.
    pub stat: RO<u32>,
    /// Error flag clear, write-one-to-clear.
    pub err_clr: WO<u32>,
    /// Transmit data.
    pub tx_data: WO<u32>,
    /// Receive data.
    pub rx_data: RO<u32>,
    /// Interrupt enables.
    pub int_en: RW<u32>,
}

pub type Enable = Bit<0>;
pub type TxEn = Bit<1>;
pub type RxEn = Bit<2>;
pub type ParityEn = Bit<4>;
pub type ParityOdd = Bit<5>;
pub type StopExtra = Bit<6>;
pub type RtsEn = Bit<9>;
pub type CtsEn = Bit<10>;
/// Data bits minus five.
pub type WordLen = Field<12, 2>;
pub type BaudDiv = Field<0, 16>;

pub type TxFull = Bit<0>;
pub type RxEmpty = Bit<1>;
pub type Busy = Bit<2>;
pub type RxOverrun = Bit<4>;
pub type RxFraming = Bit<5>;
pub type RxParity = Bit<6>;
pub type RxNoise = Bit<7>;

impl UartRegs {
    /// Register block in its documented reset state: disabled, receive
    /// queue empty, transmitter idle.
    pub const fn reset() -> Self {
        UartRegs {
            ctrl: RW::new(0),
            baud: RW::new(0),
            stat: RO::new(RxEmpty::MASK),
            err_clr: WO::new(0),
            tx_data: WO::new(0),
            rx_data: RO::new(0),
            int_en: RW::new(0),
        }
    }
}

/// Binds a UART singleton to its register block.
///
/// # Safety
///
/// `ptr` must return the base address of a UART register block, `INDEX` the
/// instance number the routing table uses for it, and at most one such
/// binding may exist per block.
pub unsafe trait UartInstance: Gated {
    const INDEX: u8;
    fn ptr() -> *const UartRegs;
}

/// TX pins - DO NOT IMPLEMENT THIS TRAIT
pub unsafe trait TxPin<UART> {}

/// RX pins - DO NOT IMPLEMENT THIS TRAIT
pub unsafe trait RxPin<UART> {}

/// RTS pins - DO NOT IMPLEMENT THIS TRAIT
pub unsafe trait RtsPin<UART> {}

/// CTS pins - DO NOT IMPLEMENT THIS TRAIT
pub unsafe trait CtsPin<UART> {}

/// UART pins - DO NOT IMPLEMENT THIS TRAIT
pub unsafe trait Pins<UART> {
    /// Whether the tuple carries RTS/CTS and hardware flow control should be
    /// switched on.
    const FLOW_CONTROL: bool;
}

unsafe impl<UART, TX, RX> Pins<UART> for (TX, RX)
where
    TX: TxPin<UART>,
    RX: RxPin<UART>,
{
    const FLOW_CONTROL: bool = false;
}

unsafe impl<UART, TX, RX, RTS, CTS> Pins<UART> for (TX, RX, RTS, CTS)
where
    TX: TxPin<UART>,
    RX: RxPin<UART>,
    RTS: RtsPin<UART>,
    CTS: CtsPin<UART>,
{
    const FLOW_CONTROL: bool = true;
}

/// Serial operational error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// A received byte was lost before software read the previous one.
    Overrun,
    /// Stop bit sampled low.
    Framing,
    /// Parity check failed.
    Parity,
    /// Line glitch detected during a start bit.
    Noise,
    /// A bounded wait ran out before the hardware reported ready.
    Timeout,
}

impl embedded_hal_nb::serial::Error for Error {
    fn kind(&self) -> embedded_hal_nb::serial::ErrorKind {
        use embedded_hal_nb::serial::ErrorKind;
        match self {
            Error::Overrun => ErrorKind::Overrun,
            Error::Framing => ErrorKind::FrameFormat,
            Error::Parity => ErrorKind::Parity,
            Error::Noise => ErrorKind::Noise,
            Error::Timeout => ErrorKind::Other,
        }
    }
}

/// Serial configuration error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum ConfigError {
    /// No divisor reaches the requested baud rate within the configured
    /// tolerance at the current clock.
    UnreachableRate {
        /// Error of the closest reachable rate, in permille.
        closest_error_permille: u32,
    },
}

/// Data bits per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WordLength {
    Five,
    Six,
    Seven,
    Eight,
}

/// Parity generation and checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Stop bits per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopBits {
    One,
    Two,
}

/// Logical UART configuration, translated into register patterns by
/// `Serial::new`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    pub baudrate: Baud,
    pub wordlength: WordLength,
    pub parity: Parity,
    pub stopbits: StopBits,
    /// Largest acceptable baud rate error, in permille.
    pub tolerance_permille: u32,
}

impl Config {
    pub fn baudrate(mut self, baudrate: impl Into<Baud>) -> Self {
        self.baudrate = baudrate.into();
        self
    }

    pub fn wordlength(mut self, wordlength: WordLength) -> Self {
        self.wordlength = wordlength;
        self
    }

    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn stopbits(mut self, stopbits: StopBits) -> Self {
        self.stopbits = stopbits;
        self
    }

    pub fn tolerance_permille(mut self, tolerance_permille: u32) -> Self {
        self.tolerance_permille = tolerance_permille;
        self
    }
}

impl Default for Config {
    /// 115200 Bd, 8N1, 25 permille baud tolerance.
    fn default() -> Self {
        Config {
            baudrate: 115_200u32.Bd(),
            wordlength: WordLength::Eight,
            parity: Parity::None,
            stopbits: StopBits::One,
            tolerance_permille: 25,
        }
    }
}

/// Number of status polls a bounded wait performs before reporting
/// [`Error::Timeout`]. Adjustable via [`Serial::set_timeout`].
const DEFAULT_TIMEOUT_POLLS: u16 = 2048;

/// Serial abstraction
pub struct Serial<UART, PINS> {
    uart: UART,
    pins: PINS,
    config: Config,
    generation: u32,
    timeout: u16,
}

impl<UART, PINS> Serial<UART, PINS>
where
    UART: UartInstance,
    PINS: Pins<UART>,
{
    /// Configures the UART and enables it.
    ///
    /// The bring-up order is fixed by the hardware: the peripheral clock
    /// gate opens first (registers of an ungated block must not be touched),
    /// the peripheral is then held disabled while the divisor and frame
    /// format are programmed, and the enable bit is set last.
    pub fn new(uart: UART, pins: PINS, config: Config, clocks: &Clocks) -> Result<Self, ConfigError> {
        UART::enable_clock();

        let regs = unsafe { &*UART::ptr() };
        regs.ctrl.modify(Enable::clear);

        let div = baud_divisor(clocks.uart_clk().0, config.baudrate.0, config.tolerance_permille)?;
        regs.baud.write(BaudDiv::bits(div));

        let frame = frame_bits(&config, PINS::FLOW_CONTROL);
        regs.ctrl.write(frame);
        regs.ctrl.modify(Enable::set);

        Ok(Serial {
            uart,
            pins,
            config,
            generation: clocks.generation(),
            timeout: DEFAULT_TIMEOUT_POLLS,
        })
    }

    /// Recomputes the baud divisor after a runtime clock switch.
    ///
    /// Completes the recompute contract of [`Clocks::reconfigure`]: the
    /// divisor programmed by `new` is only valid for the clock generation it
    /// was computed against.
    pub fn refresh_baud(&mut self, clocks: &Clocks) -> Result<(), ConfigError> {
        let div = baud_divisor(
            clocks.uart_clk().0,
            self.config.baudrate.0,
            self.config.tolerance_permille,
        )?;
        let regs = unsafe { &*UART::ptr() };
        regs.ctrl.modify(Enable::clear);
        regs.baud.write(BaudDiv::bits(div));
        regs.ctrl.modify(Enable::set);
        self.generation = clocks.generation();
        Ok(())
    }

    /// The clock generation the programmed divisor belongs to.
    pub fn clock_generation(&self) -> u32 {
        self.generation
    }

    /// Sets the poll budget of bounded waits. Not a time unit but a number
    /// of status polls.
    pub fn set_timeout(&mut self, timeout: u16) {
        self.timeout = timeout;
    }

    /// Busy-waits until the transmitter runs dry, at most `timeout` polls.
    pub fn flush_with_timeout(&mut self) -> Result<(), Error> {
        let regs = unsafe { &*UART::ptr() };
        let mut countdown = self.timeout;
        while Busy::is_set(regs.stat.read()) {
            if countdown == 0 {
                return Err(Error::Timeout);
            }
            countdown -= 1;
        }
        Ok(())
    }

    /// Disables the UART and releases the peripheral and pins.
    pub fn free(self) -> (UART, PINS) {
        let regs = unsafe { &*UART::ptr() };
        regs.ctrl.modify(Enable::clear);
        UART::disable_clock();
        (self.uart, self.pins)
    }

    fn read_byte(&mut self) -> nb::Result<u8, Error> {
        let regs = unsafe { &*UART::ptr() };
        let stat = regs.stat.read();

        if RxOverrun::is_set(stat) {
            regs.err_clr.write(RxOverrun::MASK);
            return Err(nb::Error::Other(Error::Overrun));
        }
        if RxFraming::is_set(stat) {
            regs.err_clr.write(RxFraming::MASK);
            return Err(nb::Error::Other(Error::Framing));
        }
        if RxParity::is_set(stat) {
            regs.err_clr.write(RxParity::MASK);
            return Err(nb::Error::Other(Error::Parity));
        }
        if RxNoise::is_set(stat) {
            regs.err_clr.write(RxNoise::MASK);
            return Err(nb::Error::Other(Error::Noise));
        }

        if RxEmpty::is_set(stat) {
            Err(nb::Error::WouldBlock)
        } else {
            Ok((regs.rx_data.read() & 0xff) as u8)
        }
    }

    fn write_byte(&mut self, word: u8) -> nb::Result<(), Error> {
        let regs = unsafe { &*UART::ptr() };
        if TxFull::is_set(regs.stat.read()) {
            Err(nb::Error::WouldBlock)
        } else {
            regs.tx_data.write(word as u32);
            Ok(())
        }
    }

    fn flush_nb(&mut self) -> nb::Result<(), Error> {
        let regs = unsafe { &*UART::ptr() };
        if Busy::is_set(regs.stat.read()) {
            Err(nb::Error::WouldBlock)
        } else {
            Ok(())
        }
    }
}

fn baud_divisor(clock: u32, baud: u32, tolerance_permille: u32) -> Result<u32, ConfigError> {
    match divider::checked(clock, baud * 16, 1, BaudDiv::MAX, tolerance_permille) {
        Ok(d) => Ok(d.div),
        Err(DividerError::OutOfTolerance { closest, .. }) => Err(ConfigError::UnreachableRate {
            closest_error_permille: closest.error_permille,
        }),
    }
}

fn frame_bits(config: &Config, flow_control: bool) -> u32 {
    let mut frame = TxEn::MASK | RxEn::MASK;
    frame |= WordLen::bits(match config.wordlength {
        WordLength::Five => 0,
        WordLength::Six => 1,
        WordLength::Seven => 2,
        WordLength::Eight => 3,
    });
    match config.parity {
        Parity::None => {}
        Parity::Even => frame = ParityEn::set(frame),
        Parity::Odd => frame = ParityOdd::set(ParityEn::set(frame)),
    }
    if let StopBits::Two = config.stopbits {
        frame = StopExtra::set(frame);
    }
    if flow_control {
        frame = CtsEn::set(RtsEn::set(frame));
    }
    frame
}

impl<UART, PINS> embedded_hal_nb::serial::ErrorType for Serial<UART, PINS>
where
    UART: UartInstance,
    PINS: Pins<UART>,
{
    type Error = Error;
}

impl<UART, PINS> embedded_hal_nb::serial::Read<u8> for Serial<UART, PINS>
where
    UART: UartInstance,
    PINS: Pins<UART>,
{
    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        self.read_byte()
    }
}

impl<UART, PINS> embedded_hal_nb::serial::Write<u8> for Serial<UART, PINS>
where
    UART: UartInstance,
    PINS: Pins<UART>,
{
    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        self.write_byte(word)
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        self.flush_nb()
    }
}

impl<UART, PINS> embedded_hal_zero::serial::Read<u8> for Serial<UART, PINS>
where
    UART: UartInstance,
    PINS: Pins<UART>,
{
    type Error = Error;

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        self.read_byte()
    }
}

impl<UART, PINS> embedded_hal_zero::serial::Write<u8> for Serial<UART, PINS>
where
    UART: UartInstance,
    PINS: Pins<UART>,
{
    type Error = Error;

    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        self.write_byte(word)
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        self.flush_nb()
    }
}

impl<UART, PINS> core::fmt::Write for Serial<UART, PINS>
where
    UART: UartInstance,
    PINS: Pins<UART>,
{
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for byte in s.bytes() {
            nb::block!(self.write_byte(byte)).map_err(|_| core::fmt::Error)?;
        }
        Ok(())
    }
}

/// Declares a UART instance singleton of one chip variant.
#[macro_export]
macro_rules! uart {
    ($UART:ident => $ptr:expr, index: $idx:literal, clk: $CLK:ident, gate: $gate:literal) => {
        /// UART peripheral.
        pub struct $UART {
            pub(crate) _ownership: (),
        }

        unsafe impl $crate::clock::Gated for $UART {
            const GATE: u8 = $gate;
            fn clk() -> *const $crate::clock::ClkRegs {
                <$CLK as $crate::clock::ClkInstance>::ptr()
            }
        }

        unsafe impl $crate::serial::UartInstance for $UART {
            const INDEX: u8 = $idx;
            fn ptr() -> *const $crate::serial::UartRegs {
                $ptr
            }
        }
    };
}

/// Binds pins to the UART signals of one instance.
///
/// Every binding is cross-checked against the chip's routing table during
/// constant evaluation: listing a pin/function pair the table does not
/// contain fails the build.
#[macro_export]
macro_rules! uart_pins {
    (
        uart: $UART:ident, instance: $inst:literal, table: $TABLE:expr,
        tx: [$(($TxPin:ident, $tx_idx:literal, $TxAF:ident)),* $(,)?],
        rx: [$(($RxPin:ident, $rx_idx:literal, $RxAF:ident)),* $(,)?],
        $(
            rts: [$(($RtsPin:ident, $rts_idx:literal, $RtsAF:ident)),* $(,)?],
            cts: [$(($CtsPin:ident, $cts_idx:literal, $CtsAF:ident)),* $(,)?],
        )?
    ) => {
        $(
            const _: () = assert!(
                $crate::signal::expect_route($TABLE, $tx_idx, $crate::signal::Signal::UartTx, $inst)
                    == <$crate::gpio::$TxAF as $crate::gpio::Function>::CODE,
                "pin binding disagrees with the routing table"
            );
            unsafe impl $crate::serial::TxPin<$UART>
                for $TxPin<$crate::gpio::Alternate<$crate::gpio::$TxAF>>
            {
            }
        )*
        $(
            const _: () = assert!(
                $crate::signal::expect_route($TABLE, $rx_idx, $crate::signal::Signal::UartRx, $inst)
                    == <$crate::gpio::$RxAF as $crate::gpio::Function>::CODE,
                "pin binding disagrees with the routing table"
            );
            unsafe impl $crate::serial::RxPin<$UART>
                for $RxPin<$crate::gpio::Alternate<$crate::gpio::$RxAF>>
            {
            }
        )*
        $(
            $(
                const _: () = assert!(
                    $crate::signal::expect_route($TABLE, $rts_idx, $crate::signal::Signal::UartRts, $inst)
                        == <$crate::gpio::$RtsAF as $crate::gpio::Function>::CODE,
                    "pin binding disagrees with the routing table"
                );
                unsafe impl $crate::serial::RtsPin<$UART>
                    for $RtsPin<$crate::gpio::Alternate<$crate::gpio::$RtsAF>>
                {
                }
            )*
            $(
                const _: () = assert!(
                    $crate::signal::expect_route($TABLE, $cts_idx, $crate::signal::Signal::UartCts, $inst)
                        == <$crate::gpio::$CtsAF as $crate::gpio::Function>::CODE,
                    "pin binding disagrees with the routing table"
                );
                unsafe impl $crate::serial::CtsPin<$UART>
                    for $CtsPin<$crate::gpio::Alternate<$crate::gpio::$CtsAF>>
                {
                }
            )*
        )?
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ClkRegs, Clocks, Gated};
    use embedded_hal_nb::serial::{Read, Write};

    static CLK_REGS: ClkRegs = ClkRegs::reset();

    macro_rules! test_uart {
        ($UART:ident, gate: $gate:literal, $stat:expr, $rx:expr) => {
            paste::paste! {
                struct $UART;
                static [<$UART:upper _REGS>]: UartRegs = UartRegs {
                    ctrl: RW::new(0),
                    baud: RW::new(0),
                    stat: RO::new($stat),
                    err_clr: WO::new(0),
                    tx_data: WO::new(0),
                    rx_data: RO::new($rx),
                    int_en: RW::new(0),
                };
                unsafe impl Gated for $UART {
                    const GATE: u8 = $gate;
                    fn clk() -> *const ClkRegs {
                        &CLK_REGS
                    }
                }
                unsafe impl UartInstance for $UART {
                    const INDEX: u8 = 0;
                    fn ptr() -> *const UartRegs {
                        &[<$UART:upper _REGS>]
                    }
                }
            }
        };
    }

    struct TxMock;
    struct RxMock;
    unsafe impl<UART> TxPin<UART> for TxMock {}
    unsafe impl<UART> RxPin<UART> for RxMock {}

    fn regs<UART: UartInstance>() -> &'static UartRegs {
        unsafe { &*UART::ptr() }
    }

    #[test]
    fn bring_up_sequence_and_divisor() {
        test_uart!(Uart, gate: 0, RxEmpty::MASK, 0);
        let serial = Serial::new(Uart, (TxMock, RxMock), Config::default(), &Clocks::new())
            .unwrap();

        // 32 MHz / (16 * 115200) = 17.36 -> divisor 17.
        assert_eq!(BaudDiv::extract(regs::<Uart>().baud.read()), 17);
        let ctrl = regs::<Uart>().ctrl.read();
        assert!(Enable::is_set(ctrl));
        assert!(TxEn::is_set(ctrl) && RxEn::is_set(ctrl));
        assert_eq!(WordLen::extract(ctrl), 3);
        assert!(!ParityEn::is_set(ctrl));
        assert!(Uart::clock_enabled());

        let (uart, pins) = serial.free();
        assert!(!Enable::is_set(regs::<Uart>().ctrl.read()));

        // Identical input produces the identical register image.
        let _ = Serial::new(uart, pins, Config::default(), &Clocks::new()).unwrap();
        assert_eq!(BaudDiv::extract(regs::<Uart>().baud.read()), 17);
        assert_eq!(regs::<Uart>().ctrl.read(), ctrl);
    }

    #[test]
    fn frame_format_bits() {
        let config = Config::default()
            .wordlength(WordLength::Seven)
            .parity(Parity::Odd)
            .stopbits(StopBits::Two);
        let frame = frame_bits(&config, true);
        assert_eq!(WordLen::extract(frame), 2);
        assert!(ParityEn::is_set(frame) && ParityOdd::is_set(frame));
        assert!(StopExtra::is_set(frame));
        assert!(RtsEn::is_set(frame) && CtsEn::is_set(frame));

        let frame = frame_bits(&Config::default().parity(Parity::Even), false);
        assert!(ParityEn::is_set(frame) && !ParityOdd::is_set(frame));
        assert!(!RtsEn::is_set(frame));
    }

    #[test]
    fn unreachable_baud_is_reported() {
        test_uart!(Slow, gate: 1, RxEmpty::MASK, 0);
        // 32 MHz cannot make 3 MBd within 25 permille (divisor would have to
        // be 0.67).
        let result = Serial::new(
            Slow,
            (TxMock, RxMock),
            Config::default().baudrate(3_000_000u32.Bd()),
            &Clocks::new(),
        );
        match result {
            Err(ConfigError::UnreachableRate {
                closest_error_permille,
            }) => assert!(closest_error_permille > 25),
            Ok(_) => panic!("expected an unreachable rate"),
        }
    }

    #[test]
    fn read_surfaces_hardware_errors() {
        test_uart!(Bad, gate: 2, RxEmpty::MASK | RxOverrun::MASK, 0);
        let mut serial =
            Serial::new(Bad, (TxMock, RxMock), Config::default(), &Clocks::new()).unwrap();
        assert_eq!(serial.read(), Err(nb::Error::Other(Error::Overrun)));
    }

    #[test]
    fn read_and_write_move_data() {
        test_uart!(Io, gate: 3, 0, 0x55);
        let mut serial =
            Serial::new(Io, (TxMock, RxMock), Config::default(), &Clocks::new()).unwrap();
        // stat has RxEmpty clear: a byte is waiting.
        assert_eq!(serial.read(), Ok(0x55));
        // TxFull is clear: the write is accepted.
        assert_eq!(serial.write(0xa1), Ok(()));
        assert_eq!(serial.flush(), Ok(()));
    }

    #[test]
    fn stuck_transmitter_times_out() {
        test_uart!(Stuck, gate: 4, Busy::MASK | RxEmpty::MASK, 0);
        let mut serial =
            Serial::new(Stuck, (TxMock, RxMock), Config::default(), &Clocks::new()).unwrap();
        serial.set_timeout(16);
        assert_eq!(serial.flush_with_timeout(), Err(Error::Timeout));
    }

    #[test]
    fn refresh_baud_follows_a_clock_switch() {
        test_uart!(Switch, gate: 5, RxEmpty::MASK, 0);
        let mut serial =
            Serial::new(Switch, (TxMock, RxMock), Config::default(), &Clocks::new()).unwrap();
        assert_eq!(serial.clock_generation(), 0);
        assert_eq!(BaudDiv::extract(regs::<Switch>().baud.read()), 17);

        // A 48 MHz tree from a later generation: 48 MHz / (16 * 115200) =
        // 26.04 -> divisor 26.
        let clocks = clocks_with(48_000_000, 3);
        serial.refresh_baud(&clocks).unwrap();
        assert_eq!(serial.clock_generation(), 3);
        assert_eq!(BaudDiv::extract(regs::<Switch>().baud.read()), 26);
        assert!(Enable::is_set(regs::<Switch>().ctrl.read()));
    }

    // Builds a Clocks value of an arbitrary generation by replaying the
    // switch protocol against a scratch controller.
    fn clocks_with(pclk: u32, generation: u32) -> Clocks {
        use crate::clock::{ClkCfg, ClkInstance, Strict};
        use embedded_time::rate::Extensions;

        struct Scratch;
        static SCRATCH_REGS: ClkRegs = ClkRegs {
            src_en: RW::new(0b01),
            src_rdy: RO::new(0b11),
            pll_cfg: RW::new(0),
            pll_stat: RO::new(0b1),
            sel: RW::new(0),
            div: RW::new(0),
            gate: RW::new(0),
        };
        unsafe impl ClkInstance for Scratch {
            fn ptr() -> *const ClkRegs {
                &SCRATCH_REGS
            }
        }

        let mut cfg = ClkCfg::<Scratch>::__new();
        let mut clocks = Strict::new().freeze(&mut cfg).unwrap();
        for _ in 0..generation {
            clocks = clocks
                .reconfigure(
                    Strict::new().use_xtal(pclk.Hz()).sys_clk(pclk.Hz()),
                    &mut cfg,
                )
                .unwrap();
        }
        clocks
    }
}
