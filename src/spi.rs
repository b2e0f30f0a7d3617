//! Serial Peripheral Interface (SPI) in master mode
//!
//! ```ignore
//! let sclk = parts.pin0.into_alternate::<AF3>();
//! let mosi = parts.pin1.into_alternate::<AF3>();
//! let miso = parts.pin2.into_alternate::<AF3>();
//!
//! let mut spi = hal::spi::Spi::new(
//!     dp.spi0,
//!     (sclk, mosi, miso),
//!     embedded_hal::spi::MODE_0,
//!     8_000_000u32.Hz(),
//!     &clocks,
//! )?;
//! ```

use crate::clock::{Clocks, Gated};
use crate::divider::{self, DividerError};
use crate::mmio::{Bit, Field, RO, RW, WO};
use embedded_hal::spi::{Mode, Phase, Polarity};
use embedded_time::rate::Hertz;

/// SPI register block
#[repr(C)]
pub struct SpiRegs {
    /// Master enable, clock polarity/phase, frame size, bit order.
    pub config: RW<u32>,
    /// Bit clock divisor, minus one.
    pub period: RW<u32>,
    /// Status flags, hardware-owned.
    pub stat: RO<u32>,
    /// Error flag clear, write-one-to-clear.
    pub err_clr: WO<u32>,
    /// Transmit FIFO.
    pub tx_fifo: WO<u32>,
    /// Receive FIFO.
    pub rx_fifo: RO<u32>,
    /// FIFO maintenance.
    pub fifo_ctrl: WO<u32>,
}

pub type MasterEn = Bit<0>;
pub type SclkPol = Bit<2>;
pub type SclkPh = Bit<3>;
/// Frame size in bytes, minus one.
pub type FrameSize = Field<4, 2>;
pub type LsbFirst = Bit<6>;
pub type PrdDiv = Field<0, 8>;

pub type TxFull = Bit<0>;
pub type RxEmpty = Bit<1>;
pub type Busy = Bit<2>;
pub type RxOverrun = Bit<4>;
pub type ModeFault = Bit<5>;

pub type TxFifoClr = Bit<0>;
pub type RxFifoClr = Bit<1>;

impl SpiRegs {
    /// Register block in its documented reset state: disabled, FIFOs empty.
    pub const fn reset() -> Self {
        SpiRegs {
            config: RW::new(0),
            period: RW::new(0),
            stat: RO::new(RxEmpty::MASK),
            err_clr: WO::new(0),
            tx_fifo: WO::new(0),
            rx_fifo: RO::new(0),
            fifo_ctrl: WO::new(0),
        }
    }
}

/// Binds an SPI singleton to its register block.
///
/// # Safety
///
/// `ptr` must return the base address of an SPI register block, `INDEX` the
/// instance number the routing table uses for it, and at most one such
/// binding may exist per block.
pub unsafe trait SpiInstance: Gated {
    const INDEX: u8;
    fn ptr() -> *const SpiRegs;
}

/// SCLK pins - DO NOT IMPLEMENT THIS TRAIT
pub unsafe trait SclkPin<SPI> {}

/// MOSI pins - DO NOT IMPLEMENT THIS TRAIT
pub unsafe trait MosiPin<SPI> {}

/// MISO pins - DO NOT IMPLEMENT THIS TRAIT
pub unsafe trait MisoPin<SPI> {}

/// SS pins - DO NOT IMPLEMENT THIS TRAIT
pub unsafe trait SsPin<SPI> {}

/// Spi pins - DO NOT IMPLEMENT THIS TRAIT
pub unsafe trait Pins<SPI> {}

unsafe impl<SPI, SCLK, MOSI, MISO> Pins<SPI> for (SCLK, MOSI, MISO)
where
    SCLK: SclkPin<SPI>,
    MOSI: MosiPin<SPI>,
    MISO: MisoPin<SPI>,
{
}

unsafe impl<SPI, SCLK, MOSI, MISO, SS> Pins<SPI> for (SCLK, MOSI, MISO, SS)
where
    SCLK: SclkPin<SPI>,
    MOSI: MosiPin<SPI>,
    MISO: MisoPin<SPI>,
    SS: SsPin<SPI>,
{
}

/// SPI operational error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// Receive FIFO overflowed before software drained it.
    Overrun,
    /// Mode fault occurred.
    ModeFault,
    /// A bounded wait ran out before the hardware reported ready.
    Timeout,
}

impl embedded_hal::spi::Error for Error {
    fn kind(&self) -> embedded_hal::spi::ErrorKind {
        use embedded_hal::spi::ErrorKind;
        match self {
            Error::Overrun => ErrorKind::Overrun,
            Error::ModeFault => ErrorKind::ModeFault,
            Error::Timeout => ErrorKind::Other,
        }
    }
}

/// SPI configuration error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum ConfigError {
    /// No divisor reaches the requested bit clock within tolerance at the
    /// current peripheral clock.
    UnreachableRate {
        /// Error of the closest reachable rate, in permille.
        closest_error_permille: u32,
    },
}

/// Largest acceptable bit-clock error, in permille.
const TOLERANCE_PERMILLE: u32 = 50;

/// Number of status polls a bounded wait performs before reporting
/// [`Error::Timeout`].
const DEFAULT_TIMEOUT_POLLS: u16 = 2048;

/// SPI abstraction
pub struct Spi<SPI, PINS> {
    spi: SPI,
    pins: PINS,
    timeout: u16,
}

impl<SPI, PINS> Spi<SPI, PINS>
where
    SPI: SpiInstance,
    PINS: Pins<SPI>,
{
    /// Configures the SPI block as a master and enables it.
    ///
    /// Bring-up order: clock gate, then divisor and mode while the block is
    /// held disabled, master enable last.
    pub fn new(
        spi: SPI,
        pins: PINS,
        mode: Mode,
        freq: impl Into<Hertz>,
        clocks: &Clocks,
    ) -> Result<Self, ConfigError> {
        SPI::enable_clock();

        let regs = unsafe { &*SPI::ptr() };
        regs.config.modify(MasterEn::clear);

        let div = match divider::checked(
            clocks.spi_clk().0,
            freq.into().0,
            1,
            PrdDiv::MAX + 1,
            TOLERANCE_PERMILLE,
        ) {
            Ok(d) => d.div,
            Err(DividerError::OutOfTolerance { closest, .. }) => {
                return Err(ConfigError::UnreachableRate {
                    closest_error_permille: closest.error_permille,
                })
            }
        };
        regs.period.write(PrdDiv::bits(div - 1));

        let mut config = FrameSize::bits(0); // 8-bit frames
        if let Polarity::IdleHigh = mode.polarity {
            config = SclkPol::set(config);
        }
        if let Phase::CaptureOnSecondTransition = mode.phase {
            config = SclkPh::set(config);
        }
        regs.config.write(config);
        regs.config.modify(MasterEn::set);

        Ok(Spi {
            spi,
            pins,
            timeout: DEFAULT_TIMEOUT_POLLS,
        })
    }

    /// Sets the poll budget of bounded waits. Not a time unit but a number
    /// of status polls.
    pub fn set_timeout(&mut self, timeout: u16) {
        self.timeout = timeout;
    }

    /// Drops anything still sitting in the FIFOs.
    pub fn clear_fifo(&mut self) {
        let regs = unsafe { &*SPI::ptr() };
        regs.fifo_ctrl.write(TxFifoClr::MASK | RxFifoClr::MASK);
    }

    /// Disables the SPI block and releases the peripheral and pins.
    pub fn free(self) -> (SPI, PINS) {
        let regs = unsafe { &*SPI::ptr() };
        regs.config.modify(MasterEn::clear);
        SPI::disable_clock();
        (self.spi, self.pins)
    }

    fn check_faults(&self) -> Result<(), Error> {
        let regs = unsafe { &*SPI::ptr() };
        let stat = regs.stat.read();
        if RxOverrun::is_set(stat) {
            regs.err_clr.write(RxOverrun::MASK);
            return Err(Error::Overrun);
        }
        if ModeFault::is_set(stat) {
            regs.err_clr.write(ModeFault::MASK);
            return Err(Error::ModeFault);
        }
        Ok(())
    }

    fn read_nb(&mut self) -> nb::Result<u8, Error> {
        self.check_faults().map_err(nb::Error::Other)?;
        let regs = unsafe { &*SPI::ptr() };
        if RxEmpty::is_set(regs.stat.read()) {
            Err(nb::Error::WouldBlock)
        } else {
            Ok((regs.rx_fifo.read() & 0xff) as u8)
        }
    }

    fn write_nb(&mut self, word: u8) -> nb::Result<(), Error> {
        self.check_faults().map_err(nb::Error::Other)?;
        let regs = unsafe { &*SPI::ptr() };
        if TxFull::is_set(regs.stat.read()) {
            Err(nb::Error::WouldBlock)
        } else {
            regs.tx_fifo.write(word as u32);
            Ok(())
        }
    }

    // One full-duplex word with bounded waits on both FIFO edges.
    fn exchange(&mut self, word: u8) -> Result<u8, Error> {
        let mut countdown = self.timeout;
        loop {
            match self.write_nb(word) {
                Ok(()) => break,
                Err(nb::Error::WouldBlock) => {
                    if countdown == 0 {
                        return Err(Error::Timeout);
                    }
                    countdown -= 1;
                }
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }
        let mut countdown = self.timeout;
        loop {
            match self.read_nb() {
                Ok(word) => return Ok(word),
                Err(nb::Error::WouldBlock) => {
                    if countdown == 0 {
                        return Err(Error::Timeout);
                    }
                    countdown -= 1;
                }
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }
    }

    fn wait_idle(&mut self) -> Result<(), Error> {
        let regs = unsafe { &*SPI::ptr() };
        let mut countdown = self.timeout;
        while Busy::is_set(regs.stat.read()) {
            if countdown == 0 {
                return Err(Error::Timeout);
            }
            countdown -= 1;
        }
        Ok(())
    }
}

impl<SPI, PINS> embedded_hal::spi::ErrorType for Spi<SPI, PINS>
where
    SPI: SpiInstance,
    PINS: Pins<SPI>,
{
    type Error = Error;
}

impl<SPI, PINS> embedded_hal_nb::spi::FullDuplex<u8> for Spi<SPI, PINS>
where
    SPI: SpiInstance,
    PINS: Pins<SPI>,
{
    fn read(&mut self) -> nb::Result<u8, Error> {
        self.read_nb()
    }

    fn write(&mut self, word: u8) -> nb::Result<(), Error> {
        self.write_nb(word)
    }
}

impl<SPI, PINS> embedded_hal::spi::SpiBus<u8> for Spi<SPI, PINS>
where
    SPI: SpiInstance,
    PINS: Pins<SPI>,
{
    fn read(&mut self, words: &mut [u8]) -> Result<(), Error> {
        for word in words.iter_mut() {
            *word = self.exchange(0)?;
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Error> {
        for word in words.iter() {
            let _ = self.exchange(*word)?;
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Error> {
        let common = read.len().min(write.len());
        for i in 0..common {
            read[i] = self.exchange(write[i])?;
        }
        for word in &write[common..] {
            let _ = self.exchange(*word)?;
        }
        for word in &mut read[common..] {
            *word = self.exchange(0)?;
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Error> {
        for word in words.iter_mut() {
            *word = self.exchange(*word)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.wait_idle()
    }
}

impl<SPI, PINS> embedded_hal_zero::spi::FullDuplex<u8> for Spi<SPI, PINS>
where
    SPI: SpiInstance,
    PINS: Pins<SPI>,
{
    type Error = Error;

    fn read(&mut self) -> nb::Result<u8, Error> {
        self.read_nb()
    }

    fn send(&mut self, word: u8) -> nb::Result<(), Error> {
        self.write_nb(word)
    }
}

impl<SPI, PINS> embedded_hal_zero::blocking::spi::transfer::Default<u8> for Spi<SPI, PINS>
where
    SPI: SpiInstance,
    PINS: Pins<SPI>,
{
}

impl<SPI, PINS> embedded_hal_zero::blocking::spi::write::Default<u8> for Spi<SPI, PINS>
where
    SPI: SpiInstance,
    PINS: Pins<SPI>,
{
}

/// Declares an SPI instance singleton of one chip variant.
#[macro_export]
macro_rules! spi {
    ($SPI:ident => $ptr:expr, index: $idx:literal, clk: $CLK:ident, gate: $gate:literal) => {
        /// SPI peripheral.
        pub struct $SPI {
            pub(crate) _ownership: (),
        }

        unsafe impl $crate::clock::Gated for $SPI {
            const GATE: u8 = $gate;
            fn clk() -> *const $crate::clock::ClkRegs {
                <$CLK as $crate::clock::ClkInstance>::ptr()
            }
        }

        unsafe impl $crate::spi::SpiInstance for $SPI {
            const INDEX: u8 = $idx;
            fn ptr() -> *const $crate::spi::SpiRegs {
                $ptr
            }
        }
    };
}

/// Binds pins to the SPI signals of one instance, cross-checked against the
/// chip's routing table during constant evaluation.
#[macro_export]
macro_rules! spi_pins {
    (
        spi: $SPI:ident, instance: $inst:literal, table: $TABLE:expr,
        sclk: [$(($SclkPin:ident, $sclk_idx:literal, $SclkAF:ident)),* $(,)?],
        mosi: [$(($MosiPin:ident, $mosi_idx:literal, $MosiAF:ident)),* $(,)?],
        miso: [$(($MisoPin:ident, $miso_idx:literal, $MisoAF:ident)),* $(,)?],
        $(
            ss: [$(($SsPin:ident, $ss_idx:literal, $SsAF:ident)),* $(,)?],
        )?
    ) => {
        $(
            const _: () = assert!(
                $crate::signal::expect_route($TABLE, $sclk_idx, $crate::signal::Signal::SpiSclk, $inst)
                    == <$crate::gpio::$SclkAF as $crate::gpio::Function>::CODE,
                "pin binding disagrees with the routing table"
            );
            unsafe impl $crate::spi::SclkPin<$SPI>
                for $SclkPin<$crate::gpio::Alternate<$crate::gpio::$SclkAF>>
            {
            }
        )*
        $(
            const _: () = assert!(
                $crate::signal::expect_route($TABLE, $mosi_idx, $crate::signal::Signal::SpiMosi, $inst)
                    == <$crate::gpio::$MosiAF as $crate::gpio::Function>::CODE,
                "pin binding disagrees with the routing table"
            );
            unsafe impl $crate::spi::MosiPin<$SPI>
                for $MosiPin<$crate::gpio::Alternate<$crate::gpio::$MosiAF>>
            {
            }
        )*
        $(
            const _: () = assert!(
                $crate::signal::expect_route($TABLE, $miso_idx, $crate::signal::Signal::SpiMiso, $inst)
                    == <$crate::gpio::$MisoAF as $crate::gpio::Function>::CODE,
                "pin binding disagrees with the routing table"
            );
            unsafe impl $crate::spi::MisoPin<$SPI>
                for $MisoPin<$crate::gpio::Alternate<$crate::gpio::$MisoAF>>
            {
            }
        )*
        $(
            $(
                const _: () = assert!(
                    $crate::signal::expect_route($TABLE, $ss_idx, $crate::signal::Signal::SpiSs, $inst)
                        == <$crate::gpio::$SsAF as $crate::gpio::Function>::CODE,
                    "pin binding disagrees with the routing table"
                );
                unsafe impl $crate::spi::SsPin<$SPI>
                    for $SsPin<$crate::gpio::Alternate<$crate::gpio::$SsAF>>
                {
                }
            )*
        )?
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClkRegs;
    use embedded_hal::spi::{SpiBus, MODE_0, MODE_3};
    use embedded_time::rate::Extensions;

    static CLK_REGS: ClkRegs = ClkRegs::reset();

    macro_rules! test_spi {
        ($SPI:ident, gate: $gate:literal, $stat:expr, $rx:expr) => {
            paste::paste! {
                struct $SPI;
                static [<$SPI:upper _REGS>]: SpiRegs = SpiRegs {
                    config: RW::new(0),
                    period: RW::new(0),
                    stat: RO::new($stat),
                    err_clr: WO::new(0),
                    tx_fifo: WO::new(0),
                    rx_fifo: RO::new($rx),
                    fifo_ctrl: WO::new(0),
                };
                unsafe impl Gated for $SPI {
                    const GATE: u8 = $gate;
                    fn clk() -> *const ClkRegs {
                        &CLK_REGS
                    }
                }
                unsafe impl SpiInstance for $SPI {
                    const INDEX: u8 = 0;
                    fn ptr() -> *const SpiRegs {
                        &[<$SPI:upper _REGS>]
                    }
                }
            }
        };
    }

    struct SclkMock;
    struct MosiMock;
    struct MisoMock;
    unsafe impl<SPI> SclkPin<SPI> for SclkMock {}
    unsafe impl<SPI> MosiPin<SPI> for MosiMock {}
    unsafe impl<SPI> MisoPin<SPI> for MisoMock {}

    fn regs<SPI: SpiInstance>() -> &'static SpiRegs {
        unsafe { &*SPI::ptr() }
    }

    #[test]
    fn mode_and_divisor_programming() {
        test_spi!(SpiA, gate: 8, RxEmpty::MASK, 0);
        let _spi = Spi::new(
            SpiA,
            (SclkMock, MosiMock, MisoMock),
            MODE_3,
            8_000_000u32.Hz(),
            &Clocks::new(),
        )
        .unwrap();

        // 32 MHz / 8 MHz = 4, stored minus one.
        assert_eq!(PrdDiv::extract(regs::<SpiA>().period.read()), 3);
        let config = regs::<SpiA>().config.read();
        assert!(MasterEn::is_set(config));
        assert!(SclkPol::is_set(config) && SclkPh::is_set(config));
        assert_eq!(FrameSize::extract(config), 0);
    }

    #[test]
    fn mode0_leaves_clock_bits_clear() {
        test_spi!(SpiB, gate: 9, RxEmpty::MASK, 0);
        let _spi = Spi::new(
            SpiB,
            (SclkMock, MosiMock, MisoMock),
            MODE_0,
            1_000_000u32.Hz(),
            &Clocks::new(),
        )
        .unwrap();
        let config = regs::<SpiB>().config.read();
        assert!(!SclkPol::is_set(config) && !SclkPh::is_set(config));
        assert_eq!(PrdDiv::extract(regs::<SpiB>().period.read()), 31);
    }

    #[test]
    fn unreachable_bit_clock_is_reported() {
        test_spi!(SpiC, gate: 10, RxEmpty::MASK, 0);
        // 32 MHz / 256 = 125 kHz is still far above 1 kHz.
        let result = Spi::new(
            SpiC,
            (SclkMock, MosiMock, MisoMock),
            MODE_0,
            1_000u32.Hz(),
            &Clocks::new(),
        );
        match result {
            Err(ConfigError::UnreachableRate {
                closest_error_permille,
            }) => assert!(closest_error_permille > TOLERANCE_PERMILLE),
            Ok(_) => panic!("expected an unreachable rate"),
        }
    }

    #[test]
    fn bus_transfer_round_trip() {
        test_spi!(SpiD, gate: 11, 0, 0x5a);
        let mut spi = Spi::new(
            SpiD,
            (SclkMock, MosiMock, MisoMock),
            MODE_0,
            8_000_000u32.Hz(),
            &Clocks::new(),
        )
        .unwrap();

        let mut rx = [0u8; 3];
        spi.transfer(&mut rx, &[0x01, 0x02]).unwrap();
        // The simulated receive FIFO always answers 0x5a.
        assert_eq!(rx, [0x5a; 3]);

        let mut buf = [0x11, 0x22];
        spi.transfer_in_place(&mut buf).unwrap();
        assert_eq!(buf, [0x5a; 2]);

        SpiBus::write(&mut spi, &[1, 2, 3]).unwrap();
        spi.flush().unwrap();
    }

    #[test]
    fn stuck_fifo_times_out() {
        test_spi!(SpiE, gate: 12, TxFull::MASK | RxEmpty::MASK, 0);
        let mut spi = Spi::new(
            SpiE,
            (SclkMock, MosiMock, MisoMock),
            MODE_0,
            8_000_000u32.Hz(),
            &Clocks::new(),
        )
        .unwrap();
        spi.set_timeout(16);
        assert_eq!(SpiBus::write(&mut spi, &[0xff]), Err(Error::Timeout));
    }

    #[test]
    fn overrun_is_surfaced() {
        test_spi!(SpiF, gate: 13, RxOverrun::MASK, 0);
        let mut spi = Spi::new(
            SpiF,
            (SclkMock, MosiMock, MisoMock),
            MODE_0,
            8_000_000u32.Hz(),
            &Clocks::new(),
        )
        .unwrap();
        let mut rx = [0u8; 1];
        assert_eq!(SpiBus::read(&mut spi, &mut rx), Err(Error::Overrun));
    }
}
