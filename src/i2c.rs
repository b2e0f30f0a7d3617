/*!
  # Inter-Integrated Circuit (I2C) bus
  To construct the I2C instance use the `I2c::new` function.
  The pin parameter is a tuple containing `(scl, sda)` carrying the alternate
  function the routing table assigns to the I2C signals.

  ## Initialisation example
  ```ignore
    let scl = parts.pin8.into_alternate::<AF4>();
    let sda = parts.pin9.into_alternate::<AF4>();

    let mut i2c = hal::i2c::I2c::new(
        dp.i2c0,
        (scl, sda),
        100_000u32.Hz(),
        &clocks,
    )?;
  ```

  Transfers are packet-based: the controller generates start, address and
  stop on its own once a packet is configured, software only pumps the FIFOs.
  Every FIFO wait is bounded; a wedged bus reports [`Error::Timeout`] instead
  of hanging. Arbitration loss is reported as its own error — the caller may
  simply retry the transaction once the bus is free.
*/

use crate::clock::{Clocks, Gated};
use crate::divider::{self, DividerError};
use crate::mmio::{Bit, Field, RO, RW, WO};
use embedded_hal::i2c::{Operation, SevenBitAddress};
use embedded_time::rate::Hertz;

/// I2C register block
#[repr(C)]
pub struct I2cRegs {
    /// Master enable, packet direction, target address and length.
    pub config: RW<u32>,
    /// SCL phase length, minus one.
    pub prd: RW<u32>,
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
/// 1 = read packet, 0 = write packet.
pub type PktDir = Bit<1>;
pub type SclSyncEn = Bit<2>;
pub type SlvAddr = Field<8, 7>;
/// Packet length in bytes, minus one.
pub type PktLen = Field<16, 8>;
pub type PrdPhase = Field<0, 8>;

pub type TxFull = Bit<0>;
pub type RxEmpty = Bit<1>;
pub type BusBusy = Bit<2>;
pub type ArbLost = Bit<3>;
pub type Nack = Bit<4>;
pub type RxOverflow = Bit<5>;
pub type RxUnderflow = Bit<6>;
pub type TxOverflow = Bit<7>;
pub type TxUnderflow = Bit<8>;

pub type TxFifoClr = Bit<0>;
pub type RxFifoClr = Bit<1>;

impl I2cRegs {
    /// Register block in its documented reset state: disabled, FIFOs empty,
    /// bus idle.
    pub const fn reset() -> Self {
        I2cRegs {
            config: RW::new(0),
            prd: RW::new(0),
            stat: RO::new(RxEmpty::MASK),
            err_clr: WO::new(0),
            tx_fifo: WO::new(0),
            rx_fifo: RO::new(0),
            fifo_ctrl: WO::new(0),
        }
    }
}

/// Binds an I2C singleton to its register block.
///
/// # Safety
///
/// `ptr` must return the base address of an I2C register block, `INDEX` the
/// instance number the routing table uses for it, and at most one such
/// binding may exist per block.
pub unsafe trait I2cInstance: Gated {
    const INDEX: u8;
    fn ptr() -> *const I2cRegs;
}

/// SCL pins - DO NOT IMPLEMENT THIS TRAIT
pub unsafe trait SclPin<I2C> {}

/// SDA pins - DO NOT IMPLEMENT THIS TRAIT
pub unsafe trait SdaPin<I2C> {}

/// I2C pins - DO NOT IMPLEMENT THIS TRAIT
pub unsafe trait Pins<I2C> {}

unsafe impl<I2C, SCL, SDA> Pins<I2C> for (SCL, SDA)
where
    SCL: SclPin<I2C>,
    SDA: SdaPin<I2C>,
{
}

/// I2C error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// Rx FIFO overflow occurred.
    RxOverflow,
    /// Rx FIFO underflow occurred.
    RxUnderflow,
    /// Tx FIFO overflow occurred.
    TxOverflow,
    /// Tx FIFO underflow occurred.
    TxUnderflow,
    /// Lost bus arbitration against another master. Retryable.
    ArbitrationLoss,
    /// The target did not acknowledge.
    NoAcknowledge,
    /// A packet longer than the hardware supports was requested.
    PacketTooLong,
    /// Timeout waiting on a FIFO or the bus.
    Timeout,
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
        match self {
            Error::RxOverflow | Error::TxOverflow => ErrorKind::Overrun,
            Error::RxUnderflow | Error::TxUnderflow => ErrorKind::Bus,
            Error::ArbitrationLoss => ErrorKind::ArbitrationLoss,
            Error::NoAcknowledge => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown),
            Error::PacketTooLong | Error::Timeout => ErrorKind::Other,
        }
    }
}

/// I2C configuration error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum ConfigError {
    /// No phase divisor reaches the requested bus clock within tolerance at
    /// the current peripheral clock.
    UnreachableRate {
        /// Error of the closest reachable rate, in permille.
        closest_error_permille: u32,
    },
}

/// Largest acceptable bus-clock error, in permille.
const TOLERANCE_PERMILLE: u32 = 50;

/// Number of status polls a bounded wait performs before reporting
/// [`Error::Timeout`]. Adjustable via [`I2c::set_timeout`].
const DEFAULT_TIMEOUT_POLLS: u16 = 2048;

/// I2C peripheral operating in master mode supporting seven bit addressing
pub struct I2c<I2C, PINS> {
    i2c: I2C,
    pins: PINS,
    timeout: u16,
}

impl<I2C, PINS> I2c<I2C, PINS>
where
    I2C: I2cInstance,
    PINS: Pins<I2C>,
{
    /**
      Constructs an I2C instance in master mode.
      The pin parameter tuple (scl, sda) needs to be configured accordingly.

      The frequency cannot be more than a quarter of the I2C source clock.
      Each SCL cycle spans four phases of equal length; the phase divisor is
      chosen round-to-nearest and checked against a 50 permille tolerance.
    */
    pub fn new(
        i2c: I2C,
        pins: PINS,
        freq: impl Into<Hertz>,
        clocks: &Clocks,
    ) -> Result<Self, ConfigError> {
        I2C::enable_clock();

        let regs = unsafe { &*I2C::ptr() };
        regs.config.modify(MasterEn::clear);

        // One bus cycle is four equal phases of `len` source-clock ticks.
        let len = match divider::checked(
            clocks.i2c_clk().0,
            freq.into().0 * 4,
            2,
            PrdPhase::MAX + 1,
            TOLERANCE_PERMILLE,
        ) {
            Ok(d) => d.div,
            Err(DividerError::OutOfTolerance { closest, .. }) => {
                return Err(ConfigError::UnreachableRate {
                    closest_error_permille: closest.error_permille,
                })
            }
        };
        regs.prd.write(PrdPhase::bits(len - 1));
        regs.config.modify(SclSyncEn::set);

        Ok(I2c {
            i2c,
            pins,
            timeout: DEFAULT_TIMEOUT_POLLS,
        })
    }

    /// Disables the block and releases the peripheral and pins.
    pub fn release(self) -> (I2C, PINS) {
        let regs = unsafe { &*I2C::ptr() };
        regs.config.modify(MasterEn::clear);
        I2C::disable_clock();
        (self.i2c, self.pins)
    }

    /// Set the timeout when waiting for FIFOs and the bus.
    /// It's not a time unit but the number of status polls to perform.
    /// This defaults to 2048.
    pub fn set_timeout(&mut self, timeout: u16) {
        self.timeout = timeout;
    }

    /// Clear FIFOs
    pub fn clear_fifo(&mut self) {
        let regs = unsafe { &*I2C::ptr() };
        regs.fifo_ctrl.write(TxFifoClr::MASK | RxFifoClr::MASK);
    }

    // Bus fault flags that abort the running packet. Checked on every poll
    // so an arbitration loss surfaces mid-transfer, not at the end.
    fn check_faults(&self, regs: &I2cRegs) -> Result<(), Error> {
        let stat = regs.stat.read();
        if ArbLost::is_set(stat) {
            regs.err_clr.write(ArbLost::MASK);
            regs.config.modify(MasterEn::clear);
            return Err(Error::ArbitrationLoss);
        }
        if Nack::is_set(stat) {
            regs.err_clr.write(Nack::MASK);
            regs.config.modify(MasterEn::clear);
            return Err(Error::NoAcknowledge);
        }
        if RxOverflow::is_set(stat) {
            regs.fifo_ctrl.write(RxFifoClr::MASK);
            regs.err_clr.write(RxOverflow::MASK);
            return Err(Error::RxOverflow);
        }
        if RxUnderflow::is_set(stat) {
            regs.fifo_ctrl.write(RxFifoClr::MASK);
            regs.err_clr.write(RxUnderflow::MASK);
            return Err(Error::RxUnderflow);
        }
        if TxOverflow::is_set(stat) {
            regs.fifo_ctrl.write(TxFifoClr::MASK);
            regs.err_clr.write(TxOverflow::MASK);
            return Err(Error::TxOverflow);
        }
        if TxUnderflow::is_set(stat) {
            regs.fifo_ctrl.write(TxFifoClr::MASK);
            regs.err_clr.write(TxUnderflow::MASK);
            return Err(Error::TxUnderflow);
        }
        Ok(())
    }

    fn wait_for<F: Fn(u32) -> bool>(&self, regs: &I2cRegs, ready: F) -> Result<(), Error> {
        let mut countdown = self.timeout;
        while !ready(regs.stat.read()) {
            self.check_faults(regs)?;
            if countdown == 0 {
                return Err(Error::Timeout);
            }
            countdown -= 1;
        }
        Ok(())
    }

    fn start_packet(&self, regs: &I2cRegs, address: u8, len: usize, read: bool) -> Result<(), Error> {
        if len == 0 || len > PktLen::MAX as usize + 1 {
            return Err(Error::PacketTooLong);
        }
        regs.config.modify(|r| {
            let r = SlvAddr::insert(r, address as u32);
            let r = PktLen::insert(r, len as u32 - 1);
            let r = if read { PktDir::set(r) } else { PktDir::clear(r) };
            MasterEn::set(r)
        });
        Ok(())
    }

    fn read_packet(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), Error> {
        let regs = unsafe { &*I2C::ptr() };
        self.check_faults(regs)?;
        self.start_packet(regs, address, buffer.len(), true)?;

        for value in buffer.iter_mut() {
            if let Err(e) = self.wait_for(regs, |stat| !RxEmpty::is_set(stat)) {
                regs.config.modify(MasterEn::clear);
                return Err(e);
            }
            *value = (regs.rx_fifo.read() & 0xff) as u8;
        }

        regs.config.modify(MasterEn::clear);
        Ok(())
    }

    fn write_packet(&mut self, address: u8, buffer: &[u8]) -> Result<(), Error> {
        let regs = unsafe { &*I2C::ptr() };
        self.check_faults(regs)?;
        self.start_packet(regs, address, buffer.len(), false)?;

        for value in buffer.iter() {
            if let Err(e) = self.wait_for(regs, |stat| !TxFull::is_set(stat)) {
                regs.config.modify(MasterEn::clear);
                return Err(e);
            }
            regs.tx_fifo.write(*value as u32);
        }

        // The stop condition is out only once the bus goes idle.
        let result = self.wait_for(regs, |stat| !BusBusy::is_set(stat));
        regs.config.modify(MasterEn::clear);
        result
    }
}

impl<I2C, PINS> embedded_hal::i2c::ErrorType for I2c<I2C, PINS>
where
    I2C: I2cInstance,
    PINS: Pins<I2C>,
{
    type Error = Error;
}

impl<I2C, PINS> embedded_hal::i2c::I2c<SevenBitAddress> for I2c<I2C, PINS>
where
    I2C: I2cInstance,
    PINS: Pins<I2C>,
{
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        for op in operations.iter_mut() {
            match op {
                Operation::Read(buffer) => self.read_packet(address, buffer)?,
                Operation::Write(buffer) => self.write_packet(address, buffer)?,
            }
        }
        Ok(())
    }
}

impl<I2C, PINS> embedded_hal_zero::blocking::i2c::Read for I2c<I2C, PINS>
where
    I2C: I2cInstance,
    PINS: Pins<I2C>,
{
    type Error = Error;

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.read_packet(address, buffer)
    }
}

impl<I2C, PINS> embedded_hal_zero::blocking::i2c::Write for I2c<I2C, PINS>
where
    I2C: I2cInstance,
    PINS: Pins<I2C>,
{
    type Error = Error;

    fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), Self::Error> {
        self.write_packet(addr, bytes)
    }
}

impl<I2C, PINS> embedded_hal_zero::blocking::i2c::WriteRead for I2c<I2C, PINS>
where
    I2C: I2cInstance,
    PINS: Pins<I2C>,
{
    type Error = Error;

    fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.write_packet(address, bytes)?;
        self.read_packet(address, buffer)
    }
}

/// Declares an I2C instance singleton of one chip variant.
#[macro_export]
macro_rules! i2c {
    ($I2C:ident => $ptr:expr, index: $idx:literal, clk: $CLK:ident, gate: $gate:literal) => {
        /// I2C peripheral.
        pub struct $I2C {
            pub(crate) _ownership: (),
        }

        unsafe impl $crate::clock::Gated for $I2C {
            const GATE: u8 = $gate;
            fn clk() -> *const $crate::clock::ClkRegs {
                <$CLK as $crate::clock::ClkInstance>::ptr()
            }
        }

        unsafe impl $crate::i2c::I2cInstance for $I2C {
            const INDEX: u8 = $idx;
            fn ptr() -> *const $crate::i2c::I2cRegs {
                $ptr
            }
        }
    };
}

/// Binds pins to the I2C signals of one instance, cross-checked against the
/// chip's routing table during constant evaluation.
#[macro_export]
macro_rules! i2c_pins {
    (
        i2c: $I2C:ident, instance: $inst:literal, table: $TABLE:expr,
        scl: [$(($SclPin:ident, $scl_idx:literal, $SclAF:ident)),* $(,)?],
        sda: [$(($SdaPin:ident, $sda_idx:literal, $SdaAF:ident)),* $(,)?] $(,)?
    ) => {
        $(
            const _: () = assert!(
                $crate::signal::expect_route($TABLE, $scl_idx, $crate::signal::Signal::I2cScl, $inst)
                    == <$crate::gpio::$SclAF as $crate::gpio::Function>::CODE,
                "pin binding disagrees with the routing table"
            );
            unsafe impl $crate::i2c::SclPin<$I2C>
                for $SclPin<$crate::gpio::Alternate<$crate::gpio::$SclAF>>
            {
            }
        )*
        $(
            const _: () = assert!(
                $crate::signal::expect_route($TABLE, $sda_idx, $crate::signal::Signal::I2cSda, $inst)
                    == <$crate::gpio::$SdaAF as $crate::gpio::Function>::CODE,
                "pin binding disagrees with the routing table"
            );
            unsafe impl $crate::i2c::SdaPin<$I2C>
                for $SdaPin<$crate::gpio::Alternate<$crate::gpio::$SdaAF>>
            {
            }
        )*
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClkRegs;
    use embedded_hal::i2c::I2c as _;
    use embedded_time::rate::Extensions;

    static CLK_REGS: ClkRegs = ClkRegs::reset();

    macro_rules! test_i2c {
        ($I2C:ident, gate: $gate:literal, $stat:expr, $rx:expr) => {
            paste::paste! {
                struct $I2C;
                static [<$I2C:upper _REGS>]: I2cRegs = I2cRegs {
                    config: RW::new(0),
                    prd: RW::new(0),
                    stat: RO::new($stat),
                    err_clr: WO::new(0),
                    tx_fifo: WO::new(0),
                    rx_fifo: RO::new($rx),
                    fifo_ctrl: WO::new(0),
                };
                unsafe impl Gated for $I2C {
                    const GATE: u8 = $gate;
                    fn clk() -> *const ClkRegs {
                        &CLK_REGS
                    }
                }
                unsafe impl I2cInstance for $I2C {
                    const INDEX: u8 = 0;
                    fn ptr() -> *const I2cRegs {
                        &[<$I2C:upper _REGS>]
                    }
                }
            }
        };
    }

    struct SclMock;
    struct SdaMock;
    unsafe impl<I2C> SclPin<I2C> for SclMock {}
    unsafe impl<I2C> SdaPin<I2C> for SdaMock {}

    fn regs<I: I2cInstance>() -> &'static I2cRegs {
        unsafe { &*I::ptr() }
    }

    #[test]
    fn phase_divisor_programming() {
        test_i2c!(I2cA, gate: 16, RxEmpty::MASK, 0);
        let _i2c = I2c::new(I2cA, (SclMock, SdaMock), 100_000u32.Hz(), &Clocks::new()).unwrap();
        // 32 MHz / (4 * 100 kHz) = 80, stored minus one.
        assert_eq!(PrdPhase::extract(regs::<I2cA>().prd.read()), 79);
        assert!(SclSyncEn::is_set(regs::<I2cA>().config.read()));
        assert!(!MasterEn::is_set(regs::<I2cA>().config.read()));
    }

    #[test]
    fn unreachable_bus_clock_is_reported() {
        test_i2c!(I2cB, gate: 17, RxEmpty::MASK, 0);
        // Above a quarter of the source clock even the smallest divisor is
        // out of tolerance.
        let result = I2c::new(I2cB, (SclMock, SdaMock), 9_000_000u32.Hz(), &Clocks::new());
        match result {
            Err(ConfigError::UnreachableRate {
                closest_error_permille,
            }) => assert!(closest_error_permille > TOLERANCE_PERMILLE),
            Ok(_) => panic!("expected an unreachable rate"),
        }
    }

    #[test]
    fn read_configures_the_packet_and_drains_the_fifo() {
        test_i2c!(I2cC, gate: 18, 0, 0x42);
        let mut i2c = I2c::new(I2cC, (SclMock, SdaMock), 100_000u32.Hz(), &Clocks::new()).unwrap();

        let mut buffer = [0u8; 4];
        i2c.read(0x50, &mut buffer).unwrap();
        assert_eq!(buffer, [0x42; 4]);

        // The packet registers keep the last transfer's shape.
        let config = regs::<I2cC>().config.read();
        assert_eq!(SlvAddr::extract(config), 0x50);
        assert_eq!(PktLen::extract(config), 3);
        assert!(PktDir::is_set(config));
        assert!(!MasterEn::is_set(config));
    }

    #[test]
    fn write_pushes_every_byte() {
        test_i2c!(I2cD, gate: 19, 0, 0);
        let mut i2c = I2c::new(I2cD, (SclMock, SdaMock), 400_000u32.Hz(), &Clocks::new()).unwrap();
        i2c.write(0x21, &[1, 2, 3]).unwrap();
        let config = regs::<I2cD>().config.read();
        assert_eq!(SlvAddr::extract(config), 0x21);
        assert_eq!(PktLen::extract(config), 2);
        assert!(!PktDir::is_set(config));
    }

    #[test]
    fn arbitration_loss_aborts_the_transfer() {
        test_i2c!(I2cE, gate: 20, ArbLost::MASK, 0);
        let mut i2c = I2c::new(I2cE, (SclMock, SdaMock), 100_000u32.Hz(), &Clocks::new()).unwrap();
        let mut buffer = [0u8; 2];
        assert_eq!(i2c.read(0x50, &mut buffer), Err(Error::ArbitrationLoss));
    }

    #[test]
    fn missing_acknowledge_is_reported() {
        test_i2c!(I2cF, gate: 21, Nack::MASK, 0);
        let mut i2c = I2c::new(I2cF, (SclMock, SdaMock), 100_000u32.Hz(), &Clocks::new()).unwrap();
        assert_eq!(i2c.write(0x68, &[0]), Err(Error::NoAcknowledge));
    }

    #[test]
    fn wedged_fifo_times_out() {
        test_i2c!(I2cG, gate: 22, RxEmpty::MASK, 0);
        let mut i2c = I2c::new(I2cG, (SclMock, SdaMock), 100_000u32.Hz(), &Clocks::new()).unwrap();
        i2c.set_timeout(16);
        let mut buffer = [0u8; 1];
        assert_eq!(i2c.read(0x50, &mut buffer), Err(Error::Timeout));
    }

    #[test]
    fn oversized_packets_are_rejected() {
        test_i2c!(I2cH, gate: 23, 0, 0);
        let mut i2c = I2c::new(I2cH, (SclMock, SdaMock), 100_000u32.Hz(), &Clocks::new()).unwrap();
        let buffer = [0u8; 257];
        assert_eq!(i2c.write(0x10, &buffer), Err(Error::PacketTooLong));
    }
}
