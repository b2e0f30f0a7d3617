//! Clock controller
//!
//! The BM31x clock tree has three root sources: the internal 32 MHz RC
//! oscillator (always running), an external crystal, and a PLL fed from the
//! crystal. The root mux feeds the system clock; a single bus divider derives
//! the peripheral clock (PCLK) that the UART, SPI and I2C blocks consume.
//! Every peripheral additionally sits behind a clock gate; a register block
//! whose gate is off must not be written, so peripheral constructors always
//! open the gate first.
//!
//! Configuration goes through the [`Strict`] configurator: it only accepts
//! frequencies the divider network can hit exactly and reports
//! [`ClockError::UnreachableFrequency`] otherwise. The bring-up order is
//! fixed: the root mux is parked on the RC oscillator before the crystal or
//! the PLL are touched, and a source is only selected after its ready/lock
//! flag has been observed — selecting an unlocked source is not something
//! this module will do, and a source that never reports ready surfaces as
//! [`ClockError::LockTimeout`] instead of an unbounded poll.
//!
//! ## Runtime clock switching
//!
//! [`Clocks::reconfigure`] switches the tree at runtime. Every `Clocks` value
//! carries a [`generation`](Clocks::generation) counter that the switch bumps.
//! Frequency-derived peripheral state (e.g. a UART baud divisor) records the
//! generation it was computed against and must be recomputed afterwards —
//! see `Serial::refresh_baud`. The compiler cannot enforce that contract;
//! the counter exists so that peripherals can assert it cheaply.

use crate::mmio::{Bit, Field, RO, RW};
use core::num::NonZeroU32;
use embedded_time::rate::Hertz;

/// Clock controller register block
#[repr(C)]
pub struct ClkRegs {
    /// Source enables: bit 0 RC32M, bit 1 XTAL.
    pub src_en: RW<u32>,
    /// Source ready flags, hardware-owned: bit 0 RC32M, bit 1 XTAL.
    pub src_rdy: RO<u32>,
    /// PLL control: enable, reference divider, feedback divider.
    pub pll_cfg: RW<u32>,
    /// PLL status, hardware-owned: bit 0 lock.
    pub pll_stat: RO<u32>,
    /// Root clock mux.
    pub sel: RW<u32>,
    /// Bus (PCLK) divider, minus one.
    pub div: RW<u32>,
    /// Peripheral clock gates, one bit per gate index.
    pub gate: RW<u32>,
}

pub type Rc32mEn = Bit<0>;
pub type XtalEn = Bit<1>;
pub type Rc32mRdy = Bit<0>;
pub type XtalRdy = Bit<1>;
pub type PllEn = Bit<0>;
pub type PllRefDiv = Field<2, 3>;
pub type PllFbDiv = Field<8, 8>;
pub type PllLock = Bit<0>;
pub type RootSel = Field<0, 2>;
pub type PclkDiv = Field<0, 8>;

/// Root mux encodings.
const SEL_RC32M: u32 = 0;
const SEL_XTAL: u32 = 1;
const SEL_PLL: u32 = 2;

/// Internal RC oscillator frequency.
pub const RC32M_HZ: u32 = 32_000_000;

/// Highest system clock the family is specified for.
const MAX_SYSCLK_HZ: u32 = 192_000_000;

/// Poll budget for ready/lock flags. Generous against real silicon (the PLL
/// locks in tens of microseconds); the point is that a dead oscillator turns
/// into an error, not a hang.
const READY_POLLS: u32 = 100_000;

impl ClkRegs {
    /// Register block in its documented reset state: running from RC32M,
    /// crystal and PLL off, all gates closed.
    pub const fn reset() -> Self {
        ClkRegs {
            src_en: RW::new(Rc32mEn::MASK),
            src_rdy: RO::new(Rc32mRdy::MASK),
            pll_cfg: RW::new(0),
            pll_stat: RO::new(0),
            sel: RW::new(SEL_RC32M),
            div: RW::new(0),
            gate: RW::new(0),
        }
    }
}

/// Binds a clock controller singleton to its register block.
///
/// # Safety
///
/// `ptr` must return the base address of a clock controller register block,
/// and at most one such binding may exist per block.
pub unsafe trait ClkInstance {
    fn ptr() -> *const ClkRegs;
}

/// A peripheral that sits behind a clock gate.
///
/// Opening the gate is the first step of every peripheral bring-up; writing
/// any other register of an ungated block is undefined behaviour on the real
/// silicon. The gate register is shared between all peripherals, so updates
/// go through `critical_section`.
///
/// # Safety
///
/// `GATE` must be the gate index the silicon assigns to this peripheral and
/// `clk` must point at the clock controller of the same chip.
pub unsafe trait Gated {
    const GATE: u8;
    fn clk() -> *const ClkRegs;

    fn enable_clock() {
        let regs = unsafe { &*Self::clk() };
        critical_section::with(|_| regs.gate.modify(|r| r | 1 << Self::GATE));
    }

    fn disable_clock() {
        let regs = unsafe { &*Self::clk() };
        critical_section::with(|_| regs.gate.modify(|r| r & !(1 << Self::GATE)));
    }

    fn clock_enabled() -> bool {
        let regs = unsafe { &*Self::clk() };
        regs.gate.read() & (1 << Self::GATE) != 0
    }
}

/// Clock configuration error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum ClockError {
    /// No exact divider/multiplier combination reaches the requested
    /// frequency from the configured sources.
    UnreachableFrequency,
    /// The selected source did not report ready when the mux switch was
    /// about to happen.
    SourceNotReady,
    /// A ready/lock flag did not assert within the poll budget.
    LockTimeout,
}

/// Ownership token for the clock configuration registers, obtained from the
/// GLB `split()`. Holding it is what authorizes reprogramming the tree.
pub struct ClkCfg<C: ClkInstance> {
    _clk: core::marker::PhantomData<C>,
}

impl<C: ClkInstance> ClkCfg<C> {
    #[doc(hidden)]
    pub const fn __new() -> Self {
        ClkCfg {
            _clk: core::marker::PhantomData,
        }
    }
}

/// Frozen clock frequencies
///
/// Produced by [`Strict::freeze`]; a copy of the settled tree that
/// peripheral constructors read their source frequencies from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clocks {
    sysclk: u32,
    pclk: u32,
    generation: u32,
}

impl Clocks {
    /// Reset-state clock tree: 32 MHz RC oscillator, undivided bus clock.
    pub const fn new() -> Self {
        Clocks {
            sysclk: RC32M_HZ,
            pclk: RC32M_HZ,
            generation: 0,
        }
    }

    /// System clock frequency.
    pub const fn sysclk(&self) -> Hertz {
        Hertz(self.sysclk)
    }

    /// Peripheral bus clock frequency.
    pub const fn pclk(&self) -> Hertz {
        Hertz(self.pclk)
    }

    /// Clock feeding the UART baud generators.
    pub const fn uart_clk(&self) -> Hertz {
        self.pclk()
    }

    /// Clock feeding the SPI bit-rate dividers.
    pub const fn spi_clk(&self) -> Hertz {
        self.pclk()
    }

    /// Clock feeding the I2C phase dividers.
    pub const fn i2c_clk(&self) -> Hertz {
        self.pclk()
    }

    /// Bumped on every runtime switch; frequency-derived register values
    /// recorded under an older generation are stale.
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Switches the running clock tree to `config`.
    ///
    /// Consumes the old `Clocks` so stale frequencies do not linger; the
    /// returned value carries a bumped [`generation`](Self::generation).
    /// Every frequency-derived peripheral configuration must be recomputed
    /// against the new value before the next transfer.
    pub fn reconfigure<C: ClkInstance>(
        self,
        config: Strict,
        clk_cfg: &mut ClkCfg<C>,
    ) -> Result<Clocks, ClockError> {
        let mut next = config.freeze(clk_cfg)?;
        next.generation = self.generation.wrapping_add(1);
        Ok(next)
    }
}

/// Strict clock configurator
///
/// Only accepts strictly reachable values: if the requested system or bus
/// frequency cannot be produced exactly from the configured sources,
/// [`freeze`](Strict::freeze) reports [`ClockError::UnreachableFrequency`]
/// rather than settling for a nearby rate. Peripherals that can tolerate
/// rate error (UART baud, SPI clock) apply their own tolerance downstream.
pub struct Strict {
    xtal_freq: Option<NonZeroU32>,
    target_sysclk: Option<NonZeroU32>,
    target_pclk: Option<NonZeroU32>,
}

/// Settled source plan, computed before any register is touched.
enum Plan {
    Rc32m,
    Xtal(u32),
    Pll { refdiv: u32, fbdiv: u32 },
}

impl Strict {
    /// Creates a configurator with nothing selected: RC32M, undivided bus.
    pub fn new() -> Self {
        Strict {
            xtal_freq: None,
            target_sysclk: None,
            target_pclk: None,
        }
    }

    /// Declares the external crystal frequency.
    pub fn use_xtal(mut self, freq: impl Into<Hertz>) -> Self {
        self.xtal_freq = NonZeroU32::new(freq.into().0);
        self
    }

    /// Sets the desired system clock frequency.
    pub fn sys_clk(mut self, freq: impl Into<Hertz>) -> Self {
        self.target_sysclk = NonZeroU32::new(freq.into().0);
        self
    }

    /// Sets the desired peripheral bus clock frequency. Must divide the
    /// system clock exactly.
    pub fn bus_clk(mut self, freq: impl Into<Hertz>) -> Self {
        self.target_pclk = NonZeroU32::new(freq.into().0);
        self
    }

    fn plan(&self) -> Result<(Plan, u32), ClockError> {
        let sysclk = self.target_sysclk.map(NonZeroU32::get).unwrap_or(RC32M_HZ);
        if sysclk > MAX_SYSCLK_HZ {
            return Err(ClockError::UnreachableFrequency);
        }
        match self.xtal_freq.map(NonZeroU32::get) {
            None => {
                if sysclk == RC32M_HZ {
                    Ok((Plan::Rc32m, sysclk))
                } else {
                    Err(ClockError::UnreachableFrequency)
                }
            }
            Some(xtal) if xtal == sysclk => Ok((Plan::Xtal(xtal), sysclk)),
            Some(xtal) => {
                // Smallest reference divider wins: it keeps the phase
                // comparison frequency high, which is what the PLL wants.
                let mut refdiv = 1;
                while refdiv <= PllRefDiv::MAX {
                    let num = sysclk as u64 * refdiv as u64;
                    if num % xtal as u64 == 0 {
                        let fbdiv = num / xtal as u64;
                        if fbdiv >= 2 && fbdiv <= PllFbDiv::MAX as u64 {
                            return Ok((
                                Plan::Pll {
                                    refdiv,
                                    fbdiv: fbdiv as u32,
                                },
                                sysclk,
                            ));
                        }
                    }
                    refdiv += 1;
                }
                Err(ClockError::UnreachableFrequency)
            }
        }
    }

    /// Calculates the source plan and programs the clock tree.
    ///
    /// Register order is fixed: park the root mux on RC32M, bring the target
    /// source up, wait for its ready/lock flag (bounded), re-check the flag,
    /// switch the mux, then program the bus divider.
    pub fn freeze<C: ClkInstance>(self, clk_cfg: &mut ClkCfg<C>) -> Result<Clocks, ClockError> {
        let _ = clk_cfg;
        let (plan, sysclk) = self.plan()?;

        let pclk = self.target_pclk.map(NonZeroU32::get).unwrap_or(sysclk);
        if sysclk % pclk != 0 || sysclk / pclk > PclkDiv::MAX + 1 {
            return Err(ClockError::UnreachableFrequency);
        }
        let pclk_div = sysclk / pclk;

        let regs = unsafe { &*C::ptr() };

        // Fall back to the RC oscillator before reshaping anything upstream
        // of the mux.
        regs.src_en.modify(Rc32mEn::set);
        wait_flag(&regs.src_rdy, Rc32mRdy::MASK)?;
        regs.sel.modify(|r| RootSel::insert(r, SEL_RC32M));

        let sel = match plan {
            Plan::Rc32m => SEL_RC32M,
            Plan::Xtal(_) => {
                regs.src_en.modify(XtalEn::set);
                wait_flag(&regs.src_rdy, XtalRdy::MASK)?;
                SEL_XTAL
            }
            Plan::Pll { refdiv, fbdiv } => {
                regs.src_en.modify(XtalEn::set);
                wait_flag(&regs.src_rdy, XtalRdy::MASK)?;
                // Dividers change only while the PLL is held disabled.
                regs.pll_cfg.modify(|r| {
                    let r = PllEn::clear(r);
                    let r = PllRefDiv::insert(r, refdiv);
                    PllFbDiv::insert(r, fbdiv)
                });
                regs.pll_cfg.modify(PllEn::set);
                wait_flag(&regs.pll_stat, PllLock::MASK)?;
                SEL_PLL
            }
        };

        // Last-instant stability check before the mux actually moves.
        let ready = match sel {
            SEL_XTAL => XtalRdy::is_set(regs.src_rdy.read()),
            SEL_PLL => PllLock::is_set(regs.pll_stat.read()),
            _ => Rc32mRdy::is_set(regs.src_rdy.read()),
        };
        if !ready {
            return Err(ClockError::SourceNotReady);
        }

        regs.sel.modify(|r| RootSel::insert(r, sel));
        regs.div.modify(|r| PclkDiv::insert(r, pclk_div - 1));

        Ok(Clocks {
            sysclk,
            pclk,
            generation: 0,
        })
    }
}

impl Default for Strict {
    fn default() -> Self {
        Strict::new()
    }
}

fn wait_flag(reg: &RO<u32>, mask: u32) -> Result<(), ClockError> {
    let mut budget = READY_POLLS;
    while reg.read() & mask == 0 {
        if budget == 0 {
            return Err(ClockError::LockTimeout);
        }
        budget -= 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_time::rate::Extensions;

    macro_rules! test_clk {
        ($name:ident, rdy: $rdy:expr, lock: $lock:expr) => {
            paste::paste! {
                struct $name;
                static [<$name:upper _REGS>]: ClkRegs = ClkRegs {
                    src_en: RW::new(Rc32mEn::MASK),
                    src_rdy: RO::new($rdy),
                    pll_cfg: RW::new(0),
                    pll_stat: RO::new($lock),
                    sel: RW::new(SEL_RC32M),
                    div: RW::new(0),
                    gate: RW::new(0),
                };
                unsafe impl ClkInstance for $name {
                    fn ptr() -> *const ClkRegs {
                        &[<$name:upper _REGS>]
                    }
                }
            }
        };
    }

    fn regs<C: ClkInstance>() -> &'static ClkRegs {
        unsafe { &*C::ptr() }
    }

    #[test]
    fn default_tree_is_rc32m() {
        test_clk!(Rc32, rdy: 0b01, lock: 0);
        let mut cfg = ClkCfg::<Rc32>::__new();
        let clocks = Strict::new().freeze(&mut cfg).unwrap();
        assert_eq!(clocks.sysclk(), 32_000_000u32.Hz());
        assert_eq!(clocks.pclk(), 32_000_000u32.Hz());
        assert_eq!(RootSel::extract(regs::<Rc32>().sel.read()), SEL_RC32M);
    }

    #[test]
    fn pll_plan_and_programming() {
        test_clk!(Pll96, rdy: 0b11, lock: 0b1);
        let mut cfg = ClkCfg::<Pll96>::__new();
        let clocks = Strict::new()
            .use_xtal(24_000_000u32.Hz())
            .sys_clk(96_000_000u32.Hz())
            .bus_clk(48_000_000u32.Hz())
            .freeze(&mut cfg)
            .unwrap();
        assert_eq!(clocks.sysclk(), 96_000_000u32.Hz());
        assert_eq!(clocks.uart_clk(), 48_000_000u32.Hz());

        let r = regs::<Pll96>();
        assert_eq!(RootSel::extract(r.sel.read()), SEL_PLL);
        assert_eq!(PllRefDiv::extract(r.pll_cfg.read()), 1);
        assert_eq!(PllFbDiv::extract(r.pll_cfg.read()), 4);
        assert!(PllEn::is_set(r.pll_cfg.read()));
        assert_eq!(PclkDiv::extract(r.div.read()), 1);
    }

    #[test]
    fn xtal_direct_selection() {
        test_clk!(Xt24, rdy: 0b11, lock: 0);
        let mut cfg = ClkCfg::<Xt24>::__new();
        let clocks = Strict::new()
            .use_xtal(24_000_000u32.Hz())
            .sys_clk(24_000_000u32.Hz())
            .freeze(&mut cfg)
            .unwrap();
        assert_eq!(clocks.sysclk(), 24_000_000u32.Hz());
        assert_eq!(RootSel::extract(regs::<Xt24>().sel.read()), SEL_XTAL);
        assert!(XtalEn::is_set(regs::<Xt24>().src_en.read()));
    }

    #[test]
    fn unreachable_frequency_is_reported() {
        test_clk!(Bad, rdy: 0b11, lock: 0b1);
        let mut cfg = ClkCfg::<Bad>::__new();
        let err = Strict::new()
            .use_xtal(24_000_000u32.Hz())
            .sys_clk(100_000_001u32.Hz())
            .freeze(&mut cfg)
            .unwrap_err();
        assert_eq!(err, ClockError::UnreachableFrequency);

        // Bus clock must divide the system clock exactly.
        let err = Strict::new()
            .use_xtal(24_000_000u32.Hz())
            .sys_clk(96_000_000u32.Hz())
            .bus_clk(36_000_000u32.Hz())
            .freeze(&mut cfg)
            .unwrap_err();
        assert_eq!(err, ClockError::UnreachableFrequency);
    }

    #[test]
    fn stuck_pll_times_out_instead_of_hanging() {
        test_clk!(Stuck, rdy: 0b11, lock: 0);
        let mut cfg = ClkCfg::<Stuck>::__new();
        let err = Strict::new()
            .use_xtal(24_000_000u32.Hz())
            .sys_clk(96_000_000u32.Hz())
            .freeze(&mut cfg)
            .unwrap_err();
        assert_eq!(err, ClockError::LockTimeout);
    }

    #[test]
    fn dead_crystal_times_out() {
        test_clk!(NoXtal, rdy: 0b01, lock: 0);
        let mut cfg = ClkCfg::<NoXtal>::__new();
        let err = Strict::new()
            .use_xtal(24_000_000u32.Hz())
            .sys_clk(24_000_000u32.Hz())
            .freeze(&mut cfg)
            .unwrap_err();
        assert_eq!(err, ClockError::LockTimeout);
    }

    #[test]
    fn reconfigure_bumps_the_generation() {
        test_clk!(Gen, rdy: 0b11, lock: 0b1);
        let mut cfg = ClkCfg::<Gen>::__new();
        let clocks = Strict::new().freeze(&mut cfg).unwrap();
        assert_eq!(clocks.generation(), 0);
        let clocks = clocks
            .reconfigure(
                Strict::new()
                    .use_xtal(24_000_000u32.Hz())
                    .sys_clk(48_000_000u32.Hz()),
                &mut cfg,
            )
            .unwrap();
        assert_eq!(clocks.generation(), 1);
        assert_eq!(clocks.sysclk(), 48_000_000u32.Hz());
    }

    #[test]
    fn gates_open_and_close() {
        test_clk!(GateClk, rdy: 0b01, lock: 0);
        struct Uart0;
        unsafe impl Gated for Uart0 {
            const GATE: u8 = 3;
            fn clk() -> *const ClkRegs {
                GateClk::ptr()
            }
        }
        assert!(!Uart0::clock_enabled());
        Uart0::enable_clock();
        assert!(Uart0::clock_enabled());
        assert_eq!(regs::<GateClk>().gate.read(), 1 << 3);
        Uart0::disable_clock();
        assert!(!Uart0::clock_enabled());
    }
}
