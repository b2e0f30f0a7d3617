//! Signal routing tables
//!
//! Every chip variant ships a table of the pin-mux routes its silicon
//! actually implements: "signal S of peripheral instance N may be driven on
//! pin P under function code F". The typed pin API is generated from the
//! same listing, so an illegal binding has no constructor; the table is the
//! second line of defense and the only one available to code that picks pins
//! at runtime (board-variant selection at startup).
//!
//! [`expect_route`] is meant for constant context: a missing route fails the
//! build. [`resolve`] is the runtime equivalent and reports [`NoRoute`]
//! instead.

/// Peripheral kinds that participate in pin multiplexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeripheralKind {
    Uart,
    Spi,
    I2c,
}

/// A routable peripheral signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Signal {
    UartTx,
    UartRx,
    UartRts,
    UartCts,
    SpiSclk,
    SpiMosi,
    SpiMiso,
    SpiSs,
    I2cScl,
    I2cSda,
}

impl Signal {
    /// The peripheral kind this signal belongs to.
    pub const fn kind(self) -> PeripheralKind {
        match self {
            Signal::UartTx | Signal::UartRx | Signal::UartRts | Signal::UartCts => {
                PeripheralKind::Uart
            }
            Signal::SpiSclk | Signal::SpiMosi | Signal::SpiMiso | Signal::SpiSs => {
                PeripheralKind::Spi
            }
            Signal::I2cScl | Signal::I2cSda => PeripheralKind::I2c,
        }
    }
}

/// One entry of a chip's routing table: `signal` of peripheral `instance`
/// is available on `pin` under function code `func`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SignalRoute {
    pub pin: u8,
    pub signal: Signal,
    pub instance: u8,
    pub func: u8,
}

/// Requested route does not exist on this chip variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NoRoute {
    pub pin: u8,
    pub signal: Signal,
    pub instance: u8,
}

/// Scans `table` for a route of `signal`/`instance` on `pin` and returns its
/// function code.
pub const fn lookup(table: &[SignalRoute], pin: u8, signal: Signal, instance: u8) -> Option<u8> {
    let mut i = 0;
    while i < table.len() {
        let route = &table[i];
        if route.pin == pin && route.instance == instance && route.signal as u8 == signal as u8 {
            return Some(route.func);
        }
        i += 1;
    }
    None
}

/// Like [`lookup`], but a missing route is a panic — in constant context,
/// a build failure naming the offending combination.
pub const fn expect_route(table: &[SignalRoute], pin: u8, signal: Signal, instance: u8) -> u8 {
    match lookup(table, pin, signal, instance) {
        Some(func) => func,
        None => panic!("signal is not routable to this pin on this chip"),
    }
}

/// Runtime route lookup for configurations only known at startup.
pub fn resolve(table: &[SignalRoute], pin: u8, signal: Signal, instance: u8) -> Result<u8, NoRoute> {
    lookup(table, pin, signal, instance).ok_or(NoRoute {
        pin,
        signal,
        instance,
    })
}
