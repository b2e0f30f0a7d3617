//! BM310: the 16-pin entry point of the family.
//!
//! One UART, one SPI, one I2C, no DMA controller.

use crate::signal::{Signal, SignalRoute};

const CLK_BASE: usize = 0x4000_0000;
const PORT_BASE: usize = 0x4000_1000;
const UART0_BASE: usize = 0x4001_0000;
const SPI0_BASE: usize = 0x4001_1000;
const I2C0_BASE: usize = 0x4001_2000;

macro_rules! route {
    ($pin:literal, $sig:ident, $inst:literal, $func:literal) => {
        SignalRoute {
            pin: $pin,
            signal: Signal::$sig,
            instance: $inst,
            func: $func,
        }
    };
}

/// Signal routing table, generated from the BM310 pin-function sheet.
///
/// Function codes: AF2 = UART, AF3 = SPI, AF4 = I2C.
#[rustfmt::skip]
pub const ROUTES: &[SignalRoute] = &[
    route!(0,  UartTx,   0, 2), route!(0,  SpiSclk, 0, 3),
    route!(1,  UartRx,   0, 2), route!(1,  SpiMosi, 0, 3),
    route!(2,  UartRts,  0, 2), route!(2,  SpiMiso, 0, 3),
    route!(3,  UartCts,  0, 2), route!(3,  SpiSs,   0, 3),
    route!(4,  UartTx,   0, 2), route!(4,  I2cScl,  0, 4),
    route!(5,  UartRx,   0, 2), route!(5,  I2cSda,  0, 4),
    route!(6,  I2cScl,   0, 4),
    route!(7,  I2cSda,   0, 4),
    route!(8,  SpiSclk,  0, 3),
    route!(9,  SpiMosi,  0, 3),
    route!(10, SpiMiso,  0, 3),
    route!(11, SpiSs,    0, 3),
    // pins 12..=15 are GPIO only
];

crate::gpio! {
    port: PORT => PORT_BASE as *const crate::gpio::PortRegs,
    clk: CLK => CLK_BASE as *const crate::clock::ClkRegs,
    glb: GLB,
    pins: [
        pin0: (Pin0, 0),
        pin1: (Pin1, 1),
        pin2: (Pin2, 2),
        pin3: (Pin3, 3),
        pin4: (Pin4, 4),
        pin5: (Pin5, 5),
        pin6: (Pin6, 6),
        pin7: (Pin7, 7),
        pin8: (Pin8, 8),
        pin9: (Pin9, 9),
        pin10: (Pin10, 10),
        pin11: (Pin11, 11),
        pin12: (Pin12, 12),
        pin13: (Pin13, 13),
        pin14: (Pin14, 14),
        pin15: (Pin15, 15),
    ]
}

crate::uart! { UART0 => UART0_BASE as *const crate::serial::UartRegs, index: 0, clk: CLK, gate: 0 }
crate::spi! { SPI0 => SPI0_BASE as *const crate::spi::SpiRegs, index: 0, clk: CLK, gate: 1 }
crate::i2c! { I2C0 => I2C0_BASE as *const crate::i2c::I2cRegs, index: 0, clk: CLK, gate: 2 }

crate::uart_pins! {
    uart: UART0, instance: 0, table: ROUTES,
    tx: [(Pin0, 0, AF2), (Pin4, 4, AF2)],
    rx: [(Pin1, 1, AF2), (Pin5, 5, AF2)],
    rts: [(Pin2, 2, AF2)],
    cts: [(Pin3, 3, AF2)],
}

crate::spi_pins! {
    spi: SPI0, instance: 0, table: ROUTES,
    sclk: [(Pin0, 0, AF3), (Pin8, 8, AF3)],
    mosi: [(Pin1, 1, AF3), (Pin9, 9, AF3)],
    miso: [(Pin2, 2, AF3), (Pin10, 10, AF3)],
    ss: [(Pin3, 3, AF3), (Pin11, 11, AF3)],
}

crate::i2c_pins! {
    i2c: I2C0, instance: 0, table: ROUTES,
    scl: [(Pin4, 4, AF4), (Pin6, 6, AF4)],
    sda: [(Pin5, 5, AF4), (Pin7, 7, AF4)],
}

/// All peripherals of the BM310.
pub struct Peripherals {
    pub glb: GLB,
    pub uart0: UART0,
    pub spi0: SPI0,
    pub i2c0: I2C0,
}

static mut DEVICE_PERIPHERALS: bool = false;

impl Peripherals {
    /// Returns all peripherals the first time it is called, `None` on every
    /// call after that.
    pub fn take() -> Option<Self> {
        critical_section::with(|_| unsafe {
            if DEVICE_PERIPHERALS {
                None
            } else {
                Some(Peripherals::steal())
            }
        })
    }

    /// Unchecked version of [`Peripherals::take`].
    ///
    /// # Safety
    ///
    /// Creates a second handle to register blocks that may already be owned
    /// elsewhere; the caller takes over all aliasing obligations.
    pub unsafe fn steal() -> Self {
        DEVICE_PERIPHERALS = true;
        Peripherals {
            glb: GLB { _ownership: () },
            uart0: UART0 { _ownership: () },
            spi0: SPI0 { _ownership: () },
            i2c0: I2C0 { _ownership: () },
        }
    }
}
