//! BM318: the 32-pin member of the family.
//!
//! Two UARTs, two SPIs, one I2C and the four-channel DMA controller.

use crate::signal::{Signal, SignalRoute};

const CLK_BASE: usize = 0x4000_0000;
const PORT_BASE: usize = 0x4000_1000;
const UART0_BASE: usize = 0x4001_0000;
const SPI0_BASE: usize = 0x4001_1000;
const I2C0_BASE: usize = 0x4001_2000;
const UART1_BASE: usize = 0x4001_4000;
const SPI1_BASE: usize = 0x4001_5000;
const DMA_BASE: usize = 0x4002_0000;

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

/// Signal routing table, generated from the BM318 pin-function sheet.
///
/// Function codes: AF2 = UART, AF3 = SPI, AF4 = I2C. The low sixteen pins
/// carry the BM310 mux unchanged.
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
    route!(12, UartTx,   1, 2),
    route!(13, UartRx,   1, 2),
    route!(14, UartRts,  1, 2),
    route!(15, UartCts,  1, 2),
    route!(16, SpiSclk,  1, 3),
    route!(17, SpiMosi,  1, 3),
    route!(18, SpiMiso,  1, 3),
    route!(19, SpiSs,    1, 3),
    route!(20, I2cScl,   0, 4),
    route!(21, I2cSda,   0, 4),
    route!(24, UartTx,   1, 2),
    route!(25, UartRx,   1, 2),
    // pins 22, 23 and 26..=31 are GPIO only
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
        pin16: (Pin16, 16),
        pin17: (Pin17, 17),
        pin18: (Pin18, 18),
        pin19: (Pin19, 19),
        pin20: (Pin20, 20),
        pin21: (Pin21, 21),
        pin22: (Pin22, 22),
        pin23: (Pin23, 23),
        pin24: (Pin24, 24),
        pin25: (Pin25, 25),
        pin26: (Pin26, 26),
        pin27: (Pin27, 27),
        pin28: (Pin28, 28),
        pin29: (Pin29, 29),
        pin30: (Pin30, 30),
        pin31: (Pin31, 31),
    ]
}

crate::uart! { UART0 => UART0_BASE as *const crate::serial::UartRegs, index: 0, clk: CLK, gate: 0 }
crate::uart! { UART1 => UART1_BASE as *const crate::serial::UartRegs, index: 1, clk: CLK, gate: 3 }
crate::spi! { SPI0 => SPI0_BASE as *const crate::spi::SpiRegs, index: 0, clk: CLK, gate: 1 }
crate::spi! { SPI1 => SPI1_BASE as *const crate::spi::SpiRegs, index: 1, clk: CLK, gate: 4 }
crate::i2c! { I2C0 => I2C0_BASE as *const crate::i2c::I2cRegs, index: 0, clk: CLK, gate: 2 }
crate::dma! { DMA => DMA_BASE as *const crate::dma::DmaRegs, clk: CLK, gate: 5 }

crate::uart_pins! {
    uart: UART0, instance: 0, table: ROUTES,
    tx: [(Pin0, 0, AF2), (Pin4, 4, AF2)],
    rx: [(Pin1, 1, AF2), (Pin5, 5, AF2)],
    rts: [(Pin2, 2, AF2)],
    cts: [(Pin3, 3, AF2)],
}

crate::uart_pins! {
    uart: UART1, instance: 1, table: ROUTES,
    tx: [(Pin12, 12, AF2), (Pin24, 24, AF2)],
    rx: [(Pin13, 13, AF2), (Pin25, 25, AF2)],
    rts: [(Pin14, 14, AF2)],
    cts: [(Pin15, 15, AF2)],
}

crate::spi_pins! {
    spi: SPI0, instance: 0, table: ROUTES,
    sclk: [(Pin0, 0, AF3), (Pin8, 8, AF3)],
    mosi: [(Pin1, 1, AF3), (Pin9, 9, AF3)],
    miso: [(Pin2, 2, AF3), (Pin10, 10, AF3)],
    ss: [(Pin3, 3, AF3), (Pin11, 11, AF3)],
}

crate::spi_pins! {
    spi: SPI1, instance: 1, table: ROUTES,
    sclk: [(Pin16, 16, AF3)],
    mosi: [(Pin17, 17, AF3)],
    miso: [(Pin18, 18, AF3)],
    ss: [(Pin19, 19, AF3)],
}

crate::i2c_pins! {
    i2c: I2C0, instance: 0, table: ROUTES,
    scl: [(Pin4, 4, AF4), (Pin6, 6, AF4), (Pin20, 20, AF4)],
    sda: [(Pin5, 5, AF4), (Pin7, 7, AF4), (Pin21, 21, AF4)],
}

/// All peripherals of the BM318.
pub struct Peripherals {
    pub glb: GLB,
    pub uart0: UART0,
    pub uart1: UART1,
    pub spi0: SPI0,
    pub spi1: SPI1,
    pub i2c0: I2C0,
    pub dma: DMA,
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
            uart1: UART1 { _ownership: () },
            spi0: SPI0 { _ownership: () },
            spi1: SPI1 { _ownership: () },
            i2c0: I2C0 { _ownership: () },
            dma: DMA { _ownership: () },
        }
    }
}
