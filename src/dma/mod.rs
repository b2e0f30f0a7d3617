//! Direct Memory Access
//!
//! Abstraction layer for configuring and using the DMA controller to move
//! data without intervention from the CPU core. The controller has four
//! independent channels that can transfer data between memory and
//! peripherals in various configurations.
//!
//! While a transfer runs, the engine is a second actor on the buffers: the
//! [`single_buffer::Transfer`] type owns the source and destination for the
//! duration and only hands them back from `wait()`, after the completion
//! flag has been observed. Touching a buffer mid-flight is therefore not
//! expressible without `unsafe`.

use crate::clock::Gated;
use crate::mmio::{Bit, Field, RO, RW, WO};
use crate::typelevel::Sealed;
use core::marker::PhantomData;
use embedded_dma::{ReadBuffer, WriteBuffer};

pub mod single_buffer;
pub mod single_channel;

/// Channels per controller.
pub const CHANNELS: u8 = 4;

/// Per-channel register group
#[repr(C)]
pub struct ChRegs {
    /// Transfer source address.
    pub src_addr: RW<u32>,
    /// Transfer destination address.
    pub dst_addr: RW<u32>,
    /// Transfer size, address increments, completion interrupt.
    pub control: RW<u32>,
    /// Channel enable, handshake numbers, flow control, interrupt masks.
    pub config: RW<u32>,
}

/// DMA controller register block
#[repr(C)]
pub struct DmaRegs {
    /// Engine enable.
    pub top_config: RW<u32>,
    /// Per-channel terminal-count interrupt status, hardware-owned.
    pub int_tc_status: RO<u32>,
    /// Terminal-count clear, write-one-to-clear.
    pub int_tc_clear: WO<u32>,
    /// Per-channel error interrupt status, hardware-owned.
    pub int_err_status: RO<u32>,
    /// Error clear, write-one-to-clear.
    pub int_err_clear: WO<u32>,
    /// Channel register groups.
    pub ch: [ChRegs; CHANNELS as usize],
}

pub type EngineEn = Bit<0>;

pub type TransferSize = Field<0, 12>;
pub type SrcIncr = Bit<26>;
pub type DstIncr = Bit<27>;
pub type TcIntEn = Bit<31>;

pub type ChEnable = Bit<0>;
pub type SrcPeriph = Field<1, 5>;
pub type DstPeriph = Field<6, 5>;
pub type FlowCtrl = Field<11, 3>;
pub type TcMask = Bit<14>;
pub type ErrMask = Bit<15>;

impl ChRegs {
    pub const fn reset() -> Self {
        ChRegs {
            src_addr: RW::new(0),
            dst_addr: RW::new(0),
            control: RW::new(0),
            config: RW::new(0),
        }
    }
}

impl DmaRegs {
    /// Register block in its documented reset state: engine off, all
    /// channels disabled and quiet.
    pub const fn reset() -> Self {
        DmaRegs {
            top_config: RW::new(0),
            int_tc_status: RO::new(0),
            int_tc_clear: WO::new(0),
            int_err_status: RO::new(0),
            int_err_clear: WO::new(0),
            ch: [
                ChRegs::reset(),
                ChRegs::reset(),
                ChRegs::reset(),
                ChRegs::reset(),
            ],
        }
    }
}

/// Binds a DMA controller singleton to its register block.
///
/// # Safety
///
/// `ptr` must return the base address of a DMA controller register block,
/// and at most one such binding may exist per block.
pub unsafe trait DmaInstance: Gated {
    fn ptr() -> *const DmaRegs;
}

/// Extension trait to split the DMA controller into independent channels.
///
/// Splitting opens the controller's clock gate and switches the engine on.
pub trait DmaExt: Sealed {
    type Channels;
    fn split(self) -> Self::Channels;
}

/// DMA channel `CH` of controller `D`.
pub struct Channel<D, const CH: u8> {
    _dma: PhantomData<D>,
}

impl<D, const CH: u8> Channel<D, CH> {
    const IN_RANGE: () = assert!(CH < CHANNELS, "no such DMA channel");

    #[doc(hidden)]
    pub const fn __new() -> Self {
        let _: () = Self::IN_RANGE;
        Channel { _dma: PhantomData }
    }
}

impl<D, const CH: u8> Sealed for Channel<D, CH> {}

/// Trait which is implemented by anything that can be read via DMA.
pub trait ReadTarget {
    /// Type which is transferred in a single DMA transfer.
    type ReceivedWord;

    /// Returns the source handshake number for this data source (`None` for
    /// memory buffers).
    fn rx_treq() -> Option<u8>;

    /// Returns the address and the maximum number of words that can be
    /// transferred from this data source in a single DMA operation.
    ///
    /// # Safety
    ///
    /// This function has the same safety guarantees as
    /// `ReadBuffer::read_buffer`.
    fn rx_address_count(&self) -> (u32, u32);

    /// Returns whether the address shall be incremented after each transfer.
    fn rx_increment(&self) -> bool;
}

/// Trait which is implemented by anything that can be written via DMA.
pub trait WriteTarget {
    /// Type which is transferred in a single DMA transfer.
    type TransmittedWord;

    /// Returns the destination handshake number for this data sink (`None`
    /// for memory buffers).
    fn tx_treq() -> Option<u8>;

    /// Returns the address and the maximum number of words that can be
    /// transferred into this data sink in a single DMA operation.
    fn tx_address_count(&mut self) -> (u32, u32);

    /// Returns whether the address shall be incremented after each transfer.
    fn tx_increment(&self) -> bool;
}

impl<B: ReadBuffer> ReadTarget for B {
    type ReceivedWord = <B as ReadBuffer>::Word;

    fn rx_treq() -> Option<u8> {
        None
    }

    fn rx_address_count(&self) -> (u32, u32) {
        let (ptr, len) = unsafe { self.read_buffer() };
        (ptr as u32, len as u32)
    }

    fn rx_increment(&self) -> bool {
        true
    }
}

impl<B: WriteBuffer> WriteTarget for B {
    type TransmittedWord = <B as WriteBuffer>::Word;

    fn tx_treq() -> Option<u8> {
        None
    }

    fn tx_address_count(&mut self) -> (u32, u32) {
        let (ptr, len) = unsafe { self.write_buffer() };
        (ptr as u32, len as u32)
    }

    fn tx_increment(&self) -> bool {
        true
    }
}

/// Declares the DMA controller singleton of one chip variant and its split
/// into channels.
#[macro_export]
macro_rules! dma {
    ($DMA:ident => $dma_ptr:expr, clk: $CLK:ident, gate: $gate:literal) => {
        /// DMA controller peripheral.
        pub struct $DMA {
            pub(crate) _ownership: (),
        }

        unsafe impl $crate::clock::Gated for $DMA {
            const GATE: u8 = $gate;
            fn clk() -> *const $crate::clock::ClkRegs {
                <$CLK as $crate::clock::ClkInstance>::ptr()
            }
        }

        unsafe impl $crate::dma::DmaInstance for $DMA {
            fn ptr() -> *const $crate::dma::DmaRegs {
                $dma_ptr
            }
        }

        impl $crate::typelevel::Sealed for $DMA {}

        /// Set of DMA channels.
        pub struct Channels {
            pub ch0: $crate::dma::Channel<$DMA, 0>,
            pub ch1: $crate::dma::Channel<$DMA, 1>,
            pub ch2: $crate::dma::Channel<$DMA, 2>,
            pub ch3: $crate::dma::Channel<$DMA, 3>,
        }

        impl $crate::dma::DmaExt for $DMA {
            type Channels = Channels;

            fn split(self) -> Channels {
                use $crate::clock::Gated;
                Self::enable_clock();
                let regs = unsafe { &*<Self as $crate::dma::DmaInstance>::ptr() };
                regs.top_config.modify($crate::dma::EngineEn::set);
                Channels {
                    ch0: $crate::dma::Channel::__new(),
                    ch1: $crate::dma::Channel::__new(),
                    ch2: $crate::dma::Channel::__new(),
                    ch3: $crate::dma::Channel::__new(),
                }
            }
        }
    };
}
