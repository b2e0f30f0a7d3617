//! Single-buffered or peripheral-peripheral DMA transfers

use core::sync::atomic::{compiler_fence, Ordering};

use super::single_channel::{ChannelConfig, SingleChannel};
use super::{ReadTarget, WriteTarget};

/// Configuration for a single-buffered DMA transfer
pub struct Config<CH: SingleChannel, FROM: ReadTarget, TO: WriteTarget> {
    ch: CH,
    from: FROM,
    to: TO,
}

impl<CH, FROM, TO, WORD> Config<CH, FROM, TO>
where
    CH: SingleChannel,
    FROM: ReadTarget<ReceivedWord = WORD>,
    TO: WriteTarget<TransmittedWord = WORD>,
{
    /// Create a new configuration for a single-buffered DMA transfer
    pub fn new(ch: CH, from: FROM, to: TO) -> Config<CH, FROM, TO> {
        Config { ch, from, to }
    }

    /// Start the DMA transfer
    ///
    /// Consumes the channel and both targets: from here until [`Transfer::wait`]
    /// returns them, the engine owns the buffers and software has no way to
    /// reach them.
    pub fn start(mut self) -> Transfer<CH, FROM, TO> {
        // Make sure that memory contents reflect what the user intended
        // before the engine starts reading.
        compiler_fence(Ordering::SeqCst);

        self.ch.config(&self.from, &mut self.to);
        self.ch.start();

        Transfer {
            ch: self.ch,
            from: self.from,
            to: self.to,
        }
    }
}

/// Instance of a single-buffered DMA transfer
pub struct Transfer<CH: SingleChannel, FROM: ReadTarget, TO: WriteTarget> {
    ch: CH,
    from: FROM,
    to: TO,
}

impl<CH, FROM, TO, WORD> Transfer<CH, FROM, TO>
where
    CH: SingleChannel,
    FROM: ReadTarget<ReceivedWord = WORD>,
    TO: WriteTarget<TransmittedWord = WORD>,
{
    /// Check if a terminal-count interrupt is pending for this channel
    /// and clear the corresponding pending bit
    pub fn check_tc_irq(&mut self) -> bool {
        self.ch.check_tc_irq()
    }

    /// Check if an error interrupt is pending for this channel
    /// and clear the corresponding pending bit
    pub fn check_err_irq(&mut self) -> bool {
        self.ch.check_err_irq()
    }

    /// True once the hardware has cleared the channel enable, i.e. the
    /// transfer has run to completion or faulted.
    pub fn is_done(&self) -> bool {
        !self.ch.is_enabled()
    }

    /// Block until the transfer is complete, returning the channel and
    /// targets
    ///
    /// Completes the ownership handoff: the buffers come back to software
    /// only after the completion flag has been observed.
    pub fn wait(self) -> (CH, FROM, TO) {
        while !self.is_done() {}

        // Make sure the CPU does not read buffer contents from before the
        // transfer completed.
        compiler_fence(Ordering::SeqCst);

        (self.ch, self.from, self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ClkRegs, Gated};
    use crate::dma::single_channel::{ChannelConfig, SingleChannel};
    use crate::dma::{ChEnable, DmaExt, DmaRegs, DstIncr, EngineEn, SrcIncr, TransferSize};

    static CLK_REGS: ClkRegs = ClkRegs::reset();
    static DMA_REGS: DmaRegs = DmaRegs::reset();

    crate::dma! { DMA => &DMA_REGS, clk: TestClk, gate: 24 }

    struct TestClk;
    unsafe impl crate::clock::ClkInstance for TestClk {
        fn ptr() -> *const ClkRegs {
            &CLK_REGS
        }
    }

    #[test]
    fn split_powers_the_engine() {
        let channels = DMA { _ownership: () }.split();
        assert!(EngineEn::is_set(DMA_REGS.top_config.read()));
        assert!(DMA::clock_enabled());
        assert_eq!(channels.ch1.id(), 1);
    }

    #[test]
    fn memory_to_memory_handoff() {
        let channels = DMA { _ownership: () }.split();
        let ch = channels.ch2;

        static SRC: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
        static mut DST: [u8; 8] = [0; 8];

        let src: &'static [u8] = &SRC[..];
        let dst: &'static mut [u8] = unsafe { &mut *core::ptr::addr_of_mut!(DST) };
        let transfer = Config::new(ch, src, dst).start();

        // The engine owns the channel now; programming is visible in the
        // channel registers.
        let ch_regs = &DMA_REGS.ch[2];
        assert!(ChEnable::is_set(ch_regs.config.read()));
        assert_eq!(ch_regs.src_addr.read(), SRC.as_ptr() as u32);
        assert_eq!(TransferSize::extract(ch_regs.control.read()), 8);
        assert!(SrcIncr::is_set(ch_regs.control.read()));
        assert!(DstIncr::is_set(ch_regs.control.read()));
        assert!(!transfer.is_done());

        // Hardware completion: the engine clears the channel enable.
        ch_regs.config.modify(ChEnable::clear);
        assert!(transfer.is_done());

        let (mut ch, _src, _dst) = transfer.wait();
        // Buffers are back under software ownership; the channel can go
        // again. No pending terminal count was raised by the simulation.
        assert!(!ch.check_tc_irq());
    }

    #[test]
    fn oversized_buffers_are_clamped() {
        let channels = DMA { _ownership: () }.split();
        let mut ch = channels.ch3;

        static BIG_SRC: [u8; 5000] = [0xaa; 5000];
        static mut BIG_DST: [u8; 5000] = [0; 5000];

        let src: &'static [u8] = &BIG_SRC[..];
        let mut dst: &'static mut [u8] = unsafe { &mut *core::ptr::addr_of_mut!(BIG_DST) };
        ch.config(&src, &mut dst);
        assert_eq!(
            TransferSize::extract(DMA_REGS.ch[3].control.read()),
            TransferSize::MAX
        );
    }
}
