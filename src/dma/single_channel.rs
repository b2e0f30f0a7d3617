//! Low-level control of one DMA channel.

use super::{
    ChEnable, ChRegs, Channel, DmaInstance, DmaRegs, DstIncr, DstPeriph, ErrMask, FlowCtrl,
    ReadTarget, SrcIncr, SrcPeriph, TcIntEn, TcMask, TransferSize, WriteTarget,
};
use crate::typelevel::Sealed;
use core::convert::TryFrom;

/// Trait which implements low-level functionality for transfers using a
/// single DMA channel.
pub trait SingleChannel: Sealed {
    /// Returns the registers associated with this DMA channel.
    fn ch(&self) -> &'static ChRegs;
    /// Returns the registers of the owning controller.
    fn regs(&self) -> &'static DmaRegs;
    /// Returns the index of the DMA channel.
    fn id(&self) -> u8;

    /// Enables the terminal count signal for this channel.
    fn listen_tc_irq(&mut self) {
        self.ch().config.modify(TcMask::clear);
    }

    /// Disables the terminal count signal for this channel.
    fn unlisten_tc_irq(&mut self) {
        self.ch().config.modify(TcMask::set);
    }

    /// Check if a terminal-count interrupt is pending for this channel
    /// and clear the corresponding pending bit.
    fn check_tc_irq(&mut self) -> bool {
        let regs = self.regs();
        let status = regs.int_tc_status.read();
        if status & (1 << self.id()) != 0 {
            regs.int_tc_clear.write(1 << self.id());
            true
        } else {
            false
        }
    }

    /// Enables the error signal for this channel.
    fn listen_err_irq(&mut self) {
        self.ch().config.modify(ErrMask::clear);
    }

    /// Disables the error signal for this channel.
    fn unlisten_err_irq(&mut self) {
        self.ch().config.modify(ErrMask::set);
    }

    /// Check if an error interrupt is pending for this channel
    /// and clear the corresponding pending bit.
    fn check_err_irq(&mut self) -> bool {
        let regs = self.regs();
        let status = regs.int_err_status.read();
        if status & (1 << self.id()) != 0 {
            regs.int_err_clear.write(1 << self.id());
            true
        } else {
            false
        }
    }

    /// Get the number of data transfers that (still) need to be done.
    fn transfer_size(&self) -> usize {
        TransferSize::extract(self.ch().control.read()) as usize
    }
}

impl<D: DmaInstance, const CH: u8> SingleChannel for Channel<D, CH> {
    fn ch(&self) -> &'static ChRegs {
        &self.regs().ch[CH as usize]
    }

    fn regs(&self) -> &'static DmaRegs {
        unsafe { &*D::ptr() }
    }

    fn id(&self) -> u8 {
        CH
    }
}

/// Transfer flow control, as programmed into the channel configuration.
pub enum FlowControl {
    /// Memory to memory transfer
    M2M = 0b000,
    /// Memory to peripheral transfer
    M2P = 0b001,
    /// Peripheral to memory transfer
    P2M = 0b010,
    /// Peripheral to peripheral transfer
    P2P = 0b011,
}

pub(crate) trait ChannelConfig {
    fn config<WORD, FROM, TO>(&mut self, from: &FROM, to: &mut TO)
    where
        FROM: ReadTarget<ReceivedWord = WORD>,
        TO: WriteTarget<TransmittedWord = WORD>;

    fn start(&mut self);

    fn is_enabled(&self) -> bool;
}

impl<CH: SingleChannel> ChannelConfig for CH {
    fn config<WORD, FROM, TO>(&mut self, from: &FROM, to: &mut TO)
    where
        FROM: ReadTarget<ReceivedWord = WORD>,
        TO: WriteTarget<TransmittedWord = WORD>,
    {
        let (src, src_count) = from.rx_address_count();
        let src_incr = from.rx_increment();
        let (dst, dst_count) = to.tx_address_count();
        let dst_incr = to.tx_increment();
        let len: u32 = match u16::try_from(u32::min(src_count, dst_count)) {
            Ok(v) => u32::min(v as u32, TransferSize::MAX),
            Err(_) => TransferSize::MAX,
        };

        let (srcph, dstph, flowctrl) = match (FROM::rx_treq(), TO::tx_treq()) {
            (None, None) => (0, 0, FlowControl::M2M as u32),
            (None, Some(d)) => (0, d as u32, FlowControl::M2P as u32),
            (Some(s), None) => (s as u32, 0, FlowControl::P2M as u32),
            (Some(s), Some(d)) => (s as u32, d as u32, FlowControl::P2P as u32),
        };

        self.ch().config.modify(ChEnable::clear);
        self.ch().control.write({
            let mut control = TransferSize::bits(len);
            if src_incr {
                control = SrcIncr::set(control);
            }
            if dst_incr {
                control = DstIncr::set(control);
            }
            TcIntEn::set(control)
        });
        self.ch().config.modify(|r| {
            let r = SrcPeriph::insert(r, srcph);
            let r = DstPeriph::insert(r, dstph);
            let r = FlowCtrl::insert(r, flowctrl);
            // terminal count unmasked, error masked
            ErrMask::set(TcMask::clear(r))
        });

        self.ch().src_addr.write(src);
        self.ch().dst_addr.write(dst);

        // clear stale interrupt status
        let regs = self.regs();
        regs.int_tc_clear.write(1 << self.id());
        regs.int_err_clear.write(1 << self.id());
    }

    fn start(&mut self) {
        self.ch().config.modify(ChEnable::set);
    }

    fn is_enabled(&self) -> bool {
        ChEnable::is_set(self.ch().config.read())
    }
}
