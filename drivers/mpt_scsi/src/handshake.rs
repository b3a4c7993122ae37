//! # Doorbell Handshake
//!
//! Brings an IOC from reset to operational. The sequence is fixed; it runs
//! at bring-up and again before the first command after a timeout:
//!
//! 1. message unit reset through the doorbell
//! 2. unmask doorbell and reply interrupts, clear status
//! 3. handshake: IOC-Init request out one word per write, reply in one
//!    half-word per read
//! 4. clear status, give the IOC a free reply frame

use helix_hal::{BusAddr, PortIo};

use crate::config::InitReplyPolicy;
use crate::frame::{IocInitReply, IocInitRequest};
use crate::regs::{doorbell, Interrupts, MptRegisters};
use crate::{MptError, MptResult};

/// Reset the IOC and exchange IOC-Init
///
/// The reply is returned as received; see [`check_init_reply`].
pub fn ioc_init<I: PortIo + ?Sized>(
    regs: &MptRegisters<'_, I>,
    request: &IocInitRequest,
    reply_frame: BusAddr,
) -> IocInitReply {
    regs.ring(doorbell::MSG_RESET, 0);
    regs.set_int_mask(Interrupts::DOORBELL | Interrupts::REPLY);
    regs.clear_int_status();

    regs.ring(doorbell::HANDSHAKE, IocInitRequest::WORDS as u8);
    for word in request.to_words() {
        log::trace!("[mpt] doorbell <- {:#010x}", word);
        regs.write_doorbell(word);
    }

    // Only the low half of each doorbell read carries reply data
    let mut halves = [0u16; IocInitReply::HALF_WORDS];
    for half in halves.iter_mut() {
        *half = regs.read_doorbell() as u16;
    }
    let reply = IocInitReply::from_half_words(&halves);

    regs.clear_int_status();
    regs.post_reply_frame(reply_frame);

    log::debug!(
        "[mpt] IOC-Init reply: function={:#04x} status={:#06x} loginfo={:#010x}",
        reply.function,
        reply.ioc_status,
        reply.ioc_log_info
    );

    reply
}

/// Apply the configured policy to an IOC-Init reply
pub fn check_init_reply(reply: &IocInitReply, policy: InitReplyPolicy) -> MptResult<()> {
    if policy == InitReplyPolicy::Ignore || reply.is_success() {
        return Ok(());
    }

    match policy {
        InitReplyPolicy::Reject => {
            log::error!(
                "[mpt] IOC-Init rejected: function={:#04x} status={:#06x}",
                reply.function,
                reply.status()
            );
            Err(MptError::InitReplyRejected { status: reply.status() })
        }
        _ => {
            log::warn!(
                "[mpt] IOC-Init reply looks wrong (function={:#04x} status={:#06x}), continuing",
                reply.function,
                reply.status()
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{function, REPLY_FRAME_SIZE};
    use crate::regs::{DOORBELL, INT_MASK, INT_STATUS, REPLY_QUEUE};
    use crate::testing::{Access, EmulatedMpt};

    #[test]
    fn test_handshake_register_sequence() {
        let device = EmulatedMpt::new(0x1000);
        let regs = MptRegisters::new(&device, 0x1000);
        let request = IocInitRequest::new();

        let reply = ioc_init(&regs, &request, BusAddr::new(0x000f_0000));
        assert!(reply.is_success());

        let accesses = device.accesses();
        let words = request.to_words();
        let mut expected = alloc::vec![
            Access::Write(DOORBELL, 0x4000_0000),
            Access::Write(INT_MASK, 0x09),
            Access::Write(INT_STATUS, 0),
            Access::Write(DOORBELL, 0x4206_0000),
        ];
        expected.extend(words.iter().map(|&w| Access::Write(DOORBELL, w)));
        for _ in 0..IocInitReply::HALF_WORDS {
            expected.push(Access::Read(DOORBELL));
        }
        expected.push(Access::Write(INT_STATUS, 0));
        expected.push(Access::Write(REPLY_QUEUE, 0x000f_0000));
        assert_eq!(accesses, expected);
    }

    #[test]
    fn test_handshake_transmits_six_words() {
        let device = EmulatedMpt::new(0x1000);
        let regs = MptRegisters::new(&device, 0x1000);
        ioc_init(&regs, &IocInitRequest::new(), BusAddr::new(0x000f_0000));

        let received = device.init_request_words();
        assert_eq!(received.len(), 6);
        assert_eq!(received[3] & 0xffff, REPLY_FRAME_SIZE as u32);
        assert_eq!(device.reply_frame(), Some(0x000f_0000));
    }

    #[test]
    fn test_reply_uses_low_half_of_doorbell() {
        let device = EmulatedMpt::new(0x1000);
        let mut scripted = IocInitReply::default();
        scripted.function = function::IOC_INIT;
        scripted.ioc_status = 0x0001;
        scripted.ioc_log_info = 0x1122_3344;
        device.set_init_reply(scripted);

        let regs = MptRegisters::new(&device, 0x1000);
        let reply = ioc_init(&regs, &IocInitRequest::new(), BusAddr::new(0x000f_0000));
        assert_eq!(reply, scripted);
    }

    #[test]
    fn test_init_reply_policy() {
        let good = IocInitReply { function: function::IOC_INIT, ..Default::default() };
        let bad = IocInitReply { function: function::IOC_INIT, ioc_status: 0x0002, ..Default::default() };

        assert_eq!(check_init_reply(&good, InitReplyPolicy::Reject), Ok(()));
        assert_eq!(check_init_reply(&bad, InitReplyPolicy::Ignore), Ok(()));
        assert_eq!(check_init_reply(&bad, InitReplyPolicy::Warn), Ok(()));
        assert_eq!(
            check_init_reply(&bad, InitReplyPolicy::Reject),
            Err(MptError::InitReplyRejected { status: 0x0002 })
        );
    }
}
