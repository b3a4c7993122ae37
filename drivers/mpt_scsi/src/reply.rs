//! # Reply Queue Poller
//!
//! Without interrupts the only way to learn that a request finished is to
//! watch the interrupt status register and drain the reply queue. A raw
//! reply-queue value means one of three things, decided by
//! [`ReplyToken::classify`] before anything else looks at it.

use helix_hal::{BusAddr, Delay, PortIo};

use crate::regs::{Interrupts, MptRegisters};
use crate::{MptError, MptResult};

/// Value read from an empty reply queue
pub const REPLY_QUEUE_EMPTY: u32 = 0xffff_ffff;

/// Interpretation of one reply-queue read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyToken {
    /// Context reply: a request tagged with this context completed
    Completion(u32),
    /// Address reply pointing at our reply frame, or a null token; not a
    /// completion we can match
    Ignored,
    /// Nothing left in the queue
    QueueDrained,
}

impl ReplyToken {
    /// Classify a raw reply-queue value
    ///
    /// Address replies carry the reply frame address shifted right by one,
    /// with the top bit set; shifting back drops that bit.
    pub fn classify(raw: u32, reply_frame: BusAddr) -> Self {
        if raw == REPLY_QUEUE_EMPTY {
            return ReplyToken::QueueDrained;
        }
        let shifted = raw << 1;
        if shifted == 0 || shifted == reply_frame.as_u32() {
            ReplyToken::Ignored
        } else {
            ReplyToken::Completion(raw)
        }
    }
}

/// Waits for the completion of the single outstanding request
pub struct ReplyPoller<'a, I: PortIo + ?Sized, D: Delay + ?Sized> {
    regs: MptRegisters<'a, I>,
    delay: &'a D,
    context: u32,
    reply_frame: BusAddr,
    poll_delay_us: u32,
    retry_budget: u8,
    poll_timeout: Option<u32>,
}

impl<I: PortIo + ?Sized, D: Delay + ?Sized> core::fmt::Debug for ReplyPoller<'_, I, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReplyPoller")
            .field("regs", &self.regs)
            .field("context", &self.context)
            .field("reply_frame", &self.reply_frame)
            .field("retry_budget", &self.retry_budget)
            .field("poll_timeout", &self.poll_timeout)
            .finish_non_exhaustive()
    }
}

impl<'a, I: PortIo + ?Sized, D: Delay + ?Sized> ReplyPoller<'a, I, D> {
    /// Create a poller for the request tagged `context`
    pub fn new(regs: MptRegisters<'a, I>, delay: &'a D, context: u32, reply_frame: BusAddr) -> Self {
        Self {
            regs,
            delay,
            context,
            reply_frame,
            poll_delay_us: crate::MptConfig::DEFAULT_POLL_DELAY_US,
            retry_budget: crate::MptConfig::DEFAULT_RETRY_BUDGET,
            poll_timeout: None,
        }
    }

    /// Set the back-off between empty polls
    pub fn poll_delay_us(mut self, us: u32) -> Self {
        self.poll_delay_us = us;
        self
    }

    /// Set how many resubmissions an aliased reply may trigger
    pub fn retry_budget(mut self, retries: u8) -> Self {
        self.retry_budget = retries;
        self
    }

    /// Bound the number of register reads; `None` polls forever
    pub fn poll_timeout(mut self, polls: Option<u32>) -> Self {
        self.poll_timeout = polls;
        self
    }

    /// Poll until our context tag shows up
    ///
    /// Every aliased reply within the retry budget calls `resubmit` and
    /// restarts polling. Returns the number of resubmissions made.
    pub fn wait<F: FnMut()>(&self, mut resubmit: F) -> MptResult<u8> {
        let mut retries = 0u8;
        let mut polls = 0u32;

        'poll: loop {
            self.count_poll(&mut polls)?;
            if self.regs.int_status().contains(Interrupts::REPLY) {
                loop {
                    self.count_poll(&mut polls)?;
                    let raw = self.regs.read_reply();
                    match ReplyToken::classify(raw, self.reply_frame) {
                        ReplyToken::Completion(context) if context == self.context => {
                            return Ok(retries);
                        }
                        ReplyToken::Completion(other) => {
                            log::debug!("[mpt] skipping reply for context {:#010x}", other);
                        }
                        ReplyToken::Ignored => {
                            if retries < self.retry_budget {
                                retries += 1;
                                log::warn!("[mpt] aliased reply {:#010x}, resubmitting", raw);
                                resubmit();
                                continue 'poll;
                            }
                            log::error!("[mpt] aliased reply {:#010x} after retry", raw);
                            return Err(MptError::RetryExhausted);
                        }
                        ReplyToken::QueueDrained => break,
                    }
                }
            }
            self.delay.delay_us(self.poll_delay_us);
        }
    }

    fn count_poll(&self, polls: &mut u32) -> MptResult<()> {
        if let Some(limit) = self.poll_timeout {
            if *polls >= limit {
                log::error!("[mpt] no reply after {} polls", limit);
                return Err(MptError::Timeout);
            }
        }
        *polls = polls.saturating_add(1);
        Ok(())
    }
}
