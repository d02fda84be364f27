//! Fixed-size echo: read exactly [`PACKET_SIZE`] bytes, write them back, close.

use std::io::{self, Read, Write};

use crate::handler::{Action, Handler};
use crate::interest::Direction;
use crate::poller::Poller;
use crate::pump::{self, Progress};
use crate::Context;

pub const PACKET_SIZE: usize = 64;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Phase {
    Receiving,
    Sending,
}

/// Per-connection echo state.
pub struct EchoConnection {
    buf: [u8; PACKET_SIZE],
    received: usize,
    sent: usize,
    phase: Phase,
}

impl Default for EchoConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoConnection {
    pub fn new() -> Self {
        Self {
            buf: [0; PACKET_SIZE],
            received: 0,
            sent: 0,
            phase: Phase::Receiving,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn received(&self) -> &[u8] {
        &self.buf[..self.received]
    }

    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Pumps the request in; switches to [`Phase::Sending`] once it is complete.
    pub fn receive<R: Read + ?Sized>(&mut self, io: &mut R) -> io::Result<Progress> {
        let progress = pump::fill(io, &mut self.buf, &mut self.received)?;
        if progress == Progress::Done {
            self.phase = Phase::Sending;
        }
        Ok(progress)
    }

    pub fn send<W: Write + ?Sized>(&mut self, io: &mut W) -> io::Result<Progress> {
        pump::flush(io, &self.buf[..self.received], &mut self.sent)
    }
}

impl<P: Poller> Handler<P> for EchoConnection {
    fn on_readable(&mut self, cx: &mut Context<'_, P>) -> Action {
        if self.phase != Phase::Receiving {
            log::warn!("fd {}: readable while sending", cx.token().fd());
            return Action::Wait;
        }

        let progress = cx.stream().and_then(|mut stream| self.receive(&mut stream));
        match progress {
            Ok(Progress::Done) => match cx.del(Direction::Read) {
                Ok(()) => Action::Writable,
                Err(e) => {
                    log::warn!("fd {}: cannot drop read interest: {}", cx.token().fd(), e);
                    Action::Error
                }
            },
            Ok(Progress::WouldBlock) => cx.rearm(Direction::Read),
            Ok(Progress::Closed) => {
                log::debug!("fd {}: peer closed after {} bytes", cx.token().fd(), self.received);
                Action::Reclaim
            }
            Err(e) => {
                log::debug!("fd {}: recv failed: {}", cx.token().fd(), e);
                Action::Error
            }
        }
    }

    fn on_writable(&mut self, cx: &mut Context<'_, P>) -> Action {
        if self.phase != Phase::Sending {
            log::warn!("unexpected writable event on fd {}", cx.token().fd());
            return Action::Wait;
        }

        let progress = cx.stream().and_then(|mut stream| self.send(&mut stream));
        match progress {
            Ok(Progress::Done) => Action::Reclaim,
            Ok(Progress::WouldBlock) => cx.rearm(Direction::Write),
            Ok(Progress::Closed) => Action::Reclaim,
            Err(e) => {
                log::debug!("fd {}: send failed: {}", cx.token().fd(), e);
                Action::Error
            }
        }
    }

    fn on_cleanup(&mut self) {
        log::debug!(
            "echo connection done: received {} bytes, sent {}",
            self.received,
            self.sent
        );
    }
}
