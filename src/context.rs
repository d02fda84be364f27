use std::io;
use std::os::fd::BorrowedFd;

use crate::handler::Action;
use crate::interest::{interest, Direction, Interest};
use crate::poller::Poller;
use crate::slot::Token;
use crate::stream::FdStream;
use crate::Reactor;

/// A handler's view of the reactor while it runs for one slot.
///
/// Operations without a token act on the slot the handler is running for.
/// [`reactor`](Context::reactor) gives access to every other slot, e.g. to
/// acquire and register accepted connections.
pub struct Context<'a, P: Poller> {
    reactor: &'a mut Reactor<P>,
    token: Token,
}

impl<'a, P: Poller> Context<'a, P> {
    pub(crate) fn new(reactor: &'a mut Reactor<P>, token: Token) -> Self {
        Self { reactor, token }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// The slot's descriptor, or `None` once the slot has been reclaimed.
    pub fn fd(&self) -> Option<BorrowedFd<'_>> {
        self.reactor.slots.get(self.token)?.fd()
    }

    /// `Read + Write` over the slot's socket.
    pub fn stream(&self) -> io::Result<FdStream<'_>> {
        self.fd()
            .map(FdStream::new)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "slot already reclaimed"))
    }

    pub fn add(&mut self, direction: Direction, flags: Interest) -> io::Result<()> {
        self.reactor.add(self.token, direction, flags)
    }

    pub fn del(&mut self, direction: Direction) -> io::Result<()> {
        self.reactor.del(self.token, direction)
    }

    /// Re-arms `direction` edge-triggered after the pump hit would-block.
    ///
    /// Returns [`Action::Wait`] on success and [`Action::Error`] if the
    /// registration failed, so a handler can return the result directly.
    pub fn rearm(&mut self, direction: Direction) -> Action {
        match self.add(direction, interest().edge_triggered()) {
            Ok(()) => Action::Wait,
            Err(e) => {
                log::warn!("fd {}: cannot re-arm {:?}: {}", self.token.fd(), direction, e);
                Action::Error
            }
        }
    }

    /// Reclaims the slot this handler is running for.
    ///
    /// The descriptor is closed before this returns; the handler's
    /// `on_cleanup` runs as soon as the current handler method returns.
    /// Returning [`Action::Reclaim`] is usually simpler.
    pub fn reclaim(&mut self) -> bool {
        self.reactor.reclaim(self.token)
    }

    pub fn reactor(&mut self) -> &mut Reactor<P> {
        self.reactor
    }
}
