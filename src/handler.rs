use downcast_rs::{impl_downcast, Downcast};

use crate::context::Context;
use crate::epoll::Epoll;
use crate::poller::Poller;

/// What the dispatcher should do after a handler returns.
///
/// Handlers never call each other directly: finishing one phase and
/// starting the next is expressed by returning the next step, which the
/// dispatcher runs in a loop on the same ready event.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum Action {
    /// Nothing more to do until the next readiness notification.
    Wait,
    /// Run [`Handler::on_readable`] now.
    Readable,
    /// Run [`Handler::on_writable`] now.
    Writable,
    /// Run [`Handler::on_error`] now.
    Error,
    /// Reclaim the slot: drop all interest, run [`Handler::on_cleanup`],
    /// close the descriptor.
    Reclaim,
}

/// The per-descriptor capability set invoked by the dispatcher.
///
/// A handler owns whatever protocol state its connection needs; that state
/// is released after [`on_cleanup`](Handler::on_cleanup) when the slot is
/// reclaimed. Handlers registered with edge-triggered interest must follow
/// the pump discipline described in [`pump`](crate::pump).
pub trait Handler<P: Poller = Epoll>: Downcast {
    /// The descriptor is readable and read interest is registered.
    fn on_readable(&mut self, cx: &mut Context<'_, P>) -> Action {
        log::warn!("unexpected readable event on fd {}", cx.token().fd());
        Action::Wait
    }

    /// The descriptor is writable and write interest is registered.
    fn on_writable(&mut self, cx: &mut Context<'_, P>) -> Action {
        log::warn!("unexpected writable event on fd {}", cx.token().fd());
        Action::Wait
    }

    /// The kernel reported `EPOLLERR` or `EPOLLHUP`, or another handler
    /// method returned [`Action::Error`].
    ///
    /// Must end in the slot being reclaimed; the default does exactly that.
    fn on_error(&mut self, cx: &mut Context<'_, P>) -> Action {
        log::warn!("event with fd {} errors", cx.token().fd());
        Action::Reclaim
    }

    /// Called once while the slot is reclaimed.
    fn on_cleanup(&mut self) {}
}
impl_downcast!(Handler<P> where P: Poller);
