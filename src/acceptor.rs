use std::io;
use std::marker::PhantomData;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;

use crate::handler::{Action, Handler};
use crate::poller::Poller;
use crate::Context;

/// Handler for a listening socket.
///
/// Accepts every pending connection, gives each one a slot and a handler
/// built by `make`, and immediately runs that handler's read side, so a
/// request that arrived together with the connection is served without
/// waiting for another readiness notification.
///
/// `make` may fail (the per-connection state could not be set up); only the
/// new connection is reclaimed then, the listener keeps serving.
pub struct Acceptor<F, H> {
    make: F,
    _marker: PhantomData<fn() -> H>,
}

impl<F, H> Acceptor<F, H>
where
    F: FnMut() -> io::Result<H>,
{
    pub fn new(make: F) -> Self {
        Self {
            make,
            _marker: PhantomData,
        }
    }
}

impl<P, F, H> Handler<P> for Acceptor<F, H>
where
    P: Poller,
    F: FnMut() -> io::Result<H> + 'static,
    H: Handler<P>,
{
    fn on_readable(&mut self, cx: &mut Context<'_, P>) -> Action {
        loop {
            let accepted = match cx.fd() {
                Some(fd) => accept(fd.as_raw_fd()),
                None => return Action::Wait,
            };
            match accepted {
                Ok(fd) => self.admit(cx, fd),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Action::Wait,
                Err(e) => {
                    // EMFILE, ECONNABORTED, ..: the listener itself is fine.
                    log::warn!("accept4 failed: {}", e);
                    return Action::Wait;
                }
            }
        }
    }
}

impl<F, H> Acceptor<F, H> {
    fn admit<P>(&mut self, cx: &mut Context<'_, P>, fd: OwnedFd)
    where
        P: Poller,
        F: FnMut() -> io::Result<H>,
        H: Handler<P>,
    {
        let reactor = cx.reactor();
        let token = match reactor.acquire(fd) {
            Ok(token) => token,
            Err(e) => {
                log::warn!("dropping connection: {}", e);
                return;
            }
        };

        let handler = match (self.make)() {
            Ok(handler) => handler,
            Err(e) => {
                log::warn!("fd {}: cannot set up connection state: {}", token.fd(), e);
                reactor.reclaim(token);
                return;
            }
        };

        log::debug!("fd {}: accepted", token.fd());
        if let Err(e) = reactor.set_handler(token, handler) {
            log::warn!("fd {}: {}", token.fd(), e);
            reactor.reclaim(token);
            return;
        }
        reactor.fire(token, Action::Readable);
    }
}

fn accept(listener: RawFd) -> io::Result<OwnedFd> {
    let fd = unsafe {
        libc::accept4(
            listener,
            ptr::null_mut(),
            ptr::null_mut(),
            libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
        )
    };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}
