use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::ptr;

use crate::epoll::{Epoll, EpollEvent, EpollFlags, EpollTimeout};

/// The low-level readiness multiplexer a [`Reactor`] drives.
///
/// One interest set per descriptor, tagged with an opaque `u64` that comes
/// back with every ready event. [`Epoll`] is the production implementor;
/// [`MockPoller`] is generated for tests, so prefer being generic over
/// `Poller` in code that should be testable without a kernel.
///
/// Handlers are stored as `Box<dyn Handler<P>>`, so pollers are `'static`.
///
/// [`Reactor`]: crate::Reactor
/// [`MockPoller`]: crate::MockPoller
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait Poller: 'static {
    /// `EPOLL_CTL_ADD`: installs a new interest set for `fd`.
    fn install(&self, fd: RawFd, mask: EpollFlags, data: u64) -> io::Result<()>;

    /// `EPOLL_CTL_MOD`: replaces the interest set of an installed `fd`.
    fn modify(&self, fd: RawFd, mask: EpollFlags, data: u64) -> io::Result<()>;

    /// `EPOLL_CTL_DEL`: removes `fd` from the interest list.
    fn remove(&self, fd: RawFd) -> io::Result<()>;

    /// Fills `events` with ready events and returns how many were written.
    fn wait(&self, events: &mut [EpollEvent], timeout: EpollTimeout) -> io::Result<usize>;
}

impl Poller for Epoll {
    fn install(&self, fd: RawFd, mask: EpollFlags, data: u64) -> io::Result<()> {
        epoll_ctl(self, libc::EPOLL_CTL_ADD, fd, Some(EpollEvent::new(mask, data)))
    }

    fn modify(&self, fd: RawFd, mask: EpollFlags, data: u64) -> io::Result<()> {
        epoll_ctl(self, libc::EPOLL_CTL_MOD, fd, Some(EpollEvent::new(mask, data)))
    }

    fn remove(&self, fd: RawFd) -> io::Result<()> {
        epoll_ctl(self, libc::EPOLL_CTL_DEL, fd, None)
    }

    fn wait(&self, events: &mut [EpollEvent], timeout: EpollTimeout) -> io::Result<usize> {
        Epoll::wait(self, events, timeout).map_err(io::Error::from)
    }
}

// `Epoll::{add, modify}` want an `AsFd`; slots only hand out raw numbers.
fn epoll_ctl(epfd: &Epoll, op: i32, fd: RawFd, mut event: Option<EpollEvent>) -> io::Result<()> {
    let event = match &mut event {
        Some(ev) => ev as *mut EpollEvent,
        None => ptr::null_mut(),
    };
    let ret = unsafe { libc::epoll_ctl(epfd.0.as_raw_fd(), op, fd, event.cast()) };
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
