use crate::epoll::EpollFlags;
use crate::interest::Direction;

/// The readiness reported by `epoll_wait` for one descriptor.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Event(pub(crate) EpollFlags);

impl From<EpollFlags> for Event {
    fn from(value: EpollFlags) -> Self {
        Self(value)
    }
}

impl From<Event> for EpollFlags {
    fn from(value: Event) -> Self {
        value.bitflags()
    }
}

impl Event {
    /// Returns the underlying `EpollFlags` bitmask.
    pub const fn bitflags(&self) -> EpollFlags {
        self.0
    }

    /// Returns `true` if the event wakes the read direction.
    ///
    /// This is `EPOLLIN` or `EPOLLRDHUP`: a half-closed peer is delivered to
    /// the read handler, which sees end-of-stream.
    pub const fn is_readable(&self) -> bool {
        self.0.intersects(Direction::Read.base())
    }

    /// Returns `true` if the Event contains writable readiness (`EPOLLOUT`).
    pub const fn is_writable(&self) -> bool {
        self.0.contains(EpollFlags::EPOLLOUT)
    }

    /// Returns `true` if the Event contains an error (`EPOLLERR`).
    ///
    /// This flag is always reported, even if not requested.
    pub const fn is_error(&self) -> bool {
        self.0.contains(EpollFlags::EPOLLERR)
    }

    /// Returns `true` if the Event contains a "hang up" (`EPOLLHUP`).
    ///
    /// This flag is always reported, even if not requested.
    pub const fn is_hangup(&self) -> bool {
        self.0.contains(EpollFlags::EPOLLHUP)
    }

    /// Returns `true` if the peer has shut down its writing half (`EPOLLRDHUP`).
    pub const fn is_read_closed(&self) -> bool {
        self.0.contains(EpollFlags::EPOLLRDHUP)
    }
}
