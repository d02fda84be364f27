//! Interest masks used when registering a descriptor with `epoll`.
//!
//! A descriptor has a single `epoll` interest set, but protocol code thinks in
//! two independent directions. [`Direction`] names those directions and their
//! base masks, [`Interest`] carries the extra modifier flags (edge-triggered,
//! one-shot, ..) a caller wants on top, and [`RegState`] describes which
//! directions a slot currently has installed.

use crate::epoll::EpollFlags;

/// One of the two independently toggled readiness directions.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    /// Returns the mask bits that belong to this direction.
    ///
    /// Reading also watches `EPOLLRDHUP`, so a peer shutting down its write
    /// half wakes the read handler, which then observes end-of-stream.
    pub const fn base(self) -> EpollFlags {
        match self {
            Direction::Read => EpollFlags::from_bits_retain(
                EpollFlags::EPOLLIN.bits() | EpollFlags::EPOLLRDHUP.bits(),
            ),
            Direction::Write => EpollFlags::EPOLLOUT,
        }
    }

    /// Returns the other direction.
    pub const fn opposite(self) -> Self {
        match self {
            Direction::Read => Direction::Write,
            Direction::Write => Direction::Read,
        }
    }
}

/// Which directions a slot currently has registered.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum RegState {
    None,
    ReadOnly,
    WriteOnly,
    Both,
}

impl RegState {
    pub(crate) const fn from_parts(read: bool, write: bool) -> Self {
        match (read, write) {
            (false, false) => RegState::None,
            (true, false) => RegState::ReadOnly,
            (false, true) => RegState::WriteOnly,
            (true, true) => RegState::Both,
        }
    }

    /// Returns `true` if `direction` is part of this state.
    pub const fn contains(self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (RegState::Both, _)
                | (RegState::ReadOnly, Direction::Read)
                | (RegState::WriteOnly, Direction::Write)
        )
    }
}

/// Modifier flags OR-ed into a direction's base mask on registration.
///
/// The direction bits themselves come from [`Direction::base`]; `Interest`
/// only carries modifiers such as edge-triggered mode.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Interest(EpollFlags);

impl Default for Interest {
    /// Creates an `Interest` with no modifier set (level-triggered).
    fn default() -> Self {
        Self(EpollFlags::empty())
    }
}

impl From<EpollFlags> for Interest {
    fn from(value: EpollFlags) -> Self {
        Self::new(value)
    }
}

impl From<Interest> for EpollFlags {
    fn from(value: Interest) -> Self {
        value.bitflags()
    }
}

impl Interest {
    /// Creates a new `Interest` from raw `EpollFlags`.
    pub const fn new(flags: EpollFlags) -> Self {
        Self(flags)
    }

    /// Returns the underlying `EpollFlags` bitmask.
    pub const fn bitflags(&self) -> EpollFlags {
        self.0
    }

    const fn add(self, flags: EpollFlags) -> Self {
        Self(EpollFlags::from_bits_retain(self.0.bits() | flags.bits()))
    }

    /// Sets edge-triggered mode (`EPOLLET`).
    ///
    /// Handlers registered this way must drain the descriptor until the
    /// kernel reports would-block, or they will not be woken again.
    pub const fn edge_triggered(self) -> Self {
        self.add(EpollFlags::EPOLLET)
    }

    /// Sets one-shot mode (`EPOLLONESHOT`).
    pub const fn oneshot(self) -> Self {
        self.add(EpollFlags::EPOLLONESHOT)
    }

    /// Adds interest in priority events (`EPOLLPRI`).
    pub const fn pri(self) -> Self {
        self.add(EpollFlags::EPOLLPRI)
    }
}

/// Creates a new, empty `Interest` set.
///
/// The starting point of the fluent API, e.g. `interest().edge_triggered()`.
pub const fn interest() -> Interest {
    Interest::new(EpollFlags::empty())
}
