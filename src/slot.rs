//! The fixed-capacity, descriptor-indexed slot table.

use std::error::Error;
use std::fmt;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use crate::epoll::EpollFlags;
use crate::handler::Handler;
use crate::interest::{Direction, RegState};
use crate::poller::Poller;

/// Identifies one incarnation of a slot.
///
/// Packed into the `epoll` user data, so a ready event resolves to its slot
/// without any lookup, and an event captured before the slot was reclaimed
/// (or reacquired by a new connection reusing the descriptor number) no
/// longer matches.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct Token {
    fd: u32,
    generation: u32,
}

impl Token {
    /// The descriptor this token was issued for.
    pub const fn fd(&self) -> RawFd {
        self.fd as RawFd
    }

    pub(crate) const fn data(&self) -> u64 {
        (self.generation as u64) << 32 | self.fd as u64
    }

    pub(crate) const fn from_data(data: u64) -> Self {
        Self {
            fd: data as u32,
            generation: (data >> 32) as u32,
        }
    }
}

enum SlotState {
    Free,
    Active(OwnedFd),
}

pub(crate) struct Slot<P: Poller> {
    state: SlotState,
    generation: u32,
    pub(crate) read: Option<EpollFlags>,
    pub(crate) write: Option<EpollFlags>,
    pub(crate) handler: Option<Box<dyn Handler<P>>>,
    /// The handler is out of the slot, running further up the stack.
    pub(crate) running: bool,
}

impl<P: Poller> Slot<P> {
    fn free() -> Self {
        Self {
            state: SlotState::Free,
            generation: 0,
            read: None,
            write: None,
            handler: None,
            running: false,
        }
    }

    fn is(&self, token: Token) -> bool {
        matches!(self.state, SlotState::Active(_)) && self.generation == token.generation
    }

    pub(crate) fn fd(&self) -> Option<BorrowedFd<'_>> {
        match &self.state {
            SlotState::Active(fd) => Some(fd.as_fd()),
            SlotState::Free => None,
        }
    }

    pub(crate) fn interest(&self, direction: Direction) -> Option<EpollFlags> {
        match direction {
            Direction::Read => self.read,
            Direction::Write => self.write,
        }
    }

    pub(crate) fn interest_mut(&mut self, direction: Direction) -> &mut Option<EpollFlags> {
        match direction {
            Direction::Read => &mut self.read,
            Direction::Write => &mut self.write,
        }
    }

    pub(crate) fn state(&self) -> RegState {
        RegState::from_parts(self.read.is_some(), self.write.is_some())
    }
}

pub(crate) struct SlotTable<P: Poller> {
    slots: Box<[Slot<P>]>,
    active: usize,
}

impl<P: Poller> SlotTable<P> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Slot::free()).collect(),
            active: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn active(&self) -> usize {
        self.active
    }

    pub(crate) fn acquire(&mut self, fd: OwnedFd) -> Result<Token, AcquireError> {
        let raw = fd.as_raw_fd();
        let slot = match usize::try_from(raw).ok().and_then(|i| self.slots.get_mut(i)) {
            Some(slot) => slot,
            None => return Err(AcquireError::new(AcquireErrorKind::OutOfRange, fd)),
        };
        if let SlotState::Active(_) = slot.state {
            return Err(AcquireError::new(AcquireErrorKind::Occupied, fd));
        }

        slot.generation = slot.generation.wrapping_add(1);
        slot.read = None;
        slot.write = None;
        slot.handler = None;
        slot.running = false;
        slot.state = SlotState::Active(fd);
        self.active += 1;

        Ok(Token {
            fd: raw as u32,
            generation: slot.generation,
        })
    }

    /// Returns the slot `token` was issued for, if it is still that incarnation.
    pub(crate) fn get(&self, token: Token) -> Option<&Slot<P>> {
        let slot = self.slots.get(token.fd as usize)?;
        slot.is(token).then_some(slot)
    }

    pub(crate) fn get_mut(&mut self, token: Token) -> Option<&mut Slot<P>> {
        let slot = self.slots.get_mut(token.fd as usize)?;
        slot.is(token).then_some(slot)
    }

    /// Marks the slot free and hands back what it owned.
    pub(crate) fn release(
        &mut self,
        token: Token,
    ) -> Option<(OwnedFd, Option<Box<dyn Handler<P>>>)> {
        let slot = self.get_mut(token)?;
        let handler = slot.handler.take();
        slot.read = None;
        slot.write = None;
        let SlotState::Active(fd) = std::mem::replace(&mut slot.state, SlotState::Free) else {
            return None;
        };
        self.active -= 1;
        Some((fd, handler))
    }
}

/// Why a descriptor could not be given a slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AcquireErrorKind {
    /// The descriptor number is not below the table capacity.
    OutOfRange,
    /// The slot for this descriptor is already active.
    Occupied,
}

/// The error returned by [`Reactor::acquire`](crate::Reactor::acquire).
///
/// Acquisition has no side effects on failure; the descriptor is handed back
/// and stays open until the error (or the value from [`into_fd`]) is dropped.
///
/// [`into_fd`]: AcquireError::into_fd
pub struct AcquireError {
    kind: AcquireErrorKind,
    fd: OwnedFd,
}

impl AcquireError {
    fn new(kind: AcquireErrorKind, fd: OwnedFd) -> Self {
        Self { kind, fd }
    }

    pub fn kind(&self) -> AcquireErrorKind {
        self.kind
    }

    /// Gives back the descriptor that could not be acquired.
    pub fn into_fd(self) -> OwnedFd {
        self.fd
    }
}

impl fmt::Debug for AcquireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquireError")
            .field("kind", &self.kind)
            .field("fd", &self.fd.as_raw_fd())
            .finish()
    }
}

impl fmt::Display for AcquireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AcquireErrorKind::OutOfRange => {
                write!(f, "fd {} exceeds the slot table capacity", self.fd.as_raw_fd())
            }
            AcquireErrorKind::Occupied => {
                write!(f, "fd {} already has an active slot", self.fd.as_raw_fd())
            }
        }
    }
}

impl Error for AcquireError {}

impl From<AcquireError> for io::Error {
    fn from(value: AcquireError) -> Self {
        let kind = match value.kind {
            AcquireErrorKind::OutOfRange => io::ErrorKind::InvalidInput,
            AcquireErrorKind::Occupied => io::ErrorKind::AlreadyExists,
        };
        io::Error::new(kind, value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::os::fd::FromRawFd;
    use std::os::unix::net::UnixStream;

    use super::*;
    use crate::poller::MockPoller;

    fn socket() -> OwnedFd {
        let (a, _b) = UnixStream::pair().unwrap();
        a.into()
    }

    #[test]
    fn token_packs_fd_and_generation() {
        let token = Token { fd: 42, generation: 7 };
        assert_eq!(Token::from_data(token.data()), token);
        assert_eq!(token.fd(), 42);
    }

    #[test]
    fn acquire_out_of_range_returns_fd() {
        let mut table = SlotTable::<MockPoller>::new(0);
        let fd = socket();
        let raw = fd.as_raw_fd();

        let err = table.acquire(fd).unwrap_err();
        assert_eq!(err.kind(), AcquireErrorKind::OutOfRange);
        assert_eq!(table.active(), 0);

        // Still open: the table must not have closed it.
        let fd = err.into_fd();
        assert_eq!(fd.as_raw_fd(), raw);
        assert_ne!(unsafe { libc::fcntl(raw, libc::F_GETFD) }, -1);
    }

    #[test]
    fn acquire_occupied_fails() {
        let mut table = SlotTable::<MockPoller>::new(4096);
        let fd = socket();
        let raw = fd.as_raw_fd();
        table.acquire(fd).unwrap();

        // A second owner of the same number can only come from a bug
        // elsewhere; the table must refuse it and must not close anything.
        let alias = unsafe { OwnedFd::from_raw_fd(raw) };
        let err = table.acquire(alias).unwrap_err();
        assert_eq!(err.kind(), AcquireErrorKind::Occupied);
        std::mem::forget(err.into_fd());
        assert_eq!(table.active(), 1);
    }

    #[test]
    fn release_then_reacquire_is_clean() {
        let mut table = SlotTable::<MockPoller>::new(4096);
        let fd = socket();
        let raw = fd.as_raw_fd();
        let first = table.acquire(fd).unwrap();
        table.get_mut(first).unwrap().read = Some(EpollFlags::EPOLLIN);

        let (fd, handler) = table.release(first).unwrap();
        assert!(handler.is_none());
        assert!(table.get(first).is_none());
        assert_eq!(table.active(), 0);

        let second = table.acquire(fd).unwrap();
        assert_eq!(second.fd(), raw);
        assert_ne!(second, first);
        assert!(table.get(first).is_none());
        let slot = table.get(second).unwrap();
        assert_eq!(slot.state(), RegState::None);
        assert!(slot.handler.is_none());
    }
}
