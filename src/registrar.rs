//! Reconciles independent read and write interest into one `epoll` interest set.
//!
//! `epoll` keeps a single mask per descriptor. Each direction field of a slot
//! stores the full mask that was installed when that direction was added, so
//! the mask for the remaining direction can be rebuilt when the other one is
//! dropped.
//!
//! | before    | op            | after     | syscall |
//! |-----------|---------------|-----------|---------|
//! | None      | `add(dir)`    | one dir   | ADD     |
//! | one dir   | `add(other)`  | Both      | MOD     |
//! | Both      | `del(dir)`    | other dir | MOD     |
//! | one dir   | `del(dir)`    | None      | DEL     |
//!
//! Adding a registered direction or deleting an unregistered one is a no-op.

use std::io;

use crate::epoll::EpollFlags;
use crate::interest::{Direction, Interest};
use crate::poller::Poller;
use crate::slot::{Slot, Token};

pub(crate) fn add<P: Poller>(
    poller: &P,
    slot: &mut Slot<P>,
    token: Token,
    direction: Direction,
    flags: Interest,
) -> io::Result<()> {
    if slot.interest(direction).is_some() {
        return Ok(());
    }

    let mut mask = direction.base() | flags.bitflags();
    match slot.interest(direction.opposite()) {
        Some(other) => {
            mask |= other;
            poller.modify(token.fd(), mask, token.data())?;
        }
        None => poller.install(token.fd(), mask, token.data())?,
    }

    *slot.interest_mut(direction) = Some(mask);
    Ok(())
}

pub(crate) fn del<P: Poller>(
    poller: &P,
    slot: &mut Slot<P>,
    token: Token,
    direction: Direction,
) -> io::Result<()> {
    if slot.interest(direction).is_none() {
        return Ok(());
    }

    match slot.interest(direction.opposite()) {
        // The other direction's stored mask may include this direction's
        // bits if it was added second.
        Some(other) => {
            let mask: EpollFlags = other.difference(direction.base());
            poller.modify(token.fd(), mask, token.data())?;
        }
        None => poller.remove(token.fd())?,
    }

    *slot.interest_mut(direction) = None;
    Ok(())
}
