mod acceptor;
mod backoff;
mod builder;
mod context;
pub mod echo;
mod event;
mod handler;
mod interest;
mod poller;
pub mod pump;
mod registrar;
mod slot;
mod stream;

pub mod epoll {
    pub use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
}

use std::io;
use std::mem;
use std::os::fd::OwnedFd;
use std::thread;
use std::time::Duration;

pub use crate::acceptor::Acceptor;
use crate::backoff::Backoff;
pub use crate::builder::{Builder, DEFAULT_EVENT_CAPACITY, DEFAULT_MAX_CAPACITY};
pub use crate::context::Context;
use crate::epoll::*;
pub use crate::event::Event;
pub use crate::handler::{Action, Handler};
pub use crate::interest::{interest, Direction, Interest, RegState};
#[cfg(feature = "mock")]
#[cfg_attr(docsrs, doc(cfg(feature = "mock")))]
pub use crate::poller::MockPoller;
pub use crate::poller::Poller;
use crate::slot::SlotTable;
pub use crate::slot::{AcquireError, AcquireErrorKind, Token};
pub use crate::stream::FdStream;

/// The dispatch context: a poller, a fixed-capacity slot table indexed by
/// descriptor number, and a reusable ready-event buffer.
///
/// Everything runs on the thread that calls [`wait`](Reactor::wait); handlers
/// reach the reactor through their [`Context`].
pub struct Reactor<P: Poller = Epoll> {
    slots: SlotTable<P>,
    poller: P,
    events: Box<[EpollEvent]>,
    handling: bool,
}

impl Default for Reactor<Epoll> {
    fn default() -> Self {
        Builder::new().build().expect("Failed to create epoll instance")
    }
}

impl Reactor<Epoll> {
    pub fn new() -> io::Result<Self> {
        Builder::new().build()
    }

    pub fn builder() -> Builder {
        Builder::new()
    }
}

impl<P: Poller> Reactor<P> {
    pub(crate) fn from_parts(poller: P, capacity: usize, event_capacity: usize) -> Self {
        Self {
            slots: SlotTable::new(capacity),
            poller,
            events: vec![EpollEvent::empty(); event_capacity].into_boxed_slice(),
            handling: false,
        }
    }

    pub fn poller(&self) -> &P {
        &self.poller
    }

    pub fn poller_mut(&mut self) -> &mut P {
        &mut self.poller
    }

    pub fn into_poller(self) -> P {
        self.poller
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Number of active slots.
    pub fn active(&self) -> usize {
        self.slots.active()
    }

    /// Gives `fd` a fresh slot with no interest and no handler.
    pub fn acquire(&mut self, fd: OwnedFd) -> Result<Token, AcquireError> {
        self.slots.acquire(fd)
    }

    /// Installs `handler`, dropping the previous one without `on_cleanup`.
    ///
    /// Fails while the slot's own handler is running: a handler changes
    /// phase by returning an [`Action`], not by replacing itself.
    pub fn set_handler<H: Handler<P>>(&mut self, token: Token, handler: H) -> io::Result<()> {
        let slot = self.slots.get_mut(token).ok_or_else(stale)?;
        if slot.running {
            return Err(io::Error::other(
                "cannot replace the handler of a slot while it is running",
            ));
        }
        slot.handler = Some(Box::new(handler));
        Ok(())
    }

    /// Adds interest in `direction`, keeping the other direction's interest.
    pub fn add(&mut self, token: Token, direction: Direction, flags: Interest) -> io::Result<()> {
        let slot = self.slots.get_mut(token).ok_or_else(stale)?;
        registrar::add(&self.poller, slot, token, direction, flags)
    }

    /// Drops interest in `direction`, keeping the other direction's interest.
    pub fn del(&mut self, token: Token, direction: Direction) -> io::Result<()> {
        let slot = self.slots.get_mut(token).ok_or_else(stale)?;
        registrar::del(&self.poller, slot, token, direction)
    }

    /// Removes all interest, runs `on_cleanup`, closes the descriptor and
    /// frees the slot. Returns `false` if `token` is already stale.
    ///
    /// When called from inside a handler of the same slot, the handler is
    /// borrowed by the dispatcher; its `on_cleanup` runs once it returns.
    pub fn reclaim(&mut self, token: Token) -> bool {
        let Some(slot) = self.slots.get_mut(token) else {
            return false;
        };
        for direction in [Direction::Read, Direction::Write] {
            if let Err(e) = registrar::del(&self.poller, slot, token, direction) {
                log::warn!("fd {}: cannot remove {:?} interest: {}", token.fd(), direction, e);
            }
        }

        if let Some((fd, handler)) = self.slots.release(token) {
            if let Some(mut handler) = handler {
                handler.on_cleanup();
            }
            drop(fd);
        }
        true
    }

    pub fn state(&self, token: Token) -> Option<RegState> {
        self.slots.get(token).map(|slot| slot.state())
    }

    /// The mask installed when `direction` was added, if it is registered.
    pub fn interest(&self, token: Token, direction: Direction) -> Option<EpollFlags> {
        self.slots.get(token)?.interest(direction)
    }

    /// Downcasts the handler of `token`'s slot.
    pub fn handler<H: Handler<P>>(&self, token: Token) -> Option<&H> {
        self.slots.get(token)?.handler.as_deref()?.downcast_ref::<H>()
    }

    pub fn run_forever(&mut self) -> ! {
        let mut backoff = Backoff::default();
        loop {
            if let Some(delay) = self.turn(&mut backoff) {
                thread::sleep(delay);
            }
        }
    }

    /// One blocking wait of [`run_forever`](Reactor::run_forever); returns
    /// how long to sleep before the next one.
    fn turn(&mut self, backoff: &mut Backoff) -> Option<Duration> {
        match self.wait(EpollTimeout::NONE) {
            Ok(_) => {
                backoff.reset();
                None
            }
            // Ref: https://man.archlinux.org/man/epoll_wait.2.en#ERRORS
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                log::debug!("epoll_wait interrupted: {}", e);
                None
            }
            Err(e) => {
                log::error!("epoll_wait failed: {}", e);
                backoff.fail()
            }
        }
    }

    /// Waits for one batch of ready events and dispatches it.
    ///
    /// Returns the number of events taken from the kernel. A wait failure is
    /// returned as is, with no slot touched.
    ///
    /// # Panics
    ///
    /// If called from inside a handler.
    pub fn wait(&mut self, timeout: EpollTimeout) -> io::Result<usize> {
        if self.handling {
            panic!("Recursive call to Reactor::wait");
        }

        let mut batch = mem::take(&mut self.events);
        let n = match self.poller.wait(&mut batch, timeout) {
            Ok(n) => n.min(batch.len()),
            Err(e) => {
                self.events = batch;
                return Err(e);
            }
        };

        self.handling = true;
        for ev in &batch[..n] {
            self.dispatch(Token::from_data(ev.data()), Event::from(ev.events()));
        }
        self.handling = false;
        self.events = batch;

        Ok(n)
    }

    fn dispatch(&mut self, token: Token, event: Event) {
        let Some(slot) = self.slots.get(token) else {
            log::trace!("fd {}: skipping stale event {:?}", token.fd(), event);
            return;
        };
        let readable = slot.read.is_some();

        if event.is_error() || event.is_hangup() {
            self.fire(token, Action::Error);
            return;
        }

        if event.is_readable() && readable {
            self.fire(token, Action::Readable);
        }

        // The read side may have reclaimed the slot or dropped write interest.
        let writable = self.slots.get(token).is_some_and(|slot| slot.write.is_some());
        if event.is_writable() && writable {
            self.fire(token, Action::Writable);
        }
    }

    /// Runs `token`'s handler starting at `action`, applying every returned
    /// [`Action`] until it asks to wait or the slot is reclaimed.
    ///
    /// Does nothing if the token is stale, the slot has no handler, or its
    /// handler is already running further up the stack.
    pub fn fire(&mut self, token: Token, action: Action) {
        let Some(slot) = self.slots.get_mut(token) else {
            return;
        };
        if slot.running {
            return;
        }
        let Some(mut handler) = slot.handler.take() else {
            if action != Action::Wait {
                log::warn!("fd {}: no handler for {:?}", token.fd(), action);
            }
            return;
        };
        slot.running = true;

        let mut next = action;
        loop {
            next = match next {
                Action::Wait => break,
                Action::Readable => handler.on_readable(&mut Context::new(self, token)),
                Action::Writable => handler.on_writable(&mut Context::new(self, token)),
                Action::Error => handler.on_error(&mut Context::new(self, token)),
                Action::Reclaim => {
                    // Hand the handler back so `reclaim` cleans up in order.
                    if let Some(slot) = self.slots.get_mut(token) {
                        slot.handler = Some(handler);
                        slot.running = false;
                        self.reclaim(token);
                    }
                    return;
                }
            };
            if self.slots.get(token).is_none() {
                break;
            }
        }

        match self.slots.get_mut(token) {
            Some(slot) => {
                slot.handler = Some(handler);
                slot.running = false;
            }
            // Reclaimed from inside the handler while we were holding it.
            None => handler.on_cleanup(),
        }
    }
}

fn stale() -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, "slot reclaimed or never acquired")
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io::Read;
    use std::os::unix::net::UnixStream;
    use std::rc::Rc;

    use super::*;
    use crate::poller::MockPoller;

    type Log = Rc<RefCell<Vec<String>>>;
    type Hook = Box<dyn FnMut(&mut Context<'_, MockPoller>) -> Action>;

    /// Records every callback and answers with a scripted action.
    struct Recorder {
        name: &'static str,
        log: Log,
        read: Hook,
        write: Hook,
    }

    impl Recorder {
        fn new(name: &'static str, log: &Log) -> Self {
            Self {
                name,
                log: Rc::clone(log),
                read: Box::new(|_| Action::Wait),
                write: Box::new(|_| Action::Wait),
            }
        }

        fn on_read(
            mut self,
            f: impl FnMut(&mut Context<'_, MockPoller>) -> Action + 'static,
        ) -> Self {
            self.read = Box::new(f);
            self
        }

        fn on_write(
            mut self,
            f: impl FnMut(&mut Context<'_, MockPoller>) -> Action + 'static,
        ) -> Self {
            self.write = Box::new(f);
            self
        }

        fn record(&self, what: &str) {
            self.log.borrow_mut().push(format!("{}:{}", self.name, what));
        }
    }

    impl Handler<MockPoller> for Recorder {
        fn on_readable(&mut self, cx: &mut Context<'_, MockPoller>) -> Action {
            self.record("read");
            (self.read)(cx)
        }

        fn on_writable(&mut self, cx: &mut Context<'_, MockPoller>) -> Action {
            self.record("write");
            (self.write)(cx)
        }

        fn on_error(&mut self, _cx: &mut Context<'_, MockPoller>) -> Action {
            self.record("error");
            Action::Reclaim
        }

        fn on_cleanup(&mut self) {
            self.record("cleanup");
        }
    }

    fn lenient_poller() -> MockPoller {
        let mut poller = MockPoller::new();
        poller.expect_install().returning(|_, _, _| Ok(()));
        poller.expect_modify().returning(|_, _, _| Ok(()));
        poller.expect_remove().returning(|_| Ok(()));
        poller
    }

    fn reactor() -> Reactor<MockPoller> {
        Builder::new().capacity(4096).build_with(lenient_poller())
    }

    /// Acquires a socket, installs `recorder` and registers both directions.
    fn connect(reactor: &mut Reactor<MockPoller>, recorder: Recorder) -> (Token, UnixStream) {
        let (ours, peer) = UnixStream::pair().unwrap();
        let token = reactor.acquire(ours.into()).unwrap();
        reactor.set_handler(token, recorder).unwrap();
        reactor.add(token, Direction::Read, interest()).unwrap();
        reactor.add(token, Direction::Write, interest()).unwrap();
        (token, peer)
    }

    fn ready(reactor: &mut Reactor<MockPoller>, batch: Vec<(Token, EpollFlags)>) {
        reactor
            .poller_mut()
            .expect_wait()
            .times(1)
            .returning(move |events, _| {
                for (slot, (token, flags)) in events.iter_mut().zip(&batch) {
                    *slot = EpollEvent::new(*flags, token.data());
                }
                Ok(batch.len())
            });
    }

    fn entries(log: &Log) -> Vec<String> {
        log.borrow().clone()
    }

    #[test]
    fn error_takes_priority() {
        let log = Log::default();
        let mut reactor = reactor();
        let (a, _peer) = connect(&mut reactor, Recorder::new("a", &log));

        let all = EpollFlags::EPOLLERR | EpollFlags::EPOLLIN | EpollFlags::EPOLLOUT;
        ready(&mut reactor, vec![(a, all)]);
        assert_eq!(reactor.wait(EpollTimeout::NONE).unwrap(), 1);

        assert_eq!(entries(&log), ["a:error", "a:cleanup"]);
        assert_eq!(reactor.active(), 0);
    }

    #[test]
    fn hangup_goes_to_error_handler() {
        let log = Log::default();
        let mut reactor = reactor();
        let (a, _peer) = connect(&mut reactor, Recorder::new("a", &log));

        ready(&mut reactor, vec![(a, EpollFlags::EPOLLHUP)]);
        reactor.wait(EpollTimeout::NONE).unwrap();

        assert_eq!(entries(&log), ["a:error", "a:cleanup"]);
    }

    #[test]
    fn read_runs_before_write() {
        let log = Log::default();
        let mut reactor = reactor();
        let (a, _peer) = connect(&mut reactor, Recorder::new("a", &log));

        ready(&mut reactor, vec![(a, EpollFlags::EPOLLOUT | EpollFlags::EPOLLIN)]);
        reactor.wait(EpollTimeout::NONE).unwrap();

        assert_eq!(entries(&log), ["a:read", "a:write"]);
        assert_eq!(reactor.state(a), Some(RegState::Both));
    }

    #[test]
    fn unregistered_direction_is_not_dispatched() {
        let log = Log::default();
        let mut reactor = reactor();
        let (a, _peer) = connect(&mut reactor, Recorder::new("a", &log));
        reactor.del(a, Direction::Write).unwrap();

        ready(&mut reactor, vec![(a, EpollFlags::EPOLLOUT | EpollFlags::EPOLLIN)]);
        reactor.wait(EpollTimeout::NONE).unwrap();

        assert_eq!(entries(&log), ["a:read"]);
    }

    #[test]
    fn reclaim_in_read_suppresses_write() {
        let log = Log::default();
        let mut reactor = reactor();
        let recorder = Recorder::new("a", &log).on_read(|_| Action::Reclaim);
        let (a, mut peer) = connect(&mut reactor, recorder);

        ready(&mut reactor, vec![(a, EpollFlags::EPOLLIN | EpollFlags::EPOLLOUT)]);
        reactor.wait(EpollTimeout::NONE).unwrap();

        assert_eq!(entries(&log), ["a:read", "a:cleanup"]);
        assert_eq!(reactor.state(a), None);
        // The descriptor was closed.
        assert_eq!(peer.read(&mut [0u8; 1]).unwrap(), 0);
    }

    #[test]
    fn returned_action_switches_phase_without_new_event() {
        let log = Log::default();
        let mut reactor = reactor();
        let recorder = Recorder::new("a", &log)
            .on_read(|cx| {
                cx.del(Direction::Read).unwrap();
                Action::Writable
            })
            .on_write(|_| Action::Reclaim);
        let (a, _peer) = connect(&mut reactor, recorder);
        reactor.del(a, Direction::Write).unwrap();

        ready(&mut reactor, vec![(a, EpollFlags::EPOLLIN)]);
        reactor.wait(EpollTimeout::NONE).unwrap();

        assert_eq!(entries(&log), ["a:read", "a:write", "a:cleanup"]);
    }

    #[test]
    fn stale_event_in_same_batch_is_skipped() {
        let log = Log::default();
        let mut reactor = reactor();
        let (b, _peer_b) = connect(&mut reactor, Recorder::new("b", &log));
        let recorder = Recorder::new("a", &log).on_read(move |cx| {
            assert!(cx.reactor().reclaim(b));
            Action::Wait
        });
        let (a, _peer_a) = connect(&mut reactor, recorder);

        ready(
            &mut reactor,
            vec![
                (a, EpollFlags::EPOLLIN),
                (b, EpollFlags::EPOLLIN | EpollFlags::EPOLLOUT),
                (b, EpollFlags::EPOLLERR),
            ],
        );
        assert_eq!(reactor.wait(EpollTimeout::NONE).unwrap(), 3);

        assert_eq!(entries(&log), ["a:read", "b:cleanup"]);
        assert_eq!(reactor.active(), 1);
    }

    #[test]
    fn event_for_reacquired_descriptor_is_skipped() {
        let log = Log::default();
        let mut reactor = reactor();
        let (old, _peer) = connect(&mut reactor, Recorder::new("old", &log));
        reactor.reclaim(old);

        let (new, _peer) = connect(&mut reactor, Recorder::new("new", &log));
        ready(&mut reactor, vec![(old, EpollFlags::EPOLLIN), (new, EpollFlags::EPOLLIN)]);
        reactor.wait(EpollTimeout::NONE).unwrap();

        assert_eq!(entries(&log), ["old:cleanup", "new:read"]);
    }

    #[test]
    fn handler_reclaiming_itself_is_cleaned_up_after_return() {
        let log = Log::default();
        let mut reactor = reactor();
        let inner = Rc::clone(&log);
        let recorder = Recorder::new("a", &log).on_read(move |cx| {
            assert!(cx.reclaim());
            assert!(cx.fd().is_none());
            inner.borrow_mut().push("a:reclaimed".into());
            Action::Writable
        });
        let (a, _peer) = connect(&mut reactor, recorder);

        ready(&mut reactor, vec![(a, EpollFlags::EPOLLIN)]);
        reactor.wait(EpollTimeout::NONE).unwrap();

        assert_eq!(entries(&log), ["a:read", "a:reclaimed", "a:cleanup"]);
        assert_eq!(reactor.active(), 0);
    }

    #[test]
    fn reclaim_is_idempotent_and_frees_the_slot() {
        let log = Log::default();
        let mut reactor = reactor();
        let (a, _peer) = connect(&mut reactor, Recorder::new("a", &log));
        assert_eq!(reactor.active(), 1);

        assert!(reactor.reclaim(a));
        assert!(!reactor.reclaim(a));
        assert_eq!(entries(&log), ["a:cleanup"]);
        assert_eq!(reactor.active(), 0);
        assert!(reactor.handler::<Recorder>(a).is_none());
    }

    #[test]
    fn fresh_slot_has_no_interest_or_handler() {
        let mut reactor = reactor();
        let (ours, _peer) = UnixStream::pair().unwrap();
        let token = reactor.acquire(ours.into()).unwrap();

        assert_eq!(reactor.state(token), Some(RegState::None));
        assert!(reactor.handler::<Recorder>(token).is_none());

        // Readiness without a handler is dropped, not a panic.
        reactor.poller_mut().expect_wait().times(1).returning(move |events, _| {
            events[0] = EpollEvent::new(EpollFlags::EPOLLERR, token.data());
            Ok(1)
        });
        reactor.wait(EpollTimeout::ZERO).unwrap();
        assert_eq!(reactor.active(), 1);
    }

    #[test]
    fn capacity_boundary_has_no_side_effects() {
        let mut reactor = Builder::new().capacity(0).build_with(MockPoller::new());
        let (ours, _peer) = UnixStream::pair().unwrap();

        let err = reactor.acquire(ours.into()).unwrap_err();
        assert_eq!(err.kind(), AcquireErrorKind::OutOfRange);
        let err = reactor.acquire(err.into_fd()).unwrap_err();
        assert_eq!(err.kind(), AcquireErrorKind::OutOfRange);
        assert_eq!(reactor.active(), 0);
    }

    #[test]
    fn handler_downcast() {
        let log = Log::default();
        let mut reactor = reactor();
        let (a, _peer) = connect(&mut reactor, Recorder::new("a", &log));

        assert_eq!(reactor.handler::<Recorder>(a).map(|p| p.name), Some("a"));
        assert!(reactor.handler::<echo::EchoConnection>(a).is_none());
    }

    #[test]
    fn wait_failure_touches_nothing() {
        let log = Log::default();
        let mut reactor = reactor();
        let (a, _peer) = connect(&mut reactor, Recorder::new("a", &log));
        reactor
            .poller_mut()
            .expect_wait()
            .times(1)
            .returning(|_, _| Err(io::Error::from_raw_os_error(libc::EINTR)));
        reactor
            .poller_mut()
            .expect_wait()
            .times(1)
            .returning(|events, _| {
                assert_eq!(events.len(), DEFAULT_EVENT_CAPACITY);
                Ok(0)
            });

        let err = reactor.wait(EpollTimeout::NONE).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
        assert_eq!(reactor.state(a), Some(RegState::Both));
        assert!(entries(&log).is_empty());

        assert_eq!(reactor.wait(EpollTimeout::ZERO).unwrap(), 0);
        assert!(entries(&log).is_empty());
    }

    #[test]
    fn running_handler_cannot_replace_itself() {
        let log = Log::default();
        let mut reactor = reactor();
        let inner = Rc::clone(&log);
        let recorder = Recorder::new("first", &log).on_read(move |cx| {
            let token = cx.token();
            let outcome = match cx.reactor().set_handler(token, Recorder::new("second", &inner)) {
                Ok(()) => "swap:ok",
                Err(_) => "swap:refused",
            };
            inner.borrow_mut().push(outcome.into());
            Action::Wait
        });
        let (a, _peer) = connect(&mut reactor, recorder);

        ready(&mut reactor, vec![(a, EpollFlags::EPOLLIN)]);
        reactor.wait(EpollTimeout::NONE).unwrap();
        ready(&mut reactor, vec![(a, EpollFlags::EPOLLIN)]);
        reactor.wait(EpollTimeout::NONE).unwrap();
        assert_eq!(reactor.handler::<Recorder>(a).map(|p| p.name), Some("first"));

        // Outside of dispatch the slot's handler can be replaced again.
        reactor.set_handler(a, Recorder::new("third", &log)).unwrap();
        assert!(reactor.reclaim(a));
        assert_eq!(
            entries(&log),
            ["first:read", "swap:refused", "first:read", "swap:refused", "third:cleanup"]
        );
    }

    #[test]
    fn run_loop_backs_off_only_on_real_failures() {
        let mut reactor = reactor();
        let mut seq = mockall::Sequence::new();
        for errno in [libc::EINTR, libc::EBADF, libc::EBADF, libc::EINTR, 0, libc::EBADF] {
            reactor
                .poller_mut()
                .expect_wait()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_, _| match errno {
                    0 => Ok(0),
                    errno => Err(io::Error::from_raw_os_error(errno)),
                });
        }

        let mut backoff = Backoff::default();
        let delays: Vec<_> = (0..6).map(|_| reactor.turn(&mut backoff)).collect();
        assert_eq!(
            delays,
            [None, None, Some(Duration::from_millis(1)), None, None, None]
        );
    }

    #[test]
    #[should_panic(expected = "Recursive call")]
    fn recursive_wait_panics() {
        let log = Log::default();
        let mut reactor = reactor();
        let recorder = Recorder::new("a", &log).on_read(|cx| {
            let _ = cx.reactor().wait(EpollTimeout::ZERO);
            Action::Wait
        });
        let (a, _peer) = connect(&mut reactor, recorder);

        ready(&mut reactor, vec![(a, EpollFlags::EPOLLIN)]);
        let _ = reactor.wait(EpollTimeout::NONE);
    }
}
