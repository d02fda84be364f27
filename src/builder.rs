use std::io;
use std::mem::MaybeUninit;

use crate::epoll::{Epoll, EpollCreateFlags};
use crate::poller::Poller;
use crate::Reactor;

/// Upper bound for the default slot table capacity.
pub const DEFAULT_MAX_CAPACITY: usize = 65536 << 1;
const MIN_CAPACITY: usize = 1024;
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Configures and creates a [`Reactor`].
///
/// ```no_run
/// # use std::io;
/// # fn main() -> io::Result<()> {
/// let reactor = slotpoll::Reactor::builder()
///     .capacity(4096)
///     .event_capacity(256)
///     .build()?;
/// # Ok(()) }
/// ```
#[derive(Clone, Debug)]
pub struct Builder {
    capacity: Option<usize>,
    event_capacity: usize,
    flags: EpollCreateFlags,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            capacity: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            flags: EpollCreateFlags::EPOLL_CLOEXEC,
        }
    }
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots; descriptors `>= capacity` cannot be acquired.
    ///
    /// Defaults to the `RLIMIT_NOFILE` soft limit, clamped to
    /// `1024..=131072` (`131072` if the limit is unknown or unlimited).
    ///
    /// With a soft limit above `131072` the process can be handed descriptors
    /// the default table has no slot for; [`Acceptor`](crate::Acceptor) then
    /// drops those connections. Set the capacity explicitly on such hosts.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Maximum number of ready events taken from one `epoll_wait`.
    pub fn event_capacity(mut self, event_capacity: usize) -> Self {
        self.event_capacity = event_capacity.max(1);
        self
    }

    /// Flags for `epoll_create1`.
    pub fn flags(mut self, flags: EpollCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Creates the `epoll` instance and allocates the slot table.
    pub fn build(self) -> io::Result<Reactor<Epoll>> {
        let epoll = Epoll::new(self.flags).map_err(io::Error::from)?;
        Ok(self.build_with(epoll))
    }

    /// Builds a reactor around an existing poller.
    pub fn build_with<P: Poller>(self, poller: P) -> Reactor<P> {
        let capacity = self.capacity.unwrap_or_else(default_capacity);
        Reactor::from_parts(poller, capacity, self.event_capacity)
    }
}

fn default_capacity() -> usize {
    let mut limit = MaybeUninit::<libc::rlimit>::uninit();
    let ret = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, limit.as_mut_ptr()) };
    if ret == -1 {
        log::debug!(
            "getrlimit failed: {}; using {} slots",
            io::Error::last_os_error(),
            DEFAULT_MAX_CAPACITY
        );
        return DEFAULT_MAX_CAPACITY;
    }
    let soft = unsafe { limit.assume_init() }.rlim_cur;
    let capacity = capacity_for(soft);
    if soft != libc::RLIM_INFINITY && soft > capacity as libc::rlim_t {
        log::warn!(
            "RLIMIT_NOFILE {} exceeds the default capacity {}; higher fds are rejected",
            soft,
            capacity
        );
    }
    capacity
}

fn capacity_for(soft: libc::rlim_t) -> usize {
    if soft == libc::RLIM_INFINITY {
        return DEFAULT_MAX_CAPACITY;
    }
    usize::try_from(soft)
        .unwrap_or(DEFAULT_MAX_CAPACITY)
        .clamp(MIN_CAPACITY, DEFAULT_MAX_CAPACITY)
}
