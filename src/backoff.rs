use std::time::Duration;

const FIRST: Duration = Duration::from_millis(1);
const CAP: Duration = Duration::from_secs(1);

/// Delay between consecutive `epoll_wait` failures.
///
/// A failing wait would otherwise spin the loop; the delay doubles from 1 ms
/// up to 1 s and resets after the next successful wait.
#[derive(Debug, Default)]
pub(crate) struct Backoff {
    failures: u32,
}

impl Backoff {
    pub(crate) fn reset(&mut self) {
        self.failures = 0;
    }

    /// Records a failure and returns how long to sleep before retrying.
    ///
    /// The first failure retries immediately.
    pub(crate) fn fail(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        match self.failures {
            1 => None,
            n => Some(FIRST.saturating_mul(1 << (n - 2).min(10)).min(CAP)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_cap_and_resets() {
        let mut backoff = Backoff::default();
        assert_eq!(backoff.fail(), None);
        assert_eq!(backoff.fail(), Some(Duration::from_millis(1)));
        assert_eq!(backoff.fail(), Some(Duration::from_millis(2)));
        assert_eq!(backoff.fail(), Some(Duration::from_millis(4)));
        for _ in 0..20 {
            backoff.fail();
        }
        assert_eq!(backoff.fail(), Some(CAP));

        backoff.reset();
        assert_eq!(backoff.fail(), None);
    }
}
