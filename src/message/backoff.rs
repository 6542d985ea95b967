use std::time::Duration;

/// An infinite stream of delays which grow by a constant factor up to some
/// maximum, and stay at the maximum from then on. Combine with
/// `Iterator::take` to bound the number of attempts.
///
pub struct ExponentialBackoff {
    curr: Duration,
    max: Duration,
    factor: u32,
}

impl ExponentialBackoff {
    pub fn new(start: Duration, max: Duration, factor: u32) -> ExponentialBackoff {
        ExponentialBackoff {
            curr: start,
            max,
            factor,
        }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let this = self.curr;
        self.curr = (self.curr * self.factor).min(self.max);
        Some(this)
    }
}

/// Call `f` until it succeeds or the delays run out, sleeping for each delay
/// between attempts. `on_err` sees every failure with the delay about to be
/// taken. The last error is returned if no attempt succeeds.
///
pub fn retry<I, F, S, T, E>(delays: I, mut f: F, on_err: S) -> Result<T, E>
where
    I: IntoIterator<Item = Duration>,
    F: FnMut() -> Result<T, E>,
    S: Fn(&E, Duration),
{
    let mut delays = delays.into_iter().peekable();
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(e) => match delays.next() {
                Some(delay) if delays.peek().is_some() => {
                    on_err(&e, delay);
                    std::thread::sleep(delay)
                }
                _ => return Err(e),
            },
        }
    }
}
