//! Delay schedule for the reconnect loop.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};

use crate::options::ReconnectPolicy;

/// Floor for any reconnect delay, so a zero-configured policy cannot spin.
const MIN_DELAY: Duration = Duration::from_millis(10);

/// Endless sequence of reconnect delays for `policy`.
///
/// Grows exponentially from the initial delay and then stays at the maximum.
pub(crate) fn reconnect_delays(
    policy: &ReconnectPolicy,
) -> impl Iterator<Item = Duration> + Send + use<> {
    let min = policy.initial_delay().max(MIN_DELAY);
    let max = policy.max_delay().max(min);

    let mut builder = ExponentialBuilder::default()
        .with_min_delay(min)
        .with_max_delay(max)
        .with_factor(policy.factor.max(1.0))
        .with_max_times(usize::MAX);
    if policy.jitter {
        builder = builder.with_jitter();
    }

    builder
        .build()
        .map(move |delay| delay.max(MIN_DELAY))
        .chain(std::iter::repeat(max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn policy(initial_delay_ms: u64, max_delay_ms: u64) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay_ms,
            max_delay_ms,
            factor: 2.0,
            jitter: false,
        }
    }

    // Float factors make the exact nanoseconds wobble.
    fn approx_ms(delay: Duration) -> u128 {
        (delay.as_micros() + 500) / 1_000
    }

    #[test]
    fn grows_then_caps() {
        let delays: Vec<u128> = reconnect_delays(&policy(100, 500))
            .take(6)
            .map(approx_ms)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500, 500]);
    }

    #[test]
    fn zero_policy_still_waits() {
        let delays: Vec<Duration> = reconnect_delays(&policy(0, 0)).take(3).collect();
        assert!(delays.iter().all(|d| *d >= MIN_DELAY));
    }

    #[test]
    fn never_ends() {
        assert_eq!(reconnect_delays(&policy(10, 20)).take(1_000).count(), 1_000);
    }
}
