use std::future::Future;
use std::time::Duration;

pub const MIN_JITTER_DELAY_NANOS: i128 = 1_000_000_000;

/// Retries an operation using the provided backoff delays.
///
/// The operation receives the attempt number and the retries left.
///
/// # Errors
/// Returns the final error if all attempts fail.
pub async fn retry_with_backoff<F, Fut>(delays: &[u64], mut operation: F) -> anyhow::Result<()>
where
    F: FnMut(usize, usize) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        let remaining = delays.len().saturating_sub(attempt - 1);
        match operation(attempt, remaining).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                let Some(delay) = delays.get(attempt - 1) else {
                    return Err(err);
                };
                tokio::time::sleep(Duration::from_secs(*delay)).await;
            }
        }
    }
}

/// Retries an operation using custom sleep logic between attempts.
///
/// Runs at most `delays.len()` attempts (one when `delays` is empty).
///
/// # Errors
/// Returns the final error if all attempts fail.
pub async fn retry_with_backoff_and_sleep<RunFn, RunFut, SleepFn, SleepFut, OnError>(
    mut run_fn: RunFn,
    mut sleep_fn: SleepFn,
    mut on_error: OnError,
    delays: &[u64],
) -> anyhow::Result<()>
where
    RunFn: FnMut() -> RunFut,
    RunFut: Future<Output = anyhow::Result<()>>,
    SleepFn: FnMut(Duration) -> SleepFut,
    SleepFut: Future<Output = ()>,
    OnError: FnMut(usize, &anyhow::Error),
{
    if delays.is_empty() {
        return match run_fn().await {
            Ok(()) => Ok(()),
            Err(err) => {
                on_error(1, &err);
                Err(err)
            }
        };
    }

    let mut last_err = None;
    for (attempt, delay) in delays.iter().enumerate() {
        match run_fn().await {
            Ok(()) => return Ok(()),
            Err(err) => {
                on_error(attempt + 1, &err);
                last_err = Some(err);
                if attempt + 1 < delays.len() {
                    sleep_fn(Duration::from_secs(*delay)).await;
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Operation failed")))
}

/// Calculates a jittered delay based on the current time.
#[must_use]
pub fn jittered_delay(base: Duration, jitter: Duration) -> Duration {
    let now_ns = time::OffsetDateTime::now_utc()
        .unix_timestamp_nanos()
        .max(0);
    jittered_delay_with_seed(base, jitter, now_ns)
}

#[must_use]
pub fn jittered_delay_with_seed(base: Duration, jitter: Duration, now_ns: i128) -> Duration {
    let jitter_ns = i128::try_from(jitter.as_nanos()).unwrap_or(i128::MAX);
    if jitter_ns == 0 {
        return base;
    }

    let base_ns = i128::try_from(base.as_nanos()).unwrap_or(i128::MAX);
    let span = jitter_ns.saturating_mul(2).saturating_add(1);
    let offset = (now_ns % span) - jitter_ns;
    let adjusted = base_ns.saturating_add(offset).max(MIN_JITTER_DELAY_NANOS);
    let adjusted = adjusted.min(i128::from(u64::MAX));
    let adjusted = u64::try_from(adjusted).unwrap_or(u64::MAX);

    Duration::from_nanos(adjusted)
}

/// Converts a configured duration into a signed calendar duration.
///
/// # Errors
/// Returns an error if the value does not fit.
pub fn to_time_duration(value: Duration, label: &str) -> anyhow::Result<time::Duration> {
    time::Duration::try_from(value).map_err(|_| anyhow::anyhow!("{label} duration is too large"))
}

/// Converts a non-negative calendar duration into a sleepable one, clamping
/// negative values to zero.
#[must_use]
pub fn to_std_duration(value: time::Duration) -> Duration {
    Duration::try_from(value).unwrap_or(Duration::ZERO)
}

/// Renders a duration the way it is written in configuration (`90days 4h`).
///
/// Days are the largest unit. The output parses back with `humantime`.
#[must_use]
pub fn format_duration(value: time::Duration) -> String {
    const UNITS: [(&str, u128); 7] = [
        ("days", 86_400_000_000_000),
        ("h", 3_600_000_000_000),
        ("m", 60_000_000_000),
        ("s", 1_000_000_000),
        ("ms", 1_000_000),
        ("us", 1_000),
        ("ns", 1),
    ];

    if value.is_zero() {
        return "0s".to_string();
    }
    let mut remaining = value.whole_nanoseconds().unsigned_abs();
    let mut parts = Vec::new();
    for (suffix, size) in UNITS {
        let count = remaining / size;
        if count == 1 && suffix == "days" {
            parts.push("1day".to_string());
            remaining %= size;
        } else if count > 0 {
            parts.push(format!("{count}{suffix}"));
            remaining %= size;
        }
    }
    let sign = if value.is_negative() { "-" } else { "" };
    format!("{sign}{}", parts.join(" "))
}
