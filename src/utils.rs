// ABOUTME: Shared helpers for retries, display sanitizing and timing output
// ABOUTME: Used by the sessions for connecting and by the commands for summaries

use anyhow::Result;
use std::time::Duration;

/// Retry a fallible async operation with exponential backoff
///
/// # Arguments
///
/// * `operation` - Async function to retry
/// * `max_retries` - Maximum number of retry attempts (0 = no retries, just initial attempt)
/// * `initial_delay` - Delay before first retry (doubles each subsequent retry)
///
/// # Returns
///
/// Returns the successful result or the last error after all retries exhausted.
///
/// # Examples
///
/// ```no_run
/// # use anyhow::Result;
/// # use std::time::Duration;
/// # use tabledump::utils::retry_with_backoff;
/// # async fn example() -> Result<()> {
/// let result = retry_with_backoff(
///     || async { Ok("success") },
///     3,
///     Duration::from_secs(1)
/// ).await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T>(
    mut operation: F,
    max_retries: u32,
    initial_delay: Duration,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = initial_delay;
    let mut last_error = None;

    for attempt in 0..=max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt < max_retries {
                    tracing::warn!(
                        "Operation failed (attempt {}/{}): {}; retrying in {:?}...",
                        attempt + 1,
                        max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Operation failed after retries")))
}

/// Strip control characters and limit length of user input echoed in messages
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Human-readable elapsed time: `850 msec`, `3.250 sec`, `2 min 5.000 sec`
pub fn format_elapsed(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{} msec", millis)
    } else if millis < 60_000 {
        format!("{:.3} sec", duration.as_secs_f64())
    } else {
        let minutes = duration.as_secs() / 60;
        let rest = duration.as_secs_f64() - (minutes * 60) as f64;
        format!("{} min {:.3} sec", minutes, rest)
    }
}

/// Average time spent per row, or `-` when no rows were processed
pub fn format_per_row(duration: Duration, rows: u64) -> String {
    if rows == 0 {
        return "-".to_string();
    }
    let micros = duration.as_micros() as f64 / rows as f64;
    if micros < 1000.0 {
        format!("{:.1} usec", micros)
    } else {
        format!("{:.3} msec", micros / 1000.0)
    }
}

/// Throughput in rows per second, rounded
pub fn rows_per_second(duration: Duration, rows: u64) -> u64 {
    let secs = duration.as_secs_f64();
    if secs <= 0.0 {
        return rows;
    }
    (rows as f64 / secs).round() as u64
}
