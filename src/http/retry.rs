use crate::config::retry::{BackoffConfig, Jitter, RetryPolicy};
use rand::{Rng, rng};
use reqwest::{Response, StatusCode};
use snafu::{IntoError, Location, ResultExt, Snafu};
use std::time::{Duration, Instant};

#[derive(Debug, Snafu)]
pub enum HttpError {
    #[snafu(display("transport error"))]
    Transport {
        source: reqwest::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("unexpected status {status}"))]
    Status {
        status: StatusCode,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("deadline exceeded after {elapsed:?} (budget {configured:?})"))]
    DeadlineExceeded {
        configured: Duration,
        elapsed: Duration,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("max attempts ({attempts}) reached; last status {last_status}"))]
    MaxAttempts {
        attempts: u32,
        last_status: StatusCode,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("retry-after {retry_after:?} exceeds remaining budget {remaining:?}"))]
    RetryAfterExceeded {
        retry_after: Duration,
        remaining: Duration,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Execute a GET request with retries, returning the final response.
///
/// Only transient failures are retried (408/429/5xx and transport errors);
/// any other status is surfaced to the caller as-is so a 404 on a
/// distribution point stays a single request.
pub async fn execute_with_retry<B>(
    build_request: B,
    policy: &RetryPolicy,
) -> Result<Response, HttpError>
where
    B: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt: u32 = 0;
    let mut sleep_ms: f64 = policy.backoff.base.as_millis() as f64;
    let start = Instant::now();

    let backoff = &policy.backoff;

    loop {
        attempt += 1;
        let elapsed = start.elapsed();
        if elapsed >= policy.max_elapsed {
            return DeadlineExceededSnafu {
                configured: policy.max_elapsed,
                elapsed,
            }
            .fail();
        }
        let remaining = policy.max_elapsed - elapsed;

        match build_request().send().await {
            Ok(resp) => {
                if resp.status().is_success() || !should_retry_status(resp.status()) {
                    return Ok(resp);
                }

                if attempt >= policy.max_attempts {
                    return MaxAttemptsSnafu {
                        attempts: attempt,
                        last_status: resp.status(),
                    }
                    .fail();
                }

                // Honor Retry-After if present
                let retry_after = parse_retry_after(&resp);
                sleep_ms = next_delay_ms(sleep_ms, backoff);
                let delay = retry_after.unwrap_or(Duration::from_millis(sleep_ms as u64));
                if delay > remaining {
                    return RetryAfterExceededSnafu {
                        retry_after: delay,
                        remaining,
                    }
                    .fail();
                }
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if !is_retryable_transport(&e) || attempt >= policy.max_attempts {
                    return Err(TransportSnafu.into_error(e));
                }
                sleep_ms = next_delay_ms(sleep_ms, backoff);
                let delay = Duration::from_millis(sleep_ms as u64);
                if delay > remaining {
                    return RetryAfterExceededSnafu {
                        retry_after: delay,
                        remaining,
                    }
                    .fail();
                }
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Execute with retries and return the response body as bytes.
/// Non-2xx statuses surface as `HttpError::Status`.
pub async fn execute_bytes_with_retry<B>(
    build: B,
    policy: &RetryPolicy,
) -> Result<Vec<u8>, HttpError>
where
    B: Fn() -> reqwest::RequestBuilder,
{
    let resp = execute_with_retry(build, policy).await?;
    if !resp.status().is_success() {
        return StatusSnafu {
            status: resp.status(),
        }
        .fail();
    }
    let bytes = resp.bytes().await.context(TransportSnafu)?;
    Ok(bytes.to_vec())
}

fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn next_delay_ms(prev_ms: f64, backoff: &BackoffConfig) -> f64 {
    match backoff.jitter {
        Jitter::None => ((prev_ms.max(backoff.base.as_millis() as f64)) * backoff.factor)
            .min(backoff.cap.as_millis() as f64),
        Jitter::Full => {
            let max = ((prev_ms.max(backoff.base.as_millis() as f64)) * backoff.factor)
                .min(backoff.cap.as_millis() as f64);
            let mut rng = rng();
            rng.random_range(0.0..=max)
        }
        Jitter::Decorrelated => {
            // decorrelated jitter: new = rand(base, prev*3) capped
            let upper = (prev_ms.max(backoff.base.as_millis() as f64) * 3.0)
                .min(backoff.cap.as_millis() as f64);
            let mut rng = rng();
            rng.random_range(backoff.base.as_millis() as f64..=upper)
        }
    }
}

fn parse_retry_after(resp: &Response) -> Option<Duration> {
    let h = resp.headers().get(reqwest::header::RETRY_AFTER)?;
    let s = h.to_str().ok()?;
    let secs = s.parse::<u64>().ok()?;
    Some(Duration::from_secs(secs))
}

fn is_retryable_transport(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() || e.is_decode()
}
