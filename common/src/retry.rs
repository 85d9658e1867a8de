//! Retry classification.
//!
//! `attempts` is incremented on every `claim_next` transition into
//! `RUNNING`, so the attempt that just finished is always
//! reflected in the count passed in here — there is no separate
//! "attempt about to happen" counter to reconcile against.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The distinct reasons a render attempt can fail.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidUrl,
    SsrfBlocked,
    Http4xx,
    CaptchaDetected,
    DomainWaitTimeout,
    JobTimeout,
    RenderFailed,
    WorkerCrashed,
}

impl ErrorCode {
    /// Non-retryable by nature: these are terminal regardless of
    /// remaining retry budget.
    fn is_terminal_by_kind(self) -> bool {
        matches!(
            self,
            ErrorCode::InvalidUrl
                | ErrorCode::SsrfBlocked
                | ErrorCode::Http4xx
                | ErrorCode::CaptchaDetected
                | ErrorCode::DomainWaitTimeout
        )
    }
}

impl FromStr for ErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INVALID_URL" => Ok(ErrorCode::InvalidUrl),
            "SSRF_BLOCKED" => Ok(ErrorCode::SsrfBlocked),
            "HTTP_4XX" => Ok(ErrorCode::Http4xx),
            "CAPTCHA_DETECTED" => Ok(ErrorCode::CaptchaDetected),
            "DOMAIN_WAIT_TIMEOUT" => Ok(ErrorCode::DomainWaitTimeout),
            "JOB_TIMEOUT" => Ok(ErrorCode::JobTimeout),
            "RENDER_FAILED" => Ok(ErrorCode::RenderFailed),
            "WORKER_CRASHED" => Ok(ErrorCode::WorkerCrashed),
            invalid => Err(format!("{invalid} is not a valid error_code")),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ErrorCode::InvalidUrl => "INVALID_URL",
            ErrorCode::SsrfBlocked => "SSRF_BLOCKED",
            ErrorCode::Http4xx => "HTTP_4XX",
            ErrorCode::CaptchaDetected => "CAPTCHA_DETECTED",
            ErrorCode::DomainWaitTimeout => "DOMAIN_WAIT_TIMEOUT",
            ErrorCode::JobTimeout => "JOB_TIMEOUT",
            ErrorCode::RenderFailed => "RENDER_FAILED",
            ErrorCode::WorkerCrashed => "WORKER_CRASHED",
        };
        write!(f, "{s}")
    }
}

/// What the worker should do with a job after a failed render.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Terminal: call `complete(job_id, failure(code, message))`.
    Complete,
    /// Call `requeue(job_id)`; the job goes back to `QUEUED` with
    /// `attempts` left untouched.
    Requeue,
}

/// Classify a render failure into `Complete` or `Requeue`.
///
/// `attempts` is the job's current attempt count (already incremented
/// by the claim that just ran); `max_retries` is the job's configured
/// ceiling.
pub fn classify(error_code: ErrorCode, attempts: i32, max_retries: i32) -> Outcome {
    if error_code.is_terminal_by_kind() {
        return Outcome::Complete;
    }

    if attempts < max_retries + 1 {
        Outcome::Requeue
    } else {
        Outcome::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_retryable_codes_are_always_terminal() {
        for code in [
            ErrorCode::InvalidUrl,
            ErrorCode::SsrfBlocked,
            ErrorCode::Http4xx,
            ErrorCode::CaptchaDetected,
            ErrorCode::DomainWaitTimeout,
        ] {
            assert_eq!(classify(code, 1, 5), Outcome::Complete);
        }
    }

    #[test]
    fn retryable_code_requeues_while_attempts_remain() {
        // max_retries = 2 permits up to 3 total runs (attempts 1, 2, 3).
        assert_eq!(classify(ErrorCode::RenderFailed, 1, 2), Outcome::Requeue);
        assert_eq!(classify(ErrorCode::RenderFailed, 2, 2), Outcome::Requeue);
    }

    #[test]
    fn retryable_code_becomes_terminal_once_budget_exhausted() {
        assert_eq!(classify(ErrorCode::RenderFailed, 3, 2), Outcome::Complete);
        assert_eq!(classify(ErrorCode::JobTimeout, 3, 2), Outcome::Complete);
    }

    #[test]
    fn error_code_round_trips_through_display_and_from_str() {
        for code in [
            ErrorCode::InvalidUrl,
            ErrorCode::SsrfBlocked,
            ErrorCode::Http4xx,
            ErrorCode::CaptchaDetected,
            ErrorCode::DomainWaitTimeout,
            ErrorCode::JobTimeout,
            ErrorCode::RenderFailed,
            ErrorCode::WorkerCrashed,
        ] {
            assert_eq!(ErrorCode::from_str(&code.to_string()).unwrap(), code);
        }
    }
}
