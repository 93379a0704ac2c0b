//! Per-host HTTP work/done queue (C6, §4.6).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::core::error::HttpStatusError;
use crate::core::timer::Timer;

pub const WORK_QUEUE_OVERLOAD: usize = 40;
pub const DONE_QUEUE_MAX: usize = 10;
pub const DONE_QUEUE_TRIM_TO: usize = 3;
pub const HTTP_RETRY_WAIT_SECS: u64 = 5;
pub const RECEIVE_WAIT_MS: u64 = 50;
pub const INVENTORY_BASELINE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Transmit,
    ReceiveWait,
    Receive,
    RetryWait,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Success,
    Failed,
}

pub struct WorkRequest {
    pub sequence: u64,
    pub method: HttpMethod,
    pub path: String,
    pub payload: serde_json::Value,
    pub max_retries: u32,
    pub retries_used: u32,
    pub timeout: Duration,
    pub noncritical: bool,
    pub is_inventory: bool,
    pub blocking: bool,
    pub state: RequestState,
    pub started: Option<Instant>,
    pub retry_timer: Option<Timer>,
    pub receive_timer: Option<Timer>,
    pub watermarks_fired: [bool; 3],
}

impl WorkRequest {
    pub fn new(sequence: u64, method: HttpMethod, path: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            sequence,
            method,
            path: path.into(),
            payload,
            max_retries: 3,
            retries_used: 0,
            timeout: Duration::from_secs(INVENTORY_BASELINE_TIMEOUT_SECS),
            noncritical: false,
            is_inventory: true,
            blocking: false,
            state: RequestState::Transmit,
            started: None,
            retry_timer: None,
            receive_timer: None,
            watermarks_fired: [false; 3],
        }
    }
}

#[derive(Debug, Clone)]
pub struct DoneEntry {
    pub sequence: u64,
    pub outcome: RequestOutcome,
}

pub struct WorkQueue {
    next_sequence: u64,
    pub work: VecDeque<WorkRequest>,
    pub done: VecDeque<DoneEntry>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        Self { next_sequence: 1, work: VecDeque::new(), done: VecDeque::new() }
    }

    /// Enqueue a request, assigning it the next sequence number. Purges the
    /// entire queue and returns an error if it is already overloaded (§4.6).
    pub fn enqueue(&mut self, mut request: WorkRequest) -> Result<u64, crate::core::error::CoreError> {
        if self.work.len() > WORK_QUEUE_OVERLOAD {
            tracing::error!(size = self.work.len(), "work queue overloaded, purging");
            self.work.clear();
            return Err(crate::core::error::CoreError::OverloadDropped);
        }
        request.sequence = self.next_sequence;
        self.next_sequence += 1;
        let sequence = request.sequence;
        self.work.push_back(request);
        Ok(sequence)
    }

    /// Push a completed critical request's result to the done queue, trimming
    /// the oldest entries down to `DONE_QUEUE_TRIM_TO` once it exceeds
    /// `DONE_QUEUE_MAX` (§4.6).
    pub fn push_done(&mut self, entry: DoneEntry) {
        self.done.push_back(entry);
        if self.done.len() > DONE_QUEUE_MAX {
            let excess = self.done.len() - DONE_QUEUE_TRIM_TO;
            for _ in 0..excess {
                self.done.pop_front();
            }
        }
    }

    /// Returns the first failing critical sequence number, or `None` if every
    /// remaining entry succeeded (§4.6 `done_queue_purge`).
    pub fn done_queue_purge(&mut self) -> Option<u64> {
        let failed = self.done.iter().find(|e| e.outcome == RequestOutcome::Failed).map(|e| e.sequence);
        self.done.clear();
        failed
    }
}

/// One tick of the per-request state machine. `transmit` performs the actual
/// HTTP call; `now_pending` reports whether a previously-issued call is still
/// in flight. Both are injected so the state machine is testable without a
/// network. Returns `true` if the request is done and should be removed from
/// the work queue (either delivered to `done_fifo` or silently dropped).
pub fn tick_request(
    request: &mut WorkRequest,
    now: Instant,
    transmit: impl FnOnce() -> Result<(), HttpStatusError>,
    poll: impl FnOnce() -> Option<Result<(), HttpStatusError>>,
) -> Option<DoneEntry> {
    match request.state {
        RequestState::Transmit => {
            request.started = Some(now);
            match transmit() {
                Ok(()) => {
                    request.receive_timer = Some(Timer::arm(now, Duration::from_millis(RECEIVE_WAIT_MS)));
                    request.state = RequestState::ReceiveWait;
                }
                Err(_) => request.state = RequestState::Failure,
            }
            None
        }
        RequestState::ReceiveWait => {
            if request.receive_timer.as_ref().is_some_and(|t| t.expired(now)) {
                request.state = RequestState::Receive;
            }
            None
        }
        RequestState::Receive => match poll() {
            None => {
                emit_watermarks(request, now);
                request.receive_timer = Some(Timer::arm(now, Duration::from_millis(RECEIVE_WAIT_MS)));
                request.state = RequestState::ReceiveWait;
                None
            }
            Some(Ok(())) => finish(request, RequestOutcome::Success),
            Some(Err(status)) if status.is_retryable_with_reauth() => {
                tracing::warn!(path = %request.path, "auth/connection failure, will refresh token and retry");
                request.state = RequestState::Failure;
                None
            }
            Some(Err(_status)) => {
                request.state = RequestState::Failure;
                None
            }
        },
        RequestState::Failure => {
            if request.retries_used < request.max_retries {
                request.retries_used += 1;
                request.watermarks_fired = [false; 3];
                if request.is_inventory && !request.noncritical {
                    request.timeout += Duration::from_secs(INVENTORY_BASELINE_TIMEOUT_SECS);
                }
                request.retry_timer = Some(Timer::arm(now, Duration::from_secs(HTTP_RETRY_WAIT_SECS)));
                request.state = RequestState::RetryWait;
                None
            } else if request.noncritical {
                None
            } else {
                finish(request, RequestOutcome::Failed)
            }
        }
        RequestState::RetryWait => {
            if request.retry_timer.as_ref().is_some_and(|t| t.expired(now)) {
                request.state = RequestState::Transmit;
            }
            None
        }
    }
}

fn finish(request: &mut WorkRequest, outcome: RequestOutcome) -> Option<DoneEntry> {
    if request.noncritical {
        return None;
    }
    Some(DoneEntry { sequence: request.sequence, outcome })
}

fn emit_watermarks(request: &mut WorkRequest, now: Instant) {
    let Some(started) = request.started else { return };
    let elapsed = now.saturating_duration_since(started);
    let fractions = [0.25, 0.5, 0.75];
    for (i, frac) in fractions.iter().enumerate() {
        let threshold = request.timeout.mul_f64(*frac);
        if !request.watermarks_fired[i] && elapsed >= threshold {
            request.watermarks_fired[i] = true;
            tracing::warn!(
                sequence = request.sequence,
                path = %request.path,
                watermark = format!("{}%", (*frac * 100.0) as u32),
                "request approaching timeout"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overload_purges_at_41_entries() {
        let mut q = WorkQueue::new();
        for _ in 0..41 {
            q.enqueue(WorkRequest::new(0, HttpMethod::Patch, "/v1/isensors/x", serde_json::json!({}))).unwrap();
        }
        let result = q.enqueue(WorkRequest::new(0, HttpMethod::Patch, "/v1/isensors/x", serde_json::json!({})));
        assert!(result.is_err());
        assert!(q.work.is_empty());
    }

    #[test]
    fn at_forty_entries_no_purge() {
        let mut q = WorkQueue::new();
        for _ in 0..40 {
            q.enqueue(WorkRequest::new(0, HttpMethod::Patch, "/v1/isensors/x", serde_json::json!({}))).unwrap();
        }
        assert_eq!(q.work.len(), 40);
    }

    #[test]
    fn done_queue_trims_when_over_max() {
        let mut q = WorkQueue::new();
        for i in 0..15u64 {
            q.push_done(DoneEntry { sequence: i, outcome: RequestOutcome::Success });
        }
        assert_eq!(q.done.len(), DONE_QUEUE_TRIM_TO);
    }

    #[test]
    fn done_queue_purge_reports_first_failure() {
        let mut q = WorkQueue::new();
        q.push_done(DoneEntry { sequence: 1, outcome: RequestOutcome::Success });
        q.push_done(DoneEntry { sequence: 2, outcome: RequestOutcome::Failed });
        let result = q.done_queue_purge();
        assert_eq!(result, Some(2));
        assert!(q.done.is_empty());
    }

    #[test]
    fn transmit_failure_retries_then_fails() {
        let mut req = WorkRequest::new(0, HttpMethod::Patch, "/v1/isensors/x", serde_json::json!({}));
        req.max_retries = 1;
        let mut now = Instant::now();

        // Transmit fails locally.
        let done = tick_request(&mut req, now, || Err(HttpStatusError::Other(500)), || None);
        assert!(done.is_none());
        assert_eq!(req.state, RequestState::Failure);

        // One retry available.
        let done = tick_request(&mut req, now, || Err(HttpStatusError::Other(500)), || None);
        assert!(done.is_none());
        assert_eq!(req.state, RequestState::RetryWait);

        now += Duration::from_secs(HTTP_RETRY_WAIT_SECS + 1);
        let done = tick_request(&mut req, now, || Err(HttpStatusError::Other(500)), || None);
        assert_eq!(req.state, RequestState::Failure);
        assert!(done.is_none());

        // Retries exhausted: critical request completes to done queue.
        let done = tick_request(&mut req, now, || Err(HttpStatusError::Other(500)), || None);
        assert!(matches!(done, Some(DoneEntry { outcome: RequestOutcome::Failed, .. })));
    }
}
