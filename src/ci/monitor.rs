//! CI Monitor - polls a check provider until a terminal verdict.
//!
//! The watch runs in two phases:
//! 1. Grace: poll at the tighter grace interval. Only an early failure ends
//!    the watch; checks often have not registered yet, so an empty or
//!    all-green list is not trusted.
//! 2. Polling: poll at the steady interval and evaluate after every poll.
//!
//! Every wait selects on the cancellation token. A failed status query is
//! retried until `fetch_error_tolerance` consecutive failures, and a watch that
//! times out right after a failed query reports `FetchError`, not `Timeout`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::config::CiWatchConfig;
use super::types::{CheckResult, CheckSummary, CiProgress, CiStatus, CiWatchResult, WatchPhase};
use crate::error::{Result, StepError};

/// Stand-in deadline for timeouts too large to represent
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Source of check status for a target (a pull request number)
#[async_trait]
pub trait CheckProvider: Send + Sync {
    async fn fetch_checks(&self, target: u64) -> Result<Vec<CheckResult>>;
}

/// Anything that can watch CI to a verdict
#[async_trait]
pub trait CiWatcher: Send + Sync {
    async fn watch(&self, spec: &WatchSpec, cancel: &CancellationToken) -> Result<CiWatchResult>;
}

/// What to watch and how
#[derive(Debug, Clone)]
pub struct WatchSpec {
    pub target: u64,
    pub config: CiWatchConfig,
    /// Receives a progress event per poll; sends never block
    pub progress: Option<mpsc::UnboundedSender<CiProgress>>,
}

impl WatchSpec {
    pub fn new(target: u64, config: CiWatchConfig) -> Self {
        Self {
            target,
            config,
            progress: None,
        }
    }

    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<CiProgress>) -> Self {
        self.progress = Some(tx);
        self
    }
}

/// Reduce a filtered check list to a verdict.
///
/// Returns `Failure` if any check failed or was cancelled, `Success` if every
/// check completed and every required name is present, `Pending` otherwise.
/// An empty list is pending: nothing has registered yet.
pub fn evaluate_checks(checks: &[CheckResult], required: &[String]) -> CiStatus {
    let summary = CheckSummary::from_checks(checks);
    if summary.failed > 0 {
        return CiStatus::Failure;
    }
    if checks.is_empty() || summary.pending > 0 {
        return CiStatus::Pending;
    }
    let all_required_present = required
        .iter()
        .all(|name| checks.iter().any(|c| c.matches(name)));
    if all_required_present {
        CiStatus::Success
    } else {
        CiStatus::Pending
    }
}

/// Keep only checks on the allow-list; an empty allow-list keeps everything.
pub fn filter_checks(checks: Vec<CheckResult>, allow: &[String]) -> Vec<CheckResult> {
    if allow.is_empty() {
        return checks;
    }
    checks
        .into_iter()
        .filter(|c| allow.iter().any(|name| c.matches(name)))
        .collect()
}

/// Polling CI watcher over a `CheckProvider`
pub struct CiMonitor {
    provider: Arc<dyn CheckProvider>,
}

impl CiMonitor {
    pub fn new(provider: Arc<dyn CheckProvider>) -> Self {
        Self { provider }
    }

    async fn sleep_until(&self, deadline: Instant, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => Err(StepError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => Ok(()),
        }
    }

    async fn fetch(&self, target: u64, cancel: &CancellationToken) -> Result<Vec<CheckResult>> {
        tokio::select! {
            _ = cancel.cancelled() => Err(StepError::Cancelled),
            checks = self.provider.fetch_checks(target) => checks,
        }
    }

    fn report(&self, spec: &WatchSpec, phase: WatchPhase, start: Instant, checks: &[CheckResult], error: Option<&str>) {
        if let Some(tx) = &spec.progress {
            // A dropped receiver only means nobody is watching progress.
            let _ = tx.send(CiProgress {
                target: spec.target,
                phase,
                elapsed: start.elapsed(),
                checks: checks.to_vec(),
                error: error.map(str::to_string),
            });
        }
    }

    fn finish(status: CiStatus, checks: Vec<CheckResult>, start: Instant, error: Option<String>) -> CiWatchResult {
        CiWatchResult {
            status,
            checks,
            elapsed: start.elapsed(),
            error,
        }
    }
}

/// `at + delay`, saturating far in the future instead of overflowing
fn later(at: Instant, delay: Duration) -> Instant {
    at.checked_add(delay)
        .or_else(|| at.checked_add(FAR_FUTURE))
        .unwrap_or(at)
}

#[async_trait]
impl CiWatcher for CiMonitor {
    async fn watch(&self, spec: &WatchSpec, cancel: &CancellationToken) -> Result<CiWatchResult> {
        let config = &spec.config;
        let start = Instant::now();
        let deadline = later(start, config.timeout);
        let grace_end = later(start, config.grace_period.min(config.timeout));

        log::info!(
            "Watching CI for #{} (grace {:?}, interval {:?}, timeout {:?})",
            spec.target,
            config.grace_period,
            config.poll_interval,
            config.timeout
        );

        let mut last_checks: Vec<CheckResult> = Vec::new();

        // Grace phase
        loop {
            let wake = later(Instant::now(), config.grace_poll_interval).min(grace_end);
            if wake >= grace_end {
                self.sleep_until(grace_end, cancel).await?;
                break;
            }
            self.sleep_until(wake, cancel).await?;

            match self.fetch(spec.target, cancel).await {
                Ok(checks) => {
                    let checks = filter_checks(checks, &config.workflows);
                    self.report(spec, WatchPhase::Grace, start, &checks, None);
                    if CheckSummary::from_checks(&checks).failed > 0 {
                        log::info!("CI for #{} failed during grace period", spec.target);
                        return Ok(Self::finish(CiStatus::Failure, checks, start, None));
                    }
                    last_checks = checks;
                }
                Err(StepError::Cancelled) => return Err(StepError::Cancelled),
                Err(e) => {
                    log::debug!("Ignoring fetch error during grace period for #{}: {}", spec.target, e);
                    self.report(spec, WatchPhase::Grace, start, &last_checks, Some(&e.to_string()));
                }
            }
        }

        // Polling phase
        let mut consecutive_errors = 0u32;
        let mut last_error: Option<String> = None;
        loop {
            cancel_check(cancel)?;

            match self.fetch(spec.target, cancel).await {
                Ok(checks) => {
                    consecutive_errors = 0;
                    last_error = None;
                    let checks = filter_checks(checks, &config.workflows);
                    self.report(spec, WatchPhase::Polling, start, &checks, None);

                    let summary = CheckSummary::from_checks(&checks);
                    log::debug!(
                        "CI #{}: {} checks, {} pending, {} completed, {} failed",
                        spec.target,
                        summary.total(),
                        summary.pending,
                        summary.completed,
                        summary.failed
                    );

                    match evaluate_checks(&checks, &config.workflows) {
                        CiStatus::Pending => last_checks = checks,
                        verdict => {
                            log::info!("CI for #{} finished: {}", spec.target, verdict);
                            return Ok(Self::finish(verdict, checks, start, None));
                        }
                    }
                }
                Err(StepError::Cancelled) => return Err(StepError::Cancelled),
                Err(e) => {
                    consecutive_errors += 1;
                    log::warn!(
                        "CI status fetch for #{} failed ({}/{}): {}",
                        spec.target,
                        consecutive_errors,
                        config.fetch_error_tolerance,
                        e
                    );
                    let error = e.to_string();
                    self.report(spec, WatchPhase::Polling, start, &last_checks, Some(&error));
                    last_error = Some(error);
                    if consecutive_errors >= config.fetch_error_tolerance {
                        return Ok(Self::finish(CiStatus::FetchError, last_checks, start, last_error));
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                let status = if last_error.is_some() {
                    CiStatus::FetchError
                } else {
                    CiStatus::Timeout
                };
                log::info!("CI watch for #{} ended at timeout: {}", spec.target, status);
                return Ok(Self::finish(status, last_checks, start, last_error));
            }

            self.sleep_until(later(now, config.poll_interval).min(deadline), cancel).await?;
        }
    }
}

fn cancel_check(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(StepError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider replaying a script of responses; the last one repeats
    struct ScriptedProvider {
        responses: Mutex<VecDeque<std::result::Result<Vec<CheckResult>, String>>>,
        last: Mutex<Option<std::result::Result<Vec<CheckResult>, String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<std::result::Result<Vec<CheckResult>, String>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                last: Mutex::new(None),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CheckProvider for ScriptedProvider {
        async fn fetch_checks(&self, _target: u64) -> Result<Vec<CheckResult>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.responses.lock().unwrap().pop_front();
            let response = match next {
                Some(r) => {
                    *self.last.lock().unwrap() = Some(r.clone());
                    r
                }
                None => self.last.lock().unwrap().clone().expect("script is empty"),
            };
            response.map_err(StepError::CiFetch)
        }
    }

    fn fast_config() -> CiWatchConfig {
        CiWatchConfig {
            poll_interval: Duration::from_secs(10),
            grace_period: Duration::ZERO,
            grace_poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
            workflows: Vec::new(),
            fetch_error_tolerance: 3,
        }
    }

    fn checks(states: &[(&str, &str)]) -> Vec<CheckResult> {
        states.iter().map(|(n, s)| CheckResult::new(*n, *s)).collect()
    }

    #[test]
    fn test_evaluate_any_failure_wins() {
        let set = checks(&[("a", "SUCCESS"), ("b", "SUCCESS"), ("c", "FAILURE"), ("d", "IN_PROGRESS")]);
        assert_eq!(evaluate_checks(&set, &[]), CiStatus::Failure);

        let set = checks(&[("a", "SUCCESS"), ("b", "CANCELLED")]);
        assert_eq!(evaluate_checks(&set, &[]), CiStatus::Failure);
    }

    #[test]
    fn test_evaluate_all_complete_is_success() {
        let set = checks(&[("a", "SUCCESS"), ("b", "SKIPPED"), ("c", "NEUTRAL")]);
        assert_eq!(evaluate_checks(&set, &[]), CiStatus::Success);
    }

    #[test]
    fn test_evaluate_pending_and_empty() {
        let set = checks(&[("a", "SUCCESS"), ("b", "QUEUED")]);
        assert_eq!(evaluate_checks(&set, &[]), CiStatus::Pending);
        assert_eq!(evaluate_checks(&[], &[]), CiStatus::Pending);
        let set = checks(&[("a", "MYSTERY")]);
        assert_eq!(evaluate_checks(&set, &[]), CiStatus::Pending);
    }

    #[test]
    fn test_evaluate_waits_for_required_checks() {
        let set = checks(&[("build", "SUCCESS")]);
        let required = vec!["build".to_string(), "test".to_string()];
        assert_eq!(evaluate_checks(&set, &required), CiStatus::Pending);

        let set = checks(&[("build", "SUCCESS"), ("test", "SUCCESS")]);
        assert_eq!(evaluate_checks(&set, &required), CiStatus::Success);
    }

    #[test]
    fn test_filter_checks_allow_list() {
        let set = checks(&[("build", "SUCCESS"), ("flaky", "FAILURE")]);
        let filtered = filter_checks(set.clone(), &["build".to_string()]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "build");
        assert_eq!(filter_checks(set, &[]).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_success_after_pending() {
        let provider = ScriptedProvider::new(vec![
            Ok(checks(&[("build", "IN_PROGRESS")])),
            Ok(checks(&[("build", "IN_PROGRESS")])),
            Ok(checks(&[("build", "SUCCESS")])),
        ]);
        let monitor = CiMonitor::new(provider.clone());
        let result = monitor
            .watch(&WatchSpec::new(7, fast_config()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, CiStatus::Success);
        assert_eq!(provider.calls(), 3);
        assert_eq!(result.elapsed, Duration::from_secs(20));
        assert!(result.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_failure_ignores_passes() {
        let provider = ScriptedProvider::new(vec![Ok(checks(&[
            ("a", "SUCCESS"),
            ("b", "SUCCESS"),
            ("c", "SUCCESS"),
            ("d", "FAILURE"),
        ]))]);
        let monitor = CiMonitor::new(provider);
        let result = monitor
            .watch(&WatchSpec::new(7, fast_config()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.status, CiStatus::Failure);
        assert_eq!(result.failed_checks(), vec!["d"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_times_out_with_pending() {
        let provider = ScriptedProvider::new(vec![Ok(checks(&[("build", "IN_PROGRESS")]))]);
        let monitor = CiMonitor::new(provider.clone());
        let result = monitor
            .watch(&WatchSpec::new(7, fast_config()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, CiStatus::Timeout);
        assert_eq!(result.elapsed, Duration::from_secs(60));
        assert_eq!(result.pending_checks(), vec!["build"]);
        // polls at 0,10,...,60
        assert_eq!(provider.calls(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_state_is_bounded_by_timeout() {
        let provider = ScriptedProvider::new(vec![Ok(checks(&[("build", "NEVER_HEARD_OF_IT")]))]);
        let monitor = CiMonitor::new(provider);
        let result = monitor
            .watch(&WatchSpec::new(7, fast_config()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.status, CiStatus::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_fetch_error_is_tolerated() {
        let provider = ScriptedProvider::new(vec![
            Err("502 bad gateway".into()),
            Ok(checks(&[("build", "IN_PROGRESS")])),
            Err("connection reset".into()),
            Ok(checks(&[("build", "SUCCESS")])),
        ]);
        let monitor = CiMonitor::new(provider);
        let result = monitor
            .watch(&WatchSpec::new(7, fast_config()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.status, CiStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_fetch_error_is_fetch_error() {
        let provider = ScriptedProvider::new(vec![Err("gh: not authenticated".into())]);
        let monitor = CiMonitor::new(provider.clone());
        let result = monitor
            .watch(&WatchSpec::new(7, fast_config()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, CiStatus::FetchError);
        assert_eq!(provider.calls(), 3);
        assert!(result.error.unwrap().contains("not authenticated"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_on_final_poll_is_fetch_error() {
        // Pending until the last poll at the deadline, which fails
        let mut script: Vec<std::result::Result<Vec<CheckResult>, String>> =
            (0..6).map(|_| Ok(checks(&[("build", "IN_PROGRESS")]))).collect();
        script.push(Err("timeout talking to api".into()));
        let provider = ScriptedProvider::new(script);
        let monitor = CiMonitor::new(provider.clone());
        let result = monitor
            .watch(&WatchSpec::new(7, fast_config()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(provider.calls(), 7);
        assert_eq!(result.status, CiStatus::FetchError);
        assert_eq!(result.pending_checks(), vec!["build"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_tolerance_fails_on_first_error() {
        let provider = ScriptedProvider::new(vec![Err("boom".into())]);
        let mut config = fast_config();
        config.fetch_error_tolerance = 1;
        let result = CiMonitor::new(provider.clone())
            .watch(&WatchSpec::new(7, config), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.status, CiStatus::FetchError);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_period_does_not_trust_early_green() {
        // During grace the list is empty then green; success is only declared after grace
        let provider = ScriptedProvider::new(vec![
            Ok(vec![]),
            Ok(checks(&[("build", "SUCCESS")])),
            Ok(checks(&[("build", "SUCCESS")])),
            Ok(checks(&[("build", "SUCCESS")])),
            Ok(checks(&[("build", "SUCCESS")])),
        ]);
        let mut config = fast_config();
        config.grace_period = Duration::from_secs(5);
        config.grace_poll_interval = Duration::from_secs(1);
        let result = CiMonitor::new(provider.clone())
            .watch(&WatchSpec::new(7, config), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, CiStatus::Success);
        assert_eq!(result.elapsed, Duration::from_secs(5));
        // four grace polls (t=1..4) plus the first steady poll at t=5
        assert_eq!(provider.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_period_detects_early_failure() {
        let provider = ScriptedProvider::new(vec![Ok(checks(&[("lint", "FAILURE")]))]);
        let mut config = fast_config();
        config.grace_period = Duration::from_secs(30);
        config.grace_poll_interval = Duration::from_secs(5);
        let result = CiMonitor::new(provider.clone())
            .watch(&WatchSpec::new(7, config), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.status, CiStatus::Failure);
        assert_eq!(result.elapsed, Duration::from_secs(5));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_period_ignores_fetch_errors() {
        let provider = ScriptedProvider::new(vec![
            Err("not yet".into()),
            Err("not yet".into()),
            Ok(checks(&[("build", "SUCCESS")])),
        ]);
        let mut config = fast_config();
        config.grace_period = Duration::from_secs(3);
        config.grace_poll_interval = Duration::from_secs(1);
        let result = CiMonitor::new(provider)
            .watch(&WatchSpec::new(7, config), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.status, CiStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_events_per_poll() {
        let provider = ScriptedProvider::new(vec![
            Ok(checks(&[("build", "IN_PROGRESS")])),
            Ok(checks(&[("build", "SUCCESS")])),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let spec = WatchSpec::new(42, fast_config()).with_progress(tx);
        let result = CiMonitor::new(provider)
            .watch(&spec, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.status, CiStatus::Success);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.target, 42);
        assert_eq!(first.phase, WatchPhase::Polling);
        assert_eq!(first.elapsed, Duration::ZERO);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.elapsed, Duration::from_secs(10));
        assert_eq!(second.checks[0].state, "SUCCESS");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_poll_still_reports_progress() {
        let provider = ScriptedProvider::new(vec![
            Ok(checks(&[("build", "IN_PROGRESS")])),
            Err("502 bad gateway".into()),
            Ok(checks(&[("build", "SUCCESS")])),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let spec = WatchSpec::new(42, fast_config()).with_progress(tx);
        let result = CiMonitor::new(provider).watch(&spec, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.status, CiStatus::Success);

        let events: Vec<CiProgress> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(events.len(), 3);
        assert!(events[0].error.is_none());
        assert!(events[1].error.as_deref().unwrap().contains("502 bad gateway"));
        assert_eq!(events[1].checks[0].state, "IN_PROGRESS");
        assert_eq!(events[1].elapsed, Duration::from_secs(10));
        assert!(events[2].error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_timeout_does_not_overflow() {
        let provider = ScriptedProvider::new(vec![
            Ok(checks(&[("build", "IN_PROGRESS")])),
            Ok(checks(&[("build", "SUCCESS")])),
        ]);
        let mut config = fast_config();
        config.timeout = Duration::MAX;
        config.grace_period = Duration::MAX;
        config.grace_poll_interval = Duration::MAX;
        config.poll_interval = Duration::MAX;
        // the grace phase is effectively endless, so cancel out of it
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            canceller.cancel();
        });
        let err = CiMonitor::new(provider.clone())
            .watch(&WatchSpec::new(7, config), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(provider.calls(), 0);

        let mut config = fast_config();
        config.timeout = Duration::MAX;
        let result = CiMonitor::new(provider)
            .watch(&WatchSpec::new(7, config), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.status, CiStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_progress_receiver_does_not_stop_watch() {
        let provider = ScriptedProvider::new(vec![Ok(checks(&[("build", "SUCCESS")]))]);
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let spec = WatchSpec::new(1, fast_config()).with_progress(tx);
        let result = CiMonitor::new(provider).watch(&spec, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.status, CiStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_sleep() {
        let provider = ScriptedProvider::new(vec![Ok(checks(&[("build", "IN_PROGRESS")]))]);
        let monitor = CiMonitor::new(provider.clone());
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            canceller.cancel();
        });

        let err = monitor
            .watch(&WatchSpec::new(7, fast_config()), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        // polls at t=0 and t=10, cancelled while sleeping toward t=20
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_grace() {
        let provider = ScriptedProvider::new(vec![Ok(vec![])]);
        let mut config = fast_config();
        config.grace_period = Duration::from_secs(120);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = CiMonitor::new(provider.clone())
            .watch(&WatchSpec::new(7, config), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(provider.calls(), 0);
    }
}
