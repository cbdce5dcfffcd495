//! Drives one run from submission to a terminal state

use crate::config::PollConfiguration;
use defensics_api::{ErasedDefensicsApi, Run, RunId, RunState, TransportError};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Terminal snapshot plus how much polling it took
#[derive(Debug, Clone, PartialEq)]
pub struct PolledRun {
    pub run: Run,
    /// Status requests issued, failed ones included
    pub polls: u32,
    /// Waits performed between requests
    pub sleeps: u32,
}

/// Why polling stopped without a terminal run
#[derive(Debug, Error)]
pub enum PollError {
    #[error("polling of run {run_id} was cancelled after {polls} poll(s)")]
    Cancelled { run_id: RunId, polls: u32 },

    #[error("run {run_id} unreachable after {attempts} consecutive failed poll(s)")]
    Unreachable {
        run_id: RunId,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("status request for run {run_id} was rejected")]
    Rejected {
        run_id: RunId,
        #[source]
        source: TransportError,
    },
}

/// Polls a run through the API facade until it reaches a terminal state
pub struct RunPoller {
    api: Arc<dyn ErasedDefensicsApi>,
    config: PollConfiguration,
}

impl RunPoller {
    pub fn new(api: Arc<dyn ErasedDefensicsApi>, config: PollConfiguration) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> &PollConfiguration {
        &self.config
    }

    /// Poll `run_id` until the server reports a terminal state.
    ///
    /// Both the in-flight request and the wait between requests are raced
    /// against `cancel`. A terminal snapshot is only returned if `cancel` was
    /// still unset after it arrived.
    pub async fn poll_until_terminal(
        &self,
        run_id: &RunId,
        cancel: &CancellationToken,
    ) -> Result<PolledRun, PollError> {
        let interval = self.config.interval;
        let mut polls = 0u32;
        let mut sleeps = 0u32;
        let mut consecutive_failures = 0u32;
        let mut last_state: Option<RunState> = None;

        debug!(%run_id, ?interval, "Polling run");

        loop {
            if cancel.is_cancelled() {
                return Err(PollError::Cancelled {
                    run_id: run_id.clone(),
                    polls,
                });
            }

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(PollError::Cancelled { run_id: run_id.clone(), polls });
                }
                result = self.api.get_run(run_id) => result,
            };
            polls += 1;

            let delay = match fetched {
                Ok(run) => {
                    consecutive_failures = 0;
                    let regressed =
                        last_state.is_some_and(|previous| run.state.phase() < previous.phase());
                    if regressed {
                        warn!(
                            %run_id,
                            state = %run.state,
                            "Ignoring run snapshot that regressed from {:?}",
                            last_state
                        );
                    } else {
                        if last_state != Some(run.state) {
                            info!(%run_id, state = %run.state, "Run state changed");
                        }
                        last_state = Some(run.state);

                        if run.state.is_terminal() {
                            if cancel.is_cancelled() {
                                return Err(PollError::Cancelled {
                                    run_id: run_id.clone(),
                                    polls,
                                });
                            }
                            return Ok(PolledRun { run, polls, sleeps });
                        }
                    }
                    interval
                }
                Err(e) if e.is_transient() => {
                    consecutive_failures += 1;
                    if consecutive_failures >= self.config.max_consecutive_failures {
                        return Err(PollError::Unreachable {
                            run_id: run_id.clone(),
                            attempts: consecutive_failures,
                            source: e,
                        });
                    }
                    let delay = self.config.retry_delay(consecutive_failures);
                    warn!(
                        %run_id,
                        "Poll failed ({consecutive_failures}/{}), retrying in {delay:?}: {e}",
                        self.config.max_consecutive_failures
                    );
                    delay
                }
                Err(e) => {
                    return Err(PollError::Rejected {
                        run_id: run_id.clone(),
                        source: e,
                    });
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(PollError::Cancelled { run_id: run_id.clone(), polls });
                }
                _ = tokio::time::sleep(delay) => {}
            }
            sleeps += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StallingApi;
    use defensics_api::{DefensicsApi, FakeCall, FakeDefensicsServer, SuiteInstanceRequest};
    use std::time::Duration;

    fn poll_config() -> PollConfiguration {
        PollConfiguration::default()
            .with_interval(Duration::from_secs(1))
            .with_retry_backoff(Duration::from_millis(100))
    }

    async fn submitted(fake: &FakeDefensicsServer) -> RunId {
        DefensicsApi::create_run(fake, &SuiteInstanceRequest::new("http.testplan"))
            .await
            .unwrap()
            .id
    }

    fn poller(fake: &FakeDefensicsServer, config: PollConfiguration) -> RunPoller {
        RunPoller::new(Arc::new(fake.clone()), config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_on_first_poll_sleeps_zero_times() {
        for state in [
            RunState::Completed,
            RunState::Error,
            RunState::Failed,
            RunState::Canceled,
        ] {
            let fake = FakeDefensicsServer::new().with_states(vec![state]);
            let run_id = submitted(&fake).await;
            let started = tokio::time::Instant::now();

            let polled = poller(&fake, poll_config())
                .poll_until_terminal(&run_id, &CancellationToken::new())
                .await
                .unwrap();

            assert_eq!(polled.run.state, state);
            assert_eq!(polled.polls, 1);
            assert_eq!(polled.sleeps, 0);
            assert_eq!(started.elapsed(), Duration::ZERO);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_interval_between_polls() {
        let fake = FakeDefensicsServer::new();
        let run_id = submitted(&fake).await;
        let started = tokio::time::Instant::now();

        let polled = poller(&fake, poll_config())
            .poll_until_terminal(&run_id, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(polled.run.state, RunState::Completed);
        assert_eq!(polled.polls, 3);
        assert_eq!(polled.sleeps, 2);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_within_budget_are_retried() {
        let fake = FakeDefensicsServer::new()
            .with_states(vec![RunState::Completed])
            .with_transient_failures(4);
        let run_id = submitted(&fake).await;

        let polled = poller(&fake, poll_config().with_max_consecutive_failures(5))
            .poll_until_terminal(&run_id, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(polled.run.state, RunState::Completed);
        assert_eq!(polled.polls, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_is_unreachable() {
        let fake = FakeDefensicsServer::new().with_transient_failures(10);
        let run_id = submitted(&fake).await;

        let err = poller(&fake, poll_config().with_max_consecutive_failures(3))
            .poll_until_terminal(&run_id, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            PollError::Unreachable { attempts, source, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(source.status(), Some(503));
            }
            other => panic!("expected Unreachable, got {other:?}"),
        }
        assert_eq!(
            fake.count_calls(|call| matches!(call, FakeCall::GetRun(_))),
            3
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_counter() {
        // Two failures, one RUNNING, two failures, then COMPLETED: never three in a row.
        let fake = FakeDefensicsServer::new()
            .with_states(vec![RunState::Running, RunState::Completed])
            .with_transient_failures(2);
        let run_id = submitted(&fake).await;
        let cancel = CancellationToken::new();
        let poller = poller(&fake, poll_config().with_max_consecutive_failures(3));

        let fake_for_task = fake.clone();
        let injector = tokio::spawn(async move {
            loop {
                if fake_for_task.count_calls(|call| matches!(call, FakeCall::GetRun(_))) >= 3 {
                    fake_for_task.fail_next_get_runs(2);
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let polled = poller.poll_until_terminal(&run_id, &cancel).await.unwrap();
        injector.await.unwrap();

        assert_eq!(polled.run.state, RunState::Completed);
        assert_eq!(polled.polls, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_rejected_immediately() {
        let fake = FakeDefensicsServer::new().with_permanent_failure(401);
        let run_id = submitted(&fake).await;

        let err = poller(&fake, poll_config())
            .poll_until_terminal(&run_id, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PollError::Rejected { .. }));
        assert_eq!(
            fake.count_calls(|call| matches!(call, FakeCall::GetRun(_))),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_sleep() {
        let fake = FakeDefensicsServer::new().with_states(vec![RunState::Running]);
        let run_id = submitted(&fake).await;
        let cancel = CancellationToken::new();
        let poller = poller(&fake, poll_config().with_interval(Duration::from_secs(3600)));

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        });

        let started = tokio::time::Instant::now();
        let err = poller.poll_until_terminal(&run_id, &cancel).await.unwrap_err();

        assert!(matches!(err, PollError::Cancelled { polls: 1, .. }));
        assert!(started.elapsed() < Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_token_never_polls() {
        let fake = FakeDefensicsServer::new();
        let run_id = submitted(&fake).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = poller(&fake, poll_config())
            .poll_until_terminal(&run_id, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, PollError::Cancelled { polls: 0, .. }));
        assert_eq!(
            fake.count_calls(|call| matches!(call, FakeCall::GetRun(_))),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_regressed_snapshot_is_ignored() {
        let fake = FakeDefensicsServer::new().with_states(vec![
            RunState::Running,
            RunState::Starting,
            RunState::Completed,
        ]);
        let run_id = submitted(&fake).await;

        let polled = poller(&fake, poll_config())
            .poll_until_terminal(&run_id, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(polled.run.state, RunState::Completed);
        assert_eq!(polled.polls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_snapshot_after_cancel_is_not_returned() {
        let fake =
            FakeDefensicsServer::new().with_states(vec![RunState::Running, RunState::Completed]);
        let run_id = submitted(&fake).await;
        let cancel = CancellationToken::new();
        let api = StallingApi::new(&fake, cancel.clone()).interrupt_on_terminal();

        let err = RunPoller::new(Arc::new(api), poll_config())
            .poll_until_terminal(&run_id, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, PollError::Cancelled { polls: 2, .. }));
        assert_eq!(
            fake.count_calls(|call| matches!(call, FakeCall::GetRun(_))),
            2
        );
    }
}
