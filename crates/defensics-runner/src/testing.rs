//! Fake API wrapper that stalls calls or interrupts the build mid-call

use defensics_api::{
    DefensicsApi, FakeDefensicsServer, ReportArtifact, Run, RunConfiguration, RunId,
    SuiteInstanceRequest, TransportError, VerdictSummary,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub(crate) struct StallingApi {
    fake: FakeDefensicsServer,
    interrupt: CancellationToken,
    create_delay: Duration,
    configuration_delay: Duration,
    statistics_delay: Duration,
    interrupt_on_terminal: bool,
    interrupt_on_statistics: bool,
}

impl StallingApi {
    /// `interrupt` is the token the build is driven by
    pub(crate) fn new(fake: &FakeDefensicsServer, interrupt: CancellationToken) -> Self {
        Self {
            fake: fake.clone(),
            interrupt,
            create_delay: Duration::ZERO,
            configuration_delay: Duration::ZERO,
            statistics_delay: Duration::ZERO,
            interrupt_on_terminal: false,
            interrupt_on_statistics: false,
        }
    }

    /// The server registers the run, then the response takes `delay`
    pub(crate) fn slow_create(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    pub(crate) fn slow_configuration(mut self, delay: Duration) -> Self {
        self.configuration_delay = delay;
        self
    }

    pub(crate) fn slow_statistics(mut self, delay: Duration) -> Self {
        self.statistics_delay = delay;
        self
    }

    /// Interrupt while a terminal snapshot is in flight
    pub(crate) fn interrupt_on_terminal(mut self) -> Self {
        self.interrupt_on_terminal = true;
        self
    }

    /// Interrupt while the statistics response is in flight
    pub(crate) fn interrupt_on_statistics(mut self) -> Self {
        self.interrupt_on_statistics = true;
        self
    }
}

impl DefensicsApi for StallingApi {
    async fn create_run(&self, request: &SuiteInstanceRequest) -> Result<Run, TransportError> {
        let created = self.fake.create_run(request).await;
        tokio::time::sleep(self.create_delay).await;
        created
    }

    async fn get_run(&self, run_id: &RunId) -> Result<Run, TransportError> {
        let run = self.fake.get_run(run_id).await?;
        if self.interrupt_on_terminal && run.state.is_terminal() {
            self.interrupt.cancel();
        }
        Ok(run)
    }

    async fn cancel_run(&self, run_id: &RunId) -> Result<(), TransportError> {
        self.fake.cancel_run(run_id).await
    }

    async fn get_report(&self, run_id: &RunId) -> Result<ReportArtifact, TransportError> {
        self.fake.get_report(run_id).await
    }

    async fn get_result_statistics(
        &self,
        run_id: &RunId,
    ) -> Result<VerdictSummary, TransportError> {
        tokio::time::sleep(self.statistics_delay).await;
        let summary = self.fake.get_result_statistics(run_id).await;
        if self.interrupt_on_statistics {
            self.interrupt.cancel();
        }
        summary
    }

    async fn get_run_configuration(
        &self,
        run_id: &RunId,
    ) -> Result<RunConfiguration, TransportError> {
        tokio::time::sleep(self.configuration_delay).await;
        self.fake.get_run_configuration(run_id).await
    }

    async fn get_result_package(&self, run_id: &RunId) -> Result<ReportArtifact, TransportError> {
        self.fake.get_result_package(run_id).await
    }

    fn server_name(&self) -> &str {
        self.fake.server_name()
    }
}
