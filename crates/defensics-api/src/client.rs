//! Facade trait for Defensics run operations

use crate::error::TransportError;
use crate::model::{
    ReportArtifact, Run, RunConfiguration, RunId, SuiteInstanceRequest, VerdictSummary,
};
use std::future::Future;
use std::pin::Pin;

/// Async trait for run operations against one API server.
///
/// Every method is a single round-trip. Uses RPITIT (Return Position Impl
/// Trait in Traits) with explicit Send bounds.
pub trait DefensicsApi: Send + Sync + std::fmt::Debug {
    /// Submit a new run bound to the given suite instance
    fn create_run(
        &self,
        request: &SuiteInstanceRequest,
    ) -> impl Future<Output = Result<Run, TransportError>> + Send;

    /// Fetch the current snapshot of a run
    fn get_run(&self, run_id: &RunId) -> impl Future<Output = Result<Run, TransportError>> + Send;

    /// Ask the server to stop a run
    fn cancel_run(
        &self,
        run_id: &RunId,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Download the report of a finished run
    fn get_report(
        &self,
        run_id: &RunId,
    ) -> impl Future<Output = Result<ReportArtifact, TransportError>> + Send;

    /// Fetch verdict and test case counts of a finished run
    fn get_result_statistics(
        &self,
        run_id: &RunId,
    ) -> impl Future<Output = Result<VerdictSummary, TransportError>> + Send;

    /// Fetch the configuration the server applied to a run
    fn get_run_configuration(
        &self,
        run_id: &RunId,
    ) -> impl Future<Output = Result<RunConfiguration, TransportError>> + Send;

    /// Download the zipped result package of a finished run
    fn get_result_package(
        &self,
        run_id: &RunId,
    ) -> impl Future<Output = Result<ReportArtifact, TransportError>> + Send;

    /// Server name for logging
    fn server_name(&self) -> &str;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Object-safe version of DefensicsApi for type erasure.
///
/// Implemented automatically for every `DefensicsApi`, so the build step can
/// hold an `Arc<dyn ErasedDefensicsApi>` regardless of the backing client.
pub trait ErasedDefensicsApi: Send + Sync + std::fmt::Debug {
    fn create_run<'a>(&'a self, request: &'a SuiteInstanceRequest) -> BoxFuture<'a, Run>;

    fn get_run<'a>(&'a self, run_id: &'a RunId) -> BoxFuture<'a, Run>;

    fn cancel_run<'a>(&'a self, run_id: &'a RunId) -> BoxFuture<'a, ()>;

    fn get_report<'a>(&'a self, run_id: &'a RunId) -> BoxFuture<'a, ReportArtifact>;

    fn get_result_statistics<'a>(&'a self, run_id: &'a RunId) -> BoxFuture<'a, VerdictSummary>;

    fn get_run_configuration<'a>(
        &'a self,
        run_id: &'a RunId,
    ) -> BoxFuture<'a, RunConfiguration>;

    fn get_result_package<'a>(&'a self, run_id: &'a RunId) -> BoxFuture<'a, ReportArtifact>;

    fn server_name(&self) -> &str;
}

impl<T: DefensicsApi> ErasedDefensicsApi for T {
    fn create_run<'a>(&'a self, request: &'a SuiteInstanceRequest) -> BoxFuture<'a, Run> {
        Box::pin(DefensicsApi::create_run(self, request))
    }

    fn get_run<'a>(&'a self, run_id: &'a RunId) -> BoxFuture<'a, Run> {
        Box::pin(DefensicsApi::get_run(self, run_id))
    }

    fn cancel_run<'a>(&'a self, run_id: &'a RunId) -> BoxFuture<'a, ()> {
        Box::pin(DefensicsApi::cancel_run(self, run_id))
    }

    fn get_report<'a>(&'a self, run_id: &'a RunId) -> BoxFuture<'a, ReportArtifact> {
        Box::pin(DefensicsApi::get_report(self, run_id))
    }

    fn get_result_statistics<'a>(&'a self, run_id: &'a RunId) -> BoxFuture<'a, VerdictSummary> {
        Box::pin(DefensicsApi::get_result_statistics(self, run_id))
    }

    fn get_run_configuration<'a>(
        &'a self,
        run_id: &'a RunId,
    ) -> BoxFuture<'a, RunConfiguration> {
        Box::pin(DefensicsApi::get_run_configuration(self, run_id))
    }

    fn get_result_package<'a>(&'a self, run_id: &'a RunId) -> BoxFuture<'a, ReportArtifact> {
        Box::pin(DefensicsApi::get_result_package(self, run_id))
    }

    fn server_name(&self) -> &str {
        DefensicsApi::server_name(self)
    }
}
