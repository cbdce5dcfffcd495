//! Client facade for the Defensics API server.
//!
//! The orchestration side of the build step talks to the server only through
//! [`DefensicsApi`] (or its object-safe twin [`ErasedDefensicsApi`]). Each call
//! is one network round-trip with no retries; retry policy lives in the poller.

mod client;
mod error;
mod http;
mod model;

#[cfg(any(test, feature = "test-support"))]
mod fake;

pub use client::{DefensicsApi, ErasedDefensicsApi};
pub use error::TransportError;
pub use http::{ClientSettings, HttpDefensicsClient};
pub use model::{
    ReportArtifact, Run, RunConfiguration, RunId, RunState, SuiteInstanceRequest, Verdict,
    VerdictSummary,
};

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeCall, FakeDefensicsServer, create_test_run};
