//! Request dispatch
//!
//! One match over the closed request-kind enum routes a run request to the
//! right orchestrator; adding a kind forces every dispatch site to handle it.

use crate::common::{Config, Result};
use crate::correlate::RunSummary;
use crate::debug::DebugOrchestrator;
use crate::run::RunOrchestrator;
use crate::tree::{RunLog, RunProfile, RunRequest, TestTree};

/// Execute one run request against the tree
///
/// Returns the aggregated summary for plain runs; debug runs report through
/// the tree and the run log instead.
pub async fn execute(
    tree: &mut TestTree,
    config: &Config,
    log: &mut RunLog,
    request: &RunRequest,
) -> Result<Option<RunSummary>> {
    match request.profile {
        RunProfile::Run => RunOrchestrator::new(tree, config, log)
            .execute(request)
            .await
            .map(Some),
        RunProfile::Debug => {
            DebugOrchestrator::new(tree, config, log)
                .execute(request)
                .await?;
            Ok(None)
        }
    }
}
