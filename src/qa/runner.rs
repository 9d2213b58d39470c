//! Common stage runner trait

use std::path::Path;

use async_trait::async_trait;
use eyre::Result;

use super::stage::{StageKind, StageResult};

/// A QA stage over a working directory
///
/// `run` returns a `StageResult` for every ordinary outcome, including
/// failures and timeouts. `Err` is reserved for infrastructure faults
/// (blocked commands, spawn failures, provider outages) which must not
/// feed the repair path.
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Which stage this runner implements
    fn kind(&self) -> StageKind;

    /// Run the stage against `workdir`
    ///
    /// `selector` narrows the run where the stage supports it (test
    /// filters); other stages ignore it.
    async fn run(&self, workdir: &Path, selector: Option<&str>) -> Result<StageResult>;
}
