mod ruleset;

#[cfg(test)]
mod tests;

pub use ruleset::{RulesetShell, run_ruleset_worker};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use hub_core::driver::{InputShell, OutputShell, RecordSource};

// ---------------------------------------------------------------------------
// Input / output shell tasks
// ---------------------------------------------------------------------------

/// Run an input's external read loop until cancelled. The source pushes
/// through [`InputShell::inject`], which applies downstream backpressure.
pub async fn run_input_source(
    source: Arc<dyn RecordSource>,
    shell: Arc<InputShell>,
    cancel: CancellationToken,
) {
    hub_debug!(conn, input = %shell.id, pns = %shell.pns, "input source started");
    if let Err(e) = source.run(Arc::clone(&shell), cancel).await {
        hub_warn!(conn, input = %shell.id, pns = %shell.pns, error = %e, "input source failed");
    }
    hub_debug!(conn, input = %shell.id, pns = %shell.pns, "input source stopped");
}

/// Drain an output's merged intake into its sink until cancelled.
pub async fn run_output_consumer(shell: Arc<OutputShell>, cancel: CancellationToken) {
    hub_debug!(pipe, output = %shell.id, pns = %shell.pns, "output consumer started");
    while let Some(record) = shell.intake.recv(&cancel).await {
        shell.deliver(record).await;
    }
    hub_debug!(pipe, output = %shell.id, pns = %shell.pns, "output consumer stopped");
}
