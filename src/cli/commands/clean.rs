//! CLI implementation of `--clean` and `--clean-partial`

use anyhow::{Context, Result};

use crate::cli::output::{self, status};
use crate::core::clean::{clean_targets, clean_workspace, CleanScope};
use crate::core::workspace::Workspace;

/// Execute the clean command
///
/// Lists what will be removed and asks first unless `assume_yes` is set.
pub fn execute(workspace: &Workspace, scope: CleanScope, assume_yes: bool) -> Result<()> {
    let targets = clean_targets(workspace, scope);

    if targets.is_empty() {
        println!("{} Nothing to clean", status::SUCCESS);
        return Ok(());
    }

    println!("The following paths will be removed:");
    for path in &targets {
        println!("  {}", path.display());
    }

    if !assume_yes && !output::confirm("Remove these paths?")? {
        println!("{} Clean cancelled", status::INFO);
        return Ok(());
    }

    let spinner = output::create_spinner("Removing...");
    let result = clean_workspace(&targets);
    spinner.finish_and_clear();
    let result = result.context("Failed to clean workspace")?;

    println!("{} Removed {} paths", status::SUCCESS, result.removed.len());
    Ok(())
}
