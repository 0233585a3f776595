//! Migration step engine
//!
//! Steps are pure edits on an in-memory policy: no I/O, and applying a step to
//! a policy it has already migrated leaves the policy as it is.

mod entry;
mod subject;

pub use entry::{add_entry, replace_entries};
pub use subject::{add_subject, replace_subject};

use tracing::{debug, info};

use crate::migration::types::{MigrationStep, PolicyDocument};

/// Apply one step in place and report whether the policy changed.
///
/// Unknown step kinds are logged and treated as no-ops.
pub fn apply_migration(policy: &mut PolicyDocument, step: &MigrationStep) -> bool {
    match step {
        MigrationStep::ReplaceSubject(params) => replace_subject(policy, params),
        MigrationStep::AddSubject(params) => add_subject(policy, params),
        MigrationStep::AddEntry(params) => add_entry(policy, params),
        MigrationStep::ReplaceEntries(params) => replace_entries(policy, params),
        MigrationStep::Unknown { kind } => {
            info!("Unknown migration {}. Ignoring.", kind);
            false
        }
    }
}

/// The configured, ordered list of steps
#[derive(Debug, Clone, Default)]
pub struct StepEngine {
    steps: Vec<MigrationStep>,
}

impl StepEngine {
    pub fn new(steps: Vec<MigrationStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    /// Run every step in order. All steps run even after one reports a change.
    pub fn apply_all(&self, policy: &mut PolicyDocument) -> bool {
        let mut changed = false;
        for step in &self.steps {
            let step_changed = apply_migration(policy, step);
            if step_changed {
                debug!("Step {} modified policy {}", step.kind(), policy.id);
            }
            changed |= step_changed;
        }
        changed
    }
}
