//! Pure scan state machine: module transitions and the aggregate fields
//! derived from the module map.

use aivis_core::{ModuleKind, ModuleMap, ModuleStatus, Scan, ScanStatus};
use chrono::{DateTime, Utc};

use crate::error::ScanError;

const MODULE_WEIGHT: u16 = 25;

/// A change reported for one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleUpdate {
    /// The module began work.
    Start,
    /// In-flight progress hint, 0–100.
    Progress(u8),
    /// The module reached `done` or `failed`.
    Finish {
        status: ModuleStatus,
        error: Option<String>,
    },
}

/// Aggregate status as a function of the module map alone.
#[must_use]
pub fn aggregate_status(modules: &ModuleMap) -> ScanStatus {
    let mut pending = 0;
    let mut in_flight = 0;
    let mut done = 0;
    let mut failed = 0;
    for (_, state) in modules.iter() {
        match state.status {
            ModuleStatus::Pending => pending += 1,
            ModuleStatus::Running => in_flight += 1,
            ModuleStatus::Done => done += 1,
            ModuleStatus::Failed => failed += 1,
        }
    }

    let total = ModuleKind::ALL.len();
    if pending == total {
        ScanStatus::Queued
    } else if pending + in_flight > 0 {
        ScanStatus::Running
    } else if done == total {
        ScanStatus::Done
    } else if failed == total {
        ScanStatus::Failed
    } else {
        ScanStatus::Partial
    }
}

/// Progress implied by the module map: 25 per finished module plus a running
/// module's share of its hint.
#[must_use]
pub fn derived_progress(modules: &ModuleMap) -> u8 {
    let sum: u16 = modules
        .iter()
        .map(|(_, state)| match state.status {
            ModuleStatus::Done | ModuleStatus::Failed => MODULE_WEIGHT,
            ModuleStatus::Running => MODULE_WEIGHT * u16::from(state.progress.min(100)) / 100,
            ModuleStatus::Pending => 0,
        })
        .sum();
    u8::try_from(sum.min(100)).unwrap_or(100)
}

/// First module in priority order that is still pending or running.
#[must_use]
pub fn current_module(modules: &ModuleMap) -> Option<ModuleKind> {
    modules
        .iter()
        .find(|(_, state)| !state.status.is_terminal())
        .map(|(kind, _)| kind)
}

/// Recompute `status`, `progress`, `current_module` and `completed_at` from
/// the module map. Progress never moves backwards and `completed_at` is set
/// only the first time the scan turns terminal.
pub fn refresh_aggregate(scan: &mut Scan, now: DateTime<Utc>) {
    scan.status = aggregate_status(&scan.modules);
    scan.progress = scan.progress.max(derived_progress(&scan.modules));
    scan.current_module = current_module(&scan.modules);
    if scan.status.is_terminal() && scan.completed_at.is_none() {
        scan.completed_at = Some(now);
    }
}

/// Apply one module update and refresh the aggregate fields.
///
/// Returns `Ok(false)` when the update was a no-op (a repeated start, or a
/// progress hint that would not raise the stored one).
///
/// # Errors
///
/// Returns [`ScanError::InvalidModuleTransition`] for any attempt to move a
/// module out of `done` or `failed`, or to finish with a non-terminal status.
pub fn apply_module_update(
    scan: &mut Scan,
    kind: ModuleKind,
    update: ModuleUpdate,
    now: DateTime<Utc>,
) -> Result<bool, ScanError> {
    let state = scan.modules.get_mut(kind);
    let from = state.status;

    let changed = match update {
        ModuleUpdate::Start => match from {
            ModuleStatus::Pending => {
                state.status = ModuleStatus::Running;
                true
            }
            ModuleStatus::Running => false,
            ModuleStatus::Done | ModuleStatus::Failed => {
                return Err(ScanError::InvalidModuleTransition {
                    module: kind,
                    from,
                    to: ModuleStatus::Running,
                });
            }
        },
        ModuleUpdate::Progress(hint) => {
            let hint = hint.min(100);
            if from == ModuleStatus::Running && hint > state.progress {
                state.progress = hint;
                true
            } else {
                false
            }
        }
        ModuleUpdate::Finish { status, error } => {
            if from.is_terminal() || !status.is_terminal() {
                return Err(ScanError::InvalidModuleTransition {
                    module: kind,
                    from,
                    to: status,
                });
            }
            state.status = status;
            state.progress = 100;
            state.error = if status == ModuleStatus::Failed {
                error
            } else {
                None
            };
            true
        }
    };

    if changed {
        refresh_aggregate(scan, now);
    }
    Ok(changed)
}
