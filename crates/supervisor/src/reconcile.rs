//! Reconciliation planning
//!
//! Compares the registered interfacers with a configuration snapshot and
//! decides what to tear down, create and update. Pure: nothing is started
//! or stopped here.

use std::collections::BTreeSet;
use std::fmt;

use contracts::{HubConfig, Settings};

/// View of one registered interfacer
#[derive(Debug, Clone, Copy)]
pub struct LiveEntry<'a> {
    pub name: &'a str,
    pub kind: &'a str,
    pub init_settings: &'a Settings,
}

/// Why a registered interfacer is torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// Name no longer configured
    Removed,
    /// Entry lost its type designator
    Disabled,
    /// Type designator changed
    KindChanged,
    /// Init settings changed
    InitChanged,
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Removed => "removed",
            Self::Disabled => "disabled",
            Self::KindChanged => "kind_changed",
            Self::InitChanged => "init_changed",
        })
    }
}

/// Outcome of comparing live state with a snapshot
///
/// Names in every list are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Registered names to stop and discard
    pub teardown: Vec<(String, TeardownReason)>,
    /// Names whose entry lacks init or runtime settings; left as they are
    pub incomplete: Vec<String>,
    /// Names to construct and start (includes torn-down names still configured)
    pub create: Vec<String>,
    /// Registered names kept, runtime settings merged in place
    pub update: Vec<String>,
    /// Configured names without a type designator
    pub disabled: Vec<String>,
}

impl ReconcilePlan {
    /// Plan the transition from `live` to `config`
    pub fn compute<'a>(live: impl IntoIterator<Item = LiveEntry<'a>>, config: &HubConfig) -> Self {
        let mut plan = Self::default();
        let mut kept = BTreeSet::new();
        let mut live: Vec<LiveEntry<'a>> = live.into_iter().collect();
        live.sort_by(|a, b| a.name.cmp(b.name));

        for entry in &live {
            let Some(spec) = config.interfacers.get(entry.name) else {
                plan.teardown.push((entry.name.to_string(), TeardownReason::Removed));
                continue;
            };
            let Some(kind) = spec.kind.as_deref() else {
                plan.teardown.push((entry.name.to_string(), TeardownReason::Disabled));
                continue;
            };

            // Nothing to compare against, leave the running instance alone
            let (Some(init), Some(_)) = (&spec.init_settings, &spec.runtime_settings) else {
                plan.incomplete.push(entry.name.to_string());
                kept.insert(entry.name);
                continue;
            };

            if kind != entry.kind {
                plan.teardown.push((entry.name.to_string(), TeardownReason::KindChanged));
            } else if init != entry.init_settings {
                plan.teardown.push((entry.name.to_string(), TeardownReason::InitChanged));
            } else {
                plan.update.push(entry.name.to_string());
                kept.insert(entry.name);
            }
        }

        for (name, spec) in &config.interfacers {
            if spec.kind.is_none() {
                plan.disabled.push(name.clone());
                continue;
            }
            if kept.contains(name.as_str()) {
                continue;
            }
            if spec.is_complete() {
                plan.create.push(name.clone());
            } else {
                plan.incomplete.push(name.clone());
            }
        }
        plan.incomplete.sort();

        plan
    }

    /// Whether no interfacer is created or torn down
    pub fn is_noop(&self) -> bool {
        self.teardown.is_empty() && self.create.is_empty()
    }
}
