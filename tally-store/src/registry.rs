use std::collections::HashSet;

use crate::error::{Result, StoreError};

/// Event type that unrecognized events are routed to under
/// [`UnknownTypePolicy::Hold`].
pub const HOLDING_TYPE: &str = "_unrecognized";

const CORE_V1: &[&str] = &[
    "app_installed",
    "session_started",
    "session_ended",
    "game_started",
    "game_ended",
    "purchase_completed",
    "crash_reported",
];

const CORE_V2: &[&str] = &["tutorial_step", "ad_impression"];

/// What `append` does with a well-formed event whose type is unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownTypePolicy {
    /// Reject with [`StoreError::UnknownEventType`].
    #[default]
    Reject,
    /// Store under [`HOLDING_TYPE`], keeping the submitted type in the
    /// payload.
    Hold,
}

/// Versioned, append-only allow-list of event types.
///
/// New types arrive as a new version; existing versions are never edited, so
/// every historical event stays valid against the registry that accepted it.
#[derive(Debug, Clone, Default)]
pub struct EventTypes {
    versions: Vec<(u16, Vec<String>)>,
    all: HashSet<String>,
}

impl EventTypes {
    /// The registry every deployment starts from.
    pub fn builtin() -> Self {
        let mut types = Self::default();
        types.push(1, CORE_V1);
        types.push(2, CORE_V2);

        types
    }

    /// Adds a new version of types. `version` must be greater than the
    /// current one; earlier versions are immutable.
    pub fn extend<S: Into<String>>(
        &mut self,
        version: u16,
        types: impl IntoIterator<Item = S>,
    ) -> Result<()> {
        let current = self.current_version();

        if version <= current {
            return Err(StoreError::StaleTypeVersion { version, current });
        }

        let names = types.into_iter().map(Into::into).collect::<Vec<_>>();

        for name in names.iter() {
            self.all.insert(name.to_owned());
        }

        self.versions.push((version, names));

        Ok(())
    }

    pub fn allows(&self, event_type: &str) -> bool {
        self.all.contains(event_type)
    }

    pub fn current_version(&self) -> u16 {
        self.versions.last().map(|(v, _)| *v).unwrap_or(0)
    }

    fn push(&mut self, version: u16, names: &[&str]) {
        let names = names.iter().map(|n| (*n).to_owned()).collect::<Vec<_>>();

        for name in names.iter() {
            self.all.insert(name.to_owned());
        }

        self.versions.push((version, names));
    }
}
