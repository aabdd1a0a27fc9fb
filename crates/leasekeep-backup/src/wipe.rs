//! Dependency-safe destruction of a store's data.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use leasekeep_core::{DataStore, ModelCount, ModelKind, ModelRegistry, StoreError};
use tracing::info;

use crate::error::{BackupError, BackupResult};
use crate::warning::{self, Warning};

/// How rows are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WipeMode {
    /// Set the deletion marker on every active row.
    Soft,
    /// Physically delete every row in one transaction.
    Hard,
}

impl WipeMode {
    /// Lower-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            WipeMode::Soft => "soft",
            WipeMode::Hard => "hard",
        }
    }
}

impl fmt::Display for WipeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WipeMode {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "soft" => Ok(WipeMode::Soft),
            "hard" => Ok(WipeMode::Hard),
            other => Err(BackupError::Config(format!(
                "unknown wipe mode '{other}', expected soft or hard"
            ))),
        }
    }
}

/// What a soft wipe does with models that have no deletion marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SoftWipeFallback {
    /// Delete the model's rows.
    #[default]
    HardDelete,
    /// Leave the model untouched.
    Skip,
}

impl SoftWipeFallback {
    /// Kebab-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            SoftWipeFallback::HardDelete => "hard-delete",
            SoftWipeFallback::Skip => "skip",
        }
    }
}

impl fmt::Display for SoftWipeFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SoftWipeFallback {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hard-delete" | "hard_delete" | "delete" => Ok(SoftWipeFallback::HardDelete),
            "skip" => Ok(SoftWipeFallback::Skip),
            other => Err(BackupError::Config(format!(
                "unknown soft-wipe fallback '{other}', expected hard-delete or skip"
            ))),
        }
    }
}

/// Wipe configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WipeOptions {
    /// Soft or hard.
    pub mode: WipeMode,
    /// The operator explicitly confirmed a hard wipe.
    pub confirmed: bool,
    /// Hard wipes are enabled for this environment.
    pub hard_wipe_enabled: bool,
    /// Handling of models without a deletion marker in soft mode.
    pub soft_fallback: SoftWipeFallback,
}

impl Default for WipeOptions {
    fn default() -> Self {
        Self::soft()
    }
}

impl WipeOptions {
    /// Soft wipe with the default fallback.
    pub fn soft() -> Self {
        Self {
            mode: WipeMode::Soft,
            confirmed: false,
            hard_wipe_enabled: false,
            soft_fallback: SoftWipeFallback::default(),
        }
    }

    /// Hard wipe; still needs enabling and confirmation.
    pub fn hard() -> Self {
        Self {
            mode: WipeMode::Hard,
            ..Self::soft()
        }
    }

    /// Set the operator confirmation.
    pub fn with_confirmation(mut self, confirmed: bool) -> Self {
        self.confirmed = confirmed;
        self
    }

    /// Set the hard-wipe enablement.
    pub fn with_hard_wipe_enabled(mut self, enabled: bool) -> Self {
        self.hard_wipe_enabled = enabled;
        self
    }

    /// Set the soft-wipe fallback.
    pub fn with_soft_fallback(mut self, fallback: SoftWipeFallback) -> Self {
        self.soft_fallback = fallback;
        self
    }

    /// Reject a hard wipe that is not both enabled and confirmed.
    ///
    /// Needs no store, so callers can check before opening one.
    pub fn check_permitted(&self) -> BackupResult<()> {
        if self.mode == WipeMode::Hard {
            if !self.hard_wipe_enabled {
                return Err(BackupError::HardWipeDisabled);
            }
            if !self.confirmed {
                return Err(BackupError::HardWipeNotConfirmed);
            }
        }
        Ok(())
    }
}

/// Outcome of a wipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WipeResult {
    /// Mode used.
    pub mode: WipeMode,
    /// Rows deleted or newly marked per model, reverse dependency order.
    pub counts: Vec<ModelCount>,
    /// Models handled by the soft-wipe fallback.
    pub fallbacks: Vec<(ModelKind, SoftWipeFallback)>,
    /// Non-fatal conditions met on the way.
    pub warnings: Vec<Warning>,
}

impl WipeResult {
    fn new(mode: WipeMode) -> Self {
        Self {
            mode,
            counts: Vec::new(),
            fallbacks: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Affected rows for a model, if it was processed.
    pub fn count(&self, kind: ModelKind) -> Option<u64> {
        self.counts.iter().find(|c| c.model == kind).map(|c| c.count)
    }

    /// Affected rows across all models.
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|c| c.count).sum()
    }
}

/// Clears a store in reverse dependency order.
pub struct Wiper<'a> {
    store: &'a dyn DataStore,
    registry: &'a ModelRegistry,
    options: WipeOptions,
}

impl<'a> Wiper<'a> {
    /// Create a wiper.
    pub fn new(
        store: &'a dyn DataStore,
        registry: &'a ModelRegistry,
        options: WipeOptions,
    ) -> Self {
        Self {
            store,
            registry,
            options,
        }
    }

    /// Run the wipe.
    pub async fn run(&self) -> BackupResult<WipeResult> {
        self.options.check_permitted()?;

        let _lock = self.store.try_lock()?;
        info!(mode = %self.options.mode, "starting wipe");

        let result = match self.options.mode {
            WipeMode::Soft => self.soft().await?,
            WipeMode::Hard => self.hard().await?,
        };

        info!(
            mode = %result.mode,
            models = result.counts.len(),
            rows = result.total(),
            "wipe complete"
        );
        Ok(result)
    }

    async fn soft(&self) -> BackupResult<WipeResult> {
        let mut result = WipeResult::new(WipeMode::Soft);
        let now = Utc::now();
        let mut committed = false;

        for descriptor in self.registry.reverse() {
            let kind = descriptor.kind;
            let Some(repository) = self.store.repository(kind) else {
                warning::raise(
                    &mut result.warnings,
                    Warning::UnknownModel {
                        model: kind.name().to_string(),
                    },
                );
                continue;
            };

            let fail = |scope: &str, source: StoreError, result: &WipeResult| {
                BackupError::BatchTransaction {
                    scope: format!("{scope} {kind}"),
                    partially_applied: committed,
                    applied: result.counts.clone(),
                    source,
                }
            };

            let count = if descriptor.deletion_marker.is_some() {
                repository
                    .mark_deleted(now)
                    .await
                    .map_err(|e| fail("soft-deleting", e, &result))?
            } else {
                let fallback = self.options.soft_fallback;
                warning::raise(
                    &mut result.warnings,
                    Warning::SoftDeleteFallback { model: kind, fallback },
                );
                result.fallbacks.push((kind, fallback));
                match fallback {
                    SoftWipeFallback::HardDelete => repository
                        .bulk_delete()
                        .await
                        .map_err(|e| fail("hard-deleting", e, &result))?,
                    SoftWipeFallback::Skip => continue,
                }
            };

            committed = true;
            info!(model = %kind, rows = count, "model wiped");
            result.counts.push(ModelCount::new(kind, count));
        }
        Ok(result)
    }

    async fn hard(&self) -> BackupResult<WipeResult> {
        let mut result = WipeResult::new(WipeMode::Hard);
        let mut order = Vec::with_capacity(self.registry.len());
        for kind in self.registry.reverse_kinds() {
            if self.store.repository(kind).is_some() {
                order.push(kind);
            } else {
                warning::raise(
                    &mut result.warnings,
                    Warning::UnknownModel {
                        model: kind.name().to_string(),
                    },
                );
            }
        }

        result.counts = self
            .store
            .delete_all(&order)
            .await
            .map_err(|source| BackupError::BatchTransaction {
                scope: "hard wipe".to_string(),
                partially_applied: false,
                applied: Vec::new(),
                source,
            })?;
        for count in &result.counts {
            info!(model = %count.model, rows = count.count, "model deleted");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("soft".parse::<WipeMode>().unwrap(), WipeMode::Soft);
        assert_eq!("Hard".parse::<WipeMode>().unwrap(), WipeMode::Hard);
        assert!("medium".parse::<WipeMode>().is_err());
    }

    #[test]
    fn test_fallback_parsing() {
        assert_eq!(
            "hard-delete".parse::<SoftWipeFallback>().unwrap(),
            SoftWipeFallback::HardDelete
        );
        assert_eq!("skip".parse::<SoftWipeFallback>().unwrap(), SoftWipeFallback::Skip);
        assert!("ignore".parse::<SoftWipeFallback>().is_err());
        assert_eq!(SoftWipeFallback::default(), SoftWipeFallback::HardDelete);
    }

    #[test]
    fn test_options_builders() {
        let options = WipeOptions::hard()
            .with_hard_wipe_enabled(true)
            .with_confirmation(true);
        assert_eq!(options.mode, WipeMode::Hard);
        assert!(options.confirmed && options.hard_wipe_enabled);

        let options = WipeOptions::default().with_soft_fallback(SoftWipeFallback::Skip);
        assert_eq!(options.mode, WipeMode::Soft);
        assert!(!options.confirmed);
        assert_eq!(options.soft_fallback, SoftWipeFallback::Skip);
    }

    #[test]
    fn test_check_permitted() {
        assert!(WipeOptions::soft().check_permitted().is_ok());
        assert!(matches!(
            WipeOptions::hard().with_confirmation(true).check_permitted(),
            Err(BackupError::HardWipeDisabled)
        ));
        assert!(matches!(
            WipeOptions::hard().with_hard_wipe_enabled(true).check_permitted(),
            Err(BackupError::HardWipeNotConfirmed)
        ));
        assert!(WipeOptions::hard()
            .with_hard_wipe_enabled(true)
            .with_confirmation(true)
            .check_permitted()
            .is_ok());
    }
}
