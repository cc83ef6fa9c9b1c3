//! Schema migration chain.
//!
//! A model's schema version is defined by its migration chain: a chain with
//! no steps is version 1, and each step raises the version by one. Backends
//! run every stored value through [`MigrationChain::migrate`] before
//! returning it, so the rest of the system only ever sees current-schema
//! objects.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{MigrationError, RelicResult};

/// A single migration step, taking a value at version `n` to version `n + 1`.
///
/// Steps operate on raw JSON so that old schema shapes need no Rust type.
pub type MigrationStep = Box<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// Ordered migration steps for one model.
pub struct MigrationChain {
    model: &'static str,
    steps: Vec<MigrationStep>,
}

impl MigrationChain {
    /// Create an empty chain for a model; its current version is 1.
    pub fn new(model: &'static str) -> Self {
        Self {
            model,
            steps: Vec::new(),
        }
    }

    /// Append a migration step, raising the current version by one.
    pub fn step<F>(mut self, step: F) -> Self
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.steps.push(Box::new(step));
        self
    }

    /// The model this chain migrates.
    pub fn model(&self) -> &'static str {
        self.model
    }

    /// The schema version objects are written at: one more than the number
    /// of steps.
    pub fn current_version(&self) -> u32 {
        self.steps.len() as u32 + 1
    }

    /// Bring a stored value up to the current schema version.
    ///
    /// A value already at the current version is returned unchanged. A
    /// stored version of zero has no defined predecessor chain and a stored
    /// version beyond the current one cannot be downgraded; both fail rather
    /// than guessing.
    pub fn migrate(&self, raw: Value, stored_version: u32) -> RelicResult<Value> {
        let current = self.current_version();

        if stored_version == current {
            return Ok(raw);
        }

        if stored_version == 0 {
            return Err(MigrationError::MissingStep {
                model: self.model.to_string(),
                from: 0,
                to: 1,
            }
            .into());
        }

        if stored_version > current {
            return Err(MigrationError::VersionAhead {
                model: self.model.to_string(),
                stored: stored_version,
                current,
            }
            .into());
        }

        let mut cur = raw;

        for (index, step) in self
            .steps
            .iter()
            .enumerate()
            .skip(stored_version as usize - 1)
        {
            let from = index as u32 + 1;
            let to = index as u32 + 2;

            cur = step(cur.clone()).map_err(|reason| {
                // Log the value that refused to migrate so broken stored
                // data can be located and repaired.
                tracing::error!(
                    model = self.model,
                    from,
                    to,
                    value = %cur,
                    "migration step failed"
                );
                MigrationError::StepFailed {
                    model: self.model.to_string(),
                    from,
                    to,
                    reason,
                }
            })?;
        }

        Ok(cur)
    }

    /// Migrate a stored value and decode it into the current Rust type.
    pub fn migrate_into<T: DeserializeOwned>(
        &self,
        raw: Value,
        stored_version: u32,
    ) -> RelicResult<T> {
        let migrated = self.migrate(raw, stored_version)?;
        serde_json::from_value(migrated).map_err(|e| {
            MigrationError::Decode {
                model: self.model.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

impl std::fmt::Debug for MigrationChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationChain")
            .field("model", &self.model)
            .field("steps", &self.steps.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelicError;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Deserialize)]
    struct UserV2 {
        username: String,
        address: String,
    }

    /// v1 users carried an email; v2 users carry a physical address instead.
    fn email_to_address_chain() -> MigrationChain {
        MigrationChain::new("user").step(|mut value| {
            let obj = value
                .as_object_mut()
                .ok_or_else(|| "expected an object".to_string())?;
            obj.remove("email");
            obj.insert("address".to_string(), json!("unknown"));
            Ok(value)
        })
    }

    #[test]
    fn test_empty_chain_is_version_one() {
        let chain = MigrationChain::new("user");
        assert_eq!(chain.current_version(), 1);

        let value = json!({"username": "hunter2"});
        let migrated = chain.migrate(value.clone(), 1).expect("migrate");
        assert_eq!(migrated, value);
    }

    #[test]
    fn test_single_step_migrates_old_record() {
        let chain = email_to_address_chain();
        assert_eq!(chain.current_version(), 2);

        let v1 = json!({"username": "hunter2", "email": "hunter2@example.com"});
        let user: UserV2 = chain.migrate_into(v1, 1).expect("migrate");
        assert_eq!(
            user,
            UserV2 {
                username: "hunter2".to_string(),
                address: "unknown".to_string(),
            }
        );
    }

    #[test]
    fn test_current_version_passes_through_untouched() {
        let chain = email_to_address_chain();
        let v2 = json!({"username": "hunter2", "address": "somewhere"});
        let migrated = chain.migrate(v2.clone(), 2).expect("migrate");
        assert_eq!(migrated, v2);
    }

    #[test]
    fn test_step_failure_propagates() {
        let chain = email_to_address_chain();
        let not_an_object = json!("just a string");

        let err = chain.migrate(not_an_object, 1).unwrap_err();
        match err {
            RelicError::Migration(MigrationError::StepFailed {
                model, from, to, ..
            }) => {
                assert_eq!(model, "user");
                assert_eq!(from, 1);
                assert_eq!(to, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_version_ahead_is_rejected() {
        let chain = email_to_address_chain();
        let err = chain.migrate(json!({}), 3).unwrap_err();
        assert!(matches!(
            err,
            RelicError::Migration(MigrationError::VersionAhead {
                stored: 3,
                current: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_version_zero_is_rejected() {
        let chain = email_to_address_chain();
        let err = chain.migrate(json!({}), 0).unwrap_err();
        assert!(matches!(
            err,
            RelicError::Migration(MigrationError::MissingStep { from: 0, to: 1, .. })
        ));
    }

    #[test]
    fn test_multi_step_chain_applies_in_order() {
        let chain = MigrationChain::new("counter")
            .step(|value| {
                let n = value["n"].as_i64().ok_or("missing n")?;
                Ok(json!({"n": n + 1}))
            })
            .step(|value| {
                let n = value["n"].as_i64().ok_or("missing n")?;
                Ok(json!({"n": n * 10}))
            });
        assert_eq!(chain.current_version(), 3);

        // From v1 both steps run: (0 + 1) * 10.
        let migrated = chain.migrate(json!({"n": 0}), 1).expect("migrate");
        assert_eq!(migrated, json!({"n": 10}));

        // From v2 only the second step runs.
        let migrated = chain.migrate(json!({"n": 0}), 2).expect("migrate");
        assert_eq!(migrated, json!({"n": 0}));
    }

    #[test]
    fn test_decode_failure_surfaces_as_migration_error() {
        let chain = MigrationChain::new("user");
        let err = chain
            .migrate_into::<UserV2>(json!({"username": "hunter2"}), 1)
            .unwrap_err();
        assert!(matches!(
            err,
            RelicError::Migration(MigrationError::Decode { .. })
        ));
    }
}
