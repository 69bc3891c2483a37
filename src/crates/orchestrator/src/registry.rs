//! Account bindings and their lookup
//!
//! A binding maps the internal alias used by operators to the external
//! platform account, the credential reference its worker is started with,
//! and the per-category minimums its calendar must meet.

use checkpoint::ItemCategory;
use integration::AccountTarget;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown account '{0}'")]
    UnknownAccount(String),

    #[error("Invalid binding for account '{alias}': {reason}")]
    InvalidBinding { alias: String, reason: String },
}

/// Configuration for one account. Read-only at workflow time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBinding {
    pub alias: String,
    pub platform_account_id: String,

    /// Resolved to a secret when the account's worker is spawned
    pub credential_ref: String,

    /// Minimum item count per category
    #[serde(default)]
    pub minimum_requirements: BTreeMap<ItemCategory, u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Extra names the account can be looked up by
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

impl AccountBinding {
    pub fn new(
        alias: impl Into<String>,
        platform_account_id: impl Into<String>,
        credential_ref: impl Into<String>,
    ) -> Self {
        Self {
            alias: alias.into(),
            platform_account_id: platform_account_id.into(),
            credential_ref: credential_ref.into(),
            minimum_requirements: BTreeMap::new(),
            display_name: None,
            aliases: Vec::new(),
        }
    }

    pub fn with_minimum(mut self, category: ItemCategory, count: u32) -> Self {
        self.minimum_requirements.insert(category, count);
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Coordinates the integration layer needs to reach this account.
    pub fn target(&self) -> AccountTarget {
        AccountTarget::new(&self.alias, &self.platform_account_id, &self.credential_ref)
    }

    /// Display name, falling back to the alias
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.alias)
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidBinding {
            alias: self.alias.clone(),
            reason: reason.to_string(),
        };
        if self.alias.trim().is_empty() {
            return Err(invalid("alias must not be empty"));
        }
        if self.platform_account_id.trim().is_empty() {
            return Err(invalid("platform_account_id must not be empty"));
        }
        if self.credential_ref.trim().is_empty() {
            return Err(invalid("credential_ref must not be empty"));
        }
        Ok(())
    }
}

/// Resolves an alias to its account binding.
pub trait AccountRegistry: Send + Sync {
    fn get_account_binding(&self, alias: &str) -> Result<AccountBinding, RegistryError>;

    fn accounts(&self) -> Vec<AccountBinding>;
}

/// Registry built once from configuration.
///
/// Lookup order: exact alias, platform account id, then a case-insensitive
/// match on the slugged alias, display name or extra aliases
/// (`"Acme Outdoor"`, `"acme_outdoor"` and `"acme-outdoor"` are the same).
#[derive(Debug, Clone, Default)]
pub struct StaticAccountRegistry {
    bindings: Vec<AccountBinding>,
    by_alias: HashMap<String, usize>,
    by_platform_id: HashMap<String, usize>,
    by_slug: HashMap<String, usize>,
}

impl StaticAccountRegistry {
    pub fn new(bindings: Vec<AccountBinding>) -> Result<Self, RegistryError> {
        let mut registry = Self::default();
        for binding in bindings {
            registry.insert(binding)?;
        }
        Ok(registry)
    }

    fn insert(&mut self, binding: AccountBinding) -> Result<(), RegistryError> {
        binding.validate()?;
        if self.by_alias.contains_key(&binding.alias) {
            return Err(RegistryError::InvalidBinding {
                alias: binding.alias,
                reason: "duplicate alias".to_string(),
            });
        }

        let index = self.bindings.len();
        self.by_alias.insert(binding.alias.clone(), index);
        self.by_platform_id
            .entry(binding.platform_account_id.clone())
            .or_insert(index);
        let names = std::iter::once(&binding.alias)
            .chain(binding.display_name.iter())
            .chain(binding.aliases.iter());
        for name in names {
            self.by_slug.entry(slug(name)).or_insert(index);
        }
        self.bindings.push(binding);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl AccountRegistry for StaticAccountRegistry {
    fn get_account_binding(&self, alias: &str) -> Result<AccountBinding, RegistryError> {
        let index = self
            .by_alias
            .get(alias)
            .or_else(|| self.by_platform_id.get(alias))
            .or_else(|| self.by_slug.get(&slug(alias)))
            .ok_or_else(|| RegistryError::UnknownAccount(alias.to_string()))?;

        let binding = &self.bindings[*index];
        if binding.alias != alias {
            debug!(requested = alias, resolved = %binding.alias, "Resolved account by secondary name");
        }
        Ok(binding.clone())
    }

    fn accounts(&self) -> Vec<AccountBinding> {
        self.bindings.clone()
    }
}

fn slug(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> StaticAccountRegistry {
        StaticAccountRegistry::new(vec![
            AccountBinding::new("acme", "pk_acme_01", "ACME_KEY")
                .with_display_name("Acme Outdoor")
                .with_alias("acme-outfitters")
                .with_minimum(ItemCategory::Email, 4),
            AccountBinding::new("rogue-creamery", "pk_rogue", "ROGUE_KEY"),
        ])
        .unwrap()
    }

    #[test]
    fn test_resolve_by_alias_and_id() {
        let registry = registry();
        assert_eq!(registry.get_account_binding("acme").unwrap().alias, "acme");
        assert_eq!(registry.get_account_binding("pk_rogue").unwrap().alias, "rogue-creamery");
    }

    #[test]
    fn test_resolve_by_name_case_insensitive() {
        let registry = registry();
        assert_eq!(registry.get_account_binding("ACME OUTDOOR").unwrap().alias, "acme");
        assert_eq!(registry.get_account_binding("acme_outfitters").unwrap().alias, "acme");
        assert_eq!(
            registry.get_account_binding("Rogue Creamery").unwrap().alias,
            "rogue-creamery"
        );
    }

    #[test]
    fn test_unknown_account() {
        let err = registry().get_account_binding("ghost").unwrap_err();
        assert_eq!(err, RegistryError::UnknownAccount("ghost".to_string()));
    }

    #[test]
    fn test_rejects_duplicates_and_blank_fields() {
        let err = StaticAccountRegistry::new(vec![
            AccountBinding::new("acme", "a", "K"),
            AccountBinding::new("acme", "b", "K"),
        ])
        .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidBinding { ref reason, .. } if reason == "duplicate alias"));

        let err = StaticAccountRegistry::new(vec![AccountBinding::new("acme", " ", "K")]).unwrap_err();
        assert!(err.to_string().contains("platform_account_id"));
    }

    #[test]
    fn test_target_carries_credential_ref() {
        let target = registry().get_account_binding("acme").unwrap().target();
        assert_eq!(target.platform_account_id, "pk_acme_01");
        assert_eq!(target.credential_ref, "ACME_KEY");
    }
}
