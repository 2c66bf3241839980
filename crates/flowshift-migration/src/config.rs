//! Migration configuration
//!
//! Options of one migration command. Built in code with the `with_*`
//! methods or loaded from TOML:
//!
//! ```toml
//! skip_custom_listeners = true
//! skip_io_mappings = false
//! record_journal = true
//! max_tree_depth = 128
//! ```

use crate::context::EndOptions;
use crate::error::{MigrationError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Options of one migration command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Do not invoke custom end listeners on removed instances
    pub skip_custom_listeners: bool,
    /// Do not run output mappings on removed instances
    pub skip_io_mappings: bool,
    /// Record every driver step in the journal
    pub record_journal: bool,
    /// Deepest instance tree accepted
    pub max_tree_depth: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            skip_custom_listeners: false,
            skip_io_mappings: false,
            record_journal: true,
            max_tree_depth: 256,
        }
    }
}

impl MigrationConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_skip_custom_listeners(mut self, skip: bool) -> Self {
        self.skip_custom_listeners = skip;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_skip_io_mappings(mut self, skip: bool) -> Self {
        self.skip_io_mappings = skip;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_journal(mut self, record: bool) -> Self {
        self.record_journal = record;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_max_tree_depth(mut self, depth: usize) -> Self {
        self.max_tree_depth = depth;
        self
    }

    /// How removed instances are ended
    #[must_use]
    pub fn end_options(&self) -> EndOptions {
        EndOptions {
            skip_custom_listeners: self.skip_custom_listeners,
            skip_io_mappings: self.skip_io_mappings,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_tree_depth == 0 {
            return Err(MigrationError::Config(
                "max_tree_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate TOML
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| MigrationError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .map_err(|e| MigrationError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&input)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| MigrationError::Config(e.to_string()))
    }
}
