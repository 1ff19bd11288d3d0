//! Language configuration for containerized execution
//!
//! Maps a language identifier to the image, source file name and shell
//! command used to run it. The table is embedded from `files/languages.toml`.

use std::collections::HashMap;

use anyhow::Context;
use serde::Deserialize;

use super::error::{ExecutionError, ExecutionResult};

/// Execution spec for a supported language
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionSpec {
    /// Name of the source file inside the workspace (e.g., "main.py")
    pub file_name: String,
    /// Runner image the container is created from
    pub image: String,
    /// Shell command run from the workspace directory
    pub command: String,
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
struct RawLanguageSpec {
    source_file: String,
    image: String,
    command: String,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Case-insensitive lookup from language identifier to [`ExecutionSpec`]
#[derive(Debug, Clone)]
pub struct LanguageSpecFactory {
    specs: HashMap<String, ExecutionSpec>,
    canonical: Vec<String>,
}

impl LanguageSpecFactory {
    /// Load the built-in language table
    pub fn builtin() -> anyhow::Result<Self> {
        let content = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));
        Self::from_toml(content).context("Invalid built-in language table")
    }

    /// Parse a language table
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let raw_specs: HashMap<String, RawLanguageSpec> = toml::from_str(content)?;

        let mut specs = HashMap::new();
        let mut canonical = Vec::with_capacity(raw_specs.len());

        for (name, raw) in raw_specs {
            for (field, value) in [
                ("source_file", &raw.source_file),
                ("image", &raw.image),
                ("command", &raw.command),
            ] {
                if value.trim().is_empty() {
                    anyhow::bail!("Empty {} for language {}", field, name);
                }
            }

            let spec = ExecutionSpec {
                file_name: raw.source_file,
                image: raw.image,
                command: raw.command,
            };

            // Add main language name
            let name = name.to_lowercase();
            specs.insert(name.clone(), spec.clone());
            canonical.push(name);

            // Add aliases
            for alias in raw.aliases {
                specs.insert(alias.to_lowercase(), spec.clone());
            }
        }

        canonical.sort();

        Ok(Self { specs, canonical })
    }

    /// Get the execution spec for a language identifier
    pub fn get_spec(&self, language: &str) -> ExecutionResult<ExecutionSpec> {
        self.specs
            .get(&language.trim().to_lowercase())
            .cloned()
            .ok_or_else(|| ExecutionError::UnsupportedLanguage(language.to_string()))
    }

    /// Get all canonical language names (aliases excluded)
    pub fn supported_languages(&self) -> &[String] {
        &self.canonical
    }

    /// Distinct runner images, sorted
    pub fn images(&self) -> Vec<String> {
        let mut images: Vec<String> = self.specs.values().map(|s| s.image.clone()).collect();
        images.sort();
        images.dedup();
        images
    }
}
