//! Configuration schema for Strata
//!
//! Configuration is stored at `~/.config/strata/config.toml`

use serde::{Deserialize, Serialize};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Build execution settings
    pub build: BuildConfig,

    /// Terminal output settings
    pub output: OutputConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Build execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Filesystem backend: "buildah" or "stub"
    pub backend: String,

    /// Default image format for commits ("oci" or "docker")
    pub format: String,

    /// Suppress command echo and realtime process output
    pub quiet: bool,

    /// Re-invoke under `buildah unshare` when not running as root
    pub unshare: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            backend: "buildah".to_string(),
            format: "oci".to_string(),
            quiet: false,
            unshare: true,
        }
    }
}

/// Terminal output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Colorize prefixes and highlighted output
    pub colors: bool,

    /// Apply highlight rules to process output
    pub highlight: bool,

    /// Highlight rules, applied to each line in the order listed
    pub rules: Vec<HighlightRule>,
}

/// One `[[output.rules]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightRule {
    /// Regex matched against the line
    pub pattern: String,

    /// Replacement with `$1` captures and `{color}` placeholders
    pub template: String,
}

impl HighlightRule {
    pub fn new(pattern: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            template: template.into(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            colors: true,
            highlight: true,
            rules: vec![
                HighlightRule::new(r"^([\w]+):", "{cyan}$1{gray}:{reset}"),
                HighlightRule::new(r"^( *)- ", "$1{red}-{reset} "),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[build]"));
        assert!(toml.contains("[[output.rules]]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.build.backend, "buildah");
        assert_eq!(config.build.format, "oci");
        assert!(!config.output.rules.is_empty());
    }

    #[test]
    fn rules_keep_declared_order() {
        let toml = r#"
            [[output.rules]]
            pattern = "warn"
            template = "{yellow}warn{reset}"

            [[output.rules]]
            pattern = "^(\\w+):"
            template = "{cyan}$1{reset}:"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        let patterns: Vec<&str> = config
            .output
            .rules
            .iter()
            .map(|r| r.pattern.as_str())
            .collect();
        assert_eq!(patterns, vec!["warn", r"^(\w+):"]);
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [build]
            quiet = true
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.build.quiet);
        assert_eq!(config.build.backend, "buildah"); // default preserved
        assert!(config.output.colors);
    }
}
