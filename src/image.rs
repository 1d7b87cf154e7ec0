//! Image references and the layer naming namespace
//!
//! Intermediate layers of an image `repo:tag` are stored as `repo:layer-<key>`
//! so every cached layer of one logical image can be listed by prefix.

use crate::error::StrataError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Registry host that local images are reported under
const LOCAL_REGISTRY: &str = "localhost/";

/// Tag prefix marking intermediate cache layers
pub const LAYER_TAG_PREFIX: &str = "layer-";

/// Commit format of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Oci,
    Docker,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Oci => "oci",
            Self::Docker => "docker",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageFormat {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oci" => Ok(Self::Oci),
            "docker" => Ok(Self::Docker),
            other => Err(StrataError::User(format!(
                "unknown image format {other:?} (expected oci or docker)"
            ))),
        }
    }
}

/// A commit target: one repository and the tags to apply to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    repository: String,
    tags: Vec<String>,
}

impl ImageRef {
    /// Parse `repository[:tag[,tag...]]`; no tag means `latest`
    ///
    /// The tag separator is the last `:` after the last `/`, so registry
    /// ports (`host:5000/repo`) stay part of the repository.
    pub fn parse(reference: &str) -> Self {
        let name_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (repository, tags) = match reference[name_start..].rfind(':') {
            Some(i) => {
                let split = name_start + i;
                (&reference[..split], &reference[split + 1..])
            }
            None => (reference, ""),
        };

        let mut tags: Vec<String> = tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if tags.is_empty() {
            tags.push("latest".to_string());
        }

        Self {
            repository: repository.to_string(),
            tags,
        }
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// `repository:tag` for every requested tag
    pub fn full_tags(&self) -> Vec<String> {
        self.tags
            .iter()
            .map(|tag| format!("{}:{}", self.repository, tag))
            .collect()
    }

    /// Name prefix shared by every cache layer of this image
    pub fn layer_prefix(&self) -> String {
        format!("{}:{}", self.repository, LAYER_TAG_PREFIX)
    }

    /// Name of the cache layer stored under `key`
    pub fn layer_name(&self, key: &str) -> String {
        format!("{}{}", self.layer_prefix(), key)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.tags.last().map(String::as_str).unwrap_or("latest");
        write!(f, "{}:{}", self.repository, tag)
    }
}

/// Strip the implicit `localhost/` registry the backend reports local images under
pub fn normalize_name(name: &str) -> &str {
    name.strip_prefix(LOCAL_REGISTRY).unwrap_or(name)
}
