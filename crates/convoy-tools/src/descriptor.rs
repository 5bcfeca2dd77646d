//! `terraform.tfvars` writer
//!
//! The descriptor is an ordered `key = value` file: strings double-quoted,
//! booleans bare and lowercase. It is written once per run, after every role
//! is ready, and replaces any previous file wholesale.

use crate::error::Result;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorValue {
    Str(String),
    Bool(bool),
}

impl fmt::Display for DescriptorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorValue::Str(s) => {
                let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "\"{}\"", escaped)
            }
            DescriptorValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for DescriptorValue {
    fn from(s: &str) -> Self {
        DescriptorValue::Str(s.to_string())
    }
}

impl From<String> for DescriptorValue {
    fn from(s: String) -> Self {
        DescriptorValue::Str(s)
    }
}

impl From<bool> for DescriptorValue {
    fn from(b: bool) -> Self {
        DescriptorValue::Bool(b)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentDescriptor {
    entries: Vec<(String, DescriptorValue)>,
}

impl DeploymentDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, keeping its original position if already present.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<DescriptorValue>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&DescriptorValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{} = {}\n", k, v))
            .collect()
    }

    /// Overwrite `path` with the rendered descriptor.
    pub async fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, self.render()).await?;
        tracing::info!(path = %path.display(), keys = self.entries.len(), "wrote deployment descriptor");
        Ok(())
    }
}
