//! Remote bootstrap scripts with an exported-variable preamble

use crate::error::Result;
use std::path::Path;

/// Quote `s` for a POSIX shell. Plain words pass through unchanged.
pub fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:@%+=,".contains(c));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

/// A script body prefixed by `export KEY=value` lines, piped into
/// `sudo bash -s` on the target host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteScript {
    exports: Vec<(String, String)>,
    body: String,
}

impl RemoteScript {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            exports: Vec::new(),
            body: body.into(),
        }
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let body = tokio::fs::read_to_string(path.as_ref()).await?;
        Ok(Self::new(body))
    }

    /// Add an export. Later values for the same key replace earlier ones in
    /// place.
    pub fn export(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.exports.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.exports.push((key, value)),
        }
        self
    }

    pub fn exported_keys(&self) -> impl Iterator<Item = &str> {
        self.exports.iter().map(|(k, _)| k.as_str())
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.exports {
            out.push_str(&format!("export {}={}\n", key, shell_quote(value)));
        }
        out.push_str(&self.body);
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}
