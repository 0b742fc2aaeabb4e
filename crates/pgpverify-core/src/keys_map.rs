//! Keys map: the ordered artifact-to-key trust policy.
//!
//! A keys map is a line-oriented text source:
//!
//! ```text
//! # comment
//! include shared-keys.list
//! junit:junit = 0x58E79B6ABC762159DC0B1591164BD2247B936711
//! org.example:* = 0xAAAABBBBCCCCDDDD, 0x1111222233334444
//! commons-chain:commons-chain:jar:1.1 = noSig
//! ```
//!
//! Rules are evaluated in declaration order and the first rule whose artifact
//! pattern and key pattern both match wins. Includes are expanded in place.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexSet;

use crate::error::PolicyLoadError;
use crate::identity::KeyHandle;
use crate::pattern::{ArtifactCoordinate, ArtifactPattern, KeyPattern, Signer};

const INCLUDE_DIRECTIVE: &str = "include";

/// Where a set of rules comes from.
#[derive(Clone, Debug)]
pub enum PolicySource {
    File(PathBuf),
    Inline { name: String, content: String },
}

impl PolicySource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn inline(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Inline {
            name: name.into(),
            content: content.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleOrigin {
    pub source: String,
    pub line: usize,
}

#[derive(Clone, Debug)]
pub struct PolicyRule {
    pub pattern: ArtifactPattern,
    pub keys: Vec<KeyPattern>,
    pub origin: RuleOrigin,
}

impl PolicyRule {
    fn accepting(&self, signer: Signer<'_>) -> Option<&KeyPattern> {
        self.keys.iter().find(|key| key.matches(signer))
    }
}

/// Result of a policy lookup.
#[derive(Clone, Copy, Debug)]
pub enum Decision<'a> {
    /// First rule that covers the artifact and accepts the signer.
    Allowed {
        rule: &'a PolicyRule,
        by: &'a KeyPattern,
    },
    /// Rules cover the artifact but none accepts the signer.
    Rejected,
    /// No rule covers the artifact.
    Unlisted,
}

impl Decision<'_> {
    /// Allowed through a pattern that names a concrete key.
    pub fn is_explicit_allow(&self) -> bool {
        matches!(self, Decision::Allowed { by, .. } if by.is_explicit())
    }
}

/// Immutable, ordered keys-map policy.
#[derive(Clone, Debug, Default)]
pub struct TrustPolicy {
    rules: Vec<PolicyRule>,
}

impl TrustPolicy {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load all sources in order, expanding includes depth-first.
    pub fn build(sources: &[PolicySource]) -> Result<Self, PolicyLoadError> {
        let mut loader = Loader::default();
        for source in sources {
            match source {
                PolicySource::File(path) => loader.load_file(path)?,
                PolicySource::Inline { name, content } => {
                    let base = std::env::current_dir().unwrap_or_default();
                    loader.load_text(name, content, &base)?
                }
            }
        }

        tracing::debug!(rules = loader.rules.len(), "keys map loaded");
        Ok(Self {
            rules: loader.rules,
        })
    }

    pub fn from_text(name: &str, content: &str) -> Result<Self, PolicyLoadError> {
        Self::build(&[PolicySource::inline(name, content)])
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn lookup(&self, coordinate: &ArtifactCoordinate, signer: Signer<'_>) -> Decision<'_> {
        let mut covered = false;
        for rule in &self.rules {
            if !rule.pattern.matches(coordinate) {
                continue;
            }
            covered = true;
            if let Some(by) = rule.accepting(signer) {
                return Decision::Allowed { rule, by };
            }
        }

        if covered {
            Decision::Rejected
        } else {
            Decision::Unlisted
        }
    }

    /// Full fingerprint from a covering rule that names the issuer, if any.
    pub fn key_hint(
        &self,
        coordinate: &ArtifactCoordinate,
        issuer: &KeyHandle,
    ) -> Option<&KeyHandle> {
        self.rules
            .iter()
            .filter(|rule| rule.pattern.matches(coordinate))
            .flat_map(|rule| rule.keys.iter())
            .find_map(|key| match key {
                KeyPattern::Key(handle) if handle.is_fingerprint() && handle.aliases(issuer) => {
                    Some(handle)
                }
                _ => None,
            })
    }
}

#[derive(Default)]
struct Loader {
    rules: Vec<PolicyRule>,
    stack: IndexSet<PathBuf>,
}

impl Loader {
    fn load_file(&mut self, path: &Path) -> Result<(), PolicyLoadError> {
        let canonical = fs::canonicalize(path).map_err(|source| PolicyLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if self.stack.contains(&canonical) {
            let mut chain: Vec<String> = self
                .stack
                .iter()
                .skip_while(|entry| **entry != canonical)
                .map(|entry| entry.display().to_string())
                .collect();
            chain.push(canonical.display().to_string());
            return Err(PolicyLoadError::IncludeCycle { chain });
        }

        let content = fs::read_to_string(&canonical).map_err(|source| PolicyLoadError::Io {
            path: canonical.clone(),
            source,
        })?;
        let base = canonical
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        self.stack.insert(canonical.clone());
        let name = path.display().to_string();
        let result = self.load_text(&name, &content, &base);
        self.stack.shift_remove(&canonical);
        result
    }

    fn load_text(&mut self, name: &str, content: &str, base: &Path) -> Result<(), PolicyLoadError> {
        for (line_no, line) in logical_lines(content) {
            if let Some(target) = include_target(&line) {
                let target = base.join(target);
                self.load_file(&target)?;
                continue;
            }

            let Some((pattern, keys)) = line.split_once('=') else {
                return Err(PolicyLoadError::syntax(
                    name,
                    line_no,
                    format!("expected `pattern = keys`, got `{line}`"),
                ));
            };

            let pattern = ArtifactPattern::parse(pattern)
                .map_err(|err| PolicyLoadError::pattern(name, line_no, err))?;
            let keys = keys
                .split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(KeyPattern::parse)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| PolicyLoadError::pattern(name, line_no, err))?;
            if keys.is_empty() {
                return Err(PolicyLoadError::syntax(
                    name,
                    line_no,
                    format!("no keys given for `{pattern}`"),
                ));
            }

            self.rules.push(PolicyRule {
                pattern,
                keys,
                origin: RuleOrigin {
                    source: name.to_string(),
                    line: line_no,
                },
            });
        }
        Ok(())
    }
}

fn include_target(line: &str) -> Option<&str> {
    let rest = line.strip_prefix(INCLUDE_DIRECTIVE)?;
    if !rest.starts_with(char::is_whitespace) || rest.contains('=') {
        return None;
    }
    Some(rest.trim())
}

/// Strip comments, join `\` continuations, and drop blank lines.
/// Yields the 1-based line number where each logical line starts.
fn logical_lines(content: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in content.lines().enumerate() {
        let without_comment = raw.split('#').next().unwrap_or_default().trim();
        let (text, continues) = match without_comment.strip_suffix('\\') {
            Some(head) => (head.trim(), true),
            None => (without_comment, false),
        };

        let entry = pending.get_or_insert_with(|| (idx + 1, String::new()));
        if !text.is_empty() {
            if !entry.1.is_empty() {
                entry.1.push(' ');
            }
            entry.1.push_str(text);
        }

        if !continues {
            if let Some((line_no, joined)) = pending.take() {
                if !joined.is_empty() {
                    lines.push((line_no, joined));
                }
            }
        }
    }

    if let Some((line_no, joined)) = pending {
        if !joined.is_empty() {
            lines.push((line_no, joined));
        }
    }
    lines
}
