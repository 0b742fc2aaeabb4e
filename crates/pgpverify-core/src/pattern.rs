use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PatternError;
use crate::identity::KeyHandle;

/// Identity of a single downloaded artifact.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactCoordinate {
    pub group_id: String,
    pub artifact_id: String,
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub version: String,
}

impl ArtifactCoordinate {
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        artifact_type: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            artifact_type: artifact_type.into(),
            version: version.into(),
        }
    }

    fn segments(&self) -> [&str; 4] {
        [
            &self.group_id,
            &self.artifact_id,
            &self.artifact_type,
            &self.version,
        ]
    }
}

impl FromStr for ArtifactCoordinate {
    type Err = PatternError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = input.trim().split(':').collect();
        match parts.as_slice() {
            [g, a, t, v] if parts.iter().all(|p| !p.is_empty()) => Ok(Self::new(*g, *a, *t, *v)),
            _ => Err(PatternError::InvalidCoordinate {
                input: input.to_string(),
            }),
        }
    }
}

impl fmt::Display for ArtifactCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.group_id, self.artifact_id, self.artifact_type, self.version
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Any,
    Prefix(String),
    Literal(String),
}

impl Segment {
    fn parse(raw: &str, input: &str) -> Result<Self, PatternError> {
        let invalid = |reason: &str| PatternError::InvalidArtifact {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid("empty segment"));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(invalid("whitespace inside a segment"));
        }
        match raw.find('*') {
            None => Ok(Self::Literal(raw.to_string())),
            Some(pos) if pos + 1 == raw.len() => {
                if pos == 0 {
                    Ok(Self::Any)
                } else {
                    Ok(Self::Prefix(raw[..pos].to_string()))
                }
            }
            Some(_) => Err(invalid("`*` is only allowed at the end of a segment")),
        }
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Prefix(prefix) => value.starts_with(prefix.as_str()),
            Self::Literal(literal) => value == literal,
        }
    }
}

/// `group:artifact:type:version` matcher; missing trailing segments match anything.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactPattern {
    source: String,
    segments: Vec<Segment>,
}

impl ArtifactPattern {
    pub fn parse(input: &str) -> Result<Self, PatternError> {
        let source = input.trim();
        let raw_segments: Vec<&str> = source.split(':').collect();
        if raw_segments.len() > 4 {
            return Err(PatternError::InvalidArtifact {
                input: input.to_string(),
                reason: "more than four segments".into(),
            });
        }

        let segments = raw_segments
            .iter()
            .map(|raw| Segment::parse(raw, input))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn matches(&self, coordinate: &ArtifactCoordinate) -> bool {
        self.segments
            .iter()
            .zip(coordinate.segments())
            .all(|(segment, value)| segment.matches(value))
    }
}

impl fmt::Display for ArtifactPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Who signed an artifact, as seen by the policy.
#[derive(Clone, Copy, Debug)]
pub enum Signer<'a> {
    Unsigned,
    Key {
        primary: &'a KeyHandle,
        signing: &'a KeyHandle,
    },
}

/// Acceptable signer for a keys-map rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyPattern {
    /// `*` or `any`: every key, and also no signature at all.
    AnyKey,
    /// `noSig`: the artifact may come without a signature.
    NoSignature,
    Key(KeyHandle),
}

impl KeyPattern {
    pub fn parse(input: &str) -> Result<Self, PatternError> {
        match input.trim() {
            "*" | "any" => Ok(Self::AnyKey),
            "noSig" => Ok(Self::NoSignature),
            other => KeyHandle::parse(other).map(Self::Key),
        }
    }

    pub fn matches(&self, signer: Signer<'_>) -> bool {
        match (self, signer) {
            (Self::AnyKey, _) => true,
            (Self::NoSignature, Signer::Unsigned) => true,
            (Self::NoSignature, Signer::Key { .. }) => false,
            (Self::Key(_), Signer::Unsigned) => false,
            (Self::Key(handle), Signer::Key { primary, signing }) => {
                handle.aliases(signing) || handle.aliases(primary)
            }
        }
    }

    /// True for patterns naming a concrete key.
    pub fn is_explicit(&self) -> bool {
        matches!(self, Self::Key(_))
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnyKey => f.write_str("*"),
            Self::NoSignature => f.write_str("noSig"),
            Self::Key(handle) => write!(f, "{handle}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(s: &str) -> ArtifactCoordinate {
        s.parse().unwrap()
    }

    #[test]
    fn omitted_trailing_segments_match_any_version() {
        let pattern = ArtifactPattern::parse("junit:junit").unwrap();
        assert!(pattern.matches(&coord("junit:junit:jar:4.12")));
        assert!(pattern.matches(&coord("junit:junit:pom:3.8.1")));
        assert!(!pattern.matches(&coord("junit:junit-dep:jar:4.12")));

        let versioned = ArtifactPattern::parse("junit:junit:jar").unwrap();
        for version in ["4.12", "4.13.2", "5.0-SNAPSHOT"] {
            let c = ArtifactCoordinate::new("junit", "junit", "jar", version);
            assert_eq!(versioned.matches(&c), pattern.matches(&c));
        }
    }

    #[test]
    fn prefix_and_full_wildcards() {
        let prefix = ArtifactPattern::parse("org.apache.*:commons-*").unwrap();
        assert!(prefix.matches(&coord("org.apache.commons:commons-lang3:jar:3.12.0")));
        assert!(!prefix.matches(&coord("org.apache:commons-io:jar:2.11")));
        assert!(!prefix.matches(&coord("org.apache.commons:lang:jar:2.6")));

        assert!(ArtifactPattern::parse("*").unwrap().matches(&coord("a:b:c:d")));
        assert!(
            ArtifactPattern::parse("*:*:pom")
                .unwrap()
                .matches(&coord("x:y:pom:1"))
        );
    }

    #[test]
    fn matching_is_case_sensitive() {
        let pattern = ArtifactPattern::parse("JUnit:junit").unwrap();
        assert!(!pattern.matches(&coord("junit:junit:jar:4.12")));
    }

    #[test]
    fn malformed_artifact_patterns_are_rejected() {
        for bad in ["a:b:c:d:e", "a::c", "a*b:c", "", "a:*x", "a b:c"] {
            assert!(ArtifactPattern::parse(bad).is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn key_patterns_and_absence() {
        let primary = KeyHandle::parse("DA841DA350951644A50D006412211E187B7C5E3F").unwrap();
        let subkey = KeyHandle::parse("1C0D8F55EFAE456779F95222090A2F17D37F6D8C").unwrap();
        let signed = Signer::Key {
            primary: &primary,
            signing: &subkey,
        };

        assert!(KeyPattern::AnyKey.matches(Signer::Unsigned));
        assert!(KeyPattern::AnyKey.matches(signed));
        assert!(KeyPattern::NoSignature.matches(Signer::Unsigned));
        assert!(!KeyPattern::NoSignature.matches(signed));

        let by_subkey_id = KeyPattern::parse("0x090A2F17D37F6D8C").unwrap();
        let by_primary = KeyPattern::parse("0xDA841DA350951644A50D006412211E187B7C5E3F").unwrap();
        let unrelated = KeyPattern::parse("0xFCB2E3BEADF588F4").unwrap();
        assert!(by_subkey_id.matches(signed));
        assert!(by_primary.matches(signed));
        assert!(!unrelated.matches(signed));
        assert!(!by_primary.matches(Signer::Unsigned));
    }

    #[test]
    fn coordinate_round_trips_through_display() {
        let c = coord("commons-chain:commons-chain:jar:1.1");
        assert_eq!(c.to_string(), "commons-chain:commons-chain:jar:1.1");
        assert!("a:b:c".parse::<ArtifactCoordinate>().is_err());
    }
}
