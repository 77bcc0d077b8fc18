use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::CoreError;

const INTENT_ID_PREFIX: &str = "int-";
const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const INTENT_TOKEN_LEN: usize = 7;
const BASE36_DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
/// Trailing base36 characters of the epoch-millis clock kept in a build id.
const BUILD_CLOCK_TAIL: usize = 4;

/// Identifier of an intent: `int-<YYYYMMDD>-<7 chars of [a-z0-9]>`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IntentId(String);

impl IntentId {
    pub fn generate() -> Self {
        Self::generate_at(Utc::now(), &mut rand::thread_rng())
    }

    pub fn generate_at<R: Rng + ?Sized>(now: DateTime<Utc>, rng: &mut R) -> Self {
        let token: String = (0..INTENT_TOKEN_LEN)
            .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
            .collect();
        Self(format!(
            "{INTENT_ID_PREFIX}{}-{token}",
            now.format("%Y%m%d")
        ))
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let invalid = || CoreError::InvalidIntentId(s.to_string());
        let rest = s.strip_prefix(INTENT_ID_PREFIX).ok_or_else(invalid)?;
        let (date, token) = rest.split_once('-').ok_or_else(invalid)?;
        if date.len() != 8 || !date.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if token.len() != INTENT_TOKEN_LEN || !token.bytes().all(|b| TOKEN_ALPHABET.contains(&b)) {
            return Err(invalid());
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IntentId {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<IntentId> for String {
    fn from(id: IntentId) -> Self {
        id.0
    }
}

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IntentId({})", self.0)
    }
}

/// Human-readable, sortable build identifier:
/// `<project>-<YYYYMMDD>-<base36 clock tail><3 random digits>`.
///
/// Collisions are unlikely but possible; the ledger keys build records by its
/// own ULID and only displays this id.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BuildId(String);

impl BuildId {
    pub fn generate(project: &str) -> Self {
        Self::generate_at(project, Utc::now(), &mut rand::thread_rng())
    }

    pub fn generate_at<R: Rng + ?Sized>(project: &str, now: DateTime<Utc>, rng: &mut R) -> Self {
        let clock = base36(u64::try_from(now.timestamp_millis()).unwrap_or_default());
        let tail = &clock[clock.len().saturating_sub(BUILD_CLOCK_TAIL)..];
        let suffix: u32 = rng.gen_range(0..1000);
        Self(format!(
            "{}-{}-{tail}{suffix:03}",
            slug(project),
            now.format("%Y%m%d")
        ))
    }

    /// Accepts any id usable as a single directory name.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        if s.is_empty()
            || s == "."
            || s == ".."
            || s.contains(['/', '\\'])
            || s.chars().any(char::is_control)
        {
            return Err(CoreError::InvalidBuildId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BuildId {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<BuildId> for String {
    fn from(id: BuildId) -> Self {
        id.0
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BuildId({})", self.0)
    }
}

/// Deserializers that keep a stored id exactly as written. Manifests are read
/// this way so a malformed id reaches verification instead of failing the read.
pub(crate) mod lenient {
    use serde::{Deserialize, Deserializer};

    use super::{BuildId, IntentId};

    pub fn intent_id<'de, D>(deserializer: D) -> Result<IntentId, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(IntentId)
    }

    pub fn build_id<'de, D>(deserializer: D) -> Result<BuildId, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(BuildId)
    }
}

/// Lowercases the project name and replaces anything that is not safe in a
/// directory name with `-`.
fn slug(project: &str) -> String {
    let slug: String = project
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if slug.is_empty() {
        "build".to_string()
    } else {
        slug
    }
}

fn base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36_DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    digits.iter().rev().map(|&b| b as char).collect()
}
