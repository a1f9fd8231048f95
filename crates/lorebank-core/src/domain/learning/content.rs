//! Typed learning payloads
//!
//! Every learning carries exactly one variant payload with a fixed schema.
//! Variants are a tagged union so they can be validated and fingerprinted
//! individually instead of being stored as opaque JSON.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Separator placed between fingerprint parts so `("ab", "c")` and `("a", "bc")` differ
const FINGERPRINT_SEPARATOR: char = '\u{1f}';

/// Variant-specific payload of a learning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum LearningContent {
    ArticleMemory(ArticleMemory),
    ToneCalibration(ToneCalibration),
    TopicKnowledge(TopicKnowledge),
    ContactPreference(ContactPreference),
    MessagePattern(MessagePattern),
    EngagementSignal(EngagementSignal),
}

/// What was learned from a previously written or read article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleMemory {
    /// URL, slug or other stable reference to the article
    pub article_ref: String,
    pub title: String,
    pub topic: String,
    /// The lesson worth carrying into future work
    pub takeaway: String,
}

/// A preferred position along one tone dimension (e.g. formality: "casual")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToneCalibration {
    pub dimension: String,
    pub preferred_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A fact or insight about a subject area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicKnowledge {
    pub topic: String,
    pub insight: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// How a given contact prefers to be reached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactPreference {
    pub contact_ref: String,
    pub channel: String,
    pub preference: String,
}

/// A reusable message shape that worked (or did not)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePattern {
    pub pattern_type: String,
    pub template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Observed engagement with some target, from -1.0 (negative) to 1.0 (positive)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementSignal {
    pub signal: String,
    pub target_ref: String,
    pub strength: f64,
}

/// Discriminator of a [`LearningContent`] payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningVariant {
    ArticleMemory,
    ToneCalibration,
    TopicKnowledge,
    ContactPreference,
    MessagePattern,
    EngagementSignal,
}

impl LearningVariant {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ArticleMemory => "article_memory",
            Self::ToneCalibration => "tone_calibration",
            Self::TopicKnowledge => "topic_knowledge",
            Self::ContactPreference => "contact_preference",
            Self::MessagePattern => "message_pattern",
            Self::EngagementSignal => "engagement_signal",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "article_memory" | "article" => Some(Self::ArticleMemory),
            "tone_calibration" | "tone" => Some(Self::ToneCalibration),
            "topic_knowledge" | "topic" => Some(Self::TopicKnowledge),
            "contact_preference" | "contact" => Some(Self::ContactPreference),
            "message_pattern" => Some(Self::MessagePattern),
            "engagement_signal" | "engagement" => Some(Self::EngagementSignal),
            _ => None,
        }
    }

    /// Get all variants
    pub fn all() -> &'static [LearningVariant] {
        &[
            Self::ArticleMemory,
            Self::ToneCalibration,
            Self::TopicKnowledge,
            Self::ContactPreference,
            Self::MessagePattern,
            Self::EngagementSignal,
        ]
    }
}

impl std::fmt::Display for LearningVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl LearningContent {
    /// The variant tag of this payload
    pub fn variant(&self) -> LearningVariant {
        match self {
            Self::ArticleMemory(_) => LearningVariant::ArticleMemory,
            Self::ToneCalibration(_) => LearningVariant::ToneCalibration,
            Self::TopicKnowledge(_) => LearningVariant::TopicKnowledge,
            Self::ContactPreference(_) => LearningVariant::ContactPreference,
            Self::MessagePattern(_) => LearningVariant::MessagePattern,
            Self::EngagementSignal(_) => LearningVariant::EngagementSignal,
        }
    }

    /// Check the payload's own field constraints
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::ArticleMemory(p) => {
                require("article_ref", &p.article_ref)?;
                require("title", &p.title)?;
                require("takeaway", &p.takeaway)
            }
            Self::ToneCalibration(p) => {
                require("dimension", &p.dimension)?;
                require("preferred_value", &p.preferred_value)
            }
            Self::TopicKnowledge(p) => {
                require("topic", &p.topic)?;
                require("insight", &p.insight)
            }
            Self::ContactPreference(p) => {
                require("contact_ref", &p.contact_ref)?;
                require("channel", &p.channel)?;
                require("preference", &p.preference)
            }
            Self::MessagePattern(p) => {
                require("pattern_type", &p.pattern_type)?;
                require("template", &p.template)
            }
            Self::EngagementSignal(p) => {
                require("signal", &p.signal)?;
                require("target_ref", &p.target_ref)?;
                if !p.strength.is_finite() || !(-1.0..=1.0).contains(&p.strength) {
                    return Err(Error::ValidationError(format!(
                        "engagement strength must be within [-1, 1], got {}",
                        p.strength
                    )));
                }
                Ok(())
            }
        }
    }

    /// Fields that identify this payload for natural-key deduplication
    fn identity_parts(&self) -> Vec<String> {
        match self {
            Self::ArticleMemory(p) => vec![canonicalize(&p.article_ref), canonicalize(&p.takeaway)],
            Self::ToneCalibration(p) => {
                vec![canonicalize(&p.dimension), canonicalize(&p.preferred_value)]
            }
            Self::TopicKnowledge(p) => vec![canonicalize(&p.topic), canonicalize(&p.insight)],
            Self::ContactPreference(p) => vec![
                canonicalize(&p.contact_ref),
                canonicalize(&p.channel),
                canonicalize(&p.preference),
            ],
            Self::MessagePattern(p) => {
                vec![canonicalize(&p.pattern_type), canonicalize(&p.template)]
            }
            Self::EngagementSignal(p) => vec![
                canonicalize(&p.signal),
                canonicalize(&p.target_ref),
                canonical_number(p.strength),
            ],
        }
    }

    /// Content fingerprint used in the natural key
    pub fn fingerprint(&self) -> String {
        fingerprint_of(self.variant().as_str(), &self.identity_parts())
    }

    /// One-line human readable summary
    pub fn summary(&self) -> String {
        match self {
            Self::ArticleMemory(p) => format!("{}: {}", p.title, p.takeaway),
            Self::ToneCalibration(p) => format!("{} = {}", p.dimension, p.preferred_value),
            Self::TopicKnowledge(p) => format!("{}: {}", p.topic, p.insight),
            Self::ContactPreference(p) => {
                format!("{} via {}: {}", p.contact_ref, p.channel, p.preference)
            }
            Self::MessagePattern(p) => format!("[{}] {}", p.pattern_type, p.template),
            Self::EngagementSignal(p) => {
                format!("{} on {} ({:+.2})", p.signal, p.target_ref, p.strength)
            }
        }
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::ValidationError(format!(
            "{} must not be blank",
            field
        )));
    }
    Ok(())
}

/// Canonicalize free text for fingerprinting
///
/// Lowercases and collapses whitespace runs. Punctuation, digits and symbols
/// are kept: "1.5%" and "15%" are different facts.
pub fn canonicalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fixed-precision rendering of a numeric identity field
///
/// Values that round to zero render as "0.00" whatever their sign.
fn canonical_number(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    // -0.0 == 0.0, so this also folds negative zero
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{:.2}", rounded)
}

/// Hex SHA-256 over a tag and already-canonical parts
pub(crate) fn fingerprint_of(tag: &str, parts: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tag.as_bytes());
    for part in parts {
        let mut buf = [0u8; 4];
        hasher.update(FINGERPRINT_SEPARATOR.encode_utf8(&mut buf).as_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}
