//! Typed round contracts.
//!
//! Each round produces one of these structures. `RoundOutput` is the
//! tagged union stored in a run's context and handed to later rounds.

use serde::{Deserialize, Serialize};

use super::round::RoundId;

/// Seed input for a run: one topic or a list of candidates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Topic {
    Single(String),
    Candidates(Vec<String>),
}

impl Topic {
    /// All candidate topics, trimmed, empties dropped
    pub fn candidates(&self) -> Vec<&str> {
        match self {
            Topic::Single(t) => vec![t.trim()],
            Topic::Candidates(ts) => ts.iter().map(|t| t.trim()).collect(),
        }
        .into_iter()
        .filter(|t| !t.is_empty())
        .collect()
    }

    /// Whether at least one usable topic is present
    pub fn is_empty(&self) -> bool {
        self.candidates().is_empty()
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Topic::Single(s.to_string())
    }
}

impl From<String> for Topic {
    fn from(s: String) -> Self {
        Topic::Single(s)
    }
}

impl From<Vec<String>> for Topic {
    fn from(v: Vec<String>) -> Self {
        Topic::Candidates(v)
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.candidates().join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSuggestion {
    pub topic: String,
    /// Relevance in [0, 1]
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendsOutput {
    pub suggestions: Vec<TrendSuggestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Idea {
    /// "idea-<n>"
    pub id: String,
    pub title: String,
    pub summary: String,
    /// Carried forward into drafting
    #[serde(default)]
    pub research_notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdeationOutput {
    pub ideas: Vec<Idea>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Informative,
    Conversational,
    Persuasive,
    Technical,
}

impl Tone {
    pub const NAMES: [&'static str; 4] = ["informative", "conversational", "persuasive", "technical"];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AngleOutput {
    pub idea_id: String,
    pub angle: String,
    pub audience: String,
    pub tone: Tone,
    pub outline: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub heading: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftOutput {
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataOutput {
    pub title: String,
    pub slug: String,
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolishOutput {
    pub sections: Vec<Section>,
    pub word_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishOutput {
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
}

/// Validated output of any round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "round", content = "output", rename_all = "kebab-case")]
pub enum RoundOutput {
    Trends(TrendsOutput),
    Ideation(IdeationOutput),
    AngleSelection(AngleOutput),
    SectionDrafting(DraftOutput),
    Metadata(MetadataOutput),
    Polish(PolishOutput),
    Publish(PublishOutput),
}

impl RoundOutput {
    /// Round that produced this output
    pub fn round(&self) -> RoundId {
        match self {
            RoundOutput::Trends(_) => RoundId::Trends,
            RoundOutput::Ideation(_) => RoundId::Ideation,
            RoundOutput::AngleSelection(_) => RoundId::AngleSelection,
            RoundOutput::SectionDrafting(_) => RoundId::SectionDrafting,
            RoundOutput::Metadata(_) => RoundId::Metadata,
            RoundOutput::Polish(_) => RoundId::Polish,
            RoundOutput::Publish(_) => RoundId::Publish,
        }
    }

    /// Untagged JSON of the inner payload (what gets persisted)
    pub fn payload(&self) -> serde_json::Value {
        let value = match self {
            RoundOutput::Trends(o) => serde_json::to_value(o),
            RoundOutput::Ideation(o) => serde_json::to_value(o),
            RoundOutput::AngleSelection(o) => serde_json::to_value(o),
            RoundOutput::SectionDrafting(o) => serde_json::to_value(o),
            RoundOutput::Metadata(o) => serde_json::to_value(o),
            RoundOutput::Polish(o) => serde_json::to_value(o),
            RoundOutput::Publish(o) => serde_json::to_value(o),
        };
        // Plain derived structs with string keys always serialize
        value.unwrap_or(serde_json::Value::Null)
    }

    pub fn as_ideation(&self) -> Option<&IdeationOutput> {
        match self {
            RoundOutput::Ideation(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_metadata(&self) -> Option<&MetadataOutput> {
        match self {
            RoundOutput::Metadata(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_polish(&self) -> Option<&PolishOutput> {
        match self {
            RoundOutput::Polish(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_publish(&self) -> Option<&PublishOutput> {
        match self {
            RoundOutput::Publish(o) => Some(o),
            _ => None,
        }
    }
}
