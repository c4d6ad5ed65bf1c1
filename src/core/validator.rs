//! Structural validation of round outputs.
//!
//! Executors hand back raw JSON. Before anything is persisted the value is
//! checked against the round's contract and converted into a typed
//! `RoundOutput`. Unknown fields are tolerated.

use std::ops::RangeInclusive;
use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::{RoundId, RoundOutput, Tone};

/// Contract violation in a round's output
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Round '{round}' output invalid at {field_path}: {reason}")]
pub struct ValidationError {
    pub round: RoundId,

    /// JSON-pointer style path ("/ideas/0/id"); "/" for the whole value
    pub field_path: String,

    pub reason: String,
}

fn idea_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^idea-[0-9]+$").expect("static regex"))
}

fn slug_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("static regex"))
}

fn link_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^https?://\S+$").expect("static regex"))
}

/// Maximum metadata description length (characters)
pub const MAX_DESCRIPTION_CHARS: usize = 300;

/// Pure, side-effect-free round output validator
#[derive(Debug, Clone)]
pub struct Validator {
    /// Serialized outputs larger than this are rejected
    max_output_bytes: u64,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(10 * 1024 * 1024)
    }
}

impl Validator {
    pub fn new(max_output_bytes: u64) -> Self {
        Self { max_output_bytes }
    }

    /// Check `candidate` against `round`'s contract and against the
    /// upstream outputs it was produced from.
    ///
    /// An angle must pick an idea that ideation actually proposed.
    pub fn validate_in_context(
        &self,
        round: RoundId,
        candidate: &Value,
        upstream: &[RoundOutput],
    ) -> Result<RoundOutput, ValidationError> {
        let output = self.validate(round, candidate)?;

        if let RoundOutput::AngleSelection(angle) = &output {
            let ideation = upstream.iter().find_map(RoundOutput::as_ideation);
            if let Some(ideation) = ideation {
                if !ideation.ideas.iter().any(|idea| idea.id == angle.idea_id) {
                    return Err(ValidationError {
                        round,
                        field_path: "/idea_id".to_string(),
                        reason: format!("'{}' is not one of the ideation ideas", angle.idea_id),
                    });
                }
            }
        }

        Ok(output)
    }

    /// Check `candidate` against `round`'s contract
    pub fn validate(&self, round: RoundId, candidate: &Value) -> Result<RoundOutput, ValidationError> {
        let check = Check { round };

        let size = candidate.to_string().len() as u64;
        if size > self.max_output_bytes {
            return Err(check.fail(
                "",
                format!("output is {} bytes, limit is {}", size, self.max_output_bytes),
            ));
        }

        let root = check.object(candidate, "")?;

        match round {
            RoundId::Trends => {
                let suggestions = check.array(root, "", "suggestions", 1)?;
                for (i, item) in suggestions.iter().enumerate() {
                    let path = format!("/suggestions/{}", i);
                    let obj = check.object(item, &path)?;
                    check.string(obj, &path, "topic")?;
                    check.number(obj, &path, "score", 0.0..=1.0)?;
                    check.opt_string(obj, &path, "rationale")?;
                }
                check.typed(candidate).map(RoundOutput::Trends)
            }

            RoundId::Ideation => {
                let ideas = check.array(root, "", "ideas", 1)?;
                for (i, item) in ideas.iter().enumerate() {
                    let path = format!("/ideas/{}", i);
                    let obj = check.object(item, &path)?;
                    let id = check.string(obj, &path, "id")?;
                    check.pattern(&format!("{}/id", path), id, idea_id_pattern())?;
                    check.string(obj, &path, "title")?;
                    check.string(obj, &path, "summary")?;
                    if obj.contains_key("research_notes") {
                        check.string_array(obj, &path, "research_notes", 0, false)?;
                    }
                }
                check.typed(candidate).map(RoundOutput::Ideation)
            }

            RoundId::AngleSelection => {
                let idea_id = check.string(root, "", "idea_id")?;
                check.pattern("/idea_id", idea_id, idea_id_pattern())?;
                check.string(root, "", "angle")?;
                check.string(root, "", "audience")?;
                check.one_of(root, "", "tone", &Tone::NAMES)?;
                check.string_array(root, "", "outline", 1, true)?;
                check.typed(candidate).map(RoundOutput::AngleSelection)
            }

            RoundId::SectionDrafting => {
                check.sections(root)?;
                check.typed(candidate).map(RoundOutput::SectionDrafting)
            }

            RoundId::Metadata => {
                check.string(root, "", "title")?;
                let slug = check.string(root, "", "slug")?;
                check.pattern("/slug", slug, slug_pattern())?;
                let description = check.string(root, "", "description")?;
                let chars = description.chars().count();
                if chars > MAX_DESCRIPTION_CHARS {
                    return Err(check.fail(
                        "/description",
                        format!("{} characters, at most {} allowed", chars, MAX_DESCRIPTION_CHARS),
                    ));
                }
                if root.contains_key("keywords") {
                    check.string_array(root, "", "keywords", 0, true)?;
                }
                check.typed(candidate).map(RoundOutput::Metadata)
            }

            RoundId::Polish => {
                check.sections(root)?;
                check.integer(root, "", "word_count", 1)?;
                check.typed(candidate).map(RoundOutput::Polish)
            }

            RoundId::Publish => {
                let link = check.string(root, "", "link")?;
                check.pattern("/link", link, link_pattern())?;
                check.opt_string(root, "", "published_at")?;
                check.typed(candidate).map(RoundOutput::Publish)
            }
        }
    }
}

/// Field-level checks for one round
struct Check {
    round: RoundId,
}

impl Check {
    fn fail(&self, path: &str, reason: impl Into<String>) -> ValidationError {
        ValidationError {
            round: self.round,
            field_path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            reason: reason.into(),
        }
    }

    fn object<'v>(&self, value: &'v Value, path: &str) -> Result<&'v Map<String, Value>, ValidationError> {
        value
            .as_object()
            .ok_or_else(|| self.fail(path, format!("expected object, got {}", kind_of(value))))
    }

    fn field<'v>(
        &self,
        obj: &'v Map<String, Value>,
        path: &str,
        name: &str,
    ) -> Result<&'v Value, ValidationError> {
        match obj.get(name) {
            Some(Value::Null) | None => {
                Err(self.fail(&format!("{}/{}", path, name), "required field is missing"))
            }
            Some(v) => Ok(v),
        }
    }

    /// Required, non-blank string
    fn string<'v>(
        &self,
        obj: &'v Map<String, Value>,
        path: &str,
        name: &str,
    ) -> Result<&'v str, ValidationError> {
        let field_path = format!("{}/{}", path, name);
        let value = self.field(obj, path, name)?;
        let s = value
            .as_str()
            .ok_or_else(|| self.fail(&field_path, format!("expected string, got {}", kind_of(value))))?;
        if s.trim().is_empty() {
            return Err(self.fail(&field_path, "must not be empty"));
        }
        Ok(s)
    }

    fn opt_string(&self, obj: &Map<String, Value>, path: &str, name: &str) -> Result<(), ValidationError> {
        match obj.get(name) {
            None | Some(Value::Null) | Some(Value::String(_)) => Ok(()),
            Some(other) => Err(self.fail(
                &format!("{}/{}", path, name),
                format!("expected string, got {}", kind_of(other)),
            )),
        }
    }

    fn number(
        &self,
        obj: &Map<String, Value>,
        path: &str,
        name: &str,
        range: RangeInclusive<f64>,
    ) -> Result<f64, ValidationError> {
        let field_path = format!("{}/{}", path, name);
        let value = self.field(obj, path, name)?;
        let n = value
            .as_f64()
            .ok_or_else(|| self.fail(&field_path, format!("expected number, got {}", kind_of(value))))?;
        if !range.contains(&n) {
            return Err(self.fail(
                &field_path,
                format!("{} is outside [{}, {}]", n, range.start(), range.end()),
            ));
        }
        Ok(n)
    }

    fn integer(&self, obj: &Map<String, Value>, path: &str, name: &str, min: u64) -> Result<u64, ValidationError> {
        let field_path = format!("{}/{}", path, name);
        let value = self.field(obj, path, name)?;
        let n = value.as_u64().ok_or_else(|| {
            self.fail(&field_path, format!("expected non-negative integer, got {}", kind_of(value)))
        })?;
        if n < min || n > u64::from(u32::MAX) {
            return Err(self.fail(&field_path, format!("{} is outside [{}, {}]", n, min, u32::MAX)));
        }
        Ok(n)
    }

    fn array<'v>(
        &self,
        obj: &'v Map<String, Value>,
        path: &str,
        name: &str,
        min_len: usize,
    ) -> Result<&'v Vec<Value>, ValidationError> {
        let field_path = format!("{}/{}", path, name);
        let value = self.field(obj, path, name)?;
        let items = value
            .as_array()
            .ok_or_else(|| self.fail(&field_path, format!("expected array, got {}", kind_of(value))))?;
        if items.len() < min_len {
            return Err(self.fail(
                &field_path,
                format!("expected at least {} item(s), got {}", min_len, items.len()),
            ));
        }
        Ok(items)
    }

    fn string_array(
        &self,
        obj: &Map<String, Value>,
        path: &str,
        name: &str,
        min_len: usize,
        non_blank: bool,
    ) -> Result<(), ValidationError> {
        let items = self.array(obj, path, name, min_len)?;
        for (i, item) in items.iter().enumerate() {
            let item_path = format!("{}/{}/{}", path, name, i);
            match item.as_str() {
                Some(s) if non_blank && s.trim().is_empty() => {
                    return Err(self.fail(&item_path, "must not be empty"));
                }
                Some(_) => {}
                None => {
                    return Err(self.fail(&item_path, format!("expected string, got {}", kind_of(item))));
                }
            }
        }
        Ok(())
    }

    fn one_of(&self, obj: &Map<String, Value>, path: &str, name: &str, allowed: &[&str]) -> Result<(), ValidationError> {
        let value = self.string(obj, path, name)?;
        if !allowed.iter().any(|a| *a == value) {
            return Err(self.fail(
                &format!("{}/{}", path, name),
                format!("'{}' is not one of: {}", value, allowed.join(", ")),
            ));
        }
        Ok(())
    }

    fn pattern(&self, field_path: &str, value: &str, re: &Regex) -> Result<(), ValidationError> {
        if !re.is_match(value) {
            return Err(self.fail(
                field_path,
                format!("'{}' does not match pattern {}", value, re.as_str()),
            ));
        }
        Ok(())
    }

    /// `sections: [{heading, body}]`, at least one
    fn sections(&self, root: &Map<String, Value>) -> Result<(), ValidationError> {
        let sections = self.array(root, "", "sections", 1)?;
        for (i, item) in sections.iter().enumerate() {
            let path = format!("/sections/{}", i);
            let obj = self.object(item, &path)?;
            self.string(obj, &path, "heading")?;
            self.string(obj, &path, "body")?;
        }
        Ok(())
    }

    /// Convert an already-checked value into its typed form
    fn typed<T: DeserializeOwned>(&self, value: &Value) -> Result<T, ValidationError> {
        serde_json::from_value(value.clone()).map_err(|e| self.fail("", e.to_string()))
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
