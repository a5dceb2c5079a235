//! Append-only context threaded through one pipeline run.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domains::generation::GenerationRequest;

/// Named slot a stage may write exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSlot {
    KeywordData,
    CompetitorData,
    Intent,
    Outline,
    Research,
    Draft,
    EnhancedDraft,
    FinalContent,
    Citations,
    Images,
}

impl ContextSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextSlot::KeywordData => "keyword_data",
            ContextSlot::CompetitorData => "competitor_data",
            ContextSlot::Intent => "intent",
            ContextSlot::Outline => "outline",
            ContextSlot::Research => "research",
            ContextSlot::Draft => "draft",
            ContextSlot::EnhancedDraft => "enhanced_draft",
            ContextSlot::FinalContent => "final_content",
            ContextSlot::Citations => "citations",
            ContextSlot::Images => "images",
        }
    }
}

impl fmt::Display for ContextSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("context slot {0} was already written")]
pub struct SlotTaken(pub ContextSlot);

/// Accumulated outputs of the stages run so far.
///
/// Owned by exactly one orchestrator run. Handlers get `&StageContext`;
/// only the orchestrator appends, and a slot is never overwritten.
#[derive(Debug, Clone, Serialize)]
pub struct StageContext {
    request: GenerationRequest,
    slots: BTreeMap<ContextSlot, Value>,
}

impl StageContext {
    pub fn new(request: GenerationRequest) -> Self {
        Self {
            request,
            slots: BTreeMap::new(),
        }
    }

    pub fn request(&self) -> &GenerationRequest {
        &self.request
    }

    pub fn get(&self, slot: ContextSlot) -> Option<&Value> {
        self.slots.get(&slot)
    }

    /// Text stored in `slot`, if it holds a non-empty string.
    pub fn text(&self, slot: ContextSlot) -> Option<&str> {
        self.get(slot)
            .and_then(Value::as_str)
            .filter(|text| !text.trim().is_empty())
    }

    pub fn contains(&self, slot: ContextSlot) -> bool {
        self.slots.contains_key(&slot)
    }

    pub(crate) fn append(&mut self, slot: ContextSlot, value: Value) -> Result<(), SlotTaken> {
        if self.slots.contains_key(&slot) {
            return Err(SlotTaken(slot));
        }
        self.slots.insert(slot, value);
        Ok(())
    }

    /// Append every write of one stage, or none of them.
    pub(crate) fn append_all(&mut self, writes: Vec<(ContextSlot, Value)>) -> Result<(), SlotTaken> {
        let mut incoming = BTreeSet::new();
        for (slot, _) in &writes {
            if self.slots.contains_key(slot) || !incoming.insert(*slot) {
                return Err(SlotTaken(*slot));
            }
        }
        self.slots.extend(writes);
        Ok(())
    }

    /// Most refined body text available: polished, enhanced, then raw draft.
    pub fn best_content(&self) -> Option<&str> {
        self.text(ContextSlot::FinalContent)
            .or_else(|| self.text(ContextSlot::EnhancedDraft))
            .or_else(|| self.text(ContextSlot::Draft))
    }

    pub fn slots(&self) -> impl Iterator<Item = (&ContextSlot, &Value)> {
        self.slots.iter()
    }

    /// JSON view of every written slot, keyed by slot name.
    pub fn snapshot(&self) -> Value {
        Value::Object(
            self.slots
                .iter()
                .map(|(slot, value)| (slot.as_str().to_string(), value.clone()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn slots_are_write_once() {
        let mut context = StageContext::new(GenerationRequest::new("X"));
        context.append(ContextSlot::Draft, json!("first")).unwrap();

        assert_eq!(
            context.append(ContextSlot::Draft, json!("second")),
            Err(SlotTaken(ContextSlot::Draft))
        );
        assert_eq!(context.text(ContextSlot::Draft), Some("first"));
    }

    #[test]
    fn stage_writes_land_together_or_not_at_all() {
        let mut context = StageContext::new(GenerationRequest::new("X"));
        context.append(ContextSlot::Images, json!([])).unwrap();

        let rejected = context.append_all(vec![
            (ContextSlot::Citations, json!(["a"])),
            (ContextSlot::Images, json!(["b"])),
        ]);
        assert_eq!(rejected, Err(SlotTaken(ContextSlot::Images)));
        assert!(!context.contains(ContextSlot::Citations));

        let repeated = context.append_all(vec![
            (ContextSlot::Outline, json!(["a"])),
            (ContextSlot::Outline, json!(["b"])),
        ]);
        assert_eq!(repeated, Err(SlotTaken(ContextSlot::Outline)));
        assert!(!context.contains(ContextSlot::Outline));

        context
            .append_all(vec![
                (ContextSlot::Draft, json!("draft")),
                (ContextSlot::Citations, json!(["a"])),
            ])
            .unwrap();
        assert_eq!(context.text(ContextSlot::Draft), Some("draft"));
        assert!(context.contains(ContextSlot::Citations));
    }

    #[test]
    fn best_content_prefers_most_refined_text() {
        let mut context = StageContext::new(GenerationRequest::new("X"));
        assert_eq!(context.best_content(), None);

        context.append(ContextSlot::Draft, json!("draft")).unwrap();
        context.append(ContextSlot::EnhancedDraft, json!("  ")).unwrap();
        assert_eq!(context.best_content(), Some("draft"));

        context.append(ContextSlot::FinalContent, json!("final")).unwrap();
        assert_eq!(context.best_content(), Some("final"));
    }

    #[test]
    fn snapshot_uses_slot_names() {
        let mut context = StageContext::new(GenerationRequest::new("X"));
        context.append(ContextSlot::Outline, json!(["a", "b"])).unwrap();
        assert_eq!(context.snapshot(), json!({"outline": ["a", "b"]}));
    }
}
