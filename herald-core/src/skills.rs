//! Skill manifests and the phrase index built from them.
//!
//! Manifests arrive from the host already parsed. The index maps every
//! normalized trigger phrase to its manifest and is only ever rebuilt as a
//! whole: [`SkillIndex::replace_all`] builds a fresh map before swapping it in.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{HeraldError, Result};
use crate::text::normalize;

/// Side effect a skill performs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillAction {
    /// Executor key, e.g. `"open_url"`.
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub args: HashMap<String, String>,
}

/// A voice command definition, as stored in a skill's `manifest.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillManifest {
    pub id: String,
    #[serde(default)]
    pub phrases: Vec<String>,
    #[serde(default)]
    pub action: SkillAction,
    /// Optional sound played after the action, relative to the skill directory
    /// or absolute.
    #[serde(default)]
    pub response_sound: Option<String>,
}

impl SkillManifest {
    /// Reject manifests the router could never dispatch.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(HeraldError::InvalidSkill("missing id".into()));
        }
        if self.action.action_type.trim().is_empty() {
            return Err(HeraldError::InvalidSkill(format!(
                "skill '{}' has no action type",
                self.id
            )));
        }
        Ok(())
    }
}

/// Normalized phrase → manifest.
#[derive(Debug, Default, Clone)]
pub struct SkillIndex {
    by_phrase: HashMap<String, Arc<SkillManifest>>,
}

impl SkillIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from a complete manifest list.
    pub fn from_manifests(manifests: impl IntoIterator<Item = SkillManifest>) -> Self {
        let mut index = Self::new();
        for manifest in manifests {
            index.register(manifest);
        }
        index
    }

    /// Index every phrase of `manifest`. A phrase already present is taken
    /// over by the newer manifest.
    pub fn register(&mut self, manifest: SkillManifest) {
        let manifest = Arc::new(manifest);
        for phrase in &manifest.phrases {
            let key = normalize(phrase);
            if key.is_empty() {
                debug!(skill = %manifest.id, phrase, "skipping phrase that normalizes to nothing");
                continue;
            }
            if let Some(prev) = self.by_phrase.insert(key.clone(), Arc::clone(&manifest)) {
                if prev.id != manifest.id {
                    warn!(phrase = %key, old = %prev.id, new = %manifest.id, "phrase collision, newer skill wins");
                }
            }
        }
    }

    /// Swap in a freshly built index.
    pub fn replace_all(&mut self, manifests: impl IntoIterator<Item = SkillManifest>) {
        *self = Self::from_manifests(manifests);
        info!(phrases = self.len(), skills = self.manifests().len(), "skill index rebuilt");
    }

    pub fn clear(&mut self) {
        self.by_phrase.clear();
    }

    /// Exact lookup of an already-normalized phrase.
    pub fn find(&self, normalized_phrase: &str) -> Option<Arc<SkillManifest>> {
        self.by_phrase.get(normalized_phrase).cloned()
    }

    /// Distinct manifests currently reachable, sorted by id.
    pub fn manifests(&self) -> Vec<Arc<SkillManifest>> {
        let mut seen: HashMap<&str, Arc<SkillManifest>> = HashMap::new();
        for m in self.by_phrase.values() {
            seen.entry(m.id.as_str()).or_insert_with(|| Arc::clone(m));
        }
        let mut out: Vec<_> = seen.into_values().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Number of indexed phrases.
    pub fn len(&self) -> usize {
        self.by_phrase.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_phrase.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill(id: &str, phrases: &[&str]) -> SkillManifest {
        SkillManifest {
            id: id.into(),
            phrases: phrases.iter().map(|p| p.to_string()).collect(),
            action: SkillAction {
                action_type: "open_url".into(),
                args: HashMap::from([("url".into(), "https://example.com".into())]),
            },
            response_sound: None,
        }
    }

    #[test]
    fn phrases_are_indexed_normalized() {
        let index = SkillIndex::from_manifests([skill("browser", &["Открой, браузер!"])]);
        assert_eq!(index.find("открой браузер").unwrap().id, "browser");
        assert!(index.find("Открой, браузер!").is_none());
    }

    #[test]
    fn last_registration_wins() {
        let mut index = SkillIndex::new();
        index.register(skill("first", &["music"]));
        index.register(skill("second", &["Music"]));
        assert_eq!(index.find("music").unwrap().id, "second");
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn replace_all_drops_previous_entries() {
        let mut index = SkillIndex::from_manifests([skill("old", &["old phrase"])]);
        index.replace_all([skill("new", &["new phrase"])]);
        assert!(index.find("old phrase").is_none());
        assert_eq!(index.find("new phrase").unwrap().id, "new");
    }

    #[test]
    fn empty_phrases_are_skipped() {
        let index = SkillIndex::from_manifests([skill("x", &["...", "  "])]);
        assert!(index.is_empty());
    }

    #[test]
    fn manifests_are_distinct() {
        let index = SkillIndex::from_manifests([skill("a", &["one", "two"]), skill("b", &["three"])]);
        let ids: Vec<_> = index.manifests().iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn manifest_json_uses_original_field_names() {
        let raw = r#"{
            "id": "yt",
            "phrases": ["открой ютуб"],
            "action": { "type": "open_url", "args": { "url": "https://youtube.com" } },
            "responseSound": "ok.wav"
        }"#;
        let m: SkillManifest = serde_json::from_str(raw).unwrap();
        assert_eq!(m.action.action_type, "open_url");
        assert_eq!(m.action.args["url"], "https://youtube.com");
        assert_eq!(m.response_sound.as_deref(), Some("ok.wav"));
        assert!(m.validate().is_ok());
    }

    #[test]
    fn validation_rejects_missing_id_or_type() {
        let mut m = skill("", &["x"]);
        assert!(m.validate().is_err());
        m.id = "ok".into();
        m.action.action_type.clear();
        assert!(m.validate().is_err());
    }
}
