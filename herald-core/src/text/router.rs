//! Wake-prefix handling and command lookup.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::normalize;
use crate::config::LiveTuning;
use crate::skills::{SkillAction, SkillIndex, SkillManifest};

/// A transcript resolved to a skill.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub manifest: Arc<SkillManifest>,
    /// The normalized command text after the wake phrase.
    pub command: String,
}

impl RouteMatch {
    pub fn action(&self) -> &SkillAction {
        &self.manifest.action
    }
}

/// How a transcript relates to the wake phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeCheck {
    /// The transcript starts with the full wake phrase.
    Confirmed,
    /// The transcript is a prefix of the wake phrase; more text may follow.
    Partial,
    /// At most one character while the wake phrase is longer; ignored.
    Noise,
    /// Neither a prefix nor an extension of the wake phrase.
    Mismatch,
}

/// Resolves transcripts against the configured wake phrase and skill index.
#[derive(Debug, Clone)]
pub struct CommandRouter {
    index: Arc<RwLock<SkillIndex>>,
    tuning: Arc<LiveTuning>,
}

impl CommandRouter {
    pub fn new(index: Arc<RwLock<SkillIndex>>, tuning: Arc<LiveTuning>) -> Self {
        Self { index, tuning }
    }

    /// Normalized wake phrase, read from live tuning.
    pub fn wake_phrase(&self) -> String {
        normalize(&self.tuning.wake_phrase())
    }

    /// Match `raw` as `<wake phrase> <command>` against the skill index.
    pub fn route(&self, raw: &str) -> Option<RouteMatch> {
        let text = normalize(raw);
        let wake = self.wake_phrase();
        let rest = text.strip_prefix(wake.as_str())?.trim();
        if rest.is_empty() {
            return None;
        }

        debug!(command = rest, "routing command");
        let manifest = self.index.read().find(rest)?;
        Some(RouteMatch {
            manifest,
            command: rest.to_string(),
        })
    }

    /// Classify `raw` for wake confirmation.
    pub fn check_wake(&self, raw: &str) -> WakeCheck {
        classify_wake(&normalize(raw), &self.wake_phrase())
    }

    pub fn index(&self) -> &Arc<RwLock<SkillIndex>> {
        &self.index
    }
}

/// Both arguments must already be normalized.
pub fn classify_wake(text: &str, wake: &str) -> WakeCheck {
    if text.chars().count() <= 1 && wake.chars().count() > 1 {
        return WakeCheck::Noise;
    }
    if text.starts_with(wake) {
        WakeCheck::Confirmed
    } else if wake.starts_with(text) {
        WakeCheck::Partial
    } else {
        WakeCheck::Mismatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TuningConfig;
    use std::collections::HashMap;

    fn router() -> CommandRouter {
        let index = SkillIndex::from_manifests([SkillManifest {
            id: "browser".into(),
            phrases: vec!["открой браузер".into()],
            action: SkillAction {
                action_type: "open_url".into(),
                args: HashMap::from([("url".into(), "https://ya.ru".into())]),
            },
            response_sound: None,
        }]);
        CommandRouter::new(
            Arc::new(RwLock::new(index)),
            Arc::new(LiveTuning::new(&TuningConfig::default())),
        )
    }

    #[test]
    fn routes_wake_prefixed_command() {
        let m = router().route("Джарвис, открой браузер.").expect("should match");
        assert_eq!(m.manifest.id, "browser");
        assert_eq!(m.command, "открой браузер");
        assert_eq!(m.action().action_type, "open_url");
    }

    #[test]
    fn requires_wake_prefix() {
        assert!(router().route("открой браузер").is_none());
    }

    #[test]
    fn bare_wake_phrase_is_not_a_command() {
        assert!(router().route("Джарвис!").is_none());
    }

    #[test]
    fn unknown_command_has_no_match() {
        assert!(router().route("джарвис закрой браузер").is_none());
        assert!(router().route("джарвис открой").is_none());
    }

    #[test]
    fn wake_classification() {
        let r = router();
        assert_eq!(r.check_wake("Джарвис, открой браузер."), WakeCheck::Confirmed);
        assert_eq!(r.check_wake("джар"), WakeCheck::Partial);
        assert_eq!(r.check_wake("привет"), WakeCheck::Mismatch);
        assert_eq!(r.check_wake("д"), WakeCheck::Noise);
        assert_eq!(r.check_wake("..."), WakeCheck::Noise);
    }

    #[test]
    fn single_char_wake_phrase_is_not_noise() {
        assert_eq!(classify_wake("x", "x"), WakeCheck::Confirmed);
    }

    #[test]
    fn wake_phrase_change_applies_immediately() {
        let r = router();
        r.tuning.set_wake_phrase("Пятница");
        assert!(r.route("джарвис открой браузер").is_none());
        assert_eq!(r.route("пятница открой браузер").unwrap().manifest.id, "browser");
    }
}
