//! Loads skill manifests from `<skills_dir>/<skill>/manifest.json`.
//!
//! Invalid or unreadable manifests are logged and skipped; one broken skill
//! never prevents the others from loading.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use herald_core::SkillManifest;
use tracing::{info, warn};

const MANIFEST_FILE: &str = "manifest.json";

/// Scan `dir` and return every valid manifest, ordered by directory name.
pub fn load_skills(dir: &Path) -> Vec<SkillManifest> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "skills directory not readable");
            return Vec::new();
        }
    };

    let mut skill_dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    skill_dirs.sort();

    let mut skills = Vec::new();
    for skill_dir in skill_dirs {
        let manifest_path = skill_dir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            continue;
        }
        match load_manifest(&manifest_path) {
            Ok(manifest) => {
                info!(
                    skill_id = %manifest.id,
                    phrases = manifest.phrases.len(),
                    "loaded skill"
                );
                skills.push(manifest);
            }
            Err(e) => warn!(path = %manifest_path.display(), error = %format!("{e:#}"), "skipping skill"),
        }
    }
    skills
}

fn load_manifest(path: &Path) -> anyhow::Result<SkillManifest> {
    let raw = fs::read_to_string(path).context("read manifest")?;
    let mut manifest: SkillManifest = serde_json::from_str(&raw).context("parse manifest")?;
    manifest.validate()?;

    // Relative sounds live next to the manifest.
    if let (Some(sound), Some(skill_dir)) = (manifest.response_sound.as_mut(), path.parent()) {
        let sound_path = Path::new(sound.as_str());
        if sound_path.is_relative() {
            *sound = skill_dir.join(sound_path).to_string_lossy().into_owned();
        }
    }
    Ok(manifest)
}
