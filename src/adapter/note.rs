//! Note files: parsing, completion markers and atomic write-back.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use walkdir::WalkDir;

use super::AdapterError;
use crate::queue::Target;

/// Marker appended by the legacy adapter after its quotes block.
pub const LEGACY_MARKER: &str = "<!-- quotes:done -->";
/// Front-matter flag set by the current adapter.
pub const DONE_FLAG: &str = "quotes_extracted";
/// Front-matter flag set when only a partial enrichment was written.
pub const PARTIAL_FLAG: &str = "quotes_partial";

static VIDEO_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"https?://(?:www\.|m\.)?(?:youtube\.com/watch\?(?:[^\s)\]]*&)?v=|youtu\.be/)([A-Za-z0-9_-]{11})",
    )
    .expect("video link pattern is valid")
});

/// A markdown note split into optional front matter and body.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteDocument {
    front_matter: Option<Vec<String>>,
    body: String,
}

impl NoteDocument {
    pub fn parse(text: &str) -> Self {
        let normalized = text.replace("\r\n", "\n");
        if let Some(rest) = normalized.strip_prefix("---\n") {
            let mut lines = Vec::new();
            let mut offset = 0;
            for line in rest.split_inclusive('\n') {
                offset += line.len();
                let trimmed = line.trim_end_matches('\n');
                if trimmed == "---" {
                    return Self {
                        front_matter: Some(lines),
                        body: rest[offset..].to_string(),
                    };
                }
                lines.push(trimmed.to_string());
            }
        }
        Self {
            front_matter: None,
            body: normalized,
        }
    }

    /// Unique video ids referenced anywhere in the note, in order of appearance.
    pub fn video_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        let sources = self
            .front_matter
            .iter()
            .flatten()
            .map(String::as_str)
            .chain(std::iter::once(self.body.as_str()));
        for source in sources {
            for cap in VIDEO_LINK.captures_iter(source) {
                let id = cap[1].to_string();
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    pub fn flag(&self, key: &str) -> Option<&str> {
        self.front_matter.as_ref()?.iter().find_map(|line| {
            let (k, v) = line.split_once(':')?;
            (k.trim() == key).then(|| v.trim())
        })
    }

    /// Sets `key: value` in the front matter, creating it if needed.
    pub fn set_flag(&mut self, key: &str, value: &str) {
        let entry = format!("{key}: {value}");
        let lines = self.front_matter.get_or_insert_with(Vec::new);
        match lines
            .iter_mut()
            .find(|line| line.split_once(':').is_some_and(|(k, _)| k.trim() == key))
        {
            Some(line) => *line = entry,
            None => lines.push(entry),
        }
    }

    pub fn is_enriched(&self) -> bool {
        self.body.contains(LEGACY_MARKER) || self.flag(DONE_FLAG) == Some("true")
    }

    /// A note needs processing when it links a video and has no completion marker.
    pub fn needs_enrichment(&self) -> bool {
        !self.is_enriched() && !self.video_ids().is_empty()
    }

    pub fn append_section(&mut self, section: &str) {
        if !self.body.is_empty() && !self.body.ends_with('\n') {
            self.body.push('\n');
        }
        if !self.body.is_empty() {
            self.body.push('\n');
        }
        self.body.push_str(section);
        if !self.body.ends_with('\n') {
            self.body.push('\n');
        }
    }

    pub fn render(&self) -> String {
        match &self.front_matter {
            Some(lines) => {
                let mut out = String::from("---\n");
                for line in lines {
                    out.push_str(line);
                    out.push('\n');
                }
                out.push_str("---\n");
                out.push_str(&self.body);
                out
            }
            None => self.body.clone(),
        }
    }
}

/// Maps targets onto note files below the watch root.
#[derive(Debug, Clone)]
pub struct NoteStore {
    root: PathBuf,
}

impl NoteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, target: &Target) -> PathBuf {
        self.root.join(target.as_str())
    }

    /// Target string for a note below the root. Non-markdown files and
    /// anything inside a hidden directory map to `None`.
    pub fn target_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        if relative.extension().and_then(|e| e.to_str()) != Some("md") {
            return None;
        }
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        if parts.iter().any(|p| p.starts_with('.')) {
            return None;
        }
        Some(parts.join("/"))
    }

    pub async fn read(&self, target: &Target) -> Result<NoteDocument, AdapterError> {
        let path = self.path_for(target);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(NoteDocument::parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AdapterError::MalformedTarget(
                format!("note {} does not exist", path.display()),
            )),
            Err(e) => Err(AdapterError::Io(format!("reading {}: {e}", path.display()))),
        }
    }

    /// Replaces the note via a sibling temp file and rename.
    pub async fn write(&self, target: &Target, doc: &NoteDocument) -> Result<(), AdapterError> {
        let path = self.path_for(target);
        let mut tmp_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        tmp_name.push(".vaultd-tmp");
        let tmp = path.with_file_name(tmp_name);

        tokio::fs::write(&tmp, doc.render())
            .await
            .map_err(|e| AdapterError::Io(format!("writing {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| AdapterError::Io(format!("replacing {}: {e}", path.display())))
    }

    /// Walks the root for notes that need enrichment. Hidden directories are skipped.
    pub fn scan(&self) -> Vec<String> {
        let mut targets: Vec<String> = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
            })
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let target = self.target_for(entry.path())?;
                let text = std::fs::read_to_string(entry.path()).ok()?;
                NoteDocument::parse(&text)
                    .needs_enrichment()
                    .then_some(target)
            })
            .collect();
        targets.sort();
        targets
    }
}
