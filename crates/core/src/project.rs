//! Project context: the rules and structural summary that feed the system prompt.
//!
//! Rules loading follows a small layered hierarchy:
//!
//! 1. **Project rules**: `.codeclaw/RULES.md` (path configurable)
//! 2. **Context files**: any `.md`/`.txt` file in `.codeclaw/context/`, sorted
//!
//! Each file is optional. Missing files are silently skipped.
//!
//! The project summary (language, file counts, top-level layout) comes from a
//! [`ProjectContext`] collaborator. [`ScannedProject`] is a shallow directory
//! scan good enough for the CLI.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directories never counted in a project scan.
const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules", ".codeclaw", "vendor", "dist", "build"];

/// Structural digest of the project under the agent's root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub root: String,
    /// Dominant language by file count
    pub language: String,
    pub file_count: usize,
    /// Extension → count
    pub files_by_extension: BTreeMap<String, usize>,
    /// Top-level entries, directories suffixed with `/`
    pub structure: Vec<String>,
}

impl ProjectSummary {
    /// Render the summary as a prompt section.
    pub fn render(&self) -> String {
        if self.file_count == 0 && self.structure.is_empty() {
            return String::new();
        }
        let mut out = format!(
            "Root: {}\nLanguage: {}\nFiles: {}\n",
            self.root, self.language, self.file_count
        );
        if !self.files_by_extension.is_empty() {
            let mut by_count: Vec<_> = self.files_by_extension.iter().collect();
            by_count.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
            let parts: Vec<String> = by_count
                .iter()
                .take(8)
                .map(|(ext, n)| format!(".{ext}: {n}"))
                .collect();
            out.push_str(&format!("Breakdown: {}\n", parts.join(", ")));
        }
        if !self.structure.is_empty() {
            out.push_str(&format!("Layout: {}\n", self.structure.join(" ")));
        }
        out
    }
}

/// Supplies the project summary. Implemented outside the core by whatever
/// knows the project best.
pub trait ProjectContext: Send + Sync {
    fn summary(&self) -> ProjectSummary;
}

/// Shallow scan of a project root (depth-limited, skips build output).
#[derive(Debug, Clone)]
pub struct ScannedProject {
    root: PathBuf,
    max_depth: usize,
}

impl ScannedProject {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_depth: 4,
        }
    }

    fn walk(&self, dir: &Path, depth: usize, counts: &mut BTreeMap<String, usize>, total: &mut usize) {
        if depth > self.max_depth {
            return;
        }
        let entries = match std::fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to scan project directory");
                return;
            }
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if path.is_dir() {
                if !SKIP_DIRS.contains(&name.as_str()) {
                    self.walk(&path, depth + 1, counts, total);
                }
            } else {
                *total += 1;
                if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                    *counts.entry(ext.to_lowercase()).or_default() += 1;
                }
            }
        }
    }
}

impl ProjectContext for ScannedProject {
    fn summary(&self) -> ProjectSummary {
        let mut files_by_extension = BTreeMap::new();
        let mut file_count = 0;
        self.walk(&self.root, 0, &mut files_by_extension, &mut file_count);

        let mut structure: Vec<String> = std::fs::read_dir(&self.root)
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .filter_map(|e| {
                        let name = e.file_name().to_string_lossy().to_string();
                        if name.starts_with('.') {
                            return None;
                        }
                        Some(if e.path().is_dir() { format!("{name}/") } else { name })
                    })
                    .collect()
            })
            .unwrap_or_default();
        structure.sort();

        ProjectSummary {
            root: self.root.display().to_string(),
            language: detect_language(&files_by_extension),
            file_count,
            files_by_extension,
            structure,
        }
    }
}

fn detect_language(counts: &BTreeMap<String, usize>) -> String {
    const LANGS: &[(&str, &str)] = &[
        ("rs", "Rust"),
        ("go", "Go"),
        ("py", "Python"),
        ("ts", "TypeScript"),
        ("tsx", "TypeScript"),
        ("js", "JavaScript"),
        ("java", "Java"),
        ("kt", "Kotlin"),
        ("c", "C"),
        ("cpp", "C++"),
        ("rb", "Ruby"),
        ("cs", "C#"),
        ("swift", "Swift"),
    ];
    let mut totals: BTreeMap<&str, usize> = BTreeMap::new();
    for (ext, lang) in LANGS {
        if let Some(n) = counts.get(*ext) {
            *totals.entry(lang).or_default() += n;
        }
    }
    totals
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(a.0)))
        .map(|(lang, _)| lang.to_string())
        .unwrap_or_else(|| "unknown".into())
}

/// Load project rules from `rules_file` plus `<rules dir>/context/*.{md,txt}`.
///
/// Returns an empty string when nothing is found.
pub fn load_rules(rules_file: &Path) -> String {
    let mut sections = Vec::new();

    if let Some(content) = read_nonempty(rules_file) {
        debug!(file = %rules_file.display(), "Loaded rules file");
        sections.push(content.trim().to_string());
    }

    let context_dir = rules_file
        .parent()
        .map(|p| p.join("context"))
        .unwrap_or_else(|| PathBuf::from("context"));
    if context_dir.is_dir() {
        let mut entries: Vec<PathBuf> = match std::fs::read_dir(&context_dir) {
            Ok(rd) => rd
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.extension()
                        .and_then(|ext| ext.to_str())
                        .is_some_and(|ext| ext == "md" || ext == "txt")
                })
                .collect(),
            Err(e) => {
                warn!(dir = %context_dir.display(), error = %e, "Failed to read context directory");
                Vec::new()
            }
        };
        entries.sort();
        for path in entries {
            if let Some(content) = read_nonempty(&path) {
                debug!(file = %path.display(), "Loaded context file");
                sections.push(content.trim().to_string());
            }
        }
    }

    sections.join("\n\n")
}

fn read_nonempty(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .filter(|c| !c.trim().is_empty())
}
