//! Ignore-file evaluation for workspace scans.
//!
//! Two pattern files participate: the VCS ignore file (`.gitignore`) and the
//! project-specific one (`.kodaignore`). Both use gitignore semantics: blank
//! and `#` lines are skipped, a leading `/` anchors to the root, a trailing
//! `/` restricts to directories, `!` negates, and `*`/`?`/`[]` glob. The
//! pattern set is immutable for the session.

use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use tracing::warn;

use crate::config::constants::PROJECT_IGNORE_FILE;

#[derive(Debug, Clone)]
struct CompiledPattern {
    /// Matches the whole relative path.
    pattern: Pattern,
    /// For unanchored patterns, the bare body matched against basenames.
    basename_pattern: Option<Pattern>,
    negated: bool,
    anchored: bool,
    dir_only: bool,
}

impl CompiledPattern {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let (body, negated) = match line.strip_prefix('!') {
            Some(rest) => (rest, true),
            None => (line, false),
        };

        let (body, dir_only) = match body.strip_suffix('/') {
            Some(rest) => (rest, true),
            None => (body, false),
        };

        let (body, leading_slash) = match body.strip_prefix('/') {
            Some(rest) => (rest, true),
            None => (body, false),
        };
        if body.is_empty() {
            return None;
        }

        // A slash anywhere in the body anchors the pattern to the root.
        let anchored = leading_slash || body.contains('/');

        let glob_source = if anchored {
            body.to_string()
        } else {
            format!("**/{body}")
        };

        let compile = |source: &str| match Pattern::new(source) {
            Ok(pattern) => Some(pattern),
            Err(err) => {
                warn!("skipping invalid ignore pattern '{line}': {err}");
                None
            }
        };

        let pattern = compile(&glob_source)?;
        let basename_pattern = if anchored { None } else { compile(body) };
        Some(Self {
            pattern,
            basename_pattern,
            negated,
            anchored,
            dir_only,
        })
    }

    fn match_options() -> MatchOptions {
        MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        }
    }

    /// Does this pattern hit `rel` (a `/`-separated relative path)?
    /// `is_dir` marks whether `rel` itself names a directory.
    fn matches(&self, rel: &str, is_dir: bool) -> bool {
        let options = Self::match_options();

        // A pattern matching a directory ignores everything beneath it, so
        // every ancestor prefix is a candidate too.
        for (prefix, prefix_is_dir) in ancestor_prefixes(rel, is_dir) {
            if self.dir_only && !prefix_is_dir {
                continue;
            }
            if self.pattern.matches_with(prefix, options) {
                return true;
            }
            if let Some(basename_pattern) = &self.basename_pattern {
                if let Some(basename) = prefix.rsplit('/').next() {
                    if basename_pattern.matches_with(basename, options) {
                        return true;
                    }
                }
            }
        }
        false
    }
}

/// `rel` plus each proper ancestor, with a directory flag for each.
fn ancestor_prefixes(rel: &str, is_dir: bool) -> Vec<(&str, bool)> {
    let mut prefixes = Vec::new();
    for (idx, _) in rel.match_indices('/') {
        prefixes.push((&rel[..idx], true));
    }
    prefixes.push((rel, is_dir));
    prefixes
}

#[derive(Debug, Clone, Default)]
struct PatternFile {
    patterns: Vec<CompiledPattern>,
}

impl PatternFile {
    fn parse(content: &str) -> Self {
        Self {
            patterns: content.lines().filter_map(CompiledPattern::parse).collect(),
        }
    }

    /// Last matching pattern wins; negation can re-include.
    fn evaluate(&self, rel: &str, is_dir: bool) -> Option<bool> {
        let mut verdict = None;
        for pattern in &self.patterns {
            if pattern.matches(rel, is_dir) {
                verdict = Some(!pattern.negated);
            }
        }
        verdict
    }

    fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IgnoreOptions {
    pub respect_vcs: bool,
    pub respect_project: bool,
}

impl Default for IgnoreOptions {
    fn default() -> Self {
        Self {
            respect_vcs: true,
            respect_project: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IgnoreFilter {
    root: PathBuf,
    vcs: PatternFile,
    project: PatternFile,
}

impl IgnoreFilter {
    /// Load both pattern files from the workspace root. Missing files mean
    /// empty pattern sets, not errors.
    pub fn load(root: &Path) -> Self {
        let vcs = read_patterns(&root.join(".gitignore"));
        let project = read_patterns(&root.join(PROJECT_IGNORE_FILE));
        Self {
            root: root.to_path_buf(),
            vcs,
            project,
        }
    }

    pub fn from_contents(root: &Path, vcs: &str, project: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            vcs: PatternFile::parse(vcs),
            project: PatternFile::parse(project),
        }
    }

    pub fn has_patterns(&self) -> bool {
        !self.vcs.is_empty() || !self.project.is_empty()
    }

    pub fn should_ignore(&self, path: &Path, options: IgnoreOptions) -> bool {
        let rel = match path.strip_prefix(&self.root) {
            Ok(rel) => rel,
            Err(_) => path,
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        if rel.is_empty() {
            return false;
        }
        let is_dir = path.is_dir();

        let mut verdict = None;
        if options.respect_vcs {
            if let Some(v) = self.vcs.evaluate(&rel, is_dir) {
                verdict = Some(v);
            }
        }
        if options.respect_project {
            if let Some(v) = self.project.evaluate(&rel, is_dir) {
                verdict = Some(v);
            }
        }
        verdict.unwrap_or(false)
    }
}

fn read_patterns(path: &Path) -> PatternFile {
    match std::fs::read_to_string(path) {
        Ok(content) => PatternFile::parse(&content),
        Err(_) => PatternFile::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(vcs: &str, project: &str) -> IgnoreFilter {
        IgnoreFilter::from_contents(Path::new("/ws"), vcs, project)
    }

    fn ignored(f: &IgnoreFilter, rel: &str) -> bool {
        f.should_ignore(Path::new(rel), IgnoreOptions::default())
    }

    #[test]
    fn blank_and_comment_lines_skipped() {
        let f = filter("\n# comment\n\ntarget\n", "");
        assert!(ignored(&f, "target"));
        assert!(!ignored(&f, "# comment"));
    }

    #[test]
    fn unanchored_pattern_matches_any_level() {
        let f = filter("node_modules\n", "");
        assert!(ignored(&f, "node_modules"));
        assert!(ignored(&f, "pkg/a/node_modules"));
        assert!(ignored(&f, "pkg/node_modules/lib.js"));
    }

    #[test]
    fn leading_slash_anchors_to_root() {
        let f = filter("/build\n", "");
        assert!(ignored(&f, "build"));
        assert!(ignored(&f, "build/out.o"));
        assert!(!ignored(&f, "src/build"));
    }

    #[test]
    fn interior_slash_also_anchors() {
        let f = filter("docs/api\n", "");
        assert!(ignored(&f, "docs/api"));
        assert!(!ignored(&f, "other/docs/api"));
    }

    #[test]
    fn trailing_slash_is_directory_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("logs")).unwrap();
        std::fs::write(dir.path().join("logs.txt"), "x").unwrap();
        std::fs::write(dir.path().join("logs").join("a.log"), "x").unwrap();

        let f = IgnoreFilter::from_contents(dir.path(), "logs/\n", "");
        let opts = IgnoreOptions::default();
        assert!(f.should_ignore(&dir.path().join("logs"), opts));
        assert!(f.should_ignore(&dir.path().join("logs").join("a.log"), opts));
        assert!(!f.should_ignore(&dir.path().join("logs.txt"), opts));
    }

    #[test]
    fn negation_reincludes_last_match_wins() {
        let f = filter("*.log\n!keep.log\n", "");
        assert!(ignored(&f, "debug.log"));
        assert!(!ignored(&f, "keep.log"));
        assert!(!ignored(&f, "deep/keep.log"));
    }

    #[test]
    fn glob_classes_and_question_mark() {
        let f = filter("file?.txt\n*.tmp\nsrc/[ab].rs\n", "");
        assert!(ignored(&f, "file1.txt"));
        assert!(!ignored(&f, "file12.txt"));
        assert!(ignored(&f, "scratch.tmp"));
        assert!(ignored(&f, "src/a.rs"));
        assert!(!ignored(&f, "src/c.rs"));
    }

    #[test]
    fn options_select_pattern_files() {
        let f = filter("vcs_only\n", "project_only\n");
        let vcs_off = IgnoreOptions {
            respect_vcs: false,
            respect_project: true,
        };
        let project_off = IgnoreOptions {
            respect_vcs: true,
            respect_project: false,
        };
        assert!(!f.should_ignore(Path::new("vcs_only"), vcs_off));
        assert!(f.should_ignore(Path::new("project_only"), vcs_off));
        assert!(f.should_ignore(Path::new("vcs_only"), project_off));
        assert!(!f.should_ignore(Path::new("project_only"), project_off));
    }
}
