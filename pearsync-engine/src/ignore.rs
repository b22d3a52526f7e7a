//! Ignore patterns for the workspace tree
//!
//! A reduced matcher: `*` is the only wildcard, patterns match both
//! path components and basenames, and a trailing `/` restricts a
//! pattern to directories. A `.pearsyncignore` file at the workspace
//! root augments the built-in defaults.

use std::path::Path;

/// Patterns every workspace ignores.
pub const DEFAULT_PATTERNS: &[&str] = &[
    "node_modules",
    ".git",
    ".DS_Store",
    "Thumbs.db",
    "*.swp",
    "*.swo",
    "*~",
    ".env",
    ".env.local",
    ".pearsyncignore",
];

/// The file that augments the defaults.
pub const IGNORE_FILE: &str = ".pearsyncignore";

#[derive(Debug, Clone)]
enum Pattern {
    /// Matches any component or basename.
    Name(String),
    /// Trailing-slash pattern: matches directory components only.
    Dir(String),
}

/// An immutable ignore list, fixed at engine init.
#[derive(Debug, Clone)]
pub struct IgnoreList {
    patterns: Vec<Pattern>,
}

impl IgnoreList {
    /// Defaults only.
    pub fn defaults() -> Self {
        Self::from_lines(DEFAULT_PATTERNS.iter().copied())
    }

    /// Defaults plus the workspace's `.pearsyncignore`, if present.
    pub fn load(workspace_root: &Path) -> Self {
        let mut list = Self::defaults();
        if let Ok(contents) = std::fs::read_to_string(workspace_root.join(IGNORE_FILE)) {
            list.extend(contents.lines());
        }
        list
    }

    fn from_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Self {
        let mut list = Self {
            patterns: Vec::new(),
        };
        list.extend(lines);
        list
    }

    fn extend<'a>(&mut self, lines: impl IntoIterator<Item = &'a str>) {
        for line in lines {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(dir) = line.strip_suffix('/') {
                self.patterns.push(Pattern::Dir(dir.to_string()));
            } else {
                self.patterns.push(Pattern::Name(line.to_string()));
            }
        }
    }

    /// Whether a relative file path is ignored. Every path component is
    /// tested; directory patterns match non-final components.
    pub fn is_ignored(&self, rel_path: &str) -> bool {
        let components: Vec<&str> = rel_path.split('/').filter(|c| !c.is_empty()).collect();
        let last = components.len().saturating_sub(1);
        for (i, component) in components.iter().enumerate() {
            for pattern in &self.patterns {
                match pattern {
                    Pattern::Name(p) => {
                        if wildcard_match(p, component) {
                            return true;
                        }
                    }
                    Pattern::Dir(p) => {
                        if i < last && wildcard_match(p, component) {
                            return true;
                        }
                    }
                }
            }
        }
        false
    }

    /// Whether a directory component should be pruned during a walk.
    /// Directory patterns apply here even in final position.
    pub fn is_ignored_dir(&self, rel_path: &str) -> bool {
        if self.is_ignored(rel_path) {
            return true;
        }
        let Some(name) = rel_path.split('/').filter(|c| !c.is_empty()).next_back() else {
            return false;
        };
        self.patterns.iter().any(|pattern| match pattern {
            Pattern::Dir(p) => wildcard_match(p, name),
            Pattern::Name(_) => false,
        })
    }
}

/// Glob with `*` as the only special character.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    // Iterative star-backtracking matcher.
    let (mut pi, mut ti) = (0usize, 0usize);
    let (mut star, mut star_ti) = (None::<usize>, 0usize);

    while ti < t.len() {
        if pi < p.len() && (p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            star_ti = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            star_ti += 1;
            ti = star_ti;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
