//! Pattern pairs and the pattern set
//!
//! A pattern pair says "outputs matching A go to inputs matching B". The
//! input side is a template: named capture groups from the output match are
//! substituted into `{name}` placeholders before it is compiled.
//!
//! Regex patterns match at the start of a name only, so `foo` matches
//! `foobar`. Literal patterns (exact mode without `/.../` delimiters) must
//! equal the name.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use regex::Regex;
use tracing::{debug, error, info, warn};

/// Named capture values from an output match. Absent groups are empty.
pub type Substitutions = HashMap<String, String>;

#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("Could not read pattern file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        source: regex::Error,
    },

    #[error("No pattern file configured")]
    NoPatternFile,
}

/// A compiled pattern: literal name or start-anchored regex.
#[derive(Debug, Clone)]
pub enum Matcher {
    Literal(String),
    Regex(Regex),
}

impl Matcher {
    /// Classify and compile `text`.
    ///
    /// With `exact` set, only `/.../` delimited text is a regex (delimiters
    /// stripped); everything else is literal. Without it, all text is regex.
    pub fn compile(text: &str, exact: bool) -> Result<Self, PatternError> {
        let source = if exact {
            match regex_source(text) {
                Some(source) => source,
                None => return Ok(Matcher::Literal(text.to_string())),
            }
        } else {
            text
        };

        Regex::new(&format!("^(?:{source})"))
            .map(Matcher::Regex)
            .map_err(|e| PatternError::InvalidRegex {
                pattern: text.to_string(),
                source: e,
            })
    }

    pub fn is_regex(&self) -> bool {
        matches!(self, Matcher::Regex(_))
    }

    pub fn is_match(&self, name: &str) -> bool {
        match self {
            Matcher::Literal(literal) => literal == name,
            Matcher::Regex(regex) => regex.is_match(name),
        }
    }

    /// Match `name` and collect named groups. Literal matches carry none.
    pub fn match_name(&self, name: &str) -> Option<Substitutions> {
        match self {
            Matcher::Literal(literal) => (literal == name).then(Substitutions::new),
            Matcher::Regex(regex) => {
                let caps = regex.captures(name)?;
                Some(
                    regex
                        .capture_names()
                        .flatten()
                        .map(|group| {
                            let value = caps.name(group).map_or("", |m| m.as_str());
                            (group.to_string(), value.to_string())
                        })
                        .collect(),
                )
            }
        }
    }
}

fn regex_source(text: &str) -> Option<&str> {
    text.strip_prefix('/')?.strip_suffix('/')
}

/// Fill `{name}` placeholders from `subs`; unknown names render empty.
///
/// `{{` and `}}` produce literal braces. Brace groups that are not a plain
/// identifier, such as the quantifier in `\d{2}`, are copied unchanged.
pub fn render_template(template: &str, subs: &Substitutions) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }

        if tail.starts_with('{') {
            if let Some(end) = tail.find('}') {
                let name = &tail[1..end];
                if is_identifier(name) {
                    out.push_str(subs.get(name).map_or("", String::as_str));
                    rest = &tail[end + 1..];
                    continue;
                }
            }
        }

        out.push_str(&tail[..1]);
        rest = &tail[1..];
    }

    out.push_str(rest);
    out
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// One output pattern and its input template.
#[derive(Debug, Clone)]
pub struct Pattern {
    output_text: String,
    output: Matcher,
    input_template: String,
}

impl Pattern {
    pub fn new(output_text: &str, input_template: &str, exact: bool) -> Result<Self, PatternError> {
        Ok(Self {
            output_text: output_text.to_string(),
            output: Matcher::compile(output_text, exact)?,
            input_template: input_template.to_string(),
        })
    }

    pub fn output_text(&self) -> &str {
        &self.output_text
    }

    pub fn input_template(&self) -> &str {
        &self.input_template
    }

    pub fn output(&self) -> &Matcher {
        &self.output
    }

    /// The input pattern text for one output match. Literal output patterns
    /// leave the template untouched.
    pub fn render_input(&self, subs: &Substitutions) -> String {
        if self.output.is_regex() {
            render_template(&self.input_template, subs)
        } else {
            self.input_template.clone()
        }
    }
}

/// Ordered, duplicate-free list of pattern pairs.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
    exact: bool,
}

impl PatternSet {
    pub fn new(exact: bool) -> Self {
        Self {
            patterns: Vec::new(),
            exact,
        }
    }

    /// Build a set from a pattern file.
    pub fn from_file(path: &Path, exact: bool) -> Result<Self, PatternError> {
        let mut set = Self::new(exact);
        set.load_from_file(path)?;
        Ok(set)
    }

    pub fn exact(&self) -> bool {
        self.exact
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pattern> {
        self.patterns.iter()
    }

    /// Add a pair. Invalid output patterns are logged and skipped, exact
    /// duplicates are skipped silently. Returns whether the pair was added.
    pub fn add(&mut self, output_text: &str, input_template: &str) -> bool {
        if self
            .patterns
            .iter()
            .any(|p| p.output_text == output_text && p.input_template == input_template)
        {
            return false;
        }

        match Pattern::new(output_text, input_template, self.exact) {
            Ok(pattern) => {
                debug!("Added patterns: '{}' --> '{}'", output_text, input_template);
                self.patterns.push(pattern);
                true
            }
            Err(e) => {
                error!("Error in output port pattern: {}", e);
                false
            }
        }
    }

    /// Add consecutive pairs from `patterns`. A trailing unpaired entry is
    /// dropped with a warning.
    pub fn add_pairs<S: AsRef<str>>(&mut self, patterns: &[S]) -> usize {
        let mut chunks = patterns.chunks_exact(2);
        let added = chunks
            .by_ref()
            .filter(|pair| self.add(pair[0].as_ref(), pair[1].as_ref()))
            .count();

        if let [dangling] = chunks.remainder() {
            warn!(
                "Ignoring output pattern '{}' without an input pattern",
                dangling.as_ref()
            );
        }
        added
    }

    /// Append pairs read from `path`: trimmed lines, blanks and `#` comments
    /// skipped, remaining lines taken two at a time.
    pub fn load_from_file(&mut self, path: &Path) -> Result<usize, PatternError> {
        let contents = std::fs::read_to_string(path).map_err(|e| PatternError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let lines: Vec<&str> = pattern_lines(&contents).collect();
        let added = self.add_pairs(&lines);
        debug!("Loaded {} pattern pairs from {}", added, path.display());
        Ok(added)
    }
}

fn pattern_lines(contents: &str) -> impl Iterator<Item = &str> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Shared, atomically replaceable pattern set.
///
/// Readers take a snapshot per reconcile pass, so a reload never exposes a
/// half-built set.
#[derive(Clone)]
pub struct PatternStore {
    current: Arc<ArcSwap<PatternSet>>,
    pattern_file: Option<PathBuf>,
}

impl PatternStore {
    pub fn new(set: PatternSet, pattern_file: Option<PathBuf>) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(set)),
            pattern_file,
        }
    }

    pub fn snapshot(&self) -> Arc<PatternSet> {
        self.current.load_full()
    }

    pub fn pattern_file(&self) -> Option<&Path> {
        self.pattern_file.as_deref()
    }

    pub fn replace(&self, set: PatternSet) {
        self.current.store(Arc::new(set));
    }

    /// Re-read the pattern file into a fresh set and swap it in. On failure
    /// the current set stays in place.
    pub fn reload(&self) -> Result<usize, PatternError> {
        let path = self.pattern_file.as_deref().ok_or(PatternError::NoPatternFile)?;
        let exact = self.current.load().exact();

        let set = PatternSet::from_file(path, exact)?;
        let count = set.len();
        self.replace(set);

        info!("Re-read {} pattern pairs from {}", count, path.display());
        Ok(count)
    }
}
