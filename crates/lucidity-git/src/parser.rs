//! Unified diff parsing.
//!
//! The parser is a small state machine fed one line at a time:
//!
//! ```text
//! SeekingFileHeader --diff --git--> FileHeader --@@--> InHunk
//!                                       ^                 | counts exhausted
//!                                       |                 v
//!                      Skipping <--- (binary,        BetweenHunks --@@--> InHunk
//!                                     bad @@)
//! ```
//!
//! A `diff --git` line closes whatever file is open and starts a new one from
//! any state. Malformed input never aborts the parse; the affected file is
//! flagged and parsing resumes at the next file header.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::language::detect_language;

lazy_static! {
    static ref HUNK_HEADER: Regex =
        Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@(?: ?(.*))?$").unwrap();
}

/// How a file changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    Renamed,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeType::Added => write!(f, "added"),
            ChangeType::Modified => write!(f, "modified"),
            ChangeType::Deleted => write!(f, "deleted"),
            ChangeType::Renamed => write!(f, "renamed"),
        }
    }
}

/// Marker of a hunk body line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Context,
    Added,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    pub kind: LineKind,
    pub text: String,
}

/// One `@@ -a,b +c,d @@` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub original_start: u32,
    pub original_count: u32,
    pub modified_start: u32,
    pub modified_count: u32,
    /// Function or section heading git prints after the second `@@`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub lines: Vec<DiffLine>,
}

impl Hunk {
    pub fn insertions(&self) -> usize {
        self.lines.iter().filter(|l| l.kind == LineKind::Added).count()
    }

    pub fn deletions(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| l.kind == LineKind::Removed)
            .count()
    }
}

/// Where `original_text` and `modified_text` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    /// Rebuilt from hunk lines; only covers the changed regions
    HunkContext,
    /// Read in full from git objects or the working tree
    Snapshot,
}

/// A non-fatal problem found while parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseWarning {
    /// 1-based line in the raw diff
    pub line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub message: String,
}

/// All changes to one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    /// Path before a rename or copy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    pub change_type: ChangeType,
    pub hunks: Vec<Hunk>,
    pub original_text: String,
    pub modified_text: String,
    pub text_source: TextSource,
    pub detected_language: String,
    pub is_binary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<u8>,
    /// Set when this file's section of the diff was malformed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<ParseWarning>,
    /// This file's section of the diff, verbatim from `diff --git` on
    #[serde(default)]
    pub raw_diff: String,
}

impl FileDiff {
    pub fn insertions(&self) -> usize {
        self.hunks.iter().map(Hunk::insertions).sum()
    }

    pub fn deletions(&self) -> usize {
        self.hunks.iter().map(Hunk::deletions).sum()
    }

    pub fn changed_lines(&self) -> usize {
        self.insertions() + self.deletions()
    }

    /// Path to read the pre-image from.
    pub fn original_path(&self) -> &str {
        self.old_path.as_deref().unwrap_or(&self.path)
    }
}

/// The parsed result of one diff invocation, in the order git printed it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitChangeSet {
    pub files: Vec<FileDiff>,
    /// Problems not tied to a single file
    pub warnings: Vec<ParseWarning>,
}

impl GitChangeSet {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Set-level warnings followed by per-file diagnostics.
    pub fn all_warnings(&self) -> Vec<ParseWarning> {
        self.warnings
            .iter()
            .chain(self.files.iter().filter_map(|f| f.diagnostic.as_ref()))
            .cloned()
            .collect()
    }
}

/// Rebuild the pre- and post-image of the changed regions from hunk lines.
pub fn reconstruct_from_hunks(hunks: &[Hunk]) -> (String, String) {
    let mut original = String::new();
    let mut modified = String::new();

    for line in hunks.iter().flat_map(|h| h.lines.iter()) {
        match line.kind {
            LineKind::Context => {
                original.push_str(&line.text);
                original.push('\n');
                modified.push_str(&line.text);
                modified.push('\n');
            }
            LineKind::Removed => {
                original.push_str(&line.text);
                original.push('\n');
            }
            LineKind::Added => {
                modified.push_str(&line.text);
                modified.push('\n');
            }
        }
    }

    (original, modified)
}

/// Parse raw `git diff` output.
pub fn parse_unified_diff(input: &str) -> GitChangeSet {
    let mut parser = DiffParser::default();
    let body = input.strip_suffix('\n').unwrap_or(input);
    if !body.is_empty() {
        for (idx, line) in body.split('\n').enumerate() {
            parser.feed(idx + 1, line);
        }
    }
    parser.finish()
}

#[derive(Debug)]
struct FileAccumulator {
    header_old: Option<String>,
    header_new: Option<String>,
    old_path: Option<String>,
    new_path: Option<String>,
    added: bool,
    deleted: bool,
    renamed: bool,
    copied: bool,
    is_binary: bool,
    similarity: Option<u8>,
    hunks: Vec<Hunk>,
    diagnostic: Option<ParseWarning>,
    raw: String,
}

impl FileAccumulator {
    fn from_git_header(line: &str, rest: &str) -> Self {
        let (header_old, header_new) = match split_header_paths(rest) {
            Some((old, new)) => (Some(strip_prefix(&old, "a/")), Some(strip_prefix(&new, "b/"))),
            None => (None, None),
        };
        Self {
            header_old,
            header_new,
            old_path: None,
            new_path: None,
            added: false,
            deleted: false,
            renamed: false,
            copied: false,
            is_binary: false,
            similarity: None,
            hunks: Vec::new(),
            diagnostic: None,
            raw: format!("{}\n", line),
        }
    }

    fn push_raw(&mut self, line: &str) {
        self.raw.push_str(line);
        self.raw.push('\n');
    }

    fn display_path(&self) -> Option<String> {
        self.new_path
            .clone()
            .or_else(|| self.header_new.clone())
            .or_else(|| self.old_path.clone())
            .or_else(|| self.header_old.clone())
    }

    fn flag(&mut self, line: usize, message: impl Into<String>) {
        let warning = ParseWarning {
            line,
            path: self.display_path(),
            message: message.into(),
        };
        warn!(line, path = ?warning.path, message = %warning.message, "Malformed diff section");
        // Keep the first problem; later ones are usually fallout from it.
        if self.diagnostic.is_none() {
            self.diagnostic = Some(warning);
        }
    }

    /// Record a malformed section: drop what was parsed so far.
    fn mark_malformed(&mut self, line: usize, message: impl Into<String>) {
        self.flag(line, message);
        self.hunks.clear();
    }

    fn finish(self) -> FileDiff {
        let old = self.old_path.or(self.header_old);
        let new = self.new_path.or(self.header_new);

        let change_type = if self.renamed {
            ChangeType::Renamed
        } else if self.deleted {
            ChangeType::Deleted
        } else if self.added || self.copied {
            ChangeType::Added
        } else {
            ChangeType::Modified
        };

        let path = match change_type {
            ChangeType::Deleted => old.clone().or(new.clone()),
            _ => new.clone().or(old.clone()),
        }
        .unwrap_or_default();

        let old_path = match (&old, self.renamed || self.copied) {
            (Some(old), true) if *old != path => Some(old.clone()),
            _ => None,
        };

        let (original_text, modified_text) = if self.is_binary {
            (String::new(), String::new())
        } else {
            reconstruct_from_hunks(&self.hunks)
        };

        let detected_language = detect_language(&path, None).to_string();

        FileDiff {
            path,
            old_path,
            change_type,
            hunks: self.hunks,
            original_text,
            modified_text,
            text_source: TextSource::HunkContext,
            detected_language,
            is_binary: self.is_binary,
            similarity: self.similarity,
            diagnostic: self.diagnostic,
            raw_diff: self.raw,
        }
    }
}

#[derive(Debug)]
struct HunkAccumulator {
    hunk: Hunk,
    original_remaining: u32,
    modified_remaining: u32,
}

impl HunkAccumulator {
    fn is_complete(&self) -> bool {
        self.original_remaining == 0 && self.modified_remaining == 0
    }
}

#[derive(Debug, Default)]
enum State {
    #[default]
    SeekingFileHeader,
    FileHeader(FileAccumulator),
    InHunk(FileAccumulator, HunkAccumulator),
    BetweenHunks(FileAccumulator),
    /// Binary or malformed file: ignore lines until the next file header
    Skipping(FileAccumulator),
}

impl State {
    fn file_mut(&mut self) -> Option<&mut FileAccumulator> {
        match self {
            State::SeekingFileHeader => None,
            State::FileHeader(file)
            | State::InHunk(file, _)
            | State::BetweenHunks(file)
            | State::Skipping(file) => Some(file),
        }
    }
}

#[derive(Debug, Default)]
struct DiffParser {
    state: State,
    files: Vec<FileDiff>,
    warnings: Vec<ParseWarning>,
    orphan_reported: bool,
    last_line: usize,
}

impl DiffParser {
    fn feed(&mut self, line_no: usize, line: &str) {
        self.last_line = line_no;
        let mut state = std::mem::take(&mut self.state);

        if let Some(rest) = line.strip_prefix("diff --git ") {
            self.close(state, line_no);
            self.orphan_reported = false;
            self.state = State::FileHeader(FileAccumulator::from_git_header(line, rest));
            return;
        }
        if let Some(file) = state.file_mut() {
            file.push_raw(line);
        }

        self.state = match state {
            State::SeekingFileHeader => {
                self.seeking_line(line_no, line);
                State::SeekingFileHeader
            }
            State::FileHeader(file) => self.header_line(line_no, line, file),
            State::InHunk(file, hunk) => self.hunk_line(line_no, line, file, hunk),
            State::BetweenHunks(file) => self.between_hunks_line(line_no, line, file),
            State::Skipping(file) => State::Skipping(file),
        };
    }

    fn seeking_line(&mut self, line_no: usize, line: &str) {
        let looks_like_hunk = line.starts_with("@@")
            || line.starts_with('+')
            || line.starts_with('-')
            || line.starts_with(' ');
        if looks_like_hunk && !self.orphan_reported {
            let warning = ParseWarning {
                line: line_no,
                path: None,
                message: "diff content before any file header".to_string(),
            };
            warn!(line = line_no, "Diff content before any file header");
            self.warnings.push(warning);
            self.orphan_reported = true;
        }
    }

    fn header_line(&mut self, line_no: usize, line: &str, mut file: FileAccumulator) -> State {
        if line.starts_with("@@") {
            return self.start_hunk(line_no, line, file);
        }

        if line.starts_with("new file mode") {
            file.added = true;
        } else if line.starts_with("deleted file mode") {
            file.deleted = true;
        } else if let Some(from) = line.strip_prefix("rename from ") {
            file.renamed = true;
            file.old_path = Some(unquote(from));
        } else if let Some(to) = line.strip_prefix("rename to ") {
            file.renamed = true;
            file.new_path = Some(unquote(to));
        } else if let Some(from) = line.strip_prefix("copy from ") {
            file.copied = true;
            file.old_path = Some(unquote(from));
        } else if let Some(to) = line.strip_prefix("copy to ") {
            file.copied = true;
            file.new_path = Some(unquote(to));
        } else if let Some(pct) = line.strip_prefix("similarity index ") {
            file.similarity = pct.trim_end_matches('%').parse().ok();
        } else if let Some(old) = line.strip_prefix("--- ") {
            match marker_path(old, "a/") {
                Some(path) => file.old_path = file.old_path.take().or(Some(path)),
                None => file.added = true,
            }
        } else if let Some(new) = line.strip_prefix("+++ ") {
            match marker_path(new, "b/") {
                Some(path) => file.new_path = file.new_path.take().or(Some(path)),
                None => file.deleted = true,
            }
        } else if line.starts_with("Binary files ") || line.starts_with("GIT binary patch") {
            file.is_binary = true;
            trace!(path = ?file.display_path(), "Binary file, skipping hunks");
            return State::Skipping(file);
        }
        // index, mode and other extended header lines carry nothing we keep

        State::FileHeader(file)
    }

    fn start_hunk(&mut self, line_no: usize, line: &str, mut file: FileAccumulator) -> State {
        match parse_hunk_header(line) {
            Some(hunk) => {
                let acc = HunkAccumulator {
                    original_remaining: hunk.original_count,
                    modified_remaining: hunk.modified_count,
                    hunk,
                };
                if acc.is_complete() {
                    file.hunks.push(acc.hunk);
                    State::BetweenHunks(file)
                } else {
                    State::InHunk(file, acc)
                }
            }
            None => {
                file.mark_malformed(line_no, format!("unparseable hunk header: {}", line));
                State::Skipping(file)
            }
        }
    }

    fn hunk_line(
        &mut self,
        line_no: usize,
        line: &str,
        mut file: FileAccumulator,
        mut acc: HunkAccumulator,
    ) -> State {
        if line.starts_with("@@") {
            file.flag(line_no, "hunk ended before its line counts were reached");
            file.hunks.push(acc.hunk);
            return self.start_hunk(line_no, line, file);
        }

        // Some tools strip the single space from empty context lines
        let (kind, text) = match line.chars().next() {
            Some(' ') => (LineKind::Context, &line[1..]),
            Some('+') => (LineKind::Added, &line[1..]),
            Some('-') => (LineKind::Removed, &line[1..]),
            Some('\\') => return State::InHunk(file, acc),
            None => (LineKind::Context, ""),
            Some(_) => {
                file.mark_malformed(line_no, format!("unexpected line inside hunk: {}", line));
                return State::Skipping(file);
            }
        };

        let counters_ok = match kind {
            LineKind::Context => acc.original_remaining > 0 && acc.modified_remaining > 0,
            LineKind::Added => acc.modified_remaining > 0,
            LineKind::Removed => acc.original_remaining > 0,
        };
        if !counters_ok {
            file.mark_malformed(line_no, "hunk has more lines than its header declares");
            return State::Skipping(file);
        }

        match kind {
            LineKind::Context => {
                acc.original_remaining -= 1;
                acc.modified_remaining -= 1;
            }
            LineKind::Added => acc.modified_remaining -= 1,
            LineKind::Removed => acc.original_remaining -= 1,
        }
        acc.hunk.lines.push(DiffLine {
            kind,
            text: text.to_string(),
        });

        if acc.is_complete() {
            file.hunks.push(acc.hunk);
            State::BetweenHunks(file)
        } else {
            State::InHunk(file, acc)
        }
    }

    fn between_hunks_line(&mut self, line_no: usize, line: &str, file: FileAccumulator) -> State {
        if line.starts_with("@@") {
            return self.start_hunk(line_no, line, file);
        }
        if !line.is_empty() && !line.starts_with('\\') {
            trace!(line = line_no, "Ignoring stray line between hunks");
        }
        State::BetweenHunks(file)
    }

    fn close(&mut self, state: State, line_no: usize) {
        let file = match state {
            State::SeekingFileHeader => return,
            State::FileHeader(file) | State::BetweenHunks(file) | State::Skipping(file) => file,
            State::InHunk(mut file, acc) => {
                file.flag(line_no, "hunk ended before its line counts were reached");
                file.hunks.push(acc.hunk);
                file
            }
        };
        self.files.push(file.finish());
    }

    fn finish(mut self) -> GitChangeSet {
        let state = std::mem::take(&mut self.state);
        self.close(state, self.last_line);
        GitChangeSet {
            files: self.files,
            warnings: self.warnings,
        }
    }
}

fn parse_hunk_header(line: &str) -> Option<Hunk> {
    let caps = HUNK_HEADER.captures(line)?;
    let number = |idx: usize, default: u32| -> Option<u32> {
        match caps.get(idx) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(default),
        }
    };

    Some(Hunk {
        original_start: number(1, 0)?,
        original_count: number(2, 1)?,
        modified_start: number(3, 0)?,
        modified_count: number(4, 1)?,
        section: caps
            .get(5)
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty()),
        lines: Vec::new(),
    })
}

/// Path from a `---`/`+++` line, or `None` for `/dev/null`.
fn marker_path(value: &str, prefix: &str) -> Option<String> {
    // GNU diff appends a tab and timestamp
    let value = value.split('\t').next().unwrap_or(value);
    if value == "/dev/null" {
        return None;
    }
    Some(strip_prefix(&unquote(value), prefix))
}

fn strip_prefix(path: &str, prefix: &str) -> String {
    path.strip_prefix(prefix).unwrap_or(path).to_string()
}

/// Split the `a/... b/...` part of a `diff --git` line.
fn split_header_paths(rest: &str) -> Option<(String, String)> {
    if rest.starts_with('"') {
        let end = closing_quote(rest)?;
        let first = unquote(&rest[..=end]);
        let second = rest[end + 1..].strip_prefix(' ')?;
        return Some((first, unquote(second)));
    }

    // Unquoted paths may contain spaces. Without a rename both halves name
    // the same file, so try the symmetric split first.
    let bytes = rest.as_bytes();
    if bytes.len() % 2 == 1 {
        let mid = bytes.len() / 2;
        if bytes[mid] == b' ' {
            let (left, right) = (&rest[..mid], &rest[mid + 1..]);
            if left.get(2..) == right.get(2..) {
                return Some((left.to_string(), right.to_string()));
            }
        }
    }

    if let Some(idx) = rest.find(" \"") {
        return Some((rest[..idx].to_string(), unquote(&rest[idx + 1..])));
    }
    rest.find(" b/")
        .map(|idx| (rest[..idx].to_string(), rest[idx + 1..].to_string()))
}

fn closing_quote(quoted: &str) -> Option<usize> {
    let mut escaped = false;
    for (idx, ch) in quoted.char_indices().skip(1) {
        match ch {
            '\\' if !escaped => escaped = true,
            '"' if !escaped => return Some(idx),
            _ => escaped = false,
        }
    }
    None
}

/// Undo git's C-style path quoting (`"dir/with\ttab"`, octal UTF-8 bytes).
pub fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    else {
        return value.to_string();
    };

    let mut bytes = Vec::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('n') => bytes.push(b'\n'),
            Some('t') => bytes.push(b'\t'),
            Some('r') => bytes.push(b'\r'),
            Some('a') => bytes.push(0x07),
            Some('b') => bytes.push(0x08),
            Some('f') => bytes.push(0x0c),
            Some('v') => bytes.push(0x0b),
            Some(d @ '0'..='7') => {
                let mut value = d.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(digit) => {
                            value = value * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                bytes.push((value & 0xff) as u8);
            }
            Some(other) => {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
            None => bytes.push(b'\\'),
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
