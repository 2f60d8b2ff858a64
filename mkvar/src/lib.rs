#![doc = include_str!("../README.md")]
#![deny(missing_docs)]

use std::borrow::{Borrow, Cow};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use tracing::{debug, trace};

///////////////////////////////////////////// constants ////////////////////////////////////////////

/// Characters that may sit between a variable's name and the `=` of its assignment.
const ASSIGNMENT_MODIFIERS: &[char] = &['*', ':', '+', '!', '?'];

/////////////////////////////////////////////// Error //////////////////////////////////////////////

/// The Error type.  Only loading a document can fail; expansion itself never does.
#[derive(Debug)]
pub enum Error {
    /// An error from the standard library.
    IoError(std::io::Error),
    /// The document is not valid UTF-8.
    FromUtf8Error(std::string::FromUtf8Error),
    /// The invocation failed.
    InvalidInvocation {
        /// The reason the invocation failed.
        message: String,
    },
}

impl Error {
    /// Construct a new "InvalidInvocation" variant.
    pub fn invalid_invocation(message: impl AsRef<str>) -> Self {
        Self::InvalidInvocation {
            message: message.as_ref().to_string(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err)
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Self::FromUtf8Error(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "IO error: {}", err),
            Error::FromUtf8Error(err) => write!(f, "UTF-8 conversion error: {}", err),
            Error::InvalidInvocation { message } => write!(f, "Invalid invocation: {}", message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            Error::FromUtf8Error(err) => Some(err),
            Error::InvalidInvocation { .. } => None,
        }
    }
}

///////////////////////////////////////// VariableProvider /////////////////////////////////////////

/// A VariableProvider provides a way to lookup the value of a variable.
///
/// It is expected that the provider do no expansion of its own.  The value returned is the raw
/// text of the definition, references and all.
pub trait VariableProvider {
    /// Return the raw value of `ident`, or None if the provider does not define it.
    fn lookup(&self, ident: &str) -> Option<String>;
}

impl VariableProvider for () {
    fn lookup(&self, _: &str) -> Option<String> {
        None
    }
}

impl<K: Borrow<str> + Eq + Hash, V: AsRef<str>> VariableProvider for HashMap<K, V> {
    fn lookup(&self, ident: &str) -> Option<String> {
        self.get(ident).map(|s| s.as_ref().to_string())
    }
}

impl<T: VariableProvider + ?Sized> VariableProvider for &T {
    fn lookup(&self, ident: &str) -> Option<String> {
        (**self).lookup(ident)
    }
}

/// A pair of providers consults the first and falls back to the second.
impl<A: VariableProvider, B: VariableProvider> VariableProvider for (A, B) {
    fn lookup(&self, ident: &str) -> Option<String> {
        self.0.lookup(ident).or_else(|| self.1.lookup(ident))
    }
}

///////////////////////////////////////////// Document /////////////////////////////////////////////

/// A Document is a point-in-time snapshot of a makefile.  Its variables are the assignments it
/// contains.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Document<'a> {
    text: Cow<'a, str>,
}

impl<'a> Document<'a> {
    /// Create a new document that borrows the provided text.
    pub const fn new(text: &'a str) -> Self {
        Self {
            text: Cow::Borrowed(text),
        }
    }

    /// Read the document at `path`.  The contents are read once; later changes to the file are
    /// not observed.
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Document<'static>, Error> {
        let bytes = std::fs::read(path)?;
        Ok(Document {
            text: Cow::Owned(String::from_utf8(bytes)?),
        })
    }

    /// Convert the document into an owned document.
    pub fn into_owned(self) -> Document<'static> {
        Document {
            text: Cow::Owned(self.text.into_owned()),
        }
    }

    /// The text of the document.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The raw value of the last assignment to `name`.  See [find].
    pub fn find(&self, name: &str) -> Option<String> {
        find(&self.text, name)
    }

    /// Every name assigned in the document, in order of first assignment.
    pub fn definitions(&self) -> Vec<String> {
        let lines = physical_lines(&self.text);
        let mut seen = HashSet::new();
        let mut names = vec![];
        for (idx, (_, line)) in lines.iter().enumerate() {
            if idx > 0 && lines[idx - 1].1.ends_with('\\') {
                continue;
            }
            let name = &line[..variable_name_len(line)];
            if !name.is_empty()
                && assignment_value_offset(line, name).is_some()
                && seen.insert(name)
            {
                names.push(name.to_string());
            }
        }
        names
    }
}

impl From<String> for Document<'static> {
    fn from(text: String) -> Self {
        Self {
            text: Cow::Owned(text),
        }
    }
}

impl VariableProvider for Document<'_> {
    fn lookup(&self, ident: &str) -> Option<String> {
        self.find(ident)
    }
}

/// Find the raw value of the last assignment to `name` in `document`.
///
/// An assignment is a line that starts with `name`, optionally followed by spaces or tabs and a
/// run of the modifier characters `*:+!?`, and then `=`.  Whitespace after the `=` is skipped and
/// the value runs to the end of the line, continuing onto the next line for as long as lines end
/// with a backslash.  Lines that are themselves continuations are never assignments.
///
/// Backslash-newline pairs are removed from the value.  Nothing else is interpreted.
pub fn find(document: &str, name: &str) -> Option<String> {
    if !is_variable_name(name) {
        return None;
    }
    let lines = physical_lines(document);
    for idx in (0..lines.len()).rev() {
        if idx > 0 && lines[idx - 1].1.ends_with('\\') {
            continue;
        }
        let (start, line) = lines[idx];
        let Some(value_offset) = assignment_value_offset(line, name) else {
            continue;
        };
        let mut last = idx;
        while lines[last].1.ends_with('\\') && last + 1 < lines.len() {
            last += 1;
        }
        let end = lines[last].0 + lines[last].1.len();
        return Some(collapse_continuations(&document[start + value_offset..end]));
    }
    None
}

// Split on '\n', remembering the byte offset at which each line starts.
fn physical_lines(document: &str) -> Vec<(usize, &str)> {
    let mut offset = 0;
    let mut lines = vec![];
    for line in document.split('\n') {
        lines.push((offset, line));
        offset += line.len() + 1;
    }
    lines
}

// The offset within line at which the value of an assignment to name starts.
fn assignment_value_offset(line: &str, name: &str) -> Option<usize> {
    let rest = line.strip_prefix(name)?;
    let rest = rest.trim_start_matches(|c: char| c == ' ' || c == '\t');
    let rest = rest.trim_start_matches(ASSIGNMENT_MODIFIERS);
    let rest = rest.strip_prefix('=')?;
    let value = rest.trim_start_matches(|c: char| c == ' ' || c == '\t');
    Some(line.len() - value.len())
}

//////////////////////////////////// EnvironmentVariableProvider ///////////////////////////////////

/// A VariableProvider that pulls from the process environment, optionally with a given prefix.
/// When there is a prefix, `PREFIX` + name is preferred over the bare name.
#[derive(Clone, Debug, Default)]
pub struct EnvironmentVariableProvider {
    prefix: Option<String>,
}

impl EnvironmentVariableProvider {
    /// Create a new environmental variable provider that looks values up in the environment,
    /// optionally under some prefix.
    pub const fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    // The prefix is unchecked, so refuse keys that std::env cannot represent.
    fn var(key: &str) -> Option<String> {
        if key.contains(|c: char| c == '=' || c == '\0') {
            return None;
        }
        std::env::var(key).ok()
    }
}

impl VariableProvider for EnvironmentVariableProvider {
    fn lookup(&self, ident: &str) -> Option<String> {
        if !is_variable_name(ident) {
            return None;
        }
        if let Some(prefix) = self.prefix.as_ref() {
            if let Some(value) = Self::var(&format!("{prefix}{ident}")) {
                return Some(value);
            }
        }
        Self::var(ident)
    }
}

////////////////////////////////////////////// scanner /////////////////////////////////////////////

/// True if `s` is a valid variable name:  a letter or underscore, followed by any number of
/// letters, digits, or underscores.
pub fn is_variable_name(s: &str) -> bool {
    !s.is_empty() && variable_name_len(s) == s.len()
}

// The length of the longest variable name that prefixes s.
fn variable_name_len(s: &str) -> usize {
    let mut len = 0;
    for (idx, c) in s.bytes().enumerate() {
        match c {
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {}
            b'0'..=b'9' if idx > 0 => {}
            _ => break,
        }
        len += 1;
    }
    len
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Reference<'a> {
    start: usize,
    end: usize,
    name: &'a str,
}

// Find the first `$(NAME)` at or after `from`.  Pairs of `$$` are stepped over whole, so
// `$$(NAME)` is not a reference.
fn next_reference(text: &str, from: usize) -> Option<Reference<'_>> {
    let bytes = text.as_bytes();
    let mut idx = from;
    while idx < bytes.len() {
        if bytes[idx] != b'$' {
            idx += 1;
            continue;
        }
        match bytes.get(idx + 1) {
            Some(b'$') => {
                idx += 2;
            }
            Some(b'(') => {
                let name_start = idx + 2;
                let name_end = name_start + variable_name_len(&text[name_start..]);
                if name_end > name_start && bytes.get(name_end) == Some(&b')') {
                    return Some(Reference {
                        start: idx,
                        end: name_end + 1,
                        name: &text[name_start..name_end],
                    });
                }
                idx += 1;
            }
            _ => {
                idx += 1;
            }
        }
    }
    None
}

/////////////////////////////////////////// normalization //////////////////////////////////////////

/// Remove every backslash-newline pair from `raw`.
pub fn collapse_continuations(raw: &str) -> String {
    raw.replace("\\\n", "")
}

/// Replace every `$$` in `expanded` with a single `$`.
pub fn collapse_dollars(expanded: &str) -> String {
    expanded.replace("$$", "$")
}

///////////////////////////////////////////// Expander /////////////////////////////////////////////

// One in-progress expansion.  The top-level frame has no name.
#[derive(Debug)]
struct Frame {
    name: Option<String>,
    text: String,
    offset: usize,
}

impl Frame {
    fn new(name: Option<String>, text: String) -> Self {
        Self {
            name,
            text,
            offset: 0,
        }
    }
}

// The state of a single call to expand.  It is built per call and consumed by run.
struct Expander<'a> {
    vars: &'a dyn VariableProvider,
    stack: Vec<Frame>,
    open: HashSet<String>,
    resolved: HashMap<String, String>,
    circular: HashSet<String>,
}

impl<'a> Expander<'a> {
    fn new(vars: &'a dyn VariableProvider, input: &str) -> Self {
        Self {
            vars,
            stack: vec![Frame::new(None, input.to_string())],
            open: HashSet::new(),
            resolved: HashMap::new(),
            circular: HashSet::new(),
        }
    }

    fn run(mut self) -> String {
        loop {
            if let Some(name) = self.advance() {
                let raw = self.lookup(&name);
                self.open.insert(name.clone());
                self.stack.push(Frame::new(Some(name), raw));
                continue;
            }
            let Some(frame) = self.stack.pop() else {
                return String::new();
            };
            match frame.name {
                Some(name) => {
                    self.open.remove(&name);
                    self.resolved.insert(name, frame.text);
                }
                None => {
                    debug!(
                        resolved = self.resolved.len(),
                        circular = self.circular.len(),
                        "expansion complete"
                    );
                    return collapse_dollars(&frame.text);
                }
            }
        }
    }

    // Scan the innermost frame.  Returns the name of an unresolved reference, leaving the frame
    // suspended at that reference, or None when the frame has been scanned to its end.
    fn advance(&mut self) -> Option<String> {
        let depth = self.stack.len().checked_sub(1)?;
        loop {
            let frame = &self.stack[depth];
            let reference = next_reference(&frame.text, frame.offset)?;
            let (start, end) = (reference.start, reference.end);
            let name = reference.name.to_string();
            if self.circular.contains(&name) {
                self.stack[depth].offset = end;
            } else if self.open.contains(&name) {
                debug!(name = name.as_str(), "circular reference left unexpanded");
                self.circular.insert(name);
                self.stack[depth].offset = end;
            } else if let Some(value) = self.resolved.get(&name) {
                let frame = &mut self.stack[depth];
                frame.text.replace_range(start..end, value);
                frame.offset = start + value.len();
            } else {
                self.stack[depth].offset = start;
                return Some(name);
            }
        }
    }

    fn lookup(&self, name: &str) -> String {
        match self.vars.lookup(name) {
            Some(raw) => {
                trace!(name, raw = raw.as_str(), "found definition");
                raw
            }
            None => {
                trace!(name, "undefined; substituting the empty string");
                String::new()
            }
        }
    }
}

////////////////////////////////////////////// expand //////////////////////////////////////////////

/// Expand every `$(NAME)` reference in `text`.
///
/// Definitions are looked up in `document` first, falling back to `env`.  Undefined names
/// expand to the empty string and circular references are left as literal text.  `$$` collapses
/// to `$` once expansion is done.
pub fn expand(document: &str, text: &str, env: &dyn VariableProvider) -> String {
    let document = Document::new(document);
    expand_with(&(&document, env), text)
}

/// Expand every `$(NAME)` reference in `text`, looking names up in `vars`.
///
/// Each name is looked up and expanded at most once per call.
pub fn expand_with(vars: &dyn VariableProvider, text: &str) -> String {
    Expander::new(vars, text).run()
}

//////////////////////////////////////////// references ////////////////////////////////////////////

/// Return the distinct names referenced by `text`, in order of first reference.  References are
/// not expanded, so names that appear only inside definitions are not included.
pub fn references(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = vec![];
    let mut offset = 0;
    while let Some(reference) = next_reference(text, offset) {
        if seen.insert(reference.name) {
            names.push(reference.name.to_string());
        }
        offset = reference.end;
    }
    names
}

///////////////////////////////////////////// candidate ////////////////////////////////////////////

/// True if `candidate` is worth expanding:  every `(` directly follows a `$` and parentheses
/// balance.  Hosts that scrape candidates from surrounding text should reject anything else
/// before calling [expand].
pub fn is_expandable_candidate(candidate: &str) -> bool {
    let mut depth = 0usize;
    let mut prev = None;
    for c in candidate.chars() {
        match c {
            '(' if prev == Some('$') => {
                depth += 1;
            }
            '(' => {
                return false;
            }
            ')' if depth == 0 => {
                return false;
            }
            ')' => {
                depth -= 1;
            }
            _ => {}
        }
        prev = Some(c);
    }
    depth == 0
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////
