//! Tag parser for model turns.
//!
//! The model structures each turn with a fixed tag vocabulary:
//!
//! | Tag | Meaning |
//! |-----|---------|
//! | `<think>` / `<thought>` | reasoning, surfaced for logging only |
//! | `<action>` | one or more tool calls, `ToolName({...})` |
//! | `<final_answer>` | the terminal response |
//! | `<reflection>` | self-review after an answer, surfaced like a thought |
//! | `<observation>` | written by the agent, never the model |
//!
//! [`ResponseParser`] is fed the turn incrementally. A tag becomes a segment
//! only once its closing marker has arrived; until then the text is held in
//! the buffer and re-scanned from the last consumed offset on the next push,
//! so markers split across chunks are recognised. The vocabulary is not
//! re-entrant: inside a tag, everything up to that tag's own closing marker
//! is literal text.
//!
//! Parsing is pure. Whether a named tool exists is decided by the dispatcher.

use rustact_core::ToolArgs;
use serde::Serialize;
use serde::de::{self, Deserialize, Deserializer, MapAccess, Visitor};
use std::fmt;
use std::ops::Range;
use tracing::warn;

/// A fully parsed tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedAction {
    /// Tool name, exactly as written
    pub name: String,

    /// Argument mapping with unique keys
    pub args: ToolArgs,

    /// The call expression as written by the model
    pub raw: String,

    /// Byte span of `raw` within the turn buffer
    pub span: Range<usize>,
}

/// An action segment that could not be parsed as a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionParseError {
    pub message: String,

    /// Unparsed text from the point of failure to the end of the action
    pub raw: String,

    pub span: Range<usize>,
}

impl fmt::Display for ActionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in `{}`", self.message, self.raw.trim())
    }
}

/// A typed piece of a model turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    Thought { text: String, span: Range<usize> },
    Reflection { text: String, span: Range<usize> },
    Action(ParsedAction),
    ParseError(ActionParseError),
    FinalAnswer { text: String, span: Range<usize> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Think,
    Thought,
    Action,
    FinalAnswer,
    Reflection,
    Observation,
}

impl Tag {
    const ALL: [Tag; 6] = [
        Tag::Think,
        Tag::Thought,
        Tag::Action,
        Tag::FinalAnswer,
        Tag::Reflection,
        Tag::Observation,
    ];

    fn open(self) -> &'static str {
        match self {
            Tag::Think => "<think>",
            Tag::Thought => "<thought>",
            Tag::Action => "<action>",
            Tag::FinalAnswer => "<final_answer>",
            Tag::Reflection => "<reflection>",
            Tag::Observation => "<observation>",
        }
    }

    fn close(self) -> &'static str {
        match self {
            Tag::Think => "</think>",
            Tag::Thought => "</thought>",
            Tag::Action => "</action>",
            Tag::FinalAnswer => "</final_answer>",
            Tag::Reflection => "</reflection>",
            Tag::Observation => "</observation>",
        }
    }
}

/// The marker the model must never write itself. Also used as a stop
/// sequence on completion requests.
pub const OBSERVATION_OPEN: &str = "<observation>";

/// What the scanner found at a `<`.
enum Opener {
    Tag(Tag),
    /// Could still become a tag once more text arrives
    Partial,
    NotATag,
}

fn classify_opener(rest: &str) -> Opener {
    for tag in Tag::ALL {
        let marker = tag.open();
        if rest.starts_with(marker) {
            return Opener::Tag(tag);
        }
        if rest.len() < marker.len() && marker.starts_with(rest) {
            return Opener::Partial;
        }
    }
    Opener::NotATag
}

/// Incremental parser for one model turn.
#[derive(Debug, Default)]
pub struct ResponseParser {
    buffer: String,
    /// Bytes before this offset have been consumed
    cursor: usize,
    final_seen: bool,
    /// Offset of a model-written `<observation>`; nothing after it counts
    halted_at: Option<usize>,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append streamed text and return the segments completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<Segment> {
        if self.halted_at.is_some() {
            return Vec::new();
        }
        self.buffer.push_str(chunk);
        self.scan(false)
    }

    /// Signal end of stream and return the segments it completes.
    ///
    /// An unterminated `<action>` becomes a parse error, an unterminated
    /// `<final_answer>` is accepted with the remaining text, and any other
    /// unterminated tag is dropped.
    pub fn finish(&mut self) -> Vec<Segment> {
        if self.halted_at.is_some() {
            return Vec::new();
        }
        self.scan(true)
    }

    /// Whether the model wrote an `<observation>` tag; the rest of the turn
    /// is ignored and the stream may be closed.
    pub fn is_halted(&self) -> bool {
        self.halted_at.is_some()
    }

    /// Everything received so far.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// The part of the turn that counts: the buffer up to a hallucinated
    /// observation, if there was one.
    pub fn accepted_text(&self) -> &str {
        match self.halted_at {
            Some(at) => &self.buffer[..at],
            None => &self.buffer,
        }
    }

    fn scan(&mut self, at_eof: bool) -> Vec<Segment> {
        let mut segments = Vec::new();

        loop {
            let Some((start, tag)) = self.next_opener(at_eof) else {
                return segments;
            };

            if tag == Tag::Observation {
                warn!("Model wrote its own <observation>; discarding the rest of the turn");
                self.halted_at = Some(start);
                self.cursor = self.buffer.len();
                return segments;
            }

            let content_start = start + tag.open().len();
            match self.buffer[content_start..].find(tag.close()) {
                Some(rel) => {
                    let content_end = content_start + rel;
                    let end = content_end + tag.close().len();
                    self.emit(tag, content_start..content_end, start..end, &mut segments);
                    self.cursor = end;
                }
                None if at_eof => {
                    let end = self.buffer.len();
                    self.cursor = end;
                    match tag {
                        Tag::Action => segments.push(Segment::ParseError(ActionParseError {
                            message: "unterminated <action> tag".into(),
                            raw: self.buffer[content_start..].to_string(),
                            span: content_start..end,
                        })),
                        Tag::FinalAnswer => {
                            self.emit(tag, content_start..end, start..end, &mut segments)
                        }
                        _ => {}
                    }
                    return segments;
                }
                None => {
                    // Wait for the closing marker.
                    self.cursor = start;
                    return segments;
                }
            }
        }
    }

    /// Find the next opening tag at or after the cursor. Text outside tags is
    /// skipped and consumed; a trailing partial marker is kept for later.
    fn next_opener(&mut self, at_eof: bool) -> Option<(usize, Tag)> {
        let mut search = self.cursor;
        while let Some(rel) = self.buffer[search..].find('<') {
            let pos = search + rel;
            match classify_opener(&self.buffer[pos..]) {
                Opener::Tag(tag) => return Some((pos, tag)),
                Opener::Partial if !at_eof => {
                    self.cursor = pos;
                    return None;
                }
                Opener::Partial | Opener::NotATag => search = pos + 1,
            }
        }
        self.cursor = self.buffer.len();
        None
    }

    fn emit(
        &mut self,
        tag: Tag,
        content: Range<usize>,
        whole: Range<usize>,
        out: &mut Vec<Segment>,
    ) {
        let text = self.buffer[content.clone()].trim().to_string();
        match tag {
            Tag::Think | Tag::Thought => out.push(Segment::Thought { text, span: whole }),
            Tag::Reflection => out.push(Segment::Reflection { text, span: whole }),
            Tag::FinalAnswer => {
                if self.final_seen {
                    warn!("Ignoring additional <final_answer> in the same turn");
                } else {
                    self.final_seen = true;
                    out.push(Segment::FinalAnswer { text, span: whole });
                }
            }
            Tag::Action => out.extend(parse_calls(&self.buffer[content.clone()], content.start)),
            Tag::Observation => {}
        }
    }
}

/// Parse a complete turn in one go.
pub fn parse_response(text: &str) -> Vec<Segment> {
    let mut parser = ResponseParser::new();
    let mut segments = parser.push(text);
    segments.extend(parser.finish());
    segments
}

/// Render a call in the canonical action syntax, `Name({...})`.
///
/// `</` is written as `<\/` so that no string value can close the
/// surrounding tag. `<` only occurs inside JSON strings, where `\/` is a
/// valid escape for `/`.
pub fn format_action(name: &str, args: &ToolArgs) -> String {
    let payload = serde_json::to_string(args)
        .unwrap_or_else(|_| "{}".into())
        .replace("</", "<\\/");
    format!("{name}({payload})")
}

// --- Call expressions -------------------------------------------------------

/// Parse the inner text of an `<action>` tag. Calls may be separated by
/// whitespace, `;` or `,`. Parsing stops at the first malformed call.
fn parse_calls(text: &str, base: usize) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut pos = 0;

    loop {
        pos = skip(text, pos, |c| c.is_whitespace() || c == ';' || c == ',');
        if pos >= text.len() {
            break;
        }
        match parse_call(text, pos) {
            Ok((name, args, end)) => {
                out.push(Segment::Action(ParsedAction {
                    name,
                    args,
                    raw: text[pos..end].to_string(),
                    span: base + pos..base + end,
                }));
                pos = end;
            }
            Err(message) => {
                out.push(Segment::ParseError(ActionParseError {
                    message,
                    raw: text[pos..].to_string(),
                    span: base + pos..base + text.len(),
                }));
                return out;
            }
        }
    }

    if out.is_empty() {
        out.push(Segment::ParseError(ActionParseError {
            message: "empty action".into(),
            raw: text.to_string(),
            span: base..base + text.len(),
        }));
    }
    out
}

fn skip(text: &str, mut pos: usize, pred: impl Fn(char) -> bool) -> usize {
    while let Some(c) = text[pos..].chars().next() {
        if !pred(c) {
            break;
        }
        pos += c.len_utf8();
    }
    pos
}

/// Parse `Name({...})`, `Name()` or the legacy `Name().run({...})`,
/// returning the name, arguments and end offset.
fn parse_call(text: &str, start: usize) -> Result<(String, ToolArgs, usize), String> {
    let name_end = skip(text, start, |c| c.is_alphanumeric() || c == '_');
    let name = &text[start..name_end];
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err("expected a tool name".into());
    }

    let (mut args, mut pos) = parse_parens(text, name_end, name)?;

    let after = skip(text, pos, char::is_whitespace);
    if text[after..].starts_with(".run") {
        if !args.is_empty() {
            return Err(format!("`{name}(...).run(...)` takes its arguments in run()"));
        }
        (args, pos) = parse_parens(text, after + ".run".len(), name)?;
    }

    Ok((name.to_string(), args, pos))
}

/// Parse `( payload? )` starting at `pos` (whitespace allowed before it).
fn parse_parens(text: &str, pos: usize, name: &str) -> Result<(ToolArgs, usize), String> {
    let pos = skip(text, pos, char::is_whitespace);
    if !text[pos..].starts_with('(') {
        return Err(format!("expected '(' after `{name}`"));
    }
    let pos = skip(text, pos + 1, char::is_whitespace);

    if text[pos..].starts_with(')') {
        return Ok((ToolArgs::new(), pos + 1));
    }
    if !text[pos..].starts_with('{') {
        return Err(format!("`{name}` expects a single {{...}} argument mapping"));
    }

    let payload_end = match_brace(text, pos)
        .ok_or_else(|| format!("unbalanced braces in `{name}` arguments"))?;
    let args = parse_payload(&text[pos..payload_end])?;

    let close = skip(text, payload_end, char::is_whitespace);
    if !text[close..].starts_with(')') {
        return Err(format!("expected ')' to close `{name}(...)`"));
    }
    Ok((args, close + 1))
}

/// Offset just past the `}` matching the `{` at `open`. Braces inside
/// single- or double-quoted strings are ignored.
fn match_brace(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in text[open..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

// --- Payloads ---------------------------------------------------------------

/// Top-level argument object that rejects duplicate keys.
struct UniqueArgs(ToolArgs);

impl<'de> Deserialize<'de> for UniqueArgs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ArgsVisitor;

        impl<'de> Visitor<'de> for ArgsVisitor {
            type Value = UniqueArgs;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object of named arguments")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<UniqueArgs, A::Error> {
                let mut args = ToolArgs::new();
                while let Some((key, value)) = map.next_entry::<String, serde_json::Value>()? {
                    if args.contains_key(&key) {
                        return Err(de::Error::custom(format!("duplicate argument '{key}'")));
                    }
                    args.insert(key, value);
                }
                Ok(UniqueArgs(args))
            }
        }

        deserializer.deserialize_map(ArgsVisitor)
    }
}

/// Parse an argument payload: strict JSON first, then relaxed literals
/// (single quotes, `True`/`False`/`None`, trailing commas).
fn parse_payload(payload: &str) -> Result<ToolArgs, String> {
    match serde_json::from_str::<UniqueArgs>(payload) {
        Ok(UniqueArgs(args)) => Ok(args),
        // Well-formed JSON with the wrong shape or duplicate keys.
        Err(e) if e.classify() == serde_json::error::Category::Data => Err(e.to_string()),
        Err(strict) => {
            let relaxed = relax_literals(payload);
            serde_json::from_str::<UniqueArgs>(&relaxed)
                .map(|UniqueArgs(args)| args)
                .map_err(|e| match e.classify() {
                    serde_json::error::Category::Data => e.to_string(),
                    _ => format!("invalid argument payload: {strict}"),
                })
        }
    }
}

/// Rewrite Python-style literals into JSON.
fn relax_literals(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' => {
                // Copy a JSON string verbatim.
                out.push(c);
                i += 1;
                while i < chars.len() {
                    let s = chars[i];
                    out.push(s);
                    i += 1;
                    if s == '\\' && i < chars.len() {
                        out.push(chars[i]);
                        i += 1;
                    } else if s == '"' {
                        break;
                    }
                }
            }
            '\'' => {
                out.push('"');
                i += 1;
                while i < chars.len() {
                    let s = chars[i];
                    i += 1;
                    match s {
                        '\\' if i < chars.len() && chars[i] == '\'' => {
                            out.push('\'');
                            i += 1;
                        }
                        '\\' if i < chars.len() => {
                            out.push('\\');
                            out.push(chars[i]);
                            i += 1;
                        }
                        '"' => out.push_str("\\\""),
                        '\'' => break,
                        _ => out.push(s),
                    }
                }
                out.push('"');
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(',');
                }
                i += 1;
            }
            c if c.is_alphabetic() => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                out.push_str(match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    other => other,
                });
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}
