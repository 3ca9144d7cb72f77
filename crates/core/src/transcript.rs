//! Transcript entries: one user message and the response to it.

use std::borrow::Cow;
use std::fmt::{self, Display, Formatter};

use pulldown_cmark::{CodeBlockKind, Event, Parser, Tag, TagEnd};

/// Identifies a transcript entry. Ids are never reused by a coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

impl EntryId {
    /// Wraps a raw id.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for EntryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a segment of attributed content should be presented.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SegmentStyle {
    /// Regular prose.
    Plain,
    /// A fenced code block, with the language tag if one was given.
    Code {
        /// Language tag after the opening fence.
        language: Option<String>,
    },
}

/// A run of response text with one presentation style.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Segment {
    /// The text of this segment, without fences.
    pub text: String,
    /// The style of this segment.
    pub style: SegmentStyle,
}

/// The response part of an entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResponseContent {
    /// Plain text.
    Text(String),
    /// Text split into styled segments.
    Attributed(Vec<Segment>),
}

impl Default for ResponseContent {
    #[inline]
    fn default() -> Self {
        ResponseContent::Text(String::new())
    }
}

impl ResponseContent {
    /// Returns the flat text of this content.
    ///
    /// Attributed segments are joined back together, code blocks are
    /// fenced again.
    pub fn text(&self) -> Cow<'_, str> {
        match self {
            ResponseContent::Text(text) => Cow::Borrowed(text),
            ResponseContent::Attributed(segments) => {
                let mut out = String::new();
                for segment in segments {
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push('\n');
                    }
                    match &segment.style {
                        SegmentStyle::Plain => out.push_str(&segment.text),
                        SegmentStyle::Code { language } => {
                            let fence = fence_for(&segment.text);
                            out.push_str(&fence);
                            out.push_str(language.as_deref().unwrap_or(""));
                            out.push('\n');
                            out.push_str(&segment.text);
                            out.push('\n');
                            out.push_str(&fence);
                        }
                    }
                }
                Cow::Owned(out)
            }
        }
    }

    /// Returns `true` if there is no response text.
    #[inline]
    pub fn is_empty(&self) -> bool {
        match self {
            ResponseContent::Text(text) => text.is_empty(),
            ResponseContent::Attributed(segments) => {
                segments.iter().all(|s| s.text.is_empty())
            }
        }
    }

    /// Splits the content into prose and fenced code segments.
    ///
    /// Fences follow CommonMark, so both backtick and tilde fences are
    /// recognized and a fence only closes a block of its own kind and
    /// length. An unterminated fence (common while a response is still
    /// streaming) turns the rest of the text into a code segment.
    pub fn attributed(&self) -> ResponseContent {
        let text = match self {
            ResponseContent::Text(text) => text,
            ResponseContent::Attributed(_) => return self.clone(),
        };

        let mut segments = Vec::new();
        let mut prose_start = 0;
        let mut code: Option<(Option<String>, String)> = None;

        for (event, range) in Parser::new(text).into_offset_iter() {
            match event {
                Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(info))) => {
                    push_prose(&mut segments, &text[prose_start..range.start]);
                    let language =
                        info.split_ascii_whitespace().next().map(str::to_owned);
                    code = Some((language, String::new()));
                }
                Event::Text(chunk) => {
                    if let Some((_, body)) = code.as_mut() {
                        body.push_str(&chunk);
                    }
                }
                Event::End(TagEnd::CodeBlock) => {
                    // Indented blocks stay part of the prose.
                    let Some((language, mut body)) = code.take() else {
                        continue;
                    };
                    body.truncate(body.trim_end_matches('\n').len());
                    segments.push(Segment {
                        text: body,
                        style: SegmentStyle::Code { language },
                    });
                    prose_start = range.end;
                }
                _ => {}
            }
        }

        push_prose(&mut segments, &text[prose_start..]);
        ResponseContent::Attributed(segments)
    }
}

fn push_prose(segments: &mut Vec<Segment>, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    segments.push(Segment {
        text: text.to_owned(),
        style: SegmentStyle::Plain,
    });
}

/// Returns a backtick fence longer than any backtick run in `code`.
fn fence_for(code: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for c in code.chars() {
        run = if c == '`' { run + 1 } else { 0 };
        longest = longest.max(run);
    }
    "`".repeat(longest.max(2) + 1)
}

/// One user message paired with the response to it.
///
/// Entries are values: the coordinator publishes a new copy every time the
/// response changes, so observers can keep the copies they were given.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranscriptEntry {
    id: EntryId,
    is_interacting: bool,
    send_content: String,
    send_image: String,
    response: ResponseContent,
    response_image: String,
    response_error: Option<String>,
}

impl TranscriptEntry {
    /// Creates an entry that is waiting for its response.
    pub fn pending<S: Into<String>>(id: EntryId, send_content: S) -> Self {
        Self {
            id,
            is_interacting: true,
            send_content: send_content.into(),
            send_image: "profile".to_owned(),
            response: ResponseContent::default(),
            response_image: String::new(),
            response_error: None,
        }
    }

    /// Sets the avatar shown next to the response.
    #[inline]
    pub fn with_response_image<S: Into<String>>(mut self, image: S) -> Self {
        self.response_image = image.into();
        self
    }

    /// Returns the id of this entry.
    #[inline]
    pub fn id(&self) -> EntryId {
        self.id
    }

    /// Returns `true` while the response is still being produced.
    #[inline]
    pub fn is_interacting(&self) -> bool {
        self.is_interacting
    }

    /// Returns the message the user sent.
    #[inline]
    pub fn send_content(&self) -> &str {
        &self.send_content
    }

    /// Returns the avatar shown next to the user's message.
    #[inline]
    pub fn send_image(&self) -> &str {
        &self.send_image
    }

    /// Returns the response received so far.
    #[inline]
    pub fn response_content(&self) -> &ResponseContent {
        &self.response
    }

    /// Returns the flat response text received so far.
    #[inline]
    pub fn response_text(&self) -> Cow<'_, str> {
        self.response.text()
    }

    /// Returns the avatar shown next to the response.
    #[inline]
    pub fn response_image(&self) -> &str {
        &self.response_image
    }

    /// Returns the error that ended the exchange, if any.
    #[inline]
    pub fn response_error(&self) -> Option<&str> {
        self.response_error.as_deref()
    }

    pub(crate) fn set_response_text(&mut self, text: String) {
        self.response = ResponseContent::Text(text);
    }

    /// Records a failure. The first error sticks.
    pub(crate) fn set_error(&mut self, message: String) {
        if self.response_error.is_none() {
            self.response_error = Some(message);
        }
    }

    pub(crate) fn finish(&mut self) {
        self.is_interacting = false;
    }
}
