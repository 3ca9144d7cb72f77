use std::fmt::{self, Display};

use bytes::{Buf, BytesMut};

use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    Chunks(ChunksError),
    InvalidPayload,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Chunks(err) => write!(f, "connection lost: {err}"),
            Error::InvalidPayload => f.write_str("malformed event stream"),
        }
    }
}

/// Reads the `data` of server-sent events from a chunk stream.
///
/// Comments and fields other than `data` are skipped. An event with several
/// `data` lines yields them joined by line feeds, and events without data
/// are not reported.
pub struct Sse {
    buf: BytesMut,
    chunks: Chunks,
    exhausted: bool,
}

impl Sse {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: BytesMut::new(),
            chunks,
            exhausted: false,
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            while let Some(block) = self.take_block() {
                if let Some(data) = parse_block(&block)? {
                    return Ok(Some(data));
                }
            }
            if self.exhausted {
                // An unterminated event at the end of the stream is
                // discarded.
                return Ok(None);
            }

            match self.chunks.next_chunk().await.map_err(Error::Chunks)? {
                Some(bytes) => self.buf.extend_from_slice(&bytes),
                None => self.exhausted = true,
            }
        }
    }

    /// Splits off the next blank-line terminated block, if complete.
    fn take_block(&mut self) -> Option<BytesMut> {
        let (end, sep_len) = find_blank_line(&self.buf)?;
        let block = self.buf.split_to(end);
        self.buf.advance(sep_len);
        Some(block)
    }
}

fn find_blank_line(buf: &[u8]) -> Option<(usize, usize)> {
    for (idx, window) in buf.windows(2).enumerate() {
        if window == b"\n\n" {
            return Some((idx, 2));
        }
        if buf[idx..].starts_with(b"\r\n\r\n") {
            return Some((idx, 4));
        }
    }
    None
}

fn parse_block(block: &[u8]) -> Result<Option<String>, Error> {
    let Ok(block) = str::from_utf8(block) else {
        return Err(Error::InvalidPayload);
    };

    let mut data: Option<String> = None;
    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (name, value) = match line.split_once(':') {
            Some((name, value)) => {
                (name, value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(Error::InvalidPayload);
        }
        if name != "data" {
            trace!("skipping sse field {name}");
            continue;
        }
        match &mut data {
            Some(data) => {
                data.push('\n');
                data.push_str(value);
            }
            None => data = Some(value.to_owned()),
        }
    }
    Ok(data)
}
