//! Checkpoint tracking
//!
//! The extractor's state payload is opaque except for its `bookmarks`
//! object, which holds one position per stream. A checkpoint may only be
//! emitted once every record it covers has been loaded.

use crate::error::SinkResult;
use serde_json::{Map, Value};
use std::io::Write;
use tracing::debug;

/// Latest seen, safe-to-emit and last emitted state payloads
#[derive(Debug, Default)]
pub struct CheckpointTracker {
    latest: Option<Value>,
    flushed: Option<Value>,
    last_emitted: Option<Value>,
}

impl CheckpointTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a State payload
    ///
    /// With no stream buffered the payload is safe at once. Otherwise, while
    /// nothing is safe yet, only the bookmarks of streams outside
    /// `buffered_streams` are taken from it.
    pub fn on_state<'a, I>(&mut self, value: Value, buffered_streams: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut buffered = buffered_streams.into_iter().peekable();
        if buffered.peek().is_none() {
            self.flushed = Some(value.clone());
        } else if self.flushed.is_none() {
            self.flushed = without_bookmarks(&value, buffered);
        }
        self.latest = Some(value);
    }

    /// Every buffered record has been loaded: the latest payload is safe
    pub fn on_full_flush(&mut self) {
        if self.latest.is_some() {
            self.flushed = self.latest.clone();
        }
    }

    /// Only `streams` were loaded: advance their bookmarks to the latest payload
    pub fn on_partial_flush<'a, I>(&mut self, streams: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let Some(latest_bookmarks) = self
            .latest
            .as_ref()
            .and_then(|l| l.get("bookmarks"))
            .and_then(Value::as_object)
        else {
            return;
        };

        let flushed = self
            .flushed
            .get_or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(flushed) = flushed else {
            return;
        };

        for stream in streams {
            if let Some(bookmark) = latest_bookmarks.get(stream) {
                let bookmarks = flushed
                    .entry("bookmarks")
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(bookmarks) = bookmarks {
                    bookmarks.insert(stream.to_string(), bookmark.clone());
                }
            }
        }
    }

    pub fn flushed(&self) -> Option<&Value> {
        self.flushed.as_ref()
    }

    /// Write the safe payload as one line, unless it was the last one written
    pub fn emit<W: Write>(&mut self, out: &mut W) -> SinkResult<bool> {
        let Some(flushed) = &self.flushed else {
            return Ok(false);
        };
        if self.last_emitted.as_ref() == Some(flushed) {
            return Ok(false);
        }

        let line = serde_json::to_string(flushed).map_err(std::io::Error::from)?;
        debug!("Emitting state {}", line);
        writeln!(out, "{}", line)?;
        out.flush()?;
        self.last_emitted = Some(flushed.clone());
        Ok(true)
    }
}

/// `value` minus the bookmarks of `streams`; `None` when it has no bookmarks object
fn without_bookmarks<'a, I>(value: &Value, streams: I) -> Option<Value>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seeded = value.clone();
    let bookmarks = seeded.get_mut("bookmarks")?.as_object_mut()?;
    for stream in streams {
        bookmarks.remove(stream);
    }
    Some(seeded)
}
