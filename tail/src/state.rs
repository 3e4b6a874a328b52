//! Per-file read position and the size-diff that drives delivery.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

use crate::sink::TailSink;

/// Upper bound on a single read, so a large backlog streams in pieces.
const CHUNK_BYTES: u64 = 64 * 1024;

/// What a fresh stat says about the file relative to what was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Unchanged,
    /// New bytes in `[from, to)`.
    Grew { from: u64, to: u64 },
    /// The file shrank; everything up to `to` is to be read from offset zero.
    Truncated { to: u64 },
}

/// Read position for one tailed file.
///
/// `read_offset` never exceeds `last_known_size`, and only advances by bytes
/// actually read.
#[derive(Debug)]
pub struct TailState {
    path: PathBuf,
    read_offset: u64,
    last_known_size: u64,
    carry: Utf8Carry,
}

impl TailState {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            read_offset: 0,
            last_known_size: 0,
            carry: Utf8Carry::default(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn read_offset(&self) -> u64 {
        self.read_offset
    }

    #[must_use]
    pub fn last_known_size(&self) -> u64 {
        self.last_known_size
    }

    /// Compare a stat size against the current read position.
    #[must_use]
    pub fn diff(&self, size: u64) -> Change {
        match size.cmp(&self.read_offset) {
            std::cmp::Ordering::Less => Change::Truncated { to: size },
            std::cmp::Ordering::Greater => Change::Grew {
                from: self.read_offset,
                to: size,
            },
            std::cmp::Ordering::Equal => Change::Unchanged,
        }
    }

    /// Bring the sink up to date with a file whose stat size is `size`.
    ///
    /// On truncation the sink is cleared and the position reset before any
    /// read, so a read failure leaves a consistent state that the next event
    /// retries from. Never reads past `size`.
    pub async fn apply<R>(
        &mut self,
        reader: &mut R,
        size: u64,
        sink: &dyn TailSink,
    ) -> io::Result<Change>
    where
        R: AsyncRead + AsyncSeek + Unpin,
    {
        let change = self.diff(size);
        self.last_known_size = size;
        match change {
            Change::Unchanged => {}
            Change::Truncated { to } => {
                self.read_offset = 0;
                self.carry.reset();
                sink.clear();
                self.read_into(reader, to, sink).await?;
            }
            Change::Grew { to, .. } => self.read_into(reader, to, sink).await?,
        }
        Ok(change)
    }

    async fn read_into<R>(&mut self, reader: &mut R, to: u64, sink: &dyn TailSink) -> io::Result<()>
    where
        R: AsyncRead + AsyncSeek + Unpin,
    {
        reader.seek(SeekFrom::Start(self.read_offset)).await?;
        while self.read_offset < to {
            let want = (to - self.read_offset).min(CHUNK_BYTES);
            let mut buf = Vec::with_capacity(usize::try_from(want).unwrap_or(0));
            let got = (&mut *reader).take(want).read_to_end(&mut buf).await?;
            if got == 0 {
                // The file shrank between stat and read; the next event sorts it out.
                break;
            }
            self.read_offset += got as u64;
            let text = self.carry.decode(&buf);
            if !text.is_empty() {
                sink.append(&text);
            }
        }
        Ok(())
    }
}

/// Holds back the trailing bytes of a multi-byte character split across reads.
/// Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn reset(&mut self) {
        self.pending.clear();
    }

    fn decode(&mut self, bytes: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(bytes);

        let mut out = String::with_capacity(buf.len());
        let mut rest = buf.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    if let Some(bad) = e.error_len() {
                        out.push(char::REPLACEMENT_CHARACTER);
                        rest = &after[bad..];
                    } else {
                        // Incomplete sequence at the end: wait for the rest.
                        self.pending = after.to_vec();
                        break;
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::sink::{MemorySink, SinkCall};

    async fn apply(state: &mut TailState, data: &[u8], sink: &MemorySink) -> Change {
        let mut cursor = Cursor::new(data.to_vec());
        state
            .apply(&mut cursor, data.len() as u64, sink)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn grow_then_truncate() {
        let sink = MemorySink::new();
        let mut state = TailState::new("server.log");

        assert_eq!(
            apply(&mut state, b"A", &sink).await,
            Change::Grew { from: 0, to: 1 }
        );
        assert_eq!(
            apply(&mut state, b"AB", &sink).await,
            Change::Grew { from: 1, to: 2 }
        );
        assert_eq!(
            apply(&mut state, b"X", &sink).await,
            Change::Truncated { to: 1 }
        );

        assert_eq!(
            sink.calls(),
            vec![
                SinkCall::Append("A".into()),
                SinkCall::Append("B".into()),
                SinkCall::Clear,
                SinkCall::Append("X".into()),
            ]
        );
        assert_eq!(state.read_offset(), 1);
    }

    #[tokio::test]
    async fn repeated_events_are_idempotent() {
        let sink = MemorySink::new();
        let mut state = TailState::new("server.log");
        apply(&mut state, b"hello\n", &sink).await;
        for _ in 0..5 {
            assert_eq!(
                apply(&mut state, b"hello\n", &sink).await,
                Change::Unchanged
            );
        }
        assert_eq!(sink.calls(), vec![SinkCall::Append("hello\n".into())]);
    }

    #[tokio::test]
    async fn truncate_to_empty_only_clears() {
        let sink = MemorySink::new();
        let mut state = TailState::new("server.log");
        apply(&mut state, b"old", &sink).await;
        apply(&mut state, b"", &sink).await;
        assert_eq!(sink.calls().last(), Some(&SinkCall::Clear));
        assert_eq!(state.read_offset(), 0);
        assert_eq!(state.last_known_size(), 0);
    }

    #[tokio::test]
    async fn never_reads_past_stat_size() {
        let sink = MemorySink::new();
        let mut state = TailState::new("server.log");
        // Writer raced ahead of the stat: only the first 3 bytes are delivered.
        let mut cursor = Cursor::new(b"abcdef".to_vec());
        state.apply(&mut cursor, 3, &sink).await.unwrap();
        assert_eq!(sink.contents(), "abc");
        state.apply(&mut cursor, 6, &sink).await.unwrap();
        assert_eq!(sink.contents(), "abcdef");
    }

    #[tokio::test]
    async fn short_read_only_advances_by_bytes_read() {
        let sink = MemorySink::new();
        let mut state = TailState::new("server.log");
        // Stat claims 10 bytes but the file only has 4 by the time it is read.
        let mut cursor = Cursor::new(b"abcd".to_vec());
        state.apply(&mut cursor, 10, &sink).await.unwrap();
        assert_eq!(state.read_offset(), 4);
        assert_eq!(sink.contents(), "abcd");
    }

    #[tokio::test]
    async fn shuffled_growth_is_delivered_exactly_once() {
        let full: Vec<u8> = (0..500u32)
            .flat_map(|i| format!("line {i}\n").into_bytes())
            .collect();

        // Sizes observed by a series of duplicated, stale and reordered events.
        let mut seed = 0x2545_f491_u64;
        let mut sizes = Vec::new();
        for _ in 0..200 {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            sizes.push((seed >> 33) % (full.len() as u64 + 1));
        }
        sizes.sort_unstable();
        let mut events = Vec::new();
        for size in sizes {
            events.push(size);
            // Duplicate and stale deliveries of the same hint.
            events.push(size);
            events.push(size / 2);
        }
        events.push(full.len() as u64);

        let sink = MemorySink::new();
        let mut state = TailState::new("server.log");
        let mut cursor = Cursor::new(full.clone());
        let mut high_water = 0;
        for size in events {
            // A stale event reports an older size; stat is authoritative, so
            // the tailer only ever sees the current (monotonic) size.
            high_water = high_water.max(size);
            state.apply(&mut cursor, high_water, &sink).await.unwrap();
        }

        assert_eq!(sink.clear_count(), 0);
        assert_eq!(sink.contents().as_bytes(), full.as_slice());
    }

    #[tokio::test]
    async fn split_multibyte_character_is_joined() {
        let sink = MemorySink::new();
        let mut state = TailState::new("server.log");
        let text = "température ✓\n".as_bytes().to_vec();
        let mut cursor = Cursor::new(text.clone());
        // Stop mid-way through the two-byte 'é'.
        let split = "tempé".len() as u64 - 1;
        state.apply(&mut cursor, split, &sink).await.unwrap();
        state
            .apply(&mut cursor, text.len() as u64, &sink)
            .await
            .unwrap();
        assert_eq!(sink.contents(), "température ✓\n");
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let mut carry = Utf8Carry::default();
        assert_eq!(carry.decode(b"ok\xffok"), "ok\u{FFFD}ok");
        assert!(carry.pending.is_empty());
    }

    #[test]
    fn incomplete_tail_is_carried() {
        let mut carry = Utf8Carry::default();
        assert_eq!(carry.decode(&[b'a', 0xE2, 0x9C]), "a");
        assert_eq!(carry.pending, vec![0xE2, 0x9C]);
        assert_eq!(carry.decode(&[0x93]), "✓");
        assert!(carry.pending.is_empty());
    }
}
