//! `HostLink` (C6): the trait boundary for the host's physical byte transport, plus a pure,
//! transport-free decoder for the byte stream it carries, and a test-only in-memory
//! implementation.
//!
//! The physical UART/PCIe transport itself stays out of scope; this module owns the trait
//! and the decoder, which is where the crate's share of the protocol actually lives.

use alloc::string::String;
use alloc::vec::Vec;

use crate::addr::{BoardCoord, ThreadId};
use crate::error::Error;

const TAG_STDOUT: u8 = 0x01;
const TAG_STDERR: u8 = 0x02;
const TAG_KEY_VALUE: u8 = 0x10;
const TAG_ASSERT_RICH: u8 = 0xFD;
const TAG_ASSERT: u8 = 0xFE;
const TAG_EXIT: u8 = 0xFF;

/// Bound on an accumulated C-string (device name, path, or stdout/stderr line) before it is
/// silently truncated; protects the decoder from unbounded growth on a malformed or hostile
/// stream.
const MAX_STRING_LEN: usize = 4096;

/// One decoded frame from the `HostLink` byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    StdOut(String),
    StdErr(String),
    KeyValue { device: String, seq: u32, key: u32, value: u32 },
    AssertRich { path: String, line: u32 },
    Assert,
    Exit(i32),
}

#[derive(Debug, Clone)]
enum ParseState {
    Idle,
    StdOut(Vec<u8>),
    StdErr(Vec<u8>),
    Exit(Vec<u8>),
    KeyValDevice(Vec<u8>),
    KeyValKey { device: String, bytes: Vec<u8> },
    KeyValVal { device: String, key: u32, bytes: Vec<u8> },
    AssertRichFile(Vec<u8>),
    AssertRichLine { path: String, bytes: Vec<u8> },
}

fn push_str_byte(buf: &mut Vec<u8>, byte: u8) {
    if buf.len() < MAX_STRING_LEN {
        buf.push(byte);
    }
}

fn take_string(buf: Vec<u8>) -> String {
    String::from_utf8_lossy(&buf).into_owned()
}

fn push_u32_byte(buf: &mut Vec<u8>, byte: u8) -> Option<u32> {
    buf.push(byte);
    if buf.len() == 4 {
        Some(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]))
    } else {
        None
    }
}

/// A per-source-thread byte-stream decoder: demultiplexes `HostLink`'s frame stream into
/// [`HostEvent`]s, and assigns each `KeyValue` frame a per-device-name monotonic sequence number
/// starting at 0, independent per device name.
#[derive(Debug, Default)]
pub struct HostLinkDecoder {
    per_thread: alloc::collections::BTreeMap<u32, ParseState>,
    seq_by_device: alloc::collections::BTreeMap<String, u32>,
}

impl HostLinkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte from `thread`'s stream. Returns the event this byte completed, if any.
    pub fn push_byte(&mut self, thread: ThreadId, byte: u8) -> Result<Option<HostEvent>, Error> {
        let state = self.per_thread.entry(thread.0).or_insert(ParseState::Idle);
        step(state, &mut self.seq_by_device, thread, byte)
    }

    /// Feed a run of bytes, collecting every event they complete, in order.
    pub fn push_bytes(&mut self, thread: ThreadId, bytes: &[u8]) -> Result<Vec<HostEvent>, Error> {
        let mut events = Vec::new();
        for &b in bytes {
            if let Some(event) = self.push_byte(thread, b)? {
                events.push(event);
            }
        }
        Ok(events)
    }
}

fn step(
    state: &mut ParseState,
    seq_by_device: &mut alloc::collections::BTreeMap<String, u32>,
    thread: ThreadId,
    byte: u8,
) -> Result<Option<HostEvent>, Error> {
    match state {
        ParseState::Idle => match byte {
            TAG_STDOUT => {
                *state = ParseState::StdOut(Vec::new());
                Ok(None)
            }
            TAG_STDERR => {
                *state = ParseState::StdErr(Vec::new());
                Ok(None)
            }
            TAG_KEY_VALUE => {
                *state = ParseState::KeyValDevice(Vec::new());
                Ok(None)
            }
            TAG_ASSERT_RICH => {
                *state = ParseState::AssertRichFile(Vec::new());
                Ok(None)
            }
            TAG_ASSERT => Ok(Some(HostEvent::Assert)),
            TAG_EXIT => {
                *state = ParseState::Exit(Vec::new());
                Ok(None)
            }
            tag => Err(Error::UnknownProtocolTag { thread, tag }),
        },
        ParseState::StdOut(buf) => {
            if byte == 0 {
                let s = take_string(core::mem::take(buf));
                *state = ParseState::Idle;
                Ok(Some(HostEvent::StdOut(s)))
            } else {
                push_str_byte(buf, byte);
                Ok(None)
            }
        }
        ParseState::StdErr(buf) => {
            if byte == 0 {
                let s = take_string(core::mem::take(buf));
                *state = ParseState::Idle;
                Ok(Some(HostEvent::StdErr(s)))
            } else {
                push_str_byte(buf, byte);
                Ok(None)
            }
        }
        ParseState::Exit(buf) => {
            if let Some(code) = push_u32_byte(buf, byte) {
                *state = ParseState::Idle;
                Ok(Some(HostEvent::Exit(code as i32)))
            } else {
                Ok(None)
            }
        }
        ParseState::KeyValDevice(buf) => {
            if byte == 0 {
                let device = take_string(core::mem::take(buf));
                *state = ParseState::KeyValKey { device, bytes: Vec::new() };
            } else {
                push_str_byte(buf, byte);
            }
            Ok(None)
        }
        ParseState::KeyValKey { device, bytes } => {
            if let Some(key) = push_u32_byte(bytes, byte) {
                let device = core::mem::take(device);
                *state = ParseState::KeyValVal { device, key, bytes: Vec::new() };
            }
            Ok(None)
        }
        ParseState::KeyValVal { device, key, bytes } => {
            if let Some(value) = push_u32_byte(bytes, byte) {
                let device = core::mem::take(device);
                let key = *key;
                *state = ParseState::Idle;
                let seq = seq_by_device.entry(device.clone()).or_insert(0);
                let this_seq = *seq;
                *seq += 1;
                Ok(Some(HostEvent::KeyValue {
                    device,
                    seq: this_seq,
                    key,
                    value,
                }))
            } else {
                Ok(None)
            }
        }
        ParseState::AssertRichFile(buf) => {
            if byte == 0 {
                let path = take_string(core::mem::take(buf));
                *state = ParseState::AssertRichLine { path, bytes: Vec::new() };
            } else {
                push_str_byte(buf, byte);
            }
            Ok(None)
        }
        ParseState::AssertRichLine { path, bytes } => {
            if let Some(line) = push_u32_byte(bytes, byte) {
                let path = core::mem::take(path);
                *state = ParseState::Idle;
                Ok(Some(HostEvent::AssertRich { path, line }))
            } else {
                Ok(None)
            }
        }
    }
}

/// The external collaborator responsible for the physical byte transport between host and
/// fabric. This crate depends only on this trait (and on [`HostLinkDecoder`], which needs no
/// transport at all).
pub trait HostLink {
    fn set_addr(&mut self, board: BoardCoord, core: u32, addr: u32);
    fn store(&mut self, board: BoardCoord, core: u32, words: &[u32]);
    fn flush(&mut self);
    fn recv_byte(&mut self) -> Option<(ThreadId, u8)>;
}

/// An in-memory [`HostLink`] backing a byte queue, for exercising `write()` and
/// [`HostLinkDecoder`] end-to-end without UART hardware.
#[cfg(feature = "std")]
#[derive(Debug, Default)]
pub struct ChannelHostLink {
    pub addr_sets: Vec<(BoardCoord, u32, u32)>,
    pub writes: Vec<(BoardCoord, u32, Vec<u32>)>,
    flushed: bool,
    incoming: std::collections::VecDeque<(ThreadId, u8)>,
}

#[cfg(feature = "std")]
impl ChannelHostLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes as if they arrived from `thread`, for a test to drain through `recv_byte`.
    pub fn push_incoming(&mut self, thread: ThreadId, bytes: &[u8]) {
        self.incoming.extend(bytes.iter().map(|&b| (thread, b)));
    }

    pub fn was_flushed(&self) -> bool {
        self.flushed
    }
}

#[cfg(feature = "std")]
impl HostLink for ChannelHostLink {
    fn set_addr(&mut self, board: BoardCoord, core: u32, addr: u32) {
        self.addr_sets.push((board, core, addr));
    }

    fn store(&mut self, board: BoardCoord, core: u32, words: &[u32]) {
        self.writes.push((board, core, words.to_vec()));
    }

    fn flush(&mut self) {
        self.flushed = true;
    }

    fn recv_byte(&mut self) -> Option<(ThreadId, u8)> {
        self.incoming.pop_front()
    }
}

/// Append one CSV row, in `"<name>, <seq>, <key>, <value>"` format.
#[cfg(feature = "std")]
pub fn write_key_value_row(
    writer: &mut csv::Writer<impl std::io::Write>,
    device: &str,
    seq: u32,
    key: u32,
    value: u32,
) -> csv::Result<()> {
    writer.write_record([device, &seq.to_string(), &key.to_string(), &value.to_string()])?;
    writer.flush().map_err(csv::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn stdout_then_exit_parses_in_order() {
        let mut decoder = HostLinkDecoder::new();
        let bytes = [0x01, b'H', b'i', 0x00, 0xFF, 0x00, 0x00, 0x00, 0x00];
        let events = decoder.push_bytes(ThreadId(0), &bytes).unwrap();
        assert_eq!(events, alloc::vec![HostEvent::StdOut("Hi".to_string()), HostEvent::Exit(0)]);
    }

    #[test]
    fn key_value_sequence_is_monotonic_per_device() {
        let mut decoder = HostLinkDecoder::new();
        let mut frame = |name: &str, key: u32, value: u32| -> Vec<u8> {
            let mut bytes = alloc::vec![TAG_KEY_VALUE];
            bytes.extend_from_slice(name.as_bytes());
            bytes.push(0);
            bytes.extend_from_slice(&key.to_le_bytes());
            bytes.extend_from_slice(&value.to_le_bytes());
            bytes
        };

        let events1 = decoder.push_bytes(ThreadId(0), &frame("alpha", 1, 10)).unwrap();
        let events2 = decoder.push_bytes(ThreadId(0), &frame("alpha", 2, 20)).unwrap();
        let events3 = decoder.push_bytes(ThreadId(0), &frame("beta", 1, 99)).unwrap();

        assert_eq!(
            events1[0],
            HostEvent::KeyValue { device: "alpha".to_string(), seq: 0, key: 1, value: 10 }
        );
        assert_eq!(
            events2[0],
            HostEvent::KeyValue { device: "alpha".to_string(), seq: 1, key: 2, value: 20 }
        );
        assert_eq!(
            events3[0],
            HostEvent::KeyValue { device: "beta".to_string(), seq: 0, key: 1, value: 99 }
        );
    }

    #[test]
    fn unknown_tag_is_reported_with_the_offending_thread() {
        let mut decoder = HostLinkDecoder::new();
        let err = decoder.push_byte(ThreadId(5), 0x42).unwrap_err();
        assert_eq!(err, Error::UnknownProtocolTag { thread: ThreadId(5), tag: 0x42 });
    }

    #[test]
    fn assert_rich_carries_file_and_line() {
        let mut decoder = HostLinkDecoder::new();
        let mut bytes = alloc::vec![TAG_ASSERT_RICH];
        bytes.extend_from_slice(b"heat.cpp");
        bytes.push(0);
        bytes.extend_from_slice(&7u32.to_le_bytes());
        let events = decoder.push_bytes(ThreadId(0), &bytes).unwrap();
        assert_eq!(events, alloc::vec![HostEvent::AssertRich { path: "heat.cpp".to_string(), line: 7 }]);
    }
}
