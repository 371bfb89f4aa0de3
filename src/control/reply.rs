/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

/// A framed control channel reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpReply {
    pub code: u16,
    pub text: String,
}

impl FtpReply {
    /// The reply group (hundreds digit): 1 preliminary, 2 completion,
    /// 3 intermediate, 4 transient error, 5 permanent error.
    #[inline]
    pub fn group(&self) -> u16 {
        self.code / 100
    }

    #[inline]
    pub fn is_preliminary(&self) -> bool {
        self.group() == 1
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.group() >= 4
    }
}

/// Stream-oriented reply framing per RFC 959 §4.2.
///
/// Bytes are buffered until a terminating `ddd<SP>` line arrives. The
/// buffer holds raw bytes and the emitted text is decoded as ISO-8859-1,
/// so byte identity is preserved for higher layers; malformed input is
/// never an error here, it accumulates until a terminator shows up.
#[derive(Default)]
pub(crate) struct FtpReplyParser {
    buf: Vec<u8>,
}

fn parse_code(line: &[u8]) -> Option<u16> {
    if line.len() < 4 {
        return None;
    }
    if !(line[0].is_ascii_digit() && line[1].is_ascii_digit() && line[2].is_ascii_digit()) {
        return None;
    }
    let code = (line[0] - b'0') as u16 * 100 + (line[1] - b'0') as u16 * 10 + (line[2] - b'0') as u16;
    Some(code)
}

fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

impl FtpReplyParser {
    pub(crate) fn new() -> Self {
        FtpReplyParser::default()
    }

    #[inline]
    pub(crate) fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Append a chunk and drain every complete reply it finishes.
    pub(crate) fn feed(&mut self, data: &[u8]) -> Vec<FtpReply> {
        self.buf.extend_from_slice(data);
        let mut replies = Vec::new();
        while let Some(reply) = self.take_reply() {
            replies.push(reply);
        }
        replies
    }

    fn take_reply(&mut self) -> Option<FtpReply> {
        let mut line_start = 0;
        loop {
            let nl = memchr::memchr(b'\n', &self.buf[line_start..])? + line_start;
            let mut line_end = nl;
            if line_end > line_start && self.buf[line_end - 1] == b'\r' {
                line_end -= 1;
            }
            let line = &self.buf[line_start..line_end];
            if let Some(code) = parse_code(line) {
                if line[3] == b' ' {
                    let raw: Vec<u8> = self.buf.drain(..=nl).collect();
                    return Some(assemble_reply(code, &raw));
                }
            }
            line_start = nl + 1;
        }
    }
}

/// Strip the `ddd-` / `ddd ` prefix from every line carrying the reply's
/// own code, join the lines and trim the result.
fn assemble_reply(code: u16, raw: &[u8]) -> FtpReply {
    let text = latin1_to_string(raw);
    let mut lines = Vec::new();
    for line in text.lines() {
        let stripped = match parse_code(line.as_bytes()) {
            Some(c) if c == code && matches!(line.as_bytes()[3], b'-' | b' ') => &line[4..],
            _ => line,
        };
        lines.push(stripped.trim_end());
    }
    FtpReply {
        code,
        text: lines.join("\n").trim().to_string(),
    }
}
