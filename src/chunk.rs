//! Paragraph-boundary text chunker for the retrieval index.
//!
//! Paragraphs (blank-line separated) are packed greedily into chunks of at
//! most `max_tokens * 4` bytes. A paragraph that is too long on its own is
//! cut at the last newline or space before the limit, or mid-word when there
//! is none. Every chunk carries the SHA-256 of its text.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

struct Packer<'a> {
    doc_id: &'a str,
    max_chars: usize,
    buf: String,
    chunks: Vec<Chunk>,
}

impl Packer<'_> {
    fn emit(&mut self, text: &str) {
        let index = self.chunks.len() as i64;
        self.chunks.push(make_chunk(self.doc_id, index, text));
    }

    fn flush(&mut self) {
        if !self.buf.is_empty() {
            let text = std::mem::take(&mut self.buf);
            self.emit(&text);
        }
    }

    fn push_paragraph(&mut self, para: &str) {
        if para.len() > self.max_chars {
            self.flush();
            for piece in hard_split(para, self.max_chars) {
                self.emit(piece);
            }
            return;
        }
        if !self.buf.is_empty() && self.buf.len() + 2 + para.len() > self.max_chars {
            self.flush();
        }
        if !self.buf.is_empty() {
            self.buf.push_str("\n\n");
        }
        self.buf.push_str(para);
    }
}

/// Split text into chunks with contiguous indices starting at 0. Blank
/// input yields no chunks.
pub fn chunk_text(doc_id: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let mut packer = Packer {
        doc_id,
        max_chars: max_tokens.max(1) * CHARS_PER_TOKEN,
        buf: String::new(),
        chunks: Vec::new(),
    };
    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        packer.push_paragraph(para);
    }
    packer.flush();
    packer.chunks
}

/// Cut an oversized paragraph into trimmed, non-empty pieces of at most
/// `max_chars` bytes, never inside a UTF-8 sequence.
fn hard_split(mut rest: &str, max_chars: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    while !rest.is_empty() {
        let cut = if rest.len() <= max_chars {
            rest.len()
        } else {
            let mut limit = max_chars;
            while !rest.is_char_boundary(limit) {
                limit -= 1;
            }
            match rest[..limit].rfind(['\n', ' ']) {
                Some(pos) if pos > 0 => pos + 1,
                _ if limit > 0 => limit,
                // One character wider than the limit still has to advance.
                _ => rest.chars().next().map(char::len_utf8).unwrap_or(rest.len()),
            }
        };
        let piece = rest[..cut].trim();
        if !piece.is_empty() {
            pieces.push(piece);
        }
        rest = &rest[cut..];
    }
    pieces
}

fn make_chunk(doc_id: &str, index: i64, text: &str) -> Chunk {
    Chunk {
        id: Uuid::new_v4().to_string(),
        doc_id: doc_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash: format!("{:x}", Sha256::digest(text.as_bytes())),
    }
}
