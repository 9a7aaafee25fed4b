//! Column-name normalization applied to generated answers.
//!
//! The schema corpus calls the customer key `custid` while the query logs and
//! the target database use `customer_id`. The generation prompt asks for the
//! rewrite; this module enforces it on the output.

use std::borrow::Cow;

const LEGACY_NAME: &str = "custid";
const REPLACEMENT: &str = "customer_id";

/// Words longer than this can never be `custid`, so the streaming rewriter
/// stops holding them back.
const MAX_HELD_BYTES: usize = 16;

/// Replace every standalone `custid` word (any ASCII case) with `customer_id`.
/// Identifiers that merely contain it, like `custid_old`, are left alone.
pub fn normalize_columns(text: &str) -> Cow<'_, str> {
    if !text.to_ascii_lowercase().contains(LEGACY_NAME) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + 8);
    let mut rest = text;
    while !rest.is_empty() {
        let word_len = rest.find(|c: char| !is_word_char(c)).unwrap_or(rest.len());
        if word_len > 0 {
            let word = &rest[..word_len];
            if word.eq_ignore_ascii_case(LEGACY_NAME) {
                out.push_str(REPLACEMENT);
            } else {
                out.push_str(word);
            }
            rest = &rest[word_len..];
        } else {
            let gap = rest.find(is_word_char).unwrap_or(rest.len());
            out.push_str(&rest[..gap]);
            rest = &rest[gap..];
        }
    }
    Cow::Owned(out)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Applies [`normalize_columns`] to text that arrives in arbitrary chunks.
///
/// A trailing partial word is held back until the next chunk shows where it
/// ends, so `cus` + `tid ` is still rewritten.
#[derive(Debug, Default)]
pub struct StreamingRewriter {
    pending: String,
    /// The last emitted text ended inside a word that was flushed unmodified.
    in_word: bool,
}

impl StreamingRewriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the text that is now safe to emit.
    pub fn push(&mut self, chunk: &str) -> String {
        self.pending.push_str(chunk);
        let mut out = String::new();

        if self.in_word {
            match self.pending.find(|c: char| !is_word_char(c)) {
                Some(end) => {
                    out.extend(self.pending.drain(..end));
                    self.in_word = false;
                }
                None => {
                    out.push_str(&self.pending);
                    self.pending.clear();
                    return out;
                }
            }
        }

        let split = self
            .pending
            .char_indices()
            .rev()
            .find(|(_, c)| !is_word_char(*c))
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        out.push_str(&normalize_columns(&self.pending[..split]));
        self.pending.drain(..split);

        if self.pending.len() > MAX_HELD_BYTES {
            out.push_str(&self.pending);
            self.pending.clear();
            self.in_word = true;
        }

        out
    }

    /// Flush whatever is still held back at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        if std::mem::take(&mut self.in_word) {
            rest
        } else {
            normalize_columns(&rest).into_owned()
        }
    }
}
