//! Growable text buffer used to accumulate assembly output lines before
//! they are handed to a writer.
//!
//! Grounded on `original_source/source/core/string_buffer.c`'s growth
//! policy (`ensure_capacity`, grow-by-fixed-increment), simplified to the
//! single encoding this core actually produces (UTF-8 assembly text) —
//! the source's five-mode unicode/wide-character encoder is a C string
//! literal lexer concern the front end owns.

const BUFFER_MIN_CAPACITY: usize = 32;
const BUFFER_GROW: usize = 64;

/// A growable byte-backed string buffer with source-matched growth steps.
#[derive(Debug, Default, Clone)]
pub struct StringBuffer {
    contents: String,
}

impl StringBuffer {
    pub fn new() -> Self {
        StringBuffer {
            contents: String::with_capacity(BUFFER_MIN_CAPACITY),
        }
    }

    fn ensure_capacity(&mut self, additional: usize) {
        let required = self.contents.len() + additional;
        if required > self.contents.capacity() {
            let grown = required + BUFFER_GROW;
            self.contents.reserve(grown - self.contents.len());
        }
    }

    pub fn push_str(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        self.ensure_capacity(fragment.len());
        self.contents.push_str(fragment);
    }

    pub fn push_char(&mut self, ch: char) {
        self.ensure_capacity(ch.len_utf8());
        self.contents.push(ch);
    }

    pub fn push_line(&mut self, fragment: &str) {
        self.push_str(fragment);
        self.push_char('\n');
    }

    pub fn as_str(&self) -> &str {
        &self.contents
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    pub fn into_string(self) -> String {
        self.contents
    }
}

impl From<StringBuffer> for String {
    fn from(buf: StringBuffer) -> Self {
        buf.into_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_lines_in_order() {
        let mut buf = StringBuffer::new();
        buf.push_line("\t.text");
        buf.push_line("\t.globl\tmain");
        buf.push_str("main:\n");
        assert_eq!(buf.as_str(), "\t.text\n\t.globl\tmain\nmain:\n");
    }
}
