//! Entity-text tokenizer.
//!
//! Parses the whitespace-separated token stream used by the entities lump:
//! bare words, quoted strings, `//` line comments and `/* */` block comments.

pub const MAX_TOKEN_CHARS: usize = 1024;

/// Streaming tokenizer over entity text.
pub struct Tokenizer<'a> {
    data: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(data: &'a str) -> Tokenizer<'a> {
        Tokenizer {
            data: data.as_bytes(),
            pos: 0,
            line: 1,
        }
    }

    /// Current 1-based line number, for error reporting.
    pub fn line(&self) -> usize {
        self.line
    }

    fn skip_whitespace(&mut self, crossline: bool) -> bool {
        loop {
            while self.pos < self.data.len() && self.data[self.pos] <= b' ' {
                if self.data[self.pos] == b'\n' {
                    if !crossline {
                        return false;
                    }
                    self.line += 1;
                }
                self.pos += 1;
            }
            if self.pos >= self.data.len() {
                return false;
            }
            // line comment
            if self.data[self.pos] == b'/' && self.data.get(self.pos + 1) == Some(&b'/') {
                while self.pos < self.data.len() && self.data[self.pos] != b'\n' {
                    self.pos += 1;
                }
                continue;
            }
            // block comment
            if self.data[self.pos] == b'/' && self.data.get(self.pos + 1) == Some(&b'*') {
                self.pos += 2;
                while self.pos < self.data.len() {
                    if self.data[self.pos] == b'\n' {
                        self.line += 1;
                    }
                    if self.data[self.pos] == b'*'
                        && self.data.get(self.pos + 1) == Some(&b'/')
                    {
                        self.pos += 2;
                        break;
                    }
                    self.pos += 1;
                }
                continue;
            }
            return true;
        }
    }

    /// Next token, crossing line boundaries. `None` at end of input.
    pub fn parse(&mut self) -> Option<String> {
        self.parse_ext(true)
    }

    /// Next token; with `crossline` false, stops at the end of the current
    /// line and returns `None` if no token remains on it.
    pub fn parse_ext(&mut self, crossline: bool) -> Option<String> {
        if !self.skip_whitespace(crossline) {
            return None;
        }

        let mut token = Vec::new();

        // quoted string: everything up to the closing quote
        if self.data[self.pos] == b'"' {
            self.pos += 1;
            while self.pos < self.data.len() && self.data[self.pos] != b'"' {
                if self.data[self.pos] == b'\n' {
                    self.line += 1;
                }
                if token.len() < MAX_TOKEN_CHARS {
                    token.push(self.data[self.pos]);
                }
                self.pos += 1;
            }
            if self.pos < self.data.len() {
                self.pos += 1; // closing quote
            }
            return Some(String::from_utf8_lossy(&token).into_owned());
        }

        while self.pos < self.data.len() && self.data[self.pos] > b' ' {
            if token.len() < MAX_TOKEN_CHARS {
                token.push(self.data[self.pos]);
            }
            self.pos += 1;
        }
        Some(String::from_utf8_lossy(&token).into_owned())
    }
}

/// Parse "x y z" style vectors; missing or malformed components read as 0.
pub fn parse_vector(text: &str, out: &mut [f32]) {
    let mut it = text.split_whitespace();
    for v in out.iter_mut() {
        *v = it.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);
    }
}
