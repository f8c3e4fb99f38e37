// clcore Streams - Character Input
//
// The reader consumes characters from a `Stream`: a character source plus a
// pushback buffer. Sources are in-memory strings or any buffered byte reader
// decoded as UTF-8 a line at a time.

use std::fmt;
use std::io::{self, BufRead};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use smallvec::SmallVec;

use crate::conditions::Condition;

/// Where characters come from.
pub trait CharSource: Send {
    fn next_char(&mut self) -> io::Result<Option<char>>;

    /// True when a character is available without blocking.
    fn ready(&mut self) -> bool {
        true
    }

    /// Discard buffered input.
    fn clear(&mut self) {}
}

/// In-memory source.
pub struct StringSource {
    chars: Vec<char>,
    index: usize,
}

impl StringSource {
    pub fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            index: 0,
        }
    }
}

impl CharSource for StringSource {
    fn next_char(&mut self) -> io::Result<Option<char>> {
        let c = self.chars.get(self.index).copied();
        if c.is_some() {
            self.index += 1;
        }
        Ok(c)
    }

    fn ready(&mut self) -> bool {
        self.index < self.chars.len()
    }

    fn clear(&mut self) {
        self.index = self.chars.len();
    }
}

/// Line-buffered UTF-8 source over a byte reader.
pub struct ReaderSource<R> {
    inner: R,
    line: Vec<char>,
    index: usize,
}

impl<R: BufRead + Send> ReaderSource<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line: Vec::new(),
            index: 0,
        }
    }
}

impl<R: BufRead + Send> CharSource for ReaderSource<R> {
    fn next_char(&mut self) -> io::Result<Option<char>> {
        if self.index >= self.line.len() {
            let mut buf = String::new();
            if self.inner.read_line(&mut buf)? == 0 {
                return Ok(None);
            }
            self.line = buf.chars().collect();
            self.index = 0;
        }
        let c = self.line[self.index];
        self.index += 1;
        Ok(Some(c))
    }

    fn ready(&mut self) -> bool {
        self.index < self.line.len()
    }

    fn clear(&mut self) {
        self.line.clear();
        self.index = 0;
    }
}

struct StreamState {
    source: Box<dyn CharSource>,
    pushback: SmallVec<[char; 4]>,
    position: usize,
    at_eof: bool,
}

/// A character input stream shared between Lisp values.
pub struct Stream {
    name: String,
    state: Mutex<StreamState>,
}

impl Stream {
    pub fn new(name: impl Into<String>, source: Box<dyn CharSource>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(StreamState {
                source,
                pushback: SmallVec::new(),
                position: 0,
                at_eof: false,
            }),
        }
    }

    pub fn from_string(input: &str) -> Arc<Self> {
        Arc::new(Self::new("string-input", Box::new(StringSource::new(input))))
    }

    pub fn from_reader<R: BufRead + Send + 'static>(name: &str, reader: R) -> Arc<Self> {
        Arc::new(Self::new(name, Box::new(ReaderSource::new(reader))))
    }

    pub fn stdin() -> Arc<Self> {
        Self::from_reader("standard-input", io::BufReader::new(io::stdin()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Next character, or `None` at end of input.
    pub fn read_char(&self) -> Result<Option<char>, Condition> {
        let mut state = self.state();
        if let Some(c) = state.pushback.pop() {
            state.position += 1;
            return Ok(Some(c));
        }
        if state.at_eof {
            return Ok(None);
        }
        match state.source.next_char() {
            Ok(Some(c)) => {
                state.position += 1;
                Ok(Some(c))
            }
            Ok(None) => {
                state.at_eof = true;
                Ok(None)
            }
            Err(e) => Err(Condition::stream_error(format!("{}: {}", self.name, e))),
        }
    }

    /// Push a character back; the next `read_char` returns it.
    pub fn unread_char(&self, c: char) {
        let mut state = self.state();
        state.pushback.push(c);
        state.position = state.position.saturating_sub(1);
    }

    pub fn peek_char(&self) -> Result<Option<char>, Condition> {
        let c = self.read_char()?;
        if let Some(c) = c {
            self.unread_char(c);
        }
        Ok(c)
    }

    /// Read up to a newline. The flag is true when input ended before one.
    pub fn read_line(&self) -> Result<Option<(String, bool)>, Condition> {
        let mut line = String::new();
        loop {
            match self.read_char()? {
                Some('\n') => return Ok(Some((line, false))),
                Some(c) => line.push(c),
                None if line.is_empty() => return Ok(None),
                None => return Ok(Some((line, true))),
            }
        }
    }

    /// True when a character is available now.
    pub fn listen(&self) -> bool {
        let mut state = self.state();
        !state.pushback.is_empty() || (!state.at_eof && state.source.ready())
    }

    pub fn clear_input(&self) {
        let mut state = self.state();
        state.pushback.clear();
        state.source.clear();
    }

    /// Characters consumed so far.
    pub fn position(&self) -> usize {
        self.state().position
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<STREAM {}>", self.name)
    }
}
