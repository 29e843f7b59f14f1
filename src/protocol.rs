//! Line protocol parser and reply framing.
//!
//! ```text
//! Request: COMMAND[<spaces/tabs>ARGUMENT]\n
//! Reply:   OK[\tPAYLOAD]\n  |  ERR\tMESSAGE\n
//! ```
//!
//! The argument is everything after the first whitespace run and is never
//! split further; BIND payloads arrive this way.

use bytes::BytesMut;

/// One parsed request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request<'a> {
    pub command: &'a str,
    pub argument: Option<&'a str>,
}

/// Request line errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Blank line, no command token.
    Empty,
    /// Line exceeded the configured maximum.
    LineTooLong,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Empty => write!(f, "Invalid command format"),
            ParseError::LineTooLong => write!(f, "Line too long"),
        }
    }
}

impl std::error::Error for ParseError {}

fn is_separator(c: char) -> bool {
    c == ' ' || c == '\t'
}

/// Parse a request line, with or without its line terminator.
pub fn parse_request(line: &str) -> Result<Request<'_>, ParseError> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let line = line.strip_suffix('\r').unwrap_or(line);
    let line = line.trim_start_matches(is_separator);

    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    match line.find(is_separator) {
        None => Ok(Request {
            command: line,
            argument: None,
        }),
        Some(pos) => {
            let rest = line[pos..].trim_start_matches(is_separator);
            Ok(Request {
                command: &line[..pos],
                argument: (!rest.is_empty()).then_some(rest),
            })
        }
    }
}

/// A single reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok(Option<String>),
    Err(String),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Ok(None)
    }

    pub fn ok_with(payload: &str) -> Self {
        Reply::Ok(Some(single_line(payload)))
    }

    pub fn err(message: &str) -> Self {
        Reply::Err(single_line(message))
    }

    pub fn unknown_command() -> Self {
        Reply::err("Unknown command")
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Ok(_))
    }

    /// Encode the reply including its trailing newline.
    pub fn encode(&self) -> BytesMut {
        let (status, payload) = match self {
            Reply::Ok(payload) => ("OK", payload.as_deref()),
            Reply::Err(message) => ("ERR", Some(message.as_str())),
        };

        let mut buf = BytesMut::with_capacity(status.len() + 2 + payload.map_or(0, str::len));
        buf.extend_from_slice(status.as_bytes());
        if let Some(payload) = payload {
            buf.extend_from_slice(b"\t");
            buf.extend_from_slice(payload.as_bytes());
        }
        buf.extend_from_slice(b"\n");
        buf
    }
}

/// Remove embedded line breaks; replies must stay on one line.
pub fn single_line(text: &str) -> String {
    text.chars().filter(|c| !matches!(c, '\r' | '\n')).collect()
}
