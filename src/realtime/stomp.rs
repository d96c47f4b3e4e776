//! Minimal STOMP 1.2 frame codec for the realtime broker: only the commands
//! this client exchanges, with STOMP 1.2 header escaping.

use crate::error::{SessionError, SessionResult};

/// Commands this client sends or expects from the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Subscribe,
    Unsubscribe,
    Message,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Message => "MESSAGE",
            Command::Error => "ERROR",
        }
    }

    fn parse(s: &str) -> Option<Command> {
        match s {
            "CONNECT" => Some(Command::Connect),
            "CONNECTED" => Some(Command::Connected),
            "SUBSCRIBE" => Some(Command::Subscribe),
            "UNSUBSCRIBE" => Some(Command::Unsubscribe),
            "MESSAGE" => Some(Command::Message),
            "ERROR" => Some(Command::Error),
            _ => None,
        }
    }
}

/// A single STOMP frame. Bodies are UTF-8 text; this client only ever
/// carries JSON payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

// STOMP 1.2 header escaping: backslash, line feed and colon.
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(value: &str) -> SessionResult<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            other => {
                return Err(SessionError::malformed(format!(
                    "bad header escape: \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self { command, headers: Vec::new(), body: String::new() }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value for a header name, if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    /// Authenticated handshake frame.
    pub fn connect(token: &str) -> Self {
        Frame::new(Command::Connect)
            .with_header("accept-version", "1.2")
            .with_header("Authorization", &format!("Bearer {token}"))
    }

    pub fn subscribe(id: u64, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .with_header("id", &id.to_string())
            .with_header("destination", destination)
    }

    pub fn unsubscribe(id: u64) -> Self {
        Frame::new(Command::Unsubscribe).with_header("id", &id.to_string())
    }

    /// Serialize to the wire form: command line, header lines, blank line,
    /// body, NUL terminator.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            out.push_str(&escape(name));
            out.push(':');
            out.push_str(&escape(value));
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse one frame from its wire form. Heartbeat newlines must be
    /// filtered out by the caller before parsing.
    pub fn parse(raw: &str) -> SessionResult<Frame> {
        let raw = raw.strip_suffix('\0').unwrap_or(raw);
        let (head, body) = raw
            .split_once("\n\n")
            .ok_or_else(|| SessionError::malformed("frame missing header/body separator"))?;
        let mut lines = head.lines();
        let command_line = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| SessionError::malformed("empty frame"))?;
        let command = Command::parse(command_line)
            .ok_or_else(|| SessionError::malformed(format!("unknown command: {command_line}")))?;
        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| SessionError::malformed(format!("bad header line: {line}")))?;
            headers.push((unescape(name)?, unescape(value)?));
        }
        Ok(Frame { command, headers, body: body.to_string() })
    }
}
