//! Wire protocol: line formats shared by the directory and the overlay.
//!
//! Every message is one `\n`-terminated ASCII line. Records and chat lines
//! join their fields with the two-character token [`FIELD_SEPARATOR`], split
//! as a literal substring. Nothing is escaped, so a name or body containing
//! the separator splits in unexpected places.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::PeerId;

/// Token joining the fields of a record or chat line.
pub const FIELD_SEPARATOR: &str = "#!";

/// Id field sent in a registration line before an id has been assigned.
pub const ID_PLACEHOLDER: &str = "-1";

/// Local input that makes a peer leave the session.
pub const QUIT_TOKEN: &str = "\\quit";

/// The request a directory connection carries, sent as the first line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Register and receive an id plus candidates.
    Join,
    /// Ask for a fresh candidate set for an existing id.
    RequestNew,
    /// Remove an id from the registry.
    Exit,
}

impl Command {
    /// The numeric code written on the wire.
    pub fn code(&self) -> u8 {
        match self {
            Self::Join => 1,
            Self::RequestNew => 2,
            Self::Exit => 3,
        }
    }

    /// Parse a command line. Surrounding whitespace is ignored.
    pub fn from_line(line: &str) -> Option<Self> {
        match line.trim().parse::<u8>().ok()? {
            1 => Some(Self::Join),
            2 => Some(Self::RequestNew),
            3 => Some(Self::Exit),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Join => write!(f, "JOIN"),
            Self::RequestNew => write!(f, "REQUEST_NEW"),
            Self::Exit => write!(f, "EXIT"),
        }
    }
}

/// One registered peer as the directory stores and advertises it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryRecord {
    pub id: PeerId,
    pub name: String,
    pub address: String,
    pub port: u16,
}

impl DirectoryRecord {
    /// Encode as a candidate line (without the trailing newline).
    ///
    /// A trailing separator follows the port, as existing directories emit.
    pub fn to_line(&self) -> String {
        format!(
            "{name}{sep}{address}{sep}{id}{sep}{port}{sep}",
            name = self.name,
            address = self.address,
            id = self.id,
            port = self.port,
            sep = FIELD_SEPARATOR,
        )
    }

    /// Parse a candidate line: `name#!address#!id#!port[#!]`.
    pub fn from_line(line: &str) -> Option<Self> {
        let [name, address, id, port] = split_record(line)?;
        Some(Self {
            id: id.parse().ok()?,
            name: name.to_string(),
            address: address.to_string(),
            port: port.trim().parse().ok()?,
        })
    }
}

/// The registration a joining peer sends after the JOIN command.
///
/// Carries the same four fields as a [`DirectoryRecord`] but the id field is
/// only a placeholder; the directory assigns the real id itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub name: String,
    pub address: String,
    pub port: u16,
}

impl Registration {
    pub fn to_line(&self) -> String {
        format!(
            "{name}{sep}{address}{sep}{id}{sep}{port}{sep}",
            name = self.name,
            address = self.address,
            id = ID_PLACEHOLDER,
            port = self.port,
            sep = FIELD_SEPARATOR,
        )
    }

    pub fn from_line(line: &str) -> Option<Self> {
        let [name, address, _id, port] = split_record(line)?;
        Some(Self {
            name: name.to_string(),
            address: address.to_string(),
            port: port.trim().parse().ok()?,
        })
    }

    /// Turn the registration into a record under the assigned id.
    pub fn into_record(self, id: PeerId) -> DirectoryRecord {
        DirectoryRecord {
            id,
            name: self.name,
            address: self.address,
            port: self.port,
        }
    }
}

/// A chat line travelling through the overlay: `author#!body`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub author: String,
    pub body: String,
}

impl ChatMessage {
    pub fn new(author: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            body: body.into(),
        }
    }

    /// Encode for the wire (without the trailing newline).
    pub fn to_line(&self) -> String {
        format!("{}{FIELD_SEPARATOR}{}", self.author, self.body)
    }

    /// Split a received line at the first separator.
    ///
    /// Returns `None` when there is no separator or either side is empty;
    /// such a line is neither displayed nor forwarded.
    pub fn parse(line: &str) -> Option<Self> {
        let (author, body) = line.split_once(FIELD_SEPARATOR)?;
        if author.is_empty() || body.is_empty() {
            return None;
        }
        Some(Self::new(author, body))
    }
}

/// Strip the line terminator (`\n` or `\r\n`) from a raw line.
pub fn trim_line_end(line: &str) -> &str {
    line.strip_suffix('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .unwrap_or(line)
}

/// Remove the separator and line breaks from a value that will be embedded
/// in a record or chat line, and trim surrounding whitespace.
pub fn sanitize_field(value: &str) -> String {
    value
        .replace(FIELD_SEPARATOR, "")
        .replace(['\r', '\n'], "")
        .trim()
        .to_string()
}

/// Split a record line into exactly four non-empty fields.
fn split_record(line: &str) -> Option<[&str; 4]> {
    let line = trim_line_end(line);
    let line = line.strip_suffix(FIELD_SEPARATOR).unwrap_or(line);
    let mut fields = line.split(FIELD_SEPARATOR);
    let out = [fields.next()?, fields.next()?, fields.next()?, fields.next()?];
    if fields.next().is_some() || out.iter().any(|f| f.is_empty()) {
        return None;
    }
    Some(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
