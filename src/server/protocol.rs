//! Line formats of the policy-query and DNS-observation channels.
//!
//! Query request: `socket;<ip>;<uid>;<pid>;<tag>#<tag>#...`, answered with a
//! single line `0` (allow) or `1` (deny). Observation: `<event>;<ip>;<host>`,
//! never answered.

use std::fmt;
use std::net::IpAddr;

/// Prefix of field 0 marking a socket egress check.
pub const EGRESS_MARKER: &str = "socket";

/// Minimum fields in a query line; shorter lines are allowed unchecked.
pub const MIN_QUERY_FIELDS: usize = 5;

/// Minimum fields in an observation line.
pub const MIN_OBSERVATION_FIELDS: usize = 3;

/// Observation event emitted by the resolver hook.
pub const RESOLVER_EVENT: &str = "getaddrinfo";

/// Separator between protocol fields.
pub const FIELD_SEPARATOR: char = ';';

/// Separator between tags in a label field.
pub const TAG_SEPARATOR: char = '#';

/// Egress decision returned to the enforcement hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Let the flow proceed.
    Allow,
    /// Block the flow.
    Deny,
}

impl Decision {
    /// Wire code: `"0"` allow, `"1"` deny.
    pub fn code(self) -> &'static str {
        match self {
            Self::Allow => "0",
            Self::Deny => "1",
        }
    }

    /// Parse a wire code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "0" => Some(Self::Allow),
            "1" => Some(Self::Deny),
            _ => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Split on `sep`, dropping trailing empty fields.
///
/// Hooks terminate records with a separator (`socket;...;label;`), so a
/// trailing empty field carries no information and is not counted. An empty
/// input is one empty field; input made only of separators is no fields.
pub fn split_fields(line: &str, sep: char) -> Vec<&str> {
    if line.is_empty() {
        return vec![line];
    }
    let mut fields: Vec<&str> = line.split(sep).collect();
    while fields.last().is_some_and(|f| f.is_empty()) {
        fields.pop();
    }
    fields
}

/// A parsed query line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryRequest<'a> {
    /// Fewer than [`MIN_QUERY_FIELDS`] fields.
    Malformed,
    /// A socket egress check.
    Egress {
        /// Destination address field, unparsed.
        ip: &'a str,
        /// Label field, `#`-joined decimal tag values.
        label: &'a str,
    },
    /// Enough fields, but field 0 is not a recognized check.
    Unrecognized {
        /// Field 0.
        kind: &'a str,
    },
}

impl<'a> QueryRequest<'a> {
    /// Parse one request line (without its terminator).
    pub fn parse(line: &'a str) -> Self {
        let fields = split_fields(line, FIELD_SEPARATOR);
        if fields.len() < MIN_QUERY_FIELDS {
            return Self::Malformed;
        }
        match (
            fields.first().copied(),
            fields.get(1).copied(),
            fields.get(4).copied(),
        ) {
            (Some(kind), Some(ip), Some(label)) if kind.starts_with(EGRESS_MARKER) => {
                Self::Egress { ip, label }
            }
            (Some(kind), _, _) => Self::Unrecognized { kind },
            _ => Self::Malformed,
        }
    }
}

/// One entry of a label field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelToken<'a> {
    /// A decimal tag value.
    Tag(i64),
    /// Text that is not a 64-bit integer.
    Unparseable(&'a str),
}

/// Split a label field into tokens. A field of only separators yields none.
pub fn parse_label_field(field: &str) -> Vec<LabelToken<'_>> {
    split_fields(field, TAG_SEPARATOR)
        .into_iter()
        .map(|raw| match raw.parse::<i64>() {
            Ok(value) => LabelToken::Tag(value),
            Err(_) => LabelToken::Unparseable(raw),
        })
        .collect()
}

/// Canonical text of an IP literal, or `None` if `raw` is not one.
pub fn canonical_ip(raw: &str) -> Option<String> {
    raw.trim().parse::<IpAddr>().ok().map(|ip| ip.to_string())
}

/// A parsed observation line: `ip` resolved from `hostname`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation<'a> {
    /// Hook event name (field 0).
    pub event: &'a str,
    /// Resolved address (field 1).
    pub ip: &'a str,
    /// Name that was looked up (field 2).
    pub hostname: &'a str,
}

impl<'a> Observation<'a> {
    /// Parse one observation line; `None` if it has fewer than three fields.
    pub fn parse(line: &'a str) -> Option<Self> {
        let fields = split_fields(line, FIELD_SEPARATOR);
        if fields.len() < MIN_OBSERVATION_FIELDS {
            return None;
        }
        Some(Self {
            event: fields.first().copied()?,
            ip: fields.get(1).copied()?,
            hostname: fields.get(2).copied()?,
        })
    }

    /// Whether the event came from the resolver hook.
    pub fn is_resolver_event(&self) -> bool {
        self.event == RESOLVER_EVENT
    }
}
