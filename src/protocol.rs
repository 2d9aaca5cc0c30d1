use core::fmt;
use thiserror::Error;

/// Every wire line ends with carriage-return, NUL, newline.
pub const TERMINATOR: &[u8] = b"\r\0\n";

/// First line the c-wrapper peer sends after connecting.
pub const WELCOME_BANNER: &str = "TestBench ISO-8859-1";

/// TCP port the c-wrapper dials back to.
pub const DEFAULT_PORT: u16 = 50000;

/// Upper bound on a single protocol line, terminator included.
pub const MAX_LINE_SIZE: usize = 1024;

/// Command verbs understood by the c-wrapper peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Boot,
    Info,
    Rsdo,
    Wsdo,
    Sync,
    Quit,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Boot => "boot",
            Verb::Info => "info",
            Verb::Rsdo => "rsdo",
            Verb::Wsdo => "wsdo",
            Verb::Sync => "sync",
            Verb::Quit => "quit",
        }
    }

    fn from_wire(name: &str) -> Option<Verb> {
        match name {
            "boot" => Some(Verb::Boot),
            "info" => Some(Verb::Info),
            "rsdo" => Some(Verb::Rsdo),
            "wsdo" => Some(Verb::Wsdo),
            "sync" => Some(Verb::Sync),
            "quit" => Some(Verb::Quit),
            _ => None,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the wire protocol: a verb and an opaque payload.
///
/// Payload fields are comma-separated hex integers, except for the free-form
/// serial string at the end of an `info` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub verb: Verb,
    pub data: String,
}

impl Command {
    pub fn new(verb: Verb, data: impl Into<String>) -> Self {
        Self {
            verb,
            data: data.into(),
        }
    }

    /// A command with no payload (`quit` is the only one we send bare).
    pub fn bare(verb: Verb) -> Self {
        Self {
            verb,
            data: String::new(),
        }
    }

    /// Wire encoding: `<name>[,<data>]\r\0\n`. The comma is omitted when the
    /// payload is empty.
    pub fn encode(&self) -> Vec<u8> {
        let name = self.verb.as_str();
        let mut out = Vec::with_capacity(name.len() + 1 + self.data.len() + TERMINATOR.len());
        out.extend_from_slice(name.as_bytes());
        if !self.data.is_empty() {
            out.push(b',');
            out.extend_from_slice(self.data.as_bytes());
        }
        out.extend_from_slice(TERMINATOR);
        out
    }

    /// Decodes one received line. Returns `None` for anything that is not a
    /// command: the welcome banner, noise, or a line without the comma
    /// separator. Callers rely on this sentinel to tell "not a command" apart
    /// from "command with empty payload".
    pub fn decode(line: &[u8]) -> Option<Command> {
        let text = core::str::from_utf8(line).ok()?;
        let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
        let (name, data) = text.split_once(',')?;
        let verb = Verb::from_wire(name)?;
        Some(Command {
            verb,
            data: data.to_owned(),
        })
    }

    /// Interprets an `rsdo`/`wsdo` reply payload, which starts with
    /// `<node-hex>,<statuscode-hex>`. Status 0 is success; anything else is a
    /// device fault carrying that code.
    pub fn sdo_status(&self) -> Result<(), ProtocolError> {
        let mut fields = self.data.split(',');
        let node = u8::try_from(hex_field(fields.next(), &self.data)?)
            .map_err(|_| ProtocolError::MalformedPayload(self.data.clone()))?;
        let code = hex_field(fields.next(), &self.data)?;
        if code == 0 {
            Ok(())
        } else {
            Err(ProtocolError::DeviceFault { node, code })
        }
    }

    /// Raw register value from a successful `rsdo` reply: the hex field that
    /// follows the `<node>,<status>` prefix.
    pub fn rsdo_value(&self) -> Result<i64, ProtocolError> {
        self.sdo_status()?;
        let field = self
            .data
            .split(',')
            .nth(2)
            .ok_or_else(|| ProtocolError::MalformedPayload(self.data.clone()))?;
        i64::from_str_radix(field.trim(), 16)
            .map_err(|_| ProtocolError::MalformedPayload(self.data.clone()))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command{{{},{}}}", self.verb, self.data)
    }
}

/// Identity of a physical node, parsed from an `info` reply payload:
/// `<node>,<device>,<vendor>,<product>,<revision>,<serial>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: u8,
    pub device: u32,
    pub vendor: u32,
    pub product: u32,
    pub revision: u32,
    pub serial: String,
}

impl NodeInfo {
    pub fn parse(payload: &str) -> Result<NodeInfo, ProtocolError> {
        let mut fields = payload.split(',');
        let id = u8::try_from(hex_field(fields.next(), payload)?)
            .map_err(|_| ProtocolError::MalformedPayload(payload.to_owned()))?;
        let device = hex_field(fields.next(), payload)?;
        let vendor = hex_field(fields.next(), payload)?;
        let product = hex_field(fields.next(), payload)?;
        let revision = hex_field(fields.next(), payload)?;
        let serial = fields
            .next()
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProtocolError::MalformedPayload(payload.to_owned()))?;
        Ok(NodeInfo {
            id,
            device,
            vendor,
            product,
            revision,
            serial,
        })
    }
}

fn hex_field(field: Option<&str>, payload: &str) -> Result<u32, ProtocolError> {
    let field = field.ok_or_else(|| ProtocolError::MalformedPayload(payload.to_owned()))?;
    u32::from_str_radix(field.trim(), 16)
        .map_err(|_| ProtocolError::MalformedPayload(payload.to_owned()))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed payload: {0:?}")]
    MalformedPayload(String),

    #[error("device fault on node 0x{node:x} (status 0x{code:x})")]
    DeviceFault { node: u8, code: u32 },

    #[error("unexpected command: {0}")]
    UnexpectedCommand(String),

    #[error("unexpected welcome banner: {0:?}")]
    BadBanner(String),
}
