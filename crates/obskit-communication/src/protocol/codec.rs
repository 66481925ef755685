//! Command encoding and response boundary handling
//!
//! These instruments speak single-line exchanges: a short command framed by
//! a terminator byte, answered by a single response line framed by another
//! terminator. Some firmware revisions switch the response terminator
//! between CR and LF, so framing carries a fallback terminator and the
//! executor promotes it once a device is seen using it.

/// A single protocol command ready to be encoded on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Payload text without the terminator.
    pub payload: String,
    /// Terminator byte appended on encode.
    pub terminator: u8,
    /// Expected acknowledgement for set commands. When absent, the device
    /// is expected to echo the payload.
    pub ack: Option<String>,
}

impl Command {
    /// Create a command with the default echo acknowledgement
    pub fn new(payload: impl Into<String>, terminator: u8) -> Self {
        Self {
            payload: payload.into(),
            terminator,
            ack: None,
        }
    }

    /// Override the expected acknowledgement.
    ///
    /// Needed where a device echoes a normalized form of the command, such
    /// as a zero-padded duty cycle echoed back unpadded.
    pub fn with_ack(mut self, ack: impl Into<String>) -> Self {
        self.ack = Some(ack.into());
        self
    }

    /// The acknowledgement a set exchange must receive
    pub fn expected_ack(&self) -> &str {
        self.ack.as_deref().unwrap_or(&self.payload)
    }
}

/// Encode a command for the wire.
///
/// Appends the terminator unless the payload already ends with it, so
/// pre-terminated payloads are not double-framed.
pub fn encode(command: &Command) -> Vec<u8> {
    let mut bytes = command.payload.clone().into_bytes();
    if bytes.last() != Some(&command.terminator) {
        bytes.push(command.terminator);
    }
    bytes
}

/// Strip the response boundary from raw payload bytes.
///
/// Removes a single trailing `terminator` byte if present, then trailing
/// NUL padding some firmwares append. Nothing else is touched: a carriage
/// return in front of an LF terminator is payload and stays, so boundary
/// stripping never destroys information a round-trip would need.
pub fn decode_boundary(raw: &[u8], terminator: u8) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == terminator {
        end -= 1;
    }
    while end > 0 && raw[end - 1] == 0 {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// The terminator bytes a device family uses to frame responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseTerminators {
    /// Terminator tried first.
    pub primary: u8,
    /// Alternate terminator some firmware revisions use.
    pub fallback: Option<u8>,
}

impl ResponseTerminators {
    /// Framing with a single terminator
    pub const fn new(primary: u8) -> Self {
        Self {
            primary,
            fallback: None,
        }
    }

    /// Framing with a fallback terminator
    pub const fn with_fallback(primary: u8, fallback: u8) -> Self {
        Self {
            primary,
            fallback: Some(fallback),
        }
    }

    /// Swap the fallback in as the primary.
    ///
    /// Called once a response has actually been framed by the fallback;
    /// the device keeps that terminator for the rest of the session.
    pub fn promote_fallback(&mut self) {
        if let Some(fb) = self.fallback {
            self.fallback = Some(self.primary);
            self.primary = fb;
        }
    }
}
