use std::fmt;

/// Why the server closed a peer. The numeric codes travel in the close
/// handshake and are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    EndOfPacket,
    Local,
    Kick,
    MessageError,
    IpBan,
    Private,
    MaxClients,
    Timeout,
    Overflow,
    Password,
    /// A code this build has no text for.
    Unknown(u32),
}

impl DisconnectReason {
    pub fn code(self) -> u32 {
        match self {
            DisconnectReason::EndOfPacket => 1,
            DisconnectReason::Local => 2,
            DisconnectReason::Kick => 3,
            DisconnectReason::MessageError => 4,
            DisconnectReason::IpBan => 5,
            DisconnectReason::Private => 6,
            DisconnectReason::MaxClients => 7,
            DisconnectReason::Timeout => 8,
            DisconnectReason::Overflow => 9,
            DisconnectReason::Password => 10,
            DisconnectReason::Unknown(code) => code,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            1 => DisconnectReason::EndOfPacket,
            2 => DisconnectReason::Local,
            3 => DisconnectReason::Kick,
            4 => DisconnectReason::MessageError,
            5 => DisconnectReason::IpBan,
            6 => DisconnectReason::Private,
            7 => DisconnectReason::MaxClients,
            8 => DisconnectReason::Timeout,
            9 => DisconnectReason::Overflow,
            10 => DisconnectReason::Password,
            other => DisconnectReason::Unknown(other),
        }
    }

    /// Human-readable text, `None` for unknown codes.
    pub fn message(self) -> Option<&'static str> {
        match self {
            DisconnectReason::EndOfPacket => Some("end of packet"),
            DisconnectReason::Local => Some("server is in local mode"),
            DisconnectReason::Kick => Some("kicked/banned"),
            DisconnectReason::MessageError => Some("message error"),
            DisconnectReason::IpBan => Some("ip is banned"),
            DisconnectReason::Private => Some("server is in private mode"),
            DisconnectReason::MaxClients => Some("server FULL"),
            DisconnectReason::Timeout => Some("connection timed out"),
            DisconnectReason::Overflow => Some("overflow"),
            DisconnectReason::Password => Some("invalid password"),
            DisconnectReason::Unknown(_) => None,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(text) => f.write_str(text),
            None => write!(f, "reason {}", self.code()),
        }
    }
}
