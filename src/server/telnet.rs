//! Telnet IAC handling for the line protocol.
//!
//! Incoming IAC sequences are stripped from the byte stream. Option
//! requests are refused, except the client's answers to our own ECHO
//! offer, which are accepted silently so echo suppression sticks.

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const SE: u8 = 240;
pub const OPT_ECHO: u8 = 1;

/// Server will echo (the client stops echoing locally), used for passwords.
pub const ECHO_OFF: [u8; 3] = [IAC, WILL, OPT_ECHO];
/// Client goes back to local echo.
pub const ECHO_ON: [u8; 3] = [IAC, WONT, OPT_ECHO];

#[derive(Debug, Default)]
pub struct IacParser {
    state: State,
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Data,
    Iac,
    Negotiate {
        cmd: u8,
    },
    Subneg {
        opt_seen: bool,
        iac_seen: bool,
    },
}

impl IacParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a chunk, returning `(data, replies)` where `replies` must be
    /// written back to the peer. Sequences may be split across chunks.
    pub fn parse(&mut self, chunk: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut out = Vec::with_capacity(chunk.len());
        let mut replies = Vec::new();

        for &b in chunk {
            match &mut self.state {
                State::Data => {
                    if b == IAC {
                        self.state = State::Iac;
                    } else {
                        out.push(b);
                    }
                }
                State::Iac => match b {
                    IAC => {
                        out.push(IAC);
                        self.state = State::Data;
                    }
                    DO | DONT | WILL | WONT => self.state = State::Negotiate { cmd: b },
                    SB => {
                        self.state = State::Subneg {
                            opt_seen: false,
                            iac_seen: false,
                        }
                    }
                    // NOP, GA and friends.
                    _ => self.state = State::Data,
                },
                State::Negotiate { cmd } => {
                    match (*cmd, b) {
                        (DO, OPT_ECHO) | (DONT, OPT_ECHO) => {}
                        (DO, opt) => replies.extend_from_slice(&[IAC, WONT, opt]),
                        (WILL, opt) => replies.extend_from_slice(&[IAC, DONT, opt]),
                        _ => {}
                    }
                    self.state = State::Data;
                }
                State::Subneg { opt_seen, iac_seen } => {
                    if !*opt_seen {
                        *opt_seen = true;
                    } else if *iac_seen {
                        if b == SE {
                            self.state = State::Data;
                        } else {
                            *iac_seen = false;
                        }
                    } else if b == IAC {
                        *iac_seen = true;
                    }
                }
            }
        }

        (out, replies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_plain_data() {
        let mut p = IacParser::new();
        let (d, r) = p.parse(b"look\r\n");
        assert_eq!(d, b"look\r\n");
        assert!(r.is_empty());
    }

    #[test]
    fn echo_answers_are_accepted_quietly() {
        let mut p = IacParser::new();
        let (d, r) = p.parse(&[IAC, DO, OPT_ECHO, b'x', IAC, DONT, OPT_ECHO]);
        assert_eq!(d, vec![b'x']);
        assert!(r.is_empty());
    }

    #[test]
    fn other_options_are_refused() {
        let mut p = IacParser::new();
        let (d, r) = p.parse(&[IAC, DO, 3, IAC, WILL, 24, b'n']);
        assert_eq!(d, vec![b'n']);
        assert_eq!(r, vec![IAC, WONT, 3, IAC, DONT, 24]);
    }

    #[test]
    fn split_sequences_and_subnegotiation() {
        let mut p = IacParser::new();
        let (d1, _) = p.parse(&[b'a', IAC]);
        let (d2, _) = p.parse(&[SB, 24, b'x', IAC, SE, b'b', IAC, IAC]);
        assert_eq!(d1, vec![b'a']);
        assert_eq!(d2, vec![b'b', IAC]);
    }
}
