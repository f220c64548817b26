//! The command field: 12 bytes of zero-padded ASCII naming the payload
//! that follows.

use std::io::{Read, Write};

use utxod_chain::serialization::{CodecError, Decode, Encode};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Command {
    Version,
    Verack,
    Addr,
    GetAddr,
    Inv,
    GetData,
    GetBlocks,
    GetHeaders,
    Headers,
    Block,
    Tx,
    Ping,
    Pong,
    Alert,
    Reject,
}

impl Command {
    pub fn name(self) -> &'static str {
        match self {
            Command::Version => "version",
            Command::Verack => "verack",
            Command::Addr => "addr",
            Command::GetAddr => "getaddr",
            Command::Inv => "inv",
            Command::GetData => "getdata",
            Command::GetBlocks => "getblocks",
            Command::GetHeaders => "getheaders",
            Command::Headers => "headers",
            Command::Block => "block",
            Command::Tx => "tx",
            Command::Ping => "ping",
            Command::Pong => "pong",
            Command::Alert => "alert",
            Command::Reject => "reject",
        }
    }

    pub fn bytes(self) -> [u8; 12] {
        let mut bytes = [0u8; 12];
        bytes[..self.name().len()].copy_from_slice(self.name().as_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8; 12]) -> Option<Command> {
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(12);
        let name = std::str::from_utf8(&bytes[..end]).ok()?;
        Some(match name {
            "version" => Command::Version,
            "verack" => Command::Verack,
            "addr" => Command::Addr,
            "getaddr" => Command::GetAddr,
            "inv" => Command::Inv,
            "getdata" => Command::GetData,
            "getblocks" => Command::GetBlocks,
            "getheaders" => Command::GetHeaders,
            "headers" => Command::Headers,
            "block" => Command::Block,
            "tx" => Command::Tx,
            "ping" => Command::Ping,
            "pong" => Command::Pong,
            "alert" => Command::Alert,
            "reject" => Command::Reject,
            _ => return None,
        })
    }
}

impl Encode for Command {
    fn encode<W: Write>(&self, target: W) -> std::io::Result<()> {
        self.bytes().encode(target)
    }
}
impl Decode for Command {
    fn decode<R: Read>(target: R) -> Result<Self, CodecError> {
        let bytes = <[u8; 12]>::decode(target)?;
        Command::from_bytes(&bytes).ok_or(CodecError::Parse("unrecognized command field"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use utxod_chain::serialization::DecodeInto;

    #[test]
    fn commands_round_trip_through_their_wire_form() {
        for command in [
            Command::Version,
            Command::Verack,
            Command::Addr,
            Command::GetAddr,
            Command::Inv,
            Command::GetData,
            Command::GetBlocks,
            Command::GetHeaders,
            Command::Headers,
            Command::Block,
            Command::Tx,
            Command::Ping,
            Command::Pong,
            Command::Alert,
            Command::Reject,
        ] {
            let bytes = command.encode_to_vec().unwrap();
            assert_eq!(bytes.len(), 12);
            assert_eq!(bytes.decode_into::<Command>().unwrap(), command);
        }
    }

    #[test]
    fn unknown_command_is_a_parse_error() {
        let bytes = *b"frobnicate\0\0";
        assert!(bytes.decode_into::<Command>().is_err());
    }
}
