//! Command execution.

use crate::Commands;
use bidib_engine::{EngineConfig, Link};
use bidib_protocol::{encode_packet, Message, MessageType, NodeAddress, PacketAssembler};
use serde::Serialize;
use std::path::PathBuf;

type CommandResult = Result<String, Box<dyn std::error::Error>>;

/// Executes a command and returns the formatted output.
pub fn execute(cmd: Commands) -> CommandResult {
    match cmd {
        Commands::Encode {
            address,
            msg_type,
            seq,
            payload,
        } => {
            let address: NodeAddress = address.parse()?;
            let msg_type = parse_type(&msg_type)?;
            let payload = match payload {
                Some(hex_str) => hex::decode(hex_str.trim())?,
                None => Vec::new(),
            };
            let msg = Message::new(address, msg_type)
                .with_seq(seq)
                .with_payload(payload);
            Ok(hex::encode(encode_packet(&[msg])?))
        }

        Commands::Decode { hex, file, json } => {
            let bytes = read_input(hex, file)?;
            let mut lines = Vec::new();
            for result in PacketAssembler::new().push_slice(&bytes) {
                match result {
                    Ok(messages) => {
                        for msg in &messages {
                            lines.push(if json {
                                serde_json::to_string(&DecodedMessage::from(msg))?
                            } else {
                                format_message(msg)
                            });
                        }
                    }
                    Err(e) if json => {
                        lines.push(serde_json::to_string(&DecodeFailure {
                            error: e.to_string(),
                        })?);
                    }
                    Err(e) => lines.push(format!("discarded packet: {}", e)),
                }
            }
            Ok(lines.join("\n"))
        }

        Commands::Replay { hex, file } => {
            let bytes = read_input(hex, file)?;
            let mut config = EngineConfig::load()?;
            config.session.handshake = false;
            config.validate()?;

            // Anything the dispatcher answers with is discarded.
            let link = Link::new(
                config,
                Box::new(|_: &[u8]| -> std::io::Result<()> { Ok(()) }),
            );
            let mut assembler = PacketAssembler::new();
            for result in assembler.push_slice(&bytes) {
                link.handle_packet(result);
            }

            let mut lines = Vec::new();
            for msg in link.uplink().drain() {
                lines.push(format!("uplink  {}", format_message(&msg)));
            }
            for msg in link.errors().drain() {
                lines.push(format!("error   {}", format_message(&msg)));
            }
            let stats = link.stats().snapshot();
            lines.push(format!(
                "packets={} messages={} crc_errors={} framing_errors={} sequence_gaps={} noise_bytes={}",
                stats.packets_received,
                stats.messages_received,
                stats.crc_errors,
                stats.framing_errors,
                stats.sequence_gaps,
                assembler.noise_bytes()
            ));
            for node in link.table().known_nodes() {
                if let Some(state) = link.node_state(node) {
                    if state.stalled {
                        lines.push(format!("node {} stalled", node));
                    }
                }
            }
            Ok(lines.join("\n"))
        }

        Commands::Config { file } => {
            let config = match file {
                Some(path) => EngineConfig::from_file(path)?,
                None => EngineConfig::load()?,
            };
            config.validate()?;
            Ok(serde_yaml::to_string(&config)?)
        }
    }
}

/// Parses a message type given as a number or as a known name.
fn parse_type(s: &str) -> Result<MessageType, String> {
    let s = s.trim();
    let parsed = if let Some(hex_digits) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u8::from_str_radix(hex_digits, 16).ok()
    } else {
        s.parse::<u8>().ok()
    };
    if let Some(value) = parsed {
        return Ok(MessageType::new(value));
    }
    (0..=u8::MAX)
        .map(MessageType::new)
        .find(|ty| ty.name().is_some_and(|name| name.eq_ignore_ascii_case(s)))
        .ok_or_else(|| format!("unknown message type '{}'", s))
}

fn read_input(
    hex_arg: Option<String>,
    file: Option<PathBuf>,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    match (hex_arg, file) {
        (_, Some(path)) => Ok(std::fs::read(path)?),
        (Some(hex_str), None) => {
            let compact: String = hex_str.split_whitespace().collect();
            Ok(hex::decode(compact)?)
        }
        (None, None) => Err("no input: pass hex bytes or --file".into()),
    }
}

fn format_message(msg: &Message) -> String {
    let mut line = format!("addr={} seq={} type={}", msg.address, msg.seq, msg.msg_type);
    if !msg.payload.is_empty() {
        line.push_str(&format!(" payload={}", hex::encode(&msg.payload)));
    }
    line
}

#[derive(Serialize)]
struct DecodedMessage {
    address: NodeAddress,
    seq: u8,
    msg_type: MessageType,
    name: Option<&'static str>,
    payload: String,
}

impl From<&Message> for DecodedMessage {
    fn from(msg: &Message) -> Self {
        Self {
            address: msg.address,
            seq: msg.seq,
            msg_type: msg.msg_type,
            name: msg.msg_type.name(),
            payload: hex::encode(&msg.payload),
        }
    }
}

#[derive(Serialize)]
struct DecodeFailure {
    error: String,
}
