use anyhow::{bail, Result};
use cadence_core::{InboundMessage, MediaKind, MediaRef};

/// One line of console input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Message {
        conversation: String,
        message: InboundMessage,
    },
    Activity {
        conversation: String,
        state: String,
    },
    Stats,
    Flush,
    Help,
    Quit,
    Empty,
}

pub const HELP: &str = "\
  <conv>: <text>                     text message from <conv>
  /image|/video|/audio|/document|/sticker <conv> [caption]
  /typing|/recording|/paused|/available <conv>
  /stats                             print statistics as JSON
  /flush                             flush every buffered conversation
  quit | exit                        flush, drain and exit";

pub fn parse(line: &str) -> Result<Command> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::Empty);
    }
    if line == "quit" || line == "exit" {
        return Ok(Command::Quit);
    }

    if let Some(rest) = line.strip_prefix('/') {
        let mut parts = rest.splitn(3, char::is_whitespace);
        let verb = parts.next().unwrap_or_default();
        let conversation = parts.next().map(str::trim).filter(|c| !c.is_empty());
        let tail = parts.next().map(str::trim).unwrap_or_default();

        return match verb {
            "stats" => Ok(Command::Stats),
            "flush" => Ok(Command::Flush),
            "help" => Ok(Command::Help),
            "typing" | "recording" | "paused" | "available" | "composing" => {
                let Some(conversation) = conversation else {
                    bail!("/{verb} needs a conversation");
                };
                Ok(Command::Activity {
                    conversation: conversation.to_string(),
                    state: verb.to_string(),
                })
            }
            other => {
                let kind = match MediaKind::parse(other) {
                    Some(kind) if kind.is_media() => kind,
                    _ => bail!("unknown command /{other}"),
                };
                let Some(conversation) = conversation else {
                    bail!("/{other} needs a conversation");
                };
                let media = MediaRef {
                    url: format!("console://{}/{}", conversation, kind),
                    ..MediaRef::default()
                };
                Ok(Command::Message {
                    conversation: conversation.to_string(),
                    message: InboundMessage::media(kind, Some(media), tail),
                })
            }
        };
    }

    let Some((conversation, text)) = line.split_once(':') else {
        bail!("expected `<conv>: <text>`, try /help");
    };
    let conversation = conversation.trim();
    if conversation.is_empty() || conversation.contains(char::is_whitespace) {
        bail!("invalid conversation name {:?}", conversation);
    }
    Ok(Command::Message {
        conversation: conversation.to_string(),
        message: InboundMessage::text(text.trim()),
    })
}
