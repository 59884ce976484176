//! Line-oriented command surface for the `beam-node` daemon.
//!
//! Each input line parses into a [`Command`]; results come back as JSON
//! DTOs so a wrapper (GUI, script) can drive the node over stdin/stdout.

use std::str::FromStr;

use beam_shared::{BeamId, Contact};
use beam_store::Message;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::error::ClientError;
use crate::handshake::PendingRequest;
use crate::node::BeamNode;

const DEFAULT_HISTORY_LIMIT: u32 = 50;

pub const HELP: &str = "\
card                      print this device's contact card
name <display name>       set the name used on the card
import <card json>        add a contact from its card
requests                  list pending contact requests
accept <id> | reject <id> answer a contact request
contacts                  list contacts
conversations             contacts with unread count and last message
rename <id> <name>        rename a contact
mute <id> | unmute <id>   toggle notifications for a contact
delete <id>               delete a contact, its history and session
send <id> <text>          send an encrypted message
send-stateless <id> <text>
send-plain <id> <text>
history <id> [limit]      show recent messages
unread <id>               count unread messages from a contact
read <id>                 mark a conversation read
delete-message <msg id>   delete one message
reset <id>                drop the session with a contact
peers                     list connected peers
dial <multiaddr>          connect to a peer by address
rekey                     replace this device's identity
quit";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: {0} (try `help`)")]
    Unknown(String),

    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("Invalid {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Quit,
    Card,
    Name(String),
    Import(String),
    Requests,
    Accept(BeamId),
    Reject(BeamId),
    Contacts,
    Rename(BeamId, String),
    Mute(BeamId, bool),
    Delete(BeamId),
    Send(BeamId, String),
    SendStateless(BeamId, String),
    SendPlain(BeamId, String),
    History(BeamId, u32),
    Conversations,
    Unread(BeamId),
    Read(BeamId),
    DeleteMessage(Uuid),
    Reset(BeamId),
    Peers,
    /// Handled by the binary, which owns the libp2p handle.
    Dial(String),
    Rekey,
}

fn split_word(input: &str) -> (&str, &str) {
    let input = input.trim();
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (input, ""),
    }
}

fn beam_id(arg: &str) -> Result<BeamId, CommandError> {
    if arg.is_empty() {
        return Err(CommandError::MissingArgument("id"));
    }
    BeamId::parse(arg).map_err(|_| CommandError::Invalid("Beam ID"))
}

fn text(arg: &str, name: &'static str) -> Result<String, CommandError> {
    if arg.is_empty() {
        Err(CommandError::MissingArgument(name))
    } else {
        Ok(arg.to_string())
    }
}

fn id_and_text(args: &str, name: &'static str) -> Result<(BeamId, String), CommandError> {
    let (id, rest) = split_word(args);
    Ok((beam_id(id)?, text(rest, name)?))
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (word, args) = split_word(line);
        let command = match word {
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "card" => Command::Card,
            "name" => Command::Name(text(args, "display name")?),
            "import" => Command::Import(text(args, "card json")?),
            "requests" => Command::Requests,
            "accept" => Command::Accept(beam_id(args)?),
            "reject" => Command::Reject(beam_id(args)?),
            "contacts" => Command::Contacts,
            "rename" => {
                let (id, name) = id_and_text(args, "name")?;
                Command::Rename(id, name)
            }
            "mute" => Command::Mute(beam_id(args)?, true),
            "unmute" => Command::Mute(beam_id(args)?, false),
            "delete" => Command::Delete(beam_id(args)?),
            "send" => {
                let (id, body) = id_and_text(args, "text")?;
                Command::Send(id, body)
            }
            "send-stateless" => {
                let (id, body) = id_and_text(args, "text")?;
                Command::SendStateless(id, body)
            }
            "send-plain" => {
                let (id, body) = id_and_text(args, "text")?;
                Command::SendPlain(id, body)
            }
            "history" => {
                let (id, limit) = split_word(args);
                let limit = if limit.is_empty() {
                    DEFAULT_HISTORY_LIMIT
                } else {
                    limit.parse().map_err(|_| CommandError::Invalid("limit"))?
                };
                Command::History(beam_id(id)?, limit)
            }
            "conversations" => Command::Conversations,
            "unread" => Command::Unread(beam_id(args)?),
            "read" => Command::Read(beam_id(args)?),
            "delete-message" => {
                let id = text(args, "message id")?;
                Command::DeleteMessage(
                    Uuid::parse_str(&id).map_err(|_| CommandError::Invalid("message id"))?,
                )
            }
            "reset" => Command::Reset(beam_id(args)?),
            "peers" => Command::Peers,
            "dial" => Command::Dial(text(args, "multiaddr")?),
            "rekey" => Command::Rekey,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactDto {
    pub id: String,
    pub name: String,
    pub muted: bool,
    pub last_seen: Option<String>,
    pub created_at: String,
}

impl From<Contact> for ContactDto {
    fn from(c: Contact) -> Self {
        Self {
            id: c.id.to_string(),
            name: c.name,
            muted: c.muted,
            last_seen: c.last_seen.map(|t| t.to_rfc3339()),
            created_at: c.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: String,
    pub contact_id: String,
    pub text: String,
    pub direction: String,
    pub status: String,
    pub timestamp: String,
    pub read: bool,
    pub encrypted: bool,
}

impl From<Message> for MessageDto {
    fn from(m: Message) -> Self {
        Self {
            id: m.id.to_string(),
            contact_id: m.contact_id.to_string(),
            text: m.plaintext,
            direction: m.direction.as_str().to_string(),
            status: m.status.as_str().to_string(),
            timestamp: m.timestamp.to_rfc3339(),
            read: m.read,
            encrypted: m.encrypted,
        }
    }
}

/// One row of the chat list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDto {
    pub contact: ContactDto,
    pub unread_count: usize,
    pub last_message: Option<MessageDto>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDto {
    pub id: String,
    pub display_name: String,
    pub received_at: String,
}

impl From<PendingRequest> for RequestDto {
    fn from(r: PendingRequest) -> Self {
        Self {
            id: r.beam_id.to_string(),
            display_name: r.card.display_name,
            received_at: r.received_at.to_rfc3339(),
        }
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value, ClientError> {
    serde_json::to_value(value)
        .map_err(|e| beam_shared::BeamError::Serialization(e.to_string()).into())
}

/// Run a command against the node. `Help`, `Quit` and `Dial` belong to the
/// caller and yield `Value::Null` here.
pub async fn execute(node: &BeamNode, command: Command) -> Result<Value, ClientError> {
    match command {
        Command::Help | Command::Quit | Command::Dial(_) => Ok(Value::Null),
        Command::Card => to_value(node.my_card()?),
        Command::Name(name) => {
            node.set_display_name(&name)?;
            Ok(json!({ "displayName": name }))
        }
        Command::Import(card) => to_value(ContactDto::from(node.import_card(&card)?)),
        Command::Requests => to_value(
            node.pending_requests()
                .into_iter()
                .map(RequestDto::from)
                .collect::<Vec<_>>(),
        ),
        Command::Accept(id) => to_value(ContactDto::from(node.accept_request(&id).await?)),
        Command::Reject(id) => {
            node.reject_request(&id).await?;
            Ok(json!({ "rejected": id }))
        }
        Command::Contacts => to_value(
            node.contacts()?
                .into_iter()
                .map(ContactDto::from)
                .collect::<Vec<_>>(),
        ),
        Command::Rename(id, name) => {
            node.rename_contact(&id, &name)?;
            Ok(json!({ "renamed": id, "name": name }))
        }
        Command::Mute(id, muted) => {
            node.set_contact_muted(&id, muted)?;
            Ok(json!({ "id": id, "muted": muted }))
        }
        Command::Delete(id) => {
            let existed = node.delete_contact(&id).await?;
            Ok(json!({ "deleted": id, "existed": existed }))
        }
        Command::Send(id, body) => to_value(MessageDto::from(node.send_message(&id, &body).await?)),
        Command::SendStateless(id, body) => {
            to_value(MessageDto::from(node.send_stateless(&id, &body).await?))
        }
        Command::SendPlain(id, body) => {
            to_value(MessageDto::from(node.send_plaintext(&id, &body).await?))
        }
        Command::History(id, limit) => to_value(
            node.messages(&id, limit, 0)?
                .into_iter()
                .map(MessageDto::from)
                .collect::<Vec<_>>(),
        ),
        Command::Conversations => {
            let mut rows = Vec::new();
            for contact in node.contacts()? {
                rows.push(ConversationDto {
                    unread_count: node.unread_count(&contact.id)?,
                    last_message: node.last_message(&contact.id)?.map(MessageDto::from),
                    contact: ContactDto::from(contact),
                });
            }
            to_value(rows)
        }
        Command::Unread(id) => Ok(json!({ "id": id, "unread": node.unread_count(&id)? })),
        Command::Read(id) => Ok(json!({ "markedRead": node.mark_read(&id)? })),
        Command::DeleteMessage(id) => {
            let existed = node.delete_message(id)?;
            Ok(json!({ "deleted": id, "existed": existed }))
        }
        Command::Reset(id) => {
            node.reset_session(&id).await?;
            Ok(json!({ "reset": id }))
        }
        Command::Peers => to_value(node.connected_peers()),
        Command::Rekey => Ok(json!({ "beamId": node.rekey() })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::testing::TestNode;

    const ID: &str = "beam_0011223344556677";

    fn id() -> BeamId {
        BeamId::parse(ID).unwrap()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!("card".parse::<Command>(), Ok(Command::Card));
        assert_eq!(
            format!("send {ID} hello   there").parse::<Command>(),
            Ok(Command::Send(id(), "hello   there".into()))
        );
        assert_eq!(
            format!("history {ID} 5").parse::<Command>(),
            Ok(Command::History(id(), 5))
        );
        assert_eq!(
            format!("history {ID}").parse::<Command>(),
            Ok(Command::History(id(), DEFAULT_HISTORY_LIMIT))
        );
        assert_eq!(
            format!("unmute {ID}").parse::<Command>(),
            Ok(Command::Mute(id(), false))
        );
        let message_id = Uuid::new_v4();
        assert_eq!(
            format!("delete-message {message_id}").parse::<Command>(),
            Ok(Command::DeleteMessage(message_id))
        );
        assert_eq!(
            format!("unread {ID}").parse::<Command>(),
            Ok(Command::Unread(id()))
        );
        assert_eq!(
            "dial /ip4/192.168.1.2/udp/4011/quic-v1".parse::<Command>(),
            Ok(Command::Dial("/ip4/192.168.1.2/udp/4011/quic-v1".into()))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "fly".parse::<Command>(),
            Err(CommandError::Unknown("fly".into()))
        );
        assert_eq!(
            format!("send {ID}").parse::<Command>(),
            Err(CommandError::MissingArgument("text"))
        );
        assert_eq!(
            "accept nobody".parse::<Command>(),
            Err(CommandError::Invalid("Beam ID"))
        );
        assert_eq!(
            "accept".parse::<Command>(),
            Err(CommandError::MissingArgument("id"))
        );
        assert_eq!(
            "delete-message 42".parse::<Command>(),
            Err(CommandError::Invalid("message id"))
        );
    }

    #[tokio::test]
    async fn test_execute_contact_commands() {
        let alice = TestNode::new("alice");
        let bob = TestNode::new("bob");
        let card = bob.node.my_card_json().unwrap();

        let added = execute(&alice.node, Command::Import(card)).await.unwrap();
        assert_eq!(added["name"], "bob");

        let bob_id = bob.node.beam_id();
        execute(&alice.node, Command::Rename(bob_id.clone(), "Robert".into()))
            .await
            .unwrap();
        let contacts = execute(&alice.node, Command::Contacts).await.unwrap();
        assert_eq!(contacts[0]["name"], "Robert");
        assert_eq!(contacts[0]["id"], bob_id.to_string());

        let sent = execute(&alice.node, Command::Send(bob_id.clone(), "hi".into()))
            .await
            .unwrap();
        assert_eq!(sent["status"], "sending");
        assert_eq!(sent["encrypted"], true);

        let history = execute(&alice.node, Command::History(bob_id.clone(), 10))
            .await
            .unwrap();
        assert_eq!(history.as_array().map(Vec::len), Some(1));

        let conversations = execute(&alice.node, Command::Conversations).await.unwrap();
        assert_eq!(conversations[0]["contact"]["id"], bob_id.to_string());
        assert_eq!(conversations[0]["unreadCount"], 0);
        assert_eq!(conversations[0]["lastMessage"]["text"], "hi");

        let message_id = Uuid::parse_str(sent["id"].as_str().unwrap()).unwrap();
        let deleted = execute(&alice.node, Command::DeleteMessage(message_id))
            .await
            .unwrap();
        assert_eq!(deleted["existed"], true);
        assert_eq!(alice.node.queued_for(&bob_id), 0);

        let conversations = execute(&alice.node, Command::Conversations).await.unwrap();
        assert!(conversations[0]["lastMessage"].is_null());
        let unread = execute(&alice.node, Command::Unread(bob_id)).await.unwrap();
        assert_eq!(unread["unread"], 0);
    }
}
