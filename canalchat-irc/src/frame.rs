use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// A raw IRC frame, already lightly normalized (tags collected into a
/// map, params split from the trailing arg) but not yet interpreted.
/// This is the handoff unit from the IRC Session to the Frame Parser
/// (spec.md §4.2: "a lazy sequence of raw frames tagged with
/// `(channel_name, server_ts, tags, command, params, trailing)`").
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub channel_name: Option<String>,
    pub server_ts: DateTime<Utc>,
    pub tags: HashMap<String, String>,
    pub command: String,
    pub params: Vec<String>,
    pub trailing: Option<String>,
    pub prefix_nick: Option<String>,
}

impl RawFrame {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(|s| s.as_str())
    }

    pub fn from_irc_message(msg: &irc::proto::Message) -> RawFrame {
        let tags = msg
            .tags
            .as_ref()
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.1.clone().map(|v| (t.0.clone(), v)))
                    .collect::<HashMap<_, _>>()
            })
            .unwrap_or_default();

        let prefix_nick = match &msg.prefix {
            Some(irc::proto::Prefix::Nickname(nick, _, _)) => Some(nick.clone()),
            _ => None,
        };

        let command = irc_command_name(&msg.command);
        let (params, trailing) = irc_command_params(&msg.command);
        let channel_name = params
            .first()
            .and_then(|p| p.strip_prefix('#'))
            .map(|s| s.to_ascii_lowercase());

        RawFrame {
            channel_name,
            server_ts: Utc::now(),
            tags,
            command,
            params,
            trailing,
            prefix_nick,
        }
    }
}

fn irc_command_name(cmd: &irc::proto::Command) -> String {
    match cmd {
        irc::proto::Command::PRIVMSG(_, _) => "PRIVMSG".to_string(),
        irc::proto::Command::PING(_, _) => "PING".to_string(),
        irc::proto::Command::PONG(_, _) => "PONG".to_string(),
        irc::proto::Command::JOIN(_, _, _) => "JOIN".to_string(),
        irc::proto::Command::PART(_, _) => "PART".to_string(),
        irc::proto::Command::Raw(name, _) => name.to_ascii_uppercase(),
        other => other.to_string(),
    }
}

/// Twitch-specific commands (CLEARMSG, CLEARCHAT, USERNOTICE, GLOBALUSERSTATE,
/// ROOMSTATE...) aren't part of the standard `Command` enum the `irc` crate
/// knows about, so they arrive as `Command::Raw(name, params)`. PRIVMSG is
/// a known variant with `(target, text)`.
fn irc_command_params(cmd: &irc::proto::Command) -> (Vec<String>, Option<String>) {
    match cmd {
        irc::proto::Command::PRIVMSG(target, text) => {
            (vec![target.clone()], Some(text.clone()))
        }
        irc::proto::Command::Raw(_, params) => {
            if params.is_empty() {
                (Vec::new(), None)
            } else {
                let trailing = params.last().cloned();
                (params.clone(), trailing)
            }
        }
        _ => (Vec::new(), None),
    }
}
