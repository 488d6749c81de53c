//! Terminal front end: one input line becomes one [`Intent`].

use std::collections::BTreeSet;

use crate::dispatch::Intent;

pub const HELP: &str = "\
/match [a,b]  look for a partner (optionally with interests)
/next         leave the partner and look for a new one
/leave        leave the partner
/call         call the partner
/accept       accept an incoming call
/reject       reject an incoming call
/hangup       end the call
/mute         toggle the microphone
/quit         exit
anything else is sent as a message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Intent(Intent),
    Help,
    Unknown(String),
}

/// Parses one line of user input. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Command::Intent(Intent::SendText(line.to_owned())));
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };
    let intent = match name {
        "match" => Intent::RequestMatch(parse_interests(args)),
        "next" => Intent::Rematch,
        "leave" => Intent::Disconnect,
        "call" => Intent::StartCall,
        "accept" => Intent::AcceptCall,
        "reject" => Intent::RejectCall,
        "hangup" => Intent::HangUp,
        "mute" => Intent::ToggleMute,
        "quit" | "exit" => Intent::Quit,
        "help" => return Some(Command::Help),
        other => return Some(Command::Unknown(other.to_owned())),
    };
    Some(Command::Intent(intent))
}

fn parse_interests(args: &str) -> Option<BTreeSet<String>> {
    if args.is_empty() {
        return None;
    }
    Some(
        args.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(line: &str) -> Intent {
        match parse_line(line) {
            Some(Command::Intent(intent)) => intent,
            other => panic!("{line:?} parsed as {other:?}"),
        }
    }

    #[test]
    fn plain_lines_are_messages() {
        assert_eq!(intent("  hello there "), Intent::SendText("hello there".into()));
        assert_eq!(parse_line("   "), None);
    }

    #[test]
    fn match_takes_optional_interests() {
        assert_eq!(intent("/match"), Intent::RequestMatch(None));
        assert_eq!(
            intent("/match Music, Art,,"),
            Intent::RequestMatch(Some(["Art".to_string(), "Music".to_string()].into()))
        );
    }

    #[test]
    fn call_commands() {
        assert_eq!(intent("/call"), Intent::StartCall);
        assert_eq!(intent("/accept"), Intent::AcceptCall);
        assert_eq!(intent("/reject"), Intent::RejectCall);
        assert_eq!(intent("/hangup"), Intent::HangUp);
        assert_eq!(intent("/mute"), Intent::ToggleMute);
        assert_eq!(intent("/next"), Intent::Rematch);
        assert_eq!(intent("/leave"), Intent::Disconnect);
        assert_eq!(intent("/quit"), Intent::Quit);
    }

    #[test]
    fn unknown_commands_are_flagged() {
        assert_eq!(parse_line("/dance"), Some(Command::Unknown("dance".into())));
        assert_eq!(parse_line("/help"), Some(Command::Help));
    }
}
