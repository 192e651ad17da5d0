//! REPL command parsing for the interactive shell.
//!
//! `ConsoleCommand` is what an operator types. It is separate from
//! [`crate::message::Request`], which is what nodes send each other: several
//! console commands (PEERS, HELP, EXIT) never leave the local process.

use anyhow::{anyhow, Result};

/// Commands that can be entered at the REPL prompt.
#[derive(Debug, PartialEq)]
pub enum ConsoleCommand {
    Add { key: String, value: String },
    Fetch { key: String },
    BringUp { target: String },
    Peers,
    Store,
    StopMesh,
    Help,
    Exit,
}

impl ConsoleCommand {
    /// Parses a line of user input into a command.
    ///
    /// Commands are case-insensitive and support aliases:
    /// - `ADD <key> <value>` (alias: `a`)
    /// - `FETCH <key>` (alias: `f`)
    /// - `BRINGUP <addr>` (alias: `b`) - start a server on another host
    /// - `PEERS` (alias: `p`)
    /// - `STORE` (alias: `s`) - dump this host's store
    /// - `STOP` - stop every server in the mesh
    /// - `HELP` (alias: `h`)
    /// - `EXIT` (alias: `e`)
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = parts.first() else {
            return Err(anyhow!("empty command"));
        };

        let cmd = first.to_uppercase();
        let normalized_cmd = match cmd.as_str() {
            "A" => "ADD",
            "F" => "FETCH",
            "B" => "BRINGUP",
            "P" => "PEERS",
            "S" => "STORE",
            "H" => "HELP",
            "E" => "EXIT",
            other => other,
        };

        match (normalized_cmd, parts.len()) {
            ("PEERS", 1) => Ok(ConsoleCommand::Peers),
            ("STORE", 1) => Ok(ConsoleCommand::Store),
            ("STOP", 1) => Ok(ConsoleCommand::StopMesh),
            ("HELP", 1) => Ok(ConsoleCommand::Help),
            ("EXIT", 1) => Ok(ConsoleCommand::Exit),
            ("FETCH", 2) => Ok(ConsoleCommand::Fetch {
                key: parts[1].to_string(),
            }),
            ("BRINGUP", 2) => Ok(ConsoleCommand::BringUp {
                target: parts[1].to_string(),
            }),
            ("ADD", 3) => Ok(ConsoleCommand::Add {
                key: parts[1].to_string(),
                value: parts[2].to_string(),
            }),
            ("FETCH", _) => Err(anyhow!("FETCH requires exactly one argument: FETCH <key>")),
            ("BRINGUP", _) => Err(anyhow!("BRINGUP requires exactly one argument: BRINGUP <addr>")),
            ("ADD", _) => Err(anyhow!("ADD requires exactly two arguments: ADD <key> <value>")),
            ("PEERS" | "STORE" | "STOP" | "HELP" | "EXIT", _) => {
                Err(anyhow!("{normalized_cmd} takes no arguments"))
            }
            _ => Err(anyhow!(
                "invalid command. Try: ADD/a <key> <value>, FETCH/f <key>, BRINGUP/b <addr>, PEERS/p, STORE/s, STOP, HELP/h, EXIT/e"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_commands() {
        assert!(matches!(ConsoleCommand::parse("exit"), Ok(ConsoleCommand::Exit)));
        assert!(matches!(ConsoleCommand::parse("EXIT"), Ok(ConsoleCommand::Exit)));
        assert!(matches!(ConsoleCommand::parse("ExIt"), Ok(ConsoleCommand::Exit)));

        assert!(matches!(ConsoleCommand::parse("stop"), Ok(ConsoleCommand::StopMesh)));
        assert!(matches!(ConsoleCommand::parse("Peers"), Ok(ConsoleCommand::Peers)));
        assert!(matches!(ConsoleCommand::parse("store"), Ok(ConsoleCommand::Store)));
    }

    #[test]
    fn test_aliases() {
        assert!(matches!(ConsoleCommand::parse("e"), Ok(ConsoleCommand::Exit)));
        assert!(matches!(ConsoleCommand::parse("H"), Ok(ConsoleCommand::Help)));
        assert!(matches!(ConsoleCommand::parse("p"), Ok(ConsoleCommand::Peers)));
        assert!(matches!(ConsoleCommand::parse("S"), Ok(ConsoleCommand::Store)));

        assert!(matches!(
            ConsoleCommand::parse("f foo"),
            Ok(ConsoleCommand::Fetch { key }) if key == "foo"
        ));
        assert!(matches!(
            ConsoleCommand::parse("a key val"),
            Ok(ConsoleCommand::Add { key, value }) if key == "key" && value == "val"
        ));
        assert!(matches!(
            ConsoleCommand::parse("B 127.0.0.1:7102"),
            Ok(ConsoleCommand::BringUp { target }) if target == "127.0.0.1:7102"
        ));
    }

    #[test]
    fn test_arguments_keep_their_case() {
        assert!(matches!(
            ConsoleCommand::parse("ADD KEY VAL"),
            Ok(ConsoleCommand::Add { key, value }) if key == "KEY" && value == "VAL"
        ));
        assert!(matches!(
            ConsoleCommand::parse("  fetch   MyKey  "),
            Ok(ConsoleCommand::Fetch { key }) if key == "MyKey"
        ));
    }

    #[test]
    fn test_invalid_commands() {
        assert!(ConsoleCommand::parse("").is_err());
        assert!(ConsoleCommand::parse("   ").is_err());
        assert!(ConsoleCommand::parse("INVALID").is_err());
        assert!(ConsoleCommand::parse("FETCH").is_err()); // Missing key
        assert!(ConsoleCommand::parse("ADD key").is_err()); // Missing value
        assert!(ConsoleCommand::parse("ADD").is_err());
        assert!(ConsoleCommand::parse("BRINGUP").is_err());
        assert!(ConsoleCommand::parse("STOP now").is_err());
    }
}
