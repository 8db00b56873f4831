//! # Summary
//!
//! Parses the line-oriented driver protocol read from standard input, per
//! `original_source/master.cpp::ReadTest`.

#[derive(Debug)]
pub enum Command {
    Start { servers: usize, clients: usize },
    SendMessage { client_id: usize, message: String },
    CrashServer { server_id: usize },
    RestartServer { server_id: usize },
    AllClear,
    TimeBombLeader { k: u64 },
    PrintChatLog { client_id: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("unrecognized command: {0:?}")]
    Unrecognized(String),
    #[error("malformed {0} command: missing or invalid argument")]
    BadArgument(&'static str),
}

impl std::str::FromStr for Command {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.trim().splitn(2, char::is_whitespace);
        let keyword = words.next().unwrap_or("");
        let rest = words.next().unwrap_or("").trim();

        match keyword {
            "START" => {
                let mut args = rest.split_whitespace();
                let servers = args.next().and_then(|s| s.parse().ok()).ok_or(ParseError::BadArgument("START"))?;
                let clients = args.next().and_then(|s| s.parse().ok()).ok_or(ParseError::BadArgument("START"))?;
                Ok(Command::Start { servers, clients })
            }
            "SENDMESSAGE" => {
                let mut args = rest.splitn(2, char::is_whitespace);
                let client_id = args.next().and_then(|s| s.parse().ok()).ok_or(ParseError::BadArgument("SENDMESSAGE"))?;
                let message = args.next().unwrap_or("").to_string();
                Ok(Command::SendMessage { client_id, message })
            }
            "CRASHSERVER" => {
                let server_id = rest.parse().map_err(|_| ParseError::BadArgument("CRASHSERVER"))?;
                Ok(Command::CrashServer { server_id })
            }
            "RESTARTSERVER" => {
                let server_id = rest.parse().map_err(|_| ParseError::BadArgument("RESTARTSERVER"))?;
                Ok(Command::RestartServer { server_id })
            }
            "ALLCLEAR" => Ok(Command::AllClear),
            "TIMEBOMBLEADER" => {
                let k = rest.parse().map_err(|_| ParseError::BadArgument("TIMEBOMBLEADER"))?;
                Ok(Command::TimeBombLeader { k })
            }
            "PRINTCHATLOG" => {
                let client_id = rest.parse().map_err(|_| ParseError::BadArgument("PRINTCHATLOG"))?;
                Ok(Command::PrintChatLog { client_id })
            }
            other => Err(ParseError::Unrecognized(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start() {
        let command: Command = "START 5 2".parse().unwrap();
        assert!(matches!(command, Command::Start { servers: 5, clients: 2 }));
    }

    #[test]
    fn parses_sendmessage_with_spaces_in_payload() {
        let command: Command = "SENDMESSAGE 0 hello there world".parse().unwrap();
        match command {
            Command::SendMessage { client_id, message } => {
                assert_eq!(client_id, 0);
                assert_eq!(message, "hello there world");
            }
            _ => panic!("expected SendMessage"),
        }
    }

    #[test]
    fn parses_allclear() {
        assert!(matches!("ALLCLEAR".parse::<Command>().unwrap(), Command::AllClear));
    }

    #[test]
    fn rejects_unknown_keyword() {
        assert!("BOGUS".parse::<Command>().is_err());
    }

    #[test]
    fn rejects_missing_argument() {
        assert!("CRASHSERVER".parse::<Command>().is_err());
    }
}
