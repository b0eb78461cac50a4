//! Command line parsing for the interactive shell

use std::fmt;

/// Help topics accepted by `usage`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    All,
    Auth,
    AuthLocal,
    AuthDomain,
}

#[derive(Clone, PartialEq, Eq)]
pub enum Command {
    /// Blank line
    Empty,
    AuthLocal {
        username: String,
        password: String,
    },
    /// `auth local` with no arguments: use the startup credentials
    AuthLocalDefault,
    AuthDomain {
        domain: String,
        username: String,
        password: String,
    },
    Logout,
    Shares,
    Status,
    Info,
    /// Print usage for a topic; also produced by malformed `auth` lines
    Usage(Topic),
    Help,
    Exit,
    Unknown(String),
}

// Passwords stay out of logs.
impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Empty => f.write_str("Empty"),
            Command::AuthLocal { username, .. } => f
                .debug_struct("AuthLocal")
                .field("username", username)
                .finish_non_exhaustive(),
            Command::AuthLocalDefault => f.write_str("AuthLocalDefault"),
            Command::AuthDomain {
                domain, username, ..
            } => f
                .debug_struct("AuthDomain")
                .field("domain", domain)
                .field("username", username)
                .finish_non_exhaustive(),
            Command::Logout => f.write_str("Logout"),
            Command::Shares => f.write_str("Shares"),
            Command::Status => f.write_str("Status"),
            Command::Info => f.write_str("Info"),
            Command::Usage(topic) => f.debug_tuple("Usage").field(topic).finish(),
            Command::Help => f.write_str("Help"),
            Command::Exit => f.write_str("Exit"),
            Command::Unknown(verb) => f.debug_tuple("Unknown").field(verb).finish(),
        }
    }
}

/// Parse one input line. Verbs are case-insensitive, arguments are kept as typed.
pub fn parse_command(raw: &str) -> Command {
    let parts: Vec<&str> = raw.split_whitespace().collect();
    let Some(verb) = parts.first() else {
        return Command::Empty;
    };
    let args = &parts[1..];

    match verb.to_ascii_lowercase().as_str() {
        "auth" => parse_auth(args),
        "logout" => Command::Logout,
        "shares" => Command::Shares,
        "status" => Command::Status,
        "info" => Command::Info,
        "usage" => Command::Usage(parse_topic(args)),
        "help" => Command::Help,
        "exit" | "quit" => Command::Exit,
        _ => Command::Unknown(verb.to_string()),
    }
}

fn parse_auth(args: &[&str]) -> Command {
    let Some(method) = args.first() else {
        return Command::Usage(Topic::Auth);
    };

    match (method.to_ascii_lowercase().as_str(), &args[1..]) {
        ("local", []) => Command::AuthLocalDefault,
        ("local", [username, password]) => Command::AuthLocal {
            username: username.to_string(),
            password: password.to_string(),
        },
        ("local", _) => Command::Usage(Topic::AuthLocal),
        ("domain", [domain, username, password]) => Command::AuthDomain {
            domain: domain.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        },
        ("domain", _) => Command::Usage(Topic::AuthDomain),
        _ => Command::Usage(Topic::Auth),
    }
}

fn parse_topic(args: &[&str]) -> Topic {
    let words: Vec<String> = args.iter().map(|a| a.to_ascii_lowercase()).collect();
    match words.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["auth"] => Topic::Auth,
        ["auth", "local"] => Topic::AuthLocal,
        ["auth", "domain"] => Topic::AuthDomain,
        _ => Topic::All,
    }
}
