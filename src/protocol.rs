use crate::model::ResourceId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    Login,
    Book,
    Available,
    AvailRow,
    Cancel,
    Logout,
    Save,
    Today,
    Start,
    End,
    Unknown(String),
}

impl Verb {
    fn parse(word: &str) -> Self {
        match word {
            "login" => Verb::Login,
            "book" => Verb::Book,
            "available" => Verb::Available,
            "availrow" => Verb::AvailRow,
            "cancel" => Verb::Cancel,
            "logout" => Verb::Logout,
            "save" => Verb::Save,
            "today" => Verb::Today,
            "start" => Verb::Start,
            "end" => Verb::End,
            other => Verb::Unknown(other.to_string()),
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Verb::Login => "login",
            Verb::Book => "book",
            Verb::Available => "available",
            Verb::AvailRow => "availrow",
            Verb::Cancel => "cancel",
            Verb::Logout => "logout",
            Verb::Save => "save",
            Verb::Today => "today",
            Verb::Start => "start",
            Verb::End => "end",
            Verb::Unknown(_) => "unknown",
        }
    }
}

/// One inbound message: a verb and its whitespace-separated arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub verb: Verb,
    pub args: Vec<String>,
}

impl Command {
    /// Split a line into tokens. Blank input yields `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_ascii_whitespace();
        let verb = Verb::parse(tokens.next()?);
        let args = tokens.map(str::to_string).collect();
        Some(Self { verb, args })
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }

    pub fn arg(&self, i: usize) -> Option<&str> {
        self.args.get(i).map(String::as_str)
    }
}

/// Every reply the server can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Welcome,
    ServerFull,
    Ok,
    NotLoggedIn,
    Available,
    AvailableList(Vec<ResourceId>),
    NotAvailable,
    Done,
    Failed,
    Unknown,
    CancelOk,
    Bye,
    Date(String),
}

impl Reply {
    /// Whether the session ends after this reply is written.
    pub fn closes_session(&self) -> bool {
        matches!(self, Reply::Bye | Reply::ServerFull)
    }

    /// `available <ids...>`, or `navailable` when nothing is free.
    pub fn free_list(ids: Vec<ResourceId>) -> Self {
        if ids.is_empty() {
            Reply::NotAvailable
        } else {
            Reply::AvailableList(ids)
        }
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Welcome => f.write_str("welcome"),
            Reply::ServerFull => f.write_str("serverfull"),
            Reply::Ok => f.write_str("ok"),
            Reply::NotLoggedIn => f.write_str("nlogin"),
            Reply::Available => f.write_str("available"),
            Reply::AvailableList(ids) => {
                f.write_str("available")?;
                for id in ids {
                    write!(f, " {id}")?;
                }
                Ok(())
            }
            Reply::NotAvailable => f.write_str("navailable"),
            Reply::Done => f.write_str("done"),
            Reply::Failed => f.write_str("failed"),
            Reply::Unknown => f.write_str("unknown"),
            Reply::CancelOk => f.write_str("cancel ok"),
            Reply::Bye => f.write_str("bye"),
            Reply::Date(date) => f.write_str(date),
        }
    }
}
