//! Interactive command parsing for `cairn-peer`.
//!
//! Every command has a word form and the numeric menu form:
//!
//! ```text
//! 1 | list | ls
//! 2 | publish <name>
//! 3 | download <name>
//! 4 | unpublish <name>
//! 5 | leave | quit
//!     help
//! ```
//!
//! A name-taking command given without a name asks for it on the next line.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Publish(String),
    Download(String),
    Unpublish(String),
    Leave,
    Help,
}

/// Builds a name-taking command once its name is known.
pub type NeedsName = fn(String) -> Command;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("unknown command {0:?}, try `help`")]
    Unknown(String),

    #[error("{prompt}")]
    MissingName {
        prompt: &'static str,
        complete: NeedsName,
    },
}

pub const MENU: &str = "[1] Content Listing\n[2] Content Registration\n[3] Content Download\n[4] Content De-Registration\n[5] Quit";

impl std::str::FromStr for Command {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(ParseError::Empty);
        };
        let name = words.next().map(str::to_string);

        let (prompt, complete): (&'static str, NeedsName) = match verb.to_ascii_lowercase().as_str() {
            "1" | "list" | "ls" => return Ok(Command::List),
            "5" | "leave" | "quit" => return Ok(Command::Leave),
            "help" | "?" => return Ok(Command::Help),
            "2" | "publish" => ("Enter file name to register: ", Command::Publish),
            "3" | "download" => ("Enter file to download: ", Command::Download),
            "4" | "unpublish" => ("Enter content to deregister: ", Command::Unpublish),
            _ => return Err(ParseError::Unknown(verb.to_string())),
        };

        match name {
            Some(name) => Ok(complete(name)),
            None => Err(ParseError::MissingName { prompt, complete }),
        }
    }
}
