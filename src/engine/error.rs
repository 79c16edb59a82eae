use ulid::Ulid;

use crate::model::Ms;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    UnknownUser(String),
    AlreadyExists(Ulid),
    UsernameTaken(String),
    InvalidUsername(&'static str),
    InvalidInterval(&'static str),
    InvalidContact(&'static str),
    SlotTaken(Ulid),
    SlotInPast(Ms),
    OutsideAvailability(Ms),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::UnknownUser(username) => write!(f, "unknown user: {username}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::UsernameTaken(username) => {
                write!(f, "username already taken: {username}")
            }
            EngineError::InvalidUsername(msg) => write!(f, "invalid username: {msg}"),
            EngineError::InvalidInterval(msg) => write!(f, "invalid interval: {msg}"),
            EngineError::InvalidContact(msg) => write!(f, "invalid contact: {msg}"),
            EngineError::SlotTaken(id) => write!(f, "slot taken by booking: {id}"),
            EngineError::SlotInPast(at) => write!(f, "slot is in the past: {at}"),
            EngineError::OutsideAvailability(at) => {
                write!(f, "slot outside configured availability: {at}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
