use thiserror::Error;

/// Coarse error classes reported to clients and mapped to HTTP statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidState,
    Unauthorized,
    Validation,
    PersistenceFailure,
}

/// Failures of the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection pool: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("encoding: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("store task failed: {0}")]
    Task(String),
}

/// Errors produced by room operations.
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room {0} not found")]
    RoomNotFound(String),
    #[error("message {0} not found")]
    MessageNotFound(String),
    #[error("user {0} is not a member of this room")]
    NotAMember(String),
    #[error("room {0} already exists")]
    AlreadyExists(String),
    #[error("room is full")]
    Full,
    #[error("room is not live")]
    NotLive,
    #[error("only the room admin may do this")]
    Unauthorized,
    #[error("message text is empty")]
    Empty,
    #[error("message text exceeds {0} characters")]
    TooLong(usize),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl RoomError {
    /// Stable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            RoomError::RoomNotFound(_) => "ROOM_NOT_FOUND",
            RoomError::MessageNotFound(_) => "MESSAGE_NOT_FOUND",
            RoomError::NotAMember(_) => "NOT_A_MEMBER",
            RoomError::AlreadyExists(_) => "ALREADY_EXISTS",
            RoomError::Full => "FULL",
            RoomError::NotLive => "NOT_LIVE",
            RoomError::Unauthorized => "UNAUTHORIZED",
            RoomError::Empty => "EMPTY",
            RoomError::TooLong(_) => "TOO_LONG",
            RoomError::BadRequest(_) => "BAD_REQUEST",
            RoomError::Persistence(_) => "PERSISTENCE",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RoomError::RoomNotFound(_) | RoomError::MessageNotFound(_) | RoomError::NotAMember(_) => {
                ErrorKind::NotFound
            }
            RoomError::AlreadyExists(_) | RoomError::Full => ErrorKind::Conflict,
            RoomError::NotLive => ErrorKind::InvalidState,
            RoomError::Unauthorized => ErrorKind::Unauthorized,
            RoomError::Empty | RoomError::TooLong(_) | RoomError::BadRequest(_) => {
                ErrorKind::Validation
            }
            RoomError::Persistence(_) => ErrorKind::PersistenceFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_kinds() {
        assert_eq!(RoomError::Full.kind(), ErrorKind::Conflict);
        assert_eq!(RoomError::Full.code(), "FULL");
        assert_eq!(RoomError::NotLive.kind(), ErrorKind::InvalidState);
        assert_eq!(RoomError::NotAMember("u".into()).kind(), ErrorKind::NotFound);
        let err = RoomError::from(StoreError::Corrupt("x".into()));
        assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
        assert_eq!(err.code(), "PERSISTENCE");
    }
}
