/// Core error type for the poll bot.
///
/// Adapter crates map their specific errors into this type so the core can
/// handle failures consistently (user-facing message vs retryable).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid poll: {0}")]
    InvalidPoll(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("external error: {0}")]
    External(String),

    #[error(transparent)]
    Poll(#[from] PollError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcomes of poll operations that are reported back to the caller.
///
/// `DuplicateVote` and `AlreadyEnded` are soft: the state is already what the
/// caller asked for.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("no choice uses {0}")]
    ChoiceNotFound(String),

    #[error("the poll has ended")]
    PollEnded,

    #[error("you can vote for at most {0} choices")]
    LimitExceeded(u32),

    #[error("vote already recorded")]
    DuplicateVote,

    #[error("the poll has already ended")]
    AlreadyEnded,

    #[error("only the poll owner can do that")]
    NotOwner,

    #[error("poll not found")]
    NotFound,

    #[error("storage failure: {0}")]
    Persistence(String),

    #[error("the poll service is shutting down")]
    ShuttingDown,
}

impl PollError {
    /// Policy rejections of an incoming vote. These are never retried.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            PollError::ChoiceNotFound(_) | PollError::PollEnded | PollError::LimitExceeded(_)
        )
    }
}

impl From<Error> for PollError {
    fn from(e: Error) -> Self {
        match e {
            Error::Poll(p) => p,
            other => PollError::Persistence(other.to_string()),
        }
    }
}
