use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LiveError {
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error("backfill ticket for session {0} no longer matches the live instance")]
    StaleTicket(String),
    #[error("invalid system message pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
