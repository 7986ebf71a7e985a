use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendError {
    #[error("node is not the leader")]
    NotLeader,

    #[error("another append is already in flight")]
    AppendInFlight,

    #[error("append cancelled before reaching a majority")]
    Cancelled,
}
