use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EventHubError {
    #[error("event hub is closed")]
    Closed,

    #[error("no authenticated user in request context")]
    MissingUser,
}
