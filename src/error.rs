use crate::{loader::LoaderError, protocol::ProtocolError};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("attribute `{0}` has not been provided")]
    MissingAttribute(String),
    #[error("{0}")]
    Precondition(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("no data found: {0}")]
    NoDataFound(String),
    #[error("array shape mismatch")]
    Shape(#[from] ndarray::ShapeError),
    #[error("failed to build the worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Error in the `protocol` module")]
    Protocol(#[from] ProtocolError),
    #[error("Error in the `loader` module")]
    Loader(#[from] LoaderError),
}
impl Error {
    pub(crate) fn invalid(msg: impl ToString) -> Self {
        Error::InvalidArgument(msg.to_string())
    }
    pub(crate) fn precondition(msg: impl ToString) -> Self {
        Error::Precondition(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
