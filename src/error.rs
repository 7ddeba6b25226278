use thiserror::Error;

/// Carver error types
#[derive(Error, Debug)]
pub enum Error {
    /// A precondition was violated: mismatched dimensions on attach or
    /// visibility-map load, negative rigidity, resize target out of range…
    #[error("invalid operation: {0}")]
    Invalid(String),

    /// A pixel or map buffer could not be allocated.
    #[error("out of memory")]
    OutOfMemory,

    /// The operation was interrupted through the carver's cancellation token.
    #[error("cancelled")]
    Cancelled,

    /// A visibility-map container could not be decoded.
    #[error("vmap parse error: {0}")]
    Parse(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Error {
        Error::Invalid(msg.into())
    }

    pub(crate) fn parse(msg: impl Into<String>) -> Error {
        Error::Parse(msg.into())
    }
}

/// Allocates a zero-initialised buffer, reporting failure instead of
/// aborting. Every map allocation in the crate goes through here.
pub(crate) fn try_vec<T: Clone + Default>(len: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|_| Error::OutOfMemory)?;
    v.resize(len, T::default());
    Ok(v)
}
