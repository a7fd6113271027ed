//! Error type for the fallible operations of the maps and sets.
//!
//! Absence of a key is not an error; lookups and removals report it with
//! `Option`. Only external input can fail.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The JSON payload did not parse or did not match the container type.
    /// The container it was meant for is left unchanged.
    #[error("malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_error_converts_and_displays() {
        let err: Error = serde_json::from_str::<Vec<i32>>("[1,").unwrap_err().into();
        assert!(matches!(err, Error::Json(_)));
        assert!(err.to_string().starts_with("malformed JSON payload"));
    }
}
