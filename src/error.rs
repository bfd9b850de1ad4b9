use thiserror::Error;

#[derive(Debug, Error)]
pub enum LssError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("array {name} has the wrong shape (got {got:?}, expected {expected:?})")]
    ShapeMismatch {
        name: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },

    #[error("consistency check failed: {0}")]
    Consistency(String),

    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("{what} is not finite at {at:e}")]
    NonFinite { what: String, at: f64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to encode cache: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("failed to decode cache: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error(transparent)]
    ReadNpy(#[from] ndarray_npy::ReadNpyError),

    #[error(transparent)]
    WriteNpy(#[from] ndarray_npy::WriteNpyError),
}

pub type Result<T> = std::result::Result<T, LssError>;

/// Fails with [`LssError::ShapeMismatch`] unless `got` equals `expected`,
/// axis count included.
pub fn assert_shape(name: &str, got: &[usize], expected: &[usize]) -> Result<()> {
    if got != expected {
        return Err(LssError::ShapeMismatch {
            name: name.to_string(),
            got: got.to_vec(),
            expected: expected.to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{LssError, assert_shape};

    #[test]
    fn shape_mismatch_names_array() {
        assert!(assert_shape("psi", &[3, 4, 12], &[3, 4, 12]).is_ok());
        let err = assert_shape("psi", &[4, 12], &[3, 4, 12]).unwrap_err();
        match &err {
            LssError::ShapeMismatch {
                name,
                got,
                expected,
            } => {
                assert_eq!(name, "psi");
                assert_eq!(got, &vec![4, 12]);
                assert_eq!(expected, &vec![3, 4, 12]);
            }
            _ => panic!("unexpected error {:?}", err),
        }
        assert!(err.to_string().contains("psi"));
    }
}
