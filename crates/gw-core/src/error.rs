use core::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    SizeMismatch {
        expected: usize,
        actual: usize,
    },
    ShapeMismatch {
        what: &'static str,
        expected: [usize; 3],
        actual: [usize; 3],
    },
    OutOfBounds,
    InvalidPack {
        elempack: usize,
    },
    InvalidParam {
        name: &'static str,
        value: i32,
    },
    Allocation {
        len: usize,
    },
    Unsupported(&'static str),
    ThreadPool(String),
}

impl Error {
    /// Engine-facing status code. Always non-zero.
    pub fn status(&self) -> i32 {
        match self {
            Self::Allocation { .. } => -100,
            Self::Unsupported(_) => -2,
            _ => -1,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SizeMismatch { expected, actual } => {
                write!(f, "size mismatch: expected {expected}, got {actual}")
            }
            Self::ShapeMismatch {
                what,
                expected,
                actual,
            } => write!(
                f,
                "{what} shape mismatch: expected {expected:?} (c, h, w), got {actual:?}"
            ),
            Self::OutOfBounds => write!(f, "out of bounds"),
            Self::InvalidPack { elempack } => {
                write!(f, "invalid pack width {elempack}: must be a power of two")
            }
            Self::InvalidParam { name, value } => {
                write!(f, "unsupported {name} {value}")
            }
            Self::Allocation { len } => {
                write!(f, "failed to allocate buffer of {len} elements")
            }
            Self::Unsupported(what) => write!(f, "unsupported: {what}"),
            Self::ThreadPool(msg) => write!(f, "thread pool: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn status_codes_are_non_zero() {
        let errors = [
            Error::SizeMismatch {
                expected: 4,
                actual: 3,
            },
            Error::OutOfBounds,
            Error::InvalidPack { elempack: 3 },
            Error::InvalidParam {
                name: "padding mode",
                value: 7,
            },
            Error::Allocation { len: 16 },
            Error::Unsupported("bicubic resize"),
            Error::ThreadPool("boom".to_string()),
        ];

        for e in &errors {
            assert_ne!(e.status(), 0, "{e}");
        }
        assert_eq!(Error::Allocation { len: 1 }.status(), -100);
    }

    #[test]
    fn display_names_the_offending_parameter() {
        let e = Error::InvalidParam {
            name: "resize type",
            value: 9,
        };
        assert_eq!(e.to_string(), "unsupported resize type 9");
    }
}
