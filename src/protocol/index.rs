//! Sequence index normalization

use crate::host::{HostError, HostResult};

/// Resolve a possibly negative index against `len`
///
/// `-1` is the last element. Anything outside `-len..len` is an
/// `IndexError`, so the resolved index is always in bounds.
pub fn wrap_index(index: i64, len: usize) -> HostResult<usize> {
    let len_i = i64::try_from(len).map_err(|_| HostError::index_error("sequence too large to index"))?;
    let resolved = if index < 0 { index + len_i } else { index };
    if (0..len_i).contains(&resolved) {
        Ok(resolved as usize)
    } else {
        Err(HostError::index_error(format!(
            "index {index} out of range for length {len}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ExceptionKind;
    use proptest::prelude::*;

    #[test]
    fn negative_one_is_the_last_element() {
        assert_eq!(wrap_index(-1, 3).unwrap(), 2);
        assert_eq!(wrap_index(-3, 3).unwrap(), 0);
        assert_eq!(wrap_index(0, 3).unwrap(), 0);
    }

    #[test]
    fn out_of_range_is_an_index_error() {
        assert_eq!(wrap_index(3, 3).unwrap_err().kind, ExceptionKind::IndexError);
        assert_eq!(wrap_index(-4, 3).unwrap_err().kind, ExceptionKind::IndexError);
        assert_eq!(wrap_index(0, 0).unwrap_err().kind, ExceptionKind::IndexError);
        assert_eq!(wrap_index(i64::MIN, 3).unwrap_err().kind, ExceptionKind::IndexError);
    }

    proptest! {
        #[test]
        fn wrapped_index_is_always_in_bounds(index in any::<i64>(), len in 0usize..10_000) {
            match wrap_index(index, len) {
                Ok(resolved) => {
                    prop_assert!(resolved < len);
                    let expected = if index < 0 { len as i64 + index } else { index };
                    prop_assert_eq!(resolved as i64, expected);
                }
                Err(err) => {
                    prop_assert_eq!(err.kind, ExceptionKind::IndexError);
                    prop_assert!(index >= len as i64 || index < -(len as i64));
                }
            }
        }
    }
}
