use std::cmp::Ordering;

use super::errors::{KeyError, KeyResult};
use super::IndexKey;

/// Orders two keys of the same underlying type.
///
/// Keys of different types are never coerced into each other. Lists are
/// ordered by length first, then element by element. Floats use IEEE total
/// ordering so NaN has a stable place.
pub fn compare(a: &IndexKey, b: &IndexKey) -> KeyResult<Ordering> {
    use IndexKey::*;

    let ord = match (a, b) {
        (Null, _) | (_, Null) => return Err(KeyError::UnknownType("null")),
        (Bool(x), Bool(y)) => x.cmp(y),
        (Int32(x), Int32(y)) => x.cmp(y),
        (Int64(x), Int64(y)) => x.cmp(y),
        (UInt32(x), UInt32(y)) => x.cmp(y),
        (UInt64(x), UInt64(y)) => x.cmp(y),
        (Float64(x), Float64(y)) => x.total_cmp(y),
        (String(x), String(y)) => x.cmp(y),
        (Timestamp(x), Timestamp(y)) => x.cmp(y),
        (Bytes(x), Bytes(y)) => x.cmp(y),
        (List(x), List(y)) => {
            if x.len() != y.len() {
                return Ok(x.len().cmp(&y.len()));
            }
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare(l, r)?;
                if ord != Ordering::Equal {
                    return Ok(ord);
                }
            }
            Ordering::Equal
        }
        _ => {
            return Err(KeyError::TypeMismatch {
                left: a.type_name(),
                right: b.type_name(),
            })
        }
    };
    Ok(ord)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_compare() {
        let now = Utc.with_ymd_and_hms(2018, 8, 1, 1, 1, 1).unwrap();
        let cases: Vec<(IndexKey, IndexKey, Ordering)> = vec![
            (true.into(), false.into(), Ordering::Greater),
            (false.into(), true.into(), Ordering::Less),
            (true.into(), true.into(), Ordering::Equal),
            ("a".into(), "b".into(), Ordering::Less),
            ("b".into(), "a".into(), Ordering::Greater),
            ("a".into(), "a".into(), Ordering::Equal),
            (1i32.into(), 2i32.into(), Ordering::Less),
            (2i64.into(), 1i64.into(), Ordering::Greater),
            (2u32.into(), 2u32.into(), Ordering::Equal),
            (1u64.into(), 2u64.into(), Ordering::Less),
            (1.5f64.into(), 1.0f64.into(), Ordering::Greater),
            (now.into(), (now + Duration::hours(1)).into(), Ordering::Less),
            (now.into(), now.into(), Ordering::Equal),
            (b"a".to_vec().into(), b"b".to_vec().into(), Ordering::Less),
            (
                IndexKey::List(vec![1i64.into(), "b".into()]),
                IndexKey::List(vec![1i64.into(), "a".into()]),
                Ordering::Greater,
            ),
            (
                IndexKey::List(vec![9i64.into()]),
                IndexKey::List(vec![1i64.into(), 1i64.into()]),
                Ordering::Less,
            ),
        ];

        for (a, b, expected) in cases {
            assert_eq!(compare(&a, &b).unwrap(), expected, "{:?} vs {:?}", a, b);
        }
    }

    #[test]
    fn test_compare_type_mismatch() {
        let err = compare(&IndexKey::Int64(1), &IndexKey::from("1")).unwrap_err();
        assert_eq!(
            err,
            KeyError::TypeMismatch {
                left: "int64",
                right: "string"
            }
        );

        let err = compare(&IndexKey::Int32(1), &IndexKey::Int64(1)).unwrap_err();
        assert!(matches!(err, KeyError::TypeMismatch { .. }));
    }

    #[test]
    fn test_compare_null_is_unknown() {
        assert_eq!(
            compare(&IndexKey::Null, &IndexKey::Int64(1)),
            Err(KeyError::UnknownType("null"))
        );
    }

    #[test]
    fn test_list_element_mismatch() {
        let a = IndexKey::List(vec![1i64.into()]);
        let b = IndexKey::List(vec!["x".into()]);
        assert!(compare(&a, &b).is_err());
    }
}
