//! Venues disagree on field names and on whether numbers travel as JSON numbers or strings.
//! These helpers resolve "the first present of several candidate fields" and coerce values
//! into finite numbers, so each normaliser stays a short total function.

use crate::event::BookLevel;
use serde::{Deserialize, Deserializer, de::Error as _};
use serde_json::Value;
use std::str::FromStr;

/// Deserialize a `String` as the desired type (eg/ "16578.50" → f64).
pub fn de_str<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let data = String::deserialize(deserializer)?;
    data.trim().parse::<T>().map_err(D::Error::custom)
}

/// Coerce a JSON number or numeric string into a finite `f64`.
pub fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;

    parsed.is_finite().then_some(parsed)
}

/// Coerce a JSON integer or integer string into an `i64` (eg/ epoch milliseconds).
pub fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Resolve the first candidate field that is present and non-null.
pub fn first<'a>(object: &'a Value, candidates: &[&str]) -> Option<&'a Value> {
    candidates
        .iter()
        .filter_map(|key| object.get(key))
        .find(|value| !value.is_null())
}

/// Resolve the first candidate field that coerces into a finite number.
pub fn first_number(object: &Value, candidates: &[&str]) -> Option<f64> {
    candidates
        .iter()
        .filter_map(|key| object.get(key))
        .find_map(number)
}

/// Resolve the first candidate field that coerces into a strictly positive number.
///
/// Used where a venue reports a zero placeholder in a preferred field (eg/ an average fill
/// price of "0" before any fill), so the next candidate should be consulted instead.
pub fn first_positive(object: &Value, candidates: &[&str]) -> Option<f64> {
    candidates
        .iter()
        .filter_map(|key| object.get(key))
        .filter_map(number)
        .find(|value| *value > 0.0)
}

/// Resolve the first candidate field that coerces into an integer.
pub fn first_integer(object: &Value, candidates: &[&str]) -> Option<i64> {
    candidates
        .iter()
        .filter_map(|key| object.get(key))
        .find_map(integer)
}

/// Resolve the first candidate field holding a non-empty string.
pub fn first_str<'a>(object: &'a Value, candidates: &[&str]) -> Option<&'a str> {
    candidates
        .iter()
        .filter_map(|key| object.get(key))
        .filter_map(Value::as_str)
        .find(|text| !text.is_empty())
}

/// Parse a book level from either array form `[price, size, ...]` or object form
/// `{ "price" | "px" | "p", "size" | "sz" | "qty" | "amount" | "q" }`.
pub fn book_level(value: &Value) -> Option<BookLevel> {
    let (price, size) = match value {
        Value::Array(items) => (number(items.first()?)?, number(items.get(1)?)?),
        Value::Object(_) => (
            first_number(value, &["price", "px", "p"])?,
            first_number(value, &["size", "sz", "qty", "amount", "q"])?,
        ),
        _ => return None,
    };

    (price > 0.0 && size >= 0.0).then_some(BookLevel::new(price, size))
}

/// Parse a list of book levels, skipping (rather than failing on) malformed entries.
pub fn book_levels(value: &Value) -> Option<Vec<BookLevel>> {
    value
        .as_array()
        .map(|levels| levels.iter().filter_map(book_level).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_number_fallback() {
        struct TestCase {
            input: Value,
            expected: Option<f64>,
        }

        let tests = vec![
            TestCase {
                // TC0: first candidate present as string
                input: json!({ "ap": "101.5", "p": "100" }),
                expected: Some(101.5),
            },
            TestCase {
                // TC1: first candidate absent, second present as number
                input: json!({ "p": 100.0 }),
                expected: Some(100.0),
            },
            TestCase {
                // TC2: first candidate unparsable falls through to second
                input: json!({ "ap": "", "p": "99" }),
                expected: Some(99.0),
            },
            TestCase {
                // TC3: non-finite is never accepted
                input: json!({ "ap": "NaN", "p": "inf" }),
                expected: None,
            },
            TestCase {
                // TC4: nothing present
                input: json!({ "q": "1" }),
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = first_number(&test.input, &["ap", "p"]);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_book_level_shapes() {
        struct TestCase {
            input: Value,
            expected: Option<BookLevel>,
        }

        let tests = vec![
            TestCase {
                // TC0: Binance style string array
                input: json!(["64000.10", "2.5"]),
                expected: Some(BookLevel::new(64000.10, 2.5)),
            },
            TestCase {
                // TC1: OKX style 4-tuple
                input: json!(["64000", "120", "0", "3"]),
                expected: Some(BookLevel::new(64000.0, 120.0)),
            },
            TestCase {
                // TC2: object form with alternate names
                input: json!({ "px": 64000.0, "sz": 1.0 }),
                expected: Some(BookLevel::new(64000.0, 1.0)),
            },
            TestCase {
                // TC3: zero price rejected
                input: json!(["0", "1"]),
                expected: None,
            },
            TestCase {
                // TC4: truncated array rejected
                input: json!(["64000"]),
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(book_level(&test.input), test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_first_integer_accepts_string_epoch() {
        let value = json!({ "updatedTime": "1692266434010" });
        assert_eq!(
            first_integer(&value, &["T", "updatedTime", "ts"]),
            Some(1692266434010)
        );
    }
}
