//! IndexedDB keys and key ranges.
//!
//! Keys order by type first (`Array > Binary > String > Date > Number`) and by
//! value within a type. Strings compare by UTF-16 code unit, matching script.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Fixed per-key overhead used by `IdbKey::size_estimate`.
const KEY_OVERHEAD_BYTES: usize = 16;

/// A valid IndexedDB key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IdbKey {
    Number(f64),
    Date(f64),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<IdbKey>),
}

impl IdbKey {
    /// Rough in-memory size of the key, used by the put size guard.
    pub fn size_estimate(&self) -> usize {
        KEY_OVERHEAD_BYTES
            + match self {
                IdbKey::Number(_) | IdbKey::Date(_) => std::mem::size_of::<f64>(),
                IdbKey::String(s) => s.encode_utf16().count() * 2,
                IdbKey::Binary(bytes) => bytes.len(),
                IdbKey::Array(keys) => keys.iter().map(IdbKey::size_estimate).sum(),
            }
    }

    fn type_rank(&self) -> u8 {
        match self {
            IdbKey::Number(_) => 0,
            IdbKey::Date(_) => 1,
            IdbKey::String(_) => 2,
            IdbKey::Binary(_) => 3,
            IdbKey::Array(_) => 4,
        }
    }
}

fn compare_f64(a: f64, b: f64) -> Ordering {
    // NaN is never a valid key; total_cmp keeps the ordering total if one slips in.
    a.partial_cmp(&b).unwrap_or_else(|| a.total_cmp(&b))
}

impl Ord for IdbKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (IdbKey::Number(a), IdbKey::Number(b)) | (IdbKey::Date(a), IdbKey::Date(b)) => {
                compare_f64(*a, *b)
            }
            (IdbKey::String(a), IdbKey::String(b)) => a.encode_utf16().cmp(b.encode_utf16()),
            (IdbKey::Binary(a), IdbKey::Binary(b)) => a.cmp(b),
            (IdbKey::Array(a), IdbKey::Array(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl PartialOrd for IdbKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IdbKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IdbKey {}

impl From<f64> for IdbKey {
    fn from(n: f64) -> Self {
        IdbKey::Number(n)
    }
}

impl From<i64> for IdbKey {
    fn from(n: i64) -> Self {
        IdbKey::Number(n as f64)
    }
}

impl From<&str> for IdbKey {
    fn from(s: &str) -> Self {
        IdbKey::String(s.to_string())
    }
}

impl From<String> for IdbKey {
    fn from(s: String) -> Self {
        IdbKey::String(s)
    }
}

/// A contiguous interval over keys. Missing bounds are unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    pub lower: Option<IdbKey>,
    pub upper: Option<IdbKey>,
    pub lower_open: bool,
    pub upper_open: bool,
}

impl KeyRange {
    /// The range covering every key.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// The range containing exactly `key`.
    pub fn only(key: IdbKey) -> Self {
        Self {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        }
    }

    pub fn lower_bound(key: IdbKey, open: bool) -> Self {
        Self {
            lower: Some(key),
            lower_open: open,
            ..Self::default()
        }
    }

    pub fn upper_bound(key: IdbKey, open: bool) -> Self {
        Self {
            upper: Some(key),
            upper_open: open,
            ..Self::default()
        }
    }

    pub fn bound(lower: IdbKey, upper: IdbKey, lower_open: bool, upper_open: bool) -> Self {
        Self {
            lower: Some(lower),
            upper: Some(upper),
            lower_open,
            upper_open,
        }
    }

    /// Returns the key if this range matches a single key.
    pub fn single_key(&self) -> Option<&IdbKey> {
        match (&self.lower, &self.upper) {
            (Some(lower), Some(upper))
                if lower == upper && !self.lower_open && !self.upper_open =>
            {
                Some(lower)
            }
            _ => None,
        }
    }

    pub fn contains(&self, key: &IdbKey) -> bool {
        if let Some(lower) = &self.lower {
            match key.cmp(lower) {
                Ordering::Less => return false,
                Ordering::Equal if self.lower_open => return false,
                _ => {}
            }
        }
        if let Some(upper) = &self.upper {
            match key.cmp(upper) {
                Ordering::Greater => return false,
                Ordering::Equal if self.upper_open => return false,
                _ => {}
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_type_ordering() {
        let number = IdbKey::Number(1e12);
        let date = IdbKey::Date(0.0);
        let string = IdbKey::String(String::new());
        let binary = IdbKey::Binary(vec![]);
        let array = IdbKey::Array(vec![]);

        assert!(number < date);
        assert!(date < string);
        assert!(string < binary);
        assert!(binary < array);
    }

    #[test]
    fn test_array_ordering_is_lexicographic() {
        let short = IdbKey::Array(vec![1.0.into()]);
        let long = IdbKey::Array(vec![1.0.into(), 0.0.into()]);
        let bigger_head = IdbKey::Array(vec![2.0.into()]);

        assert!(short < long);
        assert!(long < bigger_head);
    }

    #[test]
    fn test_strings_compare_by_utf16_code_unit() {
        // U+FF61 is a single code unit above the surrogate range; U+1F600 is
        // encoded with a lead surrogate (0xD83D) and so sorts first in UTF-16.
        let halfwidth = IdbKey::String("\u{FF61}".into());
        let emoji = IdbKey::String("\u{1F600}".into());
        assert!(emoji < halfwidth);
    }

    #[test]
    fn test_negative_zero_equals_zero() {
        assert_eq!(IdbKey::Number(-0.0), IdbKey::Number(0.0));
    }

    #[test]
    fn test_size_estimate() {
        assert_eq!(IdbKey::Number(3.0).size_estimate(), 16 + 8);
        assert_eq!(IdbKey::String("abc".into()).size_estimate(), 16 + 6);
        assert_eq!(IdbKey::Binary(vec![0; 10]).size_estimate(), 16 + 10);
        assert_eq!(
            IdbKey::Array(vec![IdbKey::Number(1.0), IdbKey::String("a".into())]).size_estimate(),
            16 + (16 + 8) + (16 + 2)
        );
    }

    #[test]
    fn test_range_contains_respects_open_bounds() {
        let range = KeyRange::bound(1.0.into(), 5.0.into(), true, false);
        assert!(!range.contains(&1.0.into()));
        assert!(range.contains(&2.0.into()));
        assert!(range.contains(&5.0.into()));
        assert!(!range.contains(&6.0.into()));
    }

    #[test]
    fn test_only_range() {
        let range = KeyRange::only("k".into());
        assert_eq!(range.single_key(), Some(&IdbKey::from("k")));
        assert!(range.contains(&"k".into()));
        assert!(!range.contains(&"l".into()));
        assert!(KeyRange::unbounded().single_key().is_none());
    }
}
