//! Token range splitting for parallel unloads

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Half-open token range `(begin, end]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenRange {
    pub begin: BigInt,
    pub end: BigInt,
}

impl TokenRange {
    pub fn new(begin: impl Into<BigInt>, end: impl Into<BigInt>) -> Self {
        Self { begin: begin.into(), end: end.into() }
    }

    /// Whether `token` falls inside `(begin, end]`
    pub fn contains(&self, token: &BigInt) -> bool {
        *token > self.begin && *token <= self.end
    }
}

impl fmt::Display for TokenRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}]", self.begin, self.end)
    }
}

/// Splits `(begin, end]` into `n` contiguous ranges
///
/// Every range but the last spans `(end - begin) / n` tokens; the last one
/// absorbs the remainder. `n` below 1 is treated as 1.
///
/// # Example
///
/// ```
/// use cqlbulk_engine::partitioner::{split, TokenRange};
///
/// let ranges = split(&0.into(), &10.into(), 3);
/// assert_eq!(ranges, vec![
///     TokenRange::new(0, 3),
///     TokenRange::new(3, 6),
///     TokenRange::new(6, 10),
/// ]);
/// ```
pub fn split(begin: &BigInt, end: &BigInt, n: usize) -> Vec<TokenRange> {
    let n = n.max(1);
    let delta = (end - begin) / BigInt::from(n);

    let mut ranges = Vec::with_capacity(n);
    let mut lower = begin.clone();
    for _ in 0..n - 1 {
        let upper = &lower + &delta;
        ranges.push(TokenRange { begin: lower, end: upper.clone() });
        lower = upper;
    }
    ranges.push(TokenRange { begin: lower, end: end.clone() });
    ranges
}

/// Partitioner whose token ring an unload splits when no bounds are given
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TokenSpace {
    /// Tokens are signed 64-bit integers
    #[default]
    Murmur3,
    /// Tokens are integers in `[0, 2^127]`
    Random,
}

impl TokenSpace {
    /// Bounds whose `(begin, end]` range covers every token of the ring
    pub fn full_range(self) -> (BigInt, BigInt) {
        match self {
            TokenSpace::Murmur3 => {
                // i64::MIN is the ring's minimum token and never owns a row
                (BigInt::from(i64::MIN), BigInt::from(i64::MAX))
            },
            TokenSpace::Random => (BigInt::from(-1), BigInt::from(1) << 127u32),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_range() {
        let ranges = split(&BigInt::from(-5), &BigInt::from(5), 1);
        assert_eq!(ranges, vec![TokenRange::new(-5, 5)]);
        assert_eq!(split(&BigInt::from(0), &BigInt::from(5), 0).len(), 1);
    }

    #[test]
    fn test_more_ranges_than_tokens() {
        let ranges = split(&BigInt::from(0), &BigInt::from(2), 4);
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges[3], TokenRange::new(0, 2));
        assert!(ranges[..3].iter().all(|r| r.begin == r.end));
    }

    #[test]
    fn test_full_rings() {
        let (b, e) = TokenSpace::Murmur3.full_range();
        let ranges = split(&b, &e, 4);
        assert_eq!(ranges[0].begin, BigInt::from(i64::MIN));
        assert_eq!(ranges[3].end, BigInt::from(i64::MAX));
        assert!(ranges[0].contains(&BigInt::from(i64::MIN + 1)));

        let (b, e) = TokenSpace::Random.full_range();
        assert_eq!(b, BigInt::from(-1));
        assert_eq!(e, "170141183460469231731687303715884105728".parse::<BigInt>().unwrap());
    }

    #[test]
    fn test_display() {
        assert_eq!(TokenRange::new(-1, 9).to_string(), "(-1, 9]");
    }

    proptest! {
        #[test]
        fn prop_split_covers_range(begin in any::<i64>(), width in 1u64..u64::MAX, n in 1usize..64) {
            let begin = BigInt::from(begin);
            let end = &begin + BigInt::from(width);
            let ranges = split(&begin, &end, n);

            prop_assert_eq!(ranges.len(), n);
            prop_assert_eq!(&ranges[0].begin, &begin);
            prop_assert_eq!(&ranges[n - 1].end, &end);
            for pair in ranges.windows(2) {
                prop_assert_eq!(&pair[0].end, &pair[1].begin);
            }
            for range in &ranges {
                prop_assert!(range.begin <= range.end);
            }
        }
    }
}
