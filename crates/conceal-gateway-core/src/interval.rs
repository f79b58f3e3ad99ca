//! Interval geometry shared by the conflict resolvers
//!
//! All intervals are half-open byte ranges `[start, end)` over the scanned text.

use crate::error::ConflictError;
use serde::{Deserialize, Serialize};

pub trait Interval {
    fn start(&self) -> usize;
    fn end(&self) -> usize;

    fn length(&self) -> usize {
        self.end().saturating_sub(self.start())
    }
}

/// A bare `[start, end)` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

impl Interval for Span {
    fn start(&self) -> usize {
        self.start
    }

    fn end(&self) -> usize {
        self.end
    }
}

pub fn overlaps<A, B>(a: &A, b: &B) -> bool
where
    A: Interval + ?Sized,
    B: Interval + ?Sized,
{
    a.start() < b.end() && b.start() < a.end()
}

/// True when `inner` lies within `outer`. Identical intervals contain each other.
pub fn contains<A, B>(outer: &A, inner: &B) -> bool
where
    A: Interval + ?Sized,
    B: Interval + ?Sized,
{
    outer.start() <= inner.start() && inner.end() <= outer.end()
}

pub fn merge<A, B>(a: &A, b: &B) -> Span
where
    A: Interval + ?Sized,
    B: Interval + ?Sized,
{
    Span {
        start: a.start().min(b.start()),
        end: a.end().max(b.end()),
    }
}

pub fn validate<I: Interval + ?Sized>(interval: &I) -> Result<(), ConflictError> {
    if interval.start() < interval.end() {
        Ok(())
    } else {
        Err(ConflictError::InvalidSpan {
            start: interval.start(),
            end: interval.end(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_is_strict() {
        assert!(overlaps(&Span::new(0, 5), &Span::new(4, 8)));
        assert!(overlaps(&Span::new(4, 8), &Span::new(0, 5)));
        assert!(!overlaps(&Span::new(0, 5), &Span::new(5, 8)));
        assert!(!overlaps(&Span::new(10, 12), &Span::new(0, 5)));
    }

    #[test]
    fn test_containment() {
        assert!(contains(&Span::new(0, 10), &Span::new(2, 5)));
        assert!(contains(&Span::new(0, 10), &Span::new(0, 10)));
        assert!(!contains(&Span::new(2, 5), &Span::new(0, 10)));
        assert!(!contains(&Span::new(0, 5), &Span::new(3, 8)));
    }

    #[test]
    fn test_merge_takes_union() {
        assert_eq!(merge(&Span::new(3, 8), &Span::new(0, 5)), Span::new(0, 8));
        assert_eq!(merge(&Span::new(0, 2), &Span::new(6, 9)), Span::new(0, 9));
    }

    #[test]
    fn test_validate_rejects_empty_and_inverted() {
        assert!(validate(&Span::new(0, 1)).is_ok());
        assert_eq!(
            validate(&Span::new(4, 4)),
            Err(ConflictError::InvalidSpan { start: 4, end: 4 })
        );
        assert!(validate(&Span::new(5, 2)).is_err());
    }
}
