//! Static interval analysis
//!
//! Declared bounds (`I32 > 10`) and `if`-condition narrowing both live in
//! this one-variable interval domain. Proofs are subset tests: a value
//! flows into a bounded destination only when its interval provably fits
//! inside the destination's.

use std::collections::HashMap;

use crate::ast::{BinOp, BoundOp, Span};
use crate::error::{CompileError, Result};

/// A possibly one-sided integer range with per-side inclusivity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub lower: Option<i128>,
    pub lower_inclusive: bool,
    pub upper: Option<i128>,
    pub upper_inclusive: bool,
}

impl Interval {
    /// The unbounded interval
    pub fn top() -> Self {
        Self {
            lower: None,
            lower_inclusive: false,
            upper: None,
            upper_inclusive: false,
        }
    }

    /// The degenerate interval holding exactly one value
    pub fn constant(value: i128) -> Self {
        Self {
            lower: Some(value),
            lower_inclusive: true,
            upper: Some(value),
            upper_inclusive: true,
        }
    }

    /// `< limit`, the shape required of array index bounds
    pub fn below(limit: i128) -> Self {
        Self {
            lower: None,
            lower_inclusive: false,
            upper: Some(limit),
            upper_inclusive: false,
        }
    }

    /// Interval for a declared bound such as `> 10` or `== 3`
    pub fn from_bound_op(op: BoundOp, value: i128) -> Self {
        match op {
            BoundOp::Lt => Self {
                lower: None,
                lower_inclusive: false,
                upper: Some(value),
                upper_inclusive: false,
            },
            BoundOp::Le => Self {
                lower: None,
                lower_inclusive: false,
                upper: Some(value),
                upper_inclusive: true,
            },
            BoundOp::Gt => Self {
                lower: Some(value),
                lower_inclusive: false,
                upper: None,
                upper_inclusive: false,
            },
            BoundOp::Ge => Self {
                lower: Some(value),
                lower_inclusive: true,
                upper: None,
                upper_inclusive: false,
            },
            BoundOp::Eq => Self::constant(value),
        }
    }

    /// Interval learned from `var OP value` in an `if` condition.
    /// `!=` carries no interval information and yields `None`.
    pub fn from_comparison(op: BinOp, value: i128) -> Option<Self> {
        match op {
            BinOp::Lt => Some(Self::from_bound_op(BoundOp::Lt, value)),
            BinOp::Le => Some(Self::from_bound_op(BoundOp::Le, value)),
            BinOp::Gt => Some(Self::from_bound_op(BoundOp::Gt, value)),
            BinOp::Ge => Some(Self::from_bound_op(BoundOp::Ge, value)),
            BinOp::Eq => Some(Self::constant(value)),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match (self.lower, self.upper) {
            (Some(lo), Some(hi)) => {
                lo > hi || (lo == hi && !(self.lower_inclusive && self.upper_inclusive))
            }
            _ => false,
        }
    }

    /// Tightest interval inside both; may come out empty
    pub fn intersect(&self, other: &Interval) -> Interval {
        let (lower, lower_inclusive) = match (self.lower, other.lower) {
            (None, None) => (None, false),
            (Some(l), None) => (Some(l), self.lower_inclusive),
            (None, Some(r)) => (Some(r), other.lower_inclusive),
            (Some(l), Some(r)) => {
                if l > r {
                    (Some(l), self.lower_inclusive)
                } else if r > l {
                    (Some(r), other.lower_inclusive)
                } else {
                    (Some(l), self.lower_inclusive && other.lower_inclusive)
                }
            }
        };
        let (upper, upper_inclusive) = match (self.upper, other.upper) {
            (None, None) => (None, false),
            (Some(l), None) => (Some(l), self.upper_inclusive),
            (None, Some(r)) => (Some(r), other.upper_inclusive),
            (Some(l), Some(r)) => {
                if l < r {
                    (Some(l), self.upper_inclusive)
                } else if r < l {
                    (Some(r), other.upper_inclusive)
                } else {
                    (Some(l), self.upper_inclusive && other.upper_inclusive)
                }
            }
        };
        Interval {
            lower,
            lower_inclusive,
            upper,
            upper_inclusive,
        }
    }

    /// Does every value of `self` also satisfy `outer`?
    pub fn is_subset_of(&self, outer: &Interval) -> bool {
        let lower_ok = match (outer.lower, self.lower) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(o), Some(s)) => {
                o < s || (o == s && (outer.lower_inclusive || !self.lower_inclusive))
            }
        };
        let upper_ok = match (outer.upper, self.upper) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(o), Some(s)) => {
                o > s || (o == s && (outer.upper_inclusive || !self.upper_inclusive))
            }
        };
        lower_ok && upper_ok
    }

    pub fn contains(&self, value: i128) -> bool {
        let lower_ok = match self.lower {
            None => true,
            Some(lo) => value > lo || (value == lo && self.lower_inclusive),
        };
        let upper_ok = match self.upper {
            None => true,
            Some(hi) => value < hi || (value == hi && self.upper_inclusive),
        };
        lower_ok && upper_ok
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let (Some(lo), Some(hi)) = (self.lower, self.upper) {
            if lo == hi && self.lower_inclusive && self.upper_inclusive {
                return write!(f, "== {lo}");
            }
        }
        let mut parts = Vec::new();
        if let Some(lo) = self.lower {
            let op = if self.lower_inclusive { ">=" } else { ">" };
            parts.push(format!("{op} {lo}"));
        }
        if let Some(hi) = self.upper {
            let op = if self.upper_inclusive { "<=" } else { "<" };
            parts.push(format!("{op} {hi}"));
        }
        if parts.is_empty() {
            write!(f, "unbounded")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// The interval lattice: unreachable, a concrete range, or unknown
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Range {
    Bottom,
    Within(Interval),
    Top,
}

impl Range {
    /// Greatest lower bound; `Bottom` means the facts are contradictory
    pub fn meet(&self, other: &Range) -> Range {
        match (self, other) {
            (Range::Bottom, _) | (_, Range::Bottom) => Range::Bottom,
            (Range::Top, r) => r.clone(),
            (r, Range::Top) => r.clone(),
            (Range::Within(a), Range::Within(b)) => {
                let merged = a.intersect(b);
                if merged.is_empty() {
                    Range::Bottom
                } else {
                    Range::Within(merged)
                }
            }
        }
    }

    /// Least upper bound over the interval hull
    pub fn join(&self, other: &Range) -> Range {
        match (self, other) {
            (Range::Top, _) | (_, Range::Top) => Range::Top,
            (Range::Bottom, r) => r.clone(),
            (r, Range::Bottom) => r.clone(),
            (Range::Within(a), Range::Within(b)) => {
                let (lower, lower_inclusive) = match (a.lower, b.lower) {
                    (Some(l), Some(r)) => {
                        if l < r {
                            (Some(l), a.lower_inclusive)
                        } else if r < l {
                            (Some(r), b.lower_inclusive)
                        } else {
                            (Some(l), a.lower_inclusive || b.lower_inclusive)
                        }
                    }
                    _ => (None, false),
                };
                let (upper, upper_inclusive) = match (a.upper, b.upper) {
                    (Some(l), Some(r)) => {
                        if l > r {
                            (Some(l), a.upper_inclusive)
                        } else if r > l {
                            (Some(r), b.upper_inclusive)
                        } else {
                            (Some(l), a.upper_inclusive || b.upper_inclusive)
                        }
                    }
                    _ => (None, false),
                };
                Range::Within(Interval {
                    lower,
                    lower_inclusive,
                    upper,
                    upper_inclusive,
                })
            }
        }
    }

    pub fn interval(&self) -> Option<&Interval> {
        match self {
            Range::Within(interval) => Some(interval),
            _ => None,
        }
    }
}

/// A declared bound on a binding. `length_of` marks the `< name.length`
/// form, which additionally licenses indexing into that specific array.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundInfo {
    pub interval: Interval,
    pub length_of: Option<String>,
}

impl BoundInfo {
    pub fn plain(interval: Interval) -> Self {
        Self {
            interval,
            length_of: None,
        }
    }

    pub fn length(interval: Interval, array: String) -> Self {
        Self {
            interval,
            length_of: Some(array),
        }
    }
}

/// Condition narrowing active inside an `if` branch. Kept apart from the
/// bindings' own declared bounds; branches work on a clone.
#[derive(Debug, Clone, Default)]
pub struct Facts {
    numeric: HashMap<String, Interval>,
    boolean: HashMap<String, bool>,
}

impl Facts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `name` confined to `interval`, meeting any earlier fact.
    /// An unsatisfiable combination is a fatal bounds error.
    pub fn narrow_numeric(&mut self, name: &str, interval: Interval, span: Span) -> Result<()> {
        let current = match self.numeric.get(name) {
            Some(existing) => Range::Within(*existing),
            None => Range::Top,
        };
        match current.meet(&Range::Within(interval)) {
            Range::Within(merged) => {
                self.numeric.insert(name.to_string(), merged);
                Ok(())
            }
            _ => Err(CompileError::bounds(
                format!("conflicting conditions on '{name}'"),
                span,
            )),
        }
    }

    /// Record `name == true/false`; re-asserting the opposite is fatal
    pub fn narrow_bool(&mut self, name: &str, value: bool, span: Span) -> Result<()> {
        if let Some(existing) = self.boolean.get(name) {
            if *existing != value {
                return Err(CompileError::bounds(
                    format!("conflicting conditions on '{name}'"),
                    span,
                ));
            }
        }
        self.boolean.insert(name.to_string(), value);
        Ok(())
    }

    pub fn numeric(&self, name: &str) -> Option<&Interval> {
        self.numeric.get(name)
    }

    /// Assigning to a variable makes everything learned about it stale
    pub fn invalidate(&mut self, name: &str) {
        self.numeric.remove(name);
        self.boolean.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_interval() {
        let five = Interval::constant(5);
        assert!(five.contains(5));
        assert!(!five.contains(4));
        assert!(!five.is_empty());
    }

    #[test]
    fn test_bound_op_intervals() {
        let gt = Interval::from_bound_op(BoundOp::Gt, 10);
        assert!(!gt.contains(10));
        assert!(gt.contains(11));

        let ge = Interval::from_bound_op(BoundOp::Ge, 10);
        assert!(ge.contains(10));
        assert!(!ge.contains(9));

        let lt = Interval::from_bound_op(BoundOp::Lt, 10);
        assert!(lt.contains(9));
        assert!(!lt.contains(10));

        let le = Interval::from_bound_op(BoundOp::Le, 10);
        assert!(le.contains(10));
        assert!(!le.contains(11));
    }

    #[test]
    fn test_intersection_tightens() {
        let gt0 = Interval::from_bound_op(BoundOp::Gt, 0);
        let lt10 = Interval::from_bound_op(BoundOp::Lt, 10);
        let merged = gt0.intersect(&lt10);
        assert!(merged.contains(5));
        assert!(!merged.contains(0));
        assert!(!merged.contains(10));
        assert!(!merged.is_empty());
    }

    #[test]
    fn test_empty_intersection() {
        let lt0 = Interval::from_bound_op(BoundOp::Lt, 0);
        let gt10 = Interval::from_bound_op(BoundOp::Gt, 10);
        assert!(lt0.intersect(&gt10).is_empty());

        // touching endpoints with one side exclusive is also empty
        let le5 = Interval::from_bound_op(BoundOp::Le, 5);
        let gt5 = Interval::from_bound_op(BoundOp::Gt, 5);
        assert!(le5.intersect(&gt5).is_empty());
    }

    #[test]
    fn test_subset_respects_inclusivity() {
        let lt10 = Interval::from_bound_op(BoundOp::Lt, 10);
        let le10 = Interval::from_bound_op(BoundOp::Le, 10);
        assert!(lt10.is_subset_of(&le10));
        assert!(!le10.is_subset_of(&lt10));
        assert!(lt10.is_subset_of(&lt10));

        let constant = Interval::constant(3);
        assert!(constant.is_subset_of(&lt10));
        assert!(!Interval::top().is_subset_of(&lt10));
        assert!(lt10.is_subset_of(&Interval::top()));
    }

    #[test]
    fn test_comparison_intervals() {
        let narrowed = Interval::from_comparison(BinOp::Ge, 2).unwrap();
        assert!(narrowed.contains(2));
        assert!(!narrowed.contains(1));
        assert!(Interval::from_comparison(BinOp::Ne, 2).is_none());
        assert!(Interval::from_comparison(BinOp::Add, 2).is_none());
    }

    #[test]
    fn test_range_meet() {
        let a = Range::Within(Interval::from_bound_op(BoundOp::Gt, 0));
        let b = Range::Within(Interval::from_bound_op(BoundOp::Lt, 10));
        match a.meet(&b) {
            Range::Within(merged) => assert!(merged.contains(5)),
            other => panic!("expected interval, got {other:?}"),
        }

        let c = Range::Within(Interval::from_bound_op(BoundOp::Gt, 10));
        let d = Range::Within(Interval::from_bound_op(BoundOp::Lt, 0));
        assert_eq!(c.meet(&d), Range::Bottom);
        assert_eq!(Range::Top.meet(&a), a);
        assert_eq!(Range::Bottom.meet(&a), Range::Bottom);
    }

    #[test]
    fn test_range_join() {
        let a = Range::Within(Interval::constant(1));
        let b = Range::Within(Interval::constant(5));
        match a.join(&b) {
            Range::Within(hull) => {
                assert!(hull.contains(1));
                assert!(hull.contains(3));
                assert!(hull.contains(5));
                assert!(!hull.contains(6));
            }
            other => panic!("expected interval, got {other:?}"),
        }
        assert_eq!(Range::Bottom.join(&a), a);
        assert_eq!(Range::Top.join(&a), Range::Top);
    }

    #[test]
    fn test_facts_narrowing_intersects() {
        let mut facts = Facts::new();
        facts
            .narrow_numeric("x", Interval::from_bound_op(BoundOp::Gt, 0), Span::new(0, 0))
            .unwrap();
        facts
            .narrow_numeric("x", Interval::from_bound_op(BoundOp::Lt, 10), Span::new(0, 0))
            .unwrap();
        let interval = facts.numeric("x").unwrap();
        assert!(interval.contains(5));
        assert!(!interval.contains(0));
    }

    #[test]
    fn test_facts_conflict_is_fatal() {
        let mut facts = Facts::new();
        facts
            .narrow_numeric("x", Interval::from_bound_op(BoundOp::Gt, 10), Span::new(0, 0))
            .unwrap();
        let err = facts
            .narrow_numeric("x", Interval::from_bound_op(BoundOp::Lt, 0), Span::new(0, 0))
            .unwrap_err();
        assert!(matches!(err, CompileError::Bounds { .. }));
    }

    #[test]
    fn test_bool_facts_conflict_is_fatal() {
        let mut facts = Facts::new();
        facts.narrow_bool("flag", true, Span::new(0, 0)).unwrap();
        facts.narrow_bool("flag", true, Span::new(0, 0)).unwrap();
        let err = facts.narrow_bool("flag", false, Span::new(0, 0)).unwrap_err();
        assert!(matches!(err, CompileError::Bounds { .. }));
    }

    #[test]
    fn test_interval_display() {
        assert_eq!(Interval::from_bound_op(BoundOp::Gt, 10).to_string(), "> 10");
        assert_eq!(Interval::constant(5).to_string(), "== 5");
        assert_eq!(
            Interval::from_bound_op(BoundOp::Ge, 0)
                .intersect(&Interval::from_bound_op(BoundOp::Lt, 8))
                .to_string(),
            ">= 0, < 8"
        );
        assert_eq!(Interval::top().to_string(), "unbounded");
    }
}
