//! Predicate mini-DSL for edge-removal conditions, plus the length
//! threshold helpers shared by the removal algorithms.
//!
//! Grammar: conjunctions of terms separated by `&&`. Terms:
//!
//! * `tip`: the edge is a dead-end on one side;
//! * `length < N` / `length <= N`: edge length bound;
//! * `coverage < X` / `coverage <= X`: average coverage bound;
//! * `rctc X`: relative coverage tip condition where the edge's coverage is at
//!   most `1/X` of the strongest alternative at its junction.
//!
//! The parser also exposes the derived `max_length_bound` and
//! `max_coverage_bound` used by the iterative removers.

use std::fmt;

use crate::graph::{AssemblyGraph, CoverageIndex, EdgeId};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Cmp {
    Lt,
    Le,
}

impl Cmp {
    fn eval(self, value: f64, bound: f64) -> bool {
        match self {
            Cmp::Lt => value < bound,
            Cmp::Le => value <= bound,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Term {
    Tip,
    Length(Cmp, usize),
    Coverage(Cmp, f64),
    RelativeCoverageTip(f64),
}

/// Parse error for the condition DSL.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError(String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ParseError {}

/// A parsed removal condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    terms: Vec<Term>,
}

impl Condition {
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let mut terms = Vec::new();
        for raw in input.split("&&") {
            let part = raw.trim();
            if part.is_empty() {
                return Err(ParseError(format!("empty term in condition {input:?}")));
            }
            let tokens: Vec<&str> = part.split_whitespace().collect();
            let term = match tokens.as_slice() {
                ["tip"] => Term::Tip,
                ["length", op, num] => {
                    Term::Length(Self::cmp(op)?, Self::num::<usize>(num)?)
                }
                ["coverage", op, num] => {
                    Term::Coverage(Self::cmp(op)?, Self::num::<f64>(num)?)
                }
                ["rctc", num] => Term::RelativeCoverageTip(Self::num::<f64>(num)?),
                _ => {
                    return Err(ParseError(format!("unrecognized term {part:?}")));
                }
            };
            terms.push(term);
        }
        Ok(Self { terms })
    }

    fn cmp(op: &str) -> Result<Cmp, ParseError> {
        match op {
            "<" => Ok(Cmp::Lt),
            "<=" => Ok(Cmp::Le),
            other => Err(ParseError(format!("unsupported comparison {other:?}"))),
        }
    }

    fn num<T: std::str::FromStr>(s: &str) -> Result<T, ParseError> {
        s.parse()
            .map_err(|_| ParseError(format!("malformed number {s:?}")))
    }

    /// Largest edge length any `length` term can accept, if one is present.
    pub fn max_length_bound(&self) -> Option<usize> {
        self.terms
            .iter()
            .filter_map(|t| match t {
                Term::Length(Cmp::Lt, n) => Some(n.saturating_sub(1)),
                Term::Length(Cmp::Le, n) => Some(*n),
                _ => None,
            })
            .min()
    }

    /// Largest coverage any `coverage` term can accept, if one is present.
    pub fn max_coverage_bound(&self) -> Option<f64> {
        self.terms
            .iter()
            .filter_map(|t| match t {
                Term::Coverage(_, x) => Some(*x),
                _ => None,
            })
            .fold(None, |acc: Option<f64>, x| {
                Some(acc.map_or(x, |a| a.min(x)))
            })
    }

    pub fn eval(&self, g: &AssemblyGraph, cov: &CoverageIndex, e: EdgeId) -> bool {
        self.terms.iter().all(|t| match t {
            Term::Tip => is_tip(g, e),
            Term::Length(op, n) => op.eval(g.edge_length(e) as f64, *n as f64),
            Term::Coverage(op, x) => op.eval(cov.coverage(g, e), *x),
            Term::RelativeCoverageTip(ratio) => {
                let alt = max_alternative_coverage(g, cov, e);
                cov.coverage(g, e) * ratio <= alt
            }
        })
    }
}

/// An edge is a tip when one endpoint is a dead end (the edge dangles) while
/// the other endpoint attaches it to the graph.
pub fn is_tip(g: &AssemblyGraph, e: EdgeId) -> bool {
    let start = g.edge_start(e);
    let end = g.edge_end(e);
    let dangling_start = g.in_degree(start) == 0 && g.out_degree(start) == 1;
    let dangling_end = g.out_degree(end) == 0 && g.in_degree(end) == 1;
    dangling_start || dangling_end
}

/// Strongest average coverage among the competing edges at the junction
/// where the tip attaches.
pub fn max_alternative_coverage(g: &AssemblyGraph, cov: &CoverageIndex, e: EdgeId) -> f64 {
    let start = g.edge_start(e);
    let end = g.edge_end(e);
    let mut best = 0f64;
    for other in g
        .outgoing(start)
        .into_iter()
        .chain(g.incoming(end))
        .chain(g.incoming(start))
        .chain(g.outgoing(end))
    {
        if other != e && g.conjugate(other) != e {
            best = best.max(cov.coverage(g, other));
        }
    }
    best
}

/* ------------------------------------------------------------------ */
/*                     length threshold derivations                   */
/* ------------------------------------------------------------------ */

/// Shared length-bound derivations for the simplification algorithms.
pub struct LengthThresholdFinder;

impl LengthThresholdFinder {
    pub fn max_tip_length(read_length: usize, k: usize, coeff: f64) -> usize {
        (k.min(read_length / 2) as f64 * coeff).round() as usize
    }

    pub fn max_bulge_length(k: usize, coeff: f64, additive: usize) -> usize {
        (k as f64 * coeff).round() as usize + additive
    }

    pub fn max_erroneous_connection_length(k: usize, coeff: usize) -> usize {
        k * coeff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn parses_conjunction_and_bounds() {
        let c = Condition::parse("tip && coverage < 5 && length < 50").unwrap();
        assert_eq!(c.max_length_bound(), Some(49));
        assert_eq!(c.max_coverage_bound(), Some(5.0));
    }

    #[test]
    fn parses_rctc() {
        let c = Condition::parse("tip && rctc 2.0").unwrap();
        assert_eq!(c.max_length_bound(), None);
    }

    #[test]
    fn rejects_garbage() {
        assert!(Condition::parse("length <").is_err());
        assert!(Condition::parse("covrage < 5").is_err());
        assert!(Condition::parse("length < five").is_err());
        assert!(Condition::parse("").is_err());
    }

    fn tip_graph() -> (AssemblyGraph, Arc<CoverageIndex>, EdgeId, EdgeId) {
        // main chain a -> b -> c -> d with a tip b -> t; the b -> c edge is
        // interior (both endpoints attached), so it is not a tip
        let mut g = AssemblyGraph::new(4);
        let cov = Arc::new(CoverageIndex::new());
        g.add_handler(cov.clone());
        let (a, _) = g.add_vertex_pair();
        let (b, _) = g.add_vertex_pair();
        let (c, _) = g.add_vertex_pair();
        let (d, _) = g.add_vertex_pair();
        let (t, _) = g.add_vertex_pair();
        let e1 = g.add_edge(a, b, b"ACGTACGTAC".to_vec());
        let e2 = g.add_edge(b, c, b"CGTACGTACG".to_vec());
        let e3 = g.add_edge(c, d, b"ACGAACGAAC".to_vec());
        let tip = g.add_edge(b, t, b"CGTTTT".to_vec());
        cov.set_avg_coverage(&g, e1, 20.0);
        cov.set_avg_coverage(&g, e2, 20.0);
        cov.set_avg_coverage(&g, e3, 20.0);
        cov.set_avg_coverage(&g, tip, 2.0);
        (g, cov, tip, e2)
    }

    #[test]
    fn tip_detection() {
        let (g, _, tip, chain_edge) = tip_graph();
        assert!(is_tip(&g, tip));
        assert!(!is_tip(&g, chain_edge));
    }

    #[test]
    fn condition_eval_on_tip() {
        let (g, cov, tip, chain_edge) = tip_graph();
        let c = Condition::parse("tip && coverage < 5 && length < 50").unwrap();
        assert!(c.eval(&g, &cov, tip));
        assert!(!c.eval(&g, &cov, chain_edge));
    }

    #[test]
    fn rctc_compares_to_junction_alternatives() {
        let (g, cov, tip, _) = tip_graph();
        let weak = Condition::parse("rctc 2.0").unwrap();
        // 2.0 * 2.0 <= 20.0
        assert!(weak.eval(&g, &cov, tip));
        let strong = Condition::parse("rctc 50").unwrap();
        assert!(!strong.eval(&g, &cov, tip));
    }

    #[test]
    fn threshold_finder_formulas() {
        assert_eq!(LengthThresholdFinder::max_tip_length(100, 21, 3.5), 74);
        assert_eq!(LengthThresholdFinder::max_bulge_length(21, 3.0, 100), 163);
        assert_eq!(
            LengthThresholdFinder::max_erroneous_connection_length(21, 5),
            105
        );
    }
}
