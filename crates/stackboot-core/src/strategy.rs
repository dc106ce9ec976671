//! Ordered candidate strategies: try each in turn, first success wins.
//!
//! Used for tool selection (uv before the interpreter's own tooling) and for
//! remediation tiers. Candidates receive a shared `&mut C` so that several of
//! them can drive the same runner without fighting over borrows.

use std::fmt;

pub struct Candidate<'a, C: ?Sized, T, E> {
    name: String,
    run: Box<dyn FnOnce(&mut C) -> Result<T, E> + 'a>,
}

impl<'a, C: ?Sized, T, E> Candidate<'a, C, T, E> {
    pub fn new(name: impl Into<String>, run: impl FnOnce(&mut C) -> Result<T, E> + 'a) -> Self {
        Self {
            name: name.into(),
            run: Box::new(run),
        }
    }
}

/// The candidate that succeeded and what it produced.
#[derive(Debug)]
pub struct Won<T> {
    pub name: String,
    pub value: T,
    /// Candidates that failed before this one.
    pub failed: Vec<String>,
}

/// Every candidate failed (or there were none).
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: Vec<(String, E)>,
}

impl<E> Exhausted<E> {
    /// Error from the final attempt; the one that ended a short-circuited search.
    pub fn last(&self) -> Option<&E> {
        self.attempts.last().map(|(_, e)| e)
    }

    /// Hand back the final error on its own if `pred` holds for it, so an
    /// interruption propagates unchanged instead of being folded into a
    /// summary.
    pub fn take_last_if(mut self, pred: impl Fn(&E) -> bool) -> Result<E, Self> {
        match self.attempts.pop() {
            Some((_, e)) if pred(&e) => Ok(e),
            Some(last) => {
                self.attempts.push(last);
                Err(self)
            }
            None => Err(self),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.attempts.iter().map(|(n, _)| n.as_str()).collect()
    }
}

impl<E: fmt::Display> fmt::Display for Exhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attempts.is_empty() {
            return write!(f, "  (no candidates available)");
        }
        for (i, (name, err)) in self.attempts.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  [{name}] {err}")?;
        }
        Ok(())
    }
}

/// Run candidates in order until one succeeds.
///
/// `fatal` is consulted after each failure; returning true stops the search
/// immediately (used for user interruption).
pub fn first_success<'a, C: ?Sized, T, E>(
    ctx: &mut C,
    candidates: Vec<Candidate<'a, C, T, E>>,
    fatal: impl Fn(&E) -> bool,
) -> Result<Won<T>, Exhausted<E>> {
    let mut attempts = Vec::new();
    for candidate in candidates {
        let name = candidate.name;
        match (candidate.run)(&mut *ctx) {
            Ok(value) => {
                return Ok(Won {
                    name,
                    value,
                    failed: attempts.into_iter().map(|(n, _)| n).collect(),
                })
            }
            Err(e) => {
                tracing::debug!(candidate = %name, "candidate failed");
                let stop = fatal(&e);
                attempts.push((name, e));
                if stop {
                    break;
                }
            }
        }
    }
    Err(Exhausted { attempts })
}
