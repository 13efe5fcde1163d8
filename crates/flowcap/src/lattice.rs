//! The capability lattice: sensitivity levels and their partial order.
//!
//! Levels are declared by name in configuration together with an explicit
//! `lower < upper` order relation. The builder closes the relation under
//! reflexivity and transitivity, rejects cycles, and guarantees a total
//! `join`/`meet` by adding a distinguished bottom (`unrestricted`) and top
//! (`restricted`) when the configuration does not declare its own.
//!
//! A [`Level`] is an interned handle, only meaningful relative to the
//! lattice that issued it. All enforcement code compares levels through
//! [`CapabilityLattice::leq`], never through the handle itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// Name of the implicit bottom level added when the configuration does not
/// declare one.
pub const BOTTOM_LEVEL: &str = "unrestricted";

/// Name of the implicit top level added when the configuration does not
/// declare one.
pub const TOP_LEVEL: &str = "restricted";

/// An interned capability level handle.
///
/// Cheap to copy and compare for identity. Ordering questions must go
/// through the issuing [`CapabilityLattice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Level(u16);

/// A declared `lower < upper` pair in the level order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPair {
    /// The lower level name.
    pub lower: String,
    /// The upper level name.
    pub upper: String,
}

/// A finite capability lattice with total `join` and `meet`.
///
/// Immutable once built; consulted without locking from any number of
/// scopes and from the static analyzer.
#[derive(Debug, Clone)]
pub struct CapabilityLattice {
    names: Vec<String>,
    index: BTreeMap<String, u16>,
    /// `leq[a][b]` is true iff level `a` flows to (is at most) level `b`.
    leq: Vec<Vec<bool>>,
    bottom: Level,
    top: Level,
}

impl CapabilityLattice {
    /// Build a lattice from declared level names and order pairs.
    ///
    /// Fails with [`FlowError::Config`] on duplicate names, order pairs
    /// naming undeclared levels, or a cyclic order (antisymmetry
    /// violation).
    pub fn build(levels: &[String], order: &[OrderPair]) -> Result<Self> {
        fn declare(
            index: &mut BTreeMap<String, u16>,
            names: &mut Vec<String>,
            name: &str,
        ) -> Result<()> {
            if index.contains_key(name) {
                return Err(FlowError::config(format!("duplicate level '{name}'")));
            }
            index.insert(name.to_string(), names.len() as u16);
            names.push(name.to_string());
            Ok(())
        }

        let mut names: Vec<String> = Vec::new();
        let mut index: BTreeMap<String, u16> = BTreeMap::new();
        for name in levels {
            declare(&mut index, &mut names, name)?;
        }
        if !index.contains_key(BOTTOM_LEVEL) {
            declare(&mut index, &mut names, BOTTOM_LEVEL)?;
        }
        if !index.contains_key(TOP_LEVEL) {
            declare(&mut index, &mut names, TOP_LEVEL)?;
        }

        let n = names.len();
        let mut leq = vec![vec![false; n]; n];
        for (i, row) in leq.iter_mut().enumerate() {
            row[i] = true;
        }

        let lookup = |name: &str| -> Result<usize> {
            index
                .get(name)
                .map(|&i| i as usize)
                .ok_or_else(|| FlowError::config(format!("order pair names unknown level '{name}'")))
        };
        for pair in order {
            let lo = lookup(&pair.lower)?;
            let hi = lookup(&pair.upper)?;
            if lo == hi {
                return Err(FlowError::config(format!(
                    "level '{}' ordered below itself",
                    pair.lower
                )));
            }
            leq[lo][hi] = true;
        }

        let bottom = index[BOTTOM_LEVEL] as usize;
        let top = index[TOP_LEVEL] as usize;
        for (i, row) in leq.iter_mut().enumerate() {
            row[top] = true;
            if i == bottom {
                for cell in row.iter_mut() {
                    *cell = true;
                }
            }
        }

        // Transitive closure (Floyd–Warshall over the boolean relation).
        for k in 0..n {
            for i in 0..n {
                if !leq[i][k] {
                    continue;
                }
                for j in 0..n {
                    if leq[k][j] {
                        leq[i][j] = true;
                    }
                }
            }
        }

        // Antisymmetry: two distinct levels ordered both ways is a cycle.
        for i in 0..n {
            for j in (i + 1)..n {
                if leq[i][j] && leq[j][i] {
                    return Err(FlowError::config(format!(
                        "cyclic level order: '{}' and '{}' are mutually below each other",
                        names[i], names[j]
                    )));
                }
            }
        }

        Ok(Self {
            names,
            index,
            leq,
            bottom: Level(bottom as u16),
            top: Level(top as u16),
        })
    }

    /// Look up a level handle by name.
    pub fn level(&self, name: &str) -> Result<Level> {
        self.index
            .get(name)
            .map(|&i| Level(i))
            .ok_or_else(|| FlowError::InvalidLevel {
                name: name.to_string(),
            })
    }

    /// The name of a level handle.
    pub fn name(&self, level: Level) -> &str {
        &self.names[level.0 as usize]
    }

    /// The distinguished bottom (least restrictive) level.
    pub fn bottom(&self) -> Level {
        self.bottom
    }

    /// The distinguished top (most restrictive) level.
    pub fn top(&self) -> Level {
        self.top
    }

    /// All registered level names, in declaration order.
    pub fn level_names(&self) -> &[String] {
        &self.names
    }

    /// All level handles.
    pub fn levels(&self) -> impl Iterator<Item = Level> + '_ {
        (0..self.names.len() as u16).map(Level)
    }

    /// Partial order: does `a` flow to `b`?
    pub fn leq(&self, a: Level, b: Level) -> bool {
        self.leq[a.0 as usize][b.0 as usize]
    }

    /// Least upper bound of `a` and `b`.
    ///
    /// Always defined: when the declared order gives the pair no unique
    /// least upper bound, the result is the top level, which is never
    /// below either operand.
    pub fn join(&self, a: Level, b: Level) -> Level {
        if self.leq(a, b) {
            return b;
        }
        if self.leq(b, a) {
            return a;
        }
        let uppers: Vec<usize> = (0..self.names.len())
            .filter(|&c| self.leq[a.0 as usize][c] && self.leq[b.0 as usize][c])
            .collect();
        for &c in &uppers {
            if uppers.iter().all(|&d| self.leq[c][d]) {
                return Level(c as u16);
            }
        }
        self.top
    }

    /// Greatest lower bound of `a` and `b`.
    ///
    /// Falls back to bottom when the pair has no unique greatest lower
    /// bound.
    pub fn meet(&self, a: Level, b: Level) -> Level {
        if self.leq(a, b) {
            return a;
        }
        if self.leq(b, a) {
            return b;
        }
        let lowers: Vec<usize> = (0..self.names.len())
            .filter(|&c| self.leq[c][a.0 as usize] && self.leq[c][b.0 as usize])
            .collect();
        for &c in &lowers {
            if lowers.iter().all(|&d| self.leq[d][c]) {
                return Level(c as u16);
            }
        }
        self.bottom
    }
}
