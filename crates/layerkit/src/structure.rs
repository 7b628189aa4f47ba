//! Nested input/output containers.
//!
//! Layers accept and return either a single value, an ordered sequence, or a keyword mapping
//! of values, and the same nesting is used for shape descriptors and expected outputs.
//! [`Structure`] captures that polymorphism with structure-preserving `map`, `flatten`, and
//! `zip` helpers. Mapping entries are kept in sorted key order, which is also the order
//! `flatten` visits them in.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{bail, ensure, Result};

/// Tagged nesting of values.
#[derive(Debug, Clone, PartialEq)]
pub enum Structure<T> {
    Single(T),
    Sequence(Vec<Structure<T>>),
    Mapping(BTreeMap<String, Structure<T>>),
}

/// Discriminant of a [`Structure`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureKind {
    Single,
    Sequence,
    Mapping,
}

impl fmt::Display for StructureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StructureKind::Single => "single",
            StructureKind::Sequence => "sequence",
            StructureKind::Mapping => "mapping",
        };
        f.write_str(name)
    }
}

impl<T> Structure<T> {
    pub fn single(value: impl Into<T>) -> Self {
        Structure::Single(value.into())
    }

    /// Sequence of single leaves.
    pub fn sequence<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<T>,
    {
        Structure::Sequence(
            values
                .into_iter()
                .map(|v| Structure::Single(v.into()))
                .collect(),
        )
    }

    /// Mapping of single leaves.
    pub fn mapping<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<T>,
    {
        Structure::Mapping(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), Structure::Single(v.into())))
                .collect(),
        )
    }

    pub fn kind(&self) -> StructureKind {
        match self {
            Structure::Single(_) => StructureKind::Single,
            Structure::Sequence(_) => StructureKind::Sequence,
            Structure::Mapping(_) => StructureKind::Mapping,
        }
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self, Structure::Mapping(_))
    }

    /// Returns the leaf of a `Single` structure.
    pub fn as_single(&self) -> Option<&T> {
        match self {
            Structure::Single(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the leaf of a `Single` structure or fails naming `what`.
    pub fn expect_single(&self, what: &str) -> Result<&T> {
        match self {
            Structure::Single(value) => Ok(value),
            other => bail!("{what} expects a single input, got a {}", other.kind()),
        }
    }

    pub fn as_mapping(&self) -> Option<&BTreeMap<String, Structure<T>>> {
        match self {
            Structure::Mapping(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Structure<T>]> {
        match self {
            Structure::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Looks up a mapping entry by `key`, falling back to `key` + `suffix`.
    pub fn get_with_suffix(&self, key: &str, suffix: &str) -> Option<&Structure<T>> {
        let entries = self.as_mapping()?;
        entries
            .get(key)
            .or_else(|| entries.get(&format!("{key}{suffix}")))
    }

    /// Structure-preserving map over the leaves.
    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> Structure<U> {
        self.map_inner(&mut f)
    }

    fn map_inner<U>(&self, f: &mut impl FnMut(&T) -> U) -> Structure<U> {
        match self {
            Structure::Single(value) => Structure::Single(f(value)),
            Structure::Sequence(items) => {
                Structure::Sequence(items.iter().map(|item| item.map_inner(f)).collect())
            }
            Structure::Mapping(entries) => Structure::Mapping(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.map_inner(f)))
                    .collect(),
            ),
        }
    }

    /// Fallible structure-preserving map; stops at the first error.
    pub fn try_map<U, E>(&self, mut f: impl FnMut(&T) -> Result<U, E>) -> Result<Structure<U>, E> {
        self.try_map_inner(&mut f)
    }

    fn try_map_inner<U, E>(
        &self,
        f: &mut impl FnMut(&T) -> Result<U, E>,
    ) -> Result<Structure<U>, E> {
        Ok(match self {
            Structure::Single(value) => Structure::Single(f(value)?),
            Structure::Sequence(items) => Structure::Sequence(
                items
                    .iter()
                    .map(|item| item.try_map_inner(f))
                    .collect::<Result<_, E>>()?,
            ),
            Structure::Mapping(entries) => Structure::Mapping(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.try_map_inner(f)?)))
                    .collect::<Result<_, E>>()?,
            ),
        })
    }

    /// Leaves in depth-first order (mapping entries in sorted key order).
    pub fn flatten(&self) -> Vec<&T> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into<'a>(&'a self, out: &mut Vec<&'a T>) {
        match self {
            Structure::Single(value) => out.push(value),
            Structure::Sequence(items) => items.iter().for_each(|item| item.flatten_into(out)),
            Structure::Mapping(entries) => entries.values().for_each(|v| v.flatten_into(out)),
        }
    }

    /// Consumes the structure and returns its leaves in `flatten` order.
    pub fn into_flatten(self) -> Vec<T> {
        let mut out = Vec::new();
        self.into_flatten_inner(&mut out);
        out
    }

    fn into_flatten_inner(self, out: &mut Vec<T>) {
        match self {
            Structure::Single(value) => out.push(value),
            Structure::Sequence(items) => items
                .into_iter()
                .for_each(|item| item.into_flatten_inner(out)),
            Structure::Mapping(entries) => entries
                .into_values()
                .for_each(|v| v.into_flatten_inner(out)),
        }
    }

    /// Pairs the leaves of two structures, requiring identical nesting and mapping keys.
    pub fn zip<'a, U>(&'a self, other: &'a Structure<U>) -> Result<Vec<(&'a T, &'a U)>> {
        let mut out = Vec::new();
        self.zip_into(other, &mut out)?;
        Ok(out)
    }

    fn zip_into<'a, U>(
        &'a self,
        other: &'a Structure<U>,
        out: &mut Vec<(&'a T, &'a U)>,
    ) -> Result<()> {
        match (self, other) {
            (Structure::Single(a), Structure::Single(b)) => out.push((a, b)),
            (Structure::Sequence(a), Structure::Sequence(b)) => {
                ensure!(
                    a.len() == b.len(),
                    "sequence lengths differ: {} vs {}",
                    a.len(),
                    b.len()
                );
                for (x, y) in a.iter().zip(b) {
                    x.zip_into(y, out)?;
                }
            }
            (Structure::Mapping(a), Structure::Mapping(b)) => {
                ensure!(
                    a.keys().eq(b.keys()),
                    "mapping keys differ: {:?} vs {:?}",
                    a.keys().collect::<Vec<_>>(),
                    b.keys().collect::<Vec<_>>()
                );
                for (x, y) in a.values().zip(b.values()) {
                    x.zip_into(y, out)?;
                }
            }
            (a, b) => bail!("structure kinds differ: {} vs {}", a.kind(), b.kind()),
        }
        Ok(())
    }

    /// Removes `suffix` from the keys of a top-level mapping; other kinds are returned as-is.
    pub fn strip_key_suffix(self, suffix: &str) -> Self {
        match self {
            Structure::Mapping(entries) => Structure::Mapping(
                entries
                    .into_iter()
                    .map(|(k, v)| {
                        let key = k.strip_suffix(suffix).map(str::to_string).unwrap_or(k);
                        (key, v)
                    })
                    .collect(),
            ),
            other => other,
        }
    }

    /// Appends `suffix` to the keys of a top-level mapping that do not already carry it.
    pub fn add_key_suffix(self, suffix: &str) -> Self {
        match self {
            Structure::Mapping(entries) => Structure::Mapping(
                entries
                    .into_iter()
                    .map(|(k, v)| {
                        if k.ends_with(suffix) {
                            (k, v)
                        } else {
                            (format!("{k}{suffix}"), v)
                        }
                    })
                    .collect(),
            ),
            other => other,
        }
    }
}

impl<T> From<T> for Structure<T> {
    fn from(value: T) -> Self {
        Structure::Single(value)
    }
}
