//! Lookups and their set algebra
//!
//! A lookup is a description, nothing is read until `values` is called for
//! a partition. At that point the base row set is computed, then every
//! queued operation is applied left to right:
//!
//! ```text
//! rows = base
//! for (op, other) in operations:
//!     rows = rows op other.rows(partition)
//! ```
//!
//! Operands must be lookups of this driver over the same bitmap engine
//! index; anything else fails with `Unmergeable` at evaluation time.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use roaring::RoaringTreemap;

use crate::bitmap::BitmapError;
use crate::key::{compare, IndexKey};
use crate::mapping::Mapping;

use super::errors::{IndexError, IndexResult};
use super::handle::{Index, OpenMapping};
use super::iter::{LocationIter, Partition};

/// Result of an index lookup, composable with other lookups
pub trait Lookup: Send + Sync + fmt::Debug {
    /// Locations matched in `partition`
    fn values(&self, partition: &dyn Partition) -> IndexResult<LocationIter>;

    /// Ids of every index contributing to this lookup, sorted
    fn indexes(&self) -> Vec<String>;

    /// Whether `other` can be combined with this lookup
    fn is_mergeable(&self, other: &dyn Lookup) -> bool;

    fn intersection(&self, others: &[Arc<dyn Lookup>]) -> Arc<dyn Lookup>;

    fn union(&self, others: &[Arc<dyn Lookup>]) -> Arc<dyn Lookup>;

    fn difference(&self, others: &[Arc<dyn Lookup>]) -> Arc<dyn Lookup>;

    /// Downcast used when this lookup is an operand of another
    fn as_index_lookup(&self) -> Option<&IndexLookup> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Intersection,
    Union,
    Difference,
}

impl SetOp {
    fn apply(self, left: &mut RoaringTreemap, right: &RoaringTreemap) {
        match self {
            SetOp::Intersection => *left &= right,
            SetOp::Union => *left |= right,
            SetOp::Difference => *left -= right,
        }
    }
}

/// What the base row set of a lookup selects
#[derive(Debug, Clone, PartialEq)]
pub enum LookupKind {
    /// Equal to the key on every expression
    Point(Vec<IndexKey>),
    /// `>= gte` and `< lt`, locations in insertion order
    Ascend {
        gte: Option<Vec<IndexKey>>,
        lt: Option<Vec<IndexKey>>,
    },
    /// `> gt` and `<= lte`, locations in reverse insertion order
    Descend {
        gt: Option<Vec<IndexKey>>,
        lte: Option<Vec<IndexKey>>,
    },
    /// Different from the key on every expression
    Negate(Vec<IndexKey>),
}

#[derive(Debug, Clone)]
pub struct IndexLookup {
    index: Index,
    kind: LookupKind,
    operations: Vec<(SetOp, Arc<dyn Lookup>)>,
    indexes: BTreeSet<String>,
}

impl IndexLookup {
    pub(crate) fn new(index: Index, kind: LookupKind) -> Self {
        let indexes = BTreeSet::from([index.id().to_string()]);
        Self {
            index,
            kind,
            operations: Vec::new(),
            indexes,
        }
    }

    pub fn kind(&self) -> &LookupKind {
        &self.kind
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn operations(&self) -> &[(SetOp, Arc<dyn Lookup>)] {
        &self.operations
    }

    fn with_operations(&self, op: SetOp, others: &[Arc<dyn Lookup>]) -> Arc<dyn Lookup> {
        let mut lookup = self.clone();
        for other in others {
            lookup.indexes.extend(other.indexes());
            lookup.operations.push((op, Arc::clone(other)));
        }
        Arc::new(lookup)
    }

    /// Columns selected in `partition`, operations applied.
    ///
    /// `stack` holds the lookups being evaluated above this one.
    fn row_set(
        &self,
        partition: &dyn Partition,
        stack: &mut Vec<*const IndexLookup>,
    ) -> IndexResult<RoaringTreemap> {
        let me = self as *const IndexLookup;
        if stack.contains(&me) {
            return Err(IndexError::CyclicLookup);
        }
        stack.push(me);

        let open = OpenMapping::open(self.index.mapping(partition)?)?;
        let mut rows = self.base_rows(open.mapping(), partition)?;
        drop(open);

        for (op, other) in &self.operations {
            let operand = other
                .as_index_lookup()
                .filter(|l| l.index.engine_index() == self.index.engine_index())
                .ok_or_else(|| IndexError::Unmergeable(format!("{:?}", other.indexes())))?;
            let other_rows = operand.row_set(partition, stack)?;
            op.apply(&mut rows, &other_rows);
        }

        stack.pop();
        Ok(rows)
    }

    fn base_rows(&self, mapping: &Mapping, partition: &dyn Partition) -> IndexResult<RoaringTreemap> {
        let holder = &self.index.inner.holder;
        let mut result: Option<RoaringTreemap> = None;

        for (i, expr) in self.index.expressions().iter().enumerate() {
            let field = match holder.field(&self.index.field_name(expr, partition)) {
                Ok(field) => field,
                // nothing on disk for this expression, so no row can match
                Err(BitmapError::FieldNotFound(_)) => {
                    result = Some(RoaringTreemap::new());
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            let rows = match &self.kind {
                LookupKind::Point(keys) => match mapping.get(field.name(), &keys[i].encode())? {
                    Some(row) => field.row(row),
                    None => RoaringTreemap::new(),
                },
                LookupKind::Negate(keys) => {
                    let max = mapping.get_max_row_id(field.name())?;
                    let mut all = field.union_rows(1..=max);
                    if let Some(row) = mapping.get(field.name(), &keys[i].encode())? {
                        all -= field.row(row);
                    }
                    all
                }
                LookupKind::Ascend { gte, lt } => {
                    let lower = gte.as_ref().map(|k| &k[i]);
                    let upper = lt.as_ref().map(|k| &k[i]);
                    let ids = mapping.filter(field.name(), |bytes| {
                        in_range(bytes, lower, upper, Bound::Inclusive, Bound::Exclusive)
                    })?;
                    field.union_rows(ids)
                }
                LookupKind::Descend { gt, lte } => {
                    let lower = gt.as_ref().map(|k| &k[i]);
                    let upper = lte.as_ref().map(|k| &k[i]);
                    let ids = mapping.filter(field.name(), |bytes| {
                        in_range(bytes, lower, upper, Bound::Exclusive, Bound::Inclusive)
                    })?;
                    field.union_rows(ids)
                }
            };

            result = Some(match result {
                Some(mut acc) => {
                    acc &= rows;
                    acc
                }
                None => rows,
            });
        }

        Ok(result.unwrap_or_else(RoaringTreemap::new))
    }
}

#[derive(Clone, Copy)]
enum Bound {
    Inclusive,
    Exclusive,
}

/// Whether the stored value lies between the bounds; an absent bound is open
fn in_range(
    bytes: &[u8],
    lower: Option<&IndexKey>,
    upper: Option<&IndexKey>,
    lower_bound: Bound,
    upper_bound: Bound,
) -> IndexResult<bool> {
    let Some(like) = lower.or(upper) else {
        return Ok(true);
    };
    let value = IndexKey::decode_as(bytes, like)?;

    if let Some(lower) = lower {
        let ord = compare(&value, lower)?;
        let ok = match lower_bound {
            Bound::Inclusive => ord != Ordering::Less,
            Bound::Exclusive => ord == Ordering::Greater,
        };
        if !ok {
            return Ok(false);
        }
    }
    if let Some(upper) = upper {
        let ord = compare(&value, upper)?;
        let ok = match upper_bound {
            Bound::Inclusive => ord != Ordering::Greater,
            Bound::Exclusive => ord == Ordering::Less,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

impl Lookup for IndexLookup {
    fn values(&self, partition: &dyn Partition) -> IndexResult<LocationIter> {
        let open = OpenMapping::open(self.index.mapping(partition)?)?;
        let rows = self.row_set(partition, &mut Vec::new())?;
        self.index.inner.metrics.increment_lookups();

        let engine_index = self.index.engine_index();
        let columns: Vec<u64> = rows.iter().collect();
        let sorted = match self.kind {
            LookupKind::Ascend { .. } => Some(open.mapping().sorted_locations(engine_index, &columns, false)?),
            LookupKind::Descend { .. } => Some(open.mapping().sorted_locations(engine_index, &columns, true)?),
            _ => None,
        };

        let mapping = open
            .release()
            .ok_or_else(|| IndexError::MappingNotFound(engine_index.to_string()))?;
        Ok(match sorted {
            Some(locations) => LocationIter::sorted(mapping, locations),
            None => LocationIter::columns(mapping, engine_index, columns),
        })
    }

    fn indexes(&self) -> Vec<String> {
        self.indexes.iter().cloned().collect()
    }

    fn is_mergeable(&self, other: &dyn Lookup) -> bool {
        other
            .as_index_lookup()
            .map(|l| l.index.engine_index() == self.index.engine_index())
            .unwrap_or(false)
    }

    fn intersection(&self, others: &[Arc<dyn Lookup>]) -> Arc<dyn Lookup> {
        self.with_operations(SetOp::Intersection, others)
    }

    fn union(&self, others: &[Arc<dyn Lookup>]) -> Arc<dyn Lookup> {
        self.with_operations(SetOp::Union, others)
    }

    fn difference(&self, others: &[Arc<dyn Lookup>]) -> Arc<dyn Lookup> {
        self.with_operations(SetOp::Difference, others)
    }

    fn as_index_lookup(&self) -> Option<&IndexLookup> {
        Some(self)
    }
}
