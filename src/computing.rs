//! A key-partitioned table whose partitions are transformed in parallel.
//!
//! Partition keys are the partition positions `0..partitions`. Maps preserve the keys, so two
//! tables derived from the same source stay partition-aligned and can be joined key by key.

use rayon::prelude::*;

/// A table of values, one per partition.
#[derive(Debug, Clone, PartialEq)]
pub struct Table<V> {
    partitions: Vec<V>,
}

impl<V> Table<V> {
    /// Wraps already partitioned values.
    pub fn new(partitions: Vec<V>) -> Self {
        Self { partitions }
    }

    /// The number of partitions.
    pub fn partitions(&self) -> usize {
        self.partitions.len()
    }

    /// The partition values in key order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.partitions.iter()
    }

    /// The partition with the given key.
    pub fn get(&self, key: usize) -> Option<&V> {
        self.partitions.get(key)
    }

    /// Consumes the table, returning the partition values in key order.
    pub fn collect(self) -> Vec<V> {
        self.partitions
    }
}

impl<T: Send> Table<Vec<T>> {
    /// Splits `data` into (at most) `partitions` contiguous chunks of near equal size.
    ///
    /// An empty input still yields a single, empty partition.
    pub fn parallelize(data: Vec<T>, partitions: usize) -> Self {
        let partitions = partitions.max(1);
        let chunk = data.len().div_ceil(partitions).max(1);
        let mut parts: Vec<Vec<T>> = Vec::with_capacity(partitions);
        let mut data = data.into_iter().peekable();
        while data.peek().is_some() {
            parts.push(data.by_ref().take(chunk).collect());
        }
        if parts.is_empty() {
            parts.push(vec![]);
        }
        Self { partitions: parts }
    }
}

impl<V: Sync> Table<V> {
    /// Applies `f` to every partition value in parallel.
    pub fn map_values<U, F>(&self, f: F) -> Table<U>
    where
        U: Send,
        F: Fn(&V) -> U + Sync + Send,
    {
        Table {
            partitions: self.partitions.par_iter().map(f).collect(),
        }
    }

    /// Like [`Table::map_values`], but stops at the first error.
    pub fn try_map_values<U, E, F>(&self, f: F) -> Result<Table<U>, E>
    where
        U: Send,
        E: Send,
        F: Fn(&V) -> Result<U, E> + Sync + Send,
    {
        let partitions = self
            .partitions
            .par_iter()
            .map(f)
            .collect::<Result<Vec<_>, E>>()?;
        Ok(Table { partitions })
    }

    /// Applies `f` to every `(key, value)` pair in parallel, stopping at the first error.
    pub fn try_map_partitions<U, E, F>(&self, f: F) -> Result<Table<U>, E>
    where
        U: Send,
        E: Send,
        F: Fn(usize, &V) -> Result<U, E> + Sync + Send,
    {
        let partitions = self
            .partitions
            .par_iter()
            .enumerate()
            .map(|(key, v)| f(key, v))
            .collect::<Result<Vec<_>, E>>()?;
        Ok(Table { partitions })
    }

    /// Joins the partitions of both tables by key, applying `f` to each pair in parallel.
    ///
    /// Keys present in only one of the tables are dropped.
    pub fn try_join<W, U, E, F>(&self, other: &Table<W>, f: F) -> Result<Table<U>, E>
    where
        W: Sync,
        U: Send,
        E: Send,
        F: Fn(usize, &V, &W) -> Result<U, E> + Sync + Send,
    {
        let partitions = self
            .partitions
            .par_iter()
            .zip(other.partitions.par_iter())
            .enumerate()
            .map(|(key, (l, r))| f(key, l, r))
            .collect::<Result<Vec<_>, E>>()?;
        Ok(Table { partitions })
    }
}
