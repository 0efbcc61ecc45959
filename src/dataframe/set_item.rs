//! Setting whole columns of a frame, either appending new ones or replacing existing ones.
//!
//! A mutation is planned against a copy of the schema first. The plan is an immutable value that
//! every partition is rewritten with independently; the new schema and the new blocks are swapped
//! into the frame together once every partition succeeded.

use std::sync::Arc;

use ndarray::{Array2, s};

use super::{Block, BlockType, DataFrame, DataManager, Error, PartitionBlocks, Scalar};

/// The right-hand side of [`DataFrame::set`].
#[derive(Debug, Clone)]
pub enum Item<'a> {
    /// A single value, broadcast to every row of every key.
    Scalar(Scalar),
    /// One value per key, or (for a single key) one value per row.
    List(Vec<Scalar>),
    /// The feature columns of another frame with the same rows, one per key.
    Frame(&'a DataFrame),
    /// A `rows × keys` float matrix.
    Tensor(Array2<f64>),
}

/// Whether the keys are appended or replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    /// All keys are new columns.
    New,
    /// All keys are existing columns.
    Overwrite,
}

/// Where the values of one destination column come from.
#[derive(Debug, Clone)]
enum ColumnSource {
    Broadcast(Scalar),
    PerRow(Arc<Vec<Scalar>>),
    Tensor {
        data: Arc<Array2<f64>>,
        column: usize,
    },
    Joined { bid: usize, offset: usize },
}

/// A destination block and the sources of its columns, in offset order.
#[derive(Debug, Clone)]
struct BlockFill {
    bid: usize,
    block_type: BlockType,
    columns: Vec<ColumnSource>,
}

#[derive(Debug, Clone)]
struct MutationPlan {
    block_num: usize,
    narrow: Vec<(usize, Vec<usize>)>,
    fills: Vec<BlockFill>,
}

impl MutationPlan {
    /// Rewrites a single partition, `row_offset` being the global row of its first row.
    fn apply(
        &self,
        partition: &PartitionBlocks,
        row_offset: usize,
        right: Option<&PartitionBlocks>,
    ) -> Result<PartitionBlocks, Error> {
        let rows = partition.rows();
        if let Some(right) = right
            && right.index != partition.index
        {
            return Err(Error::Shape(
                "Setitem with rhs=DataFrame must have the same row index".into(),
            ));
        }
        let mut blocks = partition.blocks.clone();
        blocks.resize_with(self.block_num, || Block::empty(BlockType::Float64, rows));
        for (bid, offsets) in &self.narrow {
            blocks[*bid] = blocks[*bid].select_columns(offsets);
        }
        for fill in &self.fills {
            let columns = fill
                .columns
                .iter()
                .map(|source| source_values(source, rows, row_offset, right))
                .collect::<Result<Vec<_>, _>>()?;
            let values = (0..rows)
                .flat_map(|r| columns.iter().map(move |c| c[r].clone()))
                .collect();
            blocks[fill.bid] =
                Block::convert_block(fill.block_type, (rows, columns.len()), values)?;
        }
        Ok(PartitionBlocks {
            index: partition.index.clone(),
            blocks,
        })
    }
}

fn source_values(
    source: &ColumnSource,
    rows: usize,
    row_offset: usize,
    right: Option<&PartitionBlocks>,
) -> Result<Vec<Scalar>, Error> {
    match source {
        ColumnSource::Broadcast(value) => Ok(vec![value.clone(); rows]),
        ColumnSource::PerRow(values) => Ok(values[row_offset..row_offset + rows].to_vec()),
        ColumnSource::Tensor { data, column } => {
            let values = data.slice(s![row_offset..row_offset + rows, *column]);
            Ok(values.iter().map(|&v| Scalar::Float64(v)).collect())
        }
        ColumnSource::Joined { bid, offset } => {
            let Some(right) = right else {
                return Err(Error::Shape("missing right-hand side partition".into()));
            };
            right.blocks[*bid].column(*offset)
        }
    }
}

/// Sets `keys` of `frame` to `item`, appending or replacing columns according to `mode`.
///
/// Nothing is changed if any check fails.
pub(crate) fn set_item(
    frame: &mut DataFrame,
    keys: &[String],
    item: Item<'_>,
    mode: SetMode,
) -> Result<(), Error> {
    if keys.is_empty() {
        return Err(Error::Shape("at least one key is required".into()));
    }
    let rows = frame.len();
    let (types, sources, right) = match item {
        Item::Scalar(value) => {
            let block_type = BlockType::of(&value);
            (
                vec![block_type; keys.len()],
                vec![ColumnSource::Broadcast(value); keys.len()],
                None,
            )
        }
        Item::List(values) if values.len() == keys.len() => {
            let types = values.iter().map(BlockType::of).collect();
            let sources = values.into_iter().map(ColumnSource::Broadcast).collect();
            (types, sources, None)
        }
        Item::List(values) => {
            if keys.len() > 1 {
                return Err(Error::Shape(
                    "Must have equal len keys and value when setting with an iterable".into(),
                ));
            }
            if values.len() != rows {
                return Err(Error::Shape(format!(
                    "a list of {} values cannot be set as a column of {rows} rows",
                    values.len()
                )));
            }
            let block_type = BlockType::infer(&values);
            (vec![block_type], vec![ColumnSource::PerRow(Arc::new(values))], None)
        }
        Item::Frame(other) => {
            let operable = other.manager.infer_operable_field_names();
            if operable.len() != keys.len() {
                return Err(Error::Shape(
                    "Setitem with rhs=DataFrame must have equal len keys".into(),
                ));
            }
            if other.partitions() != frame.partitions() || other.len() != rows {
                return Err(Error::Shape(format!(
                    "cannot align {} rows in {} partitions with {rows} rows in {} partitions",
                    other.len(),
                    other.partitions(),
                    frame.partitions()
                )));
            }
            let mut types = vec![];
            let mut sources = vec![];
            for (bid, offset) in other.manager.loc_block(&operable)? {
                let block_type = other.manager.block_type(bid).ok_or_else(|| {
                    Error::Schema(format!("the right-hand side has no block {bid}"))
                })?;
                types.push(block_type);
                sources.push(ColumnSource::Joined { bid, offset });
            }
            (types, sources, Some(&other.block_table))
        }
        Item::Tensor(data) => {
            if data.dim() != (rows, keys.len()) {
                return Err(Error::Shape(format!(
                    "a tensor of shape {:?} cannot be set as {} columns of {rows} rows",
                    data.dim(),
                    keys.len()
                )));
            }
            let data = Arc::new(data);
            let sources = (0..keys.len())
                .map(|column| ColumnSource::Tensor {
                    data: data.clone(),
                    column,
                })
                .collect();
            (vec![BlockType::Float64; keys.len()], sources, None)
        }
    };

    let mut manager: DataManager = (*frame.manager).clone();
    let (narrow, dst) = match mode {
        SetMode::New => (vec![], manager.append_columns(keys, &types)?),
        SetMode::Overwrite => manager.split_columns(keys, &types)?,
    };
    let plan = plan(&manager, keys, dst, sources, narrow)?;

    let offsets = frame.partition_row_offsets();
    let table = &frame.block_table;
    let block_table = match right {
        None => table.try_map_partitions(|key, p| plan.apply(p, offsets[key], None))?,
        Some(rhs) => table.try_join(rhs, |key, p, r| plan.apply(p, offsets[key], Some(r)))?,
    };
    frame.block_table = block_table;
    frame.manager = Arc::new(manager);
    Ok(())
}

fn plan(
    manager: &DataManager,
    keys: &[String],
    dst: Vec<usize>,
    sources: Vec<ColumnSource>,
    narrow: Vec<(usize, Vec<usize>)>,
) -> Result<MutationPlan, Error> {
    let mut fills: Vec<BlockFill> = vec![];
    let mut placed: Vec<(usize, usize, ColumnSource)> = vec![];
    for ((key, bid), source) in keys.iter().zip(dst).zip(sources) {
        let (_, offset) = manager
            .loc(key)
            .ok_or_else(|| Error::Schema(format!("unknown column '{key}'")))?;
        placed.push((bid, offset, source));
    }
    placed.sort_by_key(|&(bid, offset, _)| (bid, offset));
    for (bid, _, source) in placed {
        match fills.last_mut() {
            Some(fill) if fill.bid == bid => fill.columns.push(source),
            _ => {
                let block_type = manager
                    .block_type(bid)
                    .ok_or_else(|| Error::Schema(format!("no block {bid}")))?;
                fills.push(BlockFill {
                    bid,
                    block_type,
                    columns: vec![source],
                });
            }
        }
    }
    Ok(MutationPlan {
        block_num: manager.block_num(),
        narrow,
        fills,
    })
}
