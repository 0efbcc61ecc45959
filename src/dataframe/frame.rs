use std::{collections::HashMap, sync::Arc};

use ndarray::{Array1, Array2};

use super::{
    Block, BlockType, DataManager, Error, FieldKind, Item, Scalar, SetMode, set_item::set_item,
};
use crate::computing::Table;

/// The rows of one partition: their sample ids plus one [`Block`] per block id.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionBlocks {
    /// The sample ids of the rows, in row order.
    pub index: Vec<String>,
    /// The blocks, indexed by block id.
    pub blocks: Vec<Block>,
}

impl PartitionBlocks {
    /// The number of rows of the partition.
    pub fn rows(&self) -> usize {
        self.index.len()
    }
}

/// A partitioned table of samples with a typed schema.
#[derive(Debug, Clone)]
pub struct DataFrame {
    pub(super) manager: Arc<DataManager>,
    pub(super) block_table: Table<PartitionBlocks>,
}

impl DataFrame {
    /// Starts building a frame for the given sample ids.
    pub fn builder<S: Into<String>>(sample_ids: impl IntoIterator<Item = S>) -> DataFrameBuilder {
        DataFrameBuilder {
            sample_ids: sample_ids.into_iter().map(Into::into).collect(),
            columns: vec![],
            partitions: 1,
        }
    }

    /// The schema of the frame.
    pub fn manager(&self) -> &DataManager {
        &self.manager
    }

    /// The partitions of the frame, in row order.
    pub fn block_table(&self) -> &Table<PartitionBlocks> {
        &self.block_table
    }

    /// The number of partitions.
    pub fn partitions(&self) -> usize {
        self.block_table.partitions()
    }

    /// The number of rows.
    pub fn len(&self) -> usize {
        self.block_table.values().map(PartitionBlocks::rows).sum()
    }

    /// Whether the frame has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(rows, feature columns)`, label and weight are not counted.
    pub fn shape(&self) -> (usize, usize) {
        (self.len(), self.columns().len())
    }

    /// The feature columns in schema order.
    pub fn columns(&self) -> Vec<String> {
        self.manager.infer_operable_field_names()
    }

    /// The sample ids of all rows, in row order.
    pub fn sample_ids(&self) -> Vec<String> {
        self.block_table
            .values()
            .flat_map(|p| p.index.iter().cloned())
            .collect()
    }

    /// The global row offset of the first row of every partition.
    pub fn partition_row_offsets(&self) -> Vec<usize> {
        self.block_table
            .values()
            .scan(0, |offset, p| {
                let start = *offset;
                *offset += p.rows();
                Some(start)
            })
            .collect()
    }

    /// All values of a column, in row order.
    pub fn column(&self, name: &str) -> Result<Vec<Scalar>, Error> {
        let (bid, offset) = self.locate(name)?;
        let mut values = Vec::with_capacity(self.len());
        for p in self.block_table.values() {
            values.extend(p.blocks[bid].column(offset)?);
        }
        Ok(values)
    }

    /// All values of a numeric column as floats, in row order.
    pub fn column_f64(&self, name: &str) -> Result<Array1<f64>, Error> {
        let (bid, offset) = self.locate(name)?;
        let mut values = Vec::with_capacity(self.len());
        for p in self.block_table.values() {
            values.extend(p.blocks[bid].column_f64(offset)?);
        }
        Ok(Array1::from(values))
    }

    fn locate(&self, name: &str) -> Result<(usize, usize), Error> {
        self.manager
            .loc(name)
            .ok_or_else(|| Error::Schema(format!("unknown column '{name}'")))
    }

    /// The feature columns as a `rows × features` float matrix.
    pub fn values(&self) -> Result<Array2<f64>, Error> {
        let columns = self.columns();
        let mut values = Array2::zeros((self.len(), columns.len()));
        for (j, name) in columns.iter().enumerate() {
            values.column_mut(j).assign(&self.column_f64(name)?);
        }
        Ok(values)
    }

    /// The label column, if the frame has one.
    pub fn label(&self) -> Result<Option<Array1<f64>>, Error> {
        self.manager
            .label_name()
            .map(|name| self.column_f64(name))
            .transpose()
    }

    /// The weight column, if the frame has one.
    pub fn weight(&self) -> Result<Option<Array1<f64>>, Error> {
        self.manager
            .weight_name()
            .map(|name| self.column_f64(name))
            .transpose()
    }

    /// A frame with the rows of the given sample ids, in the given order.
    ///
    /// The result is spread over (at most) as many partitions as this frame has.
    pub fn loc<S: AsRef<str> + Sync>(&self, ids: &[S]) -> Result<DataFrame, Error> {
        let positions: HashMap<&str, (usize, usize)> = self
            .block_table
            .values()
            .enumerate()
            .flat_map(|(part, p)| {
                p.index
                    .iter()
                    .enumerate()
                    .map(move |(row, id)| (id.as_str(), (part, row)))
            })
            .collect();
        let picks = ids
            .iter()
            .map(|id| {
                let id = id.as_ref();
                positions
                    .get(id)
                    .map(|&pick| (id.to_string(), pick))
                    .ok_or_else(|| Error::MissingSampleId(id.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let sources: Vec<&PartitionBlocks> = self.block_table.values().collect();
        let block_table = Table::parallelize(picks, self.partitions()).try_map_values(|picks| {
            let index = picks.iter().map(|(id, _)| id.clone()).collect();
            let rows: Vec<(usize, usize)> = picks.iter().map(|(_, pick)| *pick).collect();
            let blocks = (0..self.manager.block_num())
                .map(|bid| {
                    let blocks: Vec<&Block> = sources.iter().map(|p| &p.blocks[bid]).collect();
                    Block::gather(&blocks, &rows)
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, Error>(PartitionBlocks { index, blocks })
        })?;
        Ok(DataFrame {
            manager: self.manager.clone(),
            block_table,
        })
    }

    /// Sets the columns `keys` to `item`.
    ///
    /// Keys that are all new are appended, keys that all exist are overwritten. Mixing new and
    /// existing keys is rejected.
    pub fn set<S: AsRef<str>>(&mut self, keys: &[S], item: Item<'_>) -> Result<(), Error> {
        let keys: Vec<String> = keys.iter().map(|k| k.as_ref().to_string()).collect();
        let existing = keys.iter().filter(|k| self.manager.contains(k)).count();
        let mode = if existing == 0 {
            SetMode::New
        } else if existing == keys.len() {
            SetMode::Overwrite
        } else {
            return Err(Error::Schema(format!(
                "{existing} of the {} keys exist already, cannot mix new and existing columns",
                keys.len()
            )));
        };
        set_item(self, &keys, item, mode)
    }
}

/// Builds a [`DataFrame`] column by column.
#[derive(Debug, Clone)]
pub struct DataFrameBuilder {
    sample_ids: Vec<String>,
    columns: Vec<(String, FieldKind, BlockType, Vec<Scalar>)>,
    partitions: usize,
}

impl DataFrameBuilder {
    /// Adds float feature columns, one per column of `values`.
    pub fn features<S: Into<String>>(
        mut self,
        header: impl IntoIterator<Item = S>,
        values: &Array2<f64>,
    ) -> Self {
        for (name, column) in header.into_iter().zip(values.columns()) {
            self.columns.push((
                name.into(),
                FieldKind::Feature,
                BlockType::Float64,
                column.iter().copied().map(Scalar::Float64).collect(),
            ));
        }
        self
    }

    /// Adds a feature column whose type is inferred from its values.
    pub fn column(mut self, name: impl Into<String>, values: Vec<Scalar>) -> Self {
        let block_type = BlockType::infer(&values);
        let column = (name.into(), FieldKind::Feature, block_type, values);
        self.columns.push(column);
        self
    }

    /// Adds the label column.
    pub fn label(self, name: impl Into<String>, values: &Array1<f64>) -> Self {
        self.float_field(name, FieldKind::Label, values)
    }

    /// Adds the weight column.
    pub fn weight(self, name: impl Into<String>, values: &Array1<f64>) -> Self {
        self.float_field(name, FieldKind::Weight, values)
    }

    fn float_field(
        mut self,
        name: impl Into<String>,
        kind: FieldKind,
        values: &Array1<f64>,
    ) -> Self {
        self.columns.push((
            name.into(),
            kind,
            BlockType::Float64,
            values.iter().copied().map(Scalar::Float64).collect(),
        ));
        self
    }

    /// Spreads the rows over (at most) `partitions` partitions.
    pub fn partitions(mut self, partitions: usize) -> Self {
        self.partitions = partitions;
        self
    }

    /// Builds the frame, checking that every column has one value per sample id.
    pub fn build(self) -> Result<DataFrame, Error> {
        let rows = self.sample_ids.len();
        let mut seen = std::collections::HashSet::new();
        if let Some(id) = self.sample_ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(Error::Schema(format!("sample id '{id}' is given twice")));
        }
        if let Some((name, _, _, values)) = self.columns.iter().find(|c| c.3.len() != rows) {
            return Err(Error::Shape(format!(
                "column '{name}' has {} values for {rows} samples",
                values.len()
            )));
        }

        let mut manager = DataManager::new();
        for kind in [FieldKind::Label, FieldKind::Weight, FieldKind::Feature] {
            let (names, types): (Vec<String>, Vec<BlockType>) = self
                .columns
                .iter()
                .filter(|c| c.1 == kind)
                .map(|c| (c.0.clone(), c.2))
                .unzip();
            if !names.is_empty() {
                manager.append_fields(&names, &types, kind)?;
            }
        }

        let by_name: HashMap<&str, &Vec<Scalar>> = self
            .columns
            .iter()
            .map(|(name, _, _, values)| (name.as_str(), values))
            .collect();
        let rows_table = Table::parallelize((0..rows).collect(), self.partitions);
        let block_table = rows_table.try_map_values(|part_rows| {
            let blocks = manager
                .blocks()
                .iter()
                .map(|meta| {
                    let columns: Vec<&Vec<Scalar>> =
                        meta.fields.iter().map(|f| by_name[f.as_str()]).collect();
                    let values = part_rows
                        .iter()
                        .flat_map(|&r| columns.iter().map(move |c| c[r].clone()))
                        .collect();
                    Block::convert_block(meta.block_type, (part_rows.len(), columns.len()), values)
                })
                .collect::<Result<Vec<_>, _>>()?;
            let index = part_rows
                .iter()
                .map(|&r| self.sample_ids[r].clone())
                .collect();
            Ok::<_, Error>(PartitionBlocks { index, blocks })
        })?;
        Ok(DataFrame {
            manager: Arc::new(manager),
            block_table,
        })
    }
}
