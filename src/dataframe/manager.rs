//! The schema of a dataframe: which column lives at which offset of which block.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::{BlockType, Error};

/// What a column is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// The regression target.
    Label,
    /// Per-sample weights.
    Weight,
    /// A feature column, the only kind of column models operate on.
    Feature,
}

/// A named column of the schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// The column name.
    pub name: String,
    /// What the column is used for.
    pub kind: FieldKind,
}

/// The type and columns (in offset order) of a single block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    /// The type of the block.
    pub block_type: BlockType,
    /// The columns stored in the block, indexed by their offset.
    pub fields: Vec<String>,
}

/// Maps column names to `(block id, offset)` locations.
///
/// Block ids are never reused: narrowing keeps a block's id even if no column remains in it, so
/// the number of blocks only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataManager {
    fields: Vec<Field>,
    blocks: Vec<BlockMeta>,
    locations: HashMap<String, (usize, usize)>,
}

impl DataManager {
    /// An empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends feature columns, see [`DataManager::append_fields`].
    pub fn append_columns(
        &mut self,
        names: &[String],
        types: &[BlockType],
    ) -> Result<Vec<usize>, Error> {
        self.append_fields(names, types, FieldKind::Feature)
    }

    /// Appends new columns of the given kind.
    ///
    /// Columns of the same type share one new block, in the order they are given. Returns the
    /// block id of every column.
    pub fn append_fields(
        &mut self,
        names: &[String],
        types: &[BlockType],
        kind: FieldKind,
    ) -> Result<Vec<usize>, Error> {
        check_names(names, types)?;
        if let Some(name) = names.iter().find(|n| self.contains(n)) {
            return Err(Error::Schema(format!("column '{name}' already exists")));
        }
        if kind != FieldKind::Feature && names.len() > 1 {
            return Err(Error::Schema(format!("a frame has at most one {kind:?} column")));
        }
        if kind != FieldKind::Feature && self.fields.iter().any(|f| f.kind == kind) {
            return Err(Error::Schema(format!("the frame already has a {kind:?} column")));
        }
        self.fields.extend(names.iter().map(|name| Field {
            name: name.clone(),
            kind,
        }));
        Ok(self.append_blocks(names, types))
    }

    /// Moves existing columns into fresh blocks of the given types.
    ///
    /// Every block holding one of the columns is narrowed to its remaining columns. Returns the
    /// narrowed blocks with the old offsets of the columns they keep, plus the new block id of
    /// every column.
    #[allow(clippy::type_complexity)]
    pub fn split_columns(
        &mut self,
        names: &[String],
        types: &[BlockType],
    ) -> Result<(Vec<(usize, Vec<usize>)>, Vec<usize>), Error> {
        check_names(names, types)?;
        if let Some(name) = names.iter().find(|n| !self.contains(n)) {
            return Err(Error::Schema(format!("unknown column '{name}'")));
        }
        let moved: HashSet<&str> = names.iter().map(String::as_str).collect();
        let mut narrowed = vec![];
        for (bid, meta) in self.blocks.iter_mut().enumerate() {
            if !meta.fields.iter().any(|f| moved.contains(f.as_str())) {
                continue;
            }
            let (kept_offsets, kept_fields): (Vec<usize>, Vec<String>) = meta
                .fields
                .iter()
                .enumerate()
                .filter(|(_, f)| !moved.contains(f.as_str()))
                .map(|(offset, f)| (offset, f.clone()))
                .unzip();
            meta.fields = kept_fields;
            narrowed.push((bid, kept_offsets));
        }
        for &(bid, _) in &narrowed {
            for (offset, name) in self.blocks[bid].fields.iter().enumerate() {
                self.locations.insert(name.clone(), (bid, offset));
            }
        }
        let dst = self.append_blocks(names, types);
        Ok((narrowed, dst))
    }

    fn append_blocks(&mut self, names: &[String], types: &[BlockType]) -> Vec<usize> {
        let mut block_of_type: HashMap<BlockType, usize> = HashMap::new();
        let mut bids = Vec::with_capacity(names.len());
        for (name, &block_type) in names.iter().zip(types) {
            let bid = *block_of_type.entry(block_type).or_insert_with(|| {
                self.blocks.push(BlockMeta {
                    block_type,
                    fields: vec![],
                });
                self.blocks.len() - 1
            });
            let fields = &mut self.blocks[bid].fields;
            self.locations.insert(name.clone(), (bid, fields.len()));
            fields.push(name.clone());
            bids.push(bid);
        }
        bids
    }

    /// The `(block id, offset)` of a column.
    pub fn loc(&self, name: &str) -> Option<(usize, usize)> {
        self.locations.get(name).copied()
    }

    /// The `(block id, offset)` of every named column.
    pub fn loc_block<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<(usize, usize)>, Error> {
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.loc(name)
                    .ok_or_else(|| Error::Schema(format!("unknown column '{name}'")))
            })
            .collect()
    }

    /// Whether the schema has a column with the given name.
    pub fn contains(&self, name: &str) -> bool {
        self.locations.contains_key(name)
    }

    /// The feature columns in schema order.
    pub fn infer_operable_field_names(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.kind == FieldKind::Feature)
            .map(|f| f.name.clone())
            .collect()
    }

    /// All columns (label and weight included) in schema order.
    pub fn columns(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// The name of the label column, if any.
    pub fn label_name(&self) -> Option<&str> {
        self.name_of_kind(FieldKind::Label)
    }

    /// The name of the weight column, if any.
    pub fn weight_name(&self) -> Option<&str> {
        self.name_of_kind(FieldKind::Weight)
    }

    fn name_of_kind(&self, kind: FieldKind) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.kind == kind)
            .map(|f| f.name.as_str())
    }

    /// The number of blocks every partition stores.
    pub fn block_num(&self) -> usize {
        self.blocks.len()
    }

    /// The type of the block with the given id.
    pub fn block_type(&self, bid: usize) -> Option<BlockType> {
        self.blocks.get(bid).map(|b| b.block_type)
    }

    /// All blocks in id order.
    pub fn blocks(&self) -> &[BlockMeta] {
        &self.blocks
    }
}

fn check_names(names: &[String], types: &[BlockType]) -> Result<(), Error> {
    if names.len() != types.len() {
        return Err(Error::Shape(format!(
            "got {} column names but {} block types",
            names.len(),
            types.len()
        )));
    }
    let mut seen = HashSet::new();
    if let Some(name) = names.iter().find(|n| !seen.insert(n.as_str())) {
        return Err(Error::Schema(format!("column '{name}' is given twice")));
    }
    Ok(())
}
