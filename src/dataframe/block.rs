//! Homogeneously typed column groups ("blocks") stored per partition.

use std::fmt;

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use super::Error;

/// The closed set of types a block can hold.
///
/// The declaration order is the promotion order: mixing two types yields the larger one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    /// Booleans.
    Bool,
    /// 32-bit signed integers.
    Int32,
    /// 64-bit signed integers.
    Int64,
    /// 32-bit floats.
    Float32,
    /// 64-bit floats.
    Float64,
    /// Arbitrary [`Scalar`] values.
    Object,
}

impl BlockType {
    /// The block type a single value is stored in.
    pub fn of(value: &Scalar) -> Self {
        match value {
            Scalar::Bool(_) => BlockType::Bool,
            Scalar::Int32(_) => BlockType::Int32,
            Scalar::Int64(_) => BlockType::Int64,
            Scalar::Float32(_) => BlockType::Float32,
            Scalar::Float64(_) => BlockType::Float64,
            Scalar::Str(_) => BlockType::Object,
        }
    }

    /// The smallest block type all of `values` can be stored in.
    pub fn infer(values: &[Scalar]) -> Self {
        values
            .iter()
            .map(BlockType::of)
            .reduce(BlockType::promote)
            .unwrap_or(BlockType::Object)
    }

    /// The block type holding values of both types.
    pub fn promote(self, other: Self) -> Self {
        self.max(other)
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockType::Bool => "bool",
            BlockType::Int32 => "int32",
            BlockType::Int64 => "int64",
            BlockType::Float32 => "float32",
            BlockType::Float64 => "float64",
            BlockType::Object => "object",
        };
        f.write_str(name)
    }
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    /// A boolean.
    Bool(bool),
    /// A 32-bit signed integer.
    Int32(i32),
    /// A 64-bit signed integer.
    Int64(i64),
    /// A 32-bit float.
    Float32(f32),
    /// A 64-bit float.
    Float64(f64),
    /// A string, only storable in object blocks.
    Str(String),
}

impl Scalar {
    /// The value as a float, `None` for strings.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Bool(b) => Some(f64::from(u8::from(*b))),
            Scalar::Int32(v) => Some(f64::from(*v)),
            Scalar::Int64(v) => Some(*v as f64),
            Scalar::Float32(v) => Some(f64::from(*v)),
            Scalar::Float64(v) => Some(*v),
            Scalar::Str(_) => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Bool(b) => Some(i64::from(*b)),
            Scalar::Int32(v) => Some(i64::from(*v)),
            Scalar::Int64(v) => Some(*v),
            Scalar::Float32(v) => integral(f64::from(*v)),
            Scalar::Float64(v) => integral(*v),
            Scalar::Str(_) => None,
        }
    }

    fn coerce_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn coerce_i32(&self) -> Option<i32> {
        self.as_i64().and_then(|v| i32::try_from(v).ok())
    }

    fn coerce_i64(&self) -> Option<i64> {
        self.as_i64()
    }

    fn coerce_f32(&self) -> Option<f32> {
        self.as_f64().map(|v| v as f32)
    }

    fn coerce_f64(&self) -> Option<f64> {
        self.as_f64()
    }

    fn coerce_object(&self) -> Option<Scalar> {
        Some(self.clone())
    }
}

fn integral(v: f64) -> Option<i64> {
    if v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(v) => write!(f, "{v}"),
            Scalar::Int32(v) => write!(f, "{v}"),
            Scalar::Int64(v) => write!(f, "{v}"),
            Scalar::Float32(v) => write!(f, "{v}"),
            Scalar::Float64(v) => write!(f, "{v}"),
            Scalar::Str(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int32(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int64(v)
    }
}

impl From<f32> for Scalar {
    fn from(v: f32) -> Self {
        Scalar::Float32(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float64(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Str(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Str(v)
    }
}

/// A `rows × cols` group of columns sharing one type, stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    /// A block of booleans.
    Bool(Array2<bool>),
    /// A block of 32-bit integers.
    Int32(Array2<i32>),
    /// A block of 64-bit integers.
    Int64(Array2<i64>),
    /// A block of 32-bit floats.
    Float32(Array2<f32>),
    /// A block of 64-bit floats.
    Float64(Array2<f64>),
    /// A block of arbitrary values.
    Object(Array2<Scalar>),
}

/// Evaluates `$body` with `$arr` bound to the array of whichever variant `$block` is.
macro_rules! with_array {
    ($block:expr, $arr:ident => $body:expr) => {
        match $block {
            Block::Bool($arr) => $body,
            Block::Int32($arr) => $body,
            Block::Int64($arr) => $body,
            Block::Float32($arr) => $body,
            Block::Float64($arr) => $body,
            Block::Object($arr) => $body,
        }
    };
}

/// Like [`with_array`], but wraps the resulting array in the same variant again.
macro_rules! map_array {
    ($block:expr, $arr:ident => $body:expr) => {
        match $block {
            Block::Bool($arr) => Block::Bool($body),
            Block::Int32($arr) => Block::Int32($body),
            Block::Int64($arr) => Block::Int64($body),
            Block::Float32($arr) => Block::Float32($body),
            Block::Float64($arr) => Block::Float64($body),
            Block::Object($arr) => Block::Object($body),
        }
    };
}

/// Builds a block of one variant from row-major values, coercing each one.
macro_rules! convert_into {
    ($variant:ident, $coerce:ident, $shape:expr, $values:expr) => {{
        let values = $values
            .into_iter()
            .map(|v| {
                v.$coerce().ok_or_else(|| Error::TypeCoercion {
                    value: v.to_string(),
                    block_type: BlockType::$variant,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Block::$variant(from_shape_vec($shape, values)?)
    }};
}

/// Gathers rows of one variant out of several source blocks.
macro_rules! gather_variant {
    ($variant:ident, $sources:expr, $picks:expr, $cols:expr) => {{
        let arrays = $sources
            .iter()
            .map(|b| match b {
                Block::$variant(a) => Ok(a),
                other => Err(Error::Schema(format!(
                    "cannot gather rows of a {} block into a {} block",
                    other.block_type(),
                    BlockType::$variant
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Block::$variant(gather(&arrays, $picks, $cols)?)
    }};
}

fn from_shape_vec<T>(shape: (usize, usize), values: Vec<T>) -> Result<Array2<T>, Error> {
    let len = values.len();
    Array2::from_shape_vec(shape, values).map_err(|_| {
        Error::Shape(format!(
            "{len} values cannot fill a block of {} rows and {} columns",
            shape.0, shape.1
        ))
    })
}

fn gather<T: Clone>(
    sources: &[&Array2<T>],
    picks: &[(usize, usize)],
    cols: usize,
) -> Result<Array2<T>, Error> {
    let mut values = Vec::with_capacity(picks.len() * cols);
    for &(source, row) in picks {
        let array = sources
            .get(source)
            .ok_or_else(|| Error::Shape(format!("no source partition {source}")))?;
        if row >= array.nrows() {
            return Err(Error::Shape(format!(
                "row {row} is out of bounds for a block of {} rows",
                array.nrows()
            )));
        }
        values.extend(array.row(row).iter().cloned());
    }
    from_shape_vec((picks.len(), cols), values)
}

impl Block {
    /// A block of `rows` rows without any columns.
    pub fn empty(block_type: BlockType, rows: usize) -> Self {
        match block_type {
            BlockType::Bool => Block::Bool(Array2::from_elem((rows, 0), false)),
            BlockType::Int32 => Block::Int32(Array2::zeros((rows, 0))),
            BlockType::Int64 => Block::Int64(Array2::zeros((rows, 0))),
            BlockType::Float32 => Block::Float32(Array2::zeros((rows, 0))),
            BlockType::Float64 => Block::Float64(Array2::zeros((rows, 0))),
            BlockType::Object => Block::Object(Array2::from_elem((rows, 0), Scalar::Bool(false))),
        }
    }

    /// Builds a block of the given type and shape from row-major values.
    ///
    /// Every value is coerced into `block_type`; values that do not fit (strings in numeric
    /// blocks, fractional floats in integer blocks, out of range integers) are rejected.
    pub fn convert_block(
        block_type: BlockType,
        shape: (usize, usize),
        values: Vec<Scalar>,
    ) -> Result<Self, Error> {
        let block = match block_type {
            BlockType::Bool => convert_into!(Bool, coerce_bool, shape, values),
            BlockType::Int32 => convert_into!(Int32, coerce_i32, shape, values),
            BlockType::Int64 => convert_into!(Int64, coerce_i64, shape, values),
            BlockType::Float32 => convert_into!(Float32, coerce_f32, shape, values),
            BlockType::Float64 => convert_into!(Float64, coerce_f64, shape, values),
            BlockType::Object => convert_into!(Object, coerce_object, shape, values),
        };
        Ok(block)
    }

    /// The type of the values stored in this block.
    pub fn block_type(&self) -> BlockType {
        match self {
            Block::Bool(_) => BlockType::Bool,
            Block::Int32(_) => BlockType::Int32,
            Block::Int64(_) => BlockType::Int64,
            Block::Float32(_) => BlockType::Float32,
            Block::Float64(_) => BlockType::Float64,
            Block::Object(_) => BlockType::Object,
        }
    }

    /// The number of rows.
    pub fn rows(&self) -> usize {
        with_array!(self, a => a.nrows())
    }

    /// The number of columns.
    pub fn cols(&self) -> usize {
        with_array!(self, a => a.ncols())
    }

    /// Keeps only the columns at `offsets`, in the given order.
    pub fn select_columns(&self, offsets: &[usize]) -> Self {
        map_array!(self, a => a.select(Axis(1), offsets))
    }

    /// Builds a block out of `(source, row)` picks from several blocks of the same type.
    pub fn gather(sources: &[&Block], picks: &[(usize, usize)]) -> Result<Self, Error> {
        let Some(first) = sources.first() else {
            return Err(Error::Shape("cannot gather rows without a source block".into()));
        };
        let cols = first.cols();
        if let Some(other) = sources.iter().find(|b| b.cols() != cols) {
            return Err(Error::Shape(format!(
                "source blocks have {cols} and {} columns",
                other.cols()
            )));
        }
        let block = match first.block_type() {
            BlockType::Bool => gather_variant!(Bool, sources, picks, cols),
            BlockType::Int32 => gather_variant!(Int32, sources, picks, cols),
            BlockType::Int64 => gather_variant!(Int64, sources, picks, cols),
            BlockType::Float32 => gather_variant!(Float32, sources, picks, cols),
            BlockType::Float64 => gather_variant!(Float64, sources, picks, cols),
            BlockType::Object => gather_variant!(Object, sources, picks, cols),
        };
        Ok(block)
    }

    /// The values of the column at `offset`, top to bottom.
    pub fn column(&self, offset: usize) -> Result<Vec<Scalar>, Error> {
        if offset >= self.cols() {
            return Err(Error::Schema(format!(
                "offset {offset} is out of bounds for a block of {} columns",
                self.cols()
            )));
        }
        let column = match self {
            Block::Object(a) => a.column(offset).to_vec(),
            Block::Bool(a) => a.column(offset).iter().map(|&v| Scalar::from(v)).collect(),
            Block::Int32(a) => a.column(offset).iter().map(|&v| Scalar::from(v)).collect(),
            Block::Int64(a) => a.column(offset).iter().map(|&v| Scalar::from(v)).collect(),
            Block::Float32(a) => a.column(offset).iter().map(|&v| Scalar::from(v)).collect(),
            Block::Float64(a) => a.column(offset).iter().map(|&v| Scalar::from(v)).collect(),
        };
        Ok(column)
    }

    /// The column at `offset` as floats.
    pub fn column_f64(&self, offset: usize) -> Result<Array1<f64>, Error> {
        if let Block::Float64(a) = self
            && offset < a.ncols()
        {
            return Ok(a.column(offset).to_owned());
        }
        self.column(offset)?
            .into_iter()
            .map(|v| {
                v.as_f64().ok_or_else(|| Error::TypeCoercion {
                    value: v.to_string(),
                    block_type: BlockType::Float64,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn promotion_follows_declaration_order() {
        use BlockType::*;
        assert_eq!(Bool.promote(Int64), Int64);
        assert_eq!(Float32.promote(Int64), Float32);
        assert_eq!(Float64.promote(Object), Object);
        let values = vec![Scalar::Int32(1), Scalar::Float64(2.5), Scalar::Bool(true)];
        assert_eq!(BlockType::infer(&values), BlockType::Float64);
        let values = vec![Scalar::Int32(1), Scalar::from("a")];
        assert_eq!(BlockType::infer(&values), BlockType::Object);
    }

    #[test]
    fn convert_block_coerces_values() -> Result<(), Error> {
        let values = vec![
            Scalar::Int32(1),
            Scalar::Bool(true),
            Scalar::Float32(2.5),
            Scalar::Int64(4),
        ];
        let block = Block::convert_block(BlockType::Float64, (2, 2), values)?;
        assert_eq!(block, Block::Float64(array![[1.0, 1.0], [2.5, 4.0]]));

        let values = vec![Scalar::Float64(3.0), Scalar::Int64(-2)];
        let block = Block::convert_block(BlockType::Int32, (1, 2), values)?;
        assert_eq!(block, Block::Int32(array![[3, -2]]));
        Ok(())
    }

    fn convert_one(block_type: BlockType, value: Scalar) -> Result<Block, Error> {
        Block::convert_block(block_type, (1, 1), vec![value])
    }

    #[test]
    fn convert_block_rejects_incompatible_values() {
        let err = convert_one(BlockType::Float64, Scalar::from("x")).unwrap_err();
        assert!(matches!(
            err,
            Error::TypeCoercion {
                block_type: BlockType::Float64,
                ..
            }
        ));

        let err = convert_one(BlockType::Int64, Scalar::Float64(0.5)).unwrap_err();
        assert!(matches!(err, Error::TypeCoercion { .. }));

        let err = convert_one(BlockType::Int32, Scalar::Int64(i64::MAX)).unwrap_err();
        assert!(matches!(err, Error::TypeCoercion { .. }));

        let err = convert_one(BlockType::Bool, Scalar::Int32(1)).unwrap_err();
        assert!(matches!(err, Error::TypeCoercion { .. }));
    }

    #[test]
    fn floats_beyond_the_integer_range_are_rejected() {
        let two_pow_63 = 2f64.powi(63);
        let err = convert_one(BlockType::Int64, Scalar::Float64(two_pow_63)).unwrap_err();
        assert!(matches!(
            err,
            Error::TypeCoercion {
                block_type: BlockType::Int64,
                ..
            }
        ));

        let block = convert_one(BlockType::Int64, Scalar::Float64(-two_pow_63)).unwrap();
        assert_eq!(block, Block::Int64(array![[i64::MIN]]));
    }

    #[test]
    fn convert_block_checks_the_shape() {
        let err = Block::convert_block(BlockType::Int64, (2, 2), vec![Scalar::Int64(1)]);
        assert!(matches!(err, Err(Error::Shape(_))));
    }

    #[test]
    fn narrowing_keeps_rows() {
        let block = Block::Int64(array![[1, 2, 3], [4, 5, 6]]);
        let narrowed = block.select_columns(&[0, 2]);
        assert_eq!(narrowed, Block::Int64(array![[1, 3], [4, 6]]));
        assert_eq!(narrowed.rows(), 2);
        let emptied = block.select_columns(&[]);
        assert_eq!((emptied.rows(), emptied.cols()), (2, 0));
    }

    #[test]
    fn gather_picks_rows_across_blocks() -> Result<(), Error> {
        let a = Block::Float64(array![[1.0], [2.0]]);
        let b = Block::Float64(array![[3.0], [4.0]]);
        let gathered = Block::gather(&[&a, &b], &[(1, 1), (0, 0), (1, 0)])?;
        assert_eq!(gathered, Block::Float64(array![[4.0], [1.0], [3.0]]));

        let c = Block::Int32(array![[1]]);
        assert!(Block::gather(&[&a, &c], &[(0, 0)]).is_err());
        Ok(())
    }

    #[test]
    fn columns_read_back_as_scalars_and_floats() -> Result<(), Error> {
        let block = Block::Int32(array![[1, 2], [3, 4]]);
        assert_eq!(block.column(1)?, vec![Scalar::Int32(2), Scalar::Int32(4)]);
        assert_eq!(block.column_f64(0)?, array![1.0, 3.0]);
        assert!(block.column(2).is_err());

        let objects = Block::Object(array![[Scalar::from("a")]]);
        assert!(objects.column_f64(0).is_err());
        Ok(())
    }
}
