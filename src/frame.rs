//! Tabular data model: scalars, labeled series, and frames.
//!
//! This is the value side of the sandbox: the dataset handed to generated
//! code, and the shapes that come back out of it. Columns are immutable
//! vectors of [`Scalar`]; a [`Frame`] owns insertion-ordered named columns
//! of equal length plus a row-label index that survives filtering and
//! sorting, so grouped and filtered outputs stay addressable.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("length mismatch: expected {expected} values, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("type error: {0}")]
    TypeError(String),
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            Scalar::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Total ordering used for sorts and group keys: nulls first, then
    /// booleans, then numbers (int/float interleaved), then strings.
    pub fn total_cmp(&self, other: &Scalar) -> Ordering {
        use Scalar::*;
        fn rank(s: &Scalar) -> u8 {
            match s {
                Null => 0,
                Bool(_) => 1,
                Int(_) | Float(_) => 2,
                Str(_) => 3,
            }
        }
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Str(a), Str(b)) => a.cmp(b),
            (a, b) if rank(a) == 2 && rank(b) == 2 => {
                let x = a.as_f64().unwrap_or(f64::NAN);
                let y = b.as_f64().unwrap_or(f64::NAN);
                x.total_cmp(&y)
            }
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "NaN"),
            Scalar::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Str(s) => write!(f, "{}", s),
        }
    }
}

/// Group key wrapper giving `Vec<Scalar>` the ordering a BTreeMap needs.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupKey(pub Vec<Scalar>);

impl Eq for GroupKey {}

impl Ord for GroupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            match a.total_cmp(b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl GroupKey {
    fn label(&self) -> Scalar {
        if self.0.len() == 1 {
            self.0[0].clone()
        } else {
            let parts: Vec<String> = self.0.iter().map(|s| s.to_string()).collect();
            Scalar::Str(parts.join(", "))
        }
    }
}

/// Aggregation selector shared by series and grouped aggregations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggOp {
    Sum,
    Mean,
    Count,
    Min,
    Max,
}

impl AggOp {
    pub fn name(&self) -> &'static str {
        match self {
            AggOp::Sum => "sum",
            AggOp::Mean => "mean",
            AggOp::Count => "count",
            AggOp::Min => "min",
            AggOp::Max => "max",
        }
    }
}

fn aggregate(values: &[Scalar], op: AggOp) -> Scalar {
    let non_null: Vec<&Scalar> = values.iter().filter(|v| !v.is_null()).collect();
    match op {
        AggOp::Count => Scalar::Int(non_null.len() as i64),
        AggOp::Sum => {
            if non_null.is_empty() {
                return Scalar::Int(0);
            }
            if non_null.iter().all(|v| matches!(v, Scalar::Int(_) | Scalar::Bool(_))) {
                Scalar::Int(non_null.iter().map(|v| v.as_f64().unwrap_or(0.0) as i64).sum())
            } else if non_null.iter().all(|v| v.as_f64().is_some()) {
                Scalar::Float(non_null.iter().filter_map(|v| v.as_f64()).sum())
            } else {
                // String concatenation mirrors pandas' object-column sum.
                Scalar::Str(non_null.iter().map(|v| v.to_string()).collect())
            }
        }
        AggOp::Mean => {
            let nums: Vec<f64> = non_null.iter().filter_map(|v| v.as_f64()).collect();
            if nums.is_empty() {
                Scalar::Null
            } else {
                Scalar::Float(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        AggOp::Min => non_null
            .iter()
            .min_by(|a, b| a.total_cmp(b))
            .map(|v| (*v).clone())
            .unwrap_or(Scalar::Null),
        AggOp::Max => non_null
            .iter()
            .max_by(|a, b| a.total_cmp(b))
            .map(|v| (*v).clone())
            .unwrap_or(Scalar::Null),
    }
}

fn infer_dtype(values: &[Scalar]) -> &'static str {
    let mut saw_int = false;
    let mut saw_float = false;
    let mut saw_bool = false;
    let mut saw_str = false;
    for v in values {
        match v {
            Scalar::Null => saw_float = true,
            Scalar::Int(_) => saw_int = true,
            Scalar::Float(_) => saw_float = true,
            Scalar::Bool(_) => saw_bool = true,
            Scalar::Str(_) => saw_str = true,
        }
    }
    if saw_str {
        "object"
    } else if saw_bool && !saw_int && !saw_float {
        "bool"
    } else if saw_float {
        "float64"
    } else if saw_int {
        "int64"
    } else {
        "object"
    }
}

/// One-dimensional labeled sequence of scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    name: String,
    index: Vec<Scalar>,
    values: Vec<Scalar>,
}

impl Series {
    /// Build with the default positional index `0..n`.
    pub fn new(name: impl Into<String>, values: Vec<Scalar>) -> Self {
        let index = (0..values.len() as i64).map(Scalar::Int).collect();
        Self { name: name.into(), index, values }
    }

    pub fn with_index(
        name: impl Into<String>,
        index: Vec<Scalar>,
        values: Vec<Scalar>,
    ) -> Result<Self, FrameError> {
        if index.len() != values.len() {
            return Err(FrameError::LengthMismatch { expected: values.len(), got: index.len() });
        }
        Ok(Self { name: name.into(), index, values })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    pub fn index(&self) -> &[Scalar] {
        &self.index
    }

    pub fn dtype(&self) -> &'static str {
        infer_dtype(&self.values)
    }

    /// Position-based element access (also accepts negative positions).
    pub fn get(&self, pos: i64) -> Option<&Scalar> {
        let n = self.values.len() as i64;
        let i = if pos < 0 { pos + n } else { pos };
        if i < 0 || i >= n {
            None
        } else {
            Some(&self.values[i as usize])
        }
    }

    pub fn agg(&self, op: AggOp) -> Scalar {
        aggregate(&self.values, op)
    }

    pub fn head(&self, n: usize) -> Series {
        let n = n.min(self.len());
        Series {
            name: self.name.clone(),
            index: self.index[..n].to_vec(),
            values: self.values[..n].to_vec(),
        }
    }

    pub fn tail(&self, n: usize) -> Series {
        let start = self.len().saturating_sub(n);
        Series {
            name: self.name.clone(),
            index: self.index[start..].to_vec(),
            values: self.values[start..].to_vec(),
        }
    }

    pub fn sort_values(&self, ascending: bool) -> Series {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| self.values[a].total_cmp(&self.values[b]));
        if !ascending {
            order.reverse();
        }
        Series {
            name: self.name.clone(),
            index: order.iter().map(|&i| self.index[i].clone()).collect(),
            values: order.iter().map(|&i| self.values[i].clone()).collect(),
        }
    }

    /// Distinct values in order of first appearance.
    pub fn unique(&self) -> Series {
        let mut seen: Vec<Scalar> = Vec::new();
        for v in &self.values {
            if !seen.contains(v) {
                seen.push(v.clone());
            }
        }
        Series::new(self.name.clone(), seen)
    }

    /// Occurrence counts, most frequent first.
    pub fn value_counts(&self) -> Series {
        let mut counts: Vec<(Scalar, i64)> = Vec::new();
        for v in &self.values {
            if v.is_null() {
                continue;
            }
            match counts.iter_mut().find(|(k, _)| k == v) {
                Some((_, c)) => *c += 1,
                None => counts.push((v.clone(), 1)),
            }
        }
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.total_cmp(&b.0)));
        Series {
            name: "count".to_string(),
            index: counts.iter().map(|(k, _)| k.clone()).collect(),
            values: counts.iter().map(|(_, c)| Scalar::Int(*c)).collect(),
        }
    }

    pub fn abs(&self) -> Result<Series, FrameError> {
        let values = self
            .values
            .iter()
            .map(|v| match v {
                Scalar::Int(x) => Ok(Scalar::Int(x.abs())),
                Scalar::Float(x) => Ok(Scalar::Float(x.abs())),
                Scalar::Null => Ok(Scalar::Null),
                other => Err(FrameError::TypeError(format!(
                    "abs() not supported for {}",
                    other
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Series { name: self.name.clone(), index: self.index.clone(), values })
    }

    pub fn round(&self, digits: i32) -> Series {
        let factor = 10f64.powi(digits);
        let values = self
            .values
            .iter()
            .map(|v| match v {
                Scalar::Float(x) => Scalar::Float((x * factor).round() / factor),
                other => other.clone(),
            })
            .collect();
        Series { name: self.name.clone(), index: self.index.clone(), values }
    }

    fn zip_with(
        &self,
        other: &Series,
        f: impl Fn(&Scalar, &Scalar) -> Result<Scalar, FrameError>,
    ) -> Result<Series, FrameError> {
        if self.len() != other.len() {
            return Err(FrameError::LengthMismatch { expected: self.len(), got: other.len() });
        }
        let values = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| f(a, b))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Series { name: self.name.clone(), index: self.index.clone(), values })
    }

    /// Element-wise arithmetic against an aligned-by-position series.
    pub fn arith(&self, op: ArithOp, other: &Series) -> Result<Series, FrameError> {
        self.zip_with(other, |a, b| scalar_arith(a, op, b))
    }

    pub fn arith_scalar(&self, op: ArithOp, other: &Scalar) -> Result<Series, FrameError> {
        let values = self
            .values
            .iter()
            .map(|a| scalar_arith(a, op, other))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Series { name: self.name.clone(), index: self.index.clone(), values })
    }

    /// Element-wise comparison producing a boolean mask.
    pub fn compare_scalar(&self, op: CmpKind, other: &Scalar) -> Series {
        let values = self
            .values
            .iter()
            .map(|a| Scalar::Bool(scalar_compare(a, op, other)))
            .collect();
        Series { name: self.name.clone(), index: self.index.clone(), values }
    }

    pub fn compare(&self, op: CmpKind, other: &Series) -> Result<Series, FrameError> {
        self.zip_with(other, |a, b| Ok(Scalar::Bool(scalar_compare(a, op, b))))
    }

    /// Combine two boolean masks (`&`, `|`).
    pub fn mask_combine(&self, other: &Series, and: bool) -> Result<Series, FrameError> {
        self.zip_with(other, |a, b| match (a.as_bool(), b.as_bool()) {
            (Some(x), Some(y)) => Ok(Scalar::Bool(if and { x && y } else { x || y })),
            _ => Err(FrameError::TypeError(
                "mask operands must be boolean".to_string(),
            )),
        })
    }

    pub fn mask_invert(&self) -> Result<Series, FrameError> {
        let values = self
            .values
            .iter()
            .map(|v| match v.as_bool() {
                Some(b) => Ok(Scalar::Bool(!b)),
                None => Err(FrameError::TypeError("~ requires a boolean mask".to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Series { name: self.name.clone(), index: self.index.clone(), values })
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .index
            .iter()
            .map(|i| i.to_string().len())
            .max()
            .unwrap_or(0);
        for (i, v) in self.index.iter().zip(self.values.iter()) {
            writeln!(f, "{:<width$}    {}", i.to_string(), v, width = width)?;
        }
        write!(f, "Name: {}, dtype: {}", self.name, self.dtype())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpKind {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

pub fn scalar_arith(a: &Scalar, op: ArithOp, b: &Scalar) -> Result<Scalar, FrameError> {
    use Scalar::*;
    if a.is_null() || b.is_null() {
        return Ok(Null);
    }
    if let (Str(x), Str(y)) = (a, b) {
        if op == ArithOp::Add {
            return Ok(Str(format!("{}{}", x, y)));
        }
    }
    let (x, y) = match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x, y),
        _ => {
            return Err(FrameError::TypeError(format!(
                "unsupported operand types: {} and {}",
                a, b
            )))
        }
    };
    let int_args = matches!((a, b), (Int(_) | Bool(_), Int(_) | Bool(_)));
    let out = match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => {
            if y == 0.0 {
                return Err(FrameError::TypeError("division by zero".to_string()));
            }
            return Ok(Float(x / y));
        }
        ArithOp::FloorDiv => {
            if y == 0.0 {
                return Err(FrameError::TypeError("division by zero".to_string()));
            }
            (x / y).floor()
        }
        ArithOp::Mod => {
            if y == 0.0 {
                return Err(FrameError::TypeError("modulo by zero".to_string()));
            }
            x.rem_euclid(y)
        }
        ArithOp::Pow => x.powf(y),
    };
    if int_args && out.fract() == 0.0 && out.abs() < i64::MAX as f64 {
        Ok(Int(out as i64))
    } else {
        Ok(Float(out))
    }
}

pub fn scalar_compare(a: &Scalar, op: CmpKind, b: &Scalar) -> bool {
    // Cross-type comparisons follow the total ordering, except equality
    // which is strict on kind (1 == "1" is false).
    match op {
        CmpKind::Eq => scalar_eq(a, b),
        CmpKind::Ne => !scalar_eq(a, b),
        CmpKind::Lt => a.total_cmp(b) == Ordering::Less,
        CmpKind::Le => a.total_cmp(b) != Ordering::Greater,
        CmpKind::Gt => a.total_cmp(b) == Ordering::Greater,
        CmpKind::Ge => a.total_cmp(b) != Ordering::Less,
    }
}

fn scalar_eq(a: &Scalar, b: &Scalar) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if !matches!(a, Scalar::Str(_)) && !matches!(b, Scalar::Str(_)) => {
            x == y
        }
        _ => a == b,
    }
}

/// Insertion-ordered named columns of equal length with a row-label index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    index: Vec<Scalar>,
    columns: Vec<(String, Vec<Scalar>)>,
}

impl Frame {
    pub fn new() -> Self {
        Self { index: Vec::new(), columns: Vec::new() }
    }

    pub fn from_columns(columns: Vec<(String, Vec<Scalar>)>) -> Result<Self, FrameError> {
        let n = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        for (_, values) in &columns {
            if values.len() != n {
                return Err(FrameError::LengthMismatch { expected: n, got: values.len() });
            }
        }
        Ok(Self { index: (0..n as i64).map(Scalar::Int).collect(), columns })
    }

    pub fn n_rows(&self) -> usize {
        self.index.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows(), self.n_cols())
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn row_index(&self) -> &[Scalar] {
        &self.index
    }

    /// Column name → dtype name, for the generation and presentation
    /// boundaries.
    pub fn schema(&self) -> BTreeMap<String, String> {
        self.columns
            .iter()
            .map(|(name, values)| (name.clone(), infer_dtype(values).to_string()))
            .collect()
    }

    pub fn column(&self, name: &str) -> Result<Series, FrameError> {
        let (_, values) = self
            .columns
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| FrameError::ColumnNotFound(name.to_string()))?;
        Series::with_index(name, self.index.clone(), values.clone())
    }

    /// Add or replace a column; the working copy inside the sandbox is the
    /// only frame this ever mutates.
    pub fn insert_column(&mut self, name: &str, values: Vec<Scalar>) -> Result<(), FrameError> {
        if !self.columns.is_empty() && values.len() != self.n_rows() {
            return Err(FrameError::LengthMismatch { expected: self.n_rows(), got: values.len() });
        }
        if self.columns.is_empty() {
            self.index = (0..values.len() as i64).map(Scalar::Int).collect();
        }
        match self.columns.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = values,
            None => self.columns.push((name.to_string(), values)),
        }
        Ok(())
    }

    fn take_rows(&self, order: &[usize]) -> Frame {
        Frame {
            index: order.iter().map(|&i| self.index[i].clone()).collect(),
            columns: self
                .columns
                .iter()
                .map(|(n, v)| (n.clone(), order.iter().map(|&i| v[i].clone()).collect()))
                .collect(),
        }
    }

    pub fn head(&self, n: usize) -> Frame {
        let order: Vec<usize> = (0..n.min(self.n_rows())).collect();
        self.take_rows(&order)
    }

    pub fn tail(&self, n: usize) -> Frame {
        let start = self.n_rows().saturating_sub(n);
        let order: Vec<usize> = (start..self.n_rows()).collect();
        self.take_rows(&order)
    }

    pub fn sort_values(&self, by: &str, ascending: bool) -> Result<Frame, FrameError> {
        let (_, key) = self
            .columns
            .iter()
            .find(|(n, _)| n == by)
            .ok_or_else(|| FrameError::ColumnNotFound(by.to_string()))?;
        let mut order: Vec<usize> = (0..self.n_rows()).collect();
        order.sort_by(|&a, &b| key[a].total_cmp(&key[b]));
        if !ascending {
            order.reverse();
        }
        Ok(self.take_rows(&order))
    }

    /// Keep the rows where the aligned boolean mask is true.
    pub fn filter_mask(&self, mask: &Series) -> Result<Frame, FrameError> {
        if mask.len() != self.n_rows() {
            return Err(FrameError::LengthMismatch { expected: self.n_rows(), got: mask.len() });
        }
        let mut order = Vec::new();
        for (i, v) in mask.values().iter().enumerate() {
            match v.as_bool() {
                Some(true) => order.push(i),
                Some(false) => {}
                None => {
                    return Err(FrameError::TypeError(
                        "frame filter requires a boolean mask".to_string(),
                    ))
                }
            }
        }
        Ok(self.take_rows(&order))
    }

    pub fn select(&self, names: &[String]) -> Result<Frame, FrameError> {
        let mut columns = Vec::new();
        for name in names {
            let (_, values) = self
                .columns
                .iter()
                .find(|(n, _)| n == name)
                .ok_or_else(|| FrameError::ColumnNotFound(name.clone()))?;
            columns.push((name.clone(), values.clone()));
        }
        Ok(Frame { index: self.index.clone(), columns })
    }

    pub fn groupby(&self, keys: Vec<String>) -> Result<GroupBy, FrameError> {
        for key in &keys {
            if !self.columns.iter().any(|(n, _)| n == key) {
                return Err(FrameError::ColumnNotFound(key.clone()));
            }
        }
        Ok(GroupBy { frame: self.clone(), keys })
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut widths = vec![
            self.index
                .iter()
                .map(|v| v.to_string().len())
                .max()
                .unwrap_or(0),
        ];
        for (name, values) in &self.columns {
            let w = values
                .iter()
                .map(|v| v.to_string().len())
                .chain(std::iter::once(name.len()))
                .max()
                .unwrap_or(0);
            widths.push(w);
        }
        write!(f, "{:>w$}", "", w = widths[0])?;
        for ((name, _), w) in self.columns.iter().zip(widths.iter().skip(1)) {
            write!(f, "  {:>w$}", name, w = w)?;
        }
        for r in 0..self.n_rows() {
            writeln!(f)?;
            write!(f, "{:>w$}", self.index[r].to_string(), w = widths[0])?;
            for ((_, values), w) in self.columns.iter().zip(widths.iter().skip(1)) {
                write!(f, "  {:>w$}", values[r].to_string(), w = w)?;
            }
        }
        Ok(())
    }
}

/// Deferred grouping over a frame. Group keys are sorted, matching the
/// pandas default.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupBy {
    frame: Frame,
    keys: Vec<String>,
}

impl GroupBy {
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    fn groups(&self) -> BTreeMap<GroupKey, Vec<usize>> {
        let key_cols: Vec<&Vec<Scalar>> = self
            .keys
            .iter()
            .filter_map(|k| self.frame.columns.iter().find(|(n, _)| n == k).map(|(_, v)| v))
            .collect();
        let mut groups: BTreeMap<GroupKey, Vec<usize>> = BTreeMap::new();
        for row in 0..self.frame.n_rows() {
            let key = GroupKey(key_cols.iter().map(|c| c[row].clone()).collect());
            groups.entry(key).or_default().push(row);
        }
        groups
    }

    /// Project a single column out of the grouping.
    pub fn column(&self, name: &str) -> Result<GroupedSeries, FrameError> {
        let (_, values) = self
            .frame
            .columns
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| FrameError::ColumnNotFound(name.to_string()))?;
        let groups = self
            .groups()
            .into_iter()
            .map(|(key, rows)| (key, rows.iter().map(|&r| values[r].clone()).collect()))
            .collect();
        Ok(GroupedSeries { name: name.to_string(), groups })
    }

    /// Aggregate every non-key numeric column, keyed rows in the index.
    pub fn agg(&self, op: AggOp) -> Result<Frame, FrameError> {
        let groups = self.groups();
        let index: Vec<Scalar> = groups.keys().map(|k| k.label()).collect();
        let mut columns = Vec::new();
        for (name, values) in &self.frame.columns {
            if self.keys.contains(name) {
                continue;
            }
            let numeric = values.iter().any(|v| v.as_f64().is_some());
            if !numeric && op != AggOp::Count {
                continue;
            }
            let agg_values: Vec<Scalar> = groups
                .values()
                .map(|rows| {
                    let group: Vec<Scalar> = rows.iter().map(|&r| values[r].clone()).collect();
                    aggregate(&group, op)
                })
                .collect();
            columns.push((name.clone(), agg_values));
        }
        Ok(Frame { index, columns })
    }
}

/// A single column within a grouping, ready to aggregate into a series.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedSeries {
    name: String,
    groups: Vec<(GroupKey, Vec<Scalar>)>,
}

impl GroupedSeries {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn agg(&self, op: AggOp) -> Series {
        let index: Vec<Scalar> = self.groups.iter().map(|(k, _)| k.label()).collect();
        let values: Vec<Scalar> = self.groups.iter().map(|(_, v)| aggregate(v, op)).collect();
        // Lengths match by construction.
        Series { name: self.name.clone(), index, values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sales_frame() -> Frame {
        Frame::from_columns(vec![
            (
                "region".to_string(),
                vec![
                    Scalar::Str("east".into()),
                    Scalar::Str("west".into()),
                    Scalar::Str("east".into()),
                    Scalar::Str("west".into()),
                ],
            ),
            (
                "sales".to_string(),
                vec![Scalar::Int(10), Scalar::Int(20), Scalar::Int(5), Scalar::Int(7)],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_schema_dtypes() {
        let schema = sales_frame().schema();
        assert_eq!(schema["region"], "object");
        assert_eq!(schema["sales"], "int64");
    }

    #[test]
    fn test_groupby_column_sum() {
        let df = sales_frame();
        let grouped = df.groupby(vec!["region".to_string()]).unwrap();
        let series = grouped.column("sales").unwrap().agg(AggOp::Sum);
        assert_eq!(series.index(), &[Scalar::Str("east".into()), Scalar::Str("west".into())]);
        assert_eq!(series.values(), &[Scalar::Int(15), Scalar::Int(27)]);
    }

    #[test]
    fn test_filter_mask_keeps_labels() {
        let df = sales_frame();
        let mask = df.column("sales").unwrap().compare_scalar(CmpKind::Gt, &Scalar::Int(7));
        let filtered = df.filter_mask(&mask).unwrap();
        assert_eq!(filtered.n_rows(), 2);
        assert_eq!(filtered.row_index(), &[Scalar::Int(0), Scalar::Int(1)]);
    }

    #[test]
    fn test_sort_values_descending() {
        let df = sales_frame().sort_values("sales", false).unwrap();
        let sales = df.column("sales").unwrap();
        assert_eq!(
            sales.values(),
            &[Scalar::Int(20), Scalar::Int(10), Scalar::Int(7), Scalar::Int(5)]
        );
    }

    #[test]
    fn test_series_mean_skips_nulls() {
        let s = Series::new("x", vec![Scalar::Int(2), Scalar::Null, Scalar::Int(4)]);
        assert_eq!(s.agg(AggOp::Mean), Scalar::Float(3.0));
        assert_eq!(s.agg(AggOp::Count), Scalar::Int(2));
    }

    #[test]
    fn test_value_counts_order() {
        let s = Series::new(
            "c",
            vec![
                Scalar::Str("a".into()),
                Scalar::Str("b".into()),
                Scalar::Str("a".into()),
            ],
        );
        let counts = s.value_counts();
        assert_eq!(counts.index()[0], Scalar::Str("a".into()));
        assert_eq!(counts.values()[0], Scalar::Int(2));
    }

    #[test]
    fn test_missing_column_error() {
        let err = sales_frame().column("profit").unwrap_err();
        assert_eq!(err, FrameError::ColumnNotFound("profit".to_string()));
    }

    #[test]
    fn test_division_promotes_to_float() {
        let out = scalar_arith(&Scalar::Int(7), ArithOp::Div, &Scalar::Int(2)).unwrap();
        assert_eq!(out, Scalar::Float(3.5));
    }

    #[test]
    fn test_mask_combine_requires_bool() {
        let a = Series::new("a", vec![Scalar::Bool(true)]);
        let b = Series::new("b", vec![Scalar::Int(1)]);
        assert!(a.mask_combine(&b, true).is_err());
    }
}
