use std::f64::consts::PI;
use std::num::ParseFloatError;
use std::path::Path;
use itertools::chain;
use rand::Rng;
use rand::distributions::StandardNormal;
use serde::{Deserialize, Serialize};
use crate::utils::{into_string_vec, first_duplicate, max_index};

quick_error! {
    #[derive(Debug)]
    pub enum CsvParseError {
        ZeroColumns {
            description("Zero columns in dataset")
        }
        ZeroColumnsSelected {
            description("Zero columns selected")
        }
        ColumnCountMismatch(count: usize, previous: usize) {
            description("Invalid number of columns, did not match previous columns")
            display("Invalid number of columns {}, previous was {}", count, previous)
        }
        ColumnNotFound(name: String) {
            description("Column with specified name not found")
            display("Column with name {} not found", name)
        }
        DuplicateColumns(name: String) {
            description("Duplicate columns found in file")
            display("Duplicate columns found in file: {}", name)
        }
        DuplicateColumnsSpecified(name: String) {
            description("Duplicate columns specified")
            display("Duplicate columns specified: {}", name)
        }
        Csv(err: csv::Error) {
            from()
            description("CSV error")
            display("CSV error: {}", err)
            cause(err)
        }
        Value(err: ParseFloatError) {
            from()
            description("Invalid numeric value")
            display("Invalid numeric value: {}", err)
            cause(err)
        }
    }
}

/// One training sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub input: Vec<f64>,
    pub output: Vec<f64>,
}

impl DataPoint {
    pub fn new(input: Vec<f64>, output: Vec<f64>) -> Self {
        DataPoint { input, output }
    }
}

/// Reads the named columns of a CSV file with a header row. `independent_cols` become the
/// inputs and `dependent_cols` the targets, both in the order given.
pub fn from_csv<T1, I1, T2, I2>(
    path: impl AsRef<Path>,
    independent_cols: T1,
    dependent_cols: T2
) -> Result<Vec<DataPoint>, CsvParseError>
    where T1: AsRef<[I1]>, I1: ToString,
          T2: AsRef<[I2]>, I2: ToString
{
    let independent_cols = into_string_vec(independent_cols);
    let dependent_cols = into_string_vec(dependent_cols);

    if independent_cols.is_empty() || dependent_cols.is_empty() {
        return Err(CsvParseError::ZeroColumnsSelected);
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;

    let column_names = reader.headers()?
        .iter()
        .map(str::to_owned)
        .collect::<Vec<String>>();

    if column_names.is_empty() {
        return Err(CsvParseError::ZeroColumns);
    }

    if let Some(dupe) = first_duplicate(column_names.iter()) {
        return Err(CsvParseError::DuplicateColumns(dupe.clone()));
    }

    if let Some(dupe) = first_duplicate(chain(independent_cols.iter(), dependent_cols.iter())) {
        return Err(CsvParseError::DuplicateColumnsSpecified(dupe.clone()));
    }

    let find = |col_name: &String| column_names.iter()
        .position(|n| n == col_name)
        .ok_or_else(|| CsvParseError::ColumnNotFound(col_name.clone()));
    let independent_indices = independent_cols.iter().map(find).collect::<Result<Vec<_>, _>>()?;
    let dependent_indices = dependent_cols.iter().map(find).collect::<Result<Vec<_>, _>>()?;

    let mut row_vals = Vec::with_capacity(column_names.len());
    let mut data = Vec::new();

    for row in reader.records() {
        row_vals.clear();
        for datum in row?.iter() {
            row_vals.push(datum.parse::<f64>()?);
        }
        if column_names.len() != row_vals.len() {
            return Err(CsvParseError::ColumnCountMismatch(row_vals.len(), column_names.len()));
        }
        data.push(DataPoint {
            input: independent_indices.iter().map(|&i| row_vals[i]).collect(),
            output: dependent_indices.iter().map(|&i| row_vals[i]).collect(),
        });
    }

    debug!("read {} rows with {} inputs and {} outputs", data.len(), independent_cols.len(), dependent_cols.len());
    Ok(data)
}

pub fn to_one_hot(class: usize, num_classes: usize) -> Vec<f64> {
    let mut out = vec![0.0; num_classes];
    if class < num_classes {
        out[class] = 1.0;
    }
    out
}

#[inline]
pub fn from_one_hot(values: &[f64]) -> usize {
    max_index(values)
}

/// Standardizes every input column to zero mean and unit variance. Columns without
/// variance become 0. Returns the column means and standard deviations that were removed.
pub fn normalize_inputs(data: &mut [DataPoint]) -> (Vec<f64>, Vec<f64>) {
    let width = match data.first() {
        Some(point) => point.input.len(),
        None => return (Vec::new(), Vec::new()),
    };
    let n = data.len() as f64;
    let mut means = vec![0.0; width];
    for point in data.iter() {
        for (mean, &x) in means.iter_mut().zip(point.input.iter()) {
            *mean += x / n;
        }
    }
    let mut stddevs = vec![0.0; width];
    for point in data.iter() {
        for ((var, &mean), &x) in stddevs.iter_mut().zip(means.iter()).zip(point.input.iter()) {
            *var += (x - mean) * (x - mean) / n;
        }
    }
    stddevs.iter_mut().for_each(|s| *s = s.sqrt());

    for point in data.iter_mut() {
        for ((x, &mean), &stddev) in point.input.iter_mut().zip(means.iter()).zip(stddevs.iter()) {
            *x = if stddev == 0.0 { 0.0 } else { (*x - mean) / stddev };
        }
    }
    (means, stddevs)
}

/// Interleaved spiral arms, one per class, with one-hot targets.
pub fn spiral<R: Rng + ?Sized>(points_per_class: usize, num_classes: usize, rng: &mut R) -> Vec<DataPoint> {
    let mut data = Vec::with_capacity(points_per_class * num_classes);
    let turn = 2.0 * PI / num_classes.max(1) as f64;
    for class in 0..num_classes {
        for i in 0..points_per_class {
            let radius = i as f64 / points_per_class as f64;
            let noise: f64 = rng.sample(StandardNormal);
            let theta = class as f64 * turn + radius * 4.0 + noise * 0.2;
            data.push(DataPoint::new(
                vec![radius * theta.sin(), radius * theta.cos()],
                to_one_hot(class, num_classes),
            ));
        }
    }
    data
}

/// Points in the unit square split by the line `x = y`, with a gap of 0.1 around it.
/// Targets are one-hot over the two sides.
pub fn linearly_separable<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Vec<DataPoint> {
    let mut data = Vec::with_capacity(count);
    while data.len() < count {
        let x: f64 = rng.gen_range(-1.0, 1.0);
        let y: f64 = rng.gen_range(-1.0, 1.0);
        if (x - y).abs() < 0.1 {
            continue;
        }
        let class = if x > y { 0 } else { 1 };
        data.push(DataPoint::new(vec![x, y], to_one_hot(class, 2)));
    }
    data
}
