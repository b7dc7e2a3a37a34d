//! Tabular datasets stored the way the scikit-learn distribution ships them.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::debug;

use super::{Dataset, Stackable};
use crate::error::{Result, StudyError};
use crate::ml::Tensor;
use crate::preprocess::take_rows;

pub const DIABETES_FEATURES: [&str; 10] = [
    "age", "sex", "bmi", "bp", "s1", "s2", "s3", "s4", "s5", "s6",
];

pub const BREAST_CANCER_FEATURES: [&str; 30] = [
    "mean radius",
    "mean texture",
    "mean perimeter",
    "mean area",
    "mean smoothness",
    "mean compactness",
    "mean concavity",
    "mean concave points",
    "mean symmetry",
    "mean fractal dimension",
    "radius error",
    "texture error",
    "perimeter error",
    "area error",
    "smoothness error",
    "compactness error",
    "concavity error",
    "concave points error",
    "symmetry error",
    "fractal dimension error",
    "worst radius",
    "worst texture",
    "worst perimeter",
    "worst area",
    "worst smoothness",
    "worst compactness",
    "worst concavity",
    "worst concave points",
    "worst symmetry",
    "worst fractal dimension",
];

/// Feature matrix `[n, d]` with one target per row.
#[derive(Clone, Debug)]
pub struct Tabular {
    pub x: Tensor,
    pub y: Vec<f32>,
    pub feature_names: Vec<String>,
}

impl Tabular {
    pub fn new(x: Tensor, y: Vec<f32>, feature_names: Vec<String>) -> Result<Self> {
        if x.shape.len() != 2 || x.shape[0] != y.len() {
            return Err(StudyError::Shape {
                expected: vec![y.len(), feature_names.len()],
                found: x.shape.clone(),
            });
        }
        if x.shape[1] != feature_names.len() {
            return Err(StudyError::InvalidArgument(format!(
                "{} feature names for {} columns",
                feature_names.len(),
                x.shape[1]
            )));
        }
        Ok(Tabular {
            x,
            y,
            feature_names,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.x.shape[0]
    }

    pub fn n_features(&self) -> usize {
        self.x.shape[1]
    }

    /// Keeps only the given columns, in the given order.
    pub fn select_columns(&self, columns: &[usize]) -> Result<Tabular> {
        let d = self.n_features();
        if let Some(bad) = columns.iter().find(|&&c| c >= d) {
            return Err(StudyError::InvalidArgument(format!(
                "column {} out of range for {} features",
                bad, d
            )));
        }

        let n = self.n_samples();
        let src = self.x.as_f32_slice();
        let mut data = Vec::with_capacity(n * columns.len());
        for i in 0..n {
            data.extend(columns.iter().map(|&c| src[i * d + c]));
        }

        Ok(Tabular {
            x: Tensor::new(data, vec![n, columns.len()]),
            y: self.y.clone(),
            feature_names: columns
                .iter()
                .map(|&c| self.feature_names[c].clone())
                .collect(),
        })
    }

    pub fn take_rows(&self, rows: &[usize]) -> Tabular {
        Tabular {
            x: take_rows(&self.x, rows),
            y: rows.iter().map(|&r| self.y[r]).collect(),
            feature_names: self.feature_names.clone(),
        }
    }

    /// Targets as class indices.
    pub fn labels(&self) -> Vec<usize> {
        self.y.iter().map(|&v| v.round().max(0.0) as usize).collect()
    }
}

/// One row: features `[d]` and target `[1]`.
#[derive(Stackable)]
pub struct Sample {
    pub x: Tensor,
    pub y: Tensor,
}

/// Row-wise [`Dataset`] over a feature matrix and its targets.
pub struct TabularDataset {
    x: Tensor,
    y: Vec<f32>,
}

impl TabularDataset {
    pub fn new(x: Tensor, y: Vec<f32>) -> Self {
        assert_eq!(x.shape[0], y.len(), "row count differs from target count");
        TabularDataset { x, y }
    }
}

impl Dataset for TabularDataset {
    type Item = Sample;

    fn len(&self) -> usize {
        self.y.len()
    }

    fn get(&self, index: usize) -> Sample {
        let row = self.x.row(index);
        Sample {
            x: Tensor::new(row.to_vec(), vec![row.len()]),
            y: Tensor::new(vec![self.y[index]], vec![1]),
        }
    }
}

/// Opens `dir/name.gz` when present, else `dir/name`.
fn open_maybe_gz(dir: &Path, name: &str) -> Result<(PathBuf, Box<dyn BufRead>)> {
    let gz = dir.join(format!("{}.gz", name));
    if gz.is_file() {
        let reader: Box<dyn Read> = Box::new(GzDecoder::new(File::open(&gz)?));
        return Ok((gz, Box::new(BufReader::new(reader))));
    }
    let plain = dir.join(name);
    let file = File::open(&plain)?;
    Ok((plain, Box::new(BufReader::new(file))))
}

/// Parses whitespace separated numbers, one row per non-empty line.
fn read_whitespace_rows(path: &Path, reader: Box<dyn BufRead>) -> Result<Vec<Vec<f32>>> {
    let mut rows = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|v| v.parse::<f32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| StudyError::malformed(path, i + 1, e.to_string()))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Centres every column and scales it to unit L2 norm.
fn scale_unit_norm(data: &mut [f32], n: usize, d: usize) {
    for c in 0..d {
        let mean = (0..n).map(|i| data[i * d + c] as f64).sum::<f64>() / n as f64;
        let var = (0..n)
            .map(|i| (data[i * d + c] as f64 - mean).powi(2))
            .sum::<f64>()
            / n as f64;
        let std = var.sqrt();
        let denom = if std == 0.0 { 1.0 } else { std * (n as f64).sqrt() };
        for i in 0..n {
            data[i * d + c] = ((data[i * d + c] as f64 - mean) / denom) as f32;
        }
    }
}

/// Loads the diabetes regression set from `diabetes_data_raw.csv[.gz]` and
/// `diabetes_target.csv[.gz]` in `dir`. Features are mean-centred and scaled
/// to unit norm per column.
pub fn load_diabetes<P: AsRef<Path>>(dir: P) -> Result<Tabular> {
    let dir = dir.as_ref();
    let (data_path, data_reader) = open_maybe_gz(dir, "diabetes_data_raw.csv")?;
    let rows = read_whitespace_rows(&data_path, data_reader)?;
    let (target_path, target_reader) = open_maybe_gz(dir, "diabetes_target.csv")?;
    let targets = read_whitespace_rows(&target_path, target_reader)?;

    if rows.is_empty() {
        return Err(StudyError::EmptyDataset(data_path.display().to_string()));
    }
    let d = DIABETES_FEATURES.len();
    if let Some((i, _)) = rows.iter().enumerate().find(|(_, r)| r.len() != d) {
        return Err(StudyError::malformed(
            &data_path,
            i + 1,
            format!("expected {} columns", d),
        ));
    }
    let y: Vec<f32> = targets.into_iter().flatten().collect();
    if y.len() != rows.len() {
        return Err(StudyError::InvalidArgument(format!(
            "{} rows of features but {} targets",
            rows.len(),
            y.len()
        )));
    }

    let n = rows.len();
    let mut data: Vec<f32> = rows.into_iter().flatten().collect();
    scale_unit_norm(&mut data, n, d);
    debug!(samples = n, features = d, "loaded diabetes");

    Tabular::new(
        Tensor::new(data, vec![n, d]),
        y,
        DIABETES_FEATURES.iter().map(|s| s.to_string()).collect(),
    )
}

/// Loads the breast cancer set. The first record is the
/// `n_samples,n_features,class0,class1` header, every other record holds the
/// features followed by the integer target.
pub fn load_breast_cancer<P: AsRef<Path>>(path: P) -> Result<Tabular> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut records = reader.records();

    let header = records
        .next()
        .ok_or_else(|| StudyError::EmptyDataset(path.display().to_string()))??;
    let parse_count = |field: Option<&str>| -> Result<usize> {
        field
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| StudyError::malformed(path, 1, "header must start with n_samples,n_features"))
    };
    let n_samples = parse_count(header.get(0))?;
    let n_features = parse_count(header.get(1))?;
    if n_features != BREAST_CANCER_FEATURES.len() {
        return Err(StudyError::malformed(
            path,
            1,
            format!("expected {} features, header says {}", BREAST_CANCER_FEATURES.len(), n_features),
        ));
    }

    let mut data = Vec::with_capacity(n_samples * n_features);
    let mut y = Vec::with_capacity(n_samples);
    for (i, record) in records.enumerate() {
        let record = record?;
        let line = i + 2;
        if record.len() != n_features + 1 {
            return Err(StudyError::malformed(
                path,
                line,
                format!("expected {} fields, found {}", n_features + 1, record.len()),
            ));
        }
        for field in record.iter().take(n_features) {
            let v: f32 = field
                .parse()
                .map_err(|_| StudyError::malformed(path, line, format!("bad number {:?}", field)))?;
            data.push(v);
        }
        let target: u8 = record[n_features]
            .parse()
            .map_err(|_| StudyError::malformed(path, line, "target must be an integer"))?;
        y.push(target as f32);
    }

    if y.len() != n_samples {
        return Err(StudyError::InvalidArgument(format!(
            "header announces {} samples, file has {}",
            n_samples,
            y.len()
        )));
    }
    debug!(samples = n_samples, features = n_features, "loaded breast cancer");

    Tabular::new(
        Tensor::new(data, vec![n_samples, n_features]),
        y,
        BREAST_CANCER_FEATURES.iter().map(|s| s.to_string()).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn cancer_csv(rows: usize) -> String {
        let mut s = format!("{},30,malignant,benign\n", rows);
        for r in 0..rows {
            let feats: Vec<String> = (0..30).map(|c| format!("{}.5", r * 30 + c)).collect();
            s.push_str(&format!("{},{}\n", feats.join(","), r % 2));
        }
        s
    }

    #[test]
    fn breast_cancer_reads_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("breast_cancer.csv");
        std::fs::write(&path, cancer_csv(4)).unwrap();

        let data = load_breast_cancer(&path).unwrap();
        assert_eq!(data.x.shape, vec![4, 30]);
        assert_eq!(data.labels(), vec![0, 1, 0, 1]);
        assert_eq!(data.x.row(1)[2], 32.5);
        assert_eq!(data.feature_names[3], "mean area");

        let kept = data.select_columns(&[0, 2, 3]).unwrap();
        assert_eq!(kept.x.shape, vec![4, 3]);
        assert_eq!(kept.x.row(1), &[30.5, 32.5, 33.5]);
        assert_eq!(kept.feature_names, vec!["mean radius", "mean perimeter", "mean area"]);
    }

    #[test]
    fn breast_cancer_rejects_short_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("breast_cancer.csv");
        let mut csv = cancer_csv(2);
        csv.push_str("1.0,2.0,1\n");
        std::fs::write(&path, csv.replacen("2,30", "3,30", 1)).unwrap();

        match load_breast_cancer(&path) {
            Err(StudyError::MalformedRow { line, .. }) => assert_eq!(line, 4),
            other => panic!("expected malformed row, got {:?}", other.map(|t| t.x.shape)),
        }
    }

    #[test]
    fn diabetes_is_centred_and_unit_norm() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw = String::new();
        let mut target = String::new();
        for r in 0..5 {
            let row: Vec<String> = (0..10).map(|c| format!("{}", (r * (c + 1)) as f32)).collect();
            raw.push_str(&row.join(" "));
            raw.push('\n');
            target.push_str(&format!("{}\n", 100 + r));
        }
        let mut enc = GzEncoder::new(
            File::create(dir.path().join("diabetes_data_raw.csv.gz")).unwrap(),
            Compression::default(),
        );
        enc.write_all(raw.as_bytes()).unwrap();
        enc.finish().unwrap();
        std::fs::write(dir.path().join("diabetes_target.csv"), target).unwrap();

        let data = load_diabetes(dir.path()).unwrap();
        assert_eq!(data.x.shape, vec![5, 10]);
        assert_eq!(data.y, vec![100.0, 101.0, 102.0, 103.0, 104.0]);
        for c in 0..10 {
            let col: Vec<f32> = (0..5).map(|i| data.x.row(i)[c]).collect();
            let sum: f32 = col.iter().sum();
            let norm: f32 = col.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!(sum.abs() < 1e-5);
            assert!((norm - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn dataset_rows_stack_into_batches() {
        let x = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![3, 2]);
        let ds = TabularDataset::new(x, vec![7.0, 8.0, 9.0]);
        let loader = crate::dataset::Dataloader::new(ds, 2, false);
        let first = loader.iter_batch().next().unwrap();
        assert_eq!(first.x.shape, vec![2, 2]);
        assert_eq!(first.y.shape, vec![2, 1]);
        assert_eq!(first.y.as_f32_slice(), &[7.0, 8.0]);
    }
}
