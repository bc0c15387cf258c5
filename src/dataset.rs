//! On-disk dataset partitions.
//!
//! Datasets are split into numbered JSON files (`0000.json`, `0001.json`,
//! ...) of bounded size. Workers hold only a [`DataSetDir`] and stream one
//! partition at a time, so the full dataset never has to fit in memory.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One training example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub input: Vec<f32>,
    pub output: Vec<f32>,
}

impl Sample {
    #[must_use]
    pub fn new(input: Vec<f32>, output: Vec<f32>) -> Self {
        Self { input, output }
    }
}

/// Dataset errors.
#[derive(Debug, thiserror::Error)]
pub enum DataSetError {
    #[error("dataset I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed partition {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("dataset is empty")]
    Empty,
    #[error("partition size must be at least one sample")]
    ZeroPartition,
    #[error("sample {index} is {input}x{output}, expected {expected_input}x{expected_output}")]
    Shape {
        index: usize,
        input: usize,
        output: usize,
        expected_input: usize,
        expected_output: usize,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> DataSetError + '_ {
    move |source| DataSetError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn check_shape(samples: &[Sample], input: usize, output: usize, offset: usize) -> Result<(), DataSetError> {
    for (i, s) in samples.iter().enumerate() {
        if s.input.len() != input || s.output.len() != output {
            return Err(DataSetError::Shape {
                index: offset + i,
                input: s.input.len(),
                output: s.output.len(),
                expected_input: input,
                expected_output: output,
            });
        }
    }
    Ok(())
}

/// Write `samples` into `dir` as partitions of at most `per_file` samples.
///
/// Existing partition files in `dir` are overwritten; stale higher-numbered
/// partitions from an earlier, larger dataset are removed.
pub fn partition(
    samples: &[Sample],
    dir: impl AsRef<Path>,
    per_file: usize,
) -> Result<PathBuf, DataSetError> {
    let dir = dir.as_ref();
    let first = samples.first().ok_or(DataSetError::Empty)?;
    if per_file == 0 {
        return Err(DataSetError::ZeroPartition);
    }
    check_shape(samples, first.input.len(), first.output.len(), 0)?;

    fs::create_dir_all(dir).map_err(io_error(dir))?;
    for stale in partition_files(dir)? {
        fs::remove_file(&stale).map_err(io_error(&stale))?;
    }

    for (i, chunk) in samples.chunks(per_file).enumerate() {
        let path = dir.join(format!("{i:04}.json"));
        let file = File::create(&path).map_err(io_error(&path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, chunk).map_err(|source| DataSetError::Json {
            path: path.clone(),
            source,
        })?;
        writer.flush().map_err(io_error(&path))?;
    }

    log::debug!(
        "partitioned {} samples into {} files under {}",
        samples.len(),
        samples.len().div_ceil(per_file),
        dir.display()
    );
    Ok(dir.to_path_buf())
}

fn partition_files(dir: &Path) -> Result<Vec<PathBuf>, DataSetError> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(io_error(dir))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension().is_some_and(|e| e == "json")
                && path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .is_some_and(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Handle to a partitioned dataset directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSetDir {
    dir: PathBuf,
    files: Vec<PathBuf>,
    input: usize,
    output: usize,
}

impl DataSetDir {
    /// Open a partitioned dataset, reading the first partition for its shape.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, DataSetError> {
        let dir = dir.as_ref().to_path_buf();
        let files = partition_files(&dir)?;
        let first = files.first().ok_or(DataSetError::Empty)?;
        let head = read_partition(first)?;
        let sample = head.first().ok_or(DataSetError::Empty)?;
        Ok(Self {
            input: sample.input.len(),
            output: sample.output.len(),
            dir,
            files,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Partition files, in order.
    #[must_use]
    pub fn partitions(&self) -> &[PathBuf] {
        &self.files
    }

    /// Input width.
    #[must_use]
    pub fn input_size(&self) -> usize {
        self.input
    }

    /// Output width.
    #[must_use]
    pub fn output_size(&self) -> usize {
        self.output
    }

    /// Load partition `index`, checking every sample's shape.
    pub fn load(&self, index: usize) -> Result<Vec<Sample>, DataSetError> {
        let Some(path) = self.files.get(index) else {
            return Ok(Vec::new());
        };
        let samples = read_partition(path)?;
        check_shape(&samples, self.input, self.output, 0)?;
        Ok(samples)
    }

    /// Stream every sample, one partition in memory at a time.
    ///
    /// Returns the number of samples visited.
    pub fn for_each_sample<F>(&self, mut f: F) -> Result<usize, DataSetError>
    where
        F: FnMut(&Sample),
    {
        let mut count = 0;
        for index in 0..self.files.len() {
            let samples = self.load(index)?;
            for sample in &samples {
                f(sample);
            }
            count += samples.len();
        }
        Ok(count)
    }
}

fn read_partition(path: &Path) -> Result<Vec<Sample>, DataSetError> {
    let file = File::open(path).map_err(io_error(path))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| DataSetError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| Sample::new(vec![i as f32, 1.0], vec![2.0 * i as f32]))
            .collect()
    }

    #[test]
    fn test_partition_and_stream() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = partition(&samples(10), tmp.path(), 4).unwrap();
        let data = DataSetDir::open(&dir).unwrap();
        assert_eq!(data.partitions().len(), 3);
        assert_eq!(data.input_size(), 2);
        assert_eq!(data.output_size(), 1);
        assert!(data.partitions()[0].ends_with("0000.json"));

        let mut seen = Vec::new();
        let count = data.for_each_sample(|s| seen.push(s.input[0])).unwrap();
        assert_eq!(count, 10);
        assert_eq!(seen, (0..10).map(|i| i as f32).collect::<Vec<_>>());
    }

    #[test]
    fn test_repartition_removes_stale_files() {
        let tmp = tempfile::tempdir().unwrap();
        partition(&samples(10), tmp.path(), 2).unwrap();
        partition(&samples(3), tmp.path(), 2).unwrap();
        let data = DataSetDir::open(tmp.path()).unwrap();
        assert_eq!(data.partitions().len(), 2);
    }

    #[test]
    fn test_rejects_empty_and_ragged() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            partition(&[], tmp.path(), 4),
            Err(DataSetError::Empty)
        ));
        let mut ragged = samples(3);
        ragged[2].input.push(0.0);
        assert!(matches!(
            partition(&ragged, tmp.path(), 4),
            Err(DataSetError::Shape { index: 2, .. })
        ));
        assert!(matches!(
            partition(&samples(3), tmp.path(), 0),
            Err(DataSetError::ZeroPartition)
        ));
    }

    #[test]
    fn test_open_empty_dir() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            DataSetDir::open(tmp.path()),
            Err(DataSetError::Empty)
        ));
    }
}
