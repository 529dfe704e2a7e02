use std::fs;
use std::io;
use std::io::prelude::*;
use std::path;

use thiserror::Error;

use crate::result::FitResult;
use crate::sample::{Sample, SampleError};

#[derive(Debug, Error)]
pub enum TextError {
    #[error("An IO error occurred: {0}")]
    Io(#[from] io::Error),
    #[error("Could not parse line {line}: {content:?}")]
    Parse { line: usize, content: String },
    #[error(transparent)]
    Sample(#[from] SampleError),
}

/// Read whitespace separated (angle, intensity) pairs, one per line.
///
/// Blank lines and lines starting with `#` are skipped. Extra columns are ignored.
pub fn read_xy<R: BufRead>(reader: R) -> Result<Sample, TextError> {
    let mut pairs = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let pref = line.trim();
        if pref.is_empty() || pref.starts_with('#') {
            continue;
        }
        let mut chunks = pref.split(|c: char| c.is_whitespace() || c == ',').filter(|s| !s.is_empty());
        let parse_err = || TextError::Parse {
            line: i + 1,
            content: line.clone(),
        };
        let x = chunks
            .next()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(parse_err)?;
        let y = chunks
            .next()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(parse_err)?;
        pairs.push((x, y));
    }
    Ok(Sample::from_pairs(pairs)?)
}

/// Read a two column pattern file, see [`read_xy`]
pub fn load_xy<P: AsRef<path::Path>>(path: P) -> Result<Sample, TextError> {
    let file = fs::File::open(path)?;
    read_xy(io::BufReader::new(file))
}

/// Write the angle, measured, fitted and residual columns of `result` as tab separated text
pub fn write_fit<W: Write>(result: &FitResult, writer: &mut W) -> io::Result<()> {
    writer.write_all(b"tth\tmeasured\tfitted\tresidual\n")?;
    let columns = result
        .tth()
        .iter()
        .zip(result.measured())
        .zip(result.fitted())
        .zip(result.residuals());
    for (((x, y), f), r) in columns {
        writer.write_all(format!("{}\t{}\t{}\t{}\n", x, y, f, r).as_bytes())?;
    }
    Ok(())
}

pub fn to_file<P: AsRef<path::Path>>(result: &FitResult, path: P) -> io::Result<()> {
    let file = fs::File::create(path)?;
    let mut writer = io::BufWriter::new(file);
    write_fit(result, &mut writer)?;
    writer.flush()
}
