//! CSV sink for point records.

use crate::error::Result;
use crate::pipeline::PointRecord;
use std::fs::File;
use std::io::{BufWriter, Stdout, Write};
use std::path::Path;

/// Render a value like Python's float `repr`: whole floats keep one decimal
/// (`3.0`), very large or small magnitudes switch to exponent form (`1e-05`,
/// `1.5e+20`) and non-finite values are lowercase. Bands are read as f64, so
/// integer rasters print as `3.0` too.
fn format_number(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let magnitude = v.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let formatted = format!("{v:e}");
        return match formatted.split_once('e') {
            Some((mantissa, exp)) => {
                let (sign, digits) = match exp.strip_prefix('-') {
                    Some(digits) => ('-', digits),
                    None => ('+', exp),
                };
                format!("{mantissa}e{sign}{digits:0>2}")
            }
            None => formatted,
        };
    }

    let formatted = format!("{v}");
    if formatted.contains('.') {
        formatted
    } else {
        format!("{formatted}.0")
    }
}

/// Buffered `lon,lat,v1..vN` line writer.
pub struct PointWriter<W: Write> {
    out: BufWriter<W>,
    records: u64,
}

impl PointWriter<File> {
    /// Create `path` and write the `longitudes,latitudes,band1..bandN` header.
    pub fn create(path: &Path, band_count: usize) -> Result<Self> {
        let mut writer = Self::new(File::create(path)?);
        writer.write_header(band_count)?;
        Ok(writer)
    }
}

impl PointWriter<Stdout> {
    /// Headerless writer on stdout.
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> PointWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            out: BufWriter::new(inner),
            records: 0,
        }
    }

    pub fn write_header(&mut self, band_count: usize) -> Result<()> {
        write!(self.out, "longitudes,latitudes")?;
        for band in 1..=band_count {
            write!(self.out, ",band{band}")?;
        }
        writeln!(self.out)?;
        Ok(())
    }

    pub fn write_record(&mut self, record: &PointRecord) -> Result<()> {
        write!(
            self.out,
            "{},{}",
            format_number(record.lon),
            format_number(record.lat)
        )?;
        for value in &record.values {
            write!(self.out, ",{}", format_number(*value))?;
        }
        writeln!(self.out)?;
        self.records += 1;
        Ok(())
    }

    /// Records written so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Flush and hand back the underlying writer.
    pub fn finish(self) -> Result<W> {
        self.out
            .into_inner()
            .map_err(|e| crate::error::Error::Io(e.into_error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(lon: f64, lat: f64, values: &[f64]) -> PointRecord {
        PointRecord {
            lon,
            lat,
            values: values.to_vec(),
        }
    }

    #[test]
    fn test_number_format() {
        assert_eq!(format_number(3.0), "3.0");
        assert_eq!(format_number(-0.25), "-0.25");
        assert_eq!(format_number(0.0), "0.0");
        assert_eq!(format_number(0.0001), "0.0001");
        assert_eq!(format_number(123456.789), "123456.789");
        assert_eq!(format_number(1.5e20), "1.5e+20");
        assert_eq!(format_number(1e16), "1e+16");
        assert_eq!(format_number(1e-5), "1e-05");
        assert_eq!(format_number(-2.5e-7), "-2.5e-07");
        assert_eq!(format_number(1.2345e-300), "1.2345e-300");
        assert_eq!(format_number(f64::NAN), "nan");
        assert_eq!(format_number(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn test_lines_without_header() {
        let mut writer = PointWriter::new(Vec::new());
        writer.write_record(&record(10.5, -3.25, &[1.0, 2.5])).unwrap();
        writer.write_record(&record(0.0, 0.0, &[7.0, 8.0])).unwrap();
        assert_eq!(writer.records(), 2);

        let out = String::from_utf8(writer.finish().unwrap()).unwrap();
        assert_eq!(out, "10.5,-3.25,1.0,2.5\n0.0,0.0,7.0,8.0\n");
    }

    #[test]
    fn test_file_has_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("points.csv");

        let mut writer = PointWriter::create(&path, 3).unwrap();
        writer.write_record(&record(1.0, 2.0, &[3.0, 4.0, 5.0])).unwrap();
        writer.finish().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "longitudes,latitudes,band1,band2,band3\n1.0,2.0,3.0,4.0,5.0\n"
        );
    }

    #[test]
    fn test_create_in_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing/points.csv");
        assert!(matches!(
            PointWriter::create(&path, 1),
            Err(crate::error::Error::Io(_))
        ));
    }
}
