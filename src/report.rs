//! Machine-readable sweep output.

use crate::Error;
use crate::sweep::SweepPoint;
use std::io::Write;

/// Receives each sweep point as soon as it is measured.
pub trait Reporter {
    fn row(&mut self, point: &SweepPoint) -> Result<(), Error>;
}

/// Header of the CSV stream.
pub const CSV_HEADER: &str = "stride,arr_size,result,increase";

/// Writes `stride,arr_size,result,increase` rows, flushing after each one so partial progress
/// survives an aborted run.
#[derive(Debug)]
pub struct CsvReporter<W: Write> {
    out: W,
    header_written: bool,
}

impl<W: Write> CsvReporter<W> {
    pub fn new(out: W) -> Self {
        CsvReporter {
            out,
            header_written: false,
        }
    }

    /// Writes the header unless it already went out.
    pub fn header(&mut self) -> Result<(), Error> {
        if !self.header_written {
            writeln!(self.out, "{}", CSV_HEADER)?;
            self.header_written = true;
        }
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Reporter for CsvReporter<W> {
    fn row(&mut self, point: &SweepPoint) -> Result<(), Error> {
        self.header()?;
        writeln!(
            self.out,
            "{},{},{},{}",
            point.spec.stride, point.spec.working_set, point.latency, point.ratio
        )?;
        self.out.flush()?;
        Ok(())
    }
}
