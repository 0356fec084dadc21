use crate::backup::result_error::result::Result;
use flate2::write::GzEncoder;
use std::io::{Seek, Write};
use zip::ZipWriter;

/// Flushes trailing framing and hands back the wrapped writer.
pub trait Finish<O> {
    fn finish(self) -> Result<O>;
}

impl<W: Write> Finish<W> for GzEncoder<W> {
    fn finish(self) -> Result<W> {
        Ok(GzEncoder::finish(self)?)
    }
}

impl<W: Write> Finish<W> for tar::Builder<W> {
    /// Writes the two zero blocks that end a tar stream.
    fn finish(self) -> Result<W> {
        Ok(self.into_inner()?)
    }
}

impl<W: Write + Seek> Finish<W> for ZipWriter<W> {
    /// Writes the central directory.
    fn finish(self) -> Result<W> {
        Ok(ZipWriter::finish(self)?)
    }
}
