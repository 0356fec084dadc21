/// Anything that decides the extension of a file written to disk.
pub trait FileExtProvider {
    /// Extension without the leading dot, e.g. `tar.gz`.
    fn file_ext(&self) -> &'static str;

    /// Extension with the leading dot, ready to append to a base name.
    fn dotted_file_ext(&self) -> String {
        format!(".{}", self.file_ext())
    }
}
