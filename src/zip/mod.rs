mod archive;
mod entry;
mod file;
mod parser;
mod structures;

pub use archive::ZipArchive;
pub use entry::ZipEntry;
pub use file::ZipFileReader;
pub use structures::CompressionMethod;
