use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

pub mod state_dump;

pub fn resolve_path(config: &str, file: &str) -> PathBuf {
    let file_path = PathBuf::from(file);
    if file_path.is_absolute() || file_path.starts_with("./") {
        return file_path;
    }

    let config_path = PathBuf::from(config);
    if let Some(path) = config_path.parent() {
        path.join(file_path)
    } else {
        file_path
    }
}

pub fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "gz")
}

/// Extension of the file with an optional `.gz` suffix removed, e.g. `bin` for `world.bin.gz`.
pub fn inner_extension(path: &Path) -> Option<&str> {
    let path = if is_gzip(path) {
        Path::new(path.file_stem()?)
    } else {
        path
    };
    path.extension().and_then(|e| e.to_str())
}

/// Opens a file for reading and transparently decompresses it if it ends with `.gz`.
pub fn open_reader(path: &Path) -> std::io::Result<Box<dyn Read>> {
    let file = BufReader::new(File::open(path)?);
    if is_gzip(path) {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(file))
    }
}

/// Creates a file and its parent directories. Output to files ending with `.gz` is compressed.
pub fn create_writer(path: &Path) -> std::io::Result<Box<dyn Write>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = BufWriter::new(File::create(path)?);
    if is_gzip(path) {
        Ok(Box::new(GzEncoder::new(file, Compression::fast())))
    } else {
        Ok(Box::new(file))
    }
}
