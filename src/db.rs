//! The files ledger records every file produced by a build, per variant of
//! the build parameters, so that cleaning removes exactly those.
//!
//! The on-disk format is a signature and version, followed by records each
//! prefixed by a little-endian u16 length.  A record whose length has the top
//! bit set names a variant (the hex sha256 of the parameters); the path
//! records that follow belong to it.  Every appended path is preceded by its
//! variant, so ledgers of several variants can append to the same file.

use crate::error::{Error, Result};
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

const SIGNATURE: &[u8] = b"kilnfiles";
const VERSION: u32 = 1;
const VARIANT_BIT: u16 = 0b1000_0000_0000_0000;

/// Directory under the build directory holding the ledger.
pub const LEDGER_DIR: &str = ".kiln";

enum Record {
    Variant(String),
    Path(String),
}

/// Identify a set of build parameters.
pub fn variant_of(params: &str) -> String {
    hex::encode(Sha256::digest(params.as_bytes()))
}

fn invalid(msg: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}

struct Reader<R: Read> {
    r: BufReader<R>,
}

impl<R: Read> Reader<R> {
    /// Returns None at a clean end of file.
    fn read_u16(&mut self) -> std::io::Result<Option<u16>> {
        let mut buf = [0u8; 2];
        match self.r.read_exact(&mut buf) {
            Ok(()) => Ok(Some(u16::from_le_bytes(buf))),
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn read_str(&mut self, len: usize) -> std::io::Result<String> {
        let mut buf = vec![0; len];
        self.r.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|err| invalid(err.to_string()))
    }

    fn read_header(&mut self) -> std::io::Result<()> {
        let mut signature = [0u8; SIGNATURE.len()];
        self.r.read_exact(&mut signature)?;
        if signature != SIGNATURE {
            return Err(invalid("invalid ledger signature".to_owned()));
        }
        let mut version = [0u8; 4];
        self.r.read_exact(&mut version)?;
        let version = u32::from_le_bytes(version);
        if version != VERSION {
            return Err(invalid(format!(
                "ledger version {} unsupported, want {}",
                version, VERSION
            )));
        }
        Ok(())
    }

    fn read_record(&mut self) -> std::io::Result<Option<Record>> {
        let len = match self.read_u16()? {
            None => return Ok(None),
            Some(len) => len,
        };
        if len & VARIANT_BIT != 0 {
            let variant = self.read_str((len & !VARIANT_BIT) as usize)?;
            Ok(Some(Record::Variant(variant)))
        } else {
            Ok(Some(Record::Path(self.read_str(len as usize)?)))
        }
    }
}

fn read_all(path: &Path) -> std::io::Result<Vec<Record>> {
    let mut r = Reader {
        r: BufReader::new(File::open(path)?),
    };
    r.read_header()?;
    let mut records = Vec::new();
    while let Some(record) = r.read_record()? {
        records.push(record);
    }
    Ok(records)
}

fn write_header(w: &mut impl Write) -> std::io::Result<()> {
    w.write_all(SIGNATURE)?;
    w.write_all(&VERSION.to_le_bytes())
}

fn write_record(w: &mut impl Write, text: &str, flag: u16) -> std::io::Result<()> {
    if text.is_empty() || text.len() >= VARIANT_BIT as usize {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("can't record {:?}: bad length", text),
        ));
    }
    let len = text.len() as u16 | flag;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(text.as_bytes())
}

/// The paths recorded for `variant`, each once, in recording order.
fn paths_of(records: &[Record], variant: &str) -> Vec<String> {
    let mut current: Option<&str> = None;
    let mut seen = FxHashSet::default();
    let mut paths = Vec::new();
    for record in records {
        match record {
            Record::Variant(v) => current = Some(v.as_str()),
            Record::Path(p) if current == Some(variant) => {
                if seen.insert(p.as_str()) {
                    paths.push(p.clone());
                }
            }
            Record::Path(_) => {}
        }
    }
    paths
}

/// The build directory the way recorded paths spell it: `.` components
/// dropped, so `.` itself becomes the empty path that relative paths start
/// with.
fn build_root(builddir: &Path) -> PathBuf {
    builddir
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Append-only record of produced files for one variant.
pub struct Ledger {
    /// The ledger file itself.
    path: PathBuf,
    /// The build directory; cleaning never removes it.
    root: PathBuf,
    variant: String,
    /// Paths already recorded for this variant.
    known: FxHashSet<String>,
    w: BufWriter<File>,
}

impl Ledger {
    /// Open (or create) the ledger under `builddir`, for the build variant
    /// described by `params`.
    pub fn open(builddir: impl AsRef<Path>, params: &str) -> Result<Ledger> {
        let root = build_root(builddir.as_ref());
        let dir = root.join(LEDGER_DIR);
        let path = dir.join("files");
        let io_err = |source| Error::Ledger {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(&dir).map_err(io_err)?;
        let variant = variant_of(params);

        let known = match read_all(&path) {
            Ok(records) => paths_of(&records, &variant).into_iter().collect(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let mut w = BufWriter::new(File::create(&path).map_err(io_err)?);
                write_header(&mut w).map_err(io_err)?;
                w.flush().map_err(io_err)?;
                FxHashSet::default()
            }
            Err(err) => return Err(io_err(err)),
        };
        let f = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(io_err)?;
        debug!(path = %path.display(), %variant, known = known.len(), "opened ledger");
        Ok(Ledger {
            path,
            root,
            variant,
            known,
            w: BufWriter::new(f),
        })
    }

    fn io_err(&self, source: std::io::Error) -> Error {
        Error::Ledger {
            path: self.path.clone(),
            source,
        }
    }

    pub fn variant(&self) -> &str {
        &self.variant
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn write_path(&mut self, path: &str) -> std::io::Result<()> {
        // Validate before writing anything, so a bad path leaves no stray
        // variant record behind.
        let mut buf = Vec::new();
        write_record(&mut buf, &self.variant, VARIANT_BIT)?;
        write_record(&mut buf, path, 0)?;
        self.w.write_all(&buf)?;
        self.w.flush()
    }

    /// Note that `path` was produced.  Recording a path twice is harmless.
    pub fn record(&mut self, path: &str) -> Result<()> {
        if self.known.contains(path) {
            return Ok(());
        }
        self.write_path(path).map_err(|err| self.io_err(err))?;
        self.known.insert(path.to_owned());
        Ok(())
    }

    pub fn record_many<I, S>(&mut self, paths: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for path in paths {
            self.record(path.as_ref())?;
        }
        Ok(())
    }

    /// All paths recorded for this variant, read afresh from disk.
    pub fn paths(&self) -> Result<Vec<String>> {
        let records = read_all(&self.path).map_err(|err| self.io_err(err))?;
        Ok(paths_of(&records, &self.variant))
    }

    /// Forget every path of this variant; other variants are kept.
    pub fn clear(&mut self) -> Result<()> {
        self.rewrite_without_variant()
            .map_err(|err| self.io_err(err))?;
        self.known.clear();
        Ok(())
    }

    fn rewrite_without_variant(&mut self) -> std::io::Result<()> {
        self.w.flush()?;
        let records = read_all(&self.path)?;
        let tmp = self.path.with_extension("tmp");
        {
            let mut w = BufWriter::new(File::create(&tmp)?);
            write_header(&mut w)?;
            let mut current: Option<&str> = None;
            let mut emitted: Option<&str> = None;
            for record in &records {
                match record {
                    Record::Variant(v) => current = Some(v.as_str()),
                    Record::Path(p) => {
                        let variant = match current {
                            Some(v) if v != self.variant => v,
                            _ => continue,
                        };
                        if emitted != Some(variant) {
                            write_record(&mut w, variant, VARIANT_BIT)?;
                            emitted = Some(variant);
                        }
                        write_record(&mut w, p, 0)?;
                    }
                }
            }
            w.flush()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        let f = std::fs::OpenOptions::new().append(true).open(&self.path)?;
        self.w = BufWriter::new(f);
        Ok(())
    }

    /// Whether `dir` lies strictly below the build directory.
    fn may_prune(&self, dir: &Path) -> bool {
        !dir.as_os_str().is_empty()
            && dir.is_absolute() == self.root.is_absolute()
            && dir != self.root
            && dir.starts_with(&self.root)
    }

    /// Remove the recorded files and any directories that become empty,
    /// stopping at the build directory, then forget the records.
    /// Returns the number of files removed.
    pub fn clean(&mut self) -> Result<usize> {
        let paths = self.paths()?;
        let removed: Vec<&Path> = paths
            .par_iter()
            .map(Path::new)
            .filter(|path| {
                // Dangling symlinks count, so they get removed too.
                if std::fs::symlink_metadata(path).is_err() {
                    return false;
                }
                match std::fs::remove_file(path) {
                    Ok(()) => true,
                    Err(err) => {
                        warn!("remove {}: {}", path.display(), err);
                        false
                    }
                }
            })
            .collect();

        let mut dirs: Vec<&Path> = removed.iter().filter_map(|p| p.parent()).collect();
        dirs.sort();
        dirs.dedup();
        // Deepest first, so children go before their parents.
        for dir in dirs.into_iter().rev() {
            let mut dir = dir;
            while self.may_prune(dir) {
                if std::fs::remove_dir(dir).is_err() {
                    // Not empty; whatever is above isn't either.
                    break;
                }
                dir = match dir.parent() {
                    Some(parent) => parent,
                    None => break,
                };
            }
        }

        let count = removed.len();
        self.clear()?;
        debug!(count, "cleaned");
        Ok(count)
    }
}
