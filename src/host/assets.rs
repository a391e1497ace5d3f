//! Bundled-asset access and extraction.
//!
//! Assets are addressed by `/`-separated logical paths. A path names either
//! a file or a directory; extracting a directory copies its whole subtree.
//! Files ending in `.enc` are run through an [`AssetCipher`] when one is
//! supplied and written without the suffix.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use openssl::symm::{Cipher, Crypter, Mode};

use crate::error::{OverlayError, Result};

/// Suffix marking an individually encrypted asset.
pub const ENCRYPTED_SUFFIX: &str = ".enc";

/// Hierarchical read access to bundled files.
pub trait AssetSource: Send + Sync {
    /// Open a file asset for reading.
    fn open(&self, path: &str) -> io::Result<Box<dyn Read + Send>>;

    /// Names of the children of a directory asset; empty for files.
    fn list(&self, path: &str) -> io::Result<Vec<String>>;
}

/// Assets stored in a plain directory on disk.
#[derive(Debug, Clone)]
pub struct DirAssets {
    root: PathBuf,
}

impl DirAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let mut resolved = self.root.clone();
        for part in path.split('/').filter(|part| !part.is_empty()) {
            if part == ".." || part == "." {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("asset path must not contain '{part}': {path}"),
                ));
            }
            resolved.push(part);
        }
        Ok(resolved)
    }
}

impl AssetSource for DirAssets {
    fn open(&self, path: &str) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(self.resolve(path)?)?))
    }

    fn list(&self, path: &str) -> io::Result<Vec<String>> {
        let dir = self.resolve(path)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}

/// Caller-supplied stream decryption for `.enc` assets.
pub trait AssetCipher {
    fn decrypting_reader<'a>(
        &self,
        inner: Box<dyn Read + Send + 'a>,
    ) -> io::Result<Box<dyn Read + Send + 'a>>;
}

/// AES-128-CBC with PKCS#7 padding.
#[derive(Clone)]
pub struct AesCbcCipher {
    key: [u8; 16],
    iv: [u8; 16],
}

impl AesCbcCipher {
    pub fn new(key: [u8; 16], iv: [u8; 16]) -> Self {
        Self { key, iv }
    }
}

impl std::fmt::Debug for AesCbcCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesCbcCipher { .. }")
    }
}

impl AssetCipher for AesCbcCipher {
    fn decrypting_reader<'a>(
        &self,
        inner: Box<dyn Read + Send + 'a>,
    ) -> io::Result<Box<dyn Read + Send + 'a>> {
        let cipher = Cipher::aes_128_cbc();
        let crypter = Crypter::new(cipher, Mode::Decrypt, &self.key, Some(&self.iv))
            .map_err(io::Error::other)?;
        Ok(Box::new(CipherReader {
            inner,
            crypter,
            block_size: cipher.block_size(),
            pending: Vec::new(),
            finished: false,
        }))
    }
}

/// Decrypts `inner` chunk by chunk as it is read.
struct CipherReader<'a> {
    inner: Box<dyn Read + Send + 'a>,
    crypter: Crypter,
    block_size: usize,
    pending: Vec<u8>,
    finished: bool,
}

impl Read for CipherReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pending.is_empty() && !self.finished {
            let mut chunk = [0u8; 8192];
            let n = self.inner.read(&mut chunk)?;
            let mut out = vec![0u8; n + self.block_size];
            let result = if n == 0 {
                self.finished = true;
                self.crypter.finalize(&mut out)
            } else {
                self.crypter.update(&chunk[..n], &mut out)
            };
            let written = result.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            out.truncate(written);
            self.pending = out;
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

/// Extract `asset_path` (file or directory) to `dest`.
pub fn extract_asset(
    assets: &dyn AssetSource,
    asset_path: &str,
    dest: &Path,
    cipher: Option<&dyn AssetCipher>,
) -> Result<()> {
    let children = assets
        .list(asset_path)
        .map_err(|e| OverlayError::asset(asset_path, e))?;
    if children.is_empty() {
        return extract_file(assets, asset_path, dest, cipher);
    }

    fs::create_dir_all(dest)
        .map_err(|e| OverlayError::asset(asset_path, format!("creating {}: {e}", dest.display())))?;
    for child in children {
        let child_asset = format!("{}/{child}", asset_path.trim_end_matches('/'));
        extract_asset(assets, &child_asset, &dest.join(&child), cipher)?;
    }
    Ok(())
}

fn extract_file(
    assets: &dyn AssetSource,
    asset_path: &str,
    dest: &Path,
    cipher: Option<&dyn AssetCipher>,
) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            OverlayError::asset(asset_path, format!("creating {}: {e}", parent.display()))
        })?;
    }

    let encrypted = asset_path.ends_with(ENCRYPTED_SUFFIX);
    let dest = match dest.to_str().and_then(|d| d.strip_suffix(ENCRYPTED_SUFFIX)) {
        Some(stripped) if encrypted => PathBuf::from(stripped),
        _ => dest.to_path_buf(),
    };

    let source = assets
        .open(asset_path)
        .map_err(|e| OverlayError::asset(asset_path, e))?;
    let mut reader = match cipher {
        Some(cipher) if encrypted => cipher
            .decrypting_reader(source)
            .map_err(|e| OverlayError::asset(asset_path, e))?,
        _ => source,
    };

    let file = File::create(&dest)
        .map_err(|e| OverlayError::asset(asset_path, format!("creating {}: {e}", dest.display())))?;
    let mut writer = BufWriter::new(file);
    io::copy(&mut reader, &mut writer)
        .and_then(|_| writer.flush())
        .map_err(|e| OverlayError::asset(asset_path, e))?;
    Ok(())
}

/// Read a text asset into a string, normalising every line to end in `\n`.
pub fn read_text_asset(assets: &dyn AssetSource, asset_path: &str) -> Result<String> {
    let mut raw = String::new();
    assets
        .open(asset_path)
        .and_then(|mut reader| reader.read_to_string(&mut raw))
        .map_err(|e| OverlayError::asset(asset_path, e))?;
    Ok(raw.lines().map(|line| format!("{line}\n")).collect())
}
