//! Resumable, hash-verified asset retrieval.
//!
//! Model weights are large and connections drop, so fetches are idempotent
//! and resumable:
//!
//! 1. A destination that already verifies against the expected hash (or the
//!    recorded hash from a previous verified fetch) is skipped outright —
//!    no network traffic at all.
//! 2. A partial file on a range-capable server is resumed with a byte-range
//!    request; the digest is carried across the local prefix and the
//!    appended remainder.
//! 3. Resume falls back to a full re-download when the server lacks range
//!    support or the partial file is larger than the advertised length.
//! 4. A final digest mismatch against an explicitly expected hash fails the
//!    fetch and records nothing in the success store.

pub mod store;

pub use store::AssetHashStore;

use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, RANGE};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{MutavoxError, Result};

const IO_CHUNK: usize = 1024 * 1024;

/// One asset to retrieve.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub dest: PathBuf,
    /// Expected hex SHA-256 of the complete file. `None` means "trust the
    /// store": only a previously recorded digest can short-circuit the fetch.
    pub expected_hash: Option<String>,
}

/// How a fetch completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Destination already verified; no transfer performed.
    AlreadyVerified,
    /// Full download from byte zero.
    Downloaded { bytes: u64 },
    /// Partial file extended via a range request.
    Resumed { bytes: u64 },
}

/// Blocking asset fetcher owning its HTTP client and hash store.
pub struct AssetFetcher {
    client: Client,
    store: AssetHashStore,
}

impl AssetFetcher {
    pub fn new(store: AssetHashStore) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| MutavoxError::Download(e.to_string()))?;
        Ok(Self { client, store })
    }

    /// Retrieve `request.url` into `request.dest` per the module contract.
    pub fn fetch(&self, request: &FetchRequest) -> Result<FetchOutcome> {
        if let Some(parent) = request.dest.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let offset = fs::metadata(&request.dest).ok().map(|m| m.len());

        // Digest whatever is already on disk; the hasher keeps that state so
        // a resumed download continues the same digest over appended bytes.
        let mut hasher = Sha256::new();
        if offset.is_some() {
            let mut file = fs::File::open(&request.dest)?;
            let mut buf = vec![0u8; IO_CHUNK];
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            let local_digest = hex_digest(hasher.clone().finalize().as_slice());

            match &request.expected_hash {
                Some(expected) if *expected == local_digest => {
                    info!(dest = %request.dest.display(), "verified existing file");
                    return Ok(FetchOutcome::AlreadyVerified);
                }
                Some(_) => {}
                None => {
                    if self.store.recorded_hash(&request.dest).as_deref()
                        == Some(local_digest.as_str())
                    {
                        info!(dest = %request.dest.display(), "verified existing file");
                        return Ok(FetchOutcome::AlreadyVerified);
                    }
                }
            }
        }

        let head = self
            .client
            .head(&request.url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| MutavoxError::Download(e.to_string()))?;
        let content_length = header_u64(&head, CONTENT_LENGTH)
            .ok_or_else(|| MutavoxError::Download("server reported no content-length".into()))?;
        let range_support = head
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "bytes")
            .unwrap_or(false);

        // The file is already complete — it only needs verification.
        if offset == Some(content_length) {
            let digest = hex_digest(hasher.finalize().as_slice());
            if let Some(expected) = &request.expected_hash {
                if *expected != digest {
                    return Err(MutavoxError::DownloadVerification {
                        path: request.dest.clone(),
                        actual: digest,
                        expected: expected.clone(),
                    });
                }
            }
            self.store.record(&request.dest, &digest)?;
            return Ok(FetchOutcome::AlreadyVerified);
        }

        // Resume only an incomplete prefix; an oversized partial file means
        // something went wrong locally and forces a clean re-download.
        let resume = matches!(offset, Some(o) if range_support && o < content_length);

        let get = if resume {
            let from = offset.unwrap_or(0);
            debug!(dest = %request.dest.display(), from, "resuming download");
            self.client
                .get(&request.url)
                .header(RANGE, format!("bytes={from}-"))
        } else {
            // Discard any digested prefix — the transfer restarts at zero.
            hasher = Sha256::new();
            self.client.get(&request.url)
        };
        let mut response = get
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| MutavoxError::Download(e.to_string()))?;

        let mut file = if resume {
            OpenOptions::new().append(true).open(&request.dest)?
        } else {
            fs::File::create(&request.dest)?
        };
        let mut buf = vec![0u8; IO_CHUNK];
        let mut transferred = 0u64;
        loop {
            let n = response
                .read(&mut buf)
                .map_err(|e| MutavoxError::Download(e.to_string()))?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])?;
            hasher.update(&buf[..n]);
            transferred += n as u64;
        }
        file.flush()?;

        let digest = hex_digest(hasher.finalize().as_slice());
        if let Some(expected) = &request.expected_hash {
            if *expected != digest {
                return Err(MutavoxError::DownloadVerification {
                    path: request.dest.clone(),
                    actual: digest,
                    expected: expected.clone(),
                });
            }
            self.store.record(&request.dest, &digest)?;
        }

        info!(
            dest = %request.dest.display(),
            bytes = transferred,
            resumed = resume,
            "download complete"
        );
        Ok(if resume {
            FetchOutcome::Resumed { bytes: transferred }
        } else {
            FetchOutcome::Downloaded { bytes: transferred }
        })
    }
}

fn header_u64(response: &reqwest::blocking::Response, name: reqwest::header::HeaderName) -> Option<u64> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Lowercase hex encoding of a digest.
pub fn hex_digest(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_digest_is_lowercase_and_padded() {
        assert_eq!(hex_digest(&[0x00, 0x0f, 0xa0, 0xff]), "000fa0ff");
    }
}
