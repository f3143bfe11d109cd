use std::{
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom},
    path::Path,
};

use aes::{
    cipher::{generic_array::GenericArray, BlockDecrypt, KeyInit},
    Aes256,
};
use md5::{Digest, Md5};

use crate::{envelope::WRAPPED_KEY_LEN, error::OtoResult};

pub const RECORD_SIZE: usize = 0x34;

const SALT_LEN: usize = 4;
const HEADER_LEN: usize = SALT_LEN + 1;
const RESERVED_LEN: usize = 15;
const KEY_LEN: usize = 32;

pub type ContentKey = [u8; WRAPPED_KEY_LEN];

/// Outcome of key recovery for one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKeyState {
    /// The container declared no envelope, the asset is not encrypted.
    Clear,
    Key(ContentKey),
}

impl ContentKeyState {
    pub fn key(&self) -> Option<&ContentKey> {
        match self {
            Self::Clear => None,
            Self::Key(key) => Some(key),
        }
    }

    /// Lowercase hex of the key, as external decryptors expect it.
    pub fn hex(&self) -> Option<String> {
        self.key().map(hex::encode)
    }
}

/// One fixed-width record of a key store.
///
/// The key of the final record may be shorter than 32 bytes when the store is
/// truncated. Such a record can still match a nonce, but never unwraps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    pub salt: [u8; SALT_LEN],
    pub checksum: u8,
    pub key: Vec<u8>,
}

impl KeyRecord {
    /// `MD5(salt ++ nonce)[0] == checksum`
    pub fn matches(&self, nonce: &str) -> bool {
        checksum_matches(&self.salt, self.checksum, nonce)
    }

    /// Decrypt the wrapped key with this record's AES-256 key in ECB mode.
    pub fn unwrap_key(&self, wrapped_key: &ContentKey) -> Option<ContentKey> {
        unwrap_key(&self.key, wrapped_key)
    }
}

fn checksum_matches(salt: &[u8], checksum: u8, nonce: &str) -> bool {
    let mut hasher = Md5::new();
    hasher.update(salt);
    hasher.update(nonce.as_bytes());
    hasher.finalize()[0] == checksum
}

fn unwrap_key(key: &[u8], wrapped_key: &ContentKey) -> Option<ContentKey> {
    let cipher = match Aes256::new_from_slice(key) {
        Ok(cipher) => cipher,
        Err(_) => {
            log::debug!("Skipping record with a {}-byte key", key.len());
            return None;
        }
    };

    let mut block = GenericArray::clone_from_slice(wrapped_key);
    cipher.decrypt_block(&mut block);

    let mut plain = [0u8; WRAPPED_KEY_LEN];
    plain.copy_from_slice(&block);
    Some(plain)
}

/// An in-memory table of key store records.
///
/// Loading the store once and querying it repeatedly avoids re-reading the
/// file for every asset resolved by the same process.
#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    records: Vec<KeyRecord>,
}

impl KeyStore {
    pub async fn open(path: impl AsRef<Path>) -> OtoResult<Self> {
        let data = tokio::fs::read(path.as_ref()).await?;
        let store = Self::from_bytes(&data);
        log::debug!(
            "Loaded {} records from key store {}",
            store.records.len(),
            path.as_ref().display()
        );
        Ok(store)
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        let records = data
            .chunks(RECORD_SIZE)
            .take_while(|chunk| chunk.len() >= HEADER_LEN)
            .map(|chunk| {
                let mut salt = [0u8; SALT_LEN];
                salt.copy_from_slice(&chunk[..SALT_LEN]);
                let key_start = (HEADER_LEN + RESERVED_LEN).min(chunk.len());
                let key_end = (key_start + KEY_LEN).min(chunk.len());
                KeyRecord {
                    salt,
                    checksum: chunk[SALT_LEN],
                    key: chunk[key_start..key_end].to_vec(),
                }
            })
            .collect();
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Recover the content key for `nonce`.
    ///
    /// Records are tried in file order; the first matching record whose key
    /// unwraps `wrapped_key` wins.
    pub fn find_key(&self, nonce: &str, wrapped_key: &ContentKey) -> Option<ContentKey> {
        self.records
            .iter()
            .filter(|record| record.matches(nonce))
            .find_map(|record| record.unwrap_key(wrapped_key))
    }
}

/// Scan a key store file once, without keeping it in memory.
pub fn scan_key_store(
    path: impl AsRef<Path>,
    nonce: &str,
    wrapped_key: &ContentKey,
) -> OtoResult<Option<ContentKey>> {
    let mut reader = BufReader::new(File::open(path)?);
    scan_records(&mut reader, nonce, wrapped_key)
}

pub fn scan_records<R>(
    reader: &mut R,
    nonce: &str,
    wrapped_key: &ContentKey,
) -> OtoResult<Option<ContentKey>>
where
    R: Read + Seek,
{
    let mut offset = 0u64;
    loop {
        reader.seek(SeekFrom::Start(offset))?;

        let mut header = [0u8; HEADER_LEN];
        if read_up_to(reader, &mut header)? < HEADER_LEN {
            return Ok(None);
        }

        if checksum_matches(&header[..SALT_LEN], header[SALT_LEN], nonce) {
            reader.seek(SeekFrom::Current(RESERVED_LEN as i64))?;
            let mut key = [0u8; KEY_LEN];
            let read = read_up_to(reader, &mut key)?;
            if let Some(plain) = unwrap_key(&key[..read], wrapped_key) {
                return Ok(Some(plain));
            }
        }

        offset += RECORD_SIZE as u64;
    }
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
