//! The JobPack container submitted to the master.
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! +--------------------+ 0
//! | header (128 bytes) |
//! +--------------------+ job_dict_offset (always 128)
//! | job dict (JSON)    |
//! +--------------------+ job_env_offset
//! | job env (JSON)     |
//! +--------------------+ job_home_offset
//! | job home (zip)     |
//! +--------------------+ job_data_offset
//! | job data           |
//! +--------------------+
//! ```

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::{Map, Value};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::home::WorkerPayload;
use crate::{Error, Params, Result};

pub const MAGIC: u32 = 0xd5c0 << 16;
pub const MAGIC_MASK: u32 = 0xffff << 16;

/// Format version of a map/reduce job.
pub const VERSION_1: u16 = 0x0001;

/// Format version of a pipeline job. Same number as [`VERSION_1`], the dict
/// flags tell the two apart.
pub const VERSION_2: u16 = 0x0001;

pub const HEADER_SIZE: usize = 128;

const RESERVED_WORDS: usize = 27;

/////////////////////////////////////////////////////////////////////////////
// Header
/////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u16,
    pub job_dict_offset: u32,
    pub job_env_offset: u32,
    pub job_home_offset: u32,
    pub job_data_offset: u32,
}

impl Header {
    /// Lay out offsets for segments of the given lengths, in the fixed order
    /// dict, env, home, data.
    pub fn for_segments(version: u16, dict_len: usize, env_len: usize, home_len: usize) -> Result<Self> {
        let offset = |len: usize| {
            u32::try_from(len).map_err(|_| Error::Encode(format!("jobpack segment offset {len} overflows u32")))
        };

        let dict = HEADER_SIZE;
        let env = dict + dict_len;
        let home = env + env_len;
        let data = home + home_len;

        Ok(Self {
            version,
            job_dict_offset: offset(dict)?,
            job_env_offset: offset(env)?,
            job_home_offset: offset(home)?,
            job_data_offset: offset(data)?,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(MAGIC | u32::from(self.version));
        buf.put_u32(self.job_dict_offset);
        buf.put_u32(self.job_env_offset);
        buf.put_u32(self.job_home_offset);
        buf.put_u32(self.job_data_offset);
        buf.put_bytes(0, RESERVED_WORDS * 4);
    }

    /// Parse and validate the first [`HEADER_SIZE`] bytes of `buf`.
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::decode(format!(
                "jobpack header needs {HEADER_SIZE} bytes, got {}",
                buf.len()
            )));
        }

        let magic_version = buf.get_u32();
        if magic_version & MAGIC_MASK != MAGIC {
            return Err(Error::decode(format!("bad jobpack magic {magic_version:#010x}")));
        }

        let header = Self {
            version: (magic_version & !MAGIC_MASK) as u16,
            job_dict_offset: buf.get_u32(),
            job_env_offset: buf.get_u32(),
            job_home_offset: buf.get_u32(),
            job_data_offset: buf.get_u32(),
        };

        if header.job_dict_offset as usize != HEADER_SIZE {
            return Err(Error::decode(format!(
                "job dict must start at {HEADER_SIZE}, header says {}",
                header.job_dict_offset
            )));
        }
        if header.job_env_offset < header.job_dict_offset
            || header.job_home_offset < header.job_env_offset
            || header.job_data_offset < header.job_home_offset
        {
            return Err(Error::decode(format!("jobpack offsets out of order: {header:?}")));
        }

        Ok(header)
    }

    pub fn dict_len(&self) -> usize {
        (self.job_env_offset - self.job_dict_offset) as usize
    }

    pub fn env_len(&self) -> usize {
        (self.job_home_offset - self.job_env_offset) as usize
    }

    pub fn home_len(&self) -> usize {
        (self.job_data_offset - self.job_home_offset) as usize
    }
}

/////////////////////////////////////////////////////////////////////////////
// JobPack
/////////////////////////////////////////////////////////////////////////////

/// A job description before encoding.
#[derive(Debug, Clone)]
pub struct JobPack {
    jobdict: Map<String, Value>,
    jobenv: Map<String, Value>,
    payload: WorkerPayload,
    version: u16,
}

impl JobPack {
    pub fn new(payload: WorkerPayload) -> Self {
        Self {
            jobdict: Map::new(),
            jobenv: Map::new(),
            payload,
            version: VERSION_1,
        }
    }

    pub fn with_version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    pub fn set_dict(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.jobdict.insert(key.into(), value.into());
    }

    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.jobenv.insert(key.into(), value.into());
    }

    /// Parameters handed to every user callback of the job.
    pub fn set_params(&mut self, params: Params) {
        self.jobdict.insert("params".into(), Value::Object(params));
    }

    pub fn jobdict(&self) -> &Map<String, Value> {
        &self.jobdict
    }

    pub fn jobenv(&self) -> &Map<String, Value> {
        &self.jobenv
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    /// Encode the pack into memory.
    pub fn encode(&self) -> Result<Bytes> {
        // Dict before env, the offsets depend on it.
        let dict = serde_json::to_vec(&self.jobdict)?;
        let env = serde_json::to_vec(&self.jobenv)?;
        let home = self.payload.archive()?;

        let header = Header::for_segments(self.version, dict.len(), env.len(), home.len())?;
        debug!("encoding jobpack {header:?}");

        let mut buf = BytesMut::with_capacity(header.job_data_offset as usize);
        header.encode(&mut buf);
        buf.put_slice(&dict);
        buf.put_slice(&env);
        buf.put_slice(&home);

        Ok(buf.freeze())
    }

    /// Encode the pack into a fresh temporary file and return its path.
    ///
    /// The file is left on disk; removing it is up to the caller.
    pub fn encode_to_file(&self) -> Result<PathBuf> {
        let encoded = self.encode()?;

        let mut file = tempfile::Builder::new().prefix("jobpack-").tempfile()?;
        file.write_all(&encoded)?;
        file.flush()?;
        let (_, path) = file.keep().map_err(|e| e.error)?;

        Ok(path)
    }
}

/// Every segment of an encoded pack.
#[derive(Debug, Clone)]
pub struct DecodedJobPack {
    pub header: Header,
    pub jobdict: Map<String, Value>,
    pub jobenv: Map<String, Value>,
    pub home: Bytes,
    pub data: Bytes,
}

/// Decode a complete pack.
pub fn decode(buf: Bytes) -> Result<DecodedJobPack> {
    let header = Header::decode(&buf)?;
    if buf.len() < header.job_data_offset as usize {
        return Err(Error::decode(format!(
            "jobpack truncated: data offset {} beyond {} bytes",
            header.job_data_offset,
            buf.len()
        )));
    }

    let segment = |from: u32, to: u32| buf.slice(from as usize..to as usize);
    let jobdict = serde_json::from_slice(&segment(header.job_dict_offset, header.job_env_offset))?;
    let jobenv = serde_json::from_slice(&segment(header.job_env_offset, header.job_home_offset))?;

    Ok(DecodedJobPack {
        header,
        jobdict,
        jobenv,
        home: segment(header.job_home_offset, header.job_data_offset),
        data: buf.slice(header.job_data_offset as usize..),
    })
}

/// Read only the job dict out of the pack at `path`.
pub async fn extract_job_dict(path: impl AsRef<Path>) -> Result<Map<String, Value>> {
    let path = path.as_ref();
    let mut file = File::open(path).await?;

    let mut header = [0u8; HEADER_SIZE];
    read_segment(&mut file, &mut header, "header").await?;
    let header = Header::decode(&header)?;

    let mut dict = vec![0u8; header.dict_len()];
    read_segment(&mut file, &mut dict, "job dict").await?;
    debug!("read {} byte job dict from {}", dict.len(), path.display());

    Ok(serde_json::from_slice(&dict)?)
}

async fn read_segment(file: &mut File, buf: &mut [u8], what: &str) -> Result<()> {
    match file.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            Err(Error::decode(format!("jobpack {what} truncated")))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample_pack() -> JobPack {
        let mut pack = JobPack::new(WorkerPayload::Archive(Bytes::from_static(b"PK-not-a-zip")));
        pack.set_dict("prefix", "wordcount");
        pack.set_dict("nr_reduces", 2);
        pack.set_dict("input", json!(["http://discoproject.org/media/text/chekhov.txt"]));
        pack.set_env("DSC_WORKLOAD", "wc");
        pack
    }

    #[test]
    fn offsets_follow_segment_lengths() {
        let pack = sample_pack();
        let encoded = pack.encode().unwrap();
        let header = Header::decode(&encoded).unwrap();

        let dict_len = serde_json::to_vec(pack.jobdict()).unwrap().len();
        let env_len = serde_json::to_vec(pack.jobenv()).unwrap().len();

        assert_eq!(header.job_dict_offset, 128);
        assert_eq!(header.dict_len(), dict_len);
        assert_eq!(header.env_len(), env_len);
        assert_eq!(header.home_len(), b"PK-not-a-zip".len());
        assert_eq!(header.job_data_offset as usize, encoded.len());
        assert_eq!(header.version, VERSION_1);
    }

    #[test]
    fn header_is_big_endian_with_zero_padding() {
        let encoded = sample_pack().encode().unwrap();
        assert_eq!(&encoded[..4], &[0xd5, 0xc0, 0x00, 0x01]);
        assert_eq!(&encoded[4..8], &[0, 0, 0, 128]);
        assert!(encoded[20..HEADER_SIZE].iter().all(|b| *b == 0));
    }

    #[test]
    fn dict_and_env_round_trip() {
        let pack = sample_pack();
        let decoded = decode(pack.encode().unwrap()).unwrap();

        assert_eq!(&decoded.jobdict, pack.jobdict());
        assert_eq!(&decoded.jobenv, pack.jobenv());
        assert_eq!(decoded.home, Bytes::from_static(b"PK-not-a-zip"));
        assert!(decoded.data.is_empty());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut encoded = sample_pack().encode().unwrap().to_vec();
        encoded[0] = 0xff;
        assert!(matches!(Header::decode(&encoded), Err(Error::Decode(_))));
    }

    #[test]
    fn rejects_short_header() {
        assert!(matches!(Header::decode(&[0u8; 64]), Err(Error::Decode(_))));
    }

    #[test]
    fn rejects_offsets_out_of_order() {
        let mut buf = BytesMut::new();
        Header {
            version: VERSION_1,
            job_dict_offset: 128,
            job_env_offset: 200,
            job_home_offset: 150,
            job_data_offset: 300,
        }
        .encode(&mut buf);
        assert!(matches!(Header::decode(&buf), Err(Error::Decode(_))));
    }

    #[test]
    fn rejects_truncated_pack() {
        let encoded = sample_pack().encode().unwrap();
        let truncated = encoded.slice(..encoded.len() - 1);
        assert!(matches!(decode(truncated), Err(Error::Decode(_))));
    }

    #[tokio::test]
    async fn extracts_job_dict_from_file() {
        let pack = sample_pack();
        let path = pack.encode_to_file().unwrap();

        let dict = extract_job_dict(&path).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(&dict, pack.jobdict());
    }

    #[tokio::test]
    async fn truncated_job_dict_is_decode_error() {
        let encoded = sample_pack().encode().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobfile");
        std::fs::write(&path, &encoded[..HEADER_SIZE + 3]).unwrap();

        let err = extract_job_dict(&path).await.unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
