//! The bootstrap file: a framed, append-only dump of the main chain
//!
//! Layout, all integers little-endian via bincode's fixed-width
//! encoding:
//!
//! - bytes `0..4`: the magic number
//! - bytes `4..4 + header_size`: a fixed-size header region holding
//!   `[u32 len][file_info][u32 len][blocks_info]`, zero padded
//! - then one chunk per block: `[u32 chunk_size][serialized package]`
//!
//! A chunk larger than [`BUFFER_SIZE`] or of size zero is a format
//! error.

use std::io::{Read, Seek, SeekFrom, Write};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use common::{Block, Transaction};

/// Leading four bytes of every bootstrap file
pub const BLOCKCHAIN_RAW_MAGIC: u32 = 0x2872_1586;

/// Size of the zero-padded header region following the magic
pub const HEADER_SIZE: u32 = 1024;

/// Upper bound on a single chunk
pub const BUFFER_SIZE: u32 = 1_000_000;

/// Blocks serialized per chunk. Kept at one by convention; the format
/// would allow more
pub const NUM_BLOCKS_PER_CHUNK: u64 = 1;

/// Type alias for bootstrap operations that may result in an error
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for bootstrap file handling
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The underlying stream failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file does not begin with the bootstrap magic
    #[error("Bootstrap file not recognized: magic {0:#010x}")]
    WrongMagic(u32),

    /// A header or package failed to (de)serialize
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// The header region does not fit its declared size
    #[error("Header of {0} bytes exceeds the header region")]
    HeaderOverflow(u64),

    /// A chunk exceeds [`BUFFER_SIZE`]
    #[error("Chunk of {0} bytes exceeds the buffer size")]
    ChunkTooLarge(u32),

    /// A chunk has size zero
    #[error("Chunk has size zero")]
    EmptyChunk,

    /// The file ends in the middle of a chunk
    #[error("Unexpected end of file inside a chunk")]
    Truncated,
}

/// Version and layout information at the front of the header region
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct FileInfo {
    /// Format major version
    pub major_version: u8,
    /// Format minor version
    pub minor_version: u8,
    /// Size of the header region this file was written with
    pub header_size: u32,
}

impl Default for FileInfo {
    fn default() -> Self {
        FileInfo {
            major_version: 0,
            minor_version: 1,
            header_size: HEADER_SIZE,
        }
    }
}

/// Block span bookkeeping in the header region
#[derive(Clone, Default, Serialize, Deserialize, Debug, PartialEq)]
pub struct BlocksInfo {
    /// Height of the first block in the file
    pub block_first: u64,
    /// Height of the last block in the file
    pub block_last: u64,
    /// Stream position of the last block's chunk
    pub block_last_pos: u64,
}

/// One block as stored in a chunk: the block, its regular transactions
/// in order, and the chain bookkeeping needed for verification-free
/// import
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct BlockPackage {
    /// The block itself
    pub block: Block,
    /// Bodies of the block's non-coinbase transactions, in block order
    pub txs: Vec<Transaction>,
    /// Serialized size of the block including its transactions
    pub block_size: u64,
    /// Cumulative difficulty through this block
    pub cumulative_difficulty: u128,
    /// Coins emitted through this block
    pub coins_generated: u64,
}

/// Writes a bootstrap file to any byte sink
pub struct BootstrapWriter<W: Write> {
    writer: W,
    blocks_written: u64,
    max_chunk: u32,
}

impl<W: Write> BootstrapWriter<W> {
    /// Initializes a fresh bootstrap stream: magic plus the zero-padded
    /// header region
    pub fn create(mut writer: W) -> Result<Self> {
        writer.write_all(&bincode::serialize(&BLOCKCHAIN_RAW_MAGIC)?)?;

        let mut header = Vec::with_capacity(HEADER_SIZE as usize);
        let file_info = bincode::serialize(&FileInfo::default())?;
        header.extend_from_slice(&bincode::serialize(&(file_info.len() as u32))?);
        header.extend_from_slice(&file_info);
        let blocks_info = bincode::serialize(&BlocksInfo::default())?;
        header.extend_from_slice(&bincode::serialize(&(blocks_info.len() as u32))?);
        header.extend_from_slice(&blocks_info);

        if header.len() as u64 > u64::from(HEADER_SIZE) {
            return Err(Error::HeaderOverflow(header.len() as u64));
        }
        header.resize(HEADER_SIZE as usize, 0);
        writer.write_all(&header)?;

        Ok(BootstrapWriter {
            writer,
            blocks_written: 0,
            max_chunk: 0,
        })
    }

    /// Appends one block package as its own chunk
    pub fn write_block(&mut self, package: &BlockPackage) -> Result<()> {
        let blob = bincode::serialize(package)?;
        let chunk_size = blob.len() as u32;
        if chunk_size > BUFFER_SIZE {
            return Err(Error::ChunkTooLarge(chunk_size));
        }
        if chunk_size == 0 {
            return Err(Error::EmptyChunk);
        }
        if chunk_size > 100_000 {
            debug!(
                "Chunk of {} bytes at block {}",
                chunk_size, self.blocks_written
            );
        }

        self.writer.write_all(&bincode::serialize(&chunk_size)?)?;
        self.writer.write_all(&blob)?;
        self.blocks_written += 1;
        if chunk_size > self.max_chunk {
            self.max_chunk = chunk_size;
        }
        Ok(())
    }

    /// Number of blocks appended so far
    pub fn blocks_written(&self) -> u64 {
        self.blocks_written
    }

    /// Flushes and returns the underlying sink
    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        if self.blocks_written > 0 {
            info!(
                "Exported {} blocks, largest chunk {} bytes",
                self.blocks_written, self.max_chunk
            );
        }
        Ok(self.writer)
    }
}

/// Reads a bootstrap file from any seekable byte source
pub struct BootstrapReader<R: Read + Seek> {
    reader: R,
    file_info: FileInfo,
    full_header_size: u64,
    stream_len: u64,
}

impl<R: Read + Seek> BootstrapReader<R> {
    /// Validates the magic and header, leaving the cursor at the first
    /// chunk
    pub fn open(mut reader: R) -> Result<Self> {
        let stream_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let magic = read_u32(&mut reader)?;
        if magic != BLOCKCHAIN_RAW_MAGIC {
            return Err(Error::WrongMagic(magic));
        }

        let file_info_len = read_u32(&mut reader)?;
        if u64::from(file_info_len) > u64::from(HEADER_SIZE) {
            return Err(Error::HeaderOverflow(u64::from(file_info_len)));
        }
        let mut blob = vec![0; file_info_len as usize];
        reader.read_exact(&mut blob)?;
        let file_info: FileInfo = bincode::deserialize(&blob)?;
        debug!(
            "Bootstrap file v{}.{}, header size {}",
            file_info.major_version, file_info.minor_version, file_info.header_size
        );

        let full_header_size = 4 + u64::from(file_info.header_size);
        reader.seek(SeekFrom::Start(full_header_size))?;

        Ok(BootstrapReader {
            reader,
            file_info,
            full_header_size,
            stream_len,
        })
    }

    /// The file's version and layout header
    pub fn file_info(&self) -> &FileInfo {
        &self.file_info
    }

    /// Bytes occupied by the magic and the header region
    pub fn full_header_size(&self) -> u64 {
        self.full_header_size
    }

    /// Scans the whole file counting blocks, without deserializing them
    ///
    /// The cursor is left at the first chunk afterwards
    pub fn count_blocks(&mut self) -> Result<u64> {
        self.reader.seek(SeekFrom::Start(self.full_header_size))?;
        let mut count = 0;
        loop {
            match self.read_chunk_size()? {
                None => break,
                Some(chunk_size) => {
                    let position = self.reader.seek(SeekFrom::Current(i64::from(chunk_size)))?;
                    if position > self.stream_len {
                        warn!("Bootstrap file ends inside the chunk at block {}", count);
                        return Err(Error::Truncated);
                    }
                    count += NUM_BLOCKS_PER_CHUNK;
                }
            }
        }
        self.reader.seek(SeekFrom::Start(self.full_header_size))?;
        Ok(count)
    }

    /// Reads the next block package, or None at a clean end of file
    pub fn next_block(&mut self) -> Result<Option<BlockPackage>> {
        let chunk_size = match self.read_chunk_size()? {
            None => return Ok(None),
            Some(chunk_size) => chunk_size,
        };
        let mut blob = vec![0; chunk_size as usize];
        self.reader.read_exact(&mut blob).map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::Truncated
            } else {
                Error::Io(err)
            }
        })?;
        Ok(Some(bincode::deserialize(&blob)?))
    }

    fn read_chunk_size(&mut self) -> Result<Option<u32>> {
        let mut buf = [0; 4];
        match self.reader.read_exact(&mut buf) {
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(Error::Io(err)),
            Ok(()) => {}
        }
        let chunk_size: u32 = bincode::deserialize(&buf)?;
        if chunk_size > BUFFER_SIZE {
            return Err(Error::ChunkTooLarge(chunk_size));
        }
        if chunk_size == 0 {
            return Err(Error::EmptyChunk);
        }
        Ok(Some(chunk_size))
    }
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0; 4];
    reader.read_exact(&mut buf)?;
    Ok(bincode::deserialize(&buf)?)
}
