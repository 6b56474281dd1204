//! Cache-routed block I/O.

use super::{BlockDev, BlockDevice};
use crate::error::{Error, ErrorKind, Result};
use alloc::vec;

impl<D: BlockDevice> BlockDev<D> {
    /// Reads one logical block into `buf`. Serves from the cache when
    /// present, otherwise reads the device and populates the cache.
    pub fn read_block(&mut self, lba: u64, buf: &mut [u8]) -> Result<usize> {
        let block_size = self.device().block_size();

        if buf.len() < block_size as usize {
            return Err(Error::new(ErrorKind::InvalidInput, "buffer too small for block"));
        }

        self.inc_read_count();

        let cache_miss = if let Some(cache) = &self.bcache {
            match cache.read_block(lba) {
                Ok(data) => {
                    buf[..data.len()].copy_from_slice(data);
                    return Ok(data.len());
                }
                Err(_) => true,
            }
        } else {
            false
        };

        if cache_miss {
            let pba = self.logical_to_physical(lba);
            let count = self.sectors_per_block();
            self.device_mut().read_blocks(pba, count, buf)?;

            if let Some(cache) = &mut self.bcache {
                let (cache_buf, _is_new) = match cache.alloc(lba) {
                    Ok(result) => result,
                    Err(e) if e.kind() == crate::error::ErrorKind::NoSpace => {
                        let flush_count = cache.capacity() / 4;
                        drop(cache);
                        log::info!("[read_block] cache full, flushing {} blocks", flush_count);
                        self.flush_some_dirty_blocks(flush_count)?;
                        self.bcache.as_mut().unwrap().alloc(lba)?
                    }
                    Err(e) => return Err(e),
                };
                cache_buf.data.copy_from_slice(&buf[..block_size as usize]);
                cache_buf.mark_uptodate();
                self.bcache.as_mut().unwrap().free(lba)?;
            }

            return Ok(block_size as usize);
        }

        let pba = self.logical_to_physical(lba);
        let count = self.sectors_per_block();
        self.device_mut().read_blocks(pba, count, buf)
    }

    /// Writes `buf` to one logical block. With a cache present, writes
    /// through to the cache and marks the block dirty; without one, writes
    /// straight to the device.
    pub fn write_block(&mut self, lba: u64, buf: &[u8]) -> Result<usize> {
        let block_size = self.device().block_size();

        if buf.len() < block_size as usize {
            return Err(Error::new(ErrorKind::InvalidInput, "buffer too small for block"));
        }

        self.inc_write_count();

        if let Some(cache) = &mut self.bcache {
            match cache.write_block(lba, buf) {
                Ok(n) => return Ok(n),
                Err(_) => {
                    let (cache_buf, _is_new) = match cache.alloc(lba) {
                        Ok(result) => result,
                        Err(e) if e.kind() == crate::error::ErrorKind::NoSpace => {
                            let flush_count = cache.capacity() / 4;
                            drop(cache);
                            log::info!("[write_block] cache full, flushing {} blocks", flush_count);
                            self.flush_some_dirty_blocks(flush_count)?;
                            let cache = self.bcache.as_mut().unwrap();
                            cache.alloc(lba)?
                        }
                        Err(e) => return Err(e),
                    };
                    cache_buf.data[..buf.len()].copy_from_slice(buf);
                    cache_buf.mark_uptodate();
                    cache_buf.mark_dirty();

                    let cache = self.bcache.as_mut().unwrap();
                    cache.mark_dirty(lba)?;
                    cache.free(lba)?;

                    return Ok(buf.len());
                }
            }
        }

        let pba = self.logical_to_physical(lba);
        let count = self.sectors_per_block();
        self.device_mut().write_blocks(pba, count, buf)
    }

    /// Reads from an arbitrary byte offset, spanning block boundaries as
    /// needed.
    pub fn read_bytes(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let len = buf.len();
        let block_size = self.device().block_size() as u64;

        let start_block = offset / block_size;
        let block_offset = (offset % block_size) as usize;

        let total_size = block_offset + len;
        let block_count = ((total_size as u64 + block_size - 1) / block_size) as usize;

        let mut temp = vec![0u8; block_count * block_size as usize];

        for i in 0..block_count {
            let lba = start_block + i as u64;
            let block_buf = &mut temp[i * block_size as usize..(i + 1) * block_size as usize];
            self.read_block(lba, block_buf)?;
        }

        buf.copy_from_slice(&temp[block_offset..block_offset + len]);

        Ok(len)
    }

    /// Writes to an arbitrary byte offset, spanning block boundaries as
    /// needed.
    pub fn write_bytes(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
        let len = buf.len();
        let block_size = self.device().block_size() as u64;

        let start_block = offset / block_size;
        let block_offset = (offset % block_size) as usize;

        let total_size = block_offset + len;
        let block_count = ((total_size as u64 + block_size - 1) / block_size) as usize;

        let mut temp = vec![0u8; block_count * block_size as usize];

        if block_offset != 0 || len % block_size as usize != 0 {
            for i in 0..block_count {
                let lba = start_block + i as u64;
                let block_buf = &mut temp[i * block_size as usize..(i + 1) * block_size as usize];
                let _ = self.read_block(lba, block_buf);
            }
        }

        temp[block_offset..block_offset + len].copy_from_slice(buf);

        for i in 0..block_count {
            let lba = start_block + i as u64;
            let block_buf = &temp[i * block_size as usize..(i + 1) * block_size as usize];
            self.write_block(lba, block_buf)?;
        }

        Ok(len)
    }

    /// Flushes every dirty cached block to the device, then flushes the
    /// device itself (e.g. `fsync`).
    pub fn flush(&mut self) -> Result<()> {
        let sector_size = self.device().sector_size();
        let partition_offset = self.partition_offset();

        if let Some(cache) = &mut self.bcache {
            let flushed = cache.flush_all(&mut self.device, sector_size, partition_offset)?;
            if flushed > 0 {
                log::debug!("[BlockDev] flushed {} dirty blocks", flushed);
            }
        }

        self.device_mut().flush()
    }
}
