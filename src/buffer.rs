//! Result buffer for one query session.
//!
//! A single page of transport DMA memory carries the query text to the
//! controller and the result back. It is zeroed (not reallocated) between
//! the two phases and freed when the owner drops it.
//!
//! Exactly one byte is kept for the terminator, so a query may use at most
//! `capacity - 1` bytes.

use bytes::Bytes;

use crate::error::{CsqError, Result};
use crate::transport::{DmaBuffer, Transport};

/// Default buffer size (one page).
pub const RESULT_BUFFER_SIZE: usize = 0x1000;

/// Alignment requested from the transport.
pub const RESULT_BUFFER_ALIGN: usize = 0x1000;

/// Smallest usable buffer: one byte of text plus the terminator.
pub const MIN_BUFFER_SIZE: usize = 2;

/// Largest buffer a session will ask for (1 MiB).
pub const MAX_BUFFER_SIZE: usize = 1 << 20;

/// Longest query that fits a buffer of `capacity` bytes.
#[inline]
pub fn max_query_len(capacity: usize) -> usize {
    capacity.saturating_sub(1)
}

/// Reject a query that cannot be staged in a buffer of `capacity` bytes.
///
/// Runs before anything is allocated; queries are never truncated.
pub fn check_query_fits(query: &[u8], capacity: usize) -> Result<()> {
    if query.is_empty() {
        return Err(CsqError::EmptyQuery);
    }
    let max = max_query_len(capacity);
    if query.len() > max {
        return Err(CsqError::QueryTooLarge {
            len: query.len(),
            max,
        });
    }
    Ok(())
}

/// Validate a configured buffer size.
pub fn check_buffer_size(size: usize) -> Result<()> {
    if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&size) {
        return Err(CsqError::InvalidConfig(format!(
            "buffer size {} outside {}..={}",
            size, MIN_BUFFER_SIZE, MAX_BUFFER_SIZE
        )));
    }
    Ok(())
}

/// Exclusively owned DMA buffer, freed on drop.
pub struct ResultBuffer<'t, T: Transport> {
    transport: &'t T,
    buf: T::Buffer,
    released: bool,
}

impl<'t, T: Transport> ResultBuffer<'t, T> {
    /// Allocate a zeroed buffer of `size` bytes.
    pub fn alloc(transport: &'t T, size: usize) -> Result<Self> {
        check_buffer_size(size)?;
        let buf = transport
            .alloc_dma_buffer(size, RESULT_BUFFER_ALIGN)
            .map_err(|_| CsqError::BufferAllocation { size })?;
        let mut this = Self {
            transport,
            buf,
            released: false,
        };
        if this.buf.len() < size {
            return Err(CsqError::BufferAllocation { size });
        }
        this.zero();
        Ok(this)
    }

    /// Buffer size in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Clear the whole buffer.
    pub fn zero(&mut self) {
        self.buf.as_mut_slice().fill(0);
    }

    /// Zero the buffer and copy the query text into it.
    ///
    /// Returns the number of bytes staged.
    pub fn stage_query(&mut self, query: &[u8]) -> Result<usize> {
        check_query_fits(query, self.capacity())?;
        self.zero();
        self.buf.as_mut_slice()[..query.len()].copy_from_slice(query);
        Ok(query.len())
    }

    /// Contents as last written.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_slice()
    }

    /// Handle passed to the transport on submission.
    #[inline]
    pub fn dma_mut(&mut self) -> &mut T::Buffer {
        &mut self.buf
    }

    /// Terminate the result at `len` and copy it out.
    ///
    /// A `len` beyond the capacity is a protocol violation. When `len`
    /// equals the capacity there is no room for the terminator and the
    /// result is length-delimited only.
    pub fn take_result(&mut self, len: usize) -> Result<Bytes> {
        let cap = self.capacity();
        if len > cap {
            return Err(CsqError::Protocol(format!(
                "{} bytes reported transferred into a {} byte buffer",
                len, cap
            )));
        }
        let data = self.buf.as_mut_slice();
        if len < cap {
            data[len] = 0;
        }
        Ok(Bytes::copy_from_slice(&data[..len]))
    }

    /// Free the buffer now.
    pub fn release(mut self) {
        self.free();
    }

    fn free(&mut self) {
        if !self.released {
            self.transport.free_dma_buffer(&mut self.buf);
            self.released = true;
        }
    }
}

impl<T: Transport> Drop for ResultBuffer<'_, T> {
    fn drop(&mut self) {
        self.free();
    }
}
