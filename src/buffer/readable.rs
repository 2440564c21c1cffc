use crate::error::SluiceError;

use super::DEFAULT_CAPACITY;

/// A byte container with an internal `[off, end)` sliding window over a backing array.
///
/// # 设计背景（Why）
/// - 读循环反复调用 `RawConn::read` 把字节追加到同一块缓冲，再多次 `fire_read` 消费其中
///   的若干帧；`off`/`end` 两个指针让“已消费前缀”和“尚未消费后缀”共享同一块内存，无需
///   每次解帧都拷贝剩余字节。
///
/// # 契约说明（What）
/// - 不变式：`0 ≤ off ≤ end ≤ buf.capacity()`。
/// - `bytes()`、`seek()`、`free_bytes()` 返回的切片仅在下一次可变调用之前有效；这里由
///   Rust 借用检查器在编译期强制。
#[derive(Debug, Clone)]
pub struct ReadOnlyBuffer {
    buf: Vec<u8>,
    off: usize,
    end: usize,
}

impl ReadOnlyBuffer {
    /// Creates a new buffer with at least `capacity` bytes of backing storage.
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_CAPACITY
        } else {
            capacity
        };
        ReadOnlyBuffer {
            buf: vec![0u8; capacity],
            off: 0,
            end: 0,
        }
    }

    /// Wraps an already-populated byte vector as a fully unread buffer.
    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        let end = bytes.len();
        ReadOnlyBuffer {
            buf: bytes,
            off: 0,
            end,
        }
    }

    /// The number of unread bytes, `end - off`.
    pub fn len(&self) -> usize {
        self.end - self.off
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrowed view of the unread portion `[off, end)`.
    pub fn bytes(&self) -> &[u8] {
        &self.buf[self.off..self.end]
    }

    /// Mutable borrowed view of the unread portion, for handlers that rewrite
    /// bytes in place (e.g. [`crate::middleware::rc4::Rc4Cipher`]'s XOR keystream).
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.off..self.end]
    }

    /// Reads `n` bytes starting `rel_off` bytes past the current read cursor,
    /// advancing the cursor past the consumed prefix (`rel_off + n` bytes total).
    pub fn read(&mut self, rel_off: usize, n: usize) -> Result<Vec<u8>, SluiceError> {
        if rel_off + n > self.len() {
            return Err(SluiceError::NotEnoughData {
                needed: rel_off + n,
                available: self.len(),
            });
        }
        let start = self.off + rel_off;
        let out = self.buf[start..start + n].to_vec();
        self.off = start + n;
        Ok(out)
    }

    /// Peeks at `n` bytes without advancing the read cursor.
    pub fn seek(&self, n: usize) -> Result<&[u8], SluiceError> {
        if n > self.len() {
            return Err(SluiceError::NotEnoughData {
                needed: n,
                available: self.len(),
            });
        }
        Ok(&self.buf[self.off..self.off + n])
    }

    /// Advances the read cursor past `n` bytes without returning them.
    pub fn discard(&mut self, n: usize) -> Result<(), SluiceError> {
        if n > self.len() {
            return Err(SluiceError::NotEnoughData {
                needed: n,
                available: self.len(),
            });
        }
        self.off += n;
        Ok(())
    }

    /// The writable suffix `[end, capacity)`, growing (doubling, with compaction
    /// of the unread window to the front) if there is no free space at all.
    pub fn free_bytes(&mut self) -> &mut [u8] {
        if self.end == self.buf.len() {
            self.grow();
        }
        &mut self.buf[self.end..]
    }

    fn grow(&mut self) {
        let unread_len = self.len();
        let new_cap = (self.buf.len() * 2).max(DEFAULT_CAPACITY);
        let mut new_buf = vec![0u8; new_cap];
        new_buf[..unread_len].copy_from_slice(&self.buf[self.off..self.end]);
        self.buf = new_buf;
        self.end = unread_len;
        self.off = 0;
    }

    /// Appends data via a single underlying read into the free suffix, advancing `end`.
    pub fn read_from<R: std::io::Read>(&mut self, reader: &mut R) -> Result<usize, SluiceError> {
        let free = self.free_bytes();
        let n = reader
            .read(free)
            .map_err(|e| SluiceError::transport("ReadOnlyBuffer::read_from", e))?;
        self.end += n;
        Ok(n)
    }

    /// Resets the window to empty, retaining the backing allocation.
    pub fn reset(&mut self) {
        self.off = 0;
        self.end = 0;
    }
}

#[cfg(test)]
impl ReadOnlyBuffer {
    /// Advances `end` by `n` past a manual fill of [`Self::free_bytes`], the same
    /// bookkeeping [`Self::read_from`] does after a real transport read. Exposed
    /// crate-wide under `#[cfg(test)]` for `RawConn` test doubles that populate
    /// the buffer directly rather than through an `io::Read`.
    pub(crate) fn commit_write_for_test(&mut self, n: usize) {
        self.end += n;
    }
}
