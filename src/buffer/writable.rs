use crate::error::SluiceError;

/// A byte container with `[start, end)` over a backing array, plus a reserved
/// headroom `[0, hlen)` available for handlers to prepend framing without copying
/// the payload.
///
/// # 设计背景（Why）
/// - 编码路径是由内向外组装的：payload 先写好，随后 ID parser、length prepender 等
///   handler 依次在其前面插入字段。若每层都拷贝一次 payload，热路径的分配/拷贝次数
///   会随 handler 数线性增长。headroom 把“向前追加”变成“在已分配区域内移动起点”。
///
/// # 契约说明（What）
/// - `write_header(p)` 要求 `len(p) ≤ start`，否则 [`SluiceError::NoHeadroom`]。
/// - `write_tail(p)` 按加倍策略扩容尾部（保留 `start` 不变）。
#[derive(Debug, Clone)]
pub struct WriteOnlyBuffer {
    hlen: usize,
    start: usize,
    end: usize,
    buf: Vec<u8>,
}

impl WriteOnlyBuffer {
    /// Creates a new buffer with `headroom` bytes of reserved, initially-unused header space.
    pub fn new(headroom: usize) -> Self {
        WriteOnlyBuffer {
            hlen: headroom,
            start: headroom,
            end: headroom,
            buf: vec![0u8; headroom],
        }
    }

    /// Wraps an existing payload with `headroom` bytes of header space prepended.
    pub fn with_bytes(headroom: usize, payload: &[u8]) -> Self {
        let mut buf = vec![0u8; headroom + payload.len()];
        buf[headroom..].copy_from_slice(payload);
        WriteOnlyBuffer {
            hlen: headroom,
            start: headroom,
            end: headroom + payload.len(),
            buf,
        }
    }

    /// `end - start`: the number of live (header+tail) bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrowed view of the live region `[start, end)`.
    pub fn bytes(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// Mutable borrowed view of the live region, for handlers that rewrite
    /// bytes in place (e.g. [`crate::middleware::rc4::Rc4Cipher`]'s XOR keystream).
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.start..self.end]
    }

    /// Prepends `p` into the reserved headroom, shrinking `start` by `p.len()`.
    pub fn write_header(&mut self, p: &[u8]) -> Result<(), SluiceError> {
        if p.len() > self.start {
            return Err(SluiceError::NoHeadroom {
                needed: p.len(),
                available: self.start,
            });
        }
        self.start -= p.len();
        self.buf[self.start..self.start + p.len()].copy_from_slice(p);
        Ok(())
    }

    /// Reserves `n` bytes of headroom and returns a mutable view for in-place filling.
    pub fn take_free_header(&mut self, n: usize) -> Result<&mut [u8], SluiceError> {
        if n > self.start {
            return Err(SluiceError::NoHeadroom {
                needed: n,
                available: self.start,
            });
        }
        self.start -= n;
        Ok(&mut self.buf[self.start..self.start + n])
    }

    /// Appends `p` to the tail, growing the buffer (double-and-add) as needed.
    pub fn write_tail(&mut self, p: &[u8]) -> Result<(), SluiceError> {
        let needed_end = self.end + p.len();
        if needed_end > self.buf.len() {
            self.grow(needed_end);
        }
        self.buf[self.end..self.end + p.len()].copy_from_slice(p);
        self.end += p.len();
        Ok(())
    }

    fn grow(&mut self, min_len: usize) {
        let new_cap = (self.buf.len() * 2 + p_margin(min_len)).max(min_len);
        let mut new_buf = vec![0u8; new_cap];
        new_buf[..self.end].copy_from_slice(&self.buf[..self.end]);
        self.buf = new_buf;
    }

    /// The writable suffix past `end`.
    pub fn free_tail(&mut self) -> &mut [u8] {
        let end = self.end;
        &mut self.buf[end..]
    }

    /// Restores `start = end = headroom`, retaining the backing allocation.
    pub fn reset(&mut self) {
        self.start = self.hlen;
        self.end = self.hlen;
    }
}

fn p_margin(min_len: usize) -> usize {
    min_len / 4 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_header_then_tail_round_trips() {
        let mut buf = WriteOnlyBuffer::new(4);
        buf.write_header(&[1, 2]).unwrap();
        buf.write_tail(&[9, 9, 9]).unwrap();
        assert_eq!(buf.bytes(), &[1, 2, 9, 9, 9]);
    }

    #[test]
    fn headroom_accounting_fails_when_exhausted() {
        let mut buf = WriteOnlyBuffer::new(2);
        buf.write_header(&[1]).unwrap();
        assert!(matches!(
            buf.write_header(&[2, 3]),
            Err(SluiceError::NoHeadroom { .. })
        ));
        buf.write_header(&[2]).unwrap();
        assert_eq!(buf.bytes(), &[2, 1]);
    }

    #[test]
    fn write_tail_grows_buffer() {
        let mut buf = WriteOnlyBuffer::new(0);
        let payload = vec![7u8; 4096];
        buf.write_tail(&payload).unwrap();
        assert_eq!(buf.len(), 4096);
        assert_eq!(buf.bytes(), payload.as_slice());
    }

    #[test]
    fn reset_restores_headroom_boundary() {
        let mut buf = WriteOnlyBuffer::new(3);
        buf.write_header(&[1, 2]).unwrap();
        buf.write_tail(&[3, 4]).unwrap();
        buf.reset();
        assert_eq!(buf.len(), 0);
        buf.write_header(&[9, 9, 9]).unwrap();
        assert_eq!(buf.bytes(), &[9, 9, 9]);
    }
}
