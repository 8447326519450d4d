use std::collections::VecDeque;

/// Byte buffer that keeps only the newest `cap` bytes.
#[derive(Debug)]
pub struct BoundedBuffer {
    cap: usize,
    buf: VecDeque<u8>,
    dropped: u64,
}

impl BoundedBuffer {
    pub fn new(cap: usize) -> Self {
        Self { cap: cap.max(1), buf: VecDeque::new(), dropped: 0 }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if chunk.len() >= self.cap {
            self.dropped += (self.buf.len() + chunk.len() - self.cap) as u64;
            self.buf.clear();
            self.buf.extend(&chunk[chunk.len() - self.cap..]);
            return;
        }
        let overflow = (self.buf.len() + chunk.len()).saturating_sub(self.cap);
        if overflow > 0 {
            self.buf.drain(..overflow);
            self.dropped += overflow as u64;
        }
        self.buf.extend(chunk);
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Text plus the number of bytes dropped from the front.
    pub fn finish(self) -> (String, u64) {
        let (head, tail) = self.buf.as_slices();
        let mut bytes = Vec::with_capacity(head.len() + tail.len());
        bytes.extend_from_slice(head);
        bytes.extend_from_slice(tail);
        let text = String::from_utf8_lossy(&bytes);
        if self.dropped == 0 {
            return (text.into_owned(), 0);
        }
        (format!("[... truncated {} bytes ...]\n{}", self.dropped, text), self.dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_under_cap_is_untouched() {
        let mut buf = BoundedBuffer::new(16);
        buf.push(b"hello ");
        buf.push(b"world");
        assert_eq!(buf.finish(), ("hello world".to_string(), 0));
    }

    #[test]
    fn test_oldest_bytes_dropped_with_marker() {
        let mut buf = BoundedBuffer::new(8);
        buf.push(b"0123456789");
        buf.push(b"ab");
        assert_eq!(buf.len(), 8);
        assert_eq!(buf.dropped(), 4);
        let (text, dropped) = buf.finish();
        assert_eq!(dropped, 4);
        assert_eq!(text, "[... truncated 4 bytes ...]\n456789ab");
    }

    #[test]
    fn test_incremental_overflow() {
        let mut buf = BoundedBuffer::new(4);
        for chunk in [b"ab".as_slice(), b"cd", b"ef"] {
            buf.push(chunk);
        }
        let (text, dropped) = buf.finish();
        assert_eq!(dropped, 2);
        assert!(text.ends_with("cdef"));
    }
}
