//! Console endpoints for the standard descriptors.
//!
//! `read` on descriptor 0 drains the input queue; `write` on descriptor 1
//! appends to the output sink. Both paths bypass the file-system lock. The
//! embedder (or a test) feeds the input queue and inspects the output.

use crate::sync::SpinLock;
use alloc::collections::VecDeque;
use alloc::vec::Vec;

/// Keyboard input queue and display output sink.
pub struct Console {
    input: SpinLock<VecDeque<u8>>,
    output: SpinLock<Vec<u8>>,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    /// An empty console.
    pub fn new() -> Self {
        Console {
            input: SpinLock::new(VecDeque::new()),
            output: SpinLock::new(Vec::new()),
        }
    }

    /// Queues bytes as if typed on the keyboard.
    pub fn feed_input(&self, bytes: &[u8]) {
        self.input.lock().extend(bytes.iter().copied());
    }

    /// Reads up to `buf.len()` bytes from the input queue, returning the
    /// number of bytes delivered.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut input = self.input.lock();
        let mut n = 0;
        while n < buf.len() {
            match input.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    /// Appends bytes to the display sink.
    pub fn write(&self, bytes: &[u8]) {
        self.output.lock().extend_from_slice(bytes);
    }

    /// Everything written so far.
    pub fn take_output(&self) -> Vec<u8> {
        core::mem::take(&mut *self.output.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_drains_in_order() {
        let con = Console::new();
        con.feed_input(b"abc");
        let mut buf = [0u8; 2];
        assert_eq!(con.read(&mut buf), 2);
        assert_eq!(&buf, b"ab");
        assert_eq!(con.read(&mut buf), 1);
        assert_eq!(buf[0], b'c');
        assert_eq!(con.read(&mut buf), 0);
    }

    #[test]
    fn output_accumulates() {
        let con = Console::new();
        con.write(b"hello ");
        con.write(b"world");
        assert_eq!(con.take_output(), b"hello world");
    }
}
