//! Blocking receive buffer fed by the outbound pump

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::TransferError;

#[derive(Default)]
struct BufferState {
    data: VecDeque<u8>,
    stopped: bool,
}

/// Bytes delivered from the child's output while a transfer owns the stream
///
/// Readers block until a full line is available, the buffer is stopped, or
/// the timeout elapses. Stopping wakes every blocked reader immediately.
#[derive(Default)]
pub struct ReceiveBuffer {
    state: Mutex<BufferState>,
    ready: Condvar,
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and wake readers
    pub fn push(&self, buf: &[u8]) {
        let mut state = self.state.lock();
        state.data.extend(buf);
        self.ready.notify_all();
    }

    /// Stop the buffer; pending and future reads fail with `Stopped`
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        self.ready.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Read one line, without its trailing `\n`
    pub fn read_line(&self, timeout: Duration) -> Result<Vec<u8>, TransferError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return Err(TransferError::Stopped);
            }
            if let Some(pos) = state.data.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = state.data.drain(..=pos).collect();
                line.pop();
                return Ok(line);
            }
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                return Err(TransferError::Timeout("line".to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_read_line_across_pushes() {
        let buffer = ReceiveBuffer::new();
        buffer.push(b"#CFG:ab");
        buffer.push(b"c\n#NUM:2\n");

        assert_eq!(buffer.read_line(Duration::from_millis(10)).unwrap(), b"#CFG:abc");
        assert_eq!(buffer.read_line(Duration::from_millis(10)).unwrap(), b"#NUM:2");
    }

    #[test]
    fn test_read_line_timeout() {
        let buffer = ReceiveBuffer::new();
        buffer.push(b"partial");
        let err = buffer.read_line(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, TransferError::Timeout(_)));
    }

    #[test]
    fn test_stop_wakes_blocked_reader() {
        let buffer = Arc::new(ReceiveBuffer::new());
        let reader = {
            let buffer = buffer.clone();
            thread::spawn(move || buffer.read_line(Duration::from_secs(30)))
        };

        thread::sleep(Duration::from_millis(20));
        buffer.stop();

        let result = reader.join().unwrap();
        assert!(matches!(result, Err(TransferError::Stopped)));
        assert!(buffer.is_stopped());
    }
}
