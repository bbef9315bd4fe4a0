//! Line-oriented program output shared between threads
//!
//! Event callbacks run on the dispatcher thread while the main thread prints
//! its own progress, so every message is written as one block under a lock.

use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct Console {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Console {
    pub fn new<W: Write + Send + 'static>(out: W) -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(out))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    /// Write `text` followed by a newline
    pub fn print(&self, text: &str) {
        let mut out = self.out.lock();
        if let Err(e) = writeln!(out, "{}", text).and_then(|_| out.flush()) {
            debug!(error = %e, "Console write failed");
        }
    }
}

/// In-memory sink for tests
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct Captured(Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl Captured {
    pub(crate) fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

#[cfg(test)]
impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_are_whole() {
        let captured = Captured::default();
        let console = Console::new(captured.clone());
        let threads: Vec<_> = (0..4)
            .map(|i| {
                let console = console.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        console.print(&format!("first {i}\nsecond {i}"));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let text = captured.text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 400);
        for pair in lines.chunks(2) {
            let tag = pair[0].trim_start_matches("first ");
            assert_eq!(pair[1], format!("second {tag}"));
        }
    }
}
