/// Incremental splitter for the output of a process read in arbitrary chunks.
///
/// Owns the bytes of the line not terminated yet. Both `\n` and `\r` end a
/// line, empty lines are skipped.
#[derive(Debug, Default)]
pub struct LineScanner {
    partial: Vec<u8>,
}

impl LineScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the lines it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                if !self.partial.is_empty() {
                    lines.push(self.take());
                }
            } else {
                self.partial.push(byte);
            }
        }
        lines
    }

    /// Return what remains once the stream is closed
    pub fn finish(&mut self) -> Option<String> {
        (!self.partial.is_empty()).then(|| self.take())
    }

    fn take(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        line
    }
}
