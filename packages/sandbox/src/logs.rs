// ABOUTME: Bounded per-project log buffers fed by background process output
// ABOUTME: Ring buffer with generation tracking so stale output never leaks into a new deploy

use crate::providers::{OutputStream, StreamType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

/// Bytes of an unterminated line held before it is logged as-is
pub const MAX_PARTIAL_LINE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
    System,
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogStream::Stdout => write!(f, "stdout"),
            LogStream::Stderr => write!(f, "stderr"),
            LogStream::System => write!(f, "system"),
        }
    }
}

impl From<StreamType> for LogStream {
    fn from(stream: StreamType) -> Self {
        match stream {
            StreamType::Stdout => LogStream::Stdout,
            StreamType::Stderr => LogStream::Stderr,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub stream: LogStream,
    pub line: String,
    pub timestamp: DateTime<Utc>,
}

/// Fixed-capacity FIFO of output lines for one project
#[derive(Debug)]
pub struct LogBuffer {
    lines: VecDeque<LogLine>,
    capacity: usize,
    generation: u64,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
            generation: 0,
        }
    }

    pub fn append(&mut self, stream: LogStream, line: impl Into<String>) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(LogLine {
            stream,
            line: line.into(),
            timestamp: Utc::now(),
        });
    }

    /// Append only if no reset happened since `generation` was handed out.
    /// Returns false once the writer is stale.
    pub fn append_if_current(
        &mut self,
        generation: u64,
        stream: LogStream,
        line: impl Into<String>,
    ) -> bool {
        if generation != self.generation {
            return false;
        }
        self.append(stream, line);
        true
    }

    /// Lines in arrival order, formatted as `[stream] line`
    pub fn snapshot(&self) -> Vec<String> {
        self.lines
            .iter()
            .map(|l| format!("[{}] {}", l.stream, l.line))
            .collect()
    }

    pub fn entries(&self) -> Vec<LogLine> {
        self.lines.iter().cloned().collect()
    }

    /// Clear all lines and start a new generation
    pub fn reset(&mut self) -> u64 {
        self.lines.clear();
        self.generation += 1;
        self.generation
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Per-project buffers, each behind its own lock
pub struct LogStore {
    buffers: RwLock<HashMap<String, Arc<Mutex<LogBuffer>>>>,
    capacity: usize,
}

impl LogStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Get the project's buffer, creating it on first use
    pub async fn buffer(&self, project_id: &str) -> Arc<Mutex<LogBuffer>> {
        if let Some(buffer) = self.buffers.read().await.get(project_id) {
            return buffer.clone();
        }

        self.buffers
            .write()
            .await
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(LogBuffer::new(self.capacity))))
            .clone()
    }

    pub async fn append(&self, project_id: &str, stream: LogStream, line: impl Into<String>) {
        self.buffer(project_id).await.lock().await.append(stream, line);
    }

    pub async fn snapshot(&self, project_id: &str) -> Vec<String> {
        let buffer = self.buffers.read().await.get(project_id).cloned();
        match buffer {
            Some(buffer) => buffer.lock().await.snapshot(),
            None => Vec::new(),
        }
    }

    pub async fn text(&self, project_id: &str) -> String {
        self.snapshot(project_id).await.join("\n")
    }

    /// Clear the project's buffer; returns the generation new writers must use
    pub async fn reset(&self, project_id: &str) -> u64 {
        self.buffer(project_id).await.lock().await.reset()
    }

    /// Drop the buffer entirely. Pumps still holding it become stale.
    pub async fn remove(&self, project_id: &str) {
        if let Some(buffer) = self.buffers.write().await.remove(project_id) {
            buffer.lock().await.reset();
        }
    }
}

/// Forward a background process's output into `buffer` line by line.
///
/// Stops when the process output closes or when the buffer has been reset
/// since `generation`.
pub fn spawn_log_pump(
    project_id: String,
    buffer: Arc<Mutex<LogBuffer>>,
    generation: u64,
    mut output: OutputStream,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut partial: HashMap<LogStream, String> = HashMap::new();

        'pump: while let Some(chunk) = output.receiver.recv().await {
            let stream = LogStream::from(chunk.stream);
            let pending = partial.entry(stream).or_default();
            pending.push_str(&String::from_utf8_lossy(&chunk.data));

            let mut complete = Vec::new();
            while let Some(pos) = pending.find('\n') {
                let line: String = pending.drain(..=pos).collect();
                complete.push(line.trim_end_matches(['\r', '\n']).to_string());
            }
            if pending.len() >= MAX_PARTIAL_LINE {
                complete.push(std::mem::take(pending));
            }

            if complete.is_empty() {
                continue;
            }

            let mut guard = buffer.lock().await;
            for line in complete {
                if !guard.append_if_current(generation, stream, line) {
                    break 'pump;
                }
            }
        }

        let mut guard = buffer.lock().await;
        for (stream, rest) in partial {
            if !rest.is_empty() && !guard.append_if_current(generation, stream, rest) {
                break;
            }
        }
        debug!("Log pump for project {} finished", project_id);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::OutputChunk;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_capacity_keeps_last_lines_in_order() {
        let mut buffer = LogBuffer::new(3);
        for i in 0..5 {
            buffer.append(LogStream::Stdout, format!("line {}", i));
        }

        assert_eq!(buffer.len(), 3);
        assert_eq!(
            buffer.snapshot(),
            vec!["[stdout] line 2", "[stdout] line 3", "[stdout] line 4"]
        );
    }

    #[test]
    fn test_reset_invalidates_old_generation() {
        let mut buffer = LogBuffer::new(10);
        let old = buffer.generation();
        buffer.append(LogStream::Stderr, "boom");

        let new = buffer.reset();
        assert!(buffer.is_empty());
        assert!(!buffer.append_if_current(old, LogStream::Stdout, "stale"));
        assert!(buffer.append_if_current(new, LogStream::Stdout, "fresh"));
        assert_eq!(buffer.snapshot(), vec!["[stdout] fresh"]);
    }

    #[tokio::test]
    async fn test_store_isolates_projects() {
        let store = LogStore::new(5);
        store.append("a", LogStream::System, "deploying").await;
        store.append("b", LogStream::Stdout, "hello").await;

        assert_eq!(store.snapshot("a").await, vec!["[system] deploying"]);
        assert_eq!(store.text("b").await, "[stdout] hello");
        assert!(store.snapshot("missing").await.is_empty());

        store.reset("a").await;
        assert!(store.snapshot("a").await.is_empty());
        assert_eq!(store.snapshot("b").await.len(), 1);
    }

    #[tokio::test]
    async fn test_pump_splits_lines_and_flushes_partial() {
        let store = LogStore::new(10);
        let buffer = store.buffer("p").await;
        let generation = store.reset("p").await;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = spawn_log_pump(
            "p".to_string(),
            buffer,
            generation,
            OutputStream { receiver: rx },
        );

        let chunk = |stream, data: &str| OutputChunk {
            timestamp: Utc::now(),
            stream,
            data: data.as_bytes().to_vec(),
        };
        tx.send(chunk(StreamType::Stdout, "listening on ")).unwrap();
        tx.send(chunk(StreamType::Stdout, "3000\r\nready\n")).unwrap();
        tx.send(chunk(StreamType::Stderr, "warn: slow")).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(
            store.snapshot("p").await,
            vec![
                "[stdout] listening on 3000",
                "[stdout] ready",
                "[stderr] warn: slow"
            ]
        );
    }

    #[tokio::test]
    async fn test_pump_flushes_oversized_partial_line() {
        let store = LogStore::new(10);
        let buffer = store.buffer("p").await;
        let generation = store.reset("p").await;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = spawn_log_pump(
            "p".to_string(),
            buffer,
            generation,
            OutputStream { receiver: rx },
        );

        let progress = "#".repeat(MAX_PARTIAL_LINE / 2);
        for _ in 0..3 {
            tx.send(OutputChunk {
                timestamp: Utc::now(),
                stream: StreamType::Stdout,
                data: progress.as_bytes().to_vec(),
            })
            .unwrap();
        }

        let flushed = async {
            loop {
                if !store.snapshot("p").await.is_empty() {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(std::time::Duration::from_secs(2), flushed)
            .await
            .expect("oversized line flushed while the stream is still open");

        drop(tx);
        handle.await.unwrap();

        let lines = store.snapshot("p").await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), "[stdout] ".len() + MAX_PARTIAL_LINE);
        assert_eq!(lines[1].len(), "[stdout] ".len() + MAX_PARTIAL_LINE / 2);
    }

    #[tokio::test]
    async fn test_pump_stops_after_reset() {
        let store = LogStore::new(10);
        let buffer = store.buffer("p").await;
        let generation = store.reset("p").await;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = spawn_log_pump(
            "p".to_string(),
            buffer,
            generation,
            OutputStream { receiver: rx },
        );

        store.reset("p").await;
        tx.send(OutputChunk {
            timestamp: Utc::now(),
            stream: StreamType::Stdout,
            data: b"from the old process\n".to_vec(),
        })
        .unwrap();
        handle.await.unwrap();

        assert!(store.snapshot("p").await.is_empty());
    }
}
