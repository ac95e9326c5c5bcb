/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt::{self, Write as _};
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Local;
use flume::{Receiver, Sender, TrySendError};
use slog::{Drain, KV, Level, OwnedKVList, Record, Serializer};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub(super) struct StdioValue {
    level: Level,
    message: String,
    kv_pairs: Vec<(String, String)>,
    location: Option<String>,
}

#[derive(Default)]
pub struct LogStats {
    total: AtomicU64,
    passed: AtomicU64,
    dropped: AtomicU64,
}

impl LogStats {
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn passed(&self) -> u64 {
        self.passed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// slog drain that hands formatted records to a dedicated io thread.
pub struct AsyncStdioDrain {
    sender: Sender<StdioValue>,
    append_code_position: bool,
    stats: Arc<LogStats>,
}

impl AsyncStdioDrain {
    pub fn stats(&self) -> Arc<LogStats> {
        self.stats.clone()
    }

    fn format(&self, record: &Record, logger_values: &OwnedKVList) -> Result<StdioValue, slog::Error> {
        let mut kv_pairs = Vec::new();
        let mut serializer = KvCollector(&mut kv_pairs);
        logger_values.serialize(record, &mut serializer)?;
        record.kv().serialize(record, &mut serializer)?;

        let location = if self.append_code_position {
            let file = record.file().rsplit_once('/').map(|x| x.1).unwrap_or(record.file());
            Some(format!("{}({file}:{})", record.module(), record.line()))
        } else {
            None
        };

        Ok(StdioValue {
            level: record.level(),
            message: record.msg().to_string(),
            kv_pairs,
            location,
        })
    }
}

impl Drain for AsyncStdioDrain {
    type Ok = ();
    type Err = slog::Error;

    fn log(&self, record: &Record, logger_values: &OwnedKVList) -> Result<(), slog::Error> {
        self.stats.total.fetch_add(1, Ordering::Relaxed);
        let v = self.format(record, logger_values)?;
        match self.sender.try_send(v) {
            Ok(_) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

struct KvCollector<'a>(&'a mut Vec<(String, String)>);

impl Serializer for KvCollector<'_> {
    fn emit_arguments(&mut self, key: slog::Key, value: &fmt::Arguments) -> slog::Result {
        let mut s = String::new();
        s.write_fmt(*value).map_err(slog::Error::Fmt)?;
        self.0.push((key.to_string(), s));
        Ok(())
    }
}

pub(super) fn new_async_drain(
    thread_name: &str,
    channel_capacity: usize,
    append_code_position: bool,
) -> anyhow::Result<AsyncStdioDrain> {
    let (sender, receiver) = flume::bounded::<StdioValue>(channel_capacity);
    let stats = Arc::new(LogStats::default());

    let io_thread = IoThread {
        receiver,
        stats: stats.clone(),
    };
    let _detached_thread = std::thread::Builder::new()
        .name(thread_name.to_string())
        .spawn(move || io_thread.run(io::stderr()))
        .map_err(|e| anyhow::anyhow!("failed to spawn log thread {thread_name}: {e}"))?;

    Ok(AsyncStdioDrain {
        sender,
        append_code_position,
        stats,
    })
}

struct IoThread {
    receiver: Receiver<StdioValue>,
    stats: Arc<LogStats>,
}

impl IoThread {
    fn run<IO: Write>(self, mut io: IO) {
        let mut buf: Vec<u8> = Vec::with_capacity(1024);
        while let Ok(v) = self.receiver.recv() {
            buf.clear();
            let _ = write_plain(&mut buf, v);
            self.write_buf(&mut io, &buf);

            while let Ok(v) = self.receiver.try_recv() {
                buf.clear();
                let _ = write_plain(&mut buf, v);
                self.write_buf(&mut io, &buf);
            }

            let _ = io.flush();
        }
    }

    fn write_buf<IO: Write>(&self, io: &mut IO, buf: &[u8]) {
        match io.write_all(buf) {
            Ok(_) => {
                self.stats.passed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

fn write_plain<IO: Write>(io: &mut IO, v: StdioValue) -> io::Result<()> {
    write!(io, "{}", Local::now().format(TIME_FORMAT))?;
    write!(io, " {}", v.level)?;
    for (k, v) in &v.kv_pairs {
        write!(io, " {k}: {v},")?;
    }
    if v.message.is_empty() {
        write!(io, " ()")?;
    } else {
        write!(io, " {}", v.message)?;
    }
    if let Some(location) = v.location {
        write!(io, " <{location}>")?;
    }
    writeln!(io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::{Logger, info, o};

    #[test]
    fn plain_line() {
        let v = StdioValue {
            level: Level::Warning,
            message: "listener echo closed".to_string(),
            kv_pairs: vec![("worker".to_string(), "1".to_string())],
            location: Some("g3edge::worker(mod.rs:10)".to_string()),
        };
        let mut buf = Vec::new();
        write_plain(&mut buf, v).unwrap();
        let line = String::from_utf8(buf).unwrap();
        assert!(line.ends_with(
            " WARN worker: 1, listener echo closed <g3edge::worker(mod.rs:10)>\n"
        ));
    }

    #[test]
    fn drain_stats() {
        let drain = new_async_drain("log-test", 16, false).unwrap();
        let stats = drain.stats();
        let logger = Logger::root(drain.fuse(), o!("worker" => 0));
        info!(logger, "hello"; "listener" => "echo");
        assert_eq!(stats.total(), 1);
        assert_eq!(stats.dropped(), 0);
    }
}
