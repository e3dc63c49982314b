use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

pub trait Logger: Send + Sync {
    fn info(&self, _msg: &str) {}
    fn sent(&self, _name: &str, _bytes: u64) {}
    fn received(&self, _name: &str, _bytes: u64) {}
    fn cancelled(&self, _name: &str) {}
    fn error(&self, _context: &str, _msg: &str) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

/// Logs to stderr; the default for the CLI.
pub struct ConsoleLogger;

impl Logger for ConsoleLogger {
    fn info(&self, msg: &str) {
        eprintln!("{}", msg);
    }
    fn sent(&self, name: &str, bytes: u64) {
        eprintln!("sent {} ({} bytes)", name, bytes);
    }
    fn received(&self, name: &str, bytes: u64) {
        eprintln!("received {} ({} bytes)", name, bytes);
    }
    fn cancelled(&self, name: &str) {
        eprintln!("cancelled {}", name);
    }
    fn error(&self, context: &str, msg: &str) {
        eprintln!("error ctx={} msg={}", context, msg);
    }
}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn info(&self, msg: &str) {
        self.line(msg);
    }
    fn sent(&self, name: &str, bytes: u64) {
        self.line(&format!("SENT name={} bytes={}", name, bytes));
    }
    fn received(&self, name: &str, bytes: u64) {
        self.line(&format!("RECV name={} bytes={}", name, bytes));
    }
    fn cancelled(&self, name: &str) {
        self.line(&format!("CANCEL name={}", name));
    }
    fn error(&self, context: &str, msg: &str) {
        self.line(&format!("ERROR ctx={} msg={}", context, msg));
    }
}
