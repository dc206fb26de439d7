// tests/integration/fixtures.rs

//! Fake engines and id sources shared by the unit and integration tests.
//!
//! `FakeEngine` understands a handful of magic queries:
//! - `sleep` blocks until the connection is interrupted, then fails
//! - `fail` fails before producing any output
//! - `fail-after-output` streams 200 rows and then fails
//! - anything else yields one result set with column `query` holding the query text

#![allow(dead_code)]

use sqlgate::core::GatewayError;
use sqlgate::core::engine::{Engine, EngineConnection, Interrupt, ResultSink, Value};
use sqlgate::core::session::IdSource;
use std::borrow::Cow;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::ThreadId;
use std::time::Duration;

pub const SLEEP_QUERY: &str = "sleep";
pub const FAIL_QUERY: &str = "fail";
pub const FAIL_AFTER_OUTPUT_QUERY: &str = "fail-after-output";

/// Counters recorded by every connection a `FakeEngine` opens.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub executed: AtomicUsize,
    pub interrupted: AtomicUsize,
    pub close_threads: Mutex<Vec<ThreadId>>,
}

impl EngineStats {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }
    pub fn interrupted(&self) -> usize {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Waits up to a second for `closed` to reach `expected`. Engines are
    /// closed on the blocking pool, so the count can trail the release.
    pub async fn wait_closed(&self, expected: usize) -> bool {
        for _ in 0..100 {
            if self.closed() >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.closed() == expected
    }
}

#[derive(Default)]
pub struct FakeEngine {
    stats: Arc<EngineStats>,
    fail_connect: AtomicBool,
    connect_delay: Mutex<Option<Duration>>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        self.stats.clone()
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Makes every `connect` block for `delay`, widening creation races.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = Some(delay);
    }
}

impl Engine for FakeEngine {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn connect(&self) -> Result<Box<dyn EngineConnection>, GatewayError> {
        if let Some(delay) = *self.connect_delay.lock().unwrap() {
            std::thread::sleep(delay);
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(GatewayError::SessionAcquisition("engine refused to open".into()));
        }
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            stats: self.stats.clone(),
            interrupt: Arc::new(FakeInterrupt {
                flag: AtomicBool::new(false),
                stats: self.stats.clone(),
            }),
        }))
    }
}

struct FakeInterrupt {
    flag: AtomicBool,
    stats: Arc<EngineStats>,
}

impl Interrupt for FakeInterrupt {
    fn interrupt(&self) {
        self.stats.interrupted.fetch_add(1, Ordering::SeqCst);
        self.flag.store(true, Ordering::SeqCst);
    }
}

struct FakeConnection {
    stats: Arc<EngineStats>,
    interrupt: Arc<FakeInterrupt>,
}

impl EngineConnection for FakeConnection {
    fn execute(&mut self, query: &str, sink: &mut dyn ResultSink) -> Result<(), GatewayError> {
        self.stats.executed.fetch_add(1, Ordering::SeqCst);
        match query {
            SLEEP_QUERY => {
                while !self.interrupt.flag.swap(false, Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(GatewayError::QueryExecution("interrupted".into()))
            }
            FAIL_QUERY => Err(GatewayError::QueryExecution("boom".into())),
            FAIL_AFTER_OUTPUT_QUERY => {
                sink.begin_result_set(&["n".to_string()])?;
                for i in 0..200 {
                    sink.write_row(&[Value::Integer(i)])?;
                }
                Err(GatewayError::QueryExecution("boom".into()))
            }
            other => {
                sink.begin_result_set(&["query".to_string()])?;
                sink.write_row(&[Value::Text(Cow::Borrowed(other))])
            }
        }
    }

    fn interrupter(&self) -> Arc<dyn Interrupt> {
        self.interrupt.clone()
    }

    fn close(self: Box<Self>) -> Result<(), GatewayError> {
        self.stats
            .close_threads
            .lock()
            .unwrap()
            .push(std::thread::current().id());
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out ids from a fixed list, repeating the last one forever.
pub struct SequenceIds {
    ids: Vec<u64>,
    next: AtomicUsize,
}

impl SequenceIds {
    pub fn new(ids: impl Into<Vec<u64>>) -> Self {
        Self {
            ids: ids.into(),
            next: AtomicUsize::new(0),
        }
    }
}

impl IdSource for SequenceIds {
    fn next_id(&self) -> u64 {
        let i = self.next.fetch_add(1, Ordering::SeqCst);
        self.ids[i.min(self.ids.len() - 1)]
    }
}
