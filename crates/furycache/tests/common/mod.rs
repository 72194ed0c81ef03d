//! Origins shared by the integration tests

#![allow(dead_code)]

use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::thread;
use std::time::Duration;

use furycache::{Fetched, Origin, OriginError};

static TRACING: Once = Once::new();

/// Install a test subscriber once per binary; `RUST_LOG` narrows it
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(tracing::Level::WARN.into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Echoes the key after `delay`; the key "error" fails after the delay
///
/// Honors the fetch timeout: when it is shorter than the delay, the stream
/// sleeps for the timeout and fails with `TimedOut`.
pub struct DelayedOrigin {
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl DelayedOrigin {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Origin for DelayedOrigin {
    fn fetch(&self, key: &str, timeout: Duration) -> Result<Fetched, OriginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Fetched::new(DelayedReader {
            body: Cursor::new(key.as_bytes().to_vec()),
            fail: key == "error",
            delay: self.delay,
            timeout,
            waited: false,
        }))
    }
}

struct DelayedReader {
    body: Cursor<Vec<u8>>,
    fail: bool,
    delay: Duration,
    timeout: Duration,
    waited: bool,
}

impl Read for DelayedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.waited {
            if self.timeout < self.delay {
                thread::sleep(self.timeout);
                return Err(io::Error::new(io::ErrorKind::TimedOut, "deadline exceeded"));
            }
            thread::sleep(self.delay);
            self.waited = true;
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::Other, "fake error"));
            }
        }
        self.body.read(buf)
    }
}

/// Echoes the key after `delay`, ignoring the fetch timeout
pub struct StuckOrigin {
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl StuckOrigin {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Origin for StuckOrigin {
    fn fetch(&self, key: &str, _timeout: Duration) -> Result<Fetched, OriginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        Ok(Fetched::from_bytes(key.to_owned()))
    }
}

/// Echoes the key immediately and counts calls
#[derive(Default)]
pub struct CountingOrigin {
    pub calls: AtomicUsize,
}

impl CountingOrigin {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Origin for CountingOrigin {
    fn fetch(&self, key: &str, _timeout: Duration) -> Result<Fetched, OriginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if key == "bench error" {
            return Err("fake error".into());
        }
        Ok(Fetched::from_bytes(key.to_owned()))
    }
}

/// `len` zero bytes for any key
pub struct ZeroesOrigin {
    pub len: usize,
}

impl Origin for ZeroesOrigin {
    fn fetch(&self, _key: &str, _timeout: Duration) -> Result<Fetched, OriginError> {
        Ok(Fetched::from_bytes(vec![0u8; self.len]))
    }
}

/// Echoes the key with an expiry `ttl` from now
pub struct ExpiringOrigin {
    pub ttl: Duration,
}

impl Origin for ExpiringOrigin {
    fn fetch(&self, key: &str, _timeout: Duration) -> Result<Fetched, OriginError> {
        Ok(Fetched::from_bytes(key.to_owned()).expires_in(self.ttl))
    }
}

/// Keys look like "name/<len>"; returns `len` bytes of 'x'
pub struct SizedOrigin;

impl Origin for SizedOrigin {
    fn fetch(&self, key: &str, _timeout: Duration) -> Result<Fetched, OriginError> {
        let len: usize = key
            .rsplit('/')
            .next()
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| format!("no length in key {:?}", key))?;
        Ok(Fetched::from_bytes(vec![b'x'; len]))
    }
}
