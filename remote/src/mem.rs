use std::collections::HashMap;
use std::io::{Cursor, Error, ErrorKind, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use log::debug;

use crate::Remote;
use crate::RemoteError;

struct Object {
    data: Vec<u8>,
    // Response gets cut after the data instead of ending cleanly
    cut: bool,
    // Number of requests that fail before one gets through
    flaky: u32,
}

/// In memory stand-in for the chunk server.
pub struct MemoryRemote {
    objects: Mutex<HashMap<String, Object>>,
    requests: AtomicUsize,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        MemoryRemote {
            objects: Mutex::new(HashMap::new()),
            requests: AtomicUsize::new(0),
        }
    }

    fn put(&self, url: &str, object: Object) {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(url.to_string(), object);
    }

    pub fn insert(&self, url: &str, data: Vec<u8>) {
        self.put(url, Object { data, cut: false, flaky: 0 });
    }

    pub fn insert_cut(&self, url: &str, data: Vec<u8>) {
        self.put(url, Object { data, cut: true, flaky: 0 });
    }

    pub fn insert_flaky(&self, url: &str, data: Vec<u8>, flaky: u32) {
        self.put(url, Object { data, cut: false, flaky });
    }

    pub fn remove(&self, url: &str) {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(url);
    }

    /// Requests served so far, failed ones included.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Remote for MemoryRemote {
    fn stream(&self, url: &str) -> Result<Box<dyn Read + Send + '_>, RemoteError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        debug!("GET {}", url);

        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        let object = objects.get_mut(url).ok_or(RemoteError::Status {
            url: url.to_string(),
            status: 404,
        })?;

        if object.flaky > 0 {
            object.flaky -= 1;
            return Err(RemoteError::Transport {
                url: url.to_string(),
                msg: "connection reset".to_string(),
            });
        }

        let data = Cursor::new(object.data.clone());
        if object.cut {
            Ok(Box::new(CutRead(data)))
        } else {
            Ok(Box::new(data))
        }
    }
}

struct CutRead(Cursor<Vec<u8>>);

impl Read for CutRead {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.0.read(buf)? {
            0 if !buf.is_empty() => Err(Error::new(
                ErrorKind::ConnectionAborted,
                "response ended prematurely",
            )),
            n => Ok(n),
        }
    }
}
