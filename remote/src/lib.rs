pub mod mem;

#[cfg(feature = "http")]
pub mod http;

use std::io::Read;
use std::thread::sleep;
use std::time::Duration;

use log::warn;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("transport error for {url}: {msg}")]
    Transport { url: String, msg: String },
    #[error(transparent)]
    IO(#[from] std::io::Error),
}

/// Read side of the chunk server. Objects are addressed by their full url.
pub trait Remote: Sync {
    // Streamed body, reads may fail part way through when the server cuts the response
    fn stream(&self, url: &str) -> Result<Box<dyn Read + Send + '_>, RemoteError>;

    // Whole body, a cut response is an error here
    fn get(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        let mut buf = Vec::new();
        self.stream(url)?.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Fixed delay retry policy for whole object fetches.
#[derive(Debug, Clone, Copy)]
pub struct Retry {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for Retry {
    fn default() -> Self {
        Retry {
            attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl Retry {
    pub fn get<B: Remote + ?Sized>(&self, remote: &B, url: &str) -> Result<Vec<u8>, RemoteError> {
        let mut attempt = 1;
        loop {
            match remote.get(url) {
                Ok(data) => return Ok(data),
                // The server answered, asking again changes nothing
                Err(e @ RemoteError::Status { status: 400..=499, .. }) => return Err(e),
                Err(e) if attempt < self.attempts => {
                    warn!("attempt {}/{} for {}: {}", attempt, self.attempts, url, e);
                    sleep(self.delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod test_retry {
    use super::*;
    use crate::mem::MemoryRemote;

    fn quick(attempts: u32) -> Retry {
        Retry {
            attempts,
            delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn recovers_from_flaky() {
        let remote = MemoryRemote::new();
        remote.insert_flaky("http://h/a", b"data".to_vec(), 2);

        assert_eq!(quick(3).get(&remote, "http://h/a").unwrap(), b"data");
        assert_eq!(remote.requests(), 3);
    }

    #[test]
    fn gives_up() {
        let remote = MemoryRemote::new();
        remote.insert_flaky("http://h/a", b"data".to_vec(), 5);

        assert!(matches!(
            quick(3).get(&remote, "http://h/a"),
            Err(RemoteError::Transport { .. })
        ));
        assert_eq!(remote.requests(), 3);
    }

    #[test]
    fn missing_is_status() {
        let remote = MemoryRemote::new();
        assert!(matches!(
            quick(1).get(&remote, "http://h/none"),
            Err(RemoteError::Status { status: 404, .. })
        ));
    }

    #[test]
    fn missing_is_asked_once() {
        let remote = MemoryRemote::new();
        assert!(matches!(
            quick(3).get(&remote, "http://h/none"),
            Err(RemoteError::Status { status: 404, .. })
        ));
        assert_eq!(remote.requests(), 1);
    }
}
