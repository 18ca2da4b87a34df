use std::cmp;
use std::io::{Error, ErrorKind, Read};

use bytes::{Buf, Bytes};
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, REFERER, USER_AGENT};
use reqwest::{Client, Response};
use tokio::runtime::Handle;

use crate::Remote;
use crate::RemoteError;

/// Chunk server over plain http(s) GET.
///
/// The calls are blocking, they run on the given runtime via `block_on` so this must not be
/// used from inside that runtime's own tasks.
pub struct HttpRemote {
    client: Client,
    handle: Handle,
}

impl HttpRemote {
    pub fn new(handle: Handle, user_agent: &str, referer: Option<&str>) -> Result<Self, RemoteError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value(user_agent)?);
        if let Some(referer) = referer {
            headers.insert(REFERER, header_value(referer)?);
        }

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| transport("<client>", e))?;

        Ok(HttpRemote { client, handle })
    }

    async fn send(&self, url: &str) -> Result<Response, RemoteError> {
        debug!("GET {}", url);
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport(url, e))?;

        if !resp.status().is_success() {
            return Err(RemoteError::Status {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }
        Ok(resp)
    }
}

impl Remote for HttpRemote {
    fn stream(&self, url: &str) -> Result<Box<dyn Read + Send + '_>, RemoteError> {
        let resp = self.handle.block_on(self.send(url))?;

        Ok(Box::new(HttpStream {
            handle: self.handle.clone(),
            resp,
            pending: Bytes::new(),
        }))
    }

    fn get(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        self.handle.block_on(async {
            let resp = self.send(url).await?;
            let body = resp.bytes().await.map_err(|e| transport(url, e))?;
            Ok(body.to_vec())
        })
    }
}

// Pulls the body one network chunk at a time
struct HttpStream {
    handle: Handle,
    resp: Response,
    pending: Bytes,
}

impl Read for HttpStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while self.pending.is_empty() {
            match self.handle.block_on(self.resp.chunk()) {
                Ok(Some(chunk)) => self.pending = chunk,
                Ok(None) => return Ok(0),
                Err(e) => return Err(Error::new(ErrorKind::Other, e)),
            }
        }

        let split_at = cmp::min(buf.len(), self.pending.len());
        buf[..split_at].copy_from_slice(&self.pending[..split_at]);
        self.pending.advance(split_at);

        Ok(split_at)
    }
}

fn header_value(value: &str) -> Result<HeaderValue, RemoteError> {
    HeaderValue::from_str(value).map_err(|e| RemoteError::Transport {
        url: "<headers>".to_string(),
        msg: e.to_string(),
    })
}

fn transport(url: &str, err: reqwest::Error) -> RemoteError {
    RemoteError::Transport {
        url: url.to_string(),
        msg: err.to_string(),
    }
}
