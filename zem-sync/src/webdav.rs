//! WebDAV-backed [`RemoteDocument`].
//!
//! A document is described by a `.zem` file. Its body is written to a mirror
//! file under the preferences' `temp_dir`; locking and write-back use plain
//! WebDAV verbs against the document URL:
//!
//! | operation      | request |
//! |----------------|---------|
//! | `lock`         | `LOCK` with an exclusive write `lockinfo`, `Depth: 0`, `Timeout: Infinite` |
//! | `put_changes`  | `PUT` of the mirror bytes, `If: (<token>)` while locked |
//! | `unlock`       | `UNLOCK` with `Lock-Token: <token>` |
//! | `fetch_content`| `GET`, only when the `.zem` file was sent with `skip_data` |

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use url::Url;

use zem_core::metadata::extension_for_content_type;
use zem_core::{LockToken, Metadata, Preferences, ZemFile};

use crate::error::{remote_io_err, RemoteError, SyncError};
use crate::remote::RemoteDocument;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const LOCK_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:exclusive/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
  <D:owner>zem</D:owner>
</D:lockinfo>
"#;

/// A remote document reached over WebDAV.
pub struct WebDavDocument {
    zem: ZemFile,
    content_file: PathBuf,
    lock_token: Option<LockToken>,
    agent: ureq::Agent,
}

impl std::fmt::Debug for WebDavDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebDavDocument")
            .field("url", &self.zem.metadata.url)
            .field("content_file", &self.content_file)
            .field("lock_token", &self.lock_token)
            .finish()
    }
}

impl WebDavDocument {
    /// Read a `.zem` file and prepare the document it describes.
    pub fn from_zem_file(path: &Path, prefs: &Preferences) -> Result<Self, SyncError> {
        let zem = ZemFile::read(path)?;
        Ok(Self::new(zem, prefs)?)
    }

    pub fn new(zem: ZemFile, prefs: &Preferences) -> Result<Self, RemoteError> {
        let extension = prefs
            .helper_for(&zem.metadata)
            .map(|helper| helper.extension.trim())
            .filter(|ext| !ext.is_empty())
            .map(|ext| {
                if ext.starts_with('.') {
                    ext.to_owned()
                } else {
                    format!(".{ext}")
                }
            })
            .unwrap_or_else(|| {
                extension_for_content_type(zem.metadata.content_type.as_deref()).to_owned()
            });
        let file_name = mirror_file_name(&zem.metadata.url, &extension)?;
        let agent = ureq::AgentBuilder::new()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("zem/", env!("CARGO_PKG_VERSION")))
            .build();

        Ok(Self {
            content_file: prefs.temp_dir.join(file_name),
            zem,
            lock_token: None,
            agent,
        })
    }

    fn request(&self, method: &'static str) -> ureq::Request {
        let md = &self.zem.metadata;
        let mut request = self.agent.request(method, &md.url);
        if let Some(auth) = md.auth.as_deref() {
            request = request.set("Authorization", auth);
        }
        if let Some(cookie) = md.cookie.as_deref() {
            request = request.set("Cookie", cookie);
        }
        request
    }

    fn http_err(&self, method: &'static str, err: ureq::Error) -> RemoteError {
        let url = self.zem.metadata.url.clone();
        match err {
            ureq::Error::Status(423, _) => RemoteError::Locked { url },
            ureq::Error::Status(status, _) => RemoteError::Status {
                method,
                url,
                status,
            },
            ureq::Error::Transport(transport) => RemoteError::Transport {
                method,
                url,
                message: transport.to_string(),
            },
        }
    }

    fn download(&self) -> Result<Vec<u8>, RemoteError> {
        let response = self
            .request("GET")
            .call()
            .map_err(|e| self.http_err("GET", e))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| RemoteError::Transport {
                method: "GET",
                url: self.zem.metadata.url.clone(),
                message: e.to_string(),
            })?;
        Ok(bytes)
    }
}

impl RemoteDocument for WebDavDocument {
    fn url(&self) -> &str {
        &self.zem.metadata.url
    }

    fn metadata(&self) -> &Metadata {
        &self.zem.metadata
    }

    fn content_file(&self) -> &Path {
        &self.content_file
    }

    fn fetch_content(&mut self) -> Result<PathBuf, RemoteError> {
        let downloaded;
        let body: &[u8] = if self.zem.body.is_empty() && self.zem.metadata.skip_data {
            downloaded = self.download()?;
            &downloaded
        } else {
            &self.zem.body
        };

        if let Some(dir) = self.content_file.parent() {
            std::fs::create_dir_all(dir).map_err(|e| remote_io_err(dir, e))?;
        }
        std::fs::write(&self.content_file, body)
            .map_err(|e| remote_io_err(&self.content_file, e))?;
        tracing::debug!(
            url = %self.zem.metadata.url,
            path = %self.content_file.display(),
            bytes = body.len(),
            "wrote local mirror",
        );
        Ok(self.content_file.clone())
    }

    fn lock(&mut self) -> Result<LockToken, RemoteError> {
        let response = self
            .request("LOCK")
            .set("Content-Type", "text/xml; charset=utf-8")
            .set("Depth", "0")
            .set("Timeout", "Infinite")
            .send_string(LOCK_BODY)
            .map_err(|e| self.http_err("LOCK", e))?;

        let header_token = response.header("Lock-Token").map(LockToken::new);
        let token = match header_token {
            Some(token) => token,
            None => {
                let body = response.into_string().map_err(|e| RemoteError::Transport {
                    method: "LOCK",
                    url: self.zem.metadata.url.clone(),
                    message: e.to_string(),
                })?;
                token_from_lock_body(&body).ok_or_else(|| RemoteError::MissingLockToken {
                    url: self.zem.metadata.url.clone(),
                })?
            }
        };

        tracing::info!(url = %self.zem.metadata.url, token = %token, "acquired lock");
        self.lock_token = Some(token.clone());
        Ok(token)
    }

    fn unlock(&mut self) -> Result<(), RemoteError> {
        let Some(token) = self.lock_token.clone() else {
            return Ok(());
        };
        self.request("UNLOCK")
            .set("Lock-Token", &token.lock_token_header())
            .call()
            .map_err(|e| self.http_err("UNLOCK", e))?;
        tracing::info!(url = %self.zem.metadata.url, token = %token, "released lock");
        self.lock_token = None;
        Ok(())
    }

    fn put_changes(&mut self) -> Result<(), RemoteError> {
        let bytes = std::fs::read(&self.content_file)
            .map_err(|e| remote_io_err(&self.content_file, e))?;
        let content_type = self
            .zem
            .metadata
            .content_type
            .as_deref()
            .unwrap_or("application/octet-stream");

        let mut request = self.request("PUT").set("Content-Type", content_type);
        if let Some(token) = &self.lock_token {
            request = request.set("If", &token.if_header());
        }
        request
            .send_bytes(&bytes)
            .map_err(|e| self.http_err("PUT", e))?;
        tracing::debug!(url = %self.zem.metadata.url, bytes = bytes.len(), "PUT complete");
        Ok(())
    }

    fn lock_token(&self) -> Option<&LockToken> {
        self.lock_token.as_ref()
    }

    fn borrow_lock(&mut self, token: LockToken) {
        self.lock_token = Some(token);
    }
}

/// Hex digits of the URL digest appended to every mirror name.
const URL_DIGEST_LEN: usize = 12;

/// Mirror file name for a document URL: host, port and path segments joined
/// with `-`, anything outside `[A-Za-z0-9._-]` replaced by `_`, then a
/// digest of the full URL so distinct documents never share a mirror.
pub fn mirror_file_name(url: &str, extension: &str) -> Result<String, RemoteError> {
    let parsed = Url::parse(url).map_err(|source| RemoteError::InvalidUrl {
        url: url.to_owned(),
        source,
    })?;

    let mut parts = Vec::new();
    if let Some(host) = parsed.host_str() {
        match parsed.port() {
            Some(port) => parts.push(format!("{host}_{port}")),
            None => parts.push(host.to_owned()),
        }
    }
    if let Some(segments) = parsed.path_segments() {
        parts.extend(segments.filter(|s| !s.is_empty()).map(str::to_owned));
    }

    let mut name: String = parts
        .join("-")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() {
        name.push_str("document");
    }
    if name.ends_with(extension) {
        name.truncate(name.len() - extension.len());
    }

    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    name.push('-');
    name.push_str(&digest[..URL_DIGEST_LEN]);
    name.push_str(extension);
    Ok(name)
}

/// Lock token from a LOCK response body. Scans for the first
/// `opaquelocktoken:` href; the `lockdiscovery` XML is not parsed.
fn token_from_lock_body(body: &str) -> Option<LockToken> {
    let start = body.find("opaquelocktoken:")?;
    let rest = &body[start..];
    let end = rest
        .find(|c: char| c == '<' || c.is_whitespace())
        .unwrap_or(rest.len());
    Some(LockToken::new(&rest[..end]))
}
