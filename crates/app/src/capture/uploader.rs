//! FTP uploads of captured files into the remote store.
//!
//! Every upload opens its own control connection, logs in, optionally deletes
//! the previous pointer object, stores the file and quits. Failures are
//! returned inside [`UploadResult`] and never abort the caller.

use std::{
    fs::File,
    io::{BufReader, Read},
    net::{SocketAddr, ToSocketAddrs},
    path::{Path, PathBuf},
    time::Duration,
};

use suppaftp::{FtpStream, Mode, types::FileType};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::capture::config::FtpSettings;

#[derive(Debug, Error)]
pub(crate) enum UploadError {
    #[error("no such local file: {}", path.display())]
    MissingFile { path: PathBuf },
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to connect to {address}: {message}")]
    Connect { address: String, message: String },
    #[error("login failed: {0}")]
    Login(String),
    #[error("failed to store {path}: {message}")]
    Store { path: String, message: String },
    #[error("failed to delete {path}: {message}")]
    Delete { path: String, message: String },
}

/// Outcome of one [`RemoteStore::upload`] call.
#[derive(Debug)]
pub(crate) struct UploadResult {
    pub(crate) local_path: PathBuf,
    pub(crate) remote_path: String,
    /// Bytes stored on success.
    pub(crate) outcome: Result<u64, UploadError>,
}

impl UploadResult {
    pub(crate) fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub(crate) fn error(&self) -> Option<&UploadError> {
        self.outcome.as_ref().err()
    }
}

/// Destination for captured files.
pub(crate) trait RemoteStore {
    /// Store `local_path` as `remote_name`. With `replace_latest` the existing
    /// remote object is deleted first; a failed delete is logged and ignored.
    fn upload(&self, local_path: &Path, remote_name: &str, replace_latest: bool) -> UploadResult;
}

/// One logged-in or logging-in control connection.
pub(crate) trait FtpSession {
    fn login(&mut self, username: &str, password: &str) -> Result<(), UploadError>;
    fn delete(&mut self, path: &str) -> Result<(), UploadError>;
    fn store(&mut self, path: &str, reader: &mut dyn Read) -> Result<u64, UploadError>;
    fn quit(&mut self);
}

/// Opens fresh control connections.
pub(crate) trait FtpConnector {
    fn connect(&self) -> Result<Box<dyn FtpSession>, UploadError>;
}

pub(crate) struct FtpUploader<C> {
    connector: C,
    username: String,
    password: String,
    remote_dir: String,
}

impl<C: FtpConnector> FtpUploader<C> {
    pub(crate) fn new(connector: C, username: &str, password: &str, remote_dir: &str) -> Self {
        Self {
            connector,
            username: username.to_string(),
            password: password.to_string(),
            remote_dir: remote_dir.trim_matches('/').to_string(),
        }
    }

    pub(crate) fn remote_path(&self, remote_name: &str) -> String {
        if self.remote_dir.is_empty() {
            remote_name.to_string()
        } else {
            format!("{}/{remote_name}", self.remote_dir)
        }
    }

    fn transfer(
        &self,
        local_path: &Path,
        remote_path: &str,
        replace_latest: bool,
    ) -> Result<u64, UploadError> {
        if !local_path.is_file() {
            return Err(UploadError::MissingFile {
                path: local_path.to_path_buf(),
            });
        }
        let file = File::open(local_path).map_err(|source| UploadError::Read {
            path: local_path.to_path_buf(),
            source,
        })?;
        let mut reader = BufReader::new(file);

        let mut session = self.connector.connect()?;
        let result = self.stored(session.as_mut(), &mut reader, remote_path, replace_latest);
        session.quit();
        result
    }

    fn stored(
        &self,
        session: &mut dyn FtpSession,
        reader: &mut dyn Read,
        remote_path: &str,
        replace_latest: bool,
    ) -> Result<u64, UploadError> {
        session.login(&self.username, &self.password)?;
        if replace_latest {
            if let Err(err) = session.delete(remote_path) {
                debug!("previous {remote_path} not removed: {err}");
            }
        }
        session.store(remote_path, reader)
    }
}

impl<C: FtpConnector> RemoteStore for FtpUploader<C> {
    fn upload(&self, local_path: &Path, remote_name: &str, replace_latest: bool) -> UploadResult {
        let remote_path = self.remote_path(remote_name);
        info!("FTP upload: {} -> {remote_path}", local_path.display());

        let outcome = self.transfer(local_path, &remote_path, replace_latest);
        match &outcome {
            Ok(bytes) => info!("FTP completed: {remote_path} ({bytes} bytes)"),
            Err(err) => warn!("FTP upload failed: {err}"),
        }

        UploadResult {
            local_path: local_path.to_path_buf(),
            remote_path,
            outcome,
        }
    }
}

/// Connector for real servers via `suppaftp`.
pub(crate) struct SuppaFtpConnector {
    host: String,
    port: u16,
    passive: bool,
    timeout: Duration,
}

impl From<&FtpSettings> for SuppaFtpConnector {
    fn from(settings: &FtpSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            passive: settings.passive,
            timeout: settings.timeout,
        }
    }
}

impl SuppaFtpConnector {
    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn resolve(&self) -> Result<SocketAddr, UploadError> {
        let connect_err = |message: String| UploadError::Connect {
            address: self.address(),
            message,
        };
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|err| connect_err(err.to_string()))?
            .next()
            .ok_or_else(|| connect_err("address did not resolve".into()))
    }
}

impl FtpConnector for SuppaFtpConnector {
    fn connect(&self) -> Result<Box<dyn FtpSession>, UploadError> {
        let addr = self.resolve()?;
        let mut stream =
            FtpStream::connect_timeout(addr, self.timeout).map_err(|err| UploadError::Connect {
                address: self.address(),
                message: err.to_string(),
            })?;
        if let Err(err) = stream.get_ref().set_read_timeout(Some(self.timeout)) {
            warn!("failed to set FTP read timeout: {err}");
        }
        stream.set_mode(if self.passive { Mode::Passive } else { Mode::Active });
        Ok(Box::new(SuppaFtpSession { stream }))
    }
}

struct SuppaFtpSession {
    stream: FtpStream,
}

impl FtpSession for SuppaFtpSession {
    fn login(&mut self, username: &str, password: &str) -> Result<(), UploadError> {
        self.stream
            .login(username, password)
            .map_err(|err| UploadError::Login(err.to_string()))?;
        self.stream
            .transfer_type(FileType::Binary)
            .map_err(|err| UploadError::Login(err.to_string()))
    }

    fn delete(&mut self, path: &str) -> Result<(), UploadError> {
        self.stream.rm(path).map_err(|err| UploadError::Delete {
            path: path.to_string(),
            message: err.to_string(),
        })
    }

    fn store(&mut self, path: &str, mut reader: &mut dyn Read) -> Result<u64, UploadError> {
        self.stream
            .put_file(path, &mut reader)
            .map_err(|err| UploadError::Store {
                path: path.to_string(),
                message: err.to_string(),
            })
    }

    fn quit(&mut self) {
        if let Err(err) = self.stream.quit() {
            debug!("FTP quit failed: {err}");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::HashMap,
        fs,
        sync::{Arc, Mutex},
    };

    use super::*;

    /// In-memory FTP server shared by every session it hands out.
    #[derive(Clone, Default)]
    pub(crate) struct MemoryFtp {
        pub(crate) files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        pub(crate) connects: Arc<Mutex<u32>>,
        pub(crate) reject_login: bool,
        pub(crate) refuse_connect: bool,
    }

    impl MemoryFtp {
        pub(crate) fn file(&self, path: &str) -> Option<Vec<u8>> {
            self.files.lock().unwrap().get(path).cloned()
        }

        pub(crate) fn connects(&self) -> u32 {
            *self.connects.lock().unwrap()
        }
    }

    struct MemorySession {
        server: MemoryFtp,
        logged_in: bool,
    }

    impl FtpConnector for MemoryFtp {
        fn connect(&self) -> Result<Box<dyn FtpSession>, UploadError> {
            *self.connects.lock().unwrap() += 1;
            if self.refuse_connect {
                return Err(UploadError::Connect {
                    address: "memory:21".into(),
                    message: "connection refused".into(),
                });
            }
            Ok(Box::new(MemorySession {
                server: self.clone(),
                logged_in: false,
            }))
        }
    }

    impl FtpSession for MemorySession {
        fn login(&mut self, _username: &str, _password: &str) -> Result<(), UploadError> {
            if self.server.reject_login {
                return Err(UploadError::Login("530 Login incorrect".into()));
            }
            self.logged_in = true;
            Ok(())
        }

        fn delete(&mut self, path: &str) -> Result<(), UploadError> {
            assert!(self.logged_in);
            match self.server.files.lock().unwrap().remove(path) {
                Some(_) => Ok(()),
                None => Err(UploadError::Delete {
                    path: path.into(),
                    message: "550 No such file".into(),
                }),
            }
        }

        fn store(&mut self, path: &str, reader: &mut dyn Read) -> Result<u64, UploadError> {
            assert!(self.logged_in);
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes).unwrap();
            let len = bytes.len() as u64;
            self.server.files.lock().unwrap().insert(path.into(), bytes);
            Ok(len)
        }

        fn quit(&mut self) {}
    }

    fn uploader(server: &MemoryFtp) -> FtpUploader<MemoryFtp> {
        FtpUploader::new(server.clone(), "cam", "secret", "/capture/")
    }

    #[test]
    fn stores_under_remote_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("latest_image.jpg");
        fs::write(&local, b"jpeg").unwrap();
        let server = MemoryFtp::default();

        let result = uploader(&server).upload(&local, "latest_image.jpg", false);

        assert!(result.success());
        assert_eq!(result.remote_path, "capture/latest_image.jpg");
        assert_eq!(server.file("capture/latest_image.jpg").unwrap(), b"jpeg");
    }

    #[test]
    fn missing_local_file_fails_without_connecting() {
        let server = MemoryFtp::default();
        let result = uploader(&server).upload(Path::new("/nonexistent/x.jpg"), "x.jpg", true);

        assert!(!result.success());
        assert!(matches!(result.error(), Some(UploadError::MissingFile { .. })));
        assert_eq!(server.connects(), 0);
    }

    #[test]
    fn replacing_latest_keeps_only_newest_content() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("latest_image.jpg");
        let server = MemoryFtp::default();
        let store = uploader(&server);

        fs::write(&local, b"first").unwrap();
        assert!(store.upload(&local, "latest_image.jpg", true).success());
        fs::write(&local, b"second").unwrap();
        assert!(store.upload(&local, "latest_image.jpg", true).success());

        assert_eq!(server.file("capture/latest_image.jpg").unwrap(), b"second");
        assert_eq!(server.files.lock().unwrap().len(), 1);
    }

    #[test]
    fn missing_pointer_does_not_abort_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("response.json");
        fs::write(&local, b"null").unwrap();
        let server = MemoryFtp::default();

        let result = uploader(&server).upload(&local, "response.json", true);

        assert!(result.success());
        assert_eq!(server.file("capture/response.json").unwrap(), b"null");
    }

    #[test]
    fn login_and_connect_failures_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("latest_image.jpg");
        fs::write(&local, b"jpeg").unwrap();

        let server = MemoryFtp {
            reject_login: true,
            ..MemoryFtp::default()
        };
        let result = uploader(&server).upload(&local, "latest_image.jpg", false);
        assert!(matches!(result.error(), Some(UploadError::Login(_))));
        assert!(server.file("capture/latest_image.jpg").is_none());

        let server = MemoryFtp {
            refuse_connect: true,
            ..MemoryFtp::default()
        };
        let result = uploader(&server).upload(&local, "latest_image.jpg", false);
        assert!(matches!(result.error(), Some(UploadError::Connect { .. })));
    }

    #[test]
    fn empty_remote_dir_stores_at_root() {
        let store = FtpUploader::new(MemoryFtp::default(), "u", "p", "");
        assert_eq!(store.remote_path("a.jpg"), "a.jpg");
    }

    #[test]
    fn unresolvable_host_is_connect_error() {
        let connector = SuppaFtpConnector {
            host: "host.invalid".into(),
            port: 21,
            passive: false,
            timeout: Duration::from_secs(1),
        };
        assert!(matches!(
            connector.connect().err(),
            Some(UploadError::Connect { .. })
        ));
    }
}
