//! Local certificate files consumed by the TLS serving process.
//!
//! Every file is written to a temporary file in the target directory and
//! renamed over the destination, so a reader never sees a partial file.

use crate::bundle::CertificateBundle;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

pub const CA_CERT_FILE: &str = "ca.crt";
pub const TLS_KEY_FILE: &str = "tls.key";
pub const TLS_CERT_FILE: &str = "tls.crt";

const DIR_MODE: u32 = 0o700;
const FILE_MODE: u32 = 0o600;

#[derive(Error, Debug)]
#[error("Failed to write {}: {source}", .path.display())]
pub struct WriteError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Write the bundle's CA certificate, leaf key and leaf certificate to `dir`.
///
/// The directory is created owner-only if absent. A failure on one file does
/// not stop the others from being attempted; the first failure is returned.
pub fn persist(bundle: &CertificateBundle, dir: impl AsRef<Path>) -> Result<(), WriteError> {
    let dir = dir.as_ref();
    create_dir(dir).map_err(|source| WriteError {
        path: dir.to_path_buf(),
        source,
    })?;

    let files = [
        (CA_CERT_FILE, bundle.ca_cert()),
        (TLS_KEY_FILE, bundle.leaf_key()),
        (TLS_CERT_FILE, bundle.leaf_cert()),
    ];

    let mut first_error = None;
    for (name, contents) in files {
        let path = dir.join(name);
        match write_atomic(&path, contents) {
            Ok(()) => debug!(path = %path.display(), "Wrote certificate file"),
            Err(source) => {
                warn!(path = %path.display(), error = %source, "Failed to write certificate file");
                first_error.get_or_insert(WriteError { path, source });
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Read back the three files written by [`persist`].
pub fn read_bundle(dir: impl AsRef<Path>) -> io::Result<CertificateBundle> {
    let dir = dir.as_ref();
    Ok(CertificateBundle::from_parts(
        fs::read(dir.join(CA_CERT_FILE))?,
        fs::read(dir.join(TLS_CERT_FILE))?,
        fs::read(dir.join(TLS_KEY_FILE))?,
    ))
}

#[cfg(unix)]
fn create_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(DIR_MODE)
        .create(dir)
}

#[cfg(not(unix))]
fn create_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(fs::Permissions::from_mode(FILE_MODE))?;
    }

    temp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_bundle() -> CertificateBundle {
        CertificateBundle::from_parts(
            b"-----CA CERT-----\n".to_vec(),
            b"-----LEAF CERT-----\n".to_vec(),
            b"-----LEAF KEY-----\n".to_vec(),
        )
    }

    #[test]
    fn test_persist_creates_directory_and_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let cert_dir = temp_dir.path().join("serving-certs").join("nested");
        let bundle = sample_bundle();

        persist(&bundle, &cert_dir).unwrap();

        assert!(cert_dir.is_dir());
        let loaded = read_bundle(&cert_dir).unwrap();
        assert_eq!(loaded, bundle);
    }

    #[cfg(unix)]
    #[test]
    fn test_persist_uses_owner_only_modes() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let cert_dir = temp_dir.path().join("certs");
        persist(&sample_bundle(), &cert_dir).unwrap();

        let dir_mode = fs::metadata(&cert_dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, DIR_MODE);

        for name in [CA_CERT_FILE, TLS_KEY_FILE, TLS_CERT_FILE] {
            let mode = fs::metadata(cert_dir.join(name)).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, FILE_MODE, "unexpected mode for {}", name);
        }
    }

    #[test]
    fn test_persist_overwrites_existing_files() {
        let temp_dir = TempDir::new().unwrap();
        persist(&sample_bundle(), temp_dir.path()).unwrap();

        let replacement = CertificateBundle::from_parts(
            b"new ca".to_vec(),
            b"new leaf".to_vec(),
            b"new key".to_vec(),
        );
        persist(&replacement, temp_dir.path()).unwrap();

        assert_eq!(read_bundle(temp_dir.path()).unwrap(), replacement);
    }

    #[test]
    fn test_persist_leaves_no_temporary_files() {
        let temp_dir = TempDir::new().unwrap();
        persist(&sample_bundle(), temp_dir.path()).unwrap();

        let mut names: Vec<String> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![CA_CERT_FILE, TLS_CERT_FILE, TLS_KEY_FILE]);
    }

    #[test]
    fn test_persist_is_best_effort() {
        let temp_dir = TempDir::new().unwrap();
        // A directory where the key should go makes that single rename fail.
        fs::create_dir(temp_dir.path().join(TLS_KEY_FILE)).unwrap();

        let bundle = sample_bundle();
        let err = persist(&bundle, temp_dir.path()).unwrap_err();

        assert_eq!(err.path, temp_dir.path().join(TLS_KEY_FILE));
        assert_eq!(
            fs::read(temp_dir.path().join(CA_CERT_FILE)).unwrap(),
            bundle.ca_cert()
        );
        assert_eq!(
            fs::read(temp_dir.path().join(TLS_CERT_FILE)).unwrap(),
            bundle.leaf_cert()
        );
    }
}
