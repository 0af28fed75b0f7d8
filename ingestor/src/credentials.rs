use crate::config::CredentialConfig;
use crate::errors::{Error, Result};
use rumqttc::Transport;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

const ROOT_CA_FILE: &str = "root-CA.pem";
const CERTIFICATE_FILE: &str = "certificate.pem.crt";
const PRIVATE_KEY_FILE: &str = "private.pem.key";

/// Resolved mTLS material for the broker session.
///
/// When built from inline contents the files live in a private temporary
/// directory owned by this value; dropping it (or calling [`close`]) removes
/// them.
///
/// [`close`]: Credentials::close
#[derive(Debug)]
pub struct Credentials {
    pub root_ca: PathBuf,
    pub certificate: PathBuf,
    pub private_key: PathBuf,
    temp_dir: Option<TempDir>,
}

impl Credentials {
    pub fn resolve(config: &CredentialConfig) -> Result<Self> {
        if let (Some(ca), Some(cert), Some(key)) = (
            non_empty(&config.root_ca_content),
            non_empty(&config.certificate_content),
            non_empty(&config.private_key_content),
        ) {
            info!("Using broker certificates from inline environment contents");
            return Self::materialize(ca, cert, key);
        }

        let paths = [
            &config.root_ca_path,
            &config.certificate_path,
            &config.private_key_path,
        ];
        if paths.iter().all(|p| p.is_file()) {
            info!("Using broker certificates from files");
            return Ok(Self {
                root_ca: config.root_ca_path.clone(),
                certificate: config.certificate_path.clone(),
                private_key: config.private_key_path.clone(),
                temp_dir: None,
            });
        }

        Err(Error::Credentials(format!(
            "no usable broker certificates found. Either 1) set MQTT_ROOT_CA_CONTENT, \
             MQTT_CERTIFICATE_CONTENT and MQTT_PRIVATE_KEY_CONTENT, or 2) provide the files \
             {}, {} and {} (paths overridable with MQTT_ROOT_CA, MQTT_CERTIFICATE, MQTT_PRIVATE_KEY)",
            config.root_ca_path.display(),
            config.certificate_path.display(),
            config.private_key_path.display()
        )))
    }

    fn materialize(ca: &str, cert: &str, key: &str) -> Result<Self> {
        let temp_dir = tempfile::Builder::new()
            .prefix("imu-ingestor-certs-")
            .tempdir()?;

        let root_ca = temp_dir.path().join(ROOT_CA_FILE);
        let certificate = temp_dir.path().join(CERTIFICATE_FILE);
        let private_key = temp_dir.path().join(PRIVATE_KEY_FILE);

        write_owner_read_only(&root_ca, ca)?;
        write_owner_read_only(&certificate, cert)?;
        write_owner_read_only(&private_key, key)?;

        debug!("Temporary certificates written to {}", temp_dir.path().display());
        Ok(Self {
            root_ca,
            certificate,
            private_key,
            temp_dir: Some(temp_dir),
        })
    }

    pub fn is_temporary(&self) -> bool {
        self.temp_dir.is_some()
    }

    /// Loads the PEM files into a mutual-TLS transport.
    pub fn transport(&self) -> Result<Transport> {
        let ca = read_pem(&self.root_ca)?;
        let cert = read_pem(&self.certificate)?;
        let key = read_pem(&self.private_key)?;

        Ok(Transport::tls(ca, Some((cert, key)), None))
    }

    /// Removes temporary material, if any. File-based credentials are left
    /// untouched.
    pub fn close(mut self) -> io::Result<bool> {
        match self.temp_dir.take() {
            Some(dir) => {
                dir.close()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn write_owner_read_only(path: &Path, contents: &str) -> io::Result<()> {
    fs::write(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o400))?;
    }
    Ok(())
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    let bytes = fs::read(path).map_err(|e| {
        Error::Credentials(format!("cannot read {}: {}", path.display(), e))
    })?;
    if !bytes.windows(11).any(|w| w == b"-----BEGIN ") {
        return Err(Error::Credentials(format!(
            "{} is not PEM encoded",
            path.display()
        )));
    }
    Ok(bytes)
}
