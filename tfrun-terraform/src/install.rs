//! Installing an exact Terraform release
//!
//! Releases are fetched from a HashiCorp releases mirror laid out as
//! `<base>/terraform/<version>/terraform_<version>_<os>_<arch>.zip`, next to a
//! `terraform_<version>_SHA256SUMS` list used to verify the download.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use log::info;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::{SetupError, SetupResult};
use crate::package::{download_file, fetch_text, unzip_file};

/// Default releases mirror
pub const DEFAULT_RELEASES_URL: &str = "https://releases.hashicorp.com";

static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?(\d+\.\d+\.\d+(?:-[0-9A-Za-z.]+)?)$").expect("version pattern is valid")
});

/// A Terraform release version such as `1.5.7` or `1.6.0-beta1`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerraformVersion(String);

impl TerraformVersion {
    pub fn parse(raw: &str) -> SetupResult<Self> {
        let trimmed = raw.trim();
        VERSION_PATTERN
            .captures(trimmed)
            .and_then(|caps| caps.get(1))
            .map(|m| Self(m.as_str().to_string()))
            .ok_or_else(|| SetupError::InvalidVersion(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TerraformVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read the version file of a module package
pub async fn read_version(path: &Path) -> SetupResult<TerraformVersion> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(SetupError::io(path))?;
    TerraformVersion::parse(&raw)
}

/// Release platform name (os, arch) for the running host
pub fn platform() -> SetupResult<(&'static str, &'static str)> {
    let os = match std::env::consts::OS {
        "linux" => "linux",
        "macos" => "darwin",
        "windows" => "windows",
        "freebsd" => "freebsd",
        "openbsd" => "openbsd",
        "solaris" => "solaris",
        other => return Err(unsupported(other, std::env::consts::ARCH)),
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "arm" => "arm",
        other => return Err(unsupported(std::env::consts::OS, other)),
    };
    Ok((os, arch))
}

fn unsupported(os: &str, arch: &str) -> SetupError {
    SetupError::UnsupportedPlatform {
        os: os.to_string(),
        arch: arch.to_string(),
    }
}

/// File name of the Terraform binary on this platform
pub fn binary_name() -> &'static str {
    if cfg!(windows) {
        "terraform.exe"
    } else {
        "terraform"
    }
}

/// Installs Terraform releases into a directory
#[derive(Debug, Clone)]
pub struct Installer {
    client: reqwest::Client,
    releases_url: String,
}

impl Installer {
    pub fn new(client: reqwest::Client, releases_url: impl Into<String>) -> Self {
        Self {
            client,
            releases_url: releases_url.into(),
        }
    }

    fn release_url(&self, version: &TerraformVersion) -> String {
        format!(
            "{}/terraform/{}",
            self.releases_url.trim_end_matches('/'),
            version
        )
    }

    /// Install `version` into `dir` and return the path of the binary
    pub async fn install(&self, dir: &Path, version: &TerraformVersion) -> SetupResult<PathBuf> {
        let (os, arch) = platform()?;
        let archive_name = format!("terraform_{}_{}_{}.zip", version, os, arch);
        let release_url = self.release_url(version);

        let sums_url = format!("{}/terraform_{}_SHA256SUMS", release_url, version);
        let sums = fetch_text(&self.client, &sums_url).await?;
        let expected = find_checksum(&sums, &archive_name)
            .ok_or_else(|| SetupError::MissingChecksum(archive_name.clone()))?;

        let archive_path = dir.join(&archive_name);
        let archive_url = format!("{}/{}", release_url, archive_name);
        download_file(&self.client, &archive_url, &archive_path).await?;

        let actual = sha256_file(&archive_path).await?;
        if !actual.eq_ignore_ascii_case(&expected) {
            let _ = tokio::fs::remove_file(&archive_path).await;
            return Err(SetupError::ChecksumMismatch {
                file: archive_name,
                expected,
                actual,
            });
        }

        unzip_file(&archive_path, dir).await?;
        tokio::fs::remove_file(&archive_path)
            .await
            .map_err(SetupError::io(&archive_path))?;

        let exec_path = dir.join(binary_name());
        make_executable(&exec_path).await?;

        info!("installed terraform {} at {}", version, exec_path.display());
        Ok(exec_path)
    }
}

/// Look up the checksum of `file_name` in a `SHA256SUMS` listing
fn find_checksum(sums: &str, file_name: &str) -> Option<String> {
    sums.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let hash = parts.next()?;
        let name = parts.next()?;
        (name == file_name).then(|| hash.to_string())
    })
}

async fn sha256_file(path: &Path) -> SetupResult<String> {
    let bytes = tokio::fs::read(path).await.map_err(SetupError::io(path))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

async fn make_executable(path: &Path) -> SetupResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(SetupError::io(path))?;
    }
    #[cfg(not(unix))]
    {
        tokio::fs::metadata(path)
            .await
            .map_err(SetupError::io(path))?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::package::tests::zip_bytes;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Serve a fake release of `version` for the host platform
    pub(crate) async fn mount_release(server: &MockServer, version: &str, script: &str) {
        let (os, arch) = platform().unwrap();
        let archive_name = format!("terraform_{}_{}_{}.zip", version, os, arch);
        let archive = zip_bytes(&[(binary_name(), script)]);
        let sums = format!(
            "{}  terraform_{}_other_arch.zip\n{}  {}\n",
            "0".repeat(64),
            version,
            hex::encode(Sha256::digest(&archive)),
            archive_name
        );

        Mock::given(method("GET"))
            .and(path(format!("/terraform/{}/terraform_{}_SHA256SUMS", version, version)))
            .respond_with(ResponseTemplate::new(200).set_body_string(sums))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/terraform/{}/{}", version, archive_name)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
            .mount(server)
            .await;
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(TerraformVersion::parse("1.5.7\n").unwrap().as_str(), "1.5.7");
        assert_eq!(TerraformVersion::parse(" v1.6.0-beta1 ").unwrap().as_str(), "1.6.0-beta1");
        assert!(matches!(
            TerraformVersion::parse("latest"),
            Err(SetupError::InvalidVersion(v)) if v == "latest"
        ));
        assert!(TerraformVersion::parse("1.5").is_err());
        assert!(TerraformVersion::parse("").is_err());
    }

    #[tokio::test]
    async fn test_read_version_trims() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("TF_VERSION");
        std::fs::write(&file, "  1.5.7\n\n").unwrap();

        assert_eq!(read_version(&file).await.unwrap().as_str(), "1.5.7");
    }

    #[tokio::test]
    async fn test_read_version_missing_file() {
        let dir = tempdir().unwrap();
        let err = read_version(&dir.path().join("TF_VERSION")).await.unwrap_err();
        assert!(matches!(err, SetupError::Io { .. }));
    }

    #[test]
    fn test_find_checksum() {
        let sums = "aaa  terraform_1.5.7_darwin_arm64.zip\nbbb  terraform_1.5.7_linux_amd64.zip\n";
        assert_eq!(
            find_checksum(sums, "terraform_1.5.7_linux_amd64.zip"),
            Some("bbb".to_string())
        );
        assert_eq!(find_checksum(sums, "terraform_1.5.7_linux_386.zip"), None);
    }

    #[tokio::test]
    async fn test_install_verifies_and_unpacks() {
        let server = MockServer::start().await;
        mount_release(&server, "1.5.7", "#!/bin/sh\necho fake\n").await;

        let dir = tempdir().unwrap();
        let installer = Installer::new(reqwest::Client::new(), server.uri());
        let version = TerraformVersion::parse("1.5.7").unwrap();
        let exec_path = installer.install(dir.path(), &version).await.unwrap();

        assert_eq!(exec_path, dir.path().join(binary_name()));
        assert!(exec_path.is_file());
        let leftover_zips = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "zip"))
            .count();
        assert_eq!(leftover_zips, 0);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&exec_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[tokio::test]
    async fn test_install_rejects_checksum_mismatch() {
        let server = MockServer::start().await;
        let (os, arch) = platform().unwrap();
        let archive_name = format!("terraform_1.5.7_{}_{}.zip", os, arch);

        Mock::given(method("GET"))
            .and(path("/terraform/1.5.7/terraform_1.5.7_SHA256SUMS"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!("{}  {}\n", "f".repeat(64), archive_name)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/terraform/1.5.7/{}", archive_name)))
            .respond_with(
                ResponseTemplate::new(200).set_body_bytes(zip_bytes(&[("terraform", "x")])),
            )
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let installer = Installer::new(reqwest::Client::new(), server.uri());
        let version = TerraformVersion::parse("1.5.7").unwrap();
        let err = installer.install(dir.path(), &version).await.unwrap_err();

        assert!(matches!(err, SetupError::ChecksumMismatch { .. }));
        assert!(!dir.path().join("terraform").exists());
    }

    #[tokio::test]
    async fn test_install_missing_release() {
        let server = MockServer::start().await;
        let dir = tempdir().unwrap();
        let installer = Installer::new(reqwest::Client::new(), server.uri());
        let version = TerraformVersion::parse("9.9.9").unwrap();

        let err = installer.install(dir.path(), &version).await.unwrap_err();
        assert!(matches!(err, SetupError::Http { .. }));
    }
}
