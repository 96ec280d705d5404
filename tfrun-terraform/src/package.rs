//! Downloading and unpacking zip packages

use std::fs::File;
use std::path::Path;

use log::debug;
use tokio::io::AsyncWriteExt;

use crate::error::{SetupError, SetupResult};

/// Download `url` into `destination` with a single GET
pub async fn download_file(
    client: &reqwest::Client,
    url: &str,
    destination: &Path,
) -> SetupResult<()> {
    debug!("downloading {} to {}", url, destination.display());

    let mut response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(SetupError::http(url))?;

    let mut file = tokio::fs::File::create(destination)
        .await
        .map_err(SetupError::io(destination))?;

    while let Some(chunk) = response.chunk().await.map_err(SetupError::http(url))? {
        file.write_all(&chunk)
            .await
            .map_err(SetupError::io(destination))?;
    }
    file.flush().await.map_err(SetupError::io(destination))?;

    Ok(())
}

/// Fetch a small text document such as a checksum list
pub async fn fetch_text(client: &reqwest::Client, url: &str) -> SetupResult<String> {
    client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(SetupError::http(url))?
        .text()
        .await
        .map_err(SetupError::http(url))
}

/// Unpack `archive` into `destination`, preserving its directory structure
pub async fn unzip_file(archive: &Path, destination: &Path) -> SetupResult<()> {
    let archive = archive.to_path_buf();
    let destination = destination.to_path_buf();
    tokio::task::spawn_blocking(move || unzip_blocking(&archive, &destination))
        .await
        .map_err(|e| SetupError::Task(e.to_string()))?
}

fn unzip_blocking(archive_path: &Path, destination: &Path) -> SetupResult<()> {
    let file = File::open(archive_path).map_err(SetupError::io(archive_path))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|source| SetupError::Archive {
        path: archive_path.to_path_buf(),
        source,
    })?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|source| SetupError::Archive {
            path: archive_path.to_path_buf(),
            source,
        })?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| SetupError::UnsafeEntry(entry.name().to_string()))?;
        let out_path = destination.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(SetupError::io(&out_path))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(SetupError::io(parent))?;
        }
        let mut out = File::create(&out_path).map_err(SetupError::io(&out_path))?;
        std::io::copy(&mut entry, &mut out).map_err(SetupError::io(&out_path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode & 0o777))
                    .map_err(SetupError::io(&out_path))?;
            }
        }
    }

    Ok(())
}

/// Download a zip package, unpack it into `root`, and remove the archive
pub async fn prepare_package(
    client: &reqwest::Client,
    url: &str,
    root: &Path,
    package_name: &str,
) -> SetupResult<()> {
    let package_path = root.join(package_name);
    download_file(client, url, &package_path).await?;
    unzip_file(&package_path, root).await?;
    tokio::fs::remove_file(&package_path)
        .await
        .map_err(SetupError::io(&package_path))?;
    Ok(())
}
