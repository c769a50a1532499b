use std::fs::Permissions;
use std::path::{Path, PathBuf};

use reqwest::{Method, Url};
use ring::digest;
use tempfile::TempPath;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::{
    dataset::{ComponentSource, DatasetBlob},
    decode,
    error::DownloadError,
    types::Digest,
};

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, Default)]
pub struct DownloadOptions {
    /// Check the decoded bytes against the component's recorded SHA-256, if it has one.
    pub verify_checksums: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Downloaded {
    pub destination: PathBuf,
    pub bytes: u64,
    pub sha256: Digest,
}

impl<S: ComponentSource> DatasetBlob<S> {
    /// Fetch one component of this blob into `destination`, replacing
    /// whatever is there.
    pub async fn download(
        &self,
        component_path: &str,
        destination: impl AsRef<Path>,
    ) -> Result<Downloaded, DownloadError> {
        self.download_with(component_path, destination, DownloadOptions::default())
            .await
    }

    pub async fn download_with(
        &self,
        component_path: &str,
        destination: impl AsRef<Path>,
        options: DownloadOptions,
    ) -> Result<Downloaded, DownloadError> {
        let destination = destination.as_ref();

        let binding = self.binding().ok_or_else(DownloadError::unbound)?;
        let commit = binding.commit().ok_or_else(DownloadError::commit_dropped)?;

        let expected = if options.verify_checksums {
            let expected = self
                .component(component_path)
                .and_then(|component| component.sha256());
            if expected.is_none() {
                debug!(component_path, "no SHA-256 recorded; skipping verification");
            }
            expected
        } else {
            None
        };

        let url = commit
            .url_for_artifact(binding.blob_path(), component_path, Method::GET)
            .await?;

        let response = commit.connection().get_artifact(url.clone()).await?;
        let body = decode::decoded_body(response).await?;

        let downloaded = write_atomically(body, &url, destination, expected).await?;

        info!(
            destination = %downloaded.destination.display(),
            bytes = downloaded.bytes,
            "download complete"
        );

        Ok(downloaded)
    }
}

/// Mode for a newly created destination, before the umask, as a plain
/// `File::create` would use. tempfile alone would leave it owner-only.
fn new_file_permissions() -> Option<Permissions> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        Some(Permissions::from_mode(0o666))
    }
    #[cfg(not(unix))]
    {
        None
    }
}

fn parent_dir(destination: &Path) -> &Path {
    match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Stream `body` into a temporary file next to `destination`, then rename it
/// into place. On any failure the temporary file is removed and
/// `destination` is left as it was.
async fn write_atomically<R: AsyncRead + Unpin>(
    mut body: R,
    url: &Url,
    destination: &Path,
    expected: Option<&str>,
) -> Result<Downloaded, DownloadError> {
    let parent = parent_dir(destination);
    fs::create_dir_all(parent)
        .await
        .map_err(|source| DownloadError::io(parent, source))?;

    // Overwriting keeps the destination's existing permissions
    let existing = fs::metadata(destination)
        .await
        .ok()
        .filter(|metadata| metadata.is_file())
        .map(|metadata| metadata.permissions());

    let mut builder = tempfile::Builder::new();
    builder.prefix(".datablob-").suffix(".part");
    if let Some(permissions) = new_file_permissions() {
        builder.permissions(permissions);
    }

    let (file, temp_path) = builder
        .tempfile_in(parent)
        .map_err(|source| DownloadError::io(parent, source))?
        .into_parts();
    let mut file = fs::File::from_std(file);

    let mut hasher = digest::Context::new(&digest::SHA256);
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut bytes = 0u64;

    loop {
        let read = body
            .read(&mut buffer)
            .await
            .map_err(|err| DownloadError::stream(url, err))?;
        if read == 0 {
            break;
        }

        file.write_all(&buffer[..read])
            .await
            .map_err(|source| DownloadError::io(&temp_path, source))?;
        hasher.update(&buffer[..read]);
        bytes += read as u64;
    }

    file.flush()
        .await
        .map_err(|source| DownloadError::io(&temp_path, source))?;
    file.sync_all()
        .await
        .map_err(|source| DownloadError::io(&temp_path, source))?;
    if let Some(permissions) = existing {
        file.set_permissions(permissions)
            .await
            .map_err(|source| DownloadError::io(&temp_path, source))?;
    }
    drop(file);

    let sha256 = Digest::from_sha256(&hasher.finish());

    if let Some(expected) = expected {
        if !sha256.matches(expected) {
            warn!(destination = %destination.display(), %expected, actual = %sha256, "checksum mismatch");
            return Err(DownloadError::ChecksumMismatch {
                path: destination.to_path_buf(),
                expected: expected.to_string(),
                actual: sha256.to_string(),
            });
        }
    }

    persist(temp_path, destination)?;

    Ok(Downloaded {
        destination: destination.to_path_buf(),
        bytes,
        sha256,
    })
}

fn persist(temp_path: TempPath, destination: &Path) -> Result<(), DownloadError> {
    temp_path
        .persist(destination)
        .map_err(|err| DownloadError::io(destination, err.error))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use std::time::Duration;

    use crate::tests::{ArtifactServer, CSV, SLOW_CHUNK, SLOW_CHUNKS, temp_files};
    use crate::{
        commit::RemoteCommit, config::Configuration, connection::Connection,
        types::ComponentDescriptor,
    };

    fn blob_for(
        server: &ArtifactServer,
        commit: &Arc<RemoteCommit>,
    ) -> DatasetBlob<Vec<ComponentDescriptor>> {
        let mut blob = DatasetBlob::new(vec![
            ComponentDescriptor::new("data/train.csv")
                .with_size(CSV.len() as u64)
                .with_sha256(server.csv_sha256()),
            ComponentDescriptor::new("wrong-checksum").with_sha256("0".repeat(64)),
        ]);
        blob.bind(commit, "datasets/train");
        blob
    }

    #[test_log::test(tokio::test)]
    async fn unbound_blob_is_a_precondition_failure() {
        let server = ArtifactServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("nested/out.csv");

        let blob = DatasetBlob::new(vec![ComponentDescriptor::new("data/train.csv")]);
        let err = blob.download("data/train.csv", &destination).await.unwrap_err();

        assert!(err.is_precondition());
        assert!(!dir.path().join("nested").exists());
        assert!(server.locator_requests().is_empty());
        assert_eq!(server.artifact_hits(), 0);

        server.teardown().await;
    }

    #[test_log::test(tokio::test)]
    async fn dropped_commit_is_a_precondition_failure() {
        let server = ArtifactServer::start().await;
        let commit = Arc::new(server.commit());
        let blob = blob_for(&server, &commit);
        drop(commit);

        let dir = tempfile::tempdir().unwrap();
        let err = blob
            .download("data/train.csv", dir.path().join("out.csv"))
            .await
            .unwrap_err();

        assert!(err.is_precondition());
        assert!(server.locator_requests().is_empty());

        server.teardown().await;
    }

    #[test_log::test(tokio::test)]
    async fn downloads_plain_component() {
        let server = ArtifactServer::start().await;
        let commit = Arc::new(server.commit());
        let blob = blob_for(&server, &commit);
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.csv");

        let downloaded = blob.download("data/train.csv", &destination).await.unwrap();

        assert_eq!(std::fs::read(&destination).unwrap(), CSV);
        assert_eq!(downloaded.bytes, CSV.len() as u64);
        assert_eq!(downloaded.destination, destination);
        assert_eq!(downloaded.sha256.hash(), server.csv_sha256());
        assert!(temp_files(dir.path()).is_empty());

        server.teardown().await;
    }

    #[test_log::test(tokio::test)]
    async fn chunk_boundaries_do_not_matter() {
        let server = ArtifactServer::start().await;
        let commit = Arc::new(server.commit());
        let blob = blob_for(&server, &commit);
        let dir = tempfile::tempdir().unwrap();

        for (i, path) in ["chunked/1", "chunked/7", "chunked/4096"].iter().enumerate() {
            let destination = dir.path().join(format!("out-{i}.csv"));
            blob.download(path, &destination).await.unwrap();
            assert_eq!(std::fs::read(&destination).unwrap(), CSV, "{path}");
        }

        server.teardown().await;
    }

    #[test_log::test(tokio::test)]
    async fn content_encoding_is_decoded() {
        let server = ArtifactServer::start().await;
        let commit = Arc::new(server.commit());
        let blob = blob_for(&server, &commit);
        let dir = tempfile::tempdir().unwrap();

        for encoding in ["gzip", "deflate", "gzip-chunked"] {
            let destination = dir.path().join(format!("{encoding}.csv"));
            blob.download(&format!("encoded/{encoding}"), &destination)
                .await
                .unwrap();
            assert_eq!(std::fs::read(&destination).unwrap(), CSV, "{encoding}");
        }

        server.teardown().await;
    }

    #[test_log::test(tokio::test)]
    async fn unsupported_encoding_leaves_no_file() {
        let server = ArtifactServer::start().await;
        let commit = Arc::new(server.commit());
        let blob = blob_for(&server, &commit);
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("nested/out.bin");

        let err = blob
            .download("encoded/compress", &destination)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::UnsupportedEncoding { .. }));
        assert!(!destination.exists());

        server.teardown().await;
    }

    #[test_log::test(tokio::test)]
    async fn creates_missing_parents_and_tolerates_existing_ones() {
        let server = ArtifactServer::start().await;
        let commit = Arc::new(server.commit());
        let blob = blob_for(&server, &commit);
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("a/b/c/out.csv");

        blob.download("data/train.csv", &destination).await.unwrap();
        assert_eq!(std::fs::read(&destination).unwrap(), CSV);

        let sibling = dir.path().join("a/b/c/again.csv");
        blob.download("data/train.csv", &sibling).await.unwrap();
        assert_eq!(std::fs::read(&sibling).unwrap(), CSV);

        server.teardown().await;
    }

    #[test_log::test(tokio::test)]
    async fn overwrites_existing_destination() {
        let server = ArtifactServer::start().await;
        let commit = Arc::new(server.commit());
        let blob = blob_for(&server, &commit);
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.csv");
        std::fs::write(&destination, b"a much longer stale file that must be fully replaced".repeat(100))
            .unwrap();

        blob.download("data/train.csv", &destination).await.unwrap();

        assert_eq!(std::fs::read(&destination).unwrap(), CSV);

        server.teardown().await;
    }

    #[test_log::test(tokio::test)]
    async fn error_status_leaves_destination_alone() {
        let server = ArtifactServer::start().await;
        let commit = Arc::new(server.commit());
        let blob = blob_for(&server, &commit);
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing/out.csv");
        let err = blob.download("status/404", &missing).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(err.status(), Some(reqwest::StatusCode::NOT_FOUND));
        assert!(!dir.path().join("missing").exists());

        let existing = dir.path().join("existing.csv");
        std::fs::write(&existing, b"keep me").unwrap();
        let err = blob.download("status/503", &existing).await.unwrap_err();
        assert_eq!(err.status(), Some(reqwest::StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(std::fs::read(&existing).unwrap(), b"keep me");

        server.teardown().await;
    }

    #[test_log::test(tokio::test)]
    async fn locator_failure_is_transport() {
        let server = ArtifactServer::start().await;
        let commit = Arc::new(server.commit_for("missing-repo"));
        let blob = blob_for(&server, &commit);
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("sub/out.csv");

        let err = blob.download("data/train.csv", &destination).await.unwrap_err();

        assert!(err.is_transport());
        assert_eq!(server.artifact_hits(), 0);
        assert!(!dir.path().join("sub").exists());

        server.teardown().await;
    }

    #[test_log::test(tokio::test)]
    async fn interrupted_stream_leaves_no_partial_file() {
        let server = ArtifactServer::start().await;
        let commit = Arc::new(server.commit());
        let blob = blob_for(&server, &commit);
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.csv");
        std::fs::write(&destination, b"previous").unwrap();

        let err = blob.download("broken", &destination).await.unwrap_err();

        assert!(err.is_transport());
        assert_eq!(std::fs::read(&destination).unwrap(), b"previous");
        assert!(temp_files(dir.path()).is_empty());

        server.teardown().await;
    }

    #[test_log::test(tokio::test)]
    async fn checksum_verified_when_requested() {
        let server = ArtifactServer::start().await;
        let commit = Arc::new(server.commit());
        let blob = blob_for(&server, &commit);
        let dir = tempfile::tempdir().unwrap();
        let options = DownloadOptions {
            verify_checksums: true,
        };

        let good = dir.path().join("good.csv");
        blob.download_with("data/train.csv", &good, options)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&good).unwrap(), CSV);

        let bad = dir.path().join("bad.csv");
        std::fs::write(&bad, b"previous").unwrap();
        let err = blob
            .download_with("wrong-checksum", &bad, options)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::ChecksumMismatch { .. }));
        assert_eq!(std::fs::read(&bad).unwrap(), b"previous");
        assert!(temp_files(dir.path()).is_empty());

        // Verification is off by default
        blob.download("wrong-checksum", &bad).await.unwrap();
        assert_eq!(std::fs::read(&bad).unwrap(), CSV);

        server.teardown().await;
    }

    #[test_log::test(tokio::test)]
    async fn concurrent_downloads_to_distinct_destinations() {
        let server = ArtifactServer::start().await;
        let commit = Arc::new(server.commit());
        let blob = Arc::new(blob_for(&server, &commit));
        let dir = tempfile::tempdir().unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..8 {
            let blob = blob.clone();
            let destination = dir.path().join(format!("out-{i}.csv"));
            tasks.spawn(async move { blob.download("data/train.csv", destination).await });
        }

        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }

        for i in 0..8 {
            assert_eq!(std::fs::read(dir.path().join(format!("out-{i}.csv"))).unwrap(), CSV);
        }

        server.teardown().await;
    }

    fn blob_with_timeout(server: &ArtifactServer, timeout: Duration) -> (Arc<RemoteCommit>, DatasetBlob) {
        let config = Configuration {
            url: server.base_url().to_string(),
            timeout,
            ..Default::default()
        };
        let connection = Connection::from_config(&config).unwrap();
        let commit = Arc::new(RemoteCommit::new(connection, "42", "0123abcd"));

        let mut blob = DatasetBlob::default();
        blob.bind(&commit, "datasets/train");
        (commit, blob)
    }

    #[test_log::test(tokio::test)]
    async fn steady_download_may_outlast_timeout() {
        let server = ArtifactServer::start().await;
        let (_commit, blob) = blob_with_timeout(&server, Duration::from_secs(1));
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("slow.bin");

        let downloaded = blob.download("slow", &destination).await.unwrap();

        assert_eq!(std::fs::read(&destination).unwrap(), SLOW_CHUNK.repeat(SLOW_CHUNKS));
        assert_eq!(downloaded.bytes, (SLOW_CHUNK.len() * SLOW_CHUNKS) as u64);

        server.teardown().await;
    }

    #[test_log::test(tokio::test)]
    async fn stalled_download_times_out() {
        let server = ArtifactServer::start().await;
        let (_commit, blob) = blob_with_timeout(&server, Duration::from_secs(1));
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("stall.bin");

        let err = blob.download("stall", &destination).await.unwrap_err();

        assert!(err.is_transport());
        assert!(!destination.exists());
        assert!(temp_files(dir.path()).is_empty());

        server.teardown().await;
    }

    #[test_log::test(tokio::test)]
    async fn empty_encoded_component_is_empty_file() {
        let server = ArtifactServer::start().await;
        let commit = Arc::new(server.commit());
        let blob = blob_for(&server, &commit);
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("empty.csv");

        let downloaded = blob.download("encoded/gzip-empty", &destination).await.unwrap();

        assert_eq!(downloaded.bytes, 0);
        assert!(std::fs::read(&destination).unwrap().is_empty());

        server.teardown().await;
    }

    #[cfg(unix)]
    #[test_log::test(tokio::test)]
    async fn permissions_match_a_plain_write() {
        use std::os::unix::fs::PermissionsExt;

        let mode = |path: &Path| std::fs::metadata(path).unwrap().permissions().mode() & 0o777;

        let server = ArtifactServer::start().await;
        let commit = Arc::new(server.commit());
        let blob = blob_for(&server, &commit);
        let dir = tempfile::tempdir().unwrap();

        let existing = dir.path().join("existing.csv");
        std::fs::write(&existing, b"previous").unwrap();
        std::fs::set_permissions(&existing, Permissions::from_mode(0o640)).unwrap();
        blob.download("data/train.csv", &existing).await.unwrap();
        assert_eq!(mode(&existing), 0o640);

        let reference = dir.path().join("reference");
        std::fs::File::create(&reference).unwrap();
        let fresh = dir.path().join("fresh.csv");
        blob.download("data/train.csv", &fresh).await.unwrap();
        assert_eq!(mode(&fresh), mode(&reference));

        server.teardown().await;
    }

    #[test]
    fn bare_file_name_uses_current_directory() {
        assert_eq!(parent_dir(Path::new("out.csv")), Path::new("."));
        assert_eq!(parent_dir(Path::new("a/out.csv")), Path::new("a"));
    }
}
