use super::{RemoteError, RemoteTransfer};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Remote directory that holds the worker runtime files.
pub const REMOTE_RUNTIME_DIR: &str = "agent";

/// Pushes local runtime files to each remote host once per process. Files whose digest
/// already matches on the remote side are skipped.
#[derive(Debug, Default)]
pub struct RuntimeSync {
    synced_hosts: BTreeSet<String>,
}

impl RuntimeSync {
    pub fn is_synced(&self, host: &str) -> bool {
        self.synced_hosts.contains(host)
    }

    /// Returns how many files were copied. A host that already synced in this process
    /// copies nothing.
    pub fn sync(
        &mut self,
        transfer: &dyn RemoteTransfer,
        local_dir: Option<&Path>,
    ) -> Result<usize, RemoteError> {
        let host = transfer.host_name().to_string();
        if self.synced_hosts.contains(&host) {
            return Ok(0);
        }
        let Some(local_dir) = local_dir else {
            self.synced_hosts.insert(host);
            return Ok(0);
        };

        let mut copied = 0;
        for path in local_runtime_files(local_dir)? {
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let remote_rel = format!("{REMOTE_RUNTIME_DIR}/{name}");
            let local_bytes = fs::read(&path).map_err(|source| RemoteError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let unchanged = transfer
                .read_file(&remote_rel)?
                .map(|remote_bytes| digest_hex(&remote_bytes) == digest_hex(&local_bytes))
                .unwrap_or(false);
            if unchanged {
                continue;
            }
            transfer.write_file(&remote_rel, &local_bytes)?;
            copied += 1;
        }
        tracing::info!(host = %host, copied, "runtime files synced");
        self.synced_hosts.insert(host);
        Ok(copied)
    }
}

fn local_runtime_files(dir: &Path) -> Result<Vec<std::path::PathBuf>, RemoteError> {
    let io = |source| RemoteError::Io {
        path: dir.display().to_string(),
        source,
    };
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io)? {
        let path = entry.map_err(io)?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn digest_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
