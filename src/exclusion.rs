use crate::config::BackendConfig;

/// Whether a request for `host`/`path` may wake `backend`.
///
/// Ignored hosts and paths are compared by exact string equality.
pub fn permits_wake(backend: &BackendConfig, host: &str, path: &str) -> bool {
    if !backend.wol_enabled {
        return false;
    }
    if backend.ignored_hosts.iter().any(|h| h == host) {
        return false;
    }
    !backend.ignored_paths.iter().any(|p| p == path)
}
