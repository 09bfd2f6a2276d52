//! Container engine endpoint resolution.
//!
//! Only the connection collaborator consumes this. It describes where the
//! *host* finds the engine and has nothing to do with the environment of
//! processes running inside a container.

use std::path::PathBuf;

use crate::constants::envs;

/// Default engine socket when nothing else is configured.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/docker.sock";

/// Where the container engine listens.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DaemonEndpoint {
    /// Unix domain socket
    Unix { socket_path: PathBuf },

    /// Plain TCP (`tcp://host:port`)
    Tcp { host: String, port: u16 },
}

impl Default for DaemonEndpoint {
    fn default() -> Self {
        Self::unix(PathBuf::from(DEFAULT_SOCKET_PATH))
    }
}

impl DaemonEndpoint {
    /// Create a Unix socket endpoint.
    pub fn unix(socket_path: PathBuf) -> Self {
        Self::Unix { socket_path }
    }

    /// Create a TCP endpoint.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Resolve the endpoint from `DOCKER_HOST`, falling back to the default
    /// Unix socket.
    pub fn from_env() -> Result<Self, String> {
        Self::resolve(std::env::var(envs::DOCKER_HOST).ok().as_deref())
    }

    /// Resolve from an optional override value. Empty overrides count as
    /// unset.
    pub fn resolve(value: Option<&str>) -> Result<Self, String> {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            Some(uri) => Self::from_uri(uri),
            None => Ok(Self::default()),
        }
    }

    /// Get the URI representation of this endpoint.
    pub fn to_uri(&self) -> String {
        match self {
            DaemonEndpoint::Unix { socket_path } => format!("unix://{}", socket_path.display()),
            DaemonEndpoint::Tcp { host, port } => format!("tcp://{}:{}", host, port),
        }
    }

    /// Parse an endpoint from a URI string.
    pub fn from_uri(uri: &str) -> Result<Self, String> {
        if let Some(rest) = uri.strip_prefix("tcp://") {
            let (host, port) = rest
                .rsplit_once(':')
                .ok_or_else(|| format!("invalid TCP URI '{}': missing port", uri))?;
            if host.is_empty() {
                return Err(format!("invalid TCP URI '{}': missing host", uri));
            }
            let port = port
                .trim_end_matches('/')
                .parse::<u16>()
                .map_err(|e| format!("invalid TCP port in '{}': {}", uri, e))?;
            Ok(Self::tcp(host, port))
        } else if let Some(path) = uri.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(format!("invalid unix URI '{}': missing socket path", uri));
            }
            Ok(Self::unix(PathBuf::from(path)))
        } else {
            Err(format!(
                "invalid endpoint URI '{}': expected unix:// or tcp://",
                uri
            ))
        }
    }
}

impl std::fmt::Display for DaemonEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_uri())
    }
}

impl std::str::FromStr for DaemonEndpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_uri(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_docker_socket() {
        assert_eq!(
            DaemonEndpoint::resolve(None).unwrap().to_uri(),
            "unix:///var/run/docker.sock"
        );
        assert_eq!(
            DaemonEndpoint::resolve(Some("  ")).unwrap(),
            DaemonEndpoint::default()
        );
    }

    #[test]
    fn test_override_unix() {
        let endpoint = DaemonEndpoint::resolve(Some("unix:///run/user/1000/docker.sock")).unwrap();
        assert_eq!(
            endpoint,
            DaemonEndpoint::unix(PathBuf::from("/run/user/1000/docker.sock"))
        );
    }

    #[test]
    fn test_override_tcp() {
        let endpoint: DaemonEndpoint = "tcp://10.0.0.5:2375".parse().unwrap();
        assert_eq!(endpoint, DaemonEndpoint::tcp("10.0.0.5", 2375));
        assert_eq!(endpoint.to_string(), "tcp://10.0.0.5:2375");
    }

    #[test]
    fn test_invalid_uris() {
        assert!(DaemonEndpoint::from_uri("tcp://localhost").is_err());
        assert!(DaemonEndpoint::from_uri("tcp://:2375").is_err());
        assert!(DaemonEndpoint::from_uri("unix://").is_err());
        assert!(DaemonEndpoint::from_uri("npipe:////./pipe/docker_engine").is_err());
    }
}
