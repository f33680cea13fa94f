//! Cluster topology lookup.
//!
//! Topology discovery itself belongs to the cluster manager; the
//! orchestrator only needs a snapshot of which nodes hold which role.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("cluster {cluster} not found ({})", .path.display())]
    NotFound { cluster: String, path: PathBuf },

    #[error("failed to read topology of {cluster}: {source}")]
    Io {
        cluster: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse topology of {cluster}: {source}")]
    Parse {
        cluster: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Pd,
    Tikv,
    Tidb,
    Tiflash,
    Cdc,
    #[serde(other)]
    Other,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Pd => "pd",
            Role::Tikv => "tikv",
            Role::Tidb => "tidb",
            Role::Tiflash => "tiflash",
            Role::Cdc => "cdc",
            Role::Other => "other",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub role: Role,
    pub host: String,
    pub port: u16,
}

impl Instance {
    pub fn http_address(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default, rename = "instance")]
    pub instances: Vec<Instance>,
}

impl Topology {
    pub fn nodes_with_role(&self, role: Role) -> Vec<&Instance> {
        self.instances.iter().filter(|i| i.role == role).collect()
    }

    /// Address of the first PD node.
    pub fn control_plane_address(&self) -> Option<String> {
        self.nodes_with_role(Role::Pd)
            .first()
            .map(|pd| pd.http_address())
    }
}

/// Read-only access to cluster topologies.
pub trait TopologySource: Send + Sync {
    fn topology(&self, cluster: &str) -> Result<Topology, TopologyError>;
}

/// Topologies stored as `<root>/<cluster>/topology.toml`.
#[derive(Debug, Clone)]
pub struct FileTopology {
    root: PathBuf,
}

impl FileTopology {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, cluster: &str) -> PathBuf {
        self.root.join(cluster).join("topology.toml")
    }
}

impl TopologySource for FileTopology {
    fn topology(&self, cluster: &str) -> Result<Topology, TopologyError> {
        let path = self.path_for(cluster);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TopologyError::NotFound {
                    cluster: cluster.to_string(),
                    path,
                })
            }
            Err(source) => {
                return Err(TopologyError::Io {
                    cluster: cluster.to_string(),
                    source,
                })
            }
        };
        toml::from_str(&content).map_err(|source| TopologyError::Parse {
            cluster: cluster.to_string(),
            source,
        })
    }
}

/// Cluster names double as directory names, so keep them to a safe charset.
pub fn is_valid_cluster_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}
