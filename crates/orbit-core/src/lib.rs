pub mod directory;
pub mod gpu;
pub mod jobs;
pub mod net;
pub mod nodes;
pub mod pool;
pub mod runtime;
pub mod template;
pub mod vpn;
pub mod watcher;

pub use jobs::JobService;
pub use nodes::NodeService;
pub use pool::{CreateOpts, JoinOpts, PoolManager, PoolOutcome};
pub use runtime::{ComposeParams, ContainerRuntime, DockerRuntime, HostRuntime, RuntimeRole};
pub use template::TemplateEngine;
pub use vpn::VpnAdapter;
pub use watcher::WatcherClient;

/// Label attached to every object of one deployment; deleting by this
/// label collects the workload and its derived Services in one sweep.
pub const JOB_NAME_LABEL: &str = "orbit.job.name";

/// Node label marking longhorn-compatible storage hosts.
pub const STORAGE_LABEL: &str = "orbit.storage.enabled";

/// Node label carrying the cluster role (`server` or `worker`).
pub const ROLE_LABEL: &str = "orbit/role";
