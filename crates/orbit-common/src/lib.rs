pub mod config;
pub mod error;
pub mod model;
pub mod telemetry;
pub mod template;
pub mod token;

pub use config::{ConfigStore, PoolConfig};
pub use error::{Error, Result, TemplateError};
pub use model::{
    DeployResult, Gpu, Job, JobStatus, LabelsOp, Node, NodeRole, ResourceQuota, ResourceSummary,
    UserSpace,
};
pub use template::{TemplateBundle, TemplateKind, TemplateMetadata, TemplateValue};
pub use token::{JoinToken, TokenMode};
