use crate::build_state::BuildStage;
use crate::client::ClientError;
use crate::conditions::ReasonType;
use crate::k8s_types::K8sType;
use crate::resource::ObjectId;

use std::fmt::{self, Display};

/// The kind of cluster call that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Fetch,
    Create,
    Update,
    UpdateStatus,
    List,
    Instantiate,
}

impl Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Operation::Fetch => "fetch",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::UpdateStatus => "update status of",
            Operation::List => "list",
            Operation::Instantiate => "instantiate",
        };
        f.write_str(name)
    }
}

/// Anything that can go wrong during a reconciliation pass. Every variant maps to a condition reason.
#[derive(Debug)]
pub enum ReconcileError {
    /// a required input is missing, for example the output image of the S2I build
    Structural(String),

    /// the custom resource cannot be turned into a desired state
    InvalidSpec(String),

    /// a call to the cluster failed
    Cluster {
        op: Operation,
        k8s_type: &'static K8sType,
        id: ObjectId,
        source: ClientError,
    },

    /// a pre or post create hook returned an error
    Hook {
        k8s_type: &'static K8sType,
        id: ObjectId,
        source: anyhow::Error,
    },

    /// the latest build of one of the build stages failed
    BuildFailed { stage: BuildStage, build_name: String },

    Serde(serde_json::Error),
}

impl ReconcileError {
    pub fn structural(message: impl Into<String>) -> ReconcileError {
        ReconcileError::Structural(message.into())
    }

    pub fn cluster(
        op: Operation,
        k8s_type: &'static K8sType,
        id: impl Into<ObjectId>,
        source: ClientError,
    ) -> ReconcileError {
        ReconcileError::Cluster {
            op,
            k8s_type,
            id: id.into(),
            source,
        }
    }

    pub fn reason(&self) -> ReasonType {
        match self {
            ReconcileError::Structural(_) => ReasonType::MissingDependency,
            ReconcileError::InvalidSpec(_) | ReconcileError::Serde(_) => {
                ReasonType::ParseCRRequestFailed
            }
            ReconcileError::Cluster { op, .. } => match op {
                Operation::Fetch | Operation::List => ReasonType::RetrieveDeployedResourceFailed,
                Operation::Create => ReasonType::CreateResourceFailed,
                Operation::Update | Operation::UpdateStatus => ReasonType::UpdateResourceFailed,
                Operation::Instantiate => ReasonType::TriggerBuildFailed,
            },
            ReconcileError::Hook { .. } => ReasonType::CreateResourceFailed,
            ReconcileError::BuildFailed { stage, .. } => match stage {
                BuildStage::S2I => ReasonType::BuildS2IFailed,
                BuildStage::Runtime => ReasonType::BuildRuntimeFailed,
            },
        }
    }

    /// conflicts are expected when something else modified the object since it was fetched
    pub fn is_conflict(&self) -> bool {
        match self {
            ReconcileError::Cluster { source, .. } => source.is_conflict(),
            _ => false,
        }
    }
}

impl Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReconcileError::Structural(msg) => write!(f, "missing dependency: {}", msg),
            ReconcileError::InvalidSpec(msg) => write!(f, "invalid custom resource: {}", msg),
            ReconcileError::Cluster {
                op,
                k8s_type,
                id,
                source,
            } => write!(f, "failed to {} {} {}: {}", op, k8s_type.kind, id, source),
            ReconcileError::Hook {
                k8s_type,
                id,
                source,
            } => write!(f, "create hook failed for {} {}: {}", k8s_type.kind, id, source),
            ReconcileError::BuildFailed { stage, build_name } => {
                write!(f, "{} build {} failed", stage, build_name)
            }
            ReconcileError::Serde(e) => write!(f, "(De)Serialization error: {}", e),
        }
    }
}

impl std::error::Error for ReconcileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReconcileError::Cluster { source, .. } => Some(source as &(dyn std::error::Error + 'static)),
            ReconcileError::Hook { source, .. } => {
                Some(&**source as &(dyn std::error::Error + 'static))
            }
            ReconcileError::Serde(e) => Some(e as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ReconcileError {
    fn from(e: serde_json::Error) -> ReconcileError {
        ReconcileError::Serde(e)
    }
}

/// Returned by a builder chain that stopped at a failing step. `bundle` holds everything that was
/// produced by the steps before it.
#[derive(Debug)]
pub struct ChainError<B> {
    pub step: &'static str,
    pub bundle: B,
    pub error: ReconcileError,
}

impl<B> ChainError<B> {
    pub fn into_error(self) -> ReconcileError {
        self.error
    }
}

impl<B> Display for ChainError<B> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "step '{}' failed: {}", self.step, self.error)
    }
}

impl<B: fmt::Debug> std::error::Error for ChainError<B> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error as &(dyn std::error::Error + 'static))
    }
}
