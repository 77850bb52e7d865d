pub mod admission;
pub mod deletion;
pub mod manifests;
pub mod monitor;
pub mod orchestrator;
pub mod pipeline;
pub mod reconciler;

pub use admission::{AdmissionController, AdmissionError};
pub use deletion::{Deletion, DeletionWorkflow};
pub use monitor::{MonitorOutcome, ReadinessMonitor};
pub use orchestrator::StoreOrchestrator;
pub use pipeline::{ProvisionError, ProvisionStep, ProvisioningPipeline};
pub use reconciler::{ReconcileReport, Reconciler};
