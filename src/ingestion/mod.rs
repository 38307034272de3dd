//! Ingestion-side building blocks: format routing, chunking, quality gating

pub mod chunker;
pub mod intake;
pub mod quality;
pub mod router;

pub use chunker::Chunker;
pub use intake::{DocumentIntake, IntakeRequest, RemoteAttachment};
pub use quality::{QualityGate, TextAssessment};
pub use router::{FormatRouter, RoutingDecision};
