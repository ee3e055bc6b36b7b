pub mod embeddings;
pub mod error;
pub mod patients;

pub use embeddings::EmbeddingDb;
pub use error::StoreError;
pub use patients::{
    age_display, parse_dob_flexible, PatientDb, PatientFields, PatientRecord, QueueCounter,
    RenameOutcome,
};
