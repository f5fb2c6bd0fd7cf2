mod archive;
mod sample;
mod session;

pub use archive::{ArchiveMetadata, PatientInfo, SessionArchive, SessionInfo, DESTINATION_FIELD};
pub use sample::{Sample, SessionStats, BPM_RANGE, UTERUS_RANGE};
pub use session::{SessionContext, DEFAULT_SESSION_ID};
