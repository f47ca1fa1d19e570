pub mod changes;
pub mod extractor;
pub mod updater;
pub mod walker;

pub use changes::{classify, classify_path, detect_project_changes, ChangeKind, ProjectChanges};
pub use extractor::{extract_todos, path_key, DiskSnapshot, FileExtraction, FileExtractor};
pub use updater::{IncrementalUpdater, UpdateFailure, UpdateStats, LAST_UPDATE_KEY};
pub use walker::FileWalker;
