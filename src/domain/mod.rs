pub mod options;
pub mod record;
pub mod status;
pub mod window;

pub use options::{FieldSafelist, FieldSpec, OptionsError, ReportOptions};
pub use record::{LedgerRecord, RawRecord, RecordError, RecordId, RecordKind};
pub use status::{StatusId, StatusTable};
pub use window::{ReportWindow, WindowBounds, WindowError, WindowViolation};
