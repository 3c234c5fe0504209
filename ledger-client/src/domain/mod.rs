mod record;
mod site;
mod summary;

pub use record::NormalizedRecord;
pub use site::Site;
pub use summary::{DailyDigest, HourlySummary};
