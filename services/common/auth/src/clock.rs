use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Source of "now" shared by token issuance, verification and refresh-token expiry.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}
