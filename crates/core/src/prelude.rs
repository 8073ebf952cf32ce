pub use std::sync::{Arc, Mutex};
pub use std::time::{Duration, SystemTime};

pub use tracing::{debug, error, info, trace, warn};
