// Dispatch constants (no magic values)
use std::time::Duration;

/// Terminal jobs (acked, cancelled, discarded) kept per queue for lookup
pub const HISTORY_CAPACITY: usize = 1_000;

/// Sleep after a dispatch tick error before trying again (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Default interval between full queue-record syncs to the repository (30s)
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);
