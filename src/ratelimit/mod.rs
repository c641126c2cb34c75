//! Rate limiting logic and state management.

mod clock;
mod decision;
mod key;
mod limiter;
pub mod presets;
mod reclaimer;
mod store;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::{Decision, RateLimitExceeded, RejectionBody};
pub use key::{
    client_address, ClientAddressKey, KeyDeriver, RequestHeaders, RequestMetadata,
    FORWARDED_FOR_HEADER, REAL_IP_HEADER, UNKNOWN_ADDRESS,
};
pub use limiter::{LimiterConfig, RateLimiter, WindowStatus};
pub use presets::{AdmissionControl, PresetRegistry};
pub use reclaimer::{
    spawn_periodic_sweep, sweep, ReclaimerHandle, SweepSampler, DEFAULT_SAMPLE_PROBABILITY,
};
pub use store::{LockedWindowStore, ShardedWindowStore, WindowStore};
pub use window::WindowEntry;
