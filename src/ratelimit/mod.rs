//! Sliding-window admission control and the state behind it.

mod clock;
mod engine;
mod limit;
mod locks;
mod reaper;
mod registry;
mod window;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use engine::{AdmissionEngine, Decision};
pub use limit::{Limit, LimitSpec};
pub use locks::{KeyLockTable, KeyState};
pub use reaper::{spawn_reaper, ReaperHandle};
pub use registry::LimitRegistry;
pub use window::{Usage, WindowLog};
