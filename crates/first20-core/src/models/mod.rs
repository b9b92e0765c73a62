pub mod config;
pub mod countdown;
pub mod profile;
pub mod session;
pub mod timer;

pub use config::{BackendConfig, Config, CountdownConfig};
pub use countdown::{Countdown, CountdownState, TickOutcome};
pub use profile::{Profile, SignupMetadata, User, DEFAULT_EMOJI};
pub use session::{AuthEvent, Session};
pub use timer::{TimeBreakdown, Timer, TWENTY_HOURS};
