pub use tracing::{debug, error, info, info_span, instrument, trace, warn};
