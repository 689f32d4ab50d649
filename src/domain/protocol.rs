//! Wire-level names shared by the client and server halves of the protocol.
//!
//! Header names are lowercase so they can be handed to `HeaderName::from_static`.

pub const HEADER_INERTIA: &str = "x-inertia";
pub const HEADER_LOCATION: &str = "x-inertia-location";
pub const HEADER_VERSION: &str = "x-inertia-version";
pub const HEADER_PARTIAL_COMPONENT: &str = "x-inertia-partial-component";
pub const HEADER_PARTIAL_ONLY: &str = "x-inertia-partial-data";
pub const HEADER_PARTIAL_EXCEPT: &str = "x-inertia-partial-except";
pub const HEADER_RESET: &str = "x-inertia-reset";
pub const HEADER_ERROR_BAG: &str = "x-inertia-error-bag";
pub const HEADER_EXCEPT_ONCE_PROPS: &str = "x-inertia-except-once-props";
pub const HEADER_SCROLL_MERGE_INTENT: &str = "x-inertia-infinite-scroll-merge-intent";
pub const HEADER_PRECOGNITION: &str = "precognition";

/// Canonical spelling used in `Vary` values.
pub const VARY_INERTIA: &str = "X-Inertia";
pub const VARY_PRECOGNITION: &str = "Precognition";

pub const PROP_ERRORS: &str = "errors";
pub const PROP_OLD: &str = "old";
pub const PROP_FLASH: &str = "flash";
pub const PROP_CSRF_TOKEN: &str = "csrf_token";

/// Session key holding protocol props flashed across a redirect.
pub const SESSION_FLASH_KEY: &str = "props";

pub const DEFAULT_DEFERRED_GROUP: &str = "default";

/// Props that survive every partial reload filter.
pub const FORCED_PROPS: [&str; 3] = [PROP_ERRORS, PROP_OLD, PROP_FLASH];
