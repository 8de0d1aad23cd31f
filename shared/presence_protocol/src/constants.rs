pub const MAX_USERNAME_LEN: usize = 32;
pub const MAX_COLOR_LEN: usize = 32;

pub const EVICTED_DUPLICATE_REGISTRATION: &str = "duplicate_registration";
