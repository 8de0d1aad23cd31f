pub const DEFAULT_PORT: &str = "9502";
pub const DEFAULT_ROOM_ID: &str = "lobby";

pub const OUTBOUND_CHANNEL_CAPACITY: usize = 64;
pub const ROOM_COMMAND_CAPACITY: usize = 1024;

// Attempts to land a registration when the room it raced with was closing.
pub const REGISTER_ATTEMPTS: usize = 3;
