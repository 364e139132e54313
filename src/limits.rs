/// Longest stay a single reservation may cover.
pub const MAX_STAY_NIGHTS: i64 = 365;

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_LOCATION_LEN: usize = 200;
pub const MAX_CONTACT_LEN: usize = 320;
pub const MAX_AMENITIES: usize = 64;
